//! Locating the wireless scale node.
//!
//! The node either runs its own access point (fixed address) or has joined the
//! operator's network (somewhere in a short candidate list). A candidate counts
//! only if its status payload carries the expected `device_name`.
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use feedcart_traits::clock::{Clock, MonotonicClock};
use serde::Serialize;
use tracing::{debug, info};

use crate::protocol::StatusResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    NodeIsAccessPoint,
    NodeOnSharedNetwork,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub address: String,
    pub mode: NetworkMode,
    pub discovered_at: SystemTime,
}

#[derive(Debug, Clone)]
pub struct DiscoveryCfg {
    /// Expected `device_name` in the status payload.
    pub identity: String,
    /// SSID the node broadcasts in access-point mode.
    pub ap_ssid: String,
    /// Node address on its own access-point network.
    pub ap_address: String,
    /// Addresses tried on the operator's network, in order.
    pub shared_candidates: Vec<String>,
    pub http_port: u16,
    pub status_path: String,
    pub probe_timeout: Duration,
    /// How long a successful result is reused.
    pub cache_ttl: Duration,
}

impl Default for DiscoveryCfg {
    fn default() -> Self {
        Self {
            identity: "FeedCartScale".to_string(),
            ap_ssid: "FeedCartScale".to_string(),
            ap_address: "192.168.4.1".to_string(),
            shared_candidates: (100..=110).map(|h| format!("192.168.1.{h}")).collect(),
            http_port: 80,
            status_path: "/status".to_string(),
            probe_timeout: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Fetches a candidate's status payload. `None` covers every failure.
pub trait Prober: Send + Sync {
    fn fetch_status(&self, address: &str) -> Option<StatusResponse>;
}

/// Reports the SSID the local WiFi interface is associated with.
pub trait NetworkSense: Send + Sync {
    fn current_ssid(&self) -> Option<String>;
}

/// `GET http://<address>:<port><path>` with short timeouts.
pub struct HttpProber {
    agent: ureq::Agent,
    port: u16,
    path: String,
}

impl HttpProber {
    pub fn new(port: u16, path: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            port,
            path: path.into(),
        }
    }

    pub fn from_cfg(cfg: &DiscoveryCfg) -> Self {
        Self::new(cfg.http_port, cfg.status_path.clone(), cfg.probe_timeout)
    }

    pub fn status_url(&self, address: &str) -> String {
        format!("http://{address}:{}{}", self.port, self.path)
    }
}

impl Prober for HttpProber {
    fn fetch_status(&self, address: &str) -> Option<StatusResponse> {
        let url = self.status_url(address);
        let response = match self.agent.get(&url).call() {
            Ok(r) => r,
            Err(e) => {
                debug!(%url, error = %e, "status probe failed");
                return None;
            }
        };
        match response.into_json::<StatusResponse>() {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(%url, error = %e, "status payload not understood");
                None
            }
        }
    }
}

/// Asks `iwgetid -r` for the associated SSID (Linux wireless tools).
#[derive(Debug, Default, Clone, Copy)]
pub struct IwgetidSense;

impl NetworkSense for IwgetidSense {
    fn current_ssid(&self) -> Option<String> {
        let out = std::process::Command::new("iwgetid").arg("-r").output().ok()?;
        if !out.status.success() {
            return None;
        }
        let ssid = String::from_utf8_lossy(&out.stdout).trim().to_string();
        (!ssid.is_empty()).then_some(ssid)
    }
}

pub struct Discovery {
    cfg: DiscoveryCfg,
    prober: Box<dyn Prober>,
    sense: Box<dyn NetworkSense>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<(ConnectionInfo, Instant)>>,
}

impl Discovery {
    pub fn new(
        cfg: DiscoveryCfg,
        prober: impl Prober + 'static,
        sense: impl NetworkSense + 'static,
    ) -> Self {
        Self {
            cfg,
            prober: Box::new(prober),
            sense: Box::new(sense),
            clock: Arc::new(MonotonicClock::new()),
            cache: Mutex::new(None),
        }
    }

    /// HTTP prober plus `iwgetid` SSID detection.
    pub fn with_defaults(cfg: DiscoveryCfg) -> Self {
        let prober = HttpProber::from_cfg(&cfg);
        Self::new(cfg, prober, IwgetidSense)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cfg(&self) -> &DiscoveryCfg {
        &self.cfg
    }

    /// Find the node, reusing a result younger than the cache TTL unless
    /// `force_rescan` is set. Absence is `None`, never an error.
    pub fn discover(&self, force_rescan: bool) -> Option<ConnectionInfo> {
        if !force_rescan && let Some(info) = self.cached() {
            debug!(address = %info.address, "using cached discovery result");
            return Some(info);
        }

        let found = self.scan();
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        *cache = found
            .clone()
            .map(|info| (info, self.clock.now()));
        found
    }

    /// Drop the cached result, e.g. after a failed connection attempt.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        *cache = None;
    }

    /// Addresses that would be probed right now, in probe order.
    pub fn candidates(&self) -> Vec<(String, NetworkMode)> {
        let on_node_ap = self
            .sense
            .current_ssid()
            .is_some_and(|ssid| ssid == self.cfg.ap_ssid);
        if on_node_ap {
            vec![(self.cfg.ap_address.clone(), NetworkMode::NodeIsAccessPoint)]
        } else {
            self.cfg
                .shared_candidates
                .iter()
                .map(|a| (a.clone(), NetworkMode::NodeOnSharedNetwork))
                .collect()
        }
    }

    fn cached(&self) -> Option<ConnectionInfo> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        let (info, at) = cache.as_ref()?;
        let age = self.clock.now().saturating_duration_since(*at);
        (age < self.cfg.cache_ttl).then(|| info.clone())
    }

    fn scan(&self) -> Option<ConnectionInfo> {
        for (address, mode) in self.candidates() {
            let Some(status) = self.prober.fetch_status(&address) else {
                continue;
            };
            if status.device_name != self.cfg.identity {
                debug!(
                    %address,
                    device_name = %status.device_name,
                    "identity mismatch, ignoring device"
                );
                continue;
            }
            info!(%address, ?mode, "wireless scale node found");
            return Some(ConnectionInfo {
                address,
                mode,
                discovered_at: SystemTime::now(),
            });
        }
        debug!("wireless scale node not found");
        None
    }
}
