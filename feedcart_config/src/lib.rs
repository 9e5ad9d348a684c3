#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and calibration parsing for the feed-cart scale.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//!   Every section has defaults, so an empty file describes a cart with no
//!   wired channels that discovers its wireless node on the default network.
//! - The calibration CSV overrides per-channel zero offsets and gains.
use std::collections::BTreeSet;

use serde::Deserialize;

/// Calibration CSV schema.
///
/// Expected headers:
/// channel,zero_counts,kg_per_count
///
/// Example:
/// channel,zero_counts,kg_per_count
/// 0,84213,0.0000213
/// 1,-1200,0.0000209
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CalibrationRow {
    pub channel: usize,
    pub zero_counts: i32,
    pub kg_per_count: f64,
}

/// One HX711 corner channel.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChannelCfg {
    pub hx711_dt: u8,
    pub hx711_sck: u8,
    /// Extra clock pulses after each read: 1 = A/128, 2 = B/32, 3 = A/64.
    #[serde(default = "default_gain_pulses")]
    pub gain_pulses: u8,
    #[serde(default)]
    pub zero_counts: i32,
    #[serde(default = "default_kg_per_count")]
    pub kg_per_count: f64,
}

fn default_gain_pulses() -> u8 {
    1
}

fn default_kg_per_count() -> f64 {
    1e-5
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Wired {
    /// Max time to wait for HX711 data-ready (DT low) per channel read
    pub read_timeout_ms: u64,
    /// Reads averaged per channel when capturing a tare offset
    pub tare_samples: usize,
    /// How long tare waits for operator confirmation
    pub tare_confirm_timeout_ms: u64,
    pub channels: Vec<ChannelCfg>,
}

impl Default for Wired {
    fn default() -> Self {
        Self {
            read_timeout_ms: 150,
            tare_samples: 10,
            tare_confirm_timeout_ms: 30_000,
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Wireless {
    /// Disable to never look for a wireless node
    pub enabled: bool,
    /// Expected `device_name` in the node's status payload
    pub identity: String,
    pub ap_ssid: String,
    pub ap_address: String,
    /// Shared-network candidates are `<subnet_prefix><host>` for host in
    /// `host_first..=host_last`, followed by `extra_hosts`.
    pub subnet_prefix: String,
    pub host_first: u8,
    pub host_last: u8,
    pub extra_hosts: Vec<String>,
    pub http_port: u16,
    pub status_path: String,
    pub ws_port: u16,
    pub ws_path: String,
    pub probe_timeout_ms: u64,
    pub discovery_cache_ms: u64,
    pub connect_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_retries: u32,
    pub status_timeout_ms: u64,
    pub tare_timeout_ms: u64,
    pub calibrate_timeout_ms: u64,
    /// Pushed samples older than this are not served as the current weight
    pub stale_after_ms: u64,
}

impl Default for Wireless {
    fn default() -> Self {
        Self {
            enabled: true,
            identity: "FeedCartScale".to_string(),
            ap_ssid: "FeedCartScale".to_string(),
            ap_address: "192.168.4.1".to_string(),
            subnet_prefix: "192.168.1.".to_string(),
            host_first: 100,
            host_last: 110,
            extra_hosts: Vec::new(),
            http_port: 80,
            status_path: "/status".to_string(),
            ws_port: 81,
            ws_path: "/".to_string(),
            probe_timeout_ms: 2_000,
            discovery_cache_ms: 30_000,
            connect_timeout_ms: 5_000,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
            max_retries: 8,
            status_timeout_ms: 2_000,
            tare_timeout_ms: 5_000,
            calibrate_timeout_ms: 10_000,
            stale_after_ms: 3_000,
        }
    }
}

impl Wireless {
    /// Shared-network addresses in probe order.
    pub fn candidates(&self) -> Vec<String> {
        (self.host_first..=self.host_last)
            .map(|h| format!("{}{h}", self.subnet_prefix))
            .chain(self.extra_hosts.iter().cloned())
            .collect()
    }
}

/// Which source the manager starts from.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceSelect {
    /// Wired channels if configured, else a discovered wireless node, else simulation
    #[default]
    Auto,
    Wired,
    Wireless,
    Simulation,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Manager {
    /// Cached reads younger than this are served without I/O
    pub cache_ms: u64,
    /// Consecutive failed reads tolerated before demoting to simulation
    pub error_threshold: u32,
    pub source: SourceSelect,
}

impl Default for Manager {
    fn default() -> Self {
        Self {
            cache_ms: 100,
            error_threshold: 3,
            source: SourceSelect::Auto,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Simulation {
    /// Uniform noise band (± kg) added to each simulated read
    pub noise_kg: f64,
    pub initial_load_kg: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            noise_kg: 0.1,
            initial_load_kg: 0.0,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub wired: Wired,
    pub wireless: Wireless,
    pub manager: Manager,
    pub simulation: Simulation,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<Vec<CalibrationRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["channel", "zero_counts", "kg_per_count"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'channel,zero_counts,kg_per_count', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    let mut seen = BTreeSet::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        let line = idx + 2;
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", line, e))?;
        if !seen.insert(row.channel) {
            eyre::bail!("calibration CSV row {} repeats channel {}", line, row.channel);
        }
        if !row.kg_per_count.is_finite() || row.kg_per_count == 0.0 {
            eyre::bail!(
                "calibration CSV row {}: kg_per_count must be finite and non-zero",
                line
            );
        }
        rows.push(row);
    }
    if rows.is_empty() {
        eyre::bail!("calibration CSV {:?} has no rows", path);
    }
    Ok(rows)
}

impl Config {
    /// Overwrite channel factors with CSV rows. Every row must name a configured channel.
    pub fn apply_calibration(&mut self, rows: &[CalibrationRow]) -> eyre::Result<()> {
        let count = self.wired.channels.len();
        for row in rows {
            let Some(ch) = self.wired.channels.get_mut(row.channel) else {
                eyre::bail!(
                    "calibration names channel {} but only {} wired channel(s) are configured",
                    row.channel,
                    count
                );
            };
            ch.zero_counts = row.zero_counts;
            ch.kg_per_count = row.kg_per_count;
        }
        Ok(())
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Wired
        if self.wired.read_timeout_ms == 0 {
            eyre::bail!("wired.read_timeout_ms must be >= 1");
        }
        if self.wired.tare_samples == 0 {
            eyre::bail!("wired.tare_samples must be >= 1");
        }
        if self.wired.tare_samples > 1000 {
            eyre::bail!("wired.tare_samples is unreasonably large (>1000)");
        }
        if self.wired.tare_confirm_timeout_ms > 10 * 60 * 1000 {
            eyre::bail!("wired.tare_confirm_timeout_ms is unreasonably large (>10min)");
        }
        let mut pins = BTreeSet::new();
        for (i, ch) in self.wired.channels.iter().enumerate() {
            if ch.hx711_dt == ch.hx711_sck {
                eyre::bail!("wired.channels[{i}] uses pin {} for both dt and sck", ch.hx711_dt);
            }
            for pin in [ch.hx711_dt, ch.hx711_sck] {
                if !pins.insert(pin) {
                    eyre::bail!("wired.channels[{i}] reuses pin {pin} already assigned");
                }
            }
            if !(1..=3).contains(&ch.gain_pulses) {
                eyre::bail!("wired.channels[{i}].gain_pulses must be in [1, 3]");
            }
            if !ch.kg_per_count.is_finite() || ch.kg_per_count == 0.0 {
                eyre::bail!("wired.channels[{i}].kg_per_count must be finite and non-zero");
            }
        }

        // Wireless
        let w = &self.wireless;
        if w.identity.trim().is_empty() {
            eyre::bail!("wireless.identity must not be empty");
        }
        if w.ap_address.trim().is_empty() {
            eyre::bail!("wireless.ap_address must not be empty");
        }
        if w.host_first > w.host_last {
            eyre::bail!("wireless.host_first must be <= wireless.host_last");
        }
        if w.http_port == 0 {
            eyre::bail!("wireless.http_port must be > 0");
        }
        if w.ws_port == 0 {
            eyre::bail!("wireless.ws_port must be > 0");
        }
        if !w.status_path.starts_with('/') {
            eyre::bail!("wireless.status_path must start with '/'");
        }
        if !w.ws_path.starts_with('/') {
            eyre::bail!("wireless.ws_path must start with '/'");
        }
        for (name, v) in [
            ("probe_timeout_ms", w.probe_timeout_ms),
            ("connect_timeout_ms", w.connect_timeout_ms),
            ("backoff_base_ms", w.backoff_base_ms),
            ("status_timeout_ms", w.status_timeout_ms),
            ("tare_timeout_ms", w.tare_timeout_ms),
            ("calibrate_timeout_ms", w.calibrate_timeout_ms),
            ("stale_after_ms", w.stale_after_ms),
        ] {
            if v == 0 {
                eyre::bail!("wireless.{name} must be >= 1");
            }
        }
        if w.backoff_max_ms < w.backoff_base_ms {
            eyre::bail!("wireless.backoff_max_ms must be >= wireless.backoff_base_ms");
        }

        // Manager
        if self.manager.cache_ms > 60_000 {
            eyre::bail!("manager.cache_ms is unreasonably large (>60s)");
        }
        if self.manager.source == SourceSelect::Wired && self.wired.channels.is_empty() {
            eyre::bail!("manager.source = \"wired\" requires at least one [[wired.channels]] entry");
        }
        if self.manager.source == SourceSelect::Wireless && !w.enabled {
            eyre::bail!("manager.source = \"wireless\" requires wireless.enabled = true");
        }

        // Simulation
        let s = &self.simulation;
        if !s.noise_kg.is_finite() || s.noise_kg < 0.0 {
            eyre::bail!("simulation.noise_kg must be >= 0.0");
        }
        if s.noise_kg > 100.0 {
            eyre::bail!("simulation.noise_kg is unreasonably large (>100 kg)");
        }
        if !s.initial_load_kg.is_finite() || s.initial_load_kg < 0.0 {
            eyre::bail!("simulation.initial_load_kg must be >= 0.0");
        }

        // Logging
        if let Some(rotation) = self.logging.rotation.as_deref()
            && !matches!(rotation, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }
}
