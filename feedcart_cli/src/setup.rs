//! Composition root: picks the hardware source and assembles the manager.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use feedcart_config::{Config, SourceSelect};
use feedcart_core::{WeightManager, WeightManagerBuilder, conversions};
use feedcart_wireless::{
    ConnectionInfo, Discovery, DiscoveryCfg, LinkCfg, WirelessLink, WirelessSource, WsConnector,
};
use tracing::{info, warn};

/// Everything a command needs; dropping it disconnects the link.
pub struct Cart {
    pub manager: Arc<WeightManager>,
    pub link: Option<Arc<WirelessLink>>,
    pub node: Option<ConnectionInfo>,
}

pub fn discovery_cfg(w: &feedcart_config::Wireless) -> DiscoveryCfg {
    DiscoveryCfg {
        identity: w.identity.clone(),
        ap_ssid: w.ap_ssid.clone(),
        ap_address: w.ap_address.clone(),
        shared_candidates: w.candidates(),
        http_port: w.http_port,
        status_path: w.status_path.clone(),
        probe_timeout: Duration::from_millis(w.probe_timeout_ms),
        cache_ttl: Duration::from_millis(w.discovery_cache_ms),
    }
}

pub fn link_cfg(w: &feedcart_config::Wireless) -> LinkCfg {
    LinkCfg {
        backoff_base: Duration::from_millis(w.backoff_base_ms),
        backoff_max: Duration::from_millis(w.backoff_max_ms),
        max_retries: w.max_retries,
        status_timeout: Duration::from_millis(w.status_timeout_ms),
        tare_timeout: Duration::from_millis(w.tare_timeout_ms),
        calibrate_timeout: Duration::from_millis(w.calibrate_timeout_ms),
        ..LinkCfg::default()
    }
}

pub fn ws_connector(w: &feedcart_config::Wireless) -> WsConnector {
    WsConnector {
        port: w.ws_port,
        path: w.ws_path.clone(),
        connect_timeout: Duration::from_millis(w.connect_timeout_ms),
        ..WsConnector::default()
    }
}

/// Build the manager from config. `force_simulation` skips all detection;
/// `confirm_tare` makes a wired tare wait for Enter on stdin.
pub fn assemble(cfg: &Config, force_simulation: bool, confirm_tare: bool) -> eyre::Result<Cart> {
    let builder = WeightManager::builder()
        .with_config(&cfg.manager)
        .with_simulator(conversions::simulator(&cfg.simulation));

    let select = if force_simulation {
        SourceSelect::Simulation
    } else {
        cfg.manager.source
    };

    let (builder, link, node) = match select {
        SourceSelect::Simulation => (builder, None, None),
        SourceSelect::Wired => (attach_wired(builder, cfg, confirm_tare).0, None, None),
        SourceSelect::Wireless => attach_wireless(builder, cfg),
        SourceSelect::Auto => {
            let (builder, opened) = if cfg.wired.channels.is_empty() {
                (builder, false)
            } else {
                attach_wired(builder, cfg, confirm_tare)
            };
            if !opened && cfg.wireless.enabled {
                attach_wireless(builder, cfg)
            } else {
                (builder, None, None)
            }
        }
    };

    let manager = Arc::new(builder.build()?);
    if let Some(link) = &link
        && !link.add_observer("manager", manager.sample_sink())
    {
        warn!("link did not acknowledge the manager observer");
    }
    Ok(Cart {
        manager,
        link,
        node,
    })
}

fn attach_wired(
    builder: WeightManagerBuilder,
    cfg: &Config,
    confirm_tare: bool,
) -> (WeightManagerBuilder, bool) {
    let layout = conversions::channel_layout(&cfg.wired);
    match feedcart_hardware::open_wired_array(&layout, conversions::wired_cfg(&cfg.wired)) {
        Ok(array) => {
            info!(channels = array.channel_count(), "wired load cells opened");
            let array = if confirm_tare {
                array.with_tare_confirm(enter_to_confirm(
                    std::io::BufReader::new(std::io::stdin()),
                    std::io::stderr(),
                ))
            } else {
                array
            };
            (builder.with_hardware(array), true)
        }
        Err(e) => {
            warn!(error = %e, "wired load cells unavailable");
            (builder, false)
        }
    }
}

fn attach_wireless(
    builder: WeightManagerBuilder,
    cfg: &Config,
) -> (
    WeightManagerBuilder,
    Option<Arc<WirelessLink>>,
    Option<ConnectionInfo>,
) {
    let w = &cfg.wireless;
    let discovery = Discovery::with_defaults(discovery_cfg(w));
    let Some(node) = discovery.discover(false) else {
        info!("no wireless scale node found");
        return (builder, None, None);
    };

    let link = match WirelessLink::start(node.address.clone(), link_cfg(w), ws_connector(w)) {
        Ok(link) => Arc::new(link),
        Err(e) => {
            warn!(error = %e, "could not start wireless link");
            discovery.invalidate();
            return (builder, None, Some(node));
        }
    };
    let connect_timeout = Duration::from_millis(w.connect_timeout_ms);
    if !link.wait_connected(connect_timeout) {
        warn!(address = %node.address, "wireless node did not accept a connection");
        discovery.invalidate();
        return (builder, None, Some(node));
    }

    let stale_after = Duration::from_millis(w.stale_after_ms);
    wait_first_push(&link, stale_after);
    let source = WirelessSource::new(link.clone()).with_stale_after(stale_after);
    (builder.with_hardware(source), Some(link), Some(node))
}

/// Tare confirmation hook: prompts once per tare, then reports true after a
/// line arrives on `input`. Lines typed before the prompt do not count.
/// `input` is read on a background thread from construction on.
pub fn enter_to_confirm<R, W>(input: R, mut prompt: W) -> impl FnMut() -> bool + Send + 'static
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut reader = input;
        let mut buf = String::new();
        while matches!(reader.read_line(&mut buf), Ok(n) if n > 0) {
            buf.clear();
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    let mut prompted = false;
    move || {
        if !prompted {
            while rx.try_recv().is_ok() {}
            let _ = writeln!(prompt, "Empty the cart, then press Enter to tare.");
            let _ = prompt.flush();
            prompted = true;
        }
        if rx.try_recv().is_ok() {
            prompted = false;
            return true;
        }
        false
    }
}

/// Give the node one push interval to report, so the first read is not a miss.
fn wait_first_push(link: &WirelessLink, within: Duration) {
    let deadline = Instant::now() + within;
    while link.latest_sample().is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireless_section_maps_to_runtime_cfgs() {
        let cfg = feedcart_config::load_toml(
            "[wireless]\nsubnet_prefix = \"10.0.0.\"\nhost_first = 5\nhost_last = 6\n\
             extra_hosts = [\"scale.local\"]\nws_port = 8181\nmax_retries = 2\n",
        )
        .unwrap();
        let d = discovery_cfg(&cfg.wireless);
        assert_eq!(d.shared_candidates, vec!["10.0.0.5", "10.0.0.6", "scale.local"]);
        assert_eq!(d.cache_ttl, Duration::from_secs(30));

        let l = link_cfg(&cfg.wireless);
        assert_eq!(l.max_retries, 2);
        assert_eq!(l.tare_timeout, Duration::from_secs(5));

        let c = ws_connector(&cfg.wireless);
        assert_eq!(c.port, 8181);
        assert_eq!(c.path, "/");
    }

    #[test]
    fn forced_simulation_skips_detection() {
        let cart = assemble(&Config::default(), true, false).unwrap();
        assert!(cart.link.is_none());
        assert!(cart.node.is_none());
        assert!(cart.manager.get_status().is_simulation);
    }

    /// Writer whose bytes stay readable from the test.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn poll_until(confirm: &mut impl FnMut() -> bool, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if confirm() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn tare_confirmation_waits_for_a_line_after_the_prompt() {
        let (mut writer, reader) = pipe();
        let out = Captured::default();
        let mut confirm = enter_to_confirm(reader, out.clone());

        // Enter pressed before the first prompt is discarded.
        writer.write_all(b"\n").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!poll_until(&mut confirm, Duration::from_millis(50)));
        let shown = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert!(shown.contains("press Enter to tare"), "got {shown:?}");

        writer.write_all(b"\n").unwrap();
        assert!(poll_until(&mut confirm, Duration::from_secs(1)));

        // Next tare prompts again and needs a fresh line.
        assert!(!poll_until(&mut confirm, Duration::from_millis(50)));
        assert_eq!(
            String::from_utf8(out.0.lock().unwrap().clone()).unwrap().matches("press Enter").count(),
            2
        );
    }

    #[test]
    fn closed_input_never_confirms() {
        let mut confirm = enter_to_confirm(std::io::Cursor::new(Vec::new()), std::io::sink());
        assert!(!poll_until(&mut confirm, Duration::from_millis(100)));
    }

    /// In-process pipe: the writer feeds the `BufRead` handed to the hook.
    fn pipe() -> (PipeWriter, std::io::BufReader<PipeReader>) {
        let (tx, rx) = mpsc::channel();
        (
            PipeWriter(tx),
            std::io::BufReader::new(PipeReader {
                rx,
                pending: Vec::new(),
            }),
        )
    }

    struct PipeWriter(mpsc::Sender<Vec<u8>>);

    impl PipeWriter {
        fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
            self.0
                .send(buf.to_vec())
                .map_err(|_| std::io::ErrorKind::BrokenPipe.into())
        }
    }

    struct PipeReader {
        rx: mpsc::Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl std::io::Read for PipeReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv() {
                    Ok(chunk) => self.pending = chunk,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }
}
