use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use feedcart_traits::{SourceKind, WeightSource};
use feedcart_wireless::{
    Connector, LinkCfg, LinkError, LinkState, Transport, WirelessLink, WirelessSource,
};

type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// In-memory node session. Commands are answered by `respond`; pushes come from the test.
struct FakeSession {
    respond: Responder,
    queued: VecDeque<String>,
    pushes: xch::Receiver<String>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Transport for FakeSession {
    fn send_text(&mut self, text: &str) -> Result<(), LinkError> {
        self.sent.lock().unwrap().push(text.to_string());
        if let Some(answer) = (self.respond)(text) {
            self.queued.push_back(answer);
        }
        Ok(())
    }

    fn recv_text(&mut self) -> Result<Option<String>, LinkError> {
        if let Some(text) = self.queued.pop_front() {
            return Ok(Some(text));
        }
        match self.pushes.recv_timeout(Duration::from_millis(5)) {
            Ok(text) => Ok(Some(text)),
            Err(xch::RecvTimeoutError::Timeout) => Ok(None),
            Err(xch::RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }
}

/// Hands out prepared sessions in order; refuses once they run out.
#[derive(Clone, Default)]
struct FakeConnector {
    sessions: Arc<Mutex<VecDeque<FakeSession>>>,
    attempts: Arc<AtomicUsize>,
}

impl FakeConnector {
    fn session(&self, respond: impl FnMut(&str) -> Option<String> + Send + 'static) -> Node {
        let (push_tx, pushes) = xch::unbounded();
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.sessions.lock().unwrap().push_back(FakeSession {
            respond: Box::new(respond),
            queued: VecDeque::new(),
            pushes,
            sent: sent.clone(),
        });
        Node { push_tx, sent }
    }
}

impl Connector for FakeConnector {
    fn connect(&mut self, _address: &str) -> Result<Box<dyn Transport>, LinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().pop_front() {
            Some(s) => Ok(Box::new(s)),
            None => Err(LinkError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            ))),
        }
    }
}

/// Test-side handle of one session.
struct Node {
    push_tx: xch::Sender<String>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Node {
    fn push(&self, total_kg: f64) {
        let frame = format!(
            r#"{{"type":"weight_data","total_kg":{total_kg},"corners":[1.0,2.0,3.0,4.0],"battery_v":3.8,"wifi_rssi":-50}}"#
        );
        self.push_tx.send(frame).unwrap();
    }

    fn push_raw(&self, frame: &str) {
        self.push_tx.send(frame.to_string()).unwrap();
    }
}

fn ack(command: &str, ok: bool) -> String {
    let status = if ok { "success" } else { "error" };
    format!(r#"{{"type":"response","command":"{command}","status":"{status}"}}"#)
}

fn fast_cfg() -> LinkCfg {
    LinkCfg {
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(20),
        max_retries: 2,
        status_timeout: Duration::from_millis(300),
        tare_timeout: Duration::from_millis(300),
        calibrate_timeout: Duration::from_millis(300),
        request_capacity: 8,
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn tare_round_trip_succeeds() {
    let connector = FakeConnector::default();
    let node = connector.session(|text| text.contains("tare").then(|| ack("tare", true)));
    let link = WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap();
    assert!(link.wait_connected(Duration::from_secs(1)));
    assert!(link.tare());
    assert_eq!(*node.sent.lock().unwrap(), vec![r#"{"command":"tare"}"#.to_string()]);
    assert_eq!(link.state(), LinkState::Connected);
}

#[test]
fn rejected_command_reports_false() {
    let connector = FakeConnector::default();
    let _node = connector.session(|_| Some(ack("calibrate", false)));
    let link = WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap();
    assert!(link.wait_connected(Duration::from_secs(1)));
    assert!(!link.calibrate(20.0));
}

#[test]
fn invalid_calibration_weight_is_not_sent() {
    let connector = FakeConnector::default();
    let node = connector.session(|_| Some(ack("calibrate", true)));
    let link = WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap();
    assert!(link.wait_connected(Duration::from_secs(1)));
    assert!(!link.calibrate(-1.0));
    assert!(node.sent.lock().unwrap().is_empty());
}

#[test]
fn unanswered_command_times_out_and_link_stays_usable() {
    let connector = FakeConnector::default();
    let mut first = true;
    let _node = connector.session(move |_| {
        if std::mem::take(&mut first) {
            None
        } else {
            Some(ack("tare", true))
        }
    });
    let link = WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap();
    assert!(link.wait_connected(Duration::from_secs(1)));

    let started = Instant::now();
    assert!(!link.tare());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(link.tare());
}

#[test]
fn get_status_returns_node_payload() {
    let connector = FakeConnector::default();
    let _node = connector.session(|_| {
        Some(r#"{"type":"status","device_name":"FeedCartScale","uptime":5}"#.to_string())
    });
    let link = WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap();
    assert!(link.wait_connected(Duration::from_secs(1)));
    let status = link.get_status().expect("status");
    assert_eq!(status.device_name, "FeedCartScale");
    assert_eq!(status.uptime, 5);
}

#[test]
fn pushes_reach_observers_until_removed() {
    let connector = FakeConnector::default();
    let node = connector.session(|_| None);
    let link = WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap();
    assert!(link.wait_connected(Duration::from_secs(1)));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    assert!(link.add_observer("display", move |s| sink.lock().unwrap().push(s.total_kg)));
    assert!(link.add_observer("broken", |_| panic!("observer bug")));

    node.push(12.5);
    assert!(wait_for(|| seen.lock().unwrap().len() == 1));
    assert_eq!(link.latest_sample().unwrap().total_kg, 12.5);

    assert!(link.remove_observer("display"));
    node.push(13.0);
    assert!(wait_for(|| link.latest_sample().is_some_and(|s| s.total_kg == 13.0)));
    assert_eq!(*seen.lock().unwrap(), vec![12.5]);
}

#[test]
fn reconnects_after_the_node_drops() {
    let connector = FakeConnector::default();
    let first = connector.session(|_| None);
    let second = connector.session(|_| None);
    let attempts = connector.attempts.clone();
    let link = WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap();
    assert!(link.wait_connected(Duration::from_secs(1)));

    drop(first);
    assert!(wait_for(|| attempts.load(Ordering::SeqCst) == 2));
    assert!(link.wait_connected(Duration::from_secs(1)));
    second.push(7.0);
    assert!(wait_for(|| link.latest_sample().is_some_and(|s| s.total_kg == 7.0)));
}

#[test]
fn gives_up_after_retry_budget() {
    let connector = FakeConnector::default();
    let attempts = connector.attempts.clone();
    let link = WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap();
    assert!(!link.wait_connected(Duration::from_secs(2)));
    assert!(wait_for(|| link.state() == LinkState::Failed));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(!link.tare());
}

#[test]
fn disconnect_fails_in_flight_request() {
    let connector = FakeConnector::default();
    let _node = connector.session(|_| None);
    let cfg = LinkCfg {
        tare_timeout: Duration::from_secs(30),
        ..fast_cfg()
    };
    let link = Arc::new(WirelessLink::start("10.0.0.5", cfg, connector).unwrap());
    assert!(link.wait_connected(Duration::from_secs(1)));

    let caller = {
        let link = link.clone();
        thread::spawn(move || {
            let started = Instant::now();
            (link.tare(), started.elapsed())
        })
    };
    assert!(wait_for(|| link.state() == LinkState::AwaitingResponse));
    link.disconnect();
    let (ok, waited) = caller.join().unwrap();
    assert!(!ok);
    assert!(waited < Duration::from_secs(5));
    assert!(!link.is_connected());
    assert!(!link.tare());
}

#[test]
fn wireless_source_serves_fresh_pushes() {
    let connector = FakeConnector::default();
    let node = connector.session(|_| None);
    let link = Arc::new(WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap());
    assert!(link.wait_connected(Duration::from_secs(1)));

    let mut source = WirelessSource::new(link.clone()).with_stale_after(Duration::from_millis(200));
    assert_eq!(source.kind(), SourceKind::Wireless);
    assert!(source.read_total().is_err(), "no push yet");

    node.push(42.0);
    assert!(wait_for(|| link.latest_sample().is_some()));
    assert_eq!(source.read_total().unwrap(), 42.0);
    assert_eq!(source.read_cells().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(source.probe(), 1);

    thread::sleep(Duration::from_millis(300));
    let err = source.read_total().unwrap_err();
    assert!(err.to_string().contains("stale"), "got {err}");
}

#[test]
fn push_without_corners_reports_missing_cells_not_a_dead_link() {
    let connector = FakeConnector::default();
    let node = connector.session(|_| None);
    let link = Arc::new(WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap());
    assert!(link.wait_connected(Duration::from_secs(1)));
    node.push_raw(r#"{"type":"weight_data","total_kg":9.0}"#);
    assert!(wait_for(|| link.latest_sample().is_some()));

    let mut source = WirelessSource::new(link.clone());
    assert_eq!(source.read_total().unwrap(), 9.0);
    let err = source.read_cells().unwrap_err();
    assert!(matches!(err.downcast_ref::<LinkError>(), Some(LinkError::NoCorners)), "got {err}");
    assert!(link.is_connected());
}

#[test]
fn negative_push_reads_as_zero() {
    let connector = FakeConnector::default();
    let node = connector.session(|_| None);
    let link = Arc::new(WirelessLink::start("10.0.0.5", fast_cfg(), connector).unwrap());
    assert!(link.wait_connected(Duration::from_secs(1)));
    node.push(-0.4);
    assert!(wait_for(|| link.latest_sample().is_some()));
    let mut source = WirelessSource::new(link);
    assert_eq!(source.read_total().unwrap(), 0.0);
}

#[test]
fn command_expired_in_the_queue_is_never_sent() {
    let connector = FakeConnector::default();
    let node = connector.session(|text| text.contains("\"tare\"").then(|| ack("tare", true)));
    let cfg = LinkCfg {
        calibrate_timeout: Duration::from_millis(800),
        tare_timeout: Duration::from_millis(100),
        ..fast_cfg()
    };
    let link = Arc::new(WirelessLink::start("10.0.0.5", cfg, connector).unwrap());
    assert!(link.wait_connected(Duration::from_secs(1)));

    // Calibrate is never answered and occupies the link for its whole timeout.
    let slow = {
        let link = link.clone();
        thread::spawn(move || link.calibrate(5.0))
    };
    assert!(wait_for(|| node.sent.lock().unwrap().len() == 1));

    assert!(!link.tare());
    assert!(!slow.join().unwrap());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(
        *node.sent.lock().unwrap(),
        vec![r#"{"command":"calibrate","weight":5.0}"#.to_string()]
    );

    // The link is free again and the next tare goes out.
    assert!(link.tare());
    assert_eq!(node.sent.lock().unwrap().len(), 2);
}
