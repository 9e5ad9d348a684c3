//! Manager fed by a wireless link over an in-memory transport.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use feedcart_core::{Mode, WeightManager, Writer};
use feedcart_hardware::SimulatedSource;
use feedcart_wireless::{Connector, LinkCfg, LinkError, Transport, WirelessLink, WirelessSource};

struct Session {
    pushes: xch::Receiver<String>,
    replies: VecDeque<String>,
    /// Weight the node pushes right before acknowledging a command.
    push_before_ack: Option<f64>,
}

impl Session {
    fn new(pushes: xch::Receiver<String>) -> Self {
        Self {
            pushes,
            replies: VecDeque::new(),
            push_before_ack: None,
        }
    }
}

impl Transport for Session {
    fn send_text(&mut self, text: &str) -> Result<(), LinkError> {
        for command in ["tare", "calibrate"] {
            if text.contains(&format!("\"{command}\"")) {
                if let Some(kg) = self.push_before_ack {
                    self.replies
                        .push_back(format!(r#"{{"type":"weight_data","total_kg":{kg}}}"#));
                }
                self.replies.push_back(format!(
                    r#"{{"type":"response","command":"{command}","status":"success"}}"#
                ));
            }
        }
        Ok(())
    }

    fn recv_text(&mut self) -> Result<Option<String>, LinkError> {
        if let Some(r) = self.replies.pop_front() {
            return Ok(Some(r));
        }
        match self.pushes.recv_timeout(Duration::from_millis(5)) {
            Ok(t) => Ok(Some(t)),
            Err(xch::RecvTimeoutError::Timeout) => Ok(None),
            Err(xch::RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }
}

struct OneShot(Arc<Mutex<Option<Session>>>);

impl Connector for OneShot {
    fn connect(&mut self, _address: &str) -> Result<Box<dyn Transport>, LinkError> {
        match self.0.lock().unwrap().take() {
            Some(s) => Ok(Box::new(s)),
            None => Err(LinkError::NotConnected),
        }
    }
}

fn push(tx: &xch::Sender<String>, kg: f64) {
    tx.send(format!(r#"{{"type":"weight_data","total_kg":{kg}}}"#))
        .unwrap();
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

fn start_link(session: Session) -> Arc<WirelessLink> {
    let cfg = LinkCfg {
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(10),
        max_retries: 1,
        tare_timeout: Duration::from_secs(2),
        calibrate_timeout: Duration::from_secs(2),
        ..LinkCfg::default()
    };
    let link = Arc::new(
        WirelessLink::start("192.168.4.1", cfg, OneShot(Arc::new(Mutex::new(Some(session)))))
            .unwrap(),
    );
    assert!(link.wait_connected(Duration::from_secs(1)));
    link
}

#[test]
fn pushes_and_polls_share_the_manager_state() {
    let (tx, pushes) = xch::unbounded();
    let link = start_link(Session::new(pushes));

    let manager = Arc::new(
        WeightManager::builder()
            .with_hardware(WirelessSource::new(link.clone()))
            .with_simulator(SimulatedSource::with_seed(2).with_noise(0.0).with_load(3.0))
            .build()
            .unwrap(),
    );
    assert_eq!(manager.mode(), Mode::Hardware);
    assert_eq!(manager.get_status().interface, "wireless");
    assert!(link.add_observer("manager", manager.sample_sink()));

    push(&tx, 61.0);
    assert!(wait_for(|| manager.get_status().current_weight == 61.0));
    assert_eq!(manager.get_status().last_writer, Some(Writer::Push));

    assert_eq!(manager.read_weight(false), 61.0);
    assert_eq!(manager.get_status().last_writer, Some(Writer::Poll));
    assert!(manager.tare_weight());

    // Node goes away and the one-shot connector cannot reconnect.
    drop(tx);
    assert!(wait_for(|| !link.is_connected()));
    for _ in 0..3 {
        assert_eq!(manager.read_weight(false), 61.0);
    }
    assert_eq!(manager.read_weight(false), 3.0);
    let status = manager.get_status();
    assert!(status.is_simulation);
    assert!(status.hardware_available);
    assert!(status.last_error.unwrap().contains("wireless link unavailable"));
}

#[test]
fn wireless_commands_complete_when_pushes_arrive_before_the_reply() {
    let (_tx, pushes) = xch::unbounded();
    let mut session = Session::new(pushes);
    session.push_before_ack = Some(42.0);
    let link = start_link(session);

    let manager = Arc::new(
        WeightManager::builder()
            .with_hardware(WirelessSource::new(link.clone()))
            .with_simulator(SimulatedSource::with_seed(2).with_noise(0.0))
            .build()
            .unwrap(),
    );
    assert!(link.add_observer("manager", manager.sample_sink()));

    let started = Instant::now();
    assert!(manager.tare_weight());
    assert!(manager.calibrate(20.0));
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "commands took {:?}",
        started.elapsed()
    );

    let status = manager.get_status();
    assert_eq!(status.current_weight, 42.0);
    assert_eq!(status.last_writer, Some(Writer::Push));
    assert_eq!(status.update_seq, 2);
}

#[test]
fn observer_reading_back_during_a_command_gets_the_current_value() {
    let (_tx, pushes) = xch::unbounded();
    let mut session = Session::new(pushes);
    session.push_before_ack = Some(7.5);
    let link = start_link(session);

    let manager = Arc::new(
        WeightManager::builder()
            .with_hardware(WirelessSource::new(link.clone()))
            .build()
            .unwrap(),
    );
    assert!(link.add_observer("manager", manager.sample_sink()));

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        let weak = Arc::downgrade(&manager);
        manager.register_observer("display", move |_| {
            if let Some(m) = weak.upgrade() {
                seen.lock().unwrap().push(m.read_weight(false));
            }
        });
    }

    assert!(manager.tare_weight());
    assert!(wait_for(|| !seen.lock().unwrap().is_empty()));
    assert_eq!(seen.lock().unwrap()[0], 7.5);
}
