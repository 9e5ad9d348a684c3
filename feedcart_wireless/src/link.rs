//! Persistent command/push channel to the wireless scale node.
//!
//! A dedicated worker thread owns the transport, reconnects with exponential
//! backoff and decodes pushes. Callers never touch the socket: every public
//! operation is a request sent over a bounded channel, answered on a one-shot
//! reply channel with a bounded wait. The worker is stopped and joined by
//! `disconnect()` or on drop.
use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel as xch;
use feedcart_traits::WeightSample;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, Result};
use crate::protocol::{Command, InboundMessage, StatusResponse, decode};
use crate::transport::{Connector, Transport};

/// Callback receiving every decoded push, on the worker thread.
pub type SampleObserver = Arc<dyn Fn(&WeightSample) + Send + Sync>;

/// Slack added to the worker-side command timeout before a caller gives up.
const HANDSHAKE_MARGIN: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    AwaitingResponse,
    /// Retry budget exhausted; rediscover and start a new link.
    Failed,
}

impl LinkState {
    pub fn is_connected(self) -> bool {
        matches!(self, LinkState::Connected | LinkState::AwaitingResponse)
    }
}

#[derive(Debug, Clone)]
pub struct LinkCfg {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Reconnect attempts after a failure before the link gives up.
    pub max_retries: u32,
    pub status_timeout: Duration,
    pub tare_timeout: Duration,
    pub calibrate_timeout: Duration,
    /// Depth of the caller → worker request queue.
    pub request_capacity: usize,
}

impl Default for LinkCfg {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
            max_retries: 8,
            status_timeout: Duration::from_secs(2),
            tare_timeout: Duration::from_secs(5),
            calibrate_timeout: Duration::from_secs(10),
            request_capacity: 16,
        }
    }
}

impl LinkCfg {
    fn timeout_for(&self, command: &Command) -> Duration {
        match command {
            Command::Tare => self.tare_timeout,
            Command::Calibrate { .. } => self.calibrate_timeout,
            Command::GetStatus => self.status_timeout,
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based), doubling from `base` up to `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

type Reply = xch::Sender<Result<InboundMessage>>;

enum Request {
    /// `deadline` is when the caller stops waiting; the command is not sent after it.
    Command {
        command: Command,
        reply: Reply,
        deadline: Instant,
    },
    AddObserver { name: String, observer: SampleObserver, ack: xch::Sender<()> },
    RemoveObserver { name: String, ack: xch::Sender<()> },
    Stop,
}

struct Shared {
    state: Mutex<LinkState>,
    changed: Condvar,
    latest: Mutex<Option<WeightSample>>,
    stopping: AtomicBool,
}

impl Shared {
    fn state(&self) -> LinkState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, next: LinkState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state != next {
            debug!(from = ?*state, to = ?next, "link state");
            *state = next;
            self.changed.notify_all();
        }
    }
}

pub struct WirelessLink {
    address: String,
    cfg: LinkCfg,
    tx: xch::Sender<Request>,
    shared: Arc<Shared>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WirelessLink {
    /// Spawn the worker and start connecting to `address` in the background.
    pub fn start(
        address: impl Into<String>,
        cfg: LinkCfg,
        connector: impl Connector + 'static,
    ) -> Result<Self> {
        let address = address.into();
        let (tx, rx) = xch::bounded(cfg.request_capacity.max(1));
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState::Disconnected),
            changed: Condvar::new(),
            latest: Mutex::new(None),
            stopping: AtomicBool::new(false),
        });

        let worker = Worker {
            address: address.clone(),
            cfg: cfg.clone(),
            connector: Box::new(connector),
            rx,
            shared: shared.clone(),
            observers: BTreeMap::new(),
            pending: None,
            backlog: VecDeque::new(),
        };
        let join_handle = std::thread::Builder::new()
            .name("feedcart-link".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            address,
            cfg,
            tx,
            shared,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Block until connected, permanently failed, or `timeout`. Returns whether connected.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let guard = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(guard, timeout, |s| {
                !s.is_connected() && *s != LinkState::Failed
            })
            .unwrap_or_else(|p| p.into_inner());
        state.is_connected()
    }

    /// Most recent push, if any arrived on this link.
    pub fn latest_sample(&self) -> Option<WeightSample> {
        self.shared
            .latest
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn tare(&self) -> bool {
        self.expect_success(Command::Tare)
    }

    pub fn calibrate(&self, known_kg: f64) -> bool {
        if !(known_kg.is_finite() && known_kg > 0.0) {
            warn!(known_kg, "calibration weight must be positive");
            return false;
        }
        self.expect_success(Command::Calibrate { weight: known_kg })
    }

    pub fn get_status(&self) -> Option<StatusResponse> {
        match self.request(Command::GetStatus) {
            Ok(InboundMessage::Status(status)) => Some(status),
            Ok(other) => {
                debug!(?other, "get_status answered without a status payload");
                None
            }
            Err(e) => {
                warn!(error = %e, "get_status failed");
                None
            }
        }
    }

    /// Register a push observer; duplicate names overwrite. Returns false if
    /// the worker did not acknowledge in time.
    pub fn add_observer(
        &self,
        name: impl Into<String>,
        observer: impl Fn(&WeightSample) + Send + Sync + 'static,
    ) -> bool {
        let (ack, done) = xch::bounded(1);
        let req = Request::AddObserver {
            name: name.into(),
            observer: Arc::new(observer),
            ack,
        };
        self.handshake(req, &done)
    }

    pub fn remove_observer(&self, name: &str) -> bool {
        let (ack, done) = xch::bounded(1);
        let req = Request::RemoveObserver {
            name: name.to_string(),
            ack,
        };
        self.handshake(req, &done)
    }

    /// Stop the worker. In-flight and later requests fail instead of blocking.
    pub fn disconnect(&self) {
        self.shared.stopping.store(true, Ordering::Relaxed);
        let _ = self.tx.try_send(Request::Stop);
        let handle = self
            .join_handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            // Last owner dropped from inside an observer: the worker exits on its own.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            match handle.join() {
                Ok(()) => debug!("link worker joined"),
                Err(e) => warn!(?e, "link worker panicked during shutdown"),
            }
        }
    }

    fn handshake(&self, req: Request, done: &xch::Receiver<()>) -> bool {
        let timeout = self.cfg.status_timeout;
        if self.tx.send_timeout(req, timeout).is_err() {
            return false;
        }
        done.recv_timeout(timeout).is_ok()
    }

    fn expect_success(&self, command: Command) -> bool {
        match self.request(command) {
            Ok(InboundMessage::Response(r)) if r.is_success() => true,
            Ok(InboundMessage::Response(r)) => {
                warn!(
                    command = command.name(),
                    message = r.message.as_deref().unwrap_or(""),
                    "node rejected command"
                );
                false
            }
            Ok(_) => false,
            Err(e) => {
                warn!(command = command.name(), error = %e, "command failed");
                false
            }
        }
    }

    fn request(&self, command: Command) -> Result<InboundMessage> {
        if self.shared.stopping.load(Ordering::Relaxed) {
            return Err(LinkError::Stopped);
        }
        if self.state() == LinkState::Failed {
            return Err(LinkError::Failed(self.cfg.max_retries));
        }
        let timeout = self.cfg.timeout_for(&command);
        let deadline = Instant::now() + timeout;
        let (reply, answer) = xch::bounded(1);
        let req = Request::Command {
            command,
            reply,
            deadline,
        };
        self.tx
            .send_timeout(req, timeout)
            .map_err(|_| LinkError::Timeout(command.name()))?;
        match answer.recv_timeout(timeout + HANDSHAKE_MARGIN) {
            Ok(result) => result,
            Err(xch::RecvTimeoutError::Timeout) => Err(LinkError::Timeout(command.name())),
            Err(xch::RecvTimeoutError::Disconnected) => Err(LinkError::Stopped),
        }
    }
}

impl Drop for WirelessLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct Queued {
    command: Command,
    reply: Reply,
    deadline: Instant,
}

struct Pending {
    command: Command,
    reply: Reply,
    deadline: Instant,
}

enum Exit {
    Stop,
    Lost(LinkError),
}

struct Worker {
    address: String,
    cfg: LinkCfg,
    connector: Box<dyn Connector>,
    rx: xch::Receiver<Request>,
    shared: Arc<Shared>,
    observers: BTreeMap<String, SampleObserver>,
    pending: Option<Pending>,
    backlog: VecDeque<Queued>,
}

impl Worker {
    fn stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Relaxed)
    }

    fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            if self.stopping() {
                break;
            }
            self.shared.set_state(LinkState::Connecting);
            match self.connector.connect(&self.address) {
                Ok(transport) => {
                    failures = 0;
                    self.shared.set_state(LinkState::Connected);
                    info!(address = %self.address, "wireless link connected");
                    let exit = self.serve(transport);
                    self.fail_outstanding(|| LinkError::NotConnected);
                    self.shared.set_state(LinkState::Disconnected);
                    match exit {
                        Exit::Stop => break,
                        Exit::Lost(e) => warn!(error = %e, "wireless link lost"),
                    }
                }
                Err(e) => {
                    self.shared.set_state(LinkState::Disconnected);
                    warn!(address = %self.address, attempt = failures + 1, error = %e, "connect failed");
                    if failures >= self.cfg.max_retries {
                        error!(retries = failures, "wireless link giving up");
                        self.shared.set_state(LinkState::Failed);
                        break;
                    }
                    failures += 1;
                }
            }
            let delay = backoff_delay(
                self.cfg.backoff_base,
                self.cfg.backoff_max,
                failures.max(1),
            );
            if !self.idle(delay) {
                break;
            }
        }
        self.shutdown();
    }

    /// Answer requests while disconnected until `delay` passes. False on stop.
    fn idle(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.stopping() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(Request::Stop) => return false,
                Ok(Request::Command { reply, .. }) => {
                    let _ = reply.send(Err(LinkError::NotConnected));
                }
                Ok(req) => self.apply_registry(req),
                Err(xch::RecvTimeoutError::Timeout) => return true,
                Err(xch::RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn serve(&mut self, mut transport: Box<dyn Transport>) -> Exit {
        loop {
            if self.stopping() {
                transport.close();
                return Exit::Stop;
            }

            loop {
                match self.rx.try_recv() {
                    Ok(Request::Stop) | Err(xch::TryRecvError::Disconnected) => {
                        transport.close();
                        return Exit::Stop;
                    }
                    Ok(Request::Command {
                        command,
                        reply,
                        deadline,
                    }) => {
                        self.backlog.push_back(Queued {
                            command,
                            reply,
                            deadline,
                        });
                    }
                    Ok(req) => self.apply_registry(req),
                    Err(xch::TryRecvError::Empty) => break,
                }
            }

            if let Err(e) = self.send_next(transport.as_mut()) {
                return Exit::Lost(e);
            }

            match transport.recv_text() {
                Ok(Some(text)) => self.dispatch(&text),
                Ok(None) => {}
                Err(e) => return Exit::Lost(e),
            }

            if let Some(p) = self.pending.take_if(|p| Instant::now() >= p.deadline) {
                warn!(command = p.command.name(), "no response from node");
                let _ = p.reply.send(Err(LinkError::Timeout(p.command.name())));
                self.shared.set_state(LinkState::Connected);
            }
        }
    }

    fn send_next(&mut self, transport: &mut dyn Transport) -> Result<()> {
        if self.pending.is_some() {
            return Ok(());
        }
        let now = Instant::now();
        while self.backlog.front().is_some_and(|q| now >= q.deadline) {
            if let Some(q) = self.backlog.pop_front() {
                debug!(command = q.command.name(), "caller gave up before send, dropping");
                let _ = q.reply.send(Err(LinkError::Timeout(q.command.name())));
            }
        }
        let Some(Queued {
            command,
            reply,
            deadline,
        }) = self.backlog.pop_front()
        else {
            return Ok(());
        };
        let text = match command.encode() {
            Ok(text) => text,
            Err(e) => {
                let _ = reply.send(Err(e));
                return Ok(());
            }
        };
        if let Err(e) = transport.send_text(&text) {
            let _ = reply.send(Err(LinkError::NotConnected));
            return Err(e);
        }
        debug!(command = command.name(), "command sent");
        self.pending = Some(Pending {
            command,
            reply,
            deadline,
        });
        self.shared.set_state(LinkState::AwaitingResponse);
        Ok(())
    }

    fn dispatch(&mut self, text: &str) {
        let msg = match decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "undecodable message from node");
                return;
            }
        };

        let msg = match msg {
            InboundMessage::WeightData(push) => {
                self.publish(push.into_sample(SystemTime::now()));
                return;
            }
            other => other,
        };

        if let Some(p) = self
            .pending
            .take_if(|p| p.command.is_answered_by(&msg))
        {
            let _ = p.reply.send(Ok(msg));
            self.shared.set_state(LinkState::Connected);
            return;
        }

        match msg {
            InboundMessage::Unknown(kind) => debug!(%kind, "ignoring unknown message type"),
            other => debug!(?other, "unsolicited message"),
        }
    }

    fn publish(&self, sample: WeightSample) {
        {
            let mut latest = self.shared.latest.lock().unwrap_or_else(|p| p.into_inner());
            *latest = Some(sample.clone());
        }
        for (name, observer) in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| (**observer)(&sample))).is_err() {
                error!(observer = %name, "push observer panicked");
            }
        }
    }

    fn apply_registry(&mut self, req: Request) {
        match req {
            Request::AddObserver {
                name,
                observer,
                ack,
            } => {
                self.observers.insert(name, observer);
                let _ = ack.send(());
            }
            Request::RemoveObserver { name, ack } => {
                self.observers.remove(&name);
                let _ = ack.send(());
            }
            Request::Command { .. } | Request::Stop => {}
        }
    }

    fn fail_outstanding(&mut self, err: impl Fn() -> LinkError) {
        if let Some(p) = self.pending.take() {
            let _ = p.reply.send(Err(err()));
        }
        for q in self.backlog.drain(..) {
            let _ = q.reply.send(Err(err()));
        }
    }

    fn shutdown(&mut self) {
        self.fail_outstanding(|| LinkError::Stopped);
        while let Ok(req) = self.rx.try_recv() {
            if let Request::Command { reply, .. } = req {
                let _ = reply.send(Err(LinkError::Stopped));
            }
        }
        if self.shared.state() != LinkState::Failed {
            self.shared.set_state(LinkState::Disconnected);
        }
        self.shared.changed.notify_all();
        debug!("link worker exiting");
    }
}
