//! Manager-owned weight state and its read-only status snapshot.
use std::time::SystemTime;

use serde::Serialize;

use crate::util::unix_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Hardware,
    Simulation,
}

/// Which path produced the last `current_weight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Writer {
    /// A synchronous `read_weight`.
    Poll,
    /// A wireless push delivered through `ingest_sample`.
    Push,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightState {
    /// Last valid weight in kg, never negative.
    pub current_weight: f64,
    pub last_update: Option<SystemTime>,
    pub mode: Mode,
    pub hardware_available: bool,
    /// Consecutive failed reads since the last success.
    pub error_count: u32,
    pub last_error: Option<String>,
    /// Number of writes to `current_weight` so far.
    pub update_seq: u64,
    pub last_writer: Option<Writer>,
}

impl WeightState {
    pub(crate) fn new(hardware_available: bool) -> Self {
        Self {
            current_weight: 0.0,
            last_update: None,
            mode: if hardware_available {
                Mode::Hardware
            } else {
                Mode::Simulation
            },
            hardware_available,
            error_count: 0,
            last_error: None,
            update_seq: 0,
            last_writer: None,
        }
    }

    /// Record a valid weight. `kg` must already be clamped.
    pub(crate) fn commit(&mut self, kg: f64, writer: Writer) {
        self.current_weight = kg;
        self.last_update = Some(SystemTime::now());
        self.error_count = 0;
        self.update_seq = self.update_seq.wrapping_add(1);
        self.last_writer = Some(writer);
    }

    pub(crate) fn record_failure(&mut self, message: String) {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(message);
    }
}

/// Read-only copy of the manager state for diagnostics screens and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub current_weight: f64,
    pub is_simulation: bool,
    pub hardware_available: bool,
    /// Active source: `wired`, `wireless` or `simulation`.
    pub interface: &'static str,
    /// Unix epoch milliseconds of the last valid weight.
    pub last_update: Option<u64>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub observers_count: usize,
    pub update_seq: u64,
    pub last_writer: Option<Writer>,
}

impl StatusSnapshot {
    pub(crate) fn from_state(
        state: &WeightState,
        interface: &'static str,
        observers_count: usize,
    ) -> Self {
        Self {
            current_weight: state.current_weight,
            is_simulation: state.mode == Mode::Simulation,
            hardware_available: state.hardware_available,
            interface,
            last_update: state.last_update.and_then(unix_ms),
            error_count: state.error_count,
            last_error: state.last_error.clone(),
            observers_count,
            update_seq: state.update_seq,
            last_writer: state.last_writer,
        }
    }
}
