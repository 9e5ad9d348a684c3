//! Shared seams of the feed-cart weighing stack.
//!
//! Everything that talks to a physical or simulated scale goes through
//! [`LoadCell`] (one amplifier channel, raw counts) or [`WeightSource`]
//! (a whole scale, kilograms). The manager in `feedcart_core` only ever sees
//! `WeightSource`.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::time::SystemTime;

/// Error type crossing the driver boundary.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Number of corner cells on the cart.
pub const CELL_COUNT: usize = 4;

/// One amplifier channel returning signed raw counts.
pub trait LoadCell {
    fn read(&mut self, timeout: std::time::Duration) -> Result<i32, SourceError>;
}

/// Which class of driver sits behind a [`WeightSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Wired,
    Wireless,
    Simulated,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Wired => "wired",
            SourceKind::Wireless => "wireless",
            SourceKind::Simulated => "simulation",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete scale reporting kilograms.
pub trait WeightSource {
    fn kind(&self) -> SourceKind;

    /// Total load in kilograms.
    fn read_total(&mut self) -> Result<f64, SourceError>;

    /// Per-cell load in kilograms, one entry per corner.
    fn read_cells(&mut self) -> Result<Vec<f64>, SourceError>;

    /// Capture the current load as the new zero. Returns false on failure.
    fn tare(&mut self) -> bool;

    /// Rescale so the current load reads as `known_kg`.
    fn calibrate(&mut self, _known_kg: f64) -> bool {
        false
    }

    /// Number of sensors answering right now. Used once, at detection time.
    fn probe(&mut self) -> usize;
}

impl<T: WeightSource + ?Sized> WeightSource for Box<T> {
    fn kind(&self) -> SourceKind {
        (**self).kind()
    }
    fn read_total(&mut self) -> Result<f64, SourceError> {
        (**self).read_total()
    }
    fn read_cells(&mut self) -> Result<Vec<f64>, SourceError> {
        (**self).read_cells()
    }
    fn tare(&mut self) -> bool {
        (**self).tare()
    }
    fn calibrate(&mut self, known_kg: f64) -> bool {
        (**self).calibrate(known_kg)
    }
    fn probe(&mut self) -> usize {
        (**self).probe()
    }
}

/// A decoded push from the wireless scale node.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSample {
    pub total_kg: f64,
    pub corner_kg: Option<[f64; CELL_COUNT]>,
    pub battery_voltage: f64,
    pub wifi_rssi: i32,
    pub timestamp: SystemTime,
}

impl WeightSample {
    /// Age of the sample relative to the wall clock; zero if the clock went backwards.
    pub fn age(&self) -> std::time::Duration {
        self.timestamp.elapsed().unwrap_or_default()
    }
}
