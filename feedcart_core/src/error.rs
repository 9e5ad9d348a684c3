use thiserror::Error;

/// Typed view of a failed source operation, kept in `WeightState::last_error`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WeightError {
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("no load cell responded")]
    NoSensor,
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("wireless link unavailable: {0}")]
    LinkDown(String),
    #[error("stale wireless sample ({0} ms old)")]
    Stale(u64),
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    #[error("source error: {0}")]
    Source(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
