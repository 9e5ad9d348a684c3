use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("load cell timeout")]
    Timeout,
    #[error("hx711 data-ready timeout")]
    DataReadyTimeout,
    #[error("no load cell channel responded")]
    NoResponsiveChannels,
    #[error("tare not confirmed within {0} ms")]
    TareNotConfirmed(u64),
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
