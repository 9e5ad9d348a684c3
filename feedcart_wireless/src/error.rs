use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link io: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("malformed message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("connection closed by node")]
    Closed,
    #[error("link not connected")]
    NotConnected,
    #[error("command timeout: {0}")]
    Timeout(&'static str),
    #[error("link permanently failed after {0} retries")]
    Failed(u32),
    #[error("link stopped")]
    Stopped,
    #[error("stale weight sample ({0} ms old)")]
    Stale(u64),
    #[error("weight push carried no per-corner readings")]
    NoCorners,
}

pub type Result<T> = std::result::Result<T, LinkError>;
