//! Socket seam under the link worker.
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tungstenite::{Message, WebSocket};

use crate::error::{LinkError, Result};

/// A connected, message-oriented channel to the node.
pub trait Transport: Send {
    fn send_text(&mut self, text: &str) -> Result<()>;

    /// Next text frame, or `Ok(None)` if nothing arrived within the poll interval.
    fn recv_text(&mut self) -> Result<Option<String>>;

    fn close(&mut self) {}
}

/// Opens transports to a node address.
pub trait Connector: Send {
    fn connect(&mut self, address: &str) -> Result<Box<dyn Transport>>;
}

/// WebSocket over plain TCP, as served by the node firmware.
#[derive(Debug, Clone)]
pub struct WsConnector {
    pub port: u16,
    pub path: String,
    pub connect_timeout: Duration,
    /// Read timeout once connected; bounds one turn of the worker loop.
    pub poll_interval: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            port: 81,
            path: "/".to_string(),
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl Connector for WsConnector {
    fn connect(&mut self, address: &str) -> Result<Box<dyn Transport>> {
        let sock = (address, self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| LinkError::Handshake(format!("cannot resolve {address}")))?;
        let stream = TcpStream::connect_timeout(&sock, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.connect_timeout))?;

        let url = format!("ws://{address}:{}{}", self.port, self.path);
        let (ws, _response) = tungstenite::client(url.as_str(), stream)
            .map_err(|e| LinkError::Handshake(e.to_string()))?;
        ws.get_ref().set_read_timeout(Some(self.poll_interval))?;
        Ok(Box::new(WsTransport { ws }))
    }
}

struct WsTransport {
    ws: WebSocket<TcpStream>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: &str) -> Result<()> {
        self.ws
            .send(Message::Text(text.to_owned()))
            .map_err(map_ws_error)
    }

    fn recv_text(&mut self) -> Result<Option<String>> {
        match self.ws.read() {
            Ok(Message::Text(text)) => Ok(Some(text)),
            Ok(Message::Binary(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Ok(Message::Close(_)) => Err(LinkError::Closed),
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(map_ws_error(e)),
        }
    }

    fn close(&mut self) {
        let _ = self.ws.close(None);
        let _ = self.ws.flush();
    }
}

fn map_ws_error(e: tungstenite::Error) -> LinkError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            LinkError::Closed
        }
        tungstenite::Error::Io(io) => LinkError::Io(io),
        other => LinkError::WebSocket(other.to_string()),
    }
}
