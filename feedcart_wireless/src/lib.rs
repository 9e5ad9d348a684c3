//! Wireless scale node support: discovery, the persistent command/push link,
//! and a `WeightSource` adapter over it.
pub mod discovery;
pub mod error;
pub mod link;
pub mod protocol;
pub mod source;
pub mod transport;

pub use discovery::{
    ConnectionInfo, Discovery, DiscoveryCfg, HttpProber, IwgetidSense, NetworkMode, NetworkSense,
    Prober,
};
pub use error::LinkError;
pub use link::{LinkCfg, LinkState, SampleObserver, WirelessLink};
pub use protocol::{Command, CommandResponse, InboundMessage, StatusResponse, WeightPush};
pub use source::WirelessSource;
pub use transport::{Connector, Transport, WsConnector};
