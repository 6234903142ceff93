pub mod audit;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod delivery;
pub mod dumper;
pub mod error;
pub mod frame;
pub mod hooks;
pub mod host;
pub mod interaction;
pub mod message;
pub mod pinger;
pub mod server;
pub mod token;
pub mod transport;
pub mod watchdog;

pub use error::{WsError, WsResult};
pub use server::{ChannelServer, ChannelServerConfig};
