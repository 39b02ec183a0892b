//! Remote Transport Layer
//!
//! The pairing flow and control session reach a device through the
//! [`RemoteTransport`] trait. The bridge transport implements it over
//! newline-delimited JSON on TCP.

mod r#trait;
pub mod bridge;
pub mod tcp;

pub use bridge::{
    BridgeConfig, BridgeTransport, BridgeTransportFactory, DEFAULT_CONTROL_PORT,
    DEFAULT_PAIRING_PORT,
};
pub use r#trait::{RemoteTransport, TransportEvent, TransportFactory};
pub use tcp::{PacketReader, PacketWriter, TcpConnection};
