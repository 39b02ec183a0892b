//! Transport Trait Abstraction
//!
//! The pairing flow and the control session never speak a wire protocol
//! themselves. They drive a [`RemoteTransport`] bound to one device address,
//! obtained from a [`TransportFactory`].

use crate::{DeviceInfo, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::mpsc;

/// Asynchronous notification from a transport to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The device reported a new current activity
    ActivityChanged(String),

    /// The live connection dropped
    ConnectionLost(String),
}

/// Call surface of the device library, bound to one address
///
/// One value serves as the pairing handshake object during onboarding and as
/// the connection handle inside a control session.
#[async_trait]
pub trait RemoteTransport: Send + Sync + Debug {
    /// Address this transport is bound to
    fn address(&self) -> &str;

    /// Begin the pairing handshake
    ///
    /// Returns `Ok(false)` when the device declines to start pairing.
    async fn start_pairing(&mut self) -> Result<bool>;

    /// Confirm pairing with the code shown on the device
    ///
    /// Returns `Ok(false)` when the code is rejected.
    async fn finish_pairing(&mut self, code: &str) -> Result<bool>;

    /// Open the control connection
    ///
    /// Activity changes and connection loss are reported on `events` until
    /// [`disconnect`](Self::disconnect) is called.
    async fn establish_connection(
        &mut self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<()>;

    /// Release the control connection. Safe to call when not connected.
    async fn disconnect(&mut self);

    /// Press and release a key
    async fn key_press(&mut self, key: &str) -> Result<()>;

    /// Press a key without releasing it
    async fn key_down(&mut self, key: &str) -> Result<()>;

    /// Release a key previously pressed with [`key_down`](Self::key_down)
    async fn key_up(&mut self, key: &str) -> Result<()>;

    /// Last activity the device reported on this connection, if any
    fn current_activity(&self) -> Option<String>;

    /// Identity advertised by the device, once known
    fn unique_id(&self) -> Option<String>;

    /// Vendor details advertised by the device, once known
    fn device_info(&self) -> Option<DeviceInfo>;
}

/// Factory for transports bound to a device address
pub trait TransportFactory: Send + Sync + Debug {
    /// Create an unconnected transport for `address`
    fn create(&self, address: &str) -> Box<dyn RemoteTransport>;
}
