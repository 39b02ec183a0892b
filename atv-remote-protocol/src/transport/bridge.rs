//! Bridge Transport
//!
//! [`RemoteTransport`] implementation that talks to a remote-control bridge
//! reachable on the device address. The bridge terminates the TV's native
//! protocol; this side only exchanges `atvremote.*` packets.
//!
//! ## Pairing (pairing port)
//!
//! 1. `atvremote.pair.start` → `atvremote.pair.started` (`accepted`, `uniqueId`,
//!    `vendor`, `model`, `appVersion`)
//! 2. `atvremote.pair.finish` (`code`) → `atvremote.pair.finished` (`accepted`)
//!
//! ## Control (control port)
//!
//! `atvremote.identity` is exchanged on connect. Afterwards `atvremote.key`
//! (`key`, `direction`) flows to the bridge and `atvremote.activity`
//! (`activity`) flows back.

use super::tcp::{PacketWriter, TcpConnection};
use super::{RemoteTransport, TransportEvent, TransportFactory};
use crate::packet::{self, Packet};
use crate::{DeviceInfo, ProtocolError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default bridge port for the control connection
pub const DEFAULT_CONTROL_PORT: u16 = 6466;

/// Default bridge port for pairing
pub const DEFAULT_PAIRING_PORT: u16 = 6467;

/// Name we announce to the bridge
const CLIENT_NAME: &str = "atv-remote";

/// Bridge connection settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Port of the pairing service
    pub pairing_port: u16,
    /// Port of the control service
    pub control_port: u16,
    /// Timeout for opening a TCP connection
    pub connect_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pairing_port: DEFAULT_PAIRING_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            connect_timeout: super::tcp::TCP_TIMEOUT,
        }
    }
}

/// Creates [`BridgeTransport`]s
#[derive(Debug, Clone, Default)]
pub struct BridgeTransportFactory {
    config: BridgeConfig,
}

impl BridgeTransportFactory {
    /// Create a factory with the given settings
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for BridgeTransportFactory {
    fn create(&self, address: &str) -> Box<dyn RemoteTransport> {
        Box::new(BridgeTransport::new(address, self.config.clone()))
    }
}

/// Key direction on the wire
#[derive(Debug, Clone, Copy)]
enum KeyDirection {
    Press,
    Down,
    Up,
}

impl KeyDirection {
    fn as_str(self) -> &'static str {
        match self {
            KeyDirection::Press => "press",
            KeyDirection::Down => "down",
            KeyDirection::Up => "up",
        }
    }
}

/// Transport bound to one bridge address
pub struct BridgeTransport {
    address: String,
    config: BridgeConfig,
    pairing: Option<TcpConnection>,
    writer: Option<PacketWriter>,
    reader_task: Option<JoinHandle<()>>,
    activity: watch::Receiver<Option<String>>,
    unique_id: Option<String>,
    device_info: Option<DeviceInfo>,
}

impl BridgeTransport {
    /// Create an unconnected transport
    pub fn new(address: impl Into<String>, config: BridgeConfig) -> Self {
        let (_, activity) = watch::channel(None);
        Self {
            address: address.into(),
            config,
            pairing: None,
            writer: None,
            reader_task: None,
            activity,
            unique_id: None,
            device_info: None,
        }
    }

    fn forget_identity(&mut self) {
        self.unique_id = None;
        self.device_info = None;
    }

    fn remember_identity(&mut self, packet: &Packet) {
        if let Some(id) = packet.get_body_field::<String>("uniqueId") {
            self.unique_id = Some(id);
        }

        let vendor = packet.get_body_field::<String>("vendor");
        let model = packet.get_body_field::<String>("model");
        if let (Some(vendor), Some(model)) = (vendor, model) {
            let app_version = packet
                .get_body_field::<String>("appVersion")
                .unwrap_or_else(|| "unknown".to_string());
            self.device_info = Some(DeviceInfo::new(vendor, model, app_version));
        }
    }

    async fn send_key(&mut self, key: &str, direction: KeyDirection) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(ProtocolError::NotConnected)?;
        let packet = Packet::new(
            packet::KEY,
            json!({ "key": key, "direction": direction.as_str() }),
        );
        writer.send_packet(&packet).await
    }

    async fn close_pairing(&mut self) {
        if let Some(conn) = self.pairing.take() {
            if let Err(e) = conn.close().await {
                debug!("Error closing pairing connection to {}: {}", self.address, e);
            }
        }
    }
}

impl fmt::Debug for BridgeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeTransport")
            .field("address", &self.address)
            .field("pairing", &self.pairing.is_some())
            .field("connected", &self.writer.is_some())
            .field("unique_id", &self.unique_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteTransport for BridgeTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn start_pairing(&mut self) -> Result<bool> {
        self.close_pairing().await;
        self.forget_identity();

        let mut conn = TcpConnection::connect(
            &self.address,
            self.config.pairing_port,
            self.config.connect_timeout,
        )
        .await?;

        let reply = conn
            .request(&Packet::new(
                packet::PAIR_START,
                json!({ "clientName": CLIENT_NAME }),
            ))
            .await?
            .expect_type(packet::PAIR_STARTED)?;

        if !reply.get_body_field::<bool>("accepted").unwrap_or(false) {
            info!("Bridge at {} declined to start pairing", self.address);
            let _ = conn.close().await;
            return Ok(false);
        }

        self.remember_identity(&reply);
        self.pairing = Some(conn);
        info!("Pairing started with {}", self.address);
        Ok(true)
    }

    async fn finish_pairing(&mut self, code: &str) -> Result<bool> {
        let conn = self
            .pairing
            .as_mut()
            .ok_or_else(|| ProtocolError::InvalidState("pairing not started".to_string()))?;

        let reply = conn
            .request(&Packet::new(packet::PAIR_FINISH, json!({ "code": code })))
            .await?
            .expect_type(packet::PAIR_FINISHED)?;

        if !reply.get_body_field::<bool>("accepted").unwrap_or(false) {
            info!("Pairing code rejected by {}", self.address);
            return Ok(false);
        }

        self.remember_identity(&reply);
        self.close_pairing().await;
        info!("Pairing finished with {}", self.address);
        Ok(true)
    }

    async fn establish_connection(
        &mut self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<()> {
        self.disconnect().await;
        self.forget_identity();

        let mut conn = TcpConnection::connect(
            &self.address,
            self.config.control_port,
            self.config.connect_timeout,
        )
        .await?;

        let identity = conn
            .request(&Packet::new(
                packet::IDENTITY,
                json!({ "clientName": CLIENT_NAME }),
            ))
            .await?
            .expect_type(packet::IDENTITY)?;
        self.remember_identity(&identity);

        let (activity_tx, activity_rx) =
            watch::channel(identity.get_body_field::<String>("activity"));
        self.activity = activity_rx;

        let (mut reader, writer) = conn.into_split();
        let address = self.address.clone();

        let reader_task = tokio::spawn(async move {
            let reason = loop {
                match reader.receive_packet().await {
                    Ok(Some(packet)) if packet.is_type(packet::ACTIVITY) => {
                        let Some(activity) = packet.get_body_field::<String>("activity") else {
                            warn!("Activity packet from {} without activity field", address);
                            continue;
                        };
                        let _ = activity_tx.send(Some(activity.clone()));
                        if events.send(TransportEvent::ActivityChanged(activity)).is_err() {
                            return;
                        }
                    }
                    Ok(Some(packet)) => {
                        debug!("Ignoring packet '{}' from {}", packet.packet_type, address);
                    }
                    Ok(None) => break "bridge closed the connection".to_string(),
                    Err(e) => break e.to_string(),
                }
            };

            warn!("Control connection to {} lost: {}", address, reason);
            let _ = events.send(TransportEvent::ConnectionLost(reason));
        });

        self.writer = Some(writer);
        self.reader_task = Some(reader_task);
        info!("Control connection established to {}", self.address);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                debug!("Error closing control connection to {}: {}", self.address, e);
            }
            info!("Control connection to {} closed", self.address);
        }

        self.close_pairing().await;
    }

    async fn key_press(&mut self, key: &str) -> Result<()> {
        self.send_key(key, KeyDirection::Press).await
    }

    async fn key_down(&mut self, key: &str) -> Result<()> {
        self.send_key(key, KeyDirection::Down).await
    }

    async fn key_up(&mut self, key: &str) -> Result<()> {
        self.send_key(key, KeyDirection::Up).await
    }

    fn current_activity(&self) -> Option<String> {
        self.activity.borrow().clone()
    }

    fn unique_id(&self) -> Option<String> {
        self.unique_id.clone()
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        self.device_info.clone()
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}
