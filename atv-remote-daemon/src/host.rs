//! Host Adapter
//!
//! Binds config entries to control sessions and exposes each paired device
//! as a [`RemoteEntity`].

use crate::entries::ConfigEntry;
use atv_remote_protocol::{
    CommandBatch, ControlSession, DeviceIdentity, DispatchReport, RemoteControl, SessionConfig,
    StateCallback, TransportFactory,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Integration domain used in device identifiers
pub const DOMAIN: &str = "androidtv_remote";

/// Device registry details of an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDeviceInfo {
    /// `(domain, unique_id)`
    pub identifiers: (String, String),
    /// `vendor_model`
    pub name: String,
    /// Device vendor
    pub manufacturer: String,
    /// Device model
    pub model: String,
    /// Version of the remote service app on the device
    pub sw_version: String,
}

/// Remote entity for one paired device
#[derive(Clone)]
pub struct RemoteEntity {
    remote: Arc<dyn RemoteControl>,
}

impl RemoteEntity {
    /// Wrap a remote control
    pub fn new(remote: Arc<dyn RemoteControl>) -> Self {
        Self { remote }
    }

    /// Stable entity id: the device's unique id
    pub fn unique_id(&self) -> String {
        self.remote.identity().unique_id
    }

    /// Device registry details
    pub fn device_info(&self) -> EntityDeviceInfo {
        let DeviceIdentity { unique_id, info } = self.remote.identity();
        EntityDeviceInfo {
            identifiers: (DOMAIN.to_string(), unique_id),
            name: info.display_name(),
            manufacturer: info.vendor,
            model: info.model,
            sw_version: info.app_version,
        }
    }

    /// Current activity of the device
    pub fn current_activity(&self) -> String {
        self.remote.current_activity()
    }

    /// Whether the device is currently reachable
    pub fn available(&self) -> bool {
        self.remote.connection_state().is_connected()
    }

    /// Register for state changes once the entity is added
    ///
    /// Falls back to background reconnection when the device does not answer.
    pub async fn added(&self, on_change: StateCallback) {
        match self.remote.establish(Some(on_change.clone())).await {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!(
                    "Remote {} not reachable ({}), retrying in background",
                    self.unique_id(),
                    e
                );
                self.remote.start(Some(on_change));
            }
            Err(e) => error!("Remote {}: {}", self.unique_id(), e.user_message()),
        }
    }

    /// Release the connection when the entity goes away
    pub async fn will_remove(&self) {
        self.remote.disconnect().await;
    }

    /// Send `commands`, holding the first for `hold_secs` when given
    pub async fn send_command(
        &self,
        commands: &[String],
        hold_secs: Option<f64>,
    ) -> atv_remote_protocol::Result<DispatchReport> {
        let mut batch = CommandBatch::new(commands.iter().cloned());
        if let Some(secs) = hold_secs {
            batch = batch.with_hold_secs(secs)?;
        }
        self.remote.dispatch_commands(&batch).await
    }
}

impl std::fmt::Debug for RemoteEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEntity")
            .field("unique_id", &self.unique_id())
            .finish()
    }
}

/// Sessions of every loaded config entry
pub struct Host {
    factory: Arc<dyn TransportFactory>,
    session_config: SessionConfig,
    sessions: HashMap<String, ControlSession>,
}

impl Host {
    /// Create a host with no loaded entries
    pub fn new(factory: Arc<dyn TransportFactory>, session_config: SessionConfig) -> Self {
        Self {
            factory,
            session_config,
            sessions: HashMap::new(),
        }
    }

    /// Build and connect the session for `entry`
    ///
    /// A device that does not answer keeps reconnecting in the background.
    /// Other failures, such as a different device at the stored address,
    /// leave the session disconnected. Loading an entry that is already
    /// loaded returns the existing session.
    pub async fn setup_entry(&mut self, entry: &ConfigEntry) -> ControlSession {
        if let Some(session) = self.sessions.get(&entry.entry_id) {
            debug!("Entry {} already loaded", entry.entry_id);
            return session.clone();
        }

        info!(
            "Setting up entry {} ({} at {})",
            entry.entry_id, entry.data.unique_id, entry.data.host
        );
        let session = ControlSession::new(
            entry.data.clone(),
            self.factory.as_ref(),
            self.session_config.clone(),
        );

        match session.establish_connection(None).await {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!("Entry {} not ready: {}", entry.entry_id, e);
                session.start(None);
            }
            Err(e) => error!("Entry {} failed: {}", entry.entry_id, e.user_message()),
        }

        self.sessions
            .insert(entry.entry_id.clone(), session.clone());
        session
    }

    /// Remote entity of a loaded entry
    pub fn entity(&self, entry_id: &str) -> Option<RemoteEntity> {
        self.sessions
            .get(entry_id)
            .map(|session| RemoteEntity::new(Arc::new(session.clone())))
    }

    /// Ids of loaded entries
    pub fn entry_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Disconnect and forget the session of `entry_id`
    ///
    /// Returns whether the entry was loaded.
    pub async fn unload_entry(&mut self, entry_id: &str) -> bool {
        match self.sessions.remove(entry_id) {
            Some(session) => {
                session.disconnect().await;
                info!("Unloaded entry {}", entry_id);
                true
            }
            None => false,
        }
    }

    /// Disconnect every loaded session
    pub async fn unload_all(&mut self) {
        let sessions: Vec<ControlSession> = self.sessions.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        join_all(sessions.iter().map(ControlSession::disconnect)).await;
        info!("Unloaded {} entries", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atv_remote_protocol::{
        ConnectionState, DeviceInfo, DeviceRecord, ReconnectConfig, SessionSnapshot,
        SimulatedDevice, UNKNOWN_ACTIVITY,
    };
    use atv_remote_protocol::simulator::DeviceCall;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn device() -> SimulatedDevice {
        SimulatedDevice::new(
            "192.168.1.20",
            DeviceIdentity::new("ATV-1", DeviceInfo::new("NVIDIA", "SHIELD", "6.0")),
            "123456",
        )
    }

    fn entry(host: &str) -> ConfigEntry {
        ConfigEntry {
            entry_id: "entry-1".to_string(),
            title: crate::entries::ENTRY_TITLE.to_string(),
            data: DeviceRecord::new(host, "ATV-1"),
            created_at: Utc::now(),
        }
    }

    fn host(device: &SimulatedDevice) -> Host {
        Host::new(
            Arc::new(device.clone()),
            SessionConfig::new(ReconnectConfig {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
                max_attempts: None,
            }),
        )
    }

    #[tokio::test]
    async fn test_entity_reports_device() {
        let device = device();
        let mut host = host(&device);

        let session = host.setup_entry(&entry("192.168.1.20")).await;
        assert_eq!(session.connection_state(), ConnectionState::Connected);

        let entity = host.entity("entry-1").unwrap();
        assert_eq!(entity.unique_id(), "ATV-1");
        assert!(entity.available());
        assert_eq!(entity.current_activity(), UNKNOWN_ACTIVITY);

        let info = entity.device_info();
        assert_eq!(info.identifiers, (DOMAIN.to_string(), "ATV-1".to_string()));
        assert_eq!(info.name, "NVIDIA_SHIELD");
        assert_eq!(info.manufacturer, "NVIDIA");
        assert_eq!(info.model, "SHIELD");
        assert_eq!(info.sw_version, "6.0");
    }

    #[tokio::test]
    async fn test_send_command_with_hold() {
        let device = device();
        let mut host = host(&device);
        host.setup_entry(&entry("192.168.1.20")).await;
        let entity = host.entity("entry-1").unwrap();

        let report = entity
            .send_command(&["HOME".to_string(), "DPAD_UP".to_string()], None)
            .await
            .unwrap();
        assert_eq!(report.executed, vec!["HOME", "DPAD_UP"]);

        assert!(entity
            .send_command(&["POWER".to_string()], Some(-1.0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_added_tracks_activity() {
        let device = device();
        let mut host = host(&device);
        let session = host.setup_entry(&entry("192.168.1.20")).await;
        let entity = host.entity("entry-1").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        entity
            .added(Arc::new(move |snapshot: &SessionSnapshot| {
                sink.lock()
                    .unwrap()
                    .push(snapshot.activity_or_unknown().to_string());
            }))
            .await;

        let mut rx = session.subscribe();
        device.push_activity("com.netflix.ninja");
        rx.wait_for(|snapshot| snapshot.activity.is_some())
            .await
            .unwrap();

        assert_eq!(entity.current_activity(), "com.netflix.ninja");
        assert_eq!(
            seen.lock().unwrap().last().map(String::as_str),
            Some("com.netflix.ninja")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_entry_retries_in_background() {
        let device = device();
        device.set_online(false);
        let mut host = host(&device);

        let session = host.setup_entry(&entry("192.168.1.20")).await;
        assert_ne!(session.connection_state(), ConnectionState::Connected);

        device.set_online(true);
        let mut rx = session.subscribe();
        rx.wait_for(|snapshot| snapshot.connection.is_connected())
            .await
            .unwrap();
        assert!(device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_device_is_not_retried() {
        let device = device();
        device.set_identity(DeviceIdentity::new(
            "ATV-2",
            DeviceInfo::new("NVIDIA", "SHIELD", "6.0"),
        ));
        let mut host = host(&device);

        let session = host.setup_entry(&entry("192.168.1.20")).await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(session
            .snapshot()
            .last_error
            .is_some_and(|error| error.contains("ATV-2")));

        tokio::time::sleep(Duration::from_secs(30)).await;
        let connects = device
            .calls()
            .into_iter()
            .filter(|call| *call == DeviceCall::Connect)
            .count();
        assert_eq!(connects, 1);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(host.entry_ids(), vec!["entry-1".to_string()]);
    }

    #[tokio::test]
    async fn test_unload_disconnects() {
        let device = device();
        let mut host = host(&device);
        host.setup_entry(&entry("192.168.1.20")).await;
        let again = host.setup_entry(&entry("192.168.1.20")).await;
        assert_eq!(device.connection_count(), 1);
        assert!(again.connection_state().is_connected());

        assert!(host.unload_entry("entry-1").await);
        assert!(!host.unload_entry("entry-1").await);
        assert!(!device.is_connected());
        assert!(host.entity("entry-1").is_none());

        host.setup_entry(&entry("192.168.1.20")).await;
        host.unload_all().await;
        assert!(host.entry_ids().is_empty());
        assert!(!device.is_connected());
    }
}
