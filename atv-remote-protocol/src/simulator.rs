//! Simulated Device
//!
//! In-memory Android TV used by tests and the daemon's `--simulate` mode.
//! A [`SimulatedDevice`] is a [`TransportFactory`]: every transport it
//! creates talks to the same shared device state, and every device call is
//! recorded with a [`tokio::time::Instant`] so callers can assert ordering
//! and hold timing.

use crate::transport::{RemoteTransport, TransportEvent, TransportFactory};
use crate::{DeviceIdentity, DeviceInfo, ProtocolError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// A call received by the simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    StartPairing,
    FinishPairing(String),
    Connect,
    Disconnect,
    KeyPress(String),
    KeyDown(String),
    KeyUp(String),
}

impl DeviceCall {
    /// Whether this call is a key action
    pub fn is_key(&self) -> bool {
        matches!(
            self,
            DeviceCall::KeyPress(_) | DeviceCall::KeyDown(_) | DeviceCall::KeyUp(_)
        )
    }
}

#[derive(Debug)]
struct LiveConnection {
    id: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Debug)]
struct DeviceState {
    address: String,
    identity: DeviceIdentity,
    code: String,
    online: bool,
    unresponsive: bool,
    latency: Duration,
    pairing: bool,
    activity: Option<String>,
    failing_keys: HashSet<String>,
    live: Option<LiveConnection>,
    next_connection_id: u64,
    connection_count: u32,
    calls: Vec<(Instant, DeviceCall)>,
}

/// Shared handle to a simulated device
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Create an online device at `address` accepting `code`
    pub fn new(address: impl Into<String>, identity: DeviceIdentity, code: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                address: address.into(),
                identity,
                code: code.into(),
                online: true,
                unresponsive: false,
                latency: Duration::ZERO,
                pairing: false,
                activity: None,
                failing_keys: HashSet::new(),
                live: None,
                next_connection_id: 1,
                connection_count: 0,
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Address the device answers on
    pub fn address(&self) -> String {
        self.lock().address.clone()
    }

    /// Identity the device advertises
    pub fn identity(&self) -> DeviceIdentity {
        self.lock().identity.clone()
    }

    /// Change the advertised identity
    pub fn set_identity(&self, identity: DeviceIdentity) {
        self.lock().identity = identity;
    }

    /// Take the device on or off the network
    ///
    /// Going offline drops the live connection.
    pub fn set_online(&self, online: bool) {
        let mut state = self.lock();
        state.online = online;
        if !online {
            state.pairing = false;
            if let Some(live) = state.live.take() {
                let _ = live
                    .events
                    .send(TransportEvent::ConnectionLost("device went offline".to_string()));
            }
        }
    }

    /// Make pairing and connect calls hang forever
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.lock().unresponsive = unresponsive;
    }

    /// Delay every device call by `latency`
    ///
    /// Calls are recorded once the delay has elapsed.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Make every call for `key` fail
    pub fn fail_key(&self, key: impl Into<String>) {
        self.lock().failing_keys.insert(key.into());
    }

    /// Stop failing key calls
    pub fn clear_failures(&self) {
        self.lock().failing_keys.clear();
    }

    /// Report a new activity on the live connection
    pub fn push_activity(&self, activity: impl Into<String>) {
        let activity = activity.into();
        let mut state = self.lock();
        state.activity = Some(activity.clone());
        if let Some(live) = &state.live {
            let _ = live.events.send(TransportEvent::ActivityChanged(activity));
        }
    }

    /// Drop the live connection while staying online
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        if let Some(live) = state.live.take() {
            debug!("Simulated device dropping connection {}", live.id);
            let _ = live
                .events
                .send(TransportEvent::ConnectionLost("connection reset".to_string()));
        }
    }

    /// Whether a control connection is open
    pub fn is_connected(&self) -> bool {
        self.lock().live.is_some()
    }

    /// Whether a pairing handshake is open
    pub fn is_pairing(&self) -> bool {
        self.lock().pairing
    }

    /// Number of control connections opened so far
    pub fn connection_count(&self) -> u32 {
        self.lock().connection_count
    }

    /// Calls received so far
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().calls.iter().map(|(_, call)| call.clone()).collect()
    }

    /// Key calls received so far
    pub fn key_calls(&self) -> Vec<DeviceCall> {
        self.calls().into_iter().filter(DeviceCall::is_key).collect()
    }

    /// Calls received so far with the time they arrived
    pub fn timed_calls(&self) -> Vec<(Instant, DeviceCall)> {
        self.lock().calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl TransportFactory for SimulatedDevice {
    fn create(&self, address: &str) -> Box<dyn RemoteTransport> {
        Box::new(SimulatedTransport {
            device: self.clone(),
            address: address.to_string(),
            pairing: false,
            connection: None,
            unique_id: None,
            info: None,
        })
    }
}

/// Transport bound to a [`SimulatedDevice`]
#[derive(Debug)]
pub struct SimulatedTransport {
    device: SimulatedDevice,
    address: String,
    pairing: bool,
    connection: Option<u64>,
    unique_id: Option<String>,
    info: Option<DeviceInfo>,
}

impl SimulatedTransport {
    /// Record `call` and check the device can be reached from this address
    async fn reach(&mut self, call: DeviceCall) -> Result<()> {
        self.delay().await;
        let unresponsive = {
            let mut state = self.device.lock();
            state.calls.push((Instant::now(), call));
            state.unresponsive
        };

        if unresponsive {
            std::future::pending::<()>().await;
        }

        let state = self.device.lock();
        if !state.online || state.address != self.address {
            return Err(ProtocolError::ConnectionRefused(format!(
                "no device answering at {}",
                self.address
            )));
        }
        Ok(())
    }

    async fn delay(&self) {
        let latency = self.device.lock().latency;
        if !latency.is_zero() {
            sleep(latency).await;
        }
    }

    fn learn_identity(&mut self) {
        let identity = self.device.identity();
        self.unique_id = Some(identity.unique_id);
        self.info = Some(identity.info);
    }

    async fn key(&mut self, call: DeviceCall, key: &str) -> Result<()> {
        self.delay().await;

        let mut state = self.device.lock();
        let live = matches!((&state.live, self.connection), (Some(live), Some(id)) if live.id == id);
        if !live {
            return Err(ProtocolError::NotConnected);
        }

        state.calls.push((Instant::now(), call));
        if state.failing_keys.contains(key) {
            return Err(ProtocolError::NetworkError(format!("{} was not delivered", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for SimulatedTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn start_pairing(&mut self) -> Result<bool> {
        self.reach(DeviceCall::StartPairing).await?;
        self.device.lock().pairing = true;
        self.pairing = true;
        self.learn_identity();
        Ok(true)
    }

    async fn finish_pairing(&mut self, code: &str) -> Result<bool> {
        if !self.pairing {
            return Err(ProtocolError::InvalidState("pairing not started".to_string()));
        }

        self.reach(DeviceCall::FinishPairing(code.to_string())).await?;
        let mut state = self.device.lock();
        if !state.pairing {
            return Err(ProtocolError::NetworkError("pairing session closed".to_string()));
        }
        if state.code != code {
            return Ok(false);
        }

        state.pairing = false;
        drop(state);
        self.pairing = false;
        Ok(true)
    }

    async fn establish_connection(
        &mut self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<()> {
        self.reach(DeviceCall::Connect).await?;

        let mut state = self.device.lock();
        let id = state.next_connection_id;
        state.next_connection_id += 1;
        state.connection_count += 1;
        state.live = Some(LiveConnection { id, events });
        drop(state);

        self.connection = Some(id);
        self.learn_identity();
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.device.lock();

        if std::mem::take(&mut self.pairing) {
            state.pairing = false;
        }

        if let Some(id) = self.connection.take() {
            state.calls.push((Instant::now(), DeviceCall::Disconnect));
            if state.live.as_ref().is_some_and(|live| live.id == id) {
                state.live = None;
            }
        }
    }

    async fn key_press(&mut self, key: &str) -> Result<()> {
        self.key(DeviceCall::KeyPress(key.to_string()), key).await
    }

    async fn key_down(&mut self, key: &str) -> Result<()> {
        self.key(DeviceCall::KeyDown(key.to_string()), key).await
    }

    async fn key_up(&mut self, key: &str) -> Result<()> {
        self.key(DeviceCall::KeyUp(key.to_string()), key).await
    }

    fn current_activity(&self) -> Option<String> {
        let state = self.device.lock();
        match (&state.live, self.connection) {
            (Some(live), Some(id)) if live.id == id => state.activity.clone(),
            _ => None,
        }
    }

    fn unique_id(&self) -> Option<String> {
        self.unique_id.clone()
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> SimulatedDevice {
        SimulatedDevice::new(
            "10.0.0.5",
            DeviceIdentity::new("ATV-XYZ", DeviceInfo::new("Sony", "BRAVIA", "5.1")),
            "654321",
        )
    }

    #[tokio::test]
    async fn test_pairing_against_wrong_address_fails() {
        let device = device();
        let mut transport = device.create("10.0.0.6");

        assert!(matches!(
            transport.start_pairing().await,
            Err(ProtocolError::ConnectionRefused(_))
        ));
        assert!(transport.unique_id().is_none());
    }

    #[tokio::test]
    async fn test_connection_reports_events() {
        let device = device();
        let mut transport = device.create("10.0.0.5");
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.establish_connection(tx).await.unwrap();
        assert!(device.is_connected());
        assert_eq!(transport.unique_id(), Some("ATV-XYZ".to_string()));

        device.push_activity("youtube");
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::ActivityChanged("youtube".to_string()))
        );
        assert_eq!(transport.current_activity(), Some("youtube".to_string()));

        device.drop_connection();
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::ConnectionLost(_))
        ));
        assert!(matches!(
            transport.key_press("HOME").await,
            Err(ProtocolError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_key_failure_injection() {
        let device = device();
        let mut transport = device.create("10.0.0.5");
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.establish_connection(tx).await.unwrap();

        device.fail_key("POWER");
        assert!(transport.key_press("HOME").await.is_ok());
        assert!(transport.key_press("POWER").await.is_err());

        device.clear_failures();
        assert!(transport.key_press("POWER").await.is_ok());
        assert_eq!(device.key_calls().len(), 3);

        transport.disconnect().await;
        transport.disconnect().await;
        assert_eq!(
            device
                .calls()
                .iter()
                .filter(|call| **call == DeviceCall::Disconnect)
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_calls() {
        let device = device();
        device.set_latency(Duration::from_millis(250));
        let mut transport = device.create("10.0.0.5");
        let (tx, _rx) = mpsc::unbounded_channel();

        let started = Instant::now();
        transport.establish_connection(tx).await.unwrap();
        transport.key_press("HOME").await.unwrap();

        let calls = device.timed_calls();
        assert_eq!(calls[0].0 - started, Duration::from_millis(250));
        assert_eq!(calls[1].0 - started, Duration::from_millis(500));
    }
}
