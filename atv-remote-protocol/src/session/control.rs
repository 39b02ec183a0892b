//! Control Session
//!
//! Long-lived owner of one device's connection. A session is built from the
//! stored [`DeviceRecord`], opens the connection, keeps it alive across drops
//! and executes command batches one at a time.
//!
//! ## Concurrency
//!
//! - The transport sits behind a single async mutex. Command batches, connects
//!   and reconnects all take it, so no two device calls overlap.
//! - Each connection lifetime has its own [`CancellationToken`]. Exactly one
//!   event-pump task per lifetime consumes transport events and is the only
//!   place reconnects happen.
//! - [`ControlSession::disconnect`] cancels the token first, so a pending
//!   reconnect or an in-progress hold stops before the transport is released.

use super::dispatch::{self, CommandBatch, DispatchReport};
use super::events::{SessionSnapshot, StateCallback};
use crate::recovery::{ReconnectConfig, ReconnectionStrategy};
use crate::transport::{RemoteTransport, TransportEvent, TransportFactory};
use crate::{
    ConnectionState, DeviceIdentity, DeviceInfo, DeviceRecord, ProtocolError, Result,
};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default timeout for opening the control connection (10 seconds)
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Control session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for a single connect attempt
    pub connect_timeout: Duration,
    /// Backoff used when recovering a dropped connection
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    /// Configuration with the default connect timeout
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            reconnect,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionInner {
    record: DeviceRecord,
    config: SessionConfig,
    transport: Mutex<Box<dyn RemoteTransport>>,
    state: watch::Sender<SessionSnapshot>,
    callback: StdMutex<Option<StateCallback>>,
    lifetime: StdMutex<Option<CancellationToken>>,
}

impl SessionInner {
    fn address(&self) -> &str {
        self.record.address()
    }

    /// Apply `change` and notify observers if anything changed
    fn update(&self, change: impl FnOnce(&mut SessionSnapshot)) {
        let changed = self.state.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            change(snapshot);
            *snapshot != before
        });

        if changed {
            let callback = lock(&self.callback).clone();
            if let Some(callback) = callback {
                let snapshot = self.state.borrow().clone();
                callback(&snapshot);
            }
        }
    }

    fn record_failure(&self, error: &ProtocolError, connection: ConnectionState) {
        let message = error.to_string();
        self.update(|snapshot| {
            snapshot.connection = connection;
            snapshot.last_error = Some(message);
        });
    }

    /// Token of the live connection lifetime, if any
    fn current_token(&self) -> Option<CancellationToken> {
        lock(&self.lifetime)
            .as_ref()
            .filter(|token| !token.is_cancelled())
            .cloned()
    }

    /// Start a new connection lifetime, ending the previous one
    fn begin_lifetime(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.lifetime).replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Open the connection on `transport` and publish the result
    async fn connect(
        &self,
        transport: &mut dyn RemoteTransport,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<()> {
        match timeout(
            self.config.connect_timeout,
            transport.establish_connection(events),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                transport.disconnect().await;
                return Err(ProtocolError::Timeout(format!(
                    "connecting to {}",
                    self.address()
                )));
            }
        }

        if let Some(actual) = transport.unique_id() {
            if actual != self.record.unique_id {
                transport.disconnect().await;
                return Err(ProtocolError::IdentityMismatch {
                    expected: self.record.unique_id.clone(),
                    actual,
                });
            }
        }

        let activity = transport.current_activity();
        let device_info = transport.device_info();
        self.update(|snapshot| {
            snapshot.connection = ConnectionState::Connected;
            if activity.is_some() {
                snapshot.activity = activity;
            }
            if device_info.is_some() {
                snapshot.device_info = device_info;
            }
            snapshot.last_error = None;
        });

        Ok(())
    }
}

/// Live control session for one paired device
///
/// Cheaply cloneable; all clones share the same connection.
#[derive(Clone)]
pub struct ControlSession {
    inner: Arc<SessionInner>,
}

impl ControlSession {
    /// Create a disconnected session for a stored device record
    pub fn new(record: DeviceRecord, factory: &dyn TransportFactory, config: SessionConfig) -> Self {
        let transport = factory.create(record.address());
        let (state, _) = watch::channel(SessionSnapshot::default());

        Self {
            inner: Arc::new(SessionInner {
                record,
                config,
                transport: Mutex::new(transport),
                state,
                callback: StdMutex::new(None),
                lifetime: StdMutex::new(None),
            }),
        }
    }

    /// Stored configuration record
    pub fn record(&self) -> &DeviceRecord {
        &self.inner.record
    }

    /// Device address
    pub fn address(&self) -> &str {
        self.inner.address()
    }

    /// Unique id the session is bound to
    pub fn unique_id(&self) -> &str {
        &self.inner.record.unique_id
    }

    /// Device identity, with placeholder details until the device reports them
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(
            self.unique_id(),
            self.device_info().unwrap_or_else(DeviceInfo::unknown),
        )
    }

    /// Vendor details reported by the device, if connected at least once
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.state.borrow().device_info.clone()
    }

    /// Current connection status
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.borrow().connection
    }

    /// Copy of the current observable state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Last reported activity, or [`UNKNOWN_ACTIVITY`](crate::UNKNOWN_ACTIVITY)
    pub fn get_activity(&self) -> String {
        self.inner.state.borrow().activity_or_unknown().to_string()
    }

    /// Whether a state callback is registered
    pub fn has_callback(&self) -> bool {
        lock(&self.inner.callback).is_some()
    }

    fn register_callback(&self, callback: StateCallback) {
        if lock(&self.inner.callback).replace(callback).is_some() {
            debug!("Replaced state callback for {}", self.address());
        }
    }

    fn is_live(&self) -> bool {
        self.connection_state().is_connected() && self.inner.current_token().is_some()
    }

    /// Open the connection and start tracking device events
    ///
    /// `callback`, when given, replaces any registered state callback. Returns
    /// immediately if already connected. On failure the session stays
    /// disconnected, `last_error` is set and observers are notified.
    pub async fn establish_connection(&self, callback: Option<StateCallback>) -> Result<()> {
        if let Some(callback) = callback {
            self.register_callback(callback);
        }

        let mut transport = self.inner.transport.lock().await;
        if self.is_live() {
            debug!("Session for {} already connected", self.address());
            return Ok(());
        }

        let token = self.inner.begin_lifetime();
        info!("Connecting to {} ({})", self.address(), self.unique_id());
        self.inner
            .update(|snapshot| snapshot.connection = ConnectionState::Connecting);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ProtocolError::Cancelled(format!(
                "connection to {}",
                self.address()
            ))),
            result = self.inner.connect(transport.as_mut(), events_tx) => result,
        };
        drop(transport);

        match result {
            Ok(()) => {
                info!("Connected to {}", self.address());
                let strategy = ReconnectionStrategy::new(&self.inner.config.reconnect);
                tokio::spawn(run_events(self.inner.clone(), token, events_rx, strategy));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", self.address(), e);
                token.cancel();
                self.inner
                    .record_failure(&e, ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Connect in the background, retrying with backoff until it succeeds
    ///
    /// Never fails; progress is reported through observers.
    pub fn start(&self, callback: Option<StateCallback>) {
        if let Some(callback) = callback {
            self.register_callback(callback);
        }

        if self.is_live() {
            debug!("Session for {} already connected", self.address());
            return;
        }

        let token = self.inner.begin_lifetime();
        info!("Starting session for {} ({})", self.address(), self.unique_id());
        self.inner
            .update(|snapshot| snapshot.connection = ConnectionState::Connecting);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut strategy = ReconnectionStrategy::new(&inner.config.reconnect);
            if let Some(events) = reconnect(&inner, &token, &mut strategy, true).await {
                run_events(inner, token, events, strategy).await;
            }
        });
    }

    /// Release the connection and deregister the state callback
    ///
    /// Safe to call at any time; repeated calls are no-ops.
    pub async fn disconnect(&self) {
        let token = lock(&self.inner.lifetime).take();
        let callback = lock(&self.inner.callback).take();

        if token.is_none() && callback.is_none() {
            debug!("Session for {} already disconnected", self.address());
            return;
        }

        if let Some(token) = token {
            token.cancel();
        }
        if callback.is_some() {
            debug!("Deregistered state callback for {}", self.address());
        }

        let mut transport = self.inner.transport.lock().await;
        transport.disconnect().await;
        drop(transport);

        self.inner
            .update(|snapshot| snapshot.connection = ConnectionState::Disconnected);
        info!("Disconnected from {}", self.address());
    }

    /// Execute a command batch
    ///
    /// Batches never overlap with each other or with a reconnect.
    pub async fn send_commands(&self, batch: &CommandBatch) -> Result<DispatchReport> {
        if batch.is_empty() {
            return Ok(DispatchReport::default());
        }

        let token = self
            .inner
            .current_token()
            .ok_or(ProtocolError::NotConnected)?;

        let mut transport = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(ProtocolError::Cancelled("session torn down".to_string()));
            }
            transport = self.inner.transport.lock() => transport,
        };

        debug!(
            "Dispatching {} command(s) to {}",
            batch.commands().len(),
            self.address()
        );
        dispatch::execute(transport.as_mut(), batch, &token).await
    }
}

impl fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSession")
            .field("address", &self.address())
            .field("unique_id", &self.unique_id())
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}

/// Consume transport events for one connection lifetime
async fn run_events(
    inner: Arc<SessionInner>,
    token: CancellationToken,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut strategy: ReconnectionStrategy,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv() => event,
        };

        let reason = match event {
            Some(TransportEvent::ActivityChanged(activity)) => {
                debug!("{} reported activity {}", inner.address(), activity);
                inner.update(|snapshot| snapshot.activity = Some(activity));
                continue;
            }
            Some(TransportEvent::ConnectionLost(reason)) => reason,
            None => "event channel closed".to_string(),
        };

        if token.is_cancelled() {
            break;
        }

        warn!("Connection to {} lost: {}", inner.address(), reason);
        inner.record_failure(
            &ProtocolError::ConnectionLost(reason),
            ConnectionState::Connecting,
        );

        match reconnect(&inner, &token, &mut strategy, false).await {
            Some(fresh) => events = fresh,
            None => break,
        }
    }

    debug!("Event pump for {} stopped", inner.address());
}

/// Reopen the connection with backoff
///
/// Returns the event receiver of the new connection, or `None` when the
/// lifetime was cancelled or the strategy gave up.
async fn reconnect(
    inner: &SessionInner,
    token: &CancellationToken,
    strategy: &mut ReconnectionStrategy,
    mut immediate: bool,
) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
    loop {
        if !immediate {
            let Some(delay) = strategy.next_delay() else {
                error!(
                    "Giving up on {} after {} reconnect attempts",
                    inner.address(),
                    strategy.attempt
                );
                inner.update(|snapshot| snapshot.connection = ConnectionState::Disconnected);
                return None;
            };

            debug!(
                "Reconnecting to {} in {:?} ({})",
                inner.address(),
                delay,
                strategy.status()
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = sleep(delay) => {}
            }
        }
        immediate = false;

        let mut transport = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            transport = inner.transport.lock() => transport,
        };

        transport.disconnect().await;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            result = inner.connect(transport.as_mut(), events_tx) => result,
        };
        drop(transport);

        match result {
            Ok(()) => {
                info!("Connected to {}", inner.address());
                strategy.reset();
                return Some(events_rx);
            }
            Err(e) if e.requires_user_action() => {
                error!("Cannot reconnect to {}: {}", inner.address(), e);
                inner.record_failure(&e, ConnectionState::Disconnected);
                return None;
            }
            Err(e) => {
                warn!("Reconnect to {} failed: {}", inner.address(), e);
                inner.record_failure(&e, ConnectionState::Connecting);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{DeviceCall, SimulatedDevice};
    use crate::UNKNOWN_ACTIVITY;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device() -> SimulatedDevice {
        SimulatedDevice::new(
            "10.0.0.5",
            DeviceIdentity::new("ATV-XYZ", DeviceInfo::new("Sony", "BRAVIA", "5.1")),
            "654321",
        )
    }

    fn session(device: &SimulatedDevice) -> ControlSession {
        ControlSession::new(
            DeviceRecord::new("10.0.0.5", "ATV-XYZ"),
            device,
            SessionConfig::new(ReconnectConfig::default()),
        )
    }

    fn counter() -> (Arc<AtomicUsize>, StateCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let callback: StateCallback = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[tokio::test]
    async fn test_activity_before_connection_is_unknown() {
        let device = device();
        let session = session(&device);

        assert_eq!(session.get_activity(), UNKNOWN_ACTIVITY);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.identity().info, DeviceInfo::unknown());
    }

    #[tokio::test]
    async fn test_establish_reports_state_and_activity() {
        let device = device();
        device.push_activity("launcher");
        let session = session(&device);
        let (count, callback) = counter();

        session.establish_connection(Some(callback)).await.unwrap();
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert_eq!(session.get_activity(), "launcher");
        assert_eq!(session.identity().info.display_name(), "Sony_BRAVIA");
        let after_connect = count.load(Ordering::SeqCst);
        assert!(after_connect >= 1);

        let mut state = session.subscribe();
        device.push_activity("youtube");
        state
            .wait_for(|snapshot| snapshot.activity.as_deref() == Some("youtube"))
            .await
            .unwrap();
        assert_eq!(session.get_activity(), "youtube");
        assert_eq!(count.load(Ordering::SeqCst), after_connect + 1);

        session.establish_connection(None).await.unwrap();
        assert_eq!(device.connection_count(), 1);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_establish_failure_stays_disconnected() {
        let device = device();
        device.set_online(false);
        let session = session(&device);
        let (count, callback) = counter();

        let result = session.establish_connection(Some(callback)).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionRefused(_))));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
        assert!(snapshot.last_error.is_some());
        assert!(count.load(Ordering::SeqCst) >= 1);
        assert!(matches!(
            session.send_commands(&CommandBatch::new(["HOME"])).await,
            Err(ProtocolError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_identity_mismatch() {
        let device = device();
        device.set_identity(DeviceIdentity::new("ATV-OTHER", DeviceInfo::unknown()));
        let session = session(&device);

        match session.establish_connection(None).await {
            Err(ProtocolError::IdentityMismatch { expected, actual }) => {
                assert_eq!(expected, "ATV-XYZ");
                assert_eq!(actual, "ATV-OTHER");
            }
            other => panic!("expected identity mismatch, got {:?}", other),
        }
        assert!(!device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let device = device();
        device.set_unresponsive(true);
        let session = ControlSession::new(
            DeviceRecord::new("10.0.0.5", "ATV-XYZ"),
            &device,
            SessionConfig {
                connect_timeout: Duration::from_secs(3),
                reconnect: ReconnectConfig::default(),
            },
        );

        assert!(matches!(
            session.establish_connection(None).await,
            Err(ProtocolError::Timeout(_))
        ));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_callback_is_replaced_not_duplicated() {
        let device = device();
        let session = session(&device);
        let (first, first_callback) = counter();
        let (second, second_callback) = counter();

        session.establish_connection(Some(first_callback)).await.unwrap();
        let first_seen = first.load(Ordering::SeqCst);

        session.establish_connection(Some(second_callback)).await.unwrap();
        let mut state = session.subscribe();
        device.push_activity("netflix");
        state
            .wait_for(|snapshot| snapshot.activity.as_deref() == Some("netflix"))
            .await
            .unwrap();

        assert_eq!(first.load(Ordering::SeqCst), first_seen);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_double_disconnect() {
        let device = device();
        let session = session(&device);
        let (_, callback) = counter();

        session.establish_connection(Some(callback)).await.unwrap();
        session.disconnect().await;
        assert!(!session.has_callback());
        session.disconnect().await;

        let disconnects = device
            .calls()
            .into_iter()
            .filter(|call| *call == DeviceCall::Disconnect)
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(!device.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_noop() {
        let device = device();
        let session = session(&device);

        session.disconnect().await;
        assert!(device.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_drop() {
        let device = device();
        let session = session(&device);
        session.establish_connection(None).await.unwrap();
        let mut state = session.subscribe();

        device.drop_connection();
        state
            .wait_for(|snapshot| snapshot.connection == ConnectionState::Connecting)
            .await
            .unwrap();
        state
            .wait_for(|snapshot| snapshot.connection == ConnectionState::Connected)
            .await
            .unwrap();

        assert_eq!(device.connection_count(), 2);
        assert!(session.snapshot().last_error.is_none());

        session
            .send_commands(&CommandBatch::new(["HOME"]))
            .await
            .unwrap();
        session.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_interrupts_hold() {
        let device = device();
        let session = session(&device);
        session.establish_connection(None).await.unwrap();

        let holder = session.clone();
        let hold = tokio::spawn(async move {
            holder
                .send_commands(&CommandBatch::new(["POWER"]).with_hold(Duration::from_secs(30)))
                .await
        });

        sleep(Duration::from_secs(1)).await;
        session.disconnect().await;

        assert!(matches!(
            hold.await.unwrap(),
            Err(ProtocolError::Cancelled(_))
        ));
        assert!(!device
            .calls()
            .contains(&DeviceCall::KeyUp("POWER".to_string())));
        assert!(!device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_interrupts_running_batch() {
        let device = device();
        let session = session(&device);
        session.establish_connection(None).await.unwrap();
        device.clear_calls();
        device.set_latency(Duration::from_secs(1));

        let sender = session.clone();
        let batch = tokio::spawn(async move {
            sender
                .send_commands(&CommandBatch::new((0..10).map(|n| format!("KEY_{}", n))))
                .await
        });

        sleep(Duration::from_millis(1500)).await;
        let teardown = tokio::time::Instant::now();
        session.disconnect().await;

        assert_eq!(teardown.elapsed(), Duration::ZERO);
        assert!(matches!(
            batch.await.unwrap(),
            Err(ProtocolError::Cancelled(_))
        ));
        assert_eq!(device.key_calls().len(), 1);
        assert!(!device.is_connected());
    }
}
