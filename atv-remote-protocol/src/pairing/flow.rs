//! Pairing Flow
//!
//! Single-use state machine walking an operator through address entry and
//! code entry.
//!
//! ```text
//! Idle → AwaitingAddress → Pairing → AwaitingCode → Paired
//!              ↑              │            │
//!              └── Failed ←───┴────────────┘
//! ```
//!
//! `Aborted` is reached on duplicate devices and on [`PairingFlow::cancel`].

use super::events::PairingEvent;
use crate::transport::{RemoteTransport, TransportFactory};
use crate::{
    DeviceIdentity, DeviceInfo, DeviceRecord, PairingErrorKind, ProtocolError, Result,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Pairing timeout duration for each device call (30 seconds)
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

/// Pairing flow configuration
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// Upper bound for each device call
    pub timeout: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            timeout: PAIRING_TIMEOUT,
        }
    }
}

/// Lookup of devices the host has already configured
pub trait ConfiguredDevices: Send + Sync {
    /// Whether a device with this unique id already has an entry
    fn is_configured(&self, unique_id: &str) -> bool;
}

impl ConfiguredDevices for HashSet<String> {
    fn is_configured(&self, unique_id: &str) -> bool {
        self.contains(unique_id)
    }
}

/// Why a flow ended without creating an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The device already has an entry
    AlreadyConfigured,
    /// The operator abandoned the flow
    Cancelled,
}

impl AbortReason {
    /// Key shown by the host UI
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::AlreadyConfigured => PairingErrorKind::AlreadyConfigured.as_str(),
            AbortReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a successful pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    /// Address the device was paired on
    pub address: String,
    /// Identity produced by the handshake
    pub identity: DeviceIdentity,
}

impl PairedDevice {
    /// Durable configuration record for this device
    pub fn record(&self) -> DeviceRecord {
        DeviceRecord::new(self.address.clone(), self.identity.unique_id.clone())
    }
}

/// Pairing flow state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    /// Flow created, nothing presented yet
    Idle,
    /// Waiting for the operator to submit an address
    AwaitingAddress,
    /// A device call is in progress
    Pairing,
    /// Handshake started, waiting for the code
    AwaitingCode,
    /// Pairing succeeded
    Paired(PairedDevice),
    /// A step failed; the address form accepts a new submission
    Failed(PairingErrorKind),
    /// The flow ended without an entry
    Aborted(AbortReason),
}

impl PairingState {
    /// Whether the flow has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, PairingState::Paired(_) | PairingState::Aborted(_))
    }

    /// Short name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingState::Idle => "idle",
            PairingState::AwaitingAddress => "awaiting address",
            PairingState::Pairing => "pairing",
            PairingState::AwaitingCode => "awaiting code",
            PairingState::Paired(_) => "paired",
            PairingState::Failed(_) => "failed",
            PairingState::Aborted(_) => "aborted",
        }
    }
}

/// What the host should present next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStep {
    /// Show the address form, optionally with a validation error
    AddressForm {
        /// Error from the previous submission
        error: Option<PairingErrorKind>,
    },
    /// Show the code form, optionally with a validation error
    CodeForm {
        /// Error from the previous submission
        error: Option<PairingErrorKind>,
    },
    /// End the flow without creating an entry
    Abort {
        /// Why the flow ended
        reason: AbortReason,
    },
    /// Persist the paired device
    CreateEntry(PairedDevice),
}

/// In-progress handshake, held between address and code entry
struct PairingAttempt {
    address: String,
    handshake: Box<dyn RemoteTransport>,
}

/// Interactive pairing of one device
pub struct PairingFlow {
    factory: Arc<dyn TransportFactory>,
    configured: Arc<dyn ConfiguredDevices>,
    config: PairingConfig,
    state: PairingState,
    attempt: Option<PairingAttempt>,
    event_tx: Option<mpsc::UnboundedSender<PairingEvent>>,
}

impl PairingFlow {
    /// Create a new pairing flow
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        configured: Arc<dyn ConfiguredDevices>,
        config: PairingConfig,
    ) -> Self {
        Self {
            factory,
            configured,
            config,
            state: PairingState::Idle,
            attempt: None,
            event_tx: None,
        }
    }

    /// Get a receiver for pairing events
    ///
    /// Only the most recent subscriber receives events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PairingEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_tx = Some(tx);
        rx
    }

    /// Current state
    pub fn state(&self) -> &PairingState {
        &self.state
    }

    /// Address of the in-progress handshake
    pub fn address(&self) -> Option<&str> {
        self.attempt.as_ref().map(|attempt| attempt.address.as_str())
    }

    /// Present the address form
    pub fn start(&mut self) -> Result<FlowStep> {
        if self.state != PairingState::Idle {
            return Err(self.invalid_state("start"));
        }

        self.state = PairingState::AwaitingAddress;
        Ok(FlowStep::AddressForm { error: None })
    }

    /// Submit the device address and begin the handshake
    ///
    /// Also accepted while `Pairing`, which is only observable when a previous
    /// call was dropped before it finished.
    pub async fn submit_address(&mut self, address: &str) -> Result<FlowStep> {
        if !matches!(
            self.state,
            PairingState::AwaitingAddress | PairingState::Pairing | PairingState::Failed(_)
        ) {
            return Err(self.invalid_state("submit_address"));
        }

        self.release_attempt().await;

        let address = address.trim();
        if address.is_empty() {
            return Ok(self.fail(None, ProtocolError::CannotConnect("empty address".to_string())));
        }

        info!("Starting pairing with {}", address);
        self.state = PairingState::Pairing;

        let mut handshake = self.factory.create(address);
        let started = match timeout(self.config.timeout, handshake.start_pairing()).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ProtocolError::CannotConnect(format!(
                "{} declined to start pairing",
                address
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProtocolError::Timeout(format!(
                "starting pairing with {}",
                address
            ))),
        };

        if let Err(e) = started {
            handshake.disconnect().await;
            return Ok(self.fail(Some(address), e));
        }

        let unique_id = handshake.unique_id();
        if let Some(id) = unique_id.as_deref() {
            if self.configured.is_configured(id) {
                info!("Device {} at {} is already configured", id, address);
                handshake.disconnect().await;
                return Ok(self.abort(AbortReason::AlreadyConfigured));
            }
        }

        debug!("Handshake started with {} (advertised id {:?})", address, unique_id);
        self.attempt = Some(PairingAttempt {
            address: address.to_string(),
            handshake,
        });
        self.state = PairingState::AwaitingCode;
        self.emit(PairingEvent::HandshakeStarted {
            address: address.to_string(),
            unique_id,
        });

        Ok(FlowStep::CodeForm { error: None })
    }

    /// Submit the code shown on the device
    pub async fn submit_code(&mut self, code: &str) -> Result<FlowStep> {
        if self.state != PairingState::AwaitingCode {
            return Err(self.invalid_state("submit_code"));
        }
        let Some(mut attempt) = self.attempt.take() else {
            return Ok(self.fail(
                None,
                ProtocolError::CannotConnect("pairing handshake was interrupted".to_string()),
            ));
        };

        let code = code.trim();
        let finished = timeout(self.config.timeout, attempt.handshake.finish_pairing(code)).await;
        let finished = match finished {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(format!(
                "finishing pairing with {}",
                attempt.address
            ))),
        };

        match finished {
            Ok(true) => {}
            Ok(false) => {
                let rejected = ProtocolError::InvalidAuth;
                info!("{} by {}", rejected, attempt.address);
                let address = attempt.address.clone();
                self.attempt = Some(attempt);
                self.emit(PairingEvent::CodeRejected { address });
                return Ok(FlowStep::CodeForm {
                    error: rejected.pairing_kind(),
                });
            }
            Err(e) => {
                attempt.handshake.disconnect().await;
                return Ok(self.fail(Some(&attempt.address), e));
            }
        }

        let Some(unique_id) = attempt.handshake.unique_id() else {
            attempt.handshake.disconnect().await;
            return Ok(self.fail(
                Some(&attempt.address),
                ProtocolError::CannotConnect("device did not report an identity".to_string()),
            ));
        };

        if self.configured.is_configured(&unique_id) {
            info!("Device {} at {} is already configured", unique_id, attempt.address);
            attempt.handshake.disconnect().await;
            return Ok(self.abort(AbortReason::AlreadyConfigured));
        }

        let info = attempt
            .handshake
            .device_info()
            .unwrap_or_else(DeviceInfo::unknown);
        attempt.handshake.disconnect().await;

        let paired = PairedDevice {
            address: attempt.address,
            identity: DeviceIdentity::new(unique_id, info),
        };

        info!(
            "Paired with {} at {} ({})",
            paired.identity.unique_id,
            paired.address,
            paired.identity.info.display_name()
        );
        self.state = PairingState::Paired(paired.clone());
        self.emit(PairingEvent::Paired {
            address: paired.address.clone(),
            identity: paired.identity.clone(),
        });

        Ok(FlowStep::CreateEntry(paired))
    }

    /// Abandon the flow and release the handshake
    pub async fn cancel(&mut self) -> FlowStep {
        self.release_attempt().await;

        if let PairingState::Aborted(reason) = self.state {
            return FlowStep::Abort { reason };
        }

        info!("Pairing flow cancelled");
        self.abort(AbortReason::Cancelled)
    }

    async fn release_attempt(&mut self) {
        if let Some(mut attempt) = self.attempt.take() {
            debug!("Releasing handshake with {}", attempt.address);
            attempt.handshake.disconnect().await;
        }
    }

    fn fail(&mut self, address: Option<&str>, error: ProtocolError) -> FlowStep {
        let kind = error
            .pairing_kind()
            .unwrap_or(PairingErrorKind::CannotConnect);
        warn!("Pairing step failed ({}): {}", kind, error);

        self.state = PairingState::Failed(kind);
        self.emit(PairingEvent::Error {
            address: address.map(str::to_string),
            kind,
            message: error.to_string(),
        });

        FlowStep::AddressForm { error: Some(kind) }
    }

    fn abort(&mut self, reason: AbortReason) -> FlowStep {
        self.state = PairingState::Aborted(reason);
        self.emit(PairingEvent::Aborted { reason });
        FlowStep::Abort { reason }
    }

    fn emit(&self, event: PairingEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn invalid_state(&self, operation: &str) -> ProtocolError {
        ProtocolError::InvalidState(format!(
            "{} is not valid while {}",
            operation,
            self.state.as_str()
        ))
    }
}

impl fmt::Debug for PairingFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingFlow")
            .field("state", &self.state)
            .field("address", &self.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
