//! Pairing Event System
//!
//! Events emitted by [`PairingFlow`](super::PairingFlow) while onboarding a
//! device.

use super::flow::AbortReason;
use crate::{DeviceIdentity, PairingErrorKind};

/// Events emitted by the pairing flow
#[derive(Debug, Clone, PartialEq)]
pub enum PairingEvent {
    /// The device accepted the start of the handshake
    HandshakeStarted {
        /// Address the handshake runs against
        address: String,
        /// Identity advertised by the device, if any
        unique_id: Option<String>,
    },

    /// The device rejected the submitted code
    CodeRejected {
        /// Address the handshake runs against
        address: String,
    },

    /// Pairing completed
    Paired {
        /// Address the device was paired on
        address: String,
        /// Identity produced by the handshake
        identity: DeviceIdentity,
    },

    /// The flow was aborted
    Aborted {
        /// Why the flow stopped
        reason: AbortReason,
    },

    /// A step failed and is being re-presented
    Error {
        /// Address involved (if applicable)
        address: Option<String>,
        /// Form-level error key
        kind: PairingErrorKind,
        /// Error message
        message: String,
    },
}

impl PairingEvent {
    /// Check if this is a pairing completed event
    pub fn is_paired(&self) -> bool {
        matches!(self, PairingEvent::Paired { .. })
    }

    /// Check if this event ends the flow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PairingEvent::Paired { .. } | PairingEvent::Aborted { .. }
        )
    }

    /// Get the address if this event is address-related
    pub fn address(&self) -> Option<&str> {
        match self {
            PairingEvent::HandshakeStarted { address, .. } => Some(address),
            PairingEvent::CodeRejected { address } => Some(address),
            PairingEvent::Paired { address, .. } => Some(address),
            PairingEvent::Aborted { .. } => None,
            PairingEvent::Error { address, .. } => address.as_deref(),
        }
    }
}
