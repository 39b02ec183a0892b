//! Error handling for the Android TV remote protocol
//!
//! This module provides a single error type for pairing, session and
//! command-dispatch operations. Errors from underlying libraries are converted
//! automatically using `thiserror`.
//!
//! ## Error Categories
//!
//! ### Pairing Errors
//! Reported back to the operator as form validation errors:
//! - `CannotConnect`: address unreachable or handshake start rejected
//! - `InvalidAuth`: pairing code rejected by the device
//! - `DuplicateDevice`: the device is already configured
//!
//! ### Session Errors
//! - `ConnectionLost`: the live connection dropped (recovered by reconnect)
//! - `NotConnected`: an operation needs a live connection
//! - `IdentityMismatch`: the device at the stored address reports another id
//!
//! ### Dispatch Errors
//! - `CommandFailed`: a device call failed mid-batch
//! - `InvalidCommand`: the batch itself is malformed
//!
//! ### Transport Errors
//! I/O, JSON and network failures raised by the bridge transport.
//!
//! ## Usage
//!
//! ```rust
//! use atv_remote_protocol::{ProtocolError, Result};
//!
//! fn check(code: &str) -> Result<()> {
//!     if code.is_empty() {
//!         return Err(ProtocolError::InvalidAuth);
//!     }
//!     Ok(())
//! }
//!
//! assert!(check("").is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during protocol operations
///
/// # Examples
///
/// ```rust
/// use atv_remote_protocol::ProtocolError;
///
/// let error = ProtocolError::DuplicateDevice("ATV-XYZ".to_string());
/// assert_eq!(error.to_string(), "Device already configured: ATV-XYZ");
///
/// let error = ProtocolError::InvalidAuth;
/// assert_eq!(error.to_string(), "Pairing code rejected");
/// ```
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// I/O error (network, file system)
    ///
    /// Automatically converted from `std::io::Error`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    ///
    /// Automatically converted from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device unreachable or pairing handshake could not be started
    #[error("Cannot connect: {0}")]
    CannotConnect(String),

    /// Pairing code rejected by the device
    #[error("Pairing code rejected")]
    InvalidAuth,

    /// A device with this unique id is already configured
    #[error("Device already configured: {0}")]
    DuplicateDevice(String),

    /// A device call failed while executing a command batch
    #[error("Command '{command}' failed: {reason}")]
    CommandFailed {
        /// Key name of the command that failed
        command: String,
        /// Underlying failure
        reason: String,
    },

    /// The live connection to the device was lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Operation requires a live connection
    #[error("Not connected")]
    NotConnected,

    /// The device at the configured address reports a different identity
    #[error("Identity mismatch: expected {expected}, device reported {actual}")]
    IdentityMismatch {
        /// Unique id stored in configuration
        expected: String,
        /// Unique id reported by the device
        actual: String,
    },

    /// Operation is not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed command or command batch
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Invalid or malformed packet
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Network connection error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Operation timed out
    #[error("Connection timeout: {0}")]
    Timeout(String),

    /// Connection actively refused by the remote side
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// No route to host
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Operation cancelled because the session was torn down
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl ProtocolError {
    /// Convert a generic I/O error into a more specific network error
    ///
    /// # Examples
    ///
    /// ```rust
    /// use atv_remote_protocol::ProtocolError;
    /// use std::io::{Error, ErrorKind};
    ///
    /// let io_error = Error::new(ErrorKind::ConnectionRefused, "refused");
    /// let error = ProtocolError::from_io_error(io_error, "connecting to 10.0.0.5");
    ///
    /// assert!(matches!(error, ProtocolError::ConnectionRefused(_)));
    /// ```
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(format!("{}: {}", context, error)),
            ErrorKind::ConnectionRefused => {
                ProtocolError::ConnectionRefused(format!("{}: {}", context, error))
            }
            ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable => {
                ProtocolError::NetworkUnreachable(format!("{}: {}", context, error))
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::NetworkError(format!(
                "{}: connection interrupted ({})",
                context, error
            )),
            _ => ProtocolError::Io(error),
        }
    }

    /// Build a `CommandFailed` error for `command` from an underlying failure
    pub fn command_failed(command: impl Into<String>, cause: &ProtocolError) -> Self {
        ProtocolError::CommandFailed {
            command: command.into(),
            reason: cause.to_string(),
        }
    }

    /// Check if this error is transient and the operation may succeed on retry
    ///
    /// # Examples
    ///
    /// ```rust
    /// use atv_remote_protocol::ProtocolError;
    ///
    /// assert!(ProtocolError::ConnectionLost("eof".to_string()).is_recoverable());
    /// assert!(!ProtocolError::InvalidAuth.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout(_)
                | ProtocolError::NetworkError(_)
                | ProtocolError::NetworkUnreachable(_)
                | ProtocolError::ConnectionRefused(_)
                | ProtocolError::ConnectionLost(_)
                | ProtocolError::CannotConnect(_)
                | ProtocolError::NotConnected
                | ProtocolError::Io(_)
        )
    }

    /// Check if this error cannot be resolved without operator intervention
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidAuth
                | ProtocolError::DuplicateDevice(_)
                | ProtocolError::IdentityMismatch { .. }
        )
    }

    /// Form-level error key for pairing failures, if this error is one
    pub fn pairing_kind(&self) -> Option<PairingErrorKind> {
        match self {
            ProtocolError::InvalidAuth => Some(PairingErrorKind::InvalidAuth),
            ProtocolError::DuplicateDevice(_) => Some(PairingErrorKind::AlreadyConfigured),
            ProtocolError::CannotConnect(_)
            | ProtocolError::Timeout(_)
            | ProtocolError::ConnectionRefused(_)
            | ProtocolError::NetworkUnreachable(_)
            | ProtocolError::NetworkError(_)
            | ProtocolError::Io(_) => Some(PairingErrorKind::CannotConnect),
            _ => None,
        }
    }

    /// Get a user-friendly error message suitable for display in UI
    ///
    /// # Examples
    ///
    /// ```rust
    /// use atv_remote_protocol::ProtocolError;
    ///
    /// assert_eq!(
    ///     ProtocolError::InvalidAuth.user_message(),
    ///     "The pairing code was not accepted. Check the code shown on the TV and try again."
    /// );
    /// ```
    pub fn user_message(&self) -> String {
        match self {
            ProtocolError::CannotConnect(msg) => {
                format!("Cannot connect to the TV: {}. Check that it is on and reachable.", msg)
            }
            ProtocolError::InvalidAuth => {
                "The pairing code was not accepted. Check the code shown on the TV and try again."
                    .to_string()
            }
            ProtocolError::DuplicateDevice(id) => {
                format!("Device '{}' is already configured.", id)
            }
            ProtocolError::CommandFailed { command, reason } => {
                format!("Sending '{}' failed: {}.", command, reason)
            }
            ProtocolError::ConnectionLost(msg) => {
                format!("Connection to the TV was lost: {}. Reconnecting.", msg)
            }
            ProtocolError::NotConnected => {
                "The TV is not connected. Wait for the connection to come back.".to_string()
            }
            ProtocolError::IdentityMismatch { expected, actual } => format!(
                "The TV at this address is '{}', not '{}'. Remove the entry and pair again.",
                actual, expected
            ),
            ProtocolError::InvalidState(msg) => format!("Unexpected step: {}.", msg),
            ProtocolError::InvalidCommand(msg) => format!("Invalid command: {}.", msg),
            ProtocolError::InvalidPacket(msg) => format!("Invalid data received: {}.", msg),
            ProtocolError::NetworkError(msg) => {
                format!("Network error: {}. Connection may be unstable.", msg)
            }
            ProtocolError::Timeout(msg) => {
                format!("Connection timeout: {}. Check network connection.", msg)
            }
            ProtocolError::ConnectionRefused(_) => {
                "Connection refused. Check that the remote service is running on the TV."
                    .to_string()
            }
            ProtocolError::NetworkUnreachable(_) => {
                "Network unreachable. Check that the TV is on the same network.".to_string()
            }
            ProtocolError::Cancelled(msg) => format!("Operation cancelled: {}.", msg),
            ProtocolError::Io(e) => format!("I/O error: {}.", e),
            ProtocolError::Json(e) => format!("Data format error: {}.", e),
        }
    }
}

/// Validation error key shown on a pairing form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingErrorKind {
    /// Address unreachable or handshake rejected
    CannotConnect,
    /// Pairing code rejected
    InvalidAuth,
    /// Device already configured
    AlreadyConfigured,
}

impl PairingErrorKind {
    /// Stable key used by host UI translations
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingErrorKind::CannotConnect => "cannot_connect",
            PairingErrorKind::InvalidAuth => "invalid_auth",
            PairingErrorKind::AlreadyConfigured => "already_configured",
        }
    }
}

impl fmt::Display for PairingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ProtocolError::CannotConnect("10.0.0.5 offline".to_string());
        assert_eq!(error.to_string(), "Cannot connect: 10.0.0.5 offline");

        let error = ProtocolError::CommandFailed {
            command: "POWER".to_string(),
            reason: "broken pipe".to_string(),
        };
        assert_eq!(error.to_string(), "Command 'POWER' failed: broken pipe");

        let error = ProtocolError::IdentityMismatch {
            expected: "ATV-XYZ".to_string(),
            actual: "ATV-ABC".to_string(),
        };
        assert!(error.to_string().contains("ATV-ABC"));
    }

    #[test]
    fn test_io_error_mapping() {
        use std::io::{Error, ErrorKind};

        let error = ProtocolError::from_io_error(Error::new(ErrorKind::TimedOut, "slow"), "connect");
        assert!(matches!(error, ProtocolError::Timeout(_)));

        let error =
            ProtocolError::from_io_error(Error::new(ErrorKind::UnexpectedEof, "eof"), "read");
        assert!(matches!(error, ProtocolError::NetworkError(_)));

        let error = ProtocolError::from_io_error(Error::new(ErrorKind::NotFound, "nope"), "open");
        assert!(matches!(error, ProtocolError::Io(_)));
    }

    #[test]
    fn test_classification() {
        assert!(ProtocolError::ConnectionLost("eof".to_string()).is_recoverable());
        assert!(!ProtocolError::ConnectionLost("eof".to_string()).requires_user_action());

        assert!(ProtocolError::DuplicateDevice("x".to_string()).requires_user_action());
        assert!(!ProtocolError::DuplicateDevice("x".to_string()).is_recoverable());

        let error = ProtocolError::InvalidCommand("negative hold".to_string());
        assert!(!error.is_recoverable());
        assert!(!error.requires_user_action());
    }

    #[test]
    fn test_pairing_kind() {
        assert_eq!(
            ProtocolError::InvalidAuth.pairing_kind(),
            Some(PairingErrorKind::InvalidAuth)
        );
        assert_eq!(
            ProtocolError::Timeout("t".to_string()).pairing_kind(),
            Some(PairingErrorKind::CannotConnect)
        );
        assert_eq!(ProtocolError::NotConnected.pairing_kind(), None);
        assert_eq!(PairingErrorKind::AlreadyConfigured.to_string(), "already_configured");
    }

    #[test]
    fn test_user_message() {
        let error = ProtocolError::command_failed(
            "POWER",
            &ProtocolError::NetworkError("reset".to_string()),
        );
        assert_eq!(
            error.user_message(),
            "Sending 'POWER' failed: Network error: reset."
        );

        let error = ProtocolError::IdentityMismatch {
            expected: "ATV-XYZ".to_string(),
            actual: "ATV-ABC".to_string(),
        };
        assert!(error.user_message().contains("pair again"));
        assert!(error.requires_user_action());
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_command_failed_wraps_cause() {
        let cause = ProtocolError::NetworkError("reset".to_string());
        let error = ProtocolError::command_failed("VOLUME_UP", &cause);
        match error {
            ProtocolError::CommandFailed { command, reason } => {
                assert_eq!(command, "VOLUME_UP");
                assert!(reason.contains("reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
