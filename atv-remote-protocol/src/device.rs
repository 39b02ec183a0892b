//! Device Identity and Connection State
//!
//! Types describing a paired Android TV device and the state of its live
//! connection.
//!
//! ## Device Lifecycle
//!
//! 1. **Pairing**: the pairing flow yields a [`DeviceIdentity`] and the
//!    address it was reached on
//! 2. **Configuration**: the host persists a [`DeviceRecord`]
//!    (`address` + `unique_id`)
//! 3. **Session**: on every startup a control session is built from the
//!    record and moves through [`ConnectionState`]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Activity reported before the device has told us anything
pub const UNKNOWN_ACTIVITY: &str = "unknown";

/// Device connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No live connection
    #[default]
    Disconnected,
    /// Connection being opened or recovered
    Connecting,
    /// Connected and ready for commands
    Connected,
}

impl ConnectionState {
    /// Check if device is connected
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if device is reachable (connected or connecting)
    pub fn is_reachable(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Connecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Vendor details advertised by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Manufacturer name
    pub vendor: String,
    /// Model name
    pub model: String,
    /// Version of the remote service app on the device
    pub app_version: String,
}

impl DeviceInfo {
    /// Create device info
    pub fn new(
        vendor: impl Into<String>,
        model: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            model: model.into(),
            app_version: app_version.into(),
        }
    }

    /// Placeholder used until the device has reported its details
    pub fn unknown() -> Self {
        Self::new("Unknown", "Android TV", "unknown")
    }

    /// Display name in the form `vendor_model`
    pub fn display_name(&self) -> String {
        format!("{}_{}", self.vendor, self.model)
    }
}

/// Stable identity of a paired device
///
/// Created once when pairing succeeds and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Opaque stable identifier, used as the de-duplication key
    pub unique_id: String,
    /// Vendor details
    pub info: DeviceInfo,
}

impl DeviceIdentity {
    /// Create a device identity
    pub fn new(unique_id: impl Into<String>, info: DeviceInfo) -> Self {
        Self {
            unique_id: unique_id.into(),
            info,
        }
    }
}

/// Durable configuration record for a paired device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Network host the device was paired on
    pub host: String,
    /// Unique id produced by pairing
    pub unique_id: String,
}

impl DeviceRecord {
    /// Create a configuration record
    pub fn new(host: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            unique_id: unique_id.into(),
        }
    }

    /// Device address
    pub fn address(&self) -> &str {
        &self.host
    }
}
