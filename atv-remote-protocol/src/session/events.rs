//! Session State Notifications
//!
//! A control session publishes a [`SessionSnapshot`] every time its
//! connection state, activity or device details change. Observers either
//! hold a `watch` receiver or register a single [`StateCallback`].

use crate::{ConnectionState, DeviceInfo, UNKNOWN_ACTIVITY};
use std::sync::Arc;

/// Callback invoked with the new snapshot after every change
///
/// Runs on the session's task; implementations must not block.
pub type StateCallback = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

/// Observable state of a control session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Connection status
    pub connection: ConnectionState,
    /// Last activity reported by the device
    pub activity: Option<String>,
    /// Vendor details reported by the device
    pub device_info: Option<DeviceInfo>,
    /// Most recent connection error, cleared on successful connect
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Last activity, or [`UNKNOWN_ACTIVITY`] if none has been reported
    pub fn activity_or_unknown(&self) -> &str {
        self.activity.as_deref().unwrap_or(UNKNOWN_ACTIVITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
        assert_eq!(snapshot.activity_or_unknown(), UNKNOWN_ACTIVITY);
        assert!(snapshot.last_error.is_none());
    }
}
