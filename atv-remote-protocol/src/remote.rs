//! Remote Control Capability
//!
//! Narrow interface host adapters program against instead of a concrete
//! session type.

use crate::session::{CommandBatch, ControlSession, DispatchReport, StateCallback};
use crate::{ConnectionState, DeviceIdentity, Result};
use async_trait::async_trait;

/// Control surface of one paired device
#[async_trait]
pub trait RemoteControl: Send + Sync {
    /// Identity of the controlled device
    fn identity(&self) -> DeviceIdentity;

    /// Last reported activity, or the unknown sentinel
    fn current_activity(&self) -> String;

    /// Current connection status
    fn connection_state(&self) -> ConnectionState;

    /// Open the connection, registering `callback` for state changes
    async fn establish(&self, callback: Option<StateCallback>) -> Result<()>;

    /// Keep connecting in the background until the device answers
    fn start(&self, callback: Option<StateCallback>);

    /// Release the connection; idempotent
    async fn disconnect(&self);

    /// Execute a command batch in order
    async fn dispatch_commands(&self, batch: &CommandBatch) -> Result<DispatchReport>;
}

#[async_trait]
impl RemoteControl for ControlSession {
    fn identity(&self) -> DeviceIdentity {
        ControlSession::identity(self)
    }

    fn current_activity(&self) -> String {
        self.get_activity()
    }

    fn connection_state(&self) -> ConnectionState {
        ControlSession::connection_state(self)
    }

    async fn establish(&self, callback: Option<StateCallback>) -> Result<()> {
        self.establish_connection(callback).await
    }

    fn start(&self, callback: Option<StateCallback>) {
        ControlSession::start(self, callback)
    }

    async fn disconnect(&self) {
        ControlSession::disconnect(self).await
    }

    async fn dispatch_commands(&self, batch: &CommandBatch) -> Result<DispatchReport> {
        self.send_commands(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedDevice;
    use crate::{DeviceInfo, DeviceRecord, SessionConfig, UNKNOWN_ACTIVITY};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_session_through_trait_object() {
        let device = SimulatedDevice::new(
            "10.0.0.5",
            DeviceIdentity::new("ATV-XYZ", DeviceInfo::new("Sony", "BRAVIA", "5.1")),
            "0000",
        );
        let remote: Arc<dyn RemoteControl> = Arc::new(ControlSession::new(
            DeviceRecord::new("10.0.0.5", "ATV-XYZ"),
            &device,
            SessionConfig::default(),
        ));

        assert_eq!(remote.current_activity(), UNKNOWN_ACTIVITY);
        remote.establish(None).await.unwrap();
        assert_eq!(remote.identity().info.model, "BRAVIA");
        assert!(remote.connection_state().is_connected());

        let report = remote
            .dispatch_commands(&CommandBatch::new(["VOLUME_UP", "VOLUME_UP"]))
            .await
            .unwrap();
        assert_eq!(report.executed.len(), 2);

        remote.disconnect().await;
        assert_eq!(remote.connection_state(), ConnectionState::Disconnected);
    }
}
