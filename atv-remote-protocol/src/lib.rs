//! Android TV Remote Protocol Implementation
//!
//! Pairing, control sessions and command dispatch for Android TV devices.
//! The device itself is reached through the [`RemoteTransport`] trait; a
//! JSON-over-TCP bridge transport and an in-memory simulated device are
//! provided.

pub mod device;
pub mod packet;
pub mod pairing;
pub mod recovery;
pub mod remote;
pub mod session;
pub mod simulator;
pub mod transport;

mod error;
pub use device::{ConnectionState, DeviceIdentity, DeviceInfo, DeviceRecord, UNKNOWN_ACTIVITY};
pub use error::{PairingErrorKind, ProtocolError, Result};
pub use packet::{current_timestamp, Packet};
pub use pairing::{
    AbortReason, ConfiguredDevices, FlowStep, PairedDevice, PairingConfig, PairingEvent,
    PairingFlow, PairingState,
};
pub use recovery::{ReconnectConfig, ReconnectionStrategy};
pub use remote::RemoteControl;
pub use session::{
    CommandBatch, ControlSession, DispatchReport, SessionConfig, SessionSnapshot, StateCallback,
};
pub use simulator::SimulatedDevice;
pub use transport::{
    BridgeConfig, BridgeTransportFactory, RemoteTransport, TransportEvent, TransportFactory,
};
