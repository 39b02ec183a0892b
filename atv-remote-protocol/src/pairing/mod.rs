//! Android TV Device Pairing
//!
//! Interactive onboarding of a device at a known address.
//!
//! ## Pairing Protocol
//!
//! 1. **Address entry**: the operator submits the device address
//! 2. **Handshake start**: the device is asked to begin pairing and shows a code
//! 3. **Duplicate check**: a device that is already configured aborts the flow
//! 4. **Code entry**: the operator submits the code shown on screen
//! 5. **Entry creation**: the flow yields `(address, unique_id)` for storage
//!
//! Every failure re-presents the current form with an error key
//! (`cannot_connect`, `invalid_auth`). Only duplicates and explicit
//! cancellation end the flow early.
//!
//! ## Usage
//!
//! ```no_run
//! use atv_remote_protocol::pairing::{FlowStep, PairingConfig, PairingFlow};
//! use atv_remote_protocol::BridgeTransportFactory;
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! # async fn run() -> atv_remote_protocol::Result<()> {
//! let mut flow = PairingFlow::new(
//!     Arc::new(BridgeTransportFactory::default()),
//!     Arc::new(HashSet::<String>::new()),
//!     PairingConfig::default(),
//! );
//!
//! flow.start()?;
//! if let FlowStep::CodeForm { .. } = flow.submit_address("10.0.0.5").await? {
//!     if let FlowStep::CreateEntry(device) = flow.submit_code("123456").await? {
//!         println!("paired {}", device.identity.unique_id);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod flow;

pub use events::PairingEvent;
pub use flow::{
    AbortReason, ConfiguredDevices, FlowStep, PairedDevice, PairingConfig, PairingFlow,
    PairingState, PAIRING_TIMEOUT,
};
