//! Android TV Control Session
//!
//! One [`ControlSession`] per configured device. It owns the device
//! connection, tracks the reported activity and executes command batches.
//!
//! ## Lifecycle
//!
//! 1. **Setup**: the host builds a session from the stored record
//! 2. **Connect**: [`ControlSession::establish_connection`] or
//!    [`ControlSession::start`] opens the connection
//! 3. **Service**: activity changes are published, commands are dispatched,
//!    dropped connections are recovered with backoff
//! 4. **Teardown**: [`ControlSession::disconnect`] releases everything

pub mod control;
pub mod dispatch;
pub mod events;

pub use control::{ControlSession, SessionConfig, CONNECT_TIMEOUT};
pub use dispatch::{CommandBatch, DispatchReport};
pub use events::{SessionSnapshot, StateCallback};
