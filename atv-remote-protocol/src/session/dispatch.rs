//! Command Dispatch
//!
//! Translates a batch of key names into device calls, strictly in order.
//!
//! Without a hold every key is sent as a discrete press. With a hold the
//! first key is pressed down, held for the duration and released, and the
//! rest of the batch is skipped.

use crate::transport::RemoteTransport;
use crate::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Ordered key names with an optional hold applied to the whole batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Vec<String>,
    hold: Option<Duration>,
}

impl CommandBatch {
    /// Batch of discrete key presses
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            hold: None,
        }
    }

    /// Hold the key instead of pressing it
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }

    /// Hold the key for `secs` seconds
    ///
    /// Negative, infinite and NaN durations are rejected.
    pub fn with_hold_secs(self, secs: f64) -> Result<Self> {
        let hold = Duration::try_from_secs_f64(secs).map_err(|_| {
            ProtocolError::InvalidCommand(format!("invalid hold duration: {} seconds", secs))
        })?;
        Ok(self.with_hold(hold))
    }

    /// Key names in execution order
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Hold duration, if any
    pub fn hold(&self) -> Option<Duration> {
        self.hold
    }

    /// Whether the batch has no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Outcome of a dispatched batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Keys that were fully executed, in order
    pub executed: Vec<String>,
    /// Whether the executed key was held
    pub held: bool,
}

/// Run a single device call for `command`, giving up when `cancel` fires
async fn guarded<F>(cancel: &CancellationToken, command: &str, call: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("Dispatch of {} interrupted by teardown", command);
            Err(ProtocolError::Cancelled(format!("dispatch of {}", command)))
        }
        result = call => result.map_err(|e| ProtocolError::command_failed(command, &e)),
    }
}

/// Run `batch` against `transport`
///
/// Every device call and the hold wait end with `Cancelled` once `cancel`
/// fires; no further calls are issued and a held key is not released.
pub(crate) async fn execute(
    transport: &mut dyn RemoteTransport,
    batch: &CommandBatch,
    cancel: &CancellationToken,
) -> Result<DispatchReport> {
    if let Some(position) = batch.commands.iter().position(|c| c.trim().is_empty()) {
        return Err(ProtocolError::InvalidCommand(format!(
            "empty key name at position {}",
            position
        )));
    }

    let mut report = DispatchReport::default();

    for command in &batch.commands {
        let Some(hold) = batch.hold else {
            guarded(cancel, command, transport.key_press(command)).await?;
            debug!("Pressed {}", command);
            report.executed.push(command.clone());
            continue;
        };

        guarded(cancel, command, transport.key_down(command)).await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Hold of {} interrupted by teardown", command);
                return Err(ProtocolError::Cancelled(format!("hold of {}", command)));
            }
            _ = sleep(hold) => {}
        }

        guarded(cancel, command, transport.key_up(command)).await?;
        debug!("Held {} for {:?}", command, hold);

        report.executed.push(command.clone());
        report.held = true;

        let skipped = batch.commands.len() - 1;
        if skipped > 0 {
            debug!("Hold applies to one key per batch, skipping {} more", skipped);
        }
        break;
    }

    Ok(report)
}
