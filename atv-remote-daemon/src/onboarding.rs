//! Interactive Onboarding
//!
//! Drives a [`PairingFlow`] from line-based input: the address form, then
//! the code form, re-prompting with an error message on each failure.

use anyhow::Result;
use atv_remote_protocol::{FlowStep, PairedDevice, PairingErrorKind, PairingFlow};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::debug;

/// Message shown for a form error
pub fn form_error_message(kind: PairingErrorKind) -> &'static str {
    match kind {
        PairingErrorKind::CannotConnect => "Failed to connect",
        PairingErrorKind::InvalidAuth => "Invalid pairing code",
        PairingErrorKind::AlreadyConfigured => "Device is already configured",
    }
}

/// Line-based prompt over an input and an output stream
pub struct Prompt<R, W> {
    lines: Lines<R>,
    output: W,
}

impl<R, W> Prompt<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a prompt reading `input` and writing to `output`
    pub fn new(input: R, output: W) -> Self {
        Self {
            lines: input.lines(),
            output,
        }
    }

    /// Print `message` on its own line
    pub async fn say(&mut self, message: &str) -> Result<()> {
        self.output.write_all(message.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await?;
        Ok(())
    }

    /// Ask for a non-empty value; `None` when input is exhausted
    pub async fn ask(&mut self, label: &str) -> Result<Option<String>> {
        loop {
            self.output.write_all(label.as_bytes()).await?;
            self.output.write_all(b": ").await?;
            self.output.flush().await?;

            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let value = line.trim();
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
    }

    #[cfg(test)]
    pub fn output(&self) -> &W {
        &self.output
    }
}

/// Pair a device interactively
///
/// `address`, when given, answers the first address form. Returns the paired
/// device, or `None` when the flow aborted or input ran out.
pub async fn run<R, W>(
    flow: &mut PairingFlow,
    prompt: &mut Prompt<R, W>,
    address: Option<String>,
) -> Result<Option<PairedDevice>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut preset = address;
    let mut step = flow.start()?;

    loop {
        debug!("Pairing flow in state {}", flow.state().as_str());
        step = match step {
            FlowStep::AddressForm { error } => {
                if let Some(kind) = error {
                    prompt.say(&format!("Error: {}", form_error_message(kind))).await?;
                }
                let address = match preset.take() {
                    Some(address) => address,
                    None => match prompt.ask("Device address").await? {
                        Some(address) => address,
                        None => {
                            flow.cancel().await;
                            return Ok(None);
                        }
                    },
                };
                flow.submit_address(&address).await?
            }
            FlowStep::CodeForm { error } => {
                if let Some(kind) = error {
                    prompt.say(&format!("Error: {}", form_error_message(kind))).await?;
                }
                match prompt.ask("Pairing code shown on the TV").await? {
                    Some(code) => flow.submit_code(&code).await?,
                    None => {
                        flow.cancel().await;
                        return Ok(None);
                    }
                }
            }
            FlowStep::Abort { reason } => {
                prompt.say(&format!("Pairing aborted: {}", reason)).await?;
                return Ok(None);
            }
            FlowStep::CreateEntry(paired) => {
                prompt
                    .say(&format!(
                        "Paired with {} ({})",
                        paired.identity.info.display_name(),
                        paired.identity.unique_id
                    ))
                    .await?;
                return Ok(Some(paired));
            }
        };
    }
}
