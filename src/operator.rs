//! Operator-facing seams of the process.
//!
//! The orchestrator pauses at defined checkpoints for a human: confirm the
//! start, confirm material was loaded, confirm the electrode may retract,
//! acknowledge errors. How those prompts are rendered is not the core's
//! business; it only needs a blocking "confirm and continue" gate and a
//! fire-and-forget process indicator. The binary wires in the console
//! implementation below; tests substitute recording fakes.

use crate::process::Stage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;

/// A point in the sequence where progress pauses for the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Waiting for the operator to start a run.
    Start,
    /// Coating material must be loaded onto the object.
    Refill,
    /// The electrode is pressed down; confirm it may run back up.
    Retract,
    /// Entered force or cycle count was out of range.
    InvalidParameters,
    /// No object was detected on the table.
    NothingDetected,
    /// Discovery found no machine on any serial port.
    PortNotFound,
}

impl Checkpoint {
    /// Prompt text shown to the operator.
    pub fn message(&self) -> &'static str {
        match self {
            Checkpoint::Start => "Ready. Start a coating run",
            Checkpoint::Refill => "Load the coating powder onto the object",
            Checkpoint::Retract => "Press applied. Confirm the electrode may retract",
            Checkpoint::InvalidParameters => "Force or cycle count out of range",
            Checkpoint::NothingDetected => "No object detected on the machine table",
            Checkpoint::PortNotFound => "Machine not found on any serial port",
        }
    }
}

/// Blocking "confirm and continue" call presented to the operator.
///
/// The orchestrator suspends until the external actor signals continuation;
/// no other state progresses during the wait.
#[async_trait]
pub trait OperatorGate: Send + Sync {
    async fn confirm(&self, checkpoint: Checkpoint) -> Result<()>;
}

/// Transient "processing" indicator shown while a machine command runs.
#[async_trait]
pub trait ProcessIndicator: Send + Sync {
    async fn show(&self, stage: Stage);
    async fn dismiss(&self);
}

/// Console implementation of both operator surfaces.
pub struct ConsoleOperator;

impl ConsoleOperator {
    pub fn new() -> Self {
        Self
    }

    /// Prompt for the two run parameters. Values are parsed, rounded to the
    /// precision the machine accepts, and handed back raw; range validation
    /// stays with the orchestrator.
    pub async fn read_parameters(
        &self,
        limits: &crate::config::LimitSettings,
    ) -> Result<crate::process::RunParameters> {
        let force_prompt = format!("Applied force [{} - {}]: ", limits.force_min, limits.force_max);
        let cycles_prompt = format!(
            "Coating cycles [{} - {}]: ",
            limits.cycles_min, limits.cycles_max
        );

        let force: f64 = prompt_for(&force_prompt).await?;
        let cycles: u32 = prompt_for(&cycles_prompt).await?;

        Ok(crate::process::RunParameters {
            // The press command carries one decimal place on the wire.
            force: (force * 10.0).round() / 10.0,
            cycles,
        })
    }
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperatorGate for ConsoleOperator {
    async fn confirm(&self, checkpoint: Checkpoint) -> Result<()> {
        println!("{} -- press Enter to continue", checkpoint.message());
        read_stdin_line().await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessIndicator for ConsoleOperator {
    async fn show(&self, stage: Stage) {
        println!("... {stage}");
    }

    async fn dismiss(&self) {
        println!("    done");
    }
}

/// One trimmed line from stdin, read off the async executor.
async fn read_stdin_line() -> Result<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let bytes = std::io::stdin()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        if bytes == 0 {
            anyhow::bail!("Stdin closed");
        }
        Ok(line.trim().to_string())
    })
    .await
    .context("Stdin task panicked")?
}

/// Prompt until the operator enters something parseable.
async fn prompt_for<T>(prompt: &str) -> Result<T>
where
    T: std::str::FromStr,
{
    loop {
        print!("{prompt}");
        std::io::stdout().flush().context("Failed to flush stdout")?;
        let line = read_stdin_line().await?;
        match line.parse::<T>() {
            Ok(value) => return Ok(value),
            Err(_) => println!("Could not parse '{line}', try again"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_messages_are_distinct() {
        let all = [
            Checkpoint::Start,
            Checkpoint::Refill,
            Checkpoint::Retract,
            Checkpoint::InvalidParameters,
            Checkpoint::NothingDetected,
            Checkpoint::PortNotFound,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.message(), b.message());
            }
        }
    }
}
