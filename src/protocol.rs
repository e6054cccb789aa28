//! Command encoding and the completion-sentinel exchange.
//!
//! The machine speaks single-letter ASCII tokens terminated by a colon,
//! with an optional numeric suffix (`"u:"`, `"r2000:"`, `"m2.5:"`). It
//! never acknowledges receipt; a physical action of unknown duration runs
//! and the firmware eventually prints a sentinel line (`"Koniec"`).
//!
//! [`CommandProtocol::send_and_await_completion`] therefore polls with
//! short read deadlines instead of one long blocking read, so intermediate
//! status lines stay observable and a dropped line cannot deadlock the
//! process. The link is closed on every exit path.

use crate::config::ProtocolSettings;
use crate::link::MachineLink;
use anyhow::Result;
use log::{debug, warn};
use std::time::{Duration, Instant};

/// One command in the machine's wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Move the actuator up to the limit-switch home position.
    Home,
    /// Descend until the table object is detected.
    Descend,
    /// Probe the force sensor once.
    Probe,
    /// Relative actuator move by a signed step count.
    MoveRelative(i32),
    /// Rotate the table by a signed step count; negative reverses.
    Rotate(i32),
    /// Press down until the sensor reads the given force.
    Press(f64),
}

impl Command {
    /// ASCII wire form, colon-terminated. Force carries exactly one
    /// decimal place.
    pub fn encode(&self) -> String {
        match self {
            Command::Home => "u:".to_string(),
            Command::Descend => "d:".to_string(),
            Command::Probe => "s:".to_string(),
            Command::MoveRelative(steps) => format!("r{steps}:"),
            Command::Rotate(steps) => format!("p{steps}:"),
            Command::Press(force) => format!("m{force:.1}:"),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Result of one completion wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A completion sentinel arrived.
    Completed,
    /// The overall deadline elapsed without a sentinel. Returned, not
    /// raised, so the orchestrator decides whether to retry or abort.
    TimedOut,
}

/// Sends commands and waits for the machine-reported completion sentinel.
pub struct CommandProtocol {
    read_timeout: Duration,
    deadline: Duration,
    sentinels: Vec<String>,
}

impl CommandProtocol {
    pub fn new(settings: &ProtocolSettings) -> Self {
        Self {
            read_timeout: settings.read_timeout(),
            deadline: settings.command_deadline(),
            sentinels: settings.completion_sentinels.clone(),
        }
    }

    /// Write `command`, then read lines until a sentinel or the overall
    /// deadline. Every non-sentinel line is surfaced to `observer` and
    /// otherwise discarded. Closes the link before returning, on every
    /// exit path.
    pub async fn send_and_await_completion<F>(
        &self,
        link: &mut dyn MachineLink,
        command: &Command,
        observer: F,
    ) -> Result<CommandOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let result = self.exchange(link, command, observer).await;
        if let Err(e) = link.close().await {
            warn!("Failed to close link after {}: {:#}", command, e);
        }
        result
    }

    async fn exchange<F>(
        &self,
        link: &mut dyn MachineLink,
        command: &Command,
        mut observer: F,
    ) -> Result<CommandOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let wire = command.encode();
        link.write(wire.as_bytes()).await?;
        debug!("Sent command: {}", wire);

        let start = Instant::now();
        loop {
            if start.elapsed() >= self.deadline {
                warn!(
                    "No completion sentinel for {} within {:?}",
                    command, self.deadline
                );
                return Ok(CommandOutcome::TimedOut);
            }

            match link.read_line(self.read_timeout).await? {
                Some(line) if self.sentinels.iter().any(|s| s == &line) => {
                    debug!("Command {} completed", command);
                    return Ok(CommandOutcome::Completed);
                }
                Some(line) => observer(&line),
                // A single read deadline elapsing just means "no data yet".
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MockLink;

    fn protocol(deadline_ms: u64) -> CommandProtocol {
        CommandProtocol {
            read_timeout: Duration::from_millis(10),
            deadline: Duration::from_millis(deadline_ms),
            sentinels: vec!["Koniec".to_string()],
        }
    }

    #[test]
    fn test_encoding() {
        assert_eq!(Command::Home.encode(), "u:");
        assert_eq!(Command::Descend.encode(), "d:");
        assert_eq!(Command::Probe.encode(), "s:");
        assert_eq!(Command::MoveRelative(2000).encode(), "r2000:");
        assert_eq!(Command::MoveRelative(-500).encode(), "r-500:");
        assert_eq!(Command::Press(2.5).encode(), "m2.5:");
        assert_eq!(Command::Press(3.0).encode(), "m3.0:");
    }

    #[test]
    fn test_rotate_signs_are_distinct() {
        assert_eq!(Command::Rotate(2000).encode(), "p2000:");
        assert_eq!(Command::Rotate(-2000).encode(), "p-2000:");
    }

    #[tokio::test]
    async fn test_completes_on_sentinel_after_status_lines() {
        let link = MockLink::scripted(["moving", "almost there", "Koniec"]);
        let mut seen = Vec::new();

        let outcome = protocol(1000)
            .send_and_await_completion(&mut link.clone(), &Command::Home, |line| {
                seen.push(line.to_string());
            })
            .await
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Completed);
        assert_eq!(seen, vec!["moving", "almost there"]);
        assert_eq!(link.transcript().await, vec!["u:"]);
        assert!(link.was_closed().await);
    }

    #[tokio::test]
    async fn test_times_out_without_sentinel() {
        let link = MockLink::scripted(["still moving"]);

        let outcome = protocol(50)
            .send_and_await_completion(&mut link.clone(), &Command::Rotate(100), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, CommandOutcome::TimedOut);
        assert!(link.was_closed().await);
    }
}
