//! A mock machine link for tests and dry runs.
//!
//! Two behaviours are supported: a scripted link replays a fixed queue of
//! response lines, and a simulated machine answers every probe with a fixed
//! sensor reading and every motion command with the completion sentinel.
//! Every byte written is recorded so tests can assert the exact wire order.

use super::{LinkFactory, MachineLink};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Behaviour {
    /// Replay queued lines only.
    Scripted,
    /// Answer probes with `sensor_value`, everything else with the sentinel.
    Machine { sensor_value: i32 },
}

#[derive(Debug)]
struct MockState {
    behaviour: Behaviour,
    written: Vec<String>,
    replies: VecDeque<String>,
    closed: bool,
}

/// Shared-state mock link; clones observe the same transcript and reply
/// queue, which lets a [`MockLinkFactory`] hand out per-command "connections"
/// over one simulated machine.
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<Mutex<MockState>>,
}

impl MockLink {
    /// A link that replays `lines` in order and then times out.
    pub fn scripted<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                behaviour: Behaviour::Scripted,
                written: Vec::new(),
                replies: lines.into_iter().map(Into::into).collect(),
                closed: false,
            })),
        }
    }

    /// A simulated machine whose force sensor always reads `sensor_value`.
    pub fn machine(sensor_value: i32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                behaviour: Behaviour::Machine { sensor_value },
                written: Vec::new(),
                replies: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Everything written to the link so far, one entry per `write` call.
    pub async fn transcript(&self) -> Vec<String> {
        self.inner.lock().await.written.clone()
    }

    /// Whether `close` has been called at least once.
    pub async fn was_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

#[async_trait]
impl MachineLink for MockLink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.inner.lock().await;
        let command = String::from_utf8_lossy(data).to_string();

        if let Behaviour::Machine { sensor_value } = state.behaviour {
            let reply = if command == "s:" {
                sensor_value.to_string()
            } else {
                "Koniec".to_string()
            };
            state.replies.push_back(reply);
        }

        state.written.push(command);
        Ok(())
    }

    async fn read_line(&mut self, deadline: Duration) -> Result<Option<String>> {
        if let Some(line) = self.inner.lock().await.replies.pop_front() {
            return Ok(Some(line));
        }
        // Nothing queued: behave like a quiet wire without spinning the
        // caller's deadline loop at full speed.
        tokio::time::sleep(deadline.min(Duration::from_millis(1))).await;
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.lock().await.closed = true;
        Ok(())
    }
}

/// Hands out clones of one [`MockLink`] as per-command connections.
pub struct MockLinkFactory {
    link: MockLink,
}

impl MockLinkFactory {
    pub fn new(link: MockLink) -> Self {
        Self { link }
    }
}

#[async_trait]
impl LinkFactory for MockLinkFactory {
    async fn connect(&self) -> Result<Box<dyn MachineLink>> {
        Ok(Box::new(self.link.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replay_then_timeout() {
        let mut link = MockLink::scripted(["120", "Koniec"]);
        link.write(b"u:").await.unwrap();

        let timeout = Duration::from_millis(5);
        assert_eq!(link.read_line(timeout).await.unwrap().as_deref(), Some("120"));
        assert_eq!(
            link.read_line(timeout).await.unwrap().as_deref(),
            Some("Koniec")
        );
        assert_eq!(link.read_line(timeout).await.unwrap(), None);
        assert_eq!(link.transcript().await, vec!["u:"]);
    }

    #[tokio::test]
    async fn test_machine_answers_probe_and_motion() {
        let mut link = MockLink::machine(350);
        let timeout = Duration::from_millis(5);

        link.write(b"s:").await.unwrap();
        assert_eq!(link.read_line(timeout).await.unwrap().as_deref(), Some("350"));

        link.write(b"p2000:").await.unwrap();
        assert_eq!(
            link.read_line(timeout).await.unwrap().as_deref(),
            Some("Koniec")
        );
    }
}
