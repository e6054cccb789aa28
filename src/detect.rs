//! Object detection by debounced sensor polling.
//!
//! Before a run is allowed to press anything, the orchestrator checks that
//! an object actually sits on the table. The force sensor reads a known
//! baseline with an empty table; anything above `threshold` means weight is
//! present. A single noisy high reading must not start the process, so
//! detection requires `required_hits` consecutive qualifying readings
//! within a bounded window.

use crate::config::DetectionSettings;
use crate::link::MachineLink;
use crate::protocol::Command;
use anyhow::Result;
use log::{debug, info};
use std::time::Instant;

/// Outcome of one detection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Detected,
    NotDetected,
}

/// Polls the sensor probe command and debounces the readings.
pub struct DetectionSequencer {
    settings: DetectionSettings,
}

impl DetectionSequencer {
    pub fn new(settings: &DetectionSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    /// Run one detection window over `link`.
    ///
    /// Each iteration sends `"s:"`, waits briefly for the machine to
    /// respond, then attempts a single deadline-bounded line read. A
    /// numeric reading above the threshold increments the hit counter;
    /// anything else (low reading, non-numeric line, read timeout) resets
    /// it. Reaching the required hit count returns immediately; an
    /// exhausted window returns [`Detection::NotDetected`].
    pub async fn run(&self, link: &mut dyn MachineLink) -> Result<Detection> {
        let start = Instant::now();
        let mut hits: u32 = 0;

        while start.elapsed() < self.settings.window() {
            link.write(Command::Probe.encode().as_bytes()).await?;
            tokio::time::sleep(self.settings.probe_interval()).await;

            let reading = link
                .read_line(self.settings.read_timeout())
                .await?
                .and_then(|line| line.trim().parse::<i32>().ok());

            match reading {
                Some(value) if value > self.settings.threshold => {
                    hits += 1;
                    debug!("Sensor {} > {} ({}/{})", value, self.settings.threshold, hits, self.settings.required_hits);
                }
                Some(value) => {
                    debug!("Sensor {} at or below baseline, counter reset", value);
                    hits = 0;
                }
                None => {
                    debug!("No sensor reading, counter reset");
                    hits = 0;
                }
            }

            if hits >= self.settings.required_hits {
                info!("Object detected after {:?}", start.elapsed());
                return Ok(Detection::Detected);
            }
        }

        info!("Nothing detected within {:?}", self.settings.window());
        Ok(Detection::NotDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MockLink;

    fn fast_settings() -> DetectionSettings {
        DetectionSettings {
            window_ms: 500,
            probe_interval_ms: 1,
            read_timeout_ms: 10,
            threshold: 340,
            required_hits: 5,
        }
    }

    #[tokio::test]
    async fn test_noise_resets_the_counter() {
        // Five consecutive hits only after the sub-threshold blip.
        let link = MockLink::scripted(["350", "350", "300", "350", "350", "350", "350", "350"]);
        let sequencer = DetectionSequencer::new(&fast_settings());

        let result = sequencer.run(&mut link.clone()).await.unwrap();
        assert_eq!(result, Detection::Detected);
        // Probes: 2 hits, 1 reset, then the qualifying run of 5.
        assert_eq!(link.transcript().await.len(), 8);
    }

    #[tokio::test]
    async fn test_returns_early_on_required_hits() {
        let link = MockLink::scripted(["400", "400", "400", "400", "400", "400", "400"]);
        let sequencer = DetectionSequencer::new(&fast_settings());

        let result = sequencer.run(&mut link.clone()).await.unwrap();
        assert_eq!(result, Detection::Detected);
        // Stops at the fifth hit instead of waiting out the window.
        assert_eq!(link.transcript().await.len(), 5);
    }

    #[tokio::test]
    async fn test_too_few_hits_is_not_detected() {
        let mut settings = fast_settings();
        settings.window_ms = 40;
        let link = MockLink::scripted(["400", "400", "400", "400"]);
        let sequencer = DetectionSequencer::new(&settings);

        let result = sequencer.run(&mut link.clone()).await.unwrap();
        assert_eq!(result, Detection::NotDetected);
    }

    #[tokio::test]
    async fn test_non_numeric_lines_reset() {
        let mut settings = fast_settings();
        settings.window_ms = 40;
        let link = MockLink::scripted(["400", "400", "400", "400", "garbled", "400"]);
        let sequencer = DetectionSequencer::new(&settings);

        let result = sequencer.run(&mut link.clone()).await.unwrap();
        assert_eq!(result, Detection::NotDetected);
    }
}
