//! Application configuration.
//!
//! Settings are loaded with the `config` crate from an optional TOML file
//! plus `COATER_`-prefixed environment variables, on top of built-in
//! defaults that match the machine as wired in the lab. A semantic
//! [`Settings::validate`] pass runs after deserialization so that a config
//! file which parses cleanly but makes no physical sense is rejected early.
//!
//! ## Configuration
//!
//! ```toml
//! [serial]
//! # port = "/dev/ttyUSB0"   # omit to auto-discover by descriptor_hint
//! baud_rate = 9600
//! descriptor_hint = "CH340"
//! settle_ms = 3000
//!
//! [protocol]
//! read_timeout_ms = 1000
//! command_deadline_s = 3600
//! completion_sentinels = ["Koniec"]
//!
//! [detection]
//! window_ms = 6000
//! probe_interval_ms = 100
//! read_timeout_ms = 1000
//! threshold = 340
//! required_hits = 5
//!
//! [motion]
//! one_rotation_steps = 5120
//! refill_lift_steps = 2000
//! clear_lift_steps = 14000
//!
//! [limits]
//! force_min = 0.5
//! force_max = 5.0
//! cycles_min = 1
//! cycles_max = 12
//! ```

use crate::error::{AppResult, CoaterError};
use crate::planner;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Top-level application settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub serial: SerialSettings,
    pub protocol: ProtocolSettings,
    pub detection: DetectionSettings,
    pub motion: MotionSettings,
    pub limits: LimitSettings,
}

/// Serial link configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Explicit port name. When absent the port is discovered by matching
    /// `descriptor_hint` against the USB product descriptor of each port.
    pub port: Option<String>,
    /// Baud rate, 8N1 framing implied.
    pub baud_rate: u32,
    /// Substring of the USB-to-serial chip descriptor to look for.
    pub descriptor_hint: String,
    /// Delay after opening the port before the first write. CH340 boards
    /// reset the microcontroller on open and need time to boot.
    pub settle_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            descriptor_hint: "CH340".to_string(),
            settle_ms: 3000,
        }
    }
}

impl SerialSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Command exchange configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Deadline for a single line read. Short, so intermediate status lines
    /// keep flowing even while a long motion is in progress.
    pub read_timeout_ms: u64,
    /// Overall deadline for one command's completion wait. The machine
    /// signals completion itself, so this is a backstop, not a schedule.
    pub command_deadline_s: u64,
    /// Lines that mark completion of a physical action.
    pub completion_sentinels: Vec<String>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 1000,
            command_deadline_s: 3600,
            completion_sentinels: vec!["Koniec".to_string()],
        }
    }
}

impl ProtocolSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn command_deadline(&self) -> Duration {
        Duration::from_secs(self.command_deadline_s)
    }
}

/// Object-detection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Total polling window.
    pub window_ms: u64,
    /// Pause between sending a probe and reading its reply.
    pub probe_interval_ms: u64,
    /// Deadline for reading a single probe reply.
    pub read_timeout_ms: u64,
    /// Sensor baseline plus margin with nothing on the table. Readings above
    /// this count as an object present.
    pub threshold: i32,
    /// Consecutive qualifying readings required before accepting detection.
    pub required_hits: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            window_ms: 6000,
            probe_interval_ms: 100,
            read_timeout_ms: 1000,
            threshold: 340,
            required_hits: 5,
        }
    }
}

impl DetectionSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Fixed step counts for the mechanical sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Steps for one full table rotation with the gear ratio applied.
    pub one_rotation_steps: i32,
    /// Relative lift after the initial descend, to make room for loading
    /// coating material.
    pub refill_lift_steps: i32,
    /// Relative lift after each press, to clear the table before it spins.
    pub clear_lift_steps: i32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            one_rotation_steps: planner::ONE_ROTATION_STEPS,
            refill_lift_steps: 2000,
            clear_lift_steps: 14000,
        }
    }
}

/// Valid ranges for operator-entered run parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub force_min: f64,
    pub force_max: f64,
    pub cycles_min: u32,
    pub cycles_max: u32,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            force_min: 0.5,
            force_max: 5.0,
            cycles_min: 1,
            cycles_max: 12,
        }
    }
}

impl Settings {
    /// Load settings from the given file (or `coater.toml` next to the
    /// binary when `None`), environment overrides, and defaults.
    pub fn new(path: Option<&str>) -> AppResult<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(p) => builder.add_source(File::with_name(p)),
            None => builder.add_source(File::with_name("coater").required(false)),
        };

        // e.g. COATER_DETECTION__THRESHOLD=350
        builder = builder.add_source(Environment::with_prefix("COATER").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what deserialization can express.
    pub fn validate(&self) -> AppResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(CoaterError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }
        if self.serial.descriptor_hint.is_empty() && self.serial.port.is_none() {
            return Err(CoaterError::Configuration(
                "serial.descriptor_hint must be set when serial.port is not".to_string(),
            ));
        }
        if self.protocol.read_timeout_ms == 0 {
            return Err(CoaterError::Configuration(
                "protocol.read_timeout_ms must be positive".to_string(),
            ));
        }
        if self.protocol.completion_sentinels.is_empty() {
            return Err(CoaterError::Configuration(
                "protocol.completion_sentinels must not be empty".to_string(),
            ));
        }
        if self.detection.required_hits == 0 {
            return Err(CoaterError::Configuration(
                "detection.required_hits must be at least 1".to_string(),
            ));
        }
        if self.detection.window_ms == 0 {
            return Err(CoaterError::Configuration(
                "detection.window_ms must be positive".to_string(),
            ));
        }
        if self.motion.one_rotation_steps <= 0 {
            return Err(CoaterError::Configuration(
                "motion.one_rotation_steps must be positive".to_string(),
            ));
        }
        if self.limits.force_min > self.limits.force_max {
            return Err(CoaterError::Configuration(format!(
                "limits.force_min {} exceeds limits.force_max {}",
                self.limits.force_min, self.limits.force_max
            )));
        }
        if self.limits.cycles_min == 0 || self.limits.cycles_min > self.limits.cycles_max {
            return Err(CoaterError::Configuration(format!(
                "limits.cycles range [{}, {}] is invalid",
                self.limits.cycles_min, self.limits.cycles_max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.serial.baud_rate, 9600);
        assert_eq!(settings.serial.descriptor_hint, "CH340");
        assert_eq!(settings.detection.threshold, 340);
        assert_eq!(settings.detection.required_hits, 5);
        assert_eq!(settings.motion.one_rotation_steps, 5120);
        assert_eq!(settings.protocol.completion_sentinels, vec!["Koniec"]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coater.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[detection]\nthreshold = 400\n\n[serial]\nport = \"/dev/ttyUSB7\"\n"
        )
        .unwrap();

        let settings = Settings::new(path.to_str()).unwrap();
        assert_eq!(settings.detection.threshold, 400);
        assert_eq!(settings.serial.port.as_deref(), Some("/dev/ttyUSB7"));
        // Untouched sections keep their defaults.
        assert_eq!(settings.serial.baud_rate, 9600);
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let mut settings = Settings::default();
        settings.limits.force_min = 5.0;
        settings.limits.force_max = 0.5;
        assert!(matches!(
            settings.validate(),
            Err(CoaterError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_hits_rejected() {
        let mut settings = Settings::default();
        settings.detection.required_hits = 0;
        assert!(settings.validate().is_err());
    }
}
