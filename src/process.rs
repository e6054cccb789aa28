//! Top-level process orchestration.
//!
//! Drives the machine through the fixed coating sequence: home, detect,
//! position for refill, then per cycle descend / press / retract / clear /
//! rotate, a final press without rotation, and a counter-rotation that
//! compensates all accumulated partial spins. Machine actions go through
//! [`CommandProtocol`]; operator checkpoints go through the external
//! [`OperatorGate`].
//!
//! A run's outcome is a value, not an exception: validation and detection
//! failures produce [`RunOutcome::Aborted`] after the operator has
//! acknowledged them, and the driver loop restarts without terminating the
//! process. Only link failures surface as errors, and they too are fatal
//! for the current run alone.
//!
//! Every command opens its own connection and the protocol releases it on
//! every exit path, so the machine always starts a run from a fresh link.
//! A run also always begins by homing, which doubles as recovery after a
//! previous run was interrupted mid-motion.

use crate::config::{LimitSettings, Settings};
use crate::detect::{Detection, DetectionSequencer};
use crate::error::{AppResult, CoaterError};
use crate::link::LinkFactory;
use crate::operator::{Checkpoint, OperatorGate, ProcessIndicator};
use crate::planner;
use crate::protocol::{Command, CommandOutcome, CommandProtocol};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;

/// Operator-entered parameters for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunParameters {
    /// Target press force, one decimal place on the wire.
    pub force: f64,
    /// Number of coating cycles.
    pub cycles: u32,
}

impl RunParameters {
    /// Range-check both parameters. Must pass before any machine motion.
    pub fn validate(&self, limits: &LimitSettings) -> AppResult<()> {
        if !(limits.force_min..=limits.force_max).contains(&self.force) {
            return Err(CoaterError::OutOfRange {
                what: "force",
                value: self.force,
                min: limits.force_min,
                max: limits.force_max,
            });
        }
        if self.cycles < limits.cycles_min || self.cycles > limits.cycles_max {
            return Err(CoaterError::OutOfRange {
                what: "cycles",
                value: f64::from(self.cycles),
                min: f64::from(limits.cycles_min),
                max: f64::from(limits.cycles_max),
            });
        }
        Ok(())
    }
}

/// Why a run stopped short of completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Force or cycle count out of range; nothing was sent to the machine.
    InvalidParameters,
    /// The detection window elapsed without a debounced object reading.
    NothingDetected,
    /// A command's completion sentinel never arrived before its deadline.
    CommandTimeout,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::InvalidParameters => write!(f, "run parameters out of range"),
            AbortReason::NothingDetected => write!(f, "no object detected on the table"),
            AbortReason::CommandTimeout => write!(f, "machine did not report completion"),
        }
    }
}

/// Result of one run of the full sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted(AbortReason),
}

/// Where the sequence currently is; used for indicator display and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Homing,
    InitialDescend,
    RefillLift,
    Descend,
    Press,
    ClearLift,
    Rotate,
    CounterRotate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Stage::Homing => "homing to the limit switch",
            Stage::InitialDescend => "descending to the object",
            Stage::RefillLift => "lifting to make room for refill",
            Stage::Descend => "descending to the object",
            Stage::Press => "pressing to the target force",
            Stage::ClearLift => "lifting clear of the table",
            Stage::Rotate => "rotating the table",
            Stage::CounterRotate => "counter-rotating the table",
        };
        write!(f, "{text}")
    }
}

/// The process state machine.
pub struct ProcessOrchestrator {
    settings: Settings,
    links: Arc<dyn LinkFactory>,
    gate: Arc<dyn OperatorGate>,
    indicator: Arc<dyn ProcessIndicator>,
    protocol: CommandProtocol,
    detector: DetectionSequencer,
}

impl ProcessOrchestrator {
    pub fn new(
        settings: Settings,
        links: Arc<dyn LinkFactory>,
        gate: Arc<dyn OperatorGate>,
        indicator: Arc<dyn ProcessIndicator>,
    ) -> Self {
        let protocol = CommandProtocol::new(&settings.protocol);
        let detector = DetectionSequencer::new(&settings.detection);
        Self {
            settings,
            links,
            gate,
            indicator,
            protocol,
            detector,
        }
    }

    /// Run the full coating sequence once with the given parameters.
    ///
    /// Returns `Ok(Aborted(..))` for recoverable failures the operator has
    /// already acknowledged; `Err` only for link failures. Either way the
    /// driver loop is expected to restart.
    pub async fn run(&self, params: RunParameters) -> Result<RunOutcome> {
        if let Err(e) = params.validate(&self.settings.limits) {
            warn!("Rejected run parameters: {e}");
            self.gate.confirm(Checkpoint::InvalidParameters).await?;
            return Ok(RunOutcome::Aborted(AbortReason::InvalidParameters));
        }

        info!(
            "Starting coating run: force {:.1}, {} cycles",
            params.force, params.cycles
        );

        if let Some(reason) = self.execute(Stage::Homing, Command::Home).await? {
            return Ok(RunOutcome::Aborted(reason));
        }

        if self.detect().await? == Detection::NotDetected {
            self.gate.confirm(Checkpoint::NothingDetected).await?;
            return Ok(RunOutcome::Aborted(AbortReason::NothingDetected));
        }

        // Position for loading the coating material.
        if let Some(reason) = self.execute(Stage::InitialDescend, Command::Descend).await? {
            return Ok(RunOutcome::Aborted(reason));
        }
        let refill_lift = Command::MoveRelative(self.settings.motion.refill_lift_steps);
        if let Some(reason) = self.execute(Stage::RefillLift, refill_lift).await? {
            return Ok(RunOutcome::Aborted(reason));
        }
        self.gate.confirm(Checkpoint::Refill).await?;

        let schedule = planner::plan(params.cycles, self.settings.motion.one_rotation_steps);
        for (index, steps) in schedule.iter().enumerate() {
            info!(
                "Cycle {}/{} ({} rotation steps)",
                index + 1,
                schedule.len(),
                steps
            );
            if let Some(reason) = self.coating_cycle(params.force, Some(*steps)).await? {
                return Ok(RunOutcome::Aborted(reason));
            }
        }

        // One last press on the final segment, without a rotation after it.
        if let Some(reason) = self.coating_cycle(params.force, None).await? {
            return Ok(RunOutcome::Aborted(reason));
        }

        if let Some(reason) = self.execute(Stage::Homing, Command::Home).await? {
            return Ok(RunOutcome::Aborted(reason));
        }
        let counter = Command::Rotate(-self.settings.motion.one_rotation_steps);
        if let Some(reason) = self.execute(Stage::CounterRotate, counter).await? {
            return Ok(RunOutcome::Aborted(reason));
        }

        info!("Coating run completed");
        Ok(RunOutcome::Completed)
    }

    /// Descend, press to force, wait for the retract confirmation, lift
    /// clear. The per-cycle body also rotates; the final pass does not.
    async fn coating_cycle(
        &self,
        force: f64,
        rotate_steps: Option<i32>,
    ) -> Result<Option<AbortReason>> {
        if let Some(reason) = self.execute(Stage::Descend, Command::Descend).await? {
            return Ok(Some(reason));
        }
        if let Some(reason) = self.execute(Stage::Press, Command::Press(force)).await? {
            return Ok(Some(reason));
        }
        self.gate.confirm(Checkpoint::Retract).await?;

        let rotate_after = match rotate_steps {
            Some(steps) => steps,
            None => return Ok(None),
        };

        let clear = Command::MoveRelative(self.settings.motion.clear_lift_steps);
        if let Some(reason) = self.execute(Stage::ClearLift, clear).await? {
            return Ok(Some(reason));
        }
        self.execute(Stage::Rotate, Command::Rotate(rotate_after))
            .await
    }

    /// One machine command behind the process indicator, on its own
    /// connection.
    async fn execute(&self, stage: Stage, command: Command) -> Result<Option<AbortReason>> {
        debug!("{stage}: {command}");
        self.indicator.show(stage).await;

        let outcome = async {
            let mut link = self
                .links
                .connect()
                .await
                .with_context(|| format!("Failed to open machine link while {stage}"))?;
            self.protocol
                .send_and_await_completion(link.as_mut(), &command, |line| {
                    debug!("machine: {line}");
                })
                .await
        }
        .await;

        self.indicator.dismiss().await;

        match outcome? {
            CommandOutcome::Completed => Ok(None),
            CommandOutcome::TimedOut => Ok(Some(AbortReason::CommandTimeout)),
        }
    }

    /// One detection window on its own connection.
    async fn detect(&self) -> Result<Detection> {
        info!("Checking for an object on the table");
        let mut link = self
            .links
            .connect()
            .await
            .context("Failed to open machine link for detection")?;
        let result = self.detector.run(link.as_mut()).await;
        if let Err(e) = link.close().await {
            warn!("Failed to close link after detection: {e:#}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> LimitSettings {
        LimitSettings::default()
    }

    #[test]
    fn test_validate_accepts_closed_ranges() {
        for force in [0.5, 1.0, 2.5, 5.0] {
            for cycles in [1, 6, 12] {
                let params = RunParameters { force, cycles };
                assert!(params.validate(&limits()).is_ok(), "{params:?}");
            }
        }
    }

    #[test]
    fn test_validate_rejects_force_outside_range() {
        for force in [0.49, 0.0, -1.0, 5.01, 6.0, f64::NAN] {
            let params = RunParameters { force, cycles: 3 };
            assert!(params.validate(&limits()).is_err(), "{params:?}");
        }
    }

    #[test]
    fn test_validate_rejects_cycles_outside_range() {
        for cycles in [0, 13, 100] {
            let params = RunParameters { force: 2.0, cycles };
            assert!(params.validate(&limits()).is_err(), "{params:?}");
        }
    }

    #[test]
    fn test_out_of_range_error_names_the_parameter() {
        let params = RunParameters {
            force: 6.0,
            cycles: 3,
        };
        let err = params.validate(&limits()).unwrap_err();
        assert!(err.to_string().contains("force"));
    }
}
