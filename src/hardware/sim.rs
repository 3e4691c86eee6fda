// src/hardware/sim.rs - Simulated controllers for dry runs and tests
//
// Simulated axes report positions that follow the same kinematic profile the planner
// predicts with, on the tokio clock, so paused-time tests see realistic motion. Every
// accepted command is appended to a shared `CommandLog`.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::config::ProfileConfig;
use crate::hardware::{
    Axis, AxisLimits, HardwareError, HighVoltage, PressureControl, SpecialAction, XyStage,
};
use crate::method::{SpecialCommand, Step};
use crate::motion::{KinematicProfile, ProfileGenerator};

/// A command accepted by a simulated controller.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCommand {
    MoveAxis { axis: String, target: f64 },
    MoveXy { x: f64, y: f64 },
    Pressure(bool),
    Vacuum(bool),
    Voltage(f64),
    Special(SpecialCommand),
}

#[derive(Debug, Clone)]
pub struct LoggedCommand {
    pub at: Instant,
    pub command: HardwareCommand,
}

/// Shared, append-only record of simulated hardware commands.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    entries: Arc<Mutex<Vec<LoggedCommand>>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LoggedCommand>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, command: HardwareCommand) {
        tracing::debug!("sim: {:?}", command);
        self.lock().push(LoggedCommand {
            at: Instant::now(),
            command,
        });
    }

    pub fn entries(&self) -> Vec<LoggedCommand> {
        self.lock().clone()
    }

    pub fn commands(&self) -> Vec<HardwareCommand> {
        self.lock().iter().map(|e| e.command.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Injected misbehaviour of a simulated axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisFault {
    #[default]
    None,
    /// Commands are accepted but the axis never moves.
    Stalled,
    /// Every command returns `CommandFailed`.
    Failing,
}

#[derive(Debug, Clone)]
struct Motion {
    start: f64,
    target: f64,
    issued: Instant,
    profile: KinematicProfile,
}

impl Motion {
    fn at_rest(position: f64) -> Self {
        Self {
            start: position,
            target: position,
            issued: Instant::now(),
            profile: KinematicProfile::stationary(0.001),
        }
    }

    fn position(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.issued).as_secs_f64();
        self.profile.landing_position_at(elapsed, self.start, self.target)
    }
}

/// One simulated linear axis.
#[derive(Debug)]
pub struct SimAxis {
    name: String,
    limits: AxisLimits,
    range: Option<(f64, f64)>,
    generator: ProfileGenerator,
    poll_interval: Duration,
    fault: AxisFault,
    motion: Mutex<Motion>,
    log: CommandLog,
}

impl SimAxis {
    pub fn new(name: &str, limits: AxisLimits, position: f64, profile: ProfileConfig, log: CommandLog) -> Self {
        Self {
            name: name.to_string(),
            limits,
            range: None,
            generator: ProfileGenerator::new(profile),
            poll_interval: Duration::from_millis(10),
            fault: AxisFault::None,
            motion: Mutex::new(Motion::at_rest(position)),
            log,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn with_fault(mut self, fault: AxisFault) -> Self {
        self.fault = fault;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn motion(&self) -> MutexGuard<'_, Motion> {
        self.motion.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn position_now(&self) -> f64 {
        self.motion().position(Instant::now())
    }

    fn failed(&self, message: &str) -> HardwareError {
        HardwareError::CommandFailed {
            device: self.name.clone(),
            message: message.to_string(),
        }
    }

    /// Start a move without logging it.
    fn start_move(&self, target: f64) -> Result<(), HardwareError> {
        let planned = self.plan_move(target)?;
        self.commit(planned);
        Ok(())
    }

    /// Check a move and compute its motion without changing the axis state. `None` for a
    /// stalled axis, which accepts the command and stays put.
    fn plan_move(&self, target: f64) -> Result<Option<Motion>, HardwareError> {
        if self.fault == AxisFault::Failing {
            return Err(self.failed("controller not responding"));
        }
        if let Some((min, max)) = self.range {
            if target < min || target > max {
                return Err(HardwareError::OutOfRange {
                    device: self.name.clone(),
                    value: target,
                    min,
                    max,
                });
            }
        }
        if self.fault == AxisFault::Stalled {
            return Ok(None);
        }
        let now = Instant::now();
        let start = self.motion().position(now);
        let profile = self
            .generator
            .compute(target - start, self.limits)
            .map_err(|e| self.failed(&e.to_string()))?;
        Ok(Some(Motion {
            start,
            target,
            issued: now,
            profile,
        }))
    }

    fn commit(&self, planned: Option<Motion>) {
        if let Some(motion) = planned {
            *self.motion() = motion;
        }
    }
}

#[async_trait]
impl Axis for SimAxis {
    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> AxisLimits {
        self.limits
    }

    async fn set_absolute_position(&self, value: f64) -> Result<(), HardwareError> {
        self.start_move(value)?;
        self.log.record(HardwareCommand::MoveAxis {
            axis: self.name.clone(),
            target: value,
        });
        Ok(())
    }

    async fn current_position(&self) -> Result<f64, HardwareError> {
        if self.fault == AxisFault::Failing {
            return Err(self.failed("controller not responding"));
        }
        Ok(self.position_now())
    }

    async fn wait_for_target(
        &self,
        value: f64,
        tolerance: f64,
        timeout: Duration,
    ) -> Result<bool, HardwareError> {
        let deadline = Instant::now() + timeout;
        loop {
            if (self.current_position().await? - value).abs() <= tolerance {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                tracing::warn!("{}: timed out waiting for {:.3}", self.name, value);
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Stage made of two independent simulated axes.
#[derive(Debug)]
pub struct SimStage {
    x: SimAxis,
    y: SimAxis,
    log: CommandLog,
}

impl SimStage {
    pub fn new(x: SimAxis, y: SimAxis, log: CommandLog) -> Self {
        Self { x, y, log }
    }
}

#[async_trait]
impl XyStage for SimStage {
    fn x_limits(&self) -> AxisLimits {
        self.x.limits
    }

    fn y_limits(&self) -> AxisLimits {
        self.y.limits
    }

    async fn set_position(&self, x: f64, y: f64) -> Result<(), HardwareError> {
        // Both axes accept the move or neither starts.
        let (mx, my) = (self.x.plan_move(x)?, self.y.plan_move(y)?);
        self.x.commit(mx);
        self.y.commit(my);
        self.log.record(HardwareCommand::MoveXy { x, y });
        Ok(())
    }

    async fn position(&self) -> Result<(f64, f64), HardwareError> {
        Ok((self.x.current_position().await?, self.y.current_position().await?))
    }

    async fn wait_for_target(
        &self,
        x: f64,
        y: f64,
        tolerance: f64,
        timeout: Duration,
    ) -> Result<bool, HardwareError> {
        let start = Instant::now();
        if !self.x.wait_for_target(x, tolerance, timeout).await? {
            return Ok(false);
        }
        let remaining = timeout.saturating_sub(start.elapsed());
        self.y.wait_for_target(y, tolerance, remaining).await
    }
}

/// Pressure and vacuum valves that only record their state.
#[derive(Debug, Default)]
pub struct SimPressure {
    state: Mutex<(bool, bool)>,
    log: CommandLog,
}

impl SimPressure {
    pub fn new(log: CommandLog) -> Self {
        Self {
            state: Mutex::new((false, false)),
            log,
        }
    }

    /// `(pressure, vacuum)` valve state.
    pub fn state(&self) -> (bool, bool) {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PressureControl for SimPressure {
    async fn set_pressure(&self, open: bool) -> Result<(), HardwareError> {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).0 = open;
        self.log.record(HardwareCommand::Pressure(open));
        Ok(())
    }

    async fn set_vacuum(&self, open: bool) -> Result<(), HardwareError> {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).1 = open;
        self.log.record(HardwareCommand::Vacuum(open));
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimSupply {
    max_voltage: Option<f64>,
    voltage: Mutex<f64>,
    log: CommandLog,
}

impl SimSupply {
    pub fn new(max_voltage: Option<f64>, log: CommandLog) -> Self {
        Self {
            max_voltage,
            voltage: Mutex::new(0.0),
            log,
        }
    }

    pub fn voltage(&self) -> f64 {
        *self.voltage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HighVoltage for SimSupply {
    async fn set_voltage(&self, volts: f64) -> Result<(), HardwareError> {
        if let Some(max) = self.max_voltage {
            if volts.abs() > max {
                return Err(HardwareError::OutOfRange {
                    device: "high_voltage".to_string(),
                    value: volts,
                    min: -max,
                    max,
                });
            }
        }
        *self.voltage.lock().unwrap_or_else(|p| p.into_inner()) = volts;
        self.log.record(HardwareCommand::Voltage(volts));
        Ok(())
    }
}

/// Logs special commands and returns immediately.
#[derive(Debug, Default)]
pub struct SimSpecial {
    log: CommandLog,
}

impl SimSpecial {
    pub fn new(log: CommandLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl SpecialAction for SimSpecial {
    async fn run(
        &self,
        command: SpecialCommand,
        step: &Step,
        cancel: &CancelToken,
    ) -> Result<(), HardwareError> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        tracing::info!("sim: special command '{}' at {}", command, step.label());
        self.log.record(HardwareCommand::Special(command));
        Ok(())
    }
}
