// src/sequencer.rs - Method run queue and step execution
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Duration;

use crate::cancel::{CancelToken, Cancelled};
use crate::config::{Config, MissingWellPolicy, QueuePolicy, SequencerConfig};
use crate::hardware::{Axis, HardwareError, HardwareSlots};
use crate::method::{Method, Step};
use crate::motion::{MotionError, Point3, TransferPlanner, build_planner};
use crate::template::{Template, TemplateError};

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },
    #[error("No steps queued")]
    NoQueue,
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    #[error("Motion error: {0}")]
    Motion(MotionError),
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Transfer failed at {0}")]
    TransferFailed(String),
    #[error("Run cancelled")]
    Cancelled,
}

impl From<MotionError> for SequencerError {
    fn from(error: MotionError) -> Self {
        match error {
            MotionError::Cancelled => SequencerError::Cancelled,
            MotionError::Hardware(e) => SequencerError::Hardware(e),
            other => SequencerError::Motion(other),
        }
    }
}

impl From<Cancelled> for SequencerError {
    fn from(_: Cancelled) -> Self {
        SequencerError::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Queued { steps: usize },
    Running { index: usize, total: usize, label: String },
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Queued { steps } => write!(f, "queued ({} steps)", steps),
            RunState::Running { index, total, label } => {
                write!(f, "running step {}/{} ({})", index + 1, total, label)
            }
            RunState::Stopped => write!(f, "stopped"),
        }
    }
}

/// A method and how many times it repeats in a run.
#[derive(Debug, Clone)]
pub struct MethodRun {
    pub method: Arc<Method>,
    pub repetitions: usize,
}

impl MethodRun {
    pub fn new(method: Method, repetitions: usize) -> Self {
        Self {
            method: Arc::new(method),
            repetitions,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedStep {
    pub method: String,
    pub repetition: usize,
    pub step: Step,
}

impl QueuedStep {
    pub fn label(&self) -> String {
        format!("{} #{} {}", self.method, self.repetition + 1, self.step.label())
    }
}

/// Flatten methods, repetitions and steps into execution order.
///
/// `Sequence` runs every method once per repetition round; methods with fewer
/// repetitions drop out of later rounds. `Method` runs all repetitions of a method before
/// the next method.
pub fn build_queue(runs: &[MethodRun], policy: QueuePolicy) -> Vec<QueuedStep> {
    let push = |queue: &mut Vec<QueuedStep>, run: &MethodRun, repetition: usize| {
        queue.extend(run.method.steps.iter().map(|step| QueuedStep {
            method: run.method.name.clone(),
            repetition,
            step: step.clone(),
        }));
    };

    let mut queue = Vec::new();
    match policy {
        QueuePolicy::Sequence => {
            let rounds = runs.iter().map(|r| r.repetitions).max().unwrap_or(0);
            for repetition in 0..rounds {
                for run in runs.iter().filter(|r| repetition < r.repetitions) {
                    push(&mut queue, run, repetition);
                }
            }
        }
        QueuePolicy::Method => {
            for run in runs {
                for repetition in 0..run.repetitions {
                    push(&mut queue, run, repetition);
                }
            }
        }
    }
    queue
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub final_state: RunState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Completed,
    Skipped,
}

/// What a run drives: the tray template, the hardware and the transfer planner.
pub struct RunContext {
    pub template: Arc<Template>,
    pub slots: HardwareSlots,
    pub planner: Box<dyn TransferPlanner>,
}

impl RunContext {
    /// Context with the planner selected by `config.planner.strategy`.
    pub fn from_config(config: &Config, template: Arc<Template>, slots: HardwareSlots) -> Result<Self, MotionError> {
        let planner = build_planner(config.planner.strategy, template.clone(), &slots, config)?;
        Ok(Self {
            template,
            slots,
            planner,
        })
    }
}

pub struct Sequencer {
    ctx: RunContext,
    settings: SequencerConfig,
    position_tolerance: f64,
    wait_timeout: Duration,
    state: Arc<RwLock<RunState>>,
    queue: Mutex<Vec<QueuedStep>>,
}

impl Sequencer {
    pub fn new(ctx: RunContext, config: &Config) -> Self {
        Self {
            ctx,
            settings: config.sequencer.clone(),
            position_tolerance: config.planner.position_tolerance,
            wait_timeout: Duration::from_secs_f64(config.planner.wait_timeout),
            state: Arc::new(RwLock::new(RunState::Idle)),
            queue: Mutex::new(Vec::new()),
        }
    }

    pub async fn state(&self) -> RunState {
        self.state.read().await.clone()
    }

    /// Shared handle for observing the run state from another task.
    pub fn state_handle(&self) -> Arc<RwLock<RunState>> {
        self.state.clone()
    }

    async fn set_state(&self, state: RunState) {
        *self.state.write().await = state;
    }

    /// Replace the queue with `runs` in the configured order.
    pub async fn enqueue(&self, runs: &[MethodRun]) -> Result<usize, SequencerError> {
        self.enqueue_with(runs, self.settings.queue).await
    }

    pub async fn enqueue_with(&self, runs: &[MethodRun], policy: QueuePolicy) -> Result<usize, SequencerError> {
        let current = self.state().await;
        if matches!(current, RunState::Running { .. }) {
            return Err(SequencerError::InvalidTransition {
                action: "enqueue",
                state: current.to_string(),
            });
        }
        let steps = build_queue(runs, policy);
        let count = steps.len();
        *self.queue.lock().await = steps;
        self.set_state(RunState::Queued { steps: count }).await;
        tracing::info!("Queued {} steps from {} methods ({:?} order)", count, runs.len(), policy);
        Ok(count)
    }

    /// Execute the queued steps in order.
    ///
    /// A cancelled run returns `Ok` with `cancelled` set and leaves the sequencer
    /// `Stopped`; an error also leaves it `Stopped`.
    pub async fn run(&self, cancel: &CancelToken) -> Result<RunReport, SequencerError> {
        let current = self.state().await;
        match current {
            RunState::Queued { .. } => {}
            RunState::Running { .. } => {
                return Err(SequencerError::InvalidTransition {
                    action: "run",
                    state: current.to_string(),
                });
            }
            RunState::Idle | RunState::Stopped => return Err(SequencerError::NoQueue),
        }

        let queue = std::mem::take(&mut *self.queue.lock().await);
        let total = queue.len();
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let (mut completed, mut skipped, mut cancelled) = (0, 0, false);
        tracing::info!("Run {} started: {} steps", run_id, total);

        for (index, queued) in queue.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let label = queued.label();
            self.set_state(RunState::Running {
                index,
                total,
                label: label.clone(),
            })
            .await;
            tracing::info!("Step {}/{}: {}", index + 1, total, label);

            match self.execute_step(queued, cancel).await {
                Ok(StepOutcome::Completed) => completed += 1,
                Ok(StepOutcome::Skipped) => skipped += 1,
                Err(SequencerError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::error!("Run {} halted at {}: {}", run_id, label, e);
                    self.set_state(RunState::Stopped).await;
                    return Err(e);
                }
            }
        }

        let final_state = if cancelled { RunState::Stopped } else { RunState::Idle };
        self.set_state(final_state.clone()).await;
        if cancelled {
            tracing::warn!("Run {} cancelled after {} steps", run_id, completed + skipped);
        } else {
            tracing::info!("Run {} finished: {} completed, {} skipped", run_id, completed, skipped);
        }
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            completed,
            skipped,
            cancelled,
            final_state,
        })
    }

    async fn execute_step(&self, queued: &QueuedStep, cancel: &CancelToken) -> Result<StepOutcome, SequencerError> {
        cancel.check()?;
        let step = &queued.step;

        let target = match step.location_for(queued.repetition) {
            None => None,
            Some(name) => match self.ctx.template.resolve_well(name) {
                Ok(point) => Some(point),
                Err(e) => match self.settings.on_missing_well {
                    MissingWellPolicy::Skip => {
                        tracing::warn!("Skipping {}: {}", queued.label(), e);
                        return Ok(StepOutcome::Skipped);
                    }
                    MissingWellPolicy::Halt => return Err(e.into()),
                },
            },
        };

        if let Some(height) = step.outlet_height {
            let outlet = self.ctx.slots.outlet_z()?;
            if !self.move_axis(outlet.as_ref(), height, cancel).await? {
                return Err(SequencerError::TransferFailed(format!("{} (outlet)", queued.label())));
            }
        }

        if target.is_some() || step.inlet_height.is_some() {
            let z = self.ctx.slots.inlet_z()?;
            let xy = self.ctx.slots.xy()?;
            let (x0, y0) = xy.position().await?;
            let z0 = z.current_position().await?;
            let (x1, y1) = target.map(|p| (p.x, p.y)).unwrap_or((x0, y0));
            let from = Point3::new(x0, y0, z0);
            let to = Point3::new(x1, y1, step.inlet_height.unwrap_or(z0));
            if !self.ctx.planner.transfer(from, to, cancel).await? {
                return Err(SequencerError::TransferFailed(queued.label()));
            }
        }

        let applied = self.apply_outputs(step, cancel).await;
        let released = self.release_outputs(step).await;
        match (applied, released) {
            (Err(e), Err(off)) => {
                tracing::error!("Failed to switch outputs off after error: {}", off);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(StepOutcome::Completed),
        }
    }

    async fn move_axis(&self, axis: &dyn Axis, target: f64, cancel: &CancelToken) -> Result<bool, SequencerError> {
        axis.set_absolute_position(target).await?;
        tokio::select! {
            reached = axis.wait_for_target(target, self.position_tolerance, self.wait_timeout) => Ok(reached?),
            _ = cancel.cancelled() => Err(SequencerError::Cancelled),
        }
    }

    /// Valves, voltage and special command, then hold for the step duration.
    async fn apply_outputs(&self, step: &Step, cancel: &CancelToken) -> Result<(), SequencerError> {
        let slots = &self.ctx.slots;
        if step.pressure || step.vacuum {
            let valves = slots.pressure()?;
            valves.set_pressure(step.pressure).await?;
            valves.set_vacuum(step.vacuum).await?;
        }
        if step.voltage != 0.0 {
            slots.high_voltage()?.set_voltage(step.voltage).await?;
        }
        if let Some(command) = step.special {
            slots.special()?.run(command, step, cancel).await?;
        }
        if step.duration > 0.0 {
            tracing::debug!("Holding {:.3}s", step.duration);
            cancel.sleep(Duration::from_secs_f64(step.duration)).await?;
        }
        Ok(())
    }

    /// Switch off whatever the step may have switched on.
    async fn release_outputs(&self, step: &Step) -> Result<(), SequencerError> {
        let slots = &self.ctx.slots;
        if step.voltage != 0.0 {
            if let Some(supply) = &slots.high_voltage {
                supply.set_voltage(0.0).await?;
            }
        }
        if step.pressure || step.vacuum {
            if let Some(valves) = &slots.pressure {
                valves.set_pressure(false).await?;
                valves.set_vacuum(false).await?;
            }
        }
        Ok(())
    }
}
