// src/motion/planner/mod.rs - Inlet transfer planners
//
// A transfer moves the capillary inlet (Z) and the XY stage from one point to another
// without the capillary tip dipping below any ledge it passes over. Two strategies share
// one interface and the caller picks one explicitly through `PlannerStrategy`.
pub mod safe_move;
pub mod step_move;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{Config, PlannerStrategy};
use crate::hardware::HardwareSlots;
use crate::motion::{MotionError, Point3, ProfileGenerator};
use crate::template::Template;

use safe_move::SafeMove;
use step_move::StepMove;

#[async_trait]
pub trait TransferPlanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Move from `from` to `to`.
    ///
    /// `Ok(false)` means an axis did not confirm its target in time; the hardware may be
    /// anywhere along the transfer.
    async fn transfer(&self, from: Point3, to: Point3, cancel: &CancelToken) -> Result<bool, MotionError>;
}

/// Planner for the configured strategy, driving the `inlet_z` axis and the `xy` stage.
pub fn build_planner(
    strategy: PlannerStrategy,
    template: Arc<Template>,
    slots: &HardwareSlots,
    config: &Config,
) -> Result<Box<dyn TransferPlanner>, MotionError> {
    let z = slots.inlet_z()?;
    let xy = slots.xy()?;
    let planner: Box<dyn TransferPlanner> = match strategy {
        PlannerStrategy::Safe => Box::new(SafeMove::new(
            template,
            z,
            xy,
            ProfileGenerator::new(config.profile.clone()),
            config.planner.clearance_tolerance,
        )),
        PlannerStrategy::Step => Box::new(StepMove::new(
            template,
            z,
            xy,
            config.planner.position_tolerance,
            Duration::from_secs_f64(config.planner.wait_timeout),
        )),
    };
    tracing::info!("Using {} transfer planner", planner.name());
    Ok(planner)
}
