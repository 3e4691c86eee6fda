// src/motion/planner/safe_move.rs - Predictive three-axis transfer
//
// The capillary never follows the stage in closed loop. Instead every command time is
// computed up front from the kinematic profiles of the axes involved:
//
//   1. Z rises to the tallest obstacle height of the whole transfer, and the XY start is
//      postponed until the rising Z curve stays above the ledges the stage will cross.
//   2. XY starts; its start instant is the time base for the rest of the transfer.
//   3. Z descends to the end height once the stage has left the tall ledges behind.
//   4. If the destination ledge forced the end height up, Z drops to the requested height
//      after the stage arrives.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::hardware::{Axis, XyStage};
use crate::motion::delay::{Direction, get_delay};
use crate::motion::planner::TransferPlanner;
use crate::motion::profile::{ProfileGenerator, pad_edge};
use crate::motion::{MotionError, Point3};
use crate::template::{Point2, Template};

/// A Z command issued `delay` seconds after its reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduledMove {
    pub target: f64,
    pub delay: f64,
    /// Predicted duration of the move itself (s).
    pub duration: f64,
}

/// Complete command schedule of one transfer.
///
/// `z_rise.delay` is measured from the Z rise command to the XY command. The delays of
/// `z_descend` and `z_correction` are measured from the XY command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferPlan {
    pub from: Point3,
    pub to: Point3,
    pub ledge_at_target: f64,
    /// End height after clamping to the destination's obstacle height.
    pub z_end: f64,
    pub mid_max: f64,
    pub path_samples: usize,
    pub z_rise: Option<ScheduledMove>,
    pub xy_target: Point2,
    /// Predicted XY transit time (s).
    pub xy_transit: f64,
    pub z_descend: Option<ScheduledMove>,
    pub z_correction: Option<ScheduledMove>,
    /// Time after the XY command at which every axis is predicted to be at rest (s).
    pub settle: f64,
}

impl TransferPlan {
    /// Final Z target of the plan: the requested height if a correction is scheduled.
    pub fn final_z(&self) -> f64 {
        self.z_correction
            .map(|m| m.target)
            .or(self.z_descend.map(|m| m.target))
            .or(self.z_rise.map(|m| m.target))
            .unwrap_or(self.from.z)
    }
}

pub struct SafeMove {
    template: Arc<Template>,
    z: Arc<dyn Axis>,
    xy: Arc<dyn XyStage>,
    generator: ProfileGenerator,
    tolerance: f64,
}

impl SafeMove {
    pub fn new(
        template: Arc<Template>,
        z: Arc<dyn Axis>,
        xy: Arc<dyn XyStage>,
        generator: ProfileGenerator,
        tolerance: f64,
    ) -> Self {
        Self {
            template,
            z,
            xy,
            generator,
            tolerance,
        }
    }

    /// Compute the command schedule for a transfer. Issues no hardware commands.
    pub fn plan(&self, from: Point3, to: Point3) -> Result<TransferPlan, MotionError> {
        let dt = self.generator.time_step();
        let ledge_at_target = self.template.height_at(to.x, to.y);
        let z_end = to.z.max(ledge_at_target);

        // Expected stage path, one sample per profile step.
        let px = self.generator.compute(to.x - from.x, self.xy.x_limits())?;
        let py = self.generator.compute(to.y - from.y, self.xy.y_limits())?;
        let samples = px.len().max(py.len());
        let xs = pad_edge(&px.trajectory(from.x, to.x), samples);
        let ys = pad_edge(&py.trajectory(from.y, to.y), samples);
        let ledges = self.template.height_along_path(&xs, &ys);
        let xy_transit = samples.saturating_sub(1) as f64 * dt;

        let path_max = ledges.iter().copied().fold(0.0, f64::max);
        let mid_max = path_max.max(from.z).max(z_end);
        tracing::debug!(
            "Transfer {} -> {}: {} path samples, path max {:.3}, mid max {:.3}",
            from,
            to,
            samples,
            path_max,
            mid_max
        );

        let limits = self.z.limits();
        // Samples after the XY start until Z has finished rising.
        let mut rise_remaining = 0;
        let z_rise = if mid_max > from.z {
            let rise = self.generator.compute(mid_max - from.z, limits)?;
            let shift = get_delay(&rise.trajectory(from.z, mid_max), &ledges, self.tolerance, Direction::Rising);
            rise_remaining = rise.len().saturating_sub(1).saturating_sub(shift);
            Some(ScheduledMove {
                target: mid_max,
                delay: shift as f64 * dt,
                duration: rise.duration(),
            })
        } else {
            None
        };

        let z_descend = if mid_max > z_end {
            let descent = self.generator.compute(z_end - mid_max, limits)?;
            // The falling search assumes Z is parked at `mid_max`, so never turn around
            // before the rise is complete.
            let shift = get_delay(&descent.trajectory(mid_max, z_end), &ledges, self.tolerance, Direction::Falling)
                .max(rise_remaining);
            Some(ScheduledMove {
                target: z_end,
                delay: shift as f64 * dt,
                duration: descent.duration(),
            })
        } else {
            None
        };

        let z_correction = if z_end > to.z {
            let drop = self.generator.compute(to.z - z_end, limits)?;
            let after = z_descend
                .map(|m| m.delay)
                .unwrap_or(0.0)
                .max(xy_transit);
            Some(ScheduledMove {
                target: to.z,
                delay: after,
                duration: drop.duration(),
            })
        } else {
            None
        };

        let settle = [
            Some(xy_transit),
            z_rise.map(|m| m.duration - m.delay),
            z_descend.map(|m| m.delay + m.duration),
            z_correction.map(|m| m.delay + m.duration),
        ]
        .into_iter()
        .flatten()
        .fold(0.0, f64::max);

        Ok(TransferPlan {
            from,
            to,
            ledge_at_target,
            z_end,
            mid_max,
            path_samples: samples,
            z_rise,
            xy_target: Point2::new(to.x, to.y),
            xy_transit,
            z_descend,
            z_correction,
            settle,
        })
    }

    /// Issue the commands of `plan` at their scheduled times.
    ///
    /// Returns after the predicted settle time. Any failed command aborts the transfer.
    pub async fn execute(&self, plan: &TransferPlan, cancel: &CancelToken) -> Result<(), MotionError> {
        cancel.check()?;

        if let Some(rise) = plan.z_rise {
            tracing::debug!("Z -> {:.3}, XY start in {:.3}s", rise.target, rise.delay);
            self.z.set_absolute_position(rise.target).await?;
            cancel.sleep(Duration::from_secs_f64(rise.delay)).await?;
        }

        self.xy.set_position(plan.xy_target.x, plan.xy_target.y).await?;
        let st = Instant::now();
        tracing::debug!(
            "XY -> ({:.3}, {:.3}), transit {:.3}s",
            plan.xy_target.x,
            plan.xy_target.y,
            plan.xy_transit
        );

        for (phase, step) in [("descend", plan.z_descend), ("correction", plan.z_correction)] {
            if let Some(step) = step {
                cancel.sleep_until(st + Duration::from_secs_f64(step.delay)).await?;
                tracing::debug!("Z {} -> {:.3} at +{:.3}s", phase, step.target, step.delay);
                self.z.set_absolute_position(step.target).await?;
            }
        }

        cancel.sleep_until(st + Duration::from_secs_f64(plan.settle)).await?;
        Ok(())
    }
}

#[async_trait]
impl TransferPlanner for SafeMove {
    fn name(&self) -> &'static str {
        "safe-move"
    }

    async fn transfer(&self, from: Point3, to: Point3, cancel: &CancelToken) -> Result<bool, MotionError> {
        let plan = self.plan(from, to)?;
        self.execute(&plan, cancel).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileConfig;
    use crate::hardware::AxisLimits;
    use crate::hardware::sim::{CommandLog, SimAxis, SimStage};
    use crate::template::{Bounds, Shape};

    fn planner(template: Template) -> (SafeMove, CommandLog) {
        let log = CommandLog::new();
        let limits = AxisLimits::new(5.0, 20.0, 5.0);
        let profile = ProfileConfig::default();
        let z = SimAxis::new("inlet_z", limits, 3.0, profile.clone(), log.clone());
        let stage = SimStage::new(
            SimAxis::new("x", limits, 20.0, profile.clone(), log.clone()),
            SimAxis::new("y", limits, 20.0, profile.clone(), log.clone()),
            log.clone(),
        );
        let planner = SafeMove::new(
            Arc::new(template),
            Arc::new(z),
            Arc::new(stage),
            ProfileGenerator::new(profile),
            0.5,
        );
        (planner, log)
    }

    fn wall() -> Template {
        Template::new(Bounds::new(0.0, 0.0, 100.0, 100.0))
            .with_ledge("wall", Shape::rectangle(50.0, 50.0, 20.0, 100.0), 10.0)
            .unwrap()
    }

    #[test]
    fn test_plan_over_wall() {
        let (planner, _) = planner(wall());
        let plan = planner
            .plan(Point3::new(20.0, 20.0, 3.0), Point3::new(80.0, 20.0, 3.0))
            .unwrap();
        assert_eq!(plan.mid_max, 10.0);
        let rise = plan.z_rise.unwrap();
        assert_eq!(rise.target, 10.0);
        let descend = plan.z_descend.unwrap();
        assert_eq!(descend.target, 3.0);
        assert!(descend.delay > 0.0 && descend.delay < plan.xy_transit);
        assert!(plan.z_correction.is_none());
        assert_eq!(plan.final_z(), 3.0);
    }

    #[test]
    fn test_plan_without_ledges_only_moves_xy() {
        let (planner, _) = planner(Template::default());
        let plan = planner
            .plan(Point3::new(20.0, 20.0, 3.0), Point3::new(80.0, 20.0, 3.0))
            .unwrap();
        assert!(plan.z_rise.is_none());
        assert!(plan.z_descend.is_none());
        assert!(plan.z_correction.is_none());
        assert_eq!(plan.settle, plan.xy_transit);
    }

    #[test]
    fn test_degenerate_path_is_single_sample() {
        let (planner, _) = planner(wall());
        let plan = planner
            .plan(Point3::new(50.0, 50.0, 12.0), Point3::new(50.0, 50.0, 12.0))
            .unwrap();
        assert_eq!(plan.path_samples, 1);
        assert_eq!(plan.xy_transit, 0.0);
        assert!(plan.z_rise.is_none() && plan.z_descend.is_none());
    }

    #[test]
    fn test_end_height_clamped_then_corrected() {
        let template = wall()
            .with_ledge("block", Shape::rectangle(80.0, 20.0, 10.0, 10.0), 6.0)
            .unwrap();
        let (planner, _) = planner(template);
        let plan = planner
            .plan(Point3::new(20.0, 20.0, 3.0), Point3::new(80.0, 20.0, 2.0))
            .unwrap();
        assert_eq!(plan.ledge_at_target, 6.0);
        assert_eq!(plan.z_end, 6.0);
        assert_eq!(plan.z_descend.unwrap().target, 6.0);
        let correction = plan.z_correction.unwrap();
        assert_eq!(correction.target, 2.0);
        assert!(correction.delay >= plan.xy_transit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_execute_issues_nothing() {
        let (planner, log) = planner(wall());
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = planner
            .transfer(Point3::new(20.0, 20.0, 3.0), Point3::new(80.0, 20.0, 3.0), &cancel)
            .await;
        assert!(matches!(result, Err(MotionError::Cancelled)));
        assert!(log.is_empty());
    }
}
