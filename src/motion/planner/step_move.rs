// src/motion/planner/step_move.rs - Conservative transfer at the tallest ledge height
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Duration;

use crate::cancel::CancelToken;
use crate::hardware::{Axis, HardwareError, XyStage};
use crate::motion::planner::TransferPlanner;
use crate::motion::{MotionError, Point3};
use crate::template::Template;

/// Lift Z to a height that clears every ledge, move XY, lower Z; each stage waits for the
/// controller to confirm its target before the next one starts.
pub struct StepMove {
    template: Arc<Template>,
    z: Arc<dyn Axis>,
    xy: Arc<dyn XyStage>,
    tolerance: f64,
    timeout: Duration,
}

impl StepMove {
    pub fn new(
        template: Arc<Template>,
        z: Arc<dyn Axis>,
        xy: Arc<dyn XyStage>,
        tolerance: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            template,
            z,
            xy,
            tolerance,
            timeout,
        }
    }

    /// Transit height for a transfer between `from` and `to`.
    ///
    /// Overlapping ledges stack, so the tallest single ledge is not enough.
    pub fn safe_height(&self, from: Point3, to: Point3) -> f64 {
        self.template
            .max_ledge_height()
            .max(self.template.stacked_height_bound())
            .max(from.z)
            .max(to.z)
    }

    async fn wait<F>(&self, what: &str, wait: F, cancel: &CancelToken) -> Result<bool, MotionError>
    where
        F: std::future::Future<Output = Result<bool, HardwareError>> + Send,
    {
        let reached = tokio::select! {
            reached = wait => reached?,
            _ = cancel.cancelled() => return Err(MotionError::Cancelled),
        };
        if !reached {
            tracing::warn!("{} did not reach its target within {:?}", what, self.timeout);
        }
        Ok(reached)
    }
}

#[async_trait]
impl TransferPlanner for StepMove {
    fn name(&self) -> &'static str {
        "step-move"
    }

    async fn transfer(&self, from: Point3, to: Point3, cancel: &CancelToken) -> Result<bool, MotionError> {
        cancel.check()?;
        let safe = self.safe_height(from, to);
        tracing::debug!("Step transfer {} -> {} at height {:.3}", from, to, safe);

        self.z.set_absolute_position(safe).await?;
        let z_up = self.z.wait_for_target(safe, self.tolerance, self.timeout);
        if !self.wait("Z rise", z_up, cancel).await? {
            return Ok(false);
        }

        self.xy.set_position(to.x, to.y).await?;
        let xy = self.xy.wait_for_target(to.x, to.y, self.tolerance, self.timeout);
        if !self.wait("XY move", xy, cancel).await? {
            return Ok(false);
        }

        self.z.set_absolute_position(to.z).await?;
        let z_down = self.z.wait_for_target(to.z, self.tolerance, self.timeout);
        self.wait("Z descent", z_down, cancel).await
    }
}
