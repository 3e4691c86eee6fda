// src/motion/mod.rs - Kinematic profiles, start delays and transfer planners
pub mod delay;
pub mod planner;
pub mod profile;

pub use delay::{Direction, get_delay};
pub use planner::{TransferPlanner, build_planner};
pub use planner::safe_move::{SafeMove, ScheduledMove, TransferPlan};
pub use planner::step_move::StepMove;
pub use profile::{KinematicProfile, ProfileGenerator, VelocitySolution, pad_edge};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::Cancelled;
use crate::hardware::HardwareError;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Transfer cancelled")]
    Cancelled,
    #[error("Invalid kinematic limits: {0}")]
    InvalidLimits(String),
}

impl From<Cancelled> for MotionError {
    fn from(_: Cancelled) -> Self {
        MotionError::Cancelled
    }
}

/// Inlet position: stage X/Y and capillary height, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl std::fmt::Display for Point3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}
