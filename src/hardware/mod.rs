// src/hardware/mod.rs - Capability interfaces for the instrument's hardware slots
//
// Each hardware category is one small async trait. Controllers are created by the
// registry from the `[hardware.*]` config tables and stored in `HardwareSlots`; the
// planner only ever sees `Axis` and `XyStage`.
pub mod registry;
pub mod sim;

pub use registry::HardwareRegistry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;

use crate::cancel::CancelToken;
use crate::config::LimitsConfig;
use crate::method::{SpecialCommand, Step};

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("No controller configured for '{0}'")]
    NotConfigured(&'static str),
    #[error("Unknown controller '{controller}' for '{slot}'")]
    UnknownController {
        slot: &'static str,
        controller: String,
    },
    #[error("{device}: command failed: {message}")]
    CommandFailed { device: String, message: String },
    #[error("{device}: value {value} outside [{min}, {max}]")]
    OutOfRange {
        device: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Kinematic constants of one axis in mm/s, mm/s^2 and mm/s^3.
///
/// `jerk == 0` means the controller ramps acceleration instantaneously.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisLimits {
    pub velocity_max: f64,
    pub acceleration: f64,
    pub jerk: f64,
}

impl AxisLimits {
    pub fn new(velocity_max: f64, acceleration: f64, jerk: f64) -> Self {
        Self {
            velocity_max,
            acceleration,
            jerk,
        }
    }
}

impl From<LimitsConfig> for AxisLimits {
    fn from(config: LimitsConfig) -> Self {
        Self::new(config.velocity_max, config.acceleration, config.jerk)
    }
}

/// A single linear axis, e.g. the inlet or outlet capillary height.
///
/// `set_absolute_position` returns as soon as the controller accepted the command; it does
/// not wait for the motion to finish.
#[async_trait]
pub trait Axis: Send + Sync {
    fn name(&self) -> &str;
    fn limits(&self) -> AxisLimits;

    fn velocity_max(&self) -> f64 {
        self.limits().velocity_max
    }

    fn acceleration(&self) -> f64 {
        self.limits().acceleration
    }

    fn jerk(&self) -> f64 {
        self.limits().jerk
    }

    async fn set_absolute_position(&self, value: f64) -> Result<(), HardwareError>;
    async fn current_position(&self) -> Result<f64, HardwareError>;

    /// Poll until the axis is within `tolerance` of `value`. `Ok(false)` on timeout.
    async fn wait_for_target(
        &self,
        value: f64,
        tolerance: f64,
        timeout: Duration,
    ) -> Result<bool, HardwareError>;
}

/// The XY stage carrying the sample tray.
#[async_trait]
pub trait XyStage: Send + Sync {
    fn x_limits(&self) -> AxisLimits;
    fn y_limits(&self) -> AxisLimits;
    async fn set_position(&self, x: f64, y: f64) -> Result<(), HardwareError>;
    async fn position(&self) -> Result<(f64, f64), HardwareError>;
    async fn wait_for_target(
        &self,
        x: f64,
        y: f64,
        tolerance: f64,
        timeout: Duration,
    ) -> Result<bool, HardwareError>;
}

#[async_trait]
pub trait PressureControl: Send + Sync {
    async fn set_pressure(&self, open: bool) -> Result<(), HardwareError>;
    async fn set_vacuum(&self, open: bool) -> Result<(), HardwareError>;
}

#[async_trait]
pub trait HighVoltage: Send + Sync {
    /// Output voltage in volts; `0.0` switches the supply off.
    async fn set_voltage(&self, volts: f64) -> Result<(), HardwareError>;
}

/// Handler for the special command column of a method step.
#[async_trait]
pub trait SpecialAction: Send + Sync {
    async fn run(
        &self,
        command: SpecialCommand,
        step: &Step,
        cancel: &CancelToken,
    ) -> Result<(), HardwareError>;
}

/// Named hardware slots of the instrument. Empty slots are `None`.
#[derive(Clone, Default)]
pub struct HardwareSlots {
    pub inlet_z: Option<Arc<dyn Axis>>,
    pub outlet_z: Option<Arc<dyn Axis>>,
    pub xy: Option<Arc<dyn XyStage>>,
    pub pressure: Option<Arc<dyn PressureControl>>,
    pub high_voltage: Option<Arc<dyn HighVoltage>>,
    pub special: Option<Arc<dyn SpecialAction>>,
}

fn required<T: ?Sized>(slot: &Option<Arc<T>>, name: &'static str) -> Result<Arc<T>, HardwareError> {
    slot.clone().ok_or(HardwareError::NotConfigured(name))
}

impl HardwareSlots {
    pub fn inlet_z(&self) -> Result<Arc<dyn Axis>, HardwareError> {
        required(&self.inlet_z, "inlet_z")
    }

    pub fn outlet_z(&self) -> Result<Arc<dyn Axis>, HardwareError> {
        required(&self.outlet_z, "outlet_z")
    }

    pub fn xy(&self) -> Result<Arc<dyn XyStage>, HardwareError> {
        required(&self.xy, "xy")
    }

    pub fn pressure(&self) -> Result<Arc<dyn PressureControl>, HardwareError> {
        required(&self.pressure, "pressure")
    }

    pub fn high_voltage(&self) -> Result<Arc<dyn HighVoltage>, HardwareError> {
        required(&self.high_voltage, "high_voltage")
    }

    pub fn special(&self) -> Result<Arc<dyn SpecialAction>, HardwareError> {
        required(&self.special, "special")
    }
}

impl std::fmt::Debug for HardwareSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSlots")
            .field("inlet_z", &self.inlet_z.as_ref().map(|a| a.name().to_string()))
            .field("outlet_z", &self.outlet_z.as_ref().map(|a| a.name().to_string()))
            .field("xy", &self.xy.is_some())
            .field("pressure", &self.pressure.is_some())
            .field("high_voltage", &self.high_voltage.is_some())
            .field("special", &self.special.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot_reports_name() {
        let slots = HardwareSlots::default();
        match slots.inlet_z() {
            Err(HardwareError::NotConfigured(name)) => assert_eq!(name, "inlet_z"),
            other => panic!("unexpected: {:?}", other.map(|a| a.name().to_string())),
        }
        assert!(matches!(slots.xy(), Err(HardwareError::NotConfigured("xy"))));
    }

    #[test]
    fn test_limits_from_config() {
        let limits = AxisLimits::from(LimitsConfig {
            velocity_max: 3.0,
            acceleration: 12.0,
            jerk: 0.0,
        });
        assert_eq!(limits, AxisLimits::new(3.0, 12.0, 0.0));
    }
}
