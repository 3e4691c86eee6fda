// src/hardware/registry.rs - Controller factories keyed by controller type
use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Duration;

use crate::config::{AxisConfig, DeviceConfig, HardwareConfig, ProfileConfig, StageConfig};
use crate::hardware::sim::{CommandLog, SimAxis, SimPressure, SimSpecial, SimStage, SimSupply};
use crate::hardware::{
    Axis, HardwareError, HardwareSlots, HighVoltage, PressureControl, SpecialAction, XyStage,
};

pub type AxisFactory =
    Box<dyn Fn(&'static str, &AxisConfig) -> Result<Arc<dyn Axis>, HardwareError> + Send + Sync>;
pub type StageFactory =
    Box<dyn Fn(&StageConfig) -> Result<Arc<dyn XyStage>, HardwareError> + Send + Sync>;
pub type PressureFactory =
    Box<dyn Fn(&DeviceConfig) -> Result<Arc<dyn PressureControl>, HardwareError> + Send + Sync>;
pub type VoltageFactory =
    Box<dyn Fn(&DeviceConfig) -> Result<Arc<dyn HighVoltage>, HardwareError> + Send + Sync>;
pub type SpecialFactory =
    Box<dyn Fn(&DeviceConfig) -> Result<Arc<dyn SpecialAction>, HardwareError> + Send + Sync>;

/// Builds hardware slots from config, looking controllers up by their `controller` tag.
#[derive(Default)]
pub struct HardwareRegistry {
    axes: HashMap<String, AxisFactory>,
    stages: HashMap<String, StageFactory>,
    pressure: HashMap<String, PressureFactory>,
    voltage: HashMap<String, VoltageFactory>,
    special: HashMap<String, SpecialFactory>,
}

impl HardwareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that knows the `"simulated"` controller for every category.
    pub fn simulated(log: CommandLog, profile: ProfileConfig, poll_interval: Duration) -> Self {
        let mut registry = Self::new();

        let (l, p) = (log.clone(), profile.clone());
        registry.register_axis("simulated", move |slot, config: &AxisConfig| {
            let mut axis = SimAxis::new(slot, config.limits.into(), config.position, p.clone(), l.clone())
                .with_poll_interval(poll_interval);
            if config.min.is_some() || config.max.is_some() {
                axis = axis.with_range(
                    config.min.unwrap_or(f64::NEG_INFINITY),
                    config.max.unwrap_or(f64::INFINITY),
                );
            }
            Ok(Arc::new(axis) as Arc<dyn Axis>)
        });

        let (l, p) = (log.clone(), profile);
        registry.register_stage("simulated", move |config: &StageConfig| {
            let [x0, y0] = config.position;
            let x = SimAxis::new("x", config.x.into(), x0, p.clone(), l.clone())
                .with_poll_interval(poll_interval);
            let y = SimAxis::new("y", config.y.into(), y0, p.clone(), l.clone())
                .with_poll_interval(poll_interval);
            Ok(Arc::new(SimStage::new(x, y, l.clone())) as Arc<dyn XyStage>)
        });

        let l = log.clone();
        registry.register_pressure("simulated", move |_| {
            Ok(Arc::new(SimPressure::new(l.clone())) as Arc<dyn PressureControl>)
        });

        let l = log.clone();
        registry.register_voltage("simulated", move |config: &DeviceConfig| {
            Ok(Arc::new(SimSupply::new(config.max_voltage, l.clone())) as Arc<dyn HighVoltage>)
        });

        registry.register_special("simulated", move |_| {
            Ok(Arc::new(SimSpecial::new(log.clone())) as Arc<dyn SpecialAction>)
        });

        registry
    }

    pub fn register_axis<F>(&mut self, controller: &str, factory: F)
    where
        F: Fn(&'static str, &AxisConfig) -> Result<Arc<dyn Axis>, HardwareError> + Send + Sync + 'static,
    {
        self.axes.insert(controller.to_string(), Box::new(factory));
    }

    pub fn register_stage<F>(&mut self, controller: &str, factory: F)
    where
        F: Fn(&StageConfig) -> Result<Arc<dyn XyStage>, HardwareError> + Send + Sync + 'static,
    {
        self.stages.insert(controller.to_string(), Box::new(factory));
    }

    pub fn register_pressure<F>(&mut self, controller: &str, factory: F)
    where
        F: Fn(&DeviceConfig) -> Result<Arc<dyn PressureControl>, HardwareError> + Send + Sync + 'static,
    {
        self.pressure.insert(controller.to_string(), Box::new(factory));
    }

    pub fn register_voltage<F>(&mut self, controller: &str, factory: F)
    where
        F: Fn(&DeviceConfig) -> Result<Arc<dyn HighVoltage>, HardwareError> + Send + Sync + 'static,
    {
        self.voltage.insert(controller.to_string(), Box::new(factory));
    }

    pub fn register_special<F>(&mut self, controller: &str, factory: F)
    where
        F: Fn(&DeviceConfig) -> Result<Arc<dyn SpecialAction>, HardwareError> + Send + Sync + 'static,
    {
        self.special.insert(controller.to_string(), Box::new(factory));
    }

    /// Populate every slot that has a config table. Slots without one stay empty.
    pub fn build(&self, config: &HardwareConfig) -> Result<HardwareSlots, HardwareError> {
        let mut slots = HardwareSlots::default();

        if let Some(axis) = &config.inlet_z {
            slots.inlet_z = Some(lookup(&self.axes, "inlet_z", &axis.controller)?("inlet_z", axis)?);
        }
        if let Some(axis) = &config.outlet_z {
            slots.outlet_z = Some(lookup(&self.axes, "outlet_z", &axis.controller)?("outlet_z", axis)?);
        }
        if let Some(stage) = &config.xy {
            slots.xy = Some(lookup(&self.stages, "xy", &stage.controller)?(stage)?);
        }
        if let Some(device) = &config.pressure {
            slots.pressure = Some(lookup(&self.pressure, "pressure", &device.controller)?(device)?);
        }
        if let Some(device) = &config.high_voltage {
            slots.high_voltage =
                Some(lookup(&self.voltage, "high_voltage", &device.controller)?(device)?);
        }
        if let Some(device) = &config.special {
            slots.special = Some(lookup(&self.special, "special", &device.controller)?(device)?);
        }

        tracing::info!("Hardware slots: {:?}", slots);
        Ok(slots)
    }
}

fn lookup<'a, F: ?Sized>(
    factories: &'a HashMap<String, Box<F>>,
    slot: &'static str,
    controller: &str,
) -> Result<&'a F, HardwareError> {
    factories
        .get(controller)
        .map(|factory| factory.as_ref())
        .ok_or_else(|| HardwareError::UnknownController {
            slot,
            controller: controller.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn registry() -> HardwareRegistry {
        HardwareRegistry::simulated(CommandLog::new(), ProfileConfig::default(), Duration::from_millis(10))
    }

    #[test]
    fn test_build_populates_configured_slots() {
        let config: Config = toml::from_str(
            r#"
            [hardware.inlet_z]
            velocity_max = 4.0
            [hardware.xy]
            position = [10.0, 20.0]
            [hardware.high_voltage]
            max_voltage = 30000.0
            "#,
        )
        .unwrap();
        let slots = registry().build(&config.hardware).unwrap();
        assert_eq!(slots.inlet_z().unwrap().velocity_max(), 4.0);
        assert!(slots.xy.is_some());
        assert!(slots.high_voltage.is_some());
        assert!(slots.outlet_z.is_none());
        assert!(slots.pressure().is_err());
    }

    #[test]
    fn test_unknown_controller_rejected() {
        let config: Config =
            toml::from_str("[hardware.outlet_z]\ncontroller = 'thorlabs'").unwrap();
        match registry().build(&config.hardware) {
            Err(HardwareError::UnknownController { slot, controller }) => {
                assert_eq!(slot, "outlet_z");
                assert_eq!(controller, "thorlabs");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
