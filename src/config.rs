//! # System Configuration
//!
//! One TOML file describes the planner, the kinematic solver, the run queue and the
//! hardware slots of the instrument.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [system]
//! name = "bench-ce"
//!
//! [planner]
//! strategy = "safe"
//! clearance_tolerance = 0.5
//!
//! [sequencer]
//! queue = "method"
//! on_missing_well = "halt"
//!
//! [template]
//! path = "plate.template"
//!
//! [hardware.inlet_z]
//! controller = "simulated"
//! velocity_max = 5.0
//! acceleration = 20.0
//! jerk = 5.0
//!
//! [hardware.xy]
//! controller = "simulated"
//! x = { velocity_max = 5.0, acceleration = 20.0, jerk = 5.0 }
//! y = { velocity_max = 5.0, acceleration = 20.0, jerk = 5.0 }
//! ```
//!
//! Every field has a default, so a partial file is valid.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("{origin}:{line}: {message}")]
    Malformed {
        origin: String,
        line: usize,
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn malformed(origin: &str, line: usize, message: impl Into<String>) -> Self {
        ConfigError::Malformed {
            origin: origin.to_string(),
            line,
            message: message.into(),
        }
    }
}

/// Top-level configuration for the instrument host.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub template: TemplateSource,
    #[serde(default)]
    pub hardware: HardwareConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    #[serde(default = "default_system_name")]
    pub name: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: default_system_name(),
        }
    }
}

/// Which transfer planner moves the inlet between wells.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlannerStrategy {
    /// Predictive planner: overlaps axis motion using kinematic timing.
    #[default]
    Safe,
    /// Conservative planner: transits at the tallest ledge height and waits on feedback.
    Step,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub strategy: PlannerStrategy,
    /// Allowed dip of the capillary below a ledge top (mm).
    #[serde(default = "default_clearance_tolerance")]
    pub clearance_tolerance: f64,
    /// Target-reached tolerance for feedback waits (mm).
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f64,
    /// Feedback wait timeout (s).
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: f64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strategy: PlannerStrategy::default(),
            clearance_tolerance: default_clearance_tolerance(),
            position_tolerance: default_position_tolerance(),
            wait_timeout: default_wait_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Parameters of the kinematic profile generator.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProfileConfig {
    /// Samples per second of generated profiles.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Absolute distance tolerance of the short-move velocity search (mm).
    #[serde(default = "default_solver_tolerance")]
    pub solver_tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// `jerk = acceleration * factor` when an axis reports zero jerk.
    #[serde(default = "default_zero_jerk_factor")]
    pub zero_jerk_factor: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            solver_tolerance: default_solver_tolerance(),
            max_iterations: default_max_iterations(),
            zero_jerk_factor: default_zero_jerk_factor(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Round-robin: every method once per repetition.
    #[default]
    Sequence,
    /// All repetitions of a method before the next method.
    Method,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MissingWellPolicy {
    Skip,
    #[default]
    Halt,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SequencerConfig {
    #[serde(default)]
    pub queue: QueuePolicy,
    #[serde(default)]
    pub on_missing_well: MissingWellPolicy,
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            queue: QueuePolicy::default(),
            on_missing_well: MissingWellPolicy::default(),
            repetitions: default_repetitions(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TemplateSource {
    #[serde(default)]
    pub path: Option<String>,
}

/// Kinematic limits of one axis as written in the config file.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_velocity_max")]
    pub velocity_max: f64,
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    #[serde(default)]
    pub jerk: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            velocity_max: default_velocity_max(),
            acceleration: default_acceleration(),
            jerk: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisConfig {
    #[serde(default = "default_controller")]
    pub controller: String,
    #[serde(flatten)]
    pub limits: LimitsConfig,
    /// Position reported at start-up (mm).
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            controller: default_controller(),
            limits: LimitsConfig::default(),
            position: 0.0,
            min: None,
            max: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageConfig {
    #[serde(default = "default_controller")]
    pub controller: String,
    #[serde(default)]
    pub x: LimitsConfig,
    #[serde(default)]
    pub y: LimitsConfig,
    #[serde(default)]
    pub position: [f64; 2],
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            controller: default_controller(),
            x: LimitsConfig::default(),
            y: LimitsConfig::default(),
            position: [0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_controller")]
    pub controller: String,
    /// Upper output limit; only meaningful for the voltage supply (V).
    #[serde(default)]
    pub max_voltage: Option<f64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            controller: default_controller(),
            max_voltage: None,
        }
    }
}

/// Hardware slots. A missing table leaves that slot empty.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub inlet_z: Option<AxisConfig>,
    #[serde(default)]
    pub outlet_z: Option<AxisConfig>,
    #[serde(default)]
    pub xy: Option<StageConfig>,
    #[serde(default)]
    pub pressure: Option<DeviceConfig>,
    #[serde(default)]
    pub high_voltage: Option<DeviceConfig>,
    #[serde(default)]
    pub special: Option<DeviceConfig>,
}

impl LimitsConfig {
    fn validate(&self, axis: &str) -> Result<(), ConfigError> {
        if !(self.velocity_max > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "velocity_max for '{}' must be > 0",
                axis
            )));
        }
        if !(self.acceleration > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "acceleration for '{}' must be > 0",
                axis
            )));
        }
        if self.jerk < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "jerk for '{}' must be >= 0",
                axis
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Check numeric ranges the planner relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.profile.sample_rate > 0.0) {
            return Err(ConfigError::Invalid("profile.sample_rate must be > 0".into()));
        }
        if !(self.profile.solver_tolerance > 0.0) {
            return Err(ConfigError::Invalid(
                "profile.solver_tolerance must be > 0".into(),
            ));
        }
        if self.profile.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "profile.max_iterations must be at least 1".into(),
            ));
        }
        if !(self.profile.zero_jerk_factor > 0.0) {
            return Err(ConfigError::Invalid(
                "profile.zero_jerk_factor must be > 0".into(),
            ));
        }
        if self.planner.clearance_tolerance < 0.0 {
            return Err(ConfigError::Invalid(
                "planner.clearance_tolerance must be >= 0".into(),
            ));
        }
        if !(self.planner.position_tolerance > 0.0) {
            return Err(ConfigError::Invalid(
                "planner.position_tolerance must be > 0".into(),
            ));
        }
        if !(self.planner.wait_timeout > 0.0) {
            return Err(ConfigError::Invalid("planner.wait_timeout must be > 0".into()));
        }
        if self.planner.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "planner.poll_interval_ms must be at least 1".into(),
            ));
        }
        let hw = &self.hardware;
        if let Some(axis) = &hw.inlet_z {
            axis.limits.validate("inlet_z")?;
        }
        if let Some(axis) = &hw.outlet_z {
            axis.limits.validate("outlet_z")?;
        }
        if let Some(stage) = &hw.xy {
            stage.x.validate("xy.x")?;
            stage.y.validate("xy.y")?;
        }
        Ok(())
    }
}

// Default value functions
fn default_system_name() -> String { "capillary-electrophoresis".to_string() }
fn default_clearance_tolerance() -> f64 { 0.5 }
fn default_position_tolerance() -> f64 { 0.05 }
fn default_wait_timeout() -> f64 { 30.0 }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_sample_rate() -> f64 { 1000.0 }
fn default_solver_tolerance() -> f64 { 0.5 }
fn default_max_iterations() -> usize { 50 }
fn default_zero_jerk_factor() -> f64 { 500.0 }
fn default_repetitions() -> usize { 1 }
fn default_velocity_max() -> f64 { 5.0 }
fn default_acceleration() -> f64 { 20.0 }
fn default_controller() -> String { "simulated".to_string() }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.planner.strategy, PlannerStrategy::Safe);
        assert_eq!(config.planner.clearance_tolerance, 0.5);
        assert_eq!(config.planner.poll_interval_ms, 10);
        assert_eq!(config.profile.sample_rate, 1000.0);
        assert_eq!(config.profile.solver_tolerance, 0.5);
        assert_eq!(config.profile.max_iterations, 50);
        assert_eq!(config.profile.zero_jerk_factor, 500.0);
        assert_eq!(config.sequencer.queue, QueuePolicy::Sequence);
        assert_eq!(config.sequencer.on_missing_well, MissingWellPolicy::Halt);
        assert!(config.hardware.inlet_z.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("system.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[planner]\nstrategy = 'step'\n[sequencer]\nqueue = 'method'\n\
             [hardware.inlet_z]\nvelocity_max = 8.0\nacceleration = 40.0\njerk = 0.0\nposition = 2.5"
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.planner.strategy, PlannerStrategy::Step);
        assert_eq!(config.sequencer.queue, QueuePolicy::Method);
        let z = config.hardware.inlet_z.unwrap();
        assert_eq!(z.controller, "simulated");
        assert_eq!(z.limits.velocity_max, 8.0);
        assert_eq!(z.limits.jerk, 0.0);
        assert_eq!(z.position, 2.5);
        // Defaults for missing fields
        assert_eq!(config.planner.clearance_tolerance, 0.5);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result: Result<Config, _> = toml::from_str("[planner]\nstrategy = 'teleport'");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_negative_jerk() {
        let toml = r#"
        [hardware.xy]
        x = { velocity_max = 5.0, acceleration = 20.0, jerk = -1.0 }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_sample_rate() {
        let config: Config = toml::from_str("[profile]\nsample_rate = 0.0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
