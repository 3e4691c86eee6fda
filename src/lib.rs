// src/lib.rs - Capillary electrophoresis instrument host
//
// Moves a capillary inlet and an XY sample stage between the wells of a tray without
// touching the ledges in between, and sequences automation methods on top of that.
pub mod cancel;
pub mod config;
pub mod hardware;
pub mod method;
pub mod motion;
pub mod sequencer;
pub mod template;

pub use cancel::CancelToken;
pub use config::{Config, ConfigError, load_config};
pub use hardware::{HardwareError, HardwareRegistry, HardwareSlots};
pub use method::{Method, Step};
pub use motion::{MotionError, Point3, SafeMove, StepMove, TransferPlan, TransferPlanner};
pub use sequencer::{MethodRun, RunContext, RunReport, RunState, Sequencer, SequencerError};
pub use template::{Template, TemplateError};
