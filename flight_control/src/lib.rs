//! `flight_control` — Turns the selected target into platform commands and
//! keeps the platform safe while doing it.
//!
//! - [`queue`]: single-slot latest-wins queues between stages
//! - [`pid`] and [`fusion`]: per-axis PIDs and the search/track/engage
//!   state machine
//! - [`boundary`]: traits for the camera, detector, range sensor, video
//!   stream and actuator, plus the motion gate
//! - [`shutdown`]: stop flag and the ordered landing sequence
//! - [`stages`]: stage threads, watchdog and pipeline assembly
//! - [`config`]: aggregated JSON configuration and startup validation

pub mod boundary;
pub mod clock;
pub mod config;
pub mod fusion;
pub mod pid;
pub mod queue;
pub mod shutdown;
pub mod stages;

pub use boundary::{
    Actuator, ActuatorCommand, BoundaryError, Detector, Frame, FrameSource, GatedActuator,
    IndicatorPattern, MediaStream, RangeSensor,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, SystemConfig};
pub use fusion::{ControlConfig, ControlState, EngageTrigger, FusionController, TickAction, TickReport};
pub use pid::{Action, PidAxis, PidGains};
pub use queue::StageQueue;
pub use shutdown::{ShutdownReport, ShutdownSupervisor, StepOutcome, StopSignal};
pub use stages::{
    sample_range, spawn_pipeline, Boundaries, PipelineHandles, PipelineSummary, RangeConfig,
    StageError, StageTiming, Watchdog,
};
