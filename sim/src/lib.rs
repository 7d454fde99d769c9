//! `sim` — Closed-loop simulator: pedestrians, camera, detector, platform,
//! offline runs and replay.

pub mod camera;
pub mod platform;
pub mod replay;
pub mod runner;
pub mod scenarios;
pub mod world;

pub use camera::{CameraModel, DetectorNoise, SimCamera, SimDetector};
pub use platform::{CommandRecord, PlatformCommand, SimPlatform, SimRangeSensor, TofParams};
pub use replay::{load_replay, save_replay, Outcome, ReplayLog, ReplaySummary};
pub use runner::run_offline;
pub use scenarios::{Scenario, ScenarioKind};
pub use world::{MotionSpec, Pedestrian, SharedWorld, World};
