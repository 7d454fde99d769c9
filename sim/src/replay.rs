//! Replay: serialize/deserialize offline run logs for later analysis.

use crate::platform::{CommandRecord, PlatformCommand};
use flight_control::{ControlState, EngageTrigger, SystemConfig, TickReport};
use sensor_models::BoundingBox;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracker_core::metrics::{EngagementMetrics, GroundTruth};
use tracker_core::{FusedObservation, TrackId};

/// A full recorded offline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayLog {
    pub scenario_name: String,
    pub seed: u64,
    pub frame_dt: f64,
    pub duration: f64,
    /// Configuration the run used
    pub config: SystemConfig,
    pub frames: Vec<FrameRecord>,
    /// One entry per control tick
    pub ticks: Vec<TickReport>,
    /// Everything the platform was asked to do
    pub commands: Vec<CommandRecord>,
    pub metrics: EngagementMetrics,
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameRecord {
    pub time: f64,
    pub sequence: u64,
    pub detections: Vec<BoundingBox>,
    pub tracks: Vec<TrackSnapshot>,
    pub selected: Option<FusedObservation>,
    pub truth: Option<GroundTruth>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub bbox: BoundingBox,
    pub age_since_update: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Engaged { time: f64, trigger: EngageTrigger },
    /// Scenario duration elapsed without engagement
    TimedOut,
}

/// Headline numbers of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub scenario: String,
    pub seed: u64,
    pub frames: usize,
    pub ticks: usize,
    pub searching_ticks: usize,
    pub tracking_ticks: usize,
    pub velocity_commands: usize,
    /// First tick spent tracking
    pub first_lock_time: Option<f64>,
    pub lock_ratio: f64,
    pub rmse_center: f64,
    pub id_switches: u64,
    pub outcome: Outcome,
}

impl ReplayLog {
    pub fn summary(&self) -> ReplaySummary {
        let in_state = |s: ControlState| self.ticks.iter().filter(|t| t.state == s).count();
        ReplaySummary {
            scenario: self.scenario_name.clone(),
            seed: self.seed,
            frames: self.frames.len(),
            ticks: self.ticks.len(),
            searching_ticks: in_state(ControlState::Searching),
            tracking_ticks: in_state(ControlState::Tracking),
            velocity_commands: self
                .commands
                .iter()
                .filter(|c| matches!(c.command, PlatformCommand::Velocity(_)))
                .count(),
            first_lock_time: self
                .ticks
                .iter()
                .find(|t| t.state == ControlState::Tracking)
                .map(|t| t.time),
            lock_ratio: self.metrics.lock_ratio(),
            rmse_center: self.metrics.rmse_center(),
            id_switches: self.metrics.id_switches,
            outcome: self.outcome.clone(),
        }
    }
}

/// Save a replay log to a JSON file.
pub fn save_replay(log: &ReplayLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, log)?;
    Ok(())
}

/// Load a replay log from a JSON file.
pub fn load_replay(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: ReplayLog = serde_json::from_reader(reader)?;
    Ok(log)
}
