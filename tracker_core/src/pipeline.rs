//! Associator: the per-frame tracking cycle for one batch of detections.
//!
//! # Processing steps per frame
//! 1. Predict every live track one frame ahead (unconditionally)
//! 2. Evaluate the cost metric for every (track, detection) pair
//! 3. Greedy global-nearest assignment under the gate
//! 4. KF update for matched pairs (a rejected update ages the track)
//! 5. Age unmatched tracks
//! 6. Prune tracks older than the death threshold
//! 7. Birth tracks for unmatched detections

use crate::{
    association::{greedy_assign, AssignEdge, CostMetric},
    kf::{BoxKalmanFilter, KalmanFilter, KfConfig},
    track::Track,
    track_manager::{TrackManager, TrackManagerConfig},
    types::{Detection, TrackId},
};
use rayon::prelude::*;
use sensor_models::BoxObservation;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for the associator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociatorConfig {
    /// Filter noise configuration
    pub kf: KfConfig,
    /// Birth/death policy
    pub track_manager: TrackManagerConfig,
    /// Cost used to compare predicted tracks with detections
    pub cost_metric: CostMetric,
    /// Pairs costing more than this are never matched
    pub gate_threshold: f64,
}

impl Default for AssociatorConfig {
    fn default() -> Self {
        Self {
            kf: KfConfig::default(),
            track_manager: TrackManagerConfig::default(),
            cost_metric: CostMetric::CenterDistance,
            gate_threshold: 120.0,
        }
    }
}

/// Outputs of one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameOutput {
    /// All live tracks after this frame
    pub tracks: Vec<Track>,
    /// Assigned (track, detection index) pairs, cheapest first
    pub matches: Vec<(TrackId, usize)>,
    /// Tracks born this frame
    pub births: Vec<TrackId>,
    /// Tracks deleted this frame
    pub deletions: Vec<TrackId>,
    /// Matched pairs whose KF update was rejected (singular innovation)
    pub rejected_updates: usize,
    /// Wall-clock time of processing
    pub total_time_us: u64,
}

// ---------------------------------------------------------------------------
// Associator
// ---------------------------------------------------------------------------

/// Owns the active track set and turns per-frame detections into tracks.
pub struct Associator {
    pub config: AssociatorConfig,
    tracks: Vec<Track>,
    track_manager: TrackManager,
    kf: BoxKalmanFilter,
    observation: BoxObservation,
    frame_index: u64,
}

impl Associator {
    pub fn new(config: AssociatorConfig) -> Self {
        let kf = BoxKalmanFilter::new(&config.kf);
        let observation = BoxObservation::new(config.kf.measurement_noise);
        let track_manager = TrackManager::new(config.track_manager.clone());
        Self {
            config,
            tracks: Vec::new(),
            track_manager,
            kf,
            observation,
            frame_index: 0,
        }
    }

    /// Active tracks, in birth order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Observation model used to turn boxes into measurements.
    pub fn observation(&self) -> &BoxObservation {
        &self.observation
    }

    /// Process one frame of detections. An empty list ages every track.
    pub fn process_frame(&mut self, detections: &[Detection]) -> FrameOutput {
        let start_total = Instant::now();
        let frame = self.frame_index;
        self.frame_index += 1;

        // ----------------------------------------------------------------
        // Step 1: Predict
        // ----------------------------------------------------------------
        let kf = &self.kf;
        self.tracks
            .par_iter_mut()
            .for_each(|track| kf.predict_track(track));

        // ----------------------------------------------------------------
        // Step 2-3: Cost evaluation + greedy assignment
        // ----------------------------------------------------------------
        let metric = self.config.cost_metric;
        let observation = &self.observation;
        let edges: Vec<AssignEdge> = self
            .tracks
            .par_iter()
            .enumerate()
            .flat_map_iter(|(ti, track)| {
                let predicted = observation.state_to_box(&track.state);
                detections.iter().enumerate().map(move |(di, det)| AssignEdge {
                    track_idx: ti,
                    det_idx: di,
                    cost: metric.cost(&predicted, &det.bbox),
                })
            })
            .collect();
        let assignment = greedy_assign(
            edges,
            self.tracks.len(),
            detections.len(),
            self.config.gate_threshold,
        );

        // ----------------------------------------------------------------
        // Step 4: KF update for matched pairs
        // ----------------------------------------------------------------
        let mut matches = Vec::with_capacity(assignment.pairs.len());
        let mut rejected_updates = 0;
        for &(ti, di) in &assignment.pairs {
            let track = &mut self.tracks[ti];
            if !self.kf.update_track(track, Some(&detections[di].measurement)) {
                rejected_updates += 1;
            }
            matches.push((track.id, di));
        }

        // ----------------------------------------------------------------
        // Step 5: Age unmatched tracks
        // ----------------------------------------------------------------
        for &ti in &assignment.unmatched_tracks {
            self.kf.update_track(&mut self.tracks[ti], None);
        }

        // ----------------------------------------------------------------
        // Step 6: Prune
        // ----------------------------------------------------------------
        let deletions = self.track_manager.prune_expired(&mut self.tracks);

        // ----------------------------------------------------------------
        // Step 7: Birth
        // ----------------------------------------------------------------
        let mut births = Vec::with_capacity(assignment.unmatched_dets.len());
        for &di in &assignment.unmatched_dets {
            let track = self
                .track_manager
                .birth_track(&detections[di], &self.config.kf, frame);
            births.push(track.id);
            self.tracks.push(track);
        }

        if !births.is_empty() || !deletions.is_empty() {
            debug!(
                frame,
                births = births.len(),
                deletions = deletions.len(),
                live = self.tracks.len(),
                "track set changed"
            );
        }

        FrameOutput {
            tracks: self.tracks.clone(),
            matches,
            births,
            deletions,
            rejected_updates,
            total_time_us: start_total.elapsed().as_micros() as u64,
        }
    }

    /// Reset: clear all tracks.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.frame_index = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
