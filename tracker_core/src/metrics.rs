//! Engagement metrics: lock ratio, center RMSE of the engaged track, and
//! engaged-identity switches, accumulated against simulator ground truth.

use crate::types::TrackId;
use serde::{Deserialize, Serialize};

/// Ground-truth image position of the pedestrian the platform should engage.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GroundTruth {
    pub target_id: u64,
    pub center: (f64, f64),
}

/// Accumulated metric statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngagementMetrics {
    /// Number of frames evaluated
    pub n_frames: u64,
    /// Frames where a track was selected while a true target was visible
    pub lock_frames: u64,
    /// Frames where a true target was visible but nothing was selected
    pub missed_frames: u64,
    /// Frames where a track was selected but no true target was visible
    pub false_lock_frames: u64,
    /// Sum of squared center errors (for RMSE)
    pub sum_sq_center_err: f64,
    /// Times the selected track id changed while locked
    pub id_switches: u64,
    #[serde(skip)]
    last_selected: Option<TrackId>,
}

impl EngagementMetrics {
    /// Root-mean-square center error of the engaged track (pixels).
    pub fn rmse_center(&self) -> f64 {
        if self.lock_frames == 0 {
            return 0.0;
        }
        (self.sum_sq_center_err / self.lock_frames as f64).sqrt()
    }

    /// Fraction of visible-target frames with a lock.
    pub fn lock_ratio(&self) -> f64 {
        let denom = (self.lock_frames + self.missed_frames) as f64;
        if denom == 0.0 { 0.0 } else { self.lock_frames as f64 / denom }
    }

    /// Accumulate one frame.
    pub fn accumulate(
        &mut self,
        selected: Option<(TrackId, (f64, f64))>,
        truth: Option<&GroundTruth>,
    ) {
        self.n_frames += 1;
        match (selected, truth) {
            (Some((id, (x, y))), Some(gt)) => {
                let dx = x - gt.center.0;
                let dy = y - gt.center.1;
                self.sum_sq_center_err += dx * dx + dy * dy;
                self.lock_frames += 1;
                if self.last_selected.is_some_and(|prev| prev != id) {
                    self.id_switches += 1;
                }
                self.last_selected = Some(id);
            }
            (Some(_), None) => self.false_lock_frames += 1,
            (None, Some(_)) => self.missed_frames += 1,
            (None, None) => {}
        }
    }
}
