//! Track lifecycle management: birth and age-based deletion.
//!
//! # Policy
//! - **Birth**: every unmatched detection spawns a track seeded with its
//!   measurement, zero velocity and the configured initial covariance.
//! - **Deletion**: a track is removed iff `age_since_update > max_age`.
//!   A track exactly at `max_age` survives the frame.

use crate::{
    kf::{BoxKalmanFilter, KfConfig},
    track::Track,
    types::{Detection, StateVec, TrackId},
};
use serde::{Deserialize, Serialize};

/// Configuration for track management policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackManagerConfig {
    /// Consecutive missed frames a track may accumulate and still survive
    pub max_age: u32,
    /// Number of past centers kept per track
    pub history_len: usize,
}

impl Default for TrackManagerConfig {
    fn default() -> Self {
        Self {
            max_age: 3,
            history_len: 64,
        }
    }
}

/// Allocates track identities and applies the birth/death policy.
pub struct TrackManager {
    pub config: TrackManagerConfig,
    next_id: u64,
}

impl TrackManager {
    pub fn new(config: TrackManagerConfig) -> Self {
        Self { config, next_id: 0 }
    }

    fn next_track_id(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create a new track from an unmatched detection.
    pub fn birth_track(&mut self, det: &Detection, kf_config: &KfConfig, frame: u64) -> Track {
        let id = self.next_track_id();
        let z = &det.measurement;
        let state = StateVec::new(z[0], z[1], z[2], z[3], 0.0, 0.0);
        let cov = BoxKalmanFilter::initial_covariance(kf_config);
        Track::new(id, state, cov, frame, self.config.history_len)
    }

    /// True once the track has been unmatched for longer than allowed.
    pub fn is_expired(&self, track: &Track) -> bool {
        track.age_since_update > self.config.max_age
    }

    /// Remove expired tracks. Returns the ids removed, in set order.
    pub fn prune_expired(&self, tracks: &mut Vec<Track>) -> Vec<TrackId> {
        let removed = tracks
            .iter()
            .filter(|t| self.is_expired(t))
            .map(|t| t.id)
            .collect();
        tracks.retain(|t| !self.is_expired(t));
        removed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
