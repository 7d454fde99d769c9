//! Track: filtered box state, covariance, age and center history.

use crate::types::{StateCov, StateVec, TrackId};
use std::collections::VecDeque;

/// A single pedestrian track, owned by the [`Associator`](crate::Associator).
#[derive(Clone, Debug)]
pub struct Track {
    /// Identity assigned at birth, stable across frames
    pub id: TrackId,
    /// Filtered state [cx, cy, w, h, vx, vy]
    pub state: StateVec,
    /// Estimate-error covariance; only ever replaced by the filter
    pub cov: StateCov,
    /// Consecutive frames without a matched detection
    pub age_since_update: u32,
    /// Total number of accepted updates (birth counts as one)
    pub total_hits: u32,
    /// Frame index at birth
    pub born_at: u64,
    /// Past centers, oldest first (diagnostics / trail drawing)
    pub history: VecDeque<(f64, f64)>,
    history_len: usize,
}

impl Track {
    /// Create a track from an initial state estimate. The birth position is
    /// recorded as the first history point.
    pub fn new(
        id: TrackId,
        state: StateVec,
        cov: StateCov,
        born_at: u64,
        history_len: usize,
    ) -> Self {
        let history_len = history_len.max(1);
        let mut history = VecDeque::with_capacity(history_len);
        history.push_back((state[0], state[1]));
        Self {
            id,
            state,
            cov,
            age_since_update: 0,
            total_hits: 1,
            born_at,
            history,
            history_len,
        }
    }

    /// Append the current center to the bounded history.
    pub fn push_history(&mut self) {
        if self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(self.center());
    }

    pub fn center(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.state[4], self.state[5])
    }

    /// Box width, the proximity proxy.
    pub fn scale(&self) -> f64 {
        self.state[2]
    }
}
