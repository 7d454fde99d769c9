//! Data association: cost evaluation and greedy global-nearest assignment.
//!
//! # Algorithm
//! 1. For each (track, detection) pair evaluate the cost metric. Pairs whose
//!    cost exceeds the gate are dropped up front.
//! 2. Sort the surviving edges by `(cost, track_idx, det_idx)`.
//! 3. Walk the sorted list, accepting an edge whenever both endpoints are
//!    still free. This is the same as repeatedly accepting the globally
//!    cheapest remaining pair until nothing under the gate is left.
//!
//! The explicit index tie-break makes the result independent of the order in
//! which edges were produced, so the parallel cost pass stays deterministic.

use sensor_models::BoundingBox;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// Cost metric
// ---------------------------------------------------------------------------

/// Distance used to compare a predicted track box with a detection box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostMetric {
    /// Euclidean distance between centers (pixels)
    #[default]
    CenterDistance,
    /// Jaccard distance 1 − IoU, in [0, 1]
    IouDistance,
}

impl CostMetric {
    pub fn cost(&self, predicted: &BoundingBox, detected: &BoundingBox) -> f64 {
        match self {
            CostMetric::CenterDistance => {
                let (px, py) = predicted.center();
                let (dx, dy) = detected.center();
                ((px - dx).powi(2) + (py - dy).powi(2)).sqrt()
            }
            CostMetric::IouDistance => 1.0 - predicted.iou(detected),
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// A gate-passing association candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct AssignEdge {
    pub track_idx: usize,
    pub det_idx: usize,
    pub cost: f64,
}

impl AssignEdge {
    fn order(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then(self.track_idx.cmp(&other.track_idx))
            .then(self.det_idx.cmp(&other.det_idx))
    }
}

/// Assignment result: (track_idx, det_idx) matched pairs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignment {
    pub pairs: Vec<(usize, usize)>,
    /// Track indices left without a detection
    pub unmatched_tracks: Vec<usize>,
    /// Detection indices left without a track (births)
    pub unmatched_dets: Vec<usize>,
}

/// Greedy global-nearest assignment over gate-passing `edges`.
///
/// Edges with a non-finite cost or a cost above `gate` are never accepted.
/// `pairs` is returned in acceptance order (cheapest first); the unmatched
/// lists are in ascending index order.
pub fn greedy_assign(
    mut edges: Vec<AssignEdge>,
    n_tracks: usize,
    n_dets: usize,
    gate: f64,
) -> Assignment {
    edges.retain(|e| e.cost.is_finite() && e.cost <= gate);
    edges.sort_by(|a, b| a.order(b));

    let mut track_used = vec![false; n_tracks];
    let mut det_used = vec![false; n_dets];
    let mut pairs = Vec::new();

    for e in &edges {
        if e.track_idx >= n_tracks || e.det_idx >= n_dets {
            continue;
        }
        if track_used[e.track_idx] || det_used[e.det_idx] {
            continue;
        }
        track_used[e.track_idx] = true;
        det_used[e.det_idx] = true;
        pairs.push((e.track_idx, e.det_idx));
    }

    Assignment {
        pairs,
        unmatched_tracks: (0..n_tracks).filter(|&i| !track_used[i]).collect(),
        unmatched_dets: (0..n_dets).filter(|&j| !det_used[j]).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
