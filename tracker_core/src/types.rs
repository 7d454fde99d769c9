//! Fundamental types used across the entire workspace.

use nalgebra::{Matrix4, Matrix6, Vector4, Vector6};
use sensor_models::{BoundingBox, BoxObservation};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Scalar type: f64 throughout for the filter.
// ---------------------------------------------------------------------------

/// Box state vector: [cx, cy, w, h, vx, vy]
pub type StateVec = Vector6<f64>;

/// 6×6 state covariance matrix
pub type StateCov = Matrix6<f64>;

/// Box measurement: [cx, cy, w, h]
pub type MeasVec = Vector4<f64>;

/// 4×4 measurement-space covariance (R, S)
pub type MeasCov = Matrix4<f64>;

// ---------------------------------------------------------------------------
// Identifier types
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// One detector box for the current frame, with its derived measurement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// z = [cx, cy, w, h]; velocity is never observed
    pub measurement: MeasVec,
}

impl Detection {
    pub fn new(bbox: BoundingBox, model: &BoxObservation) -> Self {
        Self {
            measurement: model.measure(&bbox),
            bbox,
        }
    }

    /// Convert raw detector output, dropping degenerate boxes.
    pub fn from_boxes(boxes: &[BoundingBox], model: &BoxObservation) -> Vec<Detection> {
        boxes
            .iter()
            .filter(|b| b.is_valid())
            .map(|b| Detection::new(*b, model))
            .collect()
    }

    pub fn center(&self) -> (f64, f64) {
        (self.measurement[0], self.measurement[1])
    }
}

// ---------------------------------------------------------------------------
// Frame geometry
// ---------------------------------------------------------------------------

/// Image dimensions in pixels, read once from the first frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_boxes_drops_degenerate() {
        let model = BoxObservation::default();
        let boxes = [
            BoundingBox::new(0.0, 0.0, 10.0, 20.0),
            BoundingBox::new(5.0, 5.0, 5.0, 9.0),
        ];
        let dets = Detection::from_boxes(&boxes, &model);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].center(), (5.0, 10.0));
    }

    #[test]
    fn frame_center() {
        assert_eq!(FrameSize::new(960, 720).center(), (480.0, 360.0));
    }
}
