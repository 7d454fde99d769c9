//! Bounding-box observation model: H matrix, R matrix, box <-> state conversion.
//!
//! # State layout
//! x = [cx, cy, w, h, vx, vy]ᵀ  (pixels, pixels/frame)
//!
//! `w` is the box width and serves as the proximity proxy ("scale").
//! `h` is observed too so a state can be drawn back as a box; it carries no
//! velocity of its own.
//!
//! # Measurement
//! z = [cx, cy, w, h]ᵀ, so H = [I₄ 0₄ₓ₂].

use nalgebra::{Matrix4, Matrix4x6, Vector4, Vector6};
use serde::{Deserialize, Serialize};

/// Axis-aligned detection box in pixel space, corners `(x1, y1)`-`(x2, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a box from its center and size.
    pub fn from_center(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// True when every corner is finite and the box has non-zero extent.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2].iter().all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    /// Intersection over union with `other`, in [0, 1].
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Linear observation model for a box detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoxObservation {
    /// Measurement noise variance applied to every observed component (px²)
    pub noise_variance: f64,
}

impl Default for BoxObservation {
    fn default() -> Self {
        Self { noise_variance: 1.0 }
    }
}

impl BoxObservation {
    pub fn new(noise_variance: f64) -> Self {
        Self { noise_variance }
    }

    /// Observation matrix H: selects [cx, cy, w, h] from the state.
    #[rustfmt::skip]
    pub fn h_matrix(&self) -> Matrix4x6<f64> {
        Matrix4x6::new(
            1., 0., 0., 0., 0., 0.,
            0., 1., 0., 0., 0., 0.,
            0., 0., 1., 0., 0., 0.,
            0., 0., 0., 1., 0., 0.,
        )
    }

    /// Measurement noise covariance R.
    pub fn r_matrix(&self) -> Matrix4<f64> {
        Matrix4::identity() * self.noise_variance
    }

    /// Measurement vector z for a detected box.
    pub fn measure(&self, bbox: &BoundingBox) -> Vector4<f64> {
        let (cx, cy) = bbox.center();
        Vector4::new(cx, cy, bbox.width(), bbox.height())
    }

    /// Project a filtered state back to a box (diagnostics only).
    pub fn state_to_box(&self, state: &Vector6<f64>) -> BoundingBox {
        BoundingBox::from_center(state[0], state[1], state[2].abs(), state[3].abs())
    }
}
