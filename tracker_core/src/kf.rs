//! Kalman filter: predict and update steps for box tracks.
//!
//! # Design choices
//! - **Linear KF** with a constant-velocity model, one frame per step.
//! - All math is done in `f64` with fixed-size `nalgebra` matrices.
//! - Q and R are fixed diagonals configured once; there is no control input.
//!
//! ## State vector
//! x = [cx, cy, w, h, vx, vy]ᵀ
//!
//! ## CV transition model
//! A = I₆ with A[0,4] = A[1,5] = 1, i.e. cx += vx, cy += vy.
//!
//! ## Update
//! Joseph form P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ, symmetrised afterwards.
//! A singular innovation covariance S rejects the update and leaves the
//! track untouched.

use crate::{
    track::Track,
    types::{MeasCov, MeasVec, StateCov, StateVec},
};
use nalgebra::{Matrix4x6, Matrix6, Vector6};
use sensor_models::BoxObservation;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Trait for a Kalman filter model (predict + update).
pub trait KalmanFilter {
    /// Predict state and covariance forward by one frame.
    fn predict(&self, state: &StateVec, cov: &StateCov) -> (StateVec, StateCov);

    /// Update state and covariance with the measurement `z`.
    /// Returns `None` when the innovation covariance cannot be inverted.
    fn update(&self, state: &StateVec, cov: &StateCov, z: &MeasVec) -> Option<KfUpdateResult>;

    /// Predict a track in place. Age bookkeeping belongs to [`update_track`].
    ///
    /// [`update_track`]: KalmanFilter::update_track
    fn predict_track(&self, track: &mut Track) {
        let (state, cov) = self.predict(&track.state, &track.cov);
        track.state = state;
        track.cov = cov;
    }

    /// Update a track with an optional matched measurement.
    ///
    /// Returns `true` when the measurement was accepted: the age resets to 0
    /// and the new center joins the history. Without a measurement, or when
    /// the update is rejected, the state and covariance are left as predicted
    /// and the age increments by one.
    fn update_track(&self, track: &mut Track, z: Option<&MeasVec>) -> bool {
        let accepted = z.and_then(|z| self.update(&track.state, &track.cov, z));
        match accepted {
            Some(res) => {
                track.state = res.state;
                track.cov = res.cov;
                track.age_since_update = 0;
                track.total_hits = track.total_hits.saturating_add(1);
                track.push_history();
                true
            }
            None => {
                if z.is_some() {
                    debug!(track = %track.id, "kalman update rejected, innovation covariance singular");
                }
                track.age_since_update = track.age_since_update.saturating_add(1);
                false
            }
        }
    }
}

/// Result of a KF update step.
#[derive(Clone, Debug)]
pub struct KfUpdateResult {
    pub state: StateVec,
    pub cov: StateCov,
    /// Innovation y = z − H·x
    pub innovation: MeasVec,
    /// Innovation covariance S = H·P·Hᵀ + R
    pub innovation_cov: MeasCov,
}

// ---------------------------------------------------------------------------
// Constant Velocity box model
// ---------------------------------------------------------------------------

/// Configuration for the box Kalman filter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KfConfig {
    /// Diagonal of Q (per-frame process noise variance)
    pub process_noise: f64,
    /// Diagonal of R (measurement noise variance, px²)
    pub measurement_noise: f64,
    /// Diagonal of P at birth
    pub initial_variance: f64,
}

impl Default for KfConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.1,
            measurement_noise: 1.0,
            initial_variance: 10.0,
        }
    }
}

/// Constant-velocity Kalman filter over box states.
#[derive(Clone, Debug)]
pub struct BoxKalmanFilter {
    a: Matrix6<f64>,
    q: Matrix6<f64>,
    h: Matrix4x6<f64>,
    r: MeasCov,
}

impl BoxKalmanFilter {
    pub fn new(config: &KfConfig) -> Self {
        let observation = BoxObservation::new(config.measurement_noise);
        Self {
            a: Self::transition_matrix(),
            q: Matrix6::identity() * config.process_noise,
            h: observation.h_matrix(),
            r: observation.r_matrix(),
        }
    }

    /// Build transition matrix A (one frame).
    pub fn transition_matrix() -> Matrix6<f64> {
        let mut a = Matrix6::<f64>::identity();
        // center += velocity
        a[(0, 4)] = 1.0;
        a[(1, 5)] = 1.0;
        a
    }

    /// Initial covariance for a newborn track.
    pub fn initial_covariance(config: &KfConfig) -> StateCov {
        StateCov::from_diagonal(&Vector6::repeat(config.initial_variance))
    }
}

impl KalmanFilter for BoxKalmanFilter {
    fn predict(&self, state: &StateVec, cov: &StateCov) -> (StateVec, StateCov) {
        let predicted_state = self.a * state;
        let predicted_cov = self.a * cov * self.a.transpose() + self.q;
        (predicted_state, predicted_cov)
    }

    fn update(&self, state: &StateVec, cov: &StateCov, z: &MeasVec) -> Option<KfUpdateResult> {
        let h = &self.h;

        // Innovation: y = z − H·x
        let innovation = z - h * state;

        // Innovation covariance: S = H·P·Hᵀ + R
        let s = h * cov * h.transpose() + self.r;
        let s_inv = s.try_inverse()?;

        // Kalman gain: K = P·Hᵀ·S⁻¹
        let k = cov * h.transpose() * s_inv;

        let new_state = state + k * innovation;

        let i_kh = StateCov::identity() - k * h;
        let joseph = i_kh * cov * i_kh.transpose() + k * self.r * k.transpose();
        let new_cov = (joseph + joseph.transpose()) * 0.5;

        if !new_state.iter().chain(new_cov.iter()).all(|v| v.is_finite()) {
            return None;
        }

        Some(KfUpdateResult {
            state: new_state,
            cov: new_cov,
            innovation,
            innovation_cov: s,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackId;
    use approx::assert_abs_diff_eq;

    fn track(state: StateVec) -> Track {
        Track::new(TrackId(0), state, StateCov::identity(), 0, 16)
    }

    #[test]
    fn predict_only_is_constant_velocity() {
        let kf = BoxKalmanFilter::new(&KfConfig::default());
        let mut t = track(StateVec::new(100.0, 50.0, 40.0, 80.0, 3.0, -2.0));
        for step in 1..=5 {
            kf.predict_track(&mut t);
            assert_abs_diff_eq!(t.state[0], 100.0 + 3.0 * step as f64, epsilon = 1e-12);
            assert_abs_diff_eq!(t.state[1], 50.0 - 2.0 * step as f64, epsilon = 1e-12);
            assert_abs_diff_eq!(t.state[2], 40.0, epsilon = 1e-12);
            assert_abs_diff_eq!(t.state[4], 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn update_resets_age_and_miss_increments() {
        let kf = BoxKalmanFilter::new(&KfConfig::default());
        let mut t = track(StateVec::new(100.0, 50.0, 40.0, 80.0, 0.0, 0.0));

        kf.predict_track(&mut t);
        assert!(!kf.update_track(&mut t, None));
        assert_eq!(t.age_since_update, 1);
        kf.predict_track(&mut t);
        assert!(!kf.update_track(&mut t, None));
        assert_eq!(t.age_since_update, 2);

        kf.predict_track(&mut t);
        let z = MeasVec::new(101.0, 51.0, 41.0, 80.0);
        assert!(kf.update_track(&mut t, Some(&z)));
        assert_eq!(t.age_since_update, 0);
        assert_eq!(t.history.len(), 2);
    }

    #[test]
    fn update_reduces_uncertainty_and_stays_symmetric() {
        let kf = BoxKalmanFilter::new(&KfConfig::default());
        let state = StateVec::new(100.0, 50.0, 40.0, 80.0, 5.0, 2.0);
        let cov = StateCov::identity() * 100.0;
        let z = MeasVec::new(101.0, 51.0, 40.0, 80.0);

        let res = kf.update(&state, &cov, &z).expect("update accepted");
        assert!(res.cov.trace() < cov.trace(), "update should reduce uncertainty");
        assert_abs_diff_eq!(res.cov, res.cov.transpose(), epsilon = 1e-12);
        // Positive semi-definite: every eigenvalue non-negative
        let eig = res.cov.symmetric_eigen();
        assert!(eig.eigenvalues.iter().all(|&l| l >= -1e-9));
        // State moved toward the measurement
        assert!(res.state[0] > 100.0 && res.state[0] < 101.0);
    }

    #[test]
    fn singular_innovation_fails_closed() {
        let kf = BoxKalmanFilter::new(&KfConfig {
            measurement_noise: 0.0,
            ..Default::default()
        });
        let state = StateVec::new(10.0, 10.0, 5.0, 5.0, 0.0, 0.0);
        let mut t = Track::new(TrackId(1), state, StateCov::zeros(), 0, 4);
        let z = MeasVec::new(12.0, 12.0, 5.0, 5.0);

        assert!(kf.update(&t.state, &t.cov, &z).is_none());
        assert!(!kf.update_track(&mut t, Some(&z)));
        assert_eq!(t.cov, StateCov::zeros());
        assert_eq!(t.state, state);
        assert_eq!(t.age_since_update, 1);
    }
}
