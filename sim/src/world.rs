//! Pedestrian ground truth and platform kinematics.
//!
//! Everything is platform-relative: a pedestrian is a bearing (rad, positive
//! right of boresight), an elevation of its center (rad, positive above the
//! optical axis) and a horizontal range (cm). Commanding the platform moves
//! these: yaw rotates every bearing, forward closes range, vertical shifts
//! elevation.

use flight_control::ActuatorCommand;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a pedestrian moves on its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MotionSpec {
    Standing,
    /// Constant walk. `lateral` is cm/s to the platform's right,
    /// `radial` is cm/s away from the platform.
    Walking { lateral: f64, radial: f64 },
    /// Switch motion at given times. Sorted by start time; the active
    /// entry is the last one whose start is <= t. Standing before the first.
    Segmented { segments: Vec<(f64, Box<MotionSpec>)> },
}

impl MotionSpec {
    /// (lateral, radial) speed at time `t`.
    fn velocity(&self, t: f64) -> (f64, f64) {
        match self {
            MotionSpec::Standing => (0.0, 0.0),
            MotionSpec::Walking { lateral, radial } => (*lateral, *radial),
            MotionSpec::Segmented { segments } => segments
                .iter()
                .filter(|(start, _)| *start <= t)
                .last()
                .map_or((0.0, 0.0), |(_, spec)| spec.velocity(t)),
        }
    }
}

/// One simulated pedestrian.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pedestrian {
    pub id: u64,
    pub bearing: f64,
    pub elevation: f64,
    pub range_cm: f64,
    pub width_cm: f64,
    pub height_cm: f64,
    pub motion: MotionSpec,
    /// Intervals `[start, end)` during which the camera cannot see it
    pub occlusions: Vec<(f64, f64)>,
    /// Leaves the scene for good at this time
    pub disappear_at: Option<f64>,
}

impl Pedestrian {
    pub fn new(id: u64, bearing_deg: f64, elevation_deg: f64, range_cm: f64) -> Self {
        Self {
            id,
            bearing: bearing_deg.to_radians(),
            elevation: elevation_deg.to_radians(),
            range_cm,
            width_cm: 50.0,
            height_cm: 170.0,
            motion: MotionSpec::Standing,
            occlusions: Vec::new(),
            disappear_at: None,
        }
    }

    pub fn with_motion(mut self, motion: MotionSpec) -> Self {
        self.motion = motion;
        self
    }

    pub fn occluded_during(mut self, start: f64, end: f64) -> Self {
        self.occlusions.push((start, end));
        self
    }

    pub fn disappearing_at(mut self, t: f64) -> Self {
        self.disappear_at = Some(t);
        self
    }

    /// True if the camera could see it at `t` (ignoring field of view).
    pub fn is_visible(&self, t: f64) -> bool {
        if self.disappear_at.is_some_and(|d| t >= d) {
            return false;
        }
        !self.occlusions.iter().any(|&(s, e)| t >= s && t < e)
    }
}

/// World shared between the simulated camera, detector, range sensor and
/// platform.
pub type SharedWorld = Arc<Mutex<World>>;

/// Closest the platform can get; the airframe is in the way below this.
pub const MIN_RANGE_CM: f64 = 5.0;

/// Scene state plus the platform's current commanded velocity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct World {
    pub time: f64,
    pub pedestrians: Vec<Pedestrian>,
    /// Last velocity command; yaw in deg/s, translations in cm/s
    pub velocity: ActuatorCommand,
    pub landed: bool,
}

impl World {
    pub fn new(pedestrians: Vec<Pedestrian>) -> Self {
        Self {
            pedestrians,
            ..Default::default()
        }
    }

    pub fn shared(pedestrians: Vec<Pedestrian>) -> SharedWorld {
        Arc::new(Mutex::new(Self::new(pedestrians)))
    }

    /// Integrate `dt` seconds of pedestrian motion and platform motion.
    pub fn step(&mut self, dt: f64) {
        let t = self.time;
        let cmd = if self.landed {
            ActuatorCommand::default()
        } else {
            self.velocity
        };
        let yaw = cmd.yaw.to_radians() * dt;

        for p in &mut self.pedestrians {
            let (lateral, radial) = p.motion.velocity(t);
            let range = p.range_cm.max(MIN_RANGE_CM);
            p.bearing += lateral * dt / range - yaw;
            p.range_cm = (p.range_cm + (radial - cmd.forward) * dt).max(MIN_RANGE_CM);
            p.elevation -= cmd.vertical * dt / range;
            // Lateral platform drift looks like the pedestrian moving the other way
            p.bearing -= cmd.lateral * dt / range;
        }
        self.time = t + dt;
    }

    /// Nearest visible pedestrian within `half_angle` of boresight.
    pub fn nearest_ahead(&self, half_angle: f64) -> Option<&Pedestrian> {
        self.pedestrians
            .iter()
            .filter(|p| p.is_visible(self.time) && p.bearing.abs() <= half_angle)
            .min_by(|a, b| a.range_cm.total_cmp(&b.range_cm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn forward_command_closes_range() {
        let mut w = World::new(vec![Pedestrian::new(0, 0.0, 0.0, 300.0)]);
        w.velocity = ActuatorCommand::new(0.0, 50.0, 0.0, 0.0);
        for _ in 0..10 {
            w.step(0.1);
        }
        assert_abs_diff_eq!(w.pedestrians[0].range_cm, 250.0, epsilon = 1e-9);
        assert_abs_diff_eq!(w.time, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn yaw_toward_target_reduces_bearing() {
        let mut w = World::new(vec![Pedestrian::new(0, -10.0, 0.0, 300.0)]);
        w.velocity = ActuatorCommand::new(0.0, 0.0, 0.0, -10.0);
        w.step(0.5);
        assert_abs_diff_eq!(w.pedestrians[0].bearing.to_degrees(), -5.0, epsilon = 1e-9);
    }

    #[test]
    fn landed_platform_ignores_commands() {
        let mut w = World::new(vec![Pedestrian::new(0, 0.0, 0.0, 300.0)]);
        w.velocity = ActuatorCommand::new(0.0, 50.0, 0.0, 30.0);
        w.landed = true;
        w.step(1.0);
        assert_eq!(w.pedestrians[0].range_cm, 300.0);
        assert_eq!(w.pedestrians[0].bearing, 0.0);
    }

    #[test]
    fn segmented_motion_switches() {
        let spec = MotionSpec::Segmented {
            segments: vec![
                (1.0, Box::new(MotionSpec::Walking { lateral: 10.0, radial: 0.0 })),
                (2.0, Box::new(MotionSpec::Standing)),
            ],
        };
        assert_eq!(spec.velocity(0.5), (0.0, 0.0));
        assert_eq!(spec.velocity(1.5), (10.0, 0.0));
        assert_eq!(spec.velocity(2.5), (0.0, 0.0));
    }

    #[test]
    fn occlusion_and_disappearance() {
        let p = Pedestrian::new(0, 0.0, 0.0, 300.0)
            .occluded_during(1.0, 2.0)
            .disappearing_at(5.0);
        assert!(p.is_visible(0.5));
        assert!(!p.is_visible(1.5));
        assert!(p.is_visible(2.0));
        assert!(!p.is_visible(5.0));
    }
}
