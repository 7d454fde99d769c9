//! Scenario definitions.
//!
//! Each scenario is a named set of pedestrians plus camera, detector and
//! ToF parameters. All scenarios are deterministic given the same seed.

use crate::{
    camera::{CameraModel, DetectorNoise},
    platform::TofParams,
    world::{MotionSpec, Pedestrian},
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One pedestrian off-center, slowly walking toward the platform
    Single,
    /// Five pedestrians at different ranges; the closest must be engaged
    Crowd,
    /// Target hidden long enough for the platform to fall back to search
    Occlusion,
    /// Near and far pedestrians crossing in front of each other
    Crossing,
    /// Target walks out of view and never comes back
    Unreachable,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    /// Seconds
    pub duration: f64,
    /// Camera frame interval (s)
    pub frame_dt: f64,
    pub camera: CameraModel,
    pub detector: DetectorNoise,
    pub tof: TofParams,
    pub pedestrians: Vec<Pedestrian>,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Single => Self::single(seed),
            ScenarioKind::Crowd => Self::crowd(seed),
            ScenarioKind::Occlusion => Self::occlusion(seed),
            ScenarioKind::Crossing => Self::crossing(seed),
            ScenarioKind::Unreachable => Self::unreachable(seed),
        }
    }

    fn base(name: &str, seed: u64, duration: f64, pedestrians: Vec<Pedestrian>) -> Self {
        Scenario {
            name: name.into(),
            seed,
            duration,
            frame_dt: 1.0 / 30.0,
            camera: CameraModel::default(),
            detector: DetectorNoise::default(),
            tof: TofParams::default(),
            pedestrians,
        }
    }

    fn single(seed: u64) -> Self {
        let target = Pedestrian::new(0, -12.0, 3.0, 400.0).with_motion(MotionSpec::Walking {
            lateral: 0.0,
            radial: -10.0,
        });
        Self::base("single", seed, 60.0, vec![target])
    }

    /// Bystanders are placed randomly but always farther than the target.
    fn crowd(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        let mut pedestrians = vec![Pedestrian::new(0, 6.0, 0.0, 350.0).with_motion(
            MotionSpec::Walking {
                lateral: 0.0,
                radial: -10.0,
            },
        )];
        pedestrians.extend((1..5).map(|i| {
            let bearing = rng.gen_range(-35.0..35.0);
            let range = rng.gen_range(550.0..900.0);
            let lateral = rng.gen_range(-20.0..20.0);
            Pedestrian::new(i, bearing, 0.0, range).with_motion(MotionSpec::Walking {
                lateral,
                radial: 0.0,
            })
        }));
        Self::base("crowd", seed, 60.0, pedestrians)
    }

    fn occlusion(seed: u64) -> Self {
        let target = Pedestrian::new(0, 5.0, 0.0, 350.0)
            .with_motion(MotionSpec::Walking {
                lateral: 0.0,
                radial: -10.0,
            })
            .occluded_during(3.0, 7.5);
        Self::base("occlusion", seed, 60.0, vec![target]).without_clutter()
    }

    fn crossing(seed: u64) -> Self {
        let near = Pedestrian::new(0, -20.0, 0.0, 300.0).with_motion(MotionSpec::Segmented {
            segments: vec![
                (
                    0.0,
                    Box::new(MotionSpec::Walking {
                        lateral: 40.0,
                        radial: 0.0,
                    }),
                ),
                (
                    6.0,
                    Box::new(MotionSpec::Walking {
                        lateral: 0.0,
                        radial: -10.0,
                    }),
                ),
            ],
        });
        let far = Pedestrian::new(1, 25.0, 0.0, 700.0).with_motion(MotionSpec::Walking {
            lateral: -60.0,
            radial: 0.0,
        });
        Self::base("crossing", seed, 60.0, vec![near, far])
    }

    fn unreachable(seed: u64) -> Self {
        let target = Pedestrian::new(0, 15.0, 0.0, 600.0)
            .with_motion(MotionSpec::Walking {
                lateral: 150.0,
                radial: 80.0,
            })
            .disappearing_at(5.0);
        Self::base("unreachable", seed, 20.0, vec![target]).without_clutter()
    }

    /// Clutter tracks count as fresh target data for the controller.
    fn without_clutter(mut self) -> Self {
        self.detector.clutter_probability = 0.0;
        self
    }
}
