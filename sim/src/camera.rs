//! Camera projection, simulated detector and simulated frame source.
//!
//! The detector samples the shared [`World`] at call time and produces
//! boxes with:
//! - uniform corner noise (pixels)
//! - miss probability per pedestrian
//! - occasional clutter boxes

use crate::world::{Pedestrian, SharedWorld, World};
use flight_control::{BoundaryError, Clock, Detector, Frame, FrameSource};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use sensor_models::BoundingBox;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracker_core::metrics::GroundTruth;
use tracker_core::FrameSize;

/// Pinhole camera looking along the platform's boresight.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CameraModel {
    pub width: u32,
    pub height: u32,
    /// Horizontal field of view (degrees)
    pub hfov_deg: f64,
}

impl Default for CameraModel {
    fn default() -> Self {
        Self {
            width: 960,
            height: 720,
            hfov_deg: 82.6,
        }
    }
}

impl CameraModel {
    pub fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Focal length in pixels.
    pub fn focal(&self) -> f64 {
        (self.width as f64 / 2.0) / (self.hfov_deg.to_radians() / 2.0).tan()
    }

    pub fn half_fov(&self) -> f64 {
        self.hfov_deg.to_radians() / 2.0
    }

    /// Box of `p` clipped to the frame, or `None` when its center is out of
    /// view.
    pub fn project(&self, p: &Pedestrian) -> Option<BoundingBox> {
        if p.range_cm <= 0.0 || p.bearing.abs() >= self.half_fov() {
            return None;
        }
        let (w, h) = (self.width as f64, self.height as f64);
        let f = self.focal();
        let cx = w / 2.0 + f * p.bearing.tan();
        let cy = h / 2.0 - f * p.elevation.tan();
        if !(0.0..w).contains(&cx) || !(0.0..h).contains(&cy) {
            return None;
        }
        let raw = BoundingBox::from_center(
            cx,
            cy,
            f * p.width_cm / p.range_cm,
            f * p.height_cm / p.range_cm,
        );
        let clipped = BoundingBox::new(
            raw.x1.max(0.0),
            raw.y1.max(0.0),
            raw.x2.min(w),
            raw.y2.min(h),
        );
        clipped.is_valid().then_some(clipped)
    }

    /// The pedestrian the platform should engage: the largest visible box.
    pub fn ground_truth(&self, world: &World) -> Option<GroundTruth> {
        world
            .pedestrians
            .iter()
            .filter(|p| p.is_visible(world.time))
            .filter_map(|p| self.project(p).map(|b| (p.id, b)))
            .max_by(|(ia, a), (ib, b)| a.width().total_cmp(&b.width()).then(ib.cmp(ia)))
            .map(|(id, b)| GroundTruth {
                target_id: id,
                center: b.center(),
            })
    }
}

/// Detector imperfections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorNoise {
    /// Each box corner moves by up to ± this many pixels
    pub pixel_noise: f64,
    pub miss_probability: f64,
    /// Chance per frame of one spurious box
    pub clutter_probability: f64,
}

impl Default for DetectorNoise {
    fn default() -> Self {
        Self {
            pixel_noise: 3.0,
            miss_probability: 0.05,
            clutter_probability: 0.02,
        }
    }
}

pub struct SimDetector {
    world: SharedWorld,
    camera: CameraModel,
    noise: DetectorNoise,
    rng: ChaCha8Rng,
}

impl SimDetector {
    pub fn new(world: SharedWorld, camera: CameraModel, noise: DetectorNoise, seed: u64) -> Self {
        Self {
            world,
            camera,
            noise,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn jitter(&mut self) -> f64 {
        let n = self.noise.pixel_noise;
        if n <= 0.0 {
            0.0
        } else {
            self.rng.gen_range(-n..n)
        }
    }
}

impl Detector for SimDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, BoundaryError> {
        let truth: Vec<BoundingBox> = {
            let world = self.world.lock();
            world
                .pedestrians
                .iter()
                .filter(|p| p.is_visible(world.time))
                .filter_map(|p| self.camera.project(p))
                .collect()
        };

        let mut boxes = Vec::with_capacity(truth.len() + 1);
        for b in truth {
            if self.rng.gen::<f64>() < self.noise.miss_probability {
                continue;
            }
            let noisy = BoundingBox::new(
                b.x1 + self.jitter(),
                b.y1 + self.jitter(),
                b.x2 + self.jitter(),
                b.y2 + self.jitter(),
            );
            if noisy.is_valid() {
                boxes.push(noisy);
            }
        }

        if self.rng.gen::<f64>() < self.noise.clutter_probability {
            let (w, h) = (self.camera.width as f64, self.camera.height as f64);
            let bw = self.rng.gen_range(15.0..50.0);
            let cx = self.rng.gen_range(bw..w - bw);
            let cy = self.rng.gen_range(h * 0.25..h * 0.75);
            boxes.push(BoundingBox::from_center(cx, cy, bw, 2.5 * bw));
        }
        Ok(boxes)
    }
}

/// Emits a frame every `frame_interval` clock seconds and advances the
/// world by the elapsed time before each one. The simulator renders no
/// pixels; detection reads the world directly.
pub struct SimCamera {
    world: SharedWorld,
    camera: CameraModel,
    clock: Arc<dyn Clock>,
    frame_interval: f64,
    last: Option<f64>,
    sequence: u64,
}

impl SimCamera {
    pub fn new(
        world: SharedWorld,
        camera: CameraModel,
        clock: Arc<dyn Clock>,
        frame_interval: f64,
    ) -> Self {
        Self {
            world,
            camera,
            clock,
            frame_interval,
            last: None,
            sequence: 0,
        }
    }
}

impl FrameSource for SimCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>, BoundaryError> {
        let now = self.clock.now();
        if let Some(last) = self.last {
            let elapsed = now - last;
            // Tolerance for accumulated float error in the step clock
            if elapsed + 1e-9 < self.frame_interval {
                return Ok(None);
            }
            self.world.lock().step(elapsed);
        }
        self.last = Some(now);
        self.sequence += 1;
        Ok(Some(Frame {
            width: self.camera.width,
            height: self.camera.height,
            data: Arc::from(Vec::new()),
            sequence: self.sequence,
            timestamp: now,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Pedestrian;
    use approx::assert_abs_diff_eq;
    use flight_control::ManualClock;
    use parking_lot::Mutex;

    fn shared(p: Vec<Pedestrian>) -> SharedWorld {
        Arc::new(Mutex::new(World::new(p)))
    }

    #[test]
    fn centred_pedestrian_projects_to_frame_center() {
        let cam = CameraModel::default();
        let b = cam.project(&Pedestrian::new(0, 0.0, 0.0, 200.0)).unwrap();
        let (cx, cy) = b.center();
        assert_abs_diff_eq!(cx, 480.0, epsilon = 1e-9);
        assert_abs_diff_eq!(cy, 360.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b.width(), cam.focal() * 50.0 / 200.0, epsilon = 1e-9);
    }

    #[test]
    fn closer_is_larger_and_out_of_view_is_none() {
        let cam = CameraModel::default();
        let far = cam.project(&Pedestrian::new(0, 0.0, 0.0, 600.0)).unwrap();
        let near = cam.project(&Pedestrian::new(0, 0.0, 0.0, 300.0)).unwrap();
        assert!(near.width() > far.width());
        assert!(cam.project(&Pedestrian::new(0, 60.0, 0.0, 300.0)).is_none());
    }

    #[test]
    fn ground_truth_prefers_largest_box() {
        let cam = CameraModel::default();
        let world = World::new(vec![
            Pedestrian::new(0, -10.0, 0.0, 600.0),
            Pedestrian::new(1, 10.0, 0.0, 300.0),
        ]);
        assert_eq!(cam.ground_truth(&world).unwrap().target_id, 1);
    }

    #[test]
    fn noiseless_detector_is_exact_and_seeded_detector_repeats() {
        let world = shared(vec![Pedestrian::new(0, 5.0, 2.0, 400.0)]);
        let cam = CameraModel::default();
        let frame = Frame {
            width: 960,
            height: 720,
            data: Arc::from(Vec::new()),
            sequence: 0,
            timestamp: 0.0,
        };
        let exact = DetectorNoise {
            pixel_noise: 0.0,
            miss_probability: 0.0,
            clutter_probability: 0.0,
        };
        let mut d = SimDetector::new(world.clone(), cam, exact, 1);
        let boxes = d.detect(&frame).unwrap();
        assert_eq!(boxes, vec![cam.project(&world.lock().pedestrians[0]).unwrap()]);

        let mut a = SimDetector::new(world.clone(), cam, DetectorNoise::default(), 9);
        let mut b = SimDetector::new(world, cam, DetectorNoise::default(), 9);
        for _ in 0..20 {
            assert_eq!(a.detect(&frame).unwrap(), b.detect(&frame).unwrap());
        }
    }

    #[test]
    fn camera_paces_frames_and_steps_world() {
        let world = shared(vec![Pedestrian::new(0, 0.0, 0.0, 300.0)
            .with_motion(crate::world::MotionSpec::Walking {
                lateral: 0.0,
                radial: 100.0,
            })]);
        let clock = Arc::new(ManualClock::new(0.0));
        let mut cam = SimCamera::new(world.clone(), CameraModel::default(), clock.clone(), 0.1);
        assert!(cam.next_frame().unwrap().is_some());
        clock.advance(0.05);
        assert!(cam.next_frame().unwrap().is_none());
        clock.advance(0.05);
        let frame = cam.next_frame().unwrap().unwrap();
        assert_eq!(frame.sequence, 2);
        assert_abs_diff_eq!(world.lock().pedestrians[0].range_cm, 310.0, epsilon = 1e-6);
    }
}
