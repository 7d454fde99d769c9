//! Interfaces to the collaborators outside the control core: frame source,
//! detector, range sensor, video stream and platform actuation.
//!
//! Every call is fire-and-forget from the core's point of view. Failures
//! come back as [`BoundaryError`] and are logged at the call site.

use sensor_models::BoundingBox;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracker_core::FrameSize;

#[derive(Debug, Clone, Error)]
pub enum BoundaryError {
    #[error("motion commands are disabled")]
    MotionDisabled,
    #[error("actuation failed: {0}")]
    Actuation(String),
    #[error("video stream failed: {0}")]
    Stream(String),
    #[error("frame source failed: {0}")]
    Frame(String),
    #[error("detector failed: {0}")]
    Detector(String),
    #[error("range sensor failed: {0}")]
    Range(String),
}

// ---------------------------------------------------------------------------
// Frames and detection
// ---------------------------------------------------------------------------

/// One raw camera frame (packed 3-channel pixels).
#[derive(Clone, Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    pub sequence: u64,
    /// Capture time in clock seconds
    pub timestamp: f64,
}

impl Frame {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Supplies camera frames. `Ok(None)` means no new frame right now.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, BoundaryError>;
}

/// Pedestrian detector. May be arbitrarily slow.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, BoundaryError>;
}

/// Raw ToF query; the reply is parsed by the range stage.
pub trait RangeSensor: Send {
    fn query(&mut self) -> Result<String, BoundaryError>;
}

/// The platform's video stream.
pub trait MediaStream: Send + Sync {
    fn stop(&self) -> Result<(), BoundaryError>;
}

// ---------------------------------------------------------------------------
// Actuation
// ---------------------------------------------------------------------------

/// Velocity command: lateral, forward/back, vertical, yaw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub lateral: f64,
    pub forward: f64,
    pub vertical: f64,
    pub yaw: f64,
}

impl ActuatorCommand {
    pub fn new(lateral: f64, forward: f64, vertical: f64, yaw: f64) -> Self {
        Self {
            lateral,
            forward,
            vertical,
            yaw,
        }
    }

    /// Clamp every axis to ±`limit`. Non-finite components become 0.
    pub fn clamped(self, limit: f64) -> Self {
        let c = |v: f64| if v.is_finite() { v.max(-limit).min(limit) } else { 0.0 };
        Self {
            lateral: c(self.lateral),
            forward: c(self.forward),
            vertical: c(self.vertical),
            yaw: c(self.yaw),
        }
    }
}

/// Pattern shown on the platform's indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorPattern {
    /// Simulated attack: red light plus "attack simulation" banner
    Attack,
    /// Lights off plus "attack completed" banner
    AttackComplete,
    /// Idle cruise banner
    Cruise,
}

/// Platform command transport.
pub trait Actuator: Send + Sync {
    fn set_velocity(&self, cmd: &ActuatorCommand) -> Result<(), BoundaryError>;
    fn land(&self) -> Result<(), BoundaryError>;
    fn indicator(&self, pattern: IndicatorPattern) -> Result<(), BoundaryError>;
    fn disconnect(&self) -> Result<(), BoundaryError>;
}

/// Wraps an actuator so motion can be cut off for good during shutdown.
/// Landing, indicator and disconnect always pass through.
///
/// Each velocity command holds a read guard for as long as the inner call
/// runs, so [`GatedActuator::disable_motion`] can wait for in-flight
/// commands before landing goes out.
pub struct GatedActuator {
    inner: Arc<dyn Actuator>,
    motion_enabled: AtomicBool,
    in_flight: RwLock<()>,
}

impl GatedActuator {
    pub fn new(inner: Arc<dyn Actuator>) -> Self {
        Self {
            inner,
            motion_enabled: AtomicBool::new(true),
            in_flight: RwLock::new(()),
        }
    }

    /// Refuse every later velocity command, then wait up to `drain` for
    /// commands already inside the inner actuator. Returns `false` if one
    /// was still running when `drain` ran out.
    pub fn disable_motion(&self, drain: Duration) -> bool {
        self.motion_enabled.store(false, Ordering::SeqCst);
        self.in_flight.try_write_for(drain).is_some()
    }

    pub fn motion_enabled(&self) -> bool {
        self.motion_enabled.load(Ordering::SeqCst)
    }
}

impl Actuator for GatedActuator {
    fn set_velocity(&self, cmd: &ActuatorCommand) -> Result<(), BoundaryError> {
        let _guard = self.in_flight.read();
        if !self.motion_enabled() {
            return Err(BoundaryError::MotionDisabled);
        }
        self.inner.set_velocity(cmd)
    }

    fn land(&self) -> Result<(), BoundaryError> {
        self.inner.land()
    }

    fn indicator(&self, pattern: IndicatorPattern) -> Result<(), BoundaryError> {
        self.inner.indicator(pattern)
    }

    fn disconnect(&self) -> Result<(), BoundaryError> {
        self.inner.disconnect()
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------
