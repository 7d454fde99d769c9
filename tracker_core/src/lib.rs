//! `tracker_core` — Pedestrian box tracking for the pursuit platform.
//!
//! # Module layout
//! - [`types`]         — Fundamental types (IDs, state vectors, detections)
//! - [`track`]         — Track struct and center history
//! - [`kf`]            — Kalman filter (predict / update)
//! - [`association`]   — Cost metrics and greedy global-nearest assignment
//! - [`track_manager`] — Birth / deletion logic
//! - [`pipeline`]      — Per-frame associator
//! - [`selector`]      — Nearest-target selection and normalisation
//! - [`metrics`]       — Lock ratio, center RMSE, id switches

pub mod association;
pub mod kf;
pub mod metrics;
pub mod pipeline;
pub mod selector;
pub mod track;
pub mod track_manager;
pub mod types;

pub use association::CostMetric;
pub use kf::{BoxKalmanFilter, KalmanFilter, KfConfig};
pub use pipeline::{Associator, AssociatorConfig, FrameOutput};
pub use selector::{FusedObservation, TargetSelector};
pub use track::Track;
pub use track_manager::TrackManagerConfig;
pub use types::{Detection, FrameSize, MeasVec, StateCov, StateVec, TrackId};
