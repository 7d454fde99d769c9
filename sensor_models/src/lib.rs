//! `sensor_models` — Camera box observation model and ToF range sensor model.

pub mod observation;
pub mod range;

pub use observation::{BoundingBox, BoxObservation};
pub use range::{parse_tof_response, RangeSample};
