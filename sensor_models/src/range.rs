//! Time-of-flight range sensor: samples and raw response parsing.

use serde::{Deserialize, Serialize};

/// One range measurement, in centimeters, stamped with the clock time it was
/// acquired at (seconds).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeSample {
    pub distance_cm: f64,
    pub timestamp: f64,
}

impl RangeSample {
    pub fn new(distance_cm: f64, timestamp: f64) -> Self {
        Self {
            distance_cm,
            timestamp,
        }
    }

    /// A sample older than `window` seconds is treated as absent.
    pub fn is_fresh(&self, now: f64, window: f64) -> bool {
        let age = now - self.timestamp;
        age >= 0.0 && age <= window
    }
}

/// Parse a ToF reply of the form `"tof 123"`.
///
/// Returns `None` for anything malformed (missing token, not a number,
/// negative or non-finite distance); callers substitute their configured
/// failure distance.
pub fn parse_tof_response(response: &str) -> Option<f64> {
    let token = response.split_whitespace().nth(1)?;
    let distance: f64 = token.parse().ok()?;
    if distance.is_finite() && distance >= 0.0 {
        Some(distance)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reply() {
        assert_eq!(parse_tof_response("tof 123"), Some(123.0));
        assert_eq!(parse_tof_response("  tof   45\r\n"), Some(45.0));
    }

    #[test]
    fn rejects_malformed_reply() {
        assert_eq!(parse_tof_response("tof"), None);
        assert_eq!(parse_tof_response("error"), None);
        assert_eq!(parse_tof_response("tof abc"), None);
        assert_eq!(parse_tof_response("tof -3"), None);
        assert_eq!(parse_tof_response(""), None);
    }

    #[test]
    fn freshness_window_is_inclusive() {
        let s = RangeSample::new(80.0, 10.0);
        assert!(s.is_fresh(10.0, 1.5));
        assert!(s.is_fresh(11.5, 1.5));
        assert!(!s.is_fresh(11.6, 1.5));
        // Samples from the future are never trusted
        assert!(!s.is_fresh(9.0, 1.5));
    }
}
