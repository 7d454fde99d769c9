//! Per-axis PID controller with output clamping.
//!
//! # Error sign
//! - [`Action::Direct`]:  e = setpoint − measurement
//! - [`Action::Reverse`]: e = measurement − setpoint
//!
//! Yaw and vertical are reverse acting (a target right of / above center
//! must produce a positive yaw / climb command); forward is direct acting
//! (a target smaller than the setpoint must produce forward motion).

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Direct,
    Reverse,
}

/// Gains, setpoint and output bounds for one axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    pub output_min: f64,
    pub output_max: f64,
    #[serde(default)]
    pub action: Action,
}

impl PidGains {
    /// Check the gains are usable. `axis` names the axis in the error.
    pub fn validate(&self, axis: &'static str) -> Result<(), ConfigError> {
        for (name, v) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !v.is_finite() || v < 0.0 {
                return Err(ConfigError::InvalidGain { axis, name, value: v });
            }
        }
        if !self.setpoint.is_finite() {
            return Err(ConfigError::InvalidGain {
                axis,
                name: "setpoint",
                value: self.setpoint,
            });
        }
        if !(self.output_min.is_finite()
            && self.output_max.is_finite()
            && self.output_min <= self.output_max)
        {
            return Err(ConfigError::InvalidClamp {
                axis,
                min: self.output_min,
                max: self.output_max,
            });
        }
        Ok(())
    }
}

/// Live state for one axis.
#[derive(Clone, Debug)]
pub struct PidAxis {
    pub gains: PidGains,
    integral: f64,
    last_error: f64,
    last_time: Option<f64>,
    fallback_dt: f64,
}

impl PidAxis {
    /// `fallback_dt` is used for the first update after construction or
    /// reset, and whenever the clock did not move forward. That first update
    /// carries no derivative term.
    pub fn new(gains: PidGains, fallback_dt: f64) -> Self {
        Self {
            gains,
            integral: 0.0,
            last_error: 0.0,
            last_time: None,
            fallback_dt,
        }
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    /// Clear the integrator and derivative memory.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_time = None;
    }

    /// Compute the clamped output for `measurement` at time `now`.
    pub fn update(&mut self, measurement: f64, now: f64) -> f64 {
        let g = &self.gains;
        if !measurement.is_finite() {
            return 0.0_f64.max(g.output_min).min(g.output_max);
        }
        let dt = match self.last_time {
            Some(t) if now - t > 0.0 => now - t,
            _ => self.fallback_dt,
        };
        let error = match g.action {
            Action::Direct => g.setpoint - measurement,
            Action::Reverse => measurement - g.setpoint,
        };

        self.integral += error * dt;
        // No derivative on the first sample: there is no previous error yet.
        let derivative = match self.last_time {
            Some(_) => (error - self.last_error) / dt,
            None => 0.0,
        };
        let output = g.kp * error + g.ki * self.integral + g.kd * derivative;

        self.last_error = error;
        self.last_time = Some(now);
        output.max(g.output_min).min(g.output_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn gains(action: Action) -> PidGains {
        PidGains {
            kp: 2.0,
            ki: 1.0,
            kd: 0.5,
            setpoint: 0.0,
            output_min: -10.0,
            output_max: 10.0,
            action,
        }
    }

    #[test]
    fn pid_terms_with_explicit_dt() {
        let mut pid = PidAxis::new(gains(Action::Direct), 0.1);
        // first call: dt = fallback 0.1, e = -1, no derivative
        let out = pid.update(1.0, 0.0);
        // p = -2, i = 1 * (-0.1)
        assert_abs_diff_eq!(out, -2.1, epsilon = 1e-12);
        // second call: dt = 0.5, e = -1
        let out = pid.update(1.0, 0.5);
        // p = -2, i = -0.1 + -0.5 = -0.6, d = 0
        assert_abs_diff_eq!(out, -2.6, epsilon = 1e-12);
        assert_abs_diff_eq!(pid.integral(), -0.6, epsilon = 1e-12);
        // third call: dt = 0.5, e = -2
        let out = pid.update(2.0, 1.0);
        // p = -4, i = -0.6 + -1.0 = -1.6, d = 0.5 * (-2 + 1) / 0.5 = -1
        assert_abs_diff_eq!(out, -6.6, epsilon = 1e-12);
    }

    #[test]
    fn reacquisition_after_reset_has_no_derivative_kick() {
        let yaw = PidGains {
            kp: 25.0,
            ki: 0.1,
            kd: 5.0,
            setpoint: 0.0,
            output_min: -50.0,
            output_max: 50.0,
            action: Action::Reverse,
        };
        let mut pid = PidAxis::new(yaw, 0.1);
        pid.update(0.0, 0.0);
        pid.update(0.0, 0.3);
        pid.reset();
        // p = 12.5, i = 0.1 * 0.05 = 0.005
        let out = pid.update(0.5, 4.0);
        assert_abs_diff_eq!(out, 12.505, epsilon = 1e-12);
        assert!(out < 50.0);
    }

    #[test]
    fn reverse_action_flips_sign() {
        let mut direct = PidAxis::new(gains(Action::Direct), 0.1);
        let mut reverse = PidAxis::new(gains(Action::Reverse), 0.1);
        let a = direct.update(0.3, 0.0);
        let b = reverse.update(0.3, 0.0);
        assert_abs_diff_eq!(a, -b, epsilon = 1e-12);
        assert!(b > 0.0);
    }

    #[test]
    fn output_is_clamped() {
        let mut pid = PidAxis::new(gains(Action::Reverse), 0.1);
        assert_eq!(pid.update(100.0, 0.0), 10.0);
        assert_eq!(pid.update(-100.0, 1.0), -10.0);
    }

    #[test]
    fn reset_clears_memory() {
        let mut pid = PidAxis::new(gains(Action::Reverse), 0.1);
        pid.update(0.5, 0.0);
        pid.update(0.5, 0.3);
        assert!(pid.integral() != 0.0);
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.last_error(), 0.0);
    }

    #[test]
    fn non_positive_dt_uses_fallback() {
        let mut pid = PidAxis::new(gains(Action::Direct), 0.1);
        pid.update(1.0, 5.0);
        pid.update(1.0, 5.0);
        assert_abs_diff_eq!(pid.integral(), -0.2, epsilon = 1e-12);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut g = gains(Action::Direct);
        assert!(g.validate("yaw").is_ok());
        g.kp = f64::NAN;
        assert!(g.validate("yaw").is_err());
        let mut g = gains(Action::Direct);
        g.output_min = 5.0;
        g.output_max = -5.0;
        assert!(matches!(g.validate("yaw"), Err(ConfigError::InvalidClamp { .. })));
    }
}
