//! System configuration: aggregation, JSON loading and startup validation.
//!
//! Invalid values are fatal, and are reported before any stage thread is
//! spawned.

use crate::{fusion::ControlConfig, stages::StageTiming, stages::RangeConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracker_core::{AssociatorConfig, CostMetric};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name} for {axis} axis: {value}")]
    InvalidGain {
        axis: &'static str,
        name: &'static str,
        value: f64,
    },
    #[error("invalid output clamp for {axis} axis: [{min}, {max}]")]
    InvalidClamp {
        axis: &'static str,
        min: f64,
        max: f64,
    },
    #[error("{name} must be {expected}, got {value}")]
    OutOfRange {
        name: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reject `value` unless it is finite and strictly positive.
pub(crate) fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            expected: "finite and > 0",
            value,
        })
    }
}

/// Reject `value` unless it is finite and not negative.
pub(crate) fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            expected: "finite and >= 0",
            value,
        })
    }
}

/// Everything needed to assemble the pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub associator: AssociatorConfig,
    pub control: ControlConfig,
    pub range: RangeConfig,
    pub timing: StageTiming,
}

impl SystemConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_associator(&self.associator)?;
        self.control.validate()?;
        self.range.validate()?;
        self.timing.validate()?;
        Ok(())
    }
}

fn validate_associator(cfg: &AssociatorConfig) -> Result<(), ConfigError> {
    non_negative("kf.process_noise", cfg.kf.process_noise)?;
    positive("kf.measurement_noise", cfg.kf.measurement_noise)?;
    positive("kf.initial_variance", cfg.kf.initial_variance)?;
    positive("gate_threshold", cfg.gate_threshold)?;
    if cfg.cost_metric == CostMetric::IouDistance && cfg.gate_threshold > 1.0 {
        return Err(ConfigError::OutOfRange {
            name: "gate_threshold",
            expected: "<= 1 for IoU distance",
            value: cfg.gate_threshold,
        });
    }
    if cfg.track_manager.history_len == 0 {
        return Err(ConfigError::OutOfRange {
            name: "track_manager.history_len",
            expected: ">= 1",
            value: 0.0,
        });
    }
    Ok(())
}
