use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Thresholds consumed by the quality validator and the analyzer.
///
/// Passed by value into each call so concurrent loads with different
/// thresholds never interfere; there is no module-level state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Acceptable cell voltage window, volts.
    pub voltage_limits: (f64, f64),
    /// Acceptable current window, amps (discharge negative).
    pub current_limits: (f64, f64),
    /// Acceptable temperature window, degrees C.
    pub temperature_limits: (f64, f64),
    /// Z-score beyond which a sample counts as a statistical outlier.
    pub outlier_threshold: f64,
    /// Cycles with fewer rows than this are excluded from per-cycle
    /// statistics and outlier windows.
    pub min_cycle_points: usize,
    /// A time gap is flagged when it exceeds the median sample interval
    /// multiplied by this factor.
    pub time_gap_factor: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            voltage_limits: (2.5, 4.5),
            current_limits: (-10.0, 10.0),
            temperature_limits: (-20.0, 80.0),
            outlier_threshold: 3.0,
            min_cycle_points: 10,
            time_gap_factor: 10.0,
        }
    }
}

impl ValidationConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| PipelineError::Config(err.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
