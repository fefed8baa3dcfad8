use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ParseWarning;

/// Vendor format of a cycler export, as resolved by detection.
///
/// Toyo1 and Toyo2 share a directory layout and differ only in the column
/// layout of their per-record files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CyclerFormat {
    Toyo1,
    Toyo2,
    Pne,
}

impl CyclerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclerFormat::Toyo1 => "toyo1",
            CyclerFormat::Toyo2 => "toyo2",
            CyclerFormat::Pne => "pne",
        }
    }

    pub fn is_toyo(&self) -> bool {
        matches!(self, CyclerFormat::Toyo1 | CyclerFormat::Toyo2)
    }

    pub fn toyo_variant(&self) -> Option<ToyoVariant> {
        match self {
            CyclerFormat::Toyo1 => Some(ToyoVariant::Toyo1),
            CyclerFormat::Toyo2 => Some(ToyoVariant::Toyo2),
            CyclerFormat::Pne => None,
        }
    }
}

impl fmt::Display for CyclerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for CyclerFormat {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "toyo1" => Ok(CyclerFormat::Toyo1),
            "toyo2" => Ok(CyclerFormat::Toyo2),
            "pne" => Ok(CyclerFormat::Pne),
            other => Err(format!("unknown cycler format '{other}'")),
        }
    }
}

/// Column-layout sub-version of the Toyo per-record file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToyoVariant {
    Toyo1,
    Toyo2,
}

impl ToyoVariant {
    pub fn as_format(&self) -> CyclerFormat {
        match self {
            ToyoVariant::Toyo1 => CyclerFormat::Toyo1,
            ToyoVariant::Toyo2 => CyclerFormat::Toyo2,
        }
    }
}

/// Step mode of a sample. Both vendors use small-integer codes:
/// 1 charge, 2 discharge, 3 rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Charge,
    Discharge,
    Rest,
    Other(u8),
}

impl StepMode {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => StepMode::Charge,
            2 => StepMode::Discharge,
            3 => StepMode::Rest,
            other => StepMode::Other(other),
        }
    }
}

/// One instrument sample in the source format's native units.
///
/// Toyo records carry volts / milliamps; PNE records have already had the
/// exact microvolt/microamp integer scaling applied and carry volts / amps.
/// Capacity accumulators are milliamp-hours for both vendors.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Absolute instant (UTC microseconds) when the source carries one.
    pub timestamp_micros: Option<i64>,
    /// Device-local elapsed seconds since test start, when the source
    /// carries one. Used to reconstruct absolute instants downstream.
    pub elapsed_seconds: Option<f64>,
    pub cycle: u32,
    pub step: u32,
    pub mode: StepMode,
    pub voltage: f64,
    pub current: f64,
    pub temperature: Option<f64>,
    /// Accumulated charge capacity for the row's step, mAh.
    pub charge_capacity: Option<f64>,
    /// Accumulated discharge capacity for the row's step, mAh.
    pub discharge_capacity: Option<f64>,
}

/// Per-cycle capacity summary.
///
/// For Toyo this is joined from CAPACITY.LOG half-cycle rows; for PNE it is
/// derived from the per-row capacity accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub cycle: u32,
    pub charge_capacity_mah: Option<f64>,
    pub discharge_capacity_mah: Option<f64>,
}

impl CycleSummary {
    /// Discharge over charge capacity, as a percentage.
    pub fn coulombic_efficiency_pct(&self) -> Option<f64> {
        match (self.charge_capacity_mah, self.discharge_capacity_mah) {
            (Some(chg), Some(dchg)) if chg > 0.0 => Some(dchg / chg * 100.0),
            _ => None,
        }
    }
}

/// Everything parsed out of one channel directory.
#[derive(Debug, Clone)]
pub struct ParsedChannel {
    pub channel_id: String,
    pub format: CyclerFormat,
    pub records: Vec<RawRecord>,
    pub cycle_summaries: Vec<CycleSummary>,
    /// Line-level problems that were recovered by skipping a row.
    pub warnings: Vec<ParseWarning>,
}

impl ParsedChannel {
    pub fn summary_for(&self, cycle: u32) -> Option<&CycleSummary> {
        self.cycle_summaries.iter().find(|s| s.cycle == cycle)
    }
}
