use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use polars::prelude::*;
use thiserror::Error;

use cycletrack_parser::model::{CyclerFormat, ParsedChannel, StepMode};

use crate::dataset::{DatasetSummary, ProtocolContext, StandardizedDataset};

pub const TIMESTAMP: &str = "timestamp";
pub const CYCLE_INDEX: &str = "cycle_index";
pub const STEP_INDEX: &str = "step_index";
pub const VOLTAGE_V: &str = "voltage_V";
pub const CURRENT_A: &str = "current_A";
pub const TEMPERATURE_C: &str = "temperature_C";
pub const CAPACITY_AH: &str = "capacity_Ah";

pub const CANONICAL_COLUMNS: [&str; 7] = [
    TIMESTAMP,
    CYCLE_INDEX,
    STEP_INDEX,
    VOLTAGE_V,
    CURRENT_A,
    TEMPERATURE_C,
    CAPACITY_AH,
];

const MICROS_PER_SECOND: f64 = 1_000_000.0;
/// How many offending row positions a NonMonotonicCycle error lists.
const MAX_REPORTED_POSITIONS: usize = 8;

/// Raw-record fields a mapping entry can draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawField {
    Voltage,
    Current,
    Temperature,
    ChargeCapacity,
    DischargeCapacity,
}

/// One entry of a per-format column mapping: which raw field feeds which
/// canonical column, and the multiplicative unit conversion applied.
/// Adding a vendor format means adding a table here, not new branches in
/// the normalizer.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub source: RawField,
    pub canonical: &'static str,
    pub scale: f64,
}

/// Toyo natives: volts, milliamps, mAh.
const TOYO_FIELD_MAP: &[FieldMapping] = &[
    FieldMapping {
        source: RawField::Voltage,
        canonical: VOLTAGE_V,
        scale: 1.0,
    },
    FieldMapping {
        source: RawField::Current,
        canonical: CURRENT_A,
        scale: 1e-3,
    },
    FieldMapping {
        source: RawField::Temperature,
        canonical: TEMPERATURE_C,
        scale: 1.0,
    },
    FieldMapping {
        source: RawField::ChargeCapacity,
        canonical: CAPACITY_AH,
        scale: 1e-3,
    },
    FieldMapping {
        source: RawField::DischargeCapacity,
        canonical: CAPACITY_AH,
        scale: 1e-3,
    },
];

/// PNE natives: volts and amps (the parser already applied the exact
/// microvolt/microamp scaling), mAh.
const PNE_FIELD_MAP: &[FieldMapping] = &[
    FieldMapping {
        source: RawField::Voltage,
        canonical: VOLTAGE_V,
        scale: 1.0,
    },
    FieldMapping {
        source: RawField::Current,
        canonical: CURRENT_A,
        scale: 1.0,
    },
    FieldMapping {
        source: RawField::Temperature,
        canonical: TEMPERATURE_C,
        scale: 1.0,
    },
    FieldMapping {
        source: RawField::ChargeCapacity,
        canonical: CAPACITY_AH,
        scale: 1e-3,
    },
    FieldMapping {
        source: RawField::DischargeCapacity,
        canonical: CAPACITY_AH,
        scale: 1e-3,
    },
];

pub fn field_map(format: CyclerFormat) -> &'static [FieldMapping] {
    match format {
        CyclerFormat::Toyo1 | CyclerFormat::Toyo2 => TOYO_FIELD_MAP,
        CyclerFormat::Pne => PNE_FIELD_MAP,
    }
}

fn scale_for(map: &[FieldMapping], source: RawField) -> f64 {
    map.iter()
        .find(|entry| entry.source == source)
        .map(|entry| entry.scale)
        .unwrap_or(1.0)
}

/// One row in the canonical schema, the intermediate between a raw record
/// and the columnar dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizedRow {
    pub timestamp_micros: Option<i64>,
    pub cycle_index: u32,
    pub step_index: u32,
    pub voltage_v: f64,
    pub current_a: f64,
    pub temperature_c: Option<f64>,
    pub capacity_ah: Option<f64>,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(
        "cycle_index decreases at {count} position(s) (first offenders at rows {positions:?}); physically out-of-order data indicates upstream corruption"
    )]
    NonMonotonicCycle { count: usize, positions: Vec<usize> },

    #[error("failed to build standardized dataframe: {source}")]
    Frame {
        #[source]
        source: PolarsError,
    },
}

/// Maps format-native record streams onto the canonical schema.
pub struct SchemaNormalizer;

impl SchemaNormalizer {
    /// Normalize a parsed channel into a [`StandardizedDataset`].
    ///
    /// Enforces the monotonic `cycle_index` invariant: violating input is
    /// rejected, never sorted.
    pub fn normalize(channel: &ParsedChannel) -> Result<StandardizedDataset, SchemaError> {
        let mut positions = Vec::new();
        for (idx, pair) in channel.records.windows(2).enumerate() {
            if pair[1].cycle < pair[0].cycle {
                positions.push(idx + 1);
            }
        }
        if !positions.is_empty() {
            let count = positions.len();
            positions.truncate(MAX_REPORTED_POSITIONS);
            return Err(SchemaError::NonMonotonicCycle { count, positions });
        }

        // The recorded test start anchors rows that only carry elapsed
        // time. Derived from the first record holding both fields.
        let start_micros = channel.records.iter().find_map(|record| {
            match (record.timestamp_micros, record.elapsed_seconds) {
                (Some(ts), Some(elapsed)) => Some(ts - (elapsed * MICROS_PER_SECOND) as i64),
                _ => None,
            }
        });

        let map = field_map(channel.format);
        let voltage_scale = scale_for(map, RawField::Voltage);
        let current_scale = scale_for(map, RawField::Current);
        let temperature_scale = scale_for(map, RawField::Temperature);
        let charge_scale = scale_for(map, RawField::ChargeCapacity);
        let discharge_scale = scale_for(map, RawField::DischargeCapacity);

        let summaries: BTreeMap<u32, &cycletrack_parser::model::CycleSummary> = channel
            .cycle_summaries
            .iter()
            .map(|s| (s.cycle, s))
            .collect();

        let rows: Vec<StandardizedRow> = channel
            .records
            .iter()
            .map(|record| {
                let timestamp_micros = record.timestamp_micros.or_else(|| {
                    match (start_micros, record.elapsed_seconds) {
                        (Some(start), Some(elapsed)) => {
                            Some(start + (elapsed * MICROS_PER_SECOND) as i64)
                        }
                        _ => None,
                    }
                });

                let summary = summaries.get(&record.cycle);
                let capacity_ah = match record.mode {
                    StepMode::Charge => record
                        .charge_capacity
                        .or_else(|| summary.and_then(|s| s.charge_capacity_mah))
                        .map(|mah| mah * charge_scale),
                    StepMode::Discharge => record
                        .discharge_capacity
                        .or_else(|| summary.and_then(|s| s.discharge_capacity_mah))
                        .map(|mah| mah * discharge_scale),
                    _ => None,
                };

                StandardizedRow {
                    timestamp_micros,
                    cycle_index: record.cycle,
                    step_index: record.step,
                    voltage_v: record.voltage * voltage_scale,
                    current_a: record.current * current_scale,
                    temperature_c: record.temperature.map(|t| t * temperature_scale),
                    capacity_ah,
                }
            })
            .collect();

        let df = build_dataframe(&rows)?;
        let summary = summarize(&rows);

        let context = ProtocolContext {
            format: channel.format,
            channel_id: channel.channel_id.clone(),
            voltage_scale,
            current_scale,
            capacity_scale: charge_scale,
            start_time: start_micros
                .or_else(|| rows.iter().find_map(|r| r.timestamp_micros))
                .and_then(DateTime::from_timestamp_micros),
        };

        Ok(StandardizedDataset::new(
            df,
            context,
            summary,
            channel.cycle_summaries.clone(),
        ))
    }
}

fn build_dataframe(rows: &[StandardizedRow]) -> Result<DataFrame, SchemaError> {
    let timestamps: Vec<Option<i64>> = rows.iter().map(|r| r.timestamp_micros).collect();
    let ts_series = Series::new(TIMESTAMP.into(), timestamps)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
        .map_err(|source| SchemaError::Frame { source })?;

    let cycles: Vec<u32> = rows.iter().map(|r| r.cycle_index).collect();
    let steps: Vec<u32> = rows.iter().map(|r| r.step_index).collect();
    let voltage: Vec<f64> = rows.iter().map(|r| r.voltage_v).collect();
    let current: Vec<f64> = rows.iter().map(|r| r.current_a).collect();
    let temperature: Vec<Option<f64>> = rows.iter().map(|r| r.temperature_c).collect();
    let capacity: Vec<Option<f64>> = rows.iter().map(|r| r.capacity_ah).collect();

    let columns: Vec<Column> = vec![
        ts_series.into(),
        Series::new(CYCLE_INDEX.into(), cycles).into(),
        Series::new(STEP_INDEX.into(), steps).into(),
        Series::new(VOLTAGE_V.into(), voltage).into(),
        Series::new(CURRENT_A.into(), current).into(),
        Series::new(TEMPERATURE_C.into(), temperature).into(),
        Series::new(CAPACITY_AH.into(), capacity).into(),
    ];

    DataFrame::new(columns).map_err(|source| SchemaError::Frame { source })
}

fn summarize(rows: &[StandardizedRow]) -> DatasetSummary {
    let cycles: BTreeSet<u32> = rows.iter().map(|r| r.cycle_index).collect();
    let first = rows.iter().filter_map(|r| r.timestamp_micros).min();
    let last = rows.iter().filter_map(|r| r.timestamp_micros).max();
    let span = match (first, last) {
        (Some(first), Some(last)) => Some((last - first) as f64 / MICROS_PER_SECOND),
        _ => None,
    };

    DatasetSummary {
        row_count: rows.len(),
        cycle_count: cycles.len(),
        first_timestamp: first.and_then(DateTime::from_timestamp_micros),
        last_timestamp: last.and_then(DateTime::from_timestamp_micros),
        time_span_seconds: span,
    }
}
