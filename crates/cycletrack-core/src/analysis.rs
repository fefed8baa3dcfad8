use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use cycletrack_parser::model::CyclerFormat;

use crate::config::ValidationConfig;
use crate::dataset::StandardizedDataset;
use crate::error::Result;
use crate::schema::{CAPACITY_AH, CURRENT_A, CYCLE_INDEX, TEMPERATURE_C, TIMESTAMP, VOLTAGE_V};
use crate::validation::{IssueCategory, ValidationIssue, ValidationReport};

const MICROS_PER_SECOND: f64 = 1_000_000.0;

#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleMetrics {
    pub cycle: u32,
    pub data_points: usize,
    pub duration_seconds: Option<f64>,
    /// Discharge capacity over charge capacity, percent.
    pub coulombic_efficiency_pct: Option<f64>,
    /// Discharge capacity relative to the first valid cycle, percent.
    pub capacity_retention_pct: Option<f64>,
}

/// Immutable analysis output, consumable by report generation without
/// touching the dataset again.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub format: CyclerFormat,
    pub channel_id: String,
    pub row_count: usize,
    pub time_span_seconds: Option<f64>,
    pub column_stats: Vec<ColumnStats>,
    pub cycle_metrics: Vec<CycleMetrics>,
    /// The validator's outlier findings, carried through unchanged.
    pub anomaly_flags: Vec<ValidationIssue>,
}

/// Computes descriptive statistics and per-cycle performance metrics from
/// a standardized dataset, reusing the validator's outlier detections.
pub struct Analyzer {
    config: ValidationConfig,
}

impl Analyzer {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn analyze(
        &self,
        dataset: &StandardizedDataset,
        validation: &ValidationReport,
    ) -> Result<AnalysisReport> {
        let df = dataset.data();

        let mut column_stats = Vec::new();
        for name in [VOLTAGE_V, CURRENT_A, TEMPERATURE_C, CAPACITY_AH] {
            let values = df.column(name)?.f64()?;
            let count = values.len() - values.null_count();
            if count == 0 {
                continue;
            }
            column_stats.push(ColumnStats {
                column: name.to_string(),
                count,
                mean: values.mean().unwrap_or(f64::NAN),
                std: values.std(1).unwrap_or(0.0),
                min: values.min().unwrap_or(f64::NAN),
                max: values.max().unwrap_or(f64::NAN),
            });
        }

        let cycle_metrics = self.cycle_metrics(dataset)?;

        let anomaly_flags: Vec<ValidationIssue> = validation
            .issues
            .iter()
            .filter(|issue| issue.category == IssueCategory::Outlier)
            .cloned()
            .collect();

        let report = AnalysisReport {
            format: dataset.context().format,
            channel_id: dataset.context().channel_id.clone(),
            row_count: dataset.summary().row_count,
            time_span_seconds: dataset.summary().time_span_seconds,
            column_stats,
            cycle_metrics,
            anomaly_flags,
        };

        info!(
            channel = %report.channel_id,
            cycles_analyzed = report.cycle_metrics.len(),
            anomalies = report.anomaly_flags.len(),
            "analysis complete"
        );
        Ok(report)
    }

    fn cycle_metrics(&self, dataset: &StandardizedDataset) -> Result<Vec<CycleMetrics>> {
        let df = dataset.data();
        let cycles = df.column(CYCLE_INDEX)?.u32()?;
        let timestamps = df.column(TIMESTAMP)?.datetime()?;

        let mut spans: BTreeMap<u32, (usize, Option<i64>, Option<i64>)> = BTreeMap::new();
        for idx in 0..df.height() {
            let Some(cycle) = cycles.get(idx) else {
                continue;
            };
            let entry = spans.entry(cycle).or_insert((0, None, None));
            entry.0 += 1;
            if let Some(ts) = timestamps.get(idx) {
                entry.1 = Some(entry.1.map_or(ts, |min: i64| min.min(ts)));
                entry.2 = Some(entry.2.map_or(ts, |max: i64| max.max(ts)));
            }
        }

        // Retention baseline: the first cycle with enough points and a
        // usable discharge capacity.
        let baseline = spans
            .iter()
            .filter(|(_, (points, _, _))| *points >= self.config.min_cycle_points)
            .find_map(|(&cycle, _)| {
                dataset
                    .summary_for_cycle(cycle)
                    .and_then(|s| s.discharge_capacity_mah)
                    .filter(|&capacity| capacity > 0.0)
            });

        let mut metrics = Vec::new();
        for (&cycle, &(points, min_ts, max_ts)) in &spans {
            if points < self.config.min_cycle_points {
                continue;
            }
            let summary = dataset.summary_for_cycle(cycle);
            let duration = match (min_ts, max_ts) {
                (Some(min), Some(max)) => Some((max - min) as f64 / MICROS_PER_SECOND),
                _ => None,
            };
            let discharge = summary.and_then(|s| s.discharge_capacity_mah);
            metrics.push(CycleMetrics {
                cycle,
                data_points: points,
                duration_seconds: duration,
                coulombic_efficiency_pct: summary.and_then(|s| s.coulombic_efficiency_pct()),
                capacity_retention_pct: match (discharge, baseline) {
                    (Some(dchg), Some(base)) => Some(dchg / base * 100.0),
                    _ => None,
                },
            });
        }

        Ok(metrics)
    }
}
