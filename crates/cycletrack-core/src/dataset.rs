use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde::Serialize;

use cycletrack_parser::model::{CycleSummary, CyclerFormat};

/// Per-dataset metadata fixed once detection and parsing complete.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolContext {
    pub format: CyclerFormat,
    pub channel_id: String,
    /// Unit scales applied during normalization (native unit -> canonical).
    pub voltage_scale: f64,
    pub current_scale: f64,
    pub capacity_scale: f64,
    /// Recorded test-start instant, when one could be resolved.
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub row_count: usize,
    pub cycle_count: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub time_span_seconds: Option<f64>,
}

/// One normalized channel of cycler data in the canonical schema.
///
/// Built once by the loader and immutable afterwards; the validator,
/// analyzer and any exporters only ever receive shared references.
#[derive(Debug, Clone)]
pub struct StandardizedDataset {
    df: DataFrame,
    context: ProtocolContext,
    summary: DatasetSummary,
    cycle_summaries: Vec<CycleSummary>,
}

impl StandardizedDataset {
    pub(crate) fn new(
        df: DataFrame,
        context: ProtocolContext,
        summary: DatasetSummary,
        cycle_summaries: Vec<CycleSummary>,
    ) -> Self {
        Self {
            df,
            context,
            summary,
            cycle_summaries,
        }
    }

    /// Read-only view of the canonical table.
    pub fn data(&self) -> &DataFrame {
        &self.df
    }

    pub fn context(&self) -> &ProtocolContext {
        &self.context
    }

    pub fn summary(&self) -> &DatasetSummary {
        &self.summary
    }

    pub fn cycle_summaries(&self) -> &[CycleSummary] {
        &self.cycle_summaries
    }

    pub fn summary_for_cycle(&self, cycle: u32) -> Option<&CycleSummary> {
        self.cycle_summaries.iter().find(|s| s.cycle == cycle)
    }
}
