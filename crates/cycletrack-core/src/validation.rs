use std::collections::{BTreeMap, HashMap};

use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::ValidationConfig;
use crate::dataset::StandardizedDataset;
use crate::error::Result;
use crate::schema::{CURRENT_A, CYCLE_INDEX, STEP_INDEX, TEMPERATURE_C, TIMESTAMP, VOLTAGE_V};

const CRITICAL_PENALTY: f64 = 10.0;
const MAJOR_PENALTY: f64 = 5.0;
const MINOR_PENALTY: f64 = 1.0;

/// Above this fraction of missing values a required column is critical
/// rather than merely degraded.
const NULL_CRITICAL_FRACTION: f64 = 0.1;
/// Outlier rate above which a cleanup recommendation is emitted.
const OUTLIER_RECOMMENDATION_RATE: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueCategory {
    Integrity,
    Temporal,
    Range,
    Outlier,
}

/// One data-quality finding. Advisory: the dataset itself is never touched.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: IssueCategory,
    pub description: String,
    /// First and last affected row index, when the finding is localized.
    pub rows: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub quality_score: f64,
    pub issues: Vec<ValidationIssue>,
    pub recommendations: Vec<String>,
}

/// Runs integrity, temporal-consistency, physical-range and statistical
/// outlier checks over a standardized dataset.
pub struct QualityValidator {
    config: ValidationConfig,
}

impl QualityValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn validate(&self, dataset: &StandardizedDataset) -> Result<ValidationReport> {
        let df = dataset.data();
        let mut issues = Vec::new();

        if df.height() == 0 {
            issues.push(ValidationIssue {
                severity: Severity::Critical,
                category: IssueCategory::Integrity,
                description: "dataset is empty".to_string(),
                rows: None,
            });
            return Ok(build_report(issues, Vec::new()));
        }

        let timestamps = df.column(TIMESTAMP)?.datetime()?;
        let cycles = df.column(CYCLE_INDEX)?.u32()?;
        let steps = df.column(STEP_INDEX)?.u32()?;
        let voltage = df.column(VOLTAGE_V)?.f64()?;
        let current = df.column(CURRENT_A)?.f64()?;
        let temperature = df.column(TEMPERATURE_C)?.f64()?;
        let len = df.height();

        self.check_integrity(
            dataset, len, timestamps, cycles, steps, voltage, current, &mut issues,
        );
        self.check_temporal(len, timestamps, cycles, &mut issues);
        self.check_ranges(len, voltage, current, temperature, &mut issues);
        let outlier_count = self.check_outliers(len, cycles, voltage, current, &mut issues);

        let recommendations = self.recommendations(&issues, outlier_count, len);
        let report = build_report(issues, recommendations);

        info!(
            quality_score = report.quality_score,
            issues = report.issues.len(),
            is_valid = report.is_valid,
            "validation complete"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_integrity(
        &self,
        dataset: &StandardizedDataset,
        len: usize,
        timestamps: &DatetimeChunked,
        cycles: &UInt32Chunked,
        steps: &UInt32Chunked,
        voltage: &Float64Chunked,
        current: &Float64Chunked,
        issues: &mut Vec<ValidationIssue>,
    ) {
        for (name, nulls) in [
            (TIMESTAMP, timestamps.null_count()),
            (VOLTAGE_V, voltage.null_count()),
            (CURRENT_A, current.null_count()),
        ] {
            if nulls == 0 {
                continue;
            }
            let fraction = nulls as f64 / len as f64;
            let severity = if fraction > NULL_CRITICAL_FRACTION {
                Severity::Critical
            } else {
                Severity::Major
            };
            issues.push(ValidationIssue {
                severity,
                category: IssueCategory::Integrity,
                description: format!(
                    "required column '{name}' has {nulls} missing values ({:.1}%)",
                    fraction * 100.0
                ),
                rows: None,
            });
        }

        let mut seen: HashMap<(Option<u32>, Option<u32>, Option<i64>), usize> = HashMap::new();
        let mut duplicates = 0usize;
        let mut first_dup = None;
        let mut last_dup = 0usize;
        for idx in 0..len {
            let key = (cycles.get(idx), steps.get(idx), timestamps.get(idx));
            if seen.contains_key(&key) {
                duplicates += 1;
                first_dup.get_or_insert(idx);
                last_dup = idx;
            } else {
                seen.insert(key, idx);
            }
        }
        if duplicates > 0 {
            issues.push(ValidationIssue {
                severity: Severity::Major,
                category: IssueCategory::Integrity,
                description: format!(
                    "{duplicates} duplicate (cycle_index, step_index, timestamp) keys"
                ),
                rows: first_dup.map(|first| (first, last_dup)),
            });
        }

        let mut cycle_rows: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
        for idx in 0..len {
            if let Some(cycle) = cycles.get(idx) {
                cycle_rows
                    .entry(cycle)
                    .and_modify(|range| range.1 = idx)
                    .or_insert((idx, idx));
            }
        }
        for (&cycle, &(first, last)) in &cycle_rows {
            let missing = match dataset.summary_for_cycle(cycle) {
                None => Some("no capacity summary"),
                Some(s)
                    if s.charge_capacity_mah.is_none() && s.discharge_capacity_mah.is_none() =>
                {
                    Some("no capacity summary")
                }
                Some(s) if s.charge_capacity_mah.is_none() => Some("no charge capacity summary"),
                Some(s) if s.discharge_capacity_mah.is_none() => {
                    Some("no discharge capacity summary")
                }
                Some(_) => None,
            };
            if let Some(what) = missing {
                issues.push(ValidationIssue {
                    severity: Severity::Major,
                    category: IssueCategory::Integrity,
                    description: format!("cycle {cycle} has {what}"),
                    rows: Some((first, last)),
                });
            }
        }
    }

    fn check_temporal(
        &self,
        len: usize,
        timestamps: &DatetimeChunked,
        cycles: &UInt32Chunked,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let mut inversions = 0usize;
        let mut first_inversion = None;
        let mut last_inversion = 0usize;
        let mut intervals: Vec<i64> = Vec::new();

        let mut prev_cycle: Option<u32> = None;
        let mut prev_ts: Option<i64> = None;
        for idx in 0..len {
            let cycle = cycles.get(idx);
            if cycle != prev_cycle {
                prev_cycle = cycle;
                prev_ts = None;
            }
            let Some(ts) = timestamps.get(idx) else {
                continue;
            };
            if let Some(prev) = prev_ts {
                if ts < prev {
                    inversions += 1;
                    first_inversion.get_or_insert(idx);
                    last_inversion = idx;
                } else {
                    intervals.push(ts - prev);
                }
            }
            prev_ts = Some(ts);
        }

        if inversions > 0 {
            issues.push(ValidationIssue {
                severity: Severity::Major,
                category: IssueCategory::Temporal,
                description: format!("{inversions} non-monotonic timestamps within a cycle"),
                rows: first_inversion.map(|first| (first, last_inversion)),
            });
        }

        if intervals.len() >= 2 {
            let mut sorted = intervals.clone();
            sorted.sort_unstable();
            let median = sorted[sorted.len() / 2] as f64;
            if median > 0.0 {
                let threshold = median * self.config.time_gap_factor;
                let gaps = intervals
                    .iter()
                    .filter(|&&delta| delta as f64 > threshold)
                    .count();
                if gaps > 0 {
                    issues.push(ValidationIssue {
                        severity: Severity::Minor,
                        category: IssueCategory::Temporal,
                        description: format!(
                            "{gaps} time gaps exceed {}x the median sample interval",
                            self.config.time_gap_factor
                        ),
                        rows: None,
                    });
                }
            }
        }
    }

    fn check_ranges(
        &self,
        len: usize,
        voltage: &Float64Chunked,
        current: &Float64Chunked,
        temperature: &Float64Chunked,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let checks = [
            (
                "voltage",
                "V",
                voltage,
                self.config.voltage_limits,
                Severity::Critical,
            ),
            (
                "current",
                "A",
                current,
                self.config.current_limits,
                Severity::Critical,
            ),
            (
                "temperature",
                "degC",
                temperature,
                self.config.temperature_limits,
                Severity::Major,
            ),
        ];

        for (name, unit, values, (low, high), severity) in checks {
            let mut count = 0usize;
            let mut first = None;
            let mut last = 0usize;
            for idx in 0..len {
                if let Some(value) = values.get(idx) {
                    if value < low || value > high {
                        count += 1;
                        first.get_or_insert(idx);
                        last = idx;
                    }
                }
            }
            if count > 0 {
                issues.push(ValidationIssue {
                    severity,
                    category: IssueCategory::Range,
                    description: format!(
                        "{count} {name} readings outside {low}-{high} {unit}"
                    ),
                    rows: first.map(|f| (f, last)),
                });
            }
        }
    }

    /// Z-score outliers on voltage/current within each cycle's window.
    /// Returns the total outlier count for recommendation thresholds.
    fn check_outliers(
        &self,
        len: usize,
        cycles: &UInt32Chunked,
        voltage: &Float64Chunked,
        current: &Float64Chunked,
        issues: &mut Vec<ValidationIssue>,
    ) -> usize {
        let mut total = 0usize;

        for (name, values) in [("voltage", voltage), ("current", current)] {
            let mut by_cycle: BTreeMap<u32, Vec<(usize, f64)>> = BTreeMap::new();
            for idx in 0..len {
                if let (Some(cycle), Some(value)) = (cycles.get(idx), values.get(idx)) {
                    by_cycle.entry(cycle).or_default().push((idx, value));
                }
            }

            let mut count = 0usize;
            let mut first = None;
            let mut last = 0usize;
            for window in by_cycle.values() {
                if window.len() < self.config.min_cycle_points || window.len() < 2 {
                    continue;
                }
                let n = window.len() as f64;
                let mean = window.iter().map(|(_, v)| v).sum::<f64>() / n;
                let variance = window
                    .iter()
                    .map(|(_, v)| (v - mean).powi(2))
                    .sum::<f64>()
                    / (n - 1.0);
                let std = variance.sqrt();
                if std <= f64::EPSILON {
                    continue;
                }
                for &(idx, value) in window {
                    if ((value - mean) / std).abs() > self.config.outlier_threshold {
                        count += 1;
                        first.get_or_insert(idx);
                        last = idx;
                    }
                }
            }

            if count > 0 {
                issues.push(ValidationIssue {
                    severity: Severity::Minor,
                    category: IssueCategory::Outlier,
                    description: format!(
                        "{count} {name} samples beyond {} standard deviations within their cycle",
                        self.config.outlier_threshold
                    ),
                    rows: first.map(|f| (f, last)),
                });
            }
            total += count;
        }

        total
    }

    fn recommendations(
        &self,
        issues: &[ValidationIssue],
        outlier_count: usize,
        rows: usize,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();
        if issues
            .iter()
            .any(|i| i.category == IssueCategory::Integrity && i.description.contains("missing"))
        {
            recommendations
                .push("Consider imputation or filtering for missing values".to_string());
        }
        if rows > 0 && outlier_count as f64 / rows as f64 > OUTLIER_RECOMMENDATION_RATE {
            recommendations
                .push("Investigate and potentially filter statistical outliers".to_string());
        }
        if issues.len() > 5 {
            recommendations.push(
                "Multiple data quality issues detected; clean the data before downstream analysis"
                    .to_string(),
            );
        }
        recommendations
    }
}

fn build_report(issues: Vec<ValidationIssue>, recommendations: Vec<String>) -> ValidationReport {
    let mut penalty = 0.0;
    let mut criticals = 0usize;
    for issue in &issues {
        match issue.severity {
            Severity::Critical => {
                penalty += CRITICAL_PENALTY;
                criticals += 1;
            }
            Severity::Major => penalty += MAJOR_PENALTY,
            Severity::Minor => penalty += MINOR_PENALTY,
        }
    }

    ValidationReport {
        is_valid: criticals == 0,
        quality_score: (100.0 - penalty).max(0.0),
        issues,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaNormalizer;
    use cycletrack_parser::model::{
        CycleSummary, CyclerFormat, ParsedChannel, RawRecord, StepMode,
    };

    fn record(cycle: u32, step: u32, ts_s: i64, voltage: f64, current_ma: f64) -> RawRecord {
        RawRecord {
            timestamp_micros: Some(ts_s * 1_000_000),
            elapsed_seconds: None,
            cycle,
            step,
            mode: StepMode::Charge,
            voltage,
            current: current_ma,
            temperature: Some(25.0),
            charge_capacity: None,
            discharge_capacity: None,
        }
    }

    fn full_summary(cycle: u32) -> CycleSummary {
        CycleSummary {
            cycle,
            charge_capacity_mah: Some(1000.0),
            discharge_capacity_mah: Some(980.0),
        }
    }

    fn dataset_from(records: Vec<RawRecord>, summaries: Vec<CycleSummary>) -> StandardizedDataset {
        let channel = ParsedChannel {
            channel_id: "93".to_string(),
            format: CyclerFormat::Toyo2,
            records,
            cycle_summaries: summaries,
            warnings: Vec::new(),
        };
        SchemaNormalizer::normalize(&channel).expect("normalize failed")
    }

    fn clean_records(count: usize) -> Vec<RawRecord> {
        (0..count)
            .map(|i| record(1, i as u32, i as i64 * 60, 3.7, 1500.0))
            .collect()
    }

    #[test]
    fn clean_dataset_is_valid_with_full_score() {
        let dataset = dataset_from(clean_records(5), vec![full_summary(1)]);
        let report = QualityValidator::new(ValidationConfig::default())
            .validate(&dataset)
            .expect("validation failed");

        assert!(report.is_valid);
        assert_eq!(report.quality_score, 100.0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn out_of_range_voltage_is_critical_and_invalidates() {
        let mut records = clean_records(4);
        records.push(record(1, 99, 4 * 60, 10.0, 1500.0));
        let dataset = dataset_from(records, vec![full_summary(1)]);

        let report = QualityValidator::new(ValidationConfig::default())
            .validate(&dataset)
            .expect("validation failed");

        assert!(!report.is_valid);
        let issue = report
            .issues
            .iter()
            .find(|i| i.category == IssueCategory::Range && i.description.contains("voltage"))
            .expect("expected a voltage range issue");
        assert_eq!(issue.severity, Severity::Critical);
        assert_eq!(issue.rows, Some((4, 4)));
    }

    #[test]
    fn quality_score_never_increases_as_issues_accumulate() {
        let clean = dataset_from(clean_records(6), vec![full_summary(1)]);

        let mut one_bad = clean_records(6);
        one_bad.push(record(1, 50, 6 * 60, 10.0, 1500.0));
        let one_bad = dataset_from(one_bad, vec![full_summary(1)]);

        let mut two_bad = clean_records(6);
        two_bad.push(record(1, 50, 6 * 60, 10.0, 1500.0));
        two_bad.push(record(1, 51, 7 * 60, 3.7, 50_000.0));
        let two_bad = dataset_from(two_bad, vec![full_summary(1)]);

        let validator = QualityValidator::new(ValidationConfig::default());
        let score_clean = validator.validate(&clean).unwrap().quality_score;
        let score_one = validator.validate(&one_bad).unwrap().quality_score;
        let score_two = validator.validate(&two_bad).unwrap().quality_score;

        assert!(score_clean >= score_one);
        assert!(score_one >= score_two);
        assert!(score_two < score_clean);
    }

    #[test]
    fn missing_capacity_summary_is_reported_not_dropped() {
        let records = vec![
            record(1, 0, 0, 3.7, 1500.0),
            record(2, 0, 60, 3.7, 1500.0),
            record(3, 0, 120, 3.7, 1500.0),
        ];
        // CAPACITY.LOG analog: cycle 2 has no entry.
        let dataset = dataset_from(records, vec![full_summary(1), full_summary(3)]);

        let report = QualityValidator::new(ValidationConfig::default())
            .validate(&dataset)
            .expect("validation failed");

        // All three rows survived normalization.
        assert_eq!(dataset.summary().row_count, 3);
        let issue = report
            .issues
            .iter()
            .find(|i| i.category == IssueCategory::Integrity && i.description.contains("cycle 2"))
            .expect("expected an integrity issue for cycle 2");
        assert_eq!(issue.severity, Severity::Major);
        // Advisory only: a missing summary does not make the load invalid.
        assert!(report.is_valid);
    }

    #[test]
    fn duplicate_keys_are_flagged() {
        let mut records = clean_records(3);
        records.push(record(1, 2, 120, 3.7, 1500.0)); // same (cycle, step, ts) as row 2
        let dataset = dataset_from(records, vec![full_summary(1)]);

        let report = QualityValidator::new(ValidationConfig::default())
            .validate(&dataset)
            .expect("validation failed");

        let issue = report
            .issues
            .iter()
            .find(|i| i.description.contains("duplicate"))
            .expect("expected a duplicate-key issue");
        assert_eq!(issue.severity, Severity::Major);
        assert_eq!(issue.category, IssueCategory::Integrity);
    }

    #[test]
    fn backwards_timestamp_within_cycle_is_temporal_issue() {
        let mut records = clean_records(3);
        records.push(record(1, 10, 30, 3.7, 1500.0)); // jumps back in time
        let dataset = dataset_from(records, vec![full_summary(1)]);

        let report = QualityValidator::new(ValidationConfig::default())
            .validate(&dataset)
            .expect("validation failed");

        let issue = report
            .issues
            .iter()
            .find(|i| i.category == IssueCategory::Temporal)
            .expect("expected a temporal issue");
        assert_eq!(issue.severity, Severity::Major);
    }

    #[test]
    fn single_spike_is_a_minor_outlier() {
        let mut records = clean_records(11);
        records.push(record(1, 11, 11 * 60, 4.4, 1500.0)); // inside limits, far off-mean
        let dataset = dataset_from(records, vec![full_summary(1)]);

        let report = QualityValidator::new(ValidationConfig::default())
            .validate(&dataset)
            .expect("validation failed");

        let issue = report
            .issues
            .iter()
            .find(|i| i.category == IssueCategory::Outlier)
            .expect("expected an outlier issue");
        assert_eq!(issue.severity, Severity::Minor);
        assert!(report.is_valid);
    }

    #[test]
    fn small_cycles_are_excluded_from_outlier_windows() {
        // 5 points < min_cycle_points: the spike must not be scored.
        let mut records = clean_records(4);
        records.push(record(1, 4, 4 * 60, 4.4, 1500.0));
        let dataset = dataset_from(records, vec![full_summary(1)]);

        let report = QualityValidator::new(ValidationConfig::default())
            .validate(&dataset)
            .expect("validation failed");

        assert!(report
            .issues
            .iter()
            .all(|i| i.category != IssueCategory::Outlier));
    }
}
