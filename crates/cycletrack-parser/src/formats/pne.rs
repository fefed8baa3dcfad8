use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::errors::{ParseError, ParseWarning};
use crate::model::{CycleSummary, CyclerFormat, ParsedChannel, RawRecord, StepMode};

use super::{parse_optional_f64, parse_required_u32};

/// PNE SaveData rows carry exactly this many columns.
const COLUMN_COUNT: usize = 47;

// Column roles (0-based) within a SaveData row.
const COL_STEP_TYPE: usize = 2;
const COL_STEP_COUNT: usize = 7;
const COL_VOLTAGE_UV: usize = 8;
const COL_CURRENT_UA: usize = 9;
const COL_CHG_CAPACITY_UAH: usize = 10;
const COL_DCHG_CAPACITY_UAH: usize = 11;
const COL_TEMPERATURE_1: usize = 21;
const COL_CURRENT_CYCLE: usize = 28;
const COL_DATE_YYYYMMDD: usize = 33;
const COL_TIME_CENTISEC: usize = 34;

const MICRO_PER_UNIT: f64 = 1_000_000.0;
const UAH_PER_MAH: f64 = 1_000.0;
const MICROS_PER_CENTISEC: i64 = 10_000;

const START_INDEX_FILE: &str = "savingFileIndex_start.csv";
const LAST_INDEX_FILE: &str = "savingFileIndex_last.csv";

/// One row of a `savingFileIndex_*` file: which absolute result row a data
/// file begins (or ends) at.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    file_index: u64,
    row_index: u64,
}

/// Parser for PNE channel directories (`M<MM>Ch<CCC>[<CCC>]/Restore/`).
///
/// Data files are concatenated in the order recorded by the start/last
/// index files, which is authoritative; filename sort is not, because PNE
/// occasionally reorders exported file numbering. Each file's row count is
/// reconciled against the index range it claims, and a mismatch aborts the
/// load rather than misattributing rows to the wrong cycle.
pub struct PneParser;

impl Default for PneParser {
    fn default() -> Self {
        Self
    }
}

impl PneParser {
    pub fn parse_channel_dir(&self, dir: &Path) -> Result<ParsedChannel, ParseError> {
        let channel_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let restore = dir.join("Restore");
        if !restore.is_dir() {
            return Err(ParseError::MissingPath { path: restore });
        }

        let start_file = restore.join(START_INDEX_FILE);
        let last_file = restore.join(LAST_INDEX_FILE);
        let mut start_entries = read_index_file(&start_file)?;
        let last_entries = read_index_file(&last_file)?;
        start_entries.sort_by_key(|entry| entry.row_index);

        let data_files = save_data_files(&restore)?;

        let mut records = Vec::new();
        let mut warnings = Vec::new();
        let mut chg_by_cycle: BTreeMap<u32, f64> = BTreeMap::new();
        let mut dchg_by_cycle: BTreeMap<u32, f64> = BTreeMap::new();

        for start in &start_entries {
            let last = last_entries
                .iter()
                .find(|entry| entry.file_index == start.file_index)
                .ok_or_else(|| ParseError::MissingIndexEntry {
                    index_file: last_file.clone(),
                    file_index: start.file_index,
                })?;

            if last.row_index < start.row_index {
                return Err(ParseError::DataRow {
                    file: last_file.clone(),
                    line: 0,
                    message: format!(
                        "last row index {} precedes start row index {} for file index {}",
                        last.row_index, start.row_index, start.file_index
                    ),
                });
            }
            let expected_rows = last.row_index - start.row_index + 1;

            let file = data_files
                .get(&start.file_index)
                .ok_or_else(|| ParseError::MissingDataFile {
                    index_file: start_file.clone(),
                    file_index: start.file_index,
                })?;

            let actual_rows = self.parse_data_file(
                file,
                &mut records,
                &mut warnings,
                &mut chg_by_cycle,
                &mut dchg_by_cycle,
            )?;

            if actual_rows != expected_rows {
                return Err(ParseError::IndexMismatch {
                    file: file.clone(),
                    expected: expected_rows,
                    actual: actual_rows,
                });
            }
        }

        if records.is_empty() {
            return Err(ParseError::EmptyData {
                file: restore.clone(),
            });
        }

        let cycles: Vec<u32> = chg_by_cycle
            .keys()
            .chain(dchg_by_cycle.keys())
            .copied()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let cycle_summaries = cycles
            .into_iter()
            .map(|cycle| CycleSummary {
                cycle,
                charge_capacity_mah: chg_by_cycle.get(&cycle).copied(),
                discharge_capacity_mah: dchg_by_cycle.get(&cycle).copied(),
            })
            .collect();

        info!(
            channel = %channel_id,
            files = start_entries.len(),
            records = records.len(),
            warnings = warnings.len(),
            "parsed pne channel"
        );

        Ok(ParsedChannel {
            channel_id,
            format: CyclerFormat::Pne,
            records,
            cycle_summaries,
            warnings,
        })
    }

    /// Parse one SaveData file, returning the raw row count the file holds
    /// (malformed rows count; they occupy index range like any other row).
    fn parse_data_file(
        &self,
        file: &Path,
        records: &mut Vec<RawRecord>,
        warnings: &mut Vec<ParseWarning>,
        chg_by_cycle: &mut BTreeMap<u32, f64>,
        dchg_by_cycle: &mut BTreeMap<u32, f64>,
    ) -> Result<u64, ParseError> {
        let content = fs::read_to_string(file).map_err(|source| ParseError::Io {
            file: file.to_path_buf(),
            source,
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut row_count = 0u64;
        for (row_idx, row) in reader.records().enumerate() {
            let line = row_idx + 1;
            let row = row.map_err(|source| ParseError::Csv {
                file: file.to_path_buf(),
                source,
            })?;
            row_count += 1;

            if row.len() != COLUMN_COUNT {
                warnings.push(ParseWarning::new(
                    file.display().to_string(),
                    Some(line),
                    format!("expected {COLUMN_COUNT} columns, found {}", row.len()),
                ));
                continue;
            }

            match self.parse_data_row(file, &row, line) {
                Ok(record) => {
                    if let Some(chg) = record.charge_capacity {
                        update_max(chg_by_cycle, record.cycle, chg);
                    }
                    if let Some(dchg) = record.discharge_capacity {
                        update_max(dchg_by_cycle, record.cycle, dchg);
                    }
                    records.push(record);
                }
                Err(err) => {
                    warnings.push(ParseWarning::new(
                        file.display().to_string(),
                        Some(line),
                        err.to_string(),
                    ));
                }
            }
        }

        Ok(row_count)
    }

    fn parse_data_row(
        &self,
        file: &Path,
        row: &csv::StringRecord,
        line: usize,
    ) -> Result<RawRecord, ParseError> {
        let field = |idx: usize| row.get(idx).unwrap_or("");

        // Voltage and current arrive as integer microvolt/microamp counts.
        // The division below is exact integer-to-float scaling; no rounding
        // heuristics are applied.
        let voltage_uv = parse_required_i64(file, field(COL_VOLTAGE_UV), line, "voltage_uV")?;
        let current_ua = parse_required_i64(file, field(COL_CURRENT_UA), line, "current_uA")?;
        let voltage = voltage_uv as f64 / MICRO_PER_UNIT;
        let current = current_ua as f64 / MICRO_PER_UNIT;

        let charge_capacity =
            parse_optional_f64(file, field(COL_CHG_CAPACITY_UAH), line, "chg_capacity_uAh")?
                .map(|uah| uah / UAH_PER_MAH);
        let discharge_capacity =
            parse_optional_f64(file, field(COL_DCHG_CAPACITY_UAH), line, "dchg_capacity_uAh")?
                .map(|uah| uah / UAH_PER_MAH);

        let temperature = parse_optional_f64(file, field(COL_TEMPERATURE_1), line, "temperature1")?;
        let cycle = parse_required_u32(file, field(COL_CURRENT_CYCLE), line, "current_cycle")?;
        let step = parse_required_u32(file, field(COL_STEP_COUNT), line, "step_count")?;
        let mode_code = parse_required_u32(file, field(COL_STEP_TYPE), line, "step_type")?;

        let timestamp_micros = parse_pne_timestamp(
            field(COL_DATE_YYYYMMDD),
            field(COL_TIME_CENTISEC),
        );
        if timestamp_micros.is_none() {
            warn!(
                file = %file.display(),
                line,
                "row has no parseable timestamp; keeping it for the validator to flag"
            );
        }

        Ok(RawRecord {
            timestamp_micros,
            elapsed_seconds: None,
            cycle,
            step,
            mode: StepMode::from_code(mode_code.min(u32::from(u8::MAX)) as u8),
            voltage,
            current,
            temperature,
            charge_capacity,
            discharge_capacity,
        })
    }
}

/// `Date_YYYYMMDD` + centiseconds-of-day, combined into UTC microseconds.
fn parse_pne_timestamp(date: &str, time_centisec: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y%m%d").ok()?;
    let centisec: i64 = time_centisec.trim().parse().ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(midnight.and_utc().timestamp_micros() + centisec * MICROS_PER_CENTISEC)
}

fn parse_required_i64(
    file: &Path,
    value: &str,
    line: usize,
    column: &str,
) -> Result<i64, ParseError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|err| ParseError::DataRow {
            file: file.to_path_buf(),
            line,
            message: format!("failed to parse column '{column}' as integer: {err}"),
        })
}

fn read_index_file(file: &Path) -> Result<Vec<IndexEntry>, ParseError> {
    if !file.is_file() {
        return Err(ParseError::MissingPath {
            path: file.to_path_buf(),
        });
    }
    let content = fs::read_to_string(file).map_err(|source| ParseError::Io {
        file: file.to_path_buf(),
        source,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut entries = Vec::new();
    for (row_idx, row) in reader.records().enumerate() {
        let line = row_idx + 1;
        let row = row.map_err(|source| ParseError::Csv {
            file: file.to_path_buf(),
            source,
        })?;
        if row.len() < 2 {
            return Err(ParseError::DataRow {
                file: file.to_path_buf(),
                line,
                message: format!("expected at least 2 index columns, found {}", row.len()),
            });
        }
        let parse = |idx: usize, column: &str| -> Result<u64, ParseError> {
            row.get(idx)
                .unwrap_or("")
                .trim()
                .parse::<u64>()
                .map_err(|err| ParseError::DataRow {
                    file: file.to_path_buf(),
                    line,
                    message: format!("failed to parse column '{column}' as integer: {err}"),
                })
        };
        entries.push(IndexEntry {
            file_index: parse(0, "fileIndex")?,
            row_index: parse(1, "resultIndex")?,
        });
    }

    if entries.is_empty() {
        return Err(ParseError::EmptyData {
            file: file.to_path_buf(),
        });
    }
    Ok(entries)
}

fn save_data_files(restore: &Path) -> Result<BTreeMap<u64, PathBuf>, ParseError> {
    let pattern = restore.join("ch*_SaveData*.csv");
    let paths = glob::glob(&pattern.to_string_lossy()).map_err(|err| ParseError::Io {
        file: restore.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
    })?;

    let mut files = BTreeMap::new();
    for path in paths.filter_map(Result::ok) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(index) = save_data_index(name) {
            files.insert(index, path);
        }
    }
    Ok(files)
}

/// `ch03_SaveData0001.csv` -> 1.
fn save_data_index(name: &str) -> Option<u64> {
    let rest = &name[name.find("SaveData")? + "SaveData".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn update_max(map: &mut BTreeMap<u32, f64>, cycle: u32, value: f64) {
    map.entry(cycle)
        .and_modify(|existing| {
            if value > *existing {
                *existing = value;
            }
        })
        .or_insert(value);
}
