use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::{ParseError, ParseWarning};
use crate::model::{CycleSummary, ParsedChannel, RawRecord, StepMode, ToyoVariant};

use super::{
    numeric_file_stem, parse_optional_f64, parse_required_f64, parse_required_u32,
    parse_toyo_datetime,
};

/// Some Toyo exports prepend an instrument preamble line before the header.
const PREAMBLE_PREFIX: &str = "0,0,1,0,0,0,0";

const TOYO1_COLUMNS: [&str; 11] = [
    "Date",
    "Time",
    "PassTime[Sec]",
    "Voltage[V]",
    "Current[mA]",
    "Temp1[Deg]",
    "Condition",
    "Mode",
    "Cycle",
    "TotlCycle",
    "PassedDate",
];

const TOYO2_COLUMNS: [&str; 10] = [
    "Date",
    "Time",
    "PassTime[Sec]",
    "Voltage[V]",
    "Current[mA]",
    "Temp1[Deg]",
    "Condition",
    "Mode",
    "Cycle",
    "TotlCycle",
];

const CAPACITY_COLUMNS: [&str; 12] = [
    "Date",
    "Time",
    "Condition",
    "Mode",
    "Cycle",
    "TotlCycle",
    "Cap[mAh]",
    "Pow[mWh]",
    "AveVolt[V]",
    "PeakVolt[V]",
    "PeakTemp[Deg]",
    "Ocv",
];

// Field positions shared by both record layouts.
const COL_DATE: usize = 0;
const COL_TIME: usize = 1;
const COL_PASS_TIME: usize = 2;
const COL_VOLTAGE: usize = 3;
const COL_CURRENT: usize = 4;
const COL_TEMPERATURE: usize = 5;
const COL_CONDITION: usize = 6;
const COL_MODE: usize = 7;
const COL_CYCLE: usize = 8;

const CAP_COL_MODE: usize = 3;
const CAP_COL_CYCLE: usize = 4;
const CAP_COL_CAPACITY: usize = 6;

/// Parser for Toyo channel directories: zero-padded numeric record files
/// plus one `CAPACITY.LOG` summary file.
///
/// Record files are processed in numeric filename order. Malformed lines are
/// skipped and reported as warnings; an unreadable file aborts the load.
pub struct ToyoParser {
    variant: ToyoVariant,
}

impl ToyoParser {
    pub fn new(variant: ToyoVariant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> ToyoVariant {
        self.variant
    }

    fn expected_columns(&self) -> &'static [&'static str] {
        match self.variant {
            ToyoVariant::Toyo1 => &TOYO1_COLUMNS,
            ToyoVariant::Toyo2 => &TOYO2_COLUMNS,
        }
    }

    pub fn parse_channel_dir(&self, dir: &Path) -> Result<ParsedChannel, ParseError> {
        let channel_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        let mut record_files: Vec<(u64, PathBuf)> = fs::read_dir(dir)
            .map_err(|source| ParseError::Io {
                file: dir.to_path_buf(),
                source,
            })?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| numeric_file_stem(&path).map(|n| (n, path)))
            .collect();
        // Numeric order, not lexical: filenames roll over past 999999 on
        // some cyclers and reuse shorter prefixes.
        record_files.sort_by_key(|(number, _)| *number);

        if record_files.is_empty() {
            return Err(ParseError::EmptyData {
                file: dir.to_path_buf(),
            });
        }

        let mut records = Vec::new();
        let mut warnings = Vec::new();

        for (_, file) in &record_files {
            let content = fs::read_to_string(file).map_err(|source| ParseError::Io {
                file: file.clone(),
                source,
            })?;
            self.parse_record_content(file, &content, &mut records, &mut warnings)?;
        }

        if records.is_empty() {
            return Err(ParseError::EmptyData {
                file: dir.to_path_buf(),
            });
        }

        let capacity_file = dir.join("CAPACITY.LOG");
        let cycle_summaries = if capacity_file.is_file() {
            let content = fs::read_to_string(&capacity_file).map_err(|source| ParseError::Io {
                file: capacity_file.clone(),
                source,
            })?;
            parse_capacity_log(&capacity_file, &content, &mut warnings)?
        } else {
            warn!(channel = %channel_id, "CAPACITY.LOG not found; capacity summaries unavailable");
            warnings.push(ParseWarning::new(
                capacity_file.display().to_string(),
                None,
                "CAPACITY.LOG not found; capacity summaries unavailable",
            ));
            Vec::new()
        };

        info!(
            channel = %channel_id,
            files = record_files.len(),
            records = records.len(),
            cycles_summarized = cycle_summaries.len(),
            warnings = warnings.len(),
            "parsed toyo channel"
        );

        Ok(ParsedChannel {
            channel_id,
            format: self.variant.as_format(),
            records,
            cycle_summaries,
            warnings,
        })
    }

    /// Parse one record file's content. Returns the number of rows kept.
    pub(crate) fn parse_record_content(
        &self,
        file: &Path,
        content: &str,
        records: &mut Vec<RawRecord>,
        warnings: &mut Vec<ParseWarning>,
    ) -> Result<usize, ParseError> {
        let (body, mut line) = skip_preamble(content);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body.as_bytes());
        let mut rows = reader.records();

        let header = match rows.next() {
            Some(header) => header.map_err(|source| ParseError::Csv {
                file: file.to_path_buf(),
                source,
            })?,
            None => {
                warnings.push(ParseWarning::new(
                    file.display().to_string(),
                    None,
                    "file contains no header row",
                ));
                return Ok(0);
            }
        };

        let expected = self.expected_columns();
        validate_header(file, &header, expected)?;
        line += 1;

        let mut kept = 0;
        for row in rows {
            line += 1;
            let row = row.map_err(|source| ParseError::Csv {
                file: file.to_path_buf(),
                source,
            })?;

            if row.len() != expected.len() {
                warnings.push(ParseWarning::new(
                    file.display().to_string(),
                    Some(line),
                    format!("expected {} fields, found {}", expected.len(), row.len()),
                ));
                continue;
            }

            match self.parse_record_row(file, &row, line) {
                Ok(record) => {
                    records.push(record);
                    kept += 1;
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

        Ok(kept)
    }

    fn parse_record_row(
        &self,
        file: &Path,
        row: &csv::StringRecord,
        line: usize,
    ) -> Result<RawRecord, ParseError> {
        let field = |idx: usize| row.get(idx).unwrap_or("");

        let voltage = parse_required_f64(file, field(COL_VOLTAGE), line, "Voltage[V]")?;
        let current = parse_required_f64(file, field(COL_CURRENT), line, "Current[mA]")?;
        let temperature = parse_optional_f64(file, field(COL_TEMPERATURE), line, "Temp1[Deg]")?;
        let cycle = parse_required_u32(file, field(COL_CYCLE), line, "Cycle")?;
        let step = parse_required_u32(file, field(COL_CONDITION), line, "Condition")?;
        let mode_code = parse_required_u32(file, field(COL_MODE), line, "Mode")?;
        let elapsed_seconds =
            parse_optional_f64(file, field(COL_PASS_TIME), line, "PassTime[Sec]")?;

        // Wall-clock fields occasionally fail to parse on rows the cycler
        // wrote mid-reset; the elapsed-seconds field still anchors them.
        let timestamp_micros =
            parse_toyo_datetime(file, field(COL_DATE), field(COL_TIME), line).ok();

        Ok(RawRecord {
            timestamp_micros,
            elapsed_seconds,
            cycle,
            step,
            mode: StepMode::from_code(mode_code.min(u32::from(u8::MAX)) as u8),
            voltage,
            current,
            temperature,
            charge_capacity: None,
            discharge_capacity: None,
        })
    }
}

fn parse_capacity_log(
    file: &Path,
    content: &str,
    warnings: &mut Vec<ParseWarning>,
) -> Result<Vec<CycleSummary>, ParseError> {
    let (body, mut line) = skip_preamble(content);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());
    let mut rows = reader.records();

    let header = rows
        .next()
        .ok_or_else(|| ParseError::EmptyData {
            file: file.to_path_buf(),
        })?
        .map_err(|source| ParseError::Csv {
            file: file.to_path_buf(),
            source,
        })?;
    validate_header(file, &header, &CAPACITY_COLUMNS)?;
    line += 1;

    let mut summaries: BTreeMap<u32, CycleSummary> = BTreeMap::new();

    for row in rows {
        line += 1;
        let row = row.map_err(|source| ParseError::Csv {
            file: file.to_path_buf(),
            source,
        })?;

        if row.len() != CAPACITY_COLUMNS.len() {
            warnings.push(ParseWarning::new(
                file.display().to_string(),
                Some(line),
                format!(
                    "expected {} fields, found {}",
                    CAPACITY_COLUMNS.len(),
                    row.len()
                ),
            ));
            continue;
        }

        let field = |idx: usize| row.get(idx).unwrap_or("");
        let parsed = (|| -> Result<(u32, u32, f64), ParseError> {
            let cycle = parse_required_u32(file, field(CAP_COL_CYCLE), line, "Cycle")?;
            let mode = parse_required_u32(file, field(CAP_COL_MODE), line, "Mode")?;
            let capacity = parse_required_f64(file, field(CAP_COL_CAPACITY), line, "Cap[mAh]")?;
            Ok((cycle, mode, capacity))
        })();

        let (cycle, mode, capacity) = match parsed {
            Ok(values) => values,
            Err(err) => {
                warnings.push(ParseWarning::new(
                    file.display().to_string(),
                    Some(line),
                    err.to_string(),
                ));
                continue;
            }
        };

        let summary = summaries.entry(cycle).or_insert(CycleSummary {
            cycle,
            charge_capacity_mah: None,
            discharge_capacity_mah: None,
        });
        match StepMode::from_code(mode.min(u32::from(u8::MAX)) as u8) {
            StepMode::Charge => summary.charge_capacity_mah = Some(capacity),
            StepMode::Discharge => summary.discharge_capacity_mah = Some(capacity),
            _ => {}
        }
    }

    Ok(summaries.into_values().collect())
}

fn validate_header(
    file: &Path,
    header: &csv::StringRecord,
    expected: &[&str],
) -> Result<(), ParseError> {
    if header.len() != expected.len() {
        return Err(ParseError::InvalidHeader {
            file: file.to_path_buf(),
            reason: format!(
                "expected {} header columns, found {}",
                expected.len(),
                header.len()
            ),
        });
    }
    for (idx, (found, want)) in header.iter().zip(expected.iter()).enumerate() {
        if found.trim() != *want {
            return Err(ParseError::InvalidHeader {
                file: file.to_path_buf(),
                reason: format!("column {idx} is '{}', expected '{want}'", found.trim()),
            });
        }
    }
    Ok(())
}

/// Strip the instrument preamble line when present; returns the remaining
/// content and the number of lines consumed before it.
fn skip_preamble(content: &str) -> (&str, usize) {
    let trimmed = content.trim_start_matches('\u{feff}');
    if trimmed.starts_with(PREAMBLE_PREFIX) {
        match trimmed.find('\n') {
            Some(pos) => (&trimmed[pos + 1..], 1),
            None => ("", 1),
        }
    } else {
        (trimmed, 0)
    }
}
