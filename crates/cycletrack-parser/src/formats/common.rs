use std::path::Path;

use chrono::NaiveDateTime;

use crate::errors::ParseError;

pub(crate) fn parse_required_f64(
    file: &Path,
    value: &str,
    line: usize,
    column: &str,
) -> Result<f64, ParseError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|err| ParseError::DataRow {
            file: file.to_path_buf(),
            line,
            message: format!("failed to parse column '{column}' as float: {err}"),
        })
}

pub(crate) fn parse_optional_f64(
    file: &Path,
    value: &str,
    line: usize,
    column: &str,
) -> Result<Option<f64>, ParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|err| ParseError::DataRow {
            file: file.to_path_buf(),
            line,
            message: format!("failed to parse column '{column}' as float: {err}"),
        })
}

pub(crate) fn parse_required_u32(
    file: &Path,
    value: &str,
    line: usize,
    column: &str,
) -> Result<u32, ParseError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|err| ParseError::DataRow {
            file: file.to_path_buf(),
            line,
            message: format!("failed to parse column '{column}' as integer: {err}"),
        })
}

/// Toyo wall-clock fields: `Date` + `Time` as `%Y/%m/%d %H:%M:%S`,
/// returned as UTC microseconds.
pub(crate) fn parse_toyo_datetime(
    file: &Path,
    date: &str,
    time: &str,
    line: usize,
) -> Result<i64, ParseError> {
    let combined = format!("{} {}", date.trim(), time.trim());
    NaiveDateTime::parse_from_str(&combined, "%Y/%m/%d %H:%M:%S")
        .map(|dt| dt.and_utc().timestamp_micros())
        .map_err(|_| ParseError::DataRow {
            file: file.to_path_buf(),
            line,
            message: format!("invalid timestamp '{combined}'"),
        })
}

/// Numeric value of a zero-padded record filename (`000042` -> 42).
pub(crate) fn numeric_file_stem(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
