use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::CyclerFormat;

#[derive(Debug, Error)]
pub enum FormatDetectionError {
    #[error("data path does not exist: {path}")]
    PathNotFound { path: PathBuf },

    #[error(
        "no cycler format recognized at {path} (toyo markers: {toyo_markers}, pne markers: {pne_markers})"
    )]
    NoFormatRecognized {
        path: PathBuf,
        toyo_markers: u32,
        pne_markers: u32,
    },

    #[error("format hint '{hint}' is inconsistent with {path}: {reason}")]
    HintMismatch {
        hint: CyclerFormat,
        path: PathBuf,
        reason: String,
    },

    #[error("failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {file}: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: CSV error: {source}")]
    Csv {
        file: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{file}: invalid header: {reason}")]
    InvalidHeader { file: PathBuf, reason: String },

    #[error("{file} line {line}: {message}")]
    DataRow {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{file} did not contain any data rows")]
    EmptyData { file: PathBuf },

    #[error("required path missing: {path}")]
    MissingPath { path: PathBuf },

    #[error("index files claim {expected} rows for {file} but it contains {actual}")]
    IndexMismatch {
        file: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("{index_file} has no entry for data file index {file_index}")]
    MissingIndexEntry {
        index_file: PathBuf,
        file_index: u64,
    },

    #[error("{index_file} references data file index {file_index} but no matching SaveData file exists")]
    MissingDataFile {
        index_file: PathBuf,
        file_index: u64,
    },
}

/// A malformed line that was skipped instead of aborting the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub file: String,
    pub line: Option<usize>,
    pub message: String,
}

impl ParseWarning {
    pub fn new(file: impl Into<String>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} line {}: {}", self.file, line, self.message),
            None => write!(f, "{}: {}", self.file, self.message),
        }
    }
}
