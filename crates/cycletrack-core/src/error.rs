use std::path::PathBuf;

use thiserror::Error;

use crate::schema::SchemaError;
use cycletrack_parser::errors::{FormatDetectionError, ParseError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("format detection failed: {0}")]
    Detection(#[from] FormatDetectionError),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("schema normalization failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{path} holds {count} channel directories; load a single channel or use load_all")]
    MultipleChannels { path: PathBuf, count: usize },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
