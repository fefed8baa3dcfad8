use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use cycletrack_parser::detect::FormatDetector;
use cycletrack_parser::formats::{PneParser, ToyoParser};
use cycletrack_parser::model::{CyclerFormat, ParsedChannel, ToyoVariant};

use crate::dataset::StandardizedDataset;
use crate::error::{PipelineError, Result};
use crate::schema::SchemaNormalizer;

/// Marker-level view of a data directory: derived entirely from directory
/// listings, no record file is parsed.
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySummary {
    pub format: Option<CyclerFormat>,
    pub confidence: f64,
    pub channels: Vec<ChannelSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub name: String,
    pub data_files: usize,
    pub has_capacity_log: bool,
    pub has_index_files: bool,
}

/// Orchestrates detection, parsing and normalization.
pub struct UnifiedLoader;

impl UnifiedLoader {
    /// Load the single channel under `path` into a standardized dataset.
    ///
    /// Directories holding several channels are rejected; each channel is
    /// its own dataset (and its own unit of parallelism) — use
    /// [`UnifiedLoader::load_all`] for those.
    pub fn load(path: &Path) -> Result<StandardizedDataset> {
        Self::load_with_hint(path, None)
    }

    /// As [`UnifiedLoader::load`], but `hint` skips format detection. The
    /// hint is still validated structurally before any parsing begins.
    pub fn load_with_hint(
        path: &Path,
        hint: Option<CyclerFormat>,
    ) -> Result<StandardizedDataset> {
        let mut datasets = Self::load_all_with_hint(path, hint)?;
        match datasets.len() {
            1 => Ok(datasets.remove(0)),
            count => Err(PipelineError::MultipleChannels {
                path: path.to_path_buf(),
                count,
            }),
        }
    }

    /// Load every channel under `path`, one dataset per channel.
    pub fn load_all(path: &Path) -> Result<Vec<StandardizedDataset>> {
        Self::load_all_with_hint(path, None)
    }

    pub fn load_all_with_hint(
        path: &Path,
        hint: Option<CyclerFormat>,
    ) -> Result<Vec<StandardizedDataset>> {
        let format = FormatDetector::confirm(path, hint)?;
        let channel_dirs = FormatDetector::channel_dirs(path, format)?;

        let mut datasets = Vec::with_capacity(channel_dirs.len());
        for dir in &channel_dirs {
            let channel = parse_channel(format, dir)?;
            for warning in &channel.warnings {
                warn!(%warning, "recovered parse warning");
            }
            let dataset = SchemaNormalizer::normalize(&channel)?;
            info!(
                channel = %channel.channel_id,
                rows = dataset.summary().row_count,
                cycles = dataset.summary().cycle_count,
                "channel standardized"
            );
            datasets.push(dataset);
        }

        info!(
            path = %path.display(),
            format = format.as_str(),
            channels = datasets.len(),
            "load complete"
        );
        Ok(datasets)
    }

    /// Cheap summary from directory markers. Never parses data files, so
    /// it is safe to call on very large exports.
    pub fn peek(path: &Path) -> Result<DirectorySummary> {
        let detection = FormatDetector::detect(path)?;

        let mut channels = Vec::new();
        if let Some(format) = detection.format {
            for dir in FormatDetector::channel_dirs(path, format)? {
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| dir.display().to_string());
                if format.is_toyo() {
                    channels.push(ChannelSummary {
                        name,
                        data_files: count_files(&dir, |file_name| {
                            !file_name.is_empty()
                                && file_name.bytes().all(|b| b.is_ascii_digit())
                        })?,
                        has_capacity_log: dir.join("CAPACITY.LOG").is_file(),
                        has_index_files: false,
                    });
                } else {
                    let restore = dir.join("Restore");
                    channels.push(ChannelSummary {
                        name,
                        data_files: count_files(&restore, |file_name| {
                            file_name.starts_with("ch")
                                && file_name.contains("_SaveData")
                                && file_name.ends_with(".csv")
                        })?,
                        has_capacity_log: false,
                        has_index_files: restore.join("savingFileIndex_start.csv").is_file()
                            && restore.join("savingFileIndex_last.csv").is_file(),
                    });
                }
            }
        }

        Ok(DirectorySummary {
            format: detection.format,
            confidence: detection.confidence,
            channels,
        })
    }
}

fn parse_channel(format: CyclerFormat, dir: &Path) -> Result<ParsedChannel> {
    let channel = match format {
        CyclerFormat::Toyo1 => ToyoParser::new(ToyoVariant::Toyo1).parse_channel_dir(dir)?,
        CyclerFormat::Toyo2 => ToyoParser::new(ToyoVariant::Toyo2).parse_channel_dir(dir)?,
        CyclerFormat::Pne => PneParser.parse_channel_dir(dir)?,
    };
    Ok(channel)
}

fn count_files(dir: &Path, matches: impl Fn(&str) -> bool) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if matches(name) {
                count += 1;
            }
        }
    }
    Ok(count)
}
