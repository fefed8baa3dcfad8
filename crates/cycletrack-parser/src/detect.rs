use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::FormatDetectionError;
use crate::model::{CyclerFormat, ToyoVariant};

/// Structural markers checked per candidate format. A format must reach at
/// least this many marker points before it can win detection.
const MIN_MARKER_SCORE: u32 = 2;
/// How many channel directories are sampled for corroborating markers.
const SAMPLE_DIRS: usize = 3;

const TOYO_MAX_SCORE: u32 = 8;
const PNE_MAX_SCORE: u32 = 12;

/// Outcome of a directory inspection. `format` is `None` when no signature
/// reached the minimum marker count (the directory is "unknown").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub format: Option<CyclerFormat>,
    pub confidence: f64,
    pub toyo_markers: u32,
    pub pne_markers: u32,
}

pub struct FormatDetector;

impl FormatDetector {
    /// Inspect `path` and score both vendor signatures.
    ///
    /// Only directory structure and a single record-file header peek are
    /// consulted; no data is parsed. Errors only when the path itself does
    /// not exist or cannot be listed.
    pub fn detect(path: &Path) -> Result<Detection, FormatDetectionError> {
        if !path.exists() {
            return Err(FormatDetectionError::PathNotFound {
                path: path.to_path_buf(),
            });
        }

        let toyo = toyo_evidence(path)?;
        let pne_markers = pne_markers(path)?;

        let detection = if pne_markers > toyo.score && pne_markers >= MIN_MARKER_SCORE {
            Detection {
                format: Some(CyclerFormat::Pne),
                confidence: f64::from(pne_markers) / f64::from(PNE_MAX_SCORE),
                toyo_markers: toyo.score,
                pne_markers,
            }
        } else if toyo.score > pne_markers && toyo.score >= MIN_MARKER_SCORE {
            let variant = toyo
                .sample_record
                .as_deref()
                .map(resolve_toyo_variant)
                .unwrap_or(ToyoVariant::Toyo1);
            Detection {
                format: Some(variant.as_format()),
                confidence: f64::from(toyo.score) / f64::from(TOYO_MAX_SCORE),
                toyo_markers: toyo.score,
                pne_markers,
            }
        } else {
            Detection {
                format: None,
                confidence: 0.0,
                toyo_markers: toyo.score,
                pne_markers,
            }
        };

        debug!(
            path = %path.display(),
            toyo_markers = detection.toyo_markers,
            pne_markers = detection.pne_markers,
            format = detection.format.map(|f| f.as_str()).unwrap_or("unknown"),
            "format detection complete"
        );

        Ok(detection)
    }

    /// Resolve the format a load should use, honoring an optional hint.
    ///
    /// A hint skips scoring but is still validated against the directory
    /// structure; an inconsistent hint fails instead of producing a garbage
    /// parse. Without a hint, an unrecognized directory is an error here
    /// (the pipeline never guesses a format).
    pub fn confirm(
        path: &Path,
        hint: Option<CyclerFormat>,
    ) -> Result<CyclerFormat, FormatDetectionError> {
        if !path.exists() {
            return Err(FormatDetectionError::PathNotFound {
                path: path.to_path_buf(),
            });
        }

        if let Some(hint) = hint {
            validate_hint(path, hint)?;
            info!(path = %path.display(), format = hint.as_str(), "using format hint");
            return Ok(hint);
        }

        let detection = Self::detect(path)?;
        match detection.format {
            Some(format) => Ok(format),
            None => Err(FormatDetectionError::NoFormatRecognized {
                path: path.to_path_buf(),
                toyo_markers: detection.toyo_markers,
                pne_markers: detection.pne_markers,
            }),
        }
    }

    /// Channel directories for `format` under `path`, in load order:
    /// numeric order for Toyo, lexical order for PNE.
    pub fn channel_dirs(
        path: &Path,
        format: CyclerFormat,
    ) -> Result<Vec<PathBuf>, FormatDetectionError> {
        let mut dirs = if format.is_toyo() {
            list_dirs(path)?
                .into_iter()
                .filter(|d| dir_name(d).is_some_and(is_numeric_name))
                .collect::<Vec<_>>()
        } else {
            list_dirs(path)?
                .into_iter()
                .filter(|d| dir_name(d).is_some_and(|n| n.contains("Ch")))
                .collect::<Vec<_>>()
        };

        if format.is_toyo() {
            dirs.sort_by_key(|d| {
                dir_name(d)
                    .and_then(|n| n.parse::<u64>().ok())
                    .unwrap_or(u64::MAX)
            });
        } else {
            dirs.sort();
        }
        Ok(dirs)
    }
}

struct ToyoEvidence {
    score: u32,
    sample_record: Option<PathBuf>,
}

fn toyo_evidence(path: &Path) -> Result<ToyoEvidence, FormatDetectionError> {
    let numbered_dirs: Vec<PathBuf> = list_dirs(path)?
        .into_iter()
        .filter(|d| dir_name(d).is_some_and(is_numeric_name))
        .collect();

    let mut score = 0;
    let mut sample_record = None;

    if !numbered_dirs.is_empty() {
        score += 2;
        for dir in numbered_dirs.iter().take(SAMPLE_DIRS) {
            if dir.join("CAPACITY.LOG").is_file() {
                score += 1;
            }
            if let Some(record) = first_numeric_file(dir)? {
                score += 1;
                sample_record.get_or_insert(record);
            }
        }
    }

    Ok(ToyoEvidence {
        score,
        sample_record,
    })
}

fn pne_markers(path: &Path) -> Result<u32, FormatDetectionError> {
    let channel_dirs: Vec<PathBuf> = list_dirs(path)?
        .into_iter()
        .filter(|d| dir_name(d).is_some_and(|n| n.contains("Ch")))
        .collect();

    let mut score = 0;

    if !channel_dirs.is_empty() {
        score += 2;
        for dir in channel_dirs.iter().take(SAMPLE_DIRS) {
            let restore = dir.join("Restore");
            if !restore.is_dir() {
                continue;
            }
            score += 1;
            if has_save_data_files(&restore) {
                score += 1;
            }
            if restore.join("savingFileIndex_start.csv").is_file() {
                score += 1;
            }
        }
    }

    if path.join("Pattern").is_dir() {
        score += 1;
    }

    Ok(score)
}

fn validate_hint(path: &Path, hint: CyclerFormat) -> Result<(), FormatDetectionError> {
    let mismatch = |reason: String| FormatDetectionError::HintMismatch {
        hint,
        path: path.to_path_buf(),
        reason,
    };

    match hint {
        CyclerFormat::Toyo1 | CyclerFormat::Toyo2 => {
            let evidence = toyo_evidence(path)?;
            let Some(record) = evidence.sample_record else {
                return Err(mismatch(
                    "no numbered channel directory with numeric record files found".to_string(),
                ));
            };
            let actual = resolve_toyo_variant(&record);
            if actual.as_format() != hint {
                return Err(mismatch(format!(
                    "record file header indicates {}",
                    actual.as_format()
                )));
            }
            Ok(())
        }
        CyclerFormat::Pne => {
            let has_channel = FormatDetector::channel_dirs(path, CyclerFormat::Pne)?
                .iter()
                .any(|dir| {
                    let restore = dir.join("Restore");
                    restore.join("savingFileIndex_start.csv").is_file()
                        && restore.join("savingFileIndex_last.csv").is_file()
                        && has_save_data_files(&restore)
                });
            if has_channel {
                Ok(())
            } else {
                Err(mismatch(
                    "no channel directory with Restore index and SaveData files found".to_string(),
                ))
            }
        }
    }
}

/// Peek at the header line of a record file: Toyo1 carries a `PassedDate`
/// column that Toyo2 lacks. Unreadable files fall back to Toyo1.
fn resolve_toyo_variant(record_file: &Path) -> ToyoVariant {
    let Ok(file) = fs::File::open(record_file) else {
        return ToyoVariant::Toyo1;
    };
    let mut lines = BufReader::new(file).lines();

    let mut header = match lines.next() {
        Some(Ok(line)) => line,
        _ => return ToyoVariant::Toyo1,
    };
    if header.starts_with("0,0,1") {
        header = match lines.next() {
            Some(Ok(line)) => line,
            _ => return ToyoVariant::Toyo1,
        };
    }

    if header.contains("PassedDate") {
        ToyoVariant::Toyo1
    } else {
        ToyoVariant::Toyo2
    }
}

fn list_dirs(path: &Path) -> Result<Vec<PathBuf>, FormatDetectionError> {
    let entries = fs::read_dir(path).map_err(|source| FormatDetectionError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| FormatDetectionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entry_path = entry.path();
        if entry_path.is_dir() {
            dirs.push(entry_path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn first_numeric_file(dir: &Path) -> Result<Option<PathBuf>, FormatDetectionError> {
    let entries = fs::read_dir(dir).map_err(|source| FormatDetectionError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && dir_name(p).is_some_and(is_numeric_name))
        .collect();
    files.sort();
    Ok(files.into_iter().next())
}

fn has_save_data_files(restore: &Path) -> bool {
    let pattern = restore.join("ch*_SaveData*.csv");
    glob::glob(&pattern.to_string_lossy())
        .map(|paths| paths.filter_map(Result::ok).next().is_some())
        .unwrap_or(false)
}

fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn is_numeric_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}
