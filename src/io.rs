use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::download::RAW_DIR;
use crate::error::{PipelineError, Result};
use crate::types::{OutcomeReport, ProcessingStats, TaskOutcome};
use crate::utils::{ensure_directory, entry_basename};

/// Name of the output subdirectory holding one record file per entry.
pub const PROCESSED_DIR: &str = "processed";

/// Ordered, immutable list of segment paths to process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<String>,
}

impl Manifest {
    /// Parse one entry per line; blank lines are skipped, order and duplicates kept.
    pub fn from_lines(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| PipelineError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_lines(&content))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// The first `batch_size` entries.
    pub fn batch(&self, batch_size: usize) -> &[String] {
        &self.entries[..batch_size.min(self.entries.len())]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Manifest {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Struct to hold the output and scratch directories
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub processed_dir: PathBuf,
    pub raw_dir: PathBuf,
}

/// Set up `data_dir/processed` and `temp_dir/raw`, keeping existing contents
pub fn setup_output_directories(data_dir: &Path, temp_dir: &Path) -> std::io::Result<OutputDirs> {
    Ok(OutputDirs {
        processed_dir: ensure_directory(&data_dir.join(PROCESSED_DIR))?,
        raw_dir: ensure_directory(&temp_dir.join(RAW_DIR))?,
    })
}

/// Output record file for a manifest entry.
pub fn processed_path(data_dir: &Path, entry: &str) -> PathBuf {
    data_dir.join(PROCESSED_DIR).join(entry_basename(entry))
}

#[derive(Serialize)]
struct Report<'a> {
    generated_at: String,
    summary: &'a ProcessingStats,
    outcomes: Vec<OutcomeReport>,
}

/// Write every entry's outcome and the summary counters as JSON.
pub fn write_report(path: &Path, outcomes: &[TaskOutcome], stats: &ProcessingStats) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }
    let report = Report {
        generated_at: chrono::Utc::now().to_rfc3339(),
        summary: stats,
        outcomes: outcomes.iter().map(TaskOutcome::to_report).collect(),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
