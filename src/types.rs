use serde::Serialize;
use std::path::PathBuf;

use crate::error::PipelineError;

/// One labeled object box in image pixel space.
///
/// `length` is the extent along x and `width` the extent along y, following
/// the sensor-log convention for camera labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Annotation {
    pub center_x: f64,
    pub center_y: f64,
    pub length: f64,
    pub width: f64,
    pub class_id: i64,
}

/// One decoded capture instant of the selected camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub timestamp_micros: i64,
    pub image: Vec<u8>,
    pub annotations: Vec<Annotation>,
}

/// Standardized per-frame output unit.
///
/// The six per-object vectors are index-aligned with the frame's annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedRecord {
    pub filename: String,
    pub source_id: String,
    pub encoded_image: Vec<u8>,
    pub image_format: String,
    pub height: u32,
    pub width: u32,
    pub xmins: Vec<f64>,
    pub xmaxs: Vec<f64>,
    pub ymins: Vec<f64>,
    pub ymaxs: Vec<f64>,
    pub classes_text: Vec<String>,
    pub classes: Vec<i64>,
}

impl ConvertedRecord {
    pub fn num_objects(&self) -> usize {
        self.classes.len()
    }
}

/// Result of processing one manifest entry.
#[derive(Debug)]
pub struct TaskOutcome {
    pub entry: String,
    pub output_path: Option<PathBuf>,
    pub result: Result<usize, PipelineError>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Number of records written, on success.
    pub fn records(&self) -> Option<usize> {
        self.result.as_ref().ok().copied()
    }

    pub fn failure_kind(&self) -> Option<&'static str> {
        self.result.as_ref().err().map(PipelineError::kind)
    }

    pub fn to_report(&self) -> OutcomeReport {
        OutcomeReport {
            entry: self.entry.clone(),
            output_path: self
                .output_path
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
            status: if self.is_success() { "success" } else { "failure" },
            records: self.records(),
            error_kind: self.failure_kind(),
            error: self.result.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// Serializable view of a [`TaskOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub entry: String,
    pub output_path: Option<String>,
    pub status: &'static str,
    pub records: Option<usize>,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
}

// Struct to hold processing statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessingStats {
    pub total_entries: usize,
    pub successful_entries: usize,
    pub records_written: usize,
    pub download_failures: usize,
    pub decode_failures: usize,
    pub unknown_class_failures: usize,
    pub write_failures: usize,
    pub other_failures: usize,
}

impl ProcessingStats {
    pub fn from_outcomes(outcomes: &[TaskOutcome]) -> Self {
        let mut stats = Self::default();
        for outcome in outcomes {
            stats.record(outcome);
        }
        stats
    }

    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.total_entries += 1;
        match &outcome.result {
            Ok(records) => {
                self.successful_entries += 1;
                self.records_written += records;
            }
            Err(PipelineError::Download { .. }) => self.download_failures += 1,
            Err(PipelineError::Decode { .. }) => self.decode_failures += 1,
            Err(PipelineError::UnknownClass { .. }) => self.unknown_class_failures += 1,
            Err(PipelineError::Write { .. }) => self.write_failures += 1,
            Err(_) => self.other_failures += 1,
        }
    }

    pub fn failed_entries(&self) -> usize {
        self.total_entries - self.successful_entries
    }

    pub fn print_summary(&self) {
        log::info!("=== Processing Summary ===");
        log::info!("Total entries processed: {}", self.total_entries);
        log::info!("Successful entries: {}", self.successful_entries);
        log::info!("Records written: {}", self.records_written);

        if self.failed_entries() > 0 {
            log::warn!(
                "Failed entries: {} (download: {}, decode: {}, unknown class: {}, write: {}, other: {})",
                self.failed_entries(),
                self.download_failures,
                self.decode_failures,
                self.unknown_class_failures,
                self.write_failures,
                self.other_failures
            );
        }
    }
}
