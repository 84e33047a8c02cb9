use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading configuration or processing one manifest entry.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to download {remote}: {reason}")]
    Download { remote: String, reason: String },

    #[error("failed to decode {context}: {reason}")]
    Decode { context: String, reason: String },

    #[error("class id {class_id} is not present in the label map")]
    UnknownClass { class_id: i64 },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid label map {}: {reason}", path.display())]
    LabelMap { path: PathBuf, reason: String },

    #[error("failed to read manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub fn decode(context: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Write {
            path: path.into(),
            source,
        }
    }

    /// Stable name of the failure kind, used in summaries and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Download { .. } => "download",
            PipelineError::Decode { .. } => "decode",
            PipelineError::UnknownClass { .. } => "unknown_class",
            PipelineError::Write { .. } => "write",
            PipelineError::LabelMap { .. } => "label_map",
            PipelineError::Manifest { .. } => "manifest",
            PipelineError::Panicked(_) => "panicked",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
