//! The per-entry task: download, decode, convert, write, clean up.

use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::conversion::{frame_filename, AnnotationConverter};
use crate::download::Fetcher;
use crate::error::{PipelineError, Result};
use crate::frame_stream::FrameStream;
use crate::io::processed_path;
use crate::protos::waymo::CameraName;
use crate::tfrecord::RecordWriter;
use crate::types::TaskOutcome;
use crate::utils::ensure_directory;

/// Per-path write locks, so entries sharing an output file take turns.
#[derive(Debug, Clone, Default)]
pub struct OutputLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl OutputLocks {
    /// Lock guarding `path`, created on first use.
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(path.to_path_buf()).or_default().value())
    }
}

/// Directories and camera selection shared by every task of a run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub camera: CameraName,
    pub output_locks: OutputLocks,
}

impl TaskContext {
    pub fn new(data_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>, camera: CameraName) -> Self {
        Self {
            data_dir: data_dir.into(),
            temp_dir: temp_dir.into(),
            camera,
            output_locks: OutputLocks::default(),
        }
    }
}

/// Process one manifest entry end to end.
///
/// The downloaded file is removed when this returns, whatever the outcome.
/// Records written before a failure stay in the output file.
pub fn process_entry(
    entry: &str,
    fetcher: &dyn Fetcher,
    converter: &AnnotationConverter,
    ctx: &TaskContext,
) -> TaskOutcome {
    let raw_file = match fetcher.fetch(entry, &ctx.temp_dir) {
        Ok(raw_file) => raw_file,
        Err(e) => {
            error!("Skipping {}: {}", entry, e);
            return TaskOutcome {
                entry: entry.to_string(),
                output_path: None,
                result: Err(e),
            };
        }
    };

    let output_path = processed_path(&ctx.data_dir, entry);
    let result = {
        let lock = ctx.output_locks.lock_for(&output_path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        process_raw_file(raw_file.path(), &output_path, converter, ctx.camera)
    };
    drop(raw_file);

    match &result {
        Ok(records) => info!("Processed {} ({} records)", entry, records),
        Err(e) => error!("Failed to process {}: {}", entry, e),
    }

    TaskOutcome {
        entry: entry.to_string(),
        output_path: Some(output_path),
        result,
    }
}

/// Convert every frame of a local segment file into `output_path`.
///
/// Returns the number of records written.
pub fn process_raw_file(
    local_path: &Path,
    output_path: &Path,
    converter: &AnnotationConverter,
    camera: CameraName,
) -> Result<usize> {
    if let Some(parent) = output_path.parent() {
        ensure_directory(parent).map_err(|e| PipelineError::write(parent, e))?;
    }
    let basename = output_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    info!("Processing {}", local_path.display());
    let mut writer = RecordWriter::create(output_path)?;

    let written = FrameStream::open(local_path, camera).and_then(|frames| {
        for frame in frames {
            let frame = frame?;
            debug!(
                "{} frame {} at {} us with {} objects",
                basename,
                frame.index,
                frame.timestamp_micros,
                frame.annotations.len()
            );
            let filename = frame_filename(&basename, frame.index);
            let record = converter.convert(&filename, &frame.image, &frame.annotations)?;
            writer.append(&record.to_example())?;
        }
        Ok(())
    });

    match written {
        Ok(()) => writer.close(),
        Err(e) => {
            let kept = writer.records_written();
            if let Err(close_err) = writer.close() {
                warn!("Failed to close {}: {}", output_path.display(), close_err);
            } else if kept > 0 {
                warn!("Keeping {} records already written to {}", kept, output_path.display());
            }
            Err(e)
        }
    }
}
