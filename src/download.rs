//! Copy manifest entries into local scratch storage.

use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use crate::error::{PipelineError, Result};
use crate::utils::{ensure_directory, entry_basename};

/// Name of the scratch subdirectory holding downloaded files.
pub const RAW_DIR: &str = "raw";

/// Transport that copies one manifest entry to local storage.
pub trait Fetcher: Send + Sync {
    /// Copy `remote_path` into a fresh subdirectory of `dest_dir/raw/` and
    /// hand the local copy to the caller.
    fn fetch(&self, remote_path: &str, dest_dir: &Path) -> Result<RawFile>;
}

/// Fetches `gs://` objects with `gsutil cp` and everything else from the
/// local filesystem (`file://` URLs or plain paths).
#[derive(Debug, Clone)]
pub struct Downloader {
    gsutil: PathBuf,
}

impl Default for Downloader {
    fn default() -> Self {
        Self {
            gsutil: PathBuf::from("gsutil"),
        }
    }
}

impl Downloader {
    pub fn new(gsutil: impl Into<PathBuf>) -> Self {
        Self {
            gsutil: gsutil.into(),
        }
    }

    fn copy_with_gsutil(&self, remote_path: &str, local_path: &Path) -> std::result::Result<(), String> {
        let output = Command::new(&self.gsutil)
            .arg("-q")
            .arg("cp")
            .arg(remote_path)
            .arg(local_path)
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.gsutil.display(), e))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!("gsutil exited with {}: {}", output.status, stderr.trim()))
        }
    }
}

impl Fetcher for Downloader {
    fn fetch(&self, remote_path: &str, dest_dir: &Path) -> Result<RawFile> {
        let failure = |reason: String| PipelineError::Download {
            remote: remote_path.to_string(),
            reason,
        };

        let raw_dir = dest_dir.join(RAW_DIR);
        let scratch = ensure_directory(&raw_dir)
            .and_then(|raw_dir| tempfile::Builder::new().prefix("fetch-").tempdir_in(raw_dir))
            .map_err(|e| failure(format!("cannot create scratch directory in {}: {}", raw_dir.display(), e)))?;
        let local_path = scratch.path().join(entry_basename(remote_path));

        info!("Downloading {}", remote_path);
        let copied = if remote_path.starts_with("gs://") {
            self.copy_with_gsutil(remote_path, &local_path)
        } else {
            let source = remote_path.strip_prefix("file://").unwrap_or(remote_path);
            fs::copy(source, &local_path)
                .map(|bytes| debug!("Copied {} bytes from {}", bytes, source))
                .map_err(|e| format!("cannot copy {}: {}", source, e))
        };

        let copied = copied.and_then(|_| {
            if local_path.is_file() {
                Ok(())
            } else {
                Err(format!("{} was not created", local_path.display()))
            }
        });

        if let Err(reason) = copied {
            error!("Could not download file {}: {}", remote_path, reason);
            remove_scratch(scratch);
            return Err(failure(reason));
        }

        Ok(RawFile::new(local_path, scratch))
    }
}

/// A downloaded file owned by exactly one task.
///
/// The file and its scratch directory are removed from disk when dropped.
#[derive(Debug)]
pub struct RawFile {
    path: PathBuf,
    scratch: Option<TempDir>,
}

impl RawFile {
    pub fn new(path: PathBuf, scratch: TempDir) -> Self {
        Self {
            path,
            scratch: Some(scratch),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        info!("Deleting {}", self.path.display());
        if let Some(scratch) = self.scratch.take() {
            remove_scratch(scratch);
        }
    }
}

fn remove_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!("Failed to delete {}: {}", path.display(), e);
    }
}
