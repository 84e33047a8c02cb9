use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};

/// Helper function to infer the `image/format` tag from image bytes
pub fn infer_image_format(image_bytes: &[u8]) -> Option<&'static str> {
    if image_bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpeg")
    } else if image_bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("png")
    } else if image_bytes.starts_with(b"BM") {
        Some("bmp")
    } else if image_bytes.starts_with(&[0x47, 0x49, 0x46]) {
        Some("gif")
    } else {
        None
    }
}

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}}) {{msg}}",
                label
            ))
            .progress_chars("#>-"),
    );
    pb
}

/// Create a directory (and parents) if it does not exist yet and return its path
pub fn ensure_directory(path: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

/// Build a rayon pool with a fixed number of workers, defaulting to the CPU count
pub fn create_io_thread_pool(workers: Option<usize>) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    let num_threads = workers.filter(|&n| n > 0).unwrap_or_else(num_cpus::get);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|index| format!("waymo2tfrecord-worker-{}", index))
        .build()
}

/// Local file name for a manifest entry: the last path segment, sanitized.
pub fn entry_basename(remote_path: &str) -> String {
    let trimmed = remote_path.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let sanitized = sanitize_filename::sanitize(name);
    if sanitized.is_empty() {
        "unnamed.tfrecord".to_string()
    } else {
        sanitized
    }
}
