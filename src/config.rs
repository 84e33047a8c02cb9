use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::str::FromStr;

use crate::conversion::BoxPolicy;
use crate::protos::waymo::CameraName;

/// Number of manifest entries processed when `--batch_size` is not given.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Command-line arguments for downloading and converting Waymo segments.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory receiving the converted records (written under `processed/`)
    #[arg(long = "data_dir")]
    pub data_dir: PathBuf,

    /// Scratch directory for downloaded segments (written under `raw/`)
    #[arg(long = "temp_dir")]
    pub temp_dir: PathBuf,

    /// Newline-delimited list of segment paths to process
    #[arg(long = "manifest", default_value = "filenames.txt")]
    pub manifest: PathBuf,

    /// Label map file (`.pbtxt` or `.json`)
    #[arg(long = "label_map", default_value = "label_map.pbtxt")]
    pub label_map: PathBuf,

    /// Number of manifest entries to process, taken from the top
    #[arg(long = "batch_size", default_value_t = DEFAULT_BATCH_SIZE, value_parser = validate_count)]
    pub batch_size: usize,

    /// Number of parallel workers (defaults to the number of CPUs)
    #[arg(long = "workers", value_parser = validate_count)]
    pub workers: Option<usize>,

    /// Camera whose image and labels are converted
    #[arg(long = "camera", value_enum, default_value = "front")]
    pub camera: Camera,

    /// Clamp normalized box coordinates to [0, 1]
    #[arg(long = "clamp_boxes")]
    pub clamp_boxes: bool,

    /// gsutil executable used for `gs://` entries
    #[arg(long = "gsutil", default_value = "gsutil")]
    pub gsutil: PathBuf,

    /// Write a JSON report of every entry's outcome to this path
    #[arg(long = "report")]
    pub report: Option<PathBuf>,
}

impl Args {
    pub fn box_policy(&self) -> BoxPolicy {
        if self.clamp_boxes {
            BoxPolicy::Clamp
        } else {
            BoxPolicy::PassThrough
        }
    }
}

// Cameras that carry labeled images in a segment
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum Camera {
    Front,
    FrontLeft,
    FrontRight,
    SideLeft,
    SideRight,
}

impl From<Camera> for CameraName {
    fn from(camera: Camera) -> Self {
        match camera {
            Camera::Front => CameraName::Front,
            Camera::FrontLeft => CameraName::FrontLeft,
            Camera::FrontRight => CameraName::FrontRight,
            Camera::SideLeft => CameraName::SideLeft,
            Camera::SideRight => CameraName::SideRight,
        }
    }
}

// Validate that a count is a positive integer
pub fn validate_count(s: &str) -> Result<usize, String> {
    match usize::from_str(s) {
        Ok(val) if val > 0 => Ok(val),
        _ => Err("COUNT must be a positive integer".to_string()),
    }
}
