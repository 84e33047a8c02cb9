//! Waymo Open Dataset to TF Object Detection API converter
//!
//! This library downloads Waymo segment files, decodes their camera frames and
//! writes one TFRecord of `tf.train.Example` records per segment, ready for
//! object detection training.

pub mod config;
pub mod conversion;
pub mod download;
pub mod error;
pub mod frame_stream;
pub mod io;
pub mod label_map;
pub mod orchestrator;
pub mod pipeline;
pub mod protos;
pub mod tfrecord;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use config::{Args, Camera};
pub use conversion::{convert, AnnotationConverter, BoxPolicy};
pub use download::{Downloader, Fetcher, RawFile};
pub use error::PipelineError;
pub use frame_stream::FrameStream;
pub use io::{setup_output_directories, write_report, Manifest, OutputDirs};
pub use label_map::LabelMap;
pub use orchestrator::{Orchestrator, TaskHandle, TaskQueue};
pub use pipeline::{process_entry, OutputLocks, TaskContext};
pub use tfrecord::{RecordReader, RecordWriter};
pub use types::{Annotation, ConvertedRecord, Frame, ProcessingStats, TaskOutcome};
