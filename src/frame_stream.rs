use log::debug;
use prost::Message;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::protos::waymo::{self, CameraName};
use crate::tfrecord::RecordReader;
use crate::types::{Annotation, Frame};

/// Lazy, single-pass sequence of decoded frames from one segment file.
///
/// Yields at most one error, after which the stream is exhausted.
pub struct FrameStream {
    records: RecordReader,
    camera: CameraName,
    context: String,
    index: usize,
    failed: bool,
}

impl FrameStream {
    pub fn open(path: &Path, camera: CameraName) -> Result<Self> {
        debug!("Opening frame stream over {}", path.display());
        Ok(Self {
            records: RecordReader::open(path)?,
            camera,
            context: path.display().to_string(),
            index: 0,
            failed: false,
        })
    }

    fn decode(&self, data: &[u8]) -> Result<Frame> {
        let context = || format!("{} frame {}", self.context, self.index);
        let frame = waymo::Frame::decode(data).map_err(|e| PipelineError::decode(context(), e))?;
        parse_frame(frame, self.camera, self.index).map_err(|reason| PipelineError::decode(context(), reason))
    }
}

impl Iterator for FrameStream {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let decoded = match self.records.next()? {
            Ok(data) => self.decode(&data),
            Err(e) => Err(e),
        };
        match decoded {
            Ok(frame) => {
                self.index += 1;
                Some(Ok(frame))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Extract the image and camera labels of `camera` from a decoded frame.
pub fn parse_frame(
    frame: waymo::Frame,
    camera: CameraName,
    index: usize,
) -> std::result::Result<Frame, String> {
    let camera_id = camera as i32;

    let image = frame
        .images
        .into_iter()
        .find(|image| image.name == camera_id)
        .map(|image| image.image)
        .ok_or_else(|| format!("no {:?} camera image in frame", camera))?;

    let labels = frame
        .camera_labels
        .into_iter()
        .find(|labels| labels.name == camera_id)
        .map(|labels| labels.labels)
        .unwrap_or_default();

    let annotations = labels
        .iter()
        .map(|label| {
            let label_box = label
                .r#box
                .as_ref()
                .ok_or_else(|| format!("label '{}' has no box", label.id))?;
            Ok(Annotation {
                center_x: label_box.center_x,
                center_y: label_box.center_y,
                length: label_box.length,
                width: label_box.width,
                class_id: label.r#type as i64,
            })
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;

    Ok(Frame {
        index,
        timestamp_micros: frame.timestamp_micros,
        image,
        annotations,
    })
}
