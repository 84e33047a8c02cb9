use image::ImageReader;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::label_map::LabelMap;
use crate::protos::example::{Example, Feature, Features};
use crate::types::{Annotation, ConvertedRecord};
use crate::utils::infer_image_format;

/// How normalized coordinates outside `[0, 1]` are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoxPolicy {
    /// Keep values as computed, even past the image border.
    #[default]
    PassThrough,
    /// Clamp every coordinate to `[0, 1]`.
    Clamp,
}

/// Converts frames of one input file into records, sharing a read-only label map.
#[derive(Debug, Clone)]
pub struct AnnotationConverter {
    label_map: Arc<LabelMap>,
    policy: BoxPolicy,
}

impl AnnotationConverter {
    pub fn new(label_map: Arc<LabelMap>, policy: BoxPolicy) -> Self {
        Self { label_map, policy }
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.label_map
    }

    pub fn convert(
        &self,
        filename: &str,
        image_bytes: &[u8],
        annotations: &[Annotation],
    ) -> Result<ConvertedRecord> {
        convert_with_policy(filename, image_bytes, annotations, &self.label_map, self.policy)
    }
}

/// Convert one frame with the default pass-through box policy.
pub fn convert(
    filename: &str,
    image_bytes: &[u8],
    annotations: &[Annotation],
    label_map: &LabelMap,
) -> Result<ConvertedRecord> {
    convert_with_policy(
        filename,
        image_bytes,
        annotations,
        label_map,
        BoxPolicy::PassThrough,
    )
}

/// Convert one frame's image and annotations into a [`ConvertedRecord`].
///
/// Fails with a decode error if `image_bytes` is not a readable image, and
/// with an unknown-class error if any annotation's class id is missing from
/// `label_map`.
pub fn convert_with_policy(
    filename: &str,
    image_bytes: &[u8],
    annotations: &[Annotation],
    label_map: &LabelMap,
    policy: BoxPolicy,
) -> Result<ConvertedRecord> {
    let (height, width) = image_dimensions(image_bytes)
        .map_err(|e| PipelineError::decode(format!("image of {}", filename), e))?;

    let count = annotations.len();
    let mut xmins = Vec::with_capacity(count);
    let mut xmaxs = Vec::with_capacity(count);
    let mut ymins = Vec::with_capacity(count);
    let mut ymaxs = Vec::with_capacity(count);
    let mut classes_text = Vec::with_capacity(count);
    let mut classes = Vec::with_capacity(count);

    for annotation in annotations {
        let class_name = label_map
            .name(annotation.class_id)
            .ok_or(PipelineError::UnknownClass {
                class_id: annotation.class_id,
            })?;
        let [xmin, xmax, ymin, ymax] = normalize_box(annotation, width, height, policy);
        xmins.push(xmin);
        xmaxs.push(xmax);
        ymins.push(ymin);
        ymaxs.push(ymax);
        classes_text.push(class_name.to_string());
        classes.push(annotation.class_id);
    }

    Ok(ConvertedRecord {
        filename: filename.to_string(),
        source_id: filename.to_string(),
        encoded_image: image_bytes.to_vec(),
        image_format: infer_image_format(image_bytes)
            .unwrap_or("jpeg")
            .to_string(),
        height,
        width,
        xmins,
        xmaxs,
        ymins,
        ymaxs,
        classes_text,
        classes,
    })
}

/// Normalize a center/extent box to `[xmin, xmax, ymin, ymax]`.
pub fn normalize_box(annotation: &Annotation, width: u32, height: u32, policy: BoxPolicy) -> [f64; 4] {
    let width = width as f64;
    let height = height as f64;
    let half_length = annotation.length / 2.0;
    let half_width = annotation.width / 2.0;

    let coords = [
        (annotation.center_x - half_length) / width,
        (annotation.center_x + half_length) / width,
        (annotation.center_y - half_width) / height,
        (annotation.center_y + half_width) / height,
    ];

    match policy {
        BoxPolicy::PassThrough => coords,
        BoxPolicy::Clamp => coords.map(|v| v.clamp(0.0, 1.0)),
    }
}

/// Read only the image header and return `(height, width)`.
pub fn image_dimensions(image_bytes: &[u8]) -> std::result::Result<(u32, u32), String> {
    let reader = ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    let (width, height) = reader.into_dimensions().map_err(|e| e.to_string())?;
    if width == 0 || height == 0 {
        return Err(format!("image has empty dimensions {}x{}", width, height));
    }
    Ok((height, width))
}

/// Synthetic per-frame filename: `segment.tfrecord` becomes `segment_<index>.tfrecord`.
pub fn frame_filename(basename: &str, index: usize) -> String {
    match basename.strip_suffix(".tfrecord") {
        Some(stem) => format!("{}_{}.tfrecord", stem, index),
        None => format!("{}_{}", basename, index),
    }
}

impl ConvertedRecord {
    /// Build a `tf.train.Example` using the TF Object Detection API feature keys.
    pub fn to_example(&self) -> Example {
        let mut feature = BTreeMap::new();
        let to_f32 = |values: &[f64]| values.iter().map(|&v| v as f32).collect::<Vec<_>>();

        feature.insert("image/height".to_string(), Feature::int64(self.height as i64));
        feature.insert("image/width".to_string(), Feature::int64(self.width as i64));
        feature.insert(
            "image/filename".to_string(),
            Feature::bytes(self.filename.as_bytes().to_vec()),
        );
        feature.insert(
            "image/source_id".to_string(),
            Feature::bytes(self.source_id.as_bytes().to_vec()),
        );
        feature.insert(
            "image/encoded".to_string(),
            Feature::bytes(self.encoded_image.clone()),
        );
        feature.insert(
            "image/format".to_string(),
            Feature::bytes(self.image_format.as_bytes().to_vec()),
        );
        feature.insert(
            "image/object/bbox/xmin".to_string(),
            Feature::float_list(to_f32(&self.xmins)),
        );
        feature.insert(
            "image/object/bbox/xmax".to_string(),
            Feature::float_list(to_f32(&self.xmaxs)),
        );
        feature.insert(
            "image/object/bbox/ymin".to_string(),
            Feature::float_list(to_f32(&self.ymins)),
        );
        feature.insert(
            "image/object/bbox/ymax".to_string(),
            Feature::float_list(to_f32(&self.ymaxs)),
        );
        feature.insert(
            "image/object/class/text".to_string(),
            Feature::bytes_list(
                self.classes_text
                    .iter()
                    .map(|text| text.as_bytes().to_vec())
                    .collect(),
            ),
        );
        feature.insert(
            "image/object/class/label".to_string(),
            Feature::int64_list(self.classes.clone()),
        );

        Example {
            features: Some(Features { feature }),
        }
    }
}
