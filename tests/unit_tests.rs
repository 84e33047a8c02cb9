use approx::assert_abs_diff_eq;
use image::{ImageFormat, RgbImage};
use prost::Message;
use std::io::Cursor;
use std::sync::Arc;

use waymo2tfrecord::config::validate_count;
use waymo2tfrecord::conversion::{
    convert_with_policy, frame_filename, image_dimensions, normalize_box,
};
use waymo2tfrecord::frame_stream::parse_frame;
use waymo2tfrecord::protos::example::{feature::Kind, Example};
use waymo2tfrecord::protos::waymo::{self, CameraName};
use waymo2tfrecord::utils::{entry_basename, infer_image_format};
use waymo2tfrecord::{
    convert, Annotation, AnnotationConverter, BoxPolicy, LabelMap, Manifest, PipelineError,
    RecordReader, RecordWriter,
};

fn label_map() -> LabelMap {
    LabelMap::from_pairs(vec![(1, "vehicle"), (2, "pedestrian"), (4, "cyclist")]).unwrap()
}

fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::new(width, height);
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

fn annotation(center_x: f64, center_y: f64, length: f64, width: f64, class_id: i64) -> Annotation {
    Annotation {
        center_x,
        center_y,
        length,
        width,
        class_id,
    }
}

#[test]
fn test_infer_image_format() {
    let jpg_bytes = vec![0xFF, 0xD8, 0xFF];
    let png_bytes = vec![0x89, b'P', b'N', b'G'];
    let bmp_bytes = vec![b'B', b'M'];
    let gif_bytes = vec![0x47, 0x49, 0x46];
    let unknown_bytes = vec![0x00, 0x00, 0x00];

    assert_eq!(infer_image_format(&jpg_bytes), Some("jpeg"));
    assert_eq!(infer_image_format(&png_bytes), Some("png"));
    assert_eq!(infer_image_format(&bmp_bytes), Some("bmp"));
    assert_eq!(infer_image_format(&gif_bytes), Some("gif"));
    assert_eq!(infer_image_format(&unknown_bytes), None);
}

#[test]
fn test_validate_count() {
    assert_eq!(validate_count("100"), Ok(100));
    assert_eq!(validate_count("1"), Ok(1));
    assert!(validate_count("0").is_err());
    assert!(validate_count("-3").is_err());
    assert!(validate_count("abc").is_err());
}

#[test]
fn test_image_dimensions() {
    let png = image_bytes(200, 100, ImageFormat::Png);
    assert_eq!(image_dimensions(&png), Ok((100, 200)));

    let jpeg = image_bytes(64, 48, ImageFormat::Jpeg);
    assert_eq!(image_dimensions(&jpeg), Ok((48, 64)));

    assert!(image_dimensions(b"definitely not an image").is_err());
}

#[test]
fn test_convert_single_pedestrian() {
    let image = image_bytes(200, 100, ImageFormat::Png);
    let annotations = [annotation(100.0, 50.0, 40.0, 20.0, 2)];

    let record = convert("segment_0.tfrecord", &image, &annotations, &label_map()).unwrap();

    assert_eq!(record.height, 100);
    assert_eq!(record.width, 200);
    assert_abs_diff_eq!(record.xmins[0], 0.40, epsilon = 1e-12);
    assert_abs_diff_eq!(record.xmaxs[0], 0.60, epsilon = 1e-12);
    assert_abs_diff_eq!(record.ymins[0], 0.40, epsilon = 1e-12);
    assert_abs_diff_eq!(record.ymaxs[0], 0.60, epsilon = 1e-12);
    assert_eq!(record.classes, vec![2]);
    assert_eq!(record.classes_text, vec!["pedestrian".to_string()]);
    assert_eq!(record.filename, "segment_0.tfrecord");
    assert_eq!(record.source_id, "segment_0.tfrecord");
    assert_eq!(record.image_format, "png");
    assert_eq!(record.encoded_image, image);
}

#[test]
fn test_convert_tall_box_matches_formula() {
    let image = image_bytes(200, 100, ImageFormat::Png);
    let annotations = [annotation(100.0, 50.0, 40.0, 40.0, 2)];

    let record = convert("frame", &image, &annotations, &label_map()).unwrap();

    assert_abs_diff_eq!(record.xmins[0], 0.40, epsilon = 1e-12);
    assert_abs_diff_eq!(record.xmaxs[0], 0.60, epsilon = 1e-12);
    assert_abs_diff_eq!(record.ymins[0], 0.30, epsilon = 1e-12);
    assert_abs_diff_eq!(record.ymaxs[0], 0.70, epsilon = 1e-12);
}

#[test]
fn test_convert_without_annotations() {
    let image = image_bytes(32, 16, ImageFormat::Jpeg);

    let record = convert("empty", &image, &[], &label_map()).unwrap();

    assert_eq!(record.num_objects(), 0);
    assert!(record.xmins.is_empty());
    assert!(record.xmaxs.is_empty());
    assert!(record.ymins.is_empty());
    assert!(record.ymaxs.is_empty());
    assert!(record.classes.is_empty());
    assert!(record.classes_text.is_empty());
    assert_eq!(record.image_format, "jpeg");
}

#[test]
fn test_convert_keeps_annotation_order() {
    let image = image_bytes(100, 100, ImageFormat::Png);
    let label_map = label_map();
    let annotations = [
        annotation(10.0, 10.0, 10.0, 10.0, 4),
        annotation(50.0, 50.0, 20.0, 10.0, 1),
        annotation(90.0, 30.0, 4.0, 8.0, 2),
    ];

    let record = convert("frame", &image, &annotations, &label_map).unwrap();

    assert_eq!(record.classes, vec![4, 1, 2]);
    assert_eq!(record.classes_text, vec!["cyclist", "vehicle", "pedestrian"]);
    for (i, class_id) in record.classes.iter().enumerate() {
        assert_eq!(Some(record.classes_text[i].as_str()), label_map.name(*class_id));
    }
    for len in [
        record.xmins.len(),
        record.xmaxs.len(),
        record.ymins.len(),
        record.ymaxs.len(),
        record.classes_text.len(),
    ] {
        assert_eq!(len, 3);
    }
    assert_abs_diff_eq!(record.xmins[1], 0.40, epsilon = 1e-12);
    assert_abs_diff_eq!(record.ymaxs[2], 0.34, epsilon = 1e-12);
}

#[test]
fn test_convert_unknown_class() {
    let image = image_bytes(100, 100, ImageFormat::Png);
    let annotations = [
        annotation(10.0, 10.0, 5.0, 5.0, 1),
        annotation(10.0, 10.0, 5.0, 5.0, 3),
    ];

    let err = convert("frame", &image, &annotations, &label_map()).unwrap_err();

    assert!(matches!(err, PipelineError::UnknownClass { class_id: 3 }));
    assert_eq!(err.kind(), "unknown_class");
}

#[test]
fn test_convert_invalid_image() {
    let annotations = [annotation(10.0, 10.0, 5.0, 5.0, 1)];

    let err = convert("frame", b"\x00\x01\x02", &annotations, &label_map()).unwrap_err();

    assert!(matches!(err, PipelineError::Decode { .. }));
}

#[test]
fn test_boxes_past_the_border() {
    let image = image_bytes(100, 50, ImageFormat::Png);
    let annotations = [annotation(95.0, 2.0, 20.0, 10.0, 1)];

    let passed = convert("frame", &image, &annotations, &label_map()).unwrap();
    assert_abs_diff_eq!(passed.xmaxs[0], 1.05, epsilon = 1e-12);
    assert_abs_diff_eq!(passed.ymins[0], -0.06, epsilon = 1e-12);

    let clamped =
        convert_with_policy("frame", &image, &annotations, &label_map(), BoxPolicy::Clamp).unwrap();
    assert_eq!(clamped.xmaxs[0], 1.0);
    assert_eq!(clamped.ymins[0], 0.0);
    assert_abs_diff_eq!(clamped.xmins[0], 0.85, epsilon = 1e-12);
}

#[test]
fn test_normalize_box() {
    let coords = normalize_box(
        &annotation(300.0, 200.0, 60.0, 40.0, 1),
        1920,
        1280,
        BoxPolicy::PassThrough,
    );

    assert_eq!(coords[0], (300.0 - 30.0) / 1920.0);
    assert_eq!(coords[1], (300.0 + 30.0) / 1920.0);
    assert_eq!(coords[2], (200.0 - 20.0) / 1280.0);
    assert_eq!(coords[3], (200.0 + 20.0) / 1280.0);
}

#[test]
fn test_annotation_converter_shares_label_map() {
    let converter = AnnotationConverter::new(Arc::new(label_map()), BoxPolicy::PassThrough);
    let image = image_bytes(200, 100, ImageFormat::Png);

    let record = converter
        .convert("frame", &image, &[annotation(100.0, 50.0, 40.0, 20.0, 1)])
        .unwrap();

    assert_eq!(record.classes_text, vec!["vehicle"]);
    assert_eq!(converter.label_map().len(), 3);
}

#[test]
fn test_to_example_features() {
    let image = image_bytes(200, 100, ImageFormat::Png);
    let record = convert(
        "segment_7.tfrecord",
        &image,
        &[annotation(100.0, 50.0, 40.0, 20.0, 2)],
        &label_map(),
    )
    .unwrap();

    let example = record.to_example();

    let kind = |key: &str| example.get(key).and_then(|f| f.kind.clone()).unwrap();
    assert_eq!(kind("image/height"), Kind::Int64List(waymo2tfrecord::protos::example::Int64List { value: vec![100] }));
    assert_eq!(kind("image/width"), Kind::Int64List(waymo2tfrecord::protos::example::Int64List { value: vec![200] }));
    match kind("image/object/bbox/xmin") {
        Kind::FloatList(list) => assert_eq!(list.value, vec![0.4f32]),
        other => panic!("unexpected feature {:?}", other),
    }
    match kind("image/object/class/text") {
        Kind::BytesList(list) => assert_eq!(list.value, vec![b"pedestrian".to_vec()]),
        other => panic!("unexpected feature {:?}", other),
    }
    match kind("image/format") {
        Kind::BytesList(list) => assert_eq!(list.value, vec![b"png".to_vec()]),
        other => panic!("unexpected feature {:?}", other),
    }
    assert_eq!(example.features.as_ref().unwrap().feature.len(), 12);

    // Encoding is deterministic and decodes back to the same message
    let bytes = example.encode_to_vec();
    assert_eq!(bytes, record.to_example().encode_to_vec());
    assert_eq!(Example::decode(bytes.as_slice()).unwrap(), example);
}

#[test]
fn test_frame_filename() {
    assert_eq!(
        frame_filename("segment-1005_with_camera_labels.tfrecord", 3),
        "segment-1005_with_camera_labels_3.tfrecord"
    );
    assert_eq!(frame_filename("segment.bin", 0), "segment.bin_0");
}

#[test]
fn test_label_map_from_pbtxt() {
    let content = r#"
        # classes used for training
        item {
          id: 1
          name: 'vehicle'
        }
        item {
          id: 2
          name: "pedestrian"
          display_name: "Pedestrian"
        }
        item { id: 4 name: 'cyclist' }
    "#;

    let label_map = LabelMap::from_pbtxt_str(content).unwrap();

    assert_eq!(label_map, self::label_map());
    assert_eq!(label_map.name(4), Some("cyclist"));
    assert_eq!(label_map.id("pedestrian"), Some(2));
    assert_eq!(label_map.name(3), None);
    assert_eq!(
        label_map.iter().collect::<Vec<_>>(),
        vec![(1, "vehicle"), (2, "pedestrian"), (4, "cyclist")]
    );
}

#[test]
fn test_label_map_rejects_invalid_pbtxt() {
    assert!(LabelMap::from_pbtxt_str("item { id: 1 name: 'a' } item { id: 1 name: 'b' }").is_err());
    assert!(LabelMap::from_pbtxt_str("item { id: 1 name: 'a' } item { id: 2 name: 'a' }").is_err());
    assert!(LabelMap::from_pbtxt_str("item { name: 'a' }").is_err());
    assert!(LabelMap::from_pbtxt_str("item { id: one name: 'a' }").is_err());
    assert!(LabelMap::from_pbtxt_str("item { id: 1 name: 'a'").is_err());
    assert!(LabelMap::from_pbtxt_str("label { id: 1 name: 'a' }").is_err());
}

#[test]
fn test_label_map_from_json() {
    let items = r#"{"items": [{"id": 1, "name": "vehicle"}, {"id": 2, "name": "pedestrian"}, {"id": 4, "name": "cyclist"}]}"#;
    let flat = r#"{"1": "vehicle", "2": "pedestrian", "4": "cyclist"}"#;

    assert_eq!(LabelMap::from_json_str(items).unwrap(), label_map());
    assert_eq!(LabelMap::from_json_str(flat).unwrap(), label_map());
    assert!(LabelMap::from_json_str(r#"{"x": "vehicle"}"#).is_err());
}

#[test]
fn test_label_map_load() {
    let temp_dir = tempfile::tempdir().unwrap();
    let pbtxt = temp_dir.path().join("label_map.pbtxt");
    std::fs::write(&pbtxt, "item { id: 1 name: 'vehicle' }\n").unwrap();
    let empty = temp_dir.path().join("empty.pbtxt");
    std::fs::write(&empty, "# nothing here\n").unwrap();

    assert_eq!(LabelMap::load(&pbtxt).unwrap().name(1), Some("vehicle"));
    assert!(matches!(
        LabelMap::load(&empty),
        Err(PipelineError::LabelMap { .. })
    ));
    assert!(matches!(
        LabelMap::load(&temp_dir.path().join("missing.pbtxt")),
        Err(PipelineError::LabelMap { .. })
    ));
}

#[test]
fn test_manifest_from_lines() {
    let manifest = Manifest::from_lines(
        "gs://bucket/a.tfrecord\n\n  gs://bucket/b.tfrecord  \ngs://bucket/a.tfrecord\n",
    );

    assert_eq!(
        manifest.entries(),
        &[
            "gs://bucket/a.tfrecord".to_string(),
            "gs://bucket/b.tfrecord".to_string(),
            "gs://bucket/a.tfrecord".to_string(),
        ]
    );
    assert_eq!(manifest.batch(2).len(), 2);
    assert_eq!(manifest.batch(100).len(), 3);
    assert!(manifest.batch(0).is_empty());
}

#[test]
fn test_entry_basename() {
    assert_eq!(
        entry_basename("gs://waymo_open_dataset_v_1_2_0_individual_files/training/segment-1.tfrecord"),
        "segment-1.tfrecord"
    );
    assert_eq!(entry_basename("/data/raw/segment-2.tfrecord"), "segment-2.tfrecord");
    assert_eq!(entry_basename("segment-3.tfrecord"), "segment-3.tfrecord");
}

#[test]
fn test_record_framing_layout() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("layout.tfrecord");
    let mut writer = RecordWriter::create(&path).unwrap();
    writer.write_record(b"payload".to_vec()).unwrap();
    assert_eq!(writer.records_written(), 1);
    writer.close().unwrap();

    // u64 length, u32 length checksum, payload, u32 payload checksum
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 8 + 4 + 7 + 4);
    assert_eq!(u64::from_le_bytes(bytes[..8].try_into().unwrap()), 7);
    assert_eq!(&bytes[12..19], b"payload");
}

#[test]
fn test_record_reader_detects_corruption() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("records.tfrecord");
    let mut writer = RecordWriter::create(&path).unwrap();
    writer.write_record(b"first".to_vec()).unwrap();
    writer.write_record(b"second".to_vec()).unwrap();
    assert_eq!(writer.close().unwrap(), 2);

    let records: Vec<_> = RecordReader::open(&path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records, vec![b"first".to_vec(), b"second".to_vec()]);

    // Flip one payload byte of the second record
    let mut bytes = std::fs::read(&path).unwrap();
    let second_payload = 8 + 4 + 5 + 4 + 8 + 4;
    bytes[second_payload] ^= 0xFF;
    let corrupt = temp_dir.path().join("corrupt.tfrecord");
    std::fs::write(&corrupt, &bytes).unwrap();
    let mut reader = RecordReader::open(&corrupt).unwrap();
    assert!(reader.next().unwrap().is_ok());
    assert!(matches!(reader.next(), Some(Err(PipelineError::Decode { .. }))));
    assert!(reader.next().is_none());

    // Cut the file in the middle of the second record
    bytes.truncate(second_payload + 2);
    let truncated = temp_dir.path().join("truncated.tfrecord");
    std::fs::write(&truncated, &bytes).unwrap();
    let mut reader = RecordReader::open(&truncated).unwrap();
    assert!(reader.next().unwrap().is_ok());
    assert!(matches!(reader.next(), Some(Err(PipelineError::Decode { .. }))));
}

#[test]
fn test_parse_frame_selects_camera() {
    let label = |class_id: i32, center_x: f64| waymo::Label {
        r#box: Some(waymo::LabelBox {
            center_x,
            center_y: 20.0,
            length: 8.0,
            width: 4.0,
            ..Default::default()
        }),
        r#type: class_id,
        id: format!("object-{}", class_id),
    };
    let frame = waymo::Frame {
        context: Some(waymo::Context {
            name: "segment".to_string(),
        }),
        timestamp_micros: 1_550_000_000,
        images: vec![
            waymo::CameraImage {
                name: CameraName::SideLeft as i32,
                image: vec![1],
            },
            waymo::CameraImage {
                name: CameraName::Front as i32,
                image: vec![2],
            },
        ],
        camera_labels: vec![
            waymo::CameraLabels {
                name: CameraName::SideLeft as i32,
                labels: vec![label(4, 1.0)],
            },
            waymo::CameraLabels {
                name: CameraName::Front as i32,
                labels: vec![label(1, 10.0), label(2, 30.0)],
            },
        ],
    };

    let parsed = parse_frame(frame.clone(), CameraName::Front, 5).unwrap();
    assert_eq!(parsed.index, 5);
    assert_eq!(parsed.timestamp_micros, 1_550_000_000);
    assert_eq!(parsed.image, vec![2]);
    assert_eq!(
        parsed.annotations,
        vec![annotation(10.0, 20.0, 8.0, 4.0, 1), annotation(30.0, 20.0, 8.0, 4.0, 2)]
    );

    assert!(parse_frame(frame, CameraName::FrontRight, 0).is_err());
}
