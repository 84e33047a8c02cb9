//! Protobuf messages read and written by the pipeline.
//!
//! Only the fields the converter needs are declared. Unknown fields present in
//! real segment files are skipped by the decoder.

/// `tf.train.Example` and its feature containers.
pub mod example {
    use std::collections::BTreeMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BytesList {
        #[prost(bytes = "vec", repeated, tag = "1")]
        pub value: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FloatList {
        #[prost(float, repeated, tag = "1")]
        pub value: Vec<f32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Int64List {
        #[prost(int64, repeated, tag = "1")]
        pub value: Vec<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Feature {
        #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
        pub kind: Option<feature::Kind>,
    }

    pub mod feature {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Kind {
            #[prost(message, tag = "1")]
            BytesList(super::BytesList),
            #[prost(message, tag = "2")]
            FloatList(super::FloatList),
            #[prost(message, tag = "3")]
            Int64List(super::Int64List),
        }
    }

    // Ordered so that the encoded bytes do not depend on hashing.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Features {
        #[prost(btree_map = "string, message", tag = "1")]
        pub feature: BTreeMap<String, Feature>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Example {
        #[prost(message, optional, tag = "1")]
        pub features: Option<Features>,
    }

    impl Feature {
        pub fn int64(value: i64) -> Self {
            Self::int64_list(vec![value])
        }

        pub fn int64_list(value: Vec<i64>) -> Self {
            Feature {
                kind: Some(feature::Kind::Int64List(Int64List { value })),
            }
        }

        pub fn bytes(value: Vec<u8>) -> Self {
            Self::bytes_list(vec![value])
        }

        pub fn bytes_list(value: Vec<Vec<u8>>) -> Self {
            Feature {
                kind: Some(feature::Kind::BytesList(BytesList { value })),
            }
        }

        pub fn float_list(value: Vec<f32>) -> Self {
            Feature {
                kind: Some(feature::Kind::FloatList(FloatList { value })),
            }
        }
    }

    impl Example {
        /// Look up a feature by key.
        pub fn get(&self, key: &str) -> Option<&Feature> {
            self.features.as_ref()?.feature.get(key)
        }
    }
}

/// Subset of the Waymo Open Dataset `Frame` schema.
pub mod waymo {
    /// Camera identifiers (`CameraName.Name`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum CameraName {
        Unknown = 0,
        Front = 1,
        FrontLeft = 2,
        FrontRight = 3,
        SideLeft = 4,
        SideRight = 5,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Context {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CameraImage {
        #[prost(enumeration = "CameraName", tag = "1")]
        pub name: i32,
        #[prost(bytes = "vec", tag = "2")]
        pub image: Vec<u8>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LabelBox {
        #[prost(double, tag = "1")]
        pub center_x: f64,
        #[prost(double, tag = "2")]
        pub center_y: f64,
        #[prost(double, tag = "3")]
        pub center_z: f64,
        #[prost(double, tag = "4")]
        pub width: f64,
        #[prost(double, tag = "5")]
        pub length: f64,
        #[prost(double, tag = "6")]
        pub height: f64,
        #[prost(double, tag = "7")]
        pub heading: f64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Label {
        #[prost(message, optional, tag = "1")]
        pub r#box: Option<LabelBox>,
        #[prost(int32, tag = "3")]
        pub r#type: i32,
        #[prost(string, tag = "4")]
        pub id: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CameraLabels {
        #[prost(enumeration = "CameraName", tag = "1")]
        pub name: i32,
        #[prost(message, repeated, tag = "2")]
        pub labels: Vec<Label>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Frame {
        #[prost(message, optional, tag = "1")]
        pub context: Option<Context>,
        #[prost(int64, tag = "2")]
        pub timestamp_micros: i64,
        #[prost(message, repeated, tag = "4")]
        pub images: Vec<CameraImage>,
        #[prost(message, repeated, tag = "8")]
        pub camera_labels: Vec<CameraLabels>,
    }
}
