pub use detector::{ClassPalette, Detector, DetectorError};
pub use record::{
    decode_reply, encode_reply, BoundingBox, Detection, DetectionTuple, ValidationError,
    VECTOR_LEN,
};
#[cfg(feature = "onnx")]
pub use yolo::{YoloV8Detector, COCO_CLASSES};

mod detector;
mod record;
#[cfg(feature = "onnx")]
mod yolo;
