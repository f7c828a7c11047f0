//! YOLOv8 backend over ONNX Runtime.
//!
//! Expects the standard Ultralytics export: one input `[1, 3, S, S]` in RGB scaled
//! to `[0, 1]`, one output `[1, 4 + classes, candidates]` with boxes as
//! `(cx, cy, w, h)` in input pixels followed by per-class scores.

use std::fmt::Display;
use std::fs;
use std::sync::Mutex;

use image::{imageops::FilterType, DynamicImage, Rgb};
use ndarray::{s, Array4, ArrayViewD, Axis, IxDyn};
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::{BoundingBox, ClassPalette, Detection, Detector, DetectorError};
use crate::service::DetectorConfig;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class_id: usize,
}

impl Candidate {
    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = (self.x2 - self.x1) * (self.y2 - self.y1)
            + (other.x2 - other.x1) * (other.y2 - other.y1)
            - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

pub struct YoloV8Detector {
    // `Session::run` needs exclusive access
    session: Mutex<Session>,
    input_size: u32,
    iou_threshold: f32,
    max_detections: usize,
    palette: ClassPalette,
}

fn backend<E: Display>(err: E) -> DetectorError {
    DetectorError::Backend(err.to_string())
}

// highest scoring class, NaN scores never win
fn best_class(scores: impl Iterator<Item = (usize, f32)>) -> Option<(usize, f32)> {
    scores
        .filter(|(_, score)| !score.is_nan())
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

/// Widens a model score through its shortest decimal form, so `0.9f32` goes
/// out as `0.9` rather than `0.8999999761581421`.
fn wire_confidence(score: f32) -> f64 {
    let widened = score.to_string().parse::<f64>().unwrap_or(score as f64);
    widened.clamp(0.0, 1.0)
}

impl YoloV8Detector {
    pub fn load(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let model_bytes = fs::read(&config.model_path)
            .map_err(|e| DetectorError::ModelLoad(format!("{}: {}", config.model_path, e)))?;
        let session = Session::builder()
            .and_then(|builder| builder.with_intra_threads(4))
            .and_then(|builder| builder.commit_from_memory(&model_bytes))
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;
        debug!(model = %config.model_path, classes = COCO_CLASSES.len(), "yolo model loaded");

        Ok(YoloV8Detector {
            session: Mutex::new(session),
            input_size: config.input_size,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
            palette: ClassPalette::new(COCO_CLASSES, config.palette_seed),
        })
    }

    fn infer(&self, image: &DynamicImage, threshold: f32) -> Result<Vec<Candidate>, DetectorError> {
        let rgb = image.to_rgb8();
        let imgsz = self.input_size as usize;
        let resized =
            image::imageops::resize(&rgb, self.input_size, self.input_size, FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, imgsz, imgsz));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }
        let input_shape = vec![1, 3, imgsz as i64, imgsz as i64];
        let input_tensor =
            Tensor::from_array((input_shape, input.into_raw_vec())).map_err(backend)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::Backend("session lock poisoned".to_string()))?;
        let outputs = session.run(ort::inputs![input_tensor]).map_err(backend)?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(backend)?;

        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let array_view = ArrayViewD::from_shape(IxDyn(&dims), data).map_err(backend)?;
        let view = array_view.index_axis(Axis(0), 0);
        if view.ndim() != 2 || view.shape()[0] <= 4 {
            return Err(DetectorError::Backend(format!(
                "unexpected output shape {:?}",
                dims
            )));
        }

        let sx = rgb.width() as f32 / imgsz as f32;
        let sy = rgb.height() as f32 / imgsz as f32;
        let mut candidates = Vec::new();
        for i in 0..view.shape()[1] {
            let scores = view.slice(s![4.., i]);
            let Some((class_id, score)) = best_class(scores.indexed_iter().map(|(c, &v)| (c, v)))
            else {
                continue;
            };
            if score < threshold {
                continue;
            }
            let cx = view[[0, i]];
            let cy = view[[1, i]];
            let w = view[[2, i]];
            let h = view[[3, i]];
            candidates.push(Candidate {
                x1: ((cx - w / 2.0) * sx).clamp(0.0, rgb.width() as f32),
                y1: ((cy - h / 2.0) * sy).clamp(0.0, rgb.height() as f32),
                x2: ((cx + w / 2.0) * sx).clamp(0.0, rgb.width() as f32),
                y2: ((cy + h / 2.0) * sy).clamp(0.0, rgb.height() as f32),
                score,
                class_id,
            });
        }
        Ok(candidates)
    }

    // greedy per-class non-maximum suppression
    fn suppress(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
        let mut kept: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            if kept.len() >= self.max_detections {
                break;
            }
            let overlaps = kept.iter().any(|k| {
                k.class_id == candidate.class_id && k.iou(&candidate) > self.iou_threshold
            });
            if !overlaps {
                kept.push(candidate);
            }
        }
        kept
    }
}

impl Detector for YoloV8Detector {
    fn detect(
        &self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let candidates = self.infer(image, confidence_threshold)?;
        self.suppress(candidates)
            .into_iter()
            .map(|c| {
                let class_name = COCO_CLASSES.get(c.class_id).copied().unwrap_or("object");
                let bbox = BoundingBox::new(c.x1 as i32, c.y1 as i32, c.x2 as i32, c.y2 as i32);
                Detection::new(bbox, class_name, wire_confidence(c.score)).map_err(backend)
            })
            .collect()
    }

    fn color_for_class(&self, class_name: &str) -> Option<Rgb<u8>> {
        self.palette.color(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_class_skips_nan() {
        let scores = [0.2, f32::NAN, 0.8, 0.5];
        assert_eq!(best_class(scores.iter().copied().enumerate()), Some((2, 0.8)));
        assert_eq!(best_class([f32::NAN, f32::NAN].into_iter().enumerate()), None);
    }

    #[test]
    fn test_wire_confidence_keeps_decimal_form() {
        assert_eq!(wire_confidence(0.9), 0.9);
        assert_eq!(wire_confidence(0.75), 0.75);
        assert_eq!(wire_confidence(1.2), 1.0);
        assert_eq!(wire_confidence(-0.1), 0.0);

        let detection =
            Detection::new(BoundingBox::new(0, 0, 1, 1), "cat", wire_confidence(0.9)).unwrap();
        assert!(detection.to_json().unwrap().contains("0.9"));
        assert!(!detection.to_json().unwrap().contains("0.899"));
    }
}
