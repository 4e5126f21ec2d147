use super::preprocess::Preprocessor;
use super::{BoundingBox, DetectError, Detection, Detector, Result};
use image::RgbImage;
use ndarray::{ArrayView2, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;

/// IoU above which two boxes are considered the same object.
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// YOLOv8-family object detector running through ONNX Runtime.
///
/// Expects a model with one `[1, 3, H, W]` input and a `[1, 4 + C, N]`
/// output: per anchor a center box (cx, cy, w, h in input pixels) followed
/// by C class probabilities.
pub struct YoloDetector {
    session: Session,
    preprocessor: Preprocessor,
    input_width: u32,
    input_height: u32,
}

impl YoloDetector {
    /// Load and prepare an ONNX model for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let path = model_path.as_ref();
        tracing::info!("Loading detection model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)?;

        tracing::info!("Detection model loaded successfully");

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(input_width, input_height),
            input_width,
            input_height,
        })
    }
}

impl Detector for YoloDetector {
    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence: f32,
        max_detections: Option<usize>,
    ) -> Result<Vec<Detection>> {
        let _span = tracing::debug_span!("yolo_detect").entered();

        let input = self.preprocessor.preprocess(frame);

        let outputs = self.session.run(ort::inputs![input.view()]?)?;
        let output = outputs[0].try_extract_tensor::<f32>()?;
        let view = output.view();

        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(DetectError::InvalidOutputShape(shape));
        }

        let predictions = view.index_axis(Axis(0), 0);
        let predictions = predictions
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|_| DetectError::InvalidOutputShape(shape))?;

        let raw = decode_predictions(
            predictions,
            self.input_width as f32,
            self.input_height as f32,
            confidence,
        );
        let mut kept = non_max_suppression(raw, NMS_IOU_THRESHOLD);
        if let Some(cap) = max_detections {
            kept.truncate(cap);
        }

        tracing::debug!("{} detection(s) above {:.2}", kept.len(), confidence);
        Ok(kept)
    }
}

/// Decode a `[4 + C, N]` prediction block into normalized detections.
///
/// Boxes arrive as centers and sizes in model input pixels; they leave as
/// normalized corner boxes. Only anchors whose best class probability
/// reaches `confidence` survive.
fn decode_predictions(
    predictions: ArrayView2<'_, f32>,
    input_width: f32,
    input_height: f32,
    confidence: f32,
) -> Vec<Detection> {
    let classes = predictions.shape()[0] - 4;
    let anchors = predictions.shape()[1];

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for class in 0..classes {
            let score = predictions[[4 + class, anchor]];
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < confidence {
            continue;
        }

        let cx = predictions[[0, anchor]];
        let cy = predictions[[1, anchor]];
        let w = predictions[[2, anchor]];
        let h = predictions[[3, anchor]];

        detections.push(Detection {
            bbox: BoundingBox {
                x1: ((cx - w / 2.0) / input_width).clamp(0.0, 1.0),
                y1: ((cy - h / 2.0) / input_height).clamp(0.0, 1.0),
                x2: ((cx + w / 2.0) / input_width).clamp(0.0, 1.0),
                y2: ((cy + h / 2.0) / input_height).clamp(0.0, 1.0),
            },
            class_id: best_class,
            score: best_score,
        });
    }
    detections
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let iw = (ix2 - ix1).max(0.0);
    let ih = (iy2 - iy1).max(0.0);
    let inter = iw * ih;
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    inter / (area_a + area_b - inter + 1e-6)
}

/// Class-agnostic greedy NMS: keep the highest-scoring box, drop anything
/// overlapping it past `iou_thr`, repeat. Output stays sorted by score.
fn non_max_suppression(mut detections: Vec<Detection>, iou_thr: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    'outer: for det in detections {
        for kept in &keep {
            if iou(&det.bbox, &kept.bbox) > iou_thr {
                continue 'outer;
            }
        }
        keep.push(det);
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn boxed(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Detection {
        Detection {
            bbox: BoundingBox { x1, y1, x2, y2 },
            class_id: 0,
            score,
        }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 0.5,
            y2: 0.5,
        };
        let b = BoundingBox {
            x1: 0.6,
            y1: 0.6,
            x2: 0.9,
            y2: 0.9,
        };
        assert!(iou(&a, &a) > 0.99);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let dets = vec![
            boxed(0.0, 0.0, 0.5, 0.5, 0.6),
            boxed(0.01, 0.01, 0.5, 0.5, 0.9),
            boxed(0.7, 0.7, 0.9, 0.9, 0.4),
        ];
        let kept = non_max_suppression(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn decode_filters_by_confidence_and_normalizes() {
        // Two anchors, two classes: [4 + 2, 2]
        let mut block = Array2::<f32>::zeros((6, 2));
        // Anchor 0: center (320, 240), size 160x120, class 1 @ 0.8
        block[[0, 0]] = 320.0;
        block[[1, 0]] = 240.0;
        block[[2, 0]] = 160.0;
        block[[3, 0]] = 120.0;
        block[[5, 0]] = 0.8;
        // Anchor 1: below threshold
        block[[0, 1]] = 100.0;
        block[[1, 1]] = 100.0;
        block[[2, 1]] = 50.0;
        block[[3, 1]] = 50.0;
        block[[4, 1]] = 0.2;

        let dets = decode_predictions(block.view(), 640.0, 480.0, 0.5);
        assert_eq!(dets.len(), 1);

        let det = &dets[0];
        assert_eq!(det.class_id, 1);
        assert!((det.score - 0.8).abs() < 1e-6);
        assert!((det.bbox.x1 - 0.375).abs() < 1e-4);
        assert!((det.bbox.y1 - 0.375).abs() < 1e-4);
        assert!((det.bbox.x2 - 0.625).abs() < 1e-4);
        assert!((det.bbox.y2 - 0.625).abs() < 1e-4);
    }

    #[test]
    fn every_decoded_detection_meets_threshold() {
        let mut block = Array2::<f32>::zeros((6, 8));
        for anchor in 0..8 {
            block[[0, anchor]] = 50.0 + anchor as f32 * 60.0;
            block[[1, anchor]] = 50.0;
            block[[2, anchor]] = 40.0;
            block[[3, anchor]] = 40.0;
            block[[4, anchor]] = anchor as f32 / 8.0;
        }
        for threshold in [0.0, 0.25, 0.5, 0.9] {
            let dets = decode_predictions(block.view(), 640.0, 640.0, threshold);
            assert!(dets.iter().all(|d| d.score >= threshold));
        }
    }
}
