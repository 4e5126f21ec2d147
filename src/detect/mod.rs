mod labels;
mod preprocess;
mod yolo;

pub use labels::label_for;
pub use preprocess::Preprocessor;
pub use yolo::YoloDetector;

use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Model load or inference error: {0}")]
    Ort(#[from] ort::Error),
    #[error("Unexpected model output shape: {0:?}")]
    InvalidOutputShape(Vec<usize>),
}

pub type Result<T> = std::result::Result<T, DetectError>;

/// Corner box in normalized coordinates (0..1 relative to the frame).
#[derive(Clone, Copy, Debug)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Pixel-space corners for a frame of the given dimensions, clamped.
    /// An empty frame maps everything to the origin.
    pub fn to_pixels(&self, width: u32, height: u32) -> (i32, i32, i32, i32) {
        let w = width as f32;
        let h = height as f32;
        let max_x = (w - 1.0).max(0.0);
        let max_y = (h - 1.0).max(0.0);
        (
            (self.x1 * w).clamp(0.0, max_x).round() as i32,
            (self.y1 * h).clamp(0.0, max_y).round() as i32,
            (self.x2 * w).clamp(0.0, max_x).round() as i32,
            (self.y2 * h).clamp(0.0, max_y).round() as i32,
        )
    }
}

/// A single model output: bounding box, class and confidence score.
///
/// Ephemeral per-frame data; produced by the detector, consumed by the
/// overlay, never retained across frames.
#[derive(Clone, Debug)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub score: f32,
}

impl Detection {
    pub fn label(&self) -> &'static str {
        label_for(self.class_id)
    }
}

/// Trait for object detectors.
///
/// Every returned detection satisfies `score >= confidence`. When
/// `max_detections` is set, at most that many (highest-scoring) detections
/// are returned.
pub trait Detector {
    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence: f32,
        max_detections: Option<usize>,
    ) -> Result<Vec<Detection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_pixels_scales_and_clamps() {
        let bbox = BoundingBox {
            x1: 0.25,
            y1: 0.5,
            x2: 1.5,
            y2: -0.5,
        };
        assert_eq!(bbox.to_pixels(100, 50), (25, 25, 99, 0));
    }

    #[test]
    fn to_pixels_on_empty_frame_stays_at_origin() {
        let bbox = BoundingBox {
            x1: 0.1,
            y1: 0.2,
            x2: 0.8,
            y2: 0.9,
        };
        assert_eq!(bbox.to_pixels(0, 0), (0, 0, 0, 0));
        assert_eq!(bbox.to_pixels(0, 100), (0, 20, 0, 90));
    }
}
