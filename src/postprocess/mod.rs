//! Raw prediction decoding and per-class non-maximum suppression

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};

use crate::engine::{Labels, RawPrediction};
use crate::error::InvalidDetectionError;
use crate::pipeline::PipelineSettings;
use crate::preprocess::Letterbox;

/// A detected ingredient in original image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
    pub label: Arc<str>,
}

impl Detection {
    /// Checked constructor: the box must have positive extent and the
    /// confidence must lie in [0, 1].
    pub fn new(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        confidence: f32,
        class_id: usize,
        label: Arc<str>,
    ) -> Result<Self, InvalidDetectionError> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(InvalidDetectionError::NonFinite);
        }
        if x2 <= x1 || y2 <= y1 {
            return Err(InvalidDetectionError::EmptyBox {
                width: x2 - x1,
                height: y2 - y1,
            });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(InvalidDetectionError::Confidence(confidence));
        }
        Ok(Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
            label,
        })
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        iou(
            [self.x1, self.y1, self.x2, self.y2],
            [other.x1, other.y1, other.x2, other.y2],
        )
    }
}

/// Intersection over union of two corner boxes; 0 when disjoint.
pub fn iou(a: [f32; 4], b: [f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union <= f32::EPSILON {
        return 0.0;
    }
    (inter / union).clamp(0.0, 1.0)
}

/// Thresholds applied while decoding one prediction tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostprocessParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Side of the square model input the boxes are normalized to
    pub model_size: u32,
}

impl PostprocessParams {
    pub fn from_settings(settings: &PipelineSettings, model_size: u32) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
            max_detections: settings.max_detections,
            model_size,
        }
    }
}

/// Decode `raw` into image-space detections, strongest first.
pub fn postprocess(
    raw: &RawPrediction,
    letterbox: &Letterbox,
    params: &PostprocessParams,
    labels: &Labels,
) -> Vec<Detection> {
    let model_size = params.model_size as f32;
    let (max_x, max_y) = (
        letterbox.original_width as f32,
        letterbox.original_height as f32,
    );

    // pushed in row order; the stable sort in NMS relies on it
    let mut candidates = Vec::new();
    for row in 0..raw.num_predictions() {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..raw.num_classes() {
            let score = raw.value(4 + class, row);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < params.confidence_threshold {
            continue;
        }

        let cx = raw.value(0, row) * model_size;
        let cy = raw.value(1, row) * model_size;
        let w = raw.value(2, row) * model_size;
        let h = raw.value(3, row) * model_size;

        let (x1, y1) = letterbox.to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_original(cx + w / 2.0, cy + h / 2.0);

        match Detection::new(
            x1.clamp(0.0, max_x),
            y1.clamp(0.0, max_y),
            x2.clamp(0.0, max_x),
            y2.clamp(0.0, max_y),
            best_score.min(1.0),
            best_class,
            labels.get(best_class),
        ) {
            Ok(detection) => candidates.push(detection),
            Err(e) => trace!(row, error = %e, "dropping candidate"),
        }
    }

    let before = candidates.len();
    let mut kept = non_max_suppression(candidates, params.iou_threshold);
    kept.truncate(params.max_detections);
    debug!(
        rows = raw.num_predictions(),
        candidates = before,
        kept = kept.len(),
        "postprocess"
    );
    kept
}

/// Greedy per-class NMS.
///
/// Candidates are ranked by confidence; equal confidences keep their input
/// order. A kept box suppresses every later box of the same class whose IoU
/// with it reaches `iou_threshold`. Boxes of different classes never
/// suppress each other.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len().min(64));
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) >= iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
