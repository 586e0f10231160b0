use anyhow::{anyhow, Result};
use ndarray::ArrayView3;

use crate::detect::labels::label_for;
use crate::detect::result::{BoundingBox, DetectionResult};

/// Geometry and threshold for decoding one output tensor.
#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    pub input_width: u32,
    pub input_height: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub confidence_threshold: f32,
}

/// Decode a raw `[1, 4 + num_classes, num_anchors]` tensor into thresholded candidates.
///
/// Per anchor the best-scoring class is selected and kept only if its score strictly
/// exceeds the threshold. Boxes are converted from center form in model input pixels
/// to top-left form in source pixels using independent x/y scale factors, then clipped
/// to the source image.
pub fn decode_output(output: ArrayView3<f32>, params: DecodeParams) -> Result<Vec<DetectionResult>> {
    let (batch, rows, anchors) = output.dim();
    if batch != 1 {
        return Err(anyhow!("expected batch size 1, got {}", batch));
    }
    if rows <= 4 {
        return Err(anyhow!(
            "output has {} rows; expected 4 box rows plus at least one class row",
            rows
        ));
    }
    if params.input_width == 0 || params.input_height == 0 {
        return Err(anyhow!("model input dimensions must be non-zero"));
    }

    let scale_x = params.source_width as f32 / params.input_width as f32;
    let scale_y = params.source_height as f32 / params.input_height as f32;
    let max_x = params.source_width as f32;
    let max_y = params.source_height as f32;

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..rows - 4 {
            let score = output[[0, 4 + class, anchor]];
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !(best_score > params.confidence_threshold) {
            continue;
        }

        let cx = output[[0, 0, anchor]] * scale_x;
        let cy = output[[0, 1, anchor]] * scale_y;
        let w = output[[0, 2, anchor]] * scale_x;
        let h = output[[0, 3, anchor]] * scale_y;

        let x1 = (cx - w / 2.0).clamp(0.0, max_x);
        let y1 = (cy - h / 2.0).clamp(0.0, max_y);
        let x2 = (cx + w / 2.0).clamp(0.0, max_x);
        let y2 = (cy + h / 2.0).clamp(0.0, max_y);

        candidates.push(DetectionResult::new(
            label_for(best_class),
            best_score.min(1.0),
            BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
        ));
    }
    Ok(candidates)
}

/// Greedy class-agnostic non-maximum suppression, in place.
///
/// Candidates are ordered by descending confidence; each kept box suppresses every
/// later box whose IoU with it exceeds `iou_threshold`.
pub fn non_max_suppression(candidates: &mut Vec<DetectionResult>, iou_threshold: f32) {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..candidates.len() {
        let suppressed = (0..kept)
            .any(|prev| candidates[prev].bbox.iou(&candidates[index].bbox) > iou_threshold);
        if !suppressed {
            candidates.swap(kept, index);
            kept += 1;
        }
    }
    candidates.truncate(kept);
}
