use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in source-image pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let l = self.x.max(other.x);
        let r = (self.x + self.width).min(other.x + other.width);
        let t = self.y.max(other.y);
        let b = (self.y + self.height).min(other.y + other.height);
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    /// Intersection over union. Degenerate boxes (zero union) yield 0, never NaN.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// One labeled detection. Produced fresh per call and never persisted directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl DetectionResult {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn is_label(&self, label: &str) -> bool {
        self.label == label
    }
}
