//! Detection engine.
//!
//! The inference runtime is a black box behind `InferenceBackend`. This module owns
//! everything around it: frame preprocessing, decoding the raw `[1, 4 + classes, anchors]`
//! tensor into labeled boxes, and greedy non-maximum suppression.

mod backend;
mod backends;
mod decode;
mod engine;
mod labels;
mod result;

pub use backend::InferenceBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use decode::{decode_output, non_max_suppression, DecodeParams};
pub use engine::{preprocess, BackendLoader, DetectionEngine};
pub use labels::{label_for, COCO_LABELS, PERSON_LABEL};
pub use result::{BoundingBox, DetectionResult};

/// Threshold for general object logging.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Threshold for the security escalation path (intentionally more sensitive).
pub const SECURITY_CONFIDENCE_THRESHOLD: f32 = 0.4;

/// Overlap above which a lower-confidence box is suppressed.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Square input resolution of the exported YOLOv8n model.
pub const DEFAULT_MODEL_INPUT: u32 = 640;
