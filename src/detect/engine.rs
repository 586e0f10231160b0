use std::sync::OnceLock;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use ndarray::Array4;

use crate::detect::backend::InferenceBackend;
use crate::detect::decode::{decode_output, non_max_suppression, DecodeParams};
use crate::detect::result::DetectionResult;
use crate::detect::DEFAULT_IOU_THRESHOLD;
use crate::frame::Frame;

/// Deferred model construction. Invoked at most once per engine.
pub type BackendLoader = Box<dyn Fn() -> Result<Box<dyn InferenceBackend>> + Send + Sync>;

/// Thread-safe detection entry point.
///
/// The backend is loaded on first use. Concurrent first callers block on the same
/// initialisation instead of loading twice. If loading fails the engine stays
/// disabled and `detect` returns no detections, so recording continues without
/// inference.
pub struct DetectionEngine {
    loader: BackendLoader,
    backend: OnceLock<Option<Box<dyn InferenceBackend>>>,
    iou_threshold: f32,
}

impl DetectionEngine {
    pub fn new(loader: BackendLoader) -> Self {
        Self {
            loader,
            backend: OnceLock::new(),
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }

    /// Engine around an already-constructed backend.
    pub fn with_backend<B: InferenceBackend + 'static>(backend: B) -> Self {
        let engine = Self::new(Box::new(|| -> Result<Box<dyn InferenceBackend>> {
            Err(anyhow::anyhow!("backend was supplied at construction"))
        }));
        let _ = engine.backend.set(Some(Box::new(backend)));
        engine
    }

    /// Engine with inference permanently disabled.
    pub fn disabled() -> Self {
        let engine = Self::new(Box::new(|| -> Result<Box<dyn InferenceBackend>> {
            Err(anyhow::anyhow!("detection disabled"))
        }));
        let _ = engine.backend.set(None);
        engine
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn backend(&self) -> Option<&dyn InferenceBackend> {
        self.backend
            .get_or_init(|| match (self.loader)() {
                Ok(backend) => {
                    if let Err(e) = backend.warm_up() {
                        log::warn!("detector warm-up failed for {}: {}", backend.name(), e);
                    }
                    log::info!(
                        "detector backend {} loaded (input {:?})",
                        backend.name(),
                        backend.input_size()
                    );
                    Some(backend)
                }
                Err(e) => {
                    log::warn!("detection disabled: model failed to load: {:#}", e);
                    None
                }
            })
            .as_deref()
    }

    /// True once a backend is loaded (triggers loading on first call).
    pub fn is_available(&self) -> bool {
        self.backend().is_some()
    }

    /// Detect objects in `frame`, keeping candidates whose best class score exceeds
    /// `confidence_threshold`, after non-maximum suppression.
    pub fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<DetectionResult>> {
        let Some(backend) = self.backend() else {
            return Ok(Vec::new());
        };
        let (input_width, input_height) = backend.input_size();
        let input = preprocess(frame, input_width, input_height)?;
        let output = backend
            .run(&input)
            .with_context(|| format!("{} inference failed", backend.name()))?;

        let mut candidates = decode_output(
            output.view(),
            DecodeParams {
                input_width,
                input_height,
                source_width: frame.width,
                source_height: frame.height,
                confidence_threshold,
            },
        )?;
        non_max_suppression(&mut candidates, self.iou_threshold);
        Ok(candidates)
    }
}

/// Resize a frame to the model input (no letterbox) and lay it out as NCHW f32 in `[0, 1]`.
pub fn preprocess(frame: &Frame, input_width: u32, input_height: u32) -> Result<Array4<f32>> {
    let rgb = frame.to_rgb_image()?;
    let resized = if rgb.width() == input_width && rgb.height() == input_height {
        rgb
    } else {
        imageops::resize(&rgb, input_width, input_height, FilterType::Triangle)
    };

    let input = Array4::from_shape_fn(
        (1, 3, input_height as usize, input_width as usize),
        |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    );
    Ok(input)
}
