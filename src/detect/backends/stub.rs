use anyhow::{anyhow, Result};
use ndarray::{Array3, Array4};

use crate::detect::backend::InferenceBackend;
use crate::detect::labels::COCO_LABELS;
use crate::detect::DEFAULT_MODEL_INPUT;

/// Stub backend for running without a model. Produces a well-formed output with
/// zero anchors, so every frame decodes to no detections.
pub struct StubBackend {
    input_width: u32,
    input_height: u32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            input_width: DEFAULT_MODEL_INPUT,
            input_height: DEFAULT_MODEL_INPUT,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    fn run(&self, input: &Array4<f32>) -> Result<Array3<f32>> {
        let expected = [1, 3, self.input_height as usize, self.input_width as usize];
        if input.shape() != expected {
            return Err(anyhow!(
                "stub backend expected input {:?}, got {:?}",
                expected,
                input.shape()
            ));
        }
        Ok(Array3::zeros((1, 4 + COCO_LABELS.len(), 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_output_is_well_formed_and_empty() -> Result<()> {
        let backend = StubBackend::new();
        let input = Array4::<f32>::zeros((1, 3, 640, 640));
        let out = backend.run(&input)?;
        assert_eq!(out.shape(), &[1, 84, 0]);
        assert!(backend.run(&Array4::<f32>::zeros((1, 3, 10, 10))).is_err());
        Ok(())
    }
}
