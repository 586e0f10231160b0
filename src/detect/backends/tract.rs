#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array3, Array4};
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;

/// Tract-based backend for the exported YOLOv8 ONNX model.
///
/// Loads a local model file once; inference is read-only on the optimized plan.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and pin its input to `[1, 3, height, width]`.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn run(&self, input: &Array4<f32>) -> Result<Array3<f32>> {
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor: Tensor = tract_ndarray::Array4::from_shape_vec(
            (1, 3, self.height as usize, self.width as usize),
            data,
        )
        .context("input tensor shape mismatch")?
        .into();

        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 {
            return Err(anyhow!("expected rank-3 model output, got shape {:?}", shape));
        }
        let values: Vec<f32> = view.iter().copied().collect();
        Ok(Array3::from_shape_vec(
            (shape[0], shape[1], shape[2]),
            values,
        )?)
    }

    fn warm_up(&self) -> Result<()> {
        let input = Array4::<f32>::zeros((1, 3, self.height as usize, self.width as usize));
        self.run(&input).map(|_| ())
    }
}
