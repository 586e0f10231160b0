use anyhow::Result;
use ndarray::{Array3, Array4};

/// Inference backend trait.
///
/// # Contract
///
/// - `run` receives a preprocessed NCHW tensor of shape `[1, 3, height, width]`,
///   values scaled to `[0, 1]`, where `(width, height) == input_size()`.
/// - `run` returns the raw model output of shape `[1, 4 + num_classes, num_anchors]`,
///   box rows first (center-x, center-y, width, height in model input pixels),
///   then one score row per class.
///
/// The loaded model is shared read-only across worker threads, so `run` takes `&self`.
pub trait InferenceBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Model input resolution as `(width, height)`.
    fn input_size(&self) -> (u32, u32);

    fn run(&self, input: &Array4<f32>) -> Result<Array3<f32>>;

    /// Optional warm-up hook, called once after loading.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
