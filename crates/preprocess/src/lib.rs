pub mod config;
pub mod cpu;
pub mod error;

use image::RgbImage;
use ndarray::Array3;

pub use config::{DEFAULT_INPUT_SIZE, Normalization};
pub use cpu::{CpuPreProcessor, resize_plane};
pub use error::PreprocessError;

/// A decoded request image at canonical resolution.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Normalized CHW tensor, shape `[3, height, width]`.
    pub tensor: Array3<f32>,
    /// The resized 0-255 RGB pixels the tensor was built from, kept for
    /// compositing the saliency overlay.
    pub pixels: RgbImage,
}

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Decode an encoded image (PNG, JPEG) and turn it into model input.
    fn prepare(&self, encoded: &[u8]) -> Result<PreparedImage, PreprocessError>;

    /// Get the input size this preprocessor targets
    fn input_size(&self) -> (u32, u32);
}
