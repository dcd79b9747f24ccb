use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Image payload is empty")]
    EmptyInput,

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid target size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Image buffer error: {0}")]
    Buffer(#[from] fast_image_resize::ImageBufferError),

    #[error("Resize failed: {0}")]
    Resize(#[from] fast_image_resize::ResizeError),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl PreprocessError {
    /// True when the failure comes from the caller's payload rather than
    /// from the resize machinery.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::EmptyInput | Self::Decode(_))
    }
}
