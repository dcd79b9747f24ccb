use crate::{DEFAULT_INPUT_SIZE, Normalization, PreparedImage, Preprocess, PreprocessError};
use common::{span, span_debug};
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use image::RgbImage;
use ndarray::{Array2, Array3, ArrayView2};
use std::default::Default;

fn bilinear() -> ResizeOptions {
    ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear))
}

/// Stateless CPU preprocessor; safe to share between concurrent requests.
#[derive(Debug, Clone)]
pub struct CpuPreProcessor {
    pub input_size: (u32, u32),
    pub normalization: Normalization,
}

impl CpuPreProcessor {
    pub fn new(input_size: (u32, u32)) -> Self {
        Self {
            input_size,
            normalization: Normalization::IMAGENET,
        }
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Decode PNG/JPEG bytes into RGB8 pixels, dropping any alpha channel.
    pub fn decode(&self, encoded: &[u8]) -> Result<RgbImage, PreprocessError> {
        let _s = span!("decode");

        if encoded.is_empty() {
            return Err(PreprocessError::EmptyInput);
        }

        let decoded = image::load_from_memory(encoded)?;
        tracing::trace!(
            width = decoded.width(),
            height = decoded.height(),
            encoded_bytes = encoded.len(),
            "Decoded image"
        );

        Ok(decoded.to_rgb8())
    }

    /// Resize raw RGB pixels to the canonical resolution and normalize them.
    pub fn preprocess_from_u8_slice(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<PreparedImage, PreprocessError> {
        let resized = self.resize(pixels, width, height)?;
        let tensor = Self::normalize(&resized, &self.normalization)?;
        Ok(PreparedImage {
            tensor,
            pixels: resized,
        })
    }

    fn resize(&self, pixels: &[u8], width: u32, height: u32) -> Result<RgbImage, PreprocessError> {
        let _s = span!("resize");

        let (dst_width, dst_height) = self.input_size;
        if dst_width == 0 || dst_height == 0 {
            return Err(PreprocessError::InvalidSize {
                width: dst_width,
                height: dst_height,
            });
        }

        let src = ImageRef::new(width, height, pixels, PixelType::U8x3)?;
        let mut resized = Image::new(dst_width, dst_height, PixelType::U8x3);
        Resizer::new().resize(&src, &mut resized, &bilinear())?;

        RgbImage::from_raw(dst_width, dst_height, resized.into_vec()).ok_or(
            PreprocessError::InvalidSize {
                width: dst_width,
                height: dst_height,
            },
        )
    }

    fn normalize(
        image: &RgbImage,
        normalization: &Normalization,
    ) -> Result<Array3<f32>, PreprocessError> {
        let _s = span_debug!("normalize");

        let width = image.width() as usize;
        let height = image.height() as usize;
        let spatial = width * height;
        let Normalization { mean, std } = normalization;

        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in image.as_raw().chunks_exact(3).enumerate() {
            for c in 0..3 {
                output[i + c * spatial] = (px[c] as f32 / 255.0 - mean[c]) / std[c];
            }
        }

        Ok(Array3::from_shape_vec((3, height, width), output)?)
    }
}

impl Default for CpuPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl Preprocess for CpuPreProcessor {
    fn prepare(&self, encoded: &[u8]) -> Result<PreparedImage, PreprocessError> {
        let rgb = self.decode(encoded)?;
        let (width, height) = rgb.dimensions();
        self.preprocess_from_u8_slice(rgb.as_raw(), width, height)
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }
}

/// Bilinearly resize a single-channel float plane to `width x height`.
///
/// The bilinear kernel is non-negative, so the output stays within the
/// input's value range.
pub fn resize_plane(
    plane: ArrayView2<'_, f32>,
    width: u32,
    height: u32,
) -> Result<Array2<f32>, PreprocessError> {
    let (src_height, src_width) = plane.dim();
    if width == 0 || height == 0 || src_width == 0 || src_height == 0 {
        return Err(PreprocessError::InvalidSize { width, height });
    }

    let contiguous: Vec<f32> = plane.iter().copied().collect();
    let src = ImageRef::new(
        src_width as u32,
        src_height as u32,
        bytemuck::cast_slice(&contiguous),
        PixelType::F32,
    )?;

    let mut resized = Image::new(width, height, PixelType::F32);
    Resizer::new().resize(&src, &mut resized, &bilinear())?;

    let values: Vec<f32> = bytemuck::pod_collect_to_vec(resized.buffer());
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        values,
    )?)
}
