use crate::error::PipelineError;
use common::span;
use image::RgbImage;
use ndarray::Array2;

#[inline]
fn ramp(x: f32, center: f32) -> f32 {
    (1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0)
}

/// Jet colormap: dark blue at 0, through cyan and yellow, to dark red at 1.
/// Channels are RGB in [0, 1].
pub fn jet(x: f32) -> [f32; 3] {
    [ramp(x, 3.0), ramp(x, 2.0), ramp(x, 1.0)]
}

/// Overlay a [0, 1] localization map on the image it was computed for.
///
/// The jet-colored map and the image are summed with equal weight, the sum
/// is rescaled so its brightest channel reaches 255, then quantized.
pub fn composite(map: &Array2<f32>, image: &RgbImage) -> Result<RgbImage, PipelineError> {
    let _s = span!("composite");

    let (height, width) = map.dim();
    let size_mismatch = || PipelineError::CompositeSize {
        map: (width, height),
        image: image.dimensions(),
    };
    if (width as u32, height as u32) != image.dimensions() {
        return Err(size_mismatch());
    }

    // Quantize the map first so the palette has 256 entries.
    let palette: Vec<[f32; 3]> = (0..=255u8).map(|l| jet(l as f32 / 255.0)).collect();

    let mut blended = Vec::with_capacity(width * height * 3);
    for (&value, pixel) in map.iter().zip(image.pixels()) {
        let level = (value.clamp(0.0, 1.0) * 255.0) as u8;
        let heat = palette[level as usize];
        for (h, &p) in heat.iter().zip(pixel.0.iter()) {
            blended.push(h + p as f32 / 255.0);
        }
    }

    let peak = blended.iter().copied().fold(0.0f32, f32::max);
    let scale = if peak > 0.0 { 255.0 / peak } else { 0.0 };
    let quantized = blended
        .into_iter()
        .map(|v| (v * scale).round().clamp(0.0, 255.0) as u8)
        .collect();

    RgbImage::from_raw(width as u32, height as u32, quantized).ok_or_else(size_mismatch)
}
