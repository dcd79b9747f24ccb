//! Gradient-weighted class activation mapping.

use crate::adapter::ModelAdapter;
use crate::backend::{Classifier, ModelError};
use crate::error::PipelineError;
use common::span;
use ndarray::{Array2, Array3, Axis, Zip};

/// Saliency map at the model's input resolution.
#[derive(Debug, Clone)]
pub struct Localization {
    /// Height x width, every value in [0, 1].
    pub map: Array2<f32>,
    pub class_index: usize,
    /// Raw score of `class_index`; zero when nothing was captured.
    pub score: f32,
    /// False when the target layer never fired and `map` is the all-zero
    /// fallback.
    pub captured: bool,
}

pub struct GradCam;

impl GradCam {
    /// Localize `class_index` (or the top class) for one preprocessed tensor.
    pub fn localize<C: Classifier>(
        adapter: &ModelAdapter<C>,
        tensor: &Array3<f32>,
        class_index: Option<usize>,
    ) -> Result<Localization, PipelineError> {
        let _s = span!("grad_cam");
        let (_, height, width) = tensor.dim();

        let capture = adapter.run_with_capture(tensor, class_index)?;

        let (Some(activation), Some(gradient)) = (capture.activation, capture.gradient) else {
            tracing::warn!(
                target_layer = adapter.target_layer(),
                class_index = capture.class_index,
                "Target layer produced no capture, returning an empty map"
            );
            return Ok(Localization {
                map: Array2::zeros((height, width)),
                class_index: capture.class_index,
                score: 0.0,
                captured: false,
            });
        };

        let raw = Self::attribute(&activation, &gradient)?;
        let resized = preprocess::resize_plane(raw.view(), width as u32, height as u32)?;

        Ok(Localization {
            map: min_max_normalize(resized),
            class_index: capture.class_index,
            score: capture.class_score,
            captured: true,
        })
    }

    /// Channel weights are the spatial mean of the gradient. Returns the
    /// ReLU of the weighted activation sum at the target layer's resolution.
    pub fn attribute(
        activation: &Array3<f32>,
        gradient: &Array3<f32>,
    ) -> Result<Array2<f32>, ModelError> {
        if activation.shape() != gradient.shape() {
            return Err(ModelError::ShapeMismatch {
                context: "grad-cam capture".to_string(),
                expected: activation.shape().to_vec(),
                actual: gradient.shape().to_vec(),
            });
        }

        let (_, h, w) = activation.dim();
        let spatial = (h * w).max(1) as f32;
        let weights = gradient.sum_axis(Axis(2)).sum_axis(Axis(1)) / spatial;

        let mut raw = Array2::<f32>::zeros((h, w));
        for (&weight, channel) in weights.iter().zip(activation.outer_iter()) {
            Zip::from(&mut raw)
                .and(&channel)
                .for_each(|r, &a| *r += weight * a);
        }

        // `> 0.0` also sends NaN to zero.
        raw.mapv_inplace(|v| if v > 0.0 { v } else { 0.0 });
        Ok(raw)
    }
}

/// Rescale to [0, 1]; a flat (or non-finite) range yields all zeros.
/// NaN entries map to zero.
pub fn min_max_normalize(mut map: Array2<f32>) -> Array2<f32> {
    let (min, max) = map
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    if !(range.is_finite() && range > 0.0) {
        map.fill(0.0);
        return map;
    }
    map.mapv_inplace(|v| {
        let scaled = (v - min) / range;
        if scaled > 0.0 { scaled.min(1.0) } else { 0.0 }
    });
    map
}
