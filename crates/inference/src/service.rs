use crate::{
    adapter::ModelAdapter,
    architecture,
    backend::{
        Classifier, ModelError, Sequential,
        native::weights::{init_he_uniform, load_safetensors},
    },
    config::{ConfigError, InferenceConfig, ProbabilityMode},
    error::PipelineError,
    gradcam::{GradCam, Localization},
    processing::{
        heatmap::composite,
        post::{label_probabilities, top_class},
    },
    serialization::{encode_png, to_base64},
};
use common::span;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use preprocess::{CpuPreProcessor, PreparedImage, Preprocess};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

pub type NativeService = InferenceService<Sequential>;

/// Response of the upload transport.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    /// Every configured label, always.
    pub probabilities: BTreeMap<String, f32>,
    /// Base64 PNG of the Grad-CAM overlay for `prediction`.
    pub gradcam_image: String,
    pub prediction: String,
}

/// Grad-CAM overlay for one class, before any transport framing.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub class_index: usize,
    pub label: String,
    /// Raw class score; zero when the target layer was not captured.
    pub score: f32,
    pub captured: bool,
    pub png: Vec<u8>,
}

struct PipelineMetrics {
    duration: Histogram<f64>,
    predictions: Counter<u64>,
    failures: Counter<u64>,
    capture_misses: Counter<u64>,
}

impl PipelineMetrics {
    fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0, 10.0,
        ];
        Self {
            duration: meter
                .f64_histogram("prediction_duration_seconds")
                .with_description("Time to serve one request (decode + score + grad-cam + encode)")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            predictions: meter
                .u64_counter("predictions_total")
                .with_description("Total requests served")
                .build(),
            failures: meter
                .u64_counter("prediction_failures_total")
                .with_description("Total requests that failed")
                .build(),
            capture_misses: meter
                .u64_counter("gradcam_capture_misses_total")
                .with_description("Grad-CAM passes where the target layer never fired")
                .build(),
        }
    }

    fn record<T>(&self, operation: &'static str, start: Instant, result: &Result<T, PipelineError>) {
        let attributes = [KeyValue::new("operation", operation)];
        self.duration
            .record(start.elapsed().as_secs_f64(), &attributes);

        match result {
            Ok(_) => self.predictions.add(1, &attributes),
            Err(e) => {
                self.failures.add(
                    1,
                    &[
                        KeyValue::new("operation", operation),
                        KeyValue::new("kind", format!("{:?}", e.kind())),
                    ],
                );
            }
        }
    }
}

/// The request pipeline shared by every transport.
pub struct InferenceService<C: Classifier> {
    adapter: ModelAdapter<C>,
    preprocessor: CpuPreProcessor,
    labels: Vec<String>,
    probability_mode: ProbabilityMode,
    metrics: PipelineMetrics,
}

impl NativeService {
    /// Build the configured architecture, load or initialize its weights, and
    /// resolve its target layer.
    pub fn from_config(config: &InferenceConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let network = load_network(config)?;
        let adapter = ModelAdapter::for_architecture(network)?;
        Self::new(adapter, config)
    }
}

fn load_network(config: &InferenceConfig) -> Result<Sequential, ModelError> {
    let arch = architecture::lookup(&config.architecture)?;
    let mut network = arch.build(config.input_size.into(), config.num_classes())?;

    match &config.weights_path {
        Some(path) if path.exists() => load_safetensors(&mut network, path)?,
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                seed = config.init_seed,
                "Weights file not found, using seeded initialization"
            );
            init_he_uniform(&mut network, config.init_seed);
        }
        None => {
            tracing::warn!(
                seed = config.init_seed,
                "No weights configured, using seeded initialization"
            );
            init_he_uniform(&mut network, config.init_seed);
        }
    }
    Ok(network)
}

impl<C: Classifier> InferenceService<C> {
    pub fn new(adapter: ModelAdapter<C>, config: &InferenceConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        if adapter.num_classes() != config.class_labels.len() {
            return Err(ConfigError::LabelCountMismatch {
                num_classes: adapter.num_classes(),
                labels: config.class_labels.len(),
            }
            .into());
        }

        let (_, height, width) = adapter.model().input_shape();
        let preprocessor = CpuPreProcessor::new((width as u32, height as u32));

        tracing::info!(
            architecture = adapter.model().architecture(),
            target_layer = adapter.target_layer(),
            classes = config.class_labels.len(),
            probability_mode = %config.probability_mode,
            "Inference service ready"
        );

        Ok(Self {
            adapter,
            preprocessor,
            labels: config.class_labels.clone(),
            probability_mode: config.probability_mode,
            metrics: PipelineMetrics::new("inference"),
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn probability_mode(&self) -> ProbabilityMode {
        self.probability_mode
    }

    pub fn adapter(&self) -> &ModelAdapter<C> {
        &self.adapter
    }

    /// Probabilities for every label plus the Grad-CAM overlay of the top one.
    pub fn predict(&self, encoded: &[u8]) -> Result<PredictionResult, PipelineError> {
        let _s = span!("predict", encoded_bytes = encoded.len());
        let start = Instant::now();

        let result = self.run_predict(encoded);
        self.metrics.record("predict", start, &result);
        result
    }

    /// Grad-CAM overlay for `class_index`, or the top-scoring class.
    pub fn explain(
        &self,
        encoded: &[u8],
        class_index: Option<usize>,
    ) -> Result<Explanation, PipelineError> {
        let _s = span!("explain", encoded_bytes = encoded.len());
        let start = Instant::now();

        let result = self
            .preprocessor
            .prepare(encoded)
            .map_err(PipelineError::from)
            .and_then(|prepared| self.explain_prepared(&prepared, class_index));
        self.metrics.record("explain", start, &result);
        result
    }

    fn run_predict(&self, encoded: &[u8]) -> Result<PredictionResult, PipelineError> {
        let prepared = self.preprocessor.prepare(encoded)?;

        let scores = {
            let _s = span!("score");
            self.adapter.score(&prepared.tensor)?
        };
        let probabilities = self.probability_mode.apply(&scores.to_vec());
        let top = top_class(&probabilities).ok_or(ModelError::NoScores)?;

        let explanation = self.explain_prepared(&prepared, Some(top))?;
        tracing::debug!(
            prediction = %explanation.label,
            probability = probabilities[top],
            captured = explanation.captured,
            "Prediction complete"
        );

        Ok(PredictionResult {
            probabilities: label_probabilities(&self.labels, &probabilities),
            gradcam_image: to_base64(&explanation.png),
            prediction: explanation.label,
        })
    }

    fn explain_prepared(
        &self,
        prepared: &PreparedImage,
        class_index: Option<usize>,
    ) -> Result<Explanation, PipelineError> {
        let Localization {
            map,
            class_index,
            score,
            captured,
        } = GradCam::localize(&self.adapter, &prepared.tensor, class_index)?;
        if !captured {
            self.metrics.capture_misses.add(1, &[]);
        }

        let overlay = composite(&map, &prepared.pixels)?;
        let png = encode_png(&overlay)?;

        Ok(Explanation {
            class_index,
            label: self.labels[class_index].clone(),
            score,
            captured,
            png,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputSize;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn small_config(mode: ProbabilityMode) -> InferenceConfig {
        let mut config = InferenceConfig::new(mode);
        config.architecture = "resnet_mini".to_string();
        config.input_size = InputSize { width: 32, height: 32 };
        config.class_labels = vec!["Mass".into(), "Nodule".into(), "Effusion".into()];
        config
    }

    fn png(image: &RgbImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn gradient_image() -> Vec<u8> {
        png(&RgbImage::from_fn(48, 40, |x, y| {
            Rgb([(x * 5) as u8, (y * 6) as u8, ((x + y) * 2) as u8])
        }))
    }

    #[test]
    fn test_predict_reports_every_label() {
        let service = NativeService::from_config(&small_config(ProbabilityMode::Sigmoid)).unwrap();
        let result = service.predict(&gradient_image()).unwrap();

        let keys: Vec<_> = result.probabilities.keys().cloned().collect();
        assert_eq!(keys, ["Effusion", "Mass", "Nodule"]);
        assert!(service.labels().contains(&result.prediction));
        assert!(result.probabilities.values().all(|p| (0.0..=1.0).contains(p)));
        assert!(!result.gradcam_image.is_empty());
    }

    #[test]
    fn test_softmax_probabilities_sum_to_one() {
        let service = NativeService::from_config(&small_config(ProbabilityMode::Softmax)).unwrap();
        let result = service.predict(&gradient_image()).unwrap();

        let sum: f32 = result.probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-4, "got {sum}");
    }

    #[test]
    fn test_prediction_is_highest_probability_label() {
        let service = NativeService::from_config(&small_config(ProbabilityMode::Sigmoid)).unwrap();
        let result = service.predict(&gradient_image()).unwrap();

        let best = result
            .probabilities
            .iter()
            .fold(None::<(&String, f32)>, |best, (label, &p)| match best {
                Some((_, b)) if b >= p => best,
                _ => Some((label, p)),
            })
            .unwrap();
        assert_eq!(result.probabilities[&result.prediction], best.1);
    }

    #[test]
    fn test_explain_defaults_to_top_class() {
        let service = NativeService::from_config(&small_config(ProbabilityMode::Sigmoid)).unwrap();
        let encoded = gradient_image();

        let explanation = service.explain(&encoded, None).unwrap();
        let prediction = service.predict(&encoded).unwrap();

        assert_eq!(explanation.label, prediction.prediction);
        let overlay = image::load_from_memory(&explanation.png).unwrap();
        assert_eq!((overlay.width(), overlay.height()), (32, 32));
    }

    #[test]
    fn test_corrupt_payload_is_input_error() {
        let service = NativeService::from_config(&small_config(ProbabilityMode::Sigmoid)).unwrap();
        let err = service.predict(b"\x89PNG\r\n\x1a\ntruncated").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InputDecode);
    }

    #[test]
    fn test_label_count_mismatch_fails_at_construction() {
        let mut config = small_config(ProbabilityMode::Sigmoid);
        config.num_classes = Some(5);
        let err = NativeService::from_config(&config).err().unwrap();
        assert!(matches!(err, PipelineError::Config(ConfigError::LabelCountMismatch { .. })));
    }

    #[test]
    fn test_unknown_architecture_fails_fast() {
        let mut config = small_config(ProbabilityMode::Sigmoid);
        config.architecture = "inception_v3".to_string();
        let err = NativeService::from_config(&config).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::TargetLayerResolution);
    }

    #[test]
    fn test_missing_weights_file_falls_back_to_seeded_init() {
        let mut config = small_config(ProbabilityMode::Sigmoid);
        config.weights_path = Some("/nonexistent/weights.safetensors".into());
        let a = NativeService::from_config(&config).unwrap();
        let b = NativeService::from_config(&config).unwrap();

        let encoded = gradient_image();
        assert_eq!(
            a.predict(&encoded).unwrap().probabilities,
            b.predict(&encoded).unwrap().probabilities,
            "seeded initialization must be deterministic"
        );
    }
}
