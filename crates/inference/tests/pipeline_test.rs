use inference::{
    Classifier, GradCam, InferenceConfig, InputSize, ModelAdapter, ModelError, NativeService,
    ProbabilityMode, Sequential,
    architecture,
    backend::{LayerObserver, ResolvedLayer, native::{Tape, weights::init_he_uniform}},
};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{Array1, Array3};
use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

fn png(image: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Deterministic textured image so different seeds give different pictures
fn textured(seed: u32, width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = (x * 7 + y * 13 + seed * 31) % 256;
        Rgb([v as u8, ((v * 3) % 256) as u8, (255 - v) as u8])
    })
}

fn network(arch: &str, size: u32, classes: usize, seed: u64) -> Sequential {
    let mut network = architecture::lookup(arch)
        .unwrap()
        .build((size, size), classes)
        .unwrap();
    init_he_uniform(&mut network, seed);
    network
}

fn tensor(size: usize, seed: u64) -> Array3<f32> {
    let mut rng = fastrand::Rng::with_seed(seed);
    Array3::from_shape_fn((3, size, size), |_| rng.f32() * 2.0 - 1.0)
}

/// Delegates to a real network but misbehaves during the backward pass.
struct BrokenBackward {
    inner: Sequential,
    panic: bool,
}

impl Classifier for BrokenBackward {
    type Tape = Tape;

    fn architecture(&self) -> &str {
        self.inner.architecture()
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn input_shape(&self) -> (usize, usize, usize) {
        self.inner.input_shape()
    }

    fn resolve_layer(&self, id: &str) -> Option<ResolvedLayer> {
        self.inner.resolve_layer(id)
    }

    fn forward(&self, input: &Array3<f32>) -> Result<Array1<f32>, ModelError> {
        self.inner.forward(input)
    }

    fn forward_recorded(
        &self,
        input: &Array3<f32>,
        observer: &mut dyn LayerObserver,
    ) -> Result<(Array1<f32>, Tape), ModelError> {
        self.inner.forward_recorded(input, observer)
    }

    fn backward(
        &self,
        _tape: Tape,
        _output_grad: Array1<f32>,
        _observer: &mut dyn LayerObserver,
    ) -> Result<(), ModelError> {
        if self.panic {
            panic!("backward exploded");
        }
        Err(ModelError::Weights("backward failed".to_string()))
    }
}

#[test]
fn test_localization_map_has_canonical_shape_and_unit_range() {
    let adapter = ModelAdapter::for_architecture(network("densenet_mini", 224, 8, 1)).unwrap();

    let localization = GradCam::localize(&adapter, &tensor(224, 5), None).unwrap();

    assert!(localization.captured);
    assert_eq!(localization.map.dim(), (224, 224));
    assert!(
        localization.map.iter().all(|v| (0.0..=1.0).contains(v)),
        "map values must lie in [0, 1]"
    );
}

#[test]
fn test_every_architecture_localizes() {
    for arch in architecture::supported() {
        let adapter = ModelAdapter::for_architecture(network(arch, 64, 3, 2)).unwrap();
        let localization = GradCam::localize(&adapter, &tensor(64, 3), Some(1)).unwrap();

        assert_eq!(localization.map.dim(), (64, 64), "{arch}");
        assert_eq!(localization.class_index, 1, "{arch}");
        assert!(localization.map.iter().all(|v| v.is_finite()), "{arch}");
    }
}

#[test]
fn test_zero_gradient_yields_all_zero_map() {
    let mut network = network("resnet_mini", 64, 2, 4);
    for (name, layer) in network.layers_mut() {
        if name == "fc" {
            for (_, mut values) in layer.parameters_mut() {
                values.fill(0.0);
            }
        }
    }
    let adapter = ModelAdapter::for_architecture(network).unwrap();

    let localization = GradCam::localize(&adapter, &tensor(64, 6), None).unwrap();

    assert!(localization.captured);
    assert!(localization.map.iter().all(|&v| v == 0.0), "no NaN, no signal");
}

#[test]
fn test_capture_miss_degrades_to_zero_map_and_score() {
    let adapter = ModelAdapter::unresolved(network("vgg_mini", 64, 2, 1), "layer4");

    let localization = GradCam::localize(&adapter, &tensor(64, 1), None).unwrap();

    assert!(!localization.captured);
    assert_eq!(localization.score, 0.0);
    assert_eq!(localization.map.dim(), (64, 64));
    assert!(localization.map.iter().all(|&v| v == 0.0));
}

#[test]
fn test_instrumentation_is_removed_on_error_and_panic() {
    let failing = ModelAdapter::for_architecture(BrokenBackward {
        inner: network("resnet_mini", 32, 2, 1),
        panic: false,
    })
    .unwrap();
    assert!(GradCam::localize(&failing, &tensor(32, 1), None).is_err());
    assert!(GradCam::localize(&failing, &tensor(32, 1), None).is_err());
    let stats = failing.instrumentation_stats();
    assert_eq!((stats.installed, stats.removed), (2, 2));

    let panicking = ModelAdapter::for_architecture(BrokenBackward {
        inner: network("resnet_mini", 32, 2, 1),
        panic: true,
    })
    .unwrap();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        panicking.run_with_capture(&tensor(32, 1), None)
    }));
    assert!(outcome.is_err(), "the panic should propagate");
    let stats = panicking.instrumentation_stats();
    assert_eq!(stats.installed, stats.removed, "guard must run during unwinding");

    // Lock poisoning is recovered and the model is still usable for scoring.
    assert!(panicking.score(&tensor(32, 1)).is_ok());
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        panicking.run_with_capture(&tensor(32, 1), None)
    }));
    assert!(outcome.is_err());
    let stats = panicking.instrumentation_stats();
    assert_eq!((stats.installed, stats.removed), (2, 2));
}

#[test]
fn test_instrumentation_balanced_after_successful_runs() {
    let adapter = ModelAdapter::for_architecture(network("efficientnet_mini", 64, 3, 8)).unwrap();
    for seed in 0..3 {
        GradCam::localize(&adapter, &tensor(64, seed), None).unwrap();
    }
    let stats = adapter.instrumentation_stats();
    assert_eq!((stats.installed, stats.removed), (3, 3));
}

#[test]
fn test_concurrent_requests_match_sequential_results() {
    let mut config = InferenceConfig::new(ProbabilityMode::Sigmoid);
    config.architecture = "resnet_mini".to_string();
    config.input_size = InputSize { width: 64, height: 64 };
    let service = Arc::new(NativeService::from_config(&config).unwrap());

    let images: Vec<Vec<u8>> = (0..6).map(|seed| png(&textured(seed, 80, 70))).collect();
    let expected: Vec<_> = images
        .iter()
        .map(|encoded| service.explain(encoded, None).unwrap())
        .collect();

    let handles: Vec<_> = images
        .into_iter()
        .map(|encoded| {
            let service = Arc::clone(&service);
            thread::spawn(move || service.explain(&encoded, None).unwrap())
        })
        .collect();

    for (handle, expected) in handles.into_iter().zip(expected) {
        let got = handle.join().unwrap();
        assert_eq!(got.class_index, expected.class_index);
        assert_eq!(got.score, expected.score);
        assert_eq!(got.png, expected.png, "captures must not leak between requests");
    }

    let stats = service.adapter().instrumentation_stats();
    assert_eq!(stats.installed, 12);
    assert_eq!(stats.installed, stats.removed);
}

#[test]
fn test_mid_gray_prediction_end_to_end() {
    let config = InferenceConfig::new(ProbabilityMode::Softmax);
    let service = NativeService::from_config(&config).unwrap();
    let gray = png(&RgbImage::from_pixel(224, 224, Rgb([128, 128, 128])));

    let result = service.predict(&gray).unwrap();

    assert_eq!(result.probabilities.len(), 8);
    assert!(config.class_labels.contains(&result.prediction));
    let overlay = inference::serialization::decode_base64_payload(&result.gradcam_image).unwrap();
    let overlay = image::load_from_memory(&overlay).unwrap();
    assert_eq!((overlay.width(), overlay.height()), (224, 224));
}
