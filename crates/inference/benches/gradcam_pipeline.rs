use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use image::{ImageFormat, RgbImage};
use inference::{
    GradCam, InferenceConfig, ModelAdapter, NativeService, ProbabilityMode, architecture,
    backend::native::weights::init_he_uniform,
    processing::heatmap::composite,
    serialization::encode_png,
};
use ndarray::{Array2, Array3};
use std::io::Cursor;

/// Create a PNG with a gradient pattern for benchmarking
fn create_test_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn benchmark_localize(c: &mut Criterion) {
    let mut group = c.benchmark_group("grad_cam_localize");
    group.sample_size(20);

    for arch in architecture::supported() {
        let mut network = architecture::lookup(arch)
            .unwrap()
            .build((224, 224), 8)
            .unwrap();
        init_he_uniform(&mut network, 0);
        let adapter = ModelAdapter::for_architecture(network).unwrap();
        let tensor = Array3::from_elem((3, 224, 224), 0.25f32);

        group.bench_with_input(BenchmarkId::from_parameter(arch), &tensor, |b, tensor| {
            b.iter(|| GradCam::localize(black_box(&adapter), black_box(tensor), None).unwrap());
        });
    }

    group.finish();
}

fn benchmark_composite_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite_encode");
    let map = Array2::from_shape_fn((224, 224), |(y, x)| ((x + y) % 224) as f32 / 223.0);
    let image = RgbImage::from_pixel(224, 224, image::Rgb([128, 128, 128]));

    group.bench_function("composite_224", |b| {
        b.iter(|| composite(black_box(&map), black_box(&image)).unwrap());
    });
    let overlay = composite(&map, &image).unwrap();
    group.bench_function("encode_png_224", |b| {
        b.iter(|| encode_png(black_box(&overlay)).unwrap());
    });

    group.finish();
}

fn benchmark_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict");
    group.sample_size(20);
    let service = NativeService::from_config(&InferenceConfig::new(ProbabilityMode::Sigmoid))
        .expect("default service should build");

    for (width, height) in [(224, 224), (1024, 1024)] {
        let encoded = create_test_png(width, height);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &encoded,
            |b, encoded| {
                b.iter(|| service.predict(black_box(encoded)).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_localize,
    benchmark_composite_encode,
    benchmark_predict
);
criterion_main!(benches);
