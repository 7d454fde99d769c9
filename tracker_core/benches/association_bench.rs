use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sensor_models::{BoundingBox, BoxObservation};
use tracker_core::pipeline::{Associator, AssociatorConfig};
use tracker_core::types::Detection;

fn make_frame(n: usize, shift: f64) -> Vec<Detection> {
    let model = BoxObservation::default();
    (0..n)
        .map(|i| {
            let col = (i % 20) as f64;
            let row = (i / 20) as f64;
            let bbox = BoundingBox::from_center(20.0 + col * 46.0 + shift, 20.0 + row * 34.0, 24.0, 48.0);
            Detection::new(bbox, &model)
        })
        .collect()
}

fn bench_associator(c: &mut Criterion) {
    let mut group = c.benchmark_group("associator");

    for n in [5, 50, 200] {
        group.bench_function(format!("{n}_pedestrians"), |b| {
            b.iter(|| {
                let mut assoc = Associator::new(AssociatorConfig::default());
                // Warm up with one frame to create tracks
                assoc.process_frame(&make_frame(n, 0.0));
                // Measure a frame against established tracks
                let frame = make_frame(n, 2.0);
                black_box(assoc.process_frame(&frame));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_associator);
criterion_main!(benches);
