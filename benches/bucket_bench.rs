use criterion::{black_box, criterion_group, criterion_main, Criterion};

use adios_core::model::LatencyModel;

fn bench_predict(c: &mut Criterion) {
    let model = LatencyModel::new();
    for _ in 0..2000 {
        model.input(4096, 1000, 0);
    }
    model.update(0);

    c.bench_function("predict_small", |b| {
        b.iter(|| model.predict(black_box(4096)))
    });
    c.bench_function("predict_large", |b| {
        b.iter(|| model.predict(black_box(262_144)))
    });
}

fn bench_input_and_update(c: &mut Criterion) {
    c.bench_function("input_small_1000_samples", |b| {
        b.iter(|| {
            let model = LatencyModel::new();
            for i in 0..1000u64 {
                model.input(4096, black_box(900 + i % 200), 0);
            }
        })
    });

    c.bench_function("update_after_2000_large_samples", |b| {
        b.iter(|| {
            let model = LatencyModel::new();
            model.input(4096, 1000, 0);
            model.update(0);
            for i in 0..2000u64 {
                model.input(65_536, black_box(8_000_000 + i), 8_000_000);
            }
            model.update(2_000);
        })
    });
}

criterion_group!(benches, bench_predict, bench_input_and_update);
criterion_main!(benches);
