//! Criterion benches for resize planning and constant splicing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lenia_gpu::gpu::double_buffer::{resize_values, FillPolicy};
use lenia_gpu::gpu::template::splice_constants;
use lenia_gpu::options::Dimensions;
use lenia_gpu::simulation::{kernel_constants, STEP_KERNEL};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn resize_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resize_values");

    for count in [300, 3_000, 30_000] {
        let old: Vec<f32> = (0..count * 2).map(|i| i as f32).collect();
        let random = FillPolicy::Random {
            min: -9.0,
            max: 9.0,
        };
        let fixed = FillPolicy::Fixed(vec![1.0, 2.0]);
        let mut rng = StdRng::seed_from_u64(0);

        group.bench_function(format!("{count}_grow_random"), |b| {
            b.iter(|| black_box(resize_values(&old, count * 4, &random, &mut rng)))
        });
        group.bench_function(format!("{count}_grow_fixed"), |b| {
            b.iter(|| black_box(resize_values(&old, count * 4, &fixed, &mut rng)))
        });
        group.bench_function(format!("{count}_shrink"), |b| {
            b.iter(|| black_box(resize_values(&old, count, &fixed, &mut rng)))
        });
    }
    group.finish();
}

fn splice_benchmark(c: &mut Criterion) {
    let source = std::fs::read_to_string(STEP_KERNEL).unwrap_or_default();
    let constants = kernel_constants(Dimensions::Planar);
    c.bench_function("splice_step_kernel", |b| {
        b.iter(|| black_box(splice_constants(black_box(&source), &constants)))
    });
}

criterion_group!(benches, resize_benchmark, splice_benchmark);
criterion_main!(benches);
