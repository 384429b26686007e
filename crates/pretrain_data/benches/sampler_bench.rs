use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pretrain_data::{
    DataLoader, DataLoaderConfig, InMemoryDataset, PretrainingRandomSampler, PretrainingSampler,
    PropMixingRandomSampler, Sampler,
};
use std::hint::black_box;

/// Benchmarks for the pretraining samplers and the loader built on them.
///
/// To run these, use:
/// ```bash
/// cargo bench --bench sampler_bench
/// ```

/// Dataset sizes swept by every group.
const SIZES: [usize; 3] = [10_000, 100_000, 1_000_000];
const MICRO_BATCH: usize = 8;
const WORLD: usize = 8;

/// Cost of producing one epoch of index batches for a single rank.
fn bench_sampler_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sampler Epoch");

    for &size in &SIZES {
        group.throughput(Throughput::Elements((size / WORLD) as u64));

        let single = PretrainingSampler::new(size, 0, MICRO_BATCH, 3, WORLD).expect("valid sampler");
        group.bench_with_input(BenchmarkId::new("single", size), &single, |b, s| {
            b.iter(|| black_box(s.iter(0).count()))
        });

        let random = PretrainingRandomSampler::new(size, 0, MICRO_BATCH, 3, WORLD, 0).expect("valid sampler");
        group.bench_with_input(BenchmarkId::new("random", size), &random, |b, s| {
            b.iter(|| black_box(s.iter(1).count()))
        });

        let mixing = PropMixingRandomSampler::new(vec![size / 2, size / 3, size / 6], 0, MICRO_BATCH, 3, WORLD, 0)
            .expect("valid sampler");
        group.bench_with_input(BenchmarkId::new("mixing_balance", size), &mixing, |b, s| {
            b.iter(|| black_box(s.iter(1).count()))
        });
    }
    group.finish();
}

/// Resuming late in an epoch should not cost more than starting it.
fn bench_resume(c: &mut Criterion) {
    let mut group = c.benchmark_group("Resume");
    let size = 1_000_000;
    let global = MICRO_BATCH * WORLD;

    for consumed_fraction in [0usize, 50, 90] {
        let consumed = (size * consumed_fraction / 100) / global * global;
        let sampler = PretrainingRandomSampler::new(size, consumed, MICRO_BATCH, 0, WORLD, 0).expect("valid sampler");
        group.bench_with_input(
            BenchmarkId::new("random", format!("{}%", consumed_fraction)),
            &sampler,
            |b, s| b.iter(|| black_box(s.iter(0).count())),
        );
    }
    group.finish();
}

/// Loader throughput with and without workers.
fn bench_loader(c: &mut Criterion) {
    let mut group = c.benchmark_group("Loader");
    let size = 100_000;
    group.throughput(Throughput::Elements((size / WORLD) as u64));

    for workers in [0usize, 2, 4] {
        group.bench_function(BenchmarkId::new("workers", workers), |b| {
            b.iter(|| {
                let dataset = InMemoryDataset::new((0..size as i64).collect());
                let sampler = PretrainingRandomSampler::new(size, 0, MICRO_BATCH, 0, WORLD, 0).expect("valid sampler");
                let config = DataLoaderConfig::builder().num_workers(workers).build();
                let sum = |items: Vec<i64>| -> anyhow::Result<i64> { Ok(items.iter().sum()) };
                let loader = DataLoader::with_batch_sampler(dataset, sampler, config, sum).expect("valid loader");
                let total: i64 = loader
                    .iter()
                    .expect("iterator")
                    .map(|batch| batch.expect("batch"))
                    .sum();
                black_box(total)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sampler_epoch, bench_resume, bench_loader);
criterion_main!(benches);
