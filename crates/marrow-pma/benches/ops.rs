use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use marrow_pma::{IndexConfig, PmaIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const N: i64 = 1_000_000;

fn build(keys: &[i64]) -> PmaIndex {
    let mut index = PmaIndex::with_config(IndexConfig {
        segment_capacity: 128,
        pages_per_extent: 16,
    })
    .unwrap();
    for &key in keys {
        index.insert(key, key);
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(N as u64));
    group.sample_size(10);

    group.bench_function("ascending", |b| {
        let keys: Vec<i64> = (1..=N).collect();
        b.iter_batched(|| keys.clone(), |keys| build(&keys), BatchSize::PerIteration);
    });

    group.bench_function("shuffled", |b| {
        let mut keys: Vec<i64> = (1..=N).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(1));
        b.iter_batched(|| keys.clone(), |keys| build(&keys), BatchSize::PerIteration);
    });

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let keys: Vec<i64> = (1..=N).collect();
    let index = build(&keys);
    let mut probes: Vec<i64> = (1..=N).collect();
    probes.shuffle(&mut StdRng::seed_from_u64(2));

    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(probes.len() as u64));
    group.bench_function("point", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for &key in &probes {
                if index.get(black_box(key)).is_some() {
                    hits += 1;
                }
            }
            hits
        });
    });
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let keys: Vec<i64> = (1..=N).collect();
    let index = build(&keys);

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("full_iteration", |b| {
        b.iter(|| index.iter().map(|(_, v)| v).sum::<i64>());
    });
    group.bench_function("range_sum", |b| {
        b.iter(|| index.sum(black_box(N / 4), black_box(3 * N / 4)));
    });
    group.finish();
}

fn bench_bulk_load(c: &mut Criterion) {
    let batch: Vec<(i64, i64)> = (1..=N).map(|k| (k, k)).collect();

    let mut group = c.benchmark_group("bulk_load");
    group.throughput(Throughput::Elements(N as u64));
    group.sample_size(10);
    group.bench_function("sorted_into_empty", |b| {
        b.iter_batched(
            || {
                PmaIndex::with_config(IndexConfig {
                    segment_capacity: 128,
                    pages_per_extent: 16,
                })
                .unwrap()
            },
            |mut index| {
                index.load_sorted(&batch);
                index
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_scan, bench_bulk_load);
criterion_main!(benches);
