use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use imdedup::bktree::{HashIndex, IndexEntry};
use imdedup::hamming::range_hamming;
use imdedup::phash::PHash;
use rand::prelude::*;

fn bench_range_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("Range Query");
    let mut rng = rand::rng();
    let n = 100_000;

    let mut index = HashIndex::new();
    let mut flat = Vec::with_capacity(n * 8);
    for _ in 0..n {
        let hash = PHash::from(rng.random::<u64>());
        if index.insert(hash, IndexEntry { hash, asset_id: None }) {
            flat.extend_from_slice(&hash.0);
        }
    }
    let query = PHash::from(rng.random::<u64>());

    group.throughput(Throughput::Elements(index.len() as u64));
    for max_distance in [2, 6, 10] {
        group.bench_with_input(BenchmarkId::new("bktree", max_distance), &max_distance, |b, &d| {
            b.iter(|| index.query(black_box(&query), d).values().map(Vec::len).sum::<usize>());
        });
        group.bench_with_input(BenchmarkId::new("linear", max_distance), &max_distance, |b, &d| {
            b.iter(|| range_hamming::<64>(black_box(&query.0), &flat, d).len());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_range_query);
criterion_main!(benches);
