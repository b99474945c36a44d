//! Consensus benchmarks (clustering and silhouettes over trial stacks)
//!
//! Run with: cargo bench --bench consensus_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array3;
use rand::Rng;
use rescalk::consensus::{cluster_columns, silhouettes};
use rescalk::perturb::trial_rng;

/// `(n, k, P)` stack of noisy, column-permuted copies of one factor
fn stack(n: usize, k: usize, p_total: usize) -> Array3<f64> {
    let mut rng = trial_rng(42);
    let base: Vec<f64> = (0..n * k).map(|_| rng.gen::<f64>()).collect();
    Array3::from_shape_fn((n, k, p_total), |(i, c, p)| {
        let source = (c + p) % k;
        base[i * k + source] * (1.0 + 0.01 * ((i + p) % 7) as f64)
    })
}

fn bench_cluster(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_columns");
    for (n, k, p) in [(100, 4, 20), (500, 8, 20), (1000, 16, 50)] {
        let a_all = stack(n, k, p);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{n}x{k}x{p}")), &a_all, |b, a_all| {
            b.iter(|| cluster_columns(black_box(a_all)).unwrap());
        });
    }
    group.finish();
}

fn bench_silhouettes(c: &mut Criterion) {
    let mut group = c.benchmark_group("silhouettes");
    for (n, k, p) in [(100, 4, 20), (500, 8, 20), (1000, 16, 50)] {
        let (_, clustered) = cluster_columns(&stack(n, k, p)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{n}x{k}x{p}")), &clustered, |b, clustered| {
            b.iter(|| silhouettes(black_box(clustered)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cluster, bench_silhouettes);
criterion_main!(benches);
