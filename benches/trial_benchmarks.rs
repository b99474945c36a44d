//! Trial benchmarks (perturbation, initialization, full trials)
//!
//! Genchi Genbutsu: measure the per-trial cost before tuning worker counts.
//!
//! Run with: cargo bench --bench trial_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rescalk::backend::{CpuOps, ExecutionDevice};
use rescalk::init::{nnsvd, random_factor};
use rescalk::perturb::{perturb, trial_rng};
use rescalk::scheduler::TrialScheduler;
use rescalk::trial::{run_trial, TrialContext};
use rescalk::{InitMode, KernelParams, ParallelBackend, RelationalDataset};
use rescalk::kernel::RescalFroMu;
use std::sync::Arc;

const SIZES: [usize; 3] = [32, 64, 128];

/// Block-structured relations with `n` entities and three relations
#[allow(clippy::cast_precision_loss)]
fn dataset(n: usize) -> RelationalDataset {
    let blocks = 4;
    let block = |i: usize| i * blocks / n;
    let relations = (0..3)
        .map(|shift| {
            Array2::from_shape_fn((n, n), |(i, j)| {
                if (block(i) + shift) % blocks == block(j) {
                    1.0 + (i + j) as f64 / n as f64
                } else {
                    0.01
                }
            })
        })
        .collect();
    RelationalDataset::from_dense(relations).unwrap()
}

fn context(init: InitMode) -> TrialContext {
    TrialContext {
        kernel: Arc::new(RescalFroMu),
        params: KernelParams {
            n_iters: 50,
            ..KernelParams::default()
        },
        epsilon: 0.015,
        init,
        calculate_error: true,
    }
}

fn bench_perturb(c: &mut Criterion) {
    let mut group = c.benchmark_group("perturb");
    for n in SIZES {
        let data = dataset(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &data, |b, data| {
            b.iter(|| perturb(black_box(data), 0.015, 7).unwrap());
        });
    }
    group.finish();
}

fn bench_init(c: &mut Criterion) {
    let mut group = c.benchmark_group("init_k8");
    for n in SIZES {
        let data = dataset(n);
        let ops = CpuOps::new(data.relations());
        group.bench_with_input(BenchmarkId::new("nnsvd", n), &ops, |b, ops| {
            b.iter(|| nnsvd(black_box(ops), 8, &mut trial_rng(1)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("random", n), &n, |b, &n| {
            b.iter(|| random_factor(black_box(n), 8, &mut trial_rng(1)));
        });
    }
    group.finish();
}

fn bench_trial(c: &mut Criterion) {
    let mut group = c.benchmark_group("trial_k4_50iters");
    group.sample_size(20);
    for n in SIZES {
        let data = dataset(n);
        let ctx = context(InitMode::Nnsvd);
        group.bench_with_input(BenchmarkId::from_parameter(n), &data, |b, data| {
            b.iter(|| run_trial(0, black_box(data), 4, &ctx, ExecutionDevice::Cpu).unwrap());
        });
    }
    group.finish();
}

fn bench_rank_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_8perts_n64");
    group.sample_size(10);
    let data = dataset(64);
    for backend in [ParallelBackend::Pool, ParallelBackend::Scoped] {
        for n_jobs in [1, 4] {
            let scheduler = TrialScheduler::new(context(InitMode::Nnsvd), 8, n_jobs, false, backend).unwrap();
            group.bench_function(BenchmarkId::new(backend.as_str(), n_jobs), |b| {
                b.iter(|| scheduler.run_rank(black_box(&data), 4).unwrap());
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_perturb, bench_init, bench_trial, bench_rank_workers);
criterion_main!(benches);
