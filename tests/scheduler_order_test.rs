//! Trial results are indexed by perturbation seed, whatever the worker layout

use ndarray::{array, s, Array2};
use rescalk::backend::{assign_device, ExecutionDevice, RelationOps};
use rescalk::scheduler::TrialScheduler;
use rescalk::trial::{run_trial, TrialContext};
use rescalk::{
    Error, FactorizationKernel, Factors, InitMode, KernelParams, ParallelBackend, RelationalDataset,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Returns its initial factors unchanged after a seed-dependent delay
#[derive(Debug, Default)]
struct EchoKernel {
    calls: AtomicUsize,
}

impl FactorizationKernel for EchoKernel {
    fn name(&self) -> &str {
        "echo"
    }

    fn factorize(
        &self,
        _ops: &dyn RelationOps,
        a: Array2<f64>,
        r: Vec<Array2<f64>>,
        _params: &KernelParams,
    ) -> anyhow::Result<Factors> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // uneven finishing order across workers
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay = (a[[0, 0]] * 5.0) as u64;
        thread::sleep(Duration::from_millis(delay));
        Ok(Factors { a, r })
    }
}

/// Counts trials running at once on each device slot
///
/// Trials are recognised by their initial factor, which is a pure function
/// of the seed.
#[derive(Debug)]
struct SlotOccupancyKernel {
    seeds: HashMap<u64, usize>,
    n_jobs: usize,
    active: Vec<AtomicUsize>,
    peak: AtomicUsize,
}

impl SlotOccupancyKernel {
    fn new(seeds: HashMap<u64, usize>, n_jobs: usize) -> Self {
        Self {
            seeds,
            n_jobs,
            active: (0..n_jobs).map(|_| AtomicUsize::new(0)).collect(),
            peak: AtomicUsize::new(0),
        }
    }
}

impl FactorizationKernel for SlotOccupancyKernel {
    fn name(&self) -> &str {
        "slot-occupancy"
    }

    fn factorize(
        &self,
        _ops: &dyn RelationOps,
        a: Array2<f64>,
        r: Vec<Array2<f64>>,
        _params: &KernelParams,
    ) -> anyhow::Result<Factors> {
        let seed = self.seeds[&a[[0, 0]].to_bits()];
        let ExecutionDevice::Gpu(slot) = assign_device(seed as u64, self.n_jobs, true) else {
            anyhow::bail!("no slot for seed {seed}");
        };
        let running = self.active[slot].fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        // one slow trial so idle workers look for more work
        thread::sleep(Duration::from_millis(if seed == 0 { 200 } else { 10 }));
        self.active[slot].fetch_sub(1, Ordering::SeqCst);
        Ok(Factors { a, r })
    }
}

#[derive(Debug)]
struct FailingKernel;

impl FactorizationKernel for FailingKernel {
    fn name(&self) -> &str {
        "failing"
    }

    fn factorize(
        &self,
        _ops: &dyn RelationOps,
        _a: Array2<f64>,
        _r: Vec<Array2<f64>>,
        _params: &KernelParams,
    ) -> anyhow::Result<Factors> {
        anyhow::bail!("solver diverged")
    }
}

fn dataset() -> RelationalDataset {
    RelationalDataset::from_dense(vec![
        array![[1.0, 0.5, 0.0, 0.1], [0.5, 1.0, 0.1, 0.0], [0.0, 0.1, 1.0, 0.5], [0.1, 0.0, 0.5, 1.0]],
        array![[0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0], [1.0, 0.0, 0.0, 0.0]],
    ])
    .unwrap()
}

fn context(kernel: Arc<dyn FactorizationKernel>) -> TrialContext {
    TrialContext {
        kernel,
        params: KernelParams::default(),
        epsilon: 0.05,
        init: InitMode::Random,
        calculate_error: true,
    }
}

#[test]
fn test_trials_stacked_by_seed_for_every_layout() {
    let data = dataset();
    let n_perturbs = 8;
    let kernel = Arc::new(EchoKernel::default());

    let reference = TrialScheduler::new(context(kernel.clone()), n_perturbs, 1, false, ParallelBackend::Pool)
        .unwrap()
        .run_rank(&data, 2)
        .unwrap();

    for backend in [ParallelBackend::Pool, ParallelBackend::Scoped] {
        for n_jobs in [2, 4] {
            let trials = TrialScheduler::new(context(kernel.clone()), n_perturbs, n_jobs, false, backend)
                .unwrap()
                .run_rank(&data, 2)
                .unwrap();
            assert_eq!(trials, reference, "{backend:?} with {n_jobs} workers");
        }
    }
    assert_eq!(kernel.calls.load(Ordering::SeqCst), 5 * n_perturbs);

    // slot p holds exactly what a standalone trial with seed p produces
    for p in 0..n_perturbs {
        let single = run_trial(p as u64, &data, 2, &context(kernel.clone()), ExecutionDevice::Cpu).unwrap();
        assert_eq!(reference.a_all.slice(s![.., .., p]), single.a);
        assert_eq!(reference.errors[p], single.error);
    }
}

#[test]
fn test_trial_failure_aborts_rank() {
    let data = dataset();
    for backend in [ParallelBackend::Pool, ParallelBackend::Scoped] {
        let err = TrialScheduler::new(context(Arc::new(FailingKernel)), 4, 2, false, backend)
            .unwrap()
            .run_rank(&data, 3)
            .unwrap_err();
        match err {
            Error::Kernel { k, source, .. } => {
                assert_eq!(k, 3);
                assert!(source.to_string().contains("solver diverged"));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}

#[test]
fn test_scoped_reports_lowest_failing_seed() {
    let err = TrialScheduler::new(context(Arc::new(FailingKernel)), 6, 3, false, ParallelBackend::Scoped)
        .unwrap()
        .run_rank(&dataset(), 2)
        .unwrap_err();
    assert!(matches!(err, Error::Kernel { seed: 0, .. }));
}

#[test]
fn test_one_trial_per_device_slot() {
    let data = dataset();
    let n_perturbs = 8;
    let n_jobs = 2;

    let echo: Arc<dyn FactorizationKernel> = Arc::new(EchoKernel::default());
    let seeds: HashMap<u64, usize> = (0..n_perturbs)
        .map(|p| {
            let trial = run_trial(p as u64, &data, 2, &context(echo.clone()), ExecutionDevice::Cpu).unwrap();
            (trial.a[[0, 0]].to_bits(), p)
        })
        .collect();
    assert_eq!(seeds.len(), n_perturbs);

    for backend in [ParallelBackend::Pool, ParallelBackend::Scoped] {
        let kernel = Arc::new(SlotOccupancyKernel::new(seeds.clone(), n_jobs));
        TrialScheduler::new(context(kernel.clone()), n_perturbs, n_jobs, false, backend)
            .unwrap()
            .run_rank(&data, 2)
            .unwrap();
        assert_eq!(kernel.peak.load(Ordering::SeqCst), 1, "{backend:?}");
    }
}
