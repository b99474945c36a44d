//! Trial scheduling across a bounded worker pool
//!
//! Every rank runs the same `n_perturbs` seeds `0..P`. Workers receive the
//! shared dataset by reference and return owned [`TrialResult`]s; the
//! coordinator alone stacks them, re-indexed by seed, so the output never
//! depends on how many workers ran or in which order they finished.

use crate::backend::{assign_device, ExecutionDevice};
use crate::dataset::RelationalDataset;
use crate::trial::{run_trial, TrialContext, TrialResult};
use crate::{Error, ParallelBackend, Result};
use ndarray::{s, Array1, Array3, Array4};
use rayon::prelude::*;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, instrument};

/// Per-rank trial outputs stacked in seed order
#[derive(Debug, Clone, PartialEq)]
pub struct RankTrials {
    /// Rank
    pub k: usize,
    /// Entity factors, shape `(n, k, P)`
    pub a_all: Array3<f64>,
    /// Relation cores, shape `(P, m, k, k)`
    pub r_all: Array4<f64>,
    /// Per-trial errors, length `P`
    pub errors: Array1<f64>,
    /// Device each trial ran on
    pub devices: Vec<ExecutionDevice>,
}

impl RankTrials {
    /// Stack trial results; `results[p]` must hold seed `p`
    ///
    /// # Errors
    /// Returns [`Error::Clustering`] if there are no results or shapes differ
    pub fn stack(k: usize, results: &[TrialResult]) -> Result<Self> {
        let Some(first) = results.first() else {
            return Err(Error::Clustering(format!("no trial results for k={k}")));
        };
        let n = first.a.nrows();
        let m = first.r.len();
        let p_total = results.len();

        let mut a_all = Array3::<f64>::zeros((n, k, p_total));
        let mut r_all = Array4::<f64>::zeros((p_total, m, k, k));
        let mut errors = Array1::<f64>::zeros(p_total);
        let mut devices = Vec::with_capacity(p_total);

        for (p, trial) in results.iter().enumerate() {
            if trial.a.dim() != (n, k) || trial.r.len() != m {
                return Err(Error::Clustering(format!(
                    "trial {p} has A {:?} and {} cores; expected ({n}, {k}) and {m}",
                    trial.a.dim(),
                    trial.r.len()
                )));
            }
            a_all.slice_mut(s![.., .., p]).assign(&trial.a);
            for (i, r_i) in trial.r.iter().enumerate() {
                r_all.slice_mut(s![p, i, .., ..]).assign(r_i);
            }
            errors[p] = trial.error;
            devices.push(trial.device);
        }

        Ok(Self {
            k,
            a_all,
            r_all,
            errors,
            devices,
        })
    }

    /// Number of trials `P`
    #[must_use]
    pub fn n_trials(&self) -> usize {
        self.errors.len()
    }
}

/// Fans trials out over `n_jobs` workers
#[derive(Debug)]
pub struct TrialScheduler {
    context: TrialContext,
    n_perturbs: usize,
    n_jobs: usize,
    use_gpu: bool,
    backend: ParallelBackend,
    pool: Option<rayon::ThreadPool>,
}

impl TrialScheduler {
    /// Create a scheduler
    ///
    /// `n_jobs` must already be resolved against the available resources.
    ///
    /// # Errors
    /// Returns error if the worker pool cannot be created
    pub fn new(
        context: TrialContext,
        n_perturbs: usize,
        n_jobs: usize,
        use_gpu: bool,
        backend: ParallelBackend,
    ) -> Result<Self> {
        let n_jobs = n_jobs.clamp(1, n_perturbs.max(1));
        let pool = if n_jobs > 1 && backend == ParallelBackend::Pool {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_jobs)
                .thread_name(|i| format!("rescalk-trial-{i}"))
                .build()
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            context,
            n_perturbs,
            n_jobs,
            use_gpu,
            backend,
            pool,
        })
    }

    /// Number of workers
    #[must_use]
    pub const fn n_jobs(&self) -> usize {
        self.n_jobs
    }

    /// Trial context shared by every trial
    #[must_use]
    pub const fn context(&self) -> &TrialContext {
        &self.context
    }

    fn device_for(&self, p: usize) -> ExecutionDevice {
        assign_device(p as u64, self.n_jobs, self.use_gpu)
    }

    fn trial(&self, dataset: &RelationalDataset, k: usize, p: usize) -> Result<TrialResult> {
        run_trial(p as u64, dataset, k, &self.context, self.device_for(p))
    }

    /// Run all trials of rank `k`
    ///
    /// # Errors
    /// The first failing trial aborts the rank
    #[instrument(level = "debug", skip(self, dataset), fields(n_jobs = self.n_jobs, backend = ?self.backend))]
    pub fn run_rank(&self, dataset: &RelationalDataset, k: usize) -> Result<RankTrials> {
        let results = match (&self.pool, self.backend) {
            _ if self.n_jobs == 1 => self.run_sequential(dataset, k)?,
            (Some(pool), ParallelBackend::Pool) => self.run_pool(pool, dataset, k)?,
            _ => self.run_scoped(dataset, k)?,
        };
        debug!(trials = results.len(), "rank trials collected");
        RankTrials::stack(k, &results)
    }

    fn run_sequential(&self, dataset: &RelationalDataset, k: usize) -> Result<Vec<TrialResult>> {
        (0..self.n_perturbs).map(|p| self.trial(dataset, k, p)).collect()
    }

    /// Seeds owned by `worker`: `worker, worker + n_jobs, …`
    ///
    /// Every seed a worker owns maps to the same device slot, so a worker
    /// running its seeds one after another keeps each slot single-occupied.
    fn owned_seeds(&self, worker: usize) -> impl Iterator<Item = usize> {
        (worker..self.n_perturbs).step_by(self.n_jobs)
    }

    /// Run a worker's seeds in order, stopping at its first failure
    fn run_worker(
        &self,
        dataset: &RelationalDataset,
        k: usize,
        worker: usize,
    ) -> Vec<(usize, Result<TrialResult>)> {
        let mut out = Vec::new();
        for p in self.owned_seeds(worker) {
            let result = self.trial(dataset, k, p);
            let failed = result.is_err();
            out.push((p, result));
            if failed {
                break;
            }
        }
        out
    }

    /// One pool task per worker; tasks never split a worker's seed list
    fn run_pool(
        &self,
        pool: &rayon::ThreadPool,
        dataset: &RelationalDataset,
        k: usize,
    ) -> Result<Vec<TrialResult>> {
        let batches: Vec<Vec<(usize, Result<TrialResult>)>> = pool.install(|| {
            (0..self.n_jobs)
                .into_par_iter()
                .map(|worker| self.run_worker(dataset, k, worker))
                .collect()
        });
        self.reindex(batches.into_iter().flatten())
    }

    /// One scoped thread per worker, reporting `(seed, result)` over a channel
    fn run_scoped(&self, dataset: &RelationalDataset, k: usize) -> Result<Vec<TrialResult>> {
        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<(usize, Result<TrialResult>)>();
            for worker in 0..self.n_jobs {
                let tx = tx.clone();
                scope.spawn(move || {
                    for p in self.owned_seeds(worker) {
                        let result = self.trial(dataset, k, p);
                        let failed = result.is_err();
                        if tx.send((p, result)).is_err() || failed {
                            break;
                        }
                    }
                });
            }
            drop(tx);
            self.reindex(rx)
        })
    }

    /// Place results by seed; the lowest failing seed wins
    fn reindex(
        &self,
        results: impl IntoIterator<Item = (usize, Result<TrialResult>)>,
    ) -> Result<Vec<TrialResult>> {
        let mut slots: Vec<Option<TrialResult>> = (0..self.n_perturbs).map(|_| None).collect();
        let mut first_error: Option<(usize, Error)> = None;

        for (p, result) in results {
            match result {
                Ok(trial) => slots[p] = Some(trial),
                Err(e) => {
                    if first_error.as_ref().map_or(true, |(q, _)| p < *q) {
                        first_error = Some((p, e));
                    }
                }
            }
        }

        if let Some((_, e)) = first_error {
            return Err(e);
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(p, slot)| slot.ok_or_else(|| Error::Clustering(format!("trial {p} produced no result"))))
            .collect()
    }
}
