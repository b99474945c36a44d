//! Consensus aggregation of one rank's trials
//!
//! Clusters the per-trial entity factors into a consensus `A`, scores the
//! clustering with silhouettes, regresses consensus relation cores against
//! the original data and measures the consensus reconstruction error.

mod clustering;
mod silhouette;

pub use clustering::{cluster_columns, MAX_ROUNDS, TOLERANCE};
pub use silhouette::{mean_std, silhouettes, stability};

use crate::backend::{open_session, CpuOps, ExecutionDevice};
use crate::dataset::RelationalDataset;
use crate::init::random_cores;
use crate::kernel::{core_update, relative_error};
use crate::perturb::trial_rng;
use crate::scheduler::RankTrials;
use crate::{Error, Result};
use ndarray::{Array1, Array2, Array3, Array4};
use tracing::{debug, instrument};

/// Everything computed for one rank
#[derive(Debug, Clone, PartialEq)]
pub struct RankResult {
    /// Rank
    pub k: usize,
    /// Per-trial entity factors `(n, k, P)`
    pub a_all: Array3<f64>,
    /// Per-trial relation cores `(P, m, k, k)`
    pub r_all: Array4<f64>,
    /// Per-trial errors
    pub errors: Array1<f64>,
    /// Consensus entity factor `(n, k)`
    pub a: Array2<f64>,
    /// Regressed consensus relation cores
    pub r: Vec<Array2<f64>>,
    /// Silhouettes `(k, P)`
    pub sils_all: Array2<f64>,
    /// Minimum per-cluster mean silhouette
    pub sils_min: f64,
    /// Mean of per-cluster mean silhouettes
    pub sils_mean: f64,
    /// Standard deviation of per-cluster mean silhouettes
    pub sils_std: f64,
    /// Mean trial error
    pub err_mean: f64,
    /// Standard deviation of trial errors
    pub err_std: f64,
    /// Reconstruction error of the consensus factors, `0.0` when disabled
    pub err_reg: f64,
}

/// Aggregate the trials of rank `k`
///
/// Core regression runs on `device`; the core seeds are drawn from a
/// generator seeded with `k`, so the result is reproducible.
///
/// # Errors
/// [`Error::Clustering`] if the trials cannot be clustered, or a device
/// error from the regression
#[instrument(level = "debug", skip(trials, dataset), fields(n_trials = trials.n_trials()))]
pub fn aggregate(
    trials: RankTrials,
    dataset: &RelationalDataset,
    k: usize,
    device: ExecutionDevice,
    calculate_error: bool,
) -> Result<RankResult> {
    if trials.a_all.dim().1 != k {
        return Err(Error::Clustering(format!(
            "trial stack has rank {}, expected {k}",
            trials.a_all.dim().1
        )));
    }

    let (err_mean, err_std) = mean_std(&trials.errors);
    let (a, clustered) = cluster_columns(&trials.a_all)?;
    let sils_all = silhouettes(&clustered);
    let (sils_min, sils_mean, sils_std) = stability(&sils_all);

    let mut rng = trial_rng(k as u64);
    let seeds = random_cores(dataset.n_relations(), k, &mut rng);
    let r = {
        let session = open_session(device, dataset.relations())?;
        core_update(session.as_ref(), &a, seeds)?
    };

    let err_reg = if calculate_error {
        relative_error(&CpuOps::new(dataset.relations()), &a, &r)?
    } else {
        0.0
    };
    debug!(sils_min, sils_mean, err_mean, err_reg, "rank aggregated");

    Ok(RankResult {
        k,
        a_all: trials.a_all,
        r_all: trials.r_all,
        errors: trials.errors,
        a,
        r,
        sils_all,
        sils_min,
        sils_mean,
        sils_std,
        err_mean,
        err_std,
        err_reg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::TrialResult;
    use ndarray::array;

    fn dataset() -> RelationalDataset {
        let a = array![[1.0, 0.0], [0.9, 0.1], [0.0, 1.0], [0.1, 0.9]];
        let r = array![[1.0, 0.2], [0.1, 0.8]];
        RelationalDataset::from_dense(vec![a.dot(&r).dot(&a.t())]).unwrap()
    }

    fn trials() -> RankTrials {
        let base = array![[1.0, 0.0], [0.9, 0.1], [0.0, 1.0], [0.1, 0.9]];
        let results: Vec<TrialResult> = (0..4u64)
            .map(|seed| {
                let mut a = base.mapv(|x| x * (1.0 + 0.01 * seed as f64));
                if seed % 2 == 1 {
                    a.invert_axis(ndarray::Axis(1));
                }
                TrialResult {
                    seed,
                    device: ExecutionDevice::Cpu,
                    a,
                    r: vec![Array2::eye(2)],
                    error: 0.1 * (seed + 1) as f64,
                }
            })
            .collect();
        RankTrials::stack(2, &results).unwrap()
    }

    #[test]
    fn test_aggregate_statistics() {
        let result = aggregate(trials(), &dataset(), 2, ExecutionDevice::Cpu, true).unwrap();
        assert_eq!(result.a.dim(), (4, 2));
        assert_eq!(result.r.len(), 1);
        assert_eq!(result.sils_all.dim(), (2, 4));
        assert!(result.sils_min > 0.5);
        assert!(result.sils_min <= result.sils_mean);
        assert!((result.err_mean - 0.25).abs() < 1e-12);
        assert!(result.err_std > 0.0);
        assert!(result.err_reg >= 0.0 && result.err_reg < 1.0);
    }

    #[test]
    fn test_aggregate_is_reproducible() {
        let first = aggregate(trials(), &dataset(), 2, ExecutionDevice::Cpu, true).unwrap();
        let second = aggregate(trials(), &dataset(), 2, ExecutionDevice::Cpu, true).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_aggregate_without_error() {
        let result = aggregate(trials(), &dataset(), 2, ExecutionDevice::Cpu, false).unwrap();
        assert_eq!(result.err_reg, 0.0);
    }

    #[test]
    fn test_aggregate_rank_mismatch() {
        let err = aggregate(trials(), &dataset(), 3, ExecutionDevice::Cpu, true).unwrap_err();
        assert!(matches!(err, Error::Clustering(_)));
    }
}
