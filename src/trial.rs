//! A single perturbation trial
//!
//! A trial is a pure function of `(seed, k, dataset)`: perturb the relations,
//! initialize the factors, fit them with the configured kernel on the
//! assigned device, and measure the fit against the unperturbed data.

use crate::backend::{open_session, CpuOps, ExecutionDevice};
use crate::dataset::RelationalDataset;
use crate::init::{initialize, random_cores, InitMode};
use crate::kernel::{core_update, relative_error, FactorizationKernel, KernelParams};
use crate::perturb::{perturb_with, trial_rng};
use crate::{Error, Result};
use ndarray::Array2;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Everything a trial needs besides its seed, rank and device
#[derive(Debug, Clone)]
pub struct TrialContext {
    /// Solver
    pub kernel: Arc<dyn FactorizationKernel>,
    /// Parameters handed to the solver
    pub params: KernelParams,
    /// Perturbation noise level
    pub epsilon: f64,
    /// Entity factor initialization
    pub init: InitMode,
    /// Whether to compute the reconstruction error
    pub calculate_error: bool,
}

/// Fitted factors of one trial
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    /// Perturbation seed
    pub seed: u64,
    /// Device the kernel ran on
    pub device: ExecutionDevice,
    /// Entity factor (n×k)
    pub a: Array2<f64>,
    /// Relation cores (m × k×k)
    pub r: Vec<Array2<f64>>,
    /// Relative error against the original data, `0.0` when disabled
    pub error: f64,
}

/// Run the trial with perturbation `seed` at rank `k` on `device`
///
/// The device session is dropped before the error computation, so device
/// memory is released before the result leaves the worker.
///
/// # Errors
/// [`Error::Kernel`] if the solver fails or returns factors of the wrong
/// shape, and any device or perturbation error
#[instrument(level = "debug", skip(dataset, context, device), fields(device = %device))]
pub fn run_trial(
    seed: u64,
    dataset: &RelationalDataset,
    k: usize,
    context: &TrialContext,
    device: ExecutionDevice,
) -> Result<TrialResult> {
    let n = dataset.n_entities();
    let m = dataset.n_relations();
    let mut rng = trial_rng(seed);
    let perturbation = perturb_with(dataset, context.epsilon, seed, &mut rng)?;

    let factors = {
        let session = open_session(device, perturbation.relations())?;
        let a = initialize(context.init, session.as_ref(), k, &mut rng)?;
        let r = core_update(session.as_ref(), &a, random_cores(m, k, &mut rng))?;
        context
            .kernel
            .factorize(session.as_ref(), a, r, &context.params)
            .map_err(|source| Error::Kernel {
                k,
                seed,
                source: source.into(),
            })?
    };

    let shape_ok = factors.a.dim() == (n, k)
        && factors.r.len() == m
        && factors.r.iter().all(|r_i| r_i.dim() == (k, k));
    if !shape_ok {
        return Err(Error::Kernel {
            k,
            seed,
            source: format!(
                "kernel '{}' returned A {:?} with {} cores, expected A ({n}, {k}) with {m} cores of ({k}, {k})",
                context.kernel.name(),
                factors.a.dim(),
                factors.r.len()
            )
            .into(),
        });
    }

    let error = if context.calculate_error {
        relative_error(&CpuOps::new(dataset.relations()), &factors.a, &factors.r)?
    } else {
        0.0
    };
    debug!(error, "trial complete");

    Ok(TrialResult {
        seed,
        device,
        a: factors.a,
        r: factors.r,
        error,
    })
}
