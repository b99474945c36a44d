//! Frobenius-norm multiplicative-update RESCAL
//!
//! Minimizes `Σ_i ‖X_i − A R_i Aᵀ‖²_F` over non-negative `A` and `R_i` by
//! alternating the standard Lee–Seung style updates:
//!
//! ```text
//! R_i ← R_i ∘ (Aᵀ X_i A) / (AᵀA R_i AᵀA)
//! A   ← A ∘ Σ_i (X_i A R_iᵀ + X_iᵀ A R_i) / (A Σ_i (R_i AᵀA R_iᵀ + R_iᵀ AᵀA R_i))
//! ```

use super::{FactorizationKernel, Factors, KernelParams, UPDATE_EPS};
use crate::backend::RelationOps;
use crate::Result;
use ndarray::{Array2, Zip};
use tracing::debug;

/// Built-in multiplicative-update solver
#[derive(Debug, Clone, Copy, Default)]
pub struct RescalFroMu;

fn multiplicative(mut x: Array2<f64>, num: &Array2<f64>, den: &Array2<f64>) -> Array2<f64> {
    Zip::from(&mut x)
        .and(num)
        .and(den)
        .for_each(|x, &n, &d| *x *= n / (d + UPDATE_EPS));
    x
}

/// One multiplicative step on every relation core with `a` held fixed
///
/// Used for core initialization inside each trial and for regressing the
/// consensus cores.
///
/// # Errors
/// Returns error if a device product fails
pub fn core_update(
    ops: &dyn RelationOps,
    a: &Array2<f64>,
    r: Vec<Array2<f64>>,
) -> Result<Vec<Array2<f64>>> {
    let gram = a.t().dot(a);
    r.into_iter()
        .enumerate()
        .map(|(i, r_i)| {
            let xa = ops.product(i, a)?;
            let num = a.t().dot(&xa);
            let den = gram.dot(&r_i).dot(&gram);
            Ok(multiplicative(r_i, &num, &den))
        })
        .collect()
}

/// One multiplicative step on the entity factor with the cores held fixed
///
/// # Errors
/// Returns error if a device product fails
pub fn factor_update(
    ops: &dyn RelationOps,
    a: Array2<f64>,
    r: &[Array2<f64>],
) -> Result<Array2<f64>> {
    let gram = a.t().dot(&a);
    let k = a.ncols();
    let mut num = Array2::<f64>::zeros(a.raw_dim());
    let mut core_sum = Array2::<f64>::zeros((k, k));

    for (i, r_i) in r.iter().enumerate() {
        let xa = ops.product(i, &a)?;
        let xta = ops.transpose_product(i, &a)?;
        num += &xa.dot(&r_i.t());
        num += &xta.dot(r_i);
        core_sum += &r_i.dot(&gram).dot(&r_i.t());
        core_sum += &r_i.t().dot(&gram).dot(r_i);
    }

    let den = a.dot(&core_sum);
    Ok(multiplicative(a, &num, &den))
}

/// Relative reconstruction error `sqrt(Σ‖X_i − A R_i Aᵀ‖²) / sqrt(Σ‖X_i‖²)`
///
/// Evaluated through `X_i A` products only, so sparse relations are never
/// densified.
///
/// # Errors
/// Returns error if a device product fails
pub fn relative_error(ops: &dyn RelationOps, a: &Array2<f64>, r: &[Array2<f64>]) -> Result<f64> {
    let gram = a.t().dot(a);
    let mut residual = 0.0;
    let mut total = 0.0;

    for (i, r_i) in r.iter().enumerate() {
        let xa = ops.product(i, a)?;
        let cross = (&a.t().dot(&xa) * r_i).sum();
        let model = (&r_i.t().dot(&gram).dot(r_i) * &gram).sum();
        let norm = ops.frobenius_sq(i);
        residual += 2.0f64.mul_add(-cross, norm) + model;
        total += norm;
    }

    if total <= 0.0 {
        return Ok(0.0);
    }
    Ok((residual.max(0.0) / total).sqrt())
}

impl FactorizationKernel for RescalFroMu {
    fn name(&self) -> &str {
        "rescal_fro_mu"
    }

    fn factorize(
        &self,
        ops: &dyn RelationOps,
        mut a: Array2<f64>,
        mut r: Vec<Array2<f64>>,
        params: &KernelParams,
    ) -> anyhow::Result<Factors> {
        anyhow::ensure!(
            r.len() == ops.n_relations(),
            "{} relation cores for {} relations",
            r.len(),
            ops.n_relations()
        );
        anyhow::ensure!(
            a.nrows() == ops.n_entities(),
            "entity factor has {} rows, expected {}",
            a.nrows(),
            ops.n_entities()
        );

        for iteration in 0..params.n_iters {
            r = core_update(ops, &a, r)?;
            a = factor_update(ops, a, &r)?;
            if params.verbose && (iteration + 1) % 10 == 0 {
                debug!(
                    iteration = iteration + 1,
                    n_iters = params.n_iters,
                    device = %ops.device(),
                    "rescal_fro_mu progress"
                );
            }
        }

        let finite = a.iter().all(|v| v.is_finite())
            && r.iter().all(|r_i| r_i.iter().all(|v| v.is_finite()));
        anyhow::ensure!(finite, "non-finite factors after {} iterations", params.n_iters);

        Ok(Factors { a, r })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuOps;
    use crate::dataset::Relation;
    use ndarray::array;

    fn planted() -> (Vec<Relation>, Array2<f64>, Vec<Array2<f64>>) {
        let a = array![[1.0, 0.0], [0.8, 0.1], [0.0, 1.0], [0.1, 0.9]];
        let r = vec![array![[1.0, 0.2], [0.0, 0.5]], array![[0.3, 0.0], [0.7, 1.0]]];
        let relations = r
            .iter()
            .map(|r_i| Relation::Dense(a.dot(r_i).dot(&a.t())))
            .collect();
        (relations, a, r)
    }

    #[test]
    fn test_relative_error_zero_for_exact_model() {
        let (relations, a, r) = planted();
        let ops = CpuOps::new(&relations);
        let err = relative_error(&ops, &a, &r).unwrap();
        assert!(err < 1e-6, "error {err}");
    }

    #[test]
    fn test_relative_error_one_for_zero_model() {
        let (relations, a, r) = planted();
        let ops = CpuOps::new(&relations);
        let zeros: Vec<Array2<f64>> = r.iter().map(|r_i| Array2::zeros(r_i.raw_dim())).collect();
        let err = relative_error(&ops, &a, &zeros).unwrap();
        assert!((err - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_updates_keep_non_negativity() {
        let (relations, _, _) = planted();
        let ops = CpuOps::new(&relations);
        let a0 = Array2::from_elem((4, 2), 0.5);
        let r0 = vec![Array2::from_elem((2, 2), 0.5); 2];
        let r1 = core_update(&ops, &a0, r0).unwrap();
        let a1 = factor_update(&ops, a0, &r1).unwrap();
        assert!(a1.iter().all(|&v| v >= 0.0));
        assert!(r1.iter().all(|r_i| r_i.iter().all(|&v| v >= 0.0)));
    }

    #[test]
    fn test_kernel_reduces_error() {
        let (relations, _, _) = planted();
        let ops = CpuOps::new(&relations);
        let a0 = array![[0.6, 0.4], [0.5, 0.5], [0.3, 0.7], [0.4, 0.6]];
        let r0 = vec![Array2::from_elem((2, 2), 0.5); 2];
        let before = relative_error(&ops, &a0, &r0).unwrap();

        let params = KernelParams {
            n_iters: 200,
            ..KernelParams::default()
        };
        let fitted = RescalFroMu.factorize(&ops, a0, r0, &params).unwrap();
        let after = relative_error(&ops, &fitted.a, &fitted.r).unwrap();

        assert!(after < before, "before {before}, after {after}");
        assert!(after < 0.5, "after {after}");
    }

    #[test]
    fn test_kernel_rejects_core_count_mismatch() {
        let (relations, _, _) = planted();
        let ops = CpuOps::new(&relations);
        let result = RescalFroMu.factorize(
            &ops,
            Array2::from_elem((4, 2), 0.5),
            vec![Array2::from_elem((2, 2), 0.5)],
            &KernelParams::default(),
        );
        assert!(result.unwrap_err().to_string().contains("1 relation cores for 2 relations"));
    }
}
