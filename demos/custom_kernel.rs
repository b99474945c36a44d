//! Plugging in a user-supplied factorization kernel
//!
//! The kernel below runs the built-in multiplicative updates but stops early
//! once the relative error stops improving; its tolerance is read from the
//! free-form `kernel_params`.
//!
//! Run with: cargo run --example custom_kernel

use ndarray::Array2;
use rescalk::backend::RelationOps;
use rescalk::kernel::{core_update, factor_update, relative_error};
use rescalk::telemetry::init_tracing;
use rescalk::{FactorizationKernel, Factors, KernelParams, RelationalDataset, Rescalk};
use std::sync::Arc;

#[derive(Debug)]
struct EarlyStopping;

impl FactorizationKernel for EarlyStopping {
    fn name(&self) -> &str {
        "early_stopping_mu"
    }

    fn factorize(
        &self,
        ops: &dyn RelationOps,
        mut a: Array2<f64>,
        mut r: Vec<Array2<f64>>,
        params: &KernelParams,
    ) -> anyhow::Result<Factors> {
        let tol = params.extra.get("tol").and_then(serde_json::Value::as_f64).unwrap_or(1e-6);
        let mut previous = f64::INFINITY;

        for iteration in 0..params.n_iters {
            r = core_update(ops, &a, r)?;
            a = factor_update(ops, a, &r)?;
            if iteration % 10 == 9 {
                let error = relative_error(ops, &a, &r)?;
                if previous - error < tol {
                    break;
                }
                previous = error;
            }
        }
        Ok(Factors { a, r })
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let n = 24;
    let half = |i: usize| usize::from(i >= n / 2);
    let dataset = RelationalDataset::from_dense(vec![
        Array2::from_shape_fn((n, n), |(i, j)| if half(i) == half(j) { 1.0 } else { 0.05 }),
        Array2::from_shape_fn((n, n), |(i, j)| if half(i) < half(j) { 1.0 } else { 0.05 }),
    ])?;

    let model = Rescalk::builder()
        .kernel(Arc::new(EarlyStopping))
        .kernel_params(serde_json::json!({ "tol": 1e-5 }))
        .n_perturbs(8)
        .n_iters(500)
        .n_jobs(-1)
        .save_output(false)
        .predict_k(true)
        .build()?;

    if let Some(result) = model.fit(&dataset, &[1, 2, 3, 4], "custom", "")? {
        for row in &result.rows {
            println!("k={} sils_min={:.3} err_reg={:.4}", row.k, row.sils_min, row.err_reg);
        }
        println!("predicted k: {:?}", result.k_predict);
    }
    Ok(())
}
