//! Factor initialization
//!
//! `A` is initialized either from NNSVD of the horizontally concatenated
//! relations `M = [Y_1 … Y_m, Y_1ᵀ … Y_mᵀ]` or uniformly at random. NNSVD
//! never materializes `M`: the leading left singular vectors come from
//! subspace iteration on `M Mᵀ = Σ (Y_i Y_iᵀ + Y_iᵀ Y_i)` using only the
//! `X·a` and `Xᵀ·a` products a device session provides.

use crate::backend::RelationOps;
use crate::perturb::TrialRng;
use crate::Result;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Subspace iteration rounds used by [`nnsvd`]
pub const SUBSPACE_ITERS: usize = 48;

const NEGLIGIBLE: f64 = 1e-12;

/// How the entity factor is initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMode {
    /// Non-negative double SVD with zero entries filled by the data mean
    #[default]
    Nnsvd,
    /// `Uniform[0, 1)` entries
    Random,
}

impl InitMode {
    /// Name as accepted by [`FromStr`]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Nnsvd => "nnsvd",
            Self::Random => "random",
        }
    }
}

impl FromStr for InitMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nnsvd" => Ok(Self::Nnsvd),
            "random" => Ok(Self::Random),
            other => Err(crate::Error::config(format!(
                "unknown init mode '{other}'; choose from: nnsvd, random"
            ))),
        }
    }
}

/// Initialize the entity factor for rank `k`
///
/// # Errors
/// Returns error if a device product fails
pub fn initialize(
    mode: InitMode,
    ops: &dyn RelationOps,
    k: usize,
    rng: &mut TrialRng,
) -> Result<Array2<f64>> {
    match mode {
        InitMode::Nnsvd => nnsvd(ops, k, rng),
        InitMode::Random => Ok(random_factor(ops.n_entities(), k, rng)),
    }
}

/// `n×k` matrix of `Uniform[0, 1)` entries
pub fn random_factor(n: usize, k: usize, rng: &mut TrialRng) -> Array2<f64> {
    Array2::from_shape_simple_fn((n, k), || rng.gen::<f64>())
}

/// `m` core seeds, each `k×k` with `Uniform[0, 1)` entries
pub fn random_cores(m: usize, k: usize, rng: &mut TrialRng) -> Vec<Array2<f64>> {
    (0..m).map(|_| random_factor(k, k, rng)).collect()
}

/// NNSVD initialization of `A` (NNDSVD, zero entries replaced by the mean)
///
/// The generator only seeds the starting subspace; the result is
/// deterministic for a given generator state.
///
/// # Errors
/// Returns error if a device product fails
pub fn nnsvd(ops: &dyn RelationOps, k: usize, rng: &mut TrialRng) -> Result<Array2<f64>> {
    let n = ops.n_entities();
    let m = ops.n_relations();

    let mut q = orthonormalize(&random_factor(n, k, rng));
    for _ in 0..SUBSPACE_ITERS {
        q = orthonormalize(&gram_product(ops, &q)?);
    }

    let projected = q.t().dot(&gram_product(ops, &q)?);
    let (eigenvalues, eigenvectors) = symmetric_eigen(&projected);
    let u = q.dot(&eigenvectors);

    let mean = data_sum(ops)? / (m as f64 * (n * n) as f64);
    let mut a = Array2::<f64>::zeros((n, k));

    for j in 0..k {
        let sigma = eigenvalues[j].max(0.0).sqrt();
        if sigma <= NEGLIGIBLE {
            continue;
        }
        let u_j = u.column(j).to_owned();

        if j == 0 {
            a.column_mut(0).assign(&u_j.mapv(|x| sigma.sqrt() * x.abs()));
            continue;
        }

        let u_pos = u_j.mapv(|x| x.max(0.0));
        let u_neg = u_j.mapv(|x| (-x).max(0.0));
        let (v_pos, v_neg) = right_vector_norms(ops, &u_j, sigma)?;
        let u_pos_norm = norm(&u_pos);
        let u_neg_norm = norm(&u_neg);

        let pos = u_pos_norm * v_pos;
        let neg = u_neg_norm * v_neg;
        let (dir, dir_norm, weight) = if pos > neg {
            (u_pos, u_pos_norm, pos)
        } else {
            (u_neg, u_neg_norm, neg)
        };
        if dir_norm <= NEGLIGIBLE {
            continue;
        }
        let scale = (sigma * weight).sqrt() / dir_norm;
        a.column_mut(j).assign(&(dir * scale));
    }

    a.mapv_inplace(|x| if x <= NEGLIGIBLE { mean } else { x });
    Ok(a)
}

/// `Σ (Y_i Y_iᵀ + Y_iᵀ Y_i) · q`
fn gram_product(ops: &dyn RelationOps, q: &Array2<f64>) -> Result<Array2<f64>> {
    let mut out = Array2::<f64>::zeros(q.raw_dim());
    for i in 0..ops.n_relations() {
        let yt_q = ops.transpose_product(i, q)?;
        out += &ops.product(i, &yt_q)?;
        let y_q = ops.product(i, q)?;
        out += &ops.transpose_product(i, &y_q)?;
    }
    Ok(out)
}

/// Norms of the positive and negative parts of `v = Mᵀ u / σ`
///
/// `Mᵀ u` stacks `Y_iᵀ u` for every relation followed by `Y_i u`.
fn right_vector_norms(ops: &dyn RelationOps, u: &Array1<f64>, sigma: f64) -> Result<(f64, f64)> {
    let column = u.clone().insert_axis(Axis(1));
    let mut pos_sq = 0.0;
    let mut neg_sq = 0.0;
    for i in 0..ops.n_relations() {
        for block in [ops.transpose_product(i, &column)?, ops.product(i, &column)?] {
            for &x in &block {
                let v = x / sigma;
                if v > 0.0 {
                    pos_sq += v * v;
                } else {
                    neg_sq += v * v;
                }
            }
        }
    }
    Ok((pos_sq.sqrt(), neg_sq.sqrt()))
}

fn data_sum(ops: &dyn RelationOps) -> Result<f64> {
    let ones = Array2::<f64>::ones((ops.n_entities(), 1));
    let mut total = 0.0;
    for i in 0..ops.n_relations() {
        total += ops.product(i, &ones)?.sum();
    }
    Ok(total)
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Orthonormal basis of the column space (thin QR, `Q` factor)
fn orthonormalize(q: &Array2<f64>) -> Array2<f64> {
    from_dmatrix(&to_dmatrix(q).qr().q())
}

/// Eigen-decomposition of a small symmetric matrix
///
/// Eigenvalues are returned in descending order with eigenvectors as the
/// matching columns.
fn symmetric_eigen(t: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let eigen = SymmetricEigen::new(to_dmatrix(t));
    let k = eigen.eigenvalues.len();

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let vectors = Array2::from_shape_fn((t.nrows(), k), |(row, col)| eigen.eigenvectors[(row, order[col])]);
    (values, vectors)
}
