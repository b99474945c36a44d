//! Factorization kernels
//!
//! The orchestration core never depends on a particular solver: it hands a
//! kernel the device-resident relations plus initial factors and receives the
//! fitted factors back. The built-in [`RescalFroMu`] implements the Frobenius
//! multiplicative-update RESCAL solver; callers may plug in their own solver
//! through [`FactorizationKernel`].

mod rescal_fro_mu;

pub use rescal_fro_mu::{core_update, factor_update, relative_error, RescalFroMu};

use crate::backend::RelationOps;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Guard added to multiplicative-update denominators
pub const UPDATE_EPS: f64 = f64::EPSILON;

/// Entity factor and relation cores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factors {
    /// Entity factor `A` (n×k)
    pub a: Array2<f64>,
    /// Relation cores `R_1..R_m` (each k×k)
    pub r: Vec<Array2<f64>>,
}

/// Parameters handed to a kernel on every call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    /// Number of solver iterations
    pub n_iters: usize,
    /// Emit per-iteration progress
    pub verbose: bool,
    /// Kernel-specific options for user-supplied kernels
    pub extra: serde_json::Value,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            n_iters: 100,
            verbose: false,
            extra: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// A RESCAL solver
///
/// Implementations must be pure functions of their inputs: the scheduler may
/// call them concurrently from several workers and relies on identical
/// inputs producing identical outputs.
pub trait FactorizationKernel: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Refine `a` and `r` against the relations held by `ops`
    ///
    /// # Errors
    /// Any solver failure; the run aborts without retry
    fn factorize(
        &self,
        ops: &dyn RelationOps,
        a: Array2<f64>,
        r: Vec<Array2<f64>>,
        params: &KernelParams,
    ) -> anyhow::Result<Factors>;
}

impl fmt::Debug for dyn FactorizationKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorizationKernel")
            .field("name", &self.name())
            .finish()
    }
}

/// Kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelMethod {
    /// Built-in Frobenius multiplicative-update RESCAL
    #[default]
    RescalFroMu,
    /// User-supplied kernel (see `RescalkBuilder::kernel`)
    Func,
}

impl KernelMethod {
    /// Name as accepted by [`FromStr`]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RescalFroMu => "rescal_fro_mu",
            Self::Func => "func",
        }
    }
}

impl FromStr for KernelMethod {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "rescal_fro_mu" => Ok(Self::RescalFroMu),
            "func" => Ok(Self::Func),
            other => Err(crate::Error::config(format!(
                "unknown kernel method '{other}'; choose from: rescal_fro_mu, func"
            ))),
        }
    }
}
