//! # rescalk: automatic rank selection for RESCAL
//!
//! **Version**: 0.1.0
//!
//! RESCALk picks the number of latent components of a RESCAL factorization
//! of a multi-relational dataset. For every candidate rank `k` it factorizes
//! `n_perturbs` randomly perturbed copies of the relations, clusters the
//! per-trial entity factors into consensus factors, and scores the rank by
//! how stable those clusters are (silhouettes) and how well the consensus
//! reconstructs the data.
//!
//! ## Design Principles
//!
//! - **Reproducible trials**: every trial owns a generator seeded with its
//!   perturbation index, so results never depend on worker count
//! - **Message passing**: workers return owned results; only the coordinator
//!   stacks them, re-indexed by seed
//! - **Validated builder**: every invalid option is reported at once, before
//!   any trial runs
//! - **Graceful degradation**: GPU over-requests fall back to what exists
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use ndarray::Array2;
//! use rescalk::{RelationalDataset, Rescalk};
//!
//! let block = |i: usize| i / 5;
//! let relations = (0..3)
//!     .map(|r| Array2::from_shape_fn((10, 10), |(i, j)| if (block(i) + r) % 2 == block(j) { 1.0 } else { 0.05 }))
//!     .collect();
//! let dataset = RelationalDataset::from_dense(relations)?;
//!
//! let model = Rescalk::builder()
//!     .n_perturbs(8)
//!     .n_iters(50)
//!     .n_jobs(-1)
//!     .save_output(false)
//!     .predict_k(true)
//!     .build()?;
//!
//! if let Some(result) = model.fit(&dataset, &[1, 2, 3, 4], "toy", "")? {
//!     println!("predicted k = {:?}", result.k_predict);
//! }
//! # Ok::<(), rescalk::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backend;
pub mod cluster;
pub mod config;
pub mod consensus;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod experiment;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod init;
pub mod kernel;
pub mod perturb;
pub mod resources;
pub mod scheduler;
pub mod telemetry;
pub mod trial;

pub use cluster::{Communicator, LocalCluster, LocalNode};
pub use config::RescalkConfig;
pub use controller::{Rescalk, RescalkBuilder, RunResult};
pub use dataset::{CsrMatrix, Relation, RelationalDataset};
pub use error::{Error, Result};
pub use experiment::{CollectedFactors, Compression, PlotSeries, RankSummary};
pub use init::InitMode;
pub use kernel::{FactorizationKernel, Factors, KernelMethod, KernelParams};
pub use resources::{EffectiveSettings, ResourceWarning, Resources};

use serde::{Deserialize, Serialize};

/// How trials of one rank are spread over workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParallelBackend {
    /// Dedicated rayon pool running one task per worker-owned seed list
    #[default]
    Pool,
    /// Scoped worker threads owning seeds round-robin, reporting over a channel
    Scoped,
}

impl ParallelBackend {
    /// Get backend name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::Scoped => "scoped",
        }
    }
}

impl std::str::FromStr for ParallelBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pool" => Ok(Self::Pool),
            "scoped" => Ok(Self::Scoped),
            other => Err(Error::config(format!(
                "unknown parallel backend '{other}'; choose from: pool, scoped"
            ))),
        }
    }
}
