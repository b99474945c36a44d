//! Run configuration
//!
//! `RescalkConfig` carries every option of a run. It can be built in code
//! through [`crate::RescalkBuilder`] or loaded from JSON; missing keys take
//! their defaults and unknown keys are rejected.
//!
//! ```rust
//! use rescalk::RescalkConfig;
//!
//! let config = RescalkConfig::from_json_str(r#"{ "n_perturbs": 8, "init": "random" }"#)?;
//! assert_eq!(config.n_perturbs, 8);
//! assert_eq!(config.n_iters, 100);
//! # Ok::<(), rescalk::Error>(())
//! ```

use crate::experiment::Compression;
use crate::init::InitMode;
use crate::kernel::KernelMethod;
use crate::perturb::validate_epsilon;
use crate::{Error, ParallelBackend, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Options of a RESCALk run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RescalkConfig {
    /// Perturbed trials per rank
    pub n_perturbs: usize,
    /// Kernel iterations per trial
    pub n_iters: usize,
    /// Perturbation noise level, in `[0, 1)`
    pub epsilon: f64,
    /// Concurrent trials; negative counts back from the available resources
    pub n_jobs: i64,
    /// Cluster nodes sharing the rank list
    pub n_nodes: usize,
    /// Entity factor initialization
    pub init: InitMode,
    /// Run trials on GPUs (requires the `gpu` feature)
    pub use_gpu: bool,
    /// Root directory for artifacts
    pub save_path: PathBuf,
    /// Write archives, notes and the summary series
    pub save_output: bool,
    /// Return the plot series in the result
    pub get_plot_data: bool,
    /// Return consensus factors in the result
    pub collect_output: bool,
    /// Predict the rank from silhouettes
    pub predict_k: bool,
    /// Per-rank progress at `info` instead of `debug`
    pub verbose: bool,
    /// Per-iteration kernel progress
    pub rescal_verbose: bool,
    /// Minimum silhouette accepted by rank prediction
    pub sill_thresh: f64,
    /// Solver selection
    pub kernel_method: KernelMethod,
    /// Extra parameters handed to user kernels
    pub kernel_params: serde_json::Value,
    /// Compute reconstruction errors
    pub calculate_error: bool,
    /// How trials are spread over workers
    pub parallel_backend: ParallelBackend,
    /// Archive compression
    pub compression: Compression,
}

impl Default for RescalkConfig {
    fn default() -> Self {
        Self {
            n_perturbs: 20,
            n_iters: 100,
            epsilon: 0.015,
            n_jobs: 1,
            n_nodes: 1,
            init: InitMode::Nnsvd,
            use_gpu: false,
            save_path: PathBuf::from("."),
            save_output: true,
            get_plot_data: false,
            collect_output: false,
            predict_k: false,
            verbose: false,
            rescal_verbose: false,
            sill_thresh: 0.8,
            kernel_method: KernelMethod::RescalFroMu,
            kernel_params: serde_json::Value::Object(serde_json::Map::new()),
            calculate_error: true,
            parallel_backend: ParallelBackend::Pool,
            compression: Compression::Zstd,
        }
    }
}

impl RescalkConfig {
    /// Parse a JSON document
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for malformed JSON, unknown keys or
    /// unknown enum values
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::config(format!("invalid configuration: {e}")))
    }

    /// Load a JSON file
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`RescalkConfig::from_json_str`]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Every option that is invalid on its own
    ///
    /// Checks that depend on the builder's kernel and transport are made by
    /// [`crate::RescalkBuilder::build`].
    #[must_use]
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.n_perturbs == 0 {
            violations.push("n_perturbs must be at least 1".to_string());
        }
        if self.n_iters == 0 {
            violations.push("n_iters must be at least 1".to_string());
        }
        if let Err(e) = validate_epsilon(self.epsilon) {
            violations.push(e.to_string());
        }
        if self.n_jobs == 0 {
            violations.push("n_jobs must not be 0".to_string());
        }
        if self.n_nodes == 0 {
            violations.push("n_nodes must be at least 1".to_string());
        }
        if !(self.sill_thresh.is_finite() && (-1.0..=1.0).contains(&self.sill_thresh)) {
            violations.push(format!("sill_thresh {} must be within [-1, 1]", self.sill_thresh));
        }
        if self.save_output && !self.save_path.is_dir() {
            violations.push(format!(
                "save_path {} is not an existing directory",
                self.save_path.display()
            ));
        }
        violations
    }

    /// `key=value` pairs recorded in the experiment notes
    #[must_use]
    pub fn note_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("num_perturbations", self.n_perturbs.to_string()),
            ("num_iterations", self.n_iters.to_string()),
            ("epsilon", self.epsilon.to_string()),
            ("init", self.init.as_str().to_string()),
            ("n_jobs", self.n_jobs.to_string()),
            ("n_nodes", self.n_nodes.to_string()),
            ("use_gpu", self.use_gpu.to_string()),
            ("kernel_method", self.kernel_method.as_str().to_string()),
            ("sill_thresh", self.sill_thresh.to_string()),
            ("calculate_error", self.calculate_error.to_string()),
            ("parallel_backend", self.parallel_backend.as_str().to_string()),
            ("compression", self.compression.as_str().to_string()),
        ]
    }
}
