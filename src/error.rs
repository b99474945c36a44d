//! Error types for rescalk
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a factorization kernel
pub type KernelSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// rescalk error types
#[derive(Error, Debug)]
pub enum Error {
    /// One or more configuration options are invalid (raised before any trial runs)
    #[error("Configuration error: {}", .0.join("; "))]
    Configuration(Vec<String>),

    /// Perturbation noise level outside `[0, 1)`
    #[error("Invalid epsilon {0}: perturbation noise must be finite and within [0, 1)")]
    InvalidEpsilon(f64),

    /// Input relations violate the dataset invariants
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    /// A trial's factorization kernel failed (fatal for the whole run)
    #[error("Kernel failed for k={k}, perturbation seed {seed}: {source}")]
    Kernel {
        /// Rank being factorized
        k: usize,
        /// Perturbation seed of the failing trial
        seed: u64,
        /// Error raised by the kernel
        #[source]
        source: KernelSource,
    },

    /// Consensus clustering could not produce a valid grouping
    #[error("Clustering failed: {0}")]
    Clustering(String),

    /// Requested accelerator index does not exist or the GPU backend is not compiled in
    #[error("Device {0} unavailable\nBuild with `--features gpu` and check the adapter inventory")]
    DeviceUnavailable(usize),

    /// GPU initialization failed
    #[error("GPU initialization failed: {0}")]
    GpuInitFailed(String),

    /// Multi-node transport failure or inconsistent node reports
    #[error("Transport error: {0}")]
    Transport(String),

    /// Artifact compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a configuration error from a single violation
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(vec![message.into()])
    }

    /// Whether the error was raised by configuration validation
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
