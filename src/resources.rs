//! Worker and device resource resolution
//!
//! Turns the requested `n_jobs` / `use_gpu` pair into the effective worker
//! count. Over-requests are downgraded with a warning rather than rejected.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use tracing::warn;

/// Compute resources visible to this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Logical CPUs
    pub cpus: usize,
    /// Compute-capable GPU adapters
    pub devices: usize,
}

impl Resources {
    /// Probe the host
    ///
    /// GPU adapters are only counted when the `gpu` feature is enabled.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            cpus: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            devices: detect_devices(),
        }
    }
}

#[cfg(feature = "gpu")]
fn detect_devices() -> usize {
    crate::gpu::AdapterInventory::detect().len()
}

#[cfg(not(feature = "gpu"))]
const fn detect_devices() -> usize {
    0
}

/// A resource request that was downgraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResourceWarning {
    /// Acceleration requested but no adapter found; running on CPUs
    NoDevices,
    /// More GPU workers requested than adapters
    DevicesClamped {
        /// Requested workers
        requested: usize,
        /// Available adapters
        available: usize,
    },
    /// More CPU workers requested than logical CPUs
    CpusClamped {
        /// Requested workers
        requested: usize,
        /// Available CPUs
        available: usize,
    },
}

impl fmt::Display for ResourceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevices => write!(f, "no GPU found, using CPUs"),
            Self::DevicesClamped {
                requested,
                available,
            } => write!(
                f,
                "too many GPUs requested ({requested}), reverting to max available: {available}"
            ),
            Self::CpusClamped {
                requested,
                available,
            } => write!(
                f,
                "too many CPUs requested ({requested}), reverting to max available: {available}"
            ),
        }
    }
}

/// Worker count and device residency actually used by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveSettings {
    /// Concurrent trials
    pub n_jobs: usize,
    /// Whether trials run on GPUs
    pub use_gpu: bool,
    /// Downgrades applied while resolving
    pub warnings: Vec<ResourceWarning>,
}

/// Resolve a worker request against the available resources
///
/// Negative `n_jobs` counts back from the available resources
/// (`-1` = all). The result never exceeds `n_perturbs`.
///
/// # Errors
/// Returns [`Error::Configuration`] if the request leaves no worker
pub fn resolve(
    n_jobs: i64,
    use_gpu: bool,
    n_perturbs: usize,
    available: Resources,
) -> Result<EffectiveSettings> {
    let mut warnings = Vec::new();
    let mut use_gpu = use_gpu;

    if use_gpu && available.devices == 0 {
        warnings.push(ResourceWarning::NoDevices);
        use_gpu = false;
    }

    let capacity = if use_gpu {
        available.devices
    } else {
        available.cpus.max(1)
    };

    #[allow(clippy::cast_possible_wrap)]
    let requested = if n_jobs < 0 {
        capacity as i64 + n_jobs + 1
    } else {
        n_jobs
    };
    if requested <= 0 {
        return Err(Error::config(format!(
            "n_jobs={n_jobs} leaves {requested} workers; the number of GPUs or CPUs must be 1 or more"
        )));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut resolved = requested as usize;
    if resolved > capacity {
        warnings.push(if use_gpu {
            ResourceWarning::DevicesClamped {
                requested: resolved,
                available: capacity,
            }
        } else {
            ResourceWarning::CpusClamped {
                requested: resolved,
                available: capacity,
            }
        });
        resolved = capacity;
    }
    resolved = resolved.min(n_perturbs.max(1));

    for warning in &warnings {
        warn!(%warning, "resource request downgraded");
    }

    Ok(EffectiveSettings {
        n_jobs: resolved,
        use_gpu,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: Resources = Resources { cpus: 8, devices: 2 };

    #[test]
    fn test_plain_request() {
        let settings = resolve(4, false, 20, HOST).unwrap();
        assert_eq!(settings.n_jobs, 4);
        assert!(!settings.use_gpu);
        assert!(settings.warnings.is_empty());
    }

    #[test]
    fn test_negative_counts_back() {
        assert_eq!(resolve(-1, false, 20, HOST).unwrap().n_jobs, 8);
        assert_eq!(resolve(-3, false, 20, HOST).unwrap().n_jobs, 6);
        assert_eq!(resolve(-1, true, 20, HOST).unwrap().n_jobs, 2);
    }

    #[test]
    fn test_negative_leaving_nothing_rejected() {
        let err = resolve(-9, false, 20, HOST).unwrap_err();
        assert!(err.is_configuration());
        assert!(resolve(0, false, 20, HOST).is_err());
    }

    #[test]
    fn test_cpu_over_request_clamped() {
        let settings = resolve(32, false, 20, HOST).unwrap();
        assert_eq!(settings.n_jobs, 8);
        assert_eq!(
            settings.warnings,
            vec![ResourceWarning::CpusClamped {
                requested: 32,
                available: 8
            }]
        );
    }

    #[test]
    fn test_gpu_over_request_clamped() {
        let settings = resolve(4, true, 20, HOST).unwrap();
        assert_eq!(settings.n_jobs, 2);
        assert!(settings.use_gpu);
        assert!(matches!(settings.warnings[0], ResourceWarning::DevicesClamped { .. }));
    }

    #[test]
    fn test_no_devices_falls_back_to_cpu_count() {
        let host = Resources { cpus: 4, devices: 0 };
        let settings = resolve(16, true, 20, host).unwrap();
        assert!(!settings.use_gpu);
        assert_eq!(settings.n_jobs, 4);
        assert_eq!(settings.warnings[0], ResourceWarning::NoDevices);
        assert_eq!(settings.warnings.len(), 2);
    }

    #[test]
    fn test_clamped_to_perturbations() {
        assert_eq!(resolve(6, false, 3, HOST).unwrap().n_jobs, 3);
    }

    #[test]
    fn test_warning_display() {
        assert_eq!(ResourceWarning::NoDevices.to_string(), "no GPU found, using CPUs");
    }
}
