//! Compute backend dispatcher
//!
//! Every trial runs against a *device session*: the relation matrices made
//! resident on one execution device (host memory or a GPU). Kernels only see
//! the [`RelationOps`] capability, so the same update code runs on either.
//!
//! Device slots are handed out round-robin by perturbation seed; a session
//! owns its device buffers and frees them when dropped, before the trial
//! result leaves the worker.

use crate::dataset::Relation;
use crate::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a trial executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionDevice {
    /// Host CPU
    Cpu,
    /// GPU adapter with the given index in the compute-capable inventory
    Gpu(usize),
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

/// Device slot for the trial with perturbation `seed`
///
/// With acceleration, trial `p` gets `Gpu(p mod n_jobs)`. The scheduler
/// hands worker `w` exactly the seeds `w, w + n_jobs, …` and each worker runs
/// its seeds one at a time, so a slot never holds two trials at once.
#[must_use]
pub const fn assign_device(seed: u64, n_jobs: usize, use_gpu: bool) -> ExecutionDevice {
    if !use_gpu || n_jobs == 0 {
        return ExecutionDevice::Cpu;
    }
    #[allow(clippy::cast_possible_truncation)]
    let slot = (seed % n_jobs as u64) as usize;
    ExecutionDevice::Gpu(slot)
}

/// Products against relation matrices resident on one device
///
/// These are the only operations whose cost scales with `n²`; everything
/// else in the factorization works on `n×k` or `k×k` blocks.
pub trait RelationOps {
    /// Device holding the relations
    fn device(&self) -> ExecutionDevice;

    /// Number of entities `n`
    fn n_entities(&self) -> usize;

    /// Number of relations `m`
    fn n_relations(&self) -> usize;

    /// `X_i · a`
    ///
    /// # Errors
    /// Returns error if the device computation fails
    fn product(&self, relation: usize, a: &Array2<f64>) -> Result<Array2<f64>>;

    /// `X_iᵀ · a`
    ///
    /// # Errors
    /// Returns error if the device computation fails
    fn transpose_product(&self, relation: usize, a: &Array2<f64>) -> Result<Array2<f64>>;

    /// `‖X_i‖²_F`
    fn frobenius_sq(&self, relation: usize) -> f64;
}

/// Host-memory session borrowing the relations
#[derive(Debug, Clone, Copy)]
pub struct CpuOps<'a> {
    relations: &'a [Relation],
}

impl<'a> CpuOps<'a> {
    /// Wrap relations (all square, same dimension)
    #[must_use]
    pub const fn new(relations: &'a [Relation]) -> Self {
        Self { relations }
    }
}

impl RelationOps for CpuOps<'_> {
    fn device(&self) -> ExecutionDevice {
        ExecutionDevice::Cpu
    }

    fn n_entities(&self) -> usize {
        self.relations.first().map_or(0, |r| r.shape().0)
    }

    fn n_relations(&self) -> usize {
        self.relations.len()
    }

    fn product(&self, relation: usize, a: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.relations[relation].dot(a))
    }

    fn transpose_product(&self, relation: usize, a: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.relations[relation].t_dot(a))
    }

    fn frobenius_sq(&self, relation: usize) -> f64 {
        self.relations[relation].frobenius_sq()
    }
}

/// Make `relations` resident on `device`
///
/// The returned session must be dropped before the trial result is handed
/// back; dropping a GPU session destroys its buffers.
///
/// # Errors
/// Returns [`crate::Error::DeviceUnavailable`] for GPU devices when the `gpu`
/// feature is disabled or the adapter index does not exist, and
/// [`crate::Error::GpuInitFailed`] when the adapter cannot be opened
pub fn open_session<'a>(
    device: ExecutionDevice,
    relations: &'a [Relation],
) -> Result<Box<dyn RelationOps + 'a>> {
    match device {
        ExecutionDevice::Cpu => Ok(Box::new(CpuOps::new(relations))),
        #[cfg(feature = "gpu")]
        ExecutionDevice::Gpu(index) => Ok(Box::new(crate::gpu::GpuSession::open(index, relations)?)),
        #[cfg(not(feature = "gpu"))]
        ExecutionDevice::Gpu(index) => {
            let _ = relations;
            Err(crate::Error::DeviceUnavailable(index))
        }
    }
}
