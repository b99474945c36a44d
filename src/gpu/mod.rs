//! GPU compute backend using wgpu (WebGPU)
//!
//! A [`GpuSession`] makes the relations of one trial resident on a single
//! adapter and serves the `n²`-cost products from there. Factors cross the
//! bus as `f32`; norms are computed once on the host in `f64`.
//!
//! Architecture:
//! - One session per trial, opened on the trial's worker thread
//! - Relation buffers uploaded once, destroyed when the session drops
//! - wgpu futures driven by a current-thread tokio runtime owned by the session

use crate::backend::{ExecutionDevice, RelationOps};
use crate::dataset::Relation;
use crate::{Error, Result};
use ndarray::Array2;
use tracing::debug;

pub mod kernels;
pub mod multigpu;

pub use multigpu::{AdapterInventory, GpuDeviceInfo};

/// Relations resident on one GPU adapter
pub struct GpuSession {
    index: usize,
    n: usize,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: kernels::ProductPipeline,
    relations: Vec<wgpu::Buffer>,
    frobenius: Vec<f64>,
    runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for GpuSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuSession")
            .field("index", &self.index)
            .field("n", &self.n)
            .field("relations", &self.relations.len())
            .finish_non_exhaustive()
    }
}

impl GpuSession {
    /// Open adapter `index` and upload `relations`
    ///
    /// Sparse relations are densified for upload.
    ///
    /// # Errors
    /// Returns [`Error::DeviceUnavailable`] if the adapter does not exist and
    /// [`Error::GpuInitFailed`] if the device cannot be created or a relation
    /// is larger than one storage binding allows
    pub fn open(index: usize, relations: &[Relation]) -> Result<Self> {
        let adapter = AdapterInventory::detect().take(index)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| Error::GpuInitFailed(format!("failed to start device runtime: {e}")))?;

        let n = relations.first().map_or(0, |r| r.shape().0);
        let limits = adapter.limits();
        kernels::check_relation_fits(n, &limits)?;

        let (device, queue) = runtime
            .block_on(adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("rescalk trial device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            ))
            .map_err(|e| Error::GpuInitFailed(format!("failed to create device {index}: {e}")))?;

        let pipeline = kernels::ProductPipeline::new(&device);
        let buffers = relations
            .iter()
            .map(|relation| kernels::upload_relation(&device, &relation.to_dense()))
            .collect();
        let frobenius = relations.iter().map(Relation::frobenius_sq).collect();

        debug!(index, n, m = relations.len(), adapter = %adapter.get_info().name, "opened gpu session");

        Ok(Self {
            index,
            n,
            device,
            queue,
            pipeline,
            relations: buffers,
            frobenius,
            runtime,
        })
    }

    fn run(&self, relation: usize, a: &Array2<f64>, transpose: bool) -> Result<Array2<f64>> {
        let buffer = self.relations.get(relation).ok_or_else(|| {
            Error::GpuInitFailed(format!("relation {relation} not resident on gpu:{}", self.index))
        })?;
        self.runtime.block_on(kernels::relation_product(
            &self.device,
            &self.queue,
            &self.pipeline,
            buffer,
            self.n,
            a,
            transpose,
        ))
    }
}

impl RelationOps for GpuSession {
    fn device(&self) -> ExecutionDevice {
        ExecutionDevice::Gpu(self.index)
    }

    fn n_entities(&self) -> usize {
        self.n
    }

    fn n_relations(&self) -> usize {
        self.relations.len()
    }

    fn product(&self, relation: usize, a: &Array2<f64>) -> Result<Array2<f64>> {
        self.run(relation, a, false)
    }

    fn transpose_product(&self, relation: usize, a: &Array2<f64>) -> Result<Array2<f64>> {
        self.run(relation, a, true)
    }

    fn frobenius_sq(&self, relation: usize) -> f64 {
        self.frobenius[relation]
    }
}

impl Drop for GpuSession {
    fn drop(&mut self) {
        for buffer in &self.relations {
            buffer.destroy();
        }
        debug!(index = self.index, "released gpu session");
    }
}
