//! GPU compute kernels (WGSL shaders)
//!
//! Dense relation-times-factor product, one invocation per output element:
//!
//! ```text
//! out[row, col] = Σ_j X[row, j] · A[j, col]      (transpose = 0)
//! out[row, col] = Σ_j X[j, row] · A[j, col]      (transpose = 1)
//! ```
//!
//! Relations stay resident in row-major `f32` storage buffers for the whole
//! trial; only the `n×k` factor travels per call.

use crate::{Error, Result};
use ndarray::Array2;
use wgpu::util::DeviceExt;

/// Workgroup edge (16×16 = 256 threads)
pub const TILE: u32 = 16;

/// WGSL shader for `X·A` / `Xᵀ·A`
pub const PRODUCT_SHADER: &str = r"
struct Params {
    n: u32,
    k: u32,
    transpose: u32,
    _pad: u32,
}

@group(0) @binding(0) var<storage, read> relation: array<f32>;
@group(0) @binding(1) var<storage, read> factor: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(16, 16)
fn relation_product(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.x;
    let col = gid.y;
    if (row >= params.n || col >= params.k) {
        return;
    }

    var acc = 0.0;
    for (var j = 0u; j < params.n; j = j + 1u) {
        var x: f32;
        if (params.transpose == 0u) {
            x = relation[row * params.n + j];
        } else {
            x = relation[j * params.n + row];
        }
        acc = acc + x * factor[j * params.k + col];
    }
    output[row * params.k + col] = acc;
}
";

/// Uniform block matching `Params` in [`PRODUCT_SHADER`]
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ProductParams {
    /// Relation dimension
    pub n: u32,
    /// Factor columns
    pub k: u32,
    /// 1 for `Xᵀ·A`
    pub transpose: u32,
    _pad: u32,
}

impl ProductParams {
    /// Parameters for one product
    #[must_use]
    pub const fn new(n: u32, k: u32, transpose: bool) -> Self {
        Self {
            n,
            k,
            transpose: transpose as u32,
            _pad: 0,
        }
    }
}

/// Compiled product pipeline, built once per session
#[derive(Debug)]
pub struct ProductPipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl ProductPipeline {
    /// Compile [`PRODUCT_SHADER`] on `device`
    #[must_use]
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Relation Product Shader"),
            source: wgpu::ShaderSource::Wgsl(PRODUCT_SHADER.into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Relation Product Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Relation Product Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Relation Product Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "relation_product",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Self { layout, pipeline }
    }
}

/// Check that an `n×n` relation fits in a single storage binding
///
/// # Errors
/// Returns [`Error::GpuInitFailed`] if the relation buffer exceeds the
/// storage binding or buffer size limit
pub fn check_relation_fits(n: usize, limits: &wgpu::Limits) -> Result<()> {
    let side = n as u64;
    let bytes = side
        .saturating_mul(side)
        .saturating_mul(std::mem::size_of::<f32>() as u64);
    let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    if bytes > max {
        return Err(Error::GpuInitFailed(format!(
            "{n}x{n} relation needs {bytes} bytes; device binds at most {max}"
        )));
    }
    Ok(())
}

/// Upload one square relation as a resident `f32` buffer
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn upload_relation(device: &wgpu::Device, dense: &Array2<f64>) -> wgpu::Buffer {
    let values: Vec<f32> = dense.iter().map(|&v| v as f32).collect();
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Relation Buffer"),
        contents: bytemuck::cast_slice(&values),
        usage: wgpu::BufferUsages::STORAGE,
    })
}

/// Run one product against a resident relation and read the `n×k` result back
///
/// # Errors
/// Returns [`Error::GpuInitFailed`] if the dimensions exceed `u32` or the
/// result buffer cannot be mapped
#[allow(clippy::too_many_arguments)]
#[allow(clippy::cast_possible_truncation)]
pub async fn relation_product(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    pipeline: &ProductPipeline,
    relation: &wgpu::Buffer,
    n: usize,
    a: &Array2<f64>,
    transpose: bool,
) -> Result<Array2<f64>> {
    let k = a.ncols();
    if n == 0 || k == 0 {
        return Ok(Array2::zeros((n, k)));
    }
    let (n32, k32) = match (u32::try_from(n), u32::try_from(k)) {
        (Ok(n32), Ok(k32)) => (n32, k32),
        _ => return Err(Error::GpuInitFailed(format!("product {n}x{k} exceeds device limits"))),
    };

    let factor: Vec<f32> = a.iter().map(|&v| v as f32).collect();
    let factor_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Factor Buffer"),
        contents: bytemuck::cast_slice(&factor),
        usage: wgpu::BufferUsages::STORAGE,
    });

    let output_size = (n * k * std::mem::size_of::<f32>()) as u64;
    let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Product Output Buffer"),
        size: output_size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });

    let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Product Params"),
        contents: bytemuck::bytes_of(&ProductParams::new(n32, k32, transpose)),
        usage: wgpu::BufferUsages::UNIFORM,
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Relation Product Bind Group"),
        layout: &pipeline.layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: relation.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: factor_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: output_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: params_buffer.as_entire_binding(),
            },
        ],
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Relation Product Encoder"),
    });

    {
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Relation Product Pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline.pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(n32.div_ceil(TILE), k32.div_ceil(TILE), 1);
    }

    let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Product Staging Buffer"),
        size: output_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_size);
    queue.submit(Some(encoder.finish()));

    let buffer_slice = staging_buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });
    device.poll(wgpu::Maintain::Wait);

    receiver
        .receive()
        .await
        .ok_or_else(|| Error::GpuInitFailed("failed to receive mapping result".to_string()))?
        .map_err(|e| Error::GpuInitFailed(format!("buffer mapping failed: {e:?}")))?;

    let values: Vec<f64> = {
        let view = buffer_slice.get_mapped_range();
        bytemuck::cast_slice::<u8, f32>(&view)
            .iter()
            .map(|&v| f64::from(v))
            .collect()
    };
    staging_buffer.unmap();

    factor_buffer.destroy();
    output_buffer.destroy();
    params_buffer.destroy();
    staging_buffer.destroy();

    Array2::from_shape_vec((n, k), values)
        .map_err(|e| Error::GpuInitFailed(format!("product readback has wrong shape: {e}")))
}
