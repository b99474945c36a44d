//! Compute-capable adapter inventory
//!
//! Device slots `Gpu(0..n)` index into this inventory. Software rasterizers
//! (`DeviceType::Cpu`) are skipped so that a slot always means real
//! accelerator hardware.

use crate::{Error, Result};

/// Information about a single GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Device name (e.g., "NVIDIA RTX 4090")
    pub name: String,
    /// Device type (`DiscreteGpu`, `IntegratedGpu`, `VirtualGpu`, Other)
    pub device_type: wgpu::DeviceType,
    /// Backend (Vulkan, Metal, DX12, GL)
    pub backend: wgpu::Backend,
}

/// Ordered list of compute-capable adapters
pub struct AdapterInventory {
    adapters: Vec<wgpu::Adapter>,
    devices: Vec<GpuDeviceInfo>,
}

impl std::fmt::Debug for AdapterInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterInventory")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl AdapterInventory {
    /// Enumerate adapters across all native backends
    #[must_use]
    pub fn detect() -> Self {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .filter(|adapter| adapter.get_info().device_type != wgpu::DeviceType::Cpu)
            .collect();

        let devices = adapters
            .iter()
            .map(|adapter| {
                let info = adapter.get_info();
                GpuDeviceInfo {
                    name: info.name,
                    device_type: info.device_type,
                    backend: info.backend,
                }
            })
            .collect();

        Self { adapters, devices }
    }

    /// Number of usable adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapter is usable
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Information about all devices
    #[must_use]
    pub fn devices(&self) -> &[GpuDeviceInfo] {
        &self.devices
    }

    /// Take the adapter for slot `index`
    ///
    /// # Errors
    /// Returns [`Error::DeviceUnavailable`] if the slot does not exist
    pub fn take(mut self, index: usize) -> Result<wgpu::Adapter> {
        if index >= self.adapters.len() {
            return Err(Error::DeviceUnavailable(index));
        }
        Ok(self.adapters.swap_remove(index))
    }
}
