use anyhow::{bail, Context as AnyhowContext, Result};

use crate::types::{AdapterProfile, GpuMemoryMode, GpuPowerPreference};

#[derive(Debug, Clone, Copy, Default)]
pub struct GpuOptions {
    pub power: GpuPowerPreference,
    pub memory: GpuMemoryMode,
    /// Accept a software adapter when no hardware one is available.
    pub allow_fallback: bool,
}

/// Device and queue shared by every pass of the pipeline.
///
/// The context is headless: callers render into textures they own and hand
/// the views in through [`crate::RenderView`].
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_profile: AdapterProfile,
    limits: wgpu::Limits,
}

impl GpuContext {
    pub fn new_headless(options: GpuOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let power_preference = match options.power {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .or_else(|err| {
            if !options.allow_fallback {
                return Err(err);
            }
            tracing::debug!(error = %err, "no hardware adapter; trying fallback");
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: true,
            }))
        })
        .context("failed to find a suitable GPU adapter")?;

        for format in [crate::COLOR_FORMAT, crate::DEPTH_FORMAT] {
            require_renderable(format, adapter.get_texture_format_features(format))?;
        }

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        let adapter_profile = AdapterProfile::from_wgpu(&adapter_info);
        tracing::debug!(
            name = %adapter_profile.name,
            backend = ?adapter_profile.backend,
            device_type = ?adapter_profile.device_type,
            is_software = adapter_profile.is_software(),
            max_storage_buffer_binding_size = limits.max_storage_buffer_binding_size,
            "selected GPU adapter"
        );

        let memory_hints = match options.memory {
            GpuMemoryMode::Balanced => wgpu::MemoryHints::MemoryUsage,
            GpuMemoryMode::Performance => wgpu::MemoryHints::Performance,
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("pointcloud device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        Ok(Self {
            device,
            queue,
            adapter_profile,
            limits,
        })
    }

    /// Wraps a device created elsewhere, e.g. by a host application that
    /// already owns a window surface.
    pub fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_info: &wgpu::AdapterInfo,
    ) -> Self {
        let limits = device.limits();
        Self {
            device,
            queue,
            adapter_profile: AdapterProfile::from_wgpu(adapter_info),
            limits,
        }
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Largest element count a `[f32; 3]` storage binding can hold on this device.
    pub fn max_point_binding(&self) -> u64 {
        let by_binding = u64::from(self.limits.max_storage_buffer_binding_size);
        by_binding.min(self.limits.max_buffer_size) / crate::POINT_STRIDE
    }

    pub fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(Some(encoder.finish()));
    }
}

/// Fails when `format` cannot be both rendered to and sampled by the
/// pipeline's full-screen and compute passes.
pub(crate) fn require_renderable(
    format: wgpu::TextureFormat,
    features: wgpu::TextureFormatFeatures,
) -> Result<()> {
    let needed = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
    if !features.allowed_usages.contains(needed) {
        bail!(
            "adapter cannot render to {format:?} surfaces (allowed usages: {:?})",
            features.allowed_usages
        );
    }
    Ok(())
}
