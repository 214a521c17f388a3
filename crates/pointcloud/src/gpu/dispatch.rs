use anyhow::{bail, Result};

use super::context::GpuContext;

/// Shape of one compute kernel binding, in binding-index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    /// `texture_2d<f32>` read with `textureLoad`.
    Texture,
    Storage { read_only: bool },
    Uniform,
}

impl BindingKind {
    fn layout_entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            BindingKind::Texture => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            BindingKind::Storage { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Uniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        }
    }
}

/// A compiled compute kernel and the layout of its single bind group.
pub struct KernelProgram {
    label: &'static str,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    kinds: Vec<BindingKind>,
}

impl KernelProgram {
    pub fn new(
        device: &wgpu::Device,
        label: &'static str,
        module: &wgpu::ShaderModule,
        kinds: &[BindingKind],
    ) -> Self {
        let entries: Vec<_> = kinds
            .iter()
            .enumerate()
            .map(|(index, kind)| kind.layout_entry(index as u32))
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Self {
            label,
            pipeline,
            layout,
            kinds: kinds.to_vec(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

/// Resource bound at one kernel binding slot.
#[derive(Clone, Copy)]
pub enum Binding<'a> {
    Texture(&'a wgpu::TextureView),
    Buffer(&'a wgpu::Buffer),
}

impl Binding<'_> {
    fn matches(&self, kind: BindingKind) -> bool {
        matches!(
            (self, kind),
            (Binding::Texture(_), BindingKind::Texture)
                | (Binding::Buffer(_), BindingKind::Storage { .. } | BindingKind::Uniform)
        )
    }
}

/// Everything one compute dispatch needs, spelled out per call.
pub struct DispatchDescriptor<'a> {
    pub label: &'a str,
    pub program: &'a KernelProgram,
    pub bindings: Vec<Binding<'a>>,
    pub workgroups: [u32; 3],
}

impl DispatchDescriptor<'_> {
    pub fn encode(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        let kinds = &self.program.kinds;
        if self.bindings.len() != kinds.len() {
            bail!(
                "{} expects {} bindings, got {}",
                self.program.label,
                kinds.len(),
                self.bindings.len()
            );
        }
        if let Some(index) = self
            .bindings
            .iter()
            .zip(kinds)
            .position(|(binding, kind)| !binding.matches(*kind))
        {
            bail!(
                "{} binding {index} does not match {:?}",
                self.program.label,
                kinds[index]
            );
        }

        let entries: Vec<_> = self
            .bindings
            .iter()
            .enumerate()
            .map(|(index, binding)| wgpu::BindGroupEntry {
                binding: index as u32,
                resource: match binding {
                    Binding::Texture(view) => wgpu::BindingResource::TextureView(view),
                    Binding::Buffer(buffer) => buffer.as_entire_binding(),
                },
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.program.layout,
            entries: &entries,
        });

        let [x, y, z] = self.workgroups;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, z);
        Ok(())
    }

    pub fn submit(&self, gpu: &GpuContext) -> Result<()> {
        if self.workgroups.contains(&0) {
            tracing::trace!(label = self.label, "empty dispatch skipped");
            return Ok(());
        }
        let mut encoder = gpu.create_encoder(self.label);
        self.encode(&gpu.device, &mut encoder)?;
        gpu.submit(encoder);
        Ok(())
    }
}
