use std::collections::HashMap;

use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use image::RgbaImage;
use wgpu::util::DrawIndexedIndirectArgs;

use crate::compile::{compile_wgsl, POINT_MATERIAL_WGSL};
use crate::demux::COLOR_FORMAT;
use crate::gpu::{create_buffer_init, read_texture, GpuContext, GpuResource, Surface};
use crate::types::Camera;
use crate::POINT_STRIDE;

pub const RENDER_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Number of `[f32; 3]` elements held by a point or color buffer.
pub fn element_count(buffer: &wgpu::Buffer) -> u32 {
    (buffer.size() / POINT_STRIDE) as u32
}

/// Axis-aligned volume a draw is culled against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderBounds {
    pub center: Vec3,
    pub half_extent: Vec3,
}

impl RenderBounds {
    /// Large fixed volume around the origin; point clouds are never culled
    /// against their actual extent.
    pub const FIXED: RenderBounds = RenderBounds {
        center: Vec3::ZERO,
        half_extent: Vec3::splat(500.0),
    };

    pub fn corners(&self) -> [Vec3; 8] {
        let mut corners = [Vec3::ZERO; 8];
        for (index, corner) in corners.iter_mut().enumerate() {
            let sign = Vec3::new(
                if index & 1 == 0 { -1.0 } else { 1.0 },
                if index & 2 == 0 { -1.0 } else { 1.0 },
                if index & 4 == 0 { -1.0 } else { 1.0 },
            );
            *corner = self.center + sign * self.half_extent;
        }
        corners
    }

    /// Conservative clip-space test: culled only when every corner lies
    /// outside the same frustum plane.
    pub fn is_visible(&self, view_projection: Mat4) -> bool {
        let clip: Vec<_> = self
            .corners()
            .iter()
            .map(|corner| view_projection * corner.extend(1.0))
            .collect();
        let outside = |test: fn(&glam::Vec4) -> bool| clip.iter().all(test);
        !(outside(|c| c.x < -c.w)
            || outside(|c| c.x > c.w)
            || outside(|c| c.y < -c.w)
            || outside(|c| c.y > c.w)
            || outside(|c| c.z < 0.0)
            || outside(|c| c.z > c.w))
    }
}

/// Index range of the mesh instanced once per point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshTemplate {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
}

impl MeshTemplate {
    pub const QUAD: MeshTemplate = MeshTemplate {
        index_count: 6,
        first_index: 0,
        base_vertex: 0,
    };

    pub fn indirect_args(&self, instance_count: u32) -> DrawIndexedIndirectArgs {
        DrawIndexedIndirectArgs {
            index_count: self.index_count,
            instance_count,
            first_index: self.first_index,
            base_vertex: self.base_vertex,
            first_instance: 0,
        }
    }
}

const QUAD_CORNERS: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Where a point draw lands.
pub struct RenderView<'a> {
    pub color: &'a wgpu::TextureView,
    pub depth: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub camera: &'a Camera,
    /// Clear color and depth before drawing; `None` draws over existing content.
    pub clear: Option<wgpu::Color>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Drawn { instances: u32 },
    Culled,
    Empty,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct PointUniforms {
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
    point_size: f32,
    _padding: [f32; 3],
}

struct MeshBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
}

/// Draws point/color buffer pairs as camera-facing quads with one indirect
/// draw call.
pub struct PointRenderer {
    point_size: f32,
    bounds: RenderBounds,
    mesh_template: MeshTemplate,
    layout: Option<wgpu::BindGroupLayout>,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    mesh: Option<MeshBuffers>,
    uniforms: Option<wgpu::Buffer>,
    args: Option<wgpu::Buffer>,
}

impl PointRenderer {
    pub fn new(point_size: f32) -> Self {
        Self {
            point_size,
            bounds: RenderBounds::FIXED,
            mesh_template: MeshTemplate::QUAD,
            layout: None,
            pipelines: HashMap::new(),
            mesh: None,
            uniforms: None,
            args: None,
        }
    }

    pub fn set_point_size(&mut self, point_size: f32) {
        self.point_size = point_size;
    }

    pub fn render(
        &mut self,
        gpu: &GpuContext,
        points: &wgpu::Buffer,
        colors: &wgpu::Buffer,
        view: &RenderView<'_>,
    ) -> RenderOutcome {
        let instances = element_count(points).min(element_count(colors));
        if instances == 0 {
            return RenderOutcome::Empty;
        }
        if !self.bounds.is_visible(view.camera.view_projection()) {
            tracing::trace!("point cloud bounds outside the view; draw culled");
            return RenderOutcome::Culled;
        }

        self.ensure_resources(gpu);
        self.ensure_pipeline(gpu, view.format);
        let (Some(layout), Some(pipeline), Some(mesh), Some(uniforms), Some(args)) = (
            self.layout.as_ref(),
            self.pipelines.get(&view.format),
            self.mesh.as_ref(),
            self.uniforms.as_ref(),
            self.args.as_ref(),
        ) else {
            return RenderOutcome::Empty;
        };

        let camera = view.camera;
        let point_uniforms = PointUniforms {
            view: camera.view().to_cols_array_2d(),
            projection: camera.projection().to_cols_array_2d(),
            point_size: self.point_size,
            _padding: [0.0; 3],
        };
        gpu.queue
            .write_buffer(uniforms, 0, bytemuck::bytes_of(&point_uniforms));
        let draw_args = self.mesh_template.indirect_args(instances);
        gpu.queue.write_buffer(args, 0, draw_args.as_bytes());

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("point material bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: points.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: colors.as_entire_binding(),
                },
            ],
        });

        let (color_load, depth_load) = match view.clear {
            Some(color) => (wgpu::LoadOp::Clear(color), wgpu::LoadOp::Clear(1.0)),
            None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
        };

        let mut encoder = gpu.create_encoder("point render encoder");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("point render pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: view.color,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: view.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, mesh.vertices.slice(..));
            pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed_indirect(args, 0);
        }
        gpu.submit(encoder);

        RenderOutcome::Drawn { instances }
    }

    fn ensure_resources(&mut self, gpu: &GpuContext) {
        if self.layout.is_none() {
            let storage = |binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            };
            self.layout = Some(gpu.device.create_bind_group_layout(
                &wgpu::BindGroupLayoutDescriptor {
                    label: Some("point material layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::VERTEX,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        storage(1),
                        storage(2),
                    ],
                },
            ));
        }

        if self.mesh.is_none() {
            self.mesh = Some(MeshBuffers {
                vertices: create_buffer_init(
                    gpu,
                    "point quad vertices",
                    &QUAD_CORNERS,
                    wgpu::BufferUsages::VERTEX,
                ),
                indices: create_buffer_init(
                    gpu,
                    "point quad indices",
                    &QUAD_INDICES,
                    wgpu::BufferUsages::INDEX,
                ),
            });
        }

        if self.uniforms.is_none() {
            self.uniforms = Some(gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("point uniforms"),
                size: std::mem::size_of::<PointUniforms>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }

        if self.args.is_none() {
            self.args = Some(gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("point indirect args"),
                size: std::mem::size_of::<DrawIndexedIndirectArgs>() as u64,
                usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
    }

    fn ensure_pipeline(&mut self, gpu: &GpuContext, format: wgpu::TextureFormat) {
        if self.pipelines.contains_key(&format) {
            return;
        }
        let Some(layout) = self.layout.as_ref() else {
            return;
        };

        tracing::debug!(?format, "building point material pipeline");
        let module = compile_wgsl(&gpu.device, "point material", POINT_MATERIAL_WGSL);
        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("point material pipeline layout"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("point material pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<[f32; 2]>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: RENDER_DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });
        self.pipelines.insert(format, pipeline);
    }

    /// Releases the indirect args buffer and the per-draw resources.
    pub fn release(&mut self) {
        for buffer in [self.args.take(), self.uniforms.take()].into_iter().flatten() {
            buffer.release();
        }
        if let Some(mesh) = self.mesh.take() {
            mesh.vertices.release();
            mesh.indices.release();
        }
    }
}

/// Color and depth attachments rendered to off screen and read back as an image.
pub struct OffscreenTarget {
    color: Surface,
    depth: Surface,
}

impl OffscreenTarget {
    pub fn new(gpu: &GpuContext, size: (u32, u32)) -> Self {
        let color = Surface::new(
            &gpu.device,
            "offscreen color",
            size,
            COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let depth = Surface::new(
            &gpu.device,
            "offscreen depth",
            size,
            RENDER_DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        Self { color, depth }
    }

    pub fn size(&self) -> (u32, u32) {
        self.color.size()
    }

    pub fn aspect(&self) -> f32 {
        let (width, height) = self.size();
        width as f32 / height.max(1) as f32
    }

    pub fn view<'a>(&'a self, camera: &'a Camera, clear: Option<wgpu::Color>) -> RenderView<'a> {
        RenderView {
            color: &self.color.view,
            depth: &self.depth.view,
            format: COLOR_FORMAT,
            camera,
            clear,
        }
    }

    pub fn read_image(&self, gpu: &GpuContext) -> Result<RgbaImage> {
        let (width, height) = self.size();
        let pixels = read_texture(gpu, &self.color.texture)?;
        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("offscreen readback returned a short buffer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_args_follow_instance_count() {
        let args = MeshTemplate::QUAD.indirect_args(518_400);
        assert_eq!(args.index_count, 6);
        assert_eq!(args.instance_count, 518_400);
        assert_eq!(args.first_index, 0);
        assert_eq!(args.base_vertex, 0);
        assert_eq!(args.first_instance, 0);
        assert_eq!(args.as_bytes().len(), 20);
    }

    #[test]
    fn fixed_bounds_visible_from_inside() {
        let camera = Camera::new(60f32.to_radians(), 1.0, 0.1, 100.0);
        assert!(RenderBounds::FIXED.is_visible(camera.view_projection()));
    }

    #[test]
    fn distant_bounds_are_culled() {
        let camera = Camera::new(60f32.to_radians(), 1.0, 0.1, 100.0);
        let behind = RenderBounds {
            center: Vec3::new(0.0, 0.0, 50.0),
            half_extent: Vec3::splat(1.0),
        };
        assert!(!behind.is_visible(camera.view_projection()));
    }

    #[test]
    fn point_uniforms_match_shader_layout() {
        assert_eq!(std::mem::size_of::<PointUniforms>(), 144);
    }
}
