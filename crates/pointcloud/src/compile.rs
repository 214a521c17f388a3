//! Shader sources and module construction.
//!
//! Full-screen passes (demux and blit) are GLSL compiled through naga's GLSL
//! frontend, sharing the full-screen triangle vertex stage. Compute kernels
//! and the point material are WGSL.

use std::borrow::Cow;

use wgpu::naga::ShaderStage;

/// Fragment programs driven by the full-screen triangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FullscreenProgram {
    DemuxColor,
    DemuxDepth,
    Blit,
}

impl FullscreenProgram {
    fn label(self) -> &'static str {
        match self {
            FullscreenProgram::DemuxColor => "demux color fragment",
            FullscreenProgram::DemuxDepth => "demux depth fragment",
            FullscreenProgram::Blit => "blit fragment",
        }
    }

    fn body(self) -> &'static str {
        match self {
            FullscreenProgram::DemuxColor => DEMUX_COLOR_MAIN,
            FullscreenProgram::DemuxDepth => DEMUX_DEPTH_MAIN,
            FullscreenProgram::Blit => BLIT_MAIN,
        }
    }
}

/// Compiles the static full-screen triangle vertex shader.
pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("fullscreen triangle vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

pub(crate) fn compile_fragment_shader(
    device: &wgpu::Device,
    program: FullscreenProgram,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(program.label()),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(wrap_fragment(program)),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}

pub(crate) fn compile_wgsl(device: &wgpu::Device, label: &str, source: &'static str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    })
}

/// Prepends the shared bindings and helpers to a fragment body.
fn wrap_fragment(program: FullscreenProgram) -> String {
    format!("{HEADER}\n{body}", body = program.body())
}

/// Bindings shared by every full-screen pass. The uniform block mirrors
/// `DemuxParams` in `demux.rs`.
const HEADER: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(set = 0, binding = 0) uniform texture2D source_texture;
layout(set = 0, binding = 1) uniform sampler source_sampler;
layout(std140, set = 0, binding = 2) uniform DemuxParams {
    vec4 depth_range;
} params;

vec4 sample_source(vec2 uv) {
    return texture(sampler2D(source_texture, source_sampler), uv);
}

float rgb_to_hue(vec3 c) {
    float max_c = max(c.r, max(c.g, c.b));
    float min_c = min(c.r, min(c.g, c.b));
    float delta = max_c - min_c;
    if (delta <= 1e-5) {
        return 0.0;
    }
    float h;
    if (max_c == c.r) {
        h = mod((c.g - c.b) / delta, 6.0);
    } else if (max_c == c.g) {
        h = (c.b - c.r) / delta + 2.0;
    } else {
        h = (c.r - c.g) / delta + 4.0;
    }
    return h / 6.0;
}
";

/// Left half of the composite, flipped into top-left texture space.
const DEMUX_COLOR_MAIN: &str = r"void main() {
    vec2 uv = vec2(v_uv.x * 0.5, 1.0 - v_uv.y);
    outColor = vec4(sample_source(uv).rgb, 1.0);
}
";

/// Top-right quadrant, hue mapped onto the depth range.
const DEMUX_DEPTH_MAIN: &str = r"const float HUE_SPAN = 0.8;
const float VALID_THRESHOLD = 0.1;

void main() {
    vec2 uv = vec2(0.5 + v_uv.x * 0.5, (1.0 - v_uv.y) * 0.5);
    vec3 rgb = sample_source(uv).rgb;
    float depth = 0.0;
    if (max(rgb.r, max(rgb.g, rgb.b)) >= VALID_THRESHOLD) {
        float t = clamp(rgb_to_hue(rgb) / HUE_SPAN, 0.0, 1.0);
        depth = mix(params.depth_range.x, params.depth_range.y, t);
    }
    outColor = vec4(depth, 0.0, 0.0, 1.0);
}
";

const BLIT_MAIN: &str = r"void main() {
    outColor = sample_source(vec2(v_uv.x, 1.0 - v_uv.y));
}
";

/// Minimal full-screen triangle vertex shader.
const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

/// Reads sixteen words out of the metadata cell grid, one row per invocation.
pub(crate) const METADATA_KERNEL_WGSL: &str = r"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var<storage, read_write> record: array<u32, 16>;

const CELL: u32 = 8u;
const BITS: u32 = 32u;

@compute @workgroup_size(16)
fn main(@builtin(local_invocation_index) row: u32) {
    let origin = textureDimensions(source) / 2u;
    var word = 0u;
    for (var column = 0u; column < BITS; column = column + 1u) {
        let texel = origin + vec2<u32>(column * CELL + CELL / 2u, row * CELL + CELL / 2u);
        let rgb = textureLoad(source, texel, 0).rgb;
        if (dot(rgb, vec3<f32>(0.2126, 0.7152, 0.0722)) > 0.5) {
            word = word | (1u << (BITS - 1u - column));
        }
    }
    record[row] = word;
}
";

/// Unprojects depth texels into world-space points. Slot `i` samples linear
/// pixel `floor(i / quality)`; invocations stride over slots so any dispatch
/// size covers the whole buffer.
pub(crate) const RECONSTRUCT_KERNEL_WGSL: &str = r"
struct Params {
    inverse_view: mat4x4<f32>,
    ray_params: vec4<f32>,
    quality: f32,
    height_ratio: f32,
    point_count: u32,
    _padding: u32,
}

@group(0) @binding(0) var depth_map: texture_2d<f32>;
@group(0) @binding(1) var color_map: texture_2d<f32>;
@group(0) @binding(2) var<storage, read_write> points: array<f32>;
@group(0) @binding(3) var<storage, read_write> colors: array<f32>;
@group(0) @binding(4) var<uniform> params: Params;

@compute @workgroup_size(32, 8)
fn main(
    @builtin(global_invocation_id) id: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let size = textureDimensions(depth_map);
    let color_size = textureDimensions(color_map);
    let pixel_count = size.x * size.y;
    let row_stride = groups.x * 32u;
    let stride = row_stride * groups.y * 8u;

    for (var slot = id.y * row_stride + id.x; slot < params.point_count; slot = slot + stride) {
        let pixel = min(u32(f32(slot) / params.quality), pixel_count - 1u);
        let x = pixel % size.x;
        let y = pixel / size.x;

        let depth = textureLoad(depth_map, vec2<u32>(x, y), 0).r;
        let uv = vec2<f32>(
            (f32(x) + 0.5) / f32(size.x),
            1.0 - (f32(y) + 0.5) / f32(size.y),
        );
        let ray = vec3<f32>((uv * 2.0 - 1.0 + params.ray_params.xy) * params.ray_params.zw, 1.0);
        let world = params.inverse_view * vec4<f32>(ray * depth, 1.0);

        let color_x = min(x, color_size.x - 1u);
        let color_y = min(u32((f32(y) + 0.5) * params.height_ratio), color_size.y - 1u);
        let color = textureLoad(color_map, vec2<u32>(color_x, color_y), 0).rgb;

        let base = slot * 3u;
        points[base] = world.x;
        points[base + 1u] = world.y;
        points[base + 2u] = world.z;
        colors[base] = color.r;
        colors[base + 1u] = color.g;
        colors[base + 2u] = color.b;
    }
}
";

/// Camera-facing quads, one instance per point.
pub(crate) const POINT_MATERIAL_WGSL: &str = r"
struct PointUniforms {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    point_size: f32,
    _padding0: f32,
    _padding1: f32,
    _padding2: f32,
}

@group(0) @binding(0) var<uniform> uniforms: PointUniforms;
@group(0) @binding(1) var<storage, read> points: array<f32>;
@group(0) @binding(2) var<storage, read> colors: array<f32>;

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec3<f32>,
}

@vertex
fn vs_main(@location(0) corner: vec2<f32>, @builtin(instance_index) instance: u32) -> VertexOut {
    let base = instance * 3u;
    let world = vec4<f32>(points[base], points[base + 1u], points[base + 2u], 1.0);
    let view_position = uniforms.view * world;
    let billboard = vec4<f32>(view_position.xy + corner * uniforms.point_size, view_position.zw);

    var out: VertexOut;
    out.clip = uniforms.projection * billboard;
    out.color = vec3<f32>(colors[base], colors[base + 1u], colors[base + 2u]);
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color, 1.0);
}
";
