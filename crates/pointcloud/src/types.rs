use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

/// Number of 32-bit words carried by the metadata record.
pub const METADATA_WORDS: usize = 16;

/// Fixed-size per-frame record embedded in the composite frame.
///
/// The layout is shared with the decode kernel, which writes the sixteen words
/// verbatim into a storage buffer; the host reinterprets them through
/// `bytemuck`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Metadata {
    pub camera_position: [f32; 3],
    /// Camera orientation as an `xyzw` quaternion.
    pub camera_rotation: [f32; 4],
    /// Projection center offset in normalized device units.
    pub center_shift: [f32; 2],
    /// Vertical field of view in radians.
    pub field_of_view: f32,
    /// Near and far bounds of the hue-encoded depth channel.
    pub depth_range: [f32; 2],
    pub reserved: [f32; 4],
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            camera_position: [0.0; 3],
            camera_rotation: [0.0, 0.0, 0.0, 1.0],
            center_shift: [0.0; 2],
            field_of_view: 60f32.to_radians(),
            depth_range: [0.25, 5.0],
            reserved: [0.0; 4],
        }
    }
}

impl Metadata {
    pub fn from_words(words: [u32; METADATA_WORDS]) -> Self {
        bytemuck::cast(words)
    }

    pub fn to_words(&self) -> [u32; METADATA_WORDS] {
        bytemuck::cast(*self)
    }

    pub fn depth_range(&self) -> Vec2 {
        Vec2::from(self.depth_range)
    }

    /// Camera-to-world transform described by the record.
    pub fn camera_world(&self) -> Mat4 {
        let rotation = Quat::from_array(self.camera_rotation);
        let rotation = if rotation.length_squared() > f32::EPSILON {
            rotation.normalize()
        } else {
            Quat::IDENTITY
        };
        Mat4::from_rotation_translation(rotation, Vec3::from(self.camera_position))
    }

    /// Builds the camera the frame was recorded with.
    pub fn camera(&self, aspect: f32, near: f32, far: f32) -> Camera {
        Camera::new(self.field_of_view, aspect, near, far)
            .with_center_shift(Vec2::from(self.center_shift))
            .with_world(self.camera_world())
    }
}

/// Externally owned camera description. Nothing in this crate mutates it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// Vertical field of view in radians.
    pub field_of_view: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub center_shift: Vec2,
    /// Camera-to-world transform. The camera looks down its local `-Z`.
    pub world: Mat4,
}

impl Camera {
    pub fn new(field_of_view: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            field_of_view,
            aspect,
            near,
            far,
            center_shift: Vec2::ZERO,
            world: Mat4::IDENTITY,
        }
    }

    pub fn with_world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    pub fn with_center_shift(mut self, shift: Vec2) -> Self {
        self.center_shift = shift;
        self
    }

    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    /// `(shift.x, shift.y, tan(fov/2) * aspect, tan(fov/2))`.
    pub fn ray_params(&self) -> Vec4 {
        let half_height = (self.field_of_view * 0.5).tan();
        Vec4::new(
            self.center_shift.x,
            self.center_shift.y,
            half_height * self.aspect,
            half_height,
        )
    }

    /// Maps `(x, y, distance)` rays with a positive forward axis into world space.
    pub fn inverse_view(&self) -> Mat4 {
        self.world * Mat4::from_scale(Vec3::new(1.0, 1.0, -1.0))
    }

    pub fn view(&self) -> Mat4 {
        self.world.inverse()
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.field_of_view,
            self.aspect.max(f32::EPSILON),
            self.near,
            self.far,
        )
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Host mirror of the unprojection kernel.
    ///
    /// `uv` is in `[0, 1]` with `y` pointing up.
    pub fn unproject(&self, uv: Vec2, depth: f32) -> Vec3 {
        let params = self.ray_params();
        let ndc = uv * 2.0 - Vec2::ONE;
        let ray = Vec3::new(
            (ndc.x + params.x) * params.z,
            (ndc.y + params.y) * params.w,
            1.0,
        );
        self.inverse_view().transform_point3(ray * depth)
    }
}

/// Opt-in diagnostics for a reconstruction pass.
///
/// `Snapshot` forces a blocking readback of the point buffer; the default hot
/// path never pays for it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Diagnostics {
    #[default]
    Off,
    Snapshot,
}

/// Preference used when picking an adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GpuPowerPreference {
    Low,
    #[default]
    High,
}

/// Allocation hint forwarded to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GpuMemoryMode {
    #[default]
    Balanced,
    Performance,
}

/// Summary of the adapter backing a [`crate::GpuContext`].
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
}

impl AdapterProfile {
    pub fn from_wgpu(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
            || self.name.to_ascii_lowercase().contains("llvmpipe")
            || self.name.to_ascii_lowercase().contains("swiftshader")
    }
}
