//! The device abstraction every render component talks to.
//!
//! [`GraphicsDevice`] is a single, strictly ordered command stream in the style of
//! an immediate-mode graphics API: bind state, then clear or draw into the bound
//! target. Backends never filter redundant calls themselves; that is the job of
//! the [`DeviceStateCache`](crate::DeviceStateCache) in front of them.

use bytemuck::{Pod, Zeroable};

use crate::handle::{MeshId, ProgramId, TargetId, TextureId};
use crate::state::{StateChange, TargetBinding};
use crate::types::{DepthMode, TextureShape, TextureSpec};

/// Errors reported by a device backend.
///
/// Render components treat these as local: they are logged and the frame
/// continues with a substitute (handle zero, skipped draw, default target).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    /// Shader source failed to parse or validate. Carries the full diagnostic.
    #[error("shader '{name}' failed to compile:\n{diagnostic}")]
    ShaderCompilation { name: String, diagnostic: String },

    /// A handle did not refer to a live resource of the expected kind.
    #[error("invalid {kind} handle {value}")]
    InvalidHandle { kind: &'static str, value: u32 },

    /// Width or height is zero.
    #[error("texture dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },

    /// A cube array was given a layer count that is not a multiple of 6.
    #[error("cube array depth {depth} is not a multiple of 6")]
    CubeArrayDepth { depth: u32 },

    /// Render target attachments are missing or mismatched.
    #[error("render target {target} is incomplete: {reason}")]
    IncompleteTarget { target: u32, reason: String },

    /// Texel readback failed.
    #[error("readback failed: {0}")]
    Readback(String),

    /// A draw could not be issued with the current state.
    #[error("draw skipped: {0}")]
    DrawSkipped(String),

    /// Error reported by the backend API itself.
    #[error("backend validation error: {0}")]
    Validation(String),
}

impl DeviceError {
    /// Short, stable, human-readable error code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::ShaderCompilation { .. } => "SHADER_COMPILATION",
            DeviceError::InvalidHandle { .. } => "INVALID_HANDLE",
            DeviceError::ZeroDimensions { .. } => "ZERO_DIMENSIONS",
            DeviceError::CubeArrayDepth { .. } => "CUBE_ARRAY_DEPTH",
            DeviceError::IncompleteTarget { .. } => "INCOMPLETE_TARGET",
            DeviceError::Readback(_) => "READBACK",
            DeviceError::DrawSkipped(_) => "DRAW_SKIPPED",
            DeviceError::Validation(_) => "VALIDATION",
        }
    }
}

/// Completeness of a render target's attachment set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetStatus {
    Complete,
    Incomplete(String),
}

impl TargetStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, TargetStatus::Complete)
    }
}

/// Everything needed to allocate one texture image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub spec: TextureSpec,
    pub shape: TextureShape,
    pub width: u32,
    pub height: u32,
    /// Logical depth: layer count for arrays, ignored for `D2` and `Cube`.
    pub depth: u32,
    pub mips: u32,
}

impl TextureDescriptor {
    /// Number of image layers actually allocated.
    pub fn layers(&self) -> u32 {
        self.shape.layer_count(self.depth)
    }
}

/// Vertex stream consumed by a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexInput {
    /// No vertex buffer: the vertex shader generates a full-screen triangle.
    FullScreen,
    /// Interleaved [`Vertex`] buffer with an index buffer.
    Mesh,
}

/// One sampled texture declared by a program, bound at `slot` index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerSlot {
    pub shape: TextureShape,
    /// Declared as a depth texture in the shader (read with `textureLoad`).
    pub depth: bool,
}

impl SamplerSlot {
    pub const fn color(shape: TextureShape) -> Self {
        Self {
            shape,
            depth: false,
        }
    }

    pub const fn depth(shape: TextureShape) -> Self {
        Self { shape, depth: true }
    }
}

/// A program: one WGSL module with `vs_main`/`fs_main` entry points.
///
/// Binding convention: `@group(0) @binding(0)` is the uniform block (when
/// `uniform_size > 0`); sampler slot `i` is `@group(1) @binding(2*i)` for the
/// texture and `@binding(2*i + 1)` for its sampler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramDescriptor {
    pub name: &'static str,
    pub source: &'static str,
    pub vertex: VertexInput,
    pub samplers: Vec<SamplerSlot>,
    pub uniform_size: u64,
}

/// Interleaved mesh vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    /// Vertex buffer layout matching `@location(0..3)` in mesh programs.
    pub fn buffer_layout() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
            wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// CPU-side indexed triangle mesh ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Local-space bounds as `(min, max)`, or `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(glam::Vec3, glam::Vec3)> {
        let first = glam::Vec3::from(self.vertices.first()?.position);
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(min, max), v| {
                    let p = glam::Vec3::from(v.position);
                    (min.min(p), max.max(p))
                }),
        )
    }
}

/// An ordered, single-threaded graphics command stream.
pub trait GraphicsDevice {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, DeviceError>;
    /// Reallocate storage at a new size. The handle keeps referring to the texture.
    fn resize_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<(), DeviceError>;
    fn upload_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    /// `(width, height, layers)` of a live texture.
    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32, u32)>;
    fn destroy_texture(&mut self, texture: TextureId);

    fn create_target(
        &mut self,
        colors: &[TextureId],
        depth: Option<TextureId>,
        depth_mode: DepthMode,
    ) -> Result<TargetId, DeviceError>;
    fn target_status(&self, target: TargetId) -> TargetStatus;
    fn destroy_target(&mut self, target: TargetId);

    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramId, DeviceError>;
    fn destroy_program(&mut self, program: ProgramId);

    fn create_mesh(&mut self, mesh: &MeshData) -> Result<MeshId, DeviceError>;
    fn destroy_mesh(&mut self, mesh: MeshId);

    fn bind_texture(&mut self, slot: usize, shape: TextureShape, texture: TextureId);
    fn bind_target(&mut self, binding: TargetBinding);
    fn use_program(&mut self, program: ProgramId);
    fn set_state(&mut self, change: StateChange);
    /// Uniform block for the next draws with the current program.
    fn set_uniforms(&mut self, data: &[u8]);

    /// Clear the bound target's current layer/mip.
    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>);
    fn draw_mesh(&mut self, mesh: MeshId);
    fn draw_fullscreen(&mut self);
    fn insert_marker(&mut self, label: &'static str);

    /// Synchronous single-texel readback. Flushes pending work first.
    fn read_pixel(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
        x: u32,
        y: u32,
    ) -> Result<[f32; 4], DeviceError>;

    /// Synchronous readback of a whole layer and mip, row-major from the
    /// top-left texel. Flushes pending work first.
    fn read_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
    ) -> Result<Vec<[f32; 4]>, DeviceError>;

    /// Submit everything recorded so far.
    fn flush(&mut self);

    /// Pop the oldest pending error, if any.
    fn take_error(&mut self) -> Option<DeviceError>;
}
