//! Bindable device state, as seen by the [`DeviceStateCache`](crate::DeviceStateCache).

use crate::handle::{ProgramId, TargetId, TextureId};
use crate::types::{BindMode, BlendFunction, Faces, TestFunction, TextureShape, Viewport};

/// Number of texture units a program can sample from.
pub const MAX_TEXTURE_SLOTS: usize = 16;

/// A render target selection: which layer and mip of which target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TargetBinding {
    pub target: TargetId,
    pub layer: u32,
    pub mip: u32,
    pub mode: BindMode,
}

impl TargetBinding {
    /// The default (unbound) target.
    pub const DEFAULT: Self = Self {
        target: TargetId::NONE,
        layer: 0,
        mip: 0,
        mode: BindMode::Write,
    };

    pub fn new(target: TargetId, layer: u32, mip: u32, mode: BindMode) -> Self {
        Self {
            target,
            layer,
            mip,
            mode,
        }
    }
}

/// One filtered state flag and its new value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateChange {
    Blend(bool),
    BlendFunction(BlendFunction),
    DepthTest(bool),
    DepthWrite(bool),
    DepthFunction(TestFunction),
    StencilTest(bool),
    Cull(bool),
    CullFace(Faces),
    Viewport(Viewport),
}

/// Everything a device remembers between calls that draws depend on.
///
/// Defaults match a freshly created device: no blending, no depth test,
/// depth writes on, `Less`, no culling, back faces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceState {
    /// Bound texture per slot, one entry per [`TextureShape`].
    pub textures: [[TextureId; 4]; MAX_TEXTURE_SLOTS],
    pub write_target: TargetBinding,
    pub read_target: TargetBinding,
    pub program: ProgramId,
    pub blend: bool,
    pub blend_function: BlendFunction,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_function: TestFunction,
    pub stencil_test: bool,
    pub cull: bool,
    pub cull_face: Faces,
    pub viewport: Viewport,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            textures: [[TextureId::NONE; 4]; MAX_TEXTURE_SLOTS],
            write_target: TargetBinding::DEFAULT,
            read_target: TargetBinding {
                mode: BindMode::Read,
                ..TargetBinding::DEFAULT
            },
            program: ProgramId::NONE,
            blend: false,
            blend_function: BlendFunction::ADDITIVE,
            depth_test: false,
            depth_write: true,
            depth_function: TestFunction::Less,
            stencil_test: false,
            cull: false,
            cull_face: Faces::Back,
            viewport: Viewport::default(),
        }
    }
}

impl DeviceState {
    pub fn texture(&self, slot: usize, shape: TextureShape) -> TextureId {
        self.textures[slot][shape.index()]
    }

    /// Apply a binding to the mirror. Reading bindings select the read target,
    /// writing ones the draw target.
    pub fn apply_target(&mut self, binding: TargetBinding) {
        match binding.mode {
            BindMode::Read => self.read_target = binding,
            BindMode::Write | BindMode::SrgbWrite => self.write_target = binding,
        }
    }

    pub fn apply(&mut self, change: StateChange) {
        match change {
            StateChange::Blend(v) => self.blend = v,
            StateChange::BlendFunction(v) => self.blend_function = v,
            StateChange::DepthTest(v) => self.depth_test = v,
            StateChange::DepthWrite(v) => self.depth_write = v,
            StateChange::DepthFunction(v) => self.depth_function = v,
            StateChange::StencilTest(v) => self.stencil_test = v,
            StateChange::Cull(v) => self.cull = v,
            StateChange::CullFace(v) => self.cull_face = v,
            StateChange::Viewport(v) => self.viewport = v,
        }
    }

    /// Returns `true` if applying `change` would leave the state unchanged.
    pub fn matches(&self, change: StateChange) -> bool {
        match change {
            StateChange::Blend(v) => self.blend == v,
            StateChange::BlendFunction(v) => self.blend_function == v,
            StateChange::DepthTest(v) => self.depth_test == v,
            StateChange::DepthWrite(v) => self.depth_write == v,
            StateChange::DepthFunction(v) => self.depth_function == v,
            StateChange::StencilTest(v) => self.stencil_test == v,
            StateChange::Cull(v) => self.cull == v,
            StateChange::CullFace(v) => self.cull_face == v,
            StateChange::Viewport(v) => self.viewport == v,
        }
    }
}
