//! A recording device with no GPU behind it.
//!
//! [`HeadlessDevice`] validates handles and target completeness like a real
//! backend, remembers clear values so single-texel reads return something
//! meaningful, and appends every call to a shared [`CallLog`] that tests keep
//! a clone of after the device has been boxed into a context.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::device::{
    DeviceError, GraphicsDevice, MeshData, ProgramDescriptor, TargetStatus, TextureDescriptor,
};
use crate::handle::{HandleAllocator, MeshId, ProgramId, TargetId, TextureId};
use crate::state::{StateChange, TargetBinding};
use crate::types::{BindMode, DepthMode, Layout, TextureShape, mip_extent};

/// One call that reached the device.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    CreateTexture {
        texture: TextureId,
        shape: TextureShape,
        layout: Layout,
        width: u32,
        height: u32,
        layers: u32,
    },
    ResizeTexture {
        texture: TextureId,
        width: u32,
        height: u32,
        depth: u32,
    },
    UploadTexture {
        texture: TextureId,
        layer: u32,
        mip: u32,
        bytes: usize,
    },
    DestroyTexture(TextureId),
    CreateTarget(TargetId),
    DestroyTarget(TargetId),
    CreateProgram {
        program: ProgramId,
        name: &'static str,
    },
    DestroyProgram(ProgramId),
    CreateMesh(MeshId),
    DestroyMesh(MeshId),
    BindTexture {
        slot: usize,
        shape: TextureShape,
        texture: TextureId,
    },
    BindTarget(TargetBinding),
    UseProgram(ProgramId),
    SetState(StateChange),
    SetUniforms(Vec<u8>),
    Clear {
        binding: TargetBinding,
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    },
    DrawMesh {
        binding: TargetBinding,
        program: &'static str,
        mesh: MeshId,
    },
    DrawFullscreen {
        binding: TargetBinding,
        program: &'static str,
    },
    Marker(&'static str),
    ReadPixel {
        texture: TextureId,
        layer: u32,
        mip: u32,
    },
    ReadTexture {
        texture: TextureId,
        layer: u32,
        mip: u32,
    },
    Flush,
}

impl DeviceCall {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            DeviceCall::DrawMesh { .. } | DeviceCall::DrawFullscreen { .. }
        )
    }

    pub fn is_bind(&self) -> bool {
        matches!(
            self,
            DeviceCall::BindTexture { .. } | DeviceCall::BindTarget(_) | DeviceCall::UseProgram(_)
        )
    }

    /// Program name of a draw call.
    pub fn draw_program(&self) -> Option<&'static str> {
        match self {
            DeviceCall::DrawMesh { program, .. } | DeviceCall::DrawFullscreen { program, .. } => {
                Some(program)
            }
            _ => None,
        }
    }
}

/// Shared, clonable view of everything a [`HeadlessDevice`] recorded.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<DeviceCall>>>,
    errors: Rc<RefCell<VecDeque<DeviceError>>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.borrow().clone()
    }

    /// Calls recorded after the first `start` entries.
    pub fn since(&self, start: usize) -> Vec<DeviceCall> {
        self.calls.borrow().iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn contains(&self, call: &DeviceCall) -> bool {
        self.calls.borrow().contains(call)
    }

    pub fn count(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| predicate(c)).count()
    }

    pub fn draws(&self) -> usize {
        self.count(DeviceCall::is_draw)
    }

    /// Number of draws issued with the named program.
    pub fn draws_with(&self, program: &str) -> usize {
        self.count(|c| c.draw_program() == Some(program))
    }

    pub fn markers(&self) -> Vec<&'static str> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Marker(label) => Some(*label),
                _ => None,
            })
            .collect()
    }

    /// Queue an error for the next `take_error`, as if the backend raised it.
    pub fn inject_error(&self, error: DeviceError) {
        self.errors.borrow_mut().push_back(error);
    }

    fn push(&self, call: DeviceCall) {
        self.calls.borrow_mut().push(call);
    }

    fn raise(&self, error: DeviceError) {
        self.errors.borrow_mut().push_back(error);
    }
}

#[derive(Debug)]
struct TextureRecord {
    desc: TextureDescriptor,
}

#[derive(Debug)]
struct TargetRecord {
    colors: Vec<TextureId>,
    depth: Option<TextureId>,
}

/// Recording backend for tests and headless tooling.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    log: CallLog,
    textures: FxHashMap<TextureId, TextureRecord>,
    targets: FxHashMap<TargetId, TargetRecord>,
    programs: FxHashMap<ProgramId, &'static str>,
    meshes: FxHashMap<MeshId, usize>,
    texture_ids: HandleAllocator,
    target_ids: HandleAllocator,
    program_ids: HandleAllocator,
    mesh_ids: HandleAllocator,
    failing_programs: Vec<&'static str>,
    texels: FxHashMap<(TextureId, u32, u32), [f32; 4]>,
    write_target: TargetBinding,
    program: ProgramId,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_program` fail for the program with this name.
    pub fn failing_program(mut self, name: &'static str) -> Self {
        self.failing_programs.push(name);
        self
    }

    /// A clone of the shared call log.
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn check_texture(&self, texture: TextureId) -> Result<&TextureRecord, DeviceError> {
        self.textures
            .get(&texture)
            .ok_or(DeviceError::InvalidHandle {
                kind: "texture",
                value: texture.raw(),
            })
    }

    fn status_of(&self, record: &TargetRecord) -> TargetStatus {
        let mut size = None;
        for id in record.colors.iter().chain(record.depth.iter()) {
            let Some(texture) = self.textures.get(id) else {
                return TargetStatus::Incomplete(format!("attachment {id} does not exist"));
            };
            let dims = (texture.desc.width, texture.desc.height);
            match size {
                None => size = Some(dims),
                Some(expected) if expected != dims => {
                    return TargetStatus::Incomplete(format!(
                        "attachment {id} is {}x{}, expected {}x{}",
                        dims.0, dims.1, expected.0, expected.1
                    ));
                }
                Some(_) => {}
            }
        }
        if size.is_none() {
            return TargetStatus::Incomplete("no attachments".to_string());
        }
        TargetStatus::Complete
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, DeviceError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::ZeroDimensions {
                width: desc.width,
                height: desc.height,
            });
        }
        if desc.shape == TextureShape::ArrayCube && desc.depth % 6 != 0 {
            return Err(DeviceError::CubeArrayDepth { depth: desc.depth });
        }
        let id = TextureId(self.texture_ids.allocate());
        self.textures.insert(id, TextureRecord { desc: *desc });
        self.log.push(DeviceCall::CreateTexture {
            texture: id,
            shape: desc.shape,
            layout: desc.spec.layout,
            width: desc.width,
            height: desc.height,
            layers: desc.layers(),
        });
        Ok(id)
    }

    fn resize_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<(), DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ZeroDimensions { width, height });
        }
        let record = self
            .textures
            .get_mut(&texture)
            .ok_or(DeviceError::InvalidHandle {
                kind: "texture",
                value: texture.raw(),
            })?;
        if record.desc.shape == TextureShape::ArrayCube && depth % 6 != 0 {
            return Err(DeviceError::CubeArrayDepth { depth });
        }
        record.desc.width = width;
        record.desc.height = height;
        record.desc.depth = depth;
        self.texels.retain(|(id, _, _), _| *id != texture);
        self.log.push(DeviceCall::ResizeTexture {
            texture,
            width,
            height,
            depth,
        });
        Ok(())
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.check_texture(texture)?;
        self.log.push(DeviceCall::UploadTexture {
            texture,
            layer,
            mip,
            bytes: data.len(),
        });
        Ok(())
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32, u32)> {
        self.textures
            .get(&texture)
            .map(|t| (t.desc.width, t.desc.height, t.desc.layers()))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.texture_ids.release(texture.raw());
            self.texels.retain(|(id, _, _), _| *id != texture);
            self.log.push(DeviceCall::DestroyTexture(texture));
        }
    }

    fn create_target(
        &mut self,
        colors: &[TextureId],
        depth: Option<TextureId>,
        _depth_mode: DepthMode,
    ) -> Result<TargetId, DeviceError> {
        let id = TargetId(self.target_ids.allocate());
        self.targets.insert(
            id,
            TargetRecord {
                colors: colors.to_vec(),
                depth,
            },
        );
        self.log.push(DeviceCall::CreateTarget(id));
        Ok(id)
    }

    fn target_status(&self, target: TargetId) -> TargetStatus {
        match self.targets.get(&target) {
            Some(record) => self.status_of(record),
            None => TargetStatus::Incomplete(format!("{target} does not exist")),
        }
    }

    fn destroy_target(&mut self, target: TargetId) {
        if self.targets.remove(&target).is_some() {
            self.target_ids.release(target.raw());
            self.log.push(DeviceCall::DestroyTarget(target));
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramId, DeviceError> {
        if self.failing_programs.contains(&desc.name) {
            return Err(DeviceError::ShaderCompilation {
                name: desc.name.to_string(),
                diagnostic: "headless: compilation failure requested".to_string(),
            });
        }
        let id = ProgramId(self.program_ids.allocate());
        self.programs.insert(id, desc.name);
        self.log.push(DeviceCall::CreateProgram {
            program: id,
            name: desc.name,
        });
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.program_ids.release(program.raw());
            self.log.push(DeviceCall::DestroyProgram(program));
        }
    }

    fn create_mesh(&mut self, mesh: &MeshData) -> Result<MeshId, DeviceError> {
        let id = MeshId(self.mesh_ids.allocate());
        self.meshes.insert(id, mesh.indices.len());
        self.log.push(DeviceCall::CreateMesh(id));
        Ok(id)
    }

    fn destroy_mesh(&mut self, mesh: MeshId) {
        if self.meshes.remove(&mesh).is_some() {
            self.mesh_ids.release(mesh.raw());
            self.log.push(DeviceCall::DestroyMesh(mesh));
        }
    }

    fn bind_texture(&mut self, slot: usize, shape: TextureShape, texture: TextureId) {
        if texture.is_valid() && !self.textures.contains_key(&texture) {
            self.log.raise(DeviceError::InvalidHandle {
                kind: "texture",
                value: texture.raw(),
            });
        }
        self.log.push(DeviceCall::BindTexture {
            slot,
            shape,
            texture,
        });
    }

    fn bind_target(&mut self, binding: TargetBinding) {
        if binding.target.is_valid() && !self.targets.contains_key(&binding.target) {
            self.log.raise(DeviceError::InvalidHandle {
                kind: "target",
                value: binding.target.raw(),
            });
        }
        if binding.mode != BindMode::Read {
            self.write_target = binding;
        }
        self.log.push(DeviceCall::BindTarget(binding));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = program;
        self.log.push(DeviceCall::UseProgram(program));
    }

    fn set_state(&mut self, change: StateChange) {
        self.log.push(DeviceCall::SetState(change));
    }

    fn set_uniforms(&mut self, data: &[u8]) {
        self.log.push(DeviceCall::SetUniforms(data.to_vec()));
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        let binding = self.write_target;
        if let (Some(color), Some(record)) = (color, self.targets.get(&binding.target)) {
            for texture in &record.colors {
                self.texels
                    .insert((*texture, binding.layer, binding.mip), color);
            }
        }
        self.log.push(DeviceCall::Clear {
            binding,
            color,
            depth,
        });
    }

    fn draw_mesh(&mut self, mesh: MeshId) {
        if !self.meshes.contains_key(&mesh) {
            self.log.raise(DeviceError::InvalidHandle {
                kind: "mesh",
                value: mesh.raw(),
            });
            return;
        }
        let program = self.programs.get(&self.program).copied().unwrap_or("");
        self.log.push(DeviceCall::DrawMesh {
            binding: self.write_target,
            program,
            mesh,
        });
    }

    fn draw_fullscreen(&mut self) {
        let program = self.programs.get(&self.program).copied().unwrap_or("");
        self.log.push(DeviceCall::DrawFullscreen {
            binding: self.write_target,
            program,
        });
    }

    fn insert_marker(&mut self, label: &'static str) {
        self.log.push(DeviceCall::Marker(label));
    }

    fn read_pixel(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
        x: u32,
        y: u32,
    ) -> Result<[f32; 4], DeviceError> {
        let record = self.check_texture(texture)?;
        let (width, height) = (record.desc.width, record.desc.height);
        if x >= width || y >= height || layer >= record.desc.layers() {
            return Err(DeviceError::Readback(format!(
                "texel ({x}, {y}) layer {layer} is outside {width}x{height}"
            )));
        }
        self.log.push(DeviceCall::ReadPixel {
            texture,
            layer,
            mip,
        });
        Ok(self
            .texels
            .get(&(texture, layer, mip))
            .copied()
            .unwrap_or([0.0; 4]))
    }

    fn read_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
    ) -> Result<Vec<[f32; 4]>, DeviceError> {
        let record = self.check_texture(texture)?;
        if layer >= record.desc.layers() || mip >= record.desc.mips {
            return Err(DeviceError::Readback(format!(
                "layer {layer} mip {mip} is outside the texture"
            )));
        }
        let count = mip_extent(record.desc.width, mip) * mip_extent(record.desc.height, mip);
        self.log.push(DeviceCall::ReadTexture {
            texture,
            layer,
            mip,
        });
        let texel = self
            .texels
            .get(&(texture, layer, mip))
            .copied()
            .unwrap_or([0.0; 4]);
        Ok(vec![texel; count as usize])
    }

    fn flush(&mut self) {
        self.log.push(DeviceCall::Flush);
    }

    fn take_error(&mut self) -> Option<DeviceError> {
        self.log.errors.borrow_mut().pop_front()
    }
}
