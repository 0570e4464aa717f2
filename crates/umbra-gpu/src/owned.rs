//! Scope-owning wrappers for textures, meshes and programs.
//!
//! Each wrapper pushes its handle into the context's [`ReleaseQueue`] when
//! dropped; the context destroys it at the next drain and purges it from the
//! state cache.

use crate::context::{GpuContext, ReleaseQueue};
use crate::device::{DeviceError, MeshData, ProgramDescriptor, SamplerSlot, TextureDescriptor};
use crate::handle::{MeshId, ProgramId, Resource, TextureId};
use crate::types::TextureShape;

/// An owned texture.
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    desc: TextureDescriptor,
    releases: ReleaseQueue,
}

impl Texture {
    pub fn new(gpu: &mut GpuContext, desc: &TextureDescriptor) -> Result<Self, DeviceError> {
        let id = gpu.create_texture(desc)?;
        Ok(Self {
            id,
            desc: *desc,
            releases: gpu.release_queue(),
        })
    }

    /// Create and fill layer 0, mip 0.
    pub fn with_data(
        gpu: &mut GpuContext,
        desc: &TextureDescriptor,
        data: &[u8],
    ) -> Result<Self, DeviceError> {
        let texture = Self::new(gpu, desc)?;
        gpu.upload_texture(texture.id, 0, 0, data)?;
        Ok(texture)
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.releases.push(Resource::Texture(self.id));
    }
}

/// An owned mesh.
#[derive(Debug)]
pub struct Mesh {
    id: MeshId,
    triangles: usize,
    releases: ReleaseQueue,
}

impl Mesh {
    pub fn new(gpu: &mut GpuContext, data: &MeshData) -> Result<Self, DeviceError> {
        let id = gpu.create_mesh(data)?;
        Ok(Self {
            id,
            triangles: data.triangle_count(),
            releases: gpu.release_queue(),
        })
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.releases.push(Resource::Mesh(self.id));
    }
}

/// An owned program and the sampler slots it declares.
///
/// A program that failed to compile holds [`ProgramId::NONE`]; binding it is
/// allowed and every draw with it is skipped by the context.
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    name: &'static str,
    samplers: Vec<SamplerSlot>,
    releases: ReleaseQueue,
}

impl Program {
    pub fn new(gpu: &mut GpuContext, desc: ProgramDescriptor) -> Self {
        let id = gpu.create_program(&desc);
        Self {
            id,
            name: desc.name,
            samplers: desc.samplers,
            releases: gpu.release_queue(),
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_valid()
    }

    pub fn samplers(&self) -> &[SamplerSlot] {
        &self.samplers
    }

    /// Make this the current program.
    #[track_caller]
    pub fn bind(&self, gpu: &mut GpuContext) {
        gpu.use_program(self.id);
    }

    /// Bind `textures` to the declared slots in order.
    ///
    /// Missing entries are bound as `NONE`. Handles the device does not know,
    /// or whose layer count cannot back the slot's shape, are reported and
    /// replaced by `NONE`.
    #[track_caller]
    pub fn bind_textures(&self, gpu: &mut GpuContext, textures: &[TextureId]) {
        if textures.len() > self.samplers.len() {
            log::warn!(
                "Program '{}' declares {} textures, {} given",
                self.name,
                self.samplers.len(),
                textures.len()
            );
        }
        for (slot, sampler) in self.samplers.iter().enumerate() {
            let requested = textures.get(slot).copied().unwrap_or(TextureId::NONE);
            let texture = checked_texture(gpu, self.name, slot, sampler, requested);
            gpu.bind_texture(slot, sampler.shape, texture);
        }
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if self.id.is_valid() {
            self.releases.push(Resource::Program(self.id));
        }
    }
}

fn checked_texture(
    gpu: &GpuContext,
    program: &str,
    slot: usize,
    sampler: &SamplerSlot,
    texture: TextureId,
) -> TextureId {
    if !texture.is_valid() {
        return texture;
    }
    let Some((_, _, layers)) = gpu.texture_size(texture) else {
        log::warn!("Program '{program}' slot {slot}: unknown {texture}, binding none");
        return TextureId::NONE;
    };
    let fits = match sampler.shape {
        TextureShape::D2 | TextureShape::Array2D => true,
        TextureShape::Cube => layers >= 6,
        TextureShape::ArrayCube => layers >= 6 && layers % 6 == 0,
    };
    if !fits {
        log::warn!(
            "Program '{program}' slot {slot}: {texture} has {layers} layers, cannot be sampled as {:?}",
            sampler.shape
        );
        return TextureId::NONE;
    }
    texture
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::VertexInput;
    use crate::headless::{DeviceCall, HeadlessDevice};
    use crate::types::{Layout, TextureSpec};

    fn context() -> (GpuContext, crate::headless::CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    fn desc(shape: TextureShape, depth: u32) -> TextureDescriptor {
        TextureDescriptor {
            label: "owned",
            spec: TextureSpec::linear(Layout::Rgba8),
            shape,
            width: 2,
            height: 2,
            depth,
            mips: 1,
        }
    }

    fn program(gpu: &mut GpuContext, samplers: Vec<SamplerSlot>) -> Program {
        Program::new(
            gpu,
            ProgramDescriptor {
                name: "owned-test",
                source: "",
                vertex: VertexInput::FullScreen,
                samplers,
                uniform_size: 0,
            },
        )
    }

    #[test]
    fn test_dropped_texture_is_destroyed_at_next_drain() {
        let (mut gpu, log) = context();
        let texture = Texture::new(&mut gpu, &desc(TextureShape::D2, 1)).unwrap();
        let id = texture.id();
        drop(texture);
        assert!(!log.contains(&DeviceCall::DestroyTexture(id)));
        gpu.collect_garbage();
        assert!(log.contains(&DeviceCall::DestroyTexture(id)));
    }

    #[test]
    fn test_wrong_shape_binds_none() {
        let (mut gpu, log) = context();
        let flat = Texture::new(&mut gpu, &desc(TextureShape::D2, 1)).unwrap();
        let program = program(&mut gpu, vec![SamplerSlot::color(TextureShape::Cube)]);
        program.bind_textures(&mut gpu, &[flat.id()]);
        assert_eq!(gpu.state().texture(0, TextureShape::Cube), TextureId::NONE);
        assert!(!log.contains(&DeviceCall::BindTexture {
            slot: 0,
            shape: TextureShape::Cube,
            texture: flat.id(),
        }));
    }

    #[test]
    fn test_matching_textures_bind_in_slot_order() {
        let (mut gpu, _log) = context();
        let flat = Texture::new(&mut gpu, &desc(TextureShape::D2, 1)).unwrap();
        let cube = Texture::new(&mut gpu, &desc(TextureShape::Cube, 6)).unwrap();
        let program = program(
            &mut gpu,
            vec![
                SamplerSlot::color(TextureShape::D2),
                SamplerSlot::color(TextureShape::Cube),
            ],
        );
        program.bind_textures(&mut gpu, &[flat.id(), cube.id()]);
        assert_eq!(gpu.state().texture(0, TextureShape::D2), flat.id());
        assert_eq!(gpu.state().texture(1, TextureShape::Cube), cube.id());
    }

    #[test]
    fn test_failed_program_is_not_released() {
        let device = HeadlessDevice::new().failing_program("owned-test");
        let log = device.log();
        let mut gpu = GpuContext::new(Box::new(device), true);
        let program = program(&mut gpu, Vec::new());
        assert!(!program.is_valid());
        drop(program);
        gpu.collect_garbage();
        assert_eq!(log.count(|c| matches!(c, DeviceCall::DestroyProgram(_))), 0);
    }
}
