//! [`GpuContext`]: the explicit device handle passed to every render component.

use std::cell::RefCell;
use std::panic::Location;
use std::rc::Rc;

use crate::cache::{CacheStatistics, DeviceStateCache};
use crate::device::{
    DeviceError, GraphicsDevice, MeshData, ProgramDescriptor, TargetStatus, TextureDescriptor,
};
use crate::handle::{MeshId, ProgramId, Resource, TargetId, TextureId};
use crate::state::{DeviceState, StateChange, TargetBinding};
use crate::types::{DepthMode, TextureShape};

/// Resources released by scope-owning wrappers, destroyed at the next drain.
///
/// Owners hold a clone and push on `Drop`; the context drains the queue before
/// creating resources and on every flush, reporting each deletion to the cache.
#[derive(Clone, Debug, Default)]
pub struct ReleaseQueue(Rc<RefCell<Vec<Resource>>>);

impl ReleaseQueue {
    pub fn push(&self, resource: Resource) {
        self.0.borrow_mut().push(resource);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn take(&self) -> Vec<Resource> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// Device plus state cache. All state transitions must go through here.
pub struct GpuContext {
    device: Box<dyn GraphicsDevice>,
    cache: DeviceStateCache,
    releases: ReleaseQueue,
    validation: bool,
    markers: Vec<&'static str>,
}

impl GpuContext {
    /// Wrap a device. With `validation` on, device errors are polled and
    /// logged after every state-changing operation.
    pub fn new(device: Box<dyn GraphicsDevice>, validation: bool) -> Self {
        log::info!(
            "GPU context created on '{}' backend (validation: {})",
            device.backend_name(),
            validation
        );
        Self {
            device,
            cache: DeviceStateCache::new(),
            releases: ReleaseQueue::default(),
            validation,
            markers: Vec::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.device.backend_name()
    }

    pub fn validation(&self) -> bool {
        self.validation
    }

    pub fn state(&self) -> &DeviceState {
        self.cache.state()
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    pub fn release_queue(&self) -> ReleaseQueue {
        self.releases.clone()
    }

    /// Stage markers emitted since the last [`begin_frame`](Self::begin_frame).
    pub fn markers(&self) -> &[&'static str] {
        &self.markers
    }

    /// Reset per-frame statistics and markers, and destroy released resources.
    pub fn begin_frame(&mut self) {
        self.markers.clear();
        self.cache.reset_statistics();
        self.collect_garbage();
    }

    /// Destroy every resource queued for release.
    pub fn collect_garbage(&mut self) {
        for resource in self.releases.take() {
            self.destroy(resource);
        }
    }

    /// Destroy a resource now and purge it from the cache.
    pub fn destroy(&mut self, resource: Resource) {
        match resource {
            Resource::Texture(id) => self.device.destroy_texture(id),
            Resource::Target(id) => self.device.destroy_target(id),
            Resource::Program(id) => self.device.destroy_program(id),
            Resource::Mesh(id) => self.device.destroy_mesh(id),
        }
        self.cache.notify_deleted(resource);
    }

    // --- Resources ---

    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, DeviceError> {
        self.collect_garbage();
        self.device.create_texture(desc)
    }

    pub fn resize_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<(), DeviceError> {
        self.device.resize_texture(texture, width, height, depth)
    }

    pub fn upload_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        self.device.upload_texture(texture, layer, mip, data)
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32, u32)> {
        self.device.texture_size(texture)
    }

    pub fn create_target(
        &mut self,
        colors: &[TextureId],
        depth: Option<TextureId>,
        depth_mode: DepthMode,
    ) -> Result<TargetId, DeviceError> {
        self.collect_garbage();
        self.device.create_target(colors, depth, depth_mode)
    }

    pub fn target_status(&self, target: TargetId) -> TargetStatus {
        self.device.target_status(target)
    }

    /// Compile a program. Failures are logged with the full diagnostic and
    /// yield [`ProgramId::NONE`]; draws with it are skipped.
    pub fn create_program(&mut self, desc: &ProgramDescriptor) -> ProgramId {
        self.collect_garbage();
        match self.device.create_program(desc) {
            Ok(id) => {
                log::debug!("Compiled program '{}' as {}", desc.name, id);
                id
            }
            Err(err) => {
                log::error!("[{}] {}", err.code(), err);
                ProgramId::NONE
            }
        }
    }

    pub fn create_mesh(&mut self, mesh: &MeshData) -> Result<MeshId, DeviceError> {
        self.collect_garbage();
        self.device.create_mesh(mesh)
    }

    // --- Cached state ---

    #[track_caller]
    pub fn bind_texture(&mut self, slot: usize, shape: TextureShape, texture: TextureId) {
        if self.cache.bind_texture(slot, shape, texture) {
            self.device.bind_texture(slot, shape, texture);
            self.check(Location::caller());
        }
    }

    #[track_caller]
    pub fn bind_target(&mut self, binding: TargetBinding) {
        if self.cache.bind_target(binding) {
            self.device.bind_target(binding);
            self.check(Location::caller());
        }
    }

    /// Select the default target (nothing bound).
    #[track_caller]
    pub fn bind_default_target(&mut self) {
        self.bind_target(TargetBinding::DEFAULT);
    }

    #[track_caller]
    pub fn use_program(&mut self, program: ProgramId) {
        if self.cache.use_program(program) {
            self.device.use_program(program);
            self.check(Location::caller());
        }
    }

    #[track_caller]
    pub fn set(&mut self, change: StateChange) {
        if self.cache.set(change) {
            self.device.set_state(change);
            self.check(Location::caller());
        }
    }

    // --- Commands ---

    pub fn set_uniforms(&mut self, data: &[u8]) {
        self.device.set_uniforms(data);
    }

    /// Upload a `Pod` uniform block for the current program.
    pub fn set_uniform_block<T: bytemuck::Pod>(&mut self, block: &T) {
        self.device.set_uniforms(bytemuck::bytes_of(block));
    }

    #[track_caller]
    pub fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        self.device.clear(color, depth);
        self.check(Location::caller());
    }

    /// Draw a mesh with the current program. Skipped when no valid program is bound.
    #[track_caller]
    pub fn draw_mesh(&mut self, mesh: MeshId) {
        if !self.cache.state().program.is_valid() {
            log::trace!("Skipping mesh draw: no valid program bound");
            return;
        }
        self.device.draw_mesh(mesh);
        self.check(Location::caller());
    }

    /// Draw a full-screen triangle with the current program.
    #[track_caller]
    pub fn draw_fullscreen(&mut self) {
        if !self.cache.state().program.is_valid() {
            log::trace!("Skipping full-screen draw: no valid program bound");
            return;
        }
        self.device.draw_fullscreen();
        self.check(Location::caller());
    }

    /// Record a stage marker in the device stream and the frame log.
    pub fn mark(&mut self, label: &'static str) {
        self.markers.push(label);
        self.device.insert_marker(label);
    }

    #[track_caller]
    pub fn read_pixel(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
        x: u32,
        y: u32,
    ) -> Result<[f32; 4], DeviceError> {
        self.collect_garbage();
        let result = self.device.read_pixel(texture, layer, mip, x, y);
        self.check(Location::caller());
        result
    }

    /// Read back a whole layer and mip, row-major from the top-left texel.
    #[track_caller]
    pub fn read_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
    ) -> Result<Vec<[f32; 4]>, DeviceError> {
        self.collect_garbage();
        let result = self.device.read_texture(texture, layer, mip);
        self.check(Location::caller());
        result
    }

    /// Submit pending work.
    #[track_caller]
    pub fn flush(&mut self) {
        self.collect_garbage();
        self.device.flush();
        if self.validation {
            self.check(Location::caller());
        } else {
            while let Some(err) = self.device.take_error() {
                log::debug!("[{}] {}", err.code(), err);
            }
        }
    }

    fn check(&mut self, location: &Location<'_>) {
        if !self.validation {
            return;
        }
        while let Some(err) = self.device.take_error() {
            log::error!(
                "{}:{}: [{}] {}",
                location.file(),
                location.line(),
                err.code(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DeviceCall, HeadlessDevice};
    use crate::types::{BindMode, Faces, Layout, TextureSpec};
    use crate::{SamplerSlot, VertexInput};

    fn context() -> (GpuContext, crate::headless::CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    fn texture_desc() -> TextureDescriptor {
        TextureDescriptor {
            label: "test",
            spec: TextureSpec::linear(Layout::Rgba8),
            shape: TextureShape::D2,
            width: 4,
            height: 4,
            depth: 1,
            mips: 1,
        }
    }

    #[test]
    fn test_redundant_binds_reach_device_once() {
        let (mut gpu, log) = context();
        let tex = gpu.create_texture(&texture_desc()).unwrap();
        log.clear();
        gpu.bind_texture(0, TextureShape::D2, tex);
        gpu.bind_texture(0, TextureShape::D2, tex);
        gpu.set(StateChange::Cull(true));
        gpu.set(StateChange::Cull(true));
        gpu.set(StateChange::CullFace(Faces::Back));
        assert_eq!(log.len(), 2);
        assert_eq!(gpu.statistics().issued, 2);
        assert_eq!(gpu.statistics().skipped, 3);
    }

    #[test]
    fn test_cache_matches_device_after_replay() {
        let (mut gpu, log) = context();
        let target = TargetId(5);
        let sequence = [
            StateChange::DepthTest(true),
            StateChange::DepthTest(false),
            StateChange::DepthTest(false),
            StateChange::Blend(true),
            StateChange::Cull(true),
            StateChange::CullFace(Faces::Front),
            StateChange::Blend(true),
        ];
        gpu.bind_target(TargetBinding::new(target, 2, 0, BindMode::Write));
        for change in sequence {
            gpu.set(change);
        }
        gpu.use_program(ProgramId(3));
        gpu.use_program(ProgramId(3));

        // Replay the calls that reached the device onto a fresh state.
        let mut reference = DeviceState::default();
        for call in log.calls() {
            match call {
                DeviceCall::SetState(change) => reference.apply(change),
                DeviceCall::BindTarget(binding) => reference.apply_target(binding),
                DeviceCall::UseProgram(id) => reference.program = id,
                DeviceCall::BindTexture { slot, shape, texture } => {
                    reference.textures[slot][shape.index()] = texture
                }
                _ => {}
            }
        }
        assert_eq!(&reference, gpu.state());
    }

    #[test]
    fn test_released_resources_are_destroyed_and_purged() {
        let (mut gpu, log) = context();
        let tex = gpu.create_texture(&texture_desc()).unwrap();
        gpu.bind_texture(3, TextureShape::D2, tex);
        let queue = gpu.release_queue();
        queue.push(Resource::Texture(tex));
        assert_eq!(queue.len(), 1);
        gpu.flush();
        assert!(queue.is_empty());
        assert!(log.contains(&DeviceCall::DestroyTexture(tex)));
        assert_eq!(gpu.state().texture(3, TextureShape::D2), TextureId::NONE);

        // The freed value is reused and the bind is not skipped.
        let reused = gpu.create_texture(&texture_desc()).unwrap();
        assert_eq!(reused, tex);
        log.clear();
        gpu.bind_texture(3, TextureShape::D2, reused);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_failed_program_yields_none_and_draws_skip() {
        let device = HeadlessDevice::new().failing_program("broken");
        let log = device.log();
        let mut gpu = GpuContext::new(Box::new(device), true);
        let program = gpu.create_program(&ProgramDescriptor {
            name: "broken",
            source: "fn main( {",
            vertex: VertexInput::FullScreen,
            samplers: vec![SamplerSlot::color(TextureShape::D2)],
            uniform_size: 0,
        });
        assert_eq!(program, ProgramId::NONE);
        gpu.use_program(program);
        gpu.draw_fullscreen();
        assert_eq!(log.count(|c| matches!(c, DeviceCall::DrawFullscreen { .. })), 0);
    }

    #[test]
    fn test_markers_reset_each_frame() {
        let (mut gpu, _log) = context();
        gpu.mark("geometry");
        gpu.mark("ssao");
        assert_eq!(gpu.markers(), &["geometry", "ssao"]);
        gpu.begin_frame();
        assert!(gpu.markers().is_empty());
    }
}
