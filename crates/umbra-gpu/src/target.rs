//! [`RenderTarget`]: a set of attachments that can be drawn into and sampled from.

use glam::UVec2;

use crate::context::{GpuContext, ReleaseQueue};
use crate::device::{DeviceError, TextureDescriptor};
use crate::handle::{Resource, TargetId, TextureId};
use crate::state::{StateChange, TargetBinding};
use crate::types::{BindMode, DepthMode, Layout, TextureShape, TextureSpec, Viewport, mip_extent};

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("render target '{label}' has zero size {width}x{height}")]
    ZeroSize {
        label: &'static str,
        width: u32,
        height: u32,
    },
    #[error("render target '{label}': cube array depth {depth} is not a multiple of 6")]
    CubeArrayDepth { label: &'static str, depth: u32 },
    #[error("render target '{label}' has no attachments")]
    NoAttachments { label: &'static str },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Parameters of a [`RenderTarget`].
#[derive(Clone, Debug, PartialEq)]
pub struct TargetDescriptor {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    /// Layer count for arrays; must be a multiple of 6 for `ArrayCube`.
    pub depth: u32,
    pub mips: u32,
    pub shape: TextureShape,
    pub colors: Vec<TextureSpec>,
    pub depth_mode: DepthMode,
}

impl TargetDescriptor {
    /// Single-layer, single-mip 2D target.
    pub fn d2(label: &'static str, width: u32, height: u32, colors: Vec<TextureSpec>) -> Self {
        Self {
            label,
            width,
            height,
            depth: 1,
            mips: 1,
            shape: TextureShape::D2,
            colors,
            depth_mode: DepthMode::None,
        }
    }

    pub fn with_shape(mut self, shape: TextureShape, depth: u32) -> Self {
        self.shape = shape;
        self.depth = depth;
        self
    }

    pub fn with_depth(mut self, mode: DepthMode) -> Self {
        self.depth_mode = mode;
        self
    }

    pub fn with_mips(mut self, mips: u32) -> Self {
        self.mips = mips.max(1);
        self
    }
}

/// Color attachments plus an optional depth attachment, all of one size and shape.
///
/// The target owns its textures. Dropping it queues every resource on the
/// context's release queue; they are destroyed on the next drain.
#[derive(Debug)]
pub struct RenderTarget {
    id: TargetId,
    label: &'static str,
    colors: Vec<TextureId>,
    depth_texture: Option<TextureId>,
    depth_mode: DepthMode,
    shape: TextureShape,
    width: u32,
    height: u32,
    depth: u32,
    mips: u32,
    releases: ReleaseQueue,
}

impl RenderTarget {
    pub fn new(gpu: &mut GpuContext, desc: &TargetDescriptor) -> Result<Self, TargetError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(TargetError::ZeroSize {
                label: desc.label,
                width: desc.width,
                height: desc.height,
            });
        }
        if desc.shape == TextureShape::ArrayCube && desc.depth % 6 != 0 {
            return Err(TargetError::CubeArrayDepth {
                label: desc.label,
                depth: desc.depth,
            });
        }
        if desc.colors.is_empty() && desc.depth_mode == DepthMode::None {
            return Err(TargetError::NoAttachments { label: desc.label });
        }

        let mips = desc.mips.max(1);
        let mut colors = Vec::with_capacity(desc.colors.len());
        for spec in &desc.colors {
            colors.push(gpu.create_texture(&TextureDescriptor {
                label: desc.label,
                spec: *spec,
                shape: desc.shape,
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
                mips,
            })?);
        }

        let depth_texture = match desc.depth_mode {
            DepthMode::None => None,
            // One image reused by every layer binding.
            DepthMode::Combined => Some(gpu.create_texture(&TextureDescriptor {
                label: desc.label,
                spec: TextureSpec::nearest(Layout::Depth32F),
                shape: TextureShape::D2,
                width: desc.width,
                height: desc.height,
                depth: 1,
                mips: 1,
            })?),
            DepthMode::PerSlice => Some(gpu.create_texture(&TextureDescriptor {
                label: desc.label,
                spec: TextureSpec::nearest(Layout::Depth32F),
                shape: desc.shape,
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
                mips: 1,
            })?),
        };

        let id = gpu.create_target(&colors, depth_texture, desc.depth_mode)?;
        let target = Self {
            id,
            label: desc.label,
            colors,
            depth_texture,
            depth_mode: desc.depth_mode,
            shape: desc.shape,
            width: desc.width,
            height: desc.height,
            depth: desc.depth.max(1),
            mips,
            releases: gpu.release_queue(),
        };
        target.check_complete(gpu);
        log::debug!(
            "Created render target '{}' {}x{} ({:?}, {} layers, {} colors)",
            target.label,
            target.width,
            target.height,
            target.shape,
            target.layers(),
            target.colors.len()
        );
        Ok(target)
    }

    /// Incomplete targets are reported and the default target is selected,
    /// so following draws land nowhere instead of in a broken attachment set.
    fn check_complete(&self, gpu: &mut GpuContext) -> bool {
        let status = gpu.target_status(self.id);
        if let crate::TargetStatus::Incomplete(reason) = status {
            log::error!("Render target '{}' is incomplete: {}", self.label, reason);
            gpu.bind_default_target();
            return false;
        }
        true
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn shape(&self) -> TextureShape {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Logical depth (array layer count, or cube count times 6 for cube arrays).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of bindable layers.
    pub fn layers(&self) -> u32 {
        self.shape.layer_count(self.depth)
    }

    pub fn mips(&self) -> u32 {
        self.mips
    }

    pub fn depth_mode(&self) -> DepthMode {
        self.depth_mode
    }

    pub fn color_count(&self) -> usize {
        self.colors.len()
    }

    /// Color attachment `index`, or [`TextureId::NONE`] if out of range.
    pub fn texture(&self, index: usize) -> TextureId {
        match self.colors.get(index) {
            Some(id) => *id,
            None => {
                log::warn!(
                    "Render target '{}' has no color attachment {}",
                    self.label,
                    index
                );
                TextureId::NONE
            }
        }
    }

    /// Depth attachment, or [`TextureId::NONE`] if the target has none.
    pub fn depth_texture(&self) -> TextureId {
        self.depth_texture.unwrap_or(TextureId::NONE)
    }

    /// Bind layer 0, mip 0 for writing.
    #[track_caller]
    pub fn bind(&self, gpu: &mut GpuContext) {
        self.bind_layer(gpu, 0, 0, BindMode::Write);
    }

    /// Bind one layer/mip. For cube shapes the layer is `cube * 6 + face`.
    #[track_caller]
    pub fn bind_layer(&self, gpu: &mut GpuContext, layer: u32, mip: u32, mode: BindMode) {
        if layer >= self.layers() || mip >= self.mips {
            log::warn!(
                "Render target '{}': layer {}/mip {} out of range ({} layers, {} mips)",
                self.label,
                layer,
                mip,
                self.layers(),
                self.mips
            );
            return;
        }
        gpu.bind_target(TargetBinding::new(self.id, layer, mip, mode));
    }

    /// Viewport covering the whole target at mip 0.
    #[track_caller]
    pub fn set_viewport(&self, gpu: &mut GpuContext) {
        self.set_viewport_mip(gpu, 0);
    }

    #[track_caller]
    pub fn set_viewport_mip(&self, gpu: &mut GpuContext, mip: u32) {
        gpu.set(StateChange::Viewport(Viewport::full(
            mip_extent(self.width, mip),
            mip_extent(self.height, mip),
        )));
    }

    /// Resize every attachment, keeping texture identities.
    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), TargetError> {
        self.resize_depth(gpu, width, height, self.depth)
    }

    /// Resize including the layer count. A no-op when nothing changes.
    pub fn resize_depth(
        &mut self,
        gpu: &mut GpuContext,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<(), TargetError> {
        let depth = depth.max(1);
        if width == self.width && height == self.height && depth == self.depth {
            return Ok(());
        }
        if width == 0 || height == 0 {
            return Err(TargetError::ZeroSize {
                label: self.label,
                width,
                height,
            });
        }
        if self.shape == TextureShape::ArrayCube && depth % 6 != 0 {
            return Err(TargetError::CubeArrayDepth {
                label: self.label,
                depth,
            });
        }
        for texture in &self.colors {
            gpu.resize_texture(*texture, width, height, depth)?;
        }
        if let Some(texture) = self.depth_texture {
            let depth_layers = match self.depth_mode {
                DepthMode::PerSlice => depth,
                DepthMode::Combined | DepthMode::None => 1,
            };
            gpu.resize_texture(texture, width, height, depth_layers)?;
        }
        log::debug!(
            "Resized render target '{}' {}x{} -> {}x{}",
            self.label,
            self.width,
            self.height,
            width,
            height
        );
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.check_complete(gpu);
        Ok(())
    }

    /// Clear the bound layer of this target, binding layer 0 first if another
    /// target is selected.
    #[track_caller]
    pub fn clear(&self, gpu: &mut GpuContext, color: Option<[f32; 4]>, depth: Option<f32>) {
        if gpu.state().write_target.target != self.id {
            self.bind(gpu);
        }
        gpu.clear(color, depth);
    }

    /// Read one texel of color attachment 0 at layer 0, mip 0.
    pub fn read(&self, gpu: &mut GpuContext, position: UVec2) -> Result<[f32; 4], TargetError> {
        self.read_layer(gpu, 0, 0, position)
    }

    pub fn read_layer(
        &self,
        gpu: &mut GpuContext,
        layer: u32,
        mip: u32,
        position: UVec2,
    ) -> Result<[f32; 4], TargetError> {
        self.bind_layer(gpu, layer, mip, BindMode::Read);
        Ok(gpu.read_pixel(self.texture(0), layer, mip, position.x, position.y)?)
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.releases.push(Resource::Target(self.id));
        for texture in self.colors.iter().chain(self.depth_texture.iter()) {
            self.releases.push(Resource::Texture(*texture));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{CallLog, DeviceCall, HeadlessDevice};

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    fn rgba(label: &'static str, w: u32, h: u32) -> TargetDescriptor {
        TargetDescriptor::d2(label, w, h, vec![TextureSpec::linear(Layout::Rgba16F)])
    }

    #[test]
    fn test_resize_to_same_size_is_noop() {
        let (mut gpu, log) = context();
        let mut target = RenderTarget::new(&mut gpu, &rgba("color", 64, 32)).unwrap();
        target.resize(&mut gpu, 128, 64).unwrap();
        let before = log.len();
        let texture = target.texture(0);
        target.resize(&mut gpu, 128, 64).unwrap();
        assert_eq!(log.len(), before);
        assert_eq!(target.texture(0), texture);
        assert_eq!(target.size(), UVec2::new(128, 64));
    }

    #[test]
    fn test_resize_keeps_texture_identity() {
        let (mut gpu, log) = context();
        let mut target = RenderTarget::new(
            &mut gpu,
            &rgba("gbuffer", 16, 16).with_depth(DepthMode::Combined),
        )
        .unwrap();
        let (color, depth) = (target.texture(0), target.depth_texture());
        target.resize(&mut gpu, 32, 8).unwrap();
        assert_eq!(target.texture(0), color);
        assert_eq!(target.depth_texture(), depth);
        assert_eq!(gpu.texture_size(color), Some((32, 8, 1)));
        assert_eq!(
            log.count(|c| matches!(c, DeviceCall::ResizeTexture { .. })),
            2
        );
    }

    #[test]
    fn test_array_cube_depth_validation() {
        let (mut gpu, _log) = context();
        let desc = rgba("shadows", 8, 8).with_shape(TextureShape::ArrayCube, 9);
        assert!(matches!(
            RenderTarget::new(&mut gpu, &desc),
            Err(TargetError::CubeArrayDepth { depth: 9, .. })
        ));
        let desc = rgba("shadows", 8, 8).with_shape(TextureShape::ArrayCube, 12);
        let target = RenderTarget::new(&mut gpu, &desc).unwrap();
        assert_eq!(target.layers(), 12);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let (mut gpu, _log) = context();
        assert!(matches!(
            RenderTarget::new(&mut gpu, &rgba("empty", 0, 4)),
            Err(TargetError::ZeroSize { .. })
        ));
    }

    #[test]
    fn test_out_of_range_texture_is_none() {
        let (mut gpu, _log) = context();
        let target = RenderTarget::new(&mut gpu, &rgba("color", 4, 4)).unwrap();
        assert_eq!(target.texture(3), TextureId::NONE);
        assert_eq!(target.depth_texture(), TextureId::NONE);
    }

    #[test]
    fn test_clear_then_read_returns_clear_color() {
        let (mut gpu, _log) = context();
        let target = RenderTarget::new(&mut gpu, &rgba("color", 4, 4)).unwrap();
        target.clear(&mut gpu, Some([1.0, 0.5, 0.25, 1.0]), None);
        let texel = target.read(&mut gpu, UVec2::new(1, 1)).unwrap();
        assert_eq!(texel, [1.0, 0.5, 0.25, 1.0]);
    }

    #[test]
    fn test_bind_layer_out_of_range_is_ignored() {
        let (mut gpu, log) = context();
        let target = RenderTarget::new(
            &mut gpu,
            &rgba("cube", 4, 4).with_shape(TextureShape::Cube, 1),
        )
        .unwrap();
        log.clear();
        target.bind_layer(&mut gpu, 5, 0, BindMode::Write);
        target.bind_layer(&mut gpu, 6, 0, BindMode::Write);
        assert_eq!(log.count(|c| matches!(c, DeviceCall::BindTarget(_))), 1);
    }

    #[test]
    fn test_drop_releases_all_attachments() {
        let (mut gpu, log) = context();
        let target = RenderTarget::new(
            &mut gpu,
            &rgba("gbuffer", 4, 4).with_depth(DepthMode::Combined),
        )
        .unwrap();
        let id = target.id();
        drop(target);
        gpu.flush();
        assert!(log.contains(&DeviceCall::DestroyTarget(id)));
        assert_eq!(
            log.count(|c| matches!(c, DeviceCall::DestroyTexture(_))),
            2
        );
    }
}
