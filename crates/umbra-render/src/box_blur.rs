//! Fixed-radius box filter over every layer of a render target.
//!
//! Sources of any shape are sampled as 2D arrays, so cube faces and array
//! layers are filtered one draw each.

use bytemuck::{Pod, Zeroable};
use umbra_gpu::{
    BindMode, DepthMode, GpuContext, RenderTarget, SamplerSlot, TargetDescriptor, TargetError,
    TextureId, TextureShape,
};

use crate::screen::{ScreenPass, fullscreen_wgsl, overwrite_state};

/// Filter radius in texels.
pub const BOX_RADIUS: i32 = 2;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BlurParams {
    /// xy: texel size, z: layer, w: 1 for the checkerboard subset.
    texel: [f32; 4],
}

/// WGSL box filter: 25 taps, or the 13 taps where `x + y` is even.
pub const BOX_BLUR_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
struct BlurParams {
    texel: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: BlurParams;
@group(1) @binding(0) var source: texture_2d_array<f32>;
@group(1) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let layer = i32(params.texel.z);
    let checkerboard = params.texel.w > 0.5;
    var sum = vec4<f32>(0.0);
    var count = 0.0;
    for (var y = -2; y <= 2; y++) {
        for (var x = -2; x <= 2; x++) {
            if (checkerboard && ((x + y) & 1) != 0) {
                continue;
            }
            let offset = vec2<f32>(f32(x), f32(y)) * params.texel.xy;
            sum += textureSampleLevel(source, source_sampler, in.uv + offset, layer, 0.0);
            count += 1.0;
        }
    }
    return sum / count;
}
"#
);

/// WGSL exact per-layer copy.
pub const LAYER_COPY_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
struct BlurParams {
    texel: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: BlurParams;
@group(1) @binding(0) var source: texture_2d_array<f32>;

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    return textureLoad(source, vec2<i32>(in.position.xy), i32(params.texel.z), 0);
}
"#
);

/// Offsets sampled by the filter.
pub fn taps(approximate: bool) -> Vec<(i32, i32)> {
    let range = -BOX_RADIUS..=BOX_RADIUS;
    range
        .clone()
        .flat_map(|y| range.clone().map(move |x| (x, y)))
        .filter(|(x, y)| !approximate || (x + y) % 2 == 0)
        .collect()
}

/// Box blur with an intermediate target for in-place filtering.
///
/// The intermediate target matches the descriptor given at construction and
/// is only allocated the first time source and destination coincide.
#[derive(Debug)]
pub struct BoxBlur {
    blur: ScreenPass,
    copy: ScreenPass,
    approximate: bool,
    scratch_desc: TargetDescriptor,
    scratch: Option<RenderTarget>,
}

impl BoxBlur {
    /// `desc` describes the targets this blur writes into; its first color
    /// attachment is used for the intermediate target.
    pub fn new(gpu: &mut GpuContext, desc: &TargetDescriptor, approximate: bool) -> Self {
        let blur = ScreenPass::with_uniforms::<BlurParams>(
            gpu,
            "box-blur",
            BOX_BLUR_SHADER_SOURCE,
            vec![SamplerSlot::color(TextureShape::Array2D)],
        );
        let copy = ScreenPass::with_uniforms::<BlurParams>(
            gpu,
            "box-blur-copy",
            LAYER_COPY_SHADER_SOURCE,
            vec![SamplerSlot::color(TextureShape::Array2D)],
        );
        let mut scratch_desc = desc.clone();
        scratch_desc.label = "box-blur-scratch";
        scratch_desc.colors.truncate(1);
        scratch_desc.depth_mode = DepthMode::None;
        scratch_desc.mips = 1;
        Self {
            blur,
            copy,
            approximate,
            scratch_desc,
            scratch: None,
        }
    }

    pub fn approximate(&self) -> bool {
        self.approximate
    }

    /// Blur every layer of `src` into the matching layer of `dst`, mip 0.
    ///
    /// `src` may be `dst`'s own color texture; the result then goes through
    /// the intermediate target and is copied back.
    #[track_caller]
    pub fn process(&mut self, gpu: &mut GpuContext, src: TextureId, dst: &RenderTarget) {
        gpu.mark("box-blur");
        let src = self.checked_source(gpu, src, dst.layers());
        overwrite_state(gpu);

        if src.is_valid() && src == dst.texture(0) {
            if !self.prepare_scratch(gpu, dst) {
                return;
            }
            let Some(scratch) = self.scratch.as_ref() else {
                return;
            };
            let (width, height) = (dst.width(), dst.height());
            for layer in 0..dst.layers() {
                scratch.bind_layer(gpu, layer, 0, BindMode::Write);
                scratch.set_viewport(gpu);
                self.blur
                    .draw_with(gpu, &[src], &self.params(width, height, layer));
            }
            let scratch_texture = scratch.texture(0);
            for layer in 0..dst.layers() {
                dst.bind_layer(gpu, layer, 0, BindMode::Write);
                dst.set_viewport(gpu);
                self.copy
                    .draw_with(gpu, &[scratch_texture], &self.params(width, height, layer));
            }
            return;
        }

        for layer in 0..dst.layers() {
            dst.bind_layer(gpu, layer, 0, BindMode::Write);
            dst.set_viewport(gpu);
            self.blur
                .draw_with(gpu, &[src], &self.params(dst.width(), dst.height(), layer));
        }
    }

    /// Blur `target`'s first color attachment in place.
    #[track_caller]
    pub fn process_in_place(&mut self, gpu: &mut GpuContext, target: &RenderTarget) {
        self.process(gpu, target.texture(0), target);
    }

    /// Resize the intermediate target along with the destinations.
    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), TargetError> {
        self.scratch_desc.width = width;
        self.scratch_desc.height = height;
        match &mut self.scratch {
            Some(scratch) => scratch.resize(gpu, width, height),
            None => Ok(()),
        }
    }

    fn params(&self, width: u32, height: u32, layer: u32) -> BlurParams {
        BlurParams {
            texel: [
                1.0 / width.max(1) as f32,
                1.0 / height.max(1) as f32,
                layer as f32,
                if self.approximate { 1.0 } else { 0.0 },
            ],
        }
    }

    fn checked_source(&self, gpu: &GpuContext, src: TextureId, layers: u32) -> TextureId {
        if !src.is_valid() {
            log::warn!("Box blur: no source texture, sampling none");
            return TextureId::NONE;
        }
        match gpu.texture_size(src) {
            None => {
                log::warn!("Box blur: unknown source {src}, sampling none");
                TextureId::NONE
            }
            Some((_, _, src_layers)) if src_layers < layers => {
                log::warn!(
                    "Box blur: source {src} has {src_layers} layers, destination {layers}; sampling none"
                );
                TextureId::NONE
            }
            Some(_) => src,
        }
    }

    fn prepare_scratch(&mut self, gpu: &mut GpuContext, dst: &RenderTarget) -> bool {
        let (width, height, depth) = (dst.width(), dst.height(), dst.depth());
        let stale = self.scratch.as_ref().is_some_and(|scratch| {
            (scratch.width(), scratch.height(), scratch.layers()) != (width, height, dst.layers())
        });
        if stale {
            self.scratch = None;
        }
        if self.scratch.is_none() {
            let desc = TargetDescriptor {
                width,
                height,
                depth,
                shape: dst.shape(),
                ..self.scratch_desc.clone()
            };
            match RenderTarget::new(gpu, &desc) {
                Ok(target) => self.scratch = Some(target),
                Err(err) => {
                    log::error!("Box blur: cannot allocate intermediate target: {err}");
                    return false;
                }
            }
        }
        true
    }
}
