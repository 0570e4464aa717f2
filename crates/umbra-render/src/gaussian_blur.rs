//! Multi-resolution Gaussian cascade.
//!
//! Level 0 is a copy of the input, each further level halves the previous one.
//! Every level gets a separable 9-tap blur, horizontal then vertical, and the
//! levels are averaged back into one full-resolution image.

use bytemuck::{Pod, Zeroable};
use umbra_gpu::{
    GpuContext, Layout, RenderTarget, SamplerSlot, TargetDescriptor, TargetError, TextureId,
    TextureShape, TextureSpec,
};

use crate::screen::{COPY_SHADER_SOURCE, ScreenPass, fullscreen_wgsl, overwrite_state};

/// Deepest supported cascade.
pub const MAX_CASCADE_DEPTH: usize = 6;

/// Distance between taps, in texels.
pub const TAP_SPACING: f32 = 1.2;

/// 9-tap Gaussian weights (center, then each symmetric pair).
pub const GAUSSIAN_WEIGHTS: [f32; 5] = [
    0.227_027_03,
    0.194_594_6,
    0.121_621_62,
    0.054_054_055,
    0.016_216_216,
];

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct DirectionParams {
    /// xy: one tap step in uv.
    step: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct CombineParams {
    weights: [[f32; 4]; 2],
}

/// WGSL separable blur along `params.step`.
pub const GAUSSIAN_BLUR_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
struct DirectionParams {
    step: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: DirectionParams;
@group(1) @binding(0) var source: texture_2d<f32>;
@group(1) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    var weights = array<f32, 5>(0.22702703, 0.1945946, 0.12162162, 0.054054055, 0.016216216);
    var color = textureSampleLevel(source, source_sampler, in.uv, 0.0) * weights[0];
    for (var i = 1; i < 5; i++) {
        let offset = params.step.xy * f32(i);
        color += textureSampleLevel(source, source_sampler, in.uv + offset, 0.0) * weights[i];
        color += textureSampleLevel(source, source_sampler, in.uv - offset, 0.0) * weights[i];
    }
    return color;
}
"#
);

/// WGSL weighted sum of up to six cascade levels.
pub const CASCADE_COMBINE_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
struct CombineParams {
    weights: array<vec4<f32>, 2>,
};

@group(0) @binding(0) var<uniform> params: CombineParams;
@group(1) @binding(0) var level0: texture_2d<f32>;
@group(1) @binding(1) var level0_sampler: sampler;
@group(1) @binding(2) var level1: texture_2d<f32>;
@group(1) @binding(3) var level1_sampler: sampler;
@group(1) @binding(4) var level2: texture_2d<f32>;
@group(1) @binding(5) var level2_sampler: sampler;
@group(1) @binding(6) var level3: texture_2d<f32>;
@group(1) @binding(7) var level3_sampler: sampler;
@group(1) @binding(8) var level4: texture_2d<f32>;
@group(1) @binding(9) var level4_sampler: sampler;
@group(1) @binding(10) var level5: texture_2d<f32>;
@group(1) @binding(11) var level5_sampler: sampler;

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let a = params.weights[0];
    let b = params.weights[1];
    var color = textureSampleLevel(level0, level0_sampler, in.uv, 0.0) * a.x;
    color += textureSampleLevel(level1, level1_sampler, in.uv, 0.0) * a.y;
    color += textureSampleLevel(level2, level2_sampler, in.uv, 0.0) * a.z;
    color += textureSampleLevel(level3, level3_sampler, in.uv, 0.0) * a.w;
    color += textureSampleLevel(level4, level4_sampler, in.uv, 0.0) * b.x;
    color += textureSampleLevel(level5, level5_sampler, in.uv, 0.0) * b.y;
    return color;
}
"#
);

/// Size of cascade level `level` for a `width` x `height` input.
pub fn level_size(width: u32, height: u32, level: usize) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// Equal weights over the first `depth` levels, zero after.
fn combine_weights(depth: usize) -> CombineParams {
    let mut flat = [0.0f32; 8];
    let weight = 1.0 / depth.max(1) as f32;
    for value in flat.iter_mut().take(depth) {
        *value = weight;
    }
    CombineParams {
        weights: [
            [flat[0], flat[1], flat[2], flat[3]],
            [flat[4], flat[5], flat[6], flat[7]],
        ],
    }
}

#[derive(Debug)]
struct Level {
    image: RenderTarget,
    scratch: RenderTarget,
}

/// A Gaussian cascade that owns its levels and output.
#[derive(Debug)]
pub struct GaussianBlur {
    width: u32,
    height: u32,
    spec: TextureSpec,
    levels: Vec<Level>,
    output: Option<RenderTarget>,
    copy: ScreenPass,
    blur: ScreenPass,
    combine: ScreenPass,
}

impl GaussianBlur {
    /// `cascade_depth` is clamped to `1..=MAX_CASCADE_DEPTH`.
    pub fn new(
        gpu: &mut GpuContext,
        width: u32,
        height: u32,
        cascade_depth: usize,
        layout: Layout,
    ) -> Result<Self, TargetError> {
        let depth = cascade_depth.clamp(1, MAX_CASCADE_DEPTH);
        if depth != cascade_depth {
            log::warn!("Gaussian blur: cascade depth {cascade_depth} clamped to {depth}");
        }
        let spec = TextureSpec::linear(layout);
        let copy = ScreenPass::new(
            gpu,
            "gaussian-copy",
            COPY_SHADER_SOURCE,
            vec![SamplerSlot::color(TextureShape::D2)],
        );
        let blur = ScreenPass::with_uniforms::<DirectionParams>(
            gpu,
            "gaussian-blur",
            GAUSSIAN_BLUR_SHADER_SOURCE,
            vec![SamplerSlot::color(TextureShape::D2)],
        );
        let combine = ScreenPass::with_uniforms::<CombineParams>(
            gpu,
            "gaussian-combine",
            CASCADE_COMBINE_SHADER_SOURCE,
            vec![SamplerSlot::color(TextureShape::D2); MAX_CASCADE_DEPTH],
        );

        let mut levels = Vec::with_capacity(depth);
        for level in 0..depth {
            let (w, h) = level_size(width, height, level);
            levels.push(Level {
                image: RenderTarget::new(
                    gpu,
                    &TargetDescriptor::d2("gaussian-level", w, h, vec![spec]),
                )?,
                scratch: RenderTarget::new(
                    gpu,
                    &TargetDescriptor::d2("gaussian-scratch", w, h, vec![spec]),
                )?,
            });
        }
        let output = if depth > 1 {
            Some(RenderTarget::new(
                gpu,
                &TargetDescriptor::d2("gaussian-output", width, height, vec![spec]),
            )?)
        } else {
            None
        };
        log::debug!("Gaussian blur {width}x{height}, {depth} levels, {layout:?}");

        Ok(Self {
            width,
            height,
            spec,
            levels,
            output,
            copy,
            blur,
            combine,
        })
    }

    pub fn cascade_depth(&self) -> usize {
        self.levels.len()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> Layout {
        self.spec.layout
    }

    /// The blurred result: the combined image, or level 0 for a single level.
    pub fn texture(&self) -> TextureId {
        match (&self.output, self.levels.first()) {
            (Some(output), _) => output.texture(0),
            (None, Some(level)) => level.image.texture(0),
            (None, None) => TextureId::NONE,
        }
    }

    /// Blur `src` (sampled as 2D).
    #[track_caller]
    pub fn process(&self, gpu: &mut GpuContext, src: TextureId) {
        gpu.mark("gaussian-blur");
        overwrite_state(gpu);
        let src = if src.is_valid() && gpu.texture_size(src).is_none() {
            log::warn!("Gaussian blur: unknown source {src}, sampling none");
            TextureId::NONE
        } else {
            src
        };

        let mut previous = src;
        for level in &self.levels {
            level.image.bind(gpu);
            level.image.set_viewport(gpu);
            level.image.clear(gpu, Some([0.0; 4]), None);
            self.copy.draw(gpu, &[previous]);
            previous = level.image.texture(0);
        }

        for level in &self.levels {
            let (w, h) = (level.image.width() as f32, level.image.height() as f32);
            level.scratch.bind(gpu);
            level.scratch.set_viewport(gpu);
            self.blur.draw_with(
                gpu,
                &[level.image.texture(0)],
                &DirectionParams {
                    step: [TAP_SPACING / w, 0.0, 0.0, 0.0],
                },
            );
            level.image.bind(gpu);
            self.blur.draw_with(
                gpu,
                &[level.scratch.texture(0)],
                &DirectionParams {
                    step: [0.0, TAP_SPACING / h, 0.0, 0.0],
                },
            );
        }

        if let Some(output) = &self.output {
            output.bind(gpu);
            output.set_viewport(gpu);
            let textures: Vec<TextureId> =
                self.levels.iter().map(|l| l.image.texture(0)).collect();
            self.combine
                .draw_with(gpu, &textures, &combine_weights(self.levels.len()));
        }
    }

    /// Reallocate every level for a new input size.
    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), TargetError> {
        for (index, level) in self.levels.iter_mut().enumerate() {
            let (w, h) = level_size(width, height, index);
            level.image.resize(gpu, w, h)?;
            level.scratch.resize(gpu, w, h)?;
        }
        if let Some(output) = &mut self.output {
            output.resize(gpu, width, height)?;
        }
        self.width = width;
        self.height = height;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_gpu::{CallLog, HeadlessDevice};

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    #[test]
    fn test_gaussian_weights_sum_to_approximately_one() {
        let sum = GAUSSIAN_WEIGHTS[0] + 2.0 * GAUSSIAN_WEIGHTS[1..].iter().sum::<f32>();
        assert!((sum - 1.0).abs() < 0.01, "sum = {sum}");
    }

    #[test]
    fn test_level_sizes_halve() {
        assert_eq!(level_size(512, 256, 0), (512, 256));
        assert_eq!(level_size(512, 256, 1), (256, 128));
        assert_eq!(level_size(3, 1, 2), (1, 1));
    }

    #[test]
    fn test_combine_weights() {
        let params = combine_weights(2);
        assert_eq!(params.weights[0], [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(params.weights[1], [0.0; 4]);
        assert_eq!(size_of::<CombineParams>(), 32);
        assert_eq!(size_of::<DirectionParams>(), 16);
    }

    #[test]
    fn test_shaders_validate() {
        umbra_gpu::validate_wgsl("gaussian-blur", GAUSSIAN_BLUR_SHADER_SOURCE).unwrap();
        umbra_gpu::validate_wgsl("gaussian-combine", CASCADE_COMBINE_SHADER_SOURCE).unwrap();
    }

    #[test]
    fn test_two_level_cascade_draws() {
        let (mut gpu, log) = context();
        let source = RenderTarget::new(
            &mut gpu,
            &TargetDescriptor::d2("src", 64, 64, vec![TextureSpec::linear(Layout::Rgb16F)]),
        )
        .unwrap();
        let blur = GaussianBlur::new(&mut gpu, 64, 64, 2, Layout::Rgb16F).unwrap();
        blur.process(&mut gpu, source.texture(0));
        assert_eq!(log.draws_with("gaussian-copy"), 2);
        assert_eq!(log.draws_with("gaussian-blur"), 4);
        assert_eq!(log.draws_with("gaussian-combine"), 1);
        assert_eq!(log.draws(), 7);
    }

    #[test]
    fn test_single_level_has_no_combine() {
        let (mut gpu, log) = context();
        let blur = GaussianBlur::new(&mut gpu, 32, 32, 1, Layout::Rgb16F).unwrap();
        blur.process(&mut gpu, TextureId::NONE);
        assert_eq!(log.draws_with("gaussian-combine"), 0);
        assert_eq!(blur.texture(), blur.levels[0].image.texture(0));
    }

    #[test]
    fn test_resize_rescales_levels() {
        let (mut gpu, _log) = context();
        let mut blur = GaussianBlur::new(&mut gpu, 64, 64, 3, Layout::Rgb16F).unwrap();
        blur.resize(&mut gpu, 128, 32).unwrap();
        assert_eq!(blur.levels[2].image.width(), 32);
        assert_eq!(blur.levels[2].image.height(), 8);
        assert_eq!(gpu.texture_size(blur.texture()), Some((128, 32, 1)));
    }

    #[test]
    fn test_depth_is_clamped() {
        let (mut gpu, _log) = context();
        let blur = GaussianBlur::new(&mut gpu, 16, 16, 10, Layout::Rgb16F).unwrap();
        assert_eq!(blur.cascade_depth(), MAX_CASCADE_DEPTH);
    }
}
