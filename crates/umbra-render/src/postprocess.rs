//! Bloom, tone mapping, FXAA and the final sRGB blit.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use umbra_gpu::{
    BindMode, BlendFunction, GpuContext, Layout, RenderTarget, SamplerSlot, StateChange,
    TargetDescriptor, TargetError, TextureId, TextureShape, TextureSpec,
};

use crate::RenderError;
use crate::gaussian_blur::GaussianBlur;
use crate::screen::{COPY_SHADER_SOURCE, ScreenPass, fullscreen_wgsl, overwrite_state};

/// Rec. 709 luma weights.
pub const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

pub fn luminance(color: Vec3) -> f32 {
    color.dot(LUMA)
}

/// Share of `color` that blooms above `threshold`.
pub fn bloom_select(color: Vec3, threshold: f32) -> Vec3 {
    let luma = luminance(color);
    color * ((luma - threshold).max(0.0) / luma.max(1e-4))
}

/// Narkowicz's fit of the ACES filmic curve.
pub fn aces_filmic(x: f32) -> f32 {
    ((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14)).clamp(0.0, 1.0)
}

/// Side of the square bloom target.
pub fn bloom_side(requested: u32) -> u32 {
    requested.max(1).next_power_of_two()
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BloomParams {
    /// x: threshold, y: mix.
    settings: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct TonemapParams {
    /// x: exposure, y: 1 for the filmic curve.
    settings: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct FxaaParams {
    inverse_screen_size: [f32; 4],
}

pub const BLOOM_SELECT_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
@group(0) @binding(0) var<uniform> settings: vec4<f32>;
@group(1) @binding(0) var hdr: texture_2d<f32>;
@group(1) @binding(1) var hdr_sampler: sampler;

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let color = textureSampleLevel(hdr, hdr_sampler, in.uv, 0.0).rgb;
    let luma = dot(color, vec3<f32>(0.2126, 0.7152, 0.0722));
    let weight = max(luma - settings.x, 0.0) / max(luma, 0.0001);
    return vec4<f32>(color * weight, 1.0);
}
"#
);

pub const BLOOM_COMPOSITE_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
@group(0) @binding(0) var<uniform> settings: vec4<f32>;
@group(1) @binding(0) var bloom: texture_2d<f32>;
@group(1) @binding(1) var bloom_sampler: sampler;

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let color = textureSampleLevel(bloom, bloom_sampler, in.uv, 0.0).rgb;
    return vec4<f32>(color * settings.y, 0.0);
}
"#
);

/// Exposure and the filmic curve. Luma goes to alpha for FXAA.
pub const TONEMAP_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
@group(0) @binding(0) var<uniform> settings: vec4<f32>;
@group(1) @binding(0) var hdr: texture_2d<f32>;
@group(1) @binding(1) var hdr_sampler: sampler;

fn aces(x: vec3<f32>) -> vec3<f32> {
    return clamp((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14), vec3<f32>(0.0), vec3<f32>(1.0));
}

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    var color = textureSampleLevel(hdr, hdr_sampler, in.uv, 0.0).rgb * settings.x;
    if (settings.y > 0.5) {
        color = aces(color);
    } else {
        color = clamp(color, vec3<f32>(0.0), vec3<f32>(1.0));
    }
    return vec4<f32>(color, dot(color, vec3<f32>(0.2126, 0.7152, 0.0722)));
}
"#
);

pub const FXAA_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
@group(0) @binding(0) var<uniform> params: vec4<f32>;
@group(1) @binding(0) var image: texture_2d<f32>;
@group(1) @binding(1) var image_sampler: sampler;

const REDUCE_MIN: f32 = 0.0078125;
const REDUCE_MUL: f32 = 0.125;
const SPAN_MAX: f32 = 8.0;

fn luma_at(uv: vec2<f32>) -> f32 {
    return textureSampleLevel(image, image_sampler, uv, 0.0).a;
}

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let texel = params.xy;
    let nw = luma_at(in.uv + vec2<f32>(-1.0, -1.0) * texel);
    let ne = luma_at(in.uv + vec2<f32>(1.0, -1.0) * texel);
    let sw = luma_at(in.uv + vec2<f32>(-1.0, 1.0) * texel);
    let se = luma_at(in.uv + vec2<f32>(1.0, 1.0) * texel);
    let center = textureSampleLevel(image, image_sampler, in.uv, 0.0);
    let m = center.a;
    let luma_min = min(m, min(min(nw, ne), min(sw, se)));
    let luma_max = max(m, max(max(nw, ne), max(sw, se)));

    var dir = vec2<f32>(-((nw + ne) - (sw + se)), (nw + sw) - (ne + se));
    let reduce = max((nw + ne + sw + se) * 0.25 * REDUCE_MUL, REDUCE_MIN);
    let scale = 1.0 / (min(abs(dir.x), abs(dir.y)) + reduce);
    dir = clamp(dir * scale, vec2<f32>(-SPAN_MAX), vec2<f32>(SPAN_MAX)) * texel;

    let a = 0.5 * (
        textureSampleLevel(image, image_sampler, in.uv + dir * (1.0 / 3.0 - 0.5), 0.0).rgb +
        textureSampleLevel(image, image_sampler, in.uv + dir * (2.0 / 3.0 - 0.5), 0.0).rgb);
    let b = a * 0.5 + 0.25 * (
        textureSampleLevel(image, image_sampler, in.uv - dir * 0.5, 0.0).rgb +
        textureSampleLevel(image, image_sampler, in.uv + dir * 0.5, 0.0).rgb);
    let luma_b = dot(b, vec3<f32>(0.2126, 0.7152, 0.0722));
    if (luma_b < luma_min || luma_b > luma_max) {
        return vec4<f32>(a, 1.0);
    }
    return vec4<f32>(b, 1.0);
}
"#
);

/// Post-processing targets and passes after light accumulation.
#[derive(Debug)]
pub struct PostProcess {
    select: RenderTarget,
    blur: GaussianBlur,
    tonemapped: RenderTarget,
    antialiased: RenderTarget,
    output: RenderTarget,
    select_pass: ScreenPass,
    composite_pass: ScreenPass,
    tonemap_pass: ScreenPass,
    fxaa_pass: ScreenPass,
    blit_pass: ScreenPass,
}

impl PostProcess {
    pub fn new(
        gpu: &mut GpuContext,
        width: u32,
        height: u32,
        bloom_resolution: u32,
        bloom_cascade_depth: usize,
    ) -> Result<Self, RenderError> {
        let side = bloom_side(bloom_resolution);
        let select = RenderTarget::new(
            gpu,
            &TargetDescriptor::d2(
                "bloom-select",
                side,
                side,
                vec![TextureSpec::linear(Layout::Rgb16F)],
            ),
        )?;
        let blur = GaussianBlur::new(gpu, side, side, bloom_cascade_depth, Layout::Rgb16F)?;
        let ldr = |label| TargetDescriptor::d2(label, width, height, vec![TextureSpec::linear(Layout::Rgba8)]);
        let tonemapped = RenderTarget::new(gpu, &ldr("tonemapped"))?;
        let antialiased = RenderTarget::new(gpu, &ldr("antialiased"))?;
        let output = RenderTarget::new(gpu, &ldr("output"))?;
        let color = || vec![SamplerSlot::color(TextureShape::D2)];
        Ok(Self {
            select,
            blur,
            tonemapped,
            antialiased,
            output,
            select_pass: ScreenPass::with_uniforms::<BloomParams>(
                gpu,
                "bloom-select",
                BLOOM_SELECT_SHADER_SOURCE,
                color(),
            ),
            composite_pass: ScreenPass::with_uniforms::<BloomParams>(
                gpu,
                "bloom-composite",
                BLOOM_COMPOSITE_SHADER_SOURCE,
                color(),
            ),
            tonemap_pass: ScreenPass::with_uniforms::<TonemapParams>(
                gpu,
                "tonemap",
                TONEMAP_SHADER_SOURCE,
                color(),
            ),
            fxaa_pass: ScreenPass::with_uniforms::<FxaaParams>(
                gpu,
                "fxaa",
                FXAA_SHADER_SOURCE,
                color(),
            ),
            blit_pass: ScreenPass::new(gpu, "final-blit", COPY_SHADER_SOURCE, color()),
        })
    }

    /// The presented image.
    pub fn output(&self) -> &RenderTarget {
        &self.output
    }

    pub fn tonemapped(&self) -> &RenderTarget {
        &self.tonemapped
    }

    pub fn antialiased(&self) -> &RenderTarget {
        &self.antialiased
    }

    pub fn bloom_target(&self) -> &RenderTarget {
        &self.select
    }

    /// Select bright regions of `hdr`, blur them and add them back into it.
    #[track_caller]
    pub fn bloom(&self, gpu: &mut GpuContext, hdr: &RenderTarget, threshold: f32, mix: f32) {
        let params = BloomParams {
            settings: [threshold, mix, 0.0, 0.0],
        };
        self.select.bind(gpu);
        self.select.set_viewport(gpu);
        overwrite_state(gpu);
        self.select_pass.draw_with(gpu, &[hdr.texture(0)], &params);

        self.blur.process(gpu, self.select.texture(0));

        hdr.bind(gpu);
        hdr.set_viewport(gpu);
        gpu.set(StateChange::Blend(true));
        gpu.set(StateChange::BlendFunction(BlendFunction::ADDITIVE));
        self.composite_pass
            .draw_with(gpu, &[self.blur.texture()], &params);
        gpu.set(StateChange::Blend(false));
    }

    /// HDR to display range. Clamps instead of the filmic curve when `filmic` is off.
    #[track_caller]
    pub fn tonemap(&self, gpu: &mut GpuContext, hdr: TextureId, exposure: f32, filmic: bool) {
        self.tonemapped.bind(gpu);
        self.tonemapped.set_viewport(gpu);
        overwrite_state(gpu);
        self.tonemap_pass.draw_with(
            gpu,
            &[hdr],
            &TonemapParams {
                settings: [exposure, if filmic { 1.0 } else { 0.0 }, 0.0, 0.0],
            },
        );
    }

    #[track_caller]
    pub fn fxaa(&self, gpu: &mut GpuContext) {
        self.antialiased.bind(gpu);
        self.antialiased.set_viewport(gpu);
        overwrite_state(gpu);
        self.fxaa_pass.draw_with(
            gpu,
            &[self.tonemapped.texture(0)],
            &FxaaParams {
                inverse_screen_size: [
                    1.0 / self.tonemapped.width() as f32,
                    1.0 / self.tonemapped.height() as f32,
                    0.0,
                    0.0,
                ],
            },
        );
    }

    /// Copy the last image into the output with sRGB encoding on store.
    #[track_caller]
    pub fn blit(&self, gpu: &mut GpuContext, antialiased: bool) {
        let source = if antialiased {
            self.antialiased.texture(0)
        } else {
            self.tonemapped.texture(0)
        };
        self.output.bind_layer(gpu, 0, 0, BindMode::SrgbWrite);
        self.output.set_viewport(gpu);
        overwrite_state(gpu);
        self.blit_pass.draw(gpu, &[source]);
    }

    /// Resize the screen-sized targets. The bloom target keeps its size.
    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), TargetError> {
        self.tonemapped.resize(gpu, width, height)?;
        self.antialiased.resize(gpu, width, height)?;
        self.output.resize(gpu, width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_gpu::{CallLog, DeviceCall, DepthMode, HeadlessDevice};

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    fn hdr(gpu: &mut GpuContext) -> RenderTarget {
        RenderTarget::new(
            gpu,
            &TargetDescriptor::d2("hdr", 40, 30, vec![TextureSpec::linear(Layout::Rgb16F)])
                .with_depth(DepthMode::None),
        )
        .unwrap()
    }

    #[test]
    fn test_shaders_validate() {
        for (name, source) in [
            ("bloom-select", BLOOM_SELECT_SHADER_SOURCE),
            ("bloom-composite", BLOOM_COMPOSITE_SHADER_SOURCE),
            ("tonemap", TONEMAP_SHADER_SOURCE),
            ("fxaa", FXAA_SHADER_SOURCE),
        ] {
            umbra_gpu::validate_wgsl(name, source).unwrap();
        }
    }

    #[test]
    fn test_curves() {
        assert_eq!(aces_filmic(0.0), 0.0);
        assert!(aces_filmic(100.0) > 0.99);
        assert!(aces_filmic(0.5) < aces_filmic(1.0));
        assert!((luminance(Vec3::ONE) - 1.0).abs() < 1e-6);
        assert_eq!(bloom_select(Vec3::splat(0.5), 1.0), Vec3::ZERO);
        let bright = bloom_select(Vec3::splat(3.0), 1.0);
        assert!((bright.x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_bloom_side_is_power_of_two() {
        assert_eq!(bloom_side(500), 512);
        assert_eq!(bloom_side(512), 512);
        assert_eq!(bloom_side(0), 1);
    }

    #[test]
    fn test_bloom_selects_blurs_then_adds() {
        let (mut gpu, log) = context();
        let post = PostProcess::new(&mut gpu, 40, 30, 60, 2).unwrap();
        assert_eq!(post.bloom_target().width(), 64);
        let hdr = hdr(&mut gpu);
        let start = log.len();
        post.bloom(&mut gpu, &hdr, 1.0, 0.2);
        let calls = log.since(start);
        let programs: Vec<_> = calls.iter().filter_map(DeviceCall::draw_program).collect();
        assert_eq!(programs.first(), Some(&"bloom-select"));
        assert_eq!(programs.last(), Some(&"bloom-composite"));
        assert!(programs.contains(&"gaussian-combine"));
        let composite = calls
            .iter()
            .find(|c| c.draw_program() == Some("bloom-composite"))
            .unwrap();
        assert!(matches!(
            composite,
            DeviceCall::DrawFullscreen { binding, .. } if binding.target == hdr.id()
        ));
        assert!(!gpu.state().blend);
    }

    #[test]
    fn test_blit_writes_srgb_from_chosen_source() {
        let (mut gpu, log) = context();
        let post = PostProcess::new(&mut gpu, 16, 16, 16, 1).unwrap();
        post.blit(&mut gpu, false);
        let binding = log
            .calls()
            .iter()
            .find_map(|c| match c {
                DeviceCall::DrawFullscreen { binding, program } if *program == "final-blit" => {
                    Some(*binding)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(binding.target, post.output().id());
        assert_eq!(binding.mode, BindMode::SrgbWrite);
        assert_eq!(gpu.state().texture(0, TextureShape::D2), post.tonemapped().texture(0));
    }

    #[test]
    fn test_resize_keeps_bloom_target() {
        let (mut gpu, _log) = context();
        let mut post = PostProcess::new(&mut gpu, 16, 16, 32, 2).unwrap();
        post.resize(&mut gpu, 48, 24).unwrap();
        assert_eq!(post.output().size(), glam::UVec2::new(48, 24));
        assert_eq!(post.tonemapped().size(), glam::UVec2::new(48, 24));
        assert_eq!(post.bloom_target().width(), 32);
    }
}
