//! Screen-space ambient occlusion at half resolution.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use half::f16;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use umbra_gpu::{
    Filter, GpuContext, Layout, RenderTarget, SamplerSlot, TargetDescriptor,
    TargetError, Texture, TextureDescriptor, TextureId, TextureShape, TextureSpec, Wrap,
};

use crate::RenderError;
use crate::box_blur::BoxBlur;
use crate::screen::{ScreenPass, fullscreen_wgsl, overwrite_state};

/// Hemisphere samples per pixel.
pub const KERNEL_SIZE: usize = 24;

/// Side of the tiling rotation noise texture.
pub const NOISE_SIZE: u32 = 5;

const KERNEL_SEED: u64 = 0x55A0;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SsaoParams {
    projection: [[f32; 4]; 4],
    inverse_projection: [[f32; 4]; 4],
    /// x: radius, y: bias, zw: noise tiling.
    settings: [f32; 4],
    /// xy: G-buffer size in pixels.
    screen: [f32; 4],
    samples: [[f32; 4]; KERNEL_SIZE],
}

/// WGSL occlusion estimate from view-space normals and depth.
pub const SSAO_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
struct SsaoParams {
    projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    settings: vec4<f32>,
    screen: vec4<f32>,
    samples: array<vec4<f32>, 24>,
};

@group(0) @binding(0) var<uniform> params: SsaoParams;
@group(1) @binding(0) var depth_texture: texture_depth_2d;
@group(1) @binding(2) var normal_texture: texture_2d<f32>;
@group(1) @binding(3) var normal_sampler: sampler;
@group(1) @binding(4) var noise_texture: texture_2d<f32>;
@group(1) @binding(5) var noise_sampler: sampler;

fn load_depth(uv: vec2<f32>) -> f32 {
    let size = vec2<i32>(params.screen.xy);
    let pixel = clamp(vec2<i32>(uv * params.screen.xy), vec2<i32>(0), size - vec2<i32>(1));
    return textureLoad(depth_texture, pixel, 0);
}

fn view_position(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let view = params.inverse_projection * ndc;
    return view.xyz / view.w;
}

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let depth = load_depth(in.uv);
    let stored = textureSampleLevel(normal_texture, normal_sampler, in.uv, 0.0).xyz;
    if (depth >= 1.0 || dot(stored, stored) < 1e-6) {
        return vec4<f32>(1.0);
    }
    let normal = normalize(stored);
    let position = view_position(in.uv, depth);
    let radius = params.settings.x;
    let bias = params.settings.y;

    let noise = textureSampleLevel(noise_texture, noise_sampler, in.uv * params.settings.zw, 0.0).xy;
    let random = vec3<f32>(noise, 0.0);
    var tangent = random - normal * dot(random, normal);
    if (dot(tangent, tangent) < 1e-6) {
        tangent = cross(normal, vec3<f32>(0.0, 0.0, 1.0));
        if (dot(tangent, tangent) < 1e-6) {
            tangent = vec3<f32>(1.0, 0.0, 0.0);
        }
    }
    tangent = normalize(tangent);
    let bitangent = cross(normal, tangent);
    let tbn = mat3x3<f32>(tangent, bitangent, normal);

    var occlusion = 0.0;
    for (var i = 0; i < 24; i++) {
        let sample_position = position + tbn * params.samples[i].xyz * radius;
        let clip = params.projection * vec4<f32>(sample_position, 1.0);
        let ndc = clip.xy / clip.w;
        let sample_uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        let scene_z = view_position(sample_uv, load_depth(sample_uv)).z;
        let range = smoothstep(0.0, 1.0, radius / max(abs(position.z - scene_z), 1e-4));
        if (scene_z >= sample_position.z + bias) {
            occlusion += range;
        }
    }
    return vec4<f32>(1.0 - occlusion / 24.0);
}
"#
);

/// The hemisphere kernel: unit-hemisphere directions around +Z, scaled so
/// samples cluster near the origin.
pub fn sample_kernel(seed: u64) -> Vec<Vec3> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..KERNEL_SIZE)
        .map(|i| {
            let direction = Vec3::new(
                rng.random::<f32>() * 2.0 - 1.0,
                rng.random::<f32>() * 2.0 - 1.0,
                rng.random::<f32>(),
            )
            .normalize_or(Vec3::Z);
            let t = i as f32 / KERNEL_SIZE as f32;
            let scale = 0.1 + 0.9 * t * t;
            direction * rng.random::<f32>() * scale
        })
        .collect()
}

/// Random rotation vectors in the tangent plane, packed as `Rgba16F` bytes.
fn noise_texels(seed: u64) -> Vec<u8> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..NOISE_SIZE * NOISE_SIZE)
        .flat_map(|_| {
            let x = rng.random::<f32>() * 2.0 - 1.0;
            let y = rng.random::<f32>() * 2.0 - 1.0;
            [x, y, 0.0, 1.0]
        })
        .flat_map(|value| f16::from_f32(value).to_le_bytes())
        .collect()
}

/// Occlusion target, its blur, and the noise texture.
#[derive(Debug)]
pub struct Ssao {
    raw: RenderTarget,
    result: RenderTarget,
    blur: BoxBlur,
    pass: ScreenPass,
    noise: Texture,
    kernel: [[f32; 4]; KERNEL_SIZE],
    radius: f32,
}

impl Ssao {
    /// `width` x `height` is the full render size; occlusion is computed at half of it.
    pub fn new(gpu: &mut GpuContext, width: u32, height: u32, radius: f32) -> Result<Self, RenderError> {
        let desc = Self::descriptor(width, height);
        let raw = RenderTarget::new(gpu, &desc)?;
        let result = RenderTarget::new(gpu, &TargetDescriptor { label: "ssao-result", ..desc.clone() })?;
        let blur = BoxBlur::new(gpu, &desc, true);
        let pass = ScreenPass::with_uniforms::<SsaoParams>(
            gpu,
            "ssao",
            SSAO_SHADER_SOURCE,
            vec![
                SamplerSlot::depth(TextureShape::D2),
                SamplerSlot::color(TextureShape::D2),
                SamplerSlot::color(TextureShape::D2),
            ],
        );
        let noise = Texture::with_data(
            gpu,
            &TextureDescriptor {
                label: "ssao-noise",
                spec: TextureSpec::new(Layout::Rgba16F, Filter::Nearest, Wrap::Repeat),
                shape: TextureShape::D2,
                width: NOISE_SIZE,
                height: NOISE_SIZE,
                depth: 1,
                mips: 1,
            },
            &noise_texels(KERNEL_SEED + 1),
        )?;
        let mut kernel = [[0.0; 4]; KERNEL_SIZE];
        for (slot, sample) in kernel.iter_mut().zip(sample_kernel(KERNEL_SEED)) {
            *slot = sample.extend(0.0).to_array();
        }
        Ok(Self {
            raw,
            result,
            blur,
            pass,
            noise,
            kernel,
            radius,
        })
    }

    fn descriptor(width: u32, height: u32) -> TargetDescriptor {
        TargetDescriptor::d2(
            "ssao",
            (width / 2).max(1),
            (height / 2).max(1),
            vec![TextureSpec::linear(Layout::R8)],
        )
    }

    /// The blurred occlusion image (1 = unoccluded).
    pub fn texture(&self) -> TextureId {
        self.result.texture(0)
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }

    /// Estimate occlusion from the G-buffer depth and normals, then blur it.
    #[track_caller]
    pub fn process(
        &mut self,
        gpu: &mut GpuContext,
        projection: &Mat4,
        depth: TextureId,
        normals: TextureId,
    ) {
        let (full_width, full_height) = match gpu.texture_size(depth) {
            Some((w, h, _)) => (w as f32, h as f32),
            None => {
                log::warn!("SSAO: unknown depth texture {depth}");
                (self.raw.width() as f32 * 2.0, self.raw.height() as f32 * 2.0)
            }
        };
        let params = SsaoParams {
            projection: projection.to_cols_array_2d(),
            inverse_projection: projection.inverse().to_cols_array_2d(),
            settings: [
                self.radius,
                0.025,
                self.raw.width() as f32 / NOISE_SIZE as f32,
                self.raw.height() as f32 / NOISE_SIZE as f32,
            ],
            screen: [full_width, full_height, 0.0, 0.0],
            samples: self.kernel,
        };
        overwrite_state(gpu);
        self.raw.bind(gpu);
        self.raw.set_viewport(gpu);
        self.pass
            .draw_with(gpu, &[depth, normals, self.noise.id()], &params);
        self.blur.process(gpu, self.raw.texture(0), &self.result);
    }

    /// Mark everything unoccluded without drawing.
    #[track_caller]
    pub fn clear(&self, gpu: &mut GpuContext) {
        self.result.bind(gpu);
        self.result.clear(gpu, Some([1.0; 4]), None);
    }

    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), TargetError> {
        let desc = Self::descriptor(width, height);
        self.raw.resize(gpu, desc.width, desc.height)?;
        self.result.resize(gpu, desc.width, desc.height)?;
        self.blur.resize(gpu, desc.width, desc.height)
    }

    /// Size of the occlusion image.
    pub fn size(&self) -> (u32, u32) {
        (self.result.width(), self.result.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_gpu::{CallLog, DeviceCall, HeadlessDevice};

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    #[test]
    fn test_kernel_is_reproducible_and_in_hemisphere() {
        let a = sample_kernel(7);
        let b = sample_kernel(7);
        assert_eq!(a, b);
        assert_eq!(a.len(), KERNEL_SIZE);
        for sample in &a {
            assert!(sample.z >= 0.0);
            assert!(sample.length() <= 1.0 + 1e-5);
        }
    }

    #[test]
    fn test_kernel_skews_toward_center() {
        let kernel = sample_kernel(KERNEL_SEED);
        let first: f32 = kernel[..8].iter().map(|s| s.length()).sum();
        let last: f32 = kernel[16..].iter().map(|s| s.length()).sum();
        assert!(first < last);
    }

    #[test]
    fn test_noise_texel_bytes() {
        let texels = noise_texels(3);
        assert_eq!(texels.len(), (NOISE_SIZE * NOISE_SIZE * 8) as usize);
        let z = f16::from_le_bytes([texels[4], texels[5]]);
        assert_eq!(z.to_f32(), 0.0);
    }

    #[test]
    fn test_params_layout() {
        assert_eq!(size_of::<SsaoParams>(), 2 * 64 + 2 * 16 + KERNEL_SIZE * 16);
    }

    #[test]
    fn test_shader_validates() {
        umbra_gpu::validate_wgsl("ssao", SSAO_SHADER_SOURCE).unwrap();
    }

    #[test]
    fn test_half_resolution() {
        let (mut gpu, _log) = context();
        let ssao = Ssao::new(&mut gpu, 641, 360, 0.5).unwrap();
        assert_eq!(ssao.size(), (320, 180));
        assert_eq!(gpu.texture_size(ssao.texture()), Some((320, 180, 1)));
    }

    #[test]
    fn test_process_draws_then_blurs() {
        let (mut gpu, log) = context();
        let mut ssao = Ssao::new(&mut gpu, 64, 64, 0.5).unwrap();
        ssao.process(&mut gpu, &Mat4::IDENTITY, TextureId::NONE, TextureId::NONE);
        let draws: Vec<_> = log
            .calls()
            .iter()
            .filter_map(DeviceCall::draw_program)
            .collect();
        assert_eq!(draws, vec!["ssao", "box-blur"]);
    }

    #[test]
    fn test_clear_marks_unoccluded_without_drawing() {
        let (mut gpu, log) = context();
        let ssao = Ssao::new(&mut gpu, 64, 64, 0.5).unwrap();
        ssao.clear(&mut gpu);
        assert_eq!(log.draws(), 0);
        let value = gpu.read_pixel(ssao.texture(), 0, 0, 3, 3).unwrap();
        assert_eq!(value[0], 1.0);
    }

    #[test]
    fn test_resize_keeps_half_resolution() {
        let (mut gpu, _log) = context();
        let mut ssao = Ssao::new(&mut gpu, 64, 64, 0.5).unwrap();
        ssao.resize(&mut gpu, 200, 100).unwrap();
        assert_eq!(ssao.size(), (100, 50));
    }
}
