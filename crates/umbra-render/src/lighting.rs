//! Ambient composite and light accumulation into the HDR scene target.
//!
//! The ambient pass overwrites the HDR target with image-based lighting
//! (spherical-harmonic irradiance, a prefiltered reflection cube and an
//! analytic environment BRDF) scaled by ambient occlusion. Each light then
//! adds its contribution: directional lights as a full-screen pass, point
//! and spot lights as volumes drawn with front faces culled so the camera
//! may sit inside them.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use umbra_gpu::{
    BlendFunction, DepthMode, Faces, GpuContext, Layout, Mesh, Program, ProgramDescriptor,
    RenderTarget, SamplerSlot, StateChange, TargetDescriptor, TargetError, TextureId,
    TextureShape, TextureSpec, VertexInput,
};
use umbra_scene::{Background, Light, LightKind, Scene, ShadowTechnique, geometry};

use crate::RenderError;
use crate::gbuffer::{ALBEDO, EFFECTS, GBuffer, NORMAL};
use crate::screen::{ScreenPass, fullscreen_wgsl, overwrite_state};

/// Ramamoorthi-Hanrahan irradiance constants.
const SH_C1: f32 = 0.429043;
const SH_C2: f32 = 0.511664;
const SH_C3: f32 = 0.743125;
const SH_C4: f32 = 0.886227;
const SH_C5: f32 = 0.247708;

/// Variance floor of the Chebyshev bound.
pub const MIN_VARIANCE: f32 = 0.00002;
/// Probabilities below this are treated as fully shadowed.
pub const LIGHT_BLEED_REDUCTION: f32 = 0.2;

/// Mip levels of the reflection cube the roughness range is spread over.
const REFLECTION_MIPS: f32 = 5.0;

/// Diffuse irradiance from 9 SH coefficients, ordered
/// `L00, L1-1, L10, L11, L2-2, L2-1, L20, L21, L22`.
pub fn sh_irradiance(coefficients: &[Vec3; 9], normal: Vec3) -> Vec3 {
    let [l00, l1m1, l10, l11, l2m2, l2m1, l20, l21, l22] = *coefficients;
    let Vec3 { x, y, z } = normal;
    SH_C1 * l22 * (x * x - y * y) + SH_C3 * l20 * z * z + SH_C4 * l00 - SH_C5 * l20
        + 2.0 * SH_C1 * (l2m2 * x * y + l21 * x * z + l2m1 * y * z)
        + 2.0 * SH_C2 * (l11 * x + l1m1 * y + l10 * z)
}

/// Scale and bias applied to F0 for the split-sum environment term,
/// fitted analytically (Karis).
pub fn env_brdf(roughness: f32, n_dot_v: f32) -> Vec2 {
    let c0 = Vec4::new(-1.0, -0.0275, -0.572, 0.022);
    let c1 = Vec4::new(1.0, 0.0425, 1.04, -0.04);
    let r = roughness * c0 + c1;
    let a004 = (r.x * r.x).min((-9.28 * n_dot_v).exp2()) * r.x + r.y;
    Vec2::new(-1.04, 1.04) * a004 + Vec2::new(r.z, r.w)
}

/// Upper bound on the lit fraction of a receiver at `depth` given the
/// stored moments `(E[d], E[d²])`.
pub fn chebyshev_visibility(moments: Vec2, depth: f32) -> f32 {
    if depth <= moments.x {
        return 1.0;
    }
    let variance = (moments.y - moments.x * moments.x).max(MIN_VARIANCE);
    let delta = depth - moments.x;
    let p = variance / (variance + delta * delta);
    ((p - LIGHT_BLEED_REDUCTION) / (1.0 - LIGHT_BLEED_REDUCTION)).clamp(0.0, 1.0)
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct AmbientParams {
    inverse_projection: [[f32; 4]; 4],
    view_to_world: [[f32; 4]; 4],
    irradiance: [[f32; 4]; 9],
    /// x: 1 with a reflection cube, y: its top mip.
    settings: [f32; 4],
    /// xy: 1 / G-buffer size.
    screen: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct LightUniforms {
    mvp: [[f32; 4]; 4],
    inverse_projection: [[f32; 4]; 4],
    view_to_world: [[f32; 4]; 4],
    light_view_projection: [[f32; 4]; 4],
    /// View-space position, w: radius.
    position: [f32; 4],
    /// View-space direction the light travels, w: kind (0 directional, 1 point, 2 spot).
    direction: [f32; 4],
    /// World position, w: shadow far plane.
    world_position: [f32; 4],
    color: [f32; 4],
    /// x: technique (0 none, 1 basic, 2 variance), y: layer, z: bias, w: 1 for radial depth.
    shadow: [f32; 4],
    uv_rect: [f32; 4],
    /// x: cos inner, y: cos outer.
    cone: [f32; 4],
    /// xy: 1 / G-buffer size.
    screen: [f32; 4],
}

/// G-buffer reads, shading and shadow helpers shared by every light program.
macro_rules! light_common_wgsl {
    () => {
        r#"
struct LightUniforms {
    mvp: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    view_to_world: mat4x4<f32>,
    light_view_projection: mat4x4<f32>,
    position: vec4<f32>,
    direction: vec4<f32>,
    world_position: vec4<f32>,
    color: vec4<f32>,
    shadow: vec4<f32>,
    uv_rect: vec4<f32>,
    cone: vec4<f32>,
    screen: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: LightUniforms;
@group(1) @binding(0) var albedo_texture: texture_2d<f32>;
@group(1) @binding(2) var normal_texture: texture_2d<f32>;
@group(1) @binding(4) var effects_texture: texture_2d<f32>;
@group(1) @binding(6) var depth_texture: texture_depth_2d;

const PI: f32 = 3.14159265;

fn view_position(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let view = params.inverse_projection * ndc;
    return view.xyz / view.w;
}

fn attenuation(distance: f32, radius: f32) -> f32 {
    let ratio = distance / radius;
    let falloff = clamp(1.0 - ratio * ratio, 0.0, 1.0);
    return falloff * falloff;
}

fn spot_factor(cos_angle: f32) -> f32 {
    let range = params.cone.x - params.cone.y;
    if (range <= 0.000001) {
        return select(0.0, 1.0, cos_angle >= params.cone.y);
    }
    return clamp((cos_angle - params.cone.y) / range, 0.0, 1.0);
}

fn chebyshev(moments: vec2<f32>, depth: f32) -> f32 {
    if (depth <= moments.x) {
        return 1.0;
    }
    let variance = max(moments.y - moments.x * moments.x, 0.00002);
    let delta = depth - moments.x;
    let p = variance / (variance + delta * delta);
    return clamp((p - 0.2) / 0.8, 0.0, 1.0);
}

fn compare_moments(moments: vec2<f32>, depth: f32) -> f32 {
    let biased = depth - params.shadow.z;
    if (params.shadow.x < 1.5) {
        return select(0.0, 1.0, biased <= moments.x);
    }
    return chebyshev(moments, biased);
}

fn shade(albedo: vec3<f32>, effects: vec3<f32>, n: vec3<f32>, v: vec3<f32>, l: vec3<f32>) -> vec3<f32> {
    let roughness = max(effects.x, 0.04);
    let metallic = effects.y;
    let h = normalize(v + l);
    let n_dot_l = max(dot(n, l), 0.0);
    let n_dot_v = max(dot(n, v), 0.0001);
    let n_dot_h = max(dot(n, h), 0.0);
    let alpha = roughness * roughness;
    let alpha2 = alpha * alpha;
    let denom = n_dot_h * n_dot_h * (alpha2 - 1.0) + 1.0;
    let distribution = alpha2 / (PI * denom * denom);
    let k = alpha * 0.5;
    let visibility = 0.25 / ((n_dot_l * (1.0 - k) + k) * (n_dot_v * (1.0 - k) + k));
    let f0 = mix(vec3<f32>(0.04), albedo, metallic);
    let fresnel = f0 + (1.0 - f0) * pow(1.0 - max(dot(v, h), 0.0), 5.0);
    let diffuse = (1.0 - fresnel) * (1.0 - metallic) * albedo / PI;
    return (diffuse + fresnel * distribution * visibility) * n_dot_l;
}

struct Surface {
    albedo: vec3<f32>,
    normal: vec3<f32>,
    effects: vec3<f32>,
    position: vec3<f32>,
    valid: bool,
};

fn load_surface(frag: vec4<f32>) -> Surface {
    let pixel = vec2<i32>(frag.xy);
    let uv = frag.xy * params.screen.xy;
    var surface: Surface;
    surface.albedo = textureLoad(albedo_texture, pixel, 0).rgb;
    surface.normal = textureLoad(normal_texture, pixel, 0).xyz;
    surface.effects = textureLoad(effects_texture, pixel, 0).rgb;
    surface.position = view_position(uv, textureLoad(depth_texture, pixel, 0));
    surface.valid = dot(surface.normal, surface.normal) > 0.25;
    surface.normal = normalize(surface.normal + vec3<f32>(0.0, 0.0, 0.000001));
    return surface;
}

fn radiance(surface: Surface) -> vec3<f32> {
    let v = normalize(-surface.position);
    var l = -params.direction.xyz;
    var intensity = 1.0;
    if (params.direction.w > 0.5) {
        let to_light = params.position.xyz - surface.position;
        let distance = length(to_light);
        l = to_light / max(distance, 0.0001);
        intensity = attenuation(distance, params.position.w);
        if (params.direction.w > 1.5) {
            intensity = intensity * spot_factor(dot(-l, params.direction.xyz));
        }
    }
    return params.color.rgb * intensity * shade(surface.albedo, surface.effects, surface.normal, v, l);
}

fn world_position(view: vec3<f32>) -> vec3<f32> {
    return (params.view_to_world * vec4<f32>(view, 1.0)).xyz;
}
"#
    };
}

/// Projected-map lookup for directional and spot lights.
macro_rules! planar_shadow_wgsl {
    () => {
        r#"
@group(1) @binding(8) var shadow_texture: texture_2d_array<f32>;
@group(1) @binding(9) var shadow_sampler: sampler;

fn shadow_factor(view: vec3<f32>) -> f32 {
    if (params.shadow.x < 0.5) {
        return 1.0;
    }
    let world = world_position(view);
    let clip = params.light_view_projection * vec4<f32>(world, 1.0);
    let ndc = clip.xyz / clip.w;
    let local = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if (any(local < vec2<f32>(0.0)) || any(local > vec2<f32>(1.0)) || ndc.z > 1.0) {
        return 1.0;
    }
    let uv = mix(params.uv_rect.xy, params.uv_rect.zw, local);
    var depth = ndc.z;
    if (params.shadow.w > 0.5) {
        depth = length(world - params.world_position.xyz) / params.world_position.w;
    }
    let moments = textureSampleLevel(shadow_texture, shadow_sampler, uv, i32(params.shadow.y), 0.0).xy;
    return compare_moments(moments, depth);
}
"#
    };
}

/// Light volume vertex stage.
macro_rules! volume_vertex_wgsl {
    () => {
        r#"
struct VolumeInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VolumeInput) -> @builtin(position) vec4<f32> {
    return params.mvp * vec4<f32>(in.position, 1.0);
}
"#
    };
}

macro_rules! light_fragment_wgsl {
    () => {
        r#"
@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let surface = load_surface(frag);
    if (!surface.valid) {
        return vec4<f32>(0.0);
    }
    return vec4<f32>(radiance(surface) * shadow_factor(surface.position), 0.0);
}
"#
    };
}

/// WGSL directional light, full-screen.
pub const DIRECTIONAL_SHADER_SOURCE: &str = concat!(
    light_common_wgsl!(),
    planar_shadow_wgsl!(),
    r#"
@vertex
fn vs_main(@builtin(vertex_index) idx: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}
"#,
    light_fragment_wgsl!()
);

/// WGSL spot light volume.
pub const SPOT_SHADER_SOURCE: &str = concat!(
    light_common_wgsl!(),
    planar_shadow_wgsl!(),
    volume_vertex_wgsl!(),
    light_fragment_wgsl!()
);

/// WGSL point light volume with a cube shadow map.
pub const POINT_SHADER_SOURCE: &str = concat!(
    light_common_wgsl!(),
    r#"
@group(1) @binding(8) var shadow_texture: texture_cube<f32>;
@group(1) @binding(9) var shadow_sampler: sampler;

fn shadow_factor(view: vec3<f32>) -> f32 {
    if (params.shadow.x < 0.5) {
        return 1.0;
    }
    let to_surface = world_position(view) - params.world_position.xyz;
    let moments = textureSampleLevel(shadow_texture, shadow_sampler, to_surface, 0.0).xy;
    return compare_moments(moments, length(to_surface) / params.world_position.w);
}
"#,
    volume_vertex_wgsl!(),
    light_fragment_wgsl!()
);

/// WGSL point light volume reading one cube of a cube array.
pub const POINT_ARRAY_SHADER_SOURCE: &str = concat!(
    light_common_wgsl!(),
    r#"
@group(1) @binding(8) var shadow_texture: texture_cube_array<f32>;
@group(1) @binding(9) var shadow_sampler: sampler;

fn shadow_factor(view: vec3<f32>) -> f32 {
    if (params.shadow.x < 0.5) {
        return 1.0;
    }
    let to_surface = world_position(view) - params.world_position.xyz;
    let moments = textureSampleLevel(shadow_texture, shadow_sampler, to_surface, i32(params.shadow.y), 0.0).xy;
    return compare_moments(moments, length(to_surface) / params.world_position.w);
}
"#,
    volume_vertex_wgsl!(),
    light_fragment_wgsl!()
);

/// WGSL image-based ambient composite.
pub const AMBIENT_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
struct AmbientParams {
    inverse_projection: mat4x4<f32>,
    view_to_world: mat4x4<f32>,
    irradiance: array<vec4<f32>, 9>,
    settings: vec4<f32>,
    screen: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: AmbientParams;
@group(1) @binding(0) var albedo_texture: texture_2d<f32>;
@group(1) @binding(2) var normal_texture: texture_2d<f32>;
@group(1) @binding(4) var effects_texture: texture_2d<f32>;
@group(1) @binding(6) var depth_texture: texture_depth_2d;
@group(1) @binding(8) var ssao_texture: texture_2d<f32>;
@group(1) @binding(9) var ssao_sampler: sampler;
@group(1) @binding(10) var reflection_texture: texture_cube<f32>;
@group(1) @binding(11) var reflection_sampler: sampler;

fn sh_irradiance(n: vec3<f32>) -> vec3<f32> {
    let l = params.irradiance;
    return 0.429043 * l[8].rgb * (n.x * n.x - n.y * n.y)
        + 0.743125 * l[6].rgb * n.z * n.z
        + 0.886227 * l[0].rgb
        - 0.247708 * l[6].rgb
        + 2.0 * 0.429043 * (l[4].rgb * n.x * n.y + l[7].rgb * n.x * n.z + l[5].rgb * n.y * n.z)
        + 2.0 * 0.511664 * (l[3].rgb * n.x + l[1].rgb * n.y + l[2].rgb * n.z);
}

fn env_brdf(roughness: f32, n_dot_v: f32) -> vec2<f32> {
    let c0 = vec4<f32>(-1.0, -0.0275, -0.572, 0.022);
    let c1 = vec4<f32>(1.0, 0.0425, 1.04, -0.04);
    let r = roughness * c0 + c1;
    let a004 = min(r.x * r.x, exp2(-9.28 * n_dot_v)) * r.x + r.y;
    return vec2<f32>(-1.04, 1.04) * a004 + r.zw;
}

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(in.position.xy);
    let albedo = textureLoad(albedo_texture, pixel, 0).rgb;
    let stored_normal = textureLoad(normal_texture, pixel, 0).xyz;
    if (dot(stored_normal, stored_normal) < 0.25) {
        return vec4<f32>(albedo, 1.0);
    }
    let effects = textureLoad(effects_texture, pixel, 0).rgb;
    let uv = in.position.xy * params.screen.xy;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, textureLoad(depth_texture, pixel, 0), 1.0);
    let view = params.inverse_projection * ndc;
    let position = view.xyz / view.w;

    let n = normalize(stored_normal);
    let v = normalize(-position);
    let roughness = effects.x;
    let metallic = effects.y;
    let world_normal = normalize((params.view_to_world * vec4<f32>(n, 0.0)).xyz);
    let diffuse = albedo * (1.0 - metallic) * max(sh_irradiance(world_normal), vec3<f32>(0.0));

    let f0 = mix(vec3<f32>(0.04), albedo, metallic);
    let brdf = env_brdf(roughness, max(dot(n, v), 0.0));
    let world_reflection = (params.view_to_world * vec4<f32>(reflect(-v, n), 0.0)).xyz;
    let prefiltered = textureSampleLevel(reflection_texture, reflection_sampler, world_reflection, roughness * params.settings.y).rgb;
    let specular = prefiltered * (f0 * brdf.x + brdf.y) * params.settings.x;

    let occlusion = textureSampleLevel(ssao_texture, ssao_sampler, uv, 0.0).r * effects.z;
    return vec4<f32>((diffuse + specular) * occlusion, 1.0);
}
"#
);

/// The HDR scene target and the programs that light it.
#[derive(Debug)]
pub struct Lighting {
    hdr: RenderTarget,
    ambient: ScreenPass,
    directional: ScreenPass,
    point: Program,
    point_array: Program,
    spot: Program,
    sphere: Mesh,
    cone: Mesh,
}

/// View-dependent inputs of the light passes.
#[derive(Clone, Copy, Debug)]
pub struct ViewInputs {
    pub view: Mat4,
    pub projection: Mat4,
}

impl ViewInputs {
    fn inverse_view(&self) -> Mat4 {
        self.view.inverse()
    }
}

impl Lighting {
    pub fn new(gpu: &mut GpuContext, width: u32, height: u32) -> Result<Self, RenderError> {
        let hdr = RenderTarget::new(gpu, &Self::descriptor(width, height))?;
        let gbuffer_slots = || {
            vec![
                SamplerSlot::color(TextureShape::D2),
                SamplerSlot::color(TextureShape::D2),
                SamplerSlot::color(TextureShape::D2),
                SamplerSlot::depth(TextureShape::D2),
            ]
        };
        let light_slots = |shape: TextureShape| {
            let mut slots = gbuffer_slots();
            slots.push(SamplerSlot::color(shape));
            slots
        };
        let ambient = ScreenPass::with_uniforms::<AmbientParams>(
            gpu,
            "ambient",
            AMBIENT_SHADER_SOURCE,
            {
                let mut slots = gbuffer_slots();
                slots.push(SamplerSlot::color(TextureShape::D2));
                slots.push(SamplerSlot::color(TextureShape::Cube));
                slots
            },
        );
        let directional = ScreenPass::with_uniforms::<LightUniforms>(
            gpu,
            "light-directional",
            DIRECTIONAL_SHADER_SOURCE,
            light_slots(TextureShape::Array2D),
        );
        let volume = |gpu: &mut GpuContext,
                      name: &'static str,
                      source: &'static str,
                      shape: TextureShape| {
            Program::new(
                gpu,
                ProgramDescriptor {
                    name,
                    source,
                    vertex: VertexInput::Mesh,
                    samplers: light_slots(shape),
                    uniform_size: size_of::<LightUniforms>() as u64,
                },
            )
        };
        let point = volume(gpu, "light-point", POINT_SHADER_SOURCE, TextureShape::Cube);
        let point_array = volume(
            gpu,
            "light-point-array",
            POINT_ARRAY_SHADER_SOURCE,
            TextureShape::ArrayCube,
        );
        let spot = volume(gpu, "light-spot", SPOT_SHADER_SOURCE, TextureShape::Array2D);
        let sphere = Mesh::new(gpu, &geometry::icosphere(2))?;
        let cone = Mesh::new(gpu, &geometry::cone(24))?;
        Ok(Self {
            hdr,
            ambient,
            directional,
            point,
            point_array,
            spot,
            sphere,
            cone,
        })
    }

    fn descriptor(width: u32, height: u32) -> TargetDescriptor {
        TargetDescriptor::d2(
            "hdr",
            width,
            height,
            vec![TextureSpec::linear(Layout::Rgb16F)],
        )
        .with_depth(DepthMode::None)
    }

    pub fn target(&self) -> &RenderTarget {
        &self.hdr
    }

    pub fn texture(&self) -> TextureId {
        self.hdr.texture(0)
    }

    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), TargetError> {
        self.hdr.resize(gpu, width, height)
    }

    fn gbuffer_textures(gbuffer: &GBuffer) -> [TextureId; 4] {
        [
            gbuffer.texture(ALBEDO),
            gbuffer.texture(NORMAL),
            gbuffer.texture(EFFECTS),
            gbuffer.depth_texture(),
        ]
    }

    fn screen(&self, gbuffer: &GBuffer) -> [f32; 4] {
        let target = gbuffer.target();
        [
            1.0 / target.width() as f32,
            1.0 / target.height() as f32,
            0.0,
            0.0,
        ]
    }

    /// Overwrite the HDR target with ambient lighting.
    #[track_caller]
    pub fn draw_ambient(
        &self,
        gpu: &mut GpuContext,
        gbuffer: &GBuffer,
        occlusion: TextureId,
        background: &Background,
        view: &ViewInputs,
    ) {
        self.hdr.bind(gpu);
        self.hdr.set_viewport(gpu);
        overwrite_state(gpu);
        let mut irradiance = [[0.0; 4]; 9];
        for (slot, coefficient) in irradiance.iter_mut().zip(background.irradiance) {
            *slot = coefficient.extend(0.0).to_array();
        }
        let has_reflection = background.reflection.is_valid();
        let [albedo, normal, effects, depth] = Self::gbuffer_textures(gbuffer);
        self.ambient.draw_with(
            gpu,
            &[albedo, normal, effects, depth, occlusion, background.reflection],
            &AmbientParams {
                inverse_projection: view.projection.inverse().to_cols_array_2d(),
                view_to_world: view.inverse_view().to_cols_array_2d(),
                irradiance,
                settings: [
                    if has_reflection { 1.0 } else { 0.0 },
                    REFLECTION_MIPS,
                    0.0,
                    0.0,
                ],
                screen: self.screen(gbuffer),
            },
        );
    }

    /// Add every light of `scene`: directional, then point, then spot.
    /// Returns the number of light draws.
    #[track_caller]
    pub fn draw_lights(
        &self,
        gpu: &mut GpuContext,
        gbuffer: &GBuffer,
        scene: &Scene,
        view: &ViewInputs,
    ) -> usize {
        self.hdr.bind(gpu);
        self.hdr.set_viewport(gpu);
        gpu.set(StateChange::Blend(true));
        gpu.set(StateChange::BlendFunction(BlendFunction::ADDITIVE));
        gpu.set(StateChange::DepthTest(false));

        let textures = Self::gbuffer_textures(gbuffer);
        let screen = self.screen(gbuffer);
        let mut draws = 0;

        gpu.set(StateChange::Cull(false));
        for light in &scene.directional_lights {
            let uniforms = light_uniforms(light, view, screen);
            self.directional
                .draw_with(gpu, &with_shadow(textures, light), &uniforms);
            draws += 1;
        }

        gpu.set(StateChange::Cull(true));
        gpu.set(StateChange::CullFace(Faces::Front));
        for light in &scene.point_lights {
            let program = if Self::reads_cube_array(gpu, light) {
                &self.point_array
            } else {
                &self.point
            };
            self.draw_volume(gpu, program, &self.sphere, light, textures, view, screen);
            draws += 1;
        }
        for light in &scene.spot_lights {
            self.draw_volume(gpu, &self.spot, &self.cone, light, textures, view, screen);
            draws += 1;
        }

        gpu.set(StateChange::CullFace(Faces::Back));
        gpu.set(StateChange::Cull(false));
        gpu.set(StateChange::Blend(false));
        draws
    }

    fn reads_cube_array(gpu: &GpuContext, light: &Light) -> bool {
        light
            .region
            .and_then(|region| gpu.texture_size(region.texture))
            .is_some_and(|(_, _, layers)| layers > 6)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_volume(
        &self,
        gpu: &mut GpuContext,
        program: &Program,
        mesh: &Mesh,
        light: &Light,
        textures: [TextureId; 4],
        view: &ViewInputs,
        screen: [f32; 4],
    ) {
        let mut uniforms = light_uniforms(light, view, screen);
        if let Some(model) = light.volume_model() {
            uniforms.mvp = (view.projection * view.view * model).to_cols_array_2d();
        }
        program.bind(gpu);
        gpu.set_uniform_block(&uniforms);
        program.bind_textures(gpu, &with_shadow(textures, light));
        gpu.draw_mesh(mesh.id());
    }
}

fn with_shadow(textures: [TextureId; 4], light: &Light) -> [TextureId; 5] {
    let shadow = light
        .region
        .filter(|region| region.technique != ShadowTechnique::None)
        .map_or(TextureId::NONE, |region| region.texture);
    let [albedo, normal, effects, depth] = textures;
    [albedo, normal, effects, depth, shadow]
}

fn light_uniforms(light: &Light, view: &ViewInputs, screen: [f32; 4]) -> LightUniforms {
    let kind = match light.kind() {
        LightKind::Directional { .. } => 0.0,
        LightKind::Point { .. } => 1.0,
        LightKind::Spot { .. } => 2.0,
    };
    let (cos_inner, cos_outer) = match *light.kind() {
        LightKind::Spot {
            inner_angle,
            outer_angle,
            ..
        } => (inner_angle.cos(), outer_angle.cos()),
        _ => (1.0, 1.0),
    };
    let world = light.position().unwrap_or_default();
    let radius = if light.radius().is_finite() {
        light.radius()
    } else {
        0.0
    };
    let position = view.view.transform_point3(world);
    let direction = light
        .direction()
        .map(|d| view.view.transform_vector3(d).normalize_or_zero())
        .unwrap_or_default();
    let (shadow, uv_rect) = match light.region {
        Some(region) if light.casts_shadow && region.technique != ShadowTechnique::None => {
            let technique = match region.technique {
                ShadowTechnique::None => 0.0,
                ShadowTechnique::Basic => 1.0,
                ShadowTechnique::Variance => 2.0,
            };
            let radial = if light.position().is_some() { 1.0 } else { 0.0 };
            (
                [technique, region.layer as f32, region.bias, radial],
                region.uv.to_array(),
            )
        }
        _ => ([0.0; 4], [0.0, 0.0, 1.0, 1.0]),
    };
    LightUniforms {
        mvp: Mat4::IDENTITY.to_cols_array_2d(),
        inverse_projection: view.projection.inverse().to_cols_array_2d(),
        view_to_world: view.inverse_view().to_cols_array_2d(),
        light_view_projection: light.view_projection().to_cols_array_2d(),
        position: position.extend(radius).to_array(),
        direction: direction.extend(kind).to_array(),
        world_position: world.extend(light.far_plane()).to_array(),
        color: light.color.extend(1.0).to_array(),
        shadow,
        uv_rect,
        cone: [cos_inner, cos_outer, 0.0, 0.0],
        screen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_gpu::{CallLog, DeviceCall, HeadlessDevice};
    use umbra_scene::{Camera, ShadowRegion, attenuation, spot_factor};

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    fn view_inputs() -> ViewInputs {
        let camera = Camera::look_at(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO);
        ViewInputs {
            view: camera.view(),
            projection: camera.projection(1.0),
        }
    }

    #[test]
    fn test_shaders_validate() {
        for (name, source) in [
            ("ambient", AMBIENT_SHADER_SOURCE),
            ("light-directional", DIRECTIONAL_SHADER_SOURCE),
            ("light-point", POINT_SHADER_SOURCE),
            ("light-point-array", POINT_ARRAY_SHADER_SOURCE),
            ("light-spot", SPOT_SHADER_SOURCE),
        ] {
            umbra_gpu::validate_wgsl(name, source).unwrap();
        }
    }

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(size_of::<LightUniforms>(), 384);
        assert_eq!(size_of::<AmbientParams>(), 304);
    }

    #[test]
    fn test_constant_irradiance_ignores_normal() {
        let mut coefficients = [Vec3::ZERO; 9];
        coefficients[0] = Vec3::splat(2.0);
        let up = sh_irradiance(&coefficients, Vec3::Y);
        let side = sh_irradiance(&coefficients, Vec3::X);
        assert!((up - side).length() < 1e-6);
        assert!((up.x - 2.0 * SH_C4).abs() < 1e-6);
    }

    #[test]
    fn test_linear_band_follows_normal() {
        let mut coefficients = [Vec3::ZERO; 9];
        coefficients[1] = Vec3::ONE;
        let up = sh_irradiance(&coefficients, Vec3::Y);
        let down = sh_irradiance(&coefficients, Vec3::NEG_Y);
        assert!(up.x > 0.0);
        assert!((up.x + down.x).abs() < 1e-6);
    }

    #[test]
    fn test_env_brdf_smooth_normal_incidence() {
        let ab = env_brdf(0.0, 1.0);
        assert!((ab.x + ab.y - 1.0).abs() < 0.05, "{ab:?}");
        let rough = env_brdf(1.0, 1.0);
        assert!(rough.x < ab.x);
    }

    #[test]
    fn test_chebyshev_visibility() {
        let moments = Vec2::new(0.5, 0.25);
        assert_eq!(chebyshev_visibility(moments, 0.4), 1.0);
        assert_eq!(chebyshev_visibility(moments, 0.9), 0.0);
        let wide = Vec2::new(0.5, 0.25 + 0.01);
        let near = chebyshev_visibility(wide, 0.52);
        let far = chebyshev_visibility(wide, 0.6);
        assert!(near > far);
        assert!(near <= 1.0 && far >= 0.0);
    }

    #[test]
    fn test_light_helpers_agree_with_scene() {
        assert_eq!(attenuation(0.0, 2.0), 1.0);
        assert_eq!(attenuation(2.0, 2.0), 0.0);
        assert_eq!(spot_factor(1.0, 0.2, 0.4), 1.0);
    }

    #[test]
    fn test_light_uniforms_encode_shadow_region() {
        let mut light = Light::spot(Vec3::Y, Vec3::NEG_Y, Vec3::ONE, 5.0, 0.3, 0.5);
        let uniforms = light_uniforms(&light, &view_inputs(), [0.0; 4]);
        assert_eq!(uniforms.shadow, [0.0; 4]);
        assert_eq!(uniforms.direction[3], 2.0);

        light.region = Some(ShadowRegion::full(
            TextureId::NONE,
            ShadowTechnique::Variance,
            3,
            0.01,
        ));
        let uniforms = light_uniforms(&light, &view_inputs(), [0.0; 4]);
        assert_eq!(uniforms.shadow, [2.0, 3.0, 0.01, 1.0]);
        assert_eq!(uniforms.cone[0], 0.3f32.cos());
    }

    #[test]
    fn test_draw_order_and_additive_state() {
        let (mut gpu, log) = context();
        let gbuffer = GBuffer::new(&mut gpu, 32, 32).unwrap();
        let lighting = Lighting::new(&mut gpu, 32, 32).unwrap();
        let mut scene = Scene::new();
        scene.add_light(Light::spot(Vec3::Y, Vec3::NEG_Y, Vec3::ONE, 5.0, 0.3, 0.5));
        scene.add_light(Light::point(Vec3::Y, Vec3::ONE, 3.0));
        scene.add_light(Light::directional(Vec3::NEG_Y, Vec3::ONE));
        scene.update_lights();

        let start = log.len();
        let draws = lighting.draw_lights(&mut gpu, &gbuffer, &scene, &view_inputs());
        assert_eq!(draws, 3);
        let calls = log.since(start);
        let programs: Vec<_> = calls.iter().filter_map(DeviceCall::draw_program).collect();
        assert_eq!(
            programs,
            vec!["light-directional", "light-point", "light-spot"]
        );
        let first_draw = calls.iter().position(DeviceCall::is_draw).unwrap();
        assert!(calls[..first_draw].contains(&DeviceCall::SetState(StateChange::Blend(true))));
        let point_draw = calls
            .iter()
            .position(|c| c.draw_program() == Some("light-point"))
            .unwrap();
        assert!(calls[..point_draw].contains(&DeviceCall::SetState(StateChange::CullFace(
            Faces::Front
        ))));
        assert!(!gpu.state().blend);
    }

    #[test]
    fn test_ambient_overwrites_hdr() {
        let (mut gpu, log) = context();
        let gbuffer = GBuffer::new(&mut gpu, 16, 16).unwrap();
        let lighting = Lighting::new(&mut gpu, 16, 16).unwrap();
        let start = log.len();
        lighting.draw_ambient(
            &mut gpu,
            &gbuffer,
            TextureId::NONE,
            &Background::default(),
            &view_inputs(),
        );
        let calls = log.since(start);
        let draws: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::DrawFullscreen { binding, program } => Some((binding.target, *program)),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![(lighting.target().id(), "ambient")]);
        assert!(!gpu.state().blend);
    }
}
