//! The depth-moment caster program shared by every shadow map variant.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use umbra_gpu::{
    BindMode, Faces, GpuContext, Program, ProgramDescriptor, RenderTarget, SamplerSlot,
    StateChange, TestFunction, TextureId, TextureShape, VertexInput,
};
use umbra_scene::{Frustum, Light, Object};

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct CasterParams {
    mvp: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
    /// xyz: light position, w: far plane.
    light: [f32; 4],
    /// x: 1 for radial distance, y: 1 for alpha-masked.
    mode: [f32; 4],
}

/// How a caster turns a fragment into the stored depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthEncoding {
    /// Window-space depth of an orthographic projection.
    Orthographic,
    /// Distance to the light divided by its far plane.
    Radial,
}

impl DepthEncoding {
    pub fn for_light(light: &Light) -> Self {
        if light.position().is_some() {
            DepthEncoding::Radial
        } else {
            DepthEncoding::Orthographic
        }
    }
}

/// WGSL caster writing `(d, d², 0, 1)`.
pub const CASTER_SHADER_SOURCE: &str = r#"
struct CasterParams {
    mvp: mat4x4<f32>,
    model: mat4x4<f32>,
    light: vec4<f32>,
    mode: vec4<f32>,
};

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: CasterParams;
@group(1) @binding(0) var mask_texture: texture_2d<f32>;
@group(1) @binding(1) var mask_sampler: sampler;

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.position = params.mvp * vec4<f32>(in.position, 1.0);
    out.world = (params.model * vec4<f32>(in.position, 1.0)).xyz;
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let mask = textureSample(mask_texture, mask_sampler, in.uv).a;
    if (params.mode.y > 0.5 && mask < 0.5) {
        discard;
    }
    var d = in.position.z;
    if (params.mode.x > 0.5) {
        d = length(in.world - params.light.xyz) / params.light.w;
    }
    return vec4<f32>(d, d * d, 0.0, 1.0);
}
"#;

/// Caster program plus the per-layer pass every variant runs.
#[derive(Debug)]
pub struct ShadowCaster {
    program: Program,
}

impl ShadowCaster {
    pub fn new(gpu: &mut GpuContext) -> Self {
        let program = Program::new(
            gpu,
            ProgramDescriptor {
                name: "shadow-caster",
                source: CASTER_SHADER_SOURCE,
                vertex: VertexInput::Mesh,
                samplers: vec![SamplerSlot::color(TextureShape::D2)],
                uniform_size: size_of::<CasterParams>() as u64,
            },
        );
        Self { program }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Render one layer: bind it, clear to the far value, then draw every
    /// shadow-casting object inside `view_projection`. Returns the draw count.
    #[track_caller]
    pub(crate) fn cast_layer(
        &self,
        gpu: &mut GpuContext,
        target: &RenderTarget,
        layer: u32,
        view_projection: &Mat4,
        light: &Light,
        objects: &[Object],
        culled: Faces,
    ) -> usize {
        gpu.mark("shadow-pass");
        target.bind_layer(gpu, layer, 0, BindMode::Write);
        target.set_viewport(gpu);
        gpu.clear(Some([1.0; 4]), Some(1.0));

        gpu.set(StateChange::Blend(false));
        gpu.set(StateChange::DepthTest(true));
        gpu.set(StateChange::DepthWrite(true));
        gpu.set(StateChange::DepthFunction(TestFunction::Less));
        gpu.set(StateChange::CullFace(culled));
        self.program.bind(gpu);

        let encoding = DepthEncoding::for_light(light);
        let light_data = Vec4::from((light.position().unwrap_or_default(), light.far_plane()));
        let frustum = Frustum::from_view_projection(view_projection);
        let mut drawn = 0;
        for object in objects.iter().filter(|o| o.casts_shadow) {
            if !frustum.intersects(&object.world_bounds()) {
                continue;
            }
            gpu.set(StateChange::Cull(!object.two_sided));
            let mask = if object.masked {
                object.mask_texture()
            } else {
                TextureId::NONE
            };
            gpu.set_uniform_block(&CasterParams {
                mvp: (*view_projection * object.model).to_cols_array_2d(),
                model: object.model.to_cols_array_2d(),
                light: light_data.to_array(),
                mode: [
                    if encoding == DepthEncoding::Radial { 1.0 } else { 0.0 },
                    if object.masked { 1.0 } else { 0.0 },
                    0.0,
                    0.0,
                ],
            });
            self.program.bind_textures(gpu, &[mask]);
            gpu.draw_mesh(object.mesh);
            drawn += 1;
        }
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_caster_shader_validates() {
        umbra_gpu::validate_wgsl("shadow-caster", CASTER_SHADER_SOURCE).unwrap();
    }

    #[test]
    fn test_caster_params_size() {
        assert_eq!(size_of::<CasterParams>(), 160);
    }

    #[test]
    fn test_encoding_follows_light_kind() {
        let sun = Light::directional(Vec3::NEG_Y, Vec3::ONE);
        let lamp = Light::point(Vec3::ZERO, Vec3::ONE, 4.0);
        assert_eq!(DepthEncoding::for_light(&sun), DepthEncoding::Orthographic);
        assert_eq!(DepthEncoding::for_light(&lamp), DepthEncoding::Radial);
    }
}
