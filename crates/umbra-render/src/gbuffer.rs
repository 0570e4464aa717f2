//! Geometry pass: objects and background into the G-buffer.
//!
//! Attachments: albedo (`Rgba16F`), view-space normal (`Rgb16F`), effects
//! (`Rgb8`: roughness, metallic, occlusion) and a 32-bit depth. A zero normal
//! marks background pixels, which the lighting passes leave unlit.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use umbra_gpu::{
    DepthMode, Faces, GpuContext, Layout, Program, ProgramDescriptor, RenderTarget, SamplerSlot,
    StateChange, TargetDescriptor, TargetError, TestFunction, TextureId, TextureShape,
    TextureSpec, VertexInput,
};
use umbra_scene::{Background, BackgroundMode, Frustum, Object};

use crate::screen::ScreenPass;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ObjectParams {
    mvp: [[f32; 4]; 4],
    normal_matrix: [[f32; 4]; 4],
    /// rgb: albedo, w: 1 when the albedo texture is used.
    albedo: [f32; 4],
    /// x: roughness, y: metallic, z: occlusion, w: 1 for alpha-masked.
    material: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BackgroundParams {
    /// Inverse of the camera rotation times projection.
    inverse_view_projection: [[f32; 4]; 4],
    /// rgb: color, w: 0 color, 1 image, 2 skybox.
    color: [f32; 4],
}

/// WGSL material program.
pub const OBJECT_SHADER_SOURCE: &str = r#"
struct ObjectParams {
    mvp: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    albedo: vec4<f32>,
    material: vec4<f32>,
};

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

struct GbufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) effects: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: ObjectParams;
@group(1) @binding(0) var albedo_texture: texture_2d<f32>;
@group(1) @binding(1) var albedo_sampler: sampler;

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.position = params.mvp * vec4<f32>(in.position, 1.0);
    out.normal = (params.normal_matrix * vec4<f32>(in.normal, 0.0)).xyz;
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput, @builtin(front_facing) front: bool) -> GbufferOutput {
    let texel = textureSample(albedo_texture, albedo_sampler, in.uv);
    if (params.material.w > 0.5 && texel.a < 0.5) {
        discard;
    }
    var albedo = params.albedo.rgb;
    if (params.albedo.w > 0.5) {
        albedo = albedo * texel.rgb;
    }
    var normal = normalize(in.normal);
    if (!front) {
        normal = -normal;
    }
    var out: GbufferOutput;
    out.albedo = vec4<f32>(albedo, 1.0);
    out.normal = vec4<f32>(normal, 0.0);
    out.effects = vec4<f32>(params.material.xyz, 0.0);
    return out;
}
"#;

/// WGSL background, drawn at the far plane.
pub const BACKGROUND_SHADER_SOURCE: &str = r#"
struct BackgroundParams {
    inverse_view_projection: mat4x4<f32>,
    color: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) ndc: vec2<f32>,
};

struct GbufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) effects: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: BackgroundParams;
@group(1) @binding(0) var image: texture_2d<f32>;
@group(1) @binding(1) var image_sampler: sampler;
@group(1) @binding(2) var skybox: texture_cube<f32>;
@group(1) @binding(3) var skybox_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) idx: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    var out: VertexOutput;
    out.ndc = uv * 2.0 - 1.0;
    out.position = vec4<f32>(out.ndc, 1.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> GbufferOutput {
    var color = params.color.rgb;
    let mode = params.color.w;
    if (mode > 1.5) {
        let world = params.inverse_view_projection * vec4<f32>(in.ndc, 1.0, 1.0);
        color = textureSampleLevel(skybox, skybox_sampler, normalize(world.xyz / world.w), 0.0).rgb;
    } else if (mode > 0.5) {
        color = textureSampleLevel(image, image_sampler, in.uv, 0.0).rgb;
    }
    var out: GbufferOutput;
    out.albedo = vec4<f32>(color, 1.0);
    out.normal = vec4<f32>(0.0);
    out.effects = vec4<f32>(0.0);
    return out;
}
"#;

/// The G-buffer target and the programs that fill it.
#[derive(Debug)]
pub struct GBuffer {
    target: RenderTarget,
    objects: Program,
    background: ScreenPass,
}

/// Color attachment indices.
pub const ALBEDO: usize = 0;
pub const NORMAL: usize = 1;
pub const EFFECTS: usize = 2;

impl GBuffer {
    pub fn new(gpu: &mut GpuContext, width: u32, height: u32) -> Result<Self, TargetError> {
        let target = RenderTarget::new(
            gpu,
            &TargetDescriptor::d2(
                "gbuffer",
                width,
                height,
                vec![
                    TextureSpec::nearest(Layout::Rgba16F),
                    TextureSpec::nearest(Layout::Rgb16F),
                    TextureSpec::nearest(Layout::Rgb8),
                ],
            )
            .with_depth(DepthMode::Combined),
        )?;
        let objects = Program::new(
            gpu,
            ProgramDescriptor {
                name: "gbuffer-object",
                source: OBJECT_SHADER_SOURCE,
                vertex: VertexInput::Mesh,
                samplers: vec![SamplerSlot::color(TextureShape::D2)],
                uniform_size: size_of::<ObjectParams>() as u64,
            },
        );
        let background = ScreenPass::with_uniforms::<BackgroundParams>(
            gpu,
            "gbuffer-background",
            BACKGROUND_SHADER_SOURCE,
            vec![
                SamplerSlot::color(TextureShape::D2),
                SamplerSlot::color(TextureShape::Cube),
            ],
        );
        Ok(Self {
            target,
            objects,
            background,
        })
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn texture(&self, attachment: usize) -> TextureId {
        self.target.texture(attachment)
    }

    pub fn depth_texture(&self) -> TextureId {
        self.target.depth_texture()
    }

    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), TargetError> {
        self.target.resize(gpu, width, height)
    }

    /// Clear depth, draw every object in view, then fill the rest with the
    /// background. Returns the number of objects drawn.
    #[track_caller]
    pub fn draw(
        &self,
        gpu: &mut GpuContext,
        objects: &[Object],
        background: &Background,
        view: &Mat4,
        projection: &Mat4,
    ) -> usize {
        self.target.bind(gpu);
        self.target.set_viewport(gpu);
        gpu.clear(None, Some(1.0));

        gpu.set(StateChange::Blend(false));
        gpu.set(StateChange::DepthTest(true));
        gpu.set(StateChange::DepthWrite(true));
        gpu.set(StateChange::DepthFunction(TestFunction::Less));
        gpu.set(StateChange::CullFace(Faces::Back));

        let view_projection = *projection * *view;
        let frustum = Frustum::from_view_projection(&view_projection);
        self.objects.bind(gpu);
        let mut drawn = 0;
        for object in objects {
            if !frustum.intersects(&object.world_bounds()) {
                continue;
            }
            let texture = object.textures.first().copied().unwrap_or(TextureId::NONE);
            let material = &object.material;
            let params = ObjectParams {
                mvp: (view_projection * object.model).to_cols_array_2d(),
                normal_matrix: (*view * object.model)
                    .inverse()
                    .transpose()
                    .to_cols_array_2d(),
                albedo: material
                    .albedo
                    .extend(if texture.is_valid() { 1.0 } else { 0.0 })
                    .to_array(),
                material: [
                    material.roughness,
                    material.metallic,
                    material.occlusion,
                    if object.masked { 1.0 } else { 0.0 },
                ],
            };
            gpu.set(StateChange::Cull(!object.two_sided));
            gpu.set_uniform_block(&params);
            self.objects.bind_textures(gpu, &[texture]);
            gpu.draw_mesh(object.mesh);
            drawn += 1;
        }

        // Only pixels still at the far plane take the background.
        gpu.set(StateChange::Cull(false));
        gpu.set(StateChange::DepthWrite(false));
        gpu.set(StateChange::DepthFunction(TestFunction::LessEqual));
        let rotation = Mat4::from_mat3(glam::Mat3::from_mat4(*view));
        let (color, mode, image, skybox) = match background.mode {
            BackgroundMode::Color(color) => (color, 0.0, TextureId::NONE, TextureId::NONE),
            BackgroundMode::Image(texture) => (glam::Vec3::ONE, 1.0, texture, TextureId::NONE),
            BackgroundMode::Skybox(texture) => (glam::Vec3::ONE, 2.0, TextureId::NONE, texture),
        };
        self.background.draw_with(
            gpu,
            &[image, skybox],
            &BackgroundParams {
                inverse_view_projection: (*projection * rotation).inverse().to_cols_array_2d(),
                color: Vec4::from((color, mode)).to_array(),
            },
        );
        gpu.set(StateChange::DepthWrite(true));
        gpu.set(StateChange::DepthFunction(TestFunction::Less));
        gpu.set(StateChange::DepthTest(false));
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use umbra_gpu::{CallLog, DeviceCall, HeadlessDevice, MeshId};
    use umbra_scene::{Camera, geometry};

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    fn cube_mesh(gpu: &mut GpuContext) -> MeshId {
        gpu.create_mesh(&geometry::cube()).unwrap()
    }

    fn unit_object(mesh: MeshId, position: Vec3) -> Object {
        Object::from_mesh(mesh, &geometry::cube()).with_model(Mat4::from_translation(position))
    }

    #[test]
    fn test_shaders_validate() {
        umbra_gpu::validate_wgsl("gbuffer-object", OBJECT_SHADER_SOURCE).unwrap();
        umbra_gpu::validate_wgsl("gbuffer-background", BACKGROUND_SHADER_SOURCE).unwrap();
    }

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(size_of::<ObjectParams>(), 160);
        assert_eq!(size_of::<BackgroundParams>(), 80);
    }

    #[test]
    fn test_clears_depth_only_and_culls_off_screen_objects() {
        let (mut gpu, log) = context();
        let gbuffer = GBuffer::new(&mut gpu, 64, 64).unwrap();
        let mesh = cube_mesh(&mut gpu);
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let objects = vec![
            unit_object(mesh, Vec3::ZERO),
            unit_object(mesh, Vec3::new(0.0, 0.0, 50.0)),
        ];
        let start = log.len();
        let drawn = gbuffer.draw(
            &mut gpu,
            &objects,
            &Background::default(),
            &camera.view(),
            &camera.projection(1.0),
        );
        assert_eq!(drawn, 1);
        let calls = log.since(start);
        assert!(calls.iter().any(|c| matches!(
            c,
            DeviceCall::Clear {
                color: None,
                depth: Some(_),
                ..
            }
        )));
        let draws: Vec<_> = calls.iter().filter_map(DeviceCall::draw_program).collect();
        assert_eq!(draws, vec!["gbuffer-object", "gbuffer-background"]);
    }

    #[test]
    fn test_background_relaxes_depth_test() {
        let (mut gpu, log) = context();
        let gbuffer = GBuffer::new(&mut gpu, 32, 32).unwrap();
        let camera = Camera::default();
        gbuffer.draw(
            &mut gpu,
            &[],
            &Background::default(),
            &camera.view(),
            &camera.projection(1.0),
        );
        let calls = log.calls();
        let background = calls
            .iter()
            .position(|c| c.draw_program() == Some("gbuffer-background"))
            .unwrap();
        let before = &calls[..background];
        assert!(before.contains(&DeviceCall::SetState(StateChange::DepthWrite(false))));
        assert!(before.contains(&DeviceCall::SetState(StateChange::DepthFunction(
            TestFunction::LessEqual
        ))));
    }

    #[test]
    fn test_two_sided_objects_disable_culling() {
        let (mut gpu, log) = context();
        let gbuffer = GBuffer::new(&mut gpu, 32, 32).unwrap();
        let mesh = cube_mesh(&mut gpu);
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let objects = vec![
            unit_object(mesh, Vec3::ZERO),
            unit_object(mesh, Vec3::X).two_sided(),
        ];
        gbuffer.draw(
            &mut gpu,
            &objects,
            &Background::default(),
            &camera.view(),
            &camera.projection(1.0),
        );
        let culls: Vec<bool> = log
            .calls()
            .iter()
            .filter_map(|c| match c {
                DeviceCall::SetState(StateChange::Cull(on)) => Some(*on),
                _ => None,
            })
            .collect();
        assert_eq!(culls, vec![true, false]);
    }
}
