//! Full-screen passes: one program, an ordered list of input textures, and a
//! uniform block, drawn as a single triangle covering the bound target.

use bytemuck::Pod;
use umbra_gpu::{
    GpuContext, Program, ProgramDescriptor, SamplerSlot, StateChange, TextureId, VertexInput,
};

/// Prepend the shared full-screen vertex stage to a fragment module.
///
/// The stage emits `ScreenOutput { position, uv }` with `uv` in `[0, 1]`,
/// origin at the top-left to match texture addressing.
macro_rules! fullscreen_wgsl {
    ($fragment:literal) => {
        concat!(
            r#"
struct ScreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) idx: u32) -> ScreenOutput {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    var out: ScreenOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}
"#,
            $fragment
        )
    };
}

pub(crate) use fullscreen_wgsl;

/// WGSL copy of a 2D texture, sampled with the texture's own filter.
pub const COPY_SHADER_SOURCE: &str = fullscreen_wgsl!(
    r#"
@group(1) @binding(0) var source: texture_2d<f32>;
@group(1) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: ScreenOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(source, source_sampler, in.uv, 0.0);
}
"#
);

/// A program drawn over the whole bound target.
#[derive(Debug)]
pub struct ScreenPass {
    program: Program,
}

impl ScreenPass {
    /// A pass without uniforms.
    pub fn new(
        gpu: &mut GpuContext,
        name: &'static str,
        source: &'static str,
        samplers: Vec<SamplerSlot>,
    ) -> Self {
        Self::with_uniform_size(gpu, name, source, samplers, 0)
    }

    /// A pass whose uniform block is a `T`.
    pub fn with_uniforms<T: Pod>(
        gpu: &mut GpuContext,
        name: &'static str,
        source: &'static str,
        samplers: Vec<SamplerSlot>,
    ) -> Self {
        Self::with_uniform_size(gpu, name, source, samplers, size_of::<T>() as u64)
    }

    fn with_uniform_size(
        gpu: &mut GpuContext,
        name: &'static str,
        source: &'static str,
        samplers: Vec<SamplerSlot>,
        uniform_size: u64,
    ) -> Self {
        let program = Program::new(
            gpu,
            ProgramDescriptor {
                name,
                source,
                vertex: VertexInput::FullScreen,
                samplers,
                uniform_size,
            },
        );
        Self { program }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn name(&self) -> &'static str {
        self.program.name()
    }

    pub fn is_valid(&self) -> bool {
        self.program.is_valid()
    }

    /// Draw with `textures` bound to the declared slots in order.
    #[track_caller]
    pub fn draw(&self, gpu: &mut GpuContext, textures: &[TextureId]) {
        self.program.bind(gpu);
        self.program.bind_textures(gpu, textures);
        gpu.draw_fullscreen();
    }

    /// Draw with a uniform block. Uniforms are set after the program is bound.
    #[track_caller]
    pub fn draw_with<T: Pod>(&self, gpu: &mut GpuContext, textures: &[TextureId], uniforms: &T) {
        self.program.bind(gpu);
        gpu.set_uniform_block(uniforms);
        self.program.bind_textures(gpu, textures);
        gpu.draw_fullscreen();
    }
}

/// Raster state for passes that overwrite their target: no blending, no
/// depth test, no culling.
#[track_caller]
pub fn overwrite_state(gpu: &mut GpuContext) {
    gpu.set(StateChange::Blend(false));
    gpu.set(StateChange::DepthTest(false));
    gpu.set(StateChange::Cull(false));
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_gpu::{CallLog, DeviceCall, HeadlessDevice, TextureShape};

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Tint {
        color: [f32; 4],
    }

    #[test]
    fn test_copy_shader_validates() {
        umbra_gpu::validate_wgsl("copy", COPY_SHADER_SOURCE).unwrap();
    }

    #[test]
    fn test_uniforms_follow_program_binding() {
        let (mut gpu, log) = context();
        let pass = ScreenPass::with_uniforms::<Tint>(
            &mut gpu,
            "tint",
            COPY_SHADER_SOURCE,
            vec![SamplerSlot::color(TextureShape::D2)],
        );
        let start = log.len();
        pass.draw_with(
            &mut gpu,
            &[],
            &Tint {
                color: [1.0, 0.0, 0.0, 1.0],
            },
        );
        let calls = log.since(start);
        let program = calls
            .iter()
            .position(|c| matches!(c, DeviceCall::UseProgram(_)))
            .unwrap();
        let uniforms = calls
            .iter()
            .position(|c| matches!(c, DeviceCall::SetUniforms(_)))
            .unwrap();
        assert!(program < uniforms);
        assert_eq!(log.draws_with("tint"), 1);
    }

    #[test]
    fn test_invalid_program_skips_draw() {
        let device = HeadlessDevice::new().failing_program("broken");
        let log = device.log();
        let mut gpu = GpuContext::new(Box::new(device), true);
        let pass = ScreenPass::new(&mut gpu, "broken", COPY_SHADER_SOURCE, Vec::new());
        assert!(!pass.is_valid());
        pass.draw(&mut gpu, &[]);
        assert_eq!(log.draws(), 0);
    }

    #[test]
    fn test_overwrite_state_is_filtered() {
        let (mut gpu, log) = context();
        overwrite_state(&mut gpu);
        let after_first = log.len();
        overwrite_state(&mut gpu);
        assert_eq!(log.len(), after_first);
    }
}
