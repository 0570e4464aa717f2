//! Render pipelines keyed by program plus the raster state of a draw.

use crate::device::{Vertex, VertexInput};
use crate::handle::ProgramId;
use crate::state::DeviceState;
use crate::types::{BlendFunction, Faces, TestFunction};

use super::resources::GpuProgram;

/// Everything a pipeline bakes in. Two draws with equal keys share a pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub program: ProgramId,
    pub colors: Vec<wgpu::TextureFormat>,
    pub depth: Option<wgpu::TextureFormat>,
    pub blend: Option<BlendFunction>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_function: TestFunction,
    pub cull: Option<Faces>,
    /// Bit `i` set when sampler slot `i` is bound to a filterable texture.
    pub filterable: u16,
}

impl PipelineKey {
    pub fn new(
        program: ProgramId,
        state: &DeviceState,
        colors: Vec<wgpu::TextureFormat>,
        depth: Option<wgpu::TextureFormat>,
        filterable: u16,
    ) -> Self {
        Self {
            program,
            colors,
            depth,
            blend: state.blend.then_some(state.blend_function),
            depth_test: state.depth_test,
            depth_write: state.depth_write,
            depth_function: state.depth_function,
            cull: state.cull.then_some(state.cull_face),
            filterable,
        }
    }
}

pub(crate) fn create_pipeline(
    device: &wgpu::Device,
    program: &mut GpuProgram,
    key: &PipelineKey,
) -> wgpu::RenderPipeline {
    let layout = program.pipeline_layout(device, key.filterable);
    let buffers = match program.desc.vertex {
        VertexInput::FullScreen => Vec::new(),
        VertexInput::Mesh => vec![Vertex::buffer_layout()],
    };
    let cull_mode = match key.cull {
        Some(Faces::Front) => Some(wgpu::Face::Front),
        Some(Faces::Back) => Some(wgpu::Face::Back),
        // Culling both faces draws nothing; the device skips such draws.
        Some(Faces::FrontAndBack) | None => None,
    };
    let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
        format,
        depth_write_enabled: key.depth_test && key.depth_write,
        depth_compare: if key.depth_test {
            key.depth_function.wgpu_compare()
        } else {
            wgpu::CompareFunction::Always
        },
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });
    let blend = key.blend.map(BlendFunction::wgpu_blend);
    let targets: Vec<Option<wgpu::ColorTargetState>> = key
        .colors
        .iter()
        .map(|format| {
            Some(wgpu::ColorTargetState {
                format: *format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(program.desc.name),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &program.module,
            entry_point: Some("vs_main"),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &program.module,
            entry_point: Some("fs_main"),
            targets: &targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateChange;

    #[test]
    fn test_key_ignores_disabled_blend_function() {
        let mut a = DeviceState::default();
        let mut b = DeviceState::default();
        a.apply(StateChange::BlendFunction(BlendFunction::ALPHA));
        b.apply(StateChange::BlendFunction(BlendFunction::ADDITIVE));
        let formats = vec![wgpu::TextureFormat::Rgba16Float];
        assert_eq!(
            PipelineKey::new(ProgramId(1), &a, formats.clone(), None, 0),
            PipelineKey::new(ProgramId(1), &b, formats, None, 0)
        );
    }

    #[test]
    fn test_key_tracks_cull_face_only_when_culling() {
        let mut state = DeviceState::default();
        state.apply(StateChange::CullFace(Faces::Front));
        let key = PipelineKey::new(ProgramId(1), &state, Vec::new(), None, 0);
        assert_eq!(key.cull, None);
        state.apply(StateChange::Cull(true));
        let key = PipelineKey::new(ProgramId(1), &state, Vec::new(), None, 0);
        assert_eq!(key.cull, Some(Faces::Front));
    }
}
