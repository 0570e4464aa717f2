//! [`GraphicsDevice`] implementation on top of wgpu.
//!
//! Calls are recorded as they arrive: each clear or draw resolves its
//! attachments, pipeline and texture bindings immediately and is appended to a
//! command list. [`flush`](GraphicsDevice::flush) uploads the frame's uniform
//! arena and replays the list into render passes, one pass per run of commands
//! aimed at the same target layer.

mod pipeline;
mod readback;
mod resources;

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::device::{
    DeviceError, GraphicsDevice, MeshData, ProgramDescriptor, TargetStatus, TextureDescriptor,
    VertexInput,
};
use crate::handle::{HandleAllocator, MeshId, ProgramId, TargetId, TextureId};
use crate::state::{DeviceState, StateChange, TargetBinding};
use crate::types::{BindMode, DepthMode, Faces, Filter, TextureShape, Wrap};

use pipeline::{PipelineKey, create_pipeline};
pub use resources::validate_wgsl;
use resources::{GpuMesh, GpuProgram, GpuTexture, create_sampler, pad_rgb, upload_texel_size};

/// Errors raised while acquiring a GPU.
#[derive(Debug, thiserror::Error)]
pub enum WgpuInitError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

struct TargetRecord {
    colors: Vec<TextureId>,
    depth: Option<TextureId>,
    depth_mode: DepthMode,
}

/// Resolved attachments of one target binding.
#[derive(Clone)]
struct Attachments {
    binding: TargetBinding,
    colors: Vec<wgpu::TextureView>,
    color_formats: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureView>,
    size: (u32, u32),
}

enum Geometry {
    FullScreen,
    Mesh {
        vertices: wgpu::Buffer,
        indices: wgpu::Buffer,
        count: u32,
    },
}

struct DrawCommand {
    attachments: Attachments,
    pipeline: wgpu::RenderPipeline,
    program: ProgramId,
    uniform_offset: Option<u32>,
    textures: wgpu::BindGroup,
    viewport: (f32, f32, f32, f32),
    geometry: Geometry,
}

enum Command {
    Clear {
        attachments: Attachments,
        color: Option<[f32; 4]>,
        depth: Option<f32>,
    },
    Draw(Box<DrawCommand>),
    Marker(&'static str),
}

/// wgpu-backed device.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    float32_filterable: bool,
    uniform_alignment: u32,
    textures: FxHashMap<TextureId, GpuTexture>,
    targets: FxHashMap<TargetId, TargetRecord>,
    programs: FxHashMap<ProgramId, GpuProgram>,
    meshes: FxHashMap<MeshId, GpuMesh>,
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: FxHashMap<(Filter, Wrap), wgpu::Sampler>,
    placeholders: FxHashMap<(TextureShape, bool), wgpu::TextureView>,
    texture_ids: HandleAllocator,
    target_ids: HandleAllocator,
    program_ids: HandleAllocator,
    mesh_ids: HandleAllocator,
    state: DeviceState,
    uniform_arena: Vec<u8>,
    uniform_offsets: FxHashMap<ProgramId, u32>,
    commands: Vec<Command>,
    errors: VecDeque<DeviceError>,
}

impl WgpuDevice {
    /// Wrap an existing device and queue.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let float32_filterable = device.features().contains(wgpu::Features::FLOAT32_FILTERABLE);
        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment.max(16);
        Self {
            device,
            queue,
            float32_filterable,
            uniform_alignment,
            textures: FxHashMap::default(),
            targets: FxHashMap::default(),
            programs: FxHashMap::default(),
            meshes: FxHashMap::default(),
            pipelines: FxHashMap::default(),
            samplers: FxHashMap::default(),
            placeholders: FxHashMap::default(),
            texture_ids: HandleAllocator::new(),
            target_ids: HandleAllocator::new(),
            program_ids: HandleAllocator::new(),
            mesh_ids: HandleAllocator::new(),
            state: DeviceState::default(),
            uniform_arena: Vec::new(),
            uniform_offsets: FxHashMap::default(),
            commands: Vec::new(),
            errors: VecDeque::new(),
        }
    }

    /// Acquire an adapter without a surface and create a device on it.
    ///
    /// 32-bit float filtering is requested when the adapter offers it;
    /// without it `Rg32F` shadow maps are sampled with nearest filtering.
    pub fn request_headless() -> Result<Self, WgpuInitError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|_| WgpuInitError::NoAdapter)?;

            let info = adapter.get_info();
            log::info!(
                "Selected GPU: {} ({:?}, {:?})",
                info.name,
                info.backend,
                info.device_type
            );

            let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("umbra-device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                    experimental_features: wgpu::ExperimentalFeatures::default(),
                    trace: wgpu::Trace::Off,
                })
                .await?;
            Ok(Self::new(device, queue))
        })
    }

    pub fn float32_filterable(&self) -> bool {
        self.float32_filterable
    }

    fn raise(&mut self, error: DeviceError) {
        log::trace!("wgpu device error: {error}");
        self.errors.push_back(error);
    }

    fn sampler(&mut self, filter: Filter, wrap: Wrap) -> wgpu::Sampler {
        let device = &self.device;
        self.samplers
            .entry((filter, wrap))
            .or_insert_with(|| create_sampler(device, filter, wrap))
            .clone()
    }

    fn placeholder(&mut self, shape: TextureShape, depth: bool) -> wgpu::TextureView {
        let device = &self.device;
        self.placeholders
            .entry((shape, depth))
            .or_insert_with(|| {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("umbra-placeholder"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: shape.layer_count(6),
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: if depth {
                        wgpu::TextureFormat::Depth32Float
                    } else {
                        wgpu::TextureFormat::Rgba8Unorm
                    },
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                });
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("umbra-placeholder-view"),
                    dimension: Some(shape.view_dimension()),
                    ..Default::default()
                })
            })
            .clone()
    }

    /// Views for the currently bound write target, or `None` for the default target.
    fn resolve_attachments(&mut self) -> Option<Attachments> {
        let binding = self.state.write_target;
        let record = self.targets.get(&binding.target)?;
        let srgb = binding.mode == BindMode::SrgbWrite;
        let mut colors = Vec::with_capacity(record.colors.len());
        let mut color_formats = Vec::with_capacity(record.colors.len());
        let mut size = None;
        for id in &record.colors {
            let texture = self.textures.get_mut(id)?;
            if binding.layer >= texture.layers() || binding.mip >= texture.desc.mips {
                return None;
            }
            size.get_or_insert(texture.mip_size(binding.mip));
            colors.push(texture.attachment_view(binding.layer, binding.mip, srgb));
            color_formats.push(texture.attachment_format(srgb));
        }
        let depth = match (record.depth, record.depth_mode) {
            (Some(id), DepthMode::PerSlice) => {
                let texture = self.textures.get_mut(&id)?;
                size.get_or_insert(texture.mip_size(0));
                Some(texture.attachment_view(binding.layer.min(texture.layers() - 1), 0, false))
            }
            // A shared depth image only matches mip 0 of the colors.
            (Some(id), DepthMode::Combined) if binding.mip == 0 => {
                let texture = self.textures.get_mut(&id)?;
                size.get_or_insert(texture.mip_size(0));
                Some(texture.attachment_view(0, 0, false))
            }
            _ => None,
        };
        Some(Attachments {
            binding,
            colors,
            color_formats,
            depth,
            size: size?,
        })
    }

    fn incomplete_binding(&mut self) {
        let binding = self.state.write_target;
        if binding.target.is_valid() {
            self.raise(DeviceError::IncompleteTarget {
                target: binding.target.raw(),
                reason: format!("layer {} mip {} cannot be attached", binding.layer, binding.mip),
            });
        }
    }

    fn program_name(&self, program: ProgramId) -> &'static str {
        self.programs.get(&program).map_or("", |p| p.desc.name)
    }

    fn record_draw(&mut self, mesh: Option<MeshId>) {
        let program_id = self.state.program;
        let Some((vertex, slots)) = self
            .programs
            .get(&program_id)
            .map(|p| (p.desc.vertex, p.desc.samplers.clone()))
        else {
            self.raise(DeviceError::InvalidHandle {
                kind: "program",
                value: program_id.raw(),
            });
            return;
        };
        let expected = match mesh {
            Some(_) => VertexInput::Mesh,
            None => VertexInput::FullScreen,
        };
        if vertex != expected {
            let name = self.program_name(program_id);
            self.raise(DeviceError::DrawSkipped(format!(
                "program '{name}' expects {vertex:?} vertex input"
            )));
            return;
        }
        if self.state.cull && self.state.cull_face == Faces::FrontAndBack {
            return;
        }
        let geometry = match mesh {
            None => Geometry::FullScreen,
            Some(id) => match self.meshes.get(&id) {
                Some(gpu_mesh) => Geometry::Mesh {
                    vertices: gpu_mesh.vertices.clone(),
                    indices: gpu_mesh.indices.clone(),
                    count: gpu_mesh.index_count,
                },
                None => {
                    self.raise(DeviceError::InvalidHandle {
                        kind: "mesh",
                        value: id.raw(),
                    });
                    return;
                }
            },
        };
        let Some(attachments) = self.resolve_attachments() else {
            self.incomplete_binding();
            return;
        };

        // Texture bindings, one texture/sampler pair per declared slot.
        let float32_filterable = self.float32_filterable;
        let mut filterable = 0u16;
        let mut views = Vec::with_capacity(slots.len());
        for (index, slot) in slots.iter().enumerate() {
            let id = self.state.texture(index, slot.shape);
            let mismatch = self
                .textures
                .get(&id)
                .is_some_and(|t| t.desc.spec.layout.is_depth() != slot.depth);
            if mismatch {
                let name = self.program_name(program_id);
                self.raise(DeviceError::DrawSkipped(format!(
                    "program '{name}' slot {index}: depth/color mismatch for {id}"
                )));
                return;
            }
            let resolved = self.textures.get_mut(&id).and_then(|texture| {
                let filter_ok = texture.filterable(float32_filterable);
                let spec = texture.desc.spec;
                texture
                    .sample_view(slot.shape)
                    .map(|view| (view, filter_ok, spec.filter, spec.wrap))
            });
            let (view, filter_ok, filter, wrap) = match resolved {
                Some(found) => found,
                None => {
                    if id.is_valid() {
                        let name = self.program_name(program_id);
                        self.raise(DeviceError::DrawSkipped(format!(
                            "program '{name}' slot {index}: {id} cannot be sampled as {:?}",
                            slot.shape
                        )));
                        return;
                    }
                    let view = self.placeholder(slot.shape, slot.depth);
                    (view, !slot.depth, Filter::Nearest, Wrap::Clamp)
                }
            };
            if filter_ok {
                filterable |= 1 << index;
            }
            let filter = if filter_ok { filter } else { Filter::Nearest };
            views.push((view, self.sampler(filter, wrap)));
        }

        let key = PipelineKey::new(
            program_id,
            &self.state,
            attachments.color_formats.clone(),
            attachments.depth.as_ref().map(|_| wgpu::TextureFormat::Depth32Float),
            filterable,
        );
        let device = &self.device;
        let Some(program) = self.programs.get_mut(&program_id) else {
            return;
        };
        let pipeline = self
            .pipelines
            .entry(key)
            .or_insert_with_key(|key| create_pipeline(device, program, key))
            .clone();
        let texture_layout = program.texture_layout(device, filterable);
        let entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .flat_map(|(i, (view, sampler))| {
                [
                    wgpu::BindGroupEntry {
                        binding: 2 * i as u32,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2 * i as u32 + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ]
            })
            .collect();
        let textures = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("umbra-textures"),
            layout: &texture_layout,
            entries: &entries,
        });

        let uniform_offset = if program.uniform_size > 0 {
            let size = program.uniform_size;
            Some(match self.uniform_offsets.get(&program_id) {
                Some(offset) => *offset,
                None => self.push_uniforms(program_id, &vec![0; size as usize], size),
            })
        } else {
            None
        };

        let (width, height) = attachments.size;
        let vp = self.state.viewport;
        let viewport = if vp.width == 0 || vp.height == 0 {
            (0.0, 0.0, width as f32, height as f32)
        } else {
            let x = vp.x.min(width);
            let y = vp.y.min(height);
            (
                x as f32,
                y as f32,
                vp.width.min(width - x) as f32,
                vp.height.min(height - y) as f32,
            )
        };

        self.commands.push(Command::Draw(Box::new(DrawCommand {
            attachments,
            pipeline,
            program: program_id,
            uniform_offset,
            textures,
            viewport,
            geometry,
        })));
    }

    fn push_uniforms(&mut self, program: ProgramId, data: &[u8], size: u64) -> u32 {
        let align = self.uniform_alignment as usize;
        let offset = self.uniform_arena.len().div_ceil(align) * align;
        self.uniform_arena.resize(offset, 0);
        let size = size as usize;
        self.uniform_arena
            .extend_from_slice(&data[..data.len().min(size)]);
        self.uniform_arena.resize(offset + size, 0);
        self.uniform_offsets.insert(program, offset as u32);
        offset as u32
    }

    fn encode(&mut self) {
        if self.commands.is_empty() {
            return;
        }
        let commands = std::mem::take(&mut self.commands);

        // One uniform buffer per flush, bound per program at dynamic offsets.
        let uniform_buffer = if self.uniform_arena.is_empty() {
            None
        } else {
            use wgpu::util::DeviceExt;
            Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("umbra-uniform-arena"),
                contents: &self.uniform_arena,
                usage: wgpu::BufferUsages::UNIFORM,
            }))
        };
        let mut uniform_groups: FxHashMap<ProgramId, wgpu::BindGroup> = FxHashMap::default();
        for command in &commands {
            let Command::Draw(draw) = command else {
                continue;
            };
            if uniform_groups.contains_key(&draw.program) {
                continue;
            }
            let Some(program) = self.programs.get(&draw.program) else {
                continue;
            };
            let group = match (draw.uniform_offset, uniform_buffer.as_ref()) {
                (Some(_), Some(buffer)) => {
                    self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("umbra-uniforms"),
                        layout: &program.uniform_layout,
                        entries: &[wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer,
                                offset: 0,
                                size: std::num::NonZeroU64::new(program.uniform_size),
                            }),
                        }],
                    })
                }
                _ => self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("umbra-no-uniforms"),
                    layout: &program.uniform_layout,
                    entries: &[],
                }),
            };
            uniform_groups.insert(draw.program, group);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("umbra-frame-encoder"),
            });

        let mut index = 0;
        while index < commands.len() {
            let (attachments, color_load, depth_load) = match &commands[index] {
                Command::Marker(label) => {
                    encoder.insert_debug_marker(label);
                    index += 1;
                    continue;
                }
                Command::Clear {
                    attachments,
                    color,
                    depth,
                } => {
                    index += 1;
                    (attachments, *color, *depth)
                }
                Command::Draw(draw) => (&draw.attachments, None, None),
            };
            let start = index;
            while let Some(Command::Draw(draw)) = commands.get(index) {
                if draw.attachments.binding != attachments.binding {
                    break;
                }
                index += 1;
            }

            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = attachments
                .colors
                .iter()
                .map(|view| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: match color_load {
                                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                                    r: f64::from(r),
                                    g: f64::from(g),
                                    b: f64::from(b),
                                    a: f64::from(a),
                                }),
                                None => wgpu::LoadOp::Load,
                            },
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })
                })
                .collect();
            let depth_stencil_attachment =
                attachments
                    .depth
                    .as_ref()
                    .map(|view| wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: match depth_load {
                                Some(value) => wgpu::LoadOp::Clear(value),
                                None => wgpu::LoadOp::Load,
                            },
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    });

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("umbra-pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            for command in &commands[start..index] {
                let Command::Draw(draw) = command else {
                    continue;
                };
                pass.set_pipeline(&draw.pipeline);
                let Some(group) = uniform_groups.get(&draw.program) else {
                    continue;
                };
                match draw.uniform_offset {
                    Some(offset) => pass.set_bind_group(0, group, &[offset]),
                    None => pass.set_bind_group(0, group, &[]),
                }
                pass.set_bind_group(1, &draw.textures, &[]);
                let (x, y, w, h) = draw.viewport;
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
                match &draw.geometry {
                    Geometry::FullScreen => pass.draw(0..3, 0..1),
                    Geometry::Mesh {
                        vertices,
                        indices,
                        count,
                    } => {
                        pass.set_vertex_buffer(0, vertices.slice(..));
                        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..*count, 0, 0..1);
                    }
                }
            }
        }

        self.queue.submit([encoder.finish()]);
        self.uniform_arena.clear();
        self.uniform_offsets.clear();
    }
}

impl GraphicsDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId, DeviceError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::ZeroDimensions {
                width: desc.width,
                height: desc.height,
            });
        }
        if desc.shape == TextureShape::ArrayCube && desc.depth % 6 != 0 {
            return Err(DeviceError::CubeArrayDepth { depth: desc.depth });
        }
        let id = TextureId(self.texture_ids.allocate());
        self.textures
            .insert(id, GpuTexture::new(&self.device, *desc));
        log::debug!(
            "Created texture '{}' {} ({}x{}, {} layers, {:?})",
            desc.label,
            id,
            desc.width,
            desc.height,
            desc.layers(),
            desc.spec.layout
        );
        Ok(id)
    }

    fn resize_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        depth: u32,
    ) -> Result<(), DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ZeroDimensions { width, height });
        }
        let gpu_texture = self
            .textures
            .get_mut(&texture)
            .ok_or(DeviceError::InvalidHandle {
                kind: "texture",
                value: texture.raw(),
            })?;
        if gpu_texture.desc.shape == TextureShape::ArrayCube && depth % 6 != 0 {
            return Err(DeviceError::CubeArrayDepth { depth });
        }
        gpu_texture.resize(&self.device, width, height, depth);
        Ok(())
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let gpu_texture = self
            .textures
            .get(&texture)
            .ok_or(DeviceError::InvalidHandle {
                kind: "texture",
                value: texture.raw(),
            })?;
        let layout = gpu_texture.desc.spec.layout;
        let (width, height) = gpu_texture.mip_size(mip);
        let expected = (width * height * upload_texel_size(layout)) as usize;
        if data.len() != expected {
            return Err(DeviceError::Validation(format!(
                "upload to {texture} expects {expected} bytes, got {}",
                data.len()
            )));
        }
        let padded = pad_rgb(layout, data);
        let bytes = padded.as_deref().unwrap_or(data);
        let texel = gpu_texture.format.block_copy_size(None).unwrap_or(4);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu_texture.texture,
                mip_level: mip,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * texel),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32, u32)> {
        self.textures
            .get(&texture)
            .map(|t| (t.desc.width, t.desc.height, t.layers()))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        // Recorded commands hold their own view references.
        if self.textures.remove(&texture).is_some() {
            self.texture_ids.release(texture.raw());
        }
    }

    fn create_target(
        &mut self,
        colors: &[TextureId],
        depth: Option<TextureId>,
        depth_mode: DepthMode,
    ) -> Result<TargetId, DeviceError> {
        let id = TargetId(self.target_ids.allocate());
        self.targets.insert(
            id,
            TargetRecord {
                colors: colors.to_vec(),
                depth,
                depth_mode,
            },
        );
        Ok(id)
    }

    fn target_status(&self, target: TargetId) -> TargetStatus {
        let Some(record) = self.targets.get(&target) else {
            return TargetStatus::Incomplete(format!("{target} does not exist"));
        };
        let mut size = None;
        for id in record.colors.iter().chain(record.depth.iter()) {
            let Some(texture) = self.textures.get(id) else {
                return TargetStatus::Incomplete(format!("attachment {id} does not exist"));
            };
            let dims = (texture.desc.width, texture.desc.height);
            if *size.get_or_insert(dims) != dims {
                return TargetStatus::Incomplete(format!(
                    "attachment {id} is {}x{}, other attachments differ",
                    dims.0, dims.1
                ));
            }
        }
        if size.is_none() {
            return TargetStatus::Incomplete("no attachments".to_string());
        }
        TargetStatus::Complete
    }

    fn destroy_target(&mut self, target: TargetId) {
        if self.targets.remove(&target).is_some() {
            self.target_ids.release(target.raw());
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramId, DeviceError> {
        let program = GpuProgram::new(&self.device, desc)?;
        let id = ProgramId(self.program_ids.allocate());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.pipelines.retain(|key, _| key.program != program);
            self.uniform_offsets.remove(&program);
            self.program_ids.release(program.raw());
        }
    }

    fn create_mesh(&mut self, mesh: &MeshData) -> Result<MeshId, DeviceError> {
        let id = MeshId(self.mesh_ids.allocate());
        self.meshes.insert(id, GpuMesh::new(&self.device, mesh));
        Ok(id)
    }

    fn destroy_mesh(&mut self, mesh: MeshId) {
        if self.meshes.remove(&mesh).is_some() {
            self.mesh_ids.release(mesh.raw());
        }
    }

    fn bind_texture(&mut self, slot: usize, shape: TextureShape, texture: TextureId) {
        if texture.is_valid() && !self.textures.contains_key(&texture) {
            self.raise(DeviceError::InvalidHandle {
                kind: "texture",
                value: texture.raw(),
            });
        }
        self.state.textures[slot][shape.index()] = texture;
    }

    fn bind_target(&mut self, binding: TargetBinding) {
        if binding.target.is_valid() && !self.targets.contains_key(&binding.target) {
            self.raise(DeviceError::InvalidHandle {
                kind: "target",
                value: binding.target.raw(),
            });
        }
        self.state.apply_target(binding);
    }

    fn use_program(&mut self, program: ProgramId) {
        self.state.program = program;
    }

    fn set_state(&mut self, change: StateChange) {
        self.state.apply(change);
    }

    fn set_uniforms(&mut self, data: &[u8]) {
        let program = self.state.program;
        let Some(size) = self.programs.get(&program).map(|p| p.uniform_size) else {
            return;
        };
        if data.len() as u64 > size {
            self.raise(DeviceError::Validation(format!(
                "uniform block of {} bytes exceeds {program} block size {size}",
                data.len()
            )));
        }
        self.push_uniforms(program, data, size);
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        match self.resolve_attachments() {
            Some(attachments) => self.commands.push(Command::Clear {
                attachments,
                color,
                depth,
            }),
            None => self.incomplete_binding(),
        }
    }

    fn draw_mesh(&mut self, mesh: MeshId) {
        self.record_draw(Some(mesh));
    }

    fn draw_fullscreen(&mut self) {
        self.record_draw(None);
    }

    fn insert_marker(&mut self, label: &'static str) {
        self.commands.push(Command::Marker(label));
    }

    fn read_pixel(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
        x: u32,
        y: u32,
    ) -> Result<[f32; 4], DeviceError> {
        self.encode();
        let gpu_texture = self.textures.get(&texture).ok_or(DeviceError::InvalidHandle {
            kind: "texture",
            value: texture.raw(),
        })?;
        readback::read_texel(&self.device, &self.queue, gpu_texture, layer, mip, x, y)
    }

    fn read_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        mip: u32,
    ) -> Result<Vec<[f32; 4]>, DeviceError> {
        self.encode();
        let gpu_texture = self.textures.get(&texture).ok_or(DeviceError::InvalidHandle {
            kind: "texture",
            value: texture.raw(),
        })?;
        readback::read_level(&self.device, &self.queue, gpu_texture, layer, mip)
    }

    fn flush(&mut self) {
        self.encode();
    }

    fn take_error(&mut self) -> Option<DeviceError> {
        self.errors.pop_front()
    }
}

#[cfg(test)]
pub(crate) fn create_test_device_queue() -> Option<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok()?;

        adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: Default::default(),
                ..Default::default()
            })
            .await
            .ok()
    })
}
