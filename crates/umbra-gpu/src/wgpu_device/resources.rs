//! Backend-side storage for textures, programs and meshes.

use rustc_hash::FxHashMap;

use crate::device::{DeviceError, MeshData, ProgramDescriptor, TextureDescriptor};
use crate::types::{Filter, Layout, TextureShape, Wrap};

pub(crate) struct GpuTexture {
    pub desc: TextureDescriptor,
    pub format: wgpu::TextureFormat,
    pub texture: wgpu::Texture,
    sample_views: [Option<wgpu::TextureView>; 4],
    attachment_views: FxHashMap<(u32, u32, bool), wgpu::TextureView>,
}

impl GpuTexture {
    pub fn new(device: &wgpu::Device, desc: TextureDescriptor) -> Self {
        let format = desc.spec.layout.wgpu_format();
        let texture = allocate(device, &desc, format);
        Self {
            desc,
            format,
            texture,
            sample_views: Default::default(),
            attachment_views: FxHashMap::default(),
        }
    }

    /// Reallocate at a new size; cached views are dropped with the old storage.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32, depth: u32) {
        self.desc.width = width;
        self.desc.height = height;
        self.desc.depth = depth;
        self.texture = allocate(device, &self.desc, self.format);
        self.sample_views = Default::default();
        self.attachment_views.clear();
    }

    pub fn layers(&self) -> u32 {
        self.desc.layers()
    }

    /// Filterable as a float texture on this device.
    pub fn filterable(&self, float32_filterable: bool) -> bool {
        match self.desc.spec.layout {
            Layout::Depth32F => false,
            Layout::Rg32F | Layout::Rgba32F => float32_filterable,
            _ => true,
        }
    }

    /// View for sampling as `shape`, or `None` if the storage cannot be viewed that way.
    pub fn sample_view(&mut self, shape: TextureShape) -> Option<wgpu::TextureView> {
        let layers = self.layers();
        let layer_count = match shape {
            TextureShape::D2 => 1,
            TextureShape::Array2D => layers,
            TextureShape::Cube if layers >= 6 => 6,
            TextureShape::ArrayCube if layers >= 6 && layers % 6 == 0 => layers,
            TextureShape::Cube | TextureShape::ArrayCube => return None,
        };
        let aspect = if self.desc.spec.layout.is_depth() {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        };
        let texture = &self.texture;
        let view = self.sample_views[shape.index()].get_or_insert_with(|| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("umbra-sample-view"),
                dimension: Some(shape.view_dimension()),
                aspect,
                base_array_layer: 0,
                array_layer_count: Some(layer_count),
                ..Default::default()
            })
        });
        Some(view.clone())
    }

    /// Single layer/mip view for rendering into.
    pub fn attachment_view(&mut self, layer: u32, mip: u32, srgb: bool) -> wgpu::TextureView {
        let format = self.attachment_format(srgb);
        let texture = &self.texture;
        self.attachment_views
            .entry((layer, mip, srgb))
            .or_insert_with(|| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("umbra-attachment-view"),
                    format: Some(format),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .clone()
    }

    pub fn attachment_format(&self, srgb: bool) -> wgpu::TextureFormat {
        if srgb && self.format == wgpu::TextureFormat::Rgba8Unorm {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            self.format
        }
    }

    pub fn mip_size(&self, mip: u32) -> (u32, u32) {
        (
            crate::types::mip_extent(self.desc.width, mip),
            crate::types::mip_extent(self.desc.height, mip),
        )
    }
}

fn allocate(
    device: &wgpu::Device,
    desc: &TextureDescriptor,
    format: wgpu::TextureFormat,
) -> wgpu::Texture {
    let view_formats: &[wgpu::TextureFormat] = if format == wgpu::TextureFormat::Rgba8Unorm {
        &[wgpu::TextureFormat::Rgba8UnormSrgb]
    } else {
        &[]
    };
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(desc.label),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: desc.layers(),
        },
        mip_level_count: desc.mips.max(1),
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats,
    })
}

/// Expand tightly packed 3-channel texels to the 4-channel storage format.
///
/// Alpha is filled with 1 (`0xFF` for 8-bit, half-float `1.0` for 16-bit).
pub(crate) fn pad_rgb(layout: Layout, data: &[u8]) -> Option<Vec<u8>> {
    match layout {
        Layout::Rgb8 => Some(
            data.chunks_exact(3)
                .flat_map(|c| [c[0], c[1], c[2], 0xFF])
                .collect(),
        ),
        Layout::Rgb16F => {
            let one = half::f16::ONE.to_le_bytes();
            Some(
                data.chunks_exact(6)
                    .flat_map(|c| [c[0], c[1], c[2], c[3], c[4], c[5], one[0], one[1]])
                    .collect(),
            )
        }
        _ => None,
    }
}

/// Bytes per texel of the data callers upload for `layout`.
pub(crate) fn upload_texel_size(layout: Layout) -> u32 {
    match layout {
        Layout::R8 => 1,
        Layout::Rg16F => 4,
        Layout::Rg32F => 8,
        Layout::Rgb8 => 3,
        Layout::Rgb16F => 6,
        Layout::Rgba8 | Layout::Rgba8Srgb | Layout::Depth32F => 4,
        Layout::Rgba16F => 8,
        Layout::Rgba32F => 16,
    }
}

pub(crate) struct GpuProgram {
    pub desc: ProgramDescriptor,
    pub module: wgpu::ShaderModule,
    pub uniform_layout: wgpu::BindGroupLayout,
    pub uniform_size: u64,
    texture_layouts: FxHashMap<u16, wgpu::BindGroupLayout>,
    pipeline_layouts: FxHashMap<u16, wgpu::PipelineLayout>,
}

impl GpuProgram {
    pub fn new(device: &wgpu::Device, desc: &ProgramDescriptor) -> Result<Self, DeviceError> {
        validate_wgsl(desc.name, desc.source)?;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.name),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });
        let uniform_size = desc.uniform_size.div_ceil(16) * 16;
        let entries: &[wgpu::BindGroupLayoutEntry] = if uniform_size > 0 {
            &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: std::num::NonZeroU64::new(uniform_size),
                },
                count: None,
            }]
        } else {
            &[]
        };
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("umbra-uniform-bgl"),
            entries,
        });
        Ok(Self {
            desc: desc.clone(),
            module,
            uniform_layout,
            uniform_size,
            texture_layouts: FxHashMap::default(),
            pipeline_layouts: FxHashMap::default(),
        })
    }

    /// Texture bind group layout for a filterability mask (bit `i` = slot `i`).
    pub fn texture_layout(&mut self, device: &wgpu::Device, mask: u16) -> wgpu::BindGroupLayout {
        let samplers = &self.desc.samplers;
        self.texture_layouts
            .entry(mask)
            .or_insert_with(|| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = samplers
                    .iter()
                    .enumerate()
                    .flat_map(|(i, slot)| {
                        let filterable = !slot.depth && mask & (1 << i) != 0;
                        let sample_type = if slot.depth {
                            wgpu::TextureSampleType::Depth
                        } else {
                            wgpu::TextureSampleType::Float { filterable }
                        };
                        let sampler = if filterable {
                            wgpu::SamplerBindingType::Filtering
                        } else {
                            wgpu::SamplerBindingType::NonFiltering
                        };
                        [
                            wgpu::BindGroupLayoutEntry {
                                binding: 2 * i as u32,
                                visibility: wgpu::ShaderStages::FRAGMENT,
                                ty: wgpu::BindingType::Texture {
                                    sample_type,
                                    view_dimension: slot.shape.view_dimension(),
                                    multisampled: false,
                                },
                                count: None,
                            },
                            wgpu::BindGroupLayoutEntry {
                                binding: 2 * i as u32 + 1,
                                visibility: wgpu::ShaderStages::FRAGMENT,
                                ty: wgpu::BindingType::Sampler(sampler),
                                count: None,
                            },
                        ]
                    })
                    .collect();
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("umbra-texture-bgl"),
                    entries: &entries,
                })
            })
            .clone()
    }

    pub fn pipeline_layout(&mut self, device: &wgpu::Device, mask: u16) -> wgpu::PipelineLayout {
        if let Some(layout) = self.pipeline_layouts.get(&mask) {
            return layout.clone();
        }
        let textures = self.texture_layout(device, mask);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(self.desc.name),
            bind_group_layouts: &[&self.uniform_layout, &textures],
            immediate_size: 0,
        });
        self.pipeline_layouts.insert(mask, layout.clone());
        layout
    }
}

/// Parse and validate a WGSL module. Errors carry the full diagnostic.
pub fn validate_wgsl(name: &str, source: &str) -> Result<(), DeviceError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| {
        DeviceError::ShaderCompilation {
            name: name.to_string(),
            diagnostic: err.emit_to_string(source),
        }
    })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| DeviceError::ShaderCompilation {
        name: name.to_string(),
        diagnostic: err.emit_to_string(source),
    })?;
    Ok(())
}

pub(crate) struct GpuMesh {
    pub vertices: wgpu::Buffer,
    pub indices: wgpu::Buffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn new(device: &wgpu::Device, mesh: &MeshData) -> Self {
        use wgpu::util::DeviceExt;
        // Zero-sized buffers are invalid; keep one dummy element.
        let vertices: &[u8] = if mesh.vertices.is_empty() {
            &[0; 32]
        } else {
            bytemuck::cast_slice(&mesh.vertices)
        };
        let indices: &[u8] = if mesh.indices.is_empty() {
            &[0; 4]
        } else {
            bytemuck::cast_slice(&mesh.indices)
        };
        Self {
            vertices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("umbra-mesh-vertices"),
                contents: vertices,
                usage: wgpu::BufferUsages::VERTEX,
            }),
            indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("umbra-mesh-indices"),
                contents: indices,
                usage: wgpu::BufferUsages::INDEX,
            }),
            index_count: mesh.indices.len() as u32,
        }
    }
}

pub(crate) fn create_sampler(device: &wgpu::Device, filter: Filter, wrap: Wrap) -> wgpu::Sampler {
    let address = match wrap {
        Wrap::Clamp => wgpu::AddressMode::ClampToEdge,
        Wrap::Repeat => wgpu::AddressMode::Repeat,
    };
    let (mode, mip) = match filter {
        Filter::Linear => (wgpu::FilterMode::Linear, wgpu::MipmapFilterMode::Linear),
        Filter::Nearest => (wgpu::FilterMode::Nearest, wgpu::MipmapFilterMode::Nearest),
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("umbra-sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: mode,
        min_filter: mode,
        mipmap_filter: mip,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_padding_adds_opaque_alpha() {
        let padded = pad_rgb(Layout::Rgb8, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(padded, vec![1, 2, 3, 0xFF, 4, 5, 6, 0xFF]);
        let half = pad_rgb(Layout::Rgb16F, &[0; 6]).unwrap();
        assert_eq!(half.len(), 8);
        assert_eq!(half::f16::from_le_bytes([half[6], half[7]]), half::f16::ONE);
        assert!(pad_rgb(Layout::Rgba8, &[0; 4]).is_none());
    }

    #[test]
    fn test_invalid_wgsl_reports_diagnostic() {
        let err = validate_wgsl("broken", "fn fs_main( -> f32 { return 1.0; }").unwrap_err();
        match err {
            DeviceError::ShaderCompilation { name, diagnostic } => {
                assert_eq!(name, "broken");
                assert!(!diagnostic.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_valid_wgsl_passes() {
        let source = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;
        assert!(validate_wgsl("solid", source).is_ok());
    }
}
