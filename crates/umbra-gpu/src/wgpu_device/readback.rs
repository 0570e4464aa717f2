//! Synchronous single-texel readback.

use crate::device::DeviceError;
use crate::types::Layout;

use super::resources::GpuTexture;

pub(crate) fn read_texel(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &GpuTexture,
    layer: u32,
    mip: u32,
    x: u32,
    y: u32,
) -> Result<[f32; 4], DeviceError> {
    let (width, height) = texture.mip_size(mip);
    if x >= width || y >= height || layer >= texture.layers() || mip >= texture.desc.mips {
        return Err(DeviceError::Readback(format!(
            "texel ({x}, {y}) layer {layer} mip {mip} is outside {width}x{height}"
        )));
    }
    let texels = copy_region(device, queue, texture, layer, mip, (x, y), (1, 1))?;
    texels
        .into_iter()
        .next()
        .ok_or_else(|| DeviceError::Readback("empty readback".to_string()))
}

/// Every texel of one layer and mip, row-major from the top-left.
pub(crate) fn read_level(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &GpuTexture,
    layer: u32,
    mip: u32,
) -> Result<Vec<[f32; 4]>, DeviceError> {
    if layer >= texture.layers() || mip >= texture.desc.mips {
        return Err(DeviceError::Readback(format!(
            "layer {layer} mip {mip} is outside the texture"
        )));
    }
    let size = texture.mip_size(mip);
    copy_region(device, queue, texture, layer, mip, (0, 0), size)
}

fn copy_region(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &GpuTexture,
    layer: u32,
    mip: u32,
    (x, y): (u32, u32),
    (width, height): (u32, u32),
) -> Result<Vec<[f32; 4]>, DeviceError> {
    let aspect = if texture.desc.spec.layout.is_depth() {
        wgpu::TextureAspect::DepthOnly
    } else {
        wgpu::TextureAspect::All
    };
    let texel_size = texture
        .format
        .block_copy_size(Some(aspect))
        .ok_or_else(|| DeviceError::Readback(format!("{:?} cannot be copied", texture.format)))?;

    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let row_bytes = (width * texel_size).div_ceil(align) * align;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("umbra-texel-readback"),
        size: u64::from(row_bytes) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("umbra-readback-encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &texture.texture,
            mip_level: mip,
            origin: wgpu::Origin3d { x, y, z: layer },
            aspect,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit([encoder.finish()]);

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|err| DeviceError::Readback(err.to_string()))?;
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(DeviceError::Readback(err.to_string())),
        Err(err) => return Err(DeviceError::Readback(err.to_string())),
    }

    let layout = texture.desc.spec.layout;
    let texel_size = texel_size as usize;
    let used_bytes = width as usize * texel_size;
    let texels = {
        let mapped = slice.get_mapped_range();
        mapped
            .chunks(row_bytes as usize)
            .flat_map(move |row| {
                row[..used_bytes]
                    .chunks(texel_size)
                    .map(move |bytes| decode(layout, bytes))
            })
            .collect()
    };
    buffer.unmap();
    Ok(texels)
}

/// Decode one stored texel. Missing channels read as 0, missing alpha as 1.
pub(crate) fn decode(layout: Layout, bytes: &[u8]) -> [f32; 4] {
    let f32_at = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
    let f16_at = |i: usize| half::f16::from_le_bytes([bytes[i], bytes[i + 1]]).to_f32();
    let unorm = |i: usize| f32::from(bytes[i]) / 255.0;
    match layout {
        Layout::R8 => [unorm(0), 0.0, 0.0, 1.0],
        Layout::Rg16F => [f16_at(0), f16_at(2), 0.0, 1.0],
        Layout::Rg32F => [f32_at(0), f32_at(4), 0.0, 1.0],
        Layout::Depth32F => [f32_at(0), 0.0, 0.0, 1.0],
        Layout::Rgb8 => [unorm(0), unorm(1), unorm(2), 1.0],
        Layout::Rgba8 | Layout::Rgba8Srgb => [unorm(0), unorm(1), unorm(2), unorm(3)],
        Layout::Rgb16F => [f16_at(0), f16_at(2), f16_at(4), 1.0],
        Layout::Rgba16F => [f16_at(0), f16_at(2), f16_at(4), f16_at(6)],
        Layout::Rgba32F => [f32_at(0), f32_at(4), f32_at(8), f32_at(12)],
    }
}
