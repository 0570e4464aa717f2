//! The built-in scene: a floor, a few shapes and one light of each kind.

use std::f32::consts::{FRAC_PI_4, TAU};
use std::path::Path;

use glam::{Mat4, Quat, Vec3};
use umbra_gpu::{DeviceError, GpuContext, Mesh};
use umbra_scene::{Background, BackgroundMode, Camera, Light, MaterialParams, Object, Scene, geometry};

use crate::AppError;

/// Scene plus the meshes its objects draw. The meshes must outlive every
/// frame rendered from the scene.
pub struct DemoScene {
    pub scene: Scene,
    pub meshes: Vec<Mesh>,
}

fn material(albedo: Vec3, roughness: f32, metallic: f32) -> MaterialParams {
    MaterialParams {
        albedo,
        roughness,
        metallic,
        ..MaterialParams::default()
    }
}

pub fn build(gpu: &mut GpuContext) -> Result<DemoScene, DeviceError> {
    let plane_data = geometry::plane(8.0);
    let cube_data = geometry::cube();
    let sphere_data = geometry::icosphere(3);
    let plane = Mesh::new(gpu, &plane_data)?;
    let cube = Mesh::new(gpu, &cube_data)?;
    let sphere = Mesh::new(gpu, &sphere_data)?;

    let mut scene = Scene::new();
    scene.add_object(
        Object::from_mesh(plane.id(), &plane_data)
            .with_model(Mat4::from_scale(Vec3::new(12.0, 1.0, 12.0)))
            .with_material(material(Vec3::splat(0.7), 0.9, 0.0))
            .with_shadows(false),
    );
    for (i, x) in [-2.0f32, 0.0, 2.0].into_iter().enumerate() {
        let rotation = Quat::from_rotation_y(i as f32 * FRAC_PI_4);
        scene.add_object(
            Object::from_mesh(cube.id(), &cube_data)
                .with_model(Mat4::from_rotation_translation(rotation, Vec3::new(x, 0.5, -1.0)))
                .with_material(material(Vec3::new(0.8, 0.3, 0.2), 0.5, 0.0)),
        );
    }
    scene.add_object(
        Object::from_mesh(sphere.id(), &sphere_data)
            .with_model(Mat4::from_scale_rotation_translation(
                Vec3::splat(1.2),
                Quat::IDENTITY,
                Vec3::new(0.0, 0.6, 1.5),
            ))
            .with_material(material(Vec3::new(0.9, 0.9, 0.95), 0.2, 1.0)),
    );

    scene.add_light(Light::directional(
        Vec3::new(-0.4, -1.0, -0.3),
        Vec3::new(1.0, 0.95, 0.85) * 2.0,
    ));
    scene.add_light(Light::point(Vec3::new(2.5, 2.0, 1.0), Vec3::new(0.4, 0.6, 1.0) * 6.0, 6.0));
    scene.add_light(Light::spot(
        Vec3::new(-3.0, 4.0, 2.0),
        Vec3::new(0.6, -1.0, -0.4),
        Vec3::new(1.0, 0.5, 0.2) * 12.0,
        10.0,
        0.3,
        0.5,
    ));

    let mut irradiance = [Vec3::ZERO; 9];
    irradiance[0] = Vec3::new(0.25, 0.3, 0.4);
    irradiance[2] = Vec3::new(0.05, 0.08, 0.12);
    scene.background = Background {
        mode: BackgroundMode::Color(Vec3::new(0.05, 0.07, 0.12)),
        irradiance,
        ..Background::default()
    };

    Ok(DemoScene {
        scene,
        meshes: vec![plane, cube, sphere],
    })
}

/// Camera orbiting the origin, one revolution every `period` frames.
pub fn orbit_camera(frame: u32, period: u32) -> Camera {
    let angle = TAU * (frame % period.max(1)) as f32 / period.max(1) as f32;
    let position = Vec3::new(angle.sin() * 7.0, 3.5, angle.cos() * 7.0);
    Camera::look_at(position, Vec3::new(0.0, 0.5, 0.0))
}

/// Write tightly packed RGBA8 rows to a PNG file.
pub fn write_png(path: &Path, width: u32, height: u32, pixels: &[u8]) -> Result<(), AppError> {
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return Err(AppError::SnapshotSize {
            expected,
            actual: pixels.len(),
        });
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    let mut encoder = png::Encoder::new(file, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(pixels)?;
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_gpu::HeadlessDevice;

    #[test]
    fn test_demo_scene_contents() {
        let mut gpu = GpuContext::new(Box::new(HeadlessDevice::new()), true);
        let demo = build(&mut gpu).unwrap();
        assert_eq!(demo.scene.objects.len(), 5);
        assert_eq!(demo.scene.directional_lights.len(), 1);
        assert_eq!(demo.scene.point_lights.len(), 1);
        assert_eq!(demo.scene.spot_lights.len(), 1);
        assert_eq!(demo.meshes.len(), 3);
        assert!(!demo.scene.objects[0].casts_shadow);
    }

    #[test]
    fn test_orbit_wraps() {
        let a = orbit_camera(0, 60);
        let b = orbit_camera(60, 60);
        assert!((a.position - b.position).length() < 1e-5);
        assert!((orbit_camera(30, 60).position.z + 7.0).abs() < 1e-4);
    }

    #[test]
    fn test_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots/frame.png");
        let pixels: Vec<u8> = (0..4 * 3 * 4).map(|i| i as u8).collect();
        write_png(&path, 4, 3, &pixels).unwrap();

        let decoder = png::Decoder::new(std::fs::File::open(&path).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buffer = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buffer).unwrap();
        assert_eq!((info.width, info.height), (4, 3));
        assert_eq!(&buffer[..info.buffer_size()], &pixels[..]);
    }

    #[test]
    fn test_png_rejects_short_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_png(&dir.path().join("x.png"), 2, 2, &[0; 8]).unwrap_err();
        assert!(matches!(err, AppError::SnapshotSize { expected: 16, actual: 8 }));
    }
}
