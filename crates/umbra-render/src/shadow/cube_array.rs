use umbra_gpu::{GpuContext, RenderTarget};
use umbra_scene::{Light, Object};

use super::caster::ShadowCaster;
use super::cube::draw_cube_faces;

/// Six faces per point light in one cube array. Light `i` owns layers
/// `6i..6i + 6`. Not blurred.
pub fn draw_cube_array(
    gpu: &mut GpuContext,
    target: &RenderTarget,
    caster: &ShadowCaster,
    lights: &[&Light],
    objects: &[Object],
) -> usize {
    let cubes = (target.layers() / 6) as usize;
    if lights.len() > cubes {
        log::warn!(
            "Shadow cube array '{}' holds {} cubes for {} lights, extra lights are skipped",
            target.label(),
            cubes,
            lights.len()
        );
    }
    let mut passes = 0;
    for (cube, light) in lights.iter().take(cubes).enumerate() {
        if !light.casts_shadow || !light.is_point() {
            continue;
        }
        passes += draw_cube_faces(gpu, target, caster, cube as u32 * 6, light, objects);
    }
    passes
}
