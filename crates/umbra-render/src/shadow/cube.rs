use umbra_gpu::{Faces, GpuContext, RenderTarget};
use umbra_scene::{Light, Object};

use super::caster::ShadowCaster;

/// Six face passes for one point light, starting at `first_layer`.
///
/// Face matrices mirror Y, which reverses winding, so front faces are culled.
pub fn draw_cube_faces(
    gpu: &mut GpuContext,
    target: &RenderTarget,
    caster: &ShadowCaster,
    first_layer: u32,
    light: &Light,
    objects: &[Object],
) -> usize {
    let mut passes = 0;
    for (face, view_projection) in light.view_projections().iter().take(6).enumerate() {
        caster.cast_layer(
            gpu,
            target,
            first_layer + face as u32,
            view_projection,
            light,
            objects,
            Faces::Front,
        );
        passes += 1;
    }
    passes
}

/// Cube map for one point light. Not blurred.
pub fn draw_cube(
    gpu: &mut GpuContext,
    target: &RenderTarget,
    caster: &ShadowCaster,
    light: &Light,
    objects: &[Object],
) -> usize {
    if !light.casts_shadow {
        return 0;
    }
    if !light.is_point() {
        log::warn!("Cube shadow map assigned a non-point light, skipping");
        return 0;
    }
    draw_cube_faces(gpu, target, caster, 0, light, objects)
}
