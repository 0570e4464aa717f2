use umbra_gpu::{Faces, GpuContext, RenderTarget};
use umbra_scene::{Light, Object};

use super::caster::ShadowCaster;
use crate::box_blur::BoxBlur;

/// Single-layer map for one directional or spot light, blurred in place
/// when a filter is given. Returns the number of layer passes.
pub fn draw_2d(
    gpu: &mut GpuContext,
    target: &RenderTarget,
    caster: &ShadowCaster,
    blur: Option<&mut BoxBlur>,
    light: &Light,
    objects: &[Object],
) -> usize {
    if !light.casts_shadow {
        return 0;
    }
    caster.cast_layer(
        gpu,
        target,
        0,
        &light.view_projection(),
        light,
        objects,
        Faces::Back,
    );
    if let Some(blur) = blur {
        blur.process_in_place(gpu, target);
    }
    1
}
