use umbra_gpu::{Faces, GpuContext, RenderTarget};
use umbra_scene::{Light, Object};

use super::caster::ShadowCaster;
use crate::box_blur::BoxBlur;

/// One layer per light, all through the same target and program, followed
/// by a single blur over every layer. Light `i` owns layer `i`.
pub fn draw_2d_array(
    gpu: &mut GpuContext,
    target: &RenderTarget,
    caster: &ShadowCaster,
    blur: Option<&mut BoxBlur>,
    lights: &[&Light],
    objects: &[Object],
) -> usize {
    if lights.len() > target.layers() as usize {
        log::warn!(
            "Shadow array '{}' has {} layers for {} lights, extra lights are skipped",
            target.label(),
            target.layers(),
            lights.len()
        );
    }
    let mut passes = 0;
    for (layer, light) in lights.iter().take(target.layers() as usize).enumerate() {
        if !light.casts_shadow {
            continue;
        }
        caster.cast_layer(
            gpu,
            target,
            layer as u32,
            &light.view_projection(),
            light,
            objects,
            Faces::Back,
        );
        passes += 1;
    }
    if passes > 0 {
        if let Some(blur) = blur {
            blur.process_in_place(gpu, target);
        }
    }
    passes
}
