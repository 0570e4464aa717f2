//! Directional, point and spot lights, and the shadow data their casters fill in.

use glam::{Mat4, Vec3, Vec4};
use umbra_gpu::TextureId;

use crate::bounds::Aabb;

/// Margin applied around the scene box when fitting a directional light's ortho box.
const DIRECTIONAL_MARGIN: f32 = 1.5;
/// Distance of the virtual directional light from the scene sphere center, in radii.
const DIRECTIONAL_DISTANCE: f32 = 1.1;
/// Near plane as a fraction of the scene diagonal when a light sits inside the scene.
const INSIDE_NEAR_FACTOR: f32 = 0.01;
/// Widest spot cone, as a half angle.
const MAX_SPOT_HALF_ANGLE: f32 = 89.0_f32 * std::f32::consts::PI / 180.0;

/// Cube face look directions in +X, -X, +Y, -Y, +Z, -Z order, with the up
/// vectors the cube map face layout expects.
const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// How a light's shadow map is produced and tested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShadowTechnique {
    /// No shadow lookup at all.
    None,
    /// Hard depth comparison, no blur.
    Basic,
    /// Two-moment (depth, depth²) map with a Chebyshev bound.
    #[default]
    Variance,
}

/// Where a light finds its shadow: a texture, the layer in it, and the
/// sub-rectangle of that layer (`min.xy`, `max.xy`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowRegion {
    pub texture: TextureId,
    pub technique: ShadowTechnique,
    pub uv: Vec4,
    pub layer: u32,
    pub bias: f32,
}

impl ShadowRegion {
    /// The whole of `layer`.
    pub fn full(texture: TextureId, technique: ShadowTechnique, layer: u32, bias: f32) -> Self {
        Self {
            texture,
            technique,
            uv: Vec4::new(0.0, 0.0, 1.0, 1.0),
            layer,
            bias,
        }
    }
}

/// Per-kind light data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightKind {
    Directional {
        direction: Vec3,
    },
    Point {
        position: Vec3,
        radius: f32,
    },
    /// Angles are half-angles in radians, `inner <= outer`.
    Spot {
        position: Vec3,
        direction: Vec3,
        radius: f32,
        inner_angle: f32,
        outer_angle: f32,
    },
}

/// A light plus the matrices its shadow pass renders with.
///
/// The matrices depend on the scene bounds; [`Light::set_scene`] must run
/// after the light or the scene moves. Setters that move the light rerun it
/// against the last scene box.
#[derive(Clone, Debug)]
pub struct Light {
    pub color: Vec3,
    pub casts_shadow: bool,
    /// Filled in by the shadow map the light is assigned to.
    pub region: Option<ShadowRegion>,
    kind: LightKind,
    view_projections: Vec<Mat4>,
    far_plane: f32,
    scene_box: Aabb,
}

impl Light {
    fn with_kind(kind: LightKind, color: Vec3) -> Self {
        let faces = if matches!(kind, LightKind::Point { .. }) { 6 } else { 1 };
        Self {
            color,
            casts_shadow: true,
            region: None,
            kind,
            view_projections: vec![Mat4::IDENTITY; faces],
            far_plane: 1.0,
            scene_box: Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
        }
    }

    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self::with_kind(
            LightKind::Directional {
                direction: direction.normalize_or(Vec3::NEG_Y),
            },
            color,
        )
    }

    pub fn point(position: Vec3, color: Vec3, radius: f32) -> Self {
        Self::with_kind(
            LightKind::Point {
                position,
                radius: radius.max(f32::EPSILON),
            },
            color,
        )
    }

    pub fn spot(
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        radius: f32,
        inner_angle: f32,
        outer_angle: f32,
    ) -> Self {
        let outer_angle = outer_angle.clamp(f32::EPSILON, MAX_SPOT_HALF_ANGLE);
        Self::with_kind(
            LightKind::Spot {
                position,
                direction: direction.normalize_or(Vec3::NEG_Y),
                radius: radius.max(f32::EPSILON),
                inner_angle: inner_angle.clamp(0.0, outer_angle),
                outer_angle,
            },
            color,
        )
    }

    pub fn with_shadows(mut self, casts_shadow: bool) -> Self {
        self.casts_shadow = casts_shadow;
        self
    }

    pub fn kind(&self) -> &LightKind {
        &self.kind
    }

    pub fn is_point(&self) -> bool {
        matches!(self.kind, LightKind::Point { .. })
    }

    /// World position, `None` for directional lights.
    pub fn position(&self) -> Option<Vec3> {
        match self.kind {
            LightKind::Directional { .. } => None,
            LightKind::Point { position, .. } | LightKind::Spot { position, .. } => Some(position),
        }
    }

    /// Normalized emission direction, `None` for point lights.
    pub fn direction(&self) -> Option<Vec3> {
        match self.kind {
            LightKind::Point { .. } => None,
            LightKind::Directional { direction } | LightKind::Spot { direction, .. } => {
                Some(direction)
            }
        }
    }

    /// Range of influence, infinite for directional lights.
    pub fn radius(&self) -> f32 {
        match self.kind {
            LightKind::Directional { .. } => f32::INFINITY,
            LightKind::Point { radius, .. } | LightKind::Spot { radius, .. } => radius,
        }
    }

    pub fn set_position(&mut self, new_position: Vec3) {
        match &mut self.kind {
            LightKind::Directional { .. } => {
                log::warn!("Ignoring position update on a directional light");
                return;
            }
            LightKind::Point { position, .. } | LightKind::Spot { position, .. } => {
                *position = new_position;
            }
        }
        let scene_box = self.scene_box;
        self.set_scene(&scene_box);
    }

    pub fn set_direction(&mut self, new_direction: Vec3) {
        match &mut self.kind {
            LightKind::Point { .. } => {
                log::warn!("Ignoring direction update on a point light");
                return;
            }
            LightKind::Directional { direction } | LightKind::Spot { direction, .. } => {
                *direction = new_direction.normalize_or(*direction);
            }
        }
        let scene_box = self.scene_box;
        self.set_scene(&scene_box);
    }

    /// Shadow matrices: one for directional and spot lights, six cube faces for points.
    pub fn view_projections(&self) -> &[Mat4] {
        &self.view_projections
    }

    pub fn view_projection(&self) -> Mat4 {
        self.view_projections[0]
    }

    /// Far plane of the shadow projection. Spot and point casters store
    /// radial distance divided by this value.
    pub fn far_plane(&self) -> f32 {
        self.far_plane
    }

    /// Recompute shadow matrices so the projection covers `scene_box`.
    pub fn set_scene(&mut self, scene_box: &Aabb) {
        if scene_box.is_empty() {
            log::debug!("Empty scene box, keeping previous light matrices");
            return;
        }
        self.scene_box = *scene_box;
        match self.kind {
            LightKind::Directional { direction } => self.fit_directional(direction),
            LightKind::Point { position, .. } => self.fit_point(position),
            LightKind::Spot {
                position,
                direction,
                outer_angle,
                ..
            } => self.fit_spot(position, direction, outer_angle),
        }
    }

    fn fit_directional(&mut self, direction: Vec3) {
        let (center, radius) = self.scene_box.bounding_sphere();
        let eye = center - radius.max(f32::EPSILON) * DIRECTIONAL_DISTANCE * direction;
        let view = Mat4::look_at_rh(eye, center, up_for(direction));
        let light_box = self.scene_box.transformed(&view);
        let (near, far) = depth_range(&light_box);
        let projection = Mat4::orthographic_rh(
            DIRECTIONAL_MARGIN * light_box.min.x,
            DIRECTIONAL_MARGIN * light_box.max.x,
            DIRECTIONAL_MARGIN * light_box.min.y,
            DIRECTIONAL_MARGIN * light_box.max.y,
            near / DIRECTIONAL_MARGIN,
            far * DIRECTIONAL_MARGIN,
        );
        self.far_plane = far * DIRECTIONAL_MARGIN;
        self.view_projections = vec![projection * view];
    }

    fn fit_spot(&mut self, position: Vec3, direction: Vec3, outer_angle: f32) {
        let view = Mat4::look_at_rh(position, position + direction, up_for(direction));
        let size = self.scene_box.diagonal();
        let (near, far) = if self.scene_box.contains(position) {
            (INSIDE_NEAR_FACTOR * size, size)
        } else {
            depth_range(&self.scene_box.transformed(&view))
        };
        let (near, far) = sanitize_range(near, far, size);
        let projection = Mat4::perspective_rh(2.0 * outer_angle, 1.0, near, far);
        self.far_plane = far;
        self.view_projections = vec![projection * view];
    }

    fn fit_point(&mut self, position: Vec3) {
        let to_min = position - self.scene_box.min;
        let to_max = position - self.scene_box.max;
        let near_candidates = to_min.abs().min(to_max.abs());
        let far_candidates = to_min.abs().max(to_max.abs());
        let size = self.scene_box.diagonal();

        // Inside along an axis when the two deltas have different signs.
        let inside = (0..3).all(|i| to_min[i].is_sign_negative() != to_max[i].is_sign_negative());
        let (near, far) = if inside {
            (INSIDE_NEAR_FACTOR * size, size)
        } else {
            (near_candidates.min_element(), far_candidates.max_element())
        };
        let (near, far) = sanitize_range(near, far, size);
        self.far_plane = far;

        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far);
        // Render targets have a top-left origin while cube faces are addressed
        // bottom-up, so faces are mirrored vertically. This flips winding too.
        let flip = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0));
        let to_light = Mat4::from_translation(-position);
        self.view_projections = CUBE_FACES
            .iter()
            .map(|(forward, up)| {
                flip * projection * Mat4::look_to_rh(Vec3::ZERO, *forward, *up) * to_light
            })
            .collect();
    }

    /// Model matrix of the light volume: a unit icosphere for points, a unit
    /// cone (apex at origin, base at `z = -1`) for spots. `None` for directional lights.
    pub fn volume_model(&self) -> Option<Mat4> {
        match self.kind {
            LightKind::Directional { .. } => None,
            LightKind::Point { position, radius } => Some(Mat4::from_scale_rotation_translation(
                Vec3::splat(radius),
                glam::Quat::IDENTITY,
                position,
            )),
            LightKind::Spot {
                position,
                direction,
                radius,
                outer_angle,
                ..
            } => {
                let orientation = Mat4::look_to_rh(position, direction, up_for(direction)).inverse();
                // Slightly wider than the cone so the faceted base covers it.
                let spread = radius * outer_angle.tan() * 1.05;
                Some(orientation * Mat4::from_scale(Vec3::new(spread, spread, radius)))
            }
        }
    }
}

/// Smooth distance falloff reaching zero at `radius`.
pub fn attenuation(distance: f32, radius: f32) -> f32 {
    let ratio = distance / radius;
    let falloff = (1.0 - ratio * ratio).clamp(0.0, 1.0);
    falloff * falloff
}

/// Spot cone factor: 1 inside the inner cone, 0 outside the outer, linear in cosine between.
pub fn spot_factor(cos_angle: f32, inner_angle: f32, outer_angle: f32) -> f32 {
    let cos_inner = inner_angle.cos();
    let cos_outer = outer_angle.cos();
    if cos_inner - cos_outer <= f32::EPSILON {
        return if cos_angle >= cos_outer { 1.0 } else { 0.0 };
    }
    ((cos_angle - cos_outer) / (cos_inner - cos_outer)).clamp(0.0, 1.0)
}

fn up_for(direction: Vec3) -> Vec3 {
    if direction.cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

fn depth_range(light_box: &Aabb) -> (f32, f32) {
    let a = light_box.min.z.abs();
    let b = light_box.max.z.abs();
    (a.min(b), a.max(b))
}

fn sanitize_range(near: f32, far: f32, size: f32) -> (f32, f32) {
    let floor = (1e-3 * size).max(1e-4);
    let near = near.max(floor);
    (near, far.max(near * 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Frustum;

    fn scene_box() -> Aabb {
        Aabb::new(Vec3::new(-5.0, 0.0, -5.0), Vec3::new(5.0, 4.0, 5.0))
    }

    fn clip(m: &Mat4, p: Vec3) -> Vec3 {
        m.project_point3(p)
    }

    #[test]
    fn test_attenuation_falloff() {
        assert_eq!(attenuation(0.0, 4.0), 1.0);
        assert_eq!(attenuation(4.0, 4.0), 0.0);
        assert_eq!(attenuation(10.0, 4.0), 0.0);
        assert!((attenuation(2.0, 4.0) - 0.5625).abs() < 1e-6);
    }

    #[test]
    fn test_spot_factor_cone() {
        let inner = 0.3;
        let outer = 0.5;
        assert_eq!(spot_factor(1.0, inner, outer), 1.0);
        assert_eq!(spot_factor(0.6f32.cos(), inner, outer), 0.0);
        let mid = spot_factor(0.4f32.cos(), inner, outer);
        assert!(mid > 0.0 && mid < 1.0);
        assert_eq!(spot_factor(0.49f32.cos(), 0.5, 0.5), 1.0);
    }

    #[test]
    fn test_directional_covers_scene() {
        let mut light = Light::directional(Vec3::new(-1.0, -2.0, -0.5), Vec3::ONE);
        light.set_scene(&scene_box());
        let vp = light.view_projection();
        for corner in scene_box().corners() {
            let p = clip(&vp, corner);
            assert!(p.x.abs() <= 1.0 && p.y.abs() <= 1.0, "corner {corner} outside: {p}");
            assert!(p.z >= 0.0 && p.z <= 1.0, "corner {corner} depth {p}");
        }
        assert!(Frustum::from_view_projection(&vp).intersects(&scene_box()));
    }

    #[test]
    fn test_directional_straight_down_has_valid_up() {
        let mut light = Light::directional(Vec3::NEG_Y, Vec3::ONE);
        light.set_scene(&scene_box());
        assert!(light.view_projection().is_finite());
    }

    #[test]
    fn test_point_light_has_six_faces() {
        let mut light = Light::point(Vec3::new(0.0, 2.0, 0.0), Vec3::ONE, 6.0);
        light.set_scene(&scene_box());
        assert_eq!(light.view_projections().len(), 6);
        // Light inside the box: far is the scene diagonal.
        assert!((light.far_plane() - scene_box().diagonal()).abs() < 1e-4);
    }

    #[test]
    fn test_point_faces_look_along_axes() {
        let position = Vec3::new(0.0, 2.0, 0.0);
        let mut light = Light::point(position, Vec3::ONE, 6.0);
        light.set_scene(&scene_box());
        let axes = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (face, axis) in axes.iter().enumerate() {
            let p = clip(&light.view_projections()[face], position + *axis);
            assert!(p.x.abs() < 1e-4 && p.y.abs() < 1e-4, "face {face}: {p}");
            assert!(p.z > 0.0 && p.z < 1.0);
        }
    }

    #[test]
    fn test_point_outside_uses_axis_distances() {
        let mut light = Light::point(Vec3::new(20.0, 2.0, 0.0), Vec3::ONE, 30.0);
        light.set_scene(&scene_box());
        assert!((light.far_plane() - 25.0).abs() < 1e-4);
    }

    #[test]
    fn test_spot_inside_and_outside_scene() {
        let mut inside = Light::spot(
            Vec3::new(0.0, 3.0, 0.0),
            Vec3::NEG_Y,
            Vec3::ONE,
            10.0,
            0.3,
            0.5,
        );
        inside.set_scene(&scene_box());
        assert!((inside.far_plane() - scene_box().diagonal()).abs() < 1e-4);

        let mut outside = Light::spot(
            Vec3::new(0.0, 10.0, 0.0),
            Vec3::NEG_Y,
            Vec3::ONE,
            20.0,
            0.3,
            0.5,
        );
        outside.set_scene(&scene_box());
        assert!((outside.far_plane() - 10.0).abs() < 1e-4);
        let p = clip(&outside.view_projection(), Vec3::new(0.0, 2.0, 0.0));
        assert!(p.x.abs() < 1e-4 && p.y.abs() < 1e-4);
    }

    #[test]
    fn test_moving_light_refits() {
        let mut light = Light::point(Vec3::new(0.0, 2.0, 0.0), Vec3::ONE, 6.0);
        light.set_scene(&scene_box());
        let before = light.view_projections()[0];
        light.set_position(Vec3::new(1.0, 2.0, 0.0));
        assert_ne!(before, light.view_projections()[0]);
        assert_eq!(light.position(), Some(Vec3::new(1.0, 2.0, 0.0)));
    }

    #[test]
    fn test_spot_volume_apex_and_base() {
        let light = Light::spot(Vec3::ZERO, Vec3::X, Vec3::ONE, 5.0, 0.2, 0.4);
        let model = light.volume_model().unwrap();
        assert!(model.transform_point3(Vec3::ZERO).length() < 1e-5);
        let base = model.transform_point3(Vec3::new(0.0, 0.0, -1.0));
        assert!((base - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4);
        assert!(Light::directional(Vec3::X, Vec3::ONE).volume_model().is_none());
    }
}
