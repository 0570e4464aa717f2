//! The scene: objects, lights and the environment probe.

use glam::Vec3;
use umbra_gpu::TextureId;

use crate::bounds::Aabb;
use crate::light::{Light, LightKind};
use crate::object::Object;

/// What fills pixels no object covers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackgroundMode {
    Color(Vec3),
    /// A 2D image stretched over the screen.
    Image(TextureId),
    /// A cube map looked up with the view direction.
    Skybox(TextureId),
}

/// Environment probe: background plus ambient lighting data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Background {
    pub mode: BackgroundMode,
    /// Order-2 spherical harmonics irradiance, 9 RGB coefficients.
    pub irradiance: [Vec3; 9],
    /// Prefiltered reflection cube map, `NONE` for no specular ambient.
    pub reflection: TextureId,
}

impl Default for Background {
    fn default() -> Self {
        let mut irradiance = [Vec3::ZERO; 9];
        irradiance[0] = Vec3::splat(0.25);
        Self {
            mode: BackgroundMode::Color(Vec3::ZERO),
            irradiance,
            reflection: TextureId::NONE,
        }
    }
}

impl Background {
    /// Texture sampled when drawing the background, if any, and whether it is a cube map.
    pub fn texture(&self) -> Option<(TextureId, bool)> {
        match self.mode {
            BackgroundMode::Color(_) => None,
            BackgroundMode::Image(texture) => Some((texture, false)),
            BackgroundMode::Skybox(texture) => Some((texture, true)),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub objects: Vec<Object>,
    pub directional_lights: Vec<Light>,
    pub point_lights: Vec<Light>,
    pub spot_lights: Vec<Light>,
    pub background: Background,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, object: Object) {
        self.objects.push(object);
    }

    /// Store a light in the list matching its kind.
    pub fn add_light(&mut self, light: Light) {
        match light.kind() {
            LightKind::Directional { .. } => self.directional_lights.push(light),
            LightKind::Point { .. } => self.point_lights.push(light),
            LightKind::Spot { .. } => self.spot_lights.push(light),
        }
    }

    /// All lights: directional, then spot, then point.
    pub fn lights(&self) -> impl Iterator<Item = &Light> {
        self.directional_lights
            .iter()
            .chain(self.spot_lights.iter())
            .chain(self.point_lights.iter())
    }

    pub fn lights_mut(&mut self) -> impl Iterator<Item = &mut Light> {
        self.directional_lights
            .iter_mut()
            .chain(self.spot_lights.iter_mut())
            .chain(self.point_lights.iter_mut())
    }

    pub fn light_count(&self) -> usize {
        self.directional_lights.len() + self.point_lights.len() + self.spot_lights.len()
    }

    /// World bounds of every object. Empty for a scene without objects.
    pub fn bounding_box(&self) -> Aabb {
        self.objects
            .iter()
            .fold(Aabb::EMPTY, |acc, object| acc.merge(&object.world_bounds()))
    }

    /// Refit every light's shadow matrices to the current scene bounds.
    pub fn update_lights(&mut self) {
        let mut bounds = self.bounding_box();
        if bounds.is_empty() {
            bounds = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        }
        for light in self.lights_mut() {
            light.set_scene(&bounds);
        }
        log::debug!(
            "Updated {} lights against scene bounds {:?}..{:?}",
            self.light_count(),
            bounds.min,
            bounds.max
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;
    use umbra_gpu::MeshId;

    fn unit_object(at: Vec3) -> Object {
        Object::new(MeshId(1), Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)))
            .with_model(Mat4::from_translation(at))
    }

    #[test]
    fn test_bounding_box_merges_objects() {
        let mut scene = Scene::new();
        assert!(scene.bounding_box().is_empty());
        scene.add_object(unit_object(Vec3::ZERO));
        scene.add_object(unit_object(Vec3::new(4.0, 0.0, 0.0)));
        let bounds = scene.bounding_box();
        assert_eq!(bounds.min, Vec3::splat(-0.5));
        assert_eq!(bounds.max, Vec3::new(4.5, 0.5, 0.5));
    }

    #[test]
    fn test_add_light_routes_by_kind() {
        let mut scene = Scene::new();
        scene.add_light(Light::directional(Vec3::NEG_Y, Vec3::ONE));
        scene.add_light(Light::point(Vec3::ZERO, Vec3::ONE, 2.0));
        scene.add_light(Light::spot(Vec3::Y, Vec3::NEG_Y, Vec3::ONE, 3.0, 0.2, 0.4));
        assert_eq!(scene.directional_lights.len(), 1);
        assert_eq!(scene.point_lights.len(), 1);
        assert_eq!(scene.spot_lights.len(), 1);
        let order: Vec<bool> = scene.lights().map(Light::is_point).collect();
        assert_eq!(order, vec![false, false, true]);
    }

    #[test]
    fn test_update_lights_refits_matrices() {
        let mut scene = Scene::new();
        scene.add_object(unit_object(Vec3::ZERO));
        scene.add_light(Light::point(Vec3::new(3.0, 0.0, 0.0), Vec3::ONE, 5.0));
        scene.update_lights();
        let before = scene.point_lights[0].far_plane();
        scene.add_object(unit_object(Vec3::new(-10.0, 0.0, 0.0)));
        scene.update_lights();
        assert!(scene.point_lights[0].far_plane() > before);
    }

    #[test]
    fn test_background_texture() {
        let mut background = Background::default();
        assert_eq!(background.texture(), None);
        background.mode = BackgroundMode::Skybox(TextureId(3));
        assert_eq!(background.texture(), Some((TextureId(3), true)));
    }
}
