//! Perspective camera for the deferred renderer.

use glam::{Mat4, Vec3};

use crate::bounds::Aabb;

/// A look-at perspective camera. Depth maps near to 0 and far to 1.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Near clip plane distance (always positive).
    pub near: f32,
    /// Far clip plane distance (always positive, > near).
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 1.3,
            near: 0.01,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn look_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Self::default()
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect_ratio.max(f32::EPSILON), self.near, self.far)
    }

    pub fn view_projection(&self, aspect_ratio: f32) -> Mat4 {
        self.projection(aspect_ratio) * self.view()
    }

    /// The forward direction vector.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or(Vec3::NEG_Z)
    }

    /// Adjust clip planes to a scene: near is 1% of its extent, far five times it.
    pub fn fit_to(&mut self, bounds: &Aabb) {
        if bounds.is_empty() {
            return;
        }
        let range = bounds.diagonal().max(f32::EPSILON);
        self.near = 0.01 * range;
        self.far = 5.0 * range;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_to_scene() {
        let mut camera = Camera::default();
        camera.fit_to(&Aabb::new(Vec3::ZERO, Vec3::new(3.0, 4.0, 0.0)));
        assert!((camera.near - 0.05).abs() < 1e-6);
        assert!((camera.far - 25.0).abs() < 1e-5);
    }

    #[test]
    fn test_target_projects_to_center() {
        let camera = Camera::look_at(Vec3::new(2.0, 3.0, 4.0), Vec3::new(0.0, 1.0, 0.0));
        let p = camera
            .view_projection(16.0 / 9.0)
            .project_point3(camera.target);
        assert!(p.x.abs() < 1e-5 && p.y.abs() < 1e-5);
        assert!(p.z > 0.0 && p.z < 1.0);
    }

    #[test]
    fn test_fit_to_empty_keeps_planes() {
        let mut camera = Camera::default();
        camera.fit_to(&Aabb::EMPTY);
        assert_eq!(camera, Camera::default());
    }
}
