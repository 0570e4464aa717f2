//! Axis-aligned boxes and view-frustum tests used for shadow culling and light fitting.

use glam::{Mat4, Vec3, Vec4};

/// Plane indices into the frustum planes array.
const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Vec3,
    /// Maximum corner of the bounding box.
    pub max: Vec3,
}

impl Aabb {
    /// The empty box: merging anything into it yields that thing.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new AABB from min and max corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, or [`Aabb::EMPTY`].
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Returns the center point of the AABB.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns the half-extents (half-size along each axis).
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Edge lengths along each axis.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Length of the diagonal.
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    /// The eight corners, min-first.
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Inclusive point containment.
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Box around the eight transformed corners.
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb::from_points(self.corners().iter().map(|c| matrix.transform_point3(*c)))
    }

    /// Sphere through the corners: `(center, radius)`.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        (self.center(), 0.5 * self.diagonal())
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// A view frustum defined by six inward-pointing planes extracted from
/// a view-projection matrix with a zero-to-one clip depth range.
#[derive(Clone, Debug)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far. `(a, b, c)` is the normalized
    /// inward normal and `d` the signed distance term.
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract frustum planes with the Griggs-Hartmann method.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [Vec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        // Clip depth is 0..w, so the near plane is z >= 0.
        planes[NEAR] = rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    /// Whether the box is at least partially inside. Conservative near
    /// frustum corners; never rejects a visible box.
    pub fn intersects(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            // Positive vertex: the corner furthest along the plane normal.
            let p = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            normal.dot(p) + plane.w >= 0.0
        })
    }
}
