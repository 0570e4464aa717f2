//! Procedural meshes: light volumes and simple demo geometry.

use std::collections::HashMap;

use glam::Vec3;
use umbra_gpu::{MeshData, Vertex};

/// Generate an icosphere with the given number of subdivisions.
///
/// Vertices lie on the unit sphere with equirectangular UVs. Used as the
/// point light volume, so faces wind counter-clockwise seen from outside.
pub fn icosphere(subdivisions: u32) -> MeshData {
    // Start from an icosahedron
    let t = (1.0 + 5.0_f32.sqrt()) / 2.0;

    let mut positions: Vec<Vec3> = [
        Vec3::new(-1.0, t, 0.0),
        Vec3::new(1.0, t, 0.0),
        Vec3::new(-1.0, -t, 0.0),
        Vec3::new(1.0, -t, 0.0),
        Vec3::new(0.0, -1.0, t),
        Vec3::new(0.0, 1.0, t),
        Vec3::new(0.0, -1.0, -t),
        Vec3::new(0.0, 1.0, -t),
        Vec3::new(t, 0.0, -1.0),
        Vec3::new(t, 0.0, 1.0),
        Vec3::new(-t, 0.0, -1.0),
        Vec3::new(-t, 0.0, 1.0),
    ]
    .iter()
    .map(|p| p.normalize())
    .collect();

    let mut indices: Vec<u32> = vec![
        0, 11, 5, 0, 5, 1, 0, 1, 7, 0, 7, 10, 0, 10, 11, 1, 5, 9, 5, 11, 4, 11, 10, 2, 10, 7, 6, 7,
        1, 8, 3, 9, 4, 3, 4, 2, 3, 2, 6, 3, 6, 8, 3, 8, 9, 4, 9, 5, 2, 4, 11, 6, 2, 10, 8, 6, 7, 9,
        8, 1,
    ];

    for _ in 0..subdivisions {
        subdivide(&mut positions, &mut indices);
    }

    let vertices = positions
        .iter()
        .map(|p| {
            let u = 0.5 + p.z.atan2(p.x) / std::f32::consts::TAU;
            let v = 0.5 - p.y.asin() / std::f32::consts::PI;
            Vertex::new(p.to_array(), p.to_array(), [u, v])
        })
        .collect();

    MeshData { vertices, indices }
}

/// Split each triangle into 4 at its edge midpoints, projected onto the sphere.
fn subdivide(positions: &mut Vec<Vec3>, indices: &mut Vec<u32>) {
    let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
    let mut next = Vec::with_capacity(indices.len() * 4);

    let mut midpoint = |a: u32, b: u32, positions: &mut Vec<Vec3>| -> u32 {
        let key = if a < b { (a, b) } else { (b, a) };
        *midpoints.entry(key).or_insert_with(|| {
            let mid = (positions[a as usize] + positions[b as usize]).normalize();
            positions.push(mid);
            (positions.len() - 1) as u32
        })
    };

    for tri in indices.chunks(3) {
        let (a, b, c) = (tri[0], tri[1], tri[2]);
        let ab = midpoint(a, b, positions);
        let bc = midpoint(b, c, positions);
        let ca = midpoint(c, a, positions);

        next.extend_from_slice(&[a, ab, ca]);
        next.extend_from_slice(&[b, bc, ab]);
        next.extend_from_slice(&[c, ca, bc]);
        next.extend_from_slice(&[ab, bc, ca]);
    }

    *indices = next;
}

/// Closed cone with its apex at the origin opening along -Z, base of radius 1 at `z = -1`.
/// The spot light volume.
pub fn cone(segments: u32) -> MeshData {
    let segments = segments.max(3);
    let mut vertices = vec![Vertex::new([0.0; 3], [0.0, 0.0, 1.0], [0.5, 0.0])];
    for i in 0..segments {
        let theta = i as f32 / segments as f32 * std::f32::consts::TAU;
        let (sin, cos) = theta.sin_cos();
        let normal = Vec3::new(cos, sin, 1.0).normalize();
        vertices.push(Vertex::new(
            [cos, sin, -1.0],
            normal.to_array(),
            [i as f32 / segments as f32, 1.0],
        ));
    }
    let center = vertices.len() as u32;
    vertices.push(Vertex::new([0.0, 0.0, -1.0], [0.0, 0.0, -1.0], [0.5, 1.0]));

    let mut indices = Vec::with_capacity(segments as usize * 6);
    for i in 0..segments {
        let current = 1 + i;
        let next = 1 + (i + 1) % segments;
        indices.extend_from_slice(&[0, current, next]);
        indices.extend_from_slice(&[center, next, current]);
    }
    MeshData { vertices, indices }
}

/// Axis-aligned cube spanning `[-0.5, 0.5]` with per-face normals.
pub fn cube() -> MeshData {
    const FACES: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];
    let mut mesh = MeshData::default();
    for (normal, u, v) in FACES {
        push_quad(&mut mesh, normal * 0.5, u * 0.5, v * 0.5, normal, 1.0);
    }
    mesh
}

/// Unit square in the XZ plane facing +Y, UVs repeated `tiling` times.
pub fn plane(tiling: f32) -> MeshData {
    let mut mesh = MeshData::default();
    push_quad(
        &mut mesh,
        Vec3::ZERO,
        Vec3::X * 0.5,
        Vec3::NEG_Z * 0.5,
        Vec3::Y,
        tiling,
    );
    mesh
}

/// Quad centered on `center`, spanning `±u` and `±v`; front faces `u × v`.
fn push_quad(mesh: &mut MeshData, center: Vec3, u: Vec3, v: Vec3, normal: Vec3, tiling: f32) {
    let base = mesh.vertices.len() as u32;
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
    for (su, sv) in corners {
        let position = center + u * su + v * sv;
        let uv = [(su + 1.0) * 0.5 * tiling, (1.0 - sv) * 0.5 * tiling];
        mesh.vertices
            .push(Vertex::new(position.to_array(), normal.to_array(), uv));
    }
    mesh.indices
        .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every face of a convex mesh winds counter-clockwise seen from outside.
    fn assert_outward(mesh: &MeshData, interior: Vec3) {
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(mesh.vertices[i as usize].position));
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(
                normal.dot(centroid - interior) > 0.0,
                "Triangle {tri:?} faces inward"
            );
        }
    }

    #[test]
    fn test_icosphere_vertices_on_unit_sphere() {
        let mesh = icosphere(3);
        for vertex in &mesh.vertices {
            let len = Vec3::from(vertex.position).length();
            assert!(
                (len - 1.0).abs() < 1e-5,
                "Icosphere vertex not on unit sphere: length = {len}"
            );
        }
    }

    #[test]
    fn test_icosphere_triangle_count() {
        assert_eq!(icosphere(0).triangle_count(), 20);
        assert_eq!(icosphere(2).triangle_count(), 320);
    }

    #[test]
    fn test_icosphere_indices_valid() {
        let mesh = icosphere(3);
        let n = mesh.vertices.len() as u32;
        for &idx in &mesh.indices {
            assert!(idx < n, "Index {idx} out of bounds (vertex count = {n})");
        }
        // Shared midpoints: 12 + 30 * (4^k - 1) / 3 vertices.
        assert_eq!(n, 642);
    }

    #[test]
    fn test_icosphere_winds_outward() {
        assert_outward(&icosphere(2), Vec3::ZERO);
    }

    #[test]
    fn test_cone_winds_outward() {
        let mesh = cone(16);
        assert_outward(&mesh, Vec3::new(0.0, 0.0, -0.5));
        assert_eq!(mesh.triangle_count(), 32);
    }

    #[test]
    fn test_cube_winds_outward() {
        let mesh = cube();
        assert_outward(&mesh, Vec3::ZERO);
        assert_eq!(mesh.vertices.len(), 24);
        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Vec3::splat(-0.5));
        assert_eq!(max, Vec3::splat(0.5));
    }

    #[test]
    fn test_plane_faces_up() {
        let mesh = plane(4.0);
        assert_outward(&mesh, Vec3::new(0.0, -1.0, 0.0));
        assert!(mesh.vertices.iter().any(|v| v.uv == [4.0, 4.0]));
    }
}
