//! Renderable objects.

use glam::{Mat4, Vec3};
use umbra_gpu::{MeshData, MeshId, TextureId};

use crate::bounds::Aabb;

/// Surface parameters written to the G-buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialParams {
    /// Linear base color, multiplied with the first texture when present.
    pub albedo: Vec3,
    pub roughness: f32,
    pub metallic: f32,
    /// Baked ambient occlusion, 1 for none.
    pub occlusion: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.8),
            roughness: 0.6,
            metallic: 0.0,
            occlusion: 1.0,
        }
    }
}

/// One mesh instance. Read-only to the renderer.
#[derive(Clone, Debug)]
pub struct Object {
    pub mesh: MeshId,
    pub model: Mat4,
    /// Local-space bounds of the mesh.
    pub bounds: Aabb,
    pub casts_shadow: bool,
    /// Rendered without back-face culling, in shadow and geometry passes.
    pub two_sided: bool,
    /// Alpha-tested against the alpha of `textures[0]`.
    pub masked: bool,
    pub textures: Vec<TextureId>,
    pub material: MaterialParams,
}

impl Object {
    pub fn new(mesh: MeshId, bounds: Aabb) -> Self {
        Self {
            mesh,
            model: Mat4::IDENTITY,
            bounds,
            casts_shadow: true,
            two_sided: false,
            masked: false,
            textures: Vec::new(),
            material: MaterialParams::default(),
        }
    }

    /// An object whose bounds come from the mesh data it was uploaded from.
    pub fn from_mesh(mesh: MeshId, data: &MeshData) -> Self {
        let bounds = data
            .bounds()
            .map(|(min, max)| Aabb::new(min, max))
            .unwrap_or(Aabb::EMPTY);
        Self::new(mesh, bounds)
    }

    pub fn with_model(mut self, model: Mat4) -> Self {
        self.model = model;
        self
    }

    pub fn with_material(mut self, material: MaterialParams) -> Self {
        self.material = material;
        self
    }

    pub fn with_texture(mut self, texture: TextureId) -> Self {
        self.textures.push(texture);
        self
    }

    pub fn with_shadows(mut self, casts_shadow: bool) -> Self {
        self.casts_shadow = casts_shadow;
        self
    }

    pub fn two_sided(mut self) -> Self {
        self.two_sided = true;
        self
    }

    pub fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    /// First texture, the albedo and alpha-mask source. `NONE` when untextured.
    pub fn mask_texture(&self) -> TextureId {
        self.textures.first().copied().unwrap_or(TextureId::NONE)
    }

    pub fn world_bounds(&self) -> Aabb {
        self.bounds.transformed(&self.model)
    }

    pub fn translation(&self) -> Vec3 {
        self.model.w_axis.truncate()
    }
}
