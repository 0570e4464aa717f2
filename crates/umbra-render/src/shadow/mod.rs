//! Variance shadow maps.
//!
//! A [`ShadowMap`] owns a two-channel `(d, d²)` render target and the lights
//! rendered into it. The four variants differ only in how lights map to
//! layers, so each is a free function over the same caster:
//!
//! | kind                | lights | layers       | format  | blur |
//! |---------------------|--------|--------------|---------|------|
//! | `Variance2D`        | 1      | 1            | Rg32F   | yes  |
//! | `VarianceCube`      | 1      | 6            | Rg16F   | no   |
//! | `Variance2DArray`   | n      | n            | Rg32F   | once |
//! | `VarianceCubeArray` | n      | 6n           | Rg16F   | no   |

mod array_2d;
mod caster;
mod cube;
mod cube_array;
mod variance_2d;

pub use array_2d::draw_2d_array;
pub use caster::{CASTER_SHADER_SOURCE, DepthEncoding, ShadowCaster};
pub use cube::{draw_cube, draw_cube_faces};
pub use cube_array::draw_cube_array;
pub use variance_2d::draw_2d;

use umbra_gpu::{
    DepthMode, Faces, Filter, GpuContext, Layout, RenderTarget, StateChange, TargetDescriptor,
    TargetError, TextureId, TextureShape, TextureSpec, Wrap,
};
use umbra_scene::{Light, Object, Scene, ShadowRegion, ShadowTechnique};

use crate::box_blur::BoxBlur;

/// Shadow map variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShadowMapKind {
    Variance2D,
    VarianceCube,
    Variance2DArray,
    VarianceCubeArray,
}

impl ShadowMapKind {
    pub fn shape(self) -> TextureShape {
        match self {
            ShadowMapKind::Variance2D => TextureShape::D2,
            ShadowMapKind::VarianceCube => TextureShape::Cube,
            ShadowMapKind::Variance2DArray => TextureShape::Array2D,
            ShadowMapKind::VarianceCubeArray => TextureShape::ArrayCube,
        }
    }

    pub fn is_cube(self) -> bool {
        self.shape().is_cube()
    }

    pub fn layout(self) -> Layout {
        if self.is_cube() {
            Layout::Rg16F
        } else {
            Layout::Rg32F
        }
    }

    /// Target depth for `lights` lights.
    pub fn depth(self, lights: usize) -> u32 {
        let lights = lights.max(1) as u32;
        match self {
            ShadowMapKind::Variance2D => 1,
            ShadowMapKind::VarianceCube => 6,
            ShadowMapKind::Variance2DArray => lights,
            ShadowMapKind::VarianceCubeArray => lights * 6,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ShadowMapKind::Variance2D => "shadow-2d",
            ShadowMapKind::VarianceCube => "shadow-cube",
            ShadowMapKind::Variance2DArray => "shadow-2d-array",
            ShadowMapKind::VarianceCubeArray => "shadow-cube-array",
        }
    }
}

/// Which scene list a light lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightGroup {
    Directional,
    Spot,
    Point,
}

/// A light addressed by its list and index in a [`Scene`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LightRef {
    pub group: LightGroup,
    pub index: usize,
}

impl LightRef {
    pub fn new(group: LightGroup, index: usize) -> Self {
        Self { group, index }
    }

    fn list(group: LightGroup, scene: &Scene) -> &[Light] {
        match group {
            LightGroup::Directional => &scene.directional_lights,
            LightGroup::Spot => &scene.spot_lights,
            LightGroup::Point => &scene.point_lights,
        }
    }

    pub fn get<'a>(&self, scene: &'a Scene) -> Option<&'a Light> {
        Self::list(self.group, scene).get(self.index)
    }

    pub fn get_mut<'a>(&self, scene: &'a mut Scene) -> Option<&'a mut Light> {
        let list = match self.group {
            LightGroup::Directional => &mut scene.directional_lights,
            LightGroup::Spot => &mut scene.spot_lights,
            LightGroup::Point => &mut scene.point_lights,
        };
        list.get_mut(self.index)
    }
}

/// Shadow parameters shared by every map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadowSettings {
    /// Side of each 2D layer.
    pub resolution: u32,
    /// Side of each cube face.
    pub cube_resolution: u32,
    pub technique: ShadowTechnique,
    pub bias: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 1024,
            cube_resolution: 512,
            technique: ShadowTechnique::Variance,
            bias: 0.002,
        }
    }
}

/// Group the scene's shadow-casting lights into maps, in shadow pass order
/// (directional, spot, point). Batched: one 2D array for directional and
/// spot lights and one cube array for point lights. Otherwise one map per light.
pub fn plan_shadow_maps(scene: &Scene, batched: bool) -> Vec<(ShadowMapKind, Vec<LightRef>)> {
    let casting = |group: LightGroup| -> Vec<LightRef> {
        LightRef::list(group, scene)
            .iter()
            .enumerate()
            .filter(|(_, light)| light.casts_shadow)
            .map(|(index, _)| LightRef::new(group, index))
            .collect()
    };
    let planar: Vec<LightRef> = casting(LightGroup::Directional)
        .into_iter()
        .chain(casting(LightGroup::Spot))
        .collect();
    let points = casting(LightGroup::Point);

    let mut plan = Vec::new();
    if batched {
        if !planar.is_empty() {
            plan.push((ShadowMapKind::Variance2DArray, planar));
        }
        if !points.is_empty() {
            plan.push((ShadowMapKind::VarianceCubeArray, points));
        }
    } else {
        plan.extend(planar.into_iter().map(|l| (ShadowMapKind::Variance2D, vec![l])));
        plan.extend(points.into_iter().map(|l| (ShadowMapKind::VarianceCube, vec![l])));
    }
    plan
}

/// A shadow render target, its optional blur and the lights drawn into it.
#[derive(Debug)]
pub struct ShadowMap {
    kind: ShadowMapKind,
    target: RenderTarget,
    blur: Option<BoxBlur>,
    caster: ShadowCaster,
    lights: Vec<LightRef>,
    settings: ShadowSettings,
}

impl ShadowMap {
    pub fn new(
        gpu: &mut GpuContext,
        kind: ShadowMapKind,
        lights: Vec<LightRef>,
        settings: ShadowSettings,
    ) -> Result<Self, TargetError> {
        let side = if kind.is_cube() {
            settings.cube_resolution
        } else {
            settings.resolution
        };
        let filter = match settings.technique {
            ShadowTechnique::Variance => Filter::Linear,
            ShadowTechnique::Basic | ShadowTechnique::None => Filter::Nearest,
        };
        let desc = TargetDescriptor::d2(
            kind.label(),
            side,
            side,
            vec![TextureSpec::new(kind.layout(), filter, Wrap::Clamp)],
        )
        .with_shape(kind.shape(), kind.depth(lights.len()))
        .with_depth(DepthMode::Combined);
        let target = RenderTarget::new(gpu, &desc)?;
        let blur = (!kind.is_cube() && settings.technique == ShadowTechnique::Variance)
            .then(|| BoxBlur::new(gpu, &desc, false));
        log::debug!(
            "Created {:?} shadow map ({}x{}, {} lights)",
            kind,
            side,
            side,
            lights.len()
        );
        Ok(Self {
            kind,
            target,
            blur,
            caster: ShadowCaster::new(gpu),
            lights,
            settings,
        })
    }

    pub fn kind(&self) -> ShadowMapKind {
        self.kind
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn texture(&self) -> TextureId {
        self.target.texture(0)
    }

    pub fn lights(&self) -> &[LightRef] {
        &self.lights
    }

    pub fn is_blurred(&self) -> bool {
        self.blur.is_some()
    }

    /// Layer index a consumer reads for the `slot`-th light: the 2D layer,
    /// or the cube index for cube arrays.
    pub fn region_layer(&self, slot: usize) -> u32 {
        match self.kind {
            ShadowMapKind::Variance2D | ShadowMapKind::VarianceCube => 0,
            ShadowMapKind::Variance2DArray | ShadowMapKind::VarianceCubeArray => slot as u32,
        }
    }

    /// Point every light of this map at its region.
    pub fn assign_regions(&self, scene: &mut Scene) {
        for (slot, light_ref) in self.lights.iter().enumerate() {
            let Some(light) = light_ref.get_mut(scene) else {
                log::warn!("Shadow map light {:?} is not in the scene", light_ref);
                continue;
            };
            light.region = Some(ShadowRegion::full(
                self.texture(),
                self.settings.technique,
                self.region_layer(slot),
                self.settings.bias,
            ));
        }
    }

    /// Run the shadow passes of this map. Returns the number of layer passes.
    /// The previously bound target and raster state are restored afterwards.
    #[track_caller]
    pub fn draw(&mut self, gpu: &mut GpuContext, lights: &[&Light], objects: &[Object]) -> usize {
        if lights.iter().all(|light| !light.casts_shadow) {
            return 0;
        }
        let previous = gpu.state().write_target;
        let passes = match self.kind {
            ShadowMapKind::Variance2D => match lights.first() {
                Some(light) => draw_2d(
                    gpu,
                    &self.target,
                    &self.caster,
                    self.blur.as_mut(),
                    light,
                    objects,
                ),
                None => 0,
            },
            ShadowMapKind::VarianceCube => match lights.first() {
                Some(light) => draw_cube(gpu, &self.target, &self.caster, light, objects),
                None => 0,
            },
            ShadowMapKind::Variance2DArray => draw_2d_array(
                gpu,
                &self.target,
                &self.caster,
                self.blur.as_mut(),
                lights,
                objects,
            ),
            ShadowMapKind::VarianceCubeArray => {
                draw_cube_array(gpu, &self.target, &self.caster, lights, objects)
            }
        };
        gpu.set(StateChange::CullFace(Faces::Back));
        gpu.set(StateChange::Cull(false));
        gpu.set(StateChange::DepthTest(false));
        gpu.bind_target(previous);
        passes
    }

    /// Resolve this map's lights in `scene` and draw them.
    #[track_caller]
    pub fn draw_scene(&mut self, gpu: &mut GpuContext, scene: &Scene) -> usize {
        let lights: Vec<&Light> = self
            .lights
            .iter()
            .filter_map(|light_ref| light_ref.get(scene))
            .collect();
        self.draw(gpu, &lights, &scene.objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};
    use umbra_gpu::{BindMode, CallLog, DeviceCall, HeadlessDevice, MeshId, WgpuDevice};
    use umbra_scene::geometry;

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    fn settings() -> ShadowSettings {
        ShadowSettings {
            resolution: 64,
            cube_resolution: 32,
            ..Default::default()
        }
    }

    fn floor(mesh: MeshId) -> Object {
        Object::from_mesh(mesh, &geometry::cube())
            .with_model(Mat4::from_scale(Vec3::new(10.0, 0.2, 10.0)))
    }

    fn scene_with(objects: Vec<Object>, lights: Vec<Light>) -> Scene {
        let mut scene = Scene::new();
        for object in objects {
            scene.add_object(object);
        }
        for light in lights {
            scene.add_light(light);
        }
        scene.update_lights();
        scene
    }

    fn clears(calls: &[DeviceCall]) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::Clear { .. }))
            .count()
    }

    #[test]
    fn test_kind_formats_and_depths() {
        assert_eq!(ShadowMapKind::Variance2D.layout(), Layout::Rg32F);
        assert_eq!(ShadowMapKind::Variance2DArray.layout(), Layout::Rg32F);
        assert_eq!(ShadowMapKind::VarianceCube.layout(), Layout::Rg16F);
        assert_eq!(ShadowMapKind::VarianceCubeArray.layout(), Layout::Rg16F);
        assert_eq!(ShadowMapKind::VarianceCubeArray.depth(3), 18);
        assert_eq!(ShadowMapKind::Variance2DArray.depth(0), 1);
    }

    #[test]
    fn test_plan_orders_directional_spot_point() {
        let scene = scene_with(
            Vec::new(),
            vec![
                Light::point(Vec3::Y, Vec3::ONE, 5.0),
                Light::spot(Vec3::Y, Vec3::NEG_Y, Vec3::ONE, 5.0, 0.3, 0.5),
                Light::directional(Vec3::NEG_Y, Vec3::ONE),
                Light::directional(Vec3::NEG_X, Vec3::ONE).with_shadows(false),
            ],
        );
        let plan = plan_shadow_maps(&scene, false);
        let kinds: Vec<_> = plan.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            kinds,
            vec![
                ShadowMapKind::Variance2D,
                ShadowMapKind::Variance2D,
                ShadowMapKind::VarianceCube
            ]
        );
        assert_eq!(plan[0].1, vec![LightRef::new(LightGroup::Directional, 0)]);
        assert_eq!(plan[1].1, vec![LightRef::new(LightGroup::Spot, 0)]);

        let batched = plan_shadow_maps(&scene, true);
        assert_eq!(batched.len(), 2);
        assert_eq!(batched[0].0, ShadowMapKind::Variance2DArray);
        assert_eq!(batched[0].1.len(), 2);
        assert_eq!(batched[1].0, ShadowMapKind::VarianceCubeArray);
    }

    #[test]
    fn test_non_casting_light_issues_nothing() {
        let (mut gpu, log) = context();
        let mesh = gpu.create_mesh(&geometry::cube()).unwrap();
        let light = Light::directional(Vec3::NEG_Y, Vec3::ONE).with_shadows(false);
        let mut map = ShadowMap::new(
            &mut gpu,
            ShadowMapKind::Variance2D,
            vec![LightRef::new(LightGroup::Directional, 0)],
            settings(),
        )
        .unwrap();
        let start = log.len();
        let passes = map.draw(&mut gpu, &[&light], &[floor(mesh)]);
        assert_eq!(passes, 0);
        assert!(log.since(start).is_empty());
    }

    #[test]
    fn test_cube_clears_six_faces_on_empty_scene() {
        let (mut gpu, log) = context();
        let mut scene = scene_with(Vec::new(), vec![Light::point(Vec3::ZERO, Vec3::ONE, 4.0)]);
        let mut map = ShadowMap::new(
            &mut gpu,
            ShadowMapKind::VarianceCube,
            vec![LightRef::new(LightGroup::Point, 0)],
            settings(),
        )
        .unwrap();
        map.assign_regions(&mut scene);
        assert!(!map.is_blurred());
        let start = log.len();
        assert_eq!(map.draw_scene(&mut gpu, &scene), 6);
        let calls = log.since(start);
        assert_eq!(clears(&calls), 6);
        let layers: Vec<u32> = calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Clear { binding, .. } => Some(binding.layer),
                _ => None,
            })
            .collect();
        assert_eq!(layers, vec![0, 1, 2, 3, 4, 5]);
        assert!(calls.contains(&DeviceCall::SetState(StateChange::CullFace(Faces::Front))));
        assert_eq!(log.draws(), 0);
    }

    #[test]
    fn test_2d_draws_casters_and_blurs() {
        let (mut gpu, log) = context();
        let mesh = gpu.create_mesh(&geometry::cube()).unwrap();
        let objects = vec![floor(mesh), floor(mesh).with_shadows(false)];
        let scene = scene_with(objects, vec![Light::directional(Vec3::NEG_Y, Vec3::ONE)]);
        let mut map = ShadowMap::new(
            &mut gpu,
            ShadowMapKind::Variance2D,
            vec![LightRef::new(LightGroup::Directional, 0)],
            settings(),
        )
        .unwrap();
        assert!(map.is_blurred());
        let start = log.len();
        assert_eq!(map.draw_scene(&mut gpu, &scene), 1);
        assert_eq!(log.draws_with("shadow-caster"), 1);
        let markers: Vec<_> = log
            .since(start)
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::Marker(label) => Some(label),
                _ => None,
            })
            .collect();
        assert_eq!(markers, vec!["shadow-pass", "box-blur"]);
    }

    #[test]
    fn test_basic_technique_skips_blur() {
        let (mut gpu, _log) = context();
        let map = ShadowMap::new(
            &mut gpu,
            ShadowMapKind::Variance2D,
            vec![LightRef::new(LightGroup::Directional, 0)],
            ShadowSettings {
                technique: ShadowTechnique::Basic,
                ..settings()
            },
        )
        .unwrap();
        assert!(!map.is_blurred());
    }

    #[test]
    fn test_array_batches_lights_with_one_blur() {
        let (mut gpu, log) = context();
        let mesh = gpu.create_mesh(&geometry::cube()).unwrap();
        let lights = vec![
            Light::directional(Vec3::NEG_Y, Vec3::ONE),
            Light::directional(Vec3::new(1.0, -1.0, 0.0), Vec3::ONE),
            Light::directional(Vec3::new(0.0, -1.0, 1.0), Vec3::ONE),
        ];
        let mut scene = scene_with(vec![floor(mesh)], lights);
        let plan = plan_shadow_maps(&scene, true);
        let (kind, refs) = plan[0].clone();
        let mut map = ShadowMap::new(&mut gpu, kind, refs, settings()).unwrap();
        map.assign_regions(&mut scene);
        let layers: Vec<u32> = scene
            .directional_lights
            .iter()
            .filter_map(|l| l.region.map(|r| r.layer))
            .collect();
        assert_eq!(layers, vec![0, 1, 2]);

        let start = log.len();
        assert_eq!(map.draw_scene(&mut gpu, &scene), 3);
        let calls = log.since(start);
        assert_eq!(clears(&calls), 3);
        assert_eq!(
            calls
                .iter()
                .filter(|c| c.draw_program() == Some("shadow-caster"))
                .count(),
            3
        );
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, DeviceCall::Marker("box-blur")))
                .count(),
            1
        );
    }

    #[test]
    fn test_cube_array_addresses_faces_per_light() {
        let (mut gpu, log) = context();
        let lights = vec![
            Light::point(Vec3::ZERO, Vec3::ONE, 3.0),
            Light::point(Vec3::X, Vec3::ONE, 3.0).with_shadows(false),
            Light::point(Vec3::Y, Vec3::ONE, 3.0),
        ];
        let scene = scene_with(Vec::new(), lights);
        let refs = (0..3).map(|i| LightRef::new(LightGroup::Point, i)).collect();
        let mut map =
            ShadowMap::new(&mut gpu, ShadowMapKind::VarianceCubeArray, refs, settings()).unwrap();
        assert_eq!(map.target().layers(), 18);
        let start = log.len();
        assert_eq!(map.draw_scene(&mut gpu, &scene), 12);
        let layers: Vec<u32> = log
            .since(start)
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Clear { binding, .. } => Some(binding.layer),
                _ => None,
            })
            .collect();
        assert_eq!(layers, vec![0, 1, 2, 3, 4, 5, 12, 13, 14, 15, 16, 17]);
    }

    #[test]
    fn test_previous_target_is_restored() {
        let (mut gpu, _log) = context();
        let other = RenderTarget::new(
            &mut gpu,
            &TargetDescriptor::d2("other", 8, 8, vec![TextureSpec::nearest(Layout::Rgba8)]),
        )
        .unwrap();
        other.bind(&mut gpu);
        let scene = scene_with(Vec::new(), vec![Light::point(Vec3::ZERO, Vec3::ONE, 4.0)]);
        let mut map = ShadowMap::new(
            &mut gpu,
            ShadowMapKind::VarianceCube,
            vec![LightRef::new(LightGroup::Point, 0)],
            settings(),
        )
        .unwrap();
        map.draw_scene(&mut gpu, &scene);
        assert_eq!(gpu.state().write_target.target, other.id());
        assert_eq!(gpu.state().write_target.mode, BindMode::Write);
    }

    #[test]
    fn test_variance_channels_hold_depth_moments() {
        let Ok(device) = WgpuDevice::request_headless() else {
            return;
        };
        let mut gpu = GpuContext::new(Box::new(device), true);
        let mesh = gpu.create_mesh(&geometry::plane(1.0)).unwrap();
        let mut light = Light::spot(Vec3::new(0.0, 2.0, 0.0), Vec3::NEG_Y, Vec3::ONE, 10.0, 0.5, 0.7);
        let ground = Object::from_mesh(mesh, &geometry::plane(1.0))
            .with_model(Mat4::from_scale(Vec3::splat(20.0)))
            .two_sided();
        light.set_scene(&umbra_scene::Aabb::new(
            Vec3::new(-10.0, -1.0, -10.0),
            Vec3::new(10.0, 3.0, 10.0),
        ));
        let mut map = ShadowMap::new(
            &mut gpu,
            ShadowMapKind::Variance2D,
            vec![LightRef::new(LightGroup::Spot, 0)],
            ShadowSettings {
                resolution: 16,
                technique: ShadowTechnique::Basic,
                ..settings()
            },
        )
        .unwrap();
        map.draw(&mut gpu, &[&light], &[ground]);
        gpu.flush();
        let texel = gpu.read_pixel(map.texture(), 0, 0, 8, 8).unwrap();
        let expected = 2.0 / light.far_plane();
        assert!((texel[0] - expected).abs() < 0.01, "depth {} vs {}", texel[0], expected);
        assert!((texel[1] - texel[0] * texel[0]).abs() < 0.01);
    }
}
