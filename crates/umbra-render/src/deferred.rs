//! The per-frame deferred pipeline.
//!
//! Stage order is fixed: shadows, geometry, SSAO, ambient, lights, bloom,
//! tonemap, FXAA, final blit. Each stage that runs is recorded in the
//! [`FrameReport`] and emitted as a device marker.

use umbra_config::{Config, ShadowFilter};
use umbra_gpu::{CacheStatistics, GpuContext, RenderTarget};
use umbra_scene::{Camera, Scene, ShadowTechnique};

use crate::RenderError;
use crate::gbuffer::{GBuffer, NORMAL};
use crate::lighting::{Lighting, ViewInputs};
use crate::postprocess::PostProcess;
use crate::shadow::{ShadowMap, ShadowSettings, plan_shadow_maps};
use crate::ssao::Ssao;

/// Everything the renderer reads from configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererSettings {
    pub width: u32,
    pub height: u32,
    pub shadows: bool,
    /// Re-render shadow maps every frame instead of only after scene changes.
    pub shadow_updates: bool,
    pub shadow: ShadowSettings,
    pub batched_shadows: bool,
    pub ssao: bool,
    pub ssao_radius: f32,
    pub bloom: bool,
    pub bloom_threshold: f32,
    pub bloom_mix: f32,
    pub bloom_cascade_depth: usize,
    pub bloom_resolution: u32,
    pub exposure: f32,
    pub tonemap: bool,
    pub fxaa: bool,
    pub frame_statistics: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RendererSettings {
    pub fn from_config(config: &Config) -> Self {
        let technique = match config.shadows.technique {
            ShadowFilter::Basic => ShadowTechnique::Basic,
            ShadowFilter::Variance => ShadowTechnique::Variance,
        };
        Self {
            width: config.output.width,
            height: config.output.height,
            shadows: config.shadows.enabled,
            shadow_updates: config.shadows.update_every_frame,
            shadow: ShadowSettings {
                resolution: config.shadows.resolution,
                cube_resolution: config.shadows.cube_resolution,
                technique,
                bias: config.shadows.bias,
            },
            batched_shadows: config.shadows.batched,
            ssao: config.render.ssao,
            ssao_radius: config.render.ssao_radius,
            bloom: config.render.bloom,
            bloom_threshold: config.render.bloom_threshold,
            bloom_mix: config.render.bloom_mix,
            bloom_cascade_depth: config.render.bloom_cascade_depth as usize,
            bloom_resolution: config.render.bloom_resolution,
            exposure: config.render.exposure,
            tonemap: config.render.tonemap,
            fxaa: config.render.fxaa,
            frame_statistics: config.debug.frame_statistics,
        }
    }
}

/// One step of the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Shadows,
    Geometry,
    Ssao,
    Ambient,
    Lights,
    Bloom,
    Tonemap,
    Fxaa,
    Final,
}

impl Stage {
    pub fn marker(self) -> &'static str {
        match self {
            Stage::Shadows => "shadows",
            Stage::Geometry => "geometry",
            Stage::Ssao => "ssao",
            Stage::Ambient => "ambient",
            Stage::Lights => "lights",
            Stage::Bloom => "bloom",
            Stage::Tonemap => "tonemap",
            Stage::Fxaa => "fxaa",
            Stage::Final => "final",
        }
    }
}

/// What one [`DeferredRenderer::draw`] did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub stages: Vec<Stage>,
    pub statistics: CacheStatistics,
    pub shadow_passes: usize,
    pub objects_drawn: usize,
    pub light_draws: usize,
}

/// Owns every intermediate target and runs the frame.
#[derive(Debug)]
pub struct DeferredRenderer {
    settings: RendererSettings,
    width: u32,
    height: u32,
    gbuffer: GBuffer,
    ssao: Ssao,
    lighting: Lighting,
    post: PostProcess,
    shadow_maps: Vec<ShadowMap>,
    scene: Scene,
    shadows_dirty: bool,
}

impl DeferredRenderer {
    pub fn new(gpu: &mut GpuContext, settings: RendererSettings) -> Result<Self, RenderError> {
        let (width, height) = (settings.width.max(1), settings.height.max(1));
        let gbuffer = GBuffer::new(gpu, width, height)?;
        let ssao = Ssao::new(gpu, width, height, settings.ssao_radius)?;
        let lighting = Lighting::new(gpu, width, height)?;
        let post = PostProcess::new(
            gpu,
            width,
            height,
            settings.bloom_resolution,
            settings.bloom_cascade_depth,
        )?;
        log::info!("Deferred renderer {}x{} on '{}'", width, height, gpu.backend_name());
        Ok(Self {
            settings,
            width,
            height,
            gbuffer,
            ssao,
            lighting,
            post,
            shadow_maps: Vec::new(),
            scene: Scene::new(),
            shadows_dirty: true,
        })
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Replace the scene: refit light matrices, rebuild shadow maps and
    /// point each shadowed light at its region.
    pub fn set_scene(&mut self, gpu: &mut GpuContext, mut scene: Scene) -> Result<(), RenderError> {
        scene.update_lights();
        for light in scene.lights_mut() {
            light.region = None;
        }
        self.shadow_maps.clear();
        if self.settings.shadows {
            for (kind, lights) in plan_shadow_maps(&scene, self.settings.batched_shadows) {
                let map = ShadowMap::new(gpu, kind, lights, self.settings.shadow)?;
                map.assign_regions(&mut scene);
                self.shadow_maps.push(map);
            }
        }
        log::info!(
            "Scene set: {} objects, {} lights, {} shadow maps",
            scene.objects.len(),
            scene.light_count(),
            self.shadow_maps.len()
        );
        self.scene = scene;
        self.shadows_dirty = true;
        Ok(())
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutable scene access. Shadow maps are re-rendered on the next frame;
    /// call [`Scene::update_lights`] after moving objects or lights.
    pub fn scene_mut(&mut self) -> &mut Scene {
        self.shadows_dirty = true;
        &mut self.scene
    }

    pub fn shadow_maps(&self) -> &[ShadowMap] {
        &self.shadow_maps
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn ssao(&self) -> &Ssao {
        &self.ssao
    }

    pub fn lighting(&self) -> &Lighting {
        &self.lighting
    }

    pub fn post(&self) -> &PostProcess {
        &self.post
    }

    /// The final image.
    pub fn output(&self) -> &RenderTarget {
        self.post.output()
    }

    fn begin_stage(gpu: &mut GpuContext, report: &mut FrameReport, stage: Stage) {
        gpu.mark(stage.marker());
        report.stages.push(stage);
    }

    /// Render one frame from `camera`.
    pub fn draw(&mut self, gpu: &mut GpuContext, camera: &Camera) -> FrameReport {
        gpu.begin_frame();
        let mut report = FrameReport::default();
        let aspect = self.width as f32 / self.height as f32;
        let view = ViewInputs {
            view: camera.view(),
            projection: camera.projection(aspect),
        };

        if self.settings.shadows
            && !self.shadow_maps.is_empty()
            && (self.settings.shadow_updates || self.shadows_dirty)
        {
            Self::begin_stage(gpu, &mut report, Stage::Shadows);
            for map in &mut self.shadow_maps {
                report.shadow_passes += map.draw_scene(gpu, &self.scene);
            }
            self.shadows_dirty = false;
        }

        Self::begin_stage(gpu, &mut report, Stage::Geometry);
        report.objects_drawn = self.gbuffer.draw(
            gpu,
            &self.scene.objects,
            &self.scene.background,
            &view.view,
            &view.projection,
        );

        if self.settings.ssao {
            Self::begin_stage(gpu, &mut report, Stage::Ssao);
            self.ssao.process(
                gpu,
                &view.projection,
                self.gbuffer.depth_texture(),
                self.gbuffer.texture(NORMAL),
            );
        } else {
            self.ssao.clear(gpu);
        }

        Self::begin_stage(gpu, &mut report, Stage::Ambient);
        self.lighting.draw_ambient(
            gpu,
            &self.gbuffer,
            self.ssao.texture(),
            &self.scene.background,
            &view,
        );

        Self::begin_stage(gpu, &mut report, Stage::Lights);
        report.light_draws = self
            .lighting
            .draw_lights(gpu, &self.gbuffer, &self.scene, &view);

        if self.settings.bloom {
            Self::begin_stage(gpu, &mut report, Stage::Bloom);
            self.post.bloom(
                gpu,
                self.lighting.target(),
                self.settings.bloom_threshold,
                self.settings.bloom_mix,
            );
        }

        Self::begin_stage(gpu, &mut report, Stage::Tonemap);
        self.post.tonemap(
            gpu,
            self.lighting.texture(),
            self.settings.exposure,
            self.settings.tonemap,
        );

        if self.settings.fxaa {
            Self::begin_stage(gpu, &mut report, Stage::Fxaa);
            self.post.fxaa(gpu);
        }

        Self::begin_stage(gpu, &mut report, Stage::Final);
        self.post.blit(gpu, self.settings.fxaa);
        gpu.flush();

        report.statistics = gpu.statistics();
        if self.settings.frame_statistics {
            log::info!(
                "Frame: {} stages, {} shadow passes, {} objects, {} lights. {}",
                report.stages.len(),
                report.shadow_passes,
                report.objects_drawn,
                report.light_draws,
                report.statistics
            );
        }
        report
    }

    /// Reallocate every screen-sized target. Takes effect before the next draw.
    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), RenderError> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        self.gbuffer.resize(gpu, width, height)?;
        self.ssao.resize(gpu, width, height)?;
        self.lighting.resize(gpu, width, height)?;
        self.post.resize(gpu, width, height)?;
        log::info!("Renderer resized {}x{} -> {}x{}", self.width, self.height, width, height);
        self.width = width;
        self.height = height;
        self.settings.width = width;
        self.settings.height = height;
        Ok(())
    }

    /// Read the final image back as tightly packed RGBA8, top row first.
    pub fn snapshot(&self, gpu: &mut GpuContext) -> Result<Vec<u8>, RenderError> {
        let texels = gpu.read_texture(self.output().texture(0), 0, 0)?;
        Ok(texels
            .iter()
            .flat_map(|texel| texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use umbra_gpu::{CallLog, DeviceCall, HeadlessDevice};
    use umbra_scene::{Light, Object, geometry};

    fn context() -> (GpuContext, CallLog) {
        let device = HeadlessDevice::new();
        let log = device.log();
        (GpuContext::new(Box::new(device), true), log)
    }

    fn small_settings() -> RendererSettings {
        let mut settings = RendererSettings {
            width: 64,
            height: 48,
            bloom_resolution: 32,
            ..Default::default()
        };
        settings.shadow.resolution = 32;
        settings.shadow.cube_resolution = 16;
        settings
    }

    fn demo_scene(gpu: &mut GpuContext) -> Scene {
        let mesh = gpu.create_mesh(&geometry::cube()).unwrap();
        let mut scene = Scene::new();
        scene.add_object(Object::from_mesh(mesh, &geometry::cube()));
        scene.add_light(Light::point(Vec3::new(0.0, 2.0, 0.0), Vec3::ONE, 6.0));
        scene.add_light(Light::directional(Vec3::NEG_Y, Vec3::ONE).with_shadows(false));
        scene
    }

    fn camera() -> Camera {
        Camera::look_at(Vec3::new(0.0, 1.0, 4.0), Vec3::ZERO)
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.shadows.technique = ShadowFilter::Basic;
        config.render.fxaa = false;
        config.shadows.batched = true;
        let settings = RendererSettings::from_config(&config);
        assert_eq!(settings.shadow.technique, ShadowTechnique::Basic);
        assert!(!settings.fxaa);
        assert!(settings.batched_shadows);
        assert_eq!(settings.width, config.output.width);
    }

    #[test]
    fn test_pipeline_order() {
        let (mut gpu, log) = context();
        let mut renderer = DeferredRenderer::new(&mut gpu, small_settings()).unwrap();
        let scene = demo_scene(&mut gpu);
        renderer.set_scene(&mut gpu, scene).unwrap();
        assert_eq!(renderer.shadow_maps().len(), 1);

        let start = log.len();
        let report = renderer.draw(&mut gpu, &camera());
        assert_eq!(
            report.stages,
            vec![
                Stage::Shadows,
                Stage::Geometry,
                Stage::Ssao,
                Stage::Ambient,
                Stage::Lights,
                Stage::Bloom,
                Stage::Tonemap,
                Stage::Fxaa,
                Stage::Final,
            ]
        );
        assert_eq!(report.shadow_passes, 6);
        assert_eq!(report.light_draws, 2);

        let markers: Vec<&str> = log
            .since(start)
            .iter()
            .filter_map(|c| match c {
                DeviceCall::Marker(label) => Some(*label),
                _ => None,
            })
            .collect();
        let mut expected = vec!["shadows"];
        expected.extend(["shadow-pass"; 6]);
        expected.extend([
            "geometry",
            "ssao",
            "box-blur",
            "ambient",
            "lights",
            "bloom",
            "gaussian-blur",
            "tonemap",
            "fxaa",
            "final",
        ]);
        assert_eq!(markers, expected);

        let programs: Vec<&str> = log
            .since(start)
            .iter()
            .filter_map(DeviceCall::draw_program)
            .filter(|p| !p.starts_with("gaussian") && !p.starts_with("box-blur"))
            .filter(|p| *p != "shadow-caster")
            .collect();
        assert_eq!(
            programs,
            vec![
                "gbuffer-object",
                "gbuffer-background",
                "ssao",
                "ambient",
                "light-directional",
                "light-point",
                "bloom-select",
                "bloom-composite",
                "tonemap",
                "fxaa",
                "final-blit",
            ]
        );
        assert_eq!(gpu.markers().first(), Some(&"shadows"));
    }

    #[test]
    fn test_shadow_regions_assigned() {
        let (mut gpu, _log) = context();
        let mut renderer = DeferredRenderer::new(&mut gpu, small_settings()).unwrap();
        let scene = demo_scene(&mut gpu);
        renderer.set_scene(&mut gpu, scene).unwrap();
        let point = &renderer.scene().point_lights[0];
        let region = point.region.unwrap();
        assert_eq!(region.texture, renderer.shadow_maps()[0].texture());
        assert!(renderer.scene().directional_lights[0].region.is_none());
    }

    #[test]
    fn test_disabled_features_skip_stages() {
        let (mut gpu, log) = context();
        let settings = RendererSettings {
            ssao: false,
            bloom: false,
            fxaa: false,
            ..small_settings()
        };
        let mut renderer = DeferredRenderer::new(&mut gpu, settings).unwrap();
        renderer.set_scene(&mut gpu, Scene::new()).unwrap();
        let report = renderer.draw(&mut gpu, &camera());
        assert_eq!(
            report.stages,
            vec![
                Stage::Geometry,
                Stage::Ambient,
                Stage::Lights,
                Stage::Tonemap,
                Stage::Final,
            ]
        );
        assert_eq!(log.draws_with("ssao"), 0);
        let occlusion = gpu.read_pixel(renderer.ssao().texture(), 0, 0, 0, 0).unwrap();
        assert_eq!(occlusion, [1.0; 4]);
    }

    #[test]
    fn test_static_shadows_render_once() {
        let (mut gpu, _log) = context();
        let settings = RendererSettings {
            shadow_updates: false,
            ..small_settings()
        };
        let mut renderer = DeferredRenderer::new(&mut gpu, settings).unwrap();
        let scene = demo_scene(&mut gpu);
        renderer.set_scene(&mut gpu, scene).unwrap();
        assert_eq!(renderer.draw(&mut gpu, &camera()).shadow_passes, 6);
        let second = renderer.draw(&mut gpu, &camera());
        assert_eq!(second.shadow_passes, 0);
        assert!(!second.stages.contains(&Stage::Shadows));
        renderer.scene_mut().point_lights[0].set_position(Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(renderer.draw(&mut gpu, &camera()).shadow_passes, 6);
    }

    #[test]
    fn test_batched_point_lights_share_a_cube_array() {
        let (mut gpu, _log) = context();
        let settings = RendererSettings {
            batched_shadows: true,
            ..small_settings()
        };
        let mut renderer = DeferredRenderer::new(&mut gpu, settings).unwrap();
        let mut scene = demo_scene(&mut gpu);
        scene.add_light(Light::point(Vec3::new(2.0, 1.0, 0.0), Vec3::ONE, 4.0));
        renderer.set_scene(&mut gpu, scene).unwrap();
        assert_eq!(renderer.shadow_maps().len(), 1);
        let layers: Vec<u32> = renderer
            .scene()
            .point_lights
            .iter()
            .map(|l| l.region.unwrap().layer)
            .collect();
        assert_eq!(layers, vec![0, 1]);
        let report = renderer.draw(&mut gpu, &camera());
        assert_eq!(report.shadow_passes, 12);
    }

    #[test]
    fn test_resize_reallocates_every_target() {
        let (mut gpu, _log) = context();
        let mut renderer = DeferredRenderer::new(&mut gpu, small_settings()).unwrap();
        renderer.resize(&mut gpu, 100, 80).unwrap();
        renderer.resize(&mut gpu, 100, 80).unwrap();
        assert_eq!(renderer.size(), (100, 80));
        assert_eq!(renderer.gbuffer().target().size(), glam::UVec2::new(100, 80));
        assert_eq!(renderer.lighting().target().size(), glam::UVec2::new(100, 80));
        assert_eq!(renderer.output().size(), glam::UVec2::new(100, 80));
        assert_eq!(renderer.ssao().size(), (50, 40));
        assert_eq!(
            gpu.texture_size(renderer.output().texture(0)),
            Some((100, 80, 1))
        );
        renderer.draw(&mut gpu, &camera());
    }

    #[test]
    fn test_snapshot_packs_rgba8() {
        let (mut gpu, _log) = context();
        let mut renderer = DeferredRenderer::new(&mut gpu, small_settings()).unwrap();
        renderer.draw(&mut gpu, &camera());
        let pixels = renderer.snapshot(&mut gpu).unwrap();
        assert_eq!(pixels.len(), 64 * 48 * 4);
    }
}
