//! The `umbra` binary: renders the built-in scene off-screen for a number of
//! frames and optionally writes the last one to a PNG file.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags:
//! `umbra --width 1920 --height 1080 --frames 1 --snapshot out.png`.

mod demo;

use clap::Parser;
use tracing::{info, warn};
use umbra_config::{CliArgs, Config, ConfigError, default_config_dir};
use umbra_gpu::{DeviceError, GpuContext, HeadlessDevice, WgpuDevice};
use umbra_render::{DeferredRenderer, RenderError, RendererSettings};

/// Camera revolution period of the built-in scene, in frames.
const ORBIT_FRAMES: u32 = 240;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("renderer setup failed: {0}")]
    Render(#[from] RenderError),
    #[error("scene upload failed: {0}")]
    Device(#[from] DeviceError),
    #[error("snapshot has {actual} bytes, expected {expected}")]
    SnapshotSize { expected: usize, actual: usize },
    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode snapshot: {0}")]
    Png(#[from] png::EncodingError),
}

fn open_device(validation: bool) -> GpuContext {
    match WgpuDevice::request_headless() {
        Ok(device) => GpuContext::new(Box::new(device), validation),
        Err(e) => {
            warn!("{e}, falling back to the recording device; snapshots will be blank");
            GpuContext::new(Box::new(HeadlessDevice::new()), validation)
        }
    }
}

fn run(config: &Config) -> Result<(), AppError> {
    config.validate()?;
    let mut gpu = open_device(config.debug.validation);
    info!("Device: {}", gpu.backend_name());

    let settings = RendererSettings::from_config(config);
    let mut renderer = DeferredRenderer::new(&mut gpu, settings)?;
    let demo = demo::build(&mut gpu)?;
    renderer.set_scene(&mut gpu, demo.scene)?;

    let frames = config.output.frames.max(1);
    for frame in 0..frames {
        let camera = demo::orbit_camera(frame, ORBIT_FRAMES);
        let report = renderer.draw(&mut gpu, &camera);
        tracing::debug!(
            frame,
            stages = report.stages.len(),
            issued = report.statistics.issued,
            skipped = report.statistics.skipped,
            "frame rendered"
        );
    }
    info!("Rendered {} frame(s) at {}x{}", frames, config.output.width, config.output.height);

    if let Some(path) = &config.output.snapshot {
        let pixels = renderer.snapshot(&mut gpu)?;
        let (width, height) = renderer.size();
        demo::write_png(path, width, height, &pixels)?;
        info!("Snapshot written to {}", path.display());
    }

    drop(demo.meshes);
    gpu.collect_garbage();
    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    umbra_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = run(&config) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
