//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// umbra command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "umbra", about = "Headless deferred renderer with variance shadow maps")]
pub struct CliArgs {
    /// Output width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Output height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Number of frames to render.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Write the final frame to this PNG file.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Disable screen-space ambient occlusion.
    #[arg(long)]
    pub no_ssao: bool,

    /// Disable bloom.
    #[arg(long)]
    pub no_bloom: bool,

    /// Disable FXAA.
    #[arg(long)]
    pub no_fxaa: bool,

    /// Pack shadow maps of the same kind into array targets.
    #[arg(long)]
    pub batched_shadows: bool,

    /// Shadow map resolution.
    #[arg(long)]
    pub shadow_resolution: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.output.width = w;
        }
        if let Some(h) = args.height {
            self.output.height = h;
        }
        if let Some(frames) = args.frames {
            self.output.frames = frames;
        }
        if let Some(ref path) = args.snapshot {
            self.output.snapshot = Some(path.clone());
        }
        if args.no_ssao {
            self.render.ssao = false;
        }
        if args.no_bloom {
            self.render.bloom = false;
        }
        if args.no_fxaa {
            self.render.fxaa = false;
        }
        if args.batched_shadows {
            self.shadows.batched = true;
        }
        if let Some(resolution) = args.shadow_resolution {
            self.shadows.resolution = resolution;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
