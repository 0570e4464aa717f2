//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Directory used when no `--config` path is given: `<config dir>/umbra`,
/// or `./umbra` on platforms without one.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("umbra")
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Output image settings.
    pub output: OutputConfig,
    /// Post-processing and lighting settings.
    pub render: RenderConfig,
    /// Shadow map settings.
    pub shadows: ShadowConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Frames to render before exiting.
    pub frames: u32,
    /// Write the last frame to this PNG file.
    pub snapshot: Option<PathBuf>,
}

/// Rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Enable screen-space ambient occlusion.
    pub ssao: bool,
    /// SSAO sampling radius in view-space units.
    pub ssao_radius: f32,
    /// Enable bloom.
    pub bloom: bool,
    /// Luminance above which pixels bloom.
    pub bloom_threshold: f32,
    /// Weight of the blurred bloom when composited back.
    pub bloom_mix: f32,
    /// Number of half-resolution levels in the bloom blur.
    pub bloom_cascade_depth: u32,
    /// Side of the square bloom target, rounded to a power of two.
    pub bloom_resolution: u32,
    /// Exposure applied before tone mapping.
    pub exposure: f32,
    /// Map HDR to display range; when off, values are clamped.
    pub tonemap: bool,
    /// Edge anti-aliasing.
    pub fxaa: bool,
}

/// Shadow comparison used when sampling shadow maps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShadowFilter {
    /// Hard depth test.
    Basic,
    /// Blurred two-moment map with a Chebyshev bound.
    Variance,
}

/// Shadow configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShadowConfig {
    /// Render shadow maps at all.
    pub enabled: bool,
    /// Re-render shadow maps every frame. When off, maps are kept from the
    /// last scene change.
    pub update_every_frame: bool,
    /// Side of each 2D shadow map layer.
    pub resolution: u32,
    /// Side of each cube shadow map face.
    pub cube_resolution: u32,
    /// Shadow filtering technique.
    pub technique: ShadowFilter,
    /// Depth bias subtracted before comparison.
    pub bias: f32,
    /// Pack lights of the same kind into array shadow maps.
    pub batched: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Check for device errors after every state change.
    pub validation: bool,
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log per-frame cache statistics.
    pub frame_statistics: bool,
}

// --- Default implementations ---

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames: 1,
            snapshot: None,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ssao: true,
            ssao_radius: 0.5,
            bloom: true,
            bloom_threshold: 1.0,
            bloom_mix: 0.2,
            bloom_cascade_depth: 2,
            bloom_resolution: 512,
            exposure: 1.0,
            tonemap: true,
            fxaa: true,
        }
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_every_frame: true,
            resolution: 1024,
            cube_resolution: 512,
            technique: ShadowFilter::Variance,
            bias: 0.002,
            batched: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            log_level: "info".to_string(),
            frame_statistics: false,
        }
    }
}

// --- Load / Save / Reload ---

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Deepest bloom blur cascade the renderer builds.
pub const MAX_BLOOM_CASCADE: u32 = 6;

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = read_file(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let write_error = |source| ConfigError::Write {
            path: config_path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_error)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(write_error)
    }

    /// Returns `Some(new_config)` if the file on disk differs, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = read_file(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values no frame can be rendered with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.width == 0 || self.output.height == 0 {
            return Err(invalid(
                "output",
                format!("size {}x{} is empty", self.output.width, self.output.height),
            ));
        }
        if self.shadows.enabled && (self.shadows.resolution == 0 || self.shadows.cube_resolution == 0) {
            return Err(invalid("shadows.resolution", "shadow maps need at least one texel"));
        }
        if !(1..=MAX_BLOOM_CASCADE).contains(&self.render.bloom_cascade_depth) {
            return Err(invalid(
                "render.bloom_cascade_depth",
                format!("{} is outside 1..={MAX_BLOOM_CASCADE}", self.render.bloom_cascade_depth),
            ));
        }
        if !(self.render.exposure > 0.0) {
            return Err(invalid("render.exposure", "must be positive"));
        }
        if self.render.ssao_radius < 0.0 {
            return Err(invalid("render.ssao_radius", "must not be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("width: 1280"));
        assert!(ron_str.contains("technique: Variance"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.output.snapshot = Some(PathBuf::from("frame.png"));
        config.shadows.technique = ShadowFilter::Basic;
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(output: (width: 640), render: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.output.width, 640);
        assert_eq!(config.output.height, 720);
        assert_eq!(config.shadows, ShadowConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.width = 1920;
        config.render.bloom = false;
        config.shadows.batched = true;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.shadows.resolution = 2048;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.map(|c| c.shadows.resolution), Some(2048));
        assert!(modified.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "(output: (width: \"wide\"))").unwrap();
        let err = Config::load_or_create(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.output.height = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "output", .. })
        ));

        let mut config = Config::default();
        config.render.bloom_cascade_depth = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.shadows.resolution = 0;
        assert!(config.validate().is_err());
        config.shadows.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_dir_ends_with_umbra() {
        assert!(default_config_dir().ends_with("umbra"));
    }
}
