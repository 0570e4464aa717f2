//! Logging setup for umbra binaries.
//!
//! Library crates log through the `log` facade; this crate installs a
//! `tracing-subscriber` registry that receives those records (through the
//! `tracing-log` bridge) together with native `tracing` events. Console output
//! always, plus a JSON file in debug builds.

use std::path::{Path, PathBuf};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use umbra_config::Config;

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info,wgpu=warn,naga=warn";

/// Name of the JSON log written in debug builds.
pub const LOG_FILE: &str = "umbra.log";

/// Filter directive from the config's `debug.log_level`, falling back to
/// [`DEFAULT_FILTER`]. A bare level keeps the GPU stack quiet.
pub fn filter_directive(config: Option<&Config>) -> String {
    match config.map(|c| c.debug.log_level.trim()) {
        Some(level) if !level.is_empty() && level.contains('=') => level.to_string(),
        Some(level) if !level.is_empty() => format!("{level},wgpu=warn,naga=warn"),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Path of the JSON log inside `log_dir`.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE)
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the config. In debug builds with a `log_dir`, events
/// are also written as JSON lines to [`LOG_FILE`]. Returns whether file
/// logging is active. Calling this twice keeps the first subscriber.
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) -> bool {
    let directive = filter_directive(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_file_path(log_dir))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        return subscriber.with(file_layer).try_init().is_ok();
    }

    if subscriber.try_init().is_err() {
        tracing::debug!("Logging already initialized");
    }
    false
}

/// An `EnvFilter` with [`DEFAULT_FILTER`].
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let filter_str = format!("{}", default_env_filter());
        assert!(filter_str.contains("wgpu=warn"));
        assert!(filter_str.contains("naga=warn"));
        assert!(filter_str.contains("info"));
    }

    #[test]
    fn test_bare_level_keeps_gpu_quiet() {
        let mut config = Config::default();
        config.debug.log_level = "debug".to_string();
        assert_eq!(filter_directive(Some(&config)), "debug,wgpu=warn,naga=warn");
    }

    #[test]
    fn test_full_directive_is_kept() {
        let mut config = Config::default();
        config.debug.log_level = "warn,umbra_render=trace".to_string();
        assert_eq!(filter_directive(Some(&config)), "warn,umbra_render=trace");
        assert!(EnvFilter::try_new(filter_directive(Some(&config))).is_ok());
    }

    #[test]
    fn test_empty_level_falls_back() {
        let mut config = Config::default();
        config.debug.log_level = "  ".to_string();
        assert_eq!(filter_directive(Some(&config)), DEFAULT_FILTER);
        assert_eq!(filter_directive(None), DEFAULT_FILTER);
    }

    #[test]
    fn test_json_file_layer_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file_path(dir.path());
        let file = std::fs::File::create(&path).unwrap();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .json(),
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(frame = 3, "frame rendered");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let line = contents.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "frame rendered");
        assert_eq!(value["fields"]["frame"], 3);
        assert_eq!(value["level"], "INFO");
    }

    #[test]
    fn test_log_file_name() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(log_file_path(dir.path()).file_name().unwrap(), LOG_FILE);
    }
}
