//! Configuration for the umbra renderer.
//!
//! Settings persist to disk as RON files, tolerate missing and unknown
//! fields, and can be overridden from the command line via clap.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, OutputConfig, RenderConfig, ShadowConfig, ShadowFilter,
    MAX_BLOOM_CASCADE, default_config_dir,
};
pub use error::ConfigError;
