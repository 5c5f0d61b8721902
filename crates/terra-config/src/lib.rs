//! Configuration for the Terra globe viewer.
//!
//! Settings persist to disk as a RON file, can be overridden from the command
//! line via clap, and support hot-reload detection. Every section uses
//! `#[serde(default)]` so older or partial files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    CONFIG_FILE, Config, DebugConfig, GlobeConfig, LoadMode, TextureConfig, TileConfig,
    default_config_dir,
};
pub use error::ConfigError;
