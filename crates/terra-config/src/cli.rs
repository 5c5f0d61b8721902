//! Command-line argument parsing for the globe viewer.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Globe viewer command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "terra", about = "Terra globe viewer")]
pub struct CliArgs {
    /// Latitude bands in the tile partition.
    #[arg(long)]
    pub rings: Option<u32>,

    /// Longitude bands in the tile partition.
    #[arg(long)]
    pub segments: Option<u32>,

    /// Soft budget of resident tiles.
    #[arg(long)]
    pub max_tiles: Option<usize>,

    /// Partition by fixed pixel tiles of this size instead of rings/segments.
    #[arg(long)]
    pub tile_size: Option<u32>,

    /// Directory texture paths are resolved against.
    #[arg(long)]
    pub texture_dir: Option<PathBuf>,

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
        if let Some(rings) = args.rings {
            self.globe.rings = rings;
        }
        if let Some(segments) = args.segments {
            self.globe.segments = segments;
        }
        if let Some(max) = args.max_tiles {
            self.tiles.max_resident_tiles = max;
        }
        if let Some(size) = args.tile_size {
            self.tiles.tile_size = Some(size);
        }
        if let Some(ref dir) = args.texture_dir {
            self.textures.base_dir = Some(dir.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            rings: Some(8),
            max_tiles: Some(64),
            texture_dir: Some(PathBuf::from("/opt/earth")),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.globe.rings, 8);
        assert_eq!(config.tiles.max_resident_tiles, 64);
        assert_eq!(config.textures.base_dir, Some(PathBuf::from("/opt/earth")));
        // Non-overridden fields retain defaults
        assert_eq!(config.globe.segments, 32);
        assert_eq!(config.tiles.tile_size, None);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from(["terra", "--tile-size", "1024", "--log-level", "debug"]);
        assert_eq!(args.tile_size, Some(1024));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.rings.is_none());
    }
}
