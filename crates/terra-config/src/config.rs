//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level viewer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Globe geometry and tile partition.
    pub globe: GlobeConfig,
    /// Tile streaming and residency settings.
    pub tiles: TileConfig,
    /// Source raster locations.
    pub textures: TextureConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Globe geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobeConfig {
    /// Sphere radius in world units.
    pub radius: f32,
    /// Number of latitude bands the textures are partitioned into.
    pub rings: u32,
    /// Number of longitude bands the textures are partitioned into.
    pub segments: u32,
}

/// How tile pixel data reaches the GPU.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoadMode {
    /// Decode and upload on the calling (render) thread during the visibility pass.
    #[default]
    Immediate,
    /// Decode on worker threads; upload finished tiles on the render thread.
    Background,
}

/// Tile streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TileConfig {
    /// Soft residency budget: visible tiles are always admitted.
    pub max_resident_tiles: usize,
    /// Fractional height allowance for displaced terrain (0.1 = 10% of radius).
    pub relief_margin: f32,
    /// Camera-to-patch distance, in radii, below which a patch is always visible.
    pub proximity_threshold: f32,
    /// Fixed pixel tile size. `None` partitions by `globe.rings` x `globe.segments`.
    pub tile_size: Option<u32>,
    /// Reject sample points hidden behind the globe.
    pub horizon_culling: bool,
    /// Build a CPU mipmap chain for every decoded tile.
    pub generate_mipmaps: bool,
    /// Immediate or background decoding.
    pub load_mode: LoadMode,
    /// Upper bound on GPU uploads per frame in background mode.
    pub max_uploads_per_frame: usize,
    /// Worker threads for background decoding (0 = derive from CPU count).
    pub decode_threads: usize,
}

/// Source raster locations, relative to `base_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TextureConfig {
    /// Directory the texture paths are resolved against.
    /// `None` resolves against the directory of the running executable.
    pub base_dir: Option<PathBuf>,
    /// Color (albedo) map.
    pub color: PathBuf,
    /// Optional height map.
    pub height: Option<PathBuf>,
    /// Optional normal map.
    pub normal: Option<PathBuf>,
    /// Flip images vertically at load so row 0 is the south edge.
    pub flip_vertical: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for GlobeConfig {
    fn default() -> Self {
        Self {
            radius: 1.0,
            rings: 16,
            segments: 32,
        }
    }
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            max_resident_tiles: 128,
            relief_margin: 0.1,
            proximity_threshold: 1.2,
            tile_size: None,
            horizon_culling: true,
            generate_mipmaps: true,
            load_mode: LoadMode::Immediate,
            max_uploads_per_frame: 8,
            decode_threads: 0,
        }
    }
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            color: PathBuf::from("textures/earth.jpg"),
            height: Some(PathBuf::from("textures/earth_height.png")),
            normal: Some(PathBuf::from("textures/earth_normal.png")),
            flip_vertical: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl TextureConfig {
    /// The directory texture paths are resolved against.
    pub fn resolved_base_dir(&self) -> PathBuf {
        if let Some(dir) = &self.base_dir {
            return dir.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve a configured texture path. Absolute paths are returned unchanged.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.resolved_base_dir().join(path)
        }
    }
}

/// Default per-user config directory (`<config_dir>/terra-globe`).
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("terra-globe"))
}

/// File name of the persisted config inside a config directory.
pub const CONFIG_FILE: &str = "config.ron";

// --- Persistence ---

impl Config {
    /// Location of [`CONFIG_FILE`] inside `config_dir`.
    pub fn path_in(config_dir: &Path) -> PathBuf {
        config_dir.join(CONFIG_FILE)
    }

    /// Read and parse `config.ron` from `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(config_dir);
        match std::fs::read_to_string(&path) {
            Ok(contents) => ron::from_str(&contents).map_err(|source| ConfigError::Parse { path, source }),
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Load `config.ron`, first writing the defaults if there is no file yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        if Self::path_in(config_dir).exists() {
            return Self::load(config_dir);
        }
        let config = Self::default();
        config.save(config_dir)?;
        Ok(config)
    }

    /// Write this config to `config_dir`, creating the directory if needed.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let path = Self::path_in(config_dir);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty)?;

        std::fs::create_dir_all(config_dir)
            .and_then(|()| std::fs::write(&path, serialized))
            .map_err(|source| ConfigError::Write { path, source })
    }

    /// Re-read `config.ron`. Returns the new config if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let on_disk = Self::load(config_dir)?;
        if on_disk == *self {
            return Ok(None);
        }
        log::info!("{} changed on disk", Self::path_in(config_dir).display());
        Ok(Some(on_disk))
    }
}
