//! Headless globe demo: orbits a camera around the globe and drives tile
//! streaming the way a renderer would, logging residency as it goes.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Edits to `config.ron` are picked up while the demo runs and rebuild the
//! texture layers. Run with `cargo run -p terra-demo -- --texture-dir ./assets --frames 600`.

use std::f32::consts::{FRAC_PI_4, TAU};
use std::path::PathBuf;

use clap::Parser;
use glam::{Mat4, Vec3};
use terra_config::{CliArgs, Config, ConfigError, default_config_dir};
use terra_tiles::{GlobeTextures, HeadlessAllocator, TextureLayer, TileBinding};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "terra-demo", about = "Headless tile streaming demo")]
struct DemoArgs {
    #[command(flatten)]
    common: CliArgs,

    /// Simulated frames to run.
    #[arg(long, default_value_t = 360)]
    frames: u32,

    /// Farthest orbit altitude, in globe radii above the surface.
    #[arg(long, default_value_t = 2.0)]
    altitude: f32,

    /// Check `config.ron` for edits every this many frames (0 = never).
    #[arg(long, default_value_t = 120)]
    reload_every: u32,
}

/// `config.ron` as last read, and the config in effect after CLI overrides.
struct LiveConfig {
    dir: PathBuf,
    on_disk: Config,
    effective: Config,
}

impl LiveConfig {
    fn load(dir: PathBuf, args: &CliArgs) -> Result<Self, ConfigError> {
        let on_disk = Config::load_or_create(&dir)?;
        Ok(Self::with_file(dir, on_disk, args))
    }

    fn with_file(dir: PathBuf, on_disk: Config, args: &CliArgs) -> Self {
        let mut effective = on_disk.clone();
        effective.apply_cli_overrides(args);
        Self {
            dir,
            on_disk,
            effective,
        }
    }

    /// Re-read `config.ron`. Returns `true` when the effective config changed;
    /// edits masked by a CLI override do not count.
    fn poll(&mut self, args: &CliArgs) -> Result<bool, ConfigError> {
        let Some(on_disk) = self.on_disk.reload(&self.dir)? else {
            return Ok(false);
        };
        let mut effective = on_disk.clone();
        effective.apply_cli_overrides(args);
        self.on_disk = on_disk;
        if effective == self.effective {
            return Ok(false);
        }
        self.effective = effective;
        Ok(true)
    }
}

/// Camera circling the globe while slowly bobbing in latitude and altitude.
struct OrbitCamera {
    radius: f32,
    max_altitude: f32,
    azimuth: f32,
    elevation: f32,
    distance: f32,
    aspect: f32,
}

impl OrbitCamera {
    fn new(radius: f32, max_altitude: f32) -> Self {
        Self {
            radius,
            max_altitude: max_altitude.max(0.3),
            azimuth: 0.0,
            elevation: 0.0,
            distance: radius * (1.0 + max_altitude.max(0.3)),
            aspect: 16.0 / 9.0,
        }
    }

    fn advance(&mut self, frame: u32) {
        let t = frame as f32;
        self.azimuth = (t * 0.015) % TAU;
        self.elevation = 1.2 * (t * 0.004).sin();
        // Swoop between 0.2 radii above the surface and the configured altitude.
        let swoop = 0.5 + 0.5 * (t * 0.01).cos();
        self.distance = self.radius * (1.2 + (self.max_altitude - 0.2) * swoop);
    }

    fn eye(&self) -> Vec3 {
        let (sin_el, cos_el) = self.elevation.sin_cos();
        Vec3::new(cos_el * self.azimuth.cos(), sin_el, cos_el * self.azimuth.sin()) * self.distance
    }

    fn view_projection(&self) -> Mat4 {
        let projection = Mat4::perspective_rh(FRAC_PI_4, self.aspect, self.radius * 0.1, self.radius * 100.0);
        projection * Mat4::look_at_rh(self.eye(), Vec3::ZERO, Vec3::Y)
    }
}

fn main() {
    let args = DemoArgs::parse();

    let config_dir = args
        .common
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let (mut live, load_error) = match LiveConfig::load(config_dir.clone(), &args.common) {
        Ok(live) => (live, None),
        Err(err) => (LiveConfig::with_file(config_dir.clone(), Config::default(), &args.common), Some(err)),
    };

    let log_dir = config_dir.join("logs");
    terra_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&live.effective));
    match load_error {
        None => info!(path = %Config::path_in(&config_dir).display(), "configuration loaded"),
        Some(err) => warn!(error = %err, "failed to load config, using defaults"),
    }
    let mut globe = GlobeTextures::from_config(&live.effective, |_| HeadlessAllocator::new());
    for (layer, manager) in globe.layers() {
        info!(
            %layer,
            status = ?manager.status(),
            rings = manager.grid().rings(),
            segments = manager.grid().segments(),
            "texture layer"
        );
    }
    if !globe.color().is_enabled() {
        warn!(
            base_dir = %live.effective.textures.resolved_base_dir().display(),
            "color layer disabled; pass --texture-dir to point at the textures"
        );
    }

    let mut camera = OrbitCamera::new(live.effective.globe.radius, args.altitude);
    let mut drawn = 0u64;
    let mut skipped = 0u64;

    for frame in 0..args.frames {
        if args.reload_every > 0 && frame > 0 && frame % args.reload_every == 0 {
            match live.poll(&args.common) {
                Ok(true) => {
                    let config = &live.effective;
                    info!(
                        frame,
                        max_resident_tiles = config.tiles.max_resident_tiles,
                        relief_margin = config.tiles.relief_margin,
                        "config changed, rebuilding texture layers"
                    );
                    globe = GlobeTextures::from_config(config, |_| HeadlessAllocator::new());
                    camera = OrbitCamera::new(config.globe.radius, args.altitude);
                }
                Ok(false) => {}
                Err(err) => warn!(error = %err, "config reload failed, keeping current settings"),
            }
        }

        camera.advance(frame);
        let reports = globe.update_visibility(&camera.view_projection());

        let color = globe.color();
        for &coord in color.visible_cells() {
            match globe.bind_for_cell(TextureLayer::Color, coord) {
                TileBinding::Ready { .. } => drawn += 1,
                TileBinding::NotReady => skipped += 1,
            }
        }

        if frame % 60 == 0 {
            let below = color.grid().cell_for_direction(camera.eye());
            for (layer, report) in &reports {
                info!(
                    frame,
                    %layer,
                    %below,
                    altitude = camera.distance / camera.radius - 1.0,
                    visible = report.visible,
                    loaded = report.loaded,
                    evicted = report.evicted,
                    resident = report.resident,
                    "streaming"
                );
            }
        }
    }

    for (layer, manager) in globe.layers() {
        let stats = manager.stats();
        info!(
            %layer,
            loads = stats.loads,
            evictions = stats.evictions,
            decode_failures = stats.decode_failures,
            alloc_failures = stats.alloc_failures,
            resident = stats.resident,
            resident_mib = stats.resident_bytes as f64 / (1024.0 * 1024.0),
            "final residency"
        );
    }
    info!(frames = args.frames, drawn, skipped, "demo finished");
}
