//! Per-layer orchestration: classify, load, bind.
//!
//! A [`TileTextureManager`] owns one source raster, its grid, a visibility
//! classifier and a tile cache. The renderer calls
//! [`update_visibility`](TileTextureManager::update_visibility) once per frame
//! and then [`bind_for_cell`](TileTextureManager::bind_for_cell) for every cell it
//! draws, skipping cells that are not ready. Nothing here returns an error or
//! blocks on I/O: failures are logged and the cell stays not ready until a
//! later pass succeeds.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use glam::Mat4;
use rustc_hash::FxHashSet;
use terra_config::{Config, LoadMode, TileConfig};
use tracing::{debug, info, warn};

use crate::allocator::{TextureAllocator, TextureHandle};
use crate::cache::{CacheStats, TileCache};
use crate::coord::GridCoordinate;
use crate::decoder::TileDecoder;
use crate::error::TileError;
use crate::grid::{TileGrid, TileMetadata};
use crate::raster::SourceRaster;
use crate::visibility::{ViewState, VisibilityClassifier, VisibilityParams};
use crate::worker::DecodeWorker;

/// Everything a manager needs besides the raster and the allocator.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerSettings {
    pub rings: u32,
    pub segments: u32,
    pub tiles: TileConfig,
    pub visibility: VisibilityParams,
    pub flip_vertical: bool,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rings: config.globe.rings,
            segments: config.globe.segments,
            tiles: config.tiles.clone(),
            visibility: VisibilityParams {
                radius: config.globe.radius,
                relief_margin: config.tiles.relief_margin,
                proximity_threshold: config.tiles.proximity_threshold,
                horizon_culling: config.tiles.horizon_culling,
            },
            flip_vertical: config.textures.flip_vertical,
        }
    }

    fn grid_for(&self, width: u32, height: u32) -> TileGrid {
        match self.tiles.tile_size {
            Some(tile_size) => TileGrid::with_tile_size(width, height, tile_size),
            None => TileGrid::new(self.rings, self.segments),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What the renderer should do with a cell this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TileBinding {
    /// Bind `handle` and sample with `metadata`.
    Ready {
        handle: TextureHandle,
        metadata: TileMetadata,
    },
    /// Skip the cell this frame.
    NotReady,
}

impl TileBinding {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        match self {
            Self::Ready { handle, .. } => Some(*handle),
            Self::NotReady => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagerStatus {
    Ready,
    /// The source raster could not be loaded; every cell is permanently not ready.
    Disabled { reason: String },
}

/// Outcome of one visibility pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VisibilityReport {
    /// Cells classified visible.
    pub visible: usize,
    /// Tiles uploaded during this pass.
    pub loaded: usize,
    /// Tiles that failed to decode or upload during this pass.
    pub failed: usize,
    /// Tiles evicted during this pass.
    pub evicted: u64,
    /// Background decodes still outstanding.
    pub pending: usize,
    /// Tiles resident after the pass.
    pub resident: usize,
}

enum Loader {
    Disabled,
    Immediate(TileDecoder),
    Background(DecodeWorker),
}

/// Streams the tiles of one texture layer.
pub struct TileTextureManager {
    label: String,
    settings: ManagerSettings,
    grid: TileGrid,
    classifier: VisibilityClassifier,
    cache: TileCache,
    loader: Loader,
    status: ManagerStatus,
    /// Cells whose last load attempt failed.
    failing: FxHashSet<GridCoordinate>,
    /// Cells submitted to the decode worker and not yet drained.
    requested: FxHashSet<GridCoordinate>,
    visible: Vec<GridCoordinate>,
}

impl TileTextureManager {
    /// Load the raster at `path` and set up streaming for it.
    ///
    /// A raster that fails to load produces a disabled manager; see
    /// [`status`](Self::status).
    pub fn new(
        label: impl Into<String>,
        path: &Path,
        settings: ManagerSettings,
        allocator: impl TextureAllocator + Send + 'static,
    ) -> Self {
        let label = label.into();
        match SourceRaster::load(path, settings.flip_vertical) {
            Ok(raster) => Self::from_raster(label, raster, settings, allocator),
            Err(err) => {
                warn!(layer = %label, error = %err, "texture layer disabled");
                let grid = TileGrid::new(settings.rings, settings.segments);
                Self::assemble(
                    label,
                    settings,
                    grid,
                    Box::new(allocator),
                    Loader::Disabled,
                    ManagerStatus::Disabled {
                        reason: err.to_string(),
                    },
                )
            }
        }
    }

    /// Stream tiles out of an already loaded raster.
    pub fn from_raster(
        label: impl Into<String>,
        raster: SourceRaster,
        settings: ManagerSettings,
        allocator: impl TextureAllocator + Send + 'static,
    ) -> Self {
        let label = label.into();
        let (width, height) = raster.dimensions();
        let grid = settings.grid_for(width, height);
        info!(
            layer = %label,
            path = %raster.path().display(),
            width,
            height,
            rings = grid.rings(),
            segments = grid.segments(),
            budget = settings.tiles.max_resident_tiles,
            "texture layer ready"
        );

        let decoder = TileDecoder::new(Arc::new(raster), grid, settings.tiles.generate_mipmaps);
        let loader = match settings.tiles.load_mode {
            LoadMode::Immediate => Loader::Immediate(decoder),
            LoadMode::Background => {
                let capacity = grid.cell_count().max(64);
                match DecodeWorker::new(decoder.clone(), settings.tiles.decode_threads, capacity) {
                    Ok(worker) => Loader::Background(worker),
                    Err(err) => {
                        warn!(layer = %label, error = %err, "falling back to immediate decoding");
                        Loader::Immediate(decoder)
                    }
                }
            }
        };

        Self::assemble(label, settings, grid, Box::new(allocator), loader, ManagerStatus::Ready)
    }

    fn assemble(
        label: String,
        settings: ManagerSettings,
        grid: TileGrid,
        allocator: Box<dyn TextureAllocator + Send>,
        loader: Loader,
        status: ManagerStatus,
    ) -> Self {
        Self {
            label,
            classifier: VisibilityClassifier::new(settings.visibility),
            cache: TileCache::with_boxed_allocator(allocator, settings.tiles.max_resident_tiles),
            settings,
            grid,
            loader,
            status,
            failing: FxHashSet::default(),
            requested: FxHashSet::default(),
            visible: Vec::new(),
        }
    }

    /// Classify every cell against `view_projection`, then load what became
    /// visible. Must run before any `bind_for_cell` call in the same frame.
    pub fn update_visibility(&mut self, view_projection: &Mat4) -> VisibilityReport {
        self.update_visibility_from(&ViewState::from_view_projection(*view_projection))
    }

    /// Like [`update_visibility`](Self::update_visibility) with an explicit eye.
    pub fn update_visibility_from(&mut self, view: &ViewState) -> VisibilityReport {
        if matches!(self.loader, Loader::Disabled) {
            return VisibilityReport::default();
        }

        let visible: Vec<_> = self
            .grid
            .coords()
            .filter(|&coord| {
                self.classifier
                    .is_visible(&self.grid.cell_bounds(coord).angular, view)
            })
            .collect();

        let evictions_before = self.cache.stats().evictions;
        let missing = self.cache.mark_visible(visible.iter().copied());

        let mut report = VisibilityReport {
            visible: visible.len(),
            ..Default::default()
        };

        match &self.loader {
            Loader::Disabled => {}
            Loader::Immediate(decoder) => {
                for coord in missing {
                    match self.cache.ensure_loaded(coord, decoder) {
                        Ok(_) => {
                            report.loaded += 1;
                            self.failing.remove(&coord);
                        }
                        Err(err) => {
                            report.failed += 1;
                            note_failure(&self.label, &mut self.failing, coord, &err);
                        }
                    }
                }
            }
            Loader::Background(worker) => {
                let cache = &self.cache;
                self.requested.retain(|&coord| {
                    let keep = cache.is_visible(coord) && worker.is_pending(coord);
                    if !keep {
                        worker.cancel(coord);
                    }
                    keep
                });
                for coord in missing {
                    if worker.submit(coord) {
                        self.requested.insert(coord);
                    }
                }

                let max_uploads = self.settings.tiles.max_uploads_per_frame.max(1);
                for result in worker.drain(max_uploads) {
                    let coord = result.coord;
                    self.requested.remove(&coord);
                    if !cache.is_visible(coord) {
                        continue;
                    }
                    let uploaded = match result.tile {
                        Ok(tile) => cache.insert_decoded(&tile).map_err(TileError::from),
                        Err(err) => {
                            cache.record_decode_failure();
                            Err(TileError::from(err))
                        }
                    };
                    match uploaded {
                        Ok(_) => {
                            report.loaded += 1;
                            self.failing.remove(&coord);
                        }
                        Err(err) => {
                            report.failed += 1;
                            note_failure(&self.label, &mut self.failing, coord, &err);
                        }
                    }
                }
                report.pending = worker.pending_count();
            }
        }

        report.evicted = self.cache.stats().evictions - evictions_before;
        report.resident = self.cache.len();
        self.visible = visible;

        debug!(
            layer = %self.label,
            visible = report.visible,
            loaded = report.loaded,
            failed = report.failed,
            evicted = report.evicted,
            resident = report.resident,
            "visibility pass"
        );
        report
    }

    /// Texture and metadata for `coord`, or [`TileBinding::NotReady`].
    pub fn bind_for_cell(&self, coord: GridCoordinate) -> TileBinding {
        match (self.cache.get(coord), self.grid.metadata(coord)) {
            (Some(handle), Some(metadata)) => TileBinding::Ready { handle, metadata },
            _ => TileBinding::NotReady,
        }
    }

    /// [`bind_for_cell`](Self::bind_for_cell) for the cell enclosing a texture
    /// coordinate. Coordinates outside `[0, 1]` are clamped.
    pub fn bind_for_uv(&self, u: f32, v: f32) -> TileBinding {
        self.bind_for_cell(self.grid.cell_for_uv(u, v))
    }

    pub fn metadata_for_cell(&self, coord: GridCoordinate) -> Option<TileMetadata> {
        self.grid.metadata(coord)
    }

    /// Metadata of every cell in row-major order.
    pub fn all_metadata(&self) -> Vec<(GridCoordinate, TileMetadata)> {
        self.grid
            .coords()
            .filter_map(|coord| self.grid.metadata(coord).map(|m| (coord, m)))
            .collect()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> &ManagerStatus {
        &self.status
    }

    pub fn is_enabled(&self) -> bool {
        self.status == ManagerStatus::Ready
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Visible set of the latest pass, row-major.
    pub fn visible_cells(&self) -> &[GridCoordinate] {
        &self.visible
    }
}

/// Warn on the first failure of a cell, then only at debug level until it loads.
fn note_failure(label: &str, failing: &mut FxHashSet<GridCoordinate>, coord: GridCoordinate, err: &dyn Error) {
    if failing.insert(coord) {
        warn!(layer = %label, %coord, error = %err, "tile not ready");
    } else {
        debug!(layer = %label, %coord, error = %err, "tile still not ready");
    }
}
