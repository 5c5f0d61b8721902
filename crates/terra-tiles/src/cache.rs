//! Residency cache for tile textures.
//!
//! [`TileCache`] maps grid coordinates to GPU textures created through a
//! [`TextureAllocator`] and is the only owner of those textures. The residency
//! budget is soft: visible tiles are always admitted, and only tiles outside the
//! latest visible set are evicted to make room. Once loads for a pass have
//! settled, `len() <= max(budget, visible_count())`.
//!
//! All state sits behind one mutex so that decoding can happen on other threads
//! while the render thread uploads and binds.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::allocator::{TextureAllocator, TextureHandle};
use crate::coord::GridCoordinate;
use crate::decoder::{DecodedTile, TileSource};
use crate::error::{AllocError, TileError};

/// Counters describing cache activity since construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Tiles uploaded.
    pub loads: u64,
    /// Tiles destroyed, whether by budget pressure or explicit eviction.
    pub evictions: u64,
    pub decode_failures: u64,
    pub alloc_failures: u64,
    /// Tiles resident right now.
    pub resident: usize,
    /// Bytes across all resident tiles and their mip levels.
    pub resident_bytes: usize,
}

/// A resident tile. Owns its texture until evicted.
#[derive(Debug)]
struct Tile {
    handle: TextureHandle,
    bytes: usize,
    /// Visibility pass in which the tile was last in the visible set.
    last_visible: u64,
}

struct CacheState {
    allocator: Box<dyn TextureAllocator + Send>,
    tiles: FxHashMap<GridCoordinate, Tile>,
    visible: FxHashSet<GridCoordinate>,
    pass: u64,
    stats: CacheStats,
}

impl CacheState {
    /// Least-recently-visible tile outside the visible set, other than `keep`.
    /// Ties go to the smaller coordinate so eviction order is deterministic.
    fn eviction_candidate(&self, keep: Option<GridCoordinate>) -> Option<GridCoordinate> {
        self.tiles
            .iter()
            .filter(|&(coord, _)| !self.visible.contains(coord) && Some(*coord) != keep)
            .min_by_key(|&(coord, tile)| (tile.last_visible, *coord))
            .map(|(coord, _)| *coord)
    }

    fn remove(&mut self, coord: GridCoordinate) -> bool {
        let Some(tile) = self.tiles.remove(&coord) else {
            return false;
        };
        self.allocator.destroy(tile.handle);
        self.stats.evictions += 1;
        self.stats.resident_bytes -= tile.bytes;
        debug!(%coord, handle = %tile.handle, "evicted tile");
        true
    }

    /// Evict non-visible tiles other than `keep` until at most `limit` remain or
    /// none qualify.
    fn evict_down_to(&mut self, limit: usize, keep: Option<GridCoordinate>) {
        while self.tiles.len() > limit {
            let Some(coord) = self.eviction_candidate(keep) else {
                break;
            };
            self.remove(coord);
        }
    }

    /// Create a texture for `tile`. An exhausted allocator gets one retry after
    /// the best eviction candidate is released.
    fn create(&mut self, tile: &DecodedTile) -> Result<TextureHandle, AllocError> {
        let err = match self.allocator.create(tile) {
            Ok(handle) => return Ok(handle),
            Err(err) => err,
        };
        if let AllocError::Exhausted { .. } = err
            && let Some(coord) = self.eviction_candidate(None)
        {
            self.remove(coord);
            return self.allocator.create(tile);
        }
        Err(err)
    }
}

/// Bounded map from grid coordinate to texture handle.
pub struct TileCache {
    budget: usize,
    state: Mutex<CacheState>,
}

impl TileCache {
    /// Create a cache that keeps about `budget` tiles resident. A budget of zero
    /// is raised to one.
    pub fn new(allocator: impl TextureAllocator + Send + 'static, budget: usize) -> Self {
        Self::with_boxed_allocator(Box::new(allocator), budget)
    }

    pub fn with_boxed_allocator(allocator: Box<dyn TextureAllocator + Send>, budget: usize) -> Self {
        Self {
            budget: budget.max(1),
            state: Mutex::new(CacheState {
                allocator,
                tiles: FxHashMap::default(),
                visible: FxHashSet::default(),
                pass: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.lock().tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tiles.is_empty()
    }

    pub fn contains(&self, coord: GridCoordinate) -> bool {
        self.lock().tiles.contains_key(&coord)
    }

    /// Texture handle for `coord` if resident.
    pub fn get(&self, coord: GridCoordinate) -> Option<TextureHandle> {
        self.lock().tiles.get(&coord).map(|tile| tile.handle)
    }

    /// Make `coord` resident, decoding it from `source` if necessary.
    ///
    /// Decoding runs without holding the lock.
    pub fn ensure_loaded(
        &self,
        coord: GridCoordinate,
        source: &dyn TileSource,
    ) -> Result<TextureHandle, TileError> {
        if let Some(handle) = self.get(coord) {
            return Ok(handle);
        }
        let tile = source.decode(coord).inspect_err(|_| self.record_decode_failure())?;
        Ok(self.insert_decoded(&tile)?)
    }

    /// Upload an already decoded tile. If the coordinate became resident in the
    /// meantime the existing handle is returned and nothing is uploaded.
    ///
    /// Budget eviction happens only after the upload succeeds, so a failed
    /// upload leaves residency untouched.
    pub fn insert_decoded(&self, tile: &DecodedTile) -> Result<TextureHandle, AllocError> {
        let mut state = self.lock();
        if let Some(existing) = state.tiles.get(&tile.coord) {
            return Ok(existing.handle);
        }

        let handle = match state.create(tile) {
            Ok(handle) => handle,
            Err(err) => {
                state.stats.alloc_failures += 1;
                return Err(err);
            }
        };
        let bytes = tile.byte_size();
        let last_visible = state.pass;
        state.tiles.insert(
            tile.coord,
            Tile {
                handle,
                bytes,
                last_visible,
            },
        );
        state.stats.loads += 1;
        state.stats.resident_bytes += bytes;
        state.evict_down_to(self.budget, Some(tile.coord));
        debug!(coord = %tile.coord, %handle, width = tile.width(), height = tile.height(), "loaded tile");
        Ok(handle)
    }

    /// Replace the visible set with `visible` and return the visible coordinates
    /// that are not resident, in the order given.
    ///
    /// Tiles that dropped out of view stay resident until budget pressure evicts
    /// them; any excess over the budget is trimmed here.
    pub fn mark_visible<I>(&self, visible: I) -> Vec<GridCoordinate>
    where
        I: IntoIterator<Item = GridCoordinate>,
    {
        let mut state = self.lock();
        state.pass += 1;
        let pass = state.pass;

        let mut set = FxHashSet::default();
        let mut missing = Vec::new();
        for coord in visible {
            if !set.insert(coord) {
                continue;
            }
            match state.tiles.get_mut(&coord) {
                Some(tile) => tile.last_visible = pass,
                None => missing.push(coord),
            }
        }
        state.visible = set;
        state.evict_down_to(self.budget, None);
        missing
    }

    /// Destroy the tile at `coord`. Returns `false` if it was not resident.
    pub fn evict(&self, coord: GridCoordinate) -> bool {
        self.lock().remove(coord)
    }

    /// Destroy every resident tile.
    pub fn clear(&self) {
        let mut state = self.lock();
        let coords: Vec<_> = state.tiles.keys().copied().collect();
        for coord in coords {
            state.remove(coord);
        }
    }

    pub fn is_visible(&self, coord: GridCoordinate) -> bool {
        self.lock().visible.contains(&coord)
    }

    pub fn visible_count(&self) -> usize {
        self.lock().visible.len()
    }

    /// Resident coordinates in row-major order.
    pub fn resident(&self) -> Vec<GridCoordinate> {
        let mut coords: Vec<_> = self.lock().tiles.keys().copied().collect();
        coords.sort_unstable();
        coords
    }

    pub fn record_decode_failure(&self) {
        self.lock().stats.decode_failures += 1;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            resident: state.tiles.len(),
            ..state.stats
        }
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, tile) in state.tiles.drain() {
            state.allocator.destroy(tile.handle);
        }
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("budget", &self.budget)
            .field("stats", &self.stats())
            .finish()
    }
}
