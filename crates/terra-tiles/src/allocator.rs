//! The seam between the tile cache and whatever owns GPU textures.
//!
//! The cache never interprets a [`TextureHandle`]; it only creates one per
//! resident tile and destroys it exactly once on eviction or teardown.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::decoder::DecodedTile;
use crate::error::AllocError;

/// Opaque identifier for a texture created by a [`TextureAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Creates and destroys textures for decoded tiles.
pub trait TextureAllocator {
    /// Create a texture holding every mip level of `tile`.
    fn create(&mut self, tile: &DecodedTile) -> Result<TextureHandle, AllocError>;

    /// Release a texture. Unknown handles are ignored.
    fn destroy(&mut self, handle: TextureHandle);
}

/// Validate a decoded tile before handing it to a backend.
pub(crate) fn validate_tile(tile: &DecodedTile) -> Result<(), AllocError> {
    let (width, height) = (tile.width(), tile.height());
    if width == 0 || height == 0 {
        return Err(AllocError::ZeroDimensions { width, height });
    }
    let expected = width as usize * height as usize * 4;
    let actual = tile.pixels().len();
    if actual != expected {
        return Err(AllocError::DataSizeMismatch {
            actual,
            expected,
            width,
            height,
        });
    }
    Ok(())
}

/// Size and level count of a texture held by a [`HeadlessAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadlessTexture {
    pub width: u32,
    pub height: u32,
    pub mip_level_count: u32,
    pub bytes: usize,
}

/// CPU-only allocator: hands out sequential handles and records what each one
/// would hold on the GPU. Used by the demo and by tests.
#[derive(Debug, Default)]
pub struct HeadlessAllocator {
    next_id: u64,
    live: FxHashMap<TextureHandle, HeadlessTexture>,
    capacity: Option<usize>,
    created: u64,
    destroyed: u64,
}

impl HeadlessAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`AllocError::Exhausted`] once `capacity` textures are live.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, handle: TextureHandle) -> bool {
        self.live.contains_key(&handle)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&HeadlessTexture> {
        self.live.get(&handle)
    }

    /// Total textures ever created.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Total textures destroyed through a known handle.
    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }
}

impl TextureAllocator for HeadlessAllocator {
    fn create(&mut self, tile: &DecodedTile) -> Result<TextureHandle, AllocError> {
        validate_tile(tile)?;
        if let Some(capacity) = self.capacity
            && self.live.len() >= capacity
        {
            return Err(AllocError::Exhausted {
                live: self.live.len(),
            });
        }

        self.next_id += 1;
        let handle = TextureHandle(self.next_id);
        self.live.insert(
            handle,
            HeadlessTexture {
                width: tile.width(),
                height: tile.height(),
                mip_level_count: tile.mip_level_count(),
                bytes: tile.byte_size(),
            },
        );
        self.created += 1;
        Ok(handle)
    }

    fn destroy(&mut self, handle: TextureHandle) {
        if self.live.remove(&handle).is_some() {
            self.destroyed += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::coord::GridCoordinate;
    use image::{Rgba, RgbaImage};

    /// A solid tile of the given size, for tests across the crate.
    pub(crate) fn solid_tile(coord: GridCoordinate, width: u32, height: u32) -> DecodedTile {
        DecodedTile {
            coord,
            image: RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255])),
            mips: Vec::new(),
        }
    }

    #[test]
    fn test_handles_are_unique() {
        let mut alloc = HeadlessAllocator::new();
        let a = alloc.create(&solid_tile(GridCoordinate::new(0, 0), 4, 4)).unwrap();
        let b = alloc.create(&solid_tile(GridCoordinate::new(0, 1), 4, 4)).unwrap();
        assert_ne!(a, b);
        assert_eq!(alloc.live_count(), 2);
        assert_eq!(alloc.texture(a).map(|t| t.bytes), Some(64));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut alloc = HeadlessAllocator::new();
        let handle = alloc.create(&solid_tile(GridCoordinate::new(0, 0), 2, 2)).unwrap();
        alloc.destroy(handle);
        alloc.destroy(handle);
        alloc.destroy(TextureHandle(999));
        assert!(!alloc.is_live(handle));
        assert_eq!(alloc.destroyed(), 1);
    }

    #[test]
    fn test_capacity_limit_reports_exhaustion() {
        let mut alloc = HeadlessAllocator::with_capacity_limit(1);
        alloc.create(&solid_tile(GridCoordinate::new(0, 0), 2, 2)).unwrap();
        let err = alloc.create(&solid_tile(GridCoordinate::new(0, 1), 2, 2));
        assert!(matches!(err, Err(AllocError::Exhausted { live: 1 })));
    }

    #[test]
    fn test_rejects_malformed_tiles() {
        let mut alloc = HeadlessAllocator::new();
        let empty = solid_tile(GridCoordinate::new(0, 0), 0, 0);
        assert!(matches!(alloc.create(&empty), Err(AllocError::ZeroDimensions { .. })));
        assert_eq!(alloc.created(), 0);
    }
}
