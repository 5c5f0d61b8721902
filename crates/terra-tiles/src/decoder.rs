//! Tile decoding: copies one cell's region out of the source raster as an
//! upload-ready RGBA8 buffer, optionally with a mipmap chain.

use std::sync::Arc;

use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::coord::GridCoordinate;
use crate::error::DecodeError;
use crate::grid::{PixelRect, TileGrid};
use crate::raster::SourceRaster;

/// Decoded pixels of one tile, ready for upload.
#[derive(Debug, Clone)]
pub struct DecodedTile {
    /// Cell the pixels belong to.
    pub coord: GridCoordinate,
    /// Mip level 0, RGBA8, exactly the cell's pixel extent.
    pub image: RgbaImage,
    /// Levels 1.., each half the previous size (empty when mipmaps are off).
    pub mips: Vec<RgbaImage>,
}

impl DecodedTile {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGBA8 bytes of level 0.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Total mip levels including level 0.
    pub fn mip_level_count(&self) -> u32 {
        1 + self.mips.len() as u32
    }

    /// Bytes across all levels.
    pub fn byte_size(&self) -> usize {
        self.image.as_raw().len() + self.mips.iter().map(|m| m.as_raw().len()).sum::<usize>()
    }
}

/// Anything that can produce the pixels of a cell.
pub trait TileSource {
    fn decode(&self, coord: GridCoordinate) -> Result<DecodedTile, DecodeError>;
}

/// Decodes cells of a [`TileGrid`] out of a shared [`SourceRaster`].
///
/// Cheap to clone; clones share the raster, so a decoder can be handed to worker
/// threads.
#[derive(Debug, Clone)]
pub struct TileDecoder {
    raster: Arc<SourceRaster>,
    grid: TileGrid,
    generate_mipmaps: bool,
}

impl TileDecoder {
    pub fn new(raster: Arc<SourceRaster>, grid: TileGrid, generate_mipmaps: bool) -> Self {
        Self {
            raster,
            grid,
            generate_mipmaps,
        }
    }

    pub fn raster(&self) -> &SourceRaster {
        &self.raster
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Pixel region the cell occupies in the raster.
    pub fn pixel_rect(&self, coord: GridCoordinate) -> PixelRect {
        self.grid
            .pixel_rect(coord, self.raster.width(), self.raster.height())
    }
}

impl TileSource for TileDecoder {
    fn decode(&self, coord: GridCoordinate) -> Result<DecodedTile, DecodeError> {
        if !self.grid.contains(coord) {
            return Err(DecodeError::OutOfBounds {
                coord,
                rings: self.grid.rings(),
                segments: self.grid.segments(),
            });
        }

        let rect = self.pixel_rect(coord);
        let (width, height) = self.raster.dimensions();
        if rect.area() == 0 || rect.x >= width || rect.y >= height {
            return Err(DecodeError::EmptyRegion { coord });
        }

        let image = self.raster.region_rgba(rect);
        if image.dimensions() != (rect.width, rect.height) {
            return Err(DecodeError::SizeMismatch {
                coord,
                expected: (rect.width, rect.height),
                actual: image.dimensions(),
            });
        }

        let mips = if self.generate_mipmaps {
            build_mip_chain(&image)
        } else {
            Vec::new()
        };

        Ok(DecodedTile { coord, image, mips })
    }
}

/// Number of mip levels for the given dimensions, including level 0.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Levels 1.. of a mipmap chain, halving (rounding down, min 1) down to 1x1.
fn build_mip_chain(base: &RgbaImage) -> Vec<RgbaImage> {
    let levels = mip_level_count(base.width(), base.height()) as usize;
    let mut chain: Vec<RgbaImage> = Vec::with_capacity(levels.saturating_sub(1));
    for _ in 1..levels {
        let prev = chain.last().unwrap_or(base);
        let w = (prev.width() / 2).max(1);
        let h = (prev.height() / 2).max(1);
        let next = imageops::resize(prev, w, h, FilterType::Triangle);
        chain.push(next);
    }
    chain
}
