//! Error types for raster loading, tile decoding and GPU resource creation.
//!
//! None of these cross the [`TileTextureManager`](crate::TileTextureManager)
//! boundary: the manager logs them and reports the affected cell as not ready.

use std::path::PathBuf;

use crate::coord::GridCoordinate;

/// The source raster could not be loaded. Fatal to the owning manager.
#[derive(Debug, thiserror::Error)]
pub enum RasterLoadError {
    /// The file could not be opened or its format not detected.
    #[error("failed to open raster {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The image decoder rejected the file.
    #[error("failed to decode raster {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The raster decoded to zero width or height.
    #[error("raster {path} is empty")]
    Empty { path: PathBuf },
}

/// One tile could not be decoded. Local to that cell; retried on the next pass.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The coordinate lies outside the grid.
    #[error("tile {coord} is outside the {rings}x{segments} grid")]
    OutOfBounds {
        coord: GridCoordinate,
        rings: u32,
        segments: u32,
    },

    /// The requested region has no pixels inside the raster.
    #[error("tile {coord} maps to an empty raster region")]
    EmptyRegion { coord: GridCoordinate },

    /// The decoded buffer does not match the declared tile extent.
    #[error("tile {coord} decoded to {actual:?}, expected {expected:?}")]
    SizeMismatch {
        coord: GridCoordinate,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// A GPU texture could not be created for a decoded tile.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// Width or height is zero.
    #[error("texture dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },

    /// Pixel data length doesn't match the expected size.
    #[error("texture data size ({actual}) does not match expected ({expected}) for {width}x{height}")]
    DataSizeMismatch {
        actual: usize,
        expected: usize,
        width: u32,
        height: u32,
    },

    /// The tile exceeds the device's maximum 2D texture dimension.
    #[error("tile of {width}x{height} exceeds the maximum texture dimension {max}")]
    TooLarge { width: u32, height: u32, max: u32 },

    /// The allocator is out of handles or memory.
    #[error("texture allocator exhausted ({live} live textures)")]
    Exhausted { live: usize },
}

/// Failure to bring one tile into residency.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Alloc(#[from] AllocError),
}
