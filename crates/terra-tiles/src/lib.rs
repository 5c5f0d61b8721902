//! Tiled texture streaming for a globe: grid partitioning, tile decoding,
//! visibility classification, a budgeted texture cache and the per-layer
//! managers that tie them together.

mod allocator;
mod cache;
mod coord;
mod decoder;
mod error;
mod gpu;
mod grid;
mod layers;
mod manager;
mod raster;
mod visibility;
mod worker;

pub use allocator::{HeadlessAllocator, HeadlessTexture, TextureAllocator, TextureHandle};
pub use cache::{CacheStats, TileCache};
pub use coord::GridCoordinate;
pub use decoder::{DecodedTile, TileDecoder, TileSource, mip_level_count};
pub use error::{AllocError, DecodeError, RasterLoadError, TileError};
pub use gpu::{TILE_FORMAT, TileTexture, TileTextureRegistry, WgpuTileAllocator};
pub use grid::{
    AngularRect, CellBounds, GridLayout, PixelRect, TileGrid, TileMetadata, UvRect, direction_from_angles,
};
pub use layers::{GlobeTextures, TextureLayer};
pub use manager::{ManagerSettings, ManagerStatus, TileBinding, TileTextureManager, VisibilityReport};
pub use raster::SourceRaster;
pub use visibility::{ViewState, VisibilityClassifier, VisibilityParams, eye_from_view_projection};
pub use worker::{DecodeResult, DecodeWorker};
