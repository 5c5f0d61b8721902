//! Tile partition of an equirectangular texture.
//!
//! Maps a [`GridCoordinate`] to its UV rectangle, its spherical angular
//! rectangle and its pixel region, and maps continuous UV coordinates or
//! directions back to the enclosing cell. Pure geometry: out-of-range inputs are
//! clamped, never rejected.

use std::f32::consts::{PI, TAU};

use glam::{Vec2, Vec3, Vec4};

use crate::coord::GridCoordinate;

/// How the texture is partitioned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridLayout {
    /// Fixed number of latitude and longitude bands.
    Bands,
    /// Fixed pixel tiles over a raster of known size. The last row and column
    /// shrink when the raster is not a multiple of `tile_size`.
    PixelTiles {
        /// Edge length of a full tile in pixels.
        tile_size: u32,
        /// Raster width in pixels.
        width: u32,
        /// Raster height in pixels.
        height: u32,
    },
}

/// Normalized texture-space rectangle, `[u0, u1) x [v0, v1)` inside `[0,1]^2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl UvRect {
    pub fn width(&self) -> f32 {
        self.u1 - self.u0
    }

    pub fn height(&self) -> f32 {
        self.v1 - self.v0
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new((self.u0 + self.u1) * 0.5, (self.v0 + self.v1) * 0.5)
    }
}

/// Spherical rectangle: polar angle `phi` from +Y in `[0, π]`, azimuth `theta`
/// in `[0, 2π]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngularRect {
    pub phi0: f32,
    pub theta0: f32,
    pub phi1: f32,
    pub theta1: f32,
}

impl AngularRect {
    /// Angular centre `(phi, theta)`.
    pub fn center(&self) -> (f32, f32) {
        ((self.phi0 + self.phi1) * 0.5, (self.theta0 + self.theta1) * 0.5)
    }
}

/// Region of the source raster covered by a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Both derived rectangles of a cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellBounds {
    pub uv: UvRect,
    pub angular: AngularRect,
}

/// Offset and scale of a cell inside the full texture, as consumed by a shader
/// remapping global UVs into tile-local UVs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileMetadata {
    /// UV of the cell's minimum corner.
    pub offset: Vec2,
    /// UV extent of the cell.
    pub scale: Vec2,
}

impl TileMetadata {
    /// Metadata covering the whole texture.
    pub const FULL: Self = Self {
        offset: Vec2::ZERO,
        scale: Vec2::ONE,
    };

    /// Packed as `(offset.x, offset.y, scale.x, scale.y)`.
    pub fn as_vec4(&self) -> Vec4 {
        Vec4::new(self.offset.x, self.offset.y, self.scale.x, self.scale.y)
    }

    /// Map a global UV into this cell's local `[0,1]^2` space.
    pub fn to_local(&self, uv: Vec2) -> Vec2 {
        (uv - self.offset) / self.scale
    }
}

/// Unit direction for spherical angles, `x = sinφ cosθ`, `y = cosφ`, `z = sinφ sinθ`.
pub fn direction_from_angles(phi: f32, theta: f32) -> Vec3 {
    let (sin_phi, cos_phi) = phi.sin_cos();
    let (sin_theta, cos_theta) = theta.sin_cos();
    Vec3::new(sin_phi * cos_theta, cos_phi, sin_phi * sin_theta)
}

/// Fixed partition of a texture into `rings x segments` cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    rings: u32,
    segments: u32,
    layout: GridLayout,
}

impl TileGrid {
    /// Partition into `rings` latitude bands and `segments` longitude bands.
    ///
    /// Zero counts are raised to one.
    pub fn new(rings: u32, segments: u32) -> Self {
        Self {
            rings: rings.max(1),
            segments: segments.max(1),
            layout: GridLayout::Bands,
        }
    }

    /// Partition a `width x height` raster into `tile_size` pixel tiles.
    pub fn with_tile_size(width: u32, height: u32, tile_size: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let tile_size = tile_size.max(1);
        Self {
            rings: height.div_ceil(tile_size),
            segments: width.div_ceil(tile_size),
            layout: GridLayout::PixelTiles {
                tile_size,
                width,
                height,
            },
        }
    }

    pub fn rings(&self) -> u32 {
        self.rings
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.rings as usize * self.segments as usize
    }

    /// Whether `coord` addresses a cell of this grid.
    pub fn contains(&self, coord: GridCoordinate) -> bool {
        coord.ring < self.rings && coord.segment < self.segments
    }

    /// Clamp `coord` into the grid.
    pub fn clamp(&self, coord: GridCoordinate) -> GridCoordinate {
        GridCoordinate::new(
            coord.ring.min(self.rings - 1),
            coord.segment.min(self.segments - 1),
        )
    }

    /// All cells in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = GridCoordinate> + use<> {
        let segments = self.segments;
        (0..self.rings)
            .flat_map(move |ring| (0..segments).map(move |segment| GridCoordinate::new(ring, segment)))
    }

    /// UV and angular rectangles of a cell. Out-of-range coordinates are clamped.
    pub fn cell_bounds(&self, coord: GridCoordinate) -> CellBounds {
        let uv = self.uv_rect(coord);
        CellBounds {
            uv,
            angular: AngularRect {
                phi0: uv.v0 * PI,
                theta0: uv.u0 * TAU,
                phi1: uv.v1 * PI,
                theta1: uv.u1 * TAU,
            },
        }
    }

    /// Normalized UV rectangle of a cell.
    pub fn uv_rect(&self, coord: GridCoordinate) -> UvRect {
        let coord = self.clamp(coord);
        let (s, r) = (coord.segment, coord.ring);
        match self.layout {
            GridLayout::Bands => UvRect {
                u0: band_edge(s, self.segments),
                v0: band_edge(r, self.rings),
                u1: band_edge(s + 1, self.segments),
                v1: band_edge(r + 1, self.rings),
            },
            GridLayout::PixelTiles {
                tile_size,
                width,
                height,
            } => UvRect {
                u0: pixel_edge(s, tile_size, width),
                v0: pixel_edge(r, tile_size, height),
                u1: pixel_edge(s + 1, tile_size, width),
                v1: pixel_edge(r + 1, tile_size, height),
            },
        }
    }

    /// Region of a `raster_width x raster_height` raster covered by a cell.
    ///
    /// Never empty for a non-empty raster: edge tiles shrink to
    /// `min(tile_size, extent - origin)`, and band partitions of rasters smaller
    /// than the grid fall back to a single pixel.
    pub fn pixel_rect(&self, coord: GridCoordinate, raster_width: u32, raster_height: u32) -> PixelRect {
        let coord = self.clamp(coord);
        let raster_width = raster_width.max(1);
        let raster_height = raster_height.max(1);
        let (x, width) = match self.layout {
            GridLayout::Bands => band_span(coord.segment, self.segments, raster_width),
            GridLayout::PixelTiles { tile_size, .. } => tile_span(coord.segment, tile_size, raster_width),
        };
        let (y, height) = match self.layout {
            GridLayout::Bands => band_span(coord.ring, self.rings, raster_height),
            GridLayout::PixelTiles { tile_size, .. } => tile_span(coord.ring, tile_size, raster_height),
        };
        PixelRect { x, y, width, height }
    }

    /// Cell enclosing a UV coordinate. Inputs are clamped to `[0,1]` first.
    pub fn cell_for_uv(&self, u: f32, v: f32) -> GridCoordinate {
        let u = clamp_unit(u);
        let v = clamp_unit(v);
        let (segment, ring) = match self.layout {
            GridLayout::Bands => (
                (u * self.segments as f32).floor() as u32,
                (v * self.rings as f32).floor() as u32,
            ),
            GridLayout::PixelTiles {
                tile_size,
                width,
                height,
            } => (
                ((u as f64 * width as f64) / tile_size as f64).floor() as u32,
                ((v as f64 * height as f64) / tile_size as f64).floor() as u32,
            ),
        };
        self.clamp(GridCoordinate::new(ring, segment))
    }

    /// Cell whose angular rectangle contains the direction `dir` (from the globe
    /// centre). A zero vector maps to the north pole.
    pub fn cell_for_direction(&self, dir: Vec3) -> GridCoordinate {
        let dir = dir.normalize_or_zero();
        if dir == Vec3::ZERO {
            return self.cell_for_uv(0.0, 0.0);
        }
        let phi = dir.y.clamp(-1.0, 1.0).acos();
        let theta = dir.z.atan2(dir.x).rem_euclid(TAU);
        self.cell_for_uv(theta / TAU, phi / PI)
    }

    /// Offset/scale metadata of a cell, or `None` outside the grid.
    pub fn metadata(&self, coord: GridCoordinate) -> Option<TileMetadata> {
        if !self.contains(coord) {
            return None;
        }
        let uv = self.uv_rect(coord);
        Some(TileMetadata {
            offset: Vec2::new(uv.u0, uv.v0),
            scale: Vec2::new(uv.width(), uv.height()),
        })
    }
}

fn clamp_unit(x: f32) -> f32 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

fn band_edge(index: u32, count: u32) -> f32 {
    (index as f64 / count as f64) as f32
}

fn pixel_edge(index: u32, tile_size: u32, extent: u32) -> f32 {
    let px = (index as u64 * tile_size as u64).min(extent as u64);
    (px as f64 / extent as f64) as f32
}

fn band_span(index: u32, count: u32, extent: u32) -> (u32, u32) {
    let start = (index as u64 * extent as u64 / count as u64) as u32;
    let end = ((index as u64 + 1) * extent as u64 / count as u64) as u32;
    if end > start {
        (start, end - start)
    } else {
        (start.min(extent - 1), 1)
    }
}

fn tile_span(index: u32, tile_size: u32, extent: u32) -> (u32, u32) {
    let start = (index as u64 * tile_size as u64).min(extent as u64 - 1) as u32;
    (start, tile_size.min(extent - start))
}
