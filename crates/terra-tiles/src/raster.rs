//! Immutable source raster backing a tiled texture.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader, RgbaImage};

use crate::error::RasterLoadError;
use crate::grid::PixelRect;

/// A fully decoded source image. Read-only after load; tiles copy regions out
/// of it and convert only those regions to RGBA8.
#[derive(Debug)]
pub struct SourceRaster {
    image: DynamicImage,
    path: PathBuf,
}

impl SourceRaster {
    /// Load a JPEG/PNG raster from disk.
    ///
    /// Decoder allocation limits are disabled: planetary textures routinely
    /// exceed the default limits. With `flip_vertical` the image is mirrored so
    /// that row 0 becomes the bottom edge.
    pub fn load(path: &Path, flip_vertical: bool) -> Result<Self, RasterLoadError> {
        let open_err = |source| RasterLoadError::Open {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = ImageReader::open(path)
            .map_err(open_err)?
            .with_guessed_format()
            .map_err(open_err)?;
        reader.no_limits();

        let image = reader.decode().map_err(|source| RasterLoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let image = if flip_vertical { image.flipv() } else { image };

        Self::with_path(image, path.to_path_buf())
    }

    /// Wrap an in-memory image.
    pub fn from_image(image: DynamicImage) -> Result<Self, RasterLoadError> {
        Self::with_path(image, PathBuf::from("<memory>"))
    }

    fn with_path(image: DynamicImage, path: PathBuf) -> Result<Self, RasterLoadError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RasterLoadError::Empty { path });
        }
        Ok(Self { image, path })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Where the raster was loaded from (`<memory>` for in-memory images).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing pixels are already in the canonical RGBA8 layout.
    pub fn is_rgba8(&self) -> bool {
        matches!(self.image, DynamicImage::ImageRgba8(_))
    }

    /// Copy a region out as RGBA8. The region is clipped to the raster bounds.
    pub fn region_rgba(&self, rect: PixelRect) -> RgbaImage {
        self.image
            .crop_imm(rect.x, rect.y, rect.width, rect.height)
            .into_rgba8()
    }
}
