//! The set of texture layers draped over the globe.

use std::fmt;
use std::path::Path;

use glam::Mat4;
use terra_config::Config;
use tracing::info;

use crate::allocator::TextureAllocator;
use crate::coord::GridCoordinate;
use crate::manager::{ManagerSettings, TileBinding, TileTextureManager, VisibilityReport};
use crate::raster::SourceRaster;
use crate::visibility::ViewState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureLayer {
    Color,
    Height,
    Normal,
}

impl TextureLayer {
    pub const ALL: [Self; 3] = [Self::Color, Self::Height, Self::Normal];

    pub fn name(self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Height => "height",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for TextureLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Color map plus optional height and normal maps, each streamed by its own
/// [`TileTextureManager`].
///
/// The color layer always exists, though it may be disabled. Height and normal
/// layers are absent when not configured or when their raster fails to load.
pub struct GlobeTextures {
    color: TileTextureManager,
    height: Option<TileTextureManager>,
    normal: Option<TileTextureManager>,
}

impl GlobeTextures {
    /// Build every configured layer, asking `make_allocator` for one allocator
    /// per layer.
    pub fn from_config<A, F>(config: &Config, mut make_allocator: F) -> Self
    where
        A: TextureAllocator + Send + 'static,
        F: FnMut(TextureLayer) -> A,
    {
        let settings = ManagerSettings::from_config(config);
        let textures = &config.textures;

        let color_path = textures.resolve(&textures.color);
        let color = TileTextureManager::new(
            TextureLayer::Color.name(),
            &color_path,
            settings.clone(),
            make_allocator(TextureLayer::Color),
        );

        let mut optional = |layer: TextureLayer, path: Option<&Path>| {
            let path = textures.resolve(path?);
            match SourceRaster::load(&path, settings.flip_vertical) {
                Ok(raster) => Some(TileTextureManager::from_raster(
                    layer.name(),
                    raster,
                    settings.clone(),
                    make_allocator(layer),
                )),
                Err(err) => {
                    info!(%layer, error = %err, "optional texture layer unavailable");
                    None
                }
            }
        };
        let height = optional(TextureLayer::Height, textures.height.as_deref());
        let normal = optional(TextureLayer::Normal, textures.normal.as_deref());

        Self { color, height, normal }
    }

    /// Assemble from managers built elsewhere.
    pub fn from_managers(
        color: TileTextureManager,
        height: Option<TileTextureManager>,
        normal: Option<TileTextureManager>,
    ) -> Self {
        Self { color, height, normal }
    }

    /// Run one visibility pass over every present layer.
    pub fn update_visibility(&mut self, view_projection: &Mat4) -> Vec<(TextureLayer, VisibilityReport)> {
        let view = ViewState::from_view_projection(*view_projection);
        self.layers_mut()
            .map(|(layer, manager)| (layer, manager.update_visibility_from(&view)))
            .collect()
    }

    pub fn layer(&self, layer: TextureLayer) -> Option<&TileTextureManager> {
        match layer {
            TextureLayer::Color => Some(&self.color),
            TextureLayer::Height => self.height.as_ref(),
            TextureLayer::Normal => self.normal.as_ref(),
        }
    }

    pub fn color(&self) -> &TileTextureManager {
        &self.color
    }

    pub fn has_layer(&self, layer: TextureLayer) -> bool {
        self.layer(layer).is_some()
    }

    /// Present layers in [`TextureLayer::ALL`] order.
    pub fn layers(&self) -> impl Iterator<Item = (TextureLayer, &TileTextureManager)> {
        TextureLayer::ALL
            .into_iter()
            .filter_map(|layer| self.layer(layer).map(|m| (layer, m)))
    }

    fn layers_mut(&mut self) -> impl Iterator<Item = (TextureLayer, &mut TileTextureManager)> {
        [
            (TextureLayer::Color, Some(&mut self.color)),
            (TextureLayer::Height, self.height.as_mut()),
            (TextureLayer::Normal, self.normal.as_mut()),
        ]
        .into_iter()
        .filter_map(|(layer, manager)| manager.map(|m| (layer, m)))
    }

    /// Binding for `coord` in `layer`; absent layers are never ready.
    pub fn bind_for_cell(&self, layer: TextureLayer, coord: GridCoordinate) -> TileBinding {
        self.layer(layer)
            .map_or(TileBinding::NotReady, |manager| manager.bind_for_cell(coord))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeadlessAllocator;
    use crate::manager::ManagerStatus;
    use glam::Vec3;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str) {
        RgbImage::from_pixel(32, 16, Rgb([1, 2, 3]))
            .save(dir.join(name))
            .unwrap();
    }

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.globe.rings = 4;
        config.globe.segments = 4;
        config.tiles.relief_margin = 0.0;
        config.textures.base_dir = Some(dir.to_path_buf());
        config.textures.color = "color.png".into();
        config.textures.height = Some("height.png".into());
        config.textures.normal = Some("normal.png".into());
        config
    }

    fn front_view() -> Mat4 {
        Mat4::perspective_rh(std::f32::consts::FRAC_PI_4, 1.0, 0.1, 100.0)
            * Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y)
    }

    #[test]
    fn test_missing_optional_layer_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "color.png");
        write_png(dir.path(), "height.png");

        let globe = GlobeTextures::from_config(&config_in(dir.path()), |_| HeadlessAllocator::new());
        assert!(globe.color().is_enabled());
        assert!(globe.has_layer(TextureLayer::Height));
        assert!(!globe.has_layer(TextureLayer::Normal));
        let names: Vec<_> = globe.layers().map(|(layer, _)| layer).collect();
        assert_eq!(names, vec![TextureLayer::Color, TextureLayer::Height]);
    }

    #[test]
    fn test_one_pass_drives_every_layer() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["color.png", "height.png", "normal.png"] {
            write_png(dir.path(), name);
        }
        let mut globe = GlobeTextures::from_config(&config_in(dir.path()), |_| HeadlessAllocator::new());

        let reports = globe.update_visibility(&front_view());
        assert_eq!(reports.len(), 3);
        for (layer, report) in &reports {
            assert_eq!(report.visible, 8, "{layer} visible count");
            assert_eq!(report.loaded, 8, "{layer} loaded count");
        }
        let coord = GridCoordinate::new(1, 0);
        for layer in TextureLayer::ALL {
            assert!(globe.bind_for_cell(layer, coord).is_ready(), "{layer} not ready");
        }
    }

    #[test]
    fn test_missing_color_raster_disables_only_color() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "height.png");
        let mut globe = GlobeTextures::from_config(&config_in(dir.path()), |_| HeadlessAllocator::new());

        assert!(matches!(globe.color().status(), ManagerStatus::Disabled { .. }));
        globe.update_visibility(&front_view());
        let coord = GridCoordinate::new(1, 0);
        assert_eq!(globe.bind_for_cell(TextureLayer::Color, coord), TileBinding::NotReady);
        assert!(globe.bind_for_cell(TextureLayer::Height, coord).is_ready());
        assert_eq!(globe.bind_for_cell(TextureLayer::Normal, coord), TileBinding::NotReady);
    }
}
