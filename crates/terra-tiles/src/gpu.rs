//! wgpu-backed [`TextureAllocator`].
//!
//! Each tile becomes one `Rgba8UnormSrgb` texture with every mip level uploaded
//! from the decoded chain, a default view and a ready-to-bind bind group. Tiles
//! are registered under their [`TextureHandle`] in a shared [`TileTextureRegistry`]
//! so the renderer can look up the bind group for a handle returned by the
//! manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use image::RgbaImage;
use tracing::trace;

use crate::allocator::{TextureAllocator, TextureHandle, validate_tile};
use crate::decoder::DecodedTile;
use crate::error::AllocError;

/// A resident tile texture on the GPU.
pub struct TileTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
    /// Width and height of mip level 0 in texels.
    pub dimensions: (u32, u32),
    pub mip_level_count: u32,
}

/// Handle → texture lookup shared between allocator and renderer.
pub type TileTextureRegistry = Arc<DashMap<TextureHandle, Arc<TileTexture>>>;

/// Texture format of every tile.
pub const TILE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Creates tile textures on a wgpu device. Cheap to clone; clones share the
/// registry, sampler and layout, so one allocator can back several layers.
#[derive(Clone)]
pub struct WgpuTileAllocator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: Arc<wgpu::Sampler>,
    bind_group_layout: Arc<wgpu::BindGroupLayout>,
    registry: TileTextureRegistry,
    next_id: Arc<AtomicU64>,
}

impl WgpuTileAllocator {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tile-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        Self {
            device,
            queue,
            sampler: Arc::new(sampler),
            bind_group_layout: Arc::new(bind_group_layout),
            registry: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Layout of the bind group attached to every tile (texture at binding 0,
    /// sampler at binding 1). Vertex-visible so height tiles can displace.
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn registry(&self) -> TileTextureRegistry {
        Arc::clone(&self.registry)
    }

    /// Texture for a handle, if still alive.
    pub fn get(&self, handle: TextureHandle) -> Option<Arc<TileTexture>> {
        self.registry.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    fn write_level(&self, texture: &wgpu::Texture, level: u32, image: &RgbaImage) {
        let (width, height) = image.dimensions();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl TextureAllocator for WgpuTileAllocator {
    fn create(&mut self, tile: &DecodedTile) -> Result<TextureHandle, AllocError> {
        validate_tile(tile)?;

        let (width, height) = (tile.width(), tile.height());
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(AllocError::TooLarge { width, height, max });
        }

        let handle = TextureHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let label = format!("tile-{}-{}", tile.coord.ring, tile.coord.segment);
        let mip_level_count = tile.mip_level_count();

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TILE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.write_level(&texture, 0, &tile.image);
        for (level, mip) in tile.mips.iter().enumerate() {
            self.write_level(&texture, level as u32 + 1, mip);
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label}-bind-group")),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.registry.insert(
            handle,
            Arc::new(TileTexture {
                texture,
                view,
                bind_group,
                dimensions: (width, height),
                mip_level_count,
            }),
        );
        trace!(%handle, width, height, mip_level_count, "created tile texture");
        Ok(handle)
    }

    fn destroy(&mut self, handle: TextureHandle) {
        if let Some((_, tile)) = self.registry.remove(&handle) {
            tile.texture.destroy();
        }
    }
}

/// Create a test GPU device and queue. Returns `None` if no GPU is available.
#[cfg(test)]
pub(crate) fn create_test_device_queue() -> Option<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok()?;

        adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("terra-tiles-test"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: Default::default(),
                ..Default::default()
            })
            .await
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::GridCoordinate;
    use crate::decoder::{TileDecoder, TileSource};
    use crate::grid::TileGrid;
    use crate::raster::SourceRaster;
    use image::{DynamicImage, Rgba};

    #[test]
    fn test_create_registers_bind_group() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let mut alloc = WgpuTileAllocator::new(device, queue);
        let tile = DecodedTile {
            coord: GridCoordinate::new(0, 0),
            image: RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])),
            mips: Vec::new(),
        };
        let handle = alloc.create(&tile).unwrap();
        let tex = alloc.get(handle).expect("registered");
        assert_eq!(tex.dimensions, (4, 4));
        assert_eq!(tex.mip_level_count, 1);
    }

    #[test]
    fn test_uploads_full_mip_chain() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let mut alloc = WgpuTileAllocator::new(device, queue);
        let raster = SourceRaster::from_image(DynamicImage::new_rgba8(64, 32)).unwrap();
        let decoder = TileDecoder::new(Arc::new(raster), TileGrid::new(1, 2), true);
        let tile = decoder.decode(GridCoordinate::new(0, 1)).unwrap();

        let handle = alloc.create(&tile).unwrap();
        let tex = alloc.get(handle).unwrap();
        assert_eq!(tex.dimensions, (32, 32));
        assert_eq!(tex.mip_level_count, 6);
    }

    #[test]
    fn test_oversized_tile_is_rejected() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let max = device.limits().max_texture_dimension_2d;
        let mut alloc = WgpuTileAllocator::new(device, queue);
        let tile = DecodedTile {
            coord: GridCoordinate::new(0, 0),
            image: RgbaImage::new(max + 1, 1),
            mips: Vec::new(),
        };
        let err = alloc.create(&tile).unwrap_err();
        assert!(matches!(err, AllocError::TooLarge { width, height: 1, .. } if width == max + 1));
        assert!(alloc.registry().is_empty());
    }

    #[test]
    fn test_destroy_unregisters() {
        let Some((device, queue)) = create_test_device_queue() else {
            return;
        };
        let mut alloc = WgpuTileAllocator::new(device, queue);
        let registry = alloc.registry();
        let tile = DecodedTile {
            coord: GridCoordinate::new(1, 1),
            image: RgbaImage::new(2, 2),
            mips: Vec::new(),
        };
        let handle = alloc.create(&tile).unwrap();
        assert!(registry.contains_key(&handle));
        alloc.destroy(handle);
        alloc.destroy(handle);
        assert!(!registry.contains_key(&handle));
    }
}
