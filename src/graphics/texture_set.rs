//! The three single-channel textures holding the Y, U and V planes.
//!
//! The set is created once when the renderer initializes and every draw
//! overwrites the full content of all three textures. wgpu textures cannot
//! change size, so an upload with new plane dimensions reallocates that
//! plane's storage and bumps [`GpuTextureSet::generation`]; bind groups built
//! against an older generation must be rebuilt.

use super::renderer::{RenderError, RenderResult};
use crate::frame::planar_buffer::{PlanarFrameBuffer, Plane};

/// Placeholder luma size used until the first frame arrives.
const INITIAL_LUMA_EXTENT: (u32, u32) = (2, 2);

#[derive(Debug)]
struct PlaneTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    extent: (u32, u32),
}

impl PlaneTexture {
    fn create(device: &wgpu::Device, plane: Plane, width: u32, height: u32) -> Self {
        let label = format!("YUV {plane} texture");
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            extent: (width, height),
        }
    }
}

/// GPU side of one frame: Y, U and V textures and their shared sampler.
#[derive(Debug)]
pub struct GpuTextureSet {
    planes: [PlaneTexture; 3],
    sampler: wgpu::Sampler,
    generation: u64,
}

impl GpuTextureSet {
    /// Creates the three textures and a linear, edge-clamped sampler.
    pub fn initialize(device: &wgpu::Device) -> Self {
        let (luma_w, luma_h) = INITIAL_LUMA_EXTENT;
        let planes = Plane::ALL.map(|plane| match plane {
            Plane::Y => PlaneTexture::create(device, plane, luma_w, luma_h),
            Plane::U | Plane::V => PlaneTexture::create(device, plane, luma_w / 2, luma_h / 2),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("YUV sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            planes,
            sampler,
            generation: 0,
        }
    }

    /// Replaces the content of `plane` with `bytes`, a tightly packed
    /// `width` x `height` 8-bit image.
    ///
    /// # Errors
    ///
    /// - `RenderError::PlaneSizeMismatch` - `bytes` does not hold exactly
    ///   `width * height` samples
    /// - `RenderError::TextureTooLarge` - a side exceeds the device's
    ///   `max_texture_dimension_2d`
    ///
    /// In both cases the texture is left untouched.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        plane: Plane,
        bytes: &[u8],
        width: u32,
        height: u32,
    ) -> RenderResult {
        let expected = width as usize * height as usize;
        if bytes.len() != expected || expected == 0 {
            return Err(RenderError::PlaneSizeMismatch {
                plane,
                expected,
                actual: bytes.len(),
            });
        }

        let slot = &mut self.planes[plane.index()];
        if slot.extent != (width, height) {
            let max = device.limits().max_texture_dimension_2d;
            if width > max || height > max {
                return Err(RenderError::TextureTooLarge {
                    plane,
                    width,
                    height,
                    max,
                });
            }
            log::info!(
                "GpuTextureSet::upload: {plane} plane {}x{} -> {width}x{height}",
                slot.extent.0,
                slot.extent.1
            );
            *slot = PlaneTexture::create(device, plane, width, height);
            self.generation += 1;
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &slot.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Uploads all three planes of `frame`.
    pub fn upload_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: &PlanarFrameBuffer,
    ) -> RenderResult {
        let size = frame.size();
        for plane in Plane::ALL {
            let (width, height) = size.plane_extent(plane);
            self.upload(device, queue, plane, frame.plane(plane), width, height)?;
        }
        Ok(())
    }

    pub fn view(&self, plane: Plane) -> &wgpu::TextureView {
        &self.planes[plane.index()].view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    /// Size of the storage currently backing `plane`.
    pub fn extent(&self, plane: Plane) -> (u32, u32) {
        self.planes[plane.index()].extent
    }

    /// Incremented whenever any texture is reallocated.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
