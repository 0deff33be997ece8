//! Render step for the video surface.
//!
//! `YuvRenderer` implements the lifecycle a host drives: `initialize` once
//! when the GPU context is ready, `resize` when the surface changes size and
//! `render` for every paint. Each render clears the target and, when a frame
//! has been published, uploads it and draws the converted quad.

use std::sync::Arc;

use thiserror::Error;

use super::pipeline::{BindingContext, ConversionPipeline, Uniforms};
use super::projection::ProjectionController;
use super::texture_set::GpuTextureSet;
use crate::frame::exchange::FrameExchange;
use crate::frame::planar_buffer::Plane;

/// Errors that can occur in the render path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Shader compilation or pipeline creation failed.
    #[error("GPU initialization failed: {0}")]
    GpuInitError(String),

    /// Plane data handed to the texture set had the wrong size.
    #[error("Plane {plane} size mismatch: expected {expected} bytes, got {actual}")]
    PlaneSizeMismatch {
        plane: Plane,
        expected: usize,
        actual: usize,
    },

    /// A plane is larger than the device can hold in one texture.
    #[error("Plane {plane} texture {width}x{height} exceeds the device limit of {max}")]
    TextureTooLarge {
        plane: Plane,
        width: u32,
        height: u32,
        max: u32,
    },
}

pub type RenderResult<T = ()> = std::result::Result<T, RenderError>;

/// GPU resources that only exist after a successful `initialize`.
#[derive(Debug)]
struct GpuState {
    textures: GpuTextureSet,
    pipeline: ConversionPipeline,
    bindings: Option<BindingContext>,
}

/// Draws the exchange's front frame into a render target.
#[derive(Debug)]
pub struct YuvRenderer {
    exchange: Arc<FrameExchange>,
    format: wgpu::TextureFormat,
    clear_color: wgpu::Color,
    gpu: Option<GpuState>,
    projection: ProjectionController,
}

impl YuvRenderer {
    /// Creates a renderer for `format` targets. No GPU work happens until
    /// [`YuvRenderer::initialize`].
    pub fn new(
        exchange: Arc<FrameExchange>,
        format: wgpu::TextureFormat,
        clear_color: wgpu::Color,
    ) -> Self {
        Self {
            exchange,
            format,
            clear_color,
            gpu: None,
            projection: ProjectionController::new(1, 1),
        }
    }

    /// Creates the texture set and compiles the conversion pipeline.
    ///
    /// On error the renderer stays uninitialized and every `render` only
    /// clears the target. Compilation is not retried.
    pub fn initialize(&mut self, device: &wgpu::Device) -> RenderResult {
        let pipeline = ConversionPipeline::initialize(device, self.format)?;
        let textures = GpuTextureSet::initialize(device);

        self.gpu = Some(GpuState {
            textures,
            pipeline,
            bindings: None,
        });
        log::info!("YuvRenderer::initialize: ready");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.gpu.is_some()
    }

    /// Records the new surface size. The matrices follow on the next render.
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("YuvRenderer::resize: {width}x{height}");
        self.projection.set_viewport(width, height);
    }

    /// Clears `target` and draws the current front frame into it.
    ///
    /// Returns `true` if a frame was drawn, `false` for a clear-only pass
    /// (nothing published yet, torn down, not initialized, or a frame the
    /// textures could not take).
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
    ) -> bool {
        let drawn = self.prepare(device, queue);

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("YUV render pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.clear_color),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });

        if !drawn {
            return false;
        }

        match &self.gpu {
            Some(GpuState {
                pipeline,
                bindings: Some(bindings),
                ..
            }) => {
                pipeline.draw(&mut render_pass, bindings);
                true
            }
            _ => false,
        }
    }

    /// Uploads the front frame and refreshes bindings and uniforms. The
    /// exchange lock is held only for the upload.
    fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> bool {
        let Some(gpu) = self.gpu.as_mut() else {
            return false;
        };
        let Some(frame) = self.exchange.read_front() else {
            return false;
        };

        if let Err(e) = gpu.textures.upload_frame(device, queue, &frame) {
            log::warn!("YuvRenderer::prepare: {e}");
            return false;
        }
        self.projection.set_source(frame.width(), frame.height());
        drop(frame);

        let current = gpu
            .bindings
            .as_ref()
            .is_some_and(|bindings| bindings.is_current(&gpu.textures));
        if !current {
            gpu.bindings = Some(gpu.pipeline.bind(device, &gpu.textures));
        }

        let uniforms = Uniforms::new(self.projection.matrices());
        gpu.pipeline.write_uniforms(queue, &uniforms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::planar_buffer::{fill_color_bars, rgb_to_yuv};
    use crate::graphics::pipeline::yuv_to_rgb;

    const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

    /// Returns `None` on machines without any usable adapter.
    fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok()?;

        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            label: None,
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
        }))
        .ok()
    }

    fn target(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("test target"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default())
    }

    /// Render target that can be copied back to the CPU.
    fn readable_target(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("readable test target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    /// Copies `texture` back and returns its rows of RGBA pixels.
    fn read_pixels(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
    ) -> Vec<Vec<[u8; 4]>> {
        let size = texture.size();
        let row_bytes = size.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = row_bytes.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback buffer"),
            size: (padded_row * size.height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(size.height),
                },
            },
            size,
        );
        queue.submit(std::iter::once(encoder.finish()));

        buffer.slice(..).map_async(wgpu::MapMode::Read, |result| {
            result.unwrap();
        });
        device.poll(wgpu::PollType::wait_indefinitely()).unwrap();

        let data = buffer.slice(..).get_mapped_range().to_vec();
        buffer.unmap();

        data.chunks(padded_row as usize)
            .map(|row| {
                row[..row_bytes as usize]
                    .chunks(4)
                    .map(|px| [px[0], px[1], px[2], px[3]])
                    .collect()
            })
            .collect()
    }

    fn assert_pixel_near(actual: [u8; 4], expected: [u8; 4]) {
        for channel in 0..4 {
            let diff = (actual[channel] as i32 - expected[channel] as i32).abs();
            assert!(diff <= 4, "pixel {actual:?}, expected about {expected:?}");
        }
    }

    fn render_once(
        renderer: &mut YuvRenderer,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        view: &wgpu::TextureView,
    ) -> bool {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("test encoder"),
        });
        let drawn = renderer.render(device, queue, &mut encoder, view);
        queue.submit(std::iter::once(encoder.finish()));
        drawn
    }

    fn publish_bars(exchange: &FrameExchange, frame_num: u64) {
        let mut back = exchange.write_into_back().unwrap();
        fill_color_bars(&mut back, frame_num);
        back.publish().unwrap();
    }

    #[test]
    fn test_render_lifecycle() {
        let Some((device, queue)) = test_device() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let exchange = Arc::new(FrameExchange::default());
        let mut renderer = YuvRenderer::new(exchange.clone(), TARGET_FORMAT, wgpu::Color::BLACK);
        renderer.initialize(&device).unwrap();
        renderer.resize(320, 240);
        let view = target(&device, 320, 240);

        // Nothing published yet: clear only
        assert!(!render_once(&mut renderer, &device, &queue, &view));

        exchange.configure(64, 32).unwrap();
        assert!(!render_once(&mut renderer, &device, &queue, &view));

        publish_bars(&exchange, 0);
        assert!(render_once(&mut renderer, &device, &queue, &view));
        let gpu = renderer.gpu.as_ref().unwrap();
        assert_eq!(gpu.textures.extent(Plane::Y), (64, 32));
        assert_eq!(gpu.textures.extent(Plane::V), (32, 16));
        let generation = gpu.textures.generation();

        // Same size again reuses textures and bindings
        publish_bars(&exchange, 1);
        assert!(render_once(&mut renderer, &device, &queue, &view));
        assert_eq!(renderer.gpu.as_ref().unwrap().textures.generation(), generation);

        // New dimensions reallocate the textures and recompute the projection
        exchange.configure(128, 96).unwrap();
        publish_bars(&exchange, 2);
        assert!(render_once(&mut renderer, &device, &queue, &view));
        let gpu = renderer.gpu.as_ref().unwrap();
        assert_eq!(gpu.textures.extent(Plane::U), (64, 48));
        assert!(gpu.textures.generation() > generation);
        assert!(gpu.bindings.as_ref().unwrap().is_current(&gpu.textures));
        assert!(!renderer.projection.is_dirty());

        exchange.teardown();
        assert!(!render_once(&mut renderer, &device, &queue, &view));

        assert!(pollster::block_on(device.pop_error_scope()).is_none());
    }

    #[test]
    fn test_rendered_pixels() {
        let Some((device, queue)) = test_device() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        // 64x32 frame: top half red, bottom half black
        let red = rgb_to_yuv(191, 0, 0);
        let (width, height) = (64usize, 32usize);
        let y: Vec<u8> = (0..height)
            .flat_map(|row| std::iter::repeat(if row < 16 { red.0 } else { 0 }).take(width))
            .collect();
        let chroma = |value: u8| -> Vec<u8> {
            (0..height / 2)
                .flat_map(|row| {
                    std::iter::repeat(if row < 8 { value } else { 128 }).take(width / 2)
                })
                .collect()
        };
        let (u, v) = (chroma(red.1), chroma(red.2));

        let exchange = Arc::new(FrameExchange::default());
        exchange.configure(width as i32, height as i32).unwrap();
        let mut back = exchange.write_into_back().unwrap();
        back.write_planes(&y, &u, &v).unwrap();
        back.publish().unwrap();

        let mut renderer = YuvRenderer::new(exchange, TARGET_FORMAT, wgpu::Color::TRANSPARENT);
        renderer.initialize(&device).unwrap();
        renderer.resize(64, 64);
        let texture = readable_target(&device, 64, 64);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        assert!(render_once(&mut renderer, &device, &queue, &view));

        let pixels = read_pixels(&device, &queue, &texture);
        assert_eq!(pixels.len(), 64);

        let to_pixel = |rgb: [f32; 3]| {
            let [r, g, b] = rgb.map(|c| (c * 255.0).round() as u8);
            [r, g, b, 255]
        };
        let expected_red = to_pixel(yuv_to_rgb(red.0, red.1, red.2));
        let expected_black = to_pixel(yuv_to_rgb(0, 128, 128));

        // 2:1 frame in a square viewport: image on rows 16..48, bars elsewhere
        for row in [0, 8, 13, 51, 56, 63] {
            for col in [0, 32, 63] {
                assert_eq!(pixels[row][col], [0, 0, 0, 0], "bar at row {row}, col {col}");
            }
        }
        for row in [18, 22, 28] {
            for col in [1, 32, 62] {
                assert_pixel_near(pixels[row][col], expected_red);
            }
        }
        for row in [36, 40, 46] {
            for col in [1, 32, 62] {
                assert_pixel_near(pixels[row][col], expected_black);
            }
        }
        assert!(expected_red[0] > 180 && expected_red[1] < 8 && expected_red[2] < 8);

        assert!(pollster::block_on(device.pop_error_scope()).is_none());
    }

    #[test]
    fn test_oversized_frame_renders_clear_only() {
        let Some((device, queue)) = test_device() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let max = device.limits().max_texture_dimension_2d;
        let too_wide = (max + 2) & !1;

        let exchange = Arc::new(FrameExchange::default());
        let mut renderer = YuvRenderer::new(exchange.clone(), TARGET_FORMAT, wgpu::Color::BLACK);
        renderer.initialize(&device).unwrap();
        renderer.resize(64, 64);
        let view = target(&device, 64, 64);

        exchange.configure(too_wide as i32, 2).unwrap();
        publish_bars(&exchange, 0);
        assert!(!render_once(&mut renderer, &device, &queue, &view));
        let gpu = renderer.gpu.as_ref().unwrap();
        assert_eq!(gpu.textures.extent(Plane::Y), (2, 2));
        assert_eq!(gpu.textures.generation(), 0);
        assert!(gpu.bindings.is_none());

        // A frame within limits draws again
        exchange.configure(64, 32).unwrap();
        publish_bars(&exchange, 1);
        assert!(render_once(&mut renderer, &device, &queue, &view));

        assert!(pollster::block_on(device.pop_error_scope()).is_none());
    }

    #[test]
    fn test_texture_upload_rejects_oversized_plane() {
        let Some((device, queue)) = test_device() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };

        let max = device.limits().max_texture_dimension_2d;
        let mut textures = GpuTextureSet::initialize(&device);
        let bytes = vec![0u8; (max as usize + 1) * 2];
        assert_eq!(
            textures.upload(&device, &queue, Plane::U, &bytes, max + 1, 2),
            Err(RenderError::TextureTooLarge {
                plane: Plane::U,
                width: max + 1,
                height: 2,
                max,
            })
        );
        assert_eq!(textures.extent(Plane::U), (1, 1));
        assert_eq!(textures.generation(), 0);
    }

    #[test]
    fn test_pipeline_failure_reports_gpu_init_error() {
        let Some((device, queue)) = test_device() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };

        let exchange = Arc::new(FrameExchange::default());
        exchange.configure(16, 16).unwrap();
        publish_bars(&exchange, 0);

        // Depth formats cannot be color targets
        let mut renderer = YuvRenderer::new(
            exchange,
            wgpu::TextureFormat::Depth32Float,
            wgpu::Color::BLACK,
        );
        match renderer.initialize(&device) {
            Err(RenderError::GpuInitError(message)) => assert!(!message.is_empty()),
            other => panic!("expected GpuInitError, got {other:?}"),
        }
        assert!(!renderer.is_initialized());

        let view = target(&device, 16, 16);
        assert!(!render_once(&mut renderer, &device, &queue, &view));
    }

    #[test]
    fn test_uninitialized_renderer_only_clears() {
        let Some((device, queue)) = test_device() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };

        let exchange = Arc::new(FrameExchange::default());
        exchange.configure(16, 16).unwrap();
        publish_bars(&exchange, 0);

        let mut renderer = YuvRenderer::new(exchange, TARGET_FORMAT, wgpu::Color::BLACK);
        let view = target(&device, 16, 16);
        assert!(!renderer.is_initialized());
        assert!(!render_once(&mut renderer, &device, &queue, &view));
    }

    #[test]
    fn test_texture_upload_rejects_wrong_size() {
        let Some((device, queue)) = test_device() else {
            eprintln!("no GPU adapter available, skipping");
            return;
        };

        let mut textures = GpuTextureSet::initialize(&device);
        let result = textures.upload(&device, &queue, Plane::Y, &[0u8; 10], 4, 4);
        assert_eq!(
            result,
            Err(RenderError::PlaneSizeMismatch {
                plane: Plane::Y,
                expected: 16,
                actual: 10,
            })
        );
        assert_eq!(textures.generation(), 0);
    }
}
