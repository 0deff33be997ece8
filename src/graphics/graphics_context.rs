//! Window surface hosting the video renderer.
//!
//! `GraphicsContext` owns the wgpu surface, device and queue for one window
//! and drives a [`YuvRenderer`] through its lifecycle: initialize once the
//! device exists, resize with the window, render on every redraw.

use std::sync::Arc;

use thiserror::Error;
use winit::window::Window;

use super::renderer::{RenderError, YuvRenderer};
use crate::config::RendererConfig;
use crate::frame::exchange::FrameExchange;

/// Errors that can occur while setting up the window surface.
#[derive(Error, Debug)]
pub enum GraphicsError {
    /// Failed to create a graphics surface for rendering.
    #[error("Failed to create graphics surface for rendering")]
    SurfaceCreationError,

    /// Failed to request a graphics adapter from the system.
    #[error("Failed to request graphics adapter")]
    AdapterRequestError,

    /// Failed to request a graphics device from the adapter.
    #[error("Failed to request graphics device")]
    DeviceRequestError,
}

pub type GraphicsResult<T = ()> = std::result::Result<T, GraphicsError>;

/// Picks the first non-sRGB format so the shader output is written without
/// an extra gamma encode.
fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .find(|format| !format.is_srgb())
        .or_else(|| formats.first())
        .copied()
}

/// GPU state for a window showing video frames.
///
/// # Lifetime
///
/// The lifetime parameter `'a` is the lifetime of the underlying window
/// surface.
#[derive(Debug)]
pub struct GraphicsContext<'a> {
    /// wgpu surface for rendering to the window
    surface: wgpu::Surface<'a>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    /// Kept so the surface can be reconfigured after resize or loss
    surface_config: wgpu::SurfaceConfiguration,
    window: Arc<Window>,
    renderer: YuvRenderer,
    /// Set when the conversion pipeline failed to build. Rendering then only
    /// clears the window.
    init_error: Option<RenderError>,
}

impl<'a> GraphicsContext<'a> {
    /// Creates the surface, device and renderer for `window`.
    ///
    /// A renderer initialization failure does not fail construction: it is
    /// logged, kept in [`GraphicsContext::initialization_error`], and the
    /// window keeps showing the clear color.
    ///
    /// # Errors
    ///
    /// - `GraphicsError::SurfaceCreationError` - Failed to create rendering surface
    /// - `GraphicsError::AdapterRequestError` - No suitable GPU adapter found
    /// - `GraphicsError::DeviceRequestError` - Failed to create logical GPU device
    pub fn new(
        window: Arc<Window>,
        config: &RendererConfig,
        exchange: Arc<FrameExchange>,
    ) -> GraphicsResult<Self> {
        let size = window.inner_size();
        log::info!("GraphicsContext::new: window size: {size:?}");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone()).map_err(|e| {
            log::error!("GraphicsContext::new: {e:?}");
            GraphicsError::SurfaceCreationError
        })?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: config.power_preference.into(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| {
            log::error!("GraphicsContext::new request_adapter: {e:?}");
            GraphicsError::AdapterRequestError
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            required_features: wgpu::Features::empty(),
            // The adapter's own limits, so large frames fit when the hardware allows
            required_limits: adapter.limits(),
            label: None,
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
        }))
        .map_err(|e| {
            log::error!("GraphicsContext::new request_device: {e:?}");
            GraphicsError::DeviceRequestError
        })?;

        let surface_capabilities = surface.get_capabilities(&adapter);
        let format = pick_surface_format(&surface_capabilities.formats)
            .ok_or(GraphicsError::SurfaceCreationError)?;

        let alpha_modes = surface_capabilities.alpha_modes;
        let alpha_mode = alpha_modes
            .iter()
            .find(|mode| **mode == wgpu::CompositeAlphaMode::PreMultiplied)
            .or_else(|| alpha_modes.first())
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: config.present_mode.into(),
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        log::info!(
            "GraphicsContext::new: surface {format:?}, {:?}, {alpha_mode:?}",
            surface_config.present_mode
        );

        let mut renderer = YuvRenderer::new(exchange, format, config.clear_color());
        renderer.resize(surface_config.width, surface_config.height);
        let init_error = renderer.initialize(&device).err();
        if let Some(e) = &init_error {
            log::error!("GraphicsContext::new: renderer disabled: {e}");
        }

        Ok(Self {
            surface,
            device,
            queue,
            surface_config,
            window,
            renderer,
            init_error,
        })
    }

    /// Reconfigures the surface for the new window size. Zero sizes (a
    /// minimized window) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }

        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.renderer.resize(width, height);
    }

    /// Renders the current front frame and presents it.
    ///
    /// A lost or outdated surface is reconfigured and the frame skipped; the
    /// next redraw picks it up again.
    pub fn draw(&mut self) {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("GraphicsContext::draw: surface lost, reconfiguring");
                self.surface.configure(&self.device, &self.surface_config);
                return;
            }
            Err(e) => {
                log::error!("GraphicsContext::draw: failed to get current texture: {e:?}");
                return;
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("video encoder"),
            });

        let drawn = self
            .renderer
            .render(&self.device, &self.queue, &mut encoder, &view);
        log::trace!("GraphicsContext::draw: drawn {drawn}");

        self.queue.submit(std::iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// The renderer's initialization failure, if any.
    pub fn initialization_error(&self) -> Option<&RenderError> {
        self.init_error.as_ref()
    }
}
