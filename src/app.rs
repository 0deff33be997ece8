//! Window event loop presenting the synthetic stream.
//!
//! The producer thread publishes into the exchange; every publish goes
//! through a [`CoalescingRedraw`] that posts `UserEvent::RequestRedraw` to the
//! event loop, which turns it into a window redraw.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::error::{EventLoopError, OsError};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy};
use winit::window::{Window, WindowId};

use crate::config::RendererConfig;
use crate::frame::exchange::{ExchangeError, FrameExchange};
use crate::graphics::graphics_context::{GraphicsContext, GraphicsError};
use crate::producer::{ProducerSettings, SyntheticProducer};
use crate::redraw::CoalescingRedraw;

const WINDOW_TITLE: &str = "yuv_presenter";

#[derive(Debug, Clone)]
pub enum UserEvent {
    RequestRedraw,
}

#[derive(Error, Debug)]
pub enum PresenterError {
    #[error("Event loop error: {0}")]
    EventLoopError(#[from] EventLoopError),
    #[error("Failed to create window: {0}")]
    WindowCreationError(#[from] OsError),
    #[error("Graphics setup failed: {0}")]
    GraphicsError(#[from] GraphicsError),
    #[error("Producer failed to start: {0}")]
    ExchangeError(#[from] ExchangeError),
}

pub type PresenterResult<T = ()> = std::result::Result<T, PresenterError>;

/// Window, GPU context and producer, created once the event loop resumes.
struct Presentation {
    gfx: GraphicsContext<'static>,
    producer: SyntheticProducer,
}

struct Application {
    config: RendererConfig,
    settings: ProducerSettings,
    exchange: Arc<FrameExchange>,
    redraw: Arc<CoalescingRedraw>,
    presentation: Option<Presentation>,
    error: Option<PresenterError>,
}

impl Application {
    fn new(
        config: RendererConfig,
        settings: ProducerSettings,
        proxy: EventLoopProxy<UserEvent>,
    ) -> Self {
        // EventLoopProxy is not Sync on every platform
        let proxy = Mutex::new(proxy);
        let redraw = Arc::new(CoalescingRedraw::new(move || {
            if let Err(e) = proxy.lock().send_event(UserEvent::RequestRedraw) {
                log::error!("Application: error sending redraw event: {e:?}");
            }
        }));
        let exchange = Arc::new(FrameExchange::new(redraw.clone()));

        Self {
            config,
            settings,
            exchange,
            redraw,
            presentation: None,
            error: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> PresenterResult<Presentation> {
        let attributes = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(
                self.settings.width as f64,
                self.settings.height as f64,
            ));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let gfx = GraphicsContext::new(window, &self.config, self.exchange.clone())?;
        let producer = SyntheticProducer::start(self.exchange.clone(), self.settings)?;

        Ok(Presentation { gfx, producer })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        log::info!("Application::shutdown");
        if let Some(mut presentation) = self.presentation.take() {
            presentation.producer.stop();
        }
        self.exchange.teardown();
        event_loop.exit();
    }
}

impl ApplicationHandler<UserEvent> for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.presentation.is_some() {
            return;
        }

        log::info!("Application::resumed: creating window");
        match self.start(event_loop) {
            Ok(presentation) => self.presentation = Some(presentation),
            Err(e) => {
                log::error!("Application::resumed: {e}");
                self.error = Some(e);
                self.shutdown(event_loop);
            }
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: UserEvent) {
        match event {
            UserEvent::RequestRedraw => {
                log::trace!("user_event: Requesting redraw");
                if let Some(presentation) = &self.presentation {
                    presentation.gfx.window().request_redraw();
                }
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::Resized(size) => {
                if let Some(presentation) = &mut self.presentation {
                    presentation.gfx.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw.redraw_serviced();
                if let Some(presentation) = &mut self.presentation {
                    presentation.gfx.draw();
                }
            }
            _ => {}
        }
    }
}

pub struct RenderEventLoop {
    event_loop: EventLoop<UserEvent>,
}

impl RenderEventLoop {
    pub fn new() -> PresenterResult<Self> {
        let event_loop = EventLoop::<UserEvent>::with_user_event().build()?;
        Ok(Self { event_loop })
    }

    /// Runs until the window is closed. Errors raised while setting up the
    /// window end the loop and are returned here.
    pub fn run(self, config: RendererConfig, settings: ProducerSettings) -> PresenterResult {
        log::info!("RenderEventLoop::run: {settings:?}");

        let proxy = self.event_loop.create_proxy();
        let mut application = Application::new(config, settings, proxy);
        self.event_loop.run_app(&mut application).map_err(|e| {
            log::error!("RenderEventLoop::run: {e:?}");
            PresenterError::EventLoopError(e)
        })?;

        match application.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
