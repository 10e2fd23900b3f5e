//! Application runner and event loop.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sprig_core::Color;
use sprig_render::{RenderError, Renderer, RendererConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::SprigApp;
use crate::context::AppContext;

/// Application configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Window title, also used as the Vulkan application name.
    pub title: String,
    /// Window width. The window is not resizable.
    pub width: u32,
    /// Window height.
    pub height: u32,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Directory holding the compiled shaders, instead of the built-in ones.
    pub shader_dir: Option<PathBuf>,
    pub clear_color: Color,
    /// Filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Write log lines to this file instead of stdout.
    pub log_file: Option<PathBuf>,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Sprig".to_string(),
            width: 1280,
            height: 768,
            validation: cfg!(debug_assertions),
            shader_dir: None,
            clear_color: Color::BLACK,
            log_filter: "info".to_string(),
            log_file: None,
            target_fps: None,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }

    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    fn renderer_config(&self) -> RendererConfig {
        let config = RendererConfig::default()
            .with_app_name(self.title.clone())
            .with_validation(self.validation)
            .with_clear_color(self.clear_color);
        match &self.shader_dir {
            Some(dir) => config.with_shader_dir(dir.clone()),
            None => config,
        }
    }

    fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_filter`.
fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match &config.log_file {
        Some(path) => {
            let file = File::create(path)?;
            builder
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
        None => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))
}

/// Whether `error` leaves the renderer unable to draw another frame.
fn is_fatal(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<RenderError>()
        .is_some_and(RenderError::is_fatal)
}

/// Run a `SprigApp` with the given configuration.
///
/// Initializes logging, creates the window and renderer, and runs the event
/// loop until the window is closed. Initialization failures are logged and
/// returned.
pub fn run_app<A: SprigApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging(&config)?;

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        init_error: None,
    };

    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {e}");
    }

    runner.init_error.map_or(Ok(()), Err)
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: SprigApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    init_error: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: SprigApp> {
    app: A,
    ctx: AppContext,
    target_frame_time: Option<Duration>,
}

impl<A: SprigApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.init_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                match state.render_frame() {
                    Ok(()) => state.ctx.window.request_redraw(),
                    Err(e) if is_fatal(&e) => {
                        error!("Fatal render error, stopping: {e:#}");
                        if let Some(mut state) = self.state.take() {
                            state.cleanup();
                        }
                        event_loop.exit();
                    }
                    Err(e) => {
                        error!("Render error: {e:#}");
                        state.ctx.window.request_redraw();
                    }
                }
            }
            WindowEvent::Resized(size) => {
                tracing::debug!(
                    width = size.width,
                    height = size.height,
                    "Resize ignored, the swapchain keeps its initial extent"
                );
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: SprigApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);

        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let size = window.inner_size();

        let renderer = Renderer::new(
            window.as_ref(),
            size.width.max(1),
            size.height.max(1),
            &self.config.renderer_config(),
        )?;
        info!("GPU: {}", renderer.gpu().adapter().device_name);

        let mut ctx = AppContext::new(window, renderer);
        let app = A::init(&mut ctx)?;

        Ok(AppState {
            app,
            ctx,
            target_frame_time: self.config.target_frame_time(),
        })
    }
}

impl<A: SprigApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();
        let dt = self.ctx.tick();

        self.app.update(&self.ctx, dt);
        self.app.draw(&mut self.ctx)?;
        self.ctx.renderer.draw_frame()?;
        self.ctx.frame_count += 1;

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        info!(frames = self.ctx.frame_count, "Starting cleanup...");
        if let Err(e) = self.ctx.renderer.wait_idle() {
            error!("Failed to wait idle: {e}");
        }
        self.app.cleanup(&mut self.ctx);
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!((config.width, config.height), (1280, 768));
        assert_eq!(config.log_filter, "info");
        assert!(config.log_file.is_none());
        assert!(config.target_frame_time().is_none());
        assert_eq!(
            config.renderer_config().shader_dir,
            RendererConfig::default().shader_dir
        );
    }

    #[test]
    fn builder_feeds_renderer_config() {
        let config = AppConfig::new("demo")
            .with_validation(false)
            .with_shader_dir("assets/shaders")
            .with_clear_color(Color::BLUE)
            .with_log_filter("sprig_render=debug")
            .with_log_file("demo.log");
        assert_eq!(config.log_filter, "sprig_render=debug");
        assert_eq!(config.log_file, Some(PathBuf::from("demo.log")));
        let renderer = config.renderer_config();
        assert_eq!(renderer.app_name, "demo");
        assert!(!renderer.validation);
        assert_eq!(renderer.shader_dir, PathBuf::from("assets/shaders"));
        assert_eq!(renderer.clear_color, Color::BLUE);
    }

    #[test]
    fn abandoned_frames_stop_the_loop() {
        let abandoned = anyhow::Error::new(RenderError::FrameAbandoned {
            image_index: 0,
            source: Box::new(RenderError::UnknownAsset("quad".to_string())),
        });
        assert!(is_fatal(&abandoned));
        assert!(!is_fatal(&anyhow::Error::new(RenderError::UnknownAsset(
            "quad".to_string()
        ))));
        assert!(!is_fatal(&anyhow::anyhow!("app error")));
    }

    #[test]
    fn target_fps_becomes_frame_time() {
        let config = AppConfig::default().with_target_fps(50);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
        assert!(AppConfig::default()
            .with_target_fps(0)
            .target_frame_time()
            .is_none());
    }
}
