//! Application context.

use std::sync::Arc;
use std::time::Instant;

use sprig_core::WindowExtent;
use sprig_render::Renderer;
use winit::window::Window;

/// Window and renderer shared across all app methods.
///
/// The renderer is declared first so it is dropped while the window it
/// presents to is still alive.
pub struct AppContext {
    /// Renderer presenting to `window`.
    pub renderer: Renderer,
    /// The window handle.
    pub window: Arc<Window>,
    /// Frames drawn so far.
    pub frame_count: u64,
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, renderer: Renderer) -> Self {
        Self {
            renderer,
            window,
            frame_count: 0,
            last_frame_time: Instant::now(),
        }
    }

    /// Drawable extent the renderer was created for.
    pub fn extent(&self) -> WindowExtent {
        self.renderer.extent()
    }

    pub fn width(&self) -> u32 {
        self.extent().width
    }

    pub fn height(&self) -> u32 {
        self.extent().height
    }

    /// Seconds since the previous call, restarting the clock.
    pub(crate) fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        dt
    }
}
