//! `SprigApp` trait definition.

use crate::context::AppContext;
use winit::event::WindowEvent;

/// Trait for Sprig applications.
///
/// The framework creates the window and renderer, runs the event loop and
/// presents a frame after every [`draw`](SprigApp::draw). Applications only
/// update their state and submit draws.
pub trait SprigApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window and renderer exist. Load geometry and
    /// textures here.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Advance application state by `dt` seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Submit this frame's quads and shapes to `ctx.renderer`.
    fn draw(&mut self, ctx: &mut AppContext) -> anyhow::Result<()>;

    /// Handle a window event. Return `true` to stop the framework from
    /// processing it further.
    ///
    /// Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Called before shutdown, with the GPU idle.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
