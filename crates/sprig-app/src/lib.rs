//! Application framework for the Sprig 2D renderer.
//!
//! This crate handles the boilerplate around a [`Renderer`]:
//! - Logging setup
//! - Window creation and the event loop
//! - Frame timing and presenting after every draw
//!
//! # Example
//!
//! ```no_run
//! use sprig_app::{run_app, AppConfig, AppContext, SprigApp};
//! use sprig_app::glam::Vec2;
//! use sprig_app::Color;
//!
//! struct MyApp;
//!
//! impl SprigApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn draw(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
//!         ctx.renderer
//!             .submit_quad(Vec2::new(640.0, 384.0), Vec2::splat(64.0), Color::RED);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod runner;

pub use app::SprigApp;
pub use context::AppContext;
pub use runner::{run_app, AppConfig};

pub use glam;
pub use sprig_core::{Color, WindowExtent};
pub use sprig_render::{Renderer, RendererConfig, TextureId};
pub use winit::event::WindowEvent;
