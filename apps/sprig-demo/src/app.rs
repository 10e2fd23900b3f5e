//! Demo application: bouncing sprites.

use glam::Vec2;
use rand::prelude::*;
use tracing::info;
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use sprig_app::{AppContext, Color, SprigApp, TextureId, WindowEvent};
use sprig_render::GeometryBuffer;

use crate::flag_value;

const DIAMOND_VERTICES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/diamond.vertex");
const DIAMOND_INDICES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets/diamond.index");

/// Side of the generated checker texture, in texels.
const CHECKER_SIZE: u32 = 64;
/// Side of one checker cell, in texels.
const CHECKER_CELL: u32 = 8;

/// Speed range of the sprites, in pixels per second.
const MIN_SPEED: f32 = 60.0;
const MAX_SPEED: f32 = 260.0;

/// Demo parameters (from CLI or defaults).
#[derive(Debug, Clone)]
pub struct DemoParams {
    pub quads: usize,
    pub shapes: usize,
    pub seed: u64,
}

impl Default for DemoParams {
    fn default() -> Self {
        Self {
            quads: 200,
            shapes: 40,
            seed: 42,
        }
    }
}

impl DemoParams {
    /// Parse parameters from command line arguments.
    pub fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::parse(&args)
    }

    fn parse(args: &[String]) -> Self {
        let mut params = Self::default();
        if let Some(v) = flag_value(args, "--quads").and_then(|v| v.parse().ok()) {
            params.quads = v;
        }
        if let Some(v) = flag_value(args, "--shapes").and_then(|v| v.parse().ok()) {
            params.shapes = v;
        }
        if let Some(v) = flag_value(args, "--seed").and_then(|v| v.parse().ok()) {
            params.seed = v;
        }
        params
    }
}

/// A sprite moving in a straight line, reflected at the window edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bouncer {
    pub position: Vec2,
    pub velocity: Vec2,
    pub size: Vec2,
}

impl Bouncer {
    /// Advance by `dt` seconds inside a `bounds`-sized window.
    pub fn step(&mut self, dt: f32, bounds: Vec2) {
        let half = self.size * 0.5;
        self.position += self.velocity * dt;

        for axis in 0..2 {
            let (min, max) = (half[axis], bounds[axis] - half[axis]);
            if self.position[axis] < min {
                self.position[axis] = min;
                self.velocity[axis] = self.velocity[axis].abs();
            } else if self.position[axis] > max {
                self.position[axis] = max.max(min);
                self.velocity[axis] = -self.velocity[axis].abs();
            }
        }
    }

    fn random(rng: &mut impl Rng, bounds: Vec2, size: Vec2) -> Self {
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let speed = rng.gen_range(MIN_SPEED..MAX_SPEED);
        Self {
            position: Vec2::new(rng.gen_range(0.0..bounds.x), rng.gen_range(0.0..bounds.y)),
            velocity: Vec2::from_angle(angle) * speed,
            size,
        }
    }
}

/// RGBA8 checkerboard of two colors.
pub fn checker_pixels(size: u32, cell: u32, a: Color, b: Color) -> Vec<u8> {
    let to_rgba = |c: Color| c.to_array().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8);
    let (a, b) = (to_rgba(a), to_rgba(b));

    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let even = (x / cell + y / cell) % 2 == 0;
            pixels.extend_from_slice(if even { &a } else { &b });
        }
    }
    pixels
}

#[derive(Debug, Clone, Copy)]
enum SpriteKind {
    Quad(Color),
    Diamond(Color),
    Textured,
}

/// Demo application state.
pub struct Demo {
    sprites: Vec<(SpriteKind, Bouncer)>,
    diamond: GeometryBuffer,
    checker: TextureId,
    paused: bool,
    dropped: usize,
}

impl SprigApp for Demo {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let params = DemoParams::from_args();
        info!(?params, "Starting demo");

        let diamond = ctx
            .renderer
            .load_geometry("diamond", DIAMOND_VERTICES, DIAMOND_INDICES)?;
        let pixels = checker_pixels(CHECKER_SIZE, CHECKER_CELL, Color::WHITE, Color::MAGENTA);
        let checker = ctx
            .renderer
            .upload_texture("checker", CHECKER_SIZE, CHECKER_SIZE, &pixels)?;

        let extent = ctx.extent();
        let bounds = Vec2::new(extent.width as f32, extent.height as f32);
        let mut rng = StdRng::seed_from_u64(params.seed);
        let palette = [Color::RED, Color::GREEN, Color::BLUE, Color::MAGENTA];

        let mut sprites = Vec::with_capacity(params.quads + params.shapes);
        for i in 0..params.quads {
            let size = Vec2::splat(rng.gen_range(8.0..32.0));
            sprites.push((
                SpriteKind::Quad(palette[i % palette.len()]),
                Bouncer::random(&mut rng, bounds, size),
            ));
        }
        for i in 0..params.shapes {
            let kind = if i % 2 == 0 {
                SpriteKind::Diamond(palette[(i / 2) % palette.len()])
            } else {
                SpriteKind::Textured
            };
            let size = Vec2::splat(rng.gen_range(32.0..96.0));
            sprites.push((kind, Bouncer::random(&mut rng, bounds, size)));
        }

        Ok(Self {
            sprites,
            diamond,
            checker,
            paused: false,
            dropped: 0,
        })
    }

    fn update(&mut self, ctx: &AppContext, dt: f32) {
        if self.paused {
            return;
        }
        let extent = ctx.extent();
        let bounds = Vec2::new(extent.width as f32, extent.height as f32);
        for (_, sprite) in &mut self.sprites {
            sprite.step(dt, bounds);
        }
    }

    fn draw(&mut self, ctx: &mut AppContext) -> anyhow::Result<()> {
        let renderer = &mut ctx.renderer;
        let mut dropped = 0;

        for (kind, sprite) in &self.sprites {
            let accepted = match *kind {
                SpriteKind::Quad(color) => renderer.submit_quad(sprite.position, sprite.size, color),
                SpriteKind::Diamond(color) => renderer.submit_shape(
                    self.diamond.vertices,
                    self.diamond.indices,
                    sprite.position,
                    sprite.size,
                    color,
                    None,
                )?,
                SpriteKind::Textured => {
                    renderer.submit_textured_quad(sprite.position, sprite.size, self.checker)?
                }
            };
            if !accepted {
                dropped += 1;
            }
        }

        if dropped != self.dropped {
            tracing::warn!(dropped, "Sprites dropped at batch capacity");
            self.dropped = dropped;
        }
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput {
            event:
                KeyEvent {
                    physical_key: PhysicalKey::Code(KeyCode::Space),
                    state: ElementState::Pressed,
                    repeat: false,
                    ..
                },
            ..
        } = event
        {
            self.paused = !self.paused;
            info!(paused = self.paused, "Toggled pause");
            return true;
        }
        false
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        info!(
            frames = ctx.frame_count,
            textures = ctx.renderer.assets().texture_count(),
            "Demo finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bouncer_reflects_off_right_edge() {
        let mut b = Bouncer {
            position: Vec2::new(95.0, 50.0),
            velocity: Vec2::new(100.0, 0.0),
            size: Vec2::splat(10.0),
        };
        b.step(0.1, Vec2::new(100.0, 100.0));
        assert_relative_eq!(b.position.x, 95.0);
        assert_relative_eq!(b.velocity.x, -100.0);
    }

    #[test]
    fn bouncer_reflects_off_top_edge() {
        let mut b = Bouncer {
            position: Vec2::new(50.0, 6.0),
            velocity: Vec2::new(0.0, -50.0),
            size: Vec2::splat(10.0),
        };
        b.step(0.1, Vec2::new(100.0, 100.0));
        assert_relative_eq!(b.position.y, 5.0);
        assert_relative_eq!(b.velocity.y, 50.0);
    }

    #[test]
    fn checker_alternates_cells() {
        let pixels = checker_pixels(4, 2, Color::WHITE, Color::BLACK);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert_eq!(&pixels[0..4], &[255, 255, 255, 255]);
        // x = 2, y = 0 is in the second cell
        assert_eq!(&pixels[8..12], &[0, 0, 0, 255]);
        // x = 2, y = 2 is back to the first color
        let idx = (2 * 4 + 2) * 4;
        assert_eq!(&pixels[idx..idx + 4], &[255, 255, 255, 255]);
    }

    #[test]
    fn params_from_flags() {
        let args: Vec<String> = ["demo", "--quads", "12", "--seed", "7", "--shapes", "x"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let params = DemoParams::parse(&args);
        assert_eq!(params.quads, 12);
        assert_eq!(params.seed, 7);
        assert_eq!(params.shapes, DemoParams::default().shapes);
    }

    #[test]
    fn seeded_sprites_start_inside_the_window() {
        let bounds = Vec2::new(1280.0, 768.0);
        let spawn = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..100)
                .map(|_| Bouncer::random(&mut rng, bounds, Vec2::splat(16.0)))
                .collect::<Vec<_>>()
        };

        let sprites = spawn(42);
        assert_eq!(sprites, spawn(42));
        for sprite in &sprites {
            assert!(sprite.position.cmpge(Vec2::ZERO).all());
            assert!(sprite.position.cmplt(bounds).all());
            let speed = sprite.velocity.length();
            assert!((MIN_SPEED - 1e-3..MAX_SPEED + 1e-3).contains(&speed));
        }
    }
}
