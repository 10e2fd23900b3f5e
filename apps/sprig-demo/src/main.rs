//! Sprig demo
//!
//! Bounces colored quads, textured quads and diamond shapes around a fixed
//! 1280×768 window.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p sprig-demo -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--quads <N>`: Number of untextured quads (default: 200)
//! - `--shapes <N>`: Number of diamonds and textured quads (default: 40)
//! - `--seed <N>`: Seed for initial positions and velocities (default: 42)
//! - `--shader-dir <DIR>`: Load compiled shaders from DIR instead of the built-in ones
//! - `--log-file <PATH>`: Write logs to a file instead of stdout
//! - `-h, --help`: Print help message
//!
//! `Space` pauses and resumes the simulation.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use sprig_app::{run_app, AppConfig, Color};

use crate::app::Demo;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 768;
const TARGET_FPS: u32 = 120;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let mut config = AppConfig::new("Sprig Demo")
        .with_size(WIDTH, HEIGHT)
        .with_target_fps(TARGET_FPS)
        .with_clear_color(Color::rgb(0.08, 0.09, 0.12));

    if let Some(dir) = flag_value(&args, "--shader-dir") {
        config = config.with_shader_dir(dir);
    }
    if let Some(path) = flag_value(&args, "--log-file") {
        config = config.with_log_file(path);
    }

    run_app::<Demo>(config)
}

/// Value following `flag`, if any.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn print_help() {
    eprintln!(
        "Sprig demo

USAGE:
    cargo run -p sprig-demo -- [OPTIONS]

OPTIONS:
    --quads <N>             Number of untextured quads (default: 200)
    --shapes <N>            Number of diamonds and textured quads (default: 40)
    --seed <N>              Seed for initial positions and velocities (default: 42)
    --shader-dir <DIR>      Load compiled shaders from DIR
    --log-file <PATH>       Write logs to a file instead of stdout
    -h, --help              Print this help message

KEYS:
    Space                   Pause / resume

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
