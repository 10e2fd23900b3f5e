//! Core types for the Sprig 2D renderer.
//!
//! This crate provides the foundational types used throughout the workspace:
//! - Colors and window extents
//! - The window-pixel to clip-space transform
//! - Plain-text geometry files (vertices and indices)
//! - Common error types

pub mod coords;
pub mod error;
pub mod geometry;
pub mod types;

pub use coords::ClipSpace;
pub use error::{Error, Result};
pub use geometry::{GeometryData, Vertex};
pub use types::{Color, WindowExtent};
