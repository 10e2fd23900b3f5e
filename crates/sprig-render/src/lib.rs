//! Batched 2D rendering on top of `sprig-gpu`.
//!
//! This crate provides:
//! - Instanced quad and shape batches keyed by geometry and texture
//! - The uniform block layout shared with the shaders
//! - An asset library of uploaded geometry and textures
//! - The frame orchestrator and its Vulkan frame target
//! - The [`Renderer`] facade game code submits draws to

pub mod assets;
pub mod batch;
pub mod error;
pub mod frame;
pub mod recorder;
pub mod renderer;
pub mod uniforms;

pub use assets::{AssetLibrary, GeometryBuffer, IndexSetId, TextureId, VertexSetId, UNIT_QUAD};
pub use batch::{QuadBatch, Renderable, ShapeBatch, ShapeKey};
pub use error::{RenderError, Result};
pub use frame::{FrameOrchestrator, FrameTarget, VulkanFrameTarget};
pub use recorder::{CommandRecorder, DrawRecorder};
pub use renderer::{Renderer, RendererConfig};
pub use uniforms::InstanceBlock;

pub use sprig_core::{Color, WindowExtent};
