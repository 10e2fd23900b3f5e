//! Renderer error types.

use sprig_gpu::GpuError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building the renderer, loading assets or drawing.
#[derive(Error, Debug)]
pub enum RenderError {
    /// GPU error.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// Geometry file could not be read or parsed.
    #[error(transparent)]
    Asset(#[from] sprig_core::Error),

    /// Texture file could not be decoded.
    #[error("Cannot decode texture {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Texture pixels do not match the declared size.
    #[error("Texture {name}: expected {expected} bytes of RGBA, got {actual}")]
    TextureSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// An asset name is already taken.
    #[error("Asset {0} already loaded")]
    DuplicateAsset(String),

    /// Unknown asset name or handle.
    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    /// A frame failed after its swapchain image was acquired.
    #[error("Frame on image {image_index} abandoned: {source}")]
    FrameAbandoned {
        image_index: u32,
        #[source]
        source: Box<RenderError>,
    },

    /// A batch capacity differs from the one its shaders were compiled with.
    #[error("{pipeline} capacity {requested} does not match the compiled shaders ({compiled})")]
    CapacityMismatch {
        pipeline: &'static str,
        requested: usize,
        compiled: usize,
    },

    /// An index set references vertices the vertex set does not have.
    #[error("Index set {indices} reaches vertex {max_index}, vertex set {vertices} has {count}")]
    IncompatibleGeometry {
        vertices: String,
        indices: String,
        max_index: u32,
        count: u32,
    },
}

impl RenderError {
    /// Whether the frame loop cannot continue after this error.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::FrameAbandoned { .. })
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
