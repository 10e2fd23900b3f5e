//! Vulkan layer of the Sprig 2D renderer.
//!
//! This crate provides:
//! - Instance, debug messenger and presentation surface setup
//! - Adapter probing and first-fit selection
//! - Device, swapchain, render pass and frame synchronization
//! - Memory allocation via gpu-allocator, one-shot transfers and layout transitions
//! - Named descriptor groups with persistently mapped uniform buffers
//! - Named pipeline templates, layouts and pipelines

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod diagnostics;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use capabilities::{
    select_adapter, AdapterChoice, AdapterInfo, AdapterRequirements, GpuVendor, Rejection,
};
pub use command::CommandPool;
pub use context::{DeviceContext, GpuContext, GpuContextBuilder};
pub use descriptors::{BindingKind, BindingSpec, DescriptorGroupId, DescriptorRegistry};
pub use diagnostics::Diagnostics;
pub use error::{GpuError, Result};
pub use instance::InstanceContext;
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{PipelineId, PipelineLayoutId, PipelineRegistry, PipelineTemplate};
pub use render_pass::RenderPass;
pub use surface::{SurfaceContext, SurfaceSupport};
pub use swapchain::{Swapchain, SwapchainPlan};
pub use sync::FrameSync;
pub use transfer::LayoutTransition;
pub use gpu_allocator::MemoryLocation;
