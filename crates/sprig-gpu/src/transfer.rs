//! Transfer commands and image layout transitions.
//!
//! These record into a caller-provided command buffer. The one-shot,
//! synchronously waited variants live on [`DeviceContext`](crate::DeviceContext).

use crate::swapchain::color_subresource_range;
use ash::vk;

/// An image layout change and the memory dependency guarding it.
///
/// Barrier correctness is the caller's responsibility: the masks are passed to
/// the driver as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Fresh image about to receive a buffer copy.
    pub const fn undefined_to_transfer_dst() -> Self {
        Self {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }
    }

    /// Uploaded image about to be sampled by fragment shaders.
    pub const fn transfer_dst_to_shader_read() -> Self {
        Self {
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }
    }
}

/// Record a layout transition of the image's single color subresource.
///
/// # Safety
/// The command buffer must be recording and the image must be valid.
pub unsafe fn cmd_transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    transition: &LayoutTransition,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(transition.old_layout)
        .new_layout(transition.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access);

    // SAFETY: forwarded from the caller
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Record a copy of the first `size` bytes of `src` into `dst`.
///
/// # Safety
/// The command buffer must be recording and both buffers must hold `size` bytes.
pub unsafe fn cmd_copy_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: u64,
) {
    let region = vk::BufferCopy::default().size(size);
    // SAFETY: forwarded from the caller
    unsafe { device.cmd_copy_buffer(cmd, src, dst, &[region]) };
}

/// Record a copy of tightly packed texels from `buffer` into a
/// `TRANSFER_DST_OPTIMAL` image.
///
/// # Safety
/// The command buffer must be recording and the image must be in
/// `TRANSFER_DST_OPTIMAL` layout.
pub unsafe fn cmd_copy_buffer_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    width: u32,
    height: u32,
) {
    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    // SAFETY: forwarded from the caller
    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions_chain() {
        let first = LayoutTransition::undefined_to_transfer_dst();
        let second = LayoutTransition::transfer_dst_to_shader_read();
        assert_eq!(first.new_layout, second.old_layout);
        assert_eq!(first.dst_access, second.src_access);
        assert_eq!(first.dst_stage, second.src_stage);
        assert_eq!(
            second.new_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }
}
