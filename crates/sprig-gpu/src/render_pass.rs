//! The presentation render pass and its framebuffers.

use crate::error::Result;
use crate::swapchain::Swapchain;
use ash::vk;

/// Single-subpass color render pass with one framebuffer per swapchain image.
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
}

impl RenderPass {
    /// Create the render pass for `swapchain`'s format and a framebuffer for
    /// each of its image views.
    ///
    /// # Safety
    /// The device and swapchain must be valid.
    pub unsafe fn new(device: &ash::Device, swapchain: &Swapchain) -> Result<Self> {
        let attachments = [vk::AttachmentDescription::default()
            .format(swapchain.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];

        // The acquire semaphore is waited on at COLOR_ATTACHMENT_OUTPUT, so the
        // layout transition must not happen before that stage.
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        // SAFETY: forwarded from the caller
        let render_pass = unsafe { device.create_render_pass(&create_info, None)? };

        let mut this = Self {
            render_pass,
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
            extent: swapchain.extent,
        };

        for &view in &swapchain.image_views {
            let views = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&views)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            // SAFETY: view belongs to the swapchain and matches the attachment format
            match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
                Ok(framebuffer) => this.framebuffers.push(framebuffer),
                Err(e) => {
                    // SAFETY: nothing has used the render pass yet
                    unsafe { this.destroy(device) };
                    return Err(e.into());
                }
            }
        }

        Ok(this)
    }

    /// Framebuffer for a swapchain image index.
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    /// Full-extent render area.
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    /// Destroy the framebuffers and the render pass.
    ///
    /// # Safety
    /// No command buffer referencing them may be pending.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        // SAFETY: forwarded from the caller
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }
        self.render_pass = vk::RenderPass::null();
    }
}
