//! Swapchain management.

use crate::capabilities::AdapterChoice;
use crate::error::{GpuError, Result};
use ash::vk;

/// Image count, format and extent for a swapchain, decided before creation.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPlan {
    /// Requested `minImageCount`.
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// Plan a swapchain for the chosen adapter and the window's pixel size.
    ///
    /// Requests one image more than the surface minimum, clamped to the
    /// surface maximum when it has one.
    pub fn new(
        capabilities: &vk::SurfaceCapabilitiesKHR,
        choice: &AdapterChoice,
        desired_width: u32,
        desired_height: u32,
    ) -> Self {
        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
            image_count = capabilities.max_image_count;
        }

        Self {
            image_count,
            surface_format: choice.surface_format,
            present_mode: choice.present_mode,
            extent: calculate_extent(capabilities, desired_width, desired_height),
            pre_transform: capabilities.current_transform,
        }
    }
}

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain and one view per image.
    ///
    /// # Safety
    /// All handles must be valid and `surface` must be supported by
    /// `queue_family` with the planned format and present mode.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        surface: vk::SurfaceKHR,
        plan: &SwapchainPlan,
        queue_family: u32,
    ) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(instance, device);

        let queue_families = [queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        // SAFETY: forwarded from the caller
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let mut this = Self {
            swapchain,
            loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: plan.surface_format.format,
            extent: plan.extent,
        };

        // SAFETY: swapchain was just created on this loader
        this.images = match unsafe { this.loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                // SAFETY: nothing references the swapchain yet
                unsafe { this.destroy(device) };
                return Err(e.into());
            }
        };

        for &image in &this.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(this.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(color_subresource_range());

            // SAFETY: image belongs to the swapchain created above
            match unsafe { device.create_image_view(&view_info, None) } {
                Ok(view) => this.image_views.push(view),
                Err(e) => {
                    // SAFETY: only this function has seen the views
                    unsafe { this.destroy(device) };
                    return Err(e.into());
                }
            }
        }

        Ok(this)
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signalling `semaphore` once it is available.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    ///
    /// # Safety
    /// The semaphore must be valid and unsignaled.
    pub unsafe fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        // SAFETY: forwarded from the caller
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        Ok(result?)
    }

    /// Present an image after `wait_semaphores` are signaled.
    ///
    /// Returns whether the swapchain is suboptimal.
    ///
    /// # Safety
    /// The queue must support presentation to this swapchain's surface.
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: forwarded from the caller
        Ok(unsafe { self.loader.queue_present(queue, &present_info)? })
    }

    /// Destroy the image views and the swapchain.
    ///
    /// # Safety
    /// The swapchain and its views must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        // SAFETY: forwarded from the caller
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    } else {
        capabilities.current_extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::tests::mock_adapter;
    use crate::capabilities::{select_adapter, AdapterRequirements};

    fn plan_for(min: u32, max: u32) -> SwapchainPlan {
        let mut adapter = mock_adapter();
        let surface = adapter.surface.as_mut().unwrap();
        surface.capabilities.min_image_count = min;
        surface.capabilities.max_image_count = max;
        let caps = surface.capabilities;

        let (_, choice) = select_adapter(&[adapter], &AdapterRequirements::windowed()).unwrap();
        SwapchainPlan::new(&caps, &choice, 1280, 768)
    }

    #[test]
    fn mock_adapter_plan() {
        let plan = plan_for(2, 0);
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!((plan.extent.width, plan.extent.height), (1280, 768));
    }

    #[test]
    fn image_count_clamped_to_max() {
        assert_eq!(plan_for(2, 2).image_count, 2);
        assert_eq!(plan_for(1, 8).image_count, 2);
    }

    #[test]
    fn extent_follows_window_when_surface_is_flexible() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 1280, 768);
        assert_eq!((extent.width, extent.height), (1024, 768));
    }
}
