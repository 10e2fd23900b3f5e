//! GPU context management.
//!
//! [`DeviceContext`] owns the instance, the logical device, the allocator, the
//! command pool and the shared sampler. [`GpuContext`] adds everything needed
//! to present: swapchain, render pass, framebuffers, the frame's
//! synchronization primitives and its primary command buffer.
//!
//! Teardown order follows field order: presentation objects, then device
//! objects, then the device, then surface, messenger and instance.

use crate::capabilities::{select_adapter, AdapterChoice, AdapterInfo, AdapterRequirements};
use crate::command::{execute_single_time_commands, CommandPool};
use crate::diagnostics::Diagnostics;
use crate::error::{GpuError, Result};
use crate::instance::InstanceContext;
use crate::memory::{GpuAllocator, GpuBuffer, GpuImage};
use crate::render_pass::RenderPass;
use crate::surface::SurfaceContext;
use crate::swapchain::{color_subresource_range, Swapchain, SwapchainPlan};
use crate::sync::FrameSync;
use crate::transfer::{
    cmd_copy_buffer, cmd_copy_buffer_to_image, cmd_transition_image_layout, LayoutTransition,
};
use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use sprig_core::WindowExtent;
use std::ops::Deref;
use std::sync::Arc;

/// Logical device and the objects every renderer needs, headless or not.
pub struct DeviceContext {
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<GpuAllocator>>,
    queue_family: u32,
    queue: vk::Queue,
    command_pool: CommandPool,
    sampler: vk::Sampler,
    adapter: AdapterInfo,
    diag: Diagnostics,
    // Dropped after the device is destroyed
    instance: InstanceContext,
}

impl DeviceContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared device handle for components that free their own objects.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Shared allocator for components that free their own memory.
    pub fn allocator_arc(&self) -> Arc<Mutex<GpuAllocator>> {
        Arc::clone(&self.allocator)
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The queue used for graphics, transfers and presentation.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Family index of [`queue`](Self::queue).
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// The command pool; its buffers are individually resettable.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Linear, repeating sampler shared by every texture.
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Snapshot of the selected adapter.
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    /// Instance-level objects.
    pub fn instance(&self) -> &InstanceContext {
        &self.instance
    }

    /// Logging context of the device.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: device is valid for the lifetime of self
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Create a buffer with explicit usage and memory visibility.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.allocator.lock().create_buffer(size, usage, location, name)
    }

    /// Free a buffer created by [`create_buffer`](Self::create_buffer).
    pub fn destroy_buffer(&self, buffer: &mut GpuBuffer) -> Result<()> {
        self.allocator.lock().free_buffer(buffer)
    }

    /// Create a 2D image with explicit usage, tiling and memory visibility.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        self.allocator
            .lock()
            .create_image(width, height, format, tiling, usage, location, name)
    }

    /// Free an image created by [`create_image`](Self::create_image).
    pub fn destroy_image(&self, image: &mut GpuImage) -> Result<()> {
        self.allocator.lock().free_image(image)
    }

    /// Create a color view of a single-mip 2D image.
    pub fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());
        // SAFETY: the caller owns a live image on this device
        Ok(unsafe { self.device.create_image_view(&view_info, None)? })
    }

    /// Record, submit and wait for a one-shot command buffer.
    pub fn one_shot<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &*self.device;
        // SAFETY: pool and queue belong to this device and family
        unsafe {
            execute_single_time_commands(device, &self.command_pool, self.queue, |cmd| {
                f(device, cmd);
            })
        }
    }

    /// Transition an image's layout with the caller's barrier masks, waiting
    /// for completion.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        transition: &LayoutTransition,
    ) -> Result<()> {
        // SAFETY: the command buffer is recording inside one_shot
        self.one_shot(|device, cmd| unsafe {
            cmd_transition_image_layout(device, cmd, image, transition);
        })
    }

    /// Copy `size` bytes between buffers, waiting for completion.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: u64) -> Result<()> {
        // SAFETY: the command buffer is recording inside one_shot
        self.one_shot(|device, cmd| unsafe { cmd_copy_buffer(device, cmd, src, dst, size) })
    }

    /// Copy tightly packed texels into an image in `TRANSFER_DST_OPTIMAL`
    /// layout, waiting for completion.
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> Result<()> {
        // SAFETY: the command buffer is recording inside one_shot
        self.one_shot(|device, cmd| unsafe {
            cmd_copy_buffer_to_image(device, cmd, buffer, image, width, height);
        })
    }

    /// Upload `bytes` into a new device-local buffer through a staging copy.
    pub fn upload_buffer(
        &self,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        let size = bytes.len() as u64;
        let mut staging = self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &format!("{name} staging"),
        )?;

        let result = staging.write_bytes(0, bytes).and_then(|()| {
            let mut buffer = self.create_buffer(
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
                name,
            )?;
            match self.copy_buffer(staging.buffer, buffer.buffer, size) {
                Ok(()) => Ok(buffer),
                Err(e) => {
                    self.destroy_buffer(&mut buffer)?;
                    Err(e)
                }
            }
        });

        self.destroy_buffer(&mut staging)?;
        result
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        // SAFETY: every component borrowing the device has been dropped by now
        unsafe {
            self.diag.check("device_wait_idle", self.device.device_wait_idle());
            self.device.destroy_sampler(self.sampler, None);
            self.command_pool.destroy(&self.device);

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
        }
        // `instance` drops next: surface, messenger, instance
    }
}

/// A device context that can present to a window.
pub struct GpuContext {
    swapchain: Swapchain,
    render_pass: RenderPass,
    sync: FrameSync,
    primary: vk::CommandBuffer,
    device: DeviceContext,
}

impl GpuContext {
    /// The swapchain.
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// The render pass and its framebuffers.
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Synchronization primitives of the frame in flight.
    pub fn frame_sync(&self) -> &FrameSync {
        &self.sync
    }

    /// The reusable primary command buffer.
    pub fn primary_command_buffer(&self) -> vk::CommandBuffer {
        self.primary
    }

    /// Swapchain extent in pixels.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Swapchain extent as a window extent.
    pub fn window_extent(&self) -> WindowExtent {
        WindowExtent::new(self.swapchain.extent.width, self.swapchain.extent.height)
    }
}

impl Deref for GpuContext {
    type Target = DeviceContext;

    fn deref(&self) -> &DeviceContext {
        &self.device
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        let device = &*self.device.device;
        // SAFETY: all work is drained before anything is destroyed
        unsafe {
            self.device
                .diag
                .check("device_wait_idle", device.device_wait_idle());
            self.device.command_pool.free(device, &[self.primary]);
            self.sync.destroy(device);
            self.render_pass.destroy(device);
            self.swapchain.destroy(device);
        }
        // `device` drops next
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    diag: Diagnostics,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Sprig".to_string(),
            enable_validation: cfg!(debug_assertions),
            diag: Diagnostics::default(),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Logging context the created objects report through.
    pub fn diagnostics(mut self, diag: Diagnostics) -> Self {
        self.diag = diag;
        self
    }

    /// Build a context presenting to `window`, whose drawable area is
    /// `width`×`height` pixels.
    ///
    /// Fails when no adapter can render and present to the window.
    pub fn build<W>(self, window: &W, width: u32, height: u32) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let mut instance = InstanceContext::new(
            &self.app_name,
            Some(display),
            self.enable_validation,
            &self.diag,
        )?;
        // SAFETY: the instance was created with the window's surface extensions;
        // the caller keeps the window alive for the lifetime of the context
        instance.surface = Some(unsafe {
            SurfaceContext::from_window(&instance.entry, &instance.instance, window)?
        });

        let (device, choice) =
            create_device_context(instance, &AdapterRequirements::windowed(), &self.diag)?;

        let surface = device
            .instance
            .surface
            .as_ref()
            .map(|s| s.surface)
            .ok_or_else(|| GpuError::SurfaceCreation("surface missing".to_string()))?;
        let capabilities = device
            .adapter
            .surface
            .as_ref()
            .map(|s| s.capabilities)
            .ok_or_else(|| GpuError::SurfaceCreation("surface not probed".to_string()))?;
        let plan = SwapchainPlan::new(&capabilities, &choice, width, height);

        // SAFETY: selection verified that the queue family presents to the
        // surface with the planned format and mode
        let mut swapchain = unsafe {
            Swapchain::new(
                &device.instance.instance,
                &device.device,
                surface,
                &plan,
                device.queue_family,
            )?
        };

        // SAFETY: the swapchain is live
        let mut render_pass = match unsafe { RenderPass::new(&device.device, &swapchain) } {
            Ok(render_pass) => render_pass,
            Err(e) => {
                // SAFETY: nothing uses the swapchain yet
                unsafe { swapchain.destroy(&device.device) };
                return Err(e);
            }
        };

        // SAFETY: device is valid
        let frame_objects = unsafe {
            FrameSync::new(&device.device).and_then(|sync| {
                match device.command_pool.allocate(
                    &device.device,
                    vk::CommandBufferLevel::PRIMARY,
                    1,
                ) {
                    Ok(buffers) => Ok((sync, buffers[0])),
                    Err(e) => {
                        sync.destroy(&device.device);
                        Err(e)
                    }
                }
            })
        };
        let (sync, primary) = match frame_objects {
            Ok(objects) => objects,
            Err(e) => {
                // SAFETY: nothing has been submitted
                unsafe {
                    render_pass.destroy(&device.device);
                    swapchain.destroy(&device.device);
                }
                return Err(e);
            }
        };

        self.diag.in_scope(|| {
            tracing::info!(
                images = swapchain.image_count(),
                width = swapchain.extent.width,
                height = swapchain.extent.height,
                format = ?swapchain.format,
                "Swapchain ready"
            );
        });

        Ok(GpuContext {
            swapchain,
            render_pass,
            sync,
            primary,
            device,
        })
    }

    /// Build a device without a surface, for off-screen work and tests.
    pub fn build_headless(self) -> Result<DeviceContext> {
        let instance =
            InstanceContext::new(&self.app_name, None, self.enable_validation, &self.diag)?;
        let (device, _) =
            create_device_context(instance, &AdapterRequirements::headless(), &self.diag)?;
        Ok(device)
    }
}

/// Select an adapter and create the device, allocator, command pool and sampler.
fn create_device_context(
    instance: InstanceContext,
    requirements: &AdapterRequirements,
    diag: &Diagnostics,
) -> Result<(DeviceContext, AdapterChoice)> {
    let _span = diag.span().enter();

    // SAFETY: instance is valid
    let physical_devices = unsafe { instance.instance.enumerate_physical_devices()? };
    let adapters: Vec<AdapterInfo> = physical_devices
        .into_iter()
        .filter_map(|pd| {
            // SAFETY: pd was enumerated from this instance, as was the surface
            match unsafe { AdapterInfo::probe(&instance.instance, pd, instance.surface.as_ref()) } {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::warn!("Skipping adapter that failed to probe: {e}");
                    None
                }
            }
        })
        .collect();

    let (index, choice) = select_adapter(&adapters, requirements)?;
    let adapter = adapters.into_iter().nth(index).ok_or(GpuError::NoSuitableDevice)?;
    tracing::info!(
        validation = instance.has_debug_messenger(),
        "Selected GPU: {}",
        adapter.summary()
    );

    let queue_priority = [1.0_f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(choice.queue_family)
        .queue_priorities(&queue_priority)];
    let extension_names: Vec<_> = requirements
        .device_extensions
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();
    let features = vk::PhysicalDeviceFeatures::default();
    let device_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    // SAFETY: the adapter supports the family and extensions requested
    let device = unsafe {
        instance
            .instance
            .create_device(adapter.physical_device, &device_info, None)?
    };
    // SAFETY: queue 0 of the family was requested above
    let queue = unsafe { device.get_device_queue(choice.queue_family, 0) };
    let device = Arc::new(device);

    // SAFETY: instance, device and physical device are valid
    let allocator = match unsafe {
        GpuAllocator::new(&instance.instance, Arc::clone(&device), adapter.physical_device)
    } {
        Ok(allocator) => Arc::new(Mutex::new(allocator)),
        Err(e) => {
            // SAFETY: nothing has been created on the device
            unsafe { device.destroy_device(None) };
            return Err(e);
        }
    };

    // SAFETY: device is valid and owns the family
    let pools = unsafe {
        CommandPool::new(&device, choice.queue_family).and_then(|pool| {
            match create_sampler(&device) {
                Ok(sampler) => Ok((pool, sampler)),
                Err(e) => {
                    pool.destroy(&device);
                    Err(e)
                }
            }
        })
    };
    let (command_pool, sampler) = match pools {
        Ok(objects) => objects,
        Err(e) => {
            allocator.lock().shutdown();
            // SAFETY: the allocator released all memory
            unsafe { device.destroy_device(None) };
            return Err(e);
        }
    };

    tracing::debug!(queue_family = choice.queue_family, "Logical device created");

    Ok((
        DeviceContext {
            physical_device: adapter.physical_device,
            device,
            allocator,
            queue_family: choice.queue_family,
            queue,
            command_pool,
            sampler,
            adapter,
            diag: diag.child("device"),
            instance,
        },
        choice,
    ))
}

/// Linear filtering, repeat addressing, no anisotropy.
///
/// # Safety
/// The device must be valid.
unsafe fn create_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);
    // SAFETY: forwarded from the caller
    Ok(unsafe { device.create_sampler(&info, None)? })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn headless_device_uploads_buffers() {
        let device = GpuContextBuilder::new()
            .validation(false)
            .diagnostics(Diagnostics::disabled())
            .build_headless()
            .expect("headless device");

        let bytes: Vec<u8> = (0..64).collect();
        let mut uploaded = device
            .upload_buffer(&bytes, vk::BufferUsageFlags::VERTEX_BUFFER, "test vertices")
            .unwrap();
        assert_eq!(uploaded.size, 64);

        let mut readback = device
            .create_buffer(
                64,
                vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuToCpu,
                "readback",
            )
            .unwrap();
        let mut src = device
            .create_buffer(
                64,
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::CpuToGpu,
                "src",
            )
            .unwrap();
        src.write_bytes(0, &bytes).unwrap();
        device.copy_buffer(src.buffer, readback.buffer, 64).unwrap();
        assert_eq!(readback.read_bytes(0, 64).unwrap(), bytes);

        device.destroy_buffer(&mut src).unwrap();
        device.destroy_buffer(&mut readback).unwrap();
        device.destroy_buffer(&mut uploaded).unwrap();
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn headless_texture_upload_path() {
        let device = GpuContextBuilder::new()
            .validation(false)
            .build_headless()
            .expect("headless device");

        let mut image = device
            .create_image(
                4,
                4,
                vk::Format::R8G8B8A8_SRGB,
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                MemoryLocation::GpuOnly,
                "texture",
            )
            .unwrap();
        let mut staging = device
            .create_buffer(
                64,
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::CpuToGpu,
                "texels",
            )
            .unwrap();
        staging.write_bytes(0, &[255; 64]).unwrap();

        device
            .transition_image_layout(image.image, &LayoutTransition::undefined_to_transfer_dst())
            .unwrap();
        device
            .copy_buffer_to_image(staging.buffer, image.image, 4, 4)
            .unwrap();
        device
            .transition_image_layout(
                image.image,
                &LayoutTransition::transfer_dst_to_shader_read(),
            )
            .unwrap();

        device.destroy_buffer(&mut staging).unwrap();
        device.destroy_image(&mut image).unwrap();
    }
}
