//! Adapter capability detection and selection.
//!
//! Probing turns a physical device into a plain [`AdapterInfo`] snapshot;
//! selection is a pure function over snapshots so it can be exercised
//! without a GPU.

use crate::error::{GpuError, Result};
use crate::surface::{SurfaceContext, SurfaceSupport};
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Queue family as seen during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub supports_present: bool,
}

/// Snapshot of everything selection needs to know about one adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub physical_device: vk::PhysicalDevice,
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub extensions: HashSet<String>,
    /// Surface support; `None` when probing without a surface.
    pub surface: Option<SurfaceSupport>,
    /// The device's memory-type table.
    pub memory_types: Vec<vk::MemoryType>,
    pub max_uniform_buffer_range: u32,
}

impl AdapterInfo {
    /// Probe a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid, and `surface` must have
    /// been created on the same instance.
    pub unsafe fn probe(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface: Option<&SurfaceContext>,
    ) -> Result<Self> {
        // SAFETY: forwarded from the caller
        let (properties, memory_properties, families, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance.get_physical_device_queue_family_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let extensions = extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .filter_map(|name| name.to_str().ok().map(String::from))
            .collect();

        let queue_families = families
            .iter()
            .enumerate()
            .map(|(index, family)| QueueFamilyInfo {
                flags: family.queue_flags,
                // SAFETY: forwarded from the caller
                supports_present: surface.is_some_and(|s| unsafe {
                    s.supports_present(physical_device, index as u32)
                }),
            })
            .collect();

        let surface = match surface {
            // SAFETY: forwarded from the caller
            Some(s) => Some(unsafe { s.query(physical_device)? }),
            None => None,
        };

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            physical_device,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            queue_families,
            extensions,
            surface,
            memory_types: memory_properties.memory_types
                [..memory_properties.memory_type_count as usize]
                .to_vec(),
            max_uniform_buffer_range: properties.limits.max_uniform_buffer_range,
        })
    }

    /// Check this adapter against `requirements`.
    pub fn evaluate(
        &self,
        requirements: &AdapterRequirements,
    ) -> std::result::Result<AdapterChoice, Rejection> {
        let family = self
            .queue_families
            .iter()
            .position(|family| {
                family.flags.contains(vk::QueueFlags::GRAPHICS)
                    && (!requirements.presentation || family.supports_present)
            })
            .ok_or(Rejection::NoGraphicsPresentQueue)?;

        for extension in &requirements.device_extensions {
            let name = extension.to_string_lossy();
            if !self.extensions.contains(name.as_ref()) {
                return Err(Rejection::MissingExtension(name.into_owned()));
            }
        }

        let host_coherent = vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT;
        if !self
            .memory_types
            .iter()
            .any(|ty| ty.property_flags.contains(host_coherent))
        {
            return Err(Rejection::NoHostCoherentMemory);
        }

        let (surface_format, present_mode) = if requirements.presentation {
            let surface = self.surface.as_ref().ok_or(Rejection::NoSurface)?;
            let format = surface
                .formats
                .iter()
                .copied()
                .find(|f| {
                    f.format == requirements.surface_format.format
                        && f.color_space == requirements.surface_format.color_space
                })
                .ok_or(Rejection::SurfaceFormat)?;
            let mode = surface
                .present_modes
                .iter()
                .copied()
                .find(|&m| m == requirements.present_mode)
                .ok_or(Rejection::PresentMode)?;
            (format, mode)
        } else {
            (requirements.surface_format, requirements.present_mode)
        };

        Ok(AdapterChoice {
            queue_family: family as u32,
            surface_format,
            present_mode,
        })
    }

    /// Index of the first memory type allowed by `type_bits` with all of `flags`.
    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        self.memory_types
            .iter()
            .enumerate()
            .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(flags))
            .map(|(i, _)| i as u32)
    }

    /// Get a human-readable summary of the adapter.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{}",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
        )
    }
}

/// What the renderer needs from an adapter.
#[derive(Debug, Clone)]
pub struct AdapterRequirements {
    pub device_extensions: Vec<&'static CStr>,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    /// Require a queue family that can present, and a matching format and mode.
    pub presentation: bool,
}

impl AdapterRequirements {
    /// Requirements for rendering to a window.
    pub fn windowed() -> Self {
        Self {
            device_extensions: vec![ash::khr::swapchain::NAME],
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            presentation: true,
        }
    }

    /// Requirements for off-screen use: a graphics queue and host-coherent memory.
    pub fn headless() -> Self {
        Self {
            device_extensions: Vec::new(),
            presentation: false,
            ..Self::windowed()
        }
    }
}

/// Why an adapter was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NoGraphicsPresentQueue,
    MissingExtension(String),
    NoHostCoherentMemory,
    NoSurface,
    SurfaceFormat,
    PresentMode,
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, Copy)]
pub struct AdapterChoice {
    pub queue_family: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

/// Pick the first adapter that satisfies every requirement.
///
/// There is no scoring: enumeration order decides between adapters that all
/// qualify. Returns the index into `adapters`.
pub fn select_adapter(
    adapters: &[AdapterInfo],
    requirements: &AdapterRequirements,
) -> Result<(usize, AdapterChoice)> {
    for (index, adapter) in adapters.iter().enumerate() {
        match adapter.evaluate(requirements) {
            Ok(choice) => return Ok((index, choice)),
            Err(reason) => {
                tracing::debug!(adapter = %adapter.device_name, ?reason, "Adapter rejected");
            }
        }
    }
    Err(GpuError::NoSuitableDevice)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mock_adapter() -> AdapterInfo {
        let host_coherent = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        let device_local = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: 1280,
                height: 768,
            },
            ..Default::default()
        };

        AdapterInfo {
            physical_device: vk::PhysicalDevice::null(),
            vendor: GpuVendor::Other(0),
            device_name: "mock".to_string(),
            device_type: vk::PhysicalDeviceType::VIRTUAL_GPU,
            api_version: vk::API_VERSION_1_1,
            queue_families: vec![
                QueueFamilyInfo {
                    flags: vk::QueueFlags::TRANSFER,
                    supports_present: false,
                },
                QueueFamilyInfo {
                    flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                    supports_present: true,
                },
            ],
            extensions: ["VK_KHR_swapchain".to_string()].into_iter().collect(),
            surface: Some(SurfaceSupport {
                capabilities,
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::R8G8B8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
            }),
            memory_types: vec![device_local, host_coherent],
            max_uniform_buffer_range: 65536,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn selects_compatible_adapter() {
        let (index, choice) =
            select_adapter(&[mock_adapter()], &AdapterRequirements::windowed()).unwrap();
        assert_eq!(index, 0);
        assert_eq!(choice.queue_family, 1);
        assert_eq!(choice.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choice.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn missing_surface_format_is_fatal() {
        let mut adapter = mock_adapter();
        if let Some(surface) = adapter.surface.as_mut() {
            surface.formats.retain(|f| f.format != vk::Format::B8G8R8A8_SRGB);
        }
        assert_eq!(
            adapter.evaluate(&AdapterRequirements::windowed()).err(),
            Some(Rejection::SurfaceFormat)
        );
        assert!(matches!(
            select_adapter(&[adapter], &AdapterRequirements::windowed()),
            Err(GpuError::NoSuitableDevice)
        ));
    }

    #[test]
    fn first_qualifying_adapter_wins() {
        let mut no_present = mock_adapter();
        for family in &mut no_present.queue_families {
            family.supports_present = false;
        }
        let mut second = mock_adapter();
        second.device_name = "second".to_string();
        let third = mock_adapter();

        let (index, _) = select_adapter(
            &[no_present, second, third],
            &AdapterRequirements::windowed(),
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn missing_swapchain_extension() {
        let mut adapter = mock_adapter();
        adapter.extensions.clear();
        assert_eq!(
            adapter.evaluate(&AdapterRequirements::windowed()).err(),
            Some(Rejection::MissingExtension("VK_KHR_swapchain".to_string()))
        );
    }

    #[test]
    fn missing_fifo() {
        let mut adapter = mock_adapter();
        if let Some(surface) = adapter.surface.as_mut() {
            surface.present_modes = vec![vk::PresentModeKHR::IMMEDIATE];
        }
        assert_eq!(
            adapter.evaluate(&AdapterRequirements::windowed()).err(),
            Some(Rejection::PresentMode)
        );
    }

    #[test]
    fn headless_ignores_surface() {
        let mut adapter = mock_adapter();
        adapter.surface = None;
        adapter.extensions.clear();
        let choice = adapter.evaluate(&AdapterRequirements::headless()).unwrap();
        assert_eq!(choice.queue_family, 1);
    }

    #[test]
    fn memory_type_lookup() {
        let adapter = mock_adapter();
        let coherent =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(adapter.find_memory_type(0b11, coherent), Some(1));
        assert_eq!(adapter.find_memory_type(0b01, coherent), None);
    }
}
