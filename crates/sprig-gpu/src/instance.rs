//! Vulkan instance creation and the validation messenger.

use crate::diagnostics::Diagnostics;
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, c_void, CStr, CString};

/// Validation layers to enable when validation is requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Instance-level Vulkan objects.
///
/// Dropping this destroys, in order, the presentation surface, the debug
/// messenger and the instance. Owners must destroy the logical device first.
pub struct InstanceContext {
    // Entry must outlive every object loaded through it
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug: Option<DebugMessenger>,
    pub(crate) surface: Option<SurfaceContext>,
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl InstanceContext {
    /// Load Vulkan and create an instance.
    ///
    /// `display` selects the window-system surface extensions; pass `None` for a
    /// headless instance. The validation messenger is attached on a best-effort
    /// basis: if the layer or extension is missing a warning is logged and
    /// creation continues without it.
    pub fn new(
        app_name: &str,
        display: Option<RawDisplayHandle>,
        enable_validation: bool,
        diag: &Diagnostics,
    ) -> Result<Self> {
        let _span = diag.span().enter();

        // SAFETY: the loaded library is kept alive by `entry` for the lifetime of self
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loader(e.to_string()))?;

        let app_name = CString::new(app_name)
            .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Sprig")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extension_names: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(|e| GpuError::ExtensionNotSupported(format!("surface: {e}")))?
                .to_vec(),
            None => Vec::new(),
        };

        #[cfg(target_os = "macos")]
        {
            extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
            extension_names.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        }

        // SAFETY: entry is valid
        let available_extensions =
            unsafe { entry.enumerate_instance_extension_properties(None) }.unwrap_or_default();
        let has_debug_utils = available_extensions.iter().any(|props| {
            props.extension_name_as_c_str().ok() == Some(ash::ext::debug_utils::NAME)
        });

        let mut layers = Vec::new();
        let mut with_messenger = false;
        if enable_validation {
            // SAFETY: entry is valid
            let available_layers =
                unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
            for layer in validation_layers() {
                let found = available_layers
                    .iter()
                    .any(|props| props.layer_name_as_c_str().ok() == Some(layer));
                if found {
                    layers.push(layer);
                } else {
                    tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
                }
            }

            if has_debug_utils {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                with_messenger = true;
            } else {
                tracing::warn!("VK_EXT_debug_utils not available, validation output disabled");
            }
        }

        let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        // Required for MoltenVK on macOS
        #[cfg(target_os = "macos")]
        let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        #[cfg(not(target_os = "macos"))]
        let create_flags = vk::InstanceCreateFlags::empty();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .flags(create_flags);

        // SAFETY: all pointers in create_info outlive the call
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug = if with_messenger {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(
            layers = layer_names.len(),
            extensions = extension_names.len(),
            "Vulkan instance created"
        );

        Ok(Self {
            entry,
            instance,
            debug,
            surface: None,
        })
    }

    /// The Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// The loaded entry points.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Whether validation output is routed to the log.
    pub fn has_debug_messenger(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        // SAFETY: the owner destroyed the device before dropping the instance
        unsafe {
            if let Some(surface) = self.surface.take() {
                surface.destroy();
            }
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl DebugMessenger {
    fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        // SAFETY: instance was created with VK_EXT_debug_utils enabled
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };

        Ok(Self { loader, messenger })
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the driver passes a valid callback data pointer for the duration of the call
    let message = unsafe {
        let data = &*p_callback_data;
        if data.p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(data.p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "vulkan", kind = ?message_type, "{message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "vulkan", kind = ?message_type, "{message}");
        }
        // Loader chatter arrives as INFO
        _ => tracing::debug!(target: "vulkan", kind = ?message_type, "{message}"),
    }
    vk::FALSE
}
