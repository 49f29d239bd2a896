use super::app_data;
use super::config::RendererConfig;
use super::error::RendererError;

use anyhow::Result;
use log::*;
use std::collections::HashSet;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::window as vk_window;
use winit::window::Window;

use vulkanalia::vk::ExtDebugUtilsExtension;

pub unsafe fn create(
    window: &Window,
    entry: &Entry,
    config: &RendererConfig,
    data: &mut app_data::Data,
) -> Result<Instance> {
    let application_name = format!("{}\0", config.application_name);
    let application_info = vk::ApplicationInfo::builder()
        .application_name(application_name.as_bytes())
        .application_version(vk::make_version(1, 0, 0))
        .engine_name(b"Subpass Renderer\0")
        .engine_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(1, 0, 0));

    let available_layers = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .map(|l| l.layer_name)
        .collect::<HashSet<_>>();

    if config.validation && !available_layers.contains(&config.validation_layer) {
        return Err(RendererError::MissingValidationLayer.into());
    }

    let layers = if config.validation {
        vec![config.validation_layer.as_ptr()]
    } else {
        Vec::new()
    };

    let mut extensions = vk_window::get_required_instance_extensions(window)
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<*const c_char>>();

    if config.validation {
        extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
    }

    let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .user_callback(Some(debug_callback));

    let mut info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions);

    if config.validation {
        info = info.push_next(&mut debug_info);
    }

    let instance = entry.create_instance(&info, None)?;

    if config.validation {
        data.messenger = instance.create_debug_utils_messenger_ext(&debug_info, None)?;
    }

    info!(
        "Created instance for `{}` (validation {}).",
        config.application_name,
        if config.validation { "on" } else { "off" }
    );

    Ok(instance)
}

pub unsafe fn destroy_messenger(instance: &Instance, data: &mut app_data::Data) {
    if !data.messenger.is_null() {
        instance.destroy_debug_utils_messenger_ext(data.messenger, None);
        data.messenger = vk::DebugUtilsMessengerEXT::null();
    }
}

pub fn log_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        Level::Error
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        Level::Warn
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        Level::Debug
    } else {
        Level::Trace
    }
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    let data = unsafe { *data };
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

    log!(log_level(severity), "({:?}) {}", type_, message);

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_map_onto_log_levels() {
        assert_eq!(log_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), Level::Error);
        assert_eq!(log_level(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING), Level::Warn);
        assert_eq!(log_level(vk::DebugUtilsMessageSeverityFlagsEXT::INFO), Level::Debug);
        assert_eq!(log_level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), Level::Trace);
    }
}
