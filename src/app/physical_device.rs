use super::app_data;
use super::config::RendererConfig;
use super::error::RendererError;
use super::queue_family;
use super::swapchain;

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use log::*;
use vulkanalia::prelude::v1_0::*;

/// Selects the first device that passes every suitability check.
pub unsafe fn pick_physical_device(instance: &Instance, config: &RendererConfig, data: &mut app_data::Data) -> Result<()> {
    for physical_device in instance.enumerate_physical_devices()? {
        let properties = instance.get_physical_device_properties(physical_device);

        if let Err(error) = check_physical_device(instance, config, data, physical_device) {
            warn!("Skipping physical device (`{}`): {}", properties.device_name, error);
        } else {
            info!("Selected physical device (`{}`).", properties.device_name);
            data.physical_device = physical_device;
            data.queue_families = queue_family::QueueFamilyIndices::get(instance, data, physical_device)?;
            return Ok(());
        }
    }

    Err(RendererError::NoSuitableDevice.into())
}

unsafe fn check_physical_device(
    instance: &Instance,
    config: &RendererConfig,
    data: &app_data::Data,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    queue_family::QueueFamilyIndices::get(instance, data, physical_device)?;
    check_physical_device_extensions(instance, config, physical_device)?;

    let support = swapchain::SwapchainSupport::get(instance, data, physical_device)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(anyhow!("Insufficient swapchain support."));
    }

    let features = instance.get_physical_device_features(physical_device);
    if features.sampler_anisotropy != vk::TRUE {
        return Err(anyhow!("No sampler anisotropy."));
    }

    Ok(())
}

unsafe fn check_physical_device_extensions(
    instance: &Instance,
    config: &RendererConfig,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let extensions = instance.enumerate_device_extension_properties(physical_device, None)?
        .iter().map(|e| e.extension_name).collect::<HashSet<_>>();

    let missing = missing_extensions(&config.device_extensions, &extensions);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Missing required device extensions: {:?}.", missing))
    }
}

fn missing_extensions(required: &[vk::ExtensionName], available: &HashSet<vk::ExtensionName>) -> Vec<String> {
    required
        .iter()
        .filter(|e| !available.contains(*e))
        .map(|e| e.to_string())
        .collect()
}
