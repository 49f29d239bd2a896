use super::app_data;
use super::config::RendererConfig;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

pub unsafe fn create(instance: &Instance, config: &RendererConfig, data: &mut app_data::Data) -> Result<Device> {
    // Queue Create Infos

    let indices = data.queue_families;

    let queue_priorities = &[1.0];
    let queue_infos = indices
        .unique()
        .iter()
        .map(|i| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(*i)
                .queue_priorities(queue_priorities)
        })
        .collect::<Vec<_>>();

    // Layers

    let layers = if config.validation {
        vec![config.validation_layer.as_ptr()]
    } else {
        vec![]
    };

    // Extensions

    let extensions = config.device_extensions.iter().map(|n| n.as_ptr()).collect::<Vec<_>>();

    // Features

    let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);

    // Create

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = instance.create_device(data.physical_device, &info, None)?;

    // Queues

    data.graphics_queue = device.get_device_queue(indices.graphics, 0);
    data.present_queue = device.get_device_queue(indices.present, 0);

    debug!("Created logical device with queue families {:?}.", indices.unique());

    Ok(device)
}
