use super::allocator;
use super::app_data;
use super::config::RendererConfig;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSurfaceExtension;
use vulkanalia::vk::KhrSwapchainExtension;

#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &Instance,
        data: &app_data::Data,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance.get_physical_device_surface_capabilities_khr(physical_device, data.surface)?,
            formats: instance.get_physical_device_surface_formats_khr(physical_device, data.surface)?,
            present_modes: instance.get_physical_device_surface_present_modes_khr(physical_device, data.surface)?,
        })
    }
}

pub unsafe fn create(
    framebuffer_size: (u32, u32),
    instance: &Instance,
    device: &Device,
    config: &RendererConfig,
    data: &mut app_data::Data,
) -> Result<()> {
    let indices = data.queue_families;
    let support = SwapchainSupport::get(instance, data, data.physical_device)?;

    let surface_format = get_swapchain_surface_format(&support.formats);
    let present_mode = get_swapchain_present_mode(&support.present_modes, config.prefer_low_latency_present);
    let extent = get_swapchain_extent(framebuffer_size, support.capabilities);
    let image_count = get_swapchain_image_count(support.capabilities);

    let mut queue_family_indices = vec![];
    let image_sharing_mode = if indices.graphics != indices.present {
        queue_family_indices.push(indices.graphics);
        queue_family_indices.push(indices.present);
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    };

    let info = vk::SwapchainCreateInfoKHR::builder()
        .surface(data.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(image_sharing_mode)
        .queue_family_indices(&queue_family_indices)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(vk::SwapchainKHR::null());

    data.swapchain = device.create_swapchain_khr(&info, None)?;
    data.swapchain_images = device.get_swapchain_images_khr(data.swapchain)?;
    data.swapchain_format = surface_format.format;
    data.swapchain_extent = extent;

    info!(
        "Created swapchain ({} images, {:?}, {:?}, {}x{}).",
        data.swapchain_images.len(),
        surface_format.format,
        present_mode,
        extent.width,
        extent.height
    );

    Ok(())
}

pub unsafe fn create_swapchain_image_views(device: &Device, data: &mut app_data::Data) -> Result<()> {
    data.swapchain_image_views = data
        .swapchain_images
        .iter()
        .map(|i| allocator::create_view(device, *i, data.swapchain_format, vk::ImageAspectFlags::COLOR))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(())
}

pub fn get_swapchain_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    // A single UNDEFINED entry means the surface accepts anything.
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return preferred;
    }

    formats
        .iter()
        .cloned()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| {
            formats
                .iter()
                .cloned()
                .find(|f| f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        })
        .unwrap_or_else(|| formats[0])
}

pub fn get_swapchain_present_mode(present_modes: &[vk::PresentModeKHR], prefer_low_latency: bool) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .cloned()
        .find(|m| prefer_low_latency && *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn get_swapchain_extent(framebuffer_size: (u32, u32), capabilities: vk::SurfaceCapabilitiesKHR) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D::builder()
            .width(framebuffer_size.0.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ))
            .height(framebuffer_size.1.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ))
            .build()
    }
}

/// One more than the minimum, unless the surface caps the count.
pub fn get_swapchain_image_count(capabilities: vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 1920, height: 1080 },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_rgba8_unorm_srgb() {
        let formats = [format(vk::Format::B8G8R8A8_SRGB), format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(get_swapchain_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [format(vk::Format::A2B10G10R10_UNORM_PACK32), format(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(get_swapchain_surface_format(&formats).format, vk::Format::A2B10G10R10_UNORM_PACK32);
    }

    #[test]
    fn undefined_format_means_any() {
        let formats = [format(vk::Format::UNDEFINED)];
        assert_eq!(get_swapchain_surface_format(&formats).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn present_mode_prefers_mailbox_then_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(get_swapchain_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(get_swapchain_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(get_swapchain_present_mode(&[vk::PresentModeKHR::IMMEDIATE], true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_current_when_defined() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D { width: 800, height: 600 };
        let extent = get_swapchain_extent((1280, 720), caps);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_framebuffer_size() {
        let extent = get_swapchain_extent((4000, 8), capabilities(2, 3));
        assert_eq!((extent.width, extent.height), (1920, 16));

        let extent = get_swapchain_extent((1280, 720), capabilities(2, 3));
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        assert_eq!(get_swapchain_image_count(capabilities(2, 0)), 3);
        assert_eq!(get_swapchain_image_count(capabilities(2, 8)), 3);
        assert_eq!(get_swapchain_image_count(capabilities(3, 3)), 3);
    }
}
