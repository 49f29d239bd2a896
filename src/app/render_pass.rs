use super::allocator::Allocator;
use super::app_data;
use super::image;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

pub const SWAPCHAIN_ATTACHMENT: u32 = 0;
pub const COLOR_ATTACHMENT: u32 = 1;
pub const DEPTH_ATTACHMENT: u32 = 2;

pub const GEOMETRY_SUBPASS: u32 = 0;
pub const COMPOSITE_SUBPASS: u32 = 1;

pub unsafe fn choose_attachment_formats(instance: &Instance, data: &mut app_data::Data) -> Result<()> {
    let physical_device = data.physical_device;
    let properties = |format: vk::Format| instance.get_physical_device_format_properties(physical_device, format);

    let color_format = image::choose_supported_format(
        &[vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_UNORM],
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::COLOR_ATTACHMENT,
        properties,
    )?;

    let depth_format = image::choose_supported_format(
        &[vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT],
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        properties,
    )?;

    data.color_format = color_format;
    data.depth_format = depth_format;

    Ok(())
}

pub fn attachment_descriptions(
    swapchain_format: vk::Format,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> [vk::AttachmentDescription; 3] {
    let swapchain_attachment = vk::AttachmentDescription::builder()
        .format(swapchain_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    [swapchain_attachment, color_attachment, depth_attachment]
}

/// Orders attachment access across the frame boundary and between the two subpasses.
pub fn subpass_dependencies() -> [vk::SubpassDependency; 3] {
    let external_to_geometry = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(GEOMETRY_SUBPASS)
        .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        .src_access_mask(vk::AccessFlags::MEMORY_READ)
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let geometry_to_composite = vk::SubpassDependency::builder()
        .src_subpass(GEOMETRY_SUBPASS)
        .dst_subpass(COMPOSITE_SUBPASS)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
        .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ)
        .dependency_flags(vk::DependencyFlags::BY_REGION)
        .build();

    let composite_to_external = vk::SubpassDependency::builder()
        .src_subpass(COMPOSITE_SUBPASS)
        .dst_subpass(vk::SUBPASS_EXTERNAL)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ)
        .build();

    [external_to_geometry, geometry_to_composite, composite_to_external]
}

pub unsafe fn create_render_pass(device: &Device, data: &mut app_data::Data) -> Result<()> {
    let attachments = attachment_descriptions(data.swapchain_format, data.color_format, data.depth_format);

    // Geometry subpass writes the offscreen colour and depth.

    let geometry_color_refs = &[vk::AttachmentReference::builder()
        .attachment(COLOR_ATTACHMENT)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let geometry_depth_ref = vk::AttachmentReference::builder()
        .attachment(DEPTH_ATTACHMENT)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let geometry_subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(geometry_color_refs)
        .depth_stencil_attachment(&geometry_depth_ref);

    // Composite subpass reads them back as input attachments and writes the swapchain image.

    let composite_color_refs = &[vk::AttachmentReference::builder()
        .attachment(SWAPCHAIN_ATTACHMENT)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let composite_input_refs = &[
        vk::AttachmentReference::builder()
            .attachment(COLOR_ATTACHMENT)
            .layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        vk::AttachmentReference::builder()
            .attachment(DEPTH_ATTACHMENT)
            .layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
    ];

    let composite_subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(composite_color_refs)
        .input_attachments(composite_input_refs);

    let subpasses = &[geometry_subpass, composite_subpass];
    let dependencies = subpass_dependencies();

    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(subpasses)
        .dependencies(&dependencies);

    data.render_pass = device.create_render_pass(&info, None)?;

    debug!(
        "Created render pass (swapchain {:?}, colour {:?}, depth {:?}).",
        data.swapchain_format, data.color_format, data.depth_format
    );

    Ok(())
}

/// Depth input attachments must be viewed through a single aspect.
pub fn depth_view_aspects() -> vk::ImageAspectFlags {
    vk::ImageAspectFlags::DEPTH
}

/// One offscreen colour and depth image per swapchain image.
pub unsafe fn create_attachments(device: &Device, allocator: &mut Allocator, data: &mut app_data::Data) -> Result<()> {
    for _ in 0..data.swapchain_images.len() {
        let color = allocator.create_attachment(
            device,
            data.swapchain_extent,
            data.color_format,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT,
            vk::ImageAspectFlags::COLOR,
        )?;
        data.color_attachments.push(color);

        let depth = allocator.create_attachment(
            device,
            data.swapchain_extent,
            data.depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT,
            depth_view_aspects(),
        )?;
        data.depth_attachments.push(depth);
    }

    Ok(())
}

pub unsafe fn destroy_attachments(device: &Device, allocator: &mut Allocator, data: &mut app_data::Data) {
    data.color_attachments.drain(..).for_each(|i| allocator.destroy_image(device, i));
    data.depth_attachments.drain(..).for_each(|i| allocator.destroy_image(device, i));
}
