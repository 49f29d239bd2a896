use super::app_data;

use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

/// Attachment order matches the render pass: swapchain, offscreen colour, depth.
pub unsafe fn create(device: &Device, data: &mut app_data::Data) -> Result<()> {
    data.framebuffers = data
        .swapchain_image_views
        .iter()
        .zip(data.color_attachments.iter().zip(&data.depth_attachments))
        .map(|(view, (color, depth))| {
            let attachments = &[*view, color.view, depth.view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(data.render_pass)
                .attachments(attachments)
                .width(data.swapchain_extent.width)
                .height(data.swapchain_extent.height)
                .layers(1);

            device.create_framebuffer(&create_info, None)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(())
}

pub unsafe fn destroy(device: &Device, data: &mut app_data::Data) {
    data.framebuffers.drain(..).for_each(|f| device.destroy_framebuffer(f, None));
}
