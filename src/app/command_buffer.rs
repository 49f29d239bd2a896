use super::app_data;

use anyhow::Result;
use log::*;
use std::mem::size_of;
use vulkanalia::prelude::v1_0::*;

/// Queue and pool used for blocking one-shot transfers.
#[derive(Copy, Clone, Debug, Default)]
pub struct TransferContext {
    pub queue: vk::Queue,
    pub command_pool: vk::CommandPool,
}

pub unsafe fn create_command_pool(device: &Device, data: &mut app_data::Data) -> Result<()> {
    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(data.queue_families.graphics);

    data.command_pool = device.create_command_pool(&info, None)?;

    Ok(())
}

pub unsafe fn create_command_buffers(device: &Device, data: &mut app_data::Data) -> Result<()> {
    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(data.command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(data.swapchain_images.len() as u32);

    data.command_buffers = device.allocate_command_buffers(&allocate_info)?;

    Ok(())
}

pub unsafe fn begin_single_time_commands(device: &Device, transfer: TransferContext) -> Result<vk::CommandBuffer> {
    let info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(transfer.command_pool)
        .command_buffer_count(1);

    let command_buffer = device.allocate_command_buffers(&info)?[0];

    let info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    device.begin_command_buffer(command_buffer, &info)?;

    Ok(command_buffer)
}

/// Submits and blocks until the queue drains, then frees the buffer.
pub unsafe fn end_single_time_commands(
    device: &Device,
    transfer: TransferContext,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    let command_buffers = &[command_buffer];

    let result = device.end_command_buffer(command_buffer).and_then(|_| {
        let info = vk::SubmitInfo::builder().command_buffers(command_buffers);
        device.queue_submit(transfer.queue, &[info], vk::Fence::null())?;
        device.queue_wait_idle(transfer.queue)
    });

    device.free_command_buffers(transfer.command_pool, command_buffers);

    Ok(result?)
}

/// Raw bytes of a push-constant or uniform block.
///
/// # Safety
///
/// `T` must have no padding bytes, as with `glm::Mat4` and `UniformBufferObject`.
pub unsafe fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>())
}

pub fn clear_values(clear_color: [f32; 4]) -> [vk::ClearValue; 3] {
    let swapchain_clear = vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] } };
    let color_clear = vk::ClearValue { color: vk::ClearColorValue { float32: clear_color } };
    let depth_clear = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
    };
    [swapchain_clear, color_clear, depth_clear]
}

/// Re-records the command buffer of one swapchain image.
pub unsafe fn record(device: &Device, data: &app_data::Data, image_index: usize) -> Result<()> {
    let command_buffer = data.command_buffers[image_index];

    device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;

    let info = vk::CommandBufferBeginInfo::builder();
    device.begin_command_buffer(command_buffer, &info)?;

    let render_area = vk::Rect2D::builder()
        .offset(vk::Offset2D::default())
        .extent(data.swapchain_extent);

    let clear_values = clear_values(data.clear_color);
    let info = vk::RenderPassBeginInfo::builder()
        .render_pass(data.render_pass)
        .framebuffer(data.framebuffers[image_index])
        .render_area(render_area)
        .clear_values(&clear_values);

    device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);

    // Geometry subpass.

    device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, data.geometry_pipeline);

    for model in &data.models {
        device.cmd_push_constants(
            command_buffer,
            data.geometry_pipeline_layout,
            vk::ShaderStageFlags::VERTEX,
            0,
            as_bytes(model.transform()),
        );

        for mesh in model.meshes() {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[mesh.vertex_buffer()], &[0]);
            device.cmd_bind_index_buffer(command_buffer, mesh.index_buffer(), 0, vk::IndexType::UINT32);

            let descriptor_sets = [
                data.uniform_descriptors.sets[image_index],
                data.sampler_descriptors.sets[mesh.texture_id()],
            ];
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                data.geometry_pipeline_layout,
                0,
                &descriptor_sets,
                &[],
            );

            device.cmd_draw_indexed(command_buffer, mesh.index_count(), 1, 0, 0, 0);
        }
    }

    // Composite subpass.

    device.cmd_next_subpass(command_buffer, vk::SubpassContents::INLINE);

    device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, data.composite_pipeline);
    device.cmd_bind_descriptor_sets(
        command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        data.composite_pipeline_layout,
        0,
        &[data.input_descriptors.sets[image_index]],
        &[],
    );
    device.cmd_draw(command_buffer, 3, 1, 0, 0);

    device.cmd_end_render_pass(command_buffer);

    device.end_command_buffer(command_buffer)?;

    trace!("Recorded command buffer for image {} ({} models).", image_index, data.models.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_glm as glm;

    #[test]
    fn clear_values_cover_all_three_attachments() {
        let values = clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(values[1].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[2].depth_stencil.depth, 1.0);
            assert_eq!(values[2].depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn matrix_push_constant_is_sixty_four_bytes() {
        let model = glm::Mat4::identity();
        let bytes = unsafe { as_bytes(&model) };
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &0.0f32.to_ne_bytes());
    }
}
