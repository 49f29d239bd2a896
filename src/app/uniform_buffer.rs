use super::allocator::{AllocatedBuffer, Allocator};
use super::app_data;
use super::command_buffer;
use super::config::CameraConfig;

use anyhow::Result;
use nalgebra_glm as glm;
use std::mem::size_of;
use vulkanalia::prelude::v1_0::*;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UniformBufferObject {
    pub projection: glm::Mat4,
    pub view: glm::Mat4,
}

impl UniformBufferObject {
    pub fn from_camera(camera: &CameraConfig, extent: vk::Extent2D) -> Self {
        Self {
            projection: projection(camera, extent),
            view: glm::look_at(&camera.eye, &camera.target, &camera.up),
        }
    }
}

/// Right-handed perspective with Y flipped for Vulkan clip space.
pub fn projection(camera: &CameraConfig, extent: vk::Extent2D) -> glm::Mat4 {
    let aspect = extent.width as f32 / extent.height.max(1) as f32;
    let mut projection = glm::perspective_rh_zo(aspect, camera.fov_y_degrees.to_radians(), camera.near, camera.far);
    projection[(1, 1)] *= -1.0;
    projection
}

pub unsafe fn create_uniform_buffers(
    device: &Device,
    allocator: &mut Allocator,
    data: &mut app_data::Data,
) -> Result<()> {
    data.uniform_buffers.clear();

    for _ in 0..data.swapchain_images.len() {
        let uniform_buffer = allocator.create_buffer(
            device,
            size_of::<UniformBufferObject>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;

        data.uniform_buffers.push(uniform_buffer);
    }

    Ok(())
}

/// Rewrites the view-projection uniform of one swapchain image.
pub unsafe fn update(
    device: &Device,
    allocator: &Allocator,
    buffer: &AllocatedBuffer,
    ubo: &UniformBufferObject,
) -> Result<()> {
    allocator.write_host_visible(device, buffer, command_buffer::as_bytes(ubo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ubo_is_two_matrices() {
        assert_eq!(size_of::<UniformBufferObject>(), 128);
    }

    #[test]
    fn ubo_bytes_have_no_padding() {
        let ubo = UniformBufferObject { projection: glm::Mat4::identity() * 2.0, view: glm::Mat4::identity() * 3.0 };
        let bytes = unsafe { command_buffer::as_bytes(&ubo) };
        assert_eq!(bytes.len(), 2 * 16 * 4);
        assert_eq!(&bytes[0..4], &2.0f32.to_ne_bytes());
        assert_eq!(&bytes[64..68], &3.0f32.to_ne_bytes());
    }

    #[test]
    fn projection_flips_y() {
        let camera = CameraConfig::default();
        let extent = vk::Extent2D { width: 800, height: 600 };
        let flipped = projection(&camera, extent);
        let plain = glm::perspective_rh_zo(800.0 / 600.0, camera.fov_y_degrees.to_radians(), camera.near, camera.far);

        assert_eq!(flipped[(1, 1)], -plain[(1, 1)]);
        assert_eq!(flipped[(0, 0)], plain[(0, 0)]);
    }

    #[test]
    fn view_looks_down_negative_z_by_default() {
        let ubo = UniformBufferObject::from_camera(&CameraConfig::default(), vk::Extent2D { width: 4, height: 4 });
        let origin = ubo.view * glm::vec4(0.0, 0.0, 0.0, 1.0);
        assert!((origin.z + 2.0).abs() < 1e-5);
    }
}
