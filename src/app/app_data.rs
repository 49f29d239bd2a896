use super::allocator::{AllocatedBuffer, AllocatedImage};
use super::command_buffer::TransferContext;
use super::descriptor::DescriptorDomain;
use super::mesh::MeshModel;
use super::queue_family::QueueFamilyIndices;
use super::sync::FrameSlot;
use super::uniform_buffer::UniformBufferObject;

use nalgebra_glm as glm;
use vulkanalia::prelude::v1_0::*;

/// The Vulkan data structure.
#[derive(Debug)]
pub struct Data {
    pub messenger: vk::DebugUtilsMessengerEXT,

    pub surface: vk::SurfaceKHR,

    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub swapchain_format: vk::Format,
    pub swapchain_extent: vk::Extent2D,
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,

    // Offscreen attachments, one of each per swapchain image
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub color_attachments: Vec<AllocatedImage>,
    pub depth_attachments: Vec<AllocatedImage>,

    // Pipeline
    pub render_pass: vk::RenderPass,
    pub geometry_pipeline_layout: vk::PipelineLayout,
    pub geometry_pipeline: vk::Pipeline,
    pub composite_pipeline_layout: vk::PipelineLayout,
    pub composite_pipeline: vk::Pipeline,

    pub framebuffers: Vec<vk::Framebuffer>,

    pub command_pool: vk::CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,

    // Descriptors
    pub uniform_descriptors: DescriptorDomain,
    pub sampler_descriptors: DescriptorDomain,
    pub input_descriptors: DescriptorDomain,

    pub uniform_buffers: Vec<AllocatedBuffer>,
    pub ubo: UniformBufferObject,

    pub texture_sampler: vk::Sampler,
    pub textures: Vec<AllocatedImage>,

    pub models: Vec<MeshModel>,
    pub clear_color: [f32; 4],

    // Sync Objects
    pub frames: Vec<FrameSlot>,
    pub images_in_flight: Vec<vk::Fence>,
}

impl Default for Data {
    fn default() -> Self {
        Self {
            messenger: Default::default(),
            surface: Default::default(),
            physical_device: Default::default(),
            queue_families: Default::default(),
            graphics_queue: Default::default(),
            present_queue: Default::default(),
            swapchain_format: Default::default(),
            swapchain_extent: Default::default(),
            swapchain: Default::default(),
            swapchain_images: Vec::new(),
            swapchain_image_views: Vec::new(),
            color_format: Default::default(),
            depth_format: Default::default(),
            color_attachments: Vec::new(),
            depth_attachments: Vec::new(),
            render_pass: Default::default(),
            geometry_pipeline_layout: Default::default(),
            geometry_pipeline: Default::default(),
            composite_pipeline_layout: Default::default(),
            composite_pipeline: Default::default(),
            framebuffers: Vec::new(),
            command_pool: Default::default(),
            command_buffers: Vec::new(),
            uniform_descriptors: Default::default(),
            sampler_descriptors: Default::default(),
            input_descriptors: Default::default(),
            uniform_buffers: Vec::new(),
            ubo: UniformBufferObject { projection: glm::Mat4::identity(), view: glm::Mat4::identity() },
            texture_sampler: Default::default(),
            textures: Vec::new(),
            models: Vec::new(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frames: Vec::new(),
            images_in_flight: Vec::new(),
        }
    }
}

impl Data {
    /// Uploads go through the graphics queue so layout transitions may target fragment stages.
    pub fn transfer(&self) -> TransferContext {
        TransferContext { queue: self.graphics_queue, command_pool: self.command_pool }
    }
}
