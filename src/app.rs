mod allocator;
mod app_data;
mod command_buffer;
mod config;
mod descriptor;
mod error;
mod framebuffer;
mod image;
mod instance;
mod lifecycle;
mod logical_device;
mod mesh;
mod physical_device;
mod pipeline;
mod queue_family;
mod render_pass;
mod swapchain;
mod sync;
mod uniform_buffer;

pub use config::{CullMode, RendererConfig};
pub use error::RendererError;
pub use mesh::{MeshData, Vertex};
pub use pipeline::ShaderSource;
pub use uniform_buffer::projection;

use allocator::{Allocator, ResourceCounters};
use anyhow::{anyhow, Result};
use descriptor::DescriptorDomain;
use lifecycle::Lifecycle;
use log::*;
use mesh::{Mesh, MeshModel};
use nalgebra_glm as glm;
use sync::FramePacer;
use uniform_buffer::UniformBufferObject;
use vulkanalia::loader::{LibloadingLoader, LIBRARY};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::window as vk_window;
use winit::window::Window;

use vulkanalia::vk::KhrSurfaceExtension;
use vulkanalia::vk::KhrSwapchainExtension;

/// 1×1 opaque white, bound to meshes without a diffuse texture.
const DEFAULT_TEXTURE: [u8; 4] = [255, 255, 255, 255];

#[derive(Debug)]
pub struct App {
    entry: Entry,
    instance: Instance,
    data: app_data::Data,
    device: Device,
    allocator: Allocator,
    pacer: FramePacer,
    max_textures: usize,
    lifecycle: Lifecycle,
}

impl App {
    pub unsafe fn create(window: &Window, config: RendererConfig, shaders: &impl ShaderSource) -> Result<Self> {
        config.validate()?;

        let loader = LibloadingLoader::new(LIBRARY).map_err(|e| RendererError::LoaderUnavailable(e.to_string()))?;
        let entry = Entry::new(loader).map_err(|b| RendererError::LoaderUnavailable(b.to_string()))?;
        let mut data = app_data::Data { clear_color: config.clear_color, ..Default::default() };
        let instance = instance::create(window, &entry, &config, &mut data)?;

        data.surface = vk_window::create_surface(&instance, &window, &window)?;
        physical_device::pick_physical_device(&instance, &config, &mut data)?;

        let device = logical_device::create(&instance, &config, &mut data)?;
        let mut allocator = Allocator::new(&instance, data.physical_device);

        let size = window.inner_size();
        swapchain::create((size.width, size.height), &instance, &device, &config, &mut data)?;
        swapchain::create_swapchain_image_views(&device, &mut data)?;

        render_pass::choose_attachment_formats(&instance, &mut data)?;
        render_pass::create_render_pass(&device, &mut data)?;
        render_pass::create_attachments(&device, &mut allocator, &mut data)?;

        let image_count = data.swapchain_images.len() as u32;
        data.uniform_descriptors = DescriptorDomain::create(&device, descriptor::UNIFORM_BINDINGS, image_count)?;
        data.sampler_descriptors = DescriptorDomain::create(&device, descriptor::SAMPLER_BINDINGS, config.max_textures)?;
        data.input_descriptors =
            DescriptorDomain::create(&device, descriptor::INPUT_ATTACHMENT_BINDINGS, image_count)?;

        pipeline::create_geometry_pipeline(&device, config.cull_mode, shaders, &mut data)?;
        pipeline::create_composite_pipeline(&device, shaders, &mut data)?;

        framebuffer::create(&device, &mut data)?;

        command_buffer::create_command_pool(&device, &mut data)?;
        command_buffer::create_command_buffers(&device, &mut data)?;

        uniform_buffer::create_uniform_buffers(&device, &mut allocator, &mut data)?;
        data.ubo = UniformBufferObject::from_camera(&config.camera, data.swapchain_extent);
        for buffer in &data.uniform_buffers {
            uniform_buffer::update(&device, &allocator, buffer, &data.ubo)?;
        }

        let uniform_sets = data.uniform_descriptors.allocate(&device, data.uniform_buffers.len())?;
        descriptor::write_uniform_sets(&device, uniform_sets, &data.uniform_buffers);

        create_input_sets(&device, &mut data)?;

        data.texture_sampler = image::create_texture_sampler(&device)?;

        sync::create_sync_objects(&device, config.frames_in_flight, &mut data)?;

        let mut app = Self {
            entry,
            instance,
            data,
            device,
            allocator,
            pacer: FramePacer::new(config.frames_in_flight),
            max_textures: config.max_textures as usize,
            lifecycle: Lifecycle::default(),
        };

        let default_texture = app.load_texture(&DEFAULT_TEXTURE, 1, 1, DEFAULT_TEXTURE.len() as u64)?;
        debug!("Uploaded default texture as id {}.", default_texture);

        info!("Renderer ready ({} swapchain images, {} frames in flight).", image_count, config.frames_in_flight);

        Ok(app)
    }

    /// Uploads RGBA8 pixels and returns the new texture id.
    pub unsafe fn load_texture(&mut self, pixels: &[u8], width: u32, height: u32, byte_size: u64) -> Result<usize> {
        self.lifecycle.ensure_alive("load_texture")?;

        if self.data.textures.len() >= self.max_textures {
            return Err(RendererError::TextureLimit(self.max_textures).into());
        }

        let transfer = self.data.transfer();
        let texture = image::upload_texture(&self.device, &mut self.allocator, transfer, pixels, width, height, byte_size)?;

        let set = match self.data.sampler_descriptors.allocate(&self.device, 1) {
            Ok(sets) => sets[0],
            Err(e) => {
                self.allocator.destroy_image(&self.device, texture);
                return Err(e);
            }
        };
        descriptor::write_sampler_set(&self.device, set, texture.view, self.data.texture_sampler);

        self.data.textures.push(texture);
        let id = self.data.textures.len() - 1;

        debug!("Loaded texture {} ({}x{}).", id, width, height);

        Ok(id)
    }

    /// Uploads every mesh and returns the new model id. `material_to_texture`
    /// maps each mesh's material index to a texture id; unmapped materials use texture 0.
    pub unsafe fn load_model(&mut self, meshes: &[MeshData], material_to_texture: &[usize]) -> Result<usize> {
        self.lifecycle.ensure_alive("load_model")?;

        let texture_ids = mesh::resolve_texture_ids(meshes, material_to_texture, self.data.textures.len())?;
        let transfer = self.data.transfer();

        let mut uploaded = Vec::with_capacity(meshes.len());
        for (mesh_data, texture_id) in meshes.iter().zip(texture_ids) {
            let mesh = Mesh::new(
                &self.device,
                &mut self.allocator,
                transfer,
                &mesh_data.vertices,
                &mesh_data.indices,
                texture_id,
            );
            match mesh {
                Ok(mesh) => uploaded.push(mesh),
                Err(e) => {
                    uploaded.into_iter().for_each(|m| m.destroy(&self.device, &mut self.allocator));
                    return Err(e);
                }
            }
        }

        self.data.models.push(MeshModel::new(uploaded));
        let id = self.data.models.len() - 1;

        info!("Loaded model {} ({} meshes).", id, meshes.len());

        Ok(id)
    }

    pub fn update_model_transform(&mut self, model_id: usize, transform: glm::Mat4) -> Result<()> {
        self.lifecycle.ensure_alive("update_model_transform")?;

        let model = self.data.models.get_mut(model_id).ok_or(RendererError::UnknownModel(model_id))?;
        model.set_transform(transform);

        Ok(())
    }

    pub fn update_camera(&mut self, view: glm::Mat4, projection: glm::Mat4) -> Result<()> {
        self.lifecycle.ensure_alive("update_camera")?;

        self.data.ubo = UniformBufferObject { projection, view };

        Ok(())
    }

    /// Reads a mesh's vertex and index bytes back from device memory.
    pub unsafe fn read_back_mesh(&mut self, model_id: usize, mesh_index: usize) -> Result<(Vec<u8>, Vec<u8>)> {
        self.lifecycle.ensure_alive("read_back_mesh")?;

        let transfer = self.data.transfer();
        let model = self.data.models.get(model_id).ok_or(RendererError::UnknownModel(model_id))?;
        let mesh = model
            .mesh(mesh_index)
            .ok_or_else(|| anyhow!("Model {} has {} meshes, no mesh {}.", model_id, model.mesh_count(), mesh_index))?;

        mesh.read_back(&self.device, &mut self.allocator, transfer)
    }

    pub fn resource_counters(&self) -> ResourceCounters {
        self.allocator.counters()
    }

    pub fn frames_presented(&self) -> u64 {
        self.pacer.presented()
    }

    pub unsafe fn render(&mut self) -> Result<()> {
        self.lifecycle.ensure_alive("render")?;

        let slot = self.data.frames[self.pacer.current()];

        self.device
            .wait_for_fences(&[slot.in_flight], true, u64::MAX)
            .map_err(|code| RendererError::Frame { stage: "fence wait", code })?;
        let frame = self.pacer.fence_waited()?;

        self.pacer.acquire()?;
        let result = self.device.acquire_next_image_khr(
            self.data.swapchain,
            u64::MAX,
            slot.image_available,
            vk::Fence::null(),
        );

        let image_index = match result {
            Ok((image_index, _)) => image_index as usize,
            Err(code) => {
                self.pacer.abort()?;
                return Err(RendererError::Frame { stage: "acquire", code }.into());
            }
        };

        let image_in_flight = self.data.images_in_flight[image_index];
        if !image_in_flight.is_null() {
            self.device
                .wait_for_fences(&[image_in_flight], true, u64::MAX)
                .map_err(|code| RendererError::Frame { stage: "fence wait", code })?;
        }

        self.data.images_in_flight[image_index] = slot.in_flight;

        self.pacer.record()?;
        command_buffer::record(&self.device, &self.data, image_index)?;
        uniform_buffer::update(
            &self.device,
            &self.allocator,
            &self.data.uniform_buffers[image_index],
            &self.data.ubo,
        )?;

        let wait_semaphores = &[slot.image_available];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[self.data.command_buffers[image_index]];
        let signal_semaphores = &[slot.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        // Reset only once the submission that will signal it is certain to happen.
        self.device.reset_fences(&[slot.in_flight])?;

        self.device
            .queue_submit(self.data.graphics_queue, &[submit_info], slot.in_flight)
            .map_err(|code| RendererError::Frame { stage: "submit", code })?;
        self.pacer.submit()?;

        let swapchains = &[self.data.swapchain];
        let image_indices = &[image_index as u32];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(signal_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = self.device.queue_present_khr(self.data.present_queue, &present_info);
        if result == Ok(vk::SuccessCode::SUBOPTIMAL_KHR) {
            warn!("Swapchain is suboptimal for the surface.");
        } else if let Err(code) = result {
            return Err(RendererError::Frame { stage: "present", code }.into());
        }
        self.pacer.present()?;

        trace!(
            "Presented image {} from slot {} ({} in flight).",
            image_index,
            frame,
            self.pacer.in_flight()
        );

        Ok(())
    }

    /// Tears everything down in reverse dependency order. Safe to call twice.
    pub unsafe fn destroy(&mut self) {
        if !self.lifecycle.shut_down() {
            return;
        }

        if let Err(e) = self.device.device_wait_idle() {
            warn!("Device did not go idle before teardown: {}", e);
        }

        sync::destroy_sync_objects(&self.device, &mut self.data);

        self.device.free_command_buffers(self.data.command_pool, &self.data.command_buffers);
        self.data.command_buffers.clear();
        self.device.destroy_command_pool(self.data.command_pool, None);

        framebuffer::destroy(&self.device, &mut self.data);
        pipeline::destroy(&self.device, &mut self.data);

        self.data.input_descriptors.destroy(&self.device);
        self.data.sampler_descriptors.destroy(&self.device);
        self.data.uniform_descriptors.destroy(&self.device);

        self.device.destroy_sampler(self.data.texture_sampler, None);

        for texture in self.data.textures.drain(..) {
            self.allocator.destroy_image(&self.device, texture);
        }
        render_pass::destroy_attachments(&self.device, &mut self.allocator, &mut self.data);

        for buffer in self.data.uniform_buffers.drain(..) {
            self.allocator.destroy_buffer(&self.device, buffer);
        }
        for model in self.data.models.drain(..) {
            model.destroy(&self.device, &mut self.allocator);
        }

        self.device.destroy_render_pass(self.data.render_pass, None);
        self.data.swapchain_image_views.drain(..).for_each(|v| self.device.destroy_image_view(v, None));
        self.device.destroy_swapchain_khr(self.data.swapchain, None);

        let counters = self.allocator.counters();
        if counters.is_empty() {
            info!("All GPU resources released.");
        } else {
            warn!("GPU resources leaked at teardown: {:?}", counters);
        }

        self.device.destroy_device(None);
        self.instance.destroy_surface_khr(self.data.surface, None);
        instance::destroy_messenger(&self.instance, &mut self.data);
        self.instance.destroy_instance(None);
    }
}

/// Binds each image's colour and depth attachments for the composite subpass.
unsafe fn create_input_sets(device: &Device, data: &mut app_data::Data) -> Result<()> {
    let sets = data.input_descriptors.allocate(device, data.swapchain_images.len())?;
    descriptor::write_input_sets(device, sets, &data.color_attachments, &data.depth_attachments);
    Ok(())
}
