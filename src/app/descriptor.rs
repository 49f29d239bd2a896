use super::allocator::{AllocatedBuffer, AllocatedImage};
use super::error::RendererError;
use super::uniform_buffer::UniformBufferObject;

use anyhow::Result;
use log::*;
use std::mem::size_of;
use vulkanalia::prelude::v1_0::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// View-projection uniform, one set per swapchain image.
pub const UNIFORM_BINDINGS: &[DescriptorBinding] = &[DescriptorBinding {
    binding: 0,
    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
    stages: vk::ShaderStageFlags::VERTEX,
}];

/// Texture sampler, one set per loaded texture.
pub const SAMPLER_BINDINGS: &[DescriptorBinding] = &[DescriptorBinding {
    binding: 0,
    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    stages: vk::ShaderStageFlags::FRAGMENT,
}];

/// Colour and depth input attachments, one set per swapchain image.
pub const INPUT_ATTACHMENT_BINDINGS: &[DescriptorBinding] = &[
    DescriptorBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT,
        stages: vk::ShaderStageFlags::FRAGMENT,
    },
    DescriptorBinding {
        binding: 1,
        descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT,
        stages: vk::ShaderStageFlags::FRAGMENT,
    },
];

/// Layout, pool and sets for one family of descriptor sets.
#[derive(Debug, Default)]
pub struct DescriptorDomain {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    capacity: u32,
}

/// Pool sizes for `max_sets` sets of the given bindings, merged by type.
pub fn pool_sizes(bindings: &[DescriptorBinding], max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        match sizes.iter_mut().find(|s| s.type_ == binding.descriptor_type) {
            Some(size) => size.descriptor_count += max_sets,
            None => sizes.push(
                vk::DescriptorPoolSize::builder()
                    .type_(binding.descriptor_type)
                    .descriptor_count(max_sets)
                    .build(),
            ),
        }
    }
    sizes
}

impl DescriptorDomain {
    pub unsafe fn create(device: &Device, bindings: &[DescriptorBinding], max_sets: u32) -> Result<Self> {
        let layout_bindings = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(b.stages)
            })
            .collect::<Vec<_>>();

        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let layout = device.create_descriptor_set_layout(&info, None)?;

        let pool_sizes = pool_sizes(bindings, max_sets);
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        let pool = match device.create_descriptor_pool(&info, None) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_descriptor_set_layout(layout, None);
                return Err(e.into());
            }
        };

        debug!("Created descriptor domain ({} bindings, {} sets).", bindings.len(), max_sets);

        Ok(Self { layout, pool, sets: Vec::new(), capacity: max_sets })
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.sets.len() as u32
    }

    /// Allocates `count` more sets and returns the new ones.
    pub unsafe fn allocate(&mut self, device: &Device, count: usize) -> Result<&[vk::DescriptorSet]> {
        if count > self.remaining() as usize {
            return Err(RendererError::DescriptorsExhausted { requested: count, remaining: self.remaining() }.into());
        }

        let layouts = vec![self.layout; count];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let start = self.sets.len();
        self.sets.extend(device.allocate_descriptor_sets(&info)?);

        Ok(&self.sets[start..])
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        device.destroy_descriptor_pool(self.pool, None);
        device.destroy_descriptor_set_layout(self.layout, None);
        self.sets.clear();
        self.pool = vk::DescriptorPool::null();
        self.layout = vk::DescriptorSetLayout::null();
    }
}

pub unsafe fn write_uniform_sets(device: &Device, sets: &[vk::DescriptorSet], buffers: &[AllocatedBuffer]) {
    for (set, buffer) in sets.iter().zip(buffers) {
        let info = vk::DescriptorBufferInfo::builder()
            .buffer(buffer.buffer)
            .offset(0)
            .range(size_of::<UniformBufferObject>() as u64);

        let buffer_info = &[info];
        let ubo_write = vk::WriteDescriptorSet::builder()
            .dst_set(*set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(buffer_info);

        device.update_descriptor_sets(&[ubo_write], &[] as &[vk::CopyDescriptorSet]);
    }
}

pub unsafe fn write_sampler_set(device: &Device, set: vk::DescriptorSet, view: vk::ImageView, sampler: vk::Sampler) {
    let info = vk::DescriptorImageInfo::builder()
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .image_view(view)
        .sampler(sampler);

    let image_info = &[info];
    let sampler_write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(0)
        .dst_array_element(0)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(image_info);

    device.update_descriptor_sets(&[sampler_write], &[] as &[vk::CopyDescriptorSet]);
}

/// Input attachments carry no sampler; they are read at the current fragment only.
pub unsafe fn write_input_sets(
    device: &Device,
    sets: &[vk::DescriptorSet],
    colors: &[AllocatedImage],
    depths: &[AllocatedImage],
) {
    for ((set, color), depth) in sets.iter().zip(colors).zip(depths) {
        let color_info = &[vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(color.view)
            .sampler(vk::Sampler::null())];

        let depth_info = &[vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL)
            .image_view(depth.view)
            .sampler(vk::Sampler::null())];

        let color_write = vk::WriteDescriptorSet::builder()
            .dst_set(*set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
            .image_info(color_info);

        let depth_write = vk::WriteDescriptorSet::builder()
            .dst_set(*set)
            .dst_binding(1)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
            .image_info(depth_info);

        device.update_descriptor_sets(&[color_write, depth_write], &[] as &[vk::CopyDescriptorSet]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_binding_pool_holds_one_descriptor_per_set() {
        let sizes = pool_sizes(SAMPLER_BINDINGS, 20);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].type_, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[0].descriptor_count, 20);
    }

    #[test]
    fn same_type_bindings_are_merged() {
        let sizes = pool_sizes(INPUT_ATTACHMENT_BINDINGS, 3);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].type_, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(sizes[0].descriptor_count, 6);
    }

    #[test]
    fn mixed_bindings_get_one_size_per_type() {
        let bindings = [UNIFORM_BINDINGS[0], SAMPLER_BINDINGS[0]];
        let sizes = pool_sizes(&bindings, 4);
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|s| s.descriptor_count == 4));
    }

    #[test]
    fn domains_use_expected_stages() {
        assert_eq!(UNIFORM_BINDINGS[0].stages, vk::ShaderStageFlags::VERTEX);
        assert_eq!(SAMPLER_BINDINGS[0].stages, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(
            INPUT_ATTACHMENT_BINDINGS.iter().map(|b| b.binding).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn empty_domain_has_no_room() {
        let domain = DescriptorDomain::default();
        assert_eq!(domain.remaining(), 0);
    }
}
