use super::command_buffer::{self, TransferContext};
use super::error::RendererError;

use anyhow::Result;
use log::*;
use std::ptr::copy_nonoverlapping as memcpy;
use vulkanalia::prelude::v1_0::*;

/// Live resource counts, used to prove teardown released everything.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounters {
    pub buffers: usize,
    pub images: usize,
    pub image_views: usize,
    pub allocations: usize,
}

impl ResourceCounters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A buffer and the one allocation bound to it.
#[derive(Debug, Default)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

/// An image, its allocation, and the single view used to access it.
#[derive(Debug, Default)]
pub struct AllocatedImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

#[derive(Debug, Default)]
pub struct Allocator {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    counters: ResourceCounters,
}

/// Picks the first memory type allowed by `allowed_types` whose flags contain `properties`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    allowed_types: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory.memory_type_count)
        .find(|i| {
            let suitable = (allowed_types & (1 << i)) != 0;
            let memory_type = memory.memory_types[*i as usize];
            suitable && memory_type.property_flags.contains(properties)
        })
        .ok_or_else(|| RendererError::NoCompatibleMemoryType { allowed_types, properties }.into())
}

impl Allocator {
    pub unsafe fn new(instance: &Instance, physical_device: vk::PhysicalDevice) -> Self {
        Self {
            memory_properties: instance.get_physical_device_memory_properties(physical_device),
            counters: ResourceCounters::default(),
        }
    }

    pub fn counters(&self) -> ResourceCounters {
        self.counters
    }

    unsafe fn allocate(
        &mut self,
        device: &Device,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let memory_type_index = find_memory_type(&self.memory_properties, requirements.memory_type_bits, properties)?;

        let memory_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = device.allocate_memory(&memory_info, None)?;
        self.counters.allocations += 1;

        Ok(memory)
    }

    unsafe fn free(&mut self, device: &Device, memory: vk::DeviceMemory) {
        device.free_memory(memory, None);
        self.counters.allocations -= 1;
    }

    pub unsafe fn create_buffer(
        &mut self,
        device: &Device,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<AllocatedBuffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = device.create_buffer(&buffer_info, None)?;
        let requirements = device.get_buffer_memory_requirements(buffer);

        let memory = match self.allocate(device, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e);
            }
        };

        device.bind_buffer_memory(buffer, memory, 0)?;
        self.counters.buffers += 1;

        trace!("Created buffer ({} bytes, {:?}).", size, usage);

        Ok(AllocatedBuffer { buffer, memory, size })
    }

    /// Consumes the buffer so it cannot be released twice.
    pub unsafe fn destroy_buffer(&mut self, device: &Device, buffer: AllocatedBuffer) {
        device.destroy_buffer(buffer.buffer, None);
        self.free(device, buffer.memory);
        self.counters.buffers -= 1;
    }

    /// Copies `bytes` into host-visible memory through a map/copy/unmap cycle.
    pub unsafe fn write_host_visible(&self, device: &Device, buffer: &AllocatedBuffer, bytes: &[u8]) -> Result<()> {
        let memory = device.map_memory(buffer.memory, 0, bytes.len() as u64, vk::MemoryMapFlags::empty())?;

        memcpy(bytes.as_ptr(), memory.cast(), bytes.len());

        device.unmap_memory(buffer.memory);

        Ok(())
    }

    pub unsafe fn create_staging_buffer(&mut self, device: &Device, bytes: &[u8]) -> Result<AllocatedBuffer> {
        if bytes.is_empty() {
            return Err(RendererError::EmptyUpload.into());
        }

        let staging = self.create_buffer(
            device,
            bytes.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;

        if let Err(e) = self.write_host_visible(device, &staging, bytes) {
            self.destroy_buffer(device, staging);
            return Err(e);
        }

        Ok(staging)
    }

    /// Uploads `bytes` into a new device-local buffer via a staging copy.
    pub unsafe fn upload_buffer(
        &mut self,
        device: &Device,
        transfer: TransferContext,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<AllocatedBuffer> {
        let staging = self.create_staging_buffer(device, bytes)?;

        let result = self
            .create_buffer(
                device,
                staging.size,
                usage | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .and_then(|target| match copy_buffer(device, transfer, staging.buffer, target.buffer, staging.size) {
                Ok(()) => Ok(target),
                Err(e) => {
                    self.destroy_buffer(device, target);
                    Err(e)
                }
            });

        self.destroy_buffer(device, staging);

        result
    }

    /// Copies a device-local buffer back to the host. Debug verification only.
    pub unsafe fn read_back_buffer(
        &mut self,
        device: &Device,
        transfer: TransferContext,
        source: &AllocatedBuffer,
    ) -> Result<Vec<u8>> {
        let staging = self.create_buffer(
            device,
            source.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;

        let result = copy_buffer(device, transfer, source.buffer, staging.buffer, source.size).and_then(|_| {
            let memory = device.map_memory(staging.memory, 0, source.size, vk::MemoryMapFlags::empty())?;
            let mut bytes = vec![0u8; source.size as usize];
            memcpy(memory.cast::<u8>(), bytes.as_mut_ptr(), bytes.len());
            device.unmap_memory(staging.memory);
            Ok(bytes)
        });

        self.destroy_buffer(device, staging);

        result
    }

    pub unsafe fn create_image(
        &mut self,
        device: &Device,
        extent: vk::Extent2D,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory)> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::_2D)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::_1);

        let image = device.create_image(&info, None)?;
        let requirements = device.get_image_memory_requirements(image);

        let memory = match self.allocate(device, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(e);
            }
        };

        device.bind_image_memory(image, memory, 0)?;
        self.counters.images += 1;

        Ok((image, memory))
    }

    pub unsafe fn create_image_view(
        &mut self,
        device: &Device,
        image: vk::Image,
        format: vk::Format,
        aspects: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let view = create_view(device, image, format, aspects)?;
        self.counters.image_views += 1;
        Ok(view)
    }

    pub unsafe fn destroy_image_view(&mut self, device: &Device, view: vk::ImageView) {
        device.destroy_image_view(view, None);
        self.counters.image_views -= 1;
    }

    /// Creates a device-local image together with its one view.
    pub unsafe fn create_attachment(
        &mut self,
        device: &Device,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspects: vk::ImageAspectFlags,
    ) -> Result<AllocatedImage> {
        let (image, memory) = self.create_image(
            device,
            extent,
            format,
            vk::ImageTiling::OPTIMAL,
            usage,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let mut allocated = AllocatedImage { image, memory, view: vk::ImageView::null(), format };
        match self.create_image_view(device, image, format, aspects) {
            Ok(view) => allocated.view = view,
            Err(e) => {
                self.destroy_image(device, allocated);
                return Err(e);
            }
        }

        Ok(allocated)
    }

    /// Releases view, then image, then memory.
    pub unsafe fn destroy_image(&mut self, device: &Device, image: AllocatedImage) {
        if !image.view.is_null() {
            self.destroy_image_view(device, image.view);
        }
        device.destroy_image(image.image, None);
        self.free(device, image.memory);
        self.counters.images -= 1;
    }
}

/// Image view creation without accounting, for swapchain-owned images.
pub unsafe fn create_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspects: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let components = vk::ComponentMapping::builder()
        .r(vk::ComponentSwizzle::IDENTITY)
        .g(vk::ComponentSwizzle::IDENTITY)
        .b(vk::ComponentSwizzle::IDENTITY)
        .a(vk::ComponentSwizzle::IDENTITY);

    let subresource_range = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspects)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::_2D)
        .format(format)
        .components(components)
        .subresource_range(subresource_range);

    Ok(device.create_image_view(&info, None)?)
}

pub unsafe fn copy_buffer(
    device: &Device,
    transfer: TransferContext,
    source: vk::Buffer,
    destination: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let command_buffer = command_buffer::begin_single_time_commands(device, transfer)?;

    let regions = vk::BufferCopy::builder().size(size);
    device.cmd_copy_buffer(command_buffer, source, destination, &[regions]);

    command_buffer::end_single_time_commands(device, transfer, command_buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            properties.memory_types[i].property_flags = *flags;
        }
        properties
    }

    fn host_visible() -> vk::MemoryPropertyFlags {
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    }

    #[test]
    fn picks_first_type_allowed_by_mask_with_all_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host_visible(),
            host_visible() | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&properties, 0b1111, host_visible()).unwrap(), 2);
        assert_eq!(find_memory_type(&properties, 0b1000, host_visible()).unwrap(), 3);
        assert_eq!(
            find_memory_type(&properties, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn result_is_always_in_mask_and_superset_of_flags() {
        let types = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host_visible(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL | host_visible(),
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ];
        let properties = memory_properties(&types);
        let wanted = [vk::MemoryPropertyFlags::DEVICE_LOCAL, host_visible(), vk::MemoryPropertyFlags::HOST_VISIBLE];

        for mask in 0u32..16 {
            for flags in wanted {
                let expected = (0..types.len()).find(|i| mask & (1 << i) != 0 && types[*i].contains(flags));
                match find_memory_type(&properties, mask, flags) {
                    Ok(index) => {
                        assert_eq!(Some(index as usize), expected);
                        assert_ne!(mask & (1 << index), 0);
                        assert!(types[index as usize].contains(flags));
                    }
                    Err(_) => assert_eq!(expected, None),
                }
            }
        }
    }

    #[test]
    fn empty_mask_fails_instead_of_returning_zero() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let error = find_memory_type(&properties, 0, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();

        match error.downcast_ref::<RendererError>() {
            Some(RendererError::NoCompatibleMemoryType { allowed_types, properties }) => {
                assert_eq!(*allowed_types, 0);
                assert_eq!(*properties, vk::MemoryPropertyFlags::DEVICE_LOCAL);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn types_beyond_reported_count_are_ignored() {
        let mut properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        properties.memory_types[1].property_flags = host_visible();

        assert!(find_memory_type(&properties, 0b11, host_visible()).is_err());
    }

    #[test]
    fn fresh_counters_are_empty() {
        let allocator = Allocator::default();
        assert!(allocator.counters().is_empty());
        assert!(!ResourceCounters { buffers: 1, ..Default::default() }.is_empty());
    }
}
