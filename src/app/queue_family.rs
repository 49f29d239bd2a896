use super::app_data;
use super::error::RendererError;

use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSurfaceExtension;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub transfer: Option<u32>,
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    pub unsafe fn get(
        instance: &Instance,
        data: &app_data::Data,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_queue_family_properties(physical_device);

        Self::find(&properties, |index| {
            Ok(instance.get_physical_device_surface_support_khr(physical_device, index, data.surface)?)
        })
    }

    /// Graphics and present are required; transfer and compute prefer dedicated families.
    pub fn find(
        properties: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let usable = |flags: vk::QueueFlags| {
            properties
                .iter()
                .enumerate()
                .filter(move |(_, p)| p.queue_count > 0 && p.queue_flags.contains(flags))
                .map(|(i, p)| (i as u32, p.queue_flags))
        };

        let graphics = usable(vk::QueueFlags::GRAPHICS)
            .map(|(i, _)| i)
            .next()
            .ok_or(RendererError::NoSuitableDevice)?;

        let mut present = None;
        if supports_present(graphics)? {
            present = Some(graphics);
        } else {
            for (index, p) in properties.iter().enumerate() {
                if p.queue_count > 0 && supports_present(index as u32)? {
                    present = Some(index as u32);
                    break;
                }
            }
        }
        let present = present.ok_or(RendererError::NoSuitableDevice)?;

        let transfer = usable(vk::QueueFlags::TRANSFER)
            .find(|(_, flags)| !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))
            .or_else(|| usable(vk::QueueFlags::TRANSFER).next())
            .map(|(i, _)| i);

        let compute = usable(vk::QueueFlags::COMPUTE)
            .find(|(_, flags)| !flags.contains(vk::QueueFlags::GRAPHICS))
            .or_else(|| usable(vk::QueueFlags::COMPUTE).next())
            .map(|(i, _)| i);

        Ok(Self { graphics, present, transfer, compute })
    }

    /// Distinct family indices, one queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut indices = vec![self.graphics, self.present];
        indices.extend(self.transfer);
        indices.extend(self.compute);
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties { queue_flags: flags, queue_count, ..Default::default() }
    }

    fn all() -> vk::QueueFlags {
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
    }

    #[test]
    fn shared_family_yields_single_unique_index() {
        let families = [family(all(), 16)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 0);
        assert_eq!(indices.transfer, Some(0));
        assert_eq!(indices.compute, Some(0));
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn prefers_dedicated_transfer_and_compute_families() {
        let families = [
            family(all(), 16),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i == 0)).unwrap();

        assert_eq!(indices.transfer, Some(2));
        assert_eq!(indices.compute, Some(1));
        assert_eq!(indices.unique(), vec![0, 1, 2]);
    }

    #[test]
    fn separate_present_family() {
        let families = [family(all(), 1), family(vk::QueueFlags::TRANSFER, 1)];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i == 1)).unwrap();

        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.present, 1);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [family(all(), 0), family(all(), 4)];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, 1);
        assert_eq!(indices.present, 1);
    }

    #[test]
    fn missing_present_support_is_unsuitable() {
        let families = [family(all(), 4)];
        assert!(QueueFamilyIndices::find(&families, |_| Ok(false)).is_err());
    }

    #[test]
    fn missing_graphics_is_unsuitable() {
        let families = [family(vk::QueueFlags::COMPUTE, 4)];
        assert!(QueueFamilyIndices::find(&families, |_| Ok(true)).is_err());
    }
}
