use super::allocator::{AllocatedImage, Allocator};
use super::command_buffer::{self, TransferContext};
use super::error::RendererError;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Access and stage masks guarding one layout transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        _ => Err(RendererError::UnsupportedLayoutTransition { old, new }.into()),
    }
}

pub unsafe fn transition_image_layout(
    device: &Device,
    transfer: TransferContext,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let masks = transition_masks(old_layout, new_layout)?;

    let command_buffer = command_buffer::begin_single_time_commands(device, transfer)?;

    let subresource = vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource)
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    device.cmd_pipeline_barrier(
        command_buffer,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[] as &[vk::MemoryBarrier],
        &[] as &[vk::BufferMemoryBarrier],
        &[barrier],
    );

    command_buffer::end_single_time_commands(device, transfer, command_buffer)
}

pub unsafe fn copy_buffer_to_image(
    device: &Device,
    transfer: TransferContext,
    buffer: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
) -> Result<()> {
    let command_buffer = command_buffer::begin_single_time_commands(device, transfer)?;

    let subresource = vk::ImageSubresourceLayers::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    let region = vk::BufferImageCopy::builder()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(subresource)
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 });

    device.cmd_copy_buffer_to_image(
        command_buffer,
        buffer,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
    );

    command_buffer::end_single_time_commands(device, transfer, command_buffer)
}

/// Checks that a decoded RGBA8 buffer matches its declared dimensions.
pub fn check_pixels(pixels: &[u8], width: u32, height: u32, byte_size: u64) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(RendererError::InvalidPixelData(format!("empty extent {}x{}", width, height)).into());
    }

    let expected = (width as u64)
        .checked_mul(height as u64)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| RendererError::InvalidPixelData(format!("{}x{} RGBA does not fit in memory", width, height)))?;
    if byte_size != expected {
        return Err(RendererError::InvalidPixelData(format!(
            "{}x{} RGBA needs {} bytes, got byte size {}",
            width, height, expected, byte_size
        ))
        .into());
    }

    if (pixels.len() as u64) < byte_size {
        return Err(RendererError::InvalidPixelData(format!(
            "buffer holds {} bytes, byte size is {}",
            pixels.len(),
            byte_size
        ))
        .into());
    }

    Ok(())
}

/// Uploads RGBA8 pixels into a sampled, device-local image.
pub unsafe fn upload_texture(
    device: &Device,
    allocator: &mut Allocator,
    transfer: TransferContext,
    pixels: &[u8],
    width: u32,
    height: u32,
    byte_size: u64,
) -> Result<AllocatedImage> {
    check_pixels(pixels, width, height, byte_size)?;

    let staging = allocator.create_staging_buffer(device, &pixels[..byte_size as usize])?;
    let extent = vk::Extent2D { width, height };

    let result = allocator
        .create_image(
            device,
            extent,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .and_then(|(image, memory)| {
            let mut texture = AllocatedImage { image, memory, view: vk::ImageView::null(), format: TEXTURE_FORMAT };

            let copied = transition_image_layout(
                device,
                transfer,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )
            .and_then(|_| copy_buffer_to_image(device, transfer, staging.buffer, image, extent))
            .and_then(|_| {
                transition_image_layout(
                    device,
                    transfer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
            })
            .and_then(|_| allocator.create_image_view(device, image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR));

            match copied {
                Ok(view) => {
                    texture.view = view;
                    Ok(texture)
                }
                Err(e) => {
                    allocator.destroy_image(device, texture);
                    Err(e)
                }
            }
        });

    allocator.destroy_buffer(device, staging);

    if result.is_ok() {
        debug!("Uploaded {}x{} texture.", width, height);
    }

    result
}

pub unsafe fn create_texture_sampler(device: &Device) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(16.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    Ok(device.create_sampler(&info, None)?)
}

/// First candidate whose tiling features include `features`.
pub fn choose_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format> {
    candidates
        .iter()
        .cloned()
        .find(|f| {
            let properties = properties(*f);
            match tiling {
                vk::ImageTiling::LINEAR => properties.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| RendererError::UnsupportedFormat.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions_are_supported() {
        let to_transfer =
            transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_transfer.src_access, vk::AccessFlags::empty());
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_transfer.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_transfer.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_shader = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_shader.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_shader.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(to_shader.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn other_transitions_are_rejected() {
        let pairs = [
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::UNDEFINED),
        ];
        for (old, new) in pairs {
            let error = transition_masks(old, new).unwrap_err();
            assert!(matches!(
                error.downcast_ref::<RendererError>(),
                Some(RendererError::UnsupportedLayoutTransition { .. })
            ));
        }
    }

    #[test]
    fn pixel_size_must_match_extent() {
        let pixels = vec![255u8; 16];
        assert!(check_pixels(&pixels, 2, 2, 16).is_ok());
        assert!(check_pixels(&pixels, 2, 2, 12).is_err());
        assert!(check_pixels(&pixels, 4, 4, 64).is_err());
        assert!(check_pixels(&pixels, 0, 4, 0).is_err());
    }

    #[test]
    fn huge_extent_is_rejected_not_overflowed() {
        let error = check_pixels(&[], u32::MAX, u32::MAX, 0).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RendererError>(),
            Some(RendererError::InvalidPixelData(_))
        ));
    }

    #[test]
    fn picks_first_format_with_features() {
        let properties = |format: vk::Format| {
            let mut properties = vk::FormatProperties::default();
            if format == vk::Format::D32_SFLOAT {
                properties.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
            }
            properties
        };

        let format = choose_supported_format(
            &[vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D32_SFLOAT],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            properties,
        )
        .unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT);

        assert!(choose_supported_format(
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            properties,
        )
        .is_err());
    }
}
