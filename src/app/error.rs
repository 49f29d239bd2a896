use thiserror::Error;
use vulkanalia::prelude::v1_0::*;

/// Broad category of a renderer failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Startup could not complete (loader, layers, device selection).
    Initialization,
    /// A GPU resource could not be created.
    Allocation,
    /// Acquire, submit or present failed for a frame.
    Frame,
    /// The engine was asked to do something it never supports.
    Programming,
    /// The caller passed bad input or used the engine after shutdown.
    Usage,
}

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Vulkan loader unavailable: {0}")]
    LoaderUnavailable(String),
    #[error("Validation layer requested but not supported.")]
    MissingValidationLayer,
    #[error("Failed to find suitable physical device.")]
    NoSuitableDevice,
    #[error("No memory type in mask {allowed_types:#b} has properties {properties:?}.")]
    NoCompatibleMemoryType {
        allowed_types: u32,
        properties: vk::MemoryPropertyFlags,
    },
    #[error("Descriptor pool has {remaining} sets left, {requested} requested.")]
    DescriptorsExhausted { requested: usize, remaining: u32 },
    #[error("None of the candidate formats support the required features.")]
    UnsupportedFormat,
    #[error("Invalid shader `{name}`: {reason}")]
    InvalidShader { name: String, reason: String },
    #[error("Unsupported image layout transition: {old:?} to {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    #[error("Frame {stage} failed: {code}")]
    Frame {
        stage: &'static str,
        code: vk::ErrorCode,
    },
    #[error("Frame slot {slot} cannot {step} while {state}.")]
    FrameOrder {
        slot: usize,
        step: &'static str,
        state: &'static str,
    },
    #[error("Renderer has been destroyed.")]
    Destroyed,
    #[error("Unknown model id {0}.")]
    UnknownModel(usize),
    #[error("Unknown texture id {0}.")]
    UnknownTexture(usize),
    #[error("Texture limit of {0} reached.")]
    TextureLimit(usize),
    #[error("Invalid pixel data: {0}")]
    InvalidPixelData(String),
    #[error("Mesh has no vertices or indices.")]
    EmptyMesh,
    #[error("Upload of zero bytes requested.")]
    EmptyUpload,
    #[error("Invalid renderer configuration: {0}")]
    InvalidConfig(&'static str),
}

impl RendererError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoaderUnavailable(_) | Self::MissingValidationLayer | Self::NoSuitableDevice => {
                ErrorKind::Initialization
            }
            Self::NoCompatibleMemoryType { .. }
            | Self::DescriptorsExhausted { .. }
            | Self::UnsupportedFormat
            | Self::InvalidShader { .. } => ErrorKind::Allocation,
            Self::Frame { .. } => ErrorKind::Frame,
            Self::UnsupportedLayoutTransition { .. } | Self::FrameOrder { .. } => ErrorKind::Programming,
            Self::Destroyed
            | Self::UnknownModel(_)
            | Self::UnknownTexture(_)
            | Self::TextureLimit(_)
            | Self::InvalidPixelData(_)
            | Self::EmptyMesh
            | Self::EmptyUpload
            | Self::InvalidConfig(_) => ErrorKind::Usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(RendererError::NoSuitableDevice.kind(), ErrorKind::Initialization);
        assert_eq!(
            RendererError::NoCompatibleMemoryType {
                allowed_types: 0,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            }
            .kind(),
            ErrorKind::Allocation
        );
        assert_eq!(
            RendererError::Frame { stage: "present", code: vk::ErrorCode::DEVICE_LOST }.kind(),
            ErrorKind::Frame
        );
        assert_eq!(
            RendererError::UnsupportedLayoutTransition {
                old: vk::ImageLayout::GENERAL,
                new: vk::ImageLayout::PRESENT_SRC_KHR,
            }
            .kind(),
            ErrorKind::Programming
        );
        assert_eq!(RendererError::Destroyed.kind(), ErrorKind::Usage);
    }

    #[test]
    fn survives_anyhow_round_trip() {
        let error: anyhow::Error = RendererError::TextureLimit(20).into();
        let typed = error.downcast_ref::<RendererError>();
        assert!(matches!(typed, Some(RendererError::TextureLimit(20))));
    }
}
