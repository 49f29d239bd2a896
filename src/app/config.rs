use super::error::RendererError;

use anyhow::Result;
use nalgebra_glm as glm;
use vulkanalia::prelude::v1_0::*;

pub const VALIDATION_LAYER: vk::ExtensionName = vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

pub const MAX_TEXTURES: u32 = 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CullMode {
    Back,
    None,
}

impl CullMode {
    pub fn flags(self) -> vk::CullModeFlags {
        match self {
            Self::Back => vk::CullModeFlags::BACK,
            Self::None => vk::CullModeFlags::NONE,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct CameraConfig {
    pub eye: glm::Vec3,
    pub target: glm::Vec3,
    pub up: glm::Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            eye: glm::vec3(0.0, 0.0, 2.0),
            target: glm::vec3(0.0, 0.0, 0.0),
            up: glm::vec3(0.0, 1.0, 0.0),
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// Everything the renderer needs to know before it touches the device.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub application_name: String,
    pub validation: bool,
    pub validation_layer: vk::ExtensionName,
    pub device_extensions: Vec<vk::ExtensionName>,
    pub frames_in_flight: usize,
    pub max_textures: u32,
    pub cull_mode: CullMode,
    pub clear_color: [f32; 4],
    pub prefer_low_latency_present: bool,
    pub camera: CameraConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Subpass Renderer".to_string(),
            validation: cfg!(debug_assertions),
            validation_layer: VALIDATION_LAYER,
            device_extensions: vec![vk::KHR_SWAPCHAIN_EXTENSION.name],
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            max_textures: MAX_TEXTURES,
            cull_mode: CullMode::Back,
            clear_color: [0.6, 0.65, 0.4, 1.0],
            prefer_low_latency_present: true,
            camera: CameraConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_max_textures(mut self, max_textures: u32) -> Self {
        self.max_textures = max_textures;
        self
    }

    pub fn with_camera(mut self, camera: CameraConfig) -> Self {
        self.camera = camera;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(RendererError::InvalidConfig("frames_in_flight must be at least 1").into());
        }
        if self.max_textures == 0 {
            return Err(RendererError::InvalidConfig("max_textures must be at least 1").into());
        }
        if self.camera.near <= 0.0 || self.camera.near >= self.camera.far {
            return Err(RendererError::InvalidConfig("camera planes must satisfy 0 < near < far").into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.device_extensions.contains(&vk::KHR_SWAPCHAIN_EXTENSION.name));
    }

    #[test]
    fn rejects_zero_frames_in_flight() {
        let config = RendererConfig { frames_in_flight: 0, ..Default::default() };
        let error = config.validate().unwrap_err();
        assert!(matches!(
            error.downcast_ref::<RendererError>(),
            Some(RendererError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_inverted_depth_range() {
        let camera = CameraConfig { near: 10.0, far: 1.0, ..Default::default() };
        assert!(RendererConfig::default().with_camera(camera).validate().is_err());
    }

    #[test]
    fn cull_mode_maps_to_flags() {
        assert_eq!(CullMode::Back.flags(), vk::CullModeFlags::BACK);
        assert_eq!(CullMode::None.flags(), vk::CullModeFlags::NONE);
    }
}
