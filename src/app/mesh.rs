use super::allocator::{AllocatedBuffer, Allocator};
use super::command_buffer::TransferContext;
use super::error::RendererError;

use anyhow::Result;
use log::*;
use nalgebra_glm as glm;
use std::mem::size_of;
use vulkanalia::prelude::v1_0::*;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pos: glm::Vec3,
    color: glm::Vec4,
    normal: glm::Vec3,
    uv: glm::Vec2,
}

impl Vertex {
    pub fn new(pos: glm::Vec3, color: glm::Vec4, normal: glm::Vec3, uv: glm::Vec2) -> Self {
        Self { pos, color, normal, uv }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        let pos = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0)
            .build();
        let color = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32B32A32_SFLOAT)
            .offset(size_of::<glm::Vec3>() as u32)
            .build();
        let normal = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(2)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset((size_of::<glm::Vec3>() + size_of::<glm::Vec4>()) as u32)
            .build();
        let uv = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(3)
            .format(vk::Format::R32G32_SFLOAT)
            .offset((size_of::<glm::Vec3>() * 2 + size_of::<glm::Vec4>()) as u32)
            .build();
        [pos, color, normal, uv]
    }
}

/// Flattened geometry handed over by an importer.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material_index: usize,
}

impl MeshData {
    pub fn vertex_bytes(&self) -> &[u8] {
        unsafe { slice_bytes(&self.vertices) }
    }

    pub fn index_bytes(&self) -> &[u8] {
        unsafe { slice_bytes(&self.indices) }
    }
}

/// # Safety
///
/// `T` must have no padding bytes. `Vertex` is 13 packed `f32`s and indices are `u32`.
unsafe fn slice_bytes<T: Copy>(values: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(values.as_ptr() as *const u8, std::mem::size_of_val(values)) }
}

/// GPU-resident geometry. The buffers are written once at construction.
#[derive(Debug)]
pub struct Mesh {
    vertex_buffer: AllocatedBuffer,
    index_buffer: AllocatedBuffer,
    index_count: u32,
    texture_id: usize,
}

impl Mesh {
    pub unsafe fn new(
        device: &Device,
        allocator: &mut Allocator,
        transfer: TransferContext,
        vertices: &[Vertex],
        indices: &[u32],
        texture_id: usize,
    ) -> Result<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RendererError::EmptyMesh.into());
        }

        let vertex_buffer = allocator.upload_buffer(
            device,
            transfer,
            slice_bytes(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let index_buffer = match allocator.upload_buffer(
            device,
            transfer,
            slice_bytes(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                allocator.destroy_buffer(device, vertex_buffer);
                return Err(e);
            }
        };

        debug!("Created mesh ({} vertices, {} indices, texture {}).", vertices.len(), indices.len(), texture_id);

        Ok(Self { vertex_buffer, index_buffer, index_count: indices.len() as u32, texture_id })
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.buffer
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn texture_id(&self) -> usize {
        self.texture_id
    }

    /// Reads both buffers back from device memory.
    pub unsafe fn read_back(
        &self,
        device: &Device,
        allocator: &mut Allocator,
        transfer: TransferContext,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let vertices = allocator.read_back_buffer(device, transfer, &self.vertex_buffer)?;
        let indices = allocator.read_back_buffer(device, transfer, &self.index_buffer)?;
        Ok((vertices, indices))
    }

    pub unsafe fn destroy(self, device: &Device, allocator: &mut Allocator) {
        allocator.destroy_buffer(device, self.index_buffer);
        allocator.destroy_buffer(device, self.vertex_buffer);
    }
}

/// An ordered list of meshes drawn with one shared transform.
#[derive(Debug)]
pub struct MeshModel {
    meshes: Vec<Mesh>,
    transform: glm::Mat4,
}

impl MeshModel {
    pub fn new(meshes: Vec<Mesh>) -> Self {
        Self { meshes, transform: glm::Mat4::identity() }
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn mesh(&self, index: usize) -> Option<&Mesh> {
        self.meshes.get(index)
    }

    pub fn transform(&self) -> &glm::Mat4 {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: glm::Mat4) {
        self.transform = transform;
    }

    pub unsafe fn destroy(self, device: &Device, allocator: &mut Allocator) {
        self.meshes.into_iter().for_each(|m| m.destroy(device, allocator));
    }
}

/// Resolves each mesh's material to a texture id.
pub fn resolve_texture_ids(meshes: &[MeshData], material_to_texture: &[usize], texture_count: usize) -> Result<Vec<usize>> {
    meshes
        .iter()
        .map(|m| {
            let texture_id = material_to_texture.get(m.material_index).copied().unwrap_or(0);
            if texture_id < texture_count {
                Ok(texture_id)
            } else {
                Err(RendererError::UnknownTexture(texture_id).into())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_packed() {
        assert_eq!(size_of::<Vertex>(), 48);
        assert_eq!(Vertex::binding_description().stride, 48);

        let attributes = Vertex::attribute_descriptions();
        let offsets = attributes.iter().map(|a| a.offset).collect::<Vec<_>>();
        let locations = attributes.iter().map(|a| a.location).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 12, 28, 40]);
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(attributes[3].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn vertex_bytes_match_field_order() {
        let vertex = Vertex::new(
            glm::vec3(1.0, 2.0, 3.0),
            glm::vec4(0.5, 0.5, 0.5, 1.0),
            glm::vec3(0.0, 0.0, 1.0),
            glm::vec2(0.25, 0.75),
        );
        let bytes = unsafe { slice_bytes(std::slice::from_ref(&vertex)) };
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[40..44], &0.25f32.to_ne_bytes());
    }

    #[test]
    fn index_bytes_are_u32() {
        let indices = [0u32, 1, 2, 2, 3, 0];
        assert_eq!(unsafe { slice_bytes(&indices) }.len(), 24);
    }

    #[test]
    fn materials_resolve_to_existing_textures() {
        let meshes = vec![
            MeshData { material_index: 0, ..Default::default() },
            MeshData { material_index: 1, ..Default::default() },
            MeshData { material_index: 7, ..Default::default() },
        ];

        let ids = resolve_texture_ids(&meshes, &[0, 2], 3).unwrap();
        assert_eq!(ids, vec![0, 2, 0]);

        let error = resolve_texture_ids(&meshes, &[0, 5], 3).unwrap_err();
        assert!(matches!(error.downcast_ref::<RendererError>(), Some(RendererError::UnknownTexture(5))));
    }

    #[test]
    fn new_model_has_identity_transform() {
        let model = MeshModel::new(Vec::new());
        assert_eq!(*model.transform(), glm::Mat4::identity());
        assert_eq!(model.mesh_count(), 0);
        assert!(model.mesh(0).is_none());
    }
}
