use crate::app::{MeshData, Vertex};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::*;
use nalgebra_glm as glm;
use std::fs::File;
use std::path::Path;

pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

lazy_static! {
    static ref QUAD_CORNERS: [(glm::Vec3, glm::Vec2); 4] = [
        (glm::vec3(-0.4, 0.4, 0.0), glm::vec2(1.0, 1.0)),
        (glm::vec3(-0.4, -0.4, 0.0), glm::vec2(1.0, 0.0)),
        (glm::vec3(0.4, -0.4, 0.0), glm::vec2(0.0, 0.0)),
        (glm::vec3(0.4, 0.4, 0.0), glm::vec2(0.0, 1.0)),
    ];
}

/// A flat, single-colour quad facing +Z.
pub fn quad(color: glm::Vec4) -> MeshData {
    let vertices = QUAD_CORNERS
        .iter()
        .map(|(pos, uv)| Vertex::new(*pos, color, glm::vec3(0.0, 0.0, 1.0), *uv))
        .collect();

    MeshData { vertices, indices: QUAD_INDICES.to_vec(), material_index: 0 }
}

/// Decoded RGBA8 image.
#[derive(Clone, Debug)]
pub struct Pixels {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Pixels {
    pub fn byte_size(&self) -> u64 {
        self.rgba.len() as u64
    }
}

pub fn decode_png(path: &Path) -> Result<Pixels> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut decoder = png::Decoder::new(file);
    decoder.set_transformations(png::Transformations::normalize_to_color8());

    let mut reader = decoder.read_info()?;
    let mut buffer = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buffer)?;
    buffer.truncate(info.buffer_size());

    let rgba = expand_to_rgba(&buffer, info.color_type)?;
    debug!("Decoded {} ({}x{}, {:?}).", path.display(), info.width, info.height, info.color_type);

    Ok(Pixels { rgba, width: info.width, height: info.height })
}

/// Widens 8-bit grey, grey-alpha and RGB rows to RGBA.
pub fn expand_to_rgba(pixels: &[u8], color_type: png::ColorType) -> Result<Vec<u8>> {
    let rgba = match color_type {
        png::ColorType::Rgba => pixels.to_vec(),
        png::ColorType::Rgb => pixels.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect(),
        png::ColorType::GrayscaleAlpha => pixels.chunks_exact(2).flat_map(|p| [p[0], p[0], p[0], p[1]]).collect(),
        png::ColorType::Grayscale => pixels.iter().flat_map(|g| [*g, *g, *g, 255]).collect(),
        png::ColorType::Indexed => anyhow::bail!("Indexed PNG was not expanded by the decoder."),
    };
    Ok(rgba)
}

/// Square RGBA checkerboard with 8 cells per side.
pub fn checkerboard(size: u32) -> Pixels {
    let cell = (size / 8).max(1);
    let rgba = (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            if (x / cell + y / cell) % 2 == 0 {
                [230, 230, 230, 255]
            } else {
                [40, 40, 40, 255]
            }
        })
        .collect();

    Pixels { rgba, width: size, height: size }
}

/// Flattened OBJ file: one entry per mesh plus each material's diffuse texture file.
#[derive(Clone, Debug, Default)]
pub struct ObjScene {
    pub meshes: Vec<MeshData>,
    pub material_textures: Vec<Option<String>>,
}

pub fn load_obj(path: &Path) -> Result<ObjScene> {
    let options = tobj::LoadOptions { single_index: true, triangulate: true, ..Default::default() };
    let (models, materials) =
        tobj::load_obj(path, &options).with_context(|| format!("Failed to load {}", path.display()))?;

    let material_textures = match materials {
        Ok(materials) => materials.iter().map(|m| texture_file_name(&m.diffuse_texture)).collect(),
        Err(e) => {
            warn!("No materials for {}: {}", path.display(), e);
            Vec::new()
        }
    };

    let meshes = models.iter().map(|m| flatten_mesh(&m.mesh)).collect::<Vec<_>>();
    info!("Loaded {} ({} meshes, {} materials).", path.display(), meshes.len(), material_textures.len());

    Ok(ObjScene { meshes, material_textures })
}

/// Drops any directory prefix, keeping only the file name.
pub fn texture_file_name(name: &str) -> Option<String> {
    let file = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
    if file.is_empty() {
        None
    } else {
        Some(file.to_string())
    }
}

pub fn flatten_mesh(mesh: &tobj::Mesh) -> MeshData {
    let vertices = (0..mesh.positions.len() / 3)
        .map(|i| {
            let pos = glm::vec3(mesh.positions[3 * i], mesh.positions[3 * i + 1], mesh.positions[3 * i + 2]);

            let color = if mesh.vertex_color.len() >= 3 * i + 3 {
                glm::vec4(mesh.vertex_color[3 * i], mesh.vertex_color[3 * i + 1], mesh.vertex_color[3 * i + 2], 1.0)
            } else {
                glm::vec4(1.0, 1.0, 1.0, 1.0)
            };

            let normal = if mesh.normals.len() >= 3 * i + 3 {
                glm::vec3(mesh.normals[3 * i], mesh.normals[3 * i + 1], mesh.normals[3 * i + 2])
            } else {
                glm::vec3(0.0, 0.0, 0.0)
            };

            // OBJ texture space has V pointing up.
            let uv = if mesh.texcoords.len() >= 2 * i + 2 {
                glm::vec2(mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1])
            } else {
                glm::vec2(0.0, 0.0)
            };

            Vertex::new(pos, color, normal, uv)
        })
        .collect();

    MeshData { vertices, indices: mesh.indices.clone(), material_index: mesh.material_id.unwrap_or(0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_has_four_vertices_and_two_triangles() {
        let quad = quad(glm::vec4(1.0, 0.0, 0.0, 1.0));
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.indices, vec![0, 1, 2, 2, 3, 0]);
        assert_eq!(quad.vertex_bytes().len(), 4 * 48);
        assert_eq!(quad.index_bytes().len(), 24);
    }

    #[test]
    fn rgb_and_grey_are_widened() {
        let rgb = expand_to_rgba(&[1, 2, 3, 4, 5, 6], png::ColorType::Rgb).unwrap();
        assert_eq!(rgb, vec![1, 2, 3, 255, 4, 5, 6, 255]);

        let grey = expand_to_rgba(&[9], png::ColorType::Grayscale).unwrap();
        assert_eq!(grey, vec![9, 9, 9, 255]);

        let grey_alpha = expand_to_rgba(&[9, 7], png::ColorType::GrayscaleAlpha).unwrap();
        assert_eq!(grey_alpha, vec![9, 9, 9, 7]);
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let board = checkerboard(16);
        assert_eq!(board.byte_size(), 16 * 16 * 4);
        let at = |x: usize, y: usize| board.rgba[(y * 16 + x) * 4];
        assert_eq!(at(0, 0), 230);
        assert_eq!(at(2, 0), 40);
        assert_eq!(at(2, 2), 230);
    }

    #[test]
    fn tiny_checkerboard_still_has_pixels() {
        let board = checkerboard(1);
        assert_eq!(board.rgba, vec![230, 230, 230, 255]);
    }

    #[test]
    fn texture_names_lose_their_directories() {
        assert_eq!(texture_file_name("textures/wood.png").as_deref(), Some("wood.png"));
        assert_eq!(texture_file_name("C:\\art\\brick.png").as_deref(), Some("brick.png"));
        assert_eq!(texture_file_name("plain.png").as_deref(), Some("plain.png"));
        assert_eq!(texture_file_name(""), None);
    }

    #[test]
    fn obj_mesh_is_flattened_per_vertex() {
        let mesh = tobj::Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            texcoords: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            indices: vec![0, 1, 2],
            material_id: Some(3),
            ..Default::default()
        };

        let data = flatten_mesh(&mesh);
        assert_eq!(data.vertices.len(), 3);
        assert_eq!(data.indices, vec![0, 1, 2]);
        assert_eq!(data.material_index, 3);

        let expected = Vertex::new(
            glm::vec3(0.0, 1.0, 0.0),
            glm::vec4(1.0, 1.0, 1.0, 1.0),
            glm::vec3(0.0, 0.0, 0.0),
            glm::vec2(0.0, 0.0),
        );
        assert_eq!(data.vertices[2], expected);
    }
}
