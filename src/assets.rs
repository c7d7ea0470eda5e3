// Asset loading - shaders, meshes, textures
//
// Everything here runs once at startup. A missing or broken file is a setup
// error and ends the program.

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Read a compiled SPIR-V blob as properly aligned words
pub fn load_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open shader {:?}", path))?;
    let words = ash::util::read_spv(&mut file)
        .with_context(|| format!("Failed to read SPIR-V from {:?}", path))?;

    log::info!("Loaded shader {:?} ({} bytes)", path, words.len() * 4);
    Ok(words)
}

/// Interleaved vertex as consumed by the model pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

// Bitwise equality so vertices can key a HashMap during deduplication
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        bytemuck::bytes_of(self) == bytemuck::bytes_of(other)
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        bytemuck::bytes_of(self).hash(state);
    }
}

/// Indexed triangle mesh
#[derive(Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Load and triangulate an OBJ file, merging identical vertices
    pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
        )
        .with_context(|| format!("Failed to load model {:?}", path))?;

        let mut mesh = Mesh::default();
        let mut unique: HashMap<Vertex, u32> = HashMap::new();

        for model in &models {
            let positions = &model.mesh.positions;
            let texcoords = &model.mesh.texcoords;

            for &index in &model.mesh.indices {
                let i = index as usize;
                let pos = positions
                    .get(3 * i..3 * i + 3)
                    .with_context(|| format!("Vertex index {} out of range in {:?}", i, path))?;

                // OBJ puts the texture origin bottom-left, Vulkan samples top-left
                let tex_coord = match texcoords.get(2 * i..2 * i + 2) {
                    Some(uv) => [uv[0], 1.0 - uv[1]],
                    None => [0.0, 0.0],
                };

                let vertex = Vertex {
                    pos: [pos[0], pos[1], pos[2]],
                    color: [1.0, 1.0, 1.0],
                    tex_coord,
                };

                let next = mesh.vertices.len() as u32;
                let slot = *unique.entry(vertex).or_insert_with(|| {
                    mesh.vertices.push(vertex);
                    next
                });
                mesh.indices.push(slot);
            }
        }

        if mesh.indices.is_empty() {
            anyhow::bail!("Model {:?} contains no triangles", path);
        }

        log::info!(
            "Loaded model {:?}: {} vertices, {} indices",
            path,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }
}

/// Decoded RGBA8 image
#[derive(Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to load texture {:?}", path))?
            .into_rgba8();

        let (width, height) = image.dimensions();
        log::info!("Loaded texture {:?}: {}x{}", path, width, height);

        Ok(Self {
            width,
            height,
            pixels: image.into_raw(),
        })
    }

    pub fn size_bytes(&self) -> u64 {
        self.pixels.len() as u64
    }
}
