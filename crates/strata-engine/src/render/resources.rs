use std::collections::HashMap;

use crate::arena::{Arena, Handle};
use crate::coords::Color;
use crate::device::GraphicsApi;

use super::buffer::{BufferKind, RenderBuffer};
use super::material::{DrawMode, Material, MaterialHandle, TextureStore};

pub type BufferHandle = Handle<RenderBuffer>;

/// Name of the material every store starts with.
pub const WHITE_MATERIAL: &str = "White";

/// Owner of everything a display list refers to by handle.
///
/// Display lists and models hold generation-checked handles into these
/// arenas. Looking up a stale handle is a programming error and panics.
#[derive(Debug)]
pub struct Resources {
    buffers: Arena<RenderBuffer>,
    materials: Arena<Material>,
    material_names: HashMap<String, MaterialHandle>,
    textures: TextureStore,
    white: MaterialHandle,
}

impl Resources {
    pub fn new() -> Self {
        let mut materials = Arena::new();
        let white = materials.insert(Material::new(WHITE_MATERIAL, DrawMode::Normal, Color::WHITE));
        let mut material_names = HashMap::new();
        material_names.insert(WHITE_MATERIAL.to_owned(), white);
        Self {
            buffers: Arena::new(),
            materials,
            material_names,
            textures: TextureStore::new(),
            white,
        }
    }

    // ── buffers ───────────────────────────────────────────────────────────

    pub fn create_buffer(&mut self, kind: BufferKind) -> BufferHandle {
        self.buffers.insert(RenderBuffer::new(kind))
    }

    pub fn insert_buffer(&mut self, buffer: RenderBuffer) -> BufferHandle {
        self.buffers.insert(buffer)
    }

    pub fn buffer(&self, h: BufferHandle) -> &RenderBuffer {
        match self.buffers.get(h) {
            Some(b) => b,
            None => panic!("resources: stale buffer handle {h:?}"),
        }
    }

    pub fn buffer_mut(&mut self, h: BufferHandle) -> &mut RenderBuffer {
        match self.buffers.get_mut(h) {
            Some(b) => b,
            None => panic!("resources: stale buffer handle {h:?}"),
        }
    }

    /// Drops the buffer and its GPU storage. Returns false for a stale handle.
    pub fn destroy_buffer(&mut self, api: &mut dyn GraphicsApi, h: BufferHandle) -> bool {
        match self.buffers.remove(h) {
            Some(mut b) => {
                b.release(api);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    // ── materials ─────────────────────────────────────────────────────────

    /// Registers `material` under its name. A later material with the same
    /// name takes over name lookups; the earlier handle stays valid.
    pub fn add_material(&mut self, material: Material) -> MaterialHandle {
        let name = material.name.clone();
        let h = self.materials.insert(material);
        if !name.is_empty() {
            self.material_names.insert(name, h);
        }
        h
    }

    pub fn material(&self, h: MaterialHandle) -> &Material {
        match self.materials.get(h) {
            Some(m) => m,
            None => panic!("resources: stale material handle {h:?}"),
        }
    }

    pub fn material_mut(&mut self, h: MaterialHandle) -> &mut Material {
        match self.materials.get_mut(h) {
            Some(m) => m,
            None => panic!("resources: stale material handle {h:?}"),
        }
    }

    pub fn find_material(&self, name: &str) -> Option<MaterialHandle> {
        self.material_names.get(name).copied()
    }

    /// Plain white, unlit, alpha-blended.
    #[inline]
    pub fn white_material(&self) -> MaterialHandle {
        self.white
    }

    // ── textures ──────────────────────────────────────────────────────────

    #[inline]
    pub fn textures(&self) -> &TextureStore {
        &self.textures
    }

    #[inline]
    pub fn textures_mut(&mut self) -> &mut TextureStore {
        &mut self.textures
    }

    /// Returns every GPU object to `api`. Handles stay valid; buffers keep
    /// their client copies.
    pub fn release(&mut self, api: &mut dyn GraphicsApi) {
        for (_, b) in self.buffers.iter_mut() {
            b.release(api);
        }
        self.textures.release(api);
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new()
    }
}
