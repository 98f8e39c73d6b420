use std::collections::HashMap;

use anyhow::Context;

use crate::arena::{Arena, Handle};
use crate::coords::Color;
use crate::device::{GraphicsApi, RgbaImage, TextureResourceId};

pub type TextureHandle = Handle<Texture>;
pub type MaterialHandle = Handle<Material>;

// ── material ──────────────────────────────────────────────────────────────

/// How a material's fragments combine with the target.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum DrawMode {
    /// Alpha blending, unlit.
    #[default]
    Normal,
    /// Additive blending, unlit.
    Add,
    /// Subtractive blending (`src * alpha - dst`), unlit.
    Subtract,
    /// Alpha blending with lighting.
    Lit,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    Front,
    #[default]
    Back,
    None,
}

/// What a material writes into the stencil buffer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum StencilMode {
    /// Leave the stencil buffer alone.
    #[default]
    None,
    /// Write 1 wherever the material draws.
    One,
    /// Write 0 where a fragment passes.
    Zero,
    Increment,
    Decrement,
    /// Flip 0 and 1 where a fragment passes.
    Invert,
}

/// Everything the renderer needs to configure the pipeline for a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub texture: Option<TextureHandle>,
    pub color: Color,
    /// Only used in `DrawMode::Lit`.
    pub specular: Color,
    pub draw_mode: DrawMode,
    /// Front faces wind clockwise in world space. The 3D views mirror X,
    /// which makes them counter-clockwise on screen.
    pub cull: CullMode,
    pub stencil: StencilMode,
    pub alpha_test: bool,
    pub alpha_ref: f32,
    pub depth_bias_constant: f32,
    pub depth_bias_factor: f32,
    pub fog: bool,
    pub z_read: bool,
    pub z_write: bool,
    pub clamp_u: bool,
    pub clamp_v: bool,
    pub glow: bool,
    /// Whether `color` overrides the current vertex color.
    pub has_color: bool,
    pub blend: bool,
    /// Render queue sort key; lower layers draw first.
    pub layer: i32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            texture: None,
            color: Color::WHITE,
            specular: Color::BLACK,
            draw_mode: DrawMode::Normal,
            cull: CullMode::Back,
            stencil: StencilMode::None,
            alpha_test: false,
            alpha_ref: 0.0,
            depth_bias_constant: 0.0,
            depth_bias_factor: 0.0,
            fog: false,
            z_read: false,
            z_write: false,
            clamp_u: false,
            clamp_v: false,
            glow: false,
            has_color: true,
            blend: true,
            layer: 0,
        }
    }
}

impl Material {
    pub fn new(name: impl Into<String>, draw_mode: DrawMode, color: Color) -> Self {
        Self {
            name: name.into(),
            draw_mode,
            color,
            ..Self::default()
        }
    }

    /// Lit, depth-tested and depth-written: the usual setup for meshes.
    pub fn solid(name: impl Into<String>, color: Color) -> Self {
        Self {
            z_read: true,
            z_write: true,
            ..Self::new(name, DrawMode::Lit, color)
        }
    }

    pub fn with_texture(mut self, texture: TextureHandle) -> Self {
        self.texture = Some(texture);
        self
    }

    #[inline]
    pub fn is_lit(&self) -> bool {
        self.draw_mode == DrawMode::Lit
    }

    #[inline]
    pub fn has_depth_bias(&self) -> bool {
        self.depth_bias_constant != 0.0 || self.depth_bias_factor != 0.0
    }
}

// ── textures ──────────────────────────────────────────────────────────────

/// A named texture. Several may share one GPU resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    pub name: String,
    pub resource: TextureResourceId,
    pub width: u32,
    pub height: u32,
}

/// Resolves texture names to pixels.
pub trait TextureLoader {
    fn load(&mut self, name: &str) -> anyhow::Result<RgbaImage>;
}

impl<F> TextureLoader for F
where
    F: FnMut(&str) -> anyhow::Result<RgbaImage>,
{
    fn load(&mut self, name: &str) -> anyhow::Result<RgbaImage> {
        self(name)
    }
}

/// Named textures backed by GPU resources.
///
/// Loading by name is cached. A failed load is logged and the name is bound
/// to a shared 1x1 white placeholder, so callers always get a usable handle.
#[derive(Debug, Default)]
pub struct TextureStore {
    textures: Arena<Texture>,
    by_name: HashMap<String, TextureHandle>,
    /// Resources this store created and must delete.
    owned: Vec<TextureResourceId>,
    placeholder: Option<TextureResourceId>,
}

impl TextureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached texture for `name`, loading it on first use.
    pub fn load(
        &mut self,
        api: &mut dyn GraphicsApi,
        loader: &mut dyn TextureLoader,
        name: &str,
    ) -> TextureHandle {
        if let Some(&h) = self.by_name.get(name) {
            return h;
        }

        let loaded = loader
            .load(name)
            .with_context(|| format!("texture {name:?}"))
            .and_then(|img| {
                anyhow::ensure!(
                    img.pixels.len() == img.width as usize * img.height as usize * 4,
                    "texture {name:?}: {}x{} image carries {} bytes",
                    img.width,
                    img.height,
                    img.pixels.len()
                );
                Ok(img)
            });

        match loaded {
            Ok(img) => self.insert_image(api, name, &img),
            Err(e) => {
                log::warn!("{e:#}; using placeholder");
                let resource = self.placeholder(api);
                self.insert(name, resource, 1, 1)
            }
        }
    }

    /// Uploads `image` as a new texture called `name`, replacing any earlier
    /// binding of the name.
    pub fn insert_image(
        &mut self,
        api: &mut dyn GraphicsApi,
        name: &str,
        image: &RgbaImage,
    ) -> TextureHandle {
        let resource = api.create_texture(image);
        self.owned.push(resource);
        self.insert(name, resource, image.width, image.height)
    }

    /// A second logical texture sharing `of`'s GPU resource.
    pub fn alias(&mut self, name: &str, of: TextureHandle) -> TextureHandle {
        let t = self.get(of);
        let (resource, w, h) = (t.resource, t.width, t.height);
        self.insert(name, resource, w, h)
    }

    pub fn find(&self, name: &str) -> Option<TextureHandle> {
        self.by_name.get(name).copied()
    }

    /// Panics on a stale handle.
    pub fn get(&self, handle: TextureHandle) -> &Texture {
        match self.textures.get(handle) {
            Some(t) => t,
            None => panic!("texture store: stale handle {handle:?}"),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn release(&mut self, api: &mut dyn GraphicsApi) {
        for resource in self.owned.drain(..) {
            api.delete_texture(resource);
        }
        if let Some(resource) = self.placeholder.take() {
            api.delete_texture(resource);
        }
        self.textures = Arena::new();
        self.by_name.clear();
    }

    fn insert(&mut self, name: &str, resource: TextureResourceId, width: u32, height: u32) -> TextureHandle {
        let handle = self.textures.insert(Texture {
            name: name.to_owned(),
            resource,
            width,
            height,
        });
        self.by_name.insert(name.to_owned(), handle);
        handle
    }

    fn placeholder(&mut self, api: &mut dyn GraphicsApi) -> TextureResourceId {
        *self
            .placeholder
            .get_or_insert_with(|| api.create_texture(&RgbaImage::filled(1, 1, [255; 4])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ApiCall, RecordingApi};

    fn ok_loader(name: &str) -> anyhow::Result<RgbaImage> {
        anyhow::ensure!(!name.starts_with("missing"), "no such file");
        Ok(RgbaImage::filled(2, 2, [9, 9, 9, 255]))
    }

    #[test]
    fn loads_are_cached_by_name() {
        let mut api = RecordingApi::new();
        let mut store = TextureStore::new();
        let a = store.load(&mut api, &mut ok_loader, "ship.png");
        let b = store.load(&mut api, &mut ok_loader, "ship.png");
        assert_eq!(a, b);
        assert_eq!(api.count(|c| matches!(c, ApiCall::CreateTexture(_))), 1);
        assert_eq!(store.get(a).width, 2);
    }

    #[test]
    fn failed_load_yields_shared_placeholder() {
        let mut api = RecordingApi::new();
        let mut store = TextureStore::new();
        let a = store.load(&mut api, &mut ok_loader, "missing_a.png");
        let b = store.load(&mut api, &mut ok_loader, "missing_b.png");
        assert_ne!(a, b);
        assert_eq!(store.get(a).resource, store.get(b).resource);
        assert_eq!((store.get(a).width, store.get(a).height), (1, 1));
        assert_eq!(api.count(|c| matches!(c, ApiCall::CreateTexture(_))), 1);
    }

    #[test]
    fn malformed_image_falls_back() {
        let mut api = RecordingApi::new();
        let mut store = TextureStore::new();
        let mut short = |_: &str| -> anyhow::Result<RgbaImage> {
            Ok(RgbaImage { width: 4, height: 4, pixels: vec![0; 3] })
        };
        let h = store.load(&mut api, &mut short, "bad.png");
        assert_eq!(store.get(h).width, 1);
    }

    #[test]
    fn alias_shares_resource() {
        let mut api = RecordingApi::new();
        let mut store = TextureStore::new();
        let a = store.insert_image(&mut api, "atlas", &RgbaImage::filled(8, 8, [0; 4]));
        let b = store.alias("atlas:ship", a);
        assert_ne!(a, b);
        assert_eq!(store.get(a).resource, store.get(b).resource);
        assert_eq!(store.find("atlas:ship"), Some(b));
    }

    #[test]
    fn release_deletes_each_resource_once() {
        let mut api = RecordingApi::new();
        let mut store = TextureStore::new();
        let a = store.insert_image(&mut api, "a", &RgbaImage::filled(1, 1, [0; 4]));
        store.alias("b", a);
        store.load(&mut api, &mut ok_loader, "missing.png");
        store.release(&mut api);
        assert_eq!(api.count(|c| matches!(c, ApiCall::DeleteTexture(_))), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn solid_material_reads_and_writes_depth() {
        let m = Material::solid("hull", Color::WHITE);
        assert!(m.is_lit() && m.z_read && m.z_write);
        assert!(!m.has_depth_bias());
    }
}
