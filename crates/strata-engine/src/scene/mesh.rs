//! Binary mesh format.
//!
//! Little-endian throughout. Strings are a `u32` byte length followed by
//! UTF-8. Layout:
//!
//! ```text
//! model    := "ModelV1" name translation:f32x3 rotation:f32x4 scale:f32x3
//!             fragment_count:i32 fragment* child_count:i32 model*
//! fragment := "Fragment" material format vertex_count:i32 vertex*
//!             "IndexBuffer" index_count:i32 index:i32*
//! ```
//!
//! `format` names the per-vertex fields in the fixed order position (f32x3),
//! color (f32x4), normal (f32x3), texel (f32x2): `P`, `PC`, `PT`, `PN`,
//! `PCT`, `PNT`, `PCN` or `PCNT`. Indices are narrowed to 16 bits.
//! Outward faces wind clockwise, matching `Material::cull`.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail, ensure};
use glam::{Quat, Vec3};

use crate::config::MAX_INDEXED_VERTICES;
use crate::coords::{Color, Transform3D};
use crate::device::GraphicsApi;
use crate::render::{
    BufferHandle, BufferKind, Resources, VertexPC, VertexPCN, VertexPCNT, VertexPCT, VertexPN,
    VertexPNT, VertexPT,
};

use super::model::{Fragment, Model};

const MODEL_TAG: &str = "ModelV1";
const FRAGMENT_TAG: &str = "Fragment";
const INDEX_TAG: &str = "IndexBuffer";

/// Children nested deeper than this are rejected.
const MAX_MODEL_DEPTH: usize = 32;

/// Reads whole files by logical path.
pub trait FileSource {
    fn read(&mut self, path: &str) -> anyhow::Result<Vec<u8>>;
}

impl<F> FileSource for F
where
    F: FnMut(&str) -> anyhow::Result<Vec<u8>>,
{
    fn read(&mut self, path: &str) -> anyhow::Result<Vec<u8>> {
        self(path)
    }
}

/// Logical paths resolved against a directory on disk.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileSource for DirSource {
    fn read(&mut self, path: &str) -> anyhow::Result<Vec<u8>> {
        let full = self.root.join(path);
        std::fs::read(&full).with_context(|| format!("reading {}", full.display()))
    }
}

// ── loading ───────────────────────────────────────────────────────────────

/// Loads the mesh at `path`. Buffers land in `res` as static buffers;
/// materials are looked up by name.
pub fn load_model_file(
    api: &mut dyn GraphicsApi,
    res: &mut Resources,
    files: &mut dyn FileSource,
    path: &str,
) -> anyhow::Result<Model> {
    let bytes = files.read(path)?;
    load_model(api, res, &bytes).with_context(|| format!("mesh {path:?}"))
}

/// Parses a mesh from memory. On error, every buffer created so far is
/// destroyed again.
pub fn load_model(
    api: &mut dyn GraphicsApi,
    res: &mut Resources,
    bytes: &[u8],
) -> anyhow::Result<Model> {
    let mut loader = Loader {
        r: Reader { bytes, pos: 0 },
        created: Vec::new(),
        api,
        res,
    };
    match loader.model(0) {
        Ok(model) => {
            if loader.r.remaining() > 0 {
                log::warn!("mesh: {} trailing bytes ignored", loader.r.remaining());
            }
            Ok(model)
        }
        Err(e) => {
            for h in loader.created.drain(..) {
                loader.res.destroy_buffer(loader.api, h);
            }
            Err(e)
        }
    }
}

struct Loader<'a, 'b> {
    r: Reader<'b>,
    api: &'a mut dyn GraphicsApi,
    res: &'a mut Resources,
    created: Vec<BufferHandle>,
}

impl Loader<'_, '_> {
    fn model(&mut self, depth: usize) -> anyhow::Result<Model> {
        ensure!(depth < MAX_MODEL_DEPTH, "models nested deeper than {MAX_MODEL_DEPTH}");
        self.r.expect_tag(MODEL_TAG)?;

        let mut model = Model::new(self.r.string()?);
        let position = self.r.vec3()?;
        let rotation = Quat::from_array(self.r.f32s()?);
        let scale = self.r.vec3()?;
        let orientation = if rotation.length_squared() > 0.0 {
            rotation.normalize()
        } else {
            Quat::IDENTITY
        };
        model.set_transform(Transform3D {
            position,
            orientation,
            scale,
        });

        let fragments = self.r.count("fragment count")?;
        for i in 0..fragments {
            let f = self
                .fragment()
                .with_context(|| format!("model {:?} fragment {i}", model.name))?;
            model.add_fragment(f);
        }

        let children = self.r.count("child count")?;
        for i in 0..children {
            let child = self
                .model(depth + 1)
                .with_context(|| format!("model {:?} child {i}", model.name))?;
            model.add_child(child);
        }
        Ok(model)
    }

    fn fragment(&mut self) -> anyhow::Result<Fragment> {
        self.r.expect_tag(FRAGMENT_TAG)?;
        let material_name = self.r.string()?;
        let format = self.r.string()?;
        let layout = VertexFormat::parse(&format)?;

        let vertex_count = self.r.count("vertex count")?;
        ensure!(vertex_count > 0, "fragment has no vertices");
        ensure!(
            vertex_count <= MAX_INDEXED_VERTICES,
            "{vertex_count} vertices exceed the 16-bit index limit"
        );

        let mut verts = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            verts.push(layout.read(&mut self.r)?);
        }

        self.r.expect_tag(INDEX_TAG)?;
        let index_count = self.r.count("index count")?;
        ensure!(index_count > 0, "fragment has no indices");
        let mut indices = Vec::with_capacity(index_count.min(self.r.remaining() / 4));
        for i in 0..index_count {
            let raw = self.r.i32()?;
            ensure!(
                (0..=i32::from(u16::MAX)).contains(&raw),
                "index {i} = {raw} does not fit 16 bits"
            );
            ensure!(
                (raw as usize) < vertex_count,
                "index {i} = {raw} past the {vertex_count} vertices"
            );
            indices.push(raw as u16);
        }

        let material = match self.res.find_material(&material_name) {
            Some(m) => m,
            None => {
                log::warn!("mesh: unknown material {material_name:?}; using white");
                self.res.white_material()
            }
        };

        let vertices = self.res.create_buffer(BufferKind::Static);
        self.created.push(vertices);
        layout.upload(self.api, self.res, vertices, &verts);

        let ib = self.res.create_buffer(BufferKind::Static);
        self.created.push(ib);
        self.res.buffer_mut(ib).set_array(self.api, &indices);

        Ok(Fragment::new(material, vertices, ib))
    }
}

/// Which optional fields follow each position.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct VertexFormat {
    color: bool,
    normal: bool,
    texel: bool,
}

impl VertexFormat {
    fn parse(tag: &str) -> anyhow::Result<Self> {
        let (color, normal, texel) = match tag {
            "P" => (false, false, false),
            "PC" => (true, false, false),
            "PN" => (false, true, false),
            "PT" => (false, false, true),
            "PCN" => (true, true, false),
            "PCT" => (true, false, true),
            "PNT" => (false, true, true),
            "PCNT" => (true, true, true),
            other => bail!("unknown vertex format {other:?}"),
        };
        Ok(Self { color, normal, texel })
    }

    fn read(self, r: &mut Reader<'_>) -> anyhow::Result<VertexPCNT> {
        let position = r.f32s()?;
        let color = if self.color { Color::from_array(r.f32s()?) } else { Color::WHITE };
        let normal = if self.normal { r.f32s()? } else { [0.0; 3] };
        let texel = if self.texel { r.f32s()? } else { [0.0; 2] };
        Ok(VertexPCNT { position, color, normal, texel })
    }

    /// Stores `verts` in the narrowest layout holding this format's fields.
    fn upload(
        self,
        api: &mut dyn GraphicsApi,
        res: &mut Resources,
        h: BufferHandle,
        verts: &[VertexPCNT],
    ) {
        fn conv<T>(v: &[VertexPCNT], f: impl Fn(&VertexPCNT) -> T) -> Vec<T> {
            v.iter().map(f).collect()
        }
        let b = res.buffer_mut(h);
        match (self.color, self.normal, self.texel) {
            (true, true, true) => b.set_array(api, verts),
            (true, true, false) => b.set_array(
                api,
                &conv(verts, |v| VertexPCN { position: v.position, color: v.color, normal: v.normal }),
            ),
            (true, false, true) => b.set_array(
                api,
                &conv(verts, |v| VertexPCT { position: v.position, color: v.color, texel: v.texel }),
            ),
            (false, true, true) => b.set_array(
                api,
                &conv(verts, |v| VertexPNT { position: v.position, normal: v.normal, texel: v.texel }),
            ),
            (true, false, false) => b.set_array(
                api,
                &conv(verts, |v| VertexPC { position: v.position, color: v.color }),
            ),
            (false, true, false) => b.set_array(
                api,
                &conv(verts, |v| VertexPN { position: v.position, normal: v.normal }),
            ),
            (false, false, true) => b.set_array(
                api,
                &conv(verts, |v| VertexPT { position: v.position, texel: v.texel }),
            ),
            (false, false, false) => {
                b.set_array(api, &conv(verts, |v| Vec3::from_array(v.position)))
            }
        }
    }
}

// ── byte cursor ───────────────────────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    #[inline]
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&[u8]> {
        ensure!(
            n <= self.remaining(),
            "truncated at byte {}: wanted {n}, {} left",
            self.pos,
            self.remaining()
        );
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn word(&mut self) -> anyhow::Result<[u8; 4]> {
        let mut w = [0; 4];
        w.copy_from_slice(self.take(4)?);
        Ok(w)
    }

    fn i32(&mut self) -> anyhow::Result<i32> {
        Ok(i32::from_le_bytes(self.word()?))
    }

    fn f32(&mut self) -> anyhow::Result<f32> {
        Ok(f32::from_le_bytes(self.word()?))
    }

    fn f32s<const N: usize>(&mut self) -> anyhow::Result<[f32; N]> {
        let mut out = [0.0; N];
        for v in &mut out {
            *v = self.f32()?;
        }
        Ok(out)
    }

    fn vec3(&mut self) -> anyhow::Result<Vec3> {
        Ok(Vec3::from_array(self.f32s()?))
    }

    /// Non-negative `i32` count.
    fn count(&mut self, what: &str) -> anyhow::Result<usize> {
        let n = self.i32()?;
        ensure!(n >= 0, "negative {what} {n}");
        Ok(n as usize)
    }

    fn string(&mut self) -> anyhow::Result<String> {
        let len = u32::from_le_bytes(self.word()?) as usize;
        let at = self.pos;
        let raw = self.take(len)?;
        let s = std::str::from_utf8(raw).with_context(|| format!("string at byte {at}"))?;
        Ok(s.to_owned())
    }

    fn expect_tag(&mut self, tag: &str) -> anyhow::Result<()> {
        let at = self.pos;
        let got = self.string()?;
        ensure!(got == tag, "expected {tag:?} at byte {at}, found {got:?}");
        Ok(())
    }
}

// ── writing ───────────────────────────────────────────────────────────────

/// Builds mesh bytes. Used by tools and tests; the loader never writes.
#[derive(Debug, Default, Clone)]
pub struct MeshWriter {
    bytes: Vec<u8>,
}

impl MeshWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.bytes.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(s.as_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32s(&mut self, vs: &[f32]) -> &mut Self {
        for v in vs {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    /// Model header up to and including the fragment count.
    pub fn begin_model(&mut self, name: &str, transform: &Transform3D, fragments: i32) -> &mut Self {
        self.string(MODEL_TAG)
            .string(name)
            .f32s(&transform.position.to_array())
            .f32s(&transform.orientation.to_array())
            .f32s(&transform.scale.to_array())
            .i32(fragments)
    }

    /// A complete `PCNT` fragment.
    pub fn fragment(&mut self, material: &str, vertices: &[VertexPCNT], indices: &[i32]) -> &mut Self {
        self.string(FRAGMENT_TAG)
            .string(material)
            .string("PCNT")
            .i32(vertices.len() as i32);
        for v in vertices {
            self.f32s(&v.position)
                .f32s(&v.color.to_array())
                .f32s(&v.normal)
                .f32s(&v.texel);
        }
        self.string(INDEX_TAG).i32(indices.len() as i32);
        for &i in indices {
            self.i32(i);
        }
        self
    }

    /// Child count; the children follow as complete models.
    pub fn children(&mut self, count: i32) -> &mut Self {
        self.i32(count)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingApi;
    use crate::render::{ContentType, DrawMode, Material};

    fn quad() -> Vec<VertexPCNT> {
        [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
            .iter()
            .map(|&[x, y]| VertexPCNT {
                position: [x, y, 0.0],
                color: Color::WHITE,
                normal: [0.0, 0.0, 1.0],
                texel: [x, y],
            })
            .collect()
    }

    fn quad_bytes(material: &str) -> Vec<u8> {
        MeshWriter::new()
            .begin_model("panel", &Transform3D::IDENTITY, 1)
            .fragment(material, &quad(), &[0, 1, 2, 0, 2, 3])
            .children(0)
            .finish()
    }

    #[test]
    fn loads_single_pcnt_fragment() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let hull = res.add_material(Material::new("hull", DrawMode::Lit, Color::WHITE));
        let m = load_model(&mut api, &mut res, &quad_bytes("hull")).unwrap();

        assert_eq!(m.name, "panel");
        assert_eq!(m.fragments().len(), 1);
        let f = &m.fragments()[0];
        assert_eq!(f.material, hull);
        let vb = res.buffer(f.vertices);
        assert_eq!(vb.content(), ContentType::PCNT);
        assert_eq!(vb.position_count(), 4);
        assert_eq!(vb.texel(2), glam::Vec2::ONE);
        assert_eq!(res.buffer(f.indices).index_count(), 6);
    }

    #[test]
    fn unknown_material_falls_back_to_white() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let m = load_model(&mut api, &mut res, &quad_bytes("nope")).unwrap();
        assert_eq!(m.fragments()[0].material, res.white_material());
    }

    #[test]
    fn children_load_recursively() {
        let mut w = MeshWriter::new();
        w.begin_model("root", &Transform3D::IDENTITY, 0).children(1);
        w.begin_model(
            "child",
            &Transform3D::from_translation(Vec3::new(0.0, 2.0, 0.0)),
            1,
        )
        .fragment("White", &quad(), &[0, 1, 2])
        .children(0);

        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut m = load_model(&mut api, &mut res, &w.finish()).unwrap();
        assert_eq!(m.children().len(), 1);
        assert_eq!(m.children()[0].transform().position, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(m.build_bounding_box(&res).max, Vec3::new(1.0, 3.0, 0.0));
    }

    #[test]
    fn narrower_formats_pick_narrower_layouts() {
        let mut w = MeshWriter::new();
        w.begin_model("dots", &Transform3D::IDENTITY, 1)
            .string(FRAGMENT_TAG)
            .string("White")
            .string("PC")
            .i32(1)
            .f32s(&[1.0, 2.0, 3.0])
            .f32s(&[0.5, 0.5, 0.5, 1.0])
            .string(INDEX_TAG)
            .i32(1)
            .i32(0)
            .children(0);
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let m = load_model(&mut api, &mut res, &w.finish()).unwrap();
        let vb = res.buffer(m.fragments()[0].vertices);
        assert_eq!(vb.content(), ContentType::PC);
        assert_eq!(vb.position(0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(vb.normal(0), Vec3::ONE);
    }

    #[test]
    fn truncated_stream_is_an_error_and_leaks_nothing() {
        let mut bytes = quad_bytes("White");
        bytes.truncate(bytes.len() - 6);
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let err = load_model(&mut api, &mut res, &bytes).unwrap_err();
        assert!(format!("{err:#}").contains("truncated"));
        assert_eq!(res.buffer_count(), 0);
    }

    #[test]
    fn wide_index_is_rejected() {
        let mut bytes = MeshWriter::new();
        bytes
            .begin_model("big", &Transform3D::IDENTITY, 1)
            .fragment("White", &quad(), &[0, 1, 70_000])
            .children(0);
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let err = load_model(&mut api, &mut res, &bytes.finish()).unwrap_err();
        assert!(format!("{err:#}").contains("16 bits"));
    }

    #[test]
    fn bad_tag_names_position() {
        let bytes = MeshWriter::new().string("ModelV2").finish();
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let err = load_model(&mut api, &mut res, &bytes).unwrap_err();
        assert!(format!("{err:#}").contains("expected \"ModelV1\" at byte 0"));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let mut w = MeshWriter::new();
        w.begin_model("x", &Transform3D::IDENTITY, 1)
            .string(FRAGMENT_TAG)
            .string("White")
            .string("PQ");
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let err = load_model(&mut api, &mut res, &w.finish()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown vertex format"));
    }

    #[test]
    fn file_source_errors_carry_path() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut files = |p: &str| -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("no file {p}")
        };
        let err = load_model_file(&mut api, &mut res, &mut files, "ships/a.mesh").unwrap_err();
        assert!(format!("{err:#}").contains("ships/a.mesh"));
    }
}
