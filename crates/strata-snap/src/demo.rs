//! Built-in scene content used when no mesh is given.

use strata_engine::coords::{Color, Transform3D};
use strata_engine::render::VertexPCNT;
use strata_engine::scene::MeshWriter;

/// Material name the demo cube refers to.
pub const CUBE_MATERIAL: &str = "cube";

/// A unit cube, one fragment, four vertices per face so normals stay flat.
pub fn cube_mesh() -> Vec<u8> {
    // (normal, tangent u, tangent v, face color)
    let faces: [([f32; 3], [f32; 3], [f32; 3], Color); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0], Color::rgb(0.9, 0.3, 0.3)),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0], Color::rgb(0.3, 0.9, 0.3)),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0], Color::rgb(0.3, 0.3, 0.9)),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], Color::rgb(0.9, 0.9, 0.3)),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], Color::rgb(0.3, 0.9, 0.9)),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], Color::rgb(0.9, 0.3, 0.9)),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (n, u, v, color) in faces {
        let base = vertices.len() as i32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [0, 1, 2].map(|i| 0.5 * (n[i] + su * u[i] + sv * v[i]));
            vertices.push(VertexPCNT {
                position,
                color,
                normal: n,
                texel: [(su + 1.0) * 0.5, (sv + 1.0) * 0.5],
            });
        }
        // clockwise from outside; the 3D views mirror X
        indices.extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
    }

    MeshWriter::new()
        .begin_model("cube", &Transform3D::IDENTITY, 1)
        .fragment(CUBE_MATERIAL, &vertices, &indices)
        .children(0)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_engine::device::RecordingApi;
    use strata_engine::render::Resources;
    use strata_engine::scene::load_model;

    #[test]
    fn cube_loads_with_24_vertices_and_36_indices() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut model = load_model(&mut api, &mut res, &cube_mesh()).unwrap();
        let f = &model.fragments()[0];
        assert_eq!(res.buffer(f.vertices).position_count(), 24);
        assert_eq!(res.buffer(f.indices).index_count(), 36);
        let bounds = model.build_bounding_box(&res);
        assert_eq!(bounds.min, glam::Vec3::splat(-0.5));
        assert_eq!(bounds.max, glam::Vec3::splat(0.5));
    }
}
