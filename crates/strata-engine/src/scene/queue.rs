use std::collections::HashMap;

use glam::Mat4;

use crate::coords::Color;
use crate::device::GraphicsApi;
use crate::render::{BufferHandle, BufferKind, MaterialHandle, Resources};

use super::display_list::{DisplayList, Op};
use super::model::Fragment;

#[derive(Debug, Clone, PartialEq)]
enum BatchElement {
    Single {
        matrix: Mat4,
        vertices: BufferHandle,
        indices: BufferHandle,
    },
    Instanced {
        vertices: BufferHandle,
        indices: BufferHandle,
        matrices: BufferHandle,
        colors: BufferHandle,
    },
}

/// Everything queued under one material.
#[derive(Debug)]
struct Batch {
    material: MaterialHandle,
    layer: i32,
    /// Insertion order of the batch's first element; ties within a layer.
    order: u32,
    elements: Vec<BatchElement>,
}

/// Per-frame collection of draws, emitted into a display list grouped by
/// material.
///
/// Ordering rules:
/// 1) material `layer`: ascending
/// 2) first use of the material this frame: ascending
///
/// Within a batch, elements keep insertion order. The generic list is
/// emitted after every batch.
///
/// Instance matrices and colors are uploaded into dynamic buffers pooled
/// across frames, so a steady scene allocates nothing once warmed.
#[derive(Debug)]
pub struct RenderQueue {
    batches: Vec<Batch>,
    by_material: HashMap<MaterialHandle, usize>,
    sorted: Vec<usize>,
    generic: DisplayList,
    stack: Vec<Mat4>,

    instance_pool: Vec<(BufferHandle, BufferHandle)>,
    instance_used: usize,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderQueue {
    pub fn new() -> Self {
        Self {
            batches: Vec::new(),
            by_material: HashMap::new(),
            sorted: Vec::new(),
            generic: DisplayList::new(),
            stack: vec![Mat4::IDENTITY],
            instance_pool: Vec::new(),
            instance_used: 0,
        }
    }

    /// Forgets last frame's draws. Pooled instance buffers become reusable.
    pub fn start_render(&mut self) {
        self.batches.clear();
        self.by_material.clear();
        self.generic.clear();
        self.stack.truncate(1);
        self.stack[0] = Mat4::IDENTITY;
        self.instance_used = 0;
    }

    /// Checks the matrix stack came back to the root.
    pub fn end_render(&mut self) {
        assert_eq!(
            self.stack.len(),
            1,
            "render queue: {} matrices left pushed at end of frame",
            self.stack.len() - 1
        );
    }

    // ── matrix stack ──────────────────────────────────────────────────────

    pub fn push_matrix(&mut self, m: Mat4) {
        let top = self.matrix();
        self.stack.push(top * m);
    }

    pub fn pop_matrix(&mut self) {
        assert!(self.stack.len() > 1, "render queue: matrix stack underflow");
        self.stack.pop();
    }

    /// Accumulated model matrix.
    #[inline]
    pub fn matrix(&self) -> Mat4 {
        self.stack[self.stack.len() - 1]
    }

    /// Ops drawn after every batch, under their own matrices.
    #[inline]
    pub fn generic_list(&mut self) -> &mut DisplayList {
        &mut self.generic
    }

    // ── batches ───────────────────────────────────────────────────────────

    /// Queues `fragment` at the current matrix.
    pub fn add_fragment_batch(&mut self, res: &Resources, fragment: &Fragment) {
        let matrix = self.matrix();
        self.push_element(
            res,
            fragment.material,
            BatchElement::Single {
                matrix,
                vertices: fragment.vertices,
                indices: fragment.indices,
            },
        );
    }

    /// Queues one instanced draw of `fragment` per entry of `matrices`.
    ///
    /// Instance matrices are absolute; the current matrix does not apply.
    pub fn add_instance_batch(
        &mut self,
        api: &mut dyn GraphicsApi,
        res: &mut Resources,
        fragment: &Fragment,
        matrices: &[Mat4],
        colors: &[Color],
    ) {
        assert_eq!(
            matrices.len(),
            colors.len(),
            "render queue: instance matrices and colors differ in length"
        );
        if matrices.is_empty() {
            return;
        }

        let (mb, cb) = self.instance_buffers(res);
        res.buffer_mut(mb).set_array(api, matrices);
        res.buffer_mut(cb).set_array(api, colors);

        self.push_element(
            res,
            fragment.material,
            BatchElement::Instanced {
                vertices: fragment.vertices,
                indices: fragment.indices,
                matrices: mb,
                colors: cb,
            },
        );
    }

    fn instance_buffers(&mut self, res: &mut Resources) -> (BufferHandle, BufferHandle) {
        if self.instance_used == self.instance_pool.len() {
            let pair = (
                res.create_buffer(BufferKind::Dynamic),
                res.create_buffer(BufferKind::Dynamic),
            );
            log::debug!("render queue: instance pool grew to {}", self.instance_pool.len() + 1);
            self.instance_pool.push(pair);
        }
        let pair = self.instance_pool[self.instance_used];
        self.instance_used += 1;
        pair
    }

    fn push_element(&mut self, res: &Resources, material: MaterialHandle, element: BatchElement) {
        let i = match self.by_material.get(&material) {
            Some(&i) => i,
            None => {
                let i = self.batches.len();
                self.batches.push(Batch {
                    material,
                    layer: res.material(material).layer,
                    order: i as u32,
                    elements: Vec::new(),
                });
                self.by_material.insert(material, i);
                i
            }
        };
        self.batches[i].elements.push(element);
    }

    #[inline]
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn element_count(&self) -> usize {
        self.batches.iter().map(|b| b.elements.len()).sum()
    }

    // ── emission ──────────────────────────────────────────────────────────

    /// Appends every queued draw to `list`, then the generic list.
    pub fn draw(&mut self, list: &mut DisplayList) {
        self.sorted.clear();
        self.sorted.extend(0..self.batches.len());
        let batches = &self.batches;
        self.sorted
            .sort_by_key(|&i| (batches[i].layer, batches[i].order));

        for &i in &self.sorted {
            let batch = &self.batches[i];
            list.set_material(batch.material);
            for element in &batch.elements {
                emit(list, element);
            }
        }
        list.append(&self.generic);
    }

    /// Destroys the pooled instance buffers.
    pub fn release(&mut self, api: &mut dyn GraphicsApi, res: &mut Resources) {
        for (m, c) in self.instance_pool.drain(..) {
            res.destroy_buffer(api, m);
            res.destroy_buffer(api, c);
        }
        self.instance_used = 0;
    }
}

fn emit(list: &mut DisplayList, element: &BatchElement) {
    match *element {
        BatchElement::Single { matrix, vertices, indices } => {
            list.set_matrix(matrix);
            list.bind_buffer(vertices);
            list.triangle_list_buffer(indices);
            list.clear_arrays();
            list.pop_transform();
        }
        BatchElement::Instanced { vertices, indices, matrices, colors } => {
            list.set_matrix(Mat4::IDENTITY);
            list.bind_buffer(vertices);
            list.append_op(Op::SetInstanceMatrices(matrices));
            list.append_op(Op::SetInstanceColors(colors));
            list.triangle_list_buffer(indices);
            list.append_op(Op::ClearInstances);
            list.clear_arrays();
            list.pop_transform();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingApi;
    use crate::render::{DrawMode, Material};
    use glam::Vec3;

    fn fragment(res: &mut Resources, api: &mut RecordingApi, material: MaterialHandle) -> Fragment {
        let vb = res.create_buffer(BufferKind::Static);
        res.buffer_mut(vb).set_array(api, &[Vec3::ZERO, Vec3::X, Vec3::Y]);
        let ib = res.create_buffer(BufferKind::Static);
        res.buffer_mut(ib).set_array(api, &[0u16, 1, 2]);
        Fragment::new(material, vb, ib)
    }

    fn materials_in(list: &DisplayList) -> Vec<MaterialHandle> {
        list.ops()
            .iter()
            .filter_map(|op| match op {
                Op::SetMaterial(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn batches_group_by_material_and_sort_by_layer() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let top = res.add_material(Material {
            layer: 5,
            ..Material::new("hud", DrawMode::Add, Color::WHITE)
        });
        let base = res.white_material();
        let a = fragment(&mut res, &mut api, top);
        let b = fragment(&mut res, &mut api, base);

        let mut q = RenderQueue::new();
        q.start_render();
        q.add_fragment_batch(&res, &a);
        q.add_fragment_batch(&res, &b);
        q.add_fragment_batch(&res, &a);
        assert_eq!(q.batch_count(), 2);
        assert_eq!(q.element_count(), 3);

        let mut list = DisplayList::new();
        q.draw(&mut list);
        assert_eq!(materials_in(&list), vec![base, top]);
        assert_eq!(list.transform_balance(), 0);
    }

    #[test]
    fn fragment_batch_carries_current_matrix() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let white = res.white_material();
        let f = fragment(&mut res, &mut api, white);
        let mut q = RenderQueue::new();
        q.start_render();
        q.push_matrix(Mat4::from_translation(Vec3::X));
        q.push_matrix(Mat4::from_translation(Vec3::Y));
        q.add_fragment_batch(&res, &f);
        q.pop_matrix();
        q.pop_matrix();
        q.end_render();

        let mut list = DisplayList::new();
        q.draw(&mut list);
        assert_eq!(
            list.ops()[1],
            Op::SetMatrix(Mat4::from_translation(Vec3::new(1.0, 1.0, 0.0)))
        );
    }

    #[test]
    fn instanced_batch_op_order() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let white = res.white_material();
        let f = fragment(&mut res, &mut api, white);
        let mut q = RenderQueue::new();
        q.start_render();
        q.add_instance_batch(&mut api, &mut res, &f, &[Mat4::IDENTITY; 2], &[Color::WHITE; 2]);

        let mut list = DisplayList::new();
        q.draw(&mut list);
        let kinds: Vec<&str> = list
            .ops()
            .iter()
            .map(|op| match op {
                Op::SetMaterial(_) => "material",
                Op::SetMatrix(_) => "matrix",
                Op::BindBuffer(_) => "bind",
                Op::SetInstanceMatrices(_) => "matrices",
                Op::SetInstanceColors(_) => "colors",
                Op::TriangleListBuffer(_) => "draw",
                Op::ClearInstances => "clear-instances",
                Op::ClearArrays => "clear-arrays",
                Op::PopTransform => "pop",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "material",
                "matrix",
                "bind",
                "matrices",
                "colors",
                "draw",
                "clear-instances",
                "clear-arrays",
                "pop"
            ]
        );
    }

    #[test]
    fn instance_buffers_are_pooled_across_frames() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let white = res.white_material();
        let f = fragment(&mut res, &mut api, white);
        let mut q = RenderQueue::new();
        for _ in 0..3 {
            q.start_render();
            q.add_instance_batch(&mut api, &mut res, &f, &[Mat4::IDENTITY], &[Color::WHITE]);
        }
        // Two fragment buffers plus one pooled pair.
        assert_eq!(res.buffer_count(), 4);
        q.release(&mut api, &mut res);
        assert_eq!(res.buffer_count(), 2);
    }

    #[test]
    fn generic_list_follows_batches() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let white = res.white_material();
        let f = fragment(&mut res, &mut api, white);
        let mut q = RenderQueue::new();
        q.start_render();
        q.generic_list().debug("late");
        q.add_fragment_batch(&res, &f);
        let mut list = DisplayList::new();
        q.draw(&mut list);
        assert_eq!(list.ops().last(), Some(&Op::Debug("late".into())));
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn matrix_pop_past_root_is_fatal() {
        RenderQueue::new().pop_matrix();
    }
}
