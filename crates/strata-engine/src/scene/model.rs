use crate::coords::{Box3D, Color, Transform3D};
use crate::device::GraphicsApi;
use crate::render::{BufferHandle, MaterialHandle, Resources};

use super::display_list::DisplayList;
use super::instance::{InstanceHandle, ModelInstanceGroup};
use super::queue::RenderQueue;

/// A mesh piece: one vertex buffer, one index buffer, one material.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub material: MaterialHandle,
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
    pub visible: bool,
}

impl Fragment {
    pub fn new(material: MaterialHandle, vertices: BufferHandle, indices: BufferHandle) -> Self {
        Self {
            material,
            vertices,
            indices,
            visible: true,
        }
    }

    /// The ops that draw this fragment with whatever material is current.
    pub fn display_list(&self) -> DisplayList {
        let mut list = DisplayList::with_capacity(3);
        list.bind_buffer(self.vertices);
        list.triangle_list_buffer(self.indices);
        list.clear_arrays();
        list
    }

    pub fn bounding_box(&self, res: &Resources) -> Box3D {
        res.buffer(self.vertices).bounding_box()
    }
}

/// A named scene node: fragments, child models and an optional legacy
/// display list, placed by a 3D transform.
///
/// The bounding box is only available after `build_bounding_box`; geometry
/// or child edits invalidate it.
#[derive(Debug, Default)]
pub struct Model {
    pub name: String,
    pub visible: bool,
    transform: Transform3D,
    fragments: Vec<Fragment>,
    children: Vec<Model>,
    display_list: Option<DisplayList>,
    material: Option<MaterialHandle>,
    instances: Option<ModelInstanceGroup>,
    bounding_box: Option<Box3D>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            ..Self::default()
        }
    }

    /// A model drawn by replaying `list`.
    pub fn from_display_list(name: impl Into<String>, list: DisplayList) -> Self {
        let mut m = Self::new(name);
        m.display_list = Some(list);
        m
    }

    // ── placement ─────────────────────────────────────────────────────────

    #[inline]
    pub fn transform(&self) -> &Transform3D {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform3D) {
        self.transform = transform;
    }

    // ── geometry ──────────────────────────────────────────────────────────

    pub fn add_fragment(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
        self.bounding_box = None;
    }

    pub fn clear_fragments(&mut self) {
        self.fragments.clear();
        self.bounding_box = None;
    }

    #[inline]
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn fragments_mut(&mut self) -> &mut [Fragment] {
        self.bounding_box = None;
        &mut self.fragments
    }

    pub fn add_child(&mut self, child: Model) {
        self.children.push(child);
        self.bounding_box = None;
    }

    #[inline]
    pub fn children(&self) -> &[Model] {
        &self.children
    }

    /// Child edits may move geometry, so this invalidates the bounding box.
    pub fn children_mut(&mut self) -> &mut [Model] {
        self.bounding_box = None;
        &mut self.children
    }

    pub fn set_display_list(&mut self, list: Option<DisplayList>) {
        self.display_list = list;
        self.bounding_box = None;
    }

    #[inline]
    pub fn display_list(&self) -> Option<&DisplayList> {
        self.display_list.as_ref()
    }

    /// Material applied before the legacy display list.
    pub fn set_material(&mut self, material: Option<MaterialHandle>) {
        self.material = material;
    }

    // ── bounds ────────────────────────────────────────────────────────────

    /// Union of the display list, the fragments and every child's box in
    /// this model's space. Rebuilds children first.
    pub fn build_bounding_box(&mut self, res: &Resources) -> Box3D {
        let mut bounds = match &self.display_list {
            Some(list) => list.bounding_box(res),
            None => Box3D::EMPTY,
        };
        for f in &self.fragments {
            bounds.expand_to_box(&f.bounding_box(res));
        }
        for child in &mut self.children {
            let child_box = child.build_bounding_box(res);
            bounds.expand_to_box(&child_box.transformed(&child.transform.matrix()));
        }
        self.bounding_box = Some(bounds);
        bounds
    }

    /// `None` until built, and again after any geometry change.
    #[inline]
    pub fn bounding_box(&self) -> Option<Box3D> {
        self.bounding_box
    }

    // ── instancing ────────────────────────────────────────────────────────

    /// Turns this into an instanced model (on first call) and adds a hidden
    /// instance.
    pub fn make_instance(&mut self) -> InstanceHandle {
        self.instances
            .get_or_insert_with(ModelInstanceGroup::new)
            .make_instance()
    }

    #[inline]
    pub fn instances(&self) -> Option<&ModelInstanceGroup> {
        self.instances.as_ref()
    }

    #[inline]
    pub fn instances_mut(&mut self) -> Option<&mut ModelInstanceGroup> {
        self.instances.as_mut()
    }

    /// Shortcut for placing and showing an instance.
    pub fn show_instance(&mut self, h: InstanceHandle, matrix: glam::Mat4, color: Color) {
        let Some(group) = self.instances.as_mut() else {
            panic!("model {:?}: instance shown on a non-instanced model", self.name);
        };
        group.set_matrix(h, matrix, color);
        group.show(h);
    }

    // ── drawing ───────────────────────────────────────────────────────────

    /// Queues this model and its children.
    ///
    /// Instanced models queue one instanced batch per fragment covering every
    /// visible instance, and nothing at all when every instance is hidden.
    pub fn draw(&self, queue: &mut RenderQueue, api: &mut dyn GraphicsApi, res: &mut Resources) {
        if !self.visible {
            return;
        }

        if let Some(group) = &self.instances {
            if group.visible_count() == 0 {
                return;
            }
            for f in &self.fragments {
                queue.add_instance_batch(api, res, f, group.matrices(), group.colors());
            }
            return;
        }

        let has_transform = !self.transform.is_identity();
        if has_transform {
            queue.push_matrix(self.transform.matrix());
        }

        if let Some(list) = &self.display_list {
            let matrix = queue.matrix();
            let generic = queue.generic_list();
            if let Some(m) = self.material {
                generic.set_material(m);
            }
            generic.set_matrix(matrix);
            generic.append(list);
            generic.pop_transform();
        }

        for f in self.fragments.iter().filter(|f| f.visible) {
            queue.add_fragment_batch(res, f);
        }

        for child in &self.children {
            child.draw(queue, api, res);
        }

        if has_transform {
            queue.pop_matrix();
        }
    }

    /// Returns the GPU storage of every fragment buffer in the tree.
    pub fn release(&self, api: &mut dyn GraphicsApi, res: &mut Resources) {
        for f in &self.fragments {
            res.buffer_mut(f.vertices).release(api);
            res.buffer_mut(f.indices).release(api);
        }
        for child in &self.children {
            child.release(api, res);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingApi;
    use crate::render::{BufferKind, VertexPC};
    use crate::scene::Op;
    use glam::{Mat4, Vec3};

    fn cube_fragment(res: &mut Resources, api: &mut RecordingApi, half: f32) -> Fragment {
        let vb = res.create_buffer(BufferKind::Static);
        let corners = [Vec3::splat(-half), Vec3::splat(half)];
        let verts: Vec<VertexPC> = corners
            .iter()
            .map(|p| VertexPC {
                position: p.to_array(),
                color: Color::WHITE,
            })
            .collect();
        res.buffer_mut(vb).set_array(api, &verts);
        let ib = res.create_buffer(BufferKind::Static);
        res.buffer_mut(ib).set_array(api, &[0u16, 1, 0]);
        Fragment::new(res.white_material(), vb, ib)
    }

    #[test]
    fn bounding_box_requires_rebuild() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut m = Model::new("crate");
        m.add_fragment(cube_fragment(&mut res, &mut api, 1.0));
        assert_eq!(m.bounding_box(), None);
        let b = m.build_bounding_box(&res);
        assert_eq!(b.max, Vec3::ONE);
        m.add_child(Model::new("empty"));
        assert_eq!(m.bounding_box(), None);
    }

    #[test]
    fn child_bounds_are_in_parent_space() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut child = Model::new("turret");
        child.add_fragment(cube_fragment(&mut res, &mut api, 1.0));
        child.set_transform(Transform3D::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        let mut root = Model::new("ship");
        root.add_child(child);
        let b = root.build_bounding_box(&res);
        assert_eq!(b.min, Vec3::new(9.0, -1.0, -1.0));
        assert_eq!(b.max, Vec3::new(11.0, 1.0, 1.0));
    }

    #[test]
    fn fragment_list_binds_draws_and_clears() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let f = cube_fragment(&mut res, &mut api, 1.0);
        let list = f.display_list();
        assert_eq!(
            list.ops(),
            &[
                Op::BindBuffer(f.vertices),
                Op::TriangleListBuffer(f.indices),
                Op::ClearArrays
            ]
        );
    }

    #[test]
    fn hidden_instanced_model_queues_nothing() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut m = Model::new("rock");
        m.add_fragment(cube_fragment(&mut res, &mut api, 1.0));
        let h = m.make_instance();
        let mut queue = RenderQueue::new();
        queue.start_render();
        m.draw(&mut queue, &mut api, &mut res);
        assert_eq!(queue.element_count(), 0);

        m.show_instance(h, Mat4::IDENTITY, Color::WHITE);
        m.draw(&mut queue, &mut api, &mut res);
        assert_eq!(queue.element_count(), 1);
    }

    #[test]
    fn legacy_list_goes_to_generic_list() {
        let mut list = DisplayList::new();
        list.set_color(Color::BLACK);
        let mut m = Model::from_display_list("glyph", list);
        m.set_transform(Transform3D::from_translation(Vec3::X));

        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let mut queue = RenderQueue::new();
        queue.start_render();
        m.draw(&mut queue, &mut api, &mut res);

        let ops = queue.generic_list().ops().to_vec();
        assert_eq!(
            ops,
            vec![
                Op::SetMatrix(Mat4::from_translation(Vec3::X)),
                Op::SetColor(Color::BLACK),
                Op::PopTransform,
            ]
        );
    }
}
