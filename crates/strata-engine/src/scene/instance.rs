use glam::Mat4;

use crate::arena::{Arena, Handle};
use crate::coords::Color;

pub type InstanceHandle = Handle<Instance>;

/// One placement of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    matrix: Mat4,
    color: Color,
    /// Position in the group's sparse instance array.
    index: usize,
    /// Position in the dense arrays; `None` while hidden.
    matrix_index: Option<usize>,
}

impl Instance {
    #[inline]
    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    #[inline]
    pub fn color(&self) -> Color {
        self.color
    }

    #[inline]
    pub fn matrix_index(&self) -> Option<usize> {
        self.matrix_index
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.matrix_index.is_some()
    }
}

/// Every placement of one model, with the visible ones packed for
/// instanced drawing.
///
/// `matrices`, `colors` and `owners` are the dense arrays: entry `i` belongs
/// to the instance at sparse index `owners[i]`. Hiding or removing uses
/// swap-with-last, so dense order is unspecified.
#[derive(Debug, Default)]
pub struct ModelInstanceGroup {
    arena: Arena<Instance>,
    instances: Vec<InstanceHandle>,

    matrices: Vec<Mat4>,
    colors: Vec<Color>,
    owners: Vec<usize>,
}

impl ModelInstanceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new hidden instance at the identity, colored white.
    pub fn make_instance(&mut self) -> InstanceHandle {
        let index = self.instances.len();
        let h = self.arena.insert(Instance {
            matrix: Mat4::IDENTITY,
            color: Color::WHITE,
            index,
            matrix_index: None,
        });
        self.instances.push(h);
        h
    }

    /// Updates the placement. Visible instances are rewritten in place.
    pub fn set_matrix(&mut self, h: InstanceHandle, matrix: Mat4, color: Color) {
        let inst = self.get_mut(h);
        if inst.matrix == matrix && inst.color == color {
            return;
        }
        inst.matrix = matrix;
        inst.color = color;
        if let Some(i) = inst.matrix_index {
            self.matrices[i] = matrix;
            self.colors[i] = color;
        }
    }

    pub fn set_visible(&mut self, h: InstanceHandle, visible: bool) {
        if visible { self.show(h) } else { self.hide(h) }
    }

    /// Enters the dense arrays, or refreshes the dense slot when already there.
    pub fn show(&mut self, h: InstanceHandle) {
        let inst = self.get(h);
        let (matrix, color, index, current) =
            (inst.matrix, inst.color, inst.index, inst.matrix_index);
        match current {
            Some(i) => {
                self.matrices[i] = matrix;
                self.colors[i] = color;
            }
            None => {
                let i = self.matrices.len();
                self.matrices.push(matrix);
                self.colors.push(color);
                self.owners.push(index);
                self.get_mut(h).matrix_index = Some(i);
            }
        }
    }

    /// Leaves the dense arrays. Hiding a hidden instance does nothing.
    pub fn hide(&mut self, h: InstanceHandle) {
        let Some(to) = self.get(h).matrix_index else {
            return;
        };
        let from = self.matrices.len() - 1;
        if from != to {
            let mover = self.instances[self.owners[from]];
            self.matrices[to] = self.matrices[from];
            self.colors[to] = self.colors[from];
            self.owners[to] = self.owners[from];
            self.get_mut(mover).matrix_index = Some(to);
        }
        self.matrices.pop();
        self.colors.pop();
        self.owners.pop();
        self.get_mut(h).matrix_index = None;
    }

    /// Hides `h`, then swap-removes it from the sparse array. The handle is
    /// stale afterwards.
    pub fn remove(&mut self, h: InstanceHandle) {
        self.hide(h);

        let index = self.get(h).index;
        let last = self.instances.len() - 1;
        if index != last {
            let moved = self.instances[last];
            self.instances[index] = moved;
            let m = self.get_mut(moved);
            m.index = index;
            if let Some(i) = m.matrix_index {
                self.owners[i] = index;
            }
        }
        self.instances.pop();
        self.arena.remove(h);
    }

    /// Panics on a stale handle.
    pub fn get(&self, h: InstanceHandle) -> &Instance {
        match self.arena.get(h) {
            Some(i) => i,
            None => panic!("instance group: stale instance handle {h:?}"),
        }
    }

    fn get_mut(&mut self, h: InstanceHandle) -> &mut Instance {
        match self.arena.get_mut(h) {
            Some(i) => i,
            None => panic!("instance group: stale instance handle {h:?}"),
        }
    }

    #[inline]
    pub fn contains(&self, h: InstanceHandle) -> bool {
        self.arena.contains(h)
    }

    /// Live instances, visible or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[inline]
    pub fn visible_count(&self) -> usize {
        self.matrices.len()
    }

    #[inline]
    pub fn matrices(&self) -> &[Mat4] {
        &self.matrices
    }

    #[inline]
    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    /// Handle owning dense entry `i`.
    pub fn dense_owner(&self, i: usize) -> InstanceHandle {
        self.instances[self.owners[i]]
    }

    pub fn handles(&self) -> &[InstanceHandle] {
        &self.instances
    }
}
