use glam::{Mat4, Vec3};

/// Axis-aligned 3D bounding box. An empty box has `min > max`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Box3D {
    pub min: Vec3,
    pub max: Vec3,
}

impl Box3D {
    pub const EMPTY: Box3D = Box3D {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut b = Self::EMPTY;
        for p in points {
            b.expand_to_point(p);
        }
        b
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn expand_to_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn expand_to_box(&mut self, other: &Box3D) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn contains(&self, p: Vec3) -> bool {
        !self.is_empty() && p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Bounds of this box's eight corners after `m`.
    pub fn transformed(&self, m: &Mat4) -> Box3D {
        if self.is_empty() {
            return *self;
        }
        let (lo, hi) = (self.min, self.max);
        Box3D::from_points((0..8).map(|i| {
            let c = Vec3::new(
                if i & 1 == 0 { lo.x } else { hi.x },
                if i & 2 == 0 { lo.y } else { hi.y },
                if i & 4 == 0 { lo.z } else { hi.z },
            );
            m.transform_point3(c)
        }))
    }
}

impl Default for Box3D {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty_and_expands() {
        let mut b = Box3D::default();
        assert!(b.is_empty());
        b.expand_to_point(Vec3::new(1.0, 2.0, 3.0));
        b.expand_to_point(Vec3::new(-1.0, 0.0, 5.0));
        assert_eq!(b, Box3D::new(Vec3::new(-1.0, 0.0, 3.0), Vec3::new(1.0, 2.0, 5.0)));
    }

    #[test]
    fn union_ignores_empty() {
        let mut b = Box3D::new(Vec3::ZERO, Vec3::ONE);
        b.expand_to_box(&Box3D::EMPTY);
        assert_eq!(b, Box3D::new(Vec3::ZERO, Vec3::ONE));
    }

    #[test]
    fn translated_box_moves_both_corners() {
        let b = Box3D::new(Vec3::ZERO, Vec3::ONE);
        let t = b.transformed(&Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        assert_eq!(t, Box3D::new(Vec3::new(5.0, 0.0, 0.0), Vec3::new(6.0, 1.0, 1.0)));
    }

    #[test]
    fn contains_is_inclusive() {
        let b = Box3D::new(Vec3::ZERO, Vec3::ONE);
        assert!(b.contains(Vec3::ONE));
        assert!(!b.contains(Vec3::splat(1.5)));
        assert!(!Box3D::EMPTY.contains(Vec3::ZERO));
    }
}
