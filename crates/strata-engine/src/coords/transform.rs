use glam::{Mat4, Quat, Vec2, Vec3};

/// Planar transform: translate, rotate about Z (radians), scale.
///
/// Also used for 2D cameras, where `scale.x` is the visible height in world
/// units.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform2D {
    pub position: Vec2,
    pub angle: f32,
    pub scale: Vec2,
}

impl Transform2D {
    pub const IDENTITY: Transform2D = Transform2D {
        position: Vec2::ZERO,
        angle: 0.0,
        scale: Vec2::ONE,
    };

    #[inline]
    pub const fn new(position: Vec2, angle: f32, scale: Vec2) -> Self {
        Self { position, angle, scale }
    }

    #[inline]
    pub fn from_translation(position: Vec2) -> Self {
        Self { position, ..Self::IDENTITY }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            self.scale.extend(1.0),
            Quat::from_rotation_z(self.angle),
            self.position.extend(0.0),
        )
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Scene-node transform: position, orientation, scale.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform3D {
    pub position: Vec3,
    pub orientation: Quat,
    pub scale: Vec3,
}

impl Transform3D {
    pub const IDENTITY: Transform3D = Transform3D {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    #[inline]
    pub fn from_translation(position: Vec3) -> Self {
        Self { position, ..Self::IDENTITY }
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.orientation, self.position)
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn transform2d_applies_scale_then_rotation_then_translation() {
        let t = Transform2D::new(Vec2::new(10.0, 0.0), std::f32::consts::FRAC_PI_2, Vec2::splat(2.0));
        let p = t.matrix().transform_point3(Vec3::X);
        assert!(close(p, Vec3::new(10.0, 2.0, 0.0)));
    }

    #[test]
    fn identity_3d_detects_changes() {
        assert!(Transform3D::IDENTITY.is_identity());
        assert!(!Transform3D::from_translation(Vec3::Y).is_identity());
    }
}
