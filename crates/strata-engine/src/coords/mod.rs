//! Math and geometry types shared by the scene and the renderer.
//!
//! Conventions:
//! - world space is right-handed, +Y up (2D cameras flip Y in the projection)
//! - `Rect` boxes are normalized to the current viewport (0..1 on both axes)
//! - `PixelRect` is in framebuffer pixels, origin bottom-left
//!
//! Vector/matrix math comes from `glam`; only engine-specific types live here.

mod bounds;
mod color;
mod rect;
mod transform;

pub use bounds::Box3D;
pub use color::Color;
pub use rect::{PixelRect, Rect};
pub use transform::{Transform2D, Transform3D};

pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
