//! Renderer configuration and design constants.

use std::time::Duration;

use crate::coords::Color;

/// Depth of the renderer's transform stack, not counting the world root.
pub const MAX_TRANSFORM_DEPTH: usize = 64;

/// Physical GPU buffers cycled by a dynamic render buffer.
pub const DYNAMIC_RING_SLOTS: usize = 3;

/// Size of each frame-scratch stream (vertex and index).
pub const SCRATCH_BYTES: usize = 1024 * 1024;

/// Hardware light slots available to display-list `Light` ops.
pub const MAX_LIGHTS: usize = 8;

/// 16-bit index buffers address at most this many vertices.
pub const MAX_INDEXED_VERTICES: usize = u16::MAX as usize + 1;

/// How long a ring-slot write may wait for the GPU after the zero-timeout
/// poll misses. Expiry is fatal.
pub const FENCE_WAIT_BUDGET: Duration = Duration::from_millis(100);

/// Which render scheme drives material application. Fixed for the lifetime
/// of a renderer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum SchemeKind {
    /// GL-style fixed pipeline state only.
    #[default]
    FixedFunction,
    /// Selects a shader program per material (lit/textured/glow variants).
    Shader,
}

/// Per-renderer settings applied at pre-render and material application.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererSettings {
    pub scheme: SchemeKind,

    /// Overrides the screen's aspect ratio when `use_custom_aspect_ratio` is set.
    pub aspect_ratio: f32,
    pub use_custom_aspect_ratio: bool,

    /// Added to every material's constant depth bias.
    pub polygon_offset_units: f32,

    pub write_color: bool,
    pub write_depth: bool,

    /// Swap front/back culling (mirrored render targets).
    pub invert_cull: bool,

    pub clear_color: Color,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            scheme: SchemeKind::FixedFunction,
            aspect_ratio: 1.0,
            use_custom_aspect_ratio: false,
            polygon_offset_units: 0.0,
            write_color: true,
            write_depth: true,
            invert_cull: false,
            clear_color: Color::CLEAR,
        }
    }
}

/// Physical display rotation.
///
/// The 2D camera rotates the view by `degrees()`; the 3D path mirrors X
/// after rotating, so it uses the opposite angle for quarter turns.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Normal,
    /// Rotated a quarter turn clockwise (device "three o'clock" up).
    Three,
    /// Upside down.
    Six,
    /// Rotated a quarter turn counter-clockwise.
    Nine,
}

impl Orientation {
    /// Rotation applied after the 2D camera projection, in degrees.
    pub fn degrees(self) -> f32 {
        match self {
            Orientation::Normal => 0.0,
            Orientation::Three => 90.0,
            Orientation::Six => 180.0,
            Orientation::Nine => 270.0,
        }
    }

    /// Rotation applied on the 3D paths, where X is mirrored afterwards.
    pub fn mirrored_degrees(self) -> f32 {
        match self {
            Orientation::Normal => 0.0,
            Orientation::Three => 270.0,
            Orientation::Six => 180.0,
            Orientation::Nine => 90.0,
        }
    }

    /// Quarter-turn orientations swap the projection's width and height.
    #[inline]
    pub fn is_sideways(self) -> bool {
        matches!(self, Orientation::Three | Orientation::Nine)
    }
}

/// Current display resolution and orientation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

impl ScreenInfo {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            orientation: Orientation::Normal,
        }
    }

    /// Width over height, or 1.0 for a degenerate screen.
    pub fn aspect_ratio(&self) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sideways_orientations_mirror_quarter_turns() {
        assert_eq!(Orientation::Three.degrees(), 90.0);
        assert_eq!(Orientation::Three.mirrored_degrees(), 270.0);
        assert_eq!(Orientation::Six.degrees(), Orientation::Six.mirrored_degrees());
        assert!(Orientation::Nine.is_sideways());
        assert!(!Orientation::Six.is_sideways());
    }

    #[test]
    fn degenerate_screen_has_unit_aspect() {
        assert_eq!(ScreenInfo::new(0, 10).aspect_ratio(), 1.0);
        assert_eq!(ScreenInfo::new(200, 100).aspect_ratio(), 2.0);
    }

    #[test]
    fn index_limit_matches_u16() {
        assert_eq!(MAX_INDEXED_VERTICES, 65536);
    }
}
