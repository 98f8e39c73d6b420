//! Frame timing.
//!
//! The renderer owns one `FrameClock` and ticks it once per presented frame;
//! the resulting `FrameTime` is reported through the renderer's frame stats.

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
