//! Graphics device layer.
//!
//! Responsibilities:
//! - define the narrow `GraphicsApi` seam the rendering core drives
//! - provide `RecordingApi`, an in-memory implementation for tests and tools
//! - provide `gpu::WgpuApi`, a headless wgpu backend rendering offscreen
//!
//! The renderer never talks to wgpu directly; everything crosses this trait.

mod api;
mod recording;
pub mod gpu;

pub use api::*;
pub use recording::{ApiCall, RecordingApi};
