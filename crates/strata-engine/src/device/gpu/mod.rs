//! Headless wgpu backend.
//!
//! This module is responsible for:
//! - creating the wgpu Instance/Adapter/Device/Queue and an offscreen target
//! - folding GL-style state into cached render pipelines
//! - generating WGSL variants per bound vertex attribute set
//! - fences and framebuffer readback on top of queue callbacks and buffer mapping
//!
//! Convention: GL clip depth and bottom-left pixel origins are converted
//! here, so callers keep GL conventions throughout.

mod backend;
mod init;
mod pipeline;
mod shader;

pub use backend::WgpuApi;
pub use init::DeviceInit;
