//! Scene side of the engine: everything that produces display lists.
//!
//! Responsibilities:
//! - record rendering intent as replayable ops (`DisplayList`)
//! - batch per-frame draws by material (`RenderQueue`)
//! - hold models, fragments and instance groups, and load them from bytes
//! - drive cameras, lights and fog for a frame (`Scene`)

mod display_list;
mod instance;
mod mesh;
mod model;
mod queue;
#[allow(clippy::module_inception)]
mod scene;

pub use display_list::{DisplayList, Op, PopOps};
pub use instance::{Instance, InstanceHandle, ModelInstanceGroup};
pub use mesh::{DirSource, FileSource, MeshWriter, load_model, load_model_file};
pub use model::{Fragment, Model};
pub use queue::RenderQueue;
pub use scene::{Camera2D, Camera3D, ModelHandle, Scene};
