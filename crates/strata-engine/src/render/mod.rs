//! Rendering core.
//!
//! Responsibilities:
//! - own vertex and index data (`RenderBuffer`) and the GPU storage behind it
//! - keep materials, textures and buffers addressable by handle (`Resources`)
//! - interpret display lists against a `GraphicsApi` (`Renderer`)
//! - avoid redundant pipeline state changes (`RenderStateCache`)
//!
//! Convention: anything a display list names is owned by `Resources`; the
//! renderer only borrows it while a list executes.

mod buffer;
mod material;
mod renderer;
mod resources;
mod scheme;
mod scratch;
mod state;

pub use buffer::{
    BufferKind, ContentType, RenderBuffer, VertexAttr, VertexData, VertexPC, VertexPCN,
    VertexPCNT, VertexPCT, VertexPN, VertexPNT, VertexPT,
};
pub use material::{
    CullMode, DrawMode, Material, MaterialHandle, StencilMode, Texture, TextureHandle,
    TextureLoader, TextureStore,
};
pub use renderer::{FrameStats, RenderPhase, Renderer};
pub use resources::{BufferHandle, Resources, WHITE_MATERIAL};
pub use scheme::{BASE_LINE_WIDTH, FixedFunctionScheme, RenderScheme, ShaderScheme, make_scheme};
pub use scratch::{FrameScratch, ScratchStats};
pub use state::{BoolState, RenderState, RenderStateCache};
