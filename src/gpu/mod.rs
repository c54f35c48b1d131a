//! GPU Layer
//!
//! Everything that touches the graphics context lives here:
//!
//! - [`api`]: the [`GraphicsApi`] boundary trait and resource descriptions
//! - [`handles`]: typed arena keys for buffers, textures, programs,
//!   framebuffers and vertex arrays
//! - [`state`]: fixed-function state values (depth, stencil, blend, ...)
//! - [`state_cache`]: [`GpuStateCache`], the redundant-call filter
//! - [`texture_units`]: [`TextureUnitAllocator`], LRU texture unit assignment
//! - [`recording`]: headless backend used by tests and dry runs

pub mod api;
pub mod handles;
pub mod recording;
pub mod state;
pub mod state_cache;
pub mod texture_units;

pub use api::{
    AttribLayout, BufferDesc, BufferTarget, BufferUsage, Capabilities, ClearFlags, DrawCall,
    GraphicsApi, IndexFormat, NativeHandle, PrimitiveMode, ProgramDesc, ResourceKind, TextureDesc,
    TextureFormat, UniformSlot,
};
pub use handles::{
    BufferKey, FramebufferDesc, FramebufferKey, ProgramKey, TextureKey, VertexArrayAttribute,
    VertexArrayDesc, VertexArrayKey,
};
pub use recording::{ApiProbe, NativeCall, RecordingApi};
pub use state::{BlendMode, CompareFunc, CullMode, DepthState, PixelViewport, StencilState};
pub use state_cache::{CacheStats, ContextStatus, GpuStateCache};
pub use texture_units::{TextureUnitAllocator, UnitAssignment};
