//! Graphics API Boundary
//!
//! [`GraphicsApi`] is the only path through which native graphics calls are
//! issued. The frame core never talks to a driver directly: every bind, state
//! change and draw goes through [`GpuStateCache`](super::GpuStateCache), which
//! in turn calls into an implementation of this trait.
//!
//! All creation functions are fallible and return `None` when the native
//! object could not be created. Capability probes return `None` when the query
//! itself fails; [`Capabilities::probe`] treats that as "unsupported".
//!
//! # Implementations
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`RecordingApi`](super::recording::RecordingApi) | Headless backend recording every call (tests, dry runs) |
//! | User backends | Thin adapters over WebGL / GLES / native GL contexts |

use std::fmt;
use std::num::NonZeroU32;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::state::{BlendMode, CullMode, DepthState, PixelViewport, StencilState};

// ============================================================================
// Native Handles
// ============================================================================

/// Opaque native object name returned by the graphics API.
///
/// Zero is reserved by every GL-style API for "no object", so the handle is
/// non-zero and `Option<NativeHandle>` expresses the null binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(NonZeroU32);

impl NativeHandle {
    #[inline]
    #[must_use]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

/// Kind of a GPU resource, used for deletion and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Program,
    Framebuffer,
    VertexArray,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Buffer => "buffer",
            Self::Texture => "texture",
            Self::Program => "program",
            Self::Framebuffer => "framebuffer",
            Self::VertexArray => "vertex array",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Resource Descriptions
// ============================================================================

/// Binding target of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Vertex and per-instance attribute data.
    Array,
    /// Index data.
    ElementArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Instance,
}

impl BufferUsage {
    #[must_use]
    pub fn target(self) -> BufferTarget {
        match self {
            Self::Vertex | Self::Instance => BufferTarget::Array,
            Self::Index => BufferTarget::ElementArray,
        }
    }
}

/// CPU-side description of a buffer, retained for context-loss rebuilds.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub label: String,
    pub usage: BufferUsage,
    pub data: Vec<u8>,
    /// Dynamic buffers are expected to be updated frequently.
    pub dynamic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
    CubeMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgba8,
    Rgba16Float,
    Rgba32Float,
    Depth24Stencil8,
    Depth32Float,
}

impl TextureFormat {
    #[inline]
    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Stencil8 | Self::Depth32Float)
    }
}

/// CPU-side description of a texture, retained for context-loss rebuilds.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub target: TextureTarget,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    /// Decoded pixel data. `None` while the image is still loading, unless
    /// the texture is a render attachment.
    pub data: Option<Vec<u8>>,
    pub render_attachment: bool,
}

impl TextureDesc {
    /// A sampled 2D texture whose pixels are not available yet.
    #[must_use]
    pub fn pending(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            target: TextureTarget::Texture2D,
            format: TextureFormat::Rgba8,
            width,
            height,
            mip_levels: 1,
            data: None,
            render_attachment: false,
        }
    }

    /// A sampled 2D RGBA8 texture with its pixels already decoded.
    #[must_use]
    pub fn with_data(label: impl Into<String>, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            ..Self::pending(label, width, height)
        }
    }

    /// A texture used as a framebuffer attachment.
    #[must_use]
    pub fn attachment(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            format,
            render_attachment: true,
            ..Self::pending(label, width, height)
        }
    }

    /// Whether the texture can be sampled.
    #[inline]
    #[must_use]
    pub fn has_contents(&self) -> bool {
        self.render_attachment || self.data.is_some()
    }
}

/// Shader program sources, retained for context-loss rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramDesc {
    pub label: String,
    pub vertex_source: String,
    pub fragment_source: String,
    pub defines: Vec<String>,
}

/// Attribute component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttribType {
    Float,
    UnsignedByte,
    UnsignedShort,
}

/// Layout of one vertex attribute inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttribLayout {
    pub components: u8,
    pub kind: AttribType,
    pub normalized: bool,
    pub stride: u32,
    pub offset: u32,
}

impl AttribLayout {
    #[must_use]
    pub const fn floats(components: u8, stride: u32, offset: u32) -> Self {
        Self {
            components,
            kind: AttribType::Float,
            normalized: false,
            stride,
            offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    #[inline]
    #[must_use]
    pub fn byte_size(self) -> u32 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Triangles,
    Lines,
    Points,
}

/// One native draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawCall {
    Arrays {
        mode: PrimitiveMode,
        first: u32,
        count: u32,
    },
    Elements {
        mode: PrimitiveMode,
        first: u32,
        count: u32,
        format: IndexFormat,
    },
    ArraysInstanced {
        mode: PrimitiveMode,
        first: u32,
        count: u32,
        instances: u32,
    },
    ElementsInstanced {
        mode: PrimitiveMode,
        first: u32,
        count: u32,
        format: IndexFormat,
        instances: u32,
    },
}

impl DrawCall {
    /// Number of instances produced by the call.
    #[must_use]
    pub fn instance_count(&self) -> u32 {
        match self {
            Self::Arrays { .. } | Self::Elements { .. } => 1,
            Self::ArraysInstanced { instances, .. } | Self::ElementsInstanced { instances, .. } => *instances,
        }
    }
}

bitflags! {
    /// Buffers affected by a clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
        const DEPTH_STENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
    }
}

/// Matrix uniforms understood by every program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformSlot {
    World,
    View,
    Projection,
    ViewProjection,
}

// ============================================================================
// Capabilities
// ============================================================================

/// Numeric limits that can be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    MaxTextureUnits,
    MaxVertexAttribs,
}

/// Optional features that can be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    InstancedArrays,
    VertexArrayObjects,
    DepthTexture,
    HalfFloatRender,
    FloatRender,
}

/// Resolved device capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub max_texture_units: u32,
    pub max_vertex_attribs: u32,
    pub instanced_arrays: bool,
    pub vertex_array_objects: bool,
    pub depth_texture: bool,
    pub half_float_render: bool,
    pub float_render: bool,
}

impl Capabilities {
    /// Portable minimum for texture units when the query fails.
    pub const MIN_TEXTURE_UNITS: u32 = 8;
    /// Portable minimum for vertex attributes when the query fails.
    pub const MIN_VERTEX_ATTRIBS: u32 = 8;

    /// Queries every capability, treating failed probes as unsupported.
    pub fn probe(api: &dyn GraphicsApi) -> Self {
        let probe_limit = |limit: Limit, fallback: u32| match api.query_limit(limit) {
            Some(value) if value > 0 => value,
            _ => {
                log::warn!("Capability query {limit:?} failed, assuming {fallback}");
                fallback
            }
        };
        let feature = |feature: Feature| api.supports(feature).unwrap_or(false);

        Self {
            max_texture_units: probe_limit(Limit::MaxTextureUnits, Self::MIN_TEXTURE_UNITS),
            max_vertex_attribs: probe_limit(Limit::MaxVertexAttribs, Self::MIN_VERTEX_ATTRIBS),
            instanced_arrays: feature(Feature::InstancedArrays),
            vertex_array_objects: feature(Feature::VertexArrayObjects),
            depth_texture: feature(Feature::DepthTexture),
            half_float_render: feature(Feature::HalfFloatRender),
            float_render: feature(Feature::FloatRender),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_texture_units: 16,
            max_vertex_attribs: 16,
            instanced_arrays: true,
            vertex_array_objects: true,
            depth_texture: true,
            half_float_render: true,
            float_render: true,
        }
    }
}

// ============================================================================
// The Boundary Trait
// ============================================================================

/// Raw graphics context.
///
/// Implementations are expected to forward each call to the driver without
/// any caching of their own; redundancy elimination is the job of
/// [`GpuStateCache`](super::GpuStateCache).
pub trait GraphicsApi {
    fn query_limit(&self, limit: Limit) -> Option<u32>;
    fn supports(&self, feature: Feature) -> Option<bool>;
    fn is_context_lost(&self) -> bool;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Option<NativeHandle>;
    fn update_buffer(&mut self, buffer: NativeHandle, offset: usize, data: &[u8]);
    fn create_texture(&mut self, desc: &TextureDesc) -> Option<NativeHandle>;
    fn update_texture(&mut self, texture: NativeHandle, data: &[u8]);
    fn create_program(&mut self, desc: &ProgramDesc) -> Option<NativeHandle>;
    /// Polls the link status of a program compiled in parallel.
    fn is_program_linked(&mut self, program: NativeHandle) -> bool;
    fn create_framebuffer(
        &mut self,
        colors: &[NativeHandle],
        depth_stencil: Option<NativeHandle>,
    ) -> Option<NativeHandle>;
    fn create_vertex_array(&mut self) -> Option<NativeHandle>;
    fn delete_resource(&mut self, kind: ResourceKind, handle: NativeHandle);

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<NativeHandle>);
    fn bind_vertex_array(&mut self, vertex_array: Option<NativeHandle>);
    fn vertex_attrib_pointer(&mut self, location: u32, layout: &AttribLayout);
    fn set_vertex_attrib_enabled(&mut self, location: u32, enabled: bool);
    fn vertex_attrib_divisor(&mut self, location: u32, divisor: u32);
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, target: TextureTarget, texture: Option<NativeHandle>);
    fn use_program(&mut self, program: Option<NativeHandle>);
    fn uniform_matrix(&mut self, slot: UniformSlot, value: &[f32; 16]);
    /// Points sampler uniform `slot` of the current program at texture `unit`.
    fn uniform_sampler(&mut self, slot: u32, unit: u32);
    fn bind_framebuffer(&mut self, framebuffer: Option<NativeHandle>);

    fn viewport(&mut self, viewport: PixelViewport);
    fn set_depth_state(&mut self, state: &DepthState);
    fn set_stencil_state(&mut self, state: &StencilState);
    fn set_blend_mode(&mut self, mode: BlendMode);
    fn set_color_write(&mut self, enabled: bool);
    fn set_cull_mode(&mut self, mode: CullMode);

    fn clear(&mut self, flags: ClearFlags, color: [f32; 4]);
    fn draw(&mut self, call: &DrawCall);
}
