//! GPU resource arenas.
//!
//! Every GPU object is referred to by a typed slotmap key. The arena entry
//! owns the CPU-side description, the native handle (created lazily on first
//! use) and the context generation that handle belongs to.
//!
//! # Lifetime rules
//!
//! | Event | Effect |
//! |-------|--------|
//! | `register_*` | Entry created with one owner, no native handle |
//! | first bind | Native handle created from the description |
//! | `retain` | Owner count incremented (shared buffers and textures) |
//! | `release` | Owner count decremented; at zero the native handle is deleted once and the entry removed |
//! | context loss | Generation bumped; every native handle becomes stale |
//! | rebuild | Stale handles recreated from their descriptions |

use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use super::api::{AttribLayout, BufferDesc, NativeHandle, ProgramDesc, TextureDesc};

new_key_type! {
    pub struct BufferKey;
    pub struct TextureKey;
    pub struct ProgramKey;
    pub struct FramebufferKey;
    pub struct VertexArrayKey;
}

/// Framebuffer attachments, by texture key.
#[derive(Debug, Clone, PartialEq)]
pub struct FramebufferDesc {
    pub label: String,
    pub colors: SmallVec<[TextureKey; 4]>,
    pub depth_stencil: Option<TextureKey>,
    pub width: u32,
    pub height: u32,
}

/// One vertex attribute captured by a vertex array object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexArrayAttribute {
    pub location: u32,
    pub buffer: BufferKey,
    pub layout: AttribLayout,
}

/// State recorded into a vertex array object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VertexArrayDesc {
    pub attributes: SmallVec<[VertexArrayAttribute; 8]>,
    pub index_buffer: Option<BufferKey>,
}

/// Arena entry for one GPU object.
#[derive(Debug)]
pub(crate) struct GpuEntry<D> {
    pub desc: D,
    pub native: Option<NativeHandle>,
    /// Context generation `native` was created under.
    pub generation: u32,
    pub owners: u32,
    /// Programs: link finished. Textures: contents available.
    pub ready: bool,
}

impl<D> GpuEntry<D> {
    pub fn new(desc: D, ready: bool) -> Self {
        Self {
            desc,
            native: None,
            generation: 0,
            owners: 1,
            ready,
        }
    }

    /// The native handle, if it was created under `generation`.
    #[inline]
    pub fn live_handle(&self, generation: u32) -> Option<NativeHandle> {
        self.native.filter(|_| self.generation == generation)
    }

    /// Whether a native handle exists but belongs to a lost context.
    #[inline]
    pub fn is_stale(&self, generation: u32) -> bool {
        self.native.is_some() && self.generation != generation
    }
}

/// All GPU objects owned by one context.
#[derive(Debug, Default)]
pub(crate) struct GpuResources {
    pub buffers: SlotMap<BufferKey, GpuEntry<BufferDesc>>,
    pub textures: SlotMap<TextureKey, GpuEntry<TextureDesc>>,
    pub programs: SlotMap<ProgramKey, GpuEntry<ProgramDesc>>,
    pub framebuffers: SlotMap<FramebufferKey, GpuEntry<FramebufferDesc>>,
    pub vertex_arrays: SlotMap<VertexArrayKey, GpuEntry<VertexArrayDesc>>,
}

impl GpuResources {
    /// Total number of live entries, across all kinds.
    pub fn len(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.programs.len()
            + self.framebuffers.len()
            + self.vertex_arrays.len()
    }
}
