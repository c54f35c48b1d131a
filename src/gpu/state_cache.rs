//! GPU State Cache
//!
//! Sits between the scene graph and the raw [`GraphicsApi`]. Every
//! state-setting operation compares the requested value with the last value
//! applied and only issues the native call when they differ (or when `force`
//! is set). Binding the same program, buffer, texture, framebuffer or
//! viewport twice in a row therefore costs exactly one native call.
//!
//! The cache also owns the GPU resource arenas, so it can:
//!
//! - create native objects lazily on their first bind,
//! - refuse binds of disposed or stale handles (no-op, nothing recorded),
//! - recreate every native object from its retained description after a
//!   context loss ([`GpuStateCache::rebuild`]).
//!
//! No other component issues raw bind calls.

use glam::Mat4;
use rustc_hash::FxHashMap;
use slotmap::{Key, SlotMap};
use smallvec::SmallVec;

use super::api::{
    AttribLayout, BufferDesc, BufferTarget, Capabilities, ClearFlags, DrawCall, GraphicsApi,
    NativeHandle, ProgramDesc, ResourceKind, TextureDesc, TextureFormat, TextureTarget,
    UniformSlot,
};
use super::handles::{
    BufferKey, FramebufferDesc, FramebufferKey, GpuEntry, GpuResources, ProgramKey, TextureKey,
    VertexArrayDesc, VertexArrayKey,
};
use super::state::{BlendMode, CullMode, DepthState, PixelViewport, StencilState};
use super::texture_units::TextureUnitAllocator;
use crate::errors::{FrameError, Result};

// ============================================================================
// Comparison Records
// ============================================================================

/// Last value applied for one piece of native state. `None` means unknown,
/// which forces the next request through.
#[derive(Debug, Clone, Copy)]
struct Cached<T>(Option<T>);

impl<T: Copy + PartialEq> Cached<T> {
    const fn unknown() -> Self {
        Self(None)
    }

    /// Records `value`, returning whether the native call must be issued.
    #[inline]
    fn update(&mut self, value: T, force: bool) -> bool {
        if !force && self.0 == Some(value) {
            return false;
        }
        self.0 = Some(value);
        true
    }

    #[inline]
    fn get(&self) -> Option<T> {
        self.0
    }

    #[inline]
    fn invalidate(&mut self) {
        self.0 = None;
    }
}

/// Native call accounting, reset with [`GpuStateCache::take_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// State changes forwarded to the graphics API.
    pub issued: u64,
    /// State changes elided because the value was already applied.
    pub skipped: u64,
    /// Binds refused because the handle was disposed or stale.
    pub rejected: u64,
    pub draw_calls: u64,
}

/// Result of [`GpuStateCache::poll_context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    Healthy,
    /// The context is lost; nothing may be bound or drawn.
    Lost,
    /// The context came back; [`GpuStateCache::rebuild`] must run before the
    /// next bind.
    Restored,
}

// ============================================================================
// GpuStateCache
// ============================================================================

pub struct GpuStateCache {
    api: Box<dyn GraphicsApi>,
    caps: Capabilities,
    resources: GpuResources,
    units: TextureUnitAllocator,

    /// Incremented on every context loss; native handles from older
    /// generations are stale.
    generation: u32,
    context_lost: bool,

    program: Cached<Option<ProgramKey>>,
    framebuffer: Cached<Option<FramebufferKey>>,
    viewport: Cached<PixelViewport>,
    depth: Cached<DepthState>,
    stencil: Cached<StencilState>,
    blend: Cached<BlendMode>,
    color_write: Cached<bool>,
    cull: Cached<CullMode>,
    array_buffer: Cached<Option<BufferKey>>,
    element_buffer: Cached<Option<BufferKey>>,
    vertex_array: Cached<Option<VertexArrayKey>>,
    recording_vertex_array: bool,
    active_unit: Cached<u32>,
    unit_bindings: Vec<Cached<Option<TextureKey>>>,
    attributes: Vec<Cached<(BufferKey, AttribLayout)>>,
    attribute_enabled: Vec<Cached<bool>>,
    divisors: Vec<Cached<u32>>,
    /// Matrix uniforms of the current program.
    matrices: FxHashMap<UniformSlot, Mat4>,
    /// Sampler slot to texture unit of the current program.
    samplers: FxHashMap<u32, u32>,

    stats: CacheStats,
}

impl GpuStateCache {
    /// Wraps a graphics context, probing its capabilities.
    ///
    /// `texture_unit_limit` caps the number of texture units the allocator
    /// manages (it never exceeds the hardware limit).
    pub fn new(api: Box<dyn GraphicsApi>, texture_unit_limit: Option<u32>) -> Self {
        let mut caps = Capabilities::probe(api.as_ref());
        if let Some(limit) = texture_unit_limit {
            caps.max_texture_units = caps.max_texture_units.min(limit.max(1));
        }
        log::info!(
            "GPU state cache: {} texture units, {} vertex attributes, instancing: {}, VAO: {}",
            caps.max_texture_units,
            caps.max_vertex_attribs,
            caps.instanced_arrays,
            caps.vertex_array_objects
        );

        let units = caps.max_texture_units as usize;
        let attribs = caps.max_vertex_attribs as usize;
        Self {
            api,
            caps,
            resources: GpuResources::default(),
            units: TextureUnitAllocator::new(caps.max_texture_units),
            generation: 0,
            context_lost: false,
            program: Cached::unknown(),
            framebuffer: Cached::unknown(),
            viewport: Cached::unknown(),
            depth: Cached::unknown(),
            stencil: Cached::unknown(),
            blend: Cached::unknown(),
            color_write: Cached::unknown(),
            cull: Cached::unknown(),
            array_buffer: Cached::unknown(),
            element_buffer: Cached::unknown(),
            vertex_array: Cached::unknown(),
            recording_vertex_array: false,
            active_unit: Cached::unknown(),
            unit_bindings: vec![Cached::unknown(); units],
            attributes: vec![Cached::unknown(); attribs],
            attribute_enabled: vec![Cached::unknown(); attribs],
            divisors: vec![Cached::unknown(); attribs],
            matrices: FxHashMap::default(),
            samplers: FxHashMap::default(),
            stats: CacheStats::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    #[inline]
    #[must_use]
    pub fn texture_units(&self) -> &TextureUnitAllocator {
        &self.units
    }

    #[inline]
    #[must_use]
    pub fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    #[inline]
    #[must_use]
    pub fn context_generation(&self) -> u32 {
        self.generation
    }

    /// Number of live GPU resource entries.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn take_stats(&mut self) -> CacheStats {
        std::mem::take(&mut self.stats)
    }

    #[must_use]
    pub fn bound_program(&self) -> Option<ProgramKey> {
        self.program.get().flatten()
    }

    #[must_use]
    pub fn bound_framebuffer(&self) -> Option<FramebufferKey> {
        self.framebuffer.get().flatten()
    }

    #[must_use]
    pub fn bound_vertex_array(&self) -> Option<VertexArrayKey> {
        self.vertex_array.get().flatten()
    }

    #[must_use]
    pub fn current_viewport(&self) -> Option<PixelViewport> {
        self.viewport.get()
    }

    #[inline]
    fn note(&mut self, issued: bool) -> bool {
        if issued {
            self.stats.issued += 1;
        } else {
            self.stats.skipped += 1;
        }
        issued
    }

    fn reject(&mut self, kind: ResourceKind) -> bool {
        log::debug!("Ignoring bind of a disposed or stale {kind} handle");
        self.stats.rejected += 1;
        false
    }

    // ========================================================================
    // Resource Registration
    // ========================================================================

    pub fn register_buffer(&mut self, desc: BufferDesc) -> BufferKey {
        self.resources.buffers.insert(GpuEntry::new(desc, true))
    }

    /// Replaces the contents of a buffer.
    ///
    /// A size change drops the native buffer; it is recreated on next bind.
    pub fn update_buffer(&mut self, key: BufferKey, data: &[u8]) -> Result<()> {
        let generation = self.generation;
        let entry = self
            .resources
            .buffers
            .get_mut(key)
            .ok_or(FrameError::UnknownHandle("buffer"))?;

        let resized = entry.desc.data.len() != data.len();
        entry.desc.data.clear();
        entry.desc.data.extend_from_slice(data);

        let Some(native) = entry.live_handle(generation) else {
            return Ok(());
        };
        if resized {
            entry.native = None;
            self.api.delete_resource(ResourceKind::Buffer, native);
            self.forget_buffer(key);
        } else if !self.context_lost {
            self.api.update_buffer(native, 0, data);
        }
        Ok(())
    }

    /// Registers a texture, validating its format against the device.
    ///
    /// Depth attachments require depth-texture support and fail otherwise.
    /// Floating point colour attachments fall back to 8 bits per channel
    /// when the device cannot render to them.
    pub fn register_texture(&mut self, mut desc: TextureDesc) -> Result<TextureKey> {
        if desc.format.is_depth() && !self.caps.depth_texture {
            return Err(FrameError::CapabilityMissing("depth texture"));
        }
        let unsupported_float = match desc.format {
            TextureFormat::Rgba16Float => !self.caps.half_float_render,
            TextureFormat::Rgba32Float => !self.caps.float_render,
            _ => false,
        };
        if desc.render_attachment && unsupported_float {
            log::warn!(
                "Texture '{}': {:?} render targets unsupported, falling back to Rgba8",
                desc.label,
                desc.format
            );
            desc.format = TextureFormat::Rgba8;
        }

        let ready = desc.has_contents();
        Ok(self.resources.textures.insert(GpuEntry::new(desc, ready)))
    }

    /// Delivers the decoded pixels of a texture that was registered pending.
    pub fn update_texture(&mut self, key: TextureKey, data: Vec<u8>) -> Result<()> {
        let generation = self.generation;
        let entry = self
            .resources
            .textures
            .get_mut(key)
            .ok_or(FrameError::UnknownHandle("texture"))?;

        if let Some(native) = entry.live_handle(generation)
            && !self.context_lost
        {
            self.api.update_texture(native, &data);
        }
        entry.desc.data = Some(data);
        entry.ready = true;
        Ok(())
    }

    pub fn register_program(&mut self, desc: ProgramDesc) -> ProgramKey {
        self.resources.programs.insert(GpuEntry::new(desc, false))
    }

    pub fn register_framebuffer(&mut self, desc: FramebufferDesc) -> Result<FramebufferKey> {
        let attachments_known = desc
            .colors
            .iter()
            .chain(desc.depth_stencil.iter())
            .all(|key| self.resources.textures.contains_key(*key));
        if !attachments_known {
            return Err(FrameError::UnknownHandle("texture"));
        }
        Ok(self.resources.framebuffers.insert(GpuEntry::new(desc, true)))
    }

    pub fn register_vertex_array(&mut self, desc: VertexArrayDesc) -> VertexArrayKey {
        self.resources.vertex_arrays.insert(GpuEntry::new(desc, true))
    }

    #[must_use]
    pub fn contains_buffer(&self, key: BufferKey) -> bool {
        self.resources.buffers.contains_key(key)
    }

    #[must_use]
    pub fn contains_texture(&self, key: TextureKey) -> bool {
        self.resources.textures.contains_key(key)
    }

    #[must_use]
    pub fn texture_desc(&self, key: TextureKey) -> Option<&TextureDesc> {
        self.resources.textures.get(key).map(|entry| &entry.desc)
    }

    /// Whether the texture has contents to sample.
    #[must_use]
    pub fn is_texture_ready(&self, key: TextureKey) -> bool {
        self.resources.textures.get(key).is_some_and(|entry| entry.ready)
    }

    /// Whether the program finished linking. Starts compilation on first
    /// call; never blocks.
    pub fn is_program_ready(&mut self, key: ProgramKey) -> bool {
        match self.resources.programs.get(key) {
            None => return false,
            Some(entry) if entry.ready && !entry.is_stale(self.generation) => return true,
            Some(_) => {}
        }
        let Some(native) = self.program_native(key) else {
            return false;
        };
        if !self.api.is_program_linked(native) {
            return false;
        }
        if let Some(entry) = self.resources.programs.get_mut(key) {
            entry.ready = true;
        }
        true
    }

    // ─── Shared ownership ─────────────────────────────────────────────

    pub fn retain_buffer(&mut self, key: BufferKey) {
        if let Some(entry) = self.resources.buffers.get_mut(key) {
            entry.owners += 1;
        }
    }

    /// Drops one owner; returns `true` if the buffer was destroyed.
    pub fn release_buffer(&mut self, key: BufferKey) -> bool {
        let destroyed = release_entry(
            &mut self.resources.buffers,
            key,
            self.generation,
            self.api.as_mut(),
            ResourceKind::Buffer,
        );
        if destroyed {
            self.forget_buffer(key);
        }
        destroyed
    }

    pub fn retain_texture(&mut self, key: TextureKey) {
        if let Some(entry) = self.resources.textures.get_mut(key) {
            entry.owners += 1;
        }
    }

    /// Drops one owner; returns `true` if the texture was destroyed.
    pub fn release_texture(&mut self, key: TextureKey) -> bool {
        let destroyed = release_entry(
            &mut self.resources.textures,
            key,
            self.generation,
            self.api.as_mut(),
            ResourceKind::Texture,
        );
        if destroyed {
            self.units.release(key);
            for binding in &mut self.unit_bindings {
                if binding.get() == Some(Some(key)) {
                    binding.invalidate();
                }
            }
        }
        destroyed
    }

    pub fn dispose_program(&mut self, key: ProgramKey) -> bool {
        let destroyed = release_entry(
            &mut self.resources.programs,
            key,
            self.generation,
            self.api.as_mut(),
            ResourceKind::Program,
        );
        if destroyed && self.program.get() == Some(Some(key)) {
            self.program.invalidate();
        }
        destroyed
    }

    pub fn dispose_framebuffer(&mut self, key: FramebufferKey) -> bool {
        let destroyed = release_entry(
            &mut self.resources.framebuffers,
            key,
            self.generation,
            self.api.as_mut(),
            ResourceKind::Framebuffer,
        );
        if destroyed && self.framebuffer.get() == Some(Some(key)) {
            self.framebuffer.invalidate();
        }
        destroyed
    }

    pub fn dispose_vertex_array(&mut self, key: VertexArrayKey) -> bool {
        let destroyed = release_entry(
            &mut self.resources.vertex_arrays,
            key,
            self.generation,
            self.api.as_mut(),
            ResourceKind::VertexArray,
        );
        if destroyed && self.vertex_array.get() == Some(Some(key)) {
            self.vertex_array.invalidate();
        }
        destroyed
    }

    fn forget_buffer(&mut self, key: BufferKey) {
        if self.array_buffer.get() == Some(Some(key)) {
            self.array_buffer.invalidate();
        }
        if self.element_buffer.get() == Some(Some(key)) {
            self.element_buffer.invalidate();
        }
        for attribute in &mut self.attributes {
            if attribute.get().is_some_and(|(buffer, _)| buffer == key) {
                attribute.invalidate();
            }
        }
    }

    // ========================================================================
    // Native Handle Resolution
    // ========================================================================

    fn buffer_native(&mut self, key: BufferKey) -> Option<NativeHandle> {
        let api = self.api.as_mut();
        resolve(&mut self.resources.buffers, key, self.generation, ResourceKind::Buffer, |desc| {
            api.create_buffer(desc)
        })
    }

    fn texture_native(&mut self, key: TextureKey) -> Option<(TextureTarget, NativeHandle)> {
        let api = self.api.as_mut();
        let native = resolve(&mut self.resources.textures, key, self.generation, ResourceKind::Texture, |desc| {
            api.create_texture(desc)
        })?;
        let target = self.resources.textures.get(key)?.desc.target;
        Some((target, native))
    }

    fn program_native(&mut self, key: ProgramKey) -> Option<NativeHandle> {
        let api = self.api.as_mut();
        resolve(&mut self.resources.programs, key, self.generation, ResourceKind::Program, |desc| {
            api.create_program(desc)
        })
    }

    fn framebuffer_native(&mut self, key: FramebufferKey) -> Option<NativeHandle> {
        let entry = self.resources.framebuffers.get(key)?;
        if let Some(native) = entry.live_handle(self.generation) {
            return Some(native);
        }
        if entry.is_stale(self.generation) {
            return None;
        }

        let desc = entry.desc.clone();
        let mut colors: SmallVec<[NativeHandle; 4]> = SmallVec::new();
        for texture in &desc.colors {
            colors.push(self.texture_native(*texture)?.1);
        }
        let depth_stencil = match desc.depth_stencil {
            Some(texture) => Some(self.texture_native(texture)?.1),
            None => None,
        };

        let Some(native) = self.api.create_framebuffer(&colors, depth_stencil) else {
            log::warn!("Failed to create framebuffer '{}'", desc.label);
            return None;
        };
        let entry = self.resources.framebuffers.get_mut(key)?;
        entry.native = Some(native);
        entry.generation = self.generation;
        Some(native)
    }

    // ========================================================================
    // Program & Uniforms
    // ========================================================================

    /// Makes `program` current. Changing program forgets its matrix and
    /// sampler uniforms.
    pub fn use_program(&mut self, program: Option<ProgramKey>, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let native = match program {
            Some(key) => match self.program_native(key) {
                Some(native) => Some(native),
                None => return self.reject(ResourceKind::Program),
            },
            None => None,
        };
        let issued = self.program.update(program, force);
        if issued {
            self.api.use_program(native);
            self.matrices.clear();
            self.samplers.clear();
        }
        self.note(issued)
    }

    /// Uploads a matrix uniform to the current program.
    pub fn set_matrix(&mut self, slot: UniformSlot, value: &Mat4, force: bool) -> bool {
        if self.context_lost || self.bound_program().is_none() {
            return false;
        }
        let issued = force || self.matrices.get(&slot) != Some(value);
        if issued {
            self.matrices.insert(slot, *value);
            self.api.uniform_matrix(slot, &value.to_cols_array());
        }
        self.note(issued)
    }

    /// Tells sampler `slot` of the current program to read texture `unit`.
    pub fn set_sampler(&mut self, slot: u32, unit: u32, force: bool) -> bool {
        if self.context_lost || self.bound_program().is_none() {
            return false;
        }
        let issued = force || self.samplers.get(&slot) != Some(&unit);
        if issued {
            self.samplers.insert(slot, unit);
            self.api.uniform_sampler(slot, unit);
        }
        self.note(issued)
    }

    // ========================================================================
    // Framebuffer & Fixed-Function State
    // ========================================================================

    /// Binds a framebuffer; `None` is the default (screen) framebuffer.
    pub fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferKey>, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let native = match framebuffer {
            Some(key) => match self.framebuffer_native(key) {
                Some(native) => Some(native),
                None => return self.reject(ResourceKind::Framebuffer),
            },
            None => None,
        };
        let issued = self.framebuffer.update(framebuffer, force);
        if issued {
            self.api.bind_framebuffer(native);
        }
        self.note(issued)
    }

    pub fn set_viewport(&mut self, viewport: PixelViewport, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let issued = self.viewport.update(viewport, force);
        if issued {
            self.api.viewport(viewport);
        }
        self.note(issued)
    }

    pub fn set_depth_state(&mut self, state: DepthState, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let issued = self.depth.update(state, force);
        if issued {
            self.api.set_depth_state(&state);
        }
        self.note(issued)
    }

    pub fn set_stencil_state(&mut self, state: StencilState, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let issued = self.stencil.update(state, force);
        if issued {
            self.api.set_stencil_state(&state);
        }
        self.note(issued)
    }

    #[must_use]
    pub fn stencil_state(&self) -> Option<StencilState> {
        self.stencil.get()
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let issued = self.blend.update(mode, force);
        if issued {
            self.api.set_blend_mode(mode);
        }
        self.note(issued)
    }

    pub fn set_color_write(&mut self, enabled: bool, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let issued = self.color_write.update(enabled, force);
        if issued {
            self.api.set_color_write(enabled);
        }
        self.note(issued)
    }

    pub fn set_cull_mode(&mut self, mode: CullMode, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let issued = self.cull.update(mode, force);
        if issued {
            self.api.set_cull_mode(mode);
        }
        self.note(issued)
    }

    // ========================================================================
    // Buffers & Vertex Arrays
    // ========================================================================

    /// Binds a buffer to `target`.
    ///
    /// Outside of VAO recording, binding while a vertex array is current
    /// unbinds the vertex array first so its captured state is not modified.
    pub fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferKey>, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let native = match buffer {
            Some(key) => match self.buffer_native(key) {
                Some(native) => Some(native),
                None => return self.reject(ResourceKind::Buffer),
            },
            None => None,
        };

        if !self.recording_vertex_array && self.vertex_array.get().flatten().is_some() {
            self.bind_vertex_array(None, false);
        }

        let cached = match target {
            BufferTarget::Array => &mut self.array_buffer,
            BufferTarget::ElementArray => &mut self.element_buffer,
        };
        let issued = cached.update(buffer, force);
        if issued {
            self.api.bind_buffer(target, native);
        }
        self.note(issued)
    }

    /// Binds a vertex array object, recording it first if it has no native
    /// object yet.
    pub fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayKey>, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        let native = match vertex_array {
            Some(key) => {
                let Some(entry) = self.resources.vertex_arrays.get(key) else {
                    return self.reject(ResourceKind::VertexArray);
                };
                if entry.is_stale(self.generation) {
                    return self.reject(ResourceKind::VertexArray);
                }
                match entry.live_handle(self.generation) {
                    Some(native) => Some(native),
                    None => return self.record_vertex_array(key),
                }
            }
            None => None,
        };

        let issued = self.vertex_array.update(vertex_array, force);
        if issued {
            self.api.bind_vertex_array(native);
            self.invalidate_vertex_state();
        }
        self.note(issued)
    }

    /// Creates the native VAO for `key`, binds it and replays its recorded
    /// attribute and index buffer state into it.
    fn record_vertex_array(&mut self, key: VertexArrayKey) -> bool {
        let Some(desc) = self.resources.vertex_arrays.get(key).map(|entry| entry.desc.clone()) else {
            return false;
        };
        let Some(native) = self.api.create_vertex_array() else {
            log::warn!("Failed to create vertex array object");
            return self.reject(ResourceKind::VertexArray);
        };
        if let Some(entry) = self.resources.vertex_arrays.get_mut(key) {
            entry.native = Some(native);
            entry.generation = self.generation;
        }

        self.api.bind_vertex_array(Some(native));
        self.vertex_array = Cached(Some(Some(key)));
        self.invalidate_vertex_state();

        self.recording_vertex_array = true;
        for attribute in &desc.attributes {
            self.set_vertex_attribute(attribute.location, attribute.buffer, attribute.layout);
        }
        if let Some(index_buffer) = desc.index_buffer {
            self.bind_buffer(BufferTarget::ElementArray, Some(index_buffer), true);
        }
        self.recording_vertex_array = false;
        self.note(true)
    }

    /// Points attribute `location` at `buffer` and enables it.
    pub fn set_vertex_attribute(&mut self, location: u32, buffer: BufferKey, layout: AttribLayout) -> bool {
        if self.context_lost {
            return false;
        }
        let slot = location as usize;
        if slot >= self.attributes.len() {
            log::warn!("Vertex attribute location {location} exceeds the device limit");
            return false;
        }
        if !self.resources.buffers.contains_key(buffer) {
            return self.reject(ResourceKind::Buffer);
        }

        let pointer_changed = self.attributes[slot].get() != Some((buffer, layout));
        if pointer_changed {
            if self.buffer_native(buffer).is_none() {
                return self.reject(ResourceKind::Buffer);
            }
            self.bind_buffer(BufferTarget::Array, Some(buffer), false);
            self.attributes[slot].update((buffer, layout), true);
            self.api.vertex_attrib_pointer(location, &layout);
        }
        self.note(pointer_changed);

        if self.attribute_enabled[slot].update(true, false) {
            self.api.set_vertex_attrib_enabled(location, true);
            self.note(true);
        }
        pointer_changed
    }

    pub fn disable_vertex_attribute(&mut self, location: u32) -> bool {
        if self.context_lost {
            return false;
        }
        let Some(enabled) = self.attribute_enabled.get_mut(location as usize) else {
            return false;
        };
        let issued = enabled.update(false, false);
        if issued {
            self.api.set_vertex_attrib_enabled(location, false);
        }
        self.note(issued)
    }

    pub fn set_attribute_divisor(&mut self, location: u32, divisor: u32) -> bool {
        if self.context_lost || !self.caps.instanced_arrays {
            return false;
        }
        let Some(cached) = self.divisors.get_mut(location as usize) else {
            return false;
        };
        let issued = cached.update(divisor, false);
        if issued {
            self.api.vertex_attrib_divisor(location, divisor);
        }
        self.note(issued)
    }

    fn invalidate_vertex_state(&mut self) {
        self.element_buffer.invalidate();
        for attribute in &mut self.attributes {
            attribute.invalidate();
        }
        for enabled in &mut self.attribute_enabled {
            enabled.invalidate();
        }
        for divisor in &mut self.divisors {
            divisor.invalidate();
        }
    }

    // ========================================================================
    // Textures
    // ========================================================================

    fn activate_unit(&mut self, unit: u32) {
        if self.active_unit.update(unit, false) {
            self.api.active_texture(unit);
            self.note(true);
        }
    }

    /// Binds `texture` to an explicit unit.
    pub fn bind_texture(&mut self, unit: u32, texture: Option<TextureKey>, force: bool) -> bool {
        if self.context_lost {
            return false;
        }
        if unit as usize >= self.unit_bindings.len() {
            log::warn!("Texture unit {unit} exceeds the device limit");
            return false;
        }
        let (target, native) = match texture {
            Some(key) => match self.texture_native(key) {
                Some((target, native)) => (target, Some(native)),
                None => return self.reject(ResourceKind::Texture),
            },
            None => (TextureTarget::Texture2D, None),
        };

        let issued = self.unit_bindings[unit as usize].update(texture, force);
        if issued {
            self.activate_unit(unit);
            self.api.bind_texture(target, native);
            self.units.assign(unit, texture);
        }
        self.note(issued)
    }

    /// Binds `texture` to whichever unit the allocator picks and pins that
    /// unit for the current draw.
    ///
    /// Returns `Ok(None)` for disposed or stale textures (nothing is bound).
    pub fn bind_texture_to_next_available_unit(&mut self, texture: TextureKey) -> Result<Option<u32>> {
        if self.context_lost {
            return Ok(None);
        }
        let Some((target, native)) = self.texture_native(texture) else {
            self.reject(ResourceKind::Texture);
            return Ok(None);
        };

        let unit = self.units.acquire(texture)?.unit();
        let issued = self.unit_bindings[unit as usize].update(Some(texture), false);
        if issued {
            self.activate_unit(unit);
            self.api.bind_texture(target, Some(native));
        }
        self.note(issued);
        Ok(Some(unit))
    }

    /// Starts preparing a new draw: every texture unit lock is released.
    pub fn begin_draw(&mut self) {
        self.units.begin_draw();
    }

    // ========================================================================
    // Clear & Draw
    // ========================================================================

    pub fn clear(&mut self, flags: ClearFlags, color: [f32; 4]) {
        if self.context_lost || flags.is_empty() {
            return;
        }
        self.api.clear(flags, color);
    }

    pub fn draw(&mut self, call: &DrawCall) -> bool {
        if self.context_lost {
            return false;
        }
        self.api.draw(call);
        self.stats.draw_calls += 1;
        true
    }

    // ========================================================================
    // Cache Invalidation & Context Loss
    // ========================================================================

    /// Clears every comparison record, so the next request of each kind is
    /// applied unconditionally.
    pub fn reset_cache(&mut self) {
        self.program.invalidate();
        self.framebuffer.invalidate();
        self.viewport.invalidate();
        self.depth.invalidate();
        self.stencil.invalidate();
        self.blend.invalidate();
        self.color_write.invalidate();
        self.cull.invalidate();
        self.array_buffer.invalidate();
        self.vertex_array.invalidate();
        self.active_unit.invalidate();
        self.recording_vertex_array = false;
        for binding in &mut self.unit_bindings {
            binding.invalidate();
        }
        self.invalidate_vertex_state();
        self.matrices.clear();
        self.samplers.clear();
        self.units.reset();
    }

    /// Per-frame soft wipe: program, viewport and vertex array only.
    ///
    /// A bound vertex array is unbound natively so later buffer binds cannot
    /// leak into it.
    pub fn wipe_caches(&mut self) {
        if self.context_lost {
            self.vertex_array.invalidate();
        } else if self.vertex_array.update(None, false) {
            self.api.bind_vertex_array(None);
            self.invalidate_vertex_state();
        }
        self.program.invalidate();
        self.viewport.invalidate();
        self.element_buffer.invalidate();
        self.matrices.clear();
        self.samplers.clear();
    }

    /// Detects context loss and restoration.
    pub fn poll_context(&mut self) -> ContextStatus {
        let lost_now = self.api.is_context_lost();
        match (self.context_lost, lost_now) {
            (false, false) => ContextStatus::Healthy,
            (false, true) => {
                self.mark_context_lost();
                ContextStatus::Lost
            }
            (true, true) => ContextStatus::Lost,
            (true, false) => ContextStatus::Restored,
        }
    }

    /// Invalidates every native handle. Nothing is deleted: the objects died
    /// with the context.
    pub fn mark_context_lost(&mut self) {
        if self.context_lost {
            return;
        }
        log::warn!("Graphics context lost; {} GPU resources invalidated", self.resources.len());
        self.context_lost = true;
        self.generation = self.generation.wrapping_add(1);
        self.reset_cache();
        for (_, program) in &mut self.resources.programs {
            program.ready = false;
        }
    }

    /// Recreates every native object that existed before the context loss
    /// from its retained description. Returns the number recreated.
    pub fn rebuild(&mut self) -> usize {
        self.context_lost = false;
        self.reset_cache();
        let generation = self.generation;
        let mut recreated = 0;

        let stale_buffers = stale_keys(&self.resources.buffers, generation);
        for key in stale_buffers {
            clear_native(&mut self.resources.buffers, key);
            recreated += usize::from(self.buffer_native(key).is_some());
        }
        let stale_textures = stale_keys(&self.resources.textures, generation);
        for key in stale_textures {
            clear_native(&mut self.resources.textures, key);
            recreated += usize::from(self.texture_native(key).is_some());
        }
        let stale_programs = stale_keys(&self.resources.programs, generation);
        for key in stale_programs {
            clear_native(&mut self.resources.programs, key);
            recreated += usize::from(self.program_native(key).is_some());
        }
        let stale_framebuffers = stale_keys(&self.resources.framebuffers, generation);
        for key in stale_framebuffers {
            clear_native(&mut self.resources.framebuffers, key);
            recreated += usize::from(self.framebuffer_native(key).is_some());
        }
        let stale_vertex_arrays = stale_keys(&self.resources.vertex_arrays, generation);
        let had_vertex_arrays = !stale_vertex_arrays.is_empty();
        for key in stale_vertex_arrays {
            clear_native(&mut self.resources.vertex_arrays, key);
            recreated += usize::from(self.record_vertex_array(key));
        }
        if had_vertex_arrays {
            self.bind_vertex_array(None, true);
        }

        log::info!("Graphics context rebuilt: {recreated} GPU resources recreated");
        recreated
    }

    /// Deletes every native object (engine teardown).
    pub fn dispose_all(&mut self) {
        let generation = self.generation;
        let api = self.api.as_mut();
        delete_all(&mut self.resources.vertex_arrays, generation, api, ResourceKind::VertexArray);
        delete_all(&mut self.resources.framebuffers, generation, api, ResourceKind::Framebuffer);
        delete_all(&mut self.resources.programs, generation, api, ResourceKind::Program);
        delete_all(&mut self.resources.textures, generation, api, ResourceKind::Texture);
        delete_all(&mut self.resources.buffers, generation, api, ResourceKind::Buffer);
        self.reset_cache();
    }
}

// ============================================================================
// Arena Helpers
// ============================================================================

/// Returns the live native handle of `key`, creating it on first use.
/// Stale handles (older context generation) resolve to `None`.
fn resolve<K: Key, D>(
    arena: &mut SlotMap<K, GpuEntry<D>>,
    key: K,
    generation: u32,
    kind: ResourceKind,
    create: impl FnOnce(&D) -> Option<NativeHandle>,
) -> Option<NativeHandle> {
    let entry = arena.get_mut(key)?;
    if let Some(native) = entry.live_handle(generation) {
        return Some(native);
    }
    if entry.is_stale(generation) {
        return None;
    }
    let Some(native) = create(&entry.desc) else {
        log::warn!("Failed to create {kind}");
        return None;
    };
    entry.native = Some(native);
    entry.generation = generation;
    Some(native)
}

fn release_entry<K: Key, D>(
    arena: &mut SlotMap<K, GpuEntry<D>>,
    key: K,
    generation: u32,
    api: &mut dyn GraphicsApi,
    kind: ResourceKind,
) -> bool {
    let Some(entry) = arena.get_mut(key) else {
        return false;
    };
    entry.owners = entry.owners.saturating_sub(1);
    if entry.owners > 0 {
        return false;
    }
    if let Some(entry) = arena.remove(key)
        && let Some(native) = entry.live_handle(generation)
    {
        api.delete_resource(kind, native);
    }
    true
}

fn stale_keys<K: Key, D>(arena: &SlotMap<K, GpuEntry<D>>, generation: u32) -> Vec<K> {
    arena
        .iter()
        .filter(|(_, entry)| entry.is_stale(generation))
        .map(|(key, _)| key)
        .collect()
}

fn clear_native<K: Key, D>(arena: &mut SlotMap<K, GpuEntry<D>>, key: K) {
    if let Some(entry) = arena.get_mut(key) {
        entry.native = None;
    }
}

fn delete_all<K: Key, D>(
    arena: &mut SlotMap<K, GpuEntry<D>>,
    generation: u32,
    api: &mut dyn GraphicsApi,
    kind: ResourceKind,
) {
    for (_, entry) in arena.drain() {
        if let Some(native) = entry.live_handle(generation) {
            api.delete_resource(kind, native);
        }
    }
}
