//! Headless recording backend.
//!
//! [`RecordingApi`] implements [`GraphicsApi`] without a GPU: every call is
//! appended to a shared log. A cloned [`ApiProbe`] stays with the caller to
//! inspect the log and to steer the backend (capability overrides, creation
//! failures, context loss, parallel program linking).
//!
//! ```rust,ignore
//! let (api, probe) = RecordingApi::new();
//! let mut gpu = GpuStateCache::new(Box::new(api), None);
//! gpu.set_viewport(PixelViewport::new(0, 0, 800, 600), false);
//! gpu.set_viewport(PixelViewport::new(0, 0, 800, 600), false);
//! assert_eq!(probe.count(|call| matches!(call, NativeCall::Viewport(_))), 1);
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::api::{
    AttribLayout, BufferDesc, BufferTarget, Capabilities, ClearFlags, DrawCall, Feature,
    GraphicsApi, Limit, NativeHandle, ProgramDesc, ResourceKind, TextureDesc, TextureTarget,
    UniformSlot,
};
use super::state::{BlendMode, CullMode, DepthState, PixelViewport, StencilState};

/// One recorded native call.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    Create(ResourceKind, NativeHandle),
    UpdateBuffer(NativeHandle),
    UpdateTexture(NativeHandle),
    Delete(ResourceKind, NativeHandle),
    BindBuffer(BufferTarget, Option<NativeHandle>),
    BindVertexArray(Option<NativeHandle>),
    VertexAttribPointer(u32, AttribLayout),
    VertexAttribEnabled(u32, bool),
    VertexAttribDivisor(u32, u32),
    ActiveTexture(u32),
    BindTexture(TextureTarget, Option<NativeHandle>),
    UseProgram(Option<NativeHandle>),
    UniformMatrix(UniformSlot),
    /// Sampler slot, texture unit.
    UniformSampler(u32, u32),
    BindFramebuffer(Option<NativeHandle>),
    Viewport(PixelViewport),
    DepthState(DepthState),
    StencilState(StencilState),
    BlendMode(BlendMode),
    ColorWrite(bool),
    CullMode(CullMode),
    Clear(ClearFlags),
    Draw(DrawCall),
}

#[derive(Debug)]
struct Backend {
    calls: Vec<NativeCall>,
    next_handle: u32,
    capabilities: Capabilities,
    capability_queries_fail: bool,
    context_lost: bool,
    fail_creation: bool,
    /// Link-status polls answered "not linked" for new programs.
    link_polls: u32,
    pending_links: FxHashMap<NativeHandle, u32>,
    live: FxHashMap<NativeHandle, ResourceKind>,
}

impl Backend {
    fn allocate(&mut self, kind: ResourceKind) -> Option<NativeHandle> {
        if self.fail_creation || self.context_lost {
            return None;
        }
        self.next_handle += 1;
        let handle = NativeHandle::new(self.next_handle)?;
        self.live.insert(handle, kind);
        self.calls.push(NativeCall::Create(kind, handle));
        Some(handle)
    }
}

/// Headless [`GraphicsApi`] that records every call.
pub struct RecordingApi {
    backend: Rc<RefCell<Backend>>,
}

/// Caller-side view of a [`RecordingApi`].
#[derive(Clone)]
pub struct ApiProbe {
    backend: Rc<RefCell<Backend>>,
}

impl RecordingApi {
    /// Creates a backend with default capabilities.
    #[must_use]
    pub fn new() -> (Self, ApiProbe) {
        Self::with_capabilities(Capabilities::default())
    }

    #[must_use]
    pub fn with_capabilities(capabilities: Capabilities) -> (Self, ApiProbe) {
        let backend = Rc::new(RefCell::new(Backend {
            calls: Vec::new(),
            next_handle: 0,
            capabilities,
            capability_queries_fail: false,
            context_lost: false,
            fail_creation: false,
            link_polls: 0,
            pending_links: FxHashMap::default(),
            live: FxHashMap::default(),
        }));
        (
            Self {
                backend: Rc::clone(&backend),
            },
            ApiProbe { backend },
        )
    }

    fn record(&self, call: NativeCall) {
        self.backend.borrow_mut().calls.push(call);
    }
}

impl ApiProbe {
    /// Snapshot of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<NativeCall> {
        self.backend.borrow().calls.clone()
    }

    #[must_use]
    pub fn count(&self, predicate: impl Fn(&NativeCall) -> bool) -> usize {
        self.backend.borrow().calls.iter().filter(|call| predicate(call)).count()
    }

    #[must_use]
    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.backend
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                NativeCall::Draw(draw) => Some(*draw),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.backend.borrow_mut().calls.clear();
    }

    /// Number of native objects created and not deleted.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.backend.borrow().live.len()
    }

    pub fn lose_context(&self) {
        let mut backend = self.backend.borrow_mut();
        backend.context_lost = true;
        backend.live.clear();
        backend.pending_links.clear();
    }

    pub fn restore_context(&self) {
        self.backend.borrow_mut().context_lost = false;
    }

    pub fn set_fail_creation(&self, fail: bool) {
        self.backend.borrow_mut().fail_creation = fail;
    }

    pub fn set_capability_queries_fail(&self, fail: bool) {
        self.backend.borrow_mut().capability_queries_fail = fail;
    }

    /// Programs created afterwards report "not linked" for their first
    /// `polls` status queries.
    pub fn set_link_polls(&self, polls: u32) {
        self.backend.borrow_mut().link_polls = polls;
    }
}

impl GraphicsApi for RecordingApi {
    fn query_limit(&self, limit: Limit) -> Option<u32> {
        let backend = self.backend.borrow();
        if backend.capability_queries_fail {
            return None;
        }
        Some(match limit {
            Limit::MaxTextureUnits => backend.capabilities.max_texture_units,
            Limit::MaxVertexAttribs => backend.capabilities.max_vertex_attribs,
        })
    }

    fn supports(&self, feature: Feature) -> Option<bool> {
        let backend = self.backend.borrow();
        if backend.capability_queries_fail {
            return None;
        }
        let caps = &backend.capabilities;
        Some(match feature {
            Feature::InstancedArrays => caps.instanced_arrays,
            Feature::VertexArrayObjects => caps.vertex_array_objects,
            Feature::DepthTexture => caps.depth_texture,
            Feature::HalfFloatRender => caps.half_float_render,
            Feature::FloatRender => caps.float_render,
        })
    }

    fn is_context_lost(&self) -> bool {
        self.backend.borrow().context_lost
    }

    fn create_buffer(&mut self, _desc: &BufferDesc) -> Option<NativeHandle> {
        self.backend.borrow_mut().allocate(ResourceKind::Buffer)
    }

    fn update_buffer(&mut self, buffer: NativeHandle, _offset: usize, _data: &[u8]) {
        self.record(NativeCall::UpdateBuffer(buffer));
    }

    fn create_texture(&mut self, _desc: &TextureDesc) -> Option<NativeHandle> {
        self.backend.borrow_mut().allocate(ResourceKind::Texture)
    }

    fn update_texture(&mut self, texture: NativeHandle, _data: &[u8]) {
        self.record(NativeCall::UpdateTexture(texture));
    }

    fn create_program(&mut self, _desc: &ProgramDesc) -> Option<NativeHandle> {
        let mut backend = self.backend.borrow_mut();
        let handle = backend.allocate(ResourceKind::Program)?;
        let polls = backend.link_polls;
        if polls > 0 {
            backend.pending_links.insert(handle, polls);
        }
        Some(handle)
    }

    fn is_program_linked(&mut self, program: NativeHandle) -> bool {
        let mut backend = self.backend.borrow_mut();
        match backend.pending_links.get_mut(&program) {
            Some(remaining) if *remaining > 1 => {
                *remaining -= 1;
                false
            }
            Some(_) => {
                backend.pending_links.remove(&program);
                false
            }
            None => backend.live.contains_key(&program),
        }
    }

    fn create_framebuffer(
        &mut self,
        _colors: &[NativeHandle],
        _depth_stencil: Option<NativeHandle>,
    ) -> Option<NativeHandle> {
        self.backend.borrow_mut().allocate(ResourceKind::Framebuffer)
    }

    fn create_vertex_array(&mut self) -> Option<NativeHandle> {
        self.backend.borrow_mut().allocate(ResourceKind::VertexArray)
    }

    fn delete_resource(&mut self, kind: ResourceKind, handle: NativeHandle) {
        let mut backend = self.backend.borrow_mut();
        backend.live.remove(&handle);
        backend.calls.push(NativeCall::Delete(kind, handle));
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<NativeHandle>) {
        self.record(NativeCall::BindBuffer(target, buffer));
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<NativeHandle>) {
        self.record(NativeCall::BindVertexArray(vertex_array));
    }

    fn vertex_attrib_pointer(&mut self, location: u32, layout: &AttribLayout) {
        self.record(NativeCall::VertexAttribPointer(location, *layout));
    }

    fn set_vertex_attrib_enabled(&mut self, location: u32, enabled: bool) {
        self.record(NativeCall::VertexAttribEnabled(location, enabled));
    }

    fn vertex_attrib_divisor(&mut self, location: u32, divisor: u32) {
        self.record(NativeCall::VertexAttribDivisor(location, divisor));
    }

    fn active_texture(&mut self, unit: u32) {
        self.record(NativeCall::ActiveTexture(unit));
    }

    fn bind_texture(&mut self, target: TextureTarget, texture: Option<NativeHandle>) {
        self.record(NativeCall::BindTexture(target, texture));
    }

    fn use_program(&mut self, program: Option<NativeHandle>) {
        self.record(NativeCall::UseProgram(program));
    }

    fn uniform_matrix(&mut self, slot: UniformSlot, _value: &[f32; 16]) {
        self.record(NativeCall::UniformMatrix(slot));
    }

    fn uniform_sampler(&mut self, slot: u32, unit: u32) {
        self.record(NativeCall::UniformSampler(slot, unit));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<NativeHandle>) {
        self.record(NativeCall::BindFramebuffer(framebuffer));
    }

    fn viewport(&mut self, viewport: PixelViewport) {
        self.record(NativeCall::Viewport(viewport));
    }

    fn set_depth_state(&mut self, state: &DepthState) {
        self.record(NativeCall::DepthState(*state));
    }

    fn set_stencil_state(&mut self, state: &StencilState) {
        self.record(NativeCall::StencilState(*state));
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.record(NativeCall::BlendMode(mode));
    }

    fn set_color_write(&mut self, enabled: bool) {
        self.record(NativeCall::ColorWrite(enabled));
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.record(NativeCall::CullMode(mode));
    }

    fn clear(&mut self, flags: ClearFlags, _color: [f32; 4]) {
        self.record(NativeCall::Clear(flags));
    }

    fn draw(&mut self, call: &DrawCall) {
        self.record(NativeCall::Draw(*call));
    }
}
