//! GPU State Cache Tests
//!
//! Tests for:
//! - Redundant call filtering per state kind (program, framebuffer,
//!   viewport, depth, blend, texture)
//! - `force` re-issuing and `reset_cache` / `wipe_caches` invalidation
//! - Sampler uniforms cached per program
//! - Disposed and stale handles binding as no-ops
//! - Context loss, restoration and rebuild from retained descriptions
//! - Capability probing fallbacks and texture format validation

use myth_frame::FrameError;
use myth_frame::gpu::{
    ApiProbe, BlendMode, Capabilities, ContextStatus, DepthState, GpuStateCache, NativeCall, PixelViewport,
    ProgramDesc, RecordingApi, ResourceKind, TextureDesc, TextureFormat, VertexArrayDesc,
};

fn cache() -> (GpuStateCache, ApiProbe) {
    let (api, probe) = RecordingApi::new();
    (GpuStateCache::new(Box::new(api), None), probe)
}

fn program_desc(label: &str) -> ProgramDesc {
    ProgramDesc {
        label: label.to_string(),
        vertex_source: "void main() {}".to_string(),
        fragment_source: "void main() {}".to_string(),
        defines: Vec::new(),
    }
}

fn texture(gpu: &mut GpuStateCache, label: &str) -> myth_frame::gpu::TextureKey {
    gpu.register_texture(TextureDesc::with_data(label, 2, 2, vec![255; 16]))
        .expect("color texture registers")
}

// ============================================================================
// Redundant Call Filtering
// ============================================================================

#[test]
fn viewport_applied_once() {
    let (mut gpu, probe) = cache();
    let viewport = PixelViewport::new(0, 0, 800, 600);

    assert!(gpu.set_viewport(viewport, false));
    assert!(!gpu.set_viewport(viewport, false));
    assert!(!gpu.set_viewport(viewport, false));

    assert_eq!(probe.count(|call| matches!(call, NativeCall::Viewport(_))), 1);
    assert_eq!(gpu.current_viewport(), Some(viewport));
}

#[test]
fn viewport_change_is_issued() {
    let (mut gpu, probe) = cache();
    gpu.set_viewport(PixelViewport::new(0, 0, 800, 600), false);
    gpu.set_viewport(PixelViewport::new(0, 0, 400, 300), false);
    gpu.set_viewport(PixelViewport::new(0, 0, 400, 300), false);

    assert_eq!(probe.count(|call| matches!(call, NativeCall::Viewport(_))), 2);
}

#[test]
fn program_applied_once() {
    let (mut gpu, probe) = cache();
    let program = gpu.register_program(program_desc("basic"));

    assert!(gpu.use_program(Some(program), false));
    assert!(!gpu.use_program(Some(program), false));

    assert_eq!(probe.count(|call| matches!(call, NativeCall::UseProgram(Some(_)))), 1);
    assert_eq!(probe.count(|call| matches!(call, NativeCall::Create(ResourceKind::Program, _))), 1);
    assert_eq!(gpu.bound_program(), Some(program));
}

#[test]
fn default_framebuffer_applied_once() {
    let (mut gpu, probe) = cache();
    assert!(gpu.bind_framebuffer(None, false));
    assert!(!gpu.bind_framebuffer(None, false));
    assert_eq!(probe.count(|call| matches!(call, NativeCall::BindFramebuffer(None))), 1);
}

#[test]
fn fixed_function_state_applied_once() {
    let (mut gpu, probe) = cache();
    for _ in 0..3 {
        gpu.set_depth_state(DepthState::read_only(), false);
        gpu.set_blend_mode(BlendMode::Combine, false);
    }
    assert_eq!(probe.count(|call| matches!(call, NativeCall::DepthState(_))), 1);
    assert_eq!(probe.count(|call| matches!(call, NativeCall::BlendMode(_))), 1);

    gpu.set_blend_mode(BlendMode::Add, false);
    assert_eq!(probe.count(|call| matches!(call, NativeCall::BlendMode(_))), 2);
}

#[test]
fn texture_bind_applied_once_per_unit() {
    let (mut gpu, probe) = cache();
    let tex = texture(&mut gpu, "albedo");

    assert!(gpu.bind_texture(0, Some(tex), false));
    assert!(!gpu.bind_texture(0, Some(tex), false));
    assert_eq!(probe.count(|call| matches!(call, NativeCall::BindTexture(_, Some(_)))), 1);
    assert_eq!(gpu.texture_units().unit_of(tex), Some(0));
}

#[test]
fn force_reissues_identical_state() {
    let (mut gpu, probe) = cache();
    let viewport = PixelViewport::new(0, 0, 64, 64);
    gpu.set_viewport(viewport, false);
    assert!(gpu.set_viewport(viewport, true));
    assert_eq!(probe.count(|call| matches!(call, NativeCall::Viewport(_))), 2);
}

#[test]
fn stats_count_issued_and_skipped() {
    let (mut gpu, _probe) = cache();
    let viewport = PixelViewport::new(0, 0, 64, 64);
    gpu.set_viewport(viewport, false);
    gpu.set_viewport(viewport, false);
    gpu.set_viewport(viewport, false);

    let stats = gpu.take_stats();
    assert_eq!(stats.issued, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(gpu.stats().issued, 0, "take_stats resets the counters");
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn reset_cache_forces_next_call() {
    let (mut gpu, probe) = cache();
    let program = gpu.register_program(program_desc("basic"));
    gpu.use_program(Some(program), false);
    gpu.set_depth_state(DepthState::default(), false);

    gpu.reset_cache();
    assert!(gpu.use_program(Some(program), false));
    assert!(gpu.set_depth_state(DepthState::default(), false));

    assert_eq!(probe.count(|call| matches!(call, NativeCall::UseProgram(_))), 2);
    assert_eq!(probe.count(|call| matches!(call, NativeCall::DepthState(_))), 2);
}

#[test]
fn wipe_caches_keeps_fixed_function_state() {
    let (mut gpu, probe) = cache();
    let program = gpu.register_program(program_desc("basic"));
    gpu.use_program(Some(program), false);
    gpu.set_depth_state(DepthState::default(), false);

    gpu.wipe_caches();
    assert!(gpu.use_program(Some(program), false));
    assert!(!gpu.set_depth_state(DepthState::default(), false));

    assert_eq!(probe.count(|call| matches!(call, NativeCall::UseProgram(_))), 2);
    assert_eq!(probe.count(|call| matches!(call, NativeCall::DepthState(_))), 1);
}

#[test]
fn wipe_caches_unbinds_vertex_array() {
    let (mut gpu, probe) = cache();
    let vao = gpu.register_vertex_array(VertexArrayDesc::default());
    assert!(gpu.bind_vertex_array(Some(vao), false));
    assert_eq!(gpu.bound_vertex_array(), Some(vao));

    probe.clear();
    gpu.wipe_caches();
    assert_eq!(probe.calls(), vec![NativeCall::BindVertexArray(None)]);
    assert_eq!(gpu.bound_vertex_array(), None);

    // Already unbound: nothing more to issue.
    probe.clear();
    gpu.wipe_caches();
    assert!(probe.calls().is_empty());

    assert!(gpu.bind_vertex_array(Some(vao), false));
    assert_eq!(probe.count(|call| matches!(call, NativeCall::BindVertexArray(Some(_)))), 1);
}

#[test]
fn sampler_uniform_cached_per_program() {
    let (mut gpu, probe) = cache();
    let a = gpu.register_program(program_desc("a"));
    let b = gpu.register_program(program_desc("b"));

    assert!(!gpu.set_sampler(0, 1, false));
    assert_eq!(probe.count(|call| matches!(call, NativeCall::UniformSampler(..))), 0);

    gpu.use_program(Some(a), false);
    assert!(gpu.set_sampler(0, 1, false));
    assert!(!gpu.set_sampler(0, 1, false));
    assert!(gpu.set_sampler(0, 2, false));
    assert!(gpu.set_sampler(1, 2, false));

    gpu.use_program(Some(b), false);
    assert!(gpu.set_sampler(0, 2, false));

    assert_eq!(probe.count(|call| matches!(call, NativeCall::UniformSampler(..))), 4);
    assert_eq!(probe.count(|call| *call == NativeCall::UniformSampler(0, 2)), 2);
}

// ============================================================================
// Disposed & Stale Handles
// ============================================================================

#[test]
fn disposed_texture_bind_is_noop() {
    let (mut gpu, probe) = cache();
    let tex = texture(&mut gpu, "albedo");
    gpu.bind_texture(0, Some(tex), false);
    assert!(gpu.release_texture(tex));
    assert_eq!(probe.count(|call| matches!(call, NativeCall::Delete(ResourceKind::Texture, _))), 1);

    probe.clear();
    assert!(!gpu.bind_texture(0, Some(tex), false));
    assert_eq!(gpu.bind_texture_to_next_available_unit(tex).unwrap(), None);
    assert!(probe.calls().is_empty());
    assert_eq!(gpu.stats().rejected, 2);
}

#[test]
fn shared_texture_survives_until_last_release() {
    let (mut gpu, probe) = cache();
    let tex = texture(&mut gpu, "shared");
    gpu.retain_texture(tex);
    gpu.bind_texture(0, Some(tex), false);

    assert!(!gpu.release_texture(tex));
    assert!(gpu.contains_texture(tex));
    assert!(gpu.release_texture(tex));
    assert!(!gpu.contains_texture(tex));
    assert_eq!(probe.live_objects(), 0);
}

#[test]
fn disposed_program_bind_is_noop() {
    let (mut gpu, probe) = cache();
    let program = gpu.register_program(program_desc("gone"));
    gpu.use_program(Some(program), false);
    assert!(gpu.dispose_program(program));
    assert_eq!(gpu.bound_program(), None);

    probe.clear();
    assert!(!gpu.use_program(Some(program), false));
    assert_eq!(probe.count(|call| matches!(call, NativeCall::UseProgram(_))), 0);
}

// ============================================================================
// Context Loss
// ============================================================================

#[test]
fn context_loss_rejects_binds_until_rebuild() {
    let (mut gpu, probe) = cache();
    let program = gpu.register_program(program_desc("basic"));
    let tex = texture(&mut gpu, "albedo");
    gpu.use_program(Some(program), false);
    gpu.bind_texture(0, Some(tex), false);
    let generation = gpu.context_generation();

    probe.lose_context();
    assert_eq!(gpu.poll_context(), ContextStatus::Lost);
    assert!(gpu.is_context_lost());
    assert_eq!(gpu.context_generation(), generation + 1);

    probe.clear();
    assert!(!gpu.use_program(Some(program), false));
    assert!(!gpu.bind_texture(0, Some(tex), false));
    assert!(probe.calls().is_empty());

    probe.restore_context();
    assert_eq!(gpu.poll_context(), ContextStatus::Restored);
    assert_eq!(gpu.rebuild(), 2);
    assert!(!gpu.is_context_lost());
    assert_eq!(probe.live_objects(), 2);

    assert!(gpu.use_program(Some(program), false));
    assert!(gpu.bind_texture(0, Some(tex), false));
}

#[test]
fn program_readiness_is_polled() {
    let (mut gpu, probe) = cache();
    probe.set_link_polls(2);
    let program = gpu.register_program(program_desc("slow"));

    assert!(!gpu.is_program_ready(program));
    assert!(!gpu.is_program_ready(program));
    assert!(gpu.is_program_ready(program));
    assert!(gpu.is_program_ready(program));
}

// ============================================================================
// Capabilities & Formats
// ============================================================================

#[test]
fn failed_capability_queries_use_portable_minimums() {
    let (api, probe) = RecordingApi::new();
    probe.set_capability_queries_fail(true);
    let gpu = GpuStateCache::new(Box::new(api), None);

    let caps = gpu.capabilities();
    assert_eq!(caps.max_texture_units, Capabilities::MIN_TEXTURE_UNITS);
    assert_eq!(caps.max_vertex_attribs, Capabilities::MIN_VERTEX_ATTRIBS);
    assert!(!caps.instanced_arrays);
    assert!(!caps.depth_texture);
}

#[test]
fn texture_unit_limit_caps_the_device() {
    let (api, _probe) = RecordingApi::new();
    let gpu = GpuStateCache::new(Box::new(api), Some(4));
    assert_eq!(gpu.capabilities().max_texture_units, 4);
    assert_eq!(gpu.texture_units().capacity(), 4);
}

#[test]
fn depth_texture_requires_capability() {
    let (api, _probe) = RecordingApi::with_capabilities(Capabilities {
        depth_texture: false,
        ..Capabilities::default()
    });
    let mut gpu = GpuStateCache::new(Box::new(api), None);

    let result = gpu.register_texture(TextureDesc::attachment("depth", 4, 4, TextureFormat::Depth24Stencil8));
    assert!(matches!(result, Err(FrameError::CapabilityMissing(_))));
}

#[test]
fn unsupported_float_attachment_falls_back() {
    let (api, _probe) = RecordingApi::with_capabilities(Capabilities {
        float_render: false,
        ..Capabilities::default()
    });
    let mut gpu = GpuStateCache::new(Box::new(api), None);

    let key = gpu
        .register_texture(TextureDesc::attachment("hdr", 4, 4, TextureFormat::Rgba32Float))
        .unwrap();
    assert_eq!(gpu.texture_desc(key).map(|desc| desc.format), Some(TextureFormat::Rgba8));
}

#[test]
fn pending_texture_becomes_ready_on_upload() {
    let (mut gpu, _probe) = cache();
    let key = gpu.register_texture(TextureDesc::pending("streamed", 2, 2)).unwrap();
    assert!(!gpu.is_texture_ready(key));

    gpu.update_texture(key, vec![0; 16]).unwrap();
    assert!(gpu.is_texture_ready(key));
}
