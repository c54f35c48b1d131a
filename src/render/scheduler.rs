//! Frame Scheduler
//!
//! Drives one frame through its phases:
//!
//! ```text
//! Idle ─► Animating ─► EvaluatingRenderTargets ─► RenderingCameras ─► Presenting ─► Idle
//! ```
//!
//! # Frame Order
//!
//! 1. Frame id, animation (fixed substeps in lockstep mode), physics
//! 2. `before_camera_update` stage, camera (and rig) matrix updates
//! 3. `before_render` observers, custom render targets
//! 4. Main framebuffer bind, `before_clear` stage and frame clear
//! 5. `gather_render_targets` stage, then every active camera:
//!    selection, camera render targets, `before_camera_draw`, dispatch,
//!    `after_camera_draw`
//! 6. Intersection checks, `after_render` stage and observers, deferred
//!    disposals
//!
//! A frame without a camera or with a lost context is skipped and reported
//! through [`FrameReport`]; only stage and collaborator errors propagate.
//!
//! # Lockstep
//!
//! | Step | Value |
//! |------|-------|
//! | Available time | `clamp(delta) + accumulator` |
//! | Substeps | `min(floor(available / time_step), max_sub_steps)` |
//! | Accumulator after | `max(available - substeps * time_step, 0)` |

use smallvec::SmallVec;

use super::dispatcher::{DrawPass, RenderingDispatcher};
use super::selector::{ActiveObjectSelector, SelectionPass};
use super::stage::{PointerEvent, PointerKind, StageContext, StageRegistry};
use super::trace::FrameTrace;
use crate::engine::Engine;
use crate::errors::{FrameError, Result};
use crate::gpu::{CacheStats, ClearFlags, ContextStatus, GpuStateCache, ProgramKey, TextureKey};
use crate::scene::{CameraKey, IntersectionEvent, MeshKey, RenderTarget, RenderTargetKey, Scene};
use crate::settings::{DEFAULT_FRAME_TIME_MS, EngineSettings};
use crate::utils::Observable;

// ============================================================================
// Frame State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FramePhase {
    #[default]
    Idle,
    Animating,
    EvaluatingRenderTargets,
    RenderingCameras,
    Presenting,
}

/// Snapshot of the frame counters, handed to stage callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    pub frame_id: u64,
    /// Bumped once per camera and render target pass.
    pub render_id: u64,
    /// Number of fixed substeps executed so far.
    pub step_id: u64,
    pub camera: Option<CameraKey>,
    pub render_target: Option<RenderTargetKey>,
    pub phase: FramePhase,
}

// ============================================================================
// Collaborators
// ============================================================================

/// Advances animations. `ratio` is the step relative to a 60 Hz frame.
pub trait Animator {
    fn animate(&mut self, scene: &mut Scene, delta_ms: f32, ratio: f32) -> Result<()>;
}

/// Advances a physics simulation by one step.
pub trait PhysicsStepper {
    fn step(&mut self, scene: &mut Scene, delta_ms: f32) -> Result<()>;
}

/// Completion of an asynchronous asset operation, delivered through
/// [`FrameScheduler::asset_sender`] and applied on the next frame boundary.
#[derive(Debug, Clone)]
pub enum AssetEvent {
    TextureDecoded { texture: TextureKey, data: Vec<u8> },
    /// Re-polls the link status of a program compiled in parallel.
    ProgramLinked(ProgramKey),
    MeshReady(MeshKey),
}

/// Observer lists notified around the frame.
#[derive(Default)]
pub struct FrameObservers {
    /// Step id, before each fixed substep.
    pub before_step: Observable<u64>,
    /// Step id, after each fixed substep.
    pub after_step: Observable<u64>,
    /// Animation delta in milliseconds.
    pub after_animations: Observable<f32>,
    pub before_render: Observable<FrameInfo>,
    pub after_render: Observable<FrameInfo>,
    pub before_camera_render: Observable<CameraKey>,
    pub after_camera_render: Observable<CameraKey>,
    pub intersections: Observable<IntersectionEvent>,
}

// ============================================================================
// Frame Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoActiveCamera,
    ContextLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    Skipped(SkipReason),
}

/// Summary of one [`FrameScheduler::render`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_id: u64,
    pub outcome: FrameOutcome,
    pub animation_steps: u32,
    /// Dispatched entries that were drawn.
    pub drawn_entries: u32,
    /// Dispatched entries skipped because a resource was still loading.
    pub skipped_entries: u32,
    pub cameras_rendered: u32,
    pub targets_rendered: u32,
    pub cache: CacheStats,
}

impl FrameReport {
    fn new(frame_id: u64, outcome: FrameOutcome) -> Self {
        Self {
            frame_id,
            outcome,
            animation_steps: 0,
            drawn_entries: 0,
            skipped_entries: 0,
            cameras_rendered: 0,
            targets_rendered: 0,
            cache: CacheStats::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_rendered(&self) -> bool {
        self.outcome == FrameOutcome::Rendered
    }
}

// ============================================================================
// FrameScheduler
// ============================================================================

pub struct FrameScheduler {
    settings: EngineSettings,
    stages: StageRegistry,
    observers: FrameObservers,

    selector: ActiveObjectSelector,
    dispatcher: RenderingDispatcher,
    /// Render target passes run while the camera's dispatcher is filled.
    target_selector: ActiveObjectSelector,
    target_dispatcher: RenderingDispatcher,
    trace: FrameTrace,

    animators: Vec<Box<dyn Animator>>,
    physics: Option<Box<dyn PhysicsStepper>>,

    info: FrameInfo,
    accumulator_ms: f32,
    surface: (u32, u32),
    gathered_targets: Vec<RenderTargetKey>,
    cleared_targets: Vec<RenderTargetKey>,
    default_cleared: bool,

    asset_tx: flume::Sender<AssetEvent>,
    asset_rx: flume::Receiver<AssetEvent>,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl FrameScheduler {
    #[must_use]
    pub fn new(mut settings: EngineSettings) -> Self {
        settings.sanitize();
        let (asset_tx, asset_rx) = flume::unbounded();
        Self {
            settings,
            stages: StageRegistry::new(),
            observers: FrameObservers::default(),
            selector: ActiveObjectSelector::new(),
            dispatcher: RenderingDispatcher::new(),
            target_selector: ActiveObjectSelector::new(),
            target_dispatcher: RenderingDispatcher::new(),
            trace: FrameTrace::new(),
            animators: Vec::new(),
            physics: None,
            info: FrameInfo::default(),
            accumulator_ms: 0.0,
            surface: (1, 1),
            gathered_targets: Vec::new(),
            cleared_targets: Vec::new(),
            default_cleared: false,
            asset_tx,
            asset_rx,
        }
    }

    // ========================================================================
    // Configuration & Accessors
    // ========================================================================

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, mut settings: EngineSettings) {
        settings.sanitize();
        self.settings = settings;
    }

    pub fn add_animator(&mut self, animator: Box<dyn Animator>) {
        self.animators.push(animator);
    }

    pub fn set_physics(&mut self, physics: Option<Box<dyn PhysicsStepper>>) {
        self.physics = physics;
    }

    #[must_use]
    pub fn stages(&self) -> &StageRegistry {
        &self.stages
    }

    pub fn stages_mut(&mut self) -> &mut StageRegistry {
        &mut self.stages
    }

    pub fn observers_mut(&mut self) -> &mut FrameObservers {
        &mut self.observers
    }

    #[must_use]
    pub fn selector(&self) -> &ActiveObjectSelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut ActiveObjectSelector {
        &mut self.selector
    }

    /// Dispatcher of the camera passes (rendering orders, auto-clear).
    pub fn dispatcher_mut(&mut self) -> &mut RenderingDispatcher {
        &mut self.dispatcher
    }

    /// Draw records of the last rendered frame.
    #[must_use]
    pub fn trace(&self) -> &FrameTrace {
        &self.trace
    }

    #[inline]
    #[must_use]
    pub fn frame_info(&self) -> FrameInfo {
        self.info
    }

    #[inline]
    #[must_use]
    pub fn phase(&self) -> FramePhase {
        self.info.phase
    }

    /// Lockstep time carried over to the next frame, in milliseconds.
    #[inline]
    #[must_use]
    pub fn accumulator_ms(&self) -> f32 {
        self.accumulator_ms
    }

    /// Sender half of the asset completion channel; clone it into loaders.
    #[must_use]
    pub fn asset_sender(&self) -> flume::Sender<AssetEvent> {
        self.asset_tx.clone()
    }

    pub fn freeze_active_meshes(&mut self, skip_evaluate: bool) {
        self.selector.freeze(skip_evaluate);
    }

    pub fn unfreeze_active_meshes(&mut self) {
        self.selector.unfreeze();
    }

    // ========================================================================
    // Animation
    // ========================================================================

    /// Runs the animation phase for a measured frame delta. Returns the
    /// number of animation steps executed.
    pub fn animate(&mut self, scene: &mut Scene, delta_ms: f32) -> Result<u32> {
        let lockstep = self.settings.lockstep;
        if !lockstep.enabled {
            let delta = lockstep.clamp_delta(delta_ms);
            self.run_animators(scene, delta, delta / DEFAULT_FRAME_TIME_MS)?;
            self.observers.after_animations.notify(&delta);
            if let Some(physics) = self.physics.as_mut() {
                physics.step(scene, delta)?;
            }
            return Ok(1);
        }

        let step = lockstep.time_step_ms;
        let mut remaining = lockstep.clamp_delta(delta_ms) + self.accumulator_ms;
        let internal_steps = ((remaining / step).floor() as u32).min(lockstep.max_sub_steps);
        let mut taken = 0;
        while remaining > 0.0 && taken < internal_steps {
            self.observers.before_step.notify(&self.info.step_id);
            self.run_animators(scene, step, step / DEFAULT_FRAME_TIME_MS)?;
            self.observers.after_animations.notify(&step);
            if let Some(physics) = self.physics.as_mut() {
                physics.step(scene, step)?;
            }
            self.observers.after_step.notify(&self.info.step_id);
            self.info.step_id += 1;
            taken += 1;
            remaining -= step;
        }
        self.accumulator_ms = remaining.max(0.0);
        Ok(taken)
    }

    fn run_animators(&mut self, scene: &mut Scene, delta_ms: f32, ratio: f32) -> Result<()> {
        if !self.settings.rendering.animations_enabled {
            return Ok(());
        }
        for animator in &mut self.animators {
            animator.animate(scene, delta_ms, ratio)?;
        }
        Ok(())
    }

    // ========================================================================
    // Asset Completions & Readiness
    // ========================================================================

    /// Applies every pending [`AssetEvent`]. Returns the number applied.
    pub fn process_asset_events(&mut self, gpu: &mut GpuStateCache, scene: &mut Scene) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.asset_rx.try_recv() {
            applied += 1;
            match event {
                AssetEvent::TextureDecoded { texture, data } => {
                    if let Err(err) = gpu.update_texture(texture, data) {
                        log::warn!("Dropping decoded texture: {err}");
                    }
                }
                AssetEvent::ProgramLinked(program) => {
                    if !gpu.is_program_ready(program) {
                        log::trace!("Program {program:?} reported linked but is not ready yet");
                    }
                }
                AssetEvent::MeshReady(mesh) => {
                    if let Some(drawable) = scene.mesh_mut(mesh) {
                        drawable.ready = true;
                    }
                }
            }
        }
        applied
    }

    /// Whether every enabled drawable, its materials and the
    /// `is_ready_for_mesh` stage report ready. Never blocks.
    pub fn is_ready(&mut self, gpu: &mut GpuStateCache, scene: &mut Scene) -> Result<bool> {
        let instanced_arrays = gpu.capabilities().instanced_arrays;
        for key in scene.mesh_keys().to_vec() {
            let Some(mesh) = scene.mesh(key) else {
                continue;
            };
            if !scene.is_enabled(key) || mesh.sub_meshes().is_empty() {
                continue;
            }
            if !mesh.ready {
                return Ok(false);
            }
            let hardware_instancing =
                mesh.has_thin_instances() || mesh.is_instance() || (instanced_arrays && mesh.has_instances());
            let sub_mesh_count = mesh.sub_meshes().len();

            let mut ctx = StageContext::new(scene, gpu, self.info);
            let ready = self
                .stages
                .run(&mut ctx, |stages, ctx| stages.is_ready_for_mesh.run(ctx, key, hardware_instancing))?;
            if !ready {
                return Ok(false);
            }

            for index in 0..sub_mesh_count {
                let Some(material) = scene.effective_material(key, index) else {
                    continue;
                };
                if !scene.materials.get_mut(material).is_some_and(|material| material.is_ready(gpu)) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Pointer
    // ========================================================================

    /// Runs the pointer stage matching `event`. Returns the picked mesh.
    pub fn simulate_pointer(
        &mut self,
        gpu: &mut GpuStateCache,
        scene: &mut Scene,
        event: &PointerEvent,
    ) -> Result<Option<MeshKey>> {
        let mut ctx = StageContext::new(scene, gpu, self.info);
        self.stages.run(&mut ctx, |stages, ctx| match event.kind {
            PointerKind::Move => stages.pointer_move.run(ctx, event),
            PointerKind::Down => stages.pointer_down.run(ctx, event),
            PointerKind::Up => stages.pointer_up.run(ctx, event),
        })
    }

    // ========================================================================
    // Render
    // ========================================================================

    /// Animates and renders one frame of `scene`.
    pub fn render(&mut self, engine: &mut Engine, scene: &mut Scene) -> Result<FrameReport> {
        if self.info.phase != FramePhase::Idle {
            return Err(FrameError::FrameInProgress);
        }

        let cameras: SmallVec<[CameraKey; 4]> = if scene.active_cameras.is_empty() {
            scene.active_camera.filter(|key| scene.camera(*key).is_some()).into_iter().collect()
        } else {
            scene.active_cameras.iter().copied().filter(|key| scene.camera(*key).is_some()).collect()
        };
        if cameras.is_empty() {
            log::error!("No camera defined for scene '{}', frame skipped", scene.name);
            return Ok(FrameReport::new(
                self.info.frame_id,
                FrameOutcome::Skipped(SkipReason::NoActiveCamera),
            ));
        }

        self.surface = engine.surface_size();
        let delta_ms = engine.timer().dt_millis();
        let gpu = engine.gpu_mut();

        match gpu.poll_context() {
            ContextStatus::Lost => {
                log::warn!("Graphics context lost, frame skipped");
                let mut report = FrameReport::new(self.info.frame_id, FrameOutcome::Skipped(SkipReason::ContextLost));
                report.cache = gpu.take_stats();
                return Ok(report);
            }
            ContextStatus::Restored => self.rebuild(gpu, scene)?,
            ContextStatus::Healthy => {}
        }
        self.process_asset_events(gpu, scene);

        let result = self.render_frame(gpu, scene, delta_ms, &cameras);
        self.info.phase = FramePhase::Idle;
        self.info.camera = None;
        self.info.render_target = None;
        result
    }

    fn rebuild(&mut self, gpu: &mut GpuStateCache, scene: &mut Scene) -> Result<()> {
        gpu.rebuild();
        let geometries = scene.rebuild(gpu);
        log::info!("Scene '{}' rebuilt after context loss ({geometries} geometries)", scene.name);
        let mut ctx = StageContext::new(scene, gpu, self.info);
        self.stages.run(&mut ctx, |stages, ctx| stages.rebuild_geometry.run(ctx))
    }

    fn render_frame(
        &mut self,
        gpu: &mut GpuStateCache,
        scene: &mut Scene,
        delta_ms: f32,
        cameras: &[CameraKey],
    ) -> Result<FrameReport> {
        self.info.frame_id += 1;
        self.info.phase = FramePhase::Animating;
        self.trace.begin_frame(self.info.frame_id);
        self.gathered_targets.clear();
        self.cleared_targets.clear();
        self.default_cleared = false;

        let mut report = FrameReport::new(self.info.frame_id, FrameOutcome::Rendered);
        report.animation_steps = self.animate(scene, delta_ms)?;
        scene.pin_instance_batches(self.selector.is_frozen().then_some(self.dispatcher.render_id()));

        let multi_camera = !scene.active_cameras.is_empty();
        let current_camera = scene.active_camera.filter(|key| cameras.contains(key)).unwrap_or(cameras[0]);

        let mut ctx = StageContext::new(scene, gpu, self.info);
        self.stages.run(&mut ctx, |stages, ctx| stages.before_camera_update.run(ctx))?;
        for &camera in cameras {
            update_camera(ctx.scene, camera);
        }

        self.observers.before_render.notify(&self.info);

        // Custom render targets
        if self.settings.rendering.render_targets_enabled && !ctx.scene.custom_render_targets.is_empty() {
            self.info.phase = FramePhase::EvaluatingRenderTargets;
            ctx.frame = self.info;
            for target in ctx.scene.custom_render_targets.clone() {
                if !ctx.scene.render_target_mut(target).is_some_and(RenderTarget::should_render) {
                    continue;
                }
                self.info.render_id += 1;
                self.render_target_pass(&mut ctx, target, current_camera, &mut report)?;
            }
            self.info.render_id += 1;
        }

        // Main framebuffer
        self.info.phase = FramePhase::RenderingCameras;
        ctx.frame = self.info;
        self.bind_camera_framebuffer(&mut ctx, current_camera);
        self.clear_frame_buffer(&mut ctx, current_camera)?;

        let mut gathered = std::mem::take(&mut self.gathered_targets);
        self.stages.run(&mut ctx, |stages, ctx| stages.gather_render_targets.run(ctx, &mut gathered))?;
        self.gathered_targets = gathered;

        if multi_camera {
            for (index, &camera) in cameras.iter().enumerate() {
                self.process_sub_cameras(&mut ctx, camera, index > 0, &mut report)?;
            }
        } else {
            let bind = ctx.scene.camera(current_camera).is_some_and(|camera| camera.output_render_target.is_some());
            self.process_sub_cameras(&mut ctx, current_camera, bind, &mut report)?;
        }

        // Present
        self.info.phase = FramePhase::Presenting;
        self.info.camera = None;
        ctx.frame = self.info;
        for event in ctx.scene.check_intersections() {
            self.observers.intersections.notify(&event);
        }
        self.stages.run(&mut ctx, |stages, ctx| stages.after_render.run(ctx))?;
        self.observers.after_render.notify(&self.info);

        let disposed = ctx.scene.flush_disposals(ctx.gpu);
        if disposed > 0 {
            log::debug!("Disposed {disposed} queued resources");
        }
        report.cache = ctx.gpu.take_stats();
        Ok(report)
    }

    // ─── Cameras ───

    fn process_sub_cameras(
        &mut self,
        ctx: &mut StageContext<'_>,
        camera: CameraKey,
        bind: bool,
        report: &mut FrameReport,
    ) -> Result<()> {
        let rig: SmallVec<[CameraKey; 2]> = ctx
            .scene
            .camera(camera)
            .map(|data| data.rig_cameras.iter().copied().collect())
            .unwrap_or_default();
        if rig.is_empty() {
            self.render_for_camera(ctx, camera, None, bind, report)?;
        } else {
            for sub_camera in rig {
                self.render_for_camera(ctx, sub_camera, Some(camera), bind, report)?;
            }
        }
        self.observers.after_camera_render.notify(&camera);
        Ok(())
    }

    fn render_for_camera(
        &mut self,
        ctx: &mut StageContext<'_>,
        camera: CameraKey,
        rig_parent: Option<CameraKey>,
        bind: bool,
        report: &mut FrameReport,
    ) -> Result<()> {
        if ctx.scene.camera(camera).is_none() {
            log::warn!("Camera {camera:?} no longer exists, skipped");
            return Ok(());
        }
        self.observers.before_camera_render.notify(&camera);
        self.info.render_id += 1;
        self.info.camera = Some(camera);
        self.info.phase = FramePhase::RenderingCameras;
        ctx.frame = self.info;

        self.bind_camera_framebuffer(ctx, camera);
        if bind {
            self.clear_frame_buffer(ctx, camera)?;
        }

        let pass = SelectionPass {
            camera,
            render_id: self.info.render_id,
            render_list: None,
            check_frustum: true,
        };
        self.selector.evaluate(&mut self.stages, ctx, &mut self.dispatcher, &pass)?;

        // Render targets of this camera
        let mut targets = std::mem::take(&mut self.gathered_targets);
        extend_unique(&mut targets, self.selector.render_targets());
        if let Some(data) = ctx.scene.camera(camera) {
            extend_unique(&mut targets, &data.custom_render_targets);
        }
        if let Some(parent) = rig_parent.and_then(|key| ctx.scene.camera(key)) {
            extend_unique(&mut targets, &parent.custom_render_targets);
        }
        self.stages.run(ctx, |stages, ctx| {
            stages.gather_active_camera_render_targets.run(ctx, camera, &mut targets)
        })?;

        let mut need_rebind = false;
        if self.settings.rendering.render_targets_enabled {
            let mut unique = Vec::with_capacity(targets.len());
            extend_unique(&mut unique, &targets);
            if !unique.is_empty() {
                self.info.phase = FramePhase::EvaluatingRenderTargets;
                for target in unique {
                    if !ctx.scene.render_target_mut(target).is_some_and(RenderTarget::should_render) {
                        continue;
                    }
                    self.info.render_id += 1;
                    self.render_target_pass(ctx, target, camera, report)?;
                    need_rebind = true;
                }
                self.info.render_id += 1;
                self.info.phase = FramePhase::RenderingCameras;
                ctx.frame = self.info;
            }
            need_rebind |= self
                .stages
                .run(ctx, |stages, ctx| stages.camera_draw_render_target.run(ctx, camera))?;
        }
        if need_rebind {
            self.bind_camera_framebuffer(ctx, camera);
        }

        if self.stages.run(ctx, |stages, ctx| stages.before_camera_draw.run(ctx, camera))? {
            self.bind_camera_framebuffer(ctx, camera);
        }

        if let Some(data) = ctx.scene.camera(camera) {
            let draw = DrawPass::new(self.info.frame_id, camera, data, None);
            let stats = self.dispatcher.render(&mut self.stages, ctx, &draw, &mut self.trace)?;
            report.drawn_entries += stats.drawn;
            report.skipped_entries += stats.skipped;
        }

        if self.stages.run(ctx, |stages, ctx| stages.after_camera_draw.run(ctx, camera))? {
            self.bind_camera_framebuffer(ctx, camera);
        }
        report.cameras_rendered += 1;
        Ok(())
    }

    /// Binds the camera's output target (or the default framebuffer) and
    /// applies its viewport.
    fn bind_camera_framebuffer(&self, ctx: &mut StageContext<'_>, camera: CameraKey) {
        let Some(data) = ctx.scene.camera(camera) else {
            return;
        };
        let output = data.output_render_target.and_then(|key| ctx.scene.render_target(key));
        let (framebuffer, (width, height)) = match output {
            Some(target) => (Some(target.framebuffer()), target.size()),
            None => (None, self.surface),
        };
        let viewport = data.viewport.to_pixels(width, height);
        ctx.gpu.bind_framebuffer(framebuffer, false);
        ctx.gpu.set_viewport(viewport, false);
    }

    /// The first clear of the default framebuffer per frame honours the
    /// scene's auto-clear flags; later ones clear depth and stencil only.
    fn clear_frame_buffer(&mut self, ctx: &mut StageContext<'_>, camera: CameraKey) -> Result<()> {
        let output = ctx
            .scene
            .camera(camera)
            .and_then(|data| data.output_render_target)
            .filter(|key| ctx.scene.render_target(*key).is_some());

        if let Some(target) = output {
            if ctx.scene.auto_clear {
                let first = !self.cleared_targets.contains(&target);
                if first {
                    self.cleared_targets.push(target);
                }
                let color = ctx.scene.render_target(target).map_or(ctx.scene.clear_color, |data| data.clear_color);
                let mut flags = ClearFlags::DEPTH_STENCIL;
                flags.set(ClearFlags::COLOR, first);
                ctx.gpu.clear(flags, color);
            }
            return Ok(());
        }

        if self.default_cleared {
            ctx.gpu.clear(ClearFlags::DEPTH_STENCIL, ctx.scene.clear_color);
            return Ok(());
        }
        self.default_cleared = true;
        self.stages.run(ctx, |stages, ctx| stages.before_clear.run(ctx))?;

        let mut flags = ClearFlags::empty();
        flags.set(ClearFlags::COLOR, ctx.scene.auto_clear);
        flags.set(ClearFlags::DEPTH_STENCIL, ctx.scene.auto_clear_depth_and_stencil);
        ctx.gpu.clear(flags, ctx.scene.clear_color);
        Ok(())
    }

    // ─── Render Targets ───

    fn render_target_pass(
        &mut self,
        ctx: &mut StageContext<'_>,
        target: RenderTargetKey,
        fallback_camera: CameraKey,
        report: &mut FrameReport,
    ) -> Result<()> {
        let Some(data) = ctx.scene.render_target(target) else {
            return Ok(());
        };
        let own_camera = data.camera.filter(|key| ctx.scene.camera(*key).is_some());
        let camera = own_camera.unwrap_or(fallback_camera);
        let render_list = data.render_list.clone();
        let (framebuffer, viewport, clear_color) = (data.framebuffer(), data.viewport(), data.clear_color);

        if let Some(own_camera) = own_camera {
            update_camera(ctx.scene, own_camera);
        }

        let previous = self.info.render_target;
        self.info.render_target = Some(target);
        ctx.frame = self.info;

        ctx.gpu.bind_framebuffer(Some(framebuffer), false);
        ctx.gpu.set_viewport(viewport, false);
        ctx.gpu.clear(ClearFlags::all(), clear_color);

        let pass = SelectionPass {
            camera,
            render_id: self.info.render_id,
            render_list: render_list.as_deref(),
            check_frustum: own_camera.is_some(),
        };
        self.target_selector
            .evaluate(&mut self.stages, ctx, &mut self.target_dispatcher, &pass)?;

        self.stages.run(ctx, |stages, ctx| stages.before_render_target_draw.run(ctx, target))?;
        if let Some(data) = ctx.scene.camera(camera) {
            let draw = DrawPass::new(self.info.frame_id, camera, data, Some(target));
            let stats = self.target_dispatcher.render(&mut self.stages, ctx, &draw, &mut self.trace)?;
            report.drawn_entries += stats.drawn;
            report.skipped_entries += stats.skipped;
        }
        self.stages.run(ctx, |stages, ctx| stages.after_render_target_draw.run(ctx, target))?;

        if let Some(data) = ctx.scene.render_target_mut(target) {
            data.mark_rendered();
        }
        report.targets_rendered += 1;
        log::trace!("Render target {target:?} rendered with camera {camera:?}");

        self.info.render_target = previous;
        ctx.frame = self.info;
        Ok(())
    }
}

/// Updates `camera` and its rig cameras.
fn update_camera(scene: &mut Scene, camera: CameraKey) {
    let rig = match scene.camera_mut(camera) {
        Some(data) => {
            data.update();
            data.rig_cameras.clone()
        }
        None => return,
    };
    for sub_camera in rig {
        if let Some(data) = scene.camera_mut(sub_camera) {
            data.update();
        }
    }
}

fn extend_unique(targets: &mut Vec<RenderTargetKey>, more: &[RenderTargetKey]) {
    for target in more {
        if !targets.contains(target) {
            targets.push(*target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn free_running_mode_runs_one_step() {
        let mut scheduler = FrameScheduler::default();
        let mut scene = Scene::new();
        assert_eq!(scheduler.animate(&mut scene, 40.0).unwrap(), 1);
        assert!(scheduler.accumulator_ms().abs() < f32::EPSILON);
    }

    #[test]
    fn lockstep_carries_partial_steps() {
        let mut settings = EngineSettings::default();
        settings.lockstep.enabled = true;
        settings.lockstep.time_step_ms = 10.0;
        let mut scheduler = FrameScheduler::new(settings);
        let mut scene = Scene::new();

        assert_eq!(scheduler.animate(&mut scene, 25.0).unwrap(), 2);
        assert!((scheduler.accumulator_ms() - 5.0).abs() < 1e-4);

        // 5 carried + 5 measured = one full step
        assert_eq!(scheduler.animate(&mut scene, 5.0).unwrap(), 1);
        assert!(scheduler.accumulator_ms().abs() < 1e-4);
        assert_eq!(scheduler.frame_info().step_id, 3);
    }

    struct Ratios(Rc<RefCell<Vec<f32>>>);

    impl Animator for Ratios {
        fn animate(&mut self, _scene: &mut Scene, _delta_ms: f32, ratio: f32) -> Result<()> {
            self.0.borrow_mut().push(ratio);
            Ok(())
        }
    }

    #[test]
    fn lockstep_ratio_scales_with_time_step() {
        let mut settings = EngineSettings::default();
        settings.lockstep.enabled = true;
        settings.lockstep.time_step_ms = 10.0;
        let mut scheduler = FrameScheduler::new(settings);
        let ratios = Rc::new(RefCell::new(Vec::new()));
        scheduler.add_animator(Box::new(Ratios(Rc::clone(&ratios))));

        assert_eq!(scheduler.animate(&mut Scene::new(), 20.0).unwrap(), 2);
        let ratios = ratios.borrow();
        assert_eq!(ratios.len(), 2);
        assert!(ratios.iter().all(|ratio| (ratio - 0.6).abs() < 1e-4));
    }

    #[test]
    fn free_running_ratio_is_relative_to_sixty_hertz() {
        let mut scheduler = FrameScheduler::default();
        let ratios = Rc::new(RefCell::new(Vec::new()));
        scheduler.add_animator(Box::new(Ratios(Rc::clone(&ratios))));

        scheduler.animate(&mut Scene::new(), 2.0 * DEFAULT_FRAME_TIME_MS).unwrap();
        assert_eq!(ratios.borrow().len(), 1);
        assert!((ratios.borrow()[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn disabled_animations_still_notify() {
        let mut settings = EngineSettings::default();
        settings.rendering.animations_enabled = false;
        let mut scheduler = FrameScheduler::new(settings);

        struct Counting(Rc<Cell<u32>>);
        impl Animator for Counting {
            fn animate(&mut self, _scene: &mut Scene, _delta_ms: f32, _ratio: f32) -> Result<()> {
                self.0.set(self.0.get() + 1);
                Ok(())
            }
        }
        let animated = Rc::new(Cell::new(0));
        scheduler.add_animator(Box::new(Counting(Rc::clone(&animated))));
        let notified = Rc::new(Cell::new(0));
        {
            let notified = Rc::clone(&notified);
            scheduler.observers_mut().after_animations.add(move |_| notified.set(notified.get() + 1));
        }

        scheduler.animate(&mut Scene::new(), 16.0).unwrap();
        assert_eq!(animated.get(), 0);
        assert_eq!(notified.get(), 1);
    }
}
