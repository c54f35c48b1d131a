//! Extension Stages
//!
//! Collaborators (shadow generators, post-process managers, octrees, ...)
//! inject work into the frame by registering callbacks at fixed pipeline
//! points. Every point has its own strongly typed [`Stage`]:
//!
//! | Point | Arguments | Reduction |
//! |-------|-----------|-----------|
//! | `before_camera_update`, `before_clear`, `after_render`, `rebuild_geometry` | - | - |
//! | `gather_render_targets` | target list | - |
//! | `gather_active_camera_render_targets` | camera, target list | - |
//! | `is_ready_for_mesh` | mesh, hardware instancing | AND |
//! | `before_evaluate_active_mesh`, `active_mesh` | mesh | - |
//! | `evaluate_sub_mesh`, `before/after_rendering_mesh` | mesh, sub-mesh | - |
//! | `camera_draw_render_target`, `before/after_camera_draw` | camera | OR (rebind) |
//! | `before/after_render_target_draw` | render target | - |
//! | `before/after_rendering_group_draw` | group id | - |
//! | `pointer_move/down/up` | pointer event | first pick |
//!
//! Callbacks run strictly in registration order and share one
//! [`StageContext`]. A callback may unregister steps through
//! [`StageContext::unregister`]; the removal is applied once the running
//! stage completes. An error stops the stage and propagates unchanged.

use crate::errors::Result;
use crate::gpu::GpuStateCache;
use crate::render::scheduler::FrameInfo;
use crate::scene::{CameraKey, MeshKey, RenderTargetKey, Scene};

// ============================================================================
// Stage Points
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagePoint {
    BeforeCameraUpdate,
    BeforeClear,
    GatherRenderTargets,
    GatherActiveCameraRenderTargets,
    IsReadyForMesh,
    BeforeEvaluateActiveMesh,
    EvaluateSubMesh,
    ActiveMesh,
    CameraDrawRenderTarget,
    BeforeCameraDraw,
    BeforeRenderTargetDraw,
    BeforeRenderingGroupDraw,
    BeforeRenderingMesh,
    AfterRenderingMesh,
    AfterRenderingGroupDraw,
    AfterCameraDraw,
    AfterRenderTargetDraw,
    AfterRender,
    PointerMove,
    PointerDown,
    PointerUp,
    RebuildGeometry,
}

impl StagePoint {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::BeforeCameraUpdate => "before_camera_update",
            Self::BeforeClear => "before_clear",
            Self::GatherRenderTargets => "gather_render_targets",
            Self::GatherActiveCameraRenderTargets => "gather_active_camera_render_targets",
            Self::IsReadyForMesh => "is_ready_for_mesh",
            Self::BeforeEvaluateActiveMesh => "before_evaluate_active_mesh",
            Self::EvaluateSubMesh => "evaluate_sub_mesh",
            Self::ActiveMesh => "active_mesh",
            Self::CameraDrawRenderTarget => "camera_draw_render_target",
            Self::BeforeCameraDraw => "before_camera_draw",
            Self::BeforeRenderTargetDraw => "before_render_target_draw",
            Self::BeforeRenderingGroupDraw => "before_rendering_group_draw",
            Self::BeforeRenderingMesh => "before_rendering_mesh",
            Self::AfterRenderingMesh => "after_rendering_mesh",
            Self::AfterRenderingGroupDraw => "after_rendering_group_draw",
            Self::AfterCameraDraw => "after_camera_draw",
            Self::AfterRenderTargetDraw => "after_render_target_draw",
            Self::AfterRender => "after_render",
            Self::PointerMove => "pointer_move",
            Self::PointerDown => "pointer_down",
            Self::PointerUp => "pointer_up",
            Self::RebuildGeometry => "rebuild_geometry",
        }
    }
}

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId {
    pub point: StagePoint,
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Move,
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub x: f32,
    pub y: f32,
    pub button: u8,
}

// ============================================================================
// Stage Context
// ============================================================================

/// Per-frame state handed to every callback.
pub struct StageContext<'a> {
    pub scene: &'a mut Scene,
    pub gpu: &'a mut GpuStateCache,
    pub frame: FrameInfo,
    removals: Vec<StepId>,
}

impl<'a> StageContext<'a> {
    pub fn new(scene: &'a mut Scene, gpu: &'a mut GpuStateCache, frame: FrameInfo) -> Self {
        Self {
            scene,
            gpu,
            frame,
            removals: Vec::new(),
        }
    }

    /// Requests removal of a step once the running stage completes.
    pub fn unregister(&mut self, id: StepId) {
        if !self.removals.contains(&id) {
            self.removals.push(id);
        }
    }
}

// ============================================================================
// Stage
// ============================================================================

pub type SceneStep = dyn FnMut(&mut StageContext<'_>) -> Result<()>;
pub type CameraFlagStep = dyn FnMut(&mut StageContext<'_>, CameraKey) -> Result<bool>;
pub type GatherTargetsStep = dyn FnMut(&mut StageContext<'_>, &mut Vec<RenderTargetKey>) -> Result<()>;
pub type GatherCameraTargetsStep =
    dyn FnMut(&mut StageContext<'_>, CameraKey, &mut Vec<RenderTargetKey>) -> Result<()>;
pub type MeshReadyStep = dyn FnMut(&mut StageContext<'_>, MeshKey, bool) -> Result<bool>;
pub type MeshStep = dyn FnMut(&mut StageContext<'_>, MeshKey) -> Result<()>;
pub type SubMeshStep = dyn FnMut(&mut StageContext<'_>, MeshKey, usize) -> Result<()>;
pub type RenderTargetStep = dyn FnMut(&mut StageContext<'_>, RenderTargetKey) -> Result<()>;
pub type GroupStep = dyn FnMut(&mut StageContext<'_>, u8) -> Result<()>;
pub type PointerStep = dyn FnMut(&mut StageContext<'_>, &PointerEvent) -> Result<Option<MeshKey>>;

struct Step<F: ?Sized> {
    id: StepId,
    component: &'static str,
    callback: Box<F>,
}

/// Ordered callbacks of one pipeline point.
pub struct Stage<F: ?Sized> {
    point: StagePoint,
    next_seq: u64,
    steps: Vec<Step<F>>,
}

impl<F: ?Sized> Stage<F> {
    fn new(point: StagePoint) -> Self {
        Self {
            point,
            next_seq: 0,
            steps: Vec::new(),
        }
    }

    /// Appends a callback owned by `component`.
    pub fn register(&mut self, component: &'static str, callback: Box<F>) -> StepId {
        self.next_seq += 1;
        let id = StepId {
            point: self.point,
            seq: self.next_seq,
        };
        self.steps.push(Step {
            id,
            component,
            callback,
        });
        id
    }

    pub fn remove(&mut self, id: StepId) -> bool {
        let before = self.steps.len();
        self.steps.retain(|step| step.id != id);
        self.steps.len() != before
    }

    #[inline]
    #[must_use]
    pub fn point(&self) -> StagePoint {
        self.point
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Owner components in registration order.
    pub fn components(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|step| step.component)
    }
}

impl Stage<SceneStep> {
    pub fn run(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        for step in &mut self.steps {
            (step.callback)(ctx)?;
        }
        Ok(())
    }
}

impl Stage<CameraFlagStep> {
    /// Runs every callback; returns whether any asked for a rebind.
    pub fn run(&mut self, ctx: &mut StageContext<'_>, camera: CameraKey) -> Result<bool> {
        let mut any = false;
        for step in &mut self.steps {
            any |= (step.callback)(ctx, camera)?;
        }
        Ok(any)
    }
}

impl Stage<GatherTargetsStep> {
    pub fn run(&mut self, ctx: &mut StageContext<'_>, targets: &mut Vec<RenderTargetKey>) -> Result<()> {
        for step in &mut self.steps {
            (step.callback)(ctx, targets)?;
        }
        Ok(())
    }
}

impl Stage<GatherCameraTargetsStep> {
    pub fn run(
        &mut self,
        ctx: &mut StageContext<'_>,
        camera: CameraKey,
        targets: &mut Vec<RenderTargetKey>,
    ) -> Result<()> {
        for step in &mut self.steps {
            (step.callback)(ctx, camera, targets)?;
        }
        Ok(())
    }
}

impl Stage<MeshReadyStep> {
    /// Stops at the first callback reporting "not ready".
    pub fn run(&mut self, ctx: &mut StageContext<'_>, mesh: MeshKey, hardware_instancing: bool) -> Result<bool> {
        for step in &mut self.steps {
            if !(step.callback)(ctx, mesh, hardware_instancing)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Stage<MeshStep> {
    pub fn run(&mut self, ctx: &mut StageContext<'_>, mesh: MeshKey) -> Result<()> {
        for step in &mut self.steps {
            (step.callback)(ctx, mesh)?;
        }
        Ok(())
    }
}

impl Stage<SubMeshStep> {
    pub fn run(&mut self, ctx: &mut StageContext<'_>, mesh: MeshKey, sub_mesh: usize) -> Result<()> {
        for step in &mut self.steps {
            (step.callback)(ctx, mesh, sub_mesh)?;
        }
        Ok(())
    }
}

impl Stage<RenderTargetStep> {
    pub fn run(&mut self, ctx: &mut StageContext<'_>, target: RenderTargetKey) -> Result<()> {
        for step in &mut self.steps {
            (step.callback)(ctx, target)?;
        }
        Ok(())
    }
}

impl Stage<GroupStep> {
    pub fn run(&mut self, ctx: &mut StageContext<'_>, group: u8) -> Result<()> {
        for step in &mut self.steps {
            (step.callback)(ctx, group)?;
        }
        Ok(())
    }
}

impl Stage<PointerStep> {
    /// Runs every callback; the first picked mesh wins.
    pub fn run(&mut self, ctx: &mut StageContext<'_>, event: &PointerEvent) -> Result<Option<MeshKey>> {
        let mut picked = None;
        for step in &mut self.steps {
            let result = (step.callback)(ctx, event)?;
            picked = picked.or(result);
        }
        Ok(picked)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One typed stage per pipeline point.
pub struct StageRegistry {
    pub before_camera_update: Stage<SceneStep>,
    pub before_clear: Stage<SceneStep>,
    pub gather_render_targets: Stage<GatherTargetsStep>,
    pub gather_active_camera_render_targets: Stage<GatherCameraTargetsStep>,
    pub is_ready_for_mesh: Stage<MeshReadyStep>,
    pub before_evaluate_active_mesh: Stage<MeshStep>,
    pub evaluate_sub_mesh: Stage<SubMeshStep>,
    pub active_mesh: Stage<MeshStep>,
    pub camera_draw_render_target: Stage<CameraFlagStep>,
    pub before_camera_draw: Stage<CameraFlagStep>,
    pub before_render_target_draw: Stage<RenderTargetStep>,
    pub before_rendering_group_draw: Stage<GroupStep>,
    pub before_rendering_mesh: Stage<SubMeshStep>,
    pub after_rendering_mesh: Stage<SubMeshStep>,
    pub after_rendering_group_draw: Stage<GroupStep>,
    pub after_camera_draw: Stage<CameraFlagStep>,
    pub after_render_target_draw: Stage<RenderTargetStep>,
    pub after_render: Stage<SceneStep>,
    pub pointer_move: Stage<PointerStep>,
    pub pointer_down: Stage<PointerStep>,
    pub pointer_up: Stage<PointerStep>,
    pub rebuild_geometry: Stage<SceneStep>,

    components: Vec<&'static str>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            before_camera_update: Stage::new(StagePoint::BeforeCameraUpdate),
            before_clear: Stage::new(StagePoint::BeforeClear),
            gather_render_targets: Stage::new(StagePoint::GatherRenderTargets),
            gather_active_camera_render_targets: Stage::new(StagePoint::GatherActiveCameraRenderTargets),
            is_ready_for_mesh: Stage::new(StagePoint::IsReadyForMesh),
            before_evaluate_active_mesh: Stage::new(StagePoint::BeforeEvaluateActiveMesh),
            evaluate_sub_mesh: Stage::new(StagePoint::EvaluateSubMesh),
            active_mesh: Stage::new(StagePoint::ActiveMesh),
            camera_draw_render_target: Stage::new(StagePoint::CameraDrawRenderTarget),
            before_camera_draw: Stage::new(StagePoint::BeforeCameraDraw),
            before_render_target_draw: Stage::new(StagePoint::BeforeRenderTargetDraw),
            before_rendering_group_draw: Stage::new(StagePoint::BeforeRenderingGroupDraw),
            before_rendering_mesh: Stage::new(StagePoint::BeforeRenderingMesh),
            after_rendering_mesh: Stage::new(StagePoint::AfterRenderingMesh),
            after_rendering_group_draw: Stage::new(StagePoint::AfterRenderingGroupDraw),
            after_camera_draw: Stage::new(StagePoint::AfterCameraDraw),
            after_render_target_draw: Stage::new(StagePoint::AfterRenderTargetDraw),
            after_render: Stage::new(StagePoint::AfterRender),
            pointer_move: Stage::new(StagePoint::PointerMove),
            pointer_down: Stage::new(StagePoint::PointerDown),
            pointer_up: Stage::new(StagePoint::PointerUp),
            rebuild_geometry: Stage::new(StagePoint::RebuildGeometry),
            components: Vec::new(),
        }
    }

    /// Runs `f` against the registry, then applies the removals requested
    /// through `ctx`, even when `f` failed.
    pub fn run<R>(
        &mut self,
        ctx: &mut StageContext<'_>,
        f: impl FnOnce(&mut Self, &mut StageContext<'_>) -> Result<R>,
    ) -> Result<R> {
        let result = f(self, ctx);
        for id in std::mem::take(&mut ctx.removals) {
            self.unregister(id);
        }
        result
    }

    /// Removes a step immediately. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: StepId) -> bool {
        match id.point {
            StagePoint::BeforeCameraUpdate => self.before_camera_update.remove(id),
            StagePoint::BeforeClear => self.before_clear.remove(id),
            StagePoint::GatherRenderTargets => self.gather_render_targets.remove(id),
            StagePoint::GatherActiveCameraRenderTargets => self.gather_active_camera_render_targets.remove(id),
            StagePoint::IsReadyForMesh => self.is_ready_for_mesh.remove(id),
            StagePoint::BeforeEvaluateActiveMesh => self.before_evaluate_active_mesh.remove(id),
            StagePoint::EvaluateSubMesh => self.evaluate_sub_mesh.remove(id),
            StagePoint::ActiveMesh => self.active_mesh.remove(id),
            StagePoint::CameraDrawRenderTarget => self.camera_draw_render_target.remove(id),
            StagePoint::BeforeCameraDraw => self.before_camera_draw.remove(id),
            StagePoint::BeforeRenderTargetDraw => self.before_render_target_draw.remove(id),
            StagePoint::BeforeRenderingGroupDraw => self.before_rendering_group_draw.remove(id),
            StagePoint::BeforeRenderingMesh => self.before_rendering_mesh.remove(id),
            StagePoint::AfterRenderingMesh => self.after_rendering_mesh.remove(id),
            StagePoint::AfterRenderingGroupDraw => self.after_rendering_group_draw.remove(id),
            StagePoint::AfterCameraDraw => self.after_camera_draw.remove(id),
            StagePoint::AfterRenderTargetDraw => self.after_render_target_draw.remove(id),
            StagePoint::AfterRender => self.after_render.remove(id),
            StagePoint::PointerMove => self.pointer_move.remove(id),
            StagePoint::PointerDown => self.pointer_down.remove(id),
            StagePoint::PointerUp => self.pointer_up.remove(id),
            StagePoint::RebuildGeometry => self.rebuild_geometry.remove(id),
        }
    }

    /// Registers component `name` on first use by running `setup`.
    /// Returns `false` if the component was already registered.
    pub fn ensure_component(&mut self, name: &'static str, setup: impl FnOnce(&mut Self)) -> bool {
        if self.has_component(name) {
            return false;
        }
        self.components.push(name);
        log::debug!("Registered scene component '{name}'");
        setup(self);
        true
    }

    #[must_use]
    pub fn has_component(&self, name: &str) -> bool {
        self.components.iter().any(|component| *component == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_ids_are_unique_per_point() {
        let mut registry = StageRegistry::new();
        let a = registry.before_clear.register("a", Box::new(|_| Ok(())));
        let b = registry.after_render.register("b", Box::new(|_| Ok(())));
        assert_ne!(a, b);
        assert_eq!(a.point.name(), "before_clear");

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert_eq!(registry.after_render.len(), 1);
    }

    #[test]
    fn components_are_set_up_once() {
        let mut registry = StageRegistry::new();
        let mut setups = 0;
        for _ in 0..3 {
            registry.ensure_component("shadows", |registry| {
                setups += 1;
                registry.before_clear.register("shadows", Box::new(|_| Ok(())));
            });
        }
        assert_eq!(setups, 1);
        assert_eq!(registry.before_clear.components().collect::<Vec<_>>(), vec!["shadows"]);
    }
}
