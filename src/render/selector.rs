//! Active Mesh Selection
//!
//! Once per camera (and once per render target), the selector walks the
//! mesh candidates and files every visible sub-mesh into a
//! [`RenderingDispatcher`]:
//!
//! 1. Candidates come from a [`CandidateProvider`] (every scene mesh by
//!    default) or from an explicit render list.
//! 2. Disabled, not-ready and zero-scale meshes are skipped; the world
//!    matrix is refreshed and the `before_evaluate_active_mesh` stage runs.
//! 3. LOD selection may replace or cull the mesh.
//! 4. The visibility test (visible, layer mask, frustum) decides whether the
//!    mesh becomes active. Sub-meshes of active meshes are forwarded to the
//!    dispatcher, individually frustum tested when the mesh has several.
//!
//! Frozen selection reuses the previous active list, only refreshing world
//! matrices, and leaves the dispatcher untouched.

use super::dispatcher::RenderingDispatcher;
use super::stage::{StageContext, StageRegistry};
use crate::errors::Result;
use crate::scene::{
    Camera, CameraKey, FrustumCache, FrustumPlanes, LodChoice, MaterialKey, MeshKey, RenderTargetKey, Scene,
    SkeletonKey,
};

// ============================================================================
// Candidate Providers
// ============================================================================

/// Source of the meshes considered for selection.
///
/// Spatial structures (octrees, BVHs) implement this to hand out a
/// pre-filtered subset.
pub trait CandidateProvider {
    fn collect(&mut self, scene: &Scene, camera: &Camera, frustum: &FrustumPlanes, out: &mut Vec<MeshKey>);
}

/// Every scene mesh, in registration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllMeshes;

impl CandidateProvider for AllMeshes {
    fn collect(&mut self, scene: &Scene, _camera: &Camera, _frustum: &FrustumPlanes, out: &mut Vec<MeshKey>) {
        out.extend_from_slice(scene.mesh_keys());
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Inputs of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct SelectionPass<'p> {
    pub camera: CameraKey,
    pub render_id: u64,
    /// Explicit candidates; the provider is used when `None`.
    pub render_list: Option<&'p [MeshKey]>,
    /// Frustum test meshes and sub-meshes against the camera.
    pub check_frustum: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub candidates: u32,
    pub active: u32,
    pub not_ready: u32,
    pub frustum_culled: u32,
    pub lod_culled: u32,
    pub dispatched_sub_meshes: u32,
}

pub struct ActiveObjectSelector {
    provider: Box<dyn CandidateProvider>,
    frustums: FrustumCache,
    candidates: Vec<MeshKey>,
    active_meshes: Vec<MeshKey>,
    active_skeletons: Vec<SkeletonKey>,
    render_targets: Vec<RenderTargetKey>,
    processed_materials: Vec<MaterialKey>,
    frozen: bool,
    skip_evaluate_when_frozen: bool,
    stats: SelectionStats,
}

impl Default for ActiveObjectSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveObjectSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::with_provider(Box::new(AllMeshes))
    }

    #[must_use]
    pub fn with_provider(provider: Box<dyn CandidateProvider>) -> Self {
        Self {
            provider,
            frustums: FrustumCache::new(),
            candidates: Vec::new(),
            active_meshes: Vec::new(),
            active_skeletons: Vec::new(),
            render_targets: Vec::new(),
            processed_materials: Vec::new(),
            frozen: false,
            skip_evaluate_when_frozen: false,
            stats: SelectionStats::default(),
        }
    }

    pub fn set_provider(&mut self, provider: Box<dyn CandidateProvider>) {
        self.provider = provider;
    }

    /// Reuses the current active list until [`unfreeze`](Self::unfreeze).
    /// With `skip_evaluate`, world matrices are not refreshed either.
    pub fn freeze(&mut self, skip_evaluate: bool) {
        self.frozen = true;
        self.skip_evaluate_when_frozen = skip_evaluate;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
        self.skip_evaluate_when_frozen = false;
    }

    #[inline]
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[must_use]
    pub fn active_meshes(&self) -> &[MeshKey] {
        &self.active_meshes
    }

    #[must_use]
    pub fn active_skeletons(&self) -> &[SkeletonKey] {
        &self.active_skeletons
    }

    /// Render targets sampled by the materials of the last evaluation.
    #[must_use]
    pub fn render_targets(&self) -> &[RenderTargetKey] {
        &self.render_targets
    }

    #[must_use]
    pub fn stats(&self) -> SelectionStats {
        self.stats
    }

    #[must_use]
    pub fn frustum_cache(&self) -> &FrustumCache {
        &self.frustums
    }

    pub fn forget_camera(&mut self, camera: CameraKey) {
        self.frustums.forget(camera);
    }

    /// Frustum of `camera`, recomputed only when its matrices changed.
    pub fn frustum(&mut self, scene: &Scene, camera: CameraKey) -> Option<FrustumPlanes> {
        scene.camera(camera).map(|data| self.frustums.planes(camera, data))
    }

    /// Selects the active meshes of `pass` and dispatches their sub-meshes.
    pub fn evaluate(
        &mut self,
        stages: &mut StageRegistry,
        ctx: &mut StageContext<'_>,
        dispatcher: &mut RenderingDispatcher,
        pass: &SelectionPass<'_>,
    ) -> Result<()> {
        let Some(camera) = ctx.scene.camera(pass.camera) else {
            log::warn!("Selection camera {:?} no longer exists", pass.camera);
            return Ok(());
        };
        let planes = self.frustums.planes(pass.camera, camera);
        let eye = camera.position();
        let camera_mask = camera.layer_mask;

        if self.frozen && !self.active_meshes.is_empty() {
            if !self.skip_evaluate_when_frozen {
                for mesh in &self.active_meshes {
                    ctx.scene.compute_world_matrix(*mesh);
                }
            }
            return Ok(());
        }

        self.active_meshes.clear();
        self.active_skeletons.clear();
        self.render_targets.clear();
        self.processed_materials.clear();
        self.stats = SelectionStats::default();
        dispatcher.reset(pass.render_id, eye);

        let mut candidates = std::mem::take(&mut self.candidates);
        candidates.clear();
        match pass.render_list {
            Some(list) => candidates.extend_from_slice(list),
            None => {
                if let Some(camera) = ctx.scene.camera(pass.camera) {
                    self.provider.collect(ctx.scene, camera, &planes, &mut candidates);
                }
            }
        }

        let result = self.evaluate_candidates(stages, ctx, dispatcher, pass, &candidates, &planes, camera_mask);
        self.candidates = candidates;
        result
    }

    fn evaluate_candidates(
        &mut self,
        stages: &mut StageRegistry,
        ctx: &mut StageContext<'_>,
        dispatcher: &mut RenderingDispatcher,
        pass: &SelectionPass<'_>,
        candidates: &[MeshKey],
        planes: &FrustumPlanes,
        camera_mask: u32,
    ) -> Result<()> {
        let skip_frustum = !pass.check_frustum || ctx.scene.skip_frustum_clipping;

        for &key in candidates {
            self.stats.candidates += 1;
            let Some(mesh) = ctx.scene.mesh(key) else {
                continue;
            };
            if mesh.is_blocked() {
                continue;
            }
            if !mesh.ready {
                self.stats.not_ready += 1;
                log::trace!("Mesh '{}' not ready, skipped", mesh.name);
                continue;
            }
            if mesh.has_zero_scale() || !ctx.scene.is_enabled(key) {
                continue;
            }

            ctx.scene.compute_world_matrix(key);
            if let Some(mesh) = ctx.scene.mesh_mut(key) {
                mesh.refresh_bounding();
            }
            stages.run(ctx, |stages, ctx| stages.before_evaluate_active_mesh.run(ctx, key))?;

            let choice = match ctx.scene.camera(pass.camera) {
                Some(camera) => ctx.scene.lod_for(key, camera),
                None => LodChoice::Keep,
            };
            let mesh_to_render = match choice {
                LodChoice::Keep => key,
                LodChoice::Replace(replacement) => {
                    ctx.scene.compute_world_matrix(replacement);
                    if let Some(replacement) = ctx.scene.mesh_mut(replacement) {
                        replacement.refresh_bounding();
                    }
                    replacement
                }
                LodChoice::Cull => {
                    self.stats.lod_culled += 1;
                    continue;
                }
            };

            let Some(mesh) = ctx.scene.mesh_mut(key) else {
                continue;
            };
            mesh.refresh_bounding();
            let selectable = mesh.visible
                && mesh.visibility > 0.0
                && (mesh.always_select_as_active_mesh
                    || (mesh.layer_mask & camera_mask != 0
                        && (skip_frustum || mesh.bounding.is_in_frustum(planes, mesh.culling_strategy))));
            if !selectable {
                self.stats.frustum_culled += 1;
                continue;
            }

            self.active_meshes.push(key);
            self.stats.active += 1;

            // Instances fold into their source's batch; only the first
            // activation per render id dispatches.
            let Some(dispatched) = ctx.scene.activate(mesh_to_render, pass.render_id) else {
                continue;
            };
            self.activate_mesh(stages, ctx, dispatcher, pass, key, dispatched, planes, skip_frustum)?;
        }
        Ok(())
    }

    /// Runs the active-mesh bookkeeping of `initial` and forwards the
    /// sub-meshes of `mesh` (its source or LOD replacement).
    fn activate_mesh(
        &mut self,
        stages: &mut StageRegistry,
        ctx: &mut StageContext<'_>,
        dispatcher: &mut RenderingDispatcher,
        pass: &SelectionPass<'_>,
        initial: MeshKey,
        mesh: MeshKey,
        planes: &FrustumPlanes,
        skip_frustum: bool,
    ) -> Result<()> {
        let Some(drawable) = ctx.scene.mesh(mesh) else {
            return Ok(());
        };
        if let Some(skeleton) = drawable.skeleton
            && !self.active_skeletons.contains(&skeleton)
        {
            self.active_skeletons.push(skeleton);
            if let Some(skeleton) = ctx.scene.skeletons.get_mut(skeleton) {
                skeleton.prepare(pass.render_id);
            }
        }

        stages.run(ctx, |stages, ctx| stages.active_mesh.run(ctx, initial))?;

        let Some(initial_mesh) = ctx.scene.mesh(initial) else {
            return Ok(());
        };
        let Some(drawable) = ctx.scene.mesh(mesh) else {
            return Ok(());
        };
        let forward_all = initial_mesh.has_instances()
            || initial_mesh.is_instance()
            || ctx.scene.dispatch_all_sub_meshes_of_active_meshes
            || skip_frustum
            || drawable.always_select_as_active_mesh
            || drawable.sub_meshes().len() == 1;
        let strategy = drawable.culling_strategy;
        let sub_mesh_count = drawable.sub_meshes().len();

        for index in 0..sub_mesh_count {
            if !forward_all {
                let visible = ctx
                    .scene
                    .mesh(mesh)
                    .and_then(|drawable| drawable.sub_meshes().get(index))
                    .is_some_and(|sub| sub.bounding.is_in_frustum(planes, strategy));
                if !visible {
                    continue;
                }
            }

            stages.run(ctx, |stages, ctx| stages.evaluate_sub_mesh.run(ctx, mesh, index))?;

            let Some(material_key) = ctx.scene.effective_material(mesh, index) else {
                continue;
            };
            if !self.processed_materials.contains(&material_key)
                && let Some(material) = ctx.scene.material(material_key)
                && material.has_render_target_textures()
            {
                self.processed_materials.push(material_key);
                for target in material.render_target_textures() {
                    if !self.render_targets.contains(target) {
                        self.render_targets.push(*target);
                    }
                }
            }

            dispatcher.dispatch(ctx.scene, mesh, index, material_key);
            self.stats.dispatched_sub_meshes += 1;
        }
        Ok(())
    }
}
