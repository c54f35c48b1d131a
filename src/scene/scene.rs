use glam::{Affine3A, Mat4};
use slotmap::SlotMap;
use smallvec::{SmallVec, smallvec};

use super::bounding::BoundingInfo;
use super::camera::{Camera, LodChoice};
use super::drawable::{Drawable, DrawableKind, LodLevel, SubMesh};
use super::geometry::Geometry;
use super::material::Material;
use super::render_target::RenderTarget;
use super::{CameraKey, GeometryKey, MaterialKey, MeshKey, RenderTargetKey, SkeletonKey};
use crate::errors::{FrameError, Result};
use crate::gpu::{GpuStateCache, TextureKey};

/// Bone matrices, prepared at most once per render id.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub name: String,
    pub bones: Vec<Mat4>,
    prepared_render_id: u64,
    prepare_count: u64,
}

impl Skeleton {
    #[must_use]
    pub fn new(name: impl Into<String>, bones: Vec<Mat4>) -> Self {
        Self {
            name: name.into(),
            bones,
            prepared_render_id: 0,
            prepare_count: 0,
        }
    }

    /// Returns `false` if the skeleton was already prepared for `render_id`.
    pub fn prepare(&mut self, render_id: u64) -> bool {
        if self.prepared_render_id == render_id {
            return false;
        }
        self.prepared_render_id = render_id;
        self.prepare_count += 1;
        true
    }

    #[must_use]
    pub fn prepare_count(&self) -> u64 {
        self.prepare_count
    }
}

/// A resource whose disposal was requested during a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    Mesh(MeshKey),
    Geometry(GeometryKey),
    Material(MaterialKey),
    RenderTarget(RenderTargetKey),
    Texture(TextureKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntersectionKind {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntersectionEvent {
    pub kind: IntersectionKind,
    pub mesh: MeshKey,
    pub other: MeshKey,
}

/// Scene data container.
///
/// Owns every arena. Meshes additionally keep their registration order,
/// which is the default candidate order of the selector.
pub struct Scene {
    pub name: String,

    pub(crate) meshes: SlotMap<MeshKey, Drawable>,
    mesh_order: Vec<MeshKey>,
    pub(crate) geometries: SlotMap<GeometryKey, Geometry>,
    pub(crate) materials: SlotMap<MaterialKey, Material>,
    pub(crate) cameras: SlotMap<CameraKey, Camera>,
    pub(crate) render_targets: SlotMap<RenderTargetKey, RenderTarget>,
    pub(crate) skeletons: SlotMap<SkeletonKey, Skeleton>,

    pub active_camera: Option<CameraKey>,
    /// When non-empty, rendered in order instead of `active_camera`.
    pub active_cameras: Vec<CameraKey>,
    pub default_material: Option<MaterialKey>,

    pub auto_clear: bool,
    pub auto_clear_depth_and_stencil: bool,
    pub clear_color: [f32; 4],
    pub dispatch_all_sub_meshes_of_active_meshes: bool,
    pub skip_frustum_clipping: bool,

    /// Targets rendered once per frame before any camera.
    pub custom_render_targets: Vec<RenderTargetKey>,
    pub(crate) to_be_disposed: Vec<Disposal>,
    /// Render id whose instance batches survive eviction.
    pinned_render_id: Option<u64>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "Scene".to_string(),
            meshes: SlotMap::with_key(),
            mesh_order: Vec::new(),
            geometries: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            cameras: SlotMap::with_key(),
            render_targets: SlotMap::with_key(),
            skeletons: SlotMap::with_key(),
            active_camera: None,
            active_cameras: Vec::new(),
            default_material: None,
            auto_clear: true,
            auto_clear_depth_and_stencil: true,
            clear_color: [0.2, 0.2, 0.3, 1.0],
            dispatch_all_sub_meshes_of_active_meshes: false,
            skip_frustum_clipping: false,
            custom_render_targets: Vec::new(),
            to_be_disposed: Vec::new(),
            pinned_render_id: None,
        }
    }

    // ========================================================================
    // Arena Access
    // ========================================================================

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryKey {
        self.geometries.insert(geometry)
    }

    #[must_use]
    pub fn geometry(&self, key: GeometryKey) -> Option<&Geometry> {
        self.geometries.get(key)
    }

    pub fn geometry_mut(&mut self, key: GeometryKey) -> Option<&mut Geometry> {
        self.geometries.get_mut(key)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialKey {
        self.materials.insert(material)
    }

    #[must_use]
    pub fn material(&self, key: MaterialKey) -> Option<&Material> {
        self.materials.get(key)
    }

    pub fn material_mut(&mut self, key: MaterialKey) -> Option<&mut Material> {
        self.materials.get_mut(key)
    }

    /// Adds a camera; the first one added becomes the active camera.
    pub fn add_camera(&mut self, camera: Camera) -> CameraKey {
        let key = self.cameras.insert(camera);
        if self.active_camera.is_none() {
            self.active_camera = Some(key);
        }
        key
    }

    #[must_use]
    pub fn camera(&self, key: CameraKey) -> Option<&Camera> {
        self.cameras.get(key)
    }

    pub fn camera_mut(&mut self, key: CameraKey) -> Option<&mut Camera> {
        self.cameras.get_mut(key)
    }

    pub fn add_render_target(&mut self, target: RenderTarget) -> RenderTargetKey {
        self.render_targets.insert(target)
    }

    #[must_use]
    pub fn render_target(&self, key: RenderTargetKey) -> Option<&RenderTarget> {
        self.render_targets.get(key)
    }

    pub fn render_target_mut(&mut self, key: RenderTargetKey) -> Option<&mut RenderTarget> {
        self.render_targets.get_mut(key)
    }

    pub fn add_skeleton(&mut self, skeleton: Skeleton) -> SkeletonKey {
        self.skeletons.insert(skeleton)
    }

    #[must_use]
    pub fn skeleton(&self, key: SkeletonKey) -> Option<&Skeleton> {
        self.skeletons.get(key)
    }

    #[must_use]
    pub fn mesh(&self, key: MeshKey) -> Option<&Drawable> {
        self.meshes.get(key)
    }

    pub fn mesh_mut(&mut self, key: MeshKey) -> Option<&mut Drawable> {
        self.meshes.get_mut(key)
    }

    /// Mesh keys in registration order.
    #[must_use]
    pub fn mesh_keys(&self) -> &[MeshKey] {
        &self.mesh_order
    }

    #[must_use]
    pub fn mesh_count(&self) -> usize {
        self.mesh_order.len()
    }

    // ========================================================================
    // Drawables
    // ========================================================================

    /// Adds a drawable. A drawable with geometry and no sub-meshes gets one
    /// sub-mesh spanning the whole geometry.
    pub fn add_mesh(&mut self, mut drawable: Drawable) -> MeshKey {
        if let Some(geometry) = drawable.geometry.and_then(|key| self.geometries.get(key)) {
            let bounds = *geometry.bounds();
            drawable.bounding = BoundingInfo::new(bounds.min, bounds.max);
            if drawable.sub_meshes.is_empty() {
                drawable.sub_meshes.push(SubMesh {
                    material_index: 0,
                    index_start: 0,
                    index_count: geometry.index_count().unwrap_or(0),
                    vertex_start: 0,
                    vertex_count: geometry.vertex_count(),
                    bounding: BoundingInfo::new(bounds.min, bounds.max),
                });
            }
        }

        let geometry = drawable.geometry;
        let key = self.meshes.insert(drawable);
        self.mesh_order.push(key);
        if let Some(geometry) = geometry.and_then(|key| self.geometries.get_mut(key)) {
            geometry.owners.push(key);
        }
        key
    }

    /// Creates an instance of `source`, sharing its geometry and material.
    pub fn add_instance(&mut self, source: MeshKey, name: impl Into<String>) -> Result<MeshKey> {
        let source_mesh = self.meshes.get(source).ok_or(FrameError::UnknownHandle("mesh"))?;
        if !matches!(source_mesh.kind, DrawableKind::Mesh { .. }) {
            return Err(FrameError::UnknownHandle("instance source mesh"));
        }
        let local = *source_mesh.bounding.local_box();

        let mut instance = Drawable::new(name, DrawableKind::Instance { source });
        instance.bounding = BoundingInfo::new(local.min, local.max);
        instance.rendering_group_id = source_mesh.rendering_group_id;
        instance.layer_mask = source_mesh.layer_mask;

        let key = self.meshes.insert(instance);
        self.mesh_order.push(key);
        if let Some(DrawableKind::Mesh { instances, .. }) = self.meshes.get_mut(source).map(|mesh| &mut mesh.kind) {
            instances.push(key);
        }
        Ok(key)
    }

    /// Appends a sub-mesh covering `[start, start + count)` of the mesh's
    /// indices (or vertices, for non-indexed geometry).
    pub fn add_sub_mesh(&mut self, mesh: MeshKey, material_index: usize, start: u32, count: u32) -> Result<usize> {
        let drawable = self.meshes.get(mesh).ok_or(FrameError::UnknownHandle("mesh"))?;
        let geometry = drawable
            .geometry
            .and_then(|key| self.geometries.get(key))
            .ok_or(FrameError::UnknownHandle("geometry"))?;

        let len = geometry.index_count().unwrap_or_else(|| geometry.vertex_count());
        let end = start.checked_add(count).filter(|end| *end <= len).ok_or(FrameError::SubMeshOutOfBounds {
            start,
            end: start.saturating_add(count),
            len,
        })?;

        let sub_mesh = if geometry.is_indexed() {
            let bounds = geometry.range_bounds(start, count, 0, 0);
            SubMesh {
                material_index,
                index_start: start,
                index_count: end - start,
                vertex_start: 0,
                vertex_count: geometry.vertex_count(),
                bounding: BoundingInfo::new(bounds.min, bounds.max),
            }
        } else {
            let bounds = geometry.range_bounds(0, 0, start, count);
            SubMesh {
                material_index,
                index_start: 0,
                index_count: 0,
                vertex_start: start,
                vertex_count: end - start,
                bounding: BoundingInfo::new(bounds.min, bounds.max),
            }
        };

        let drawable = self.meshes.get_mut(mesh).ok_or(FrameError::UnknownHandle("mesh"))?;
        drawable.sub_meshes.push(sub_mesh);
        Ok(drawable.sub_meshes.len() - 1)
    }

    pub fn clear_sub_meshes(&mut self, mesh: MeshKey) {
        if let Some(drawable) = self.meshes.get_mut(mesh) {
            drawable.sub_meshes.clear();
        }
    }

    pub fn set_parent(&mut self, child: MeshKey, parent: Option<MeshKey>) {
        if let Some(drawable) = self.meshes.get_mut(child) {
            drawable.parent = parent;
            drawable.transform.mark_dirty();
        }
    }

    /// Beyond `distance`, `mesh` is rendered as `replacement` (or culled
    /// when `None`). The replacement follows `mesh`'s world matrix.
    pub fn add_lod_level(&mut self, mesh: MeshKey, distance: f32, replacement: Option<MeshKey>) -> Result<()> {
        if let Some(replacement) = replacement {
            let level = self.meshes.get_mut(replacement).ok_or(FrameError::UnknownHandle("mesh"))?;
            level.lod_master = Some(mesh);
        }
        let drawable = self.meshes.get_mut(mesh).ok_or(FrameError::UnknownHandle("mesh"))?;
        drawable.lod_levels.push(LodLevel {
            distance,
            mesh: replacement,
        });
        drawable.lod_levels.sort_by(|a, b| b.distance.total_cmp(&a.distance));
        Ok(())
    }

    /// Whether the drawable and all its ancestors are enabled.
    #[must_use]
    pub fn is_enabled(&self, key: MeshKey) -> bool {
        let mut current = Some(key);
        let mut depth = 0;
        while let Some(node) = current {
            let Some(drawable) = self.meshes.get(node) else {
                return node != key;
            };
            if !drawable.enabled {
                return false;
            }
            depth += 1;
            if depth > self.meshes.len() {
                break;
            }
            current = drawable.parent;
        }
        true
    }

    /// Recomputes the world matrix of `key` and its ancestors, returning
    /// the resulting world version.
    pub fn compute_world_matrix(&mut self, key: MeshKey) -> Option<u64> {
        let master = self.meshes.get(key)?.lod_master;
        if let Some(master) = master.filter(|master| *master != key) {
            let world = self.compute_world_matrix(master).and_then(|_| self.meshes.get(master)).map(|m| *m.transform.world_matrix())?;
            let drawable = self.meshes.get_mut(key)?;
            drawable.transform.set_world_matrix(world);
            return Some(drawable.transform.world_version());
        }

        let mut chain: SmallVec<[MeshKey; 8]> = smallvec![key];
        let mut current = self.meshes.get(key)?.parent;
        while let Some(parent) = current {
            if chain.contains(&parent) {
                log::warn!("Parent cycle detected at mesh {parent:?}; ignoring the remaining ancestors");
                break;
            }
            let Some(drawable) = self.meshes.get(parent) else {
                break;
            };
            chain.push(parent);
            current = drawable.parent;
        }

        let mut parent_world: Option<(Affine3A, u64)> = None;
        for node in chain.iter().rev() {
            let drawable = self.meshes.get_mut(*node)?;
            drawable
                .transform
                .update_world_matrix(parent_world.as_ref().map(|(world, version)| (world, *version)));
            parent_world = Some((*drawable.transform.world_matrix(), drawable.transform.world_version()));
        }
        parent_world.map(|(_, version)| version)
    }

    /// Level-of-detail decision for `key` as seen from `camera`.
    #[must_use]
    pub fn lod_for(&self, key: MeshKey, camera: &Camera) -> LodChoice {
        let Some(drawable) = self.meshes.get(key) else {
            return LodChoice::Cull;
        };
        let distance = drawable.distance_to(camera.position());
        if let Some(selector) = &camera.lod_selector {
            return selector(key, distance);
        }

        let Some(nearest) = drawable.lod_levels.last() else {
            return LodChoice::Keep;
        };
        if nearest.distance > distance {
            return LodChoice::Keep;
        }
        drawable
            .lod_levels
            .iter()
            .find(|level| level.distance < distance)
            .map_or(LodChoice::Keep, |level| level.mesh.map_or(LodChoice::Cull, LodChoice::Replace))
    }

    /// Material used to draw sub-mesh `sub_mesh` of `mesh`: instances use
    /// their source's material, multi-materials resolve through the
    /// sub-mesh's material index, and drawables without a material fall
    /// back to the scene default.
    #[must_use]
    pub fn effective_material(&self, mesh: MeshKey, sub_mesh: usize) -> Option<MaterialKey> {
        let drawable = self.meshes.get(mesh)?;
        let owner = match drawable.source() {
            Some(source) => self.meshes.get(source)?,
            None => drawable,
        };
        let material_key = owner.material.or(self.default_material)?;
        let material = self.materials.get(material_key)?;
        if !material.is_multi() {
            return Some(material_key);
        }
        let index = owner.sub_meshes.get(sub_mesh)?.material_index;
        material.sub_material(index).filter(|key| self.materials.contains_key(*key))
    }

    /// Keeps the instance batches of `render_id` alive while later render
    /// ids come and go, e.g. while the active meshes are frozen.
    pub fn pin_instance_batches(&mut self, render_id: Option<u64>) {
        self.pinned_render_id = render_id;
    }

    #[inline]
    #[must_use]
    pub fn pinned_render_id(&self) -> Option<u64> {
        self.pinned_render_id
    }

    /// Registers `key` as active for `render_id`.
    ///
    /// Returns the mesh whose sub-meshes must be dispatched, or `None` when
    /// that mesh was already dispatched for this render id. Instances add
    /// themselves to their source's batch and dispatch the source.
    pub fn activate(&mut self, key: MeshKey, render_id: u64) -> Option<MeshKey> {
        let source = self.meshes.get(key)?.source();
        let pinned = self.pinned_render_id;
        match source {
            Some(source) => {
                let source_mesh = self.meshes.get_mut(source)?;
                let batch = source_mesh.batch_mut(render_id, pinned);
                if !batch.instances.contains(&key) {
                    batch.instances.push(key);
                }
                source_mesh.mark_dispatched(render_id).then_some(source)
            }
            None => {
                let drawable = self.meshes.get_mut(key)?;
                let batch = drawable.batch_mut(render_id, pinned);
                if batch.include_self {
                    return None;
                }
                batch.include_self = true;
                drawable.mark_dispatched(render_id).then_some(key)
            }
        }
    }

    // ========================================================================
    // Intersections
    // ========================================================================

    /// Compares every drawable with intersection targets against them and
    /// reports transitions since the previous check.
    pub fn check_intersections(&mut self) -> Vec<IntersectionEvent> {
        let watchers: Vec<MeshKey> = self
            .mesh_order
            .iter()
            .copied()
            .filter(|key| self.meshes.get(*key).is_some_and(|mesh| !mesh.intersection_targets.is_empty()))
            .collect();

        let mut events = Vec::new();
        for mesh in watchers {
            self.compute_world_matrix(mesh);
            let Some(drawable) = self.meshes.get_mut(mesh) else {
                continue;
            };
            drawable.refresh_bounding();
            let targets = drawable.intersection_targets.clone();

            for other in targets {
                self.compute_world_matrix(other);
                let Some(other_bounds) = self.meshes.get_mut(other).map(|target| {
                    target.refresh_bounding();
                    target.bounding.clone()
                }) else {
                    continue;
                };
                let Some(drawable) = self.meshes.get_mut(mesh) else {
                    break;
                };
                let intersecting = drawable.bounding.intersects(&other_bounds);
                let in_progress = drawable.intersecting.iter().position(|key| *key == other);
                match (intersecting, in_progress) {
                    (true, None) => {
                        drawable.intersecting.push(other);
                        events.push(IntersectionEvent {
                            kind: IntersectionKind::Enter,
                            mesh,
                            other,
                        });
                    }
                    (false, Some(position)) => {
                        drawable.intersecting.remove(position);
                        events.push(IntersectionEvent {
                            kind: IntersectionKind::Exit,
                            mesh,
                            other,
                        });
                    }
                    _ => {}
                }
            }
        }
        events
    }

    // ========================================================================
    // Disposal & Context Loss
    // ========================================================================

    /// Queues a resource for disposal at the end of the current frame.
    pub fn queue_disposal(&mut self, disposal: Disposal) {
        if !self.to_be_disposed.contains(&disposal) {
            self.to_be_disposed.push(disposal);
        }
    }

    #[must_use]
    pub fn pending_disposals(&self) -> usize {
        self.to_be_disposed.len()
    }

    /// Disposes everything queued with [`queue_disposal`](Self::queue_disposal).
    pub fn flush_disposals(&mut self, gpu: &mut GpuStateCache) -> usize {
        let queued = std::mem::take(&mut self.to_be_disposed);
        let count = queued.len();
        for disposal in queued {
            self.dispose(disposal, gpu);
        }
        count
    }

    /// Disposes a resource immediately. Must not run while a frame is in
    /// progress; use [`queue_disposal`](Self::queue_disposal) from callbacks.
    pub fn dispose(&mut self, disposal: Disposal, gpu: &mut GpuStateCache) {
        match disposal {
            Disposal::Mesh(key) => self.dispose_mesh(key, gpu),
            Disposal::Geometry(key) => {
                if let Some(mut geometry) = self.geometries.remove(key) {
                    geometry.release(gpu);
                    for owner in geometry.owners {
                        if let Some(mesh) = self.meshes.get_mut(owner) {
                            mesh.geometry = None;
                        }
                    }
                }
            }
            Disposal::Material(key) => {
                if let Some(mut material) = self.materials.remove(key) {
                    material.release(gpu);
                    for (_, mesh) in &mut self.meshes {
                        if mesh.material == Some(key) {
                            mesh.material = None;
                        }
                    }
                    if self.default_material == Some(key) {
                        self.default_material = None;
                    }
                }
            }
            Disposal::RenderTarget(key) => {
                if let Some(target) = self.render_targets.remove(key) {
                    target.release(gpu);
                    self.custom_render_targets.retain(|other| *other != key);
                    for (_, camera) in &mut self.cameras {
                        camera.custom_render_targets.retain(|other| *other != key);
                        if camera.output_render_target == Some(key) {
                            camera.output_render_target = None;
                        }
                    }
                }
            }
            Disposal::Texture(key) => {
                gpu.release_texture(key);
            }
        }
    }

    fn dispose_mesh(&mut self, key: MeshKey, gpu: &mut GpuStateCache) {
        let Some(drawable) = self.meshes.remove(key) else {
            return;
        };
        self.mesh_order.retain(|other| *other != key);

        if let Some(buffer) = drawable.instance_buffer {
            gpu.release_buffer(buffer);
        }
        if let Some(geometry) = drawable.geometry.and_then(|geometry| self.geometries.get_mut(geometry)) {
            geometry.owners.retain(|owner| *owner != key);
        }
        match drawable.kind {
            DrawableKind::Instance { source } => {
                if let Some(DrawableKind::Mesh { instances, .. }) =
                    self.meshes.get_mut(source).map(|mesh| &mut mesh.kind)
                {
                    instances.retain(|instance| *instance != key);
                }
            }
            DrawableKind::Mesh { instances, .. } => {
                for instance in instances {
                    self.dispose_mesh(instance, gpu);
                }
            }
            DrawableKind::Lines { .. } => {}
        }
        log::debug!("Disposed mesh '{}'", drawable.name);
    }

    /// Context-loss hook: drops per-program vertex array caches and marks
    /// instance data for re-upload. Returns the number of geometries
    /// touched.
    pub fn rebuild(&mut self, gpu: &mut GpuStateCache) -> usize {
        for (_, geometry) in &mut self.geometries {
            geometry.rebuild(gpu);
        }
        for (_, mesh) in &mut self.meshes {
            if let Some(thin) = mesh.thin_instances_mut() {
                thin.dirty = true;
            }
        }
        self.geometries.len()
    }

    /// Releases every GPU object referenced by the scene.
    pub fn release_gpu_resources(&mut self, gpu: &mut GpuStateCache) {
        for (_, geometry) in &mut self.geometries {
            geometry.release(gpu);
        }
        for (_, material) in &mut self.materials {
            material.release(gpu);
        }
        for (_, target) in &self.render_targets {
            target.release(gpu);
        }
        for (_, mesh) in &mut self.meshes {
            if let Some(buffer) = mesh.instance_buffer.take() {
                gpu.release_buffer(buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn triangle_geometry() -> Geometry {
        Geometry::new(
            "tri",
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        )
        .with_indices(vec![0, 1, 2])
    }

    #[test]
    fn sub_mesh_range_is_validated() {
        let mut scene = Scene::new();
        let geometry = scene.add_geometry(triangle_geometry());
        let mut drawable = Drawable::new("tri", DrawableKind::mesh());
        drawable.geometry = Some(geometry);
        let mesh = scene.add_mesh(drawable);

        assert_eq!(scene.mesh(mesh).map(|m| m.sub_meshes().len()), Some(1));
        assert!(scene.add_sub_mesh(mesh, 0, 0, 3).is_ok());
        assert!(matches!(
            scene.add_sub_mesh(mesh, 0, 2, 2),
            Err(FrameError::SubMeshOutOfBounds { start: 2, end: 4, len: 3 })
        ));
    }

    #[test]
    fn world_matrix_follows_parent() {
        let mut scene = Scene::new();
        let parent = scene.add_mesh(Drawable::new("parent", DrawableKind::mesh()));
        let child = scene.add_mesh(Drawable::new("child", DrawableKind::mesh()));
        scene.set_parent(child, Some(parent));

        scene.mesh_mut(parent).unwrap().transform.position = Vec3::new(0.0, 3.0, 0.0);
        scene.mesh_mut(child).unwrap().transform.position = Vec3::new(1.0, 0.0, 0.0);
        scene.compute_world_matrix(child);

        let world = scene.mesh(child).unwrap().transform.world_position();
        assert_eq!(world, Vec3::new(1.0, 3.0, 0.0));
    }

    #[test]
    fn instances_fold_into_one_source_dispatch() {
        let mut scene = Scene::new();
        let source = scene.add_mesh(Drawable::new("source", DrawableKind::mesh()));
        let a = scene.add_instance(source, "a").unwrap();
        let b = scene.add_instance(source, "b").unwrap();

        assert_eq!(scene.activate(a, 7), Some(source));
        assert_eq!(scene.activate(b, 7), None);
        assert_eq!(scene.activate(source, 7), None);

        let batch = scene.mesh(source).unwrap().batch(7).unwrap();
        assert!(batch.include_self);
        assert_eq!(batch.instances.as_slice(), &[a, b]);

        assert_eq!(scene.activate(b, 8), Some(source));
    }

    #[test]
    fn disabled_parent_disables_child() {
        let mut scene = Scene::new();
        let parent = scene.add_mesh(Drawable::new("parent", DrawableKind::mesh()));
        let child = scene.add_mesh(Drawable::new("child", DrawableKind::mesh()));
        scene.set_parent(child, Some(parent));
        assert!(scene.is_enabled(child));
        scene.mesh_mut(parent).unwrap().enabled = false;
        assert!(!scene.is_enabled(child));
    }

    #[test]
    fn lod_levels_pick_by_distance() {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh(Drawable::new("hi", DrawableKind::mesh()));
        let low = scene.add_mesh(Drawable::new("low", DrawableKind::mesh()));
        scene.add_lod_level(mesh, 20.0, Some(low)).unwrap();
        scene.add_lod_level(mesh, 50.0, None).unwrap();
        scene.compute_world_matrix(mesh);
        scene.mesh_mut(mesh).unwrap().refresh_bounding();

        let mut camera = Camera::new_perspective(60.0, 1.0, 0.1, 1000.0);
        let mut choice_at = |z: f32| {
            camera.set_position(Vec3::new(0.0, 0.0, z));
            camera.update();
            scene.lod_for(mesh, &camera)
        };
        assert_eq!(choice_at(10.0), LodChoice::Keep);
        assert_eq!(choice_at(30.0), LodChoice::Replace(low));
        assert_eq!(choice_at(60.0), LodChoice::Cull);
    }
}
