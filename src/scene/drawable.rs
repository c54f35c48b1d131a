//! Drawables
//!
//! A closed set of drawable kinds sharing one data core:
//!
//! | Kind | Renders | Notes |
//! |------|---------|-------|
//! | `Mesh` | its own geometry | may own instances and thin instances |
//! | `Instance` | its source's geometry | batched into one instanced draw |
//! | `Lines` | its own geometry as lines | |
//!
//! Every drawable is split into [`SubMesh`]es, contiguous ranges of its
//! geometry drawn with one material each.

use glam::{Mat4, Vec3};
use smallvec::SmallVec;

use super::bounding::{BoundingInfo, CullingStrategy};
use super::transform::Transform;
use super::{GeometryKey, MaterialKey, MeshKey, SkeletonKey};
use crate::gpu::BufferKey;

/// Maximum number of render ids an instance batch is remembered for.
const MAX_TRACKED_BATCHES: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct ThinInstances {
    matrices: Vec<Mat4>,
    pub(crate) dirty: bool,
}

impl ThinInstances {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    #[must_use]
    pub fn matrices(&self) -> &[Mat4] {
        &self.matrices
    }

    pub fn push(&mut self, matrix: Mat4) -> usize {
        self.matrices.push(matrix);
        self.dirty = true;
        self.matrices.len() - 1
    }

    pub fn set(&mut self, matrices: Vec<Mat4>) {
        self.matrices = matrices;
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.matrices.clear();
        self.dirty = true;
    }
}

#[derive(Debug, Clone)]
pub enum DrawableKind {
    Mesh {
        /// Instances created from this mesh.
        instances: Vec<MeshKey>,
        thin_instances: ThinInstances,
    },
    Instance {
        source: MeshKey,
    },
    Lines {
        color: [f32; 4],
    },
}

impl DrawableKind {
    #[must_use]
    pub fn mesh() -> Self {
        Self::Mesh {
            instances: Vec::new(),
            thin_instances: ThinInstances::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubMesh {
    /// Index into the sub-materials of a multi-material.
    pub material_index: usize,
    pub index_start: u32,
    pub index_count: u32,
    pub vertex_start: u32,
    pub vertex_count: u32,
    pub bounding: BoundingInfo,
}

/// Replacement mesh used beyond `distance`; `None` culls the mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodLevel {
    pub distance: f32,
    pub mesh: Option<MeshKey>,
}

/// Instances registered for one render id.
#[derive(Debug, Clone, Default)]
pub struct InstanceBatch {
    pub render_id: u64,
    /// The source mesh itself passed selection, not only its instances.
    pub include_self: bool,
    pub instances: SmallVec<[MeshKey; 8]>,
}

#[derive(Debug, Clone)]
pub struct Drawable {
    pub name: String,
    pub kind: DrawableKind,
    pub transform: Transform,
    pub parent: Option<MeshKey>,

    pub geometry: Option<GeometryKey>,
    pub material: Option<MaterialKey>,
    pub(crate) sub_meshes: Vec<SubMesh>,
    pub(crate) bounding: BoundingInfo,

    pub enabled: bool,
    pub visible: bool,
    /// Opacity multiplier; below 1 the drawable renders as transparent.
    pub visibility: f32,
    pub layer_mask: u32,
    pub always_select_as_active_mesh: bool,
    pub rendering_group_id: u8,
    pub alpha_index: i32,
    pub culling_strategy: CullingStrategy,
    /// Set by collaborators once the drawable's data is usable.
    pub ready: bool,

    /// Sorted by descending distance.
    pub(crate) lod_levels: Vec<LodLevel>,
    /// Set when this mesh is an LOD level of another mesh: it follows that
    /// mesh's world matrix and is never selected directly.
    pub(crate) lod_master: Option<MeshKey>,

    pub skeleton: Option<SkeletonKey>,
    pub intersection_targets: Vec<MeshKey>,
    pub(crate) intersecting: SmallVec<[MeshKey; 2]>,

    pub(crate) dispatched_render_id: u64,
    pub(crate) batches: SmallVec<[InstanceBatch; MAX_TRACKED_BATCHES]>,
    pub(crate) instance_buffer: Option<BufferKey>,
}

impl Drawable {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: DrawableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transform: Transform::new(),
            parent: None,
            geometry: None,
            material: None,
            sub_meshes: Vec::new(),
            bounding: BoundingInfo::default(),
            enabled: true,
            visible: true,
            visibility: 1.0,
            layer_mask: 0x0FFF_FFFF,
            always_select_as_active_mesh: false,
            rendering_group_id: 0,
            alpha_index: i32::MAX,
            culling_strategy: CullingStrategy::Standard,
            ready: true,
            lod_levels: Vec::new(),
            lod_master: None,
            skeleton: None,
            intersection_targets: Vec::new(),
            intersecting: SmallVec::new(),
            dispatched_render_id: 0,
            batches: SmallVec::new(),
            instance_buffer: None,
        }
    }

    #[must_use]
    pub fn sub_meshes(&self) -> &[SubMesh] {
        &self.sub_meshes
    }

    #[must_use]
    pub fn bounding(&self) -> &BoundingInfo {
        &self.bounding
    }

    #[must_use]
    pub fn lod_levels(&self) -> &[LodLevel] {
        &self.lod_levels
    }

    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.lod_master.is_some()
    }

    #[inline]
    #[must_use]
    pub fn is_instance(&self) -> bool {
        matches!(self.kind, DrawableKind::Instance { .. })
    }

    #[must_use]
    pub fn source(&self) -> Option<MeshKey> {
        match self.kind {
            DrawableKind::Instance { source } => Some(source),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_instances(&self) -> bool {
        matches!(&self.kind, DrawableKind::Mesh { instances, .. } if !instances.is_empty())
    }

    #[must_use]
    pub fn thin_instances(&self) -> Option<&ThinInstances> {
        match &self.kind {
            DrawableKind::Mesh { thin_instances, .. } => Some(thin_instances),
            _ => None,
        }
    }

    pub fn thin_instances_mut(&mut self) -> Option<&mut ThinInstances> {
        match &mut self.kind {
            DrawableKind::Mesh { thin_instances, .. } => Some(thin_instances),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_thin_instances(&self) -> bool {
        self.thin_instances().is_some_and(|thin| !thin.is_empty())
    }

    #[inline]
    #[must_use]
    pub fn has_zero_scale(&self) -> bool {
        self.transform.scale == Vec3::ZERO
    }

    /// Refreshes the world bounds of the drawable and all its sub-meshes
    /// against the current world matrix.
    pub fn refresh_bounding(&mut self) {
        let world = *self.transform.world_matrix();
        let version = self.transform.world_version();
        self.bounding.refresh(&world, version);
        for sub_mesh in &mut self.sub_meshes {
            sub_mesh.bounding.refresh(&world, version);
        }
    }

    /// World-space distance between `point` and the bounding sphere center.
    #[must_use]
    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.bounding.world_sphere().center.distance(point)
    }

    // ─── Activation bookkeeping ───────────────────────────────────────

    /// Batch for `render_id`, created on first use. Old batches are
    /// dropped once more than a few render ids are tracked; the batch of
    /// `pinned` is never dropped.
    pub(crate) fn batch_mut(&mut self, render_id: u64, pinned: Option<u64>) -> &mut InstanceBatch {
        let position = match self.batches.iter().position(|batch| batch.render_id == render_id) {
            Some(position) => position,
            None => {
                if self.batches.len() == MAX_TRACKED_BATCHES {
                    let oldest = self
                        .batches
                        .iter()
                        .position(|batch| Some(batch.render_id) != pinned)
                        .unwrap_or(0);
                    self.batches.remove(oldest);
                }
                self.batches.push(InstanceBatch {
                    render_id,
                    ..InstanceBatch::default()
                });
                self.batches.len() - 1
            }
        };
        &mut self.batches[position]
    }

    #[must_use]
    pub fn batch(&self, render_id: u64) -> Option<&InstanceBatch> {
        self.batches.iter().find(|batch| batch.render_id == render_id)
    }

    /// Marks the drawable as dispatched for `render_id`. Returns `false` if
    /// it already was.
    pub(crate) fn mark_dispatched(&mut self, render_id: u64) -> bool {
        if self.dispatched_render_id == render_id {
            return false;
        }
        self.dispatched_render_id = render_id;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_bounded_and_keyed_by_render_id() {
        let mut drawable = Drawable::new("mesh", DrawableKind::mesh());
        for render_id in 1..=6 {
            drawable.batch_mut(render_id, None).include_self = true;
        }
        assert_eq!(drawable.batches.len(), MAX_TRACKED_BATCHES);
        assert!(drawable.batch(1).is_none());
        assert!(drawable.batch(6).is_some_and(|batch| batch.include_self));
    }

    #[test]
    fn pinned_batch_outlives_newer_render_ids() {
        let mut drawable = Drawable::new("mesh", DrawableKind::mesh());
        drawable.batch_mut(1, None).include_self = true;
        for render_id in 2..=9 {
            drawable.batch_mut(render_id, Some(1));
        }
        assert_eq!(drawable.batches.len(), MAX_TRACKED_BATCHES);
        assert!(drawable.batch(1).is_some_and(|batch| batch.include_self));
        assert!(drawable.batch(9).is_some());
        assert!(drawable.batch(6).is_none());
    }

    #[test]
    fn dispatch_mark_is_per_render_id() {
        let mut drawable = Drawable::new("mesh", DrawableKind::mesh());
        assert!(drawable.mark_dispatched(1));
        assert!(!drawable.mark_dispatched(1));
        assert!(drawable.mark_dispatched(2));
    }
}
