//! Rendering Groups
//!
//! The dispatcher buckets every selected sub-mesh by rendering group and
//! transparency class, then draws the groups in ascending id order:
//!
//! ```text
//! group 0 ─┬─ depth-only  (color writes off, materials needing a pre-pass)
//!          ├─ opaque      (front to back)
//!          ├─ alpha test  (registration order)
//!          └─ transparent (alpha index, then back to front)
//! group 1 ── auto-clear depth/stencil, then the same buckets
//! ...
//! ```
//!
//! Groups are created on first dispatch and survive [`RenderingDispatcher::reset`],
//! which only empties their buckets.

use std::cmp::Ordering;

use glam::{Mat4, Vec3};

use super::stage::{StageContext, StageRegistry};
use super::trace::{DrawRecord, FrameTrace, RenderClass};
use crate::errors::Result;
use crate::gpu::{
    AttribLayout, BlendMode, BufferDesc, BufferKey, BufferUsage, ClearFlags, DrawCall, GpuStateCache,
    PrimitiveMode, UniformSlot,
};
use crate::scene::{Camera, CameraKey, DrawableKind, MaterialKey, MeshKey, RenderTargetKey, Scene};

/// Number of rendering groups; drawables with a larger id render in the last.
pub const MAX_RENDERING_GROUPS: usize = 4;

/// First attribute location of the per-instance world matrix (4 columns).
pub const INSTANCE_MATRIX_LOCATION: u32 = 4;

// ============================================================================
// Entries & Ordering
// ============================================================================

/// One dispatched sub-mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderEntry {
    pub mesh: MeshKey,
    pub sub_mesh: usize,
    pub material: MaterialKey,
    /// Camera to sub-mesh bounding sphere center, at dispatch time.
    pub distance: f32,
    pub alpha_index: i32,
    /// Dispatch sequence number within the current pass.
    pub order: u32,
}

pub type SortComparator = fn(&RenderEntry, &RenderEntry) -> Ordering;

#[must_use]
pub fn front_to_back(a: &RenderEntry, b: &RenderEntry) -> Ordering {
    a.distance.total_cmp(&b.distance)
}

#[must_use]
pub fn back_to_front(a: &RenderEntry, b: &RenderEntry) -> Ordering {
    b.distance.total_cmp(&a.distance)
}

/// Default transparent ordering: alpha index first, then back to front.
#[must_use]
pub fn alpha_index_then_back_to_front(a: &RenderEntry, b: &RenderEntry) -> Ordering {
    a.alpha_index.cmp(&b.alpha_index).then_with(|| back_to_front(a, b))
}

#[must_use]
pub fn registration_order(a: &RenderEntry, b: &RenderEntry) -> Ordering {
    a.order.cmp(&b.order)
}

/// Comparators of one group; `None` keeps dispatch order.
#[derive(Debug, Clone, Copy)]
pub struct GroupOrder {
    pub opaque: Option<SortComparator>,
    pub alpha_test: Option<SortComparator>,
    pub transparent: Option<SortComparator>,
}

impl Default for GroupOrder {
    fn default() -> Self {
        Self {
            opaque: Some(front_to_back),
            alpha_test: None,
            transparent: Some(alpha_index_then_back_to_front),
        }
    }
}

/// Buffers cleared before a group draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoClearPolicy {
    pub auto_clear: bool,
    pub depth: bool,
    pub stencil: bool,
}

impl Default for AutoClearPolicy {
    fn default() -> Self {
        Self {
            auto_clear: true,
            depth: true,
            stencil: true,
        }
    }
}

impl AutoClearPolicy {
    fn flags(self) -> ClearFlags {
        let mut flags = ClearFlags::empty();
        if self.auto_clear {
            flags.set(ClearFlags::DEPTH, self.depth);
            flags.set(ClearFlags::STENCIL, self.stencil);
        }
        flags
    }
}

#[derive(Debug, Default)]
struct RenderingGroup {
    depth_only: Vec<RenderEntry>,
    opaque: Vec<RenderEntry>,
    alpha_test: Vec<RenderEntry>,
    transparent: Vec<RenderEntry>,
}

impl RenderingGroup {
    fn clear(&mut self) {
        self.depth_only.clear();
        self.opaque.clear();
        self.alpha_test.clear();
        self.transparent.clear();
    }

    fn len(&self) -> usize {
        self.opaque.len() + self.alpha_test.len() + self.transparent.len()
    }
}

// ============================================================================
// Draw Pass
// ============================================================================

/// Camera and destination of one dispatcher render.
#[derive(Debug, Clone, Copy)]
pub struct DrawPass {
    pub frame_id: u64,
    pub camera: CameraKey,
    pub target: Option<RenderTargetKey>,
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
}

impl DrawPass {
    #[must_use]
    pub fn new(frame_id: u64, camera_key: CameraKey, camera: &Camera, target: Option<RenderTargetKey>) -> Self {
        Self {
            frame_id,
            camera: camera_key,
            target,
            view: *camera.view_matrix(),
            projection: *camera.projection_matrix(),
            view_projection: *camera.view_projection_matrix(),
        }
    }
}

/// Counters of one [`RenderingDispatcher::render`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub drawn: u32,
    /// Entries skipped because their material or geometry was not ready.
    pub skipped: u32,
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct RenderingDispatcher {
    groups: [Option<RenderingGroup>; MAX_RENDERING_GROUPS],
    orders: [GroupOrder; MAX_RENDERING_GROUPS],
    clear_policies: [AutoClearPolicy; MAX_RENDERING_GROUPS],
    render_id: u64,
    eye: Vec3,
    next_order: u32,
}

impl Default for RenderingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderingDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: Default::default(),
            orders: [GroupOrder::default(); MAX_RENDERING_GROUPS],
            clear_policies: [AutoClearPolicy::default(); MAX_RENDERING_GROUPS],
            render_id: 0,
            eye: Vec3::ZERO,
            next_order: 0,
        }
    }

    /// Overrides the comparators of `group`.
    pub fn set_rendering_order(
        &mut self,
        group: u8,
        opaque: Option<SortComparator>,
        alpha_test: Option<SortComparator>,
        transparent: Option<SortComparator>,
    ) {
        if let Some(order) = self.orders.get_mut(usize::from(group)) {
            *order = GroupOrder {
                opaque,
                alpha_test,
                transparent,
            };
        }
    }

    /// Sets the buffers cleared before `group` draws. Group 0 is never
    /// cleared here: the frame clear already covers it.
    pub fn set_auto_clear(&mut self, group: u8, policy: AutoClearPolicy) {
        if let Some(slot) = self.clear_policies.get_mut(usize::from(group)) {
            *slot = policy;
        }
    }

    #[inline]
    #[must_use]
    pub fn render_id(&self) -> u64 {
        self.render_id
    }

    /// Empties every bucket for a new pass. `eye` is the camera position
    /// used for distance sorting.
    pub fn reset(&mut self, render_id: u64, eye: Vec3) {
        for group in self.groups.iter_mut().flatten() {
            group.clear();
        }
        self.render_id = render_id;
        self.eye = eye;
        self.next_order = 0;
    }

    /// Number of color entries currently dispatched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().flatten().map(RenderingGroup::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether group `id` was ever dispatched to.
    #[must_use]
    pub fn has_group(&self, id: u8) -> bool {
        self.groups.get(usize::from(id)).is_some_and(Option::is_some)
    }

    /// Files sub-mesh `sub_mesh` of `mesh` drawn with `material`.
    pub fn dispatch(&mut self, scene: &Scene, mesh: MeshKey, sub_mesh: usize, material: MaterialKey) {
        let (Some(drawable), Some(material_data)) = (scene.mesh(mesh), scene.material(material)) else {
            return;
        };
        let distance = drawable
            .sub_meshes()
            .get(sub_mesh)
            .map_or_else(|| drawable.distance_to(self.eye), |sub| {
                sub.bounding.world_sphere().center.distance(self.eye)
            });
        let entry = RenderEntry {
            mesh,
            sub_mesh,
            material,
            distance,
            alpha_index: drawable.alpha_index,
            order: self.next_order,
        };
        self.next_order += 1;

        let index = usize::from(drawable.rendering_group_id).min(MAX_RENDERING_GROUPS - 1);
        let group = self.groups[index].get_or_insert_with(RenderingGroup::default);
        if material_data.need_depth_pre_pass {
            group.depth_only.push(entry);
        }
        if material_data.needs_alpha_blending(drawable.visibility) {
            group.transparent.push(entry);
        } else if material_data.needs_alpha_testing() {
            group.alpha_test.push(entry);
        } else {
            group.opaque.push(entry);
        }
    }

    /// Draws every group in ascending id order.
    pub fn render(
        &mut self,
        stages: &mut StageRegistry,
        ctx: &mut StageContext<'_>,
        pass: &DrawPass,
        trace: &mut FrameTrace,
    ) -> Result<DispatchStats> {
        let mut stats = DispatchStats::default();
        let render_id = self.render_id;

        for index in 0..MAX_RENDERING_GROUPS {
            let Some(group) = self.groups[index].as_mut() else {
                continue;
            };
            let id = index as u8;
            let order = self.orders[index];

            if index > 0 {
                ctx.gpu.clear(self.clear_policies[index].flags(), [0.0; 4]);
            }
            stages.run(ctx, |stages, ctx| stages.before_rendering_group_draw.run(ctx, id))?;

            if let Some(compare) = order.opaque {
                group.opaque.sort_by(compare);
            }
            if let Some(compare) = order.alpha_test {
                group.alpha_test.sort_by(compare);
            }
            if let Some(compare) = order.transparent {
                group.transparent.sort_by(compare);
            }

            let buckets = [
                (RenderClass::DepthOnly, &group.depth_only),
                (RenderClass::Opaque, &group.opaque),
                (RenderClass::AlphaTest, &group.alpha_test),
                (RenderClass::Transparent, &group.transparent),
            ];
            for (class, entries) in buckets {
                for entry in entries {
                    let target = DrawTarget {
                        pass,
                        render_id,
                        group: id,
                        class,
                    };
                    if draw_entry(stages, ctx, &target, entry, trace)? {
                        stats.drawn += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
            }
            ctx.gpu.set_color_write(true, false);

            stages.run(ctx, |stages, ctx| stages.after_rendering_group_draw.run(ctx, id))?;
        }
        Ok(stats)
    }
}

// ============================================================================
// Draw
// ============================================================================

struct DrawTarget<'p> {
    pass: &'p DrawPass,
    render_id: u64,
    group: u8,
    class: RenderClass,
}

/// Per-instance data of a draw.
enum InstanceData {
    None,
    /// World matrices of the visible instances (and the source itself).
    Instances(Vec<Mat4>),
    /// Matrices relative to the mesh world matrix; `upload` when changed.
    Thin { matrices: Vec<Mat4>, upload: bool },
}

fn instance_data(scene: &Scene, mesh: MeshKey, render_id: u64) -> InstanceData {
    let Some(drawable) = scene.mesh(mesh) else {
        return InstanceData::None;
    };
    if let Some(batch) = drawable.batch(render_id)
        && !batch.instances.is_empty()
    {
        let mut matrices = Vec::with_capacity(batch.instances.len() + 1);
        if batch.include_self {
            matrices.push(drawable.transform.world_matrix_as_mat4());
        }
        matrices.extend(
            batch
                .instances
                .iter()
                .filter_map(|instance| scene.mesh(*instance))
                .map(|instance| instance.transform.world_matrix_as_mat4()),
        );
        return InstanceData::Instances(matrices);
    }
    match drawable.thin_instances() {
        Some(thin) if !thin.is_empty() => InstanceData::Thin {
            matrices: thin.matrices().to_vec(),
            upload: thin.dirty,
        },
        _ => InstanceData::None,
    }
}

/// Uploads instance matrices into the mesh's instance buffer, creating it
/// on first use.
fn upload_instances(
    scene: &mut Scene,
    gpu: &mut GpuStateCache,
    mesh: MeshKey,
    matrices: &[Mat4],
    force: bool,
) -> Option<BufferKey> {
    let drawable = scene.mesh_mut(mesh)?;
    let bytes: &[u8] = bytemuck::cast_slice(matrices);
    let buffer = match drawable.instance_buffer.filter(|buffer| gpu.contains_buffer(*buffer)) {
        Some(buffer) => {
            if force && let Err(err) = gpu.update_buffer(buffer, bytes) {
                log::warn!("Failed to update instance buffer of '{}': {err}", drawable.name);
                return None;
            }
            buffer
        }
        None => {
            let buffer = gpu.register_buffer(BufferDesc {
                label: format!("{}:instances", drawable.name),
                usage: BufferUsage::Instance,
                data: bytes.to_vec(),
                dynamic: true,
            });
            drawable.instance_buffer = Some(buffer);
            buffer
        }
    };
    if let Some(thin) = drawable.thin_instances_mut() {
        thin.dirty = false;
    }
    Some(buffer)
}

fn bind_instance_attributes(gpu: &mut GpuStateCache, buffer: BufferKey) {
    for column in 0..4 {
        let location = INSTANCE_MATRIX_LOCATION + column;
        gpu.set_vertex_attribute(location, buffer, AttribLayout::floats(4, 64, column * 16));
        gpu.set_attribute_divisor(location, 1);
    }
}

fn unbind_instance_attributes(gpu: &mut GpuStateCache) {
    for column in 0..4 {
        let location = INSTANCE_MATRIX_LOCATION + column;
        gpu.set_attribute_divisor(location, 0);
        gpu.disable_vertex_attribute(location);
    }
}

/// Binds material and geometry of `entry` and issues its draw call(s).
/// Returns `false` when the entry was skipped for this frame.
fn draw_entry(
    stages: &mut StageRegistry,
    ctx: &mut StageContext<'_>,
    target: &DrawTarget<'_>,
    entry: &RenderEntry,
    trace: &mut FrameTrace,
) -> Result<bool> {
    let ready = match ctx.scene.materials.get_mut(entry.material) {
        Some(material) => material.is_ready(ctx.gpu),
        None => false,
    };
    if !ready {
        log::trace!("Material of mesh {:?} not ready, skipped this frame", entry.mesh);
        return Ok(false);
    }

    let Some(drawable) = ctx.scene.mesh(entry.mesh) else {
        return Ok(false);
    };
    let Some(geometry_key) = drawable.geometry.filter(|key| ctx.scene.geometries.contains_key(*key)) else {
        return Ok(false);
    };
    let Some(sub) = drawable.sub_meshes().get(entry.sub_mesh) else {
        return Ok(false);
    };
    let ranges = (sub.index_start, sub.index_count, sub.vertex_start, sub.vertex_count);
    let is_lines = matches!(drawable.kind, DrawableKind::Lines { .. });
    let world = drawable.transform.world_matrix_as_mat4();
    let instances = instance_data(ctx.scene, entry.mesh, target.render_id);

    stages.run(ctx, |stages, ctx| stages.before_rendering_mesh.run(ctx, entry.mesh, entry.sub_mesh))?;

    let scene = &mut *ctx.scene;
    let gpu = &mut *ctx.gpu;
    gpu.begin_draw();

    let Some(material) = scene.materials.get_mut(entry.material) else {
        return Ok(false);
    };
    let program = material.program(gpu);
    gpu.use_program(Some(program), false);
    if gpu.bound_program() != Some(program) {
        return Ok(false);
    }

    let blended = target.class == RenderClass::Transparent;
    gpu.set_depth_state(material.depth_state(blended), false);
    gpu.set_blend_mode(if blended { material.blend_mode } else { BlendMode::Disabled }, false);
    gpu.set_cull_mode(material.cull_mode(), false);
    gpu.set_color_write(target.class != RenderClass::DepthOnly, false);
    for (slot, texture) in material.textures.clone().into_iter().enumerate() {
        if let Some(unit) = gpu.bind_texture_to_next_available_unit(texture)? {
            gpu.set_sampler(slot as u32, unit, false);
        }
    }

    gpu.set_matrix(UniformSlot::View, &target.pass.view, false);
    gpu.set_matrix(UniformSlot::Projection, &target.pass.projection, false);
    gpu.set_matrix(UniformSlot::ViewProjection, &target.pass.view_projection, false);
    gpu.set_matrix(UniformSlot::World, &world, false);

    let hardware_instancing = gpu.capabilities().instanced_arrays && !matches!(instances, InstanceData::None);
    let Some(geometry) = scene.geometries.get_mut(geometry_key) else {
        return Ok(false);
    };
    if !geometry.bind(gpu, program, !hardware_instancing) {
        return Ok(false);
    }

    let mode = if is_lines { PrimitiveMode::Lines } else { geometry.mode };
    let (index_start, index_count, vertex_start, vertex_count) = ranges;
    let format = geometry.index_format();
    let indexed = geometry.is_indexed();
    let single = if indexed {
        DrawCall::Elements {
            mode,
            first: index_start,
            count: index_count,
            format,
        }
    } else {
        DrawCall::Arrays {
            mode,
            first: vertex_start,
            count: vertex_count,
        }
    };

    let (matrices, thin, force_upload) = match instances {
        InstanceData::None => (Vec::new(), false, false),
        InstanceData::Instances(matrices) => (matrices, false, true),
        InstanceData::Thin { matrices, upload } => (matrices, true, upload),
    };

    let drawn_instances = if matrices.is_empty() {
        gpu.draw(&single);
        1
    } else if hardware_instancing {
        let Some(buffer) = upload_instances(scene, gpu, entry.mesh, &matrices, force_upload) else {
            return Ok(false);
        };
        let count = matrices.len() as u32;
        bind_instance_attributes(gpu, buffer);
        let call = if indexed {
            DrawCall::ElementsInstanced {
                mode,
                first: index_start,
                count: index_count,
                format,
                instances: count,
            }
        } else {
            DrawCall::ArraysInstanced {
                mode,
                first: vertex_start,
                count: vertex_count,
                instances: count,
            }
        };
        gpu.draw(&call);
        unbind_instance_attributes(gpu);
        count
    } else {
        for matrix in &matrices {
            let instance_world = if thin { world * *matrix } else { *matrix };
            gpu.set_matrix(UniformSlot::World, &instance_world, false);
            gpu.draw(&single);
        }
        matrices.len() as u32
    };

    stages.run(ctx, |stages, ctx| stages.after_rendering_mesh.run(ctx, entry.mesh, entry.sub_mesh))?;

    trace.record(DrawRecord {
        frame_id: target.pass.frame_id,
        render_id: target.render_id,
        camera: target.pass.camera,
        target: target.pass.target,
        group: target.group,
        class: target.class,
        mesh: entry.mesh,
        sub_mesh: entry.sub_mesh,
        material: entry.material,
        instances: drawn_instances,
    });
    Ok(true)
}
