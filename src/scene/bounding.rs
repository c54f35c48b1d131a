//! Bounding volumes and culling strategies.
//!
//! [`BoundingInfo`] keeps a local-space box and sphere plus a lazily refreshed
//! world-space copy of both. The world copy is tagged with the transform
//! world version it was computed from and is only rebuilt when that version
//! changes.

use glam::{Affine3A, Vec3};
use serde::{Deserialize, Serialize};

use super::camera::FrustumPlanes;

// ============================================================================
// Bounding Box
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
        }
    }
}

impl BoundingBox {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    /// Box spanning `points`; a degenerate box at the origin when empty.
    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for point in points {
            min = min.min(point);
            max = max.max(point);
        }
        if min.x > max.x {
            return Self::default();
        }
        Self { min, max }
    }

    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[must_use]
    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min, self.max);
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    /// Axis-aligned box enclosing the transformed corners.
    #[must_use]
    pub fn transform(&self, matrix: &Affine3A) -> Self {
        Self::from_points(self.corners().map(|corner| matrix.transform_point3(corner)))
    }

    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    #[must_use]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// `false` only when all eight corners lie behind one of the planes.
    #[must_use]
    pub fn is_in_frustum(&self, frustum: &FrustumPlanes) -> bool {
        let corners = self.corners();
        frustum
            .planes()
            .iter()
            .all(|plane| corners.iter().any(|corner| plane.truncate().dot(*corner) + plane.w >= 0.0))
    }

    /// `true` when every corner lies inside all six planes.
    #[must_use]
    pub fn is_completely_in_frustum(&self, frustum: &FrustumPlanes) -> bool {
        let corners = self.corners();
        frustum
            .planes()
            .iter()
            .all(|plane| corners.iter().all(|corner| plane.truncate().dot(*corner) + plane.w >= 0.0))
    }
}

// ============================================================================
// Bounding Sphere
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    #[must_use]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
        }
    }

    /// Sphere circumscribing `aabb`.
    #[must_use]
    pub fn from_box(aabb: &BoundingBox) -> Self {
        Self::new(aabb.center(), aabb.size().length() * 0.5)
    }

    /// Moves the center and scales the radius by the largest axis scale.
    #[must_use]
    pub fn transform(&self, matrix: &Affine3A) -> Self {
        let scale = matrix
            .matrix3
            .x_axis
            .length()
            .max(matrix.matrix3.y_axis.length())
            .max(matrix.matrix3.z_axis.length());
        Self::new(matrix.transform_point3(self.center), self.radius * scale)
    }

    #[must_use]
    pub fn is_in_frustum(&self, frustum: &FrustumPlanes) -> bool {
        frustum.intersects_sphere(self.center, self.radius)
    }

    #[must_use]
    pub fn is_center_in_frustum(&self, frustum: &FrustumPlanes) -> bool {
        frustum.contains_point(self.center)
    }
}

// ============================================================================
// Culling Strategy
// ============================================================================

/// Per-drawable frustum test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CullingStrategy {
    /// Sphere first, then the box if the sphere passes. Exact.
    #[default]
    Standard,
    /// Sphere only. Cheapest, may keep objects slightly outside.
    BoundingSphereOnly,
    /// Box only.
    BoundingBoxOnly,
    /// Accept immediately if the sphere center is inside, otherwise standard.
    OptimisticInclusion,
    /// Accept immediately if the sphere center is inside, otherwise sphere.
    OptimisticInclusionThenSphereOnly,
}

// ============================================================================
// Bounding Info
// ============================================================================

#[derive(Debug, Clone)]
pub struct BoundingInfo {
    local_box: BoundingBox,
    local_sphere: BoundingSphere,
    world_box: BoundingBox,
    world_sphere: BoundingSphere,
    /// World version of the transform the world volumes were built from.
    world_version: Option<u64>,
}

impl Default for BoundingInfo {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO)
    }
}

impl BoundingInfo {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        let local_box = BoundingBox::new(min, max);
        let local_sphere = BoundingSphere::from_box(&local_box);
        Self {
            local_box,
            local_sphere,
            world_box: local_box,
            world_sphere: local_sphere,
            world_version: None,
        }
    }

    #[must_use]
    pub fn local_box(&self) -> &BoundingBox {
        &self.local_box
    }

    #[must_use]
    pub fn local_sphere(&self) -> &BoundingSphere {
        &self.local_sphere
    }

    /// World-space box as of the last [`refresh`](Self::refresh).
    #[must_use]
    pub fn world_box(&self) -> &BoundingBox {
        &self.world_box
    }

    /// World-space sphere as of the last [`refresh`](Self::refresh).
    #[must_use]
    pub fn world_sphere(&self) -> &BoundingSphere {
        &self.world_sphere
    }

    /// Replaces the local volumes; the world copy becomes dirty.
    pub fn reset(&mut self, min: Vec3, max: Vec3) {
        *self = Self::new(min, max);
    }

    #[inline]
    #[must_use]
    pub fn is_dirty(&self, world_version: u64) -> bool {
        self.world_version != Some(world_version)
    }

    /// Rebuilds the world volumes if `world_version` differs from the one
    /// they were built from. Returns whether a rebuild happened.
    pub fn refresh(&mut self, world: &Affine3A, world_version: u64) -> bool {
        if !self.is_dirty(world_version) {
            return false;
        }
        self.world_box = self.local_box.transform(world);
        self.world_sphere = self.local_sphere.transform(world);
        self.world_version = Some(world_version);
        true
    }

    #[must_use]
    pub fn is_in_frustum(&self, frustum: &FrustumPlanes, strategy: CullingStrategy) -> bool {
        let optimistic = matches!(
            strategy,
            CullingStrategy::OptimisticInclusion | CullingStrategy::OptimisticInclusionThenSphereOnly
        );
        if optimistic && self.world_sphere.is_center_in_frustum(frustum) {
            return true;
        }

        match strategy {
            CullingStrategy::BoundingSphereOnly | CullingStrategy::OptimisticInclusionThenSphereOnly => {
                self.world_sphere.is_in_frustum(frustum)
            }
            CullingStrategy::BoundingBoxOnly => self.world_box.is_in_frustum(frustum),
            CullingStrategy::Standard | CullingStrategy::OptimisticInclusion => {
                self.world_sphere.is_in_frustum(frustum) && self.world_box.is_in_frustum(frustum)
            }
        }
    }

    #[must_use]
    pub fn intersects(&self, other: &BoundingInfo) -> bool {
        let distance = self.world_sphere.center.distance(other.world_sphere.center);
        if distance > self.world_sphere.radius + other.world_sphere.radius {
            return false;
        }
        self.world_box.intersects(&other.world_box)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_is_lazy() {
        let mut info = BoundingInfo::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let world = Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0));

        assert!(info.refresh(&world, 1));
        assert!(!info.refresh(&world, 1));
        assert_eq!(info.world_box().center(), Vec3::new(10.0, 0.0, 0.0));

        let scaled = Affine3A::from_scale(Vec3::splat(2.0));
        assert!(info.refresh(&scaled, 2));
        assert!((info.world_sphere().radius - 2.0 * 3f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn boxes_intersect() {
        let a = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let b = BoundingBox::new(Vec3::splat(0.5), Vec3::splat(2.0));
        let c = BoundingBox::new(Vec3::splat(3.0), Vec3::splat(4.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
