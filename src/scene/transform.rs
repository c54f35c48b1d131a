use glam::{Affine3A, EulerRot, Mat4, Quat, Vec3};

/// Transform component.
///
/// Position, rotation and scale (TRS) plus cached local/world matrices and
/// shadow-state dirty checking. The world matrix carries a version counter
/// that bounding info and the frustum test use to detect changes.
#[derive(Debug, Clone)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,

    pub(crate) local_matrix: Affine3A,
    pub(crate) world_matrix: Affine3A,
    world_version: u64,
    /// Parent world version the current world matrix was built from.
    parent_version: Option<u64>,

    // Shadow state for dirty checking
    last_position: Vec3,
    last_rotation: Quat,
    last_scale: Vec3,
    force_update: bool,
}

impl Transform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,

            local_matrix: Affine3A::IDENTITY,
            world_matrix: Affine3A::IDENTITY,
            world_version: 0,
            parent_version: None,

            last_position: Vec3::ZERO,
            last_rotation: Quat::IDENTITY,
            last_scale: Vec3::ONE,
            force_update: true,
        }
    }

    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::new()
        }
    }

    // ========================================================================
    // Shadow State Check
    // ========================================================================

    /// Rebuilds the local matrix if any TRS component changed.
    ///
    /// Returns whether the local matrix changed.
    pub fn update_local_matrix(&mut self) -> bool {
        let changed = self.position != self.last_position
            || self.rotation != self.last_rotation
            || self.scale != self.last_scale
            || self.force_update;

        if changed {
            self.local_matrix =
                Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.position);
            self.last_position = self.position;
            self.last_rotation = self.rotation;
            self.last_scale = self.scale;
            self.force_update = false;
        }

        changed
    }

    /// Recomputes the world matrix from the parent's world matrix (if any).
    ///
    /// The world version only advances when something actually changed.
    pub fn update_world_matrix(&mut self, parent: Option<(&Affine3A, u64)>) -> bool {
        let local_changed = self.update_local_matrix();
        let parent_version = parent.map(|(_, version)| version);
        if !local_changed && parent_version == self.parent_version && self.world_version != 0 {
            return false;
        }

        self.world_matrix = match parent {
            Some((parent_world, _)) => *parent_world * self.local_matrix,
            None => self.local_matrix,
        };
        self.parent_version = parent_version;
        self.world_version = self.world_version.wrapping_add(1).max(1);
        true
    }

    /// Adopts a world matrix computed elsewhere (LOD meshes follow the mesh
    /// they replace).
    pub(crate) fn set_world_matrix(&mut self, world: Affine3A) -> bool {
        if world == self.world_matrix && self.world_version != 0 {
            return false;
        }
        self.world_matrix = world;
        self.world_version = self.world_version.wrapping_add(1).max(1);
        true
    }

    // ========================================================================
    // Getters & Helpers
    // ========================================================================

    pub fn set_rotation_euler(&mut self, x: f32, y: f32, z: f32) {
        self.rotation = Quat::from_euler(EulerRot::XYZ, x, y, z);
    }

    #[inline]
    #[must_use]
    pub fn local_matrix(&self) -> &Affine3A {
        &self.local_matrix
    }

    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> &Affine3A {
        &self.world_matrix
    }

    #[inline]
    #[must_use]
    pub fn world_matrix_as_mat4(&self) -> Mat4 {
        Mat4::from(self.world_matrix)
    }

    /// Increments whenever the world matrix is recomputed; `0` means the
    /// world matrix was never computed.
    #[inline]
    #[must_use]
    pub fn world_version(&self) -> u64 {
        self.world_version
    }

    #[inline]
    #[must_use]
    pub fn world_position(&self) -> Vec3 {
        self.world_matrix.translation.into()
    }

    /// Manual invalidation, forcing the next update to rebuild.
    pub fn mark_dirty(&mut self) {
        self.force_update = true;
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_version_advances_only_on_change() {
        let mut transform = Transform::new();
        assert!(transform.update_world_matrix(None));
        let version = transform.world_version();

        assert!(!transform.update_world_matrix(None));
        assert_eq!(transform.world_version(), version);

        transform.position = Vec3::new(1.0, 0.0, 0.0);
        assert!(transform.update_world_matrix(None));
        assert!(transform.world_version() > version);
        assert_eq!(transform.world_position(), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn parent_change_propagates() {
        let mut child = Transform::from_position(Vec3::X);
        let parent = Affine3A::from_translation(Vec3::new(0.0, 2.0, 0.0));

        child.update_world_matrix(Some((&parent, 1)));
        assert!(!child.update_world_matrix(Some((&parent, 1))));

        let moved = Affine3A::from_translation(Vec3::new(0.0, 5.0, 0.0));
        assert!(child.update_world_matrix(Some((&moved, 2))));
        assert_eq!(child.world_position(), Vec3::new(1.0, 5.0, 0.0));
    }
}
