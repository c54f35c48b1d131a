use std::fmt;

use glam::{Mat4, Vec3, Vec4};
use rustc_hash::FxHashMap;

use super::{CameraKey, MeshKey, RenderTargetKey};
use crate::gpu::PixelViewport;

// ============================================================================
// Projection & Viewport
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Vertical field of view in radians.
    Perspective { fov_y: f32, near: f32, far: f32 },
    /// Half of the visible height in world units.
    Orthographic { half_height: f32, near: f32, far: f32 },
}

impl Projection {
    #[must_use]
    pub fn matrix(&self, aspect: f32) -> Mat4 {
        match *self {
            Self::Perspective { fov_y, near, far } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Self::Orthographic { half_height, near, far } => {
                let half_width = half_height * aspect;
                Mat4::orthographic_rh(-half_width, half_width, -half_height, half_height, near, far)
            }
        }
    }
}

/// Viewport in normalized `[0, 1]` render-surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

impl Viewport {
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn to_pixels(&self, surface_width: u32, surface_height: u32) -> PixelViewport {
        let (w, h) = (surface_width as f32, surface_height as f32);
        PixelViewport::new(
            (self.x * w).round() as i32,
            (self.y * h).round() as i32,
            (self.width * w).round().max(0.0) as u32,
            (self.height * h).round().max(0.0) as u32,
        )
    }
}

// ============================================================================
// LOD Selector
// ============================================================================

/// Outcome of a level-of-detail decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodChoice {
    /// Render the mesh itself.
    Keep,
    /// Render another mesh in its place.
    Replace(MeshKey),
    /// Render nothing.
    Cull,
}

/// Custom LOD selection: `(mesh, camera distance) -> choice`.
pub type LodSelector = Box<dyn Fn(MeshKey, f32) -> LodChoice>;

// ============================================================================
// Camera
// ============================================================================

/// A view into the scene.
///
/// View and projection matrices are rebuilt by [`Camera::update`]; each
/// rebuild bumps a version counter that the [`FrustumCache`] compares
/// against.
pub struct Camera {
    pub name: String,
    projection: Projection,
    aspect: f32,

    position: Vec3,
    target: Vec3,
    up: Vec3,

    view_matrix: Mat4,
    projection_matrix: Mat4,
    view_projection_matrix: Mat4,
    view_version: u64,
    projection_version: u64,
    view_dirty: bool,
    projection_dirty: bool,

    pub viewport: Viewport,
    pub layer_mask: u32,
    pub lod_selector: Option<LodSelector>,

    /// Sub-cameras rendered in place of this camera (stereo rigs and the
    /// like). Empty for ordinary cameras.
    pub rig_cameras: Vec<CameraKey>,
    /// Render into this target instead of the default framebuffer.
    pub output_render_target: Option<RenderTargetKey>,
    /// Targets rendered before this camera draws.
    pub custom_render_targets: Vec<RenderTargetKey>,
}

impl fmt::Debug for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Camera")
            .field("name", &self.name)
            .field("projection", &self.projection)
            .field("position", &self.position)
            .field("target", &self.target)
            .field("layer_mask", &self.layer_mask)
            .field("rig_cameras", &self.rig_cameras)
            .finish_non_exhaustive()
    }
}

impl Camera {
    #[must_use]
    pub fn new(name: impl Into<String>, projection: Projection, aspect: f32) -> Self {
        let mut camera = Self {
            name: name.into(),
            projection,
            aspect,
            position: Vec3::new(0.0, 0.0, 10.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection_matrix: Mat4::IDENTITY,
            view_version: 0,
            projection_version: 0,
            view_dirty: true,
            projection_dirty: true,
            viewport: Viewport::default(),
            layer_mask: u32::MAX,
            lod_selector: None,
            rig_cameras: Vec::new(),
            output_render_target: None,
            custom_render_targets: Vec::new(),
        };
        camera.update();
        camera
    }

    /// Perspective camera; `fov_y_degrees` is converted to radians.
    #[must_use]
    pub fn new_perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::new(
            "Camera",
            Projection::Perspective {
                fov_y: fov_y_degrees.to_radians(),
                near,
                far,
            },
            aspect,
        )
    }

    // ========================================================================
    // Setters (mark dirty)
    // ========================================================================

    pub fn set_position(&mut self, position: Vec3) {
        if position != self.position {
            self.position = position;
            self.view_dirty = true;
        }
    }

    pub fn look_at(&mut self, target: Vec3) {
        if target != self.target {
            self.target = target;
            self.view_dirty = true;
        }
    }

    pub fn set_up(&mut self, up: Vec3) {
        if up != self.up {
            self.up = up;
            self.view_dirty = true;
        }
    }

    pub fn set_projection(&mut self, projection: Projection) {
        if projection != self.projection {
            self.projection = projection;
            self.projection_dirty = true;
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if (aspect - self.aspect).abs() > f32::EPSILON {
            self.aspect = aspect;
            self.projection_dirty = true;
        }
    }

    /// Rebuilds dirty matrices. Returns whether anything changed.
    pub fn update(&mut self) -> bool {
        let mut changed = false;
        if self.view_dirty {
            self.view_matrix = Mat4::look_at_rh(self.position, self.target, self.up);
            self.view_version += 1;
            self.view_dirty = false;
            changed = true;
        }
        if self.projection_dirty {
            self.projection_matrix = self.projection.matrix(self.aspect);
            self.projection_version += 1;
            self.projection_dirty = false;
            changed = true;
        }
        if changed {
            self.view_projection_matrix = self.projection_matrix * self.view_matrix;
        }
        changed
    }

    // ========================================================================
    // Getters
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> Vec3 {
        self.target
    }

    #[inline]
    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    #[inline]
    #[must_use]
    pub fn view_matrix(&self) -> &Mat4 {
        &self.view_matrix
    }

    #[inline]
    #[must_use]
    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection_matrix
    }

    #[inline]
    #[must_use]
    pub fn view_projection_matrix(&self) -> &Mat4 {
        &self.view_projection_matrix
    }

    #[inline]
    #[must_use]
    pub fn view_version(&self) -> u64 {
        self.view_version
    }

    #[inline]
    #[must_use]
    pub fn projection_version(&self) -> u64 {
        self.projection_version
    }

    #[inline]
    #[must_use]
    pub fn has_rig(&self) -> bool {
        !self.rig_cameras.is_empty()
    }
}

// ============================================================================
// Frustum
// ============================================================================

/// The six clip planes of a view-projection matrix, normalized, facing
/// inwards. Order: left, right, bottom, top, near, far.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrustumPlanes {
    planes: [Vec4; 6],
}

impl FrustumPlanes {
    /// Gribb-Hartmann extraction for a `[0, 1]` depth range.
    #[must_use]
    pub fn from_matrix(m: &Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut planes = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[2],
            rows[3] - rows[2],
        ];

        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }

        Self { planes }
    }

    #[inline]
    #[must_use]
    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }

    #[must_use]
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.intersects_sphere(point, 0.0)
    }
}

/// Memoized frustum planes per camera, keyed on the camera's view and
/// projection versions.
#[derive(Debug, Default)]
pub struct FrustumCache {
    entries: FxHashMap<CameraKey, (u64, u64, FrustumPlanes)>,
    recomputes: u64,
}

impl FrustumCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn planes(&mut self, key: CameraKey, camera: &Camera) -> FrustumPlanes {
        let versions = (camera.view_version(), camera.projection_version());
        if let Some((view, projection, planes)) = self.entries.get(&key)
            && (*view, *projection) == versions
        {
            return *planes;
        }

        let planes = FrustumPlanes::from_matrix(camera.view_projection_matrix());
        self.entries.insert(key, (versions.0, versions.1, planes));
        self.recomputes += 1;
        planes
    }

    /// Number of times planes were actually extracted.
    #[inline]
    #[must_use]
    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }

    pub fn forget(&mut self, key: CameraKey) {
        self.entries.remove(&key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        let mut camera = Camera::new_perspective(60.0, 1.0, 0.1, 100.0);
        camera.set_position(Vec3::new(0.0, 0.0, 10.0));
        camera.look_at(Vec3::ZERO);
        camera.update();
        camera
    }

    #[test]
    fn frustum_contains_target_but_not_behind() {
        let camera = camera();
        let frustum = FrustumPlanes::from_matrix(camera.view_projection_matrix());
        assert!(frustum.contains_point(Vec3::ZERO));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 20.0)));
        assert!(!frustum.intersects_sphere(Vec3::new(500.0, 0.0, 0.0), 1.0));
        assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, 10.5), 1.0));
    }

    #[test]
    fn versions_only_advance_on_change() {
        let mut camera = camera();
        let (view, projection) = (camera.view_version(), camera.projection_version());
        assert!(!camera.update());

        camera.set_position(Vec3::new(1.0, 0.0, 10.0));
        assert!(camera.update());
        assert_eq!(camera.view_version(), view + 1);
        assert_eq!(camera.projection_version(), projection);
    }

    #[test]
    fn viewport_to_pixels() {
        let viewport = Viewport::new(0.5, 0.0, 0.5, 1.0);
        assert_eq!(viewport.to_pixels(800, 600), PixelViewport::new(400, 0, 400, 600));
    }
}
