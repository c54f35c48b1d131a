//! Scene Module
//!
//! Arena-backed scene data consumed by the frame core:
//! - [`Scene`]: owner of every arena plus scene-wide flags
//! - [`Drawable`]: meshes, instances and line meshes with their sub-meshes
//! - [`Geometry`]: shared vertex/index data and its lazily created GPU buffers
//! - [`Material`]: program, textures and transparency mode
//! - [`Camera`]: view/projection with versioned matrices
//! - [`RenderTarget`]: offscreen framebuffers rendered before a camera draws
//! - [`BoundingInfo`]: local and lazily refreshed world bounds
//!
//! Everything is referenced through the typed keys below; nothing holds a
//! pointer into another arena.

pub mod bounding;
pub mod camera;
pub mod drawable;
pub mod geometry;
pub mod material;
pub mod render_target;
pub mod scene;
pub mod transform;

pub use bounding::{BoundingBox, BoundingInfo, BoundingSphere, CullingStrategy};
pub use camera::{Camera, FrustumCache, FrustumPlanes, LodChoice, LodSelector, Projection, Viewport};
pub use drawable::{Drawable, DrawableKind, InstanceBatch, LodLevel, SubMesh, ThinInstances};
pub use geometry::{Geometry, VertexStream};
pub use material::{Material, TransparencyMode};
pub use render_target::{RefreshRate, RenderTarget, RenderTargetDesc};
pub use scene::{Disposal, IntersectionEvent, IntersectionKind, Scene, Skeleton};
pub use transform::Transform;

use slotmap::new_key_type;

new_key_type! {
    pub struct MeshKey;
    pub struct GeometryKey;
    pub struct MaterialKey;
    pub struct CameraKey;
    pub struct RenderTargetKey;
    pub struct SkeletonKey;
}
