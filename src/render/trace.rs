//! Per-frame draw trace.
//!
//! Every draw issued by the dispatcher leaves one [`DrawRecord`]. The trace
//! is cleared at the start of each frame.

use crate::scene::{CameraKey, MaterialKey, MeshKey, RenderTargetKey};

/// Bucket a draw was issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderClass {
    /// Depth pre-pass draw with color writes disabled.
    DepthOnly,
    Opaque,
    AlphaTest,
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRecord {
    pub frame_id: u64,
    pub render_id: u64,
    pub camera: CameraKey,
    /// `None` when drawn to the camera's framebuffer.
    pub target: Option<RenderTargetKey>,
    pub group: u8,
    pub class: RenderClass,
    pub mesh: MeshKey,
    pub sub_mesh: usize,
    pub material: MaterialKey,
    /// Instances produced by the draw (1 for a plain draw).
    pub instances: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FrameTrace {
    frame_id: u64,
    records: Vec<DrawRecord>,
}

impl FrameTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_frame(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
        self.records.clear();
    }

    pub(crate) fn record(&mut self, record: DrawRecord) {
        self.records.push(record);
    }

    #[inline]
    #[must_use]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[must_use]
    pub fn records(&self) -> &[DrawRecord] {
        &self.records
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Color draws (depth pre-pass excluded) of `mesh` this frame.
    #[must_use]
    pub fn draws_of(&self, mesh: MeshKey) -> usize {
        self.records
            .iter()
            .filter(|record| record.mesh == mesh && record.class != RenderClass::DepthOnly)
            .count()
    }

    /// Group ids in draw order, one entry per record.
    #[must_use]
    pub fn group_sequence(&self) -> Vec<u8> {
        self.records.iter().map(|record| record.group).collect()
    }
}
