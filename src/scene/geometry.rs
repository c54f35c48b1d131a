use glam::Vec3;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::MeshKey;
use super::bounding::BoundingBox;
use crate::gpu::{
    AttribLayout, BufferDesc, BufferKey, BufferTarget, BufferUsage, GpuStateCache, IndexFormat,
    PrimitiveMode, ProgramKey, VertexArrayAttribute, VertexArrayDesc, VertexArrayKey,
};

/// Attribute location of positions.
pub const POSITION_LOCATION: u32 = 0;

/// One non-interleaved vertex attribute stream.
#[derive(Debug, Clone)]
pub struct VertexStream {
    pub location: u32,
    pub layout: AttribLayout,
    pub data: Vec<u8>,
    pub(crate) buffer: Option<BufferKey>,
}

/// Shared vertex and index data.
///
/// GPU buffers are registered on first bind. Vertex array objects are
/// cached per program, because attribute locations belong to the program.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub label: String,
    pub mode: PrimitiveMode,
    streams: SmallVec<[VertexStream; 4]>,
    positions: Vec<Vec3>,
    indices: Option<Vec<u32>>,
    index_format: IndexFormat,
    bounds: BoundingBox,

    index_buffer: Option<BufferKey>,
    vertex_arrays: FxHashMap<ProgramKey, VertexArrayKey>,
    pub(crate) owners: SmallVec<[MeshKey; 4]>,
}

impl Geometry {
    /// Geometry with a position stream at [`POSITION_LOCATION`].
    #[must_use]
    pub fn new(label: impl Into<String>, positions: Vec<Vec3>) -> Self {
        let bounds = BoundingBox::from_points(positions.iter().copied());
        let stream = VertexStream {
            location: POSITION_LOCATION,
            layout: AttribLayout::floats(3, 12, 0),
            data: bytemuck::cast_slice(&positions).to_vec(),
            buffer: None,
        };
        Self {
            label: label.into(),
            mode: PrimitiveMode::Triangles,
            streams: smallvec::smallvec![stream],
            positions,
            indices: None,
            index_format: IndexFormat::U16,
            bounds,
            index_buffer: None,
            vertex_arrays: FxHashMap::default(),
            owners: SmallVec::new(),
        }
    }

    /// Adds indices; 16-bit storage is used when every vertex fits.
    #[must_use]
    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.index_format = if self.positions.len() <= usize::from(u16::MAX) + 1 {
            IndexFormat::U16
        } else {
            IndexFormat::U32
        };
        self.indices = Some(indices);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: PrimitiveMode) -> Self {
        self.mode = mode;
        self
    }

    /// Adds an extra attribute stream (normals, uvs, ...).
    pub fn add_stream(&mut self, location: u32, layout: AttribLayout, data: Vec<u8>) {
        self.streams.retain(|stream| stream.location != location);
        self.streams.push(VertexStream {
            location,
            layout,
            data,
            buffer: None,
        });
    }

    #[must_use]
    pub fn streams(&self) -> &[VertexStream] {
        &self.streams
    }

    #[must_use]
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn index_count(&self) -> Option<u32> {
        self.indices.as_ref().map(|indices| indices.len() as u32)
    }

    #[inline]
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }

    #[inline]
    #[must_use]
    pub fn index_format(&self) -> IndexFormat {
        self.index_format
    }

    #[must_use]
    pub fn owners(&self) -> &[MeshKey] {
        &self.owners
    }

    /// Bounds of the vertices referenced by an index or vertex range.
    #[must_use]
    pub fn range_bounds(&self, index_start: u32, index_count: u32, vertex_start: u32, vertex_count: u32) -> BoundingBox {
        match &self.indices {
            Some(indices) => {
                let start = index_start as usize;
                let end = (start + index_count as usize).min(indices.len());
                BoundingBox::from_points(
                    indices[start.min(end)..end]
                        .iter()
                        .filter_map(|index| self.positions.get(*index as usize).copied()),
                )
            }
            None => {
                let start = vertex_start as usize;
                let end = (start + vertex_count as usize).min(self.positions.len());
                BoundingBox::from_points(self.positions[start.min(end)..end].iter().copied())
            }
        }
    }

    // ========================================================================
    // GPU
    // ========================================================================

    #[allow(clippy::cast_possible_truncation)]
    fn ensure_buffers(&mut self, gpu: &mut GpuStateCache) {
        for stream in &mut self.streams {
            if stream.buffer.is_none_or(|key| !gpu.contains_buffer(key)) {
                stream.buffer = Some(gpu.register_buffer(BufferDesc {
                    label: format!("{}:{}", self.label, stream.location),
                    usage: BufferUsage::Vertex,
                    data: stream.data.clone(),
                    dynamic: false,
                }));
            }
        }
        let Some(indices) = &self.indices else {
            return;
        };
        if self.index_buffer.is_none_or(|key| !gpu.contains_buffer(key)) {
            let data: Vec<u8> = match self.index_format {
                IndexFormat::U16 => {
                    let narrow: Vec<u16> = indices.iter().map(|index| *index as u16).collect();
                    bytemuck::cast_slice(&narrow).to_vec()
                }
                IndexFormat::U32 => bytemuck::cast_slice(indices).to_vec(),
            };
            self.index_buffer = Some(gpu.register_buffer(BufferDesc {
                label: format!("{}:indices", self.label),
                usage: BufferUsage::Index,
                data,
                dynamic: false,
            }));
        }
    }

    /// Binds vertex and index data for `program`.
    ///
    /// With `use_vertex_array` (and device support) a vertex array object
    /// is recorded once per program and rebound afterwards; otherwise the
    /// attributes are bound directly.
    pub fn bind(&mut self, gpu: &mut GpuStateCache, program: ProgramKey, use_vertex_array: bool) -> bool {
        self.ensure_buffers(gpu);

        if use_vertex_array && gpu.capabilities().vertex_array_objects {
            let key = match self.vertex_arrays.get(&program) {
                Some(key) => *key,
                None => {
                    let desc = VertexArrayDesc {
                        attributes: self
                            .streams
                            .iter()
                            .filter_map(|stream| {
                                stream.buffer.map(|buffer| VertexArrayAttribute {
                                    location: stream.location,
                                    buffer,
                                    layout: stream.layout,
                                })
                            })
                            .collect(),
                        index_buffer: self.index_buffer,
                    };
                    let key = gpu.register_vertex_array(desc);
                    self.vertex_arrays.insert(program, key);
                    key
                }
            };
            gpu.bind_vertex_array(Some(key), false);
            return gpu.bound_vertex_array() == Some(key);
        }

        gpu.bind_vertex_array(None, false);
        let mut complete = true;
        for stream in &self.streams {
            match stream.buffer {
                Some(buffer) => {
                    gpu.set_vertex_attribute(stream.location, buffer, stream.layout);
                }
                None => complete = false,
            }
        }
        if self.indices.is_some() {
            complete &= self.index_buffer.is_some();
            gpu.bind_buffer(BufferTarget::ElementArray, self.index_buffer, false);
        }
        complete
    }

    /// Drops the vertex array cache so arrays are re-recorded on next bind.
    pub fn rebuild(&mut self, gpu: &mut GpuStateCache) -> usize {
        let dropped = self.vertex_arrays.len();
        for (_, key) in self.vertex_arrays.drain() {
            gpu.dispose_vertex_array(key);
        }
        dropped
    }

    /// Releases every GPU object owned by the geometry.
    pub fn release(&mut self, gpu: &mut GpuStateCache) {
        self.rebuild(gpu);
        for stream in &mut self.streams {
            if let Some(buffer) = stream.buffer.take() {
                gpu.release_buffer(buffer);
            }
        }
        if let Some(buffer) = self.index_buffer.take() {
            gpu.release_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Geometry {
        Geometry::new(
            "quad",
            vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 5.0),
            ],
        )
        .with_indices(vec![0, 1, 2, 0, 2, 3])
    }

    #[test]
    fn range_bounds_follow_indices() {
        let geometry = quad();
        let first = geometry.range_bounds(0, 3, 0, 0);
        assert!((first.max.z).abs() < f32::EPSILON);
        let second = geometry.range_bounds(3, 3, 0, 0);
        assert!((second.max.z - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn small_geometry_uses_16_bit_indices() {
        let geometry = quad();
        assert_eq!(geometry.index_format(), IndexFormat::U16);
        assert_eq!(geometry.index_count(), Some(6));
    }
}
