use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

/// Position + color vertex, the layout used by simple shaded models and the
/// raster fallback path.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct VertexPosColor {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

/// Position + texcoord + normal + tangent vertex for textured static meshes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct VertexPosTexNormTan {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
}

/// One of the two fixed vertex layouts a model may carry. The stride is
/// derived from which layout is populated, never stated separately.
pub enum VertexData {
    PosColor(Vec<VertexPosColor>),
    Textured(Vec<VertexPosTexNormTan>),
}

impl VertexData {
    pub fn stride(&self) -> u64 {
        match self {
            VertexData::PosColor(_) => std::mem::size_of::<VertexPosColor>() as u64,
            VertexData::Textured(_) => std::mem::size_of::<VertexPosTexNormTan>() as u64,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            VertexData::PosColor(v) => v.len() as u32,
            VertexData::Textured(v) => v.len() as u32,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            VertexData::PosColor(v) => bytemuck::cast_slice(v),
            VertexData::Textured(v) => bytemuck::cast_slice(v),
        }
    }
}

/// CPU-side model description handed to the registry. Indices are optional;
/// an empty index list means non-indexed triangles.
pub struct ModelData {
    pub vertices: VertexData,
    pub indices: Vec<u32>,
}

/// GPU buffers for one model, immutable after creation. Owned by the
/// [`GeometryRegistry`] for the lifetime of the model.
pub struct GeometryBuffer {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: Option<wgpu::Buffer>,
    pub vertex_count: u32,
    pub index_count: u32,
    pub vertex_stride: u64,
    /// Sizing descriptor for this geometry; the same descriptor drives both
    /// the acceleration-structure size query and the build itself, so the
    /// structure can never be allocated smaller than queried.
    pub size_desc: wgpu::BlasTriangleGeometrySizeDescriptor,
}

impl GeometryBuffer {
    pub fn triangle_count(&self) -> u32 {
        if self.index_count > 0 {
            self.index_count / 3
        } else {
            self.vertex_count / 3
        }
    }
}

/// Owns every model's vertex/index buffers and their size metadata.
pub struct GeometryRegistry {
    models: Vec<GeometryBuffer>,
}

impl GeometryRegistry {
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    /// Uploads one model and returns its handle.
    pub fn add_model(&mut self, device: &wgpu::Device, label: &str, data: &ModelData) -> u32 {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: data.vertices.bytes(),
            usage: wgpu::BufferUsages::BLAS_INPUT | wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = (!data.indices.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&data.indices),
                usage: wgpu::BufferUsages::BLAS_INPUT | wgpu::BufferUsages::INDEX,
            })
        });

        let size_desc = size_descriptor(&data.vertices, &data.indices);

        let id = self.models.len() as u32;
        self.models.push(GeometryBuffer {
            vertex_buffer,
            index_buffer,
            vertex_count: data.vertices.count(),
            index_count: data.indices.len() as u32,
            vertex_stride: data.vertices.stride(),
            size_desc,
        });
        log::debug!("registered model '{label}' as #{id}");
        id
    }

    pub fn get(&self, id: u32) -> &GeometryBuffer {
        &self.models[id as usize]
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn size_descriptor(
    vertices: &VertexData,
    indices: &[u32],
) -> wgpu::BlasTriangleGeometrySizeDescriptor {
    wgpu::BlasTriangleGeometrySizeDescriptor {
        // Only the leading position is consumed by the build; trailing
        // attributes are stepped over by the stride.
        vertex_format: wgpu::VertexFormat::Float32x3,
        vertex_count: vertices.count(),
        index_format: (!indices.is_empty()).then_some(wgpu::IndexFormat::Uint32),
        index_count: (!indices.is_empty()).then_some(indices.len() as u32),
        flags: wgpu::AccelerationStructureGeometryFlags::OPAQUE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_follows_populated_layout() {
        let colored = VertexData::PosColor(vec![VertexPosColor {
            position: [0.0; 3],
            color: [1.0; 4],
        }]);
        assert_eq!(colored.stride(), 28);

        let textured = VertexData::Textured(vec![VertexPosTexNormTan {
            position: [0.0; 3],
            texcoord: [0.0; 2],
            normal: [0.0; 3],
            tangent: [0.0; 4],
        }]);
        assert_eq!(textured.stride(), 48);
    }

    #[test]
    fn size_descriptor_reflects_indexing() {
        let vertices = VertexData::PosColor(vec![
            VertexPosColor {
                position: [0.0; 3],
                color: [1.0; 4],
            };
            4
        ]);

        let indexed = size_descriptor(&vertices, &[0, 1, 2, 2, 1, 3]);
        assert_eq!(indexed.vertex_count, 4);
        assert_eq!(indexed.index_format, Some(wgpu::IndexFormat::Uint32));
        assert_eq!(indexed.index_count, Some(6));

        let plain = size_descriptor(&vertices, &[]);
        assert_eq!(plain.index_format, None);
        assert_eq!(plain.index_count, None);
    }
}
