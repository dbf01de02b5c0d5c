use crate::accel::blas_sizes;
use crate::geometry::GeometryBuffer;

/// Creates the bottom-level structure for one model's geometry buffers.
///
/// The geometry size descriptors are queried for the exact vertex/index set
/// and passed to the device unchanged, so scratch and result are allocated
/// to exactly the queried sizes. The returned `wgpu::Blas` is internally
/// reference-counted; instances and top-level builds that hold a clone keep
/// it alive. The structure is only valid for tracing once the recorded
/// build has executed and its fence target has retired. Ordering is the
/// frame orchestrator's job, not this builder's.
pub fn build_blas(device: &wgpu::Device, label: &str, geometries: &[&GeometryBuffer]) -> wgpu::Blas {
    let descriptors: Vec<_> = geometries.iter().map(|g| g.size_desc.clone()).collect();
    let triangles: u64 = geometries.iter().map(|g| g.triangle_count() as u64).sum();
    let sizes = blas_sizes(triangles);
    log::debug!(
        "BLAS '{label}': {triangles} triangles, scratch {} B, result {} B",
        sizes.scratch,
        sizes.result,
    );

    device.create_blas(
        &wgpu::CreateBlasDescriptor {
            label: Some(label),
            flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
            update_mode: wgpu::AccelerationStructureUpdateMode::Build,
        },
        wgpu::BlasGeometrySizeDescriptors::Triangles { descriptors },
    )
}

/// Records one bottom-level build into the active command encoder.
pub fn encode_blas_build(
    encoder: &mut wgpu::CommandEncoder,
    blas: &wgpu::Blas,
    geometries: &[&GeometryBuffer],
) {
    let triangle_geometries: Vec<_> = geometries
        .iter()
        .map(|geo| wgpu::BlasTriangleGeometry {
            size: &geo.size_desc,
            vertex_buffer: &geo.vertex_buffer,
            first_vertex: 0,
            vertex_stride: geo.vertex_stride,
            index_buffer: geo.index_buffer.as_ref(),
            first_index: geo.index_buffer.as_ref().map(|_| 0),
            transform_buffer: None,
            transform_buffer_offset: None,
        })
        .collect();

    encoder.build_acceleration_structures(
        std::iter::once(&wgpu::BlasBuildEntry {
            blas,
            geometry: wgpu::BlasGeometries::TriangleGeometries(triangle_geometries),
        }),
        None,
    );
}
