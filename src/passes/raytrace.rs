//! Ray dispatch pass: runs the ray-query kernel over the output image and
//! copies the result into the back buffer.

use bytemuck::{Pod, Zeroable};

use crate::pipeline::RayPipeline;
use crate::sbt::SbtLayout;

const WORKGROUP_SIZE: u32 = 8;

/// Uniform handed to the kernel describing the dispatch: where each binding
/// table section starts and how wide its records are (in 32-bit words), plus
/// the image extent.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchRecord {
    pub ray_gen_offset: u32,
    pub ray_gen_stride: u32,
    pub miss_offset: u32,
    pub miss_stride: u32,
    pub hit_offset: u32,
    pub hit_stride: u32,
    pub width: u32,
    pub height: u32,
}

impl DispatchRecord {
    pub fn new(layout: &SbtLayout, width: u32, height: u32) -> Self {
        Self {
            ray_gen_offset: (layout.ray_gen.offset / 4) as u32,
            ray_gen_stride: (layout.ray_gen.stride / 4) as u32,
            miss_offset: (layout.miss.offset / 4) as u32,
            miss_stride: (layout.miss.stride / 4) as u32,
            hit_offset: (layout.hit_group.offset / 4) as u32,
            hit_stride: (layout.hit_group.stride / 4) as u32,
            width,
            height,
        }
    }
}

pub struct RaytracePass {
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    dispatch_buffer: wgpu::Buffer,
    bind_group: Option<wgpu::BindGroup>,
    width: u32,
    height: u32,
}

impl RaytracePass {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        let (output, output_view) = create_output(device, format, width, height);
        let dispatch_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dispatch record"),
            size: std::mem::size_of::<DispatchRecord>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            output,
            output_view,
            dispatch_buffer,
            bind_group: None,
            width,
            height,
        }
    }

    /// Recreates the output image for a new surface size. The bind group is
    /// dropped and must be rebuilt before the next `record`.
    pub fn resize(
        &mut self,
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) {
        let (output, output_view) = create_output(device, format, width, height);
        self.output = output;
        self.output_view = output_view;
        self.bind_group = None;
        self.width = width;
        self.height = height;
    }

    /// Rebuilds the bind group against the current scene resources. Must be
    /// called again whenever the top-level structure object is recreated.
    #[allow(clippy::too_many_arguments)]
    pub fn rebind(
        &mut self,
        device: &wgpu::Device,
        pipeline: &RayPipeline,
        tlas: &wgpu::Tlas,
        camera_buffer: &wgpu::Buffer,
        sbt_buffer: &wgpu::Buffer,
        instance_constants: &wgpu::Buffer,
    ) {
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ray dispatch bind group"),
            layout: pipeline.bind_group_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::AccelerationStructure(tlas),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.output_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: sbt_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.dispatch_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: instance_constants.as_entire_binding(),
                },
            ],
        }));
    }

    pub fn update_dispatch(&self, queue: &wgpu::Queue, layout: &SbtLayout) {
        let record = DispatchRecord::new(layout, self.width, self.height);
        queue.write_buffer(&self.dispatch_buffer, 0, bytemuck::bytes_of(&record));
    }

    /// Records the kernel dispatch and the copy into the frame's back
    /// buffer. Callers must have bound resources via `rebind` first.
    pub fn record(
        &self,
        pipeline: &RayPipeline,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::Texture,
    ) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("ray dispatch"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline.pipeline());
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(
                self.width.div_ceil(WORKGROUP_SIZE),
                self.height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        encoder.copy_texture_to_texture(
            self.output.as_image_copy(),
            target.as_image_copy(),
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

fn create_output(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("ray output"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbt::SectionLayout;

    #[test]
    fn dispatch_record_counts_in_words() {
        let layout = SbtLayout {
            ray_gen: SectionLayout {
                offset: 0,
                stride: 32,
                size: 32,
                entry_count: 1,
            },
            miss: SectionLayout {
                offset: 64,
                stride: 64,
                size: 64,
                entry_count: 1,
            },
            hit_group: SectionLayout {
                offset: 128,
                stride: 64,
                size: 256,
                entry_count: 4,
            },
            total_size: 384,
        };
        let record = DispatchRecord::new(&layout, 800, 600);
        assert_eq!(record.ray_gen_stride, 8);
        assert_eq!(record.miss_offset, 16);
        assert_eq!(record.hit_offset, 32);
        assert_eq!(record.hit_stride, 16);
        assert_eq!((record.width, record.height), (800, 600));
    }
}
