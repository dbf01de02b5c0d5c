//! Demo scene: three spinning triangles sharing one bottom-level structure,
//! over a static ground plane. Exercises indexed and non-indexed geometry,
//! shared hit groups with per-instance root arguments, and per-frame refit.

use glam::{Mat4, Vec3};

use crate::accel::blas::{build_blas, encode_blas_build};
use crate::accel::tlas::{Instance, InstanceTable, RootArgument, TlasBuildMode, TlasBuilder};
use crate::error::Result;
use crate::geometry::{GeometryRegistry, ModelData, VertexData, VertexPosColor};
use crate::passes::RasterDraw;
use crate::sbt::{SbtEntry, SbtGenerator};
use crate::sync::{FenceSync, TrackedBuffer};

const TRIANGLE_COUNT: usize = 3;
const TRIANGLE_SPACING: f32 = 1.5;
/// Per-instance shading constants are one vec4 each.
const INSTANCE_CONSTANT_STRIDE: u64 = 16;

const TRIANGLE_COLORS: [[f32; 4]; TRIANGLE_COUNT] = [
    [1.0, 0.2, 0.2, 1.0],
    [0.2, 1.0, 0.2, 1.0],
    [0.2, 0.2, 1.0, 1.0],
];

/// Sky tints selectable at runtime. Switching tints changes the miss
/// record's root argument, so the shader table must be regenerated.
const SKY_COLORS: [[f32; 4]; 3] = [
    [0.2, 0.4, 0.8, 1.0],
    [0.9, 0.5, 0.2, 1.0],
    [0.1, 0.1, 0.15, 1.0],
];

pub struct Scene {
    registry: GeometryRegistry,
    triangle_model: u32,
    plane_model: u32,
    triangle_blas: wgpu::Blas,
    plane_blas: wgpu::Blas,
    instances: InstanceTable,
    instance_models: Vec<u32>,
    tlas_builder: TlasBuilder,
    sky_color: usize,
    /// Shading constants read by the hit shaders, addressed through each
    /// instance's root argument.
    instance_constants: TrackedBuffer,
    /// World transforms in instance order, consumed by the raster path.
    transforms: TrackedBuffer,
}

impl Scene {
    pub fn new(device: &wgpu::Device) -> Self {
        let mut registry = GeometryRegistry::new();
        let triangle_model = registry.add_model(device, "triangle", &triangle_model());
        let plane_model = registry.add_model(device, "plane", &plane_model());

        let triangle_blas = build_blas(device, "triangle blas", &[registry.get(triangle_model)]);
        let plane_blas = build_blas(device, "plane blas", &[registry.get(plane_model)]);

        let mut instances = InstanceTable::new();
        let mut instance_models = Vec::new();
        for i in 0..TRIANGLE_COUNT {
            instances.add(Instance {
                blas: triangle_blas.clone(),
                transform: triangle_transform(i, 0.0),
                hit_group: "HitGroup".to_string(),
                root_args: vec![RootArgument::Address(
                    i as u64 * INSTANCE_CONSTANT_STRIDE,
                )],
                mask: 0xff,
            });
            instance_models.push(triangle_model);
        }
        instances.add(Instance {
            blas: plane_blas.clone(),
            transform: Mat4::IDENTITY,
            hit_group: "PlaneHitGroup".to_string(),
            root_args: vec![],
            mask: 0xff,
        });
        instance_models.push(plane_model);

        let instance_constants = TrackedBuffer::new(
            device,
            "instance constants",
            TRIANGLE_COUNT as u64 * INSTANCE_CONSTANT_STRIDE,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let transforms = TrackedBuffer::new(
            device,
            "instance transforms",
            instances.len() as u64 * std::mem::size_of::<Mat4>() as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );

        Self {
            registry,
            triangle_model,
            plane_model,
            triangle_blas,
            plane_blas,
            instances,
            instance_models,
            tlas_builder: TlasBuilder::new(),
            sky_color: 0,
            instance_constants,
            transforms,
        }
    }

    /// Encodes the one-time bottom-level builds and the first top-level
    /// build. The caller must flush the queue before creating anything that
    /// binds the structures.
    pub fn encode_initial_build(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<()> {
        encode_blas_build(
            encoder,
            &self.triangle_blas,
            &[self.registry.get(self.triangle_model)],
        );
        encode_blas_build(
            encoder,
            &self.plane_blas,
            &[self.registry.get(self.plane_model)],
        );
        self.tlas_builder
            .build(device, encoder, &self.instances, TlasBuildMode::Build)?;
        Ok(())
    }

    /// Re-encodes the top-level structure over the current transforms.
    pub fn encode_tlas_refit(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<()> {
        self.tlas_builder
            .build(device, encoder, &self.instances, TlasBuildMode::Refit)?;
        Ok(())
    }

    pub fn tlas(&self) -> Option<&wgpu::Tlas> {
        self.tlas_builder.tlas()
    }

    /// Fills the binding table from the current instance order: one ray
    /// generation record, one miss record, one hit record per instance.
    pub fn build_shader_table(&self, sbt: &mut SbtGenerator) -> Result<()> {
        sbt.reset();
        sbt.add_ray_generation_program(SbtEntry::new("RayGen", vec![]))?;
        sbt.add_miss_program(SbtEntry::new(
            "Miss",
            vec![RootArgument::Constant(packed_sky_color(self.sky_color))],
        ))?;
        for instance in self.instances.iter() {
            sbt.add_hit_group(SbtEntry::new(
                instance.hit_group.clone(),
                instance.root_args.clone(),
            ))?;
        }
        Ok(())
    }

    /// Advances to the next sky tint. The caller must regenerate the
    /// shader table for the new miss record to take effect.
    pub fn cycle_sky_color(&mut self) {
        self.sky_color = (self.sky_color + 1) % SKY_COLORS.len();
        log::info!("sky color #{}", self.sky_color);
    }

    /// Spins the triangles. Transforms feed both the refit and the raster
    /// transforms buffer.
    pub fn animate(&mut self, time: f32) {
        for i in 0..TRIANGLE_COUNT {
            self.instances.set_transform(i, triangle_transform(i, time));
        }
    }

    /// Uploads the shading constants and instance transforms, gated on the
    /// fence so in-flight frames are never overwritten.
    pub fn upload_instance_data(&self, fence: &FenceSync, queue: &wgpu::Queue) -> Result<()> {
        self.instance_constants
            .write(fence, queue, bytemuck::cast_slice(TRIANGLE_COLORS.as_slice()))?;
        let matrices: Vec<Mat4> = self.instances.iter().map(|i| i.transform).collect();
        self.transforms
            .write(fence, queue, bytemuck::cast_slice(&matrices))?;
        Ok(())
    }

    /// Records that the submission with fence value `target` reads the
    /// scene's buffers.
    pub fn mark_used(&self, target: u64) {
        self.instance_constants.mark_used(target);
        self.transforms.mark_used(target);
    }

    pub fn instance_constants(&self) -> &wgpu::Buffer {
        self.instance_constants.buffer()
    }

    pub fn transforms(&self) -> &wgpu::Buffer {
        self.transforms.buffer()
    }

    pub fn raster_draws(&self) -> Vec<RasterDraw<'_>> {
        self.instance_models
            .iter()
            .enumerate()
            .map(|(index, model)| RasterDraw {
                geometry: self.registry.get(*model),
                transform_index: index as u32,
            })
            .collect()
    }
}

fn triangle_transform(index: usize, time: f32) -> Mat4 {
    let x = (index as f32 - (TRIANGLE_COUNT - 1) as f32 / 2.0) * TRIANGLE_SPACING;
    let phase = index as f32 * std::f32::consts::FRAC_PI_3;
    Mat4::from_translation(Vec3::new(x, 0.0, 0.0)) * Mat4::from_rotation_y(time + phase)
}

fn triangle_model() -> ModelData {
    let vertices = vec![
        VertexPosColor {
            position: [0.0, 0.7, 0.0],
            color: [1.0, 0.0, 0.0, 1.0],
        },
        VertexPosColor {
            position: [0.7, -0.7, 0.0],
            color: [0.0, 1.0, 0.0, 1.0],
        },
        VertexPosColor {
            position: [-0.7, -0.7, 0.0],
            color: [0.0, 0.0, 1.0, 1.0],
        },
    ];
    ModelData {
        vertices: VertexData::PosColor(vertices),
        indices: vec![0, 1, 2],
    }
}

fn plane_model() -> ModelData {
    let half = 5.0;
    let y = -0.75;
    let color = [0.6, 0.6, 0.6, 1.0];
    let corners = [
        [-half, y, -half],
        [-half, y, half],
        [half, y, half],
        [-half, y, -half],
        [half, y, half],
        [half, y, -half],
    ];
    let vertices = corners
        .iter()
        .map(|&position| VertexPosColor { position, color })
        .collect();
    ModelData {
        vertices: VertexData::PosColor(vertices),
        indices: vec![],
    }
}

fn packed_sky_color(index: usize) -> u32 {
    let [r, g, b, a] = SKY_COLORS[index % SKY_COLORS.len()];
    pack_unorm4(r, g, b, a)
}

fn pack_unorm4(r: f32, g: f32, b: f32, a: f32) -> u32 {
    let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
    quantize(r) | quantize(g) << 8 | quantize(b) << 16 | quantize(a) << 24
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_transforms_are_spaced_and_phased() {
        let a = triangle_transform(0, 0.0);
        let b = triangle_transform(2, 0.0);
        assert!((a.w_axis.x + TRIANGLE_SPACING).abs() < 1e-6);
        assert!((b.w_axis.x - TRIANGLE_SPACING).abs() < 1e-6);
        assert_ne!(triangle_transform(1, 0.0), triangle_transform(1, 0.5));
    }

    #[test]
    fn packed_sky_color_is_little_endian_rgba() {
        let packed = pack_unorm4(1.0, 0.0, 0.0, 1.0);
        assert_eq!(packed, 0xff00_00ff);
        assert_eq!(pack_unorm4(0.0, 1.0, 0.0, 0.0), 0x0000_ff00);
    }

    #[test]
    fn sky_palette_cycles_through_distinct_miss_constants() {
        let first = packed_sky_color(0);
        let second = packed_sky_color(1);
        let third = packed_sky_color(2);
        assert_ne!(first, second);
        assert_ne!(second, third);
        // Indices wrap back to the start of the palette.
        assert_eq!(packed_sky_color(SKY_COLORS.len()), first);
    }
}
