//! Frame orchestration: per-frame buffer uploads, refit, pass recording,
//! submission, presentation, and the fence wait that keeps exactly one
//! frame in flight.

use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::error::Result;
use crate::passes::{RasterPass, RaytracePass};
use crate::pipeline::{RayPipeline, SHADER_IDENTIFIER_SIZE};
use crate::sbt::{SbtGenerator, SbtLayout};
use crate::scene::Scene;
use crate::sync::{FenceSync, TrackedBuffer};
use crate::wgpu_ctx::WgpuContext;

/// Camera uniform shared by both paths. The ray path reconstructs world-space
/// rays from the inverse matrices; the raster path uses the forward pair.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_inverse: Mat4,
    pub projection_inverse: Mat4,
}

impl CameraMatrices {
    /// Camera matrices arrive as plain inputs; only the inverses the ray
    /// path needs are derived here.
    pub fn from_view_projection(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_inverse: view.inverse(),
            projection_inverse: projection.inverse(),
        }
    }
}

/// Which path draws the frame. Toggled at runtime; both paths stay resident.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RenderMode {
    Rasterize,
    RayTrace,
}

impl RenderMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Rasterize => Self::RayTrace,
            Self::RayTrace => Self::Rasterize,
        }
    }
}

pub struct Renderer {
    pipeline: RayPipeline,
    sbt: SbtGenerator,
    sbt_buffer: wgpu::Buffer,
    sbt_layout: SbtLayout,
    raytrace: RaytracePass,
    raster: RasterPass,
    camera_buffer: TrackedBuffer,
    fence: FenceSync,
    mode: RenderMode,
    start: Instant,
}

impl Renderer {
    /// Builds the acceleration structures, drains the queue so they are
    /// valid, then compiles the pipeline and generates the binding table.
    pub fn new(ctx: &WgpuContext, scene: &mut Scene) -> Result<Self> {
        let mut fence = FenceSync::new();

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("initial acceleration structure build"),
            });
        scene.encode_initial_build(&ctx.device, &mut encoder)?;
        let submission = ctx.queue.submit(Some(encoder.finish()));
        let target = fence.signal(submission);
        log::info!("initial structure build submitted as fence target {target}");
        // Nothing that binds the structures may be created until the build
        // has retired.
        fence.flush_all(&ctx.device, &ctx.queue)?;

        let pipeline = RayPipeline::new(&ctx.device, ctx.config.format)?;

        let mut sbt = SbtGenerator::new();
        scene.build_shader_table(&mut sbt)?;
        let layout = sbt.compute_size(SHADER_IDENTIFIER_SIZE);
        let sbt_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shader binding table"),
            size: layout.total_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sbt_layout = sbt.generate(&ctx.queue, &sbt_buffer, &pipeline)?;
        log::debug!(
            "shader table: {} bytes, hit stride {}",
            sbt_layout.total_size,
            sbt_layout.hit_group.stride
        );

        let camera_buffer = TrackedBuffer::new(
            &ctx.device,
            "camera matrices",
            std::mem::size_of::<CameraMatrices>() as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );

        let mut raytrace =
            RaytracePass::new(&ctx.device, ctx.config.format, ctx.config.width, ctx.config.height);
        let mut raster =
            RasterPass::new(&ctx.device, ctx.config.format, ctx.config.width, ctx.config.height);

        let tlas = scene.tlas().ok_or(crate::Error::TlasNotBuilt)?;
        raytrace.rebind(
            &ctx.device,
            &pipeline,
            tlas,
            camera_buffer.buffer(),
            &sbt_buffer,
            scene.instance_constants(),
        );
        raytrace.update_dispatch(&ctx.queue, &sbt_layout);
        raster.rebind(&ctx.device, camera_buffer.buffer(), scene.transforms());

        Ok(Self {
            pipeline,
            sbt,
            sbt_buffer,
            sbt_layout,
            raytrace,
            raster,
            camera_buffer,
            fence,
            mode: RenderMode::RayTrace,
            start: Instant::now(),
        })
    }

    /// Regenerates the binding table after the scene's shader assignments
    /// change, growing the table buffer when the new layout needs it.
    pub fn rebuild_shader_table(&mut self, ctx: &WgpuContext, scene: &Scene) -> Result<()> {
        scene.build_shader_table(&mut self.sbt)?;
        let layout = self.sbt.compute_size(SHADER_IDENTIFIER_SIZE);
        if layout.total_size > self.sbt_buffer.size() {
            self.sbt_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("shader binding table"),
                size: layout.total_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let tlas = scene.tlas().ok_or(crate::Error::TlasNotBuilt)?;
            self.raytrace.rebind(
                &ctx.device,
                &self.pipeline,
                tlas,
                self.camera_buffer.buffer(),
                &self.sbt_buffer,
                scene.instance_constants(),
            );
        }
        self.sbt_layout = self.sbt.generate(&ctx.queue, &self.sbt_buffer, &self.pipeline)?;
        self.raytrace.update_dispatch(&ctx.queue, &self.sbt_layout);
        Ok(())
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn toggle_mode(&mut self) {
        self.mode = self.mode.toggled();
        log::info!("render mode: {:?}", self.mode);
    }

    pub fn resize(&mut self, ctx: &WgpuContext, scene: &Scene) -> Result<()> {
        self.raytrace
            .resize(&ctx.device, ctx.config.format, ctx.config.width, ctx.config.height);
        self.raster
            .resize(&ctx.device, ctx.config.width, ctx.config.height);
        let tlas = scene.tlas().ok_or(crate::Error::TlasNotBuilt)?;
        self.raytrace.rebind(
            &ctx.device,
            &self.pipeline,
            tlas,
            self.camera_buffer.buffer(),
            &self.sbt_buffer,
            scene.instance_constants(),
        );
        self.raytrace.update_dispatch(&ctx.queue, &self.sbt_layout);
        Ok(())
    }

    /// Renders one frame and blocks until it retires. Single frame in
    /// flight: the wait lands after present, so the CPU prepares frame N+1
    /// only once frame N's reads are done.
    pub fn render(
        &mut self,
        ctx: &WgpuContext,
        scene: &mut Scene,
        camera: &CameraMatrices,
    ) -> Result<()> {
        let time = self.start.elapsed().as_secs_f32();
        scene.animate(time);

        self.camera_buffer
            .write(&self.fence, &ctx.queue, bytemuck::bytes_of(camera))?;
        scene.upload_instance_data(&self.fence, &ctx.queue)?;

        let frame = ctx.surface.get_current_texture()?;

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });
        scene.encode_tlas_refit(&ctx.device, &mut encoder)?;
        match self.mode {
            RenderMode::RayTrace => {
                self.raytrace.record(&self.pipeline, &mut encoder, &frame.texture);
            }
            RenderMode::Rasterize => {
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                self.raster.record(&mut encoder, &view, &scene.raster_draws());
            }
        }

        let submission = ctx.queue.submit(Some(encoder.finish()));
        let target = self.fence.signal(submission);
        scene.mark_used(target);
        self.camera_buffer.mark_used(target);

        frame.present();
        self.fence.wait_until(&ctx.device, target)?;
        Ok(())
    }

    /// Drains all outstanding GPU work so resources can be torn down.
    pub fn shutdown(&mut self, ctx: &WgpuContext) -> Result<()> {
        self.fence.flush_all(&ctx.device, &ctx.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_toggle_round_trips() {
        let mode = RenderMode::RayTrace;
        assert_eq!(mode.toggled(), RenderMode::Rasterize);
        assert_eq!(mode.toggled().toggled(), mode);
    }

    #[test]
    fn camera_inverses_match_forward_matrices() {
        let view = Mat4::look_at_rh(
            glam::Vec3::new(0.0, 1.2, 5.0),
            glam::Vec3::ZERO,
            glam::Vec3::Y,
        );
        let projection = Mat4::perspective_rh(45f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        let camera = CameraMatrices::from_view_projection(view, projection);
        let id = camera.view * camera.view_inverse;
        assert!(id.abs_diff_eq(Mat4::IDENTITY, 1e-4));
        let id = camera.projection * camera.projection_inverse;
        assert!(id.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }
}
