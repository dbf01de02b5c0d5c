use std::sync::Arc;

use crate::error::{Error, Result};

/// Core wgpu objects shared by every subsystem.
///
/// Built once at startup and passed by reference everywhere; nothing in the
/// crate reaches for global state.
pub struct WgpuContext {
    pub _instance: wgpu::Instance,
    pub _adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::EXPERIMENTAL_RAY_QUERY;

impl WgpuContext {
    pub async fn new(window: Arc<winit::window::Window>) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags: wgpu::InstanceFlags::from_env_or_default(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: Some(&surface),
                ..Default::default()
            })
            .await?;

        let info = adapter.get_info();
        log::info!("adapter: {} ({:?})", info.name, info.backend);
        log::info!("driver: {}", info.driver_info);

        // Hardware ray tracing is a hard requirement; there is no software
        // fallback tier in this renderer.
        let features = adapter.features();
        if !features.contains(REQUIRED_FEATURES) {
            return Err(Error::RayTracingUnsupported { adapter: info.name });
        }

        // The ray-dispatch kernel writes its output image through a storage
        // binding in the surface format, so BGRA surfaces additionally need
        // straight BGRA storage support.
        let mut requested = REQUIRED_FEATURES;
        if features.contains(wgpu::Features::BGRA8UNORM_STORAGE) {
            requested |= wgpu::Features::BGRA8UNORM_STORAGE;
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("rayforge device"),
                required_features: requested,
                required_limits: wgpu::Limits::default()
                    .using_minimum_supported_acceleration_structure_values(),
                memory_hints: wgpu::MemoryHints::Performance,
                experimental_features: unsafe { wgpu::ExperimentalFeatures::enabled() },
                trace: wgpu::Trace::Off,
            })
            .await?;

        let size = window.inner_size();
        let mut config = surface
            .get_default_config(&adapter, size.width.max(1), size.height.max(1))
            .ok_or(Error::SurfaceConfig)?;
        config.format = config.format.remove_srgb_suffix();
        // The ray path copies the dispatch output straight into the acquired
        // back buffer. Two back buffers, matching the frame loop's
        // one-frame-in-flight discipline.
        config.usage |= wgpu::TextureUsages::COPY_DST;
        config.desired_maximum_frame_latency = 2;
        surface.configure(&device, &config);

        log::debug!(
            "surface configured: {:?} {}x{}",
            config.format,
            config.width,
            config.height
        );

        Ok(Self {
            _instance: instance,
            _adapter: adapter,
            device,
            queue,
            surface,
            config,
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
        }
    }
}
