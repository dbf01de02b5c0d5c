use std::sync::Arc;

use anyhow::Context;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use glam::{Mat4, Vec3};
use rayforge::frame::{CameraMatrices, Renderer};
use rayforge::scene::Scene;
use rayforge::wgpu_ctx::WgpuContext;

struct AppState {
    window: Arc<Window>,
    ctx: WgpuContext,
    scene: Scene,
    renderer: Renderer,
}

impl AppState {
    fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let ctx = pollster::block_on(WgpuContext::new(window.clone()))
            .context("failed to initialize GPU context")?;
        let mut scene = Scene::new(&ctx.device);
        let renderer =
            Renderer::new(&ctx, &mut scene).context("failed to initialize renderer")?;
        Ok(Self {
            window,
            ctx,
            scene,
            renderer,
        })
    }

    fn render(&mut self) -> rayforge::Result<()> {
        let camera = demo_camera(&self.ctx.config);
        self.renderer.render(&self.ctx, &mut self.scene, &camera)
    }
}

fn demo_camera(config: &wgpu::SurfaceConfiguration) -> CameraMatrices {
    let aspect = config.width as f32 / config.height.max(1) as f32;
    CameraMatrices::from_view_projection(
        Mat4::look_at_rh(Vec3::new(0.0, 1.2, 5.0), Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(45f32.to_radians(), aspect.max(1e-4), 0.1, 100.0),
    )
}

#[derive(Default)]
struct App {
    state: Option<AppState>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let attributes = Window::default_attributes().with_title("rayforge");
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("window creation failed: {err}");
                event_loop.exit();
                return;
            }
        };
        match AppState::new(window) {
            Ok(state) => {
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(err) => {
                log::error!("initialization failed: {err:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                if let Err(err) = state.renderer.shutdown(&state.ctx) {
                    log::warn!("shutdown flush failed: {err}");
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                state.ctx.resize(size);
                if let Err(err) = state.renderer.resize(&state.ctx, &state.scene) {
                    log::error!("resize failed: {err}");
                    event_loop.exit();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::Space => state.renderer.toggle_mode(),
                KeyCode::KeyC => {
                    state.scene.cycle_sky_color();
                    if let Err(err) = state.renderer.rebuild_shader_table(&state.ctx, &state.scene)
                    {
                        log::error!("shader table rebuild failed: {err}");
                        event_loop.exit();
                    }
                }
                _ => {}
            },
            WindowEvent::RedrawRequested => {
                match state.render() {
                    Ok(()) => {}
                    Err(rayforge::Error::Surface(
                        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated,
                    )) => {
                        let size = state.window.inner_size();
                        state.ctx.resize(size);
                    }
                    Err(err) => {
                        log::error!("render failed: {err}");
                        event_loop.exit();
                        return;
                    }
                }
                state.window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run_app(&mut App::default())?;
    Ok(())
}
