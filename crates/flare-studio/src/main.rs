//! Particle viewport driving the renderer on a real window.
//!
//! Controls: mouse wheel zooms, `B` toggles the blur, `Escape` quits.

mod particles;

use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Vec2, Vec4};
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use flare_render::api::{Primitive, RenderingStage};
use flare_render::backend::{BackendSelect, GpuInit};
use flare_render::batch::FlatVertex;
use flare_render::blur::{ImageVertex, FULLSCREEN_QUAD};
use flare_render::logging::{init_logging, LoggingConfig};
use flare_render::material::{grid_lines, GridUniforms, MATERIAL_UNIFORM_SLOT};
use flare_render::resource::{FrameBuffer, ShaderProgram, UniformBuffer, VertexBuffer};
use flare_render::scene::{OrthoCamera, RadialLight, SceneDescription, SpotLight};
use flare_render::{Renderer, RendererConfig, RendererError};

use particles::{Emitter, EmitterConfig};

const BLUR_RADIUS: f32 = 1.5;
/// Rotated sprites drawn on top of the bulk quads.
const ROTATED_SPRITES: usize = 32;
/// Background grid, in render units.
const GRID_EXTENT: f32 = 4.0;
const GRID_SPACING: f32 = 0.25;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
    let mut studio = Studio::default();
    event_loop
        .run_app(&mut studio)
        .context("winit event loop terminated with error")?;

    match studio.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[derive(Default)]
struct Studio {
    viewport: Option<Viewport>,
    failure: Option<anyhow::Error>,
}

impl Studio {
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        log::error!("{e:#}");
        self.failure.get_or_insert(e);
        self.viewport = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for Studio {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewport.is_some() {
            return;
        }
        match Viewport::open(event_loop) {
            Ok(viewport) => {
                viewport.window.request_redraw();
                self.viewport = Some(viewport);
            }
            Err(e) => self.fail(event_loop, e.context("failed to open the viewport")),
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(viewport) = &self.viewport {
            viewport.window.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(viewport) = self.viewport.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                self.viewport = None;
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        self.viewport = None;
                        event_loop.exit();
                    }
                    PhysicalKey::Code(KeyCode::KeyB) => {
                        viewport.blur = !viewport.blur;
                        log::info!("blur {}", if viewport.blur { "on" } else { "off" });
                    }
                    _ => {}
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 40.0,
                };
                let zoom = viewport.camera.zoom() * (1.0 - 0.1 * lines);
                viewport.camera.set_zoom(zoom);
            }
            WindowEvent::Occluded(occluded) => viewport.renderer.set_minimized(occluded),
            WindowEvent::Resized(size) => viewport.resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = viewport.window.inner_size();
                viewport.resize(size);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = viewport.frame() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }
}

// ── grid ──────────────────────────────────────────────────────────────────

/// Line grid that fades out away from the origin.
struct Grid {
    shader: ShaderProgram,
    lines: VertexBuffer,
    vertex_count: u32,
    // bound to `shader`, kept alive with it
    _params: UniformBuffer,
}

impl Grid {
    fn new(renderer: &Renderer) -> Result<Self> {
        let shader = renderer.shader("GridShader").context("GridShader missing from the manifest")?;
        let vertices = grid_lines(GRID_EXTENT, GRID_SPACING, Vec4::new(0.5, 0.5, 0.55, 0.35));
        let lines = renderer
            .create_vertex_buffer(
                Some(bytemuck::cast_slice(&vertices)),
                size_of_val(vertices.as_slice()) as u64,
                FlatVertex::layout(),
                false,
            )
            .context("failed to create the grid lines")?;
        let params = GridUniforms::new(Vec2::ZERO, GRID_EXTENT);
        let params = renderer
            .create_uniform_buffer(
                "GridData",
                MATERIAL_UNIFORM_SLOT,
                GridUniforms::layout(),
                Some(bytemuck::bytes_of(&params)),
            )
            .context("failed to create the grid parameters")?;
        renderer.bind_uniform_buffer(&shader, &params, RenderingStage::FragmentShader);
        Ok(Self { shader, lines, vertex_count: vertices.len() as u32, _params: params })
    }
}

// ── viewport ──────────────────────────────────────────────────────────────

struct Viewport {
    // dropped first: the renderer thread must stop before the window goes away
    renderer: Renderer,
    scene_target: FrameBuffer,
    blit_quad: VertexBuffer,
    image_shader: ShaderProgram,
    grid: Grid,
    camera: OrthoCamera,
    emitter: Emitter,
    blur: bool,
    dt: f32,
    window: Arc<Window>,
}

impl Viewport {
    fn open(event_loop: &ActiveEventLoop) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title("Flare Studio")
            .with_inner_size(LogicalSize::new(1280.0, 720.0));
        let window = Arc::new(event_loop.create_window(attrs).context("failed to create window")?);

        let renderer = Renderer::init(RendererConfig::new(BackendSelect::Wgpu {
            window: Arc::clone(&window),
            gpu: GpuInit::default(),
        }))
        .context("renderer init failed")?;

        let size = window.inner_size();
        let scene_target = renderer
            .create_frame_buffer([size.width.max(1), size.height.max(1)])
            .context("failed to create the scene target")?;
        let blit_quad = renderer
            .create_vertex_buffer(
                Some(bytemuck::cast_slice(&FULLSCREEN_QUAD)),
                size_of_val(&FULLSCREEN_QUAD) as u64,
                ImageVertex::layout(),
                false,
            )
            .context("failed to create the blit quad")?;
        let image_shader = renderer
            .shader("ImageShader")
            .context("ImageShader missing from the manifest")?;

        let grid = Grid::new(&renderer)?;

        let memory = renderer.used_gpu_memory();
        log::info!("viewport ready, {} KiB of GPU resources", memory.total() / 1024);
        if let Ok(Some(device)) = renderer.device_memory() {
            log::info!(
                "device allocator: {} KiB allocated, {} KiB reserved",
                device.allocated / 1024,
                device.reserved / 1024
            );
        }

        Ok(Self {
            renderer,
            scene_target,
            blit_quad,
            image_shader,
            grid,
            camera: OrthoCamera::default(),
            emitter: Emitter::new(EmitterConfig::default()),
            blur: true,
            dt: 1.0 / 60.0,
            window,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        let minimized = size.width == 0 || size.height == 0;
        self.renderer.set_minimized(minimized);
        if minimized {
            return;
        }
        let size = [size.width, size.height];
        self.renderer.recreate_swapchain(size);
        self.renderer.resize_frame_buffer(&self.scene_target, size);
        self.window.request_redraw();
    }

    fn aspect(&self) -> f32 {
        let [w, h] = self.scene_target.info().size();
        w as f32 / h.max(1) as f32
    }

    fn frame(&mut self) -> Result<()> {
        if self.renderer.is_minimized() {
            return Ok(());
        }

        self.emitter.update(self.dt);

        let mut scene = SceneDescription::new(self.camera.scene_camera(self.aspect()), self.scene_target.clone());
        if self.blur {
            scene = scene.with_blur(BLUR_RADIUS);
        }

        let r = &mut self.renderer;
        r.begin_scene(scene)?;
        r.clear_screen();

        let origin = self.emitter.config().origin;
        r.add_radial_light(RadialLight {
            // editor units
            position: origin / flare_render::frame::GLOBAL_SCALE_FACTOR,
            color: Vec4::new(1.0, 0.6, 0.2, 1.0),
            intensity: 60.0,
        })?;
        r.add_spot_light(SpotLight {
            position: Vec2::new(0.0, 0.4),
            color: Vec4::new(0.3, 0.5, 1.0, 0.8),
            angle: -90.0,
            ..SpotLight::default()
        })?;

        r.draw(&self.grid.shader, &self.grid.lines, Primitive::Lines, self.grid.vertex_count);
        r.draw_quads(self.emitter.positions(), self.emitter.colors(), self.emitter.scales(), None);
        for (center, rotation) in self.emitter.oldest(ROTATED_SPRITES) {
            r.draw_quad_rotated(center, Vec4::new(1.0, 1.0, 1.0, 0.5), 10.0, rotation, None);
        }
        r.end_scene()?;

        r.set_render_target_window();
        r.clear_screen();
        r.bind_frame_buffer(&self.image_shader, &self.scene_target, 0, RenderingStage::FragmentShader);
        r.draw(&self.image_shader, &self.blit_quad, Primitive::Triangles, FULLSCREEN_QUAD.len() as u32);

        match r.present() {
            Ok(time) => {
                self.dt = time.dt;
                if time.frame_index % 600 == 0 {
                    log::debug!(
                        "frame {}: {} particles, {} draw calls",
                        time.frame_index,
                        self.emitter.len(),
                        r.draw_calls_last_scene()
                    );
                }
                Ok(())
            }
            // minimized between the check and the present
            Err(RendererError::Minimized) => Ok(()),
            Err(e @ RendererError::Disconnected) => Err(e.into()),
            Err(e) => {
                log::warn!("frame error: {e}");
                Ok(())
            }
        }
    }
}
