//! Application-facing renderer context.
//!
//! `Renderer` owns the renderer thread. Resource creation, readback and present
//! are blocking round-trips returning `Result`; everything else is queued and
//! returns immediately. Failures in queued commands are logged and the first one
//! is reported by the next [`Renderer::present`].

mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;

use glam::{Vec2, Vec4};
use parking_lot::Mutex;

use crate::api::{
    BackendInfo, DeviceMemory, DrawCall, DrawRange, OverlayDrawData, Primitive, RendererApi,
    RenderingBlendMode, RenderingStage,
};
use crate::backend::PreparedBackend;
use crate::batch::Quad;
use crate::config::RendererConfig;
use crate::coords::Rectangle;
use crate::error::{RendererError, Result};
use crate::queue::{spawn_worker, CommandQueue};
use crate::resource::{
    check_data_len, FrameBuffer, GpuMemoryUsage, Image, IndexBuffer, LayoutElement,
    ResourceRegistry, ShaderProgram, ShaderProgramDesc, Texture, TextureFormat, TextureSource,
    UniformBuffer, VertexBuffer, VertexLayout,
};
use crate::scene::{LightKind, RadialLight, SceneDescription, SceneTracker, SpotLight};
use crate::time::{FramePacer, FrameTime};

use state::RenderState;

const THREAD_NAME: &str = "flare-renderer";

/// Running renderer. Dropping it stops the renderer thread.
pub struct Renderer {
    queue: CommandQueue<RenderState>,
    worker: Option<JoinHandle<()>>,
    registry: Arc<Mutex<ResourceRegistry>>,
    shaders: Mutex<HashMap<String, ShaderProgram>>,
    info: BackendInfo,
    scene: SceneTracker,
    last_scene_draws: Arc<AtomicU32>,
    pacer: FramePacer,
}

impl Renderer {
    /// Starts the renderer thread and blocks until the backend, the shader
    /// manifest and the built-in resources are ready.
    pub fn init(config: RendererConfig) -> Result<Self> {
        let RendererConfig { backend, shader_dir, max_frame_period } = config;
        log::info!("starting renderer ({} backend)", backend.kind());

        let prepared = PreparedBackend::prepare(backend)?;
        let queue = CommandQueue::new();
        let registry = Arc::new(Mutex::new(ResourceRegistry::default()));
        let last_scene_draws = Arc::new(AtomicU32::new(0));

        let (worker, (info, shaders)) = spawn_worker(&queue, THREAD_NAME, {
            let queue = queue.clone();
            let registry = Arc::clone(&registry);
            let last_scene_draws = Arc::clone(&last_scene_draws);
            move || {
                let api = prepared.build();
                let info = api.info();
                let state = RenderState::new(api, queue, registry, last_scene_draws, &shader_dir)?;
                let shaders = state.shaders().clone();
                Ok((state, (info, shaders)))
            }
        })?;

        log::info!("renderer ready: {} on {} ({})", info.kind, info.device, info.api);

        Ok(Self {
            queue,
            worker: Some(worker),
            registry,
            shaders: Mutex::new(shaders),
            info,
            scene: SceneTracker::default(),
            last_scene_draws,
            pacer: FramePacer::new(max_frame_period),
        })
    }

    /// Drains the queue and joins the renderer thread.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.queue.request_destroy();
        if worker.join().is_err() {
            log::error!("renderer thread panicked");
        }
        log::debug!("renderer terminated");
    }

    pub fn backend_info(&self) -> &BackendInfo {
        &self.info
    }

    // ── queue ─────────────────────────────────────────────────────────────

    /// Queues raw backend work. Pending quads are flushed first.
    ///
    /// Returns `false` when the command was dropped (minimized or stopped).
    pub fn push_command<F>(&self, command: F) -> bool
    where
        F: FnOnce(&mut dyn RendererApi) + Send + 'static,
    {
        self.queue.push(move |s: &mut RenderState| {
            s.flush_quads();
            command(s.api());
        })
    }

    /// Runs `f` against the backend on the renderer thread and returns its result.
    pub fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn RendererApi) -> T + Send + 'static,
    {
        self.queue.call(move |s: &mut RenderState| {
            s.flush_quads();
            f(s.api())
        })
    }

    /// Blocks until everything queued so far has run.
    pub fn wait_until_idle(&self) {
        self.queue.wait_idle();
    }

    /// While minimized, queued commands (except resource releases) are dropped
    /// and blocking calls fail with [`RendererError::Minimized`].
    pub fn set_minimized(&mut self, minimized: bool) {
        if self.queue.is_minimized() == minimized {
            return;
        }
        log::debug!("renderer {}", if minimized { "paused" } else { "resumed" });
        if minimized {
            self.queue.push_forced(|s| s.set_swapchain_suspended(true));
            self.queue.set_minimized(true);
        } else {
            self.queue.set_minimized(false);
            self.push(|s| s.set_swapchain_suspended(false));
            self.pacer.reset();
        }
    }

    pub fn is_minimized(&self) -> bool {
        self.queue.is_minimized()
    }

    fn push(&self, command: impl FnOnce(&mut RenderState) + Send + 'static) {
        if !self.queue.push(command) {
            log::trace!("renderer command dropped");
        }
    }

    // ── resource creation ─────────────────────────────────────────────────

    /// `data`, when given, is uploaded at offset 0 and must fit in `size` bytes.
    pub fn create_vertex_buffer(
        &self,
        data: Option<&[u8]>,
        size: u64,
        layout: VertexLayout,
        dynamic: bool,
    ) -> Result<VertexBuffer> {
        if data.is_some_and(|d| d.len() as u64 > size) {
            return Err(RendererError::invalid("vertex data larger than buffer"));
        }
        let data = data.map(<[u8]>::to_vec);
        self.queue
            .call(move |s| s.create_vertex_buffer(data, size, layout, dynamic))?
    }

    pub fn create_index_buffer(&self, indices: &[u32]) -> Result<IndexBuffer> {
        let indices = indices.to_vec();
        self.queue.call(move |s| s.create_index_buffer(indices))?
    }

    /// `slot` is the binding the buffer attaches to in every program it is bound to.
    pub fn create_uniform_buffer(
        &self,
        name: &str,
        slot: u32,
        layout: Vec<LayoutElement>,
        data: Option<&[u8]>,
    ) -> Result<UniformBuffer> {
        let name = name.to_string();
        let data = data.map(<[u8]>::to_vec);
        self.queue
            .call(move |s| s.create_uniform_buffer(name, slot, layout, data))?
    }

    pub fn create_texture(
        &self,
        size: [u32; 2],
        format: TextureFormat,
        data: Option<&[u8]>,
    ) -> Result<Texture> {
        if let Some(data) = data {
            check_data_len(size, format, data)?;
        }
        let data = data.map(<[u8]>::to_vec);
        self.queue.call(move |s| s.create_texture(size, format, data))?
    }

    pub fn create_texture_from_image(&self, image: &Image) -> Result<Texture> {
        self.create_texture(image.size(), image.format, Some(&image.data))
    }

    pub fn create_frame_buffer(&self, size: [u32; 2]) -> Result<FrameBuffer> {
        self.queue.call(move |s| s.create_frame_buffer(size))?
    }

    /// Loads and compiles a program on the renderer thread. It is also
    /// registered under its name for [`Renderer::shader`].
    pub fn create_shader_program(&self, desc: ShaderProgramDesc) -> Result<ShaderProgram> {
        let name = desc.name.clone();
        let program = self.queue.call(move |s| s.create_shader_program(desc))??;
        self.shaders.lock().insert(name, program.clone());
        Ok(program)
    }

    /// Program by name: the built-in manifest plus everything created since.
    pub fn shader(&self, name: &str) -> Option<ShaderProgram> {
        self.shaders.lock().get(name).cloned()
    }

    /// Reads a frame buffer back after every previously queued command ran.
    pub fn read_frame_buffer(&self, frame_buffer: &FrameBuffer) -> Result<Image> {
        let frame_buffer = frame_buffer.clone();
        self.queue.call(move |s| s.read_frame_buffer(&frame_buffer))?
    }

    /// GPU memory held by live resources, per category.
    pub fn used_gpu_memory(&self) -> GpuMemoryUsage {
        self.registry.lock().usage()
    }

    /// Allocator statistics of the device. Waits for queued commands.
    pub fn device_memory(&self) -> Result<Option<DeviceMemory>> {
        self.queue.call(|s| s.api().device_memory())
    }

    // ── updates ───────────────────────────────────────────────────────────

    pub fn update_vertex_buffer(&self, buffer: &VertexBuffer, offset: u64, data: &[u8]) {
        let buffer = buffer.clone();
        let data = data.to_vec();
        self.push(move |s| s.update_vertex_buffer(&buffer, offset, &data));
    }

    pub fn update_uniform_buffer(&self, buffer: &UniformBuffer, data: &[u8]) {
        let buffer = buffer.clone();
        let data = data.to_vec();
        self.push(move |s| s.update_uniform_buffer(&buffer, &data));
    }

    pub fn set_texture_image(&self, texture: &Texture, image: Image) {
        let texture = texture.clone();
        self.push(move |s| s.set_texture_image(&texture, image));
    }

    /// Resizes the color attachment. Contents are discarded.
    pub fn resize_frame_buffer(&self, frame_buffer: &FrameBuffer, size: [u32; 2]) {
        let frame_buffer = frame_buffer.clone();
        self.push(move |s| s.resize_frame_buffer(&frame_buffer, size));
    }

    // ── bindings ──────────────────────────────────────────────────────────

    pub fn bind_uniform_buffer(&self, shader: &ShaderProgram, buffer: &UniformBuffer, stage: RenderingStage) {
        let (shader, buffer) = (shader.clone(), buffer.clone());
        self.push(move |s| s.bind_uniform_buffer(&shader, &buffer, stage));
    }

    pub fn bind_texture(&self, shader: &ShaderProgram, texture: &Texture, slot: u32, stage: RenderingStage) {
        let (shader, texture) = (shader.clone(), texture.clone());
        self.push(move |s| {
            s.bind_texture(&shader, TextureSource::from(&texture), slot, stage);
            drop(texture);
        });
    }

    /// Binds a frame buffer's color attachment as a sampled texture.
    pub fn bind_frame_buffer(&self, shader: &ShaderProgram, frame_buffer: &FrameBuffer, slot: u32, stage: RenderingStage) {
        let (shader, frame_buffer) = (shader.clone(), frame_buffer.clone());
        self.push(move |s| {
            s.bind_texture(&shader, TextureSource::from(&frame_buffer), slot, stage);
            drop(frame_buffer);
        });
    }

    // ── draws ─────────────────────────────────────────────────────────────

    /// Draws the first `vertex_count` vertices.
    pub fn draw(&self, shader: &ShaderProgram, vertices: &VertexBuffer, primitive: Primitive, vertex_count: u32) {
        self.draw_call(shader, vertices, None, primitive, DrawRange::Vertices(vertex_count));
    }

    pub fn draw_indexed(&self, shader: &ShaderProgram, vertices: &VertexBuffer, indices: &IndexBuffer, primitive: Primitive) {
        let range = DrawRange::Indexed(indices.id());
        self.draw_call(shader, vertices, Some(indices), primitive, range);
    }

    /// Draws the first `index_count` indices.
    pub fn draw_indexed_count(
        &self,
        shader: &ShaderProgram,
        vertices: &VertexBuffer,
        indices: &IndexBuffer,
        primitive: Primitive,
        index_count: u32,
    ) {
        let range = DrawRange::IndexedCount(indices.id(), index_count);
        self.draw_call(shader, vertices, Some(indices), primitive, range);
    }

    fn draw_call(
        &self,
        shader: &ShaderProgram,
        vertices: &VertexBuffer,
        indices: Option<&IndexBuffer>,
        primitive: Primitive,
        range: DrawRange,
    ) {
        let call = DrawCall {
            shader: shader.id(),
            primitive,
            vertex_buffer: vertices.id(),
            range,
        };
        // held until the draw ran
        let keep = (shader.clone(), vertices.clone(), indices.cloned());
        self.push(move |s| {
            s.draw(call);
            drop(keep);
        });
    }

    // ── state ─────────────────────────────────────────────────────────────

    /// Clears the current render target to transparent black.
    pub fn clear_screen(&self) {
        self.push(|s| s.clear_screen());
    }

    pub fn set_viewport(&self, viewport: Rectangle) {
        self.push(move |s| s.set_viewport(viewport));
    }

    /// `None` disables scissoring.
    pub fn set_scissor(&self, scissor: Option<Rectangle>) {
        self.push(move |s| s.set_scissor(scissor));
    }

    pub fn set_blend_mode(&self, mode: RenderingBlendMode) {
        self.push(move |s| s.set_blend_mode(mode));
    }

    /// Draws to the window from now on, with a full-window viewport.
    pub fn set_render_target_window(&self) {
        self.push(|s| s.set_render_target_window());
    }

    /// Draws into `frame_buffer` from now on, with a full-size viewport.
    pub fn set_render_target(&self, frame_buffer: &FrameBuffer) {
        let frame_buffer = frame_buffer.clone();
        self.push(move |s| s.set_render_target(&frame_buffer));
    }

    pub fn recreate_swapchain(&self, size: [u32; 2]) {
        self.push(move |s| s.recreate_swapchain(size));
    }

    // ── scene ─────────────────────────────────────────────────────────────

    /// Opens a scene: binds its target and uploads the camera. Light slots reset.
    pub fn begin_scene(&mut self, scene: SceneDescription) -> Result<()> {
        self.scene.begin()?;
        self.registry.lock().prune();
        self.push(move |s| s.begin_scene(scene));
        Ok(())
    }

    /// Flushes pending quads, runs the blur if requested and records the draw count.
    pub fn end_scene(&mut self) -> Result<()> {
        self.scene.end()?;
        if self.queue.is_minimized() {
            // the renderer-side scene must not outlive the bracket
            self.queue.push_forced(|s| s.abandon_scene());
        } else {
            self.push(|s| s.end_scene());
        }
        Ok(())
    }

    pub fn add_radial_light(&mut self, light: RadialLight) -> Result<()> {
        let index = self.reserve_light(LightKind::Radial)?;
        self.push(move |s| s.add_radial_light(index, light));
        Ok(())
    }

    pub fn add_spot_light(&mut self, light: SpotLight) -> Result<()> {
        let index = self.reserve_light(LightKind::Spot)?;
        self.push(move |s| s.add_spot_light(index, light));
        Ok(())
    }

    fn reserve_light(&mut self, kind: LightKind) -> Result<usize> {
        self.scene.reserve_light(kind).inspect_err(|e| {
            if matches!(e, RendererError::LightCapacity { .. }) {
                log::error!("{e}");
            }
        })
    }

    pub fn is_scene_active(&self) -> bool {
        self.scene.is_active()
    }

    /// Draw calls issued by the last completed scene, blur passes included.
    pub fn draw_calls_last_scene(&self) -> u32 {
        self.last_scene_draws.load(Ordering::Acquire)
    }

    // ── quads ─────────────────────────────────────────────────────────────

    /// Axis-aligned quad with its bottom-left corner at `position`.
    pub fn draw_quad(&self, position: Vec2, color: Vec4, scale: f32, texture: Option<&Texture>) {
        self.push_quad(Quad { position, color, scale, rotation: None }, texture);
    }

    /// Quad centered on `position`, rotated by `rotation` radians.
    pub fn draw_quad_rotated(
        &self,
        position: Vec2,
        color: Vec4,
        scale: f32,
        rotation: f32,
        texture: Option<&Texture>,
    ) {
        let quad = Quad { position, color, scale, rotation: Some(rotation) };
        self.push_quad(quad, texture);
    }

    fn push_quad(&self, quad: Quad, texture: Option<&Texture>) {
        let texture = texture.cloned();
        self.push(move |s| s.draw_quad(quad, texture));
    }

    /// Axis-aligned quads sharing one texture. The slices must have equal length.
    pub fn draw_quads(&self, positions: &[Vec2], colors: &[Vec4], scales: &[f32], texture: Option<&Texture>) {
        debug_assert!(
            positions.len() == colors.len() && positions.len() == scales.len(),
            "draw_quads slices differ in length"
        );
        let positions = positions.to_vec();
        let colors = colors.to_vec();
        let scales = scales.to_vec();
        let texture = texture.cloned();
        self.push(move |s| s.draw_quads(&positions, &colors, &scales, texture));
    }

    // ── overlay ───────────────────────────────────────────────────────────

    pub fn overlay_new_frame(&self) {
        self.push(|s| s.overlay_new_frame());
    }

    pub fn overlay_end_frame(&self) {
        self.push(|s| s.overlay_end_frame());
    }

    pub fn draw_overlay(&self, data: OverlayDrawData) {
        if data.is_empty() {
            return;
        }
        self.push(move |s| s.draw_overlay(&data));
    }

    // ── present ───────────────────────────────────────────────────────────

    /// Presents the window, then waits out the frame period.
    ///
    /// Returns the first failure of a queued command since the last present.
    pub fn present(&mut self) -> Result<FrameTime> {
        self.queue.call(|s| s.present())??;
        Ok(self.pacer.pace())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
