//! Renderer-thread state.
//!
//! Everything here runs on the renderer thread. Methods are the immediate
//! variants behind the queued `Renderer` operations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::api::{
    DrawCall, DrawRange, OverlayDrawData, Primitive, RendererApi, RenderingBlendMode,
    RenderingStage,
};
use crate::batch::{
    index_count_for, quad_indices, Quad, QuadBatch, QuadVertex, MAX_QUADS_PER_BATCH,
    MAX_QUAD_TEXTURES_PER_BATCH, MAX_QUAD_VERTICES_PER_BATCH,
};
use crate::blur::{BlurPass, BlurUniforms, ImageVertex, BLUR_UNIFORM_SLOT, FULLSCREEN_QUAD};
use crate::coords::Rectangle;
use crate::error::{RendererError, Result};
use crate::frame::{FrameUniforms, FRAME_UNIFORM_SLOT};
use crate::queue::CommandQueue;
use crate::resource::{
    expand_rgb, uniform_block_size, FrameBuffer, FrameBufferInfo, Handle, Image, IndexBuffer,
    IndexBufferInfo, LayoutElement, Releaser, ResourceId, ResourceKind, ResourceRegistry,
    ShaderProgram, ShaderProgramDesc, Texture, TextureFormat, TextureInfo, TextureSource,
    UniformBuffer, UniformBufferInfo, VertexBuffer, VertexBufferInfo, VertexLayout,
};
use crate::scene::{RadialLight, SceneDescription, SpotLight};
use crate::shader::{ShaderSources, SHADER_MANIFEST};

/// Name of the blur program in the shader manifest.
const BLUR_SHADER: &str = "BlurShader";
/// Name of the quad batch program in the shader manifest.
const QUAD_SHADER: &str = "QuadBatchShader";

pub(crate) struct RenderState {
    api: Box<dyn RendererApi>,
    next_id: u64,
    releaser: Releaser,
    registry: Arc<Mutex<ResourceRegistry>>,

    shaders: HashMap<String, ShaderProgram>,
    shader_dir: PathBuf,
    white: Texture,

    batch: QuadBatch<Texture>,
    batch_vb: VertexBuffer,
    batch_ib: IndexBuffer,
    quad_shader: ShaderProgram,

    blur: BlurPass,

    frame: FrameUniforms,
    frame_ub: UniformBuffer,
    frame_dirty: bool,

    scene: Option<SceneDescription>,
    scene_draws: u32,
    last_scene_draws: Arc<AtomicU32>,

    deferred_error: Option<RendererError>,
}

impl RenderState {
    /// Builds the backend-side resources: per-frame buffer, fallback texture,
    /// shader manifest, batch buffers, blur resources and overlay.
    pub fn new(
        api: Box<dyn RendererApi>,
        queue: CommandQueue<RenderState>,
        registry: Arc<Mutex<ResourceRegistry>>,
        last_scene_draws: Arc<AtomicU32>,
        shader_dir: &Path,
    ) -> Result<Self> {
        let releaser: Releaser = Arc::new(move |id: ResourceId| {
            // routed through the queue so the backend object dies on this thread
            queue.push_forced(move |state: &mut RenderState| state.destroy_resource(id));
        });

        let mut api = api;
        let mut next_id = 0;
        let mut boot = Boot {
            api: api.as_mut(),
            next_id: &mut next_id,
            releaser: &releaser,
            registry: &registry,
            shader_dir,
        };

        let frame = FrameUniforms::default();
        let frame_ub = boot.create_uniform_buffer(
            "FrameData",
            FRAME_UNIFORM_SLOT,
            FrameUniforms::layout(),
            Some(frame.as_bytes()),
        )?;
        let white = boot.create_texture([1, 1], TextureFormat::Rgba8, Some(&[255; 4]))?;

        let mut shaders = HashMap::new();
        for entry in SHADER_MANIFEST {
            let program = boot.create_shader_program(&entry.desc(shader_dir), &frame_ub)?;
            shaders.insert(entry.name.to_string(), program);
        }
        let builtin = |name: &str| {
            shaders
                .get(name)
                .cloned()
                .ok_or_else(|| RendererError::invalid(format!("built-in shader `{name}` missing")))
        };
        let quad_shader = builtin(QUAD_SHADER)?;
        let blur_shader = builtin(BLUR_SHADER)?;

        let batch_vb = boot.create_vertex_buffer(
            None,
            (MAX_QUAD_VERTICES_PER_BATCH * size_of::<QuadVertex>()) as u64,
            QuadVertex::layout(),
            true,
        )?;
        let batch_ib = boot.create_index_buffer(&quad_indices(MAX_QUADS_PER_BATCH))?;

        let blur = BlurPass::new(
            boot.create_frame_buffer([1, 1])?,
            boot.create_vertex_buffer(
                Some(bytemuck::cast_slice(&FULLSCREEN_QUAD)),
                size_of_val(&FULLSCREEN_QUAD) as u64,
                ImageVertex::layout(),
                false,
            )?,
            boot.create_uniform_buffer("BlurData", BLUR_UNIFORM_SLOT, BlurUniforms::layout(), None)?,
            blur_shader,
        );

        boot.api.overlay_init()?;

        log::debug!(
            "renderer state ready: {} programs, {} resources",
            shaders.len(),
            registry.lock().len()
        );

        Ok(Self {
            api,
            next_id,
            releaser,
            registry,
            shaders,
            shader_dir: shader_dir.to_path_buf(),
            batch: QuadBatch::new(white.clone()),
            white,
            batch_vb,
            batch_ib,
            quad_shader,
            blur,
            frame,
            frame_ub,
            frame_dirty: false,
            scene: None,
            scene_draws: 0,
            last_scene_draws,
            deferred_error: None,
        })
    }

    pub fn api(&mut self) -> &mut dyn RendererApi {
        self.api.as_mut()
    }

    pub fn shaders(&self) -> &HashMap<String, ShaderProgram> {
        &self.shaders
    }

    fn boot(&mut self) -> Boot<'_> {
        Boot {
            api: self.api.as_mut(),
            next_id: &mut self.next_id,
            releaser: &self.releaser,
            registry: &self.registry,
            shader_dir: &self.shader_dir,
        }
    }

    // ── resources ─────────────────────────────────────────────────────────

    pub fn create_vertex_buffer(
        &mut self,
        data: Option<Vec<u8>>,
        size: u64,
        layout: VertexLayout,
        dynamic: bool,
    ) -> Result<VertexBuffer> {
        self.boot().create_vertex_buffer(data.as_deref(), size, layout, dynamic)
    }

    pub fn create_index_buffer(&mut self, indices: Vec<u32>) -> Result<IndexBuffer> {
        self.boot().create_index_buffer(&indices)
    }

    pub fn create_uniform_buffer(
        &mut self,
        name: String,
        slot: u32,
        layout: Vec<LayoutElement>,
        data: Option<Vec<u8>>,
    ) -> Result<UniformBuffer> {
        self.boot().create_uniform_buffer(&name, slot, layout, data.as_deref())
    }

    pub fn create_texture(
        &mut self,
        size: [u32; 2],
        format: TextureFormat,
        data: Option<Vec<u8>>,
    ) -> Result<Texture> {
        self.boot().create_texture(size, format, data.as_deref())
    }

    pub fn create_frame_buffer(&mut self, size: [u32; 2]) -> Result<FrameBuffer> {
        self.boot().create_frame_buffer(size)
    }

    pub fn create_shader_program(&mut self, desc: ShaderProgramDesc) -> Result<ShaderProgram> {
        let frame_ub = self.frame_ub.clone();
        let program = self.boot().create_shader_program(&desc, &frame_ub)?;
        self.shaders.insert(desc.name.clone(), program.clone());
        Ok(program)
    }

    pub fn destroy_resource(&mut self, id: ResourceId) {
        log::trace!("destroying resource {}", id.raw());
        self.api.destroy(id);
    }

    pub fn update_vertex_buffer(&mut self, buffer: &VertexBuffer, offset: u64, data: &[u8]) {
        self.flush_quads();
        let r = self.api.update_vertex_buffer(buffer.id(), offset, data);
        self.record("update_vertex_buffer", r);
    }

    pub fn update_uniform_buffer(&mut self, buffer: &UniformBuffer, data: &[u8]) {
        self.flush_quads();
        let r = self.api.update_uniform_buffer(buffer.id(), data);
        self.record("update_uniform_buffer", r);
    }

    pub fn set_texture_image(&mut self, texture: &Texture, image: Image) {
        self.flush_quads();
        let (format, data) = expand_rgb(image.format, &image.data);
        let r = self.api.set_texture_image(texture.id(), image.size(), format, &data);
        if r.is_ok() {
            texture.info().set(image.size(), format);
            texture.set_gpu_bytes(data.len() as u64);
        }
        self.record("set_texture_image", r);
    }

    pub fn resize_frame_buffer(&mut self, frame_buffer: &FrameBuffer, size: [u32; 2]) {
        self.flush_quads();
        let r = self.api.resize_frame_buffer(frame_buffer.id(), size);
        if r.is_ok() {
            frame_buffer.info().set_size(size);
            frame_buffer.set_gpu_bytes(frame_buffer_bytes(size));
        }
        self.record("resize_frame_buffer", r);
    }

    pub fn read_frame_buffer(&mut self, frame_buffer: &FrameBuffer) -> Result<Image> {
        self.flush_quads();
        self.api.read_frame_buffer(frame_buffer.id())
    }

    // ── bindings ──────────────────────────────────────────────────────────

    pub fn bind_uniform_buffer(&mut self, shader: &ShaderProgram, buffer: &UniformBuffer, stage: RenderingStage) {
        self.flush_quads();
        let r = self
            .api
            .bind_uniform_buffer(shader.id(), buffer.id(), buffer.info().slot, stage);
        self.record("bind_uniform_buffer", r);
    }

    pub fn bind_texture(&mut self, shader: &ShaderProgram, source: TextureSource, slot: u32, stage: RenderingStage) {
        self.flush_quads();
        let r = self.api.bind_texture(shader.id(), source, slot, stage);
        self.record("bind_texture", r);
    }

    // ── drawing ───────────────────────────────────────────────────────────

    pub fn draw(&mut self, call: DrawCall) {
        self.flush_quads();
        self.sync_frame_uniforms();
        let r = self.api.draw(&call);
        if r.is_ok() {
            self.scene_draws += 1;
        }
        self.record("draw", r);
    }

    pub fn clear_screen(&mut self) {
        self.flush_quads();
        let r = self.api.clear_screen();
        self.record("clear_screen", r);
    }

    pub fn set_viewport(&mut self, viewport: Rectangle) {
        self.flush_quads();
        self.api.set_viewport(viewport);
    }

    pub fn set_scissor(&mut self, scissor: Option<Rectangle>) {
        self.flush_quads();
        self.api.set_scissor(scissor);
    }

    pub fn set_blend_mode(&mut self, mode: RenderingBlendMode) {
        self.flush_quads();
        self.api.set_blend_mode(mode);
    }

    pub fn set_render_target_window(&mut self) {
        self.flush_quads();
        self.api.set_render_target_window();
        let size = self.api.window_size();
        self.api.set_viewport(Rectangle::full(size));
    }

    pub fn set_render_target(&mut self, frame_buffer: &FrameBuffer) {
        self.flush_quads();
        let r = self.api.set_render_target_frame_buffer(frame_buffer.id());
        if r.is_ok() {
            self.api.set_viewport(Rectangle::full(frame_buffer.info().size()));
        }
        self.record("set_render_target", r);
    }

    pub fn recreate_swapchain(&mut self, size: [u32; 2]) {
        self.flush_quads();
        let r = self.api.recreate_swapchain(size);
        self.record("recreate_swapchain", r);
    }

    pub fn set_swapchain_suspended(&mut self, suspended: bool) {
        self.api.set_swapchain_suspended(suspended);
    }

    /// Flushes pending work, presents, and reports the first deferred error.
    pub fn present(&mut self) -> Result<()> {
        self.flush_quads();
        let presented = self.api.present();
        match self.deferred_error.take() {
            Some(e) => Err(e),
            None => presented,
        }
    }

    // ── scene ─────────────────────────────────────────────────────────────

    pub fn begin_scene(&mut self, scene: SceneDescription) {
        self.flush_quads();

        let target = &scene.target;
        let r = self.api.set_render_target_frame_buffer(target.id());
        self.record("begin_scene", r);
        self.api.set_viewport(Rectangle::full(target.info().size()));

        self.frame.set_view_projection(scene.camera.view_projection());
        self.frame.clear_lights();
        self.frame_dirty = true;
        self.sync_frame_uniforms();

        self.scene_draws = 0;
        self.scene = Some(scene);
    }

    pub fn add_radial_light(&mut self, index: usize, light: RadialLight) {
        self.flush_quads();
        self.frame.write_radial(index, &light);
        self.frame_dirty = true;
    }

    pub fn add_spot_light(&mut self, index: usize, light: SpotLight) {
        self.flush_quads();
        self.frame.write_spot(index, &light);
        self.frame_dirty = true;
    }

    pub fn end_scene(&mut self) {
        self.flush_quads();

        if let Some(scene) = self.scene.take() {
            if scene.blur_enabled && self.api.blend_mode() != RenderingBlendMode::Screen {
                self.sync_frame_uniforms();
                let r = self
                    .blur
                    .apply(self.api.as_mut(), &scene.target, scene.blur_radius, &self.frame_ub);
                match r {
                    Ok(draws) => self.scene_draws += draws,
                    Err(e) => self.record_error("blur", e),
                }
            }
        }

        self.last_scene_draws.store(self.scene_draws, Ordering::Release);
        log::trace!("scene ended after {} draw calls", self.scene_draws);
    }

    /// Ends a scene whose draws were dropped while minimized. Nothing is drawn.
    pub fn abandon_scene(&mut self) {
        self.batch.discard();
        if self.scene.take().is_some() {
            log::debug!("scene abandoned while minimized");
        }
        self.last_scene_draws.store(self.scene_draws, Ordering::Release);
    }

    // ── quad batch ────────────────────────────────────────────────────────

    pub fn draw_quad(&mut self, quad: Quad, texture: Option<Texture>) {
        self.with_batch(|batch, mut sink| batch.push(&quad, texture.as_ref(), &mut sink));
    }

    pub fn draw_quads(
        &mut self,
        positions: &[glam::Vec2],
        colors: &[glam::Vec4],
        scales: &[f32],
        texture: Option<Texture>,
    ) {
        self.with_batch(|batch, mut sink| {
            batch.push_many(positions, colors, scales, texture.as_ref(), &mut sink)
        });
    }

    pub fn flush_quads(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        self.with_batch(|batch, mut sink| batch.flush(&mut sink));
    }

    /// Runs a batch operation whose flushes draw through the backend.
    fn with_batch<R>(
        &mut self,
        op: impl FnOnce(&mut QuadBatch<Texture>, &mut dyn FnMut(&[QuadVertex], &[Texture])) -> R,
    ) -> R {
        self.sync_frame_uniforms();

        let Self {
            api,
            batch,
            batch_vb,
            batch_ib,
            quad_shader,
            white,
            scene_draws,
            ..
        } = self;

        let mut failure = None;
        let mut sink = |vertices: &[QuadVertex], textures: &[Texture]| {
            match submit_quads(api.as_mut(), quad_shader, batch_vb, batch_ib, white, vertices, textures) {
                Ok(()) => *scene_draws += 1,
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        };
        let out = op(batch, &mut sink);

        if let Some(e) = failure {
            self.record_error("quad flush", e);
        }
        out
    }

    // ── overlay ───────────────────────────────────────────────────────────

    pub fn overlay_new_frame(&mut self) {
        self.api.overlay_new_frame();
    }

    pub fn overlay_end_frame(&mut self) {
        self.api.overlay_end_frame();
    }

    pub fn draw_overlay(&mut self, data: &OverlayDrawData) {
        self.flush_quads();
        let r = self.api.draw_overlay(data);
        self.record("draw_overlay", r);
    }

    // ── helpers ───────────────────────────────────────────────────────────

    fn sync_frame_uniforms(&mut self) {
        if !self.frame_dirty {
            return;
        }
        let r = self.api.update_uniform_buffer(self.frame_ub.id(), self.frame.as_bytes());
        self.frame_dirty = false;
        self.record("frame uniform upload", r);
    }

    fn record(&mut self, what: &str, result: Result<()>) {
        if let Err(e) = result {
            self.record_error(what, e);
        }
    }

    /// Logs an asynchronous failure. The first one is reported by the next present.
    fn record_error(&mut self, what: &str, e: RendererError) {
        log::error!("{what} failed: {e}");
        self.deferred_error.get_or_insert(e);
    }
}

fn submit_quads(
    api: &mut dyn RendererApi,
    shader: &ShaderProgram,
    vb: &VertexBuffer,
    ib: &IndexBuffer,
    white: &Texture,
    vertices: &[QuadVertex],
    textures: &[Texture],
) -> Result<()> {
    // unused slots fall back to white so no stale binding survives
    for slot in 0..MAX_QUAD_TEXTURES_PER_BATCH {
        let texture = textures.get(slot).unwrap_or(white);
        api.bind_texture(
            shader.id(),
            TextureSource::from(texture),
            slot as u32,
            RenderingStage::FragmentShader,
        )?;
    }
    api.update_vertex_buffer(vb.id(), 0, bytemuck::cast_slice(vertices))?;
    api.draw(&DrawCall {
        shader: shader.id(),
        primitive: Primitive::Triangles,
        vertex_buffer: vb.id(),
        range: DrawRange::IndexedCount(ib.id(), index_count_for(vertices.len())),
    })
}

fn frame_buffer_bytes(size: [u32; 2]) -> u64 {
    size[0] as u64 * size[1] as u64 * 4
}

// ── creation ──────────────────────────────────────────────────────────────

/// Resource creation context: backend, id counter, releaser and registry.
struct Boot<'a> {
    api: &'a mut dyn RendererApi,
    next_id: &'a mut u64,
    releaser: &'a Releaser,
    registry: &'a Mutex<ResourceRegistry>,
    /// Include root for in-memory program sources.
    shader_dir: &'a Path,
}

impl Boot<'_> {
    fn allocate(&mut self) -> ResourceId {
        *self.next_id += 1;
        ResourceId::from_raw(*self.next_id)
    }

    fn handle<I: Send + Sync + 'static>(
        &mut self,
        id: ResourceId,
        kind: ResourceKind,
        info: I,
        bytes: u64,
    ) -> Handle<I> {
        let handle = Handle::new(id, kind, info, bytes, Arc::clone(self.releaser));
        self.registry.lock().register(&handle);
        handle
    }

    fn create_vertex_buffer(
        &mut self,
        data: Option<&[u8]>,
        size: u64,
        layout: VertexLayout,
        dynamic: bool,
    ) -> Result<VertexBuffer> {
        let id = self.allocate();
        self.api.create_vertex_buffer(id, size, &layout, data)?;
        Ok(self.handle(
            id,
            ResourceKind::VertexBuffer,
            VertexBufferInfo { size, layout, dynamic },
            size,
        ))
    }

    fn create_index_buffer(&mut self, indices: &[u32]) -> Result<IndexBuffer> {
        let id = self.allocate();
        self.api.create_index_buffer(id, indices)?;
        let count = indices.len() as u32;
        Ok(self.handle(
            id,
            ResourceKind::IndexBuffer,
            IndexBufferInfo { count },
            size_of_val(indices) as u64,
        ))
    }

    fn create_uniform_buffer(
        &mut self,
        name: &str,
        slot: u32,
        layout: Vec<LayoutElement>,
        data: Option<&[u8]>,
    ) -> Result<UniformBuffer> {
        let id = self.allocate();
        let size = uniform_block_size(&layout);
        self.api.create_uniform_buffer(id, size, data)?;
        Ok(self.handle(
            id,
            ResourceKind::UniformBuffer,
            UniformBufferInfo { name: name.to_string(), slot, layout, size },
            size,
        ))
    }

    fn create_texture(
        &mut self,
        size: [u32; 2],
        format: TextureFormat,
        data: Option<&[u8]>,
    ) -> Result<Texture> {
        let id = self.allocate();
        let (format, data) = match data {
            Some(data) => {
                crate::resource::check_data_len(size, format, data)?;
                let (format, data) = expand_rgb(format, data);
                (format, Some(data))
            }
            None => (expand_rgb(format, &[]).0, None),
        };
        self.api.create_texture(id, size, format, data.as_deref())?;
        let bytes = size[0] as u64 * size[1] as u64 * format.bytes_per_pixel() as u64;
        Ok(self.handle(id, ResourceKind::Texture, TextureInfo::new(size, format), bytes))
    }

    fn create_frame_buffer(&mut self, size: [u32; 2]) -> Result<FrameBuffer> {
        let id = self.allocate();
        self.api.create_frame_buffer(id, size)?;
        Ok(self.handle(
            id,
            ResourceKind::FrameBuffer,
            FrameBufferInfo::new(size),
            frame_buffer_bytes(size),
        ))
    }

    /// Loads, compiles and binds the per-frame buffer at slot 0.
    fn create_shader_program(
        &mut self,
        desc: &ShaderProgramDesc,
        frame_ub: &UniformBuffer,
    ) -> Result<ShaderProgram> {
        let sources = ShaderSources::load(desc, self.shader_dir)?;
        let id = self.allocate();
        self.api.create_shader_program(id, &sources)?;
        if desc.uniform_slots.contains(&FRAME_UNIFORM_SLOT) {
            self.api.bind_uniform_buffer(id, frame_ub.id(), FRAME_UNIFORM_SLOT, RenderingStage::VertexShader)?;
        }
        log::debug!("shader program `{}` compiled", desc.name);
        Ok(self.handle(id, ResourceKind::ShaderProgram, desc.clone(), 0))
    }
}
