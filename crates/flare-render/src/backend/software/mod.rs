//! Headless CPU backend.
//!
//! Implements the complete backend contract against in-memory surfaces. Used for
//! tests and for running the renderer without a GPU.

mod raster;
mod shading;

use std::collections::HashMap;

use crate::api::{
    BackendInfo, BackendKind, DeviceMemory, DrawCall, DrawRange, OverlayDrawData, Primitive, RenderTarget,
    RendererApi, RenderingBlendMode, RenderingStage,
};
use crate::blur::BLUR_UNIFORM_SLOT;
use crate::coords::Rectangle;
use crate::error::{RendererError, Result};
use crate::frame::{FrameUniforms, FRAME_UNIFORM_SLOT};
use crate::material::MATERIAL_UNIFORM_SLOT;
use crate::resource::{
    check_data_len, vertex_stride, Image, ResourceId, TextureFormat, TextureSource, VertexLayout,
};
use crate::shader::ShaderSources;

use raster::{Surface, TRANSPARENT};
use shading::{FragmentInputs, ProgramKind, Varying};

const BACKEND: &str = "Software";

struct VertexData {
    bytes: Vec<u8>,
    stride: usize,
}

struct Program {
    name: String,
    kind: ProgramKind,
    uniform_slots: Vec<u32>,
    uniforms: HashMap<u32, ResourceId>,
    textures: Vec<Option<TextureSource>>,
}

#[derive(Debug, Default)]
struct OverlayState {
    initialized: bool,
    in_frame: bool,
}

pub struct SoftwareBackend {
    window: Surface,
    vertex_buffers: HashMap<ResourceId, VertexData>,
    index_buffers: HashMap<ResourceId, Vec<u32>>,
    uniform_buffers: HashMap<ResourceId, Vec<u8>>,
    textures: HashMap<ResourceId, Surface>,
    frame_buffers: HashMap<ResourceId, Surface>,
    programs: HashMap<ResourceId, Program>,

    viewport: Rectangle,
    scissor: Option<Rectangle>,
    blend: RenderingBlendMode,
    target: RenderTarget,
    overlay: OverlayState,
    presented: u64,
    suspended: bool,
}

impl SoftwareBackend {
    pub fn new(size: [u32; 2]) -> Self {
        log::debug!("software backend: {}x{} window surface", size[0], size[1]);
        Self {
            window: Surface::new(size),
            vertex_buffers: HashMap::new(),
            index_buffers: HashMap::new(),
            uniform_buffers: HashMap::new(),
            textures: HashMap::new(),
            frame_buffers: HashMap::new(),
            programs: HashMap::new(),
            viewport: Rectangle::full(size),
            scissor: None,
            blend: RenderingBlendMode::Overlay,
            target: RenderTarget::Window,
            overlay: OverlayState::default(),
            presented: 0,
            suspended: false,
        }
    }

    /// Frames presented so far.
    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    /// RGBA8 copy of the window surface.
    pub fn read_window(&self) -> Image {
        self.window.to_image()
    }

    // ── draw helpers ──────────────────────────────────────────────────────

    fn target_surface_mut(&mut self) -> Result<&mut Surface> {
        match self.target {
            RenderTarget::Window => Ok(&mut self.window),
            RenderTarget::FrameBuffer(id) => self
                .frame_buffers
                .get_mut(&id)
                .ok_or(RendererError::unknown("frame buffer", id)),
        }
    }

    fn resolve_source(&self, source: TextureSource) -> Option<&Surface> {
        resolve(&self.textures, &self.frame_buffers, source)
    }

    /// Moves the current target surface out so inputs can be borrowed while drawing.
    fn take_target(&mut self) -> Result<Surface> {
        match self.target {
            RenderTarget::Window => Ok(std::mem::replace(&mut self.window, Surface::new([0, 0]))),
            RenderTarget::FrameBuffer(id) => self
                .frame_buffers
                .remove(&id)
                .ok_or(RendererError::unknown("frame buffer", id)),
        }
    }

    fn restore_target(&mut self, surface: Surface) {
        match self.target {
            RenderTarget::Window => self.window = surface,
            RenderTarget::FrameBuffer(id) => {
                self.frame_buffers.insert(id, surface);
            }
        }
    }

    fn frame_uniforms(&self, program: &Program) -> FrameUniforms {
        program
            .uniforms
            .get(&FRAME_UNIFORM_SLOT)
            .and_then(|id| self.uniform_buffers.get(id))
            .filter(|bytes| bytes.len() >= size_of::<FrameUniforms>())
            .map(|bytes| bytemuck::pod_read_unaligned(&bytes[..size_of::<FrameUniforms>()]))
            .unwrap_or_default()
    }

    /// Contents of the buffer bound at `slot`, when it is large enough for `T`.
    fn slot_uniforms<T: bytemuck::Pod>(&self, program: &Program, slot: u32) -> Option<T> {
        program
            .uniforms
            .get(&slot)
            .and_then(|id| self.uniform_buffers.get(id))
            .filter(|bytes| bytes.len() >= size_of::<T>())
            .map(|bytes| bytemuck::pod_read_unaligned(&bytes[..size_of::<T>()]))
    }

    /// Vertex indices of the call, before primitive assembly.
    fn fetch_indices(&self, call: &DrawCall, vertex_count: usize) -> Result<Vec<u32>> {
        let (ib, count) = match call.range {
            DrawRange::Vertices(n) => {
                if n as usize > vertex_count {
                    return Err(RendererError::invalid(format!(
                        "draw of {n} vertices from a buffer holding {vertex_count}"
                    )));
                }
                return Ok((0..n).collect());
            }
            DrawRange::Indexed(ib) => (ib, None),
            DrawRange::IndexedCount(ib, n) => (ib, Some(n as usize)),
        };
        let indices = self
            .index_buffers
            .get(&ib)
            .ok_or(RendererError::unknown("index buffer", ib))?;
        let count = count.unwrap_or(indices.len());
        if count > indices.len() {
            return Err(RendererError::invalid(format!(
                "draw of {count} indices from a buffer holding {}",
                indices.len()
            )));
        }
        let indices = &indices[..count];
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(RendererError::invalid(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }
        Ok(indices.to_vec())
    }
}

fn resolve<'a>(
    textures: &'a HashMap<ResourceId, Surface>,
    frame_buffers: &'a HashMap<ResourceId, Surface>,
    source: TextureSource,
) -> Option<&'a Surface> {
    match source {
        TextureSource::Texture(id) => textures.get(&id),
        TextureSource::FrameBuffer(id) => frame_buffers.get(&id),
    }
}

/// Splits an index list into primitives of the given topology.
fn assemble(primitive: Primitive, indices: &[u32]) -> Vec<Vec<u32>> {
    match primitive {
        Primitive::Triangles => indices.chunks_exact(3).map(<[u32]>::to_vec).collect(),
        Primitive::TriangleFan => (1..indices.len().saturating_sub(1))
            .map(|i| vec![indices[0], indices[i], indices[i + 1]])
            .collect(),
        Primitive::Lines => indices.chunks_exact(2).map(<[u32]>::to_vec).collect(),
    }
}

fn rasterize(
    target: &mut Surface,
    clip: Rectangle,
    viewport: Rectangle,
    blend: RenderingBlendMode,
    primitives: &[Vec<u32>],
    varyings: &[Varying],
    fragment: &FragmentInputs<'_>,
) {
    for prim in primitives {
        match prim.as_slice() {
            &[a, b, c] => {
                let v = [&varyings[a as usize], &varyings[b as usize], &varyings[c as usize]];
                let p = v.map(|v| raster::ndc_to_pixel(v.clip, viewport));
                raster::fill_triangle(p, clip, |x, y, w| {
                    let color = fragment.shade(&Varying::lerp3(v, w));
                    target.blend_pixel(x, y, color, blend);
                });
            }
            &[a, b] => {
                let (va, vb) = (&varyings[a as usize], &varyings[b as usize]);
                let p0 = raster::ndc_to_pixel(va.clip, viewport);
                let p1 = raster::ndc_to_pixel(vb.clip, viewport);
                raster::draw_line(p0, p1, clip, |x, y, t| {
                    let color = fragment.shade(&Varying::lerp2(va, vb, t));
                    target.blend_pixel(x, y, color, blend);
                });
            }
            _ => {}
        }
    }
}

impl RendererApi for SoftwareBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Software,
            device: "CPU rasterizer".to_string(),
            api: "CPU".to_string(),
        }
    }

    // ── resources ─────────────────────────────────────────────────────────

    fn create_vertex_buffer(
        &mut self,
        id: ResourceId,
        size: u64,
        layout: &VertexLayout,
        data: Option<&[u8]>,
    ) -> Result<()> {
        let mut bytes = vec![0u8; size as usize];
        if let Some(data) = data {
            if data.len() as u64 > size {
                return Err(RendererError::invalid("vertex data larger than buffer"));
            }
            bytes[..data.len()].copy_from_slice(data);
        }
        let stride = vertex_stride(layout) as usize;
        self.vertex_buffers.insert(id, VertexData { bytes, stride });
        Ok(())
    }

    fn update_vertex_buffer(&mut self, id: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let vb = self
            .vertex_buffers
            .get_mut(&id)
            .ok_or(RendererError::unknown("vertex buffer", id))?;
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(data.len())?))
            .filter(|r| r.end <= vb.bytes.len())
            .ok_or_else(|| {
                RendererError::invalid(format!(
                    "vertex update of {} bytes at offset {offset} exceeds buffer size {}",
                    data.len(),
                    vb.bytes.len()
                ))
            })?;
        vb.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn create_index_buffer(&mut self, id: ResourceId, indices: &[u32]) -> Result<()> {
        self.index_buffers.insert(id, indices.to_vec());
        Ok(())
    }

    fn create_uniform_buffer(&mut self, id: ResourceId, size: u64, data: Option<&[u8]>) -> Result<()> {
        let mut bytes = vec![0u8; size as usize];
        if let Some(data) = data {
            let n = data.len().min(bytes.len());
            bytes[..n].copy_from_slice(&data[..n]);
        }
        self.uniform_buffers.insert(id, bytes);
        Ok(())
    }

    fn update_uniform_buffer(&mut self, id: ResourceId, data: &[u8]) -> Result<()> {
        let ub = self
            .uniform_buffers
            .get_mut(&id)
            .ok_or(RendererError::unknown("uniform buffer", id))?;
        if data.len() > ub.len() {
            return Err(RendererError::invalid(format!(
                "uniform update of {} bytes exceeds buffer size {}",
                data.len(),
                ub.len()
            )));
        }
        ub[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(
        &mut self,
        id: ResourceId,
        size: [u32; 2],
        format: TextureFormat,
        data: Option<&[u8]>,
    ) -> Result<()> {
        let surface = match data {
            Some(data) => {
                check_data_len(size, format, data)?;
                Surface::from_bytes(size, format, data)
            }
            None => Surface::new(size),
        };
        self.textures.insert(id, surface);
        Ok(())
    }

    fn set_texture_image(
        &mut self,
        id: ResourceId,
        size: [u32; 2],
        format: TextureFormat,
        data: &[u8],
    ) -> Result<()> {
        check_data_len(size, format, data)?;
        let texture = self
            .textures
            .get_mut(&id)
            .ok_or(RendererError::unknown("texture", id))?;
        *texture = Surface::from_bytes(size, format, data);
        Ok(())
    }

    fn create_frame_buffer(&mut self, id: ResourceId, size: [u32; 2]) -> Result<()> {
        self.frame_buffers.insert(id, Surface::new(size));
        Ok(())
    }

    fn resize_frame_buffer(&mut self, id: ResourceId, size: [u32; 2]) -> Result<()> {
        let fb = self
            .frame_buffers
            .get_mut(&id)
            .ok_or(RendererError::unknown("frame buffer", id))?;
        if fb.size() != size {
            *fb = Surface::new(size);
        }
        Ok(())
    }

    fn read_frame_buffer(&mut self, id: ResourceId) -> Result<Image> {
        self.frame_buffers
            .get(&id)
            .map(Surface::to_image)
            .ok_or(RendererError::unknown("frame buffer", id))
    }

    fn create_shader_program(&mut self, id: ResourceId, sources: &ShaderSources) -> Result<()> {
        let kind = ProgramKind::classify(sources)?;
        log::debug!("software backend: program `{}` runs as {kind:?}", sources.name);
        self.programs.insert(
            id,
            Program {
                name: sources.name.clone(),
                kind,
                uniform_slots: sources.uniform_slots.clone(),
                uniforms: HashMap::new(),
                textures: vec![None; sources.texture_slots as usize],
            },
        );
        Ok(())
    }

    fn bind_uniform_buffer(
        &mut self,
        shader: ResourceId,
        buffer: ResourceId,
        slot: u32,
        _stage: RenderingStage,
    ) -> Result<()> {
        if !self.uniform_buffers.contains_key(&buffer) {
            return Err(RendererError::unknown("uniform buffer", buffer));
        }
        let program = self
            .programs
            .get_mut(&shader)
            .ok_or(RendererError::unknown("shader program", shader))?;
        if !program.uniform_slots.contains(&slot) {
            return Err(RendererError::invalid(format!(
                "program `{}` declares no uniform slot {slot}",
                program.name
            )));
        }
        program.uniforms.insert(slot, buffer);
        Ok(())
    }

    fn bind_texture(
        &mut self,
        shader: ResourceId,
        source: TextureSource,
        slot: u32,
        stage: RenderingStage,
    ) -> Result<()> {
        if stage == RenderingStage::VertexShader {
            return Err(RendererError::Unsupported {
                backend: BACKEND,
                what: "vertex-stage textures",
            });
        }
        if self.resolve_source(source).is_none() {
            let id = match source {
                TextureSource::Texture(id) | TextureSource::FrameBuffer(id) => id,
            };
            return Err(RendererError::unknown("texture source", id));
        }
        let program = self
            .programs
            .get_mut(&shader)
            .ok_or(RendererError::unknown("shader program", shader))?;
        let entry = program.textures.get_mut(slot as usize).ok_or_else(|| {
            RendererError::invalid(format!("program `{}` has no texture slot {slot}", program.name))
        })?;
        *entry = Some(source);
        Ok(())
    }

    fn destroy(&mut self, id: ResourceId) {
        self.vertex_buffers.remove(&id);
        self.index_buffers.remove(&id);
        self.uniform_buffers.remove(&id);
        self.textures.remove(&id);
        self.frame_buffers.remove(&id);
        self.programs.remove(&id);
        if self.target == RenderTarget::FrameBuffer(id) {
            self.target = RenderTarget::Window;
        }
    }

    // ── drawing ───────────────────────────────────────────────────────────

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let program = self
            .programs
            .get(&call.shader)
            .ok_or(RendererError::unknown("shader program", call.shader))?;
        let vb = self
            .vertex_buffers
            .get(&call.vertex_buffer)
            .ok_or(RendererError::unknown("vertex buffer", call.vertex_buffer))?;

        let kind = program.kind;
        if vb.stride != kind.vertex_stride() {
            return Err(RendererError::invalid(format!(
                "program `{}` expects {}-byte vertices, buffer has {}",
                program.name,
                kind.vertex_stride(),
                vb.stride
            )));
        }
        if let RenderTarget::FrameBuffer(target) = self.target {
            if program.textures.contains(&Some(TextureSource::FrameBuffer(target))) {
                return Err(RendererError::invalid(format!(
                    "program `{}` samples its own render target",
                    program.name
                )));
            }
        }

        let vertex_count = vb.bytes.len() / vb.stride.max(1);
        let indices = self.fetch_indices(call, vertex_count)?;
        let primitives = assemble(call.primitive, &indices);

        let frame = self.frame_uniforms(program);
        let blur = self.slot_uniforms(program, BLUR_UNIFORM_SLOT);
        let grid = self.slot_uniforms(program, MATERIAL_UNIFORM_SLOT);
        let sprite = self.slot_uniforms(program, MATERIAL_UNIFORM_SLOT);
        let varyings = shading::run_vertex_stage(kind, &vb.bytes, frame.view_projection());
        let sources = program.textures.clone();

        let (viewport, scissor, blend) = (self.viewport, self.scissor, self.blend);
        let mut target = self.take_target()?;

        let clip = viewport.clamp_to(target.size()).and_then(|c| match scissor {
            Some(s) => c.intersect(s),
            None => Some(c),
        });
        if let Some(clip) = clip {
            let fragment = FragmentInputs {
                kind,
                frame: &frame,
                blur,
                grid,
                sprite,
                textures: sources
                    .iter()
                    .map(|s| s.and_then(|s| resolve(&self.textures, &self.frame_buffers, s)))
                    .collect(),
                lights_active: shading::has_lights(&frame),
            };
            rasterize(&mut target, clip, viewport, blend, &primitives, &varyings, &fragment);
        }

        self.restore_target(target);
        Ok(())
    }

    fn clear_screen(&mut self) -> Result<()> {
        self.target_surface_mut()?.clear(TRANSPARENT);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        if !self.suspended {
            self.presented += 1;
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, size: [u32; 2]) -> Result<()> {
        if self.window.size() != size {
            self.window = Surface::new(size);
            log::debug!("software backend: window surface resized to {}x{}", size[0], size[1]);
        }
        Ok(())
    }

    fn set_swapchain_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    fn device_memory(&self) -> Option<DeviceMemory> {
        let surface = |s: &Surface| u64::from(s.size()[0]) * u64::from(s.size()[1]) * 4;
        let allocated = self.vertex_buffers.values().map(|v| v.bytes.len() as u64).sum::<u64>()
            + self.index_buffers.values().map(|i| i.len() as u64 * 4).sum::<u64>()
            + self.uniform_buffers.values().map(|u| u.len() as u64).sum::<u64>()
            + self.textures.values().chain(self.frame_buffers.values()).map(surface).sum::<u64>()
            + surface(&self.window);
        Some(DeviceMemory { allocated, reserved: allocated })
    }

    // ── state ─────────────────────────────────────────────────────────────

    fn set_viewport(&mut self, viewport: Rectangle) {
        self.viewport = viewport;
    }

    fn viewport(&self) -> Rectangle {
        self.viewport
    }

    fn set_scissor(&mut self, scissor: Option<Rectangle>) {
        self.scissor = scissor;
    }

    fn scissor(&self) -> Option<Rectangle> {
        self.scissor
    }

    fn set_blend_mode(&mut self, mode: RenderingBlendMode) {
        if mode != RenderingBlendMode::NotSpecified {
            self.blend = mode;
        }
    }

    fn blend_mode(&self) -> RenderingBlendMode {
        self.blend
    }

    fn set_render_target_window(&mut self) {
        self.target = RenderTarget::Window;
    }

    fn set_render_target_frame_buffer(&mut self, id: ResourceId) -> Result<()> {
        if !self.frame_buffers.contains_key(&id) {
            return Err(RendererError::unknown("frame buffer", id));
        }
        self.target = RenderTarget::FrameBuffer(id);
        Ok(())
    }

    fn render_target(&self) -> RenderTarget {
        self.target
    }

    fn window_size(&self) -> [u32; 2] {
        self.window.size()
    }

    // ── overlay ───────────────────────────────────────────────────────────

    fn overlay_init(&mut self) -> Result<()> {
        self.overlay.initialized = true;
        Ok(())
    }

    fn overlay_new_frame(&mut self) {
        self.overlay.in_frame = self.overlay.initialized;
    }

    fn overlay_end_frame(&mut self) {
        self.overlay.in_frame = false;
    }

    fn draw_overlay(&mut self, data: &OverlayDrawData) -> Result<()> {
        if !self.overlay.in_frame {
            log::warn!("overlay draw outside new_frame/end_frame ignored");
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }

        let size = self.window.size();
        let scale = [
            size[0] as f32 / data.display_size[0].max(1.0),
            size[1] as f32 / data.display_size[1].max(1.0),
        ];
        let window_clip = Rectangle::full(size);

        let mut window = std::mem::replace(&mut self.window, Surface::new([0, 0]));
        for cmd in &data.commands {
            let texture = cmd.texture.and_then(|s| self.resolve_source(s));
            let clip = Rectangle::new(
                (cmd.clip.x as f32 * scale[0]).floor() as i32,
                (cmd.clip.y as f32 * scale[1]).floor() as i32,
                (cmd.clip.width as f32 * scale[0]).ceil() as u32,
                (cmd.clip.height as f32 * scale[1]).ceil() as u32,
            );
            let Some(clip) = clip.intersect(window_clip) else {
                continue;
            };

            let start = cmd.index_offset as usize;
            let end = start.saturating_add(cmd.index_count as usize).min(data.indices.len());
            for tri in data.indices[start.min(end)..end].chunks_exact(3) {
                let Some(v) = tri
                    .iter()
                    .map(|&i| data.vertices.get(i as usize))
                    .collect::<Option<Vec<_>>>()
                else {
                    continue;
                };
                let p = [0, 1, 2].map(|k| {
                    [
                        (v[k].position[0] * scale[0]) as f64,
                        (v[k].position[1] * scale[1]) as f64,
                    ]
                });
                raster::fill_triangle(p, clip, |x, y, w| {
                    let mix = |f: fn(&crate::api::OverlayVertex) -> [f32; 4]| {
                        let (a, b, c) = (f(v[0]), f(v[1]), f(v[2]));
                        [0, 1, 2, 3].map(|i| a[i] * w[0] + b[i] * w[1] + c[i] * w[2])
                    };
                    let color = mix(|v| v.color);
                    let uv = mix(|v| [v.uv[0], v.uv[1], 0.0, 0.0]);
                    let texel = texture.map_or(raster::WHITE, |t| t.sample([uv[0], uv[1]]));
                    let src = [0, 1, 2, 3].map(|i| color[i] * texel[i]);
                    window.blend_pixel(x, y, src, RenderingBlendMode::Overlay);
                });
            }
        }
        self.window = window;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::api::OverlayDrawData;
    use crate::blur::{ImageVertex, FULLSCREEN_QUAD};
    use crate::batch::FlatVertex;

    fn program(backend: &mut SoftwareBackend, id: u64, vertex: &str, fragment: &str, textures: u32) -> ResourceId {
        let id = ResourceId::from_raw(id);
        let sources = ShaderSources {
            name: format!("{vertex}{fragment}"),
            vertex_path: Some(PathBuf::from(format!("{vertex}.vert.wgsl"))),
            fragment_path: Some(PathBuf::from(format!("{fragment}.frag.wgsl"))),
            vertex: String::new(),
            fragment: String::new(),
            uniform_slots: vec![0, 1],
            texture_slots: textures,
        };
        backend.create_shader_program(id, &sources).unwrap();
        id
    }

    fn flat_buffer(backend: &mut SoftwareBackend, id: u64, verts: &[FlatVertex]) -> ResourceId {
        let id = ResourceId::from_raw(id);
        let layout = FlatVertex::layout();
        let bytes = bytemuck::cast_slice(verts);
        backend.create_vertex_buffer(id, bytes.len() as u64, &layout, Some(bytes)).unwrap();
        id
    }

    fn flat(x: f32, y: f32, color: [f32; 4]) -> FlatVertex {
        FlatVertex { position: [x, y], color }
    }

    fn draw_fullscreen_flat(backend: &mut SoftwareBackend, color: [f32; 4]) {
        let shader = program(backend, 100, "FlatColor", "FlatColor", 0);
        let vb = flat_buffer(
            backend,
            101,
            &[flat(-1.0, -1.0, color), flat(-1.0, 1.0, color), flat(1.0, 1.0, color), flat(1.0, -1.0, color)],
        );
        backend
            .draw(&DrawCall {
                shader,
                primitive: Primitive::TriangleFan,
                vertex_buffer: vb,
                range: DrawRange::Vertices(4),
            })
            .unwrap();
    }

    // ── assembly ──────────────────────────────────────────────────────────

    #[test]
    fn fans_expand_around_first_vertex() {
        assert_eq!(assemble(Primitive::TriangleFan, &[0, 1, 2, 3]), vec![vec![0, 1, 2], vec![0, 2, 3]]);
        assert_eq!(assemble(Primitive::Lines, &[0, 1, 2]), vec![vec![0, 1]]);
        assert!(assemble(Primitive::TriangleFan, &[0, 1]).is_empty());
    }

    // ── drawing ───────────────────────────────────────────────────────────

    #[test]
    fn fan_covers_whole_window_once() {
        let mut b = SoftwareBackend::new([8, 6]);
        b.set_blend_mode(RenderingBlendMode::Additive);
        draw_fullscreen_flat(&mut b, [0.25, 0.0, 0.0, 1.0]);

        let img = b.read_window();
        assert!(img.data.chunks_exact(4).all(|p| p == [64, 0, 0, 255]));
    }

    #[test]
    fn scissor_limits_drawing() {
        let mut b = SoftwareBackend::new([8, 8]);
        b.set_scissor(Some(Rectangle::new(0, 0, 4, 8)));
        draw_fullscreen_flat(&mut b, [1.0; 4]);

        let img = b.read_window();
        assert_eq!(img.pixel(3, 5), Some([255; 4]));
        assert_eq!(img.pixel(4, 5), Some([0; 4]));
    }

    #[test]
    fn viewport_maps_into_sub_rectangle() {
        let mut b = SoftwareBackend::new([8, 8]);
        b.set_viewport(Rectangle::new(4, 4, 4, 4));
        draw_fullscreen_flat(&mut b, [1.0; 4]);

        let img = b.read_window();
        assert_eq!(img.pixel(5, 5), Some([255; 4]));
        assert_eq!(img.pixel(2, 2), Some([0; 4]));
    }

    #[test]
    fn indexed_count_draws_prefix_only() {
        let mut b = SoftwareBackend::new([4, 4]);
        let shader = program(&mut b, 1, "FlatColor", "FlatColor", 0);
        let c = [1.0; 4];
        let vb = flat_buffer(&mut b, 2, &[flat(-1.0, -1.0, c), flat(-1.0, 1.0, c), flat(1.0, 1.0, c), flat(1.0, -1.0, c)]);
        let ib = ResourceId::from_raw(3);
        b.create_index_buffer(ib, &[0, 1, 2, 0, 2, 3]).unwrap();

        b.draw(&DrawCall {
            shader,
            primitive: Primitive::Triangles,
            vertex_buffer: vb,
            range: DrawRange::IndexedCount(ib, 3),
        })
        .unwrap();

        let img = b.read_window();
        // triangle (-1,-1) (-1,1) (1,1) covers the upper-left half
        assert_eq!(img.pixel(0, 2), Some([255; 4]));
        assert_eq!(img.pixel(1, 1), Some([255; 4]));
        assert_eq!(img.pixel(3, 3), Some([0; 4]));
        assert_eq!(img.pixel(2, 3), Some([0; 4]));
    }

    #[test]
    fn image_program_samples_texture_top_left_first() {
        let mut b = SoftwareBackend::new([2, 2]);
        let shader = program(&mut b, 1, "Image", "Image", 1);
        let tex = ResourceId::from_raw(2);
        #[rustfmt::skip]
        let data = [
            255, 0, 0, 255,   0, 255, 0, 255,
            0, 0, 255, 255,   255, 255, 255, 255,
        ];
        b.create_texture(tex, [2, 2], TextureFormat::Rgba8, Some(&data)).unwrap();
        b.bind_texture(shader, TextureSource::Texture(tex), 0, RenderingStage::FragmentShader).unwrap();

        let vb = ResourceId::from_raw(3);
        let bytes = bytemuck::cast_slice(&FULLSCREEN_QUAD);
        b.create_vertex_buffer(vb, bytes.len() as u64, &ImageVertex::layout(), Some(bytes)).unwrap();
        b.draw(&DrawCall { shader, primitive: Primitive::Triangles, vertex_buffer: vb, range: DrawRange::Vertices(6) })
            .unwrap();

        assert_eq!(b.read_window().data, data.to_vec());
    }

    // ── validation ────────────────────────────────────────────────────────

    #[test]
    fn sampling_the_render_target_is_rejected() {
        let mut b = SoftwareBackend::new([2, 2]);
        let shader = program(&mut b, 1, "Image", "Image", 1);
        let fb = ResourceId::from_raw(2);
        b.create_frame_buffer(fb, [2, 2]).unwrap();
        b.bind_texture(shader, TextureSource::FrameBuffer(fb), 0, RenderingStage::FragmentShader).unwrap();
        b.set_render_target_frame_buffer(fb).unwrap();

        let vb = ResourceId::from_raw(3);
        let bytes = bytemuck::cast_slice(&FULLSCREEN_QUAD);
        b.create_vertex_buffer(vb, bytes.len() as u64, &ImageVertex::layout(), Some(bytes)).unwrap();
        let err = b
            .draw(&DrawCall { shader, primitive: Primitive::Triangles, vertex_buffer: vb, range: DrawRange::Vertices(6) })
            .unwrap_err();
        assert!(matches!(err, RendererError::InvalidArgument(_)));
    }

    #[test]
    fn vertex_stage_textures_and_bad_slots_are_rejected() {
        let mut b = SoftwareBackend::new([2, 2]);
        let shader = program(&mut b, 1, "Image", "Image", 1);
        let tex = ResourceId::from_raw(2);
        b.create_texture(tex, [1, 1], TextureFormat::R8, Some(&[0])).unwrap();

        let src = TextureSource::Texture(tex);
        assert!(matches!(
            b.bind_texture(shader, src, 0, RenderingStage::VertexShader),
            Err(RendererError::Unsupported { .. })
        ));
        assert!(b.bind_texture(shader, src, 1, RenderingStage::FragmentShader).is_err());
        assert!(matches!(
            b.bind_texture(ResourceId::from_raw(99), src, 0, RenderingStage::FragmentShader),
            Err(RendererError::UnknownResource { .. })
        ));
    }

    #[test]
    fn vertex_updates_past_the_end_are_rejected() {
        let mut b = SoftwareBackend::new([2, 2]);
        let vb = flat_buffer(&mut b, 1, &[flat(0.0, 0.0, [1.0; 4]); 2]);
        let size = 2 * size_of::<FlatVertex>() as u64;

        assert!(b.update_vertex_buffer(vb, size - 4, &[0; 4]).is_ok());
        assert!(b.update_vertex_buffer(vb, size - 3, &[0; 4]).is_err());
        assert!(b.update_vertex_buffer(vb, u64::MAX, &[0; 4]).is_err());
        assert!(b.update_vertex_buffer(vb, u64::MAX - 1, &[]).is_err());
    }

    #[test]
    fn out_of_range_draws_fail_instead_of_reading_garbage() {
        let mut b = SoftwareBackend::new([2, 2]);
        let shader = program(&mut b, 1, "FlatColor", "FlatColor", 0);
        let vb = flat_buffer(&mut b, 2, &[flat(0.0, 0.0, [1.0; 4]); 3]);
        let err = b
            .draw(&DrawCall { shader, primitive: Primitive::Triangles, vertex_buffer: vb, range: DrawRange::Vertices(6) })
            .unwrap_err();
        assert!(matches!(err, RendererError::InvalidArgument(_)));
    }

    #[test]
    fn destroyed_target_falls_back_to_window() {
        let mut b = SoftwareBackend::new([2, 2]);
        let fb = ResourceId::from_raw(1);
        b.create_frame_buffer(fb, [2, 2]).unwrap();
        b.set_render_target_frame_buffer(fb).unwrap();
        b.destroy(fb);
        assert_eq!(b.render_target(), RenderTarget::Window);
        assert!(b.read_frame_buffer(fb).is_err());
    }

    // ── swapchain ─────────────────────────────────────────────────────────

    #[test]
    fn suspended_swapchain_presents_nothing() {
        let mut b = SoftwareBackend::new([2, 2]);
        b.present().unwrap();
        b.set_swapchain_suspended(true);
        b.present().unwrap();
        b.set_swapchain_suspended(false);
        b.present().unwrap();
        assert_eq!(b.presented_frames(), 2);
    }

    #[test]
    fn device_memory_counts_every_allocation() {
        let mut b = SoftwareBackend::new([2, 2]);
        let window = b.device_memory().unwrap().allocated;
        assert_eq!(window, 16);

        b.create_vertex_buffer(ResourceId::from_raw(1), 24, &FlatVertex::layout(), None).unwrap();
        b.create_index_buffer(ResourceId::from_raw(2), &[0, 1, 2]).unwrap();
        b.create_frame_buffer(ResourceId::from_raw(3), [4, 4]).unwrap();
        let memory = b.device_memory().unwrap();
        assert_eq!(memory.allocated, window + 24 + 12 + 64);
        assert_eq!(memory.reserved, memory.allocated);

        b.destroy(ResourceId::from_raw(3));
        assert_eq!(b.device_memory().unwrap().allocated, window + 24 + 12);
    }

    // ── overlay ───────────────────────────────────────────────────────────

    #[test]
    fn overlay_draws_only_inside_frame_bracket() {
        let mut b = SoftwareBackend::new([4, 4]);
        b.overlay_init().unwrap();
        let mut data = OverlayDrawData { display_size: [4.0, 4.0], ..Default::default() };
        data.push_rect(Rectangle::new(0, 0, 2, 2), [1.0; 4]);

        b.draw_overlay(&data).unwrap();
        assert_eq!(b.read_window().pixel(0, 0), Some([0; 4]));

        b.overlay_new_frame();
        b.draw_overlay(&data).unwrap();
        b.overlay_end_frame();

        let img = b.read_window();
        assert_eq!(img.pixel(1, 1), Some([255; 4]));
        assert_eq!(img.pixel(2, 2), Some([0; 4]));
    }

    #[test]
    fn overlay_scales_display_to_window() {
        let mut b = SoftwareBackend::new([8, 8]);
        b.overlay_init().unwrap();
        let mut data = OverlayDrawData { display_size: [4.0, 4.0], ..Default::default() };
        data.push_rect(Rectangle::new(2, 2, 2, 2), [1.0, 0.0, 0.0, 1.0]);

        b.overlay_new_frame();
        b.draw_overlay(&data).unwrap();
        b.overlay_end_frame();

        let img = b.read_window();
        assert_eq!(img.pixel(7, 7), Some([255, 0, 0, 255]));
        assert_eq!(img.pixel(3, 3), Some([0; 4]));
    }
}
