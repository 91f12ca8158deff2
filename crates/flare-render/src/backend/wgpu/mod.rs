//! wgpu backend.
//!
//! Every backend object is a plain wgpu resource keyed by [`ResourceId`]. Each
//! draw records its own render pass and is submitted immediately, so state changes
//! between draws need no pass bookkeeping. The window surface texture is acquired
//! lazily on the first draw that targets it and presented by `present`.

mod gpu;
mod overlay;
mod pipeline;

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::api::{
    BackendInfo, BackendKind, DeviceMemory, DrawCall, DrawRange, OverlayDrawData, Primitive, RenderTarget,
    RendererApi, RenderingBlendMode, RenderingStage,
};
use crate::coords::Rectangle;
use crate::error::{RendererError, Result};
use crate::resource::{
    align_up, check_data_len, expand_rgb, vertex_stride, Image, ResourceId, TextureFormat,
    TextureSource, VertexLayout,
};
use crate::shader::ShaderSources;

pub use gpu::{Gpu, GpuInit};

use gpu::GpuFrame;
use overlay::{OverlayRenderer, OverlayTarget};
use pipeline::{PipelineCache, PipelineKey, PipelineSource};

const BACKEND: &str = "wgpu";

/// Color format of every frame buffer.
pub const FRAME_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const UNIFORM_ALIGN: u64 = 16;
const READBACK_ROW_ALIGN: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

struct VertexData {
    buffer: wgpu::Buffer,
    size: u64,
    layout: VertexLayout,
}

struct IndexData {
    buffer: wgpu::Buffer,
    /// CPU copy for bounds checks and fan expansion.
    indices: Vec<u32>,
}

struct UniformData {
    buffer: wgpu::Buffer,
    size: u64,
}

struct TextureData {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Logical size. The allocation is at least 1x1.
    size: [u32; 2],
}

struct Program {
    name: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_slots: Vec<u32>,
    uniforms: HashMap<u32, ResourceId>,
    textures: Vec<Option<TextureSource>>,
}

#[derive(Default)]
struct OverlayState {
    initialized: bool,
    in_frame: bool,
    renderer: OverlayRenderer,
}

/// Vertex source resolved for one draw.
enum DrawSource<'a> {
    Vertices(u32),
    Indexed(&'a wgpu::Buffer, u32),
    Expanded(wgpu::Buffer, u32),
}

pub struct WgpuBackend {
    gpu: Gpu,
    frame: Option<GpuFrame>,

    vertex_buffers: HashMap<ResourceId, VertexData>,
    index_buffers: HashMap<ResourceId, IndexData>,
    uniform_buffers: HashMap<ResourceId, UniformData>,
    textures: HashMap<ResourceId, TextureData>,
    frame_buffers: HashMap<ResourceId, TextureData>,
    programs: HashMap<ResourceId, Program>,
    pipelines: PipelineCache,

    sampler: wgpu::Sampler,
    white: TextureData,

    viewport: Rectangle,
    scissor: Option<Rectangle>,
    blend: RenderingBlendMode,
    target: RenderTarget,
    overlay: OverlayState,
}

impl WgpuBackend {
    pub fn new(gpu: Gpu) -> Self {
        let (name, api) = gpu.adapter_summary();
        log::info!("wgpu backend: {name} ({api}), surface {:?}", gpu.format());

        let sampler = gpu.device().create_sampler(&wgpu::SamplerDescriptor {
            label: Some("flare sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let white = create_texture_data(
            gpu.device(),
            "flare white texture",
            [1, 1],
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        write_texture(gpu.queue(), &white.texture, [1, 1], 4, &[255; 4]);

        let size = gpu.size();
        Self {
            gpu,
            frame: None,
            vertex_buffers: HashMap::new(),
            index_buffers: HashMap::new(),
            uniform_buffers: HashMap::new(),
            textures: HashMap::new(),
            frame_buffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: PipelineCache::default(),
            sampler,
            white,
            viewport: Rectangle::full(size),
            scissor: None,
            blend: RenderingBlendMode::Overlay,
            target: RenderTarget::Window,
            overlay: OverlayState::default(),
        }
    }

    fn device(&self) -> &wgpu::Device {
        self.gpu.device()
    }

    fn queue(&self) -> &wgpu::Queue {
        self.gpu.queue()
    }

    /// Acquires the window frame if none is held. `Ok(false)` skips the frame.
    fn ensure_window_frame(&mut self) -> Result<bool> {
        if self.frame.is_none() {
            self.frame = self.gpu.acquire()?;
        }
        Ok(self.frame.is_some())
    }

    fn target_view(&self) -> Option<(&wgpu::TextureView, wgpu::TextureFormat, [u32; 2])> {
        match self.target {
            RenderTarget::Window => self
                .frame
                .as_ref()
                .map(|f| (&f.view, self.gpu.format(), self.gpu.size())),
            RenderTarget::FrameBuffer(id) => self
                .frame_buffers
                .get(&id)
                .map(|fb| (&fb.view, FRAME_BUFFER_FORMAT, fb.size)),
        }
    }

    /// Acquires the window frame when it is the current target.
    fn prepare_target(&mut self) -> Result<bool> {
        match self.target {
            RenderTarget::Window => self.ensure_window_frame(),
            RenderTarget::FrameBuffer(id) if self.frame_buffers.contains_key(&id) => Ok(true),
            RenderTarget::FrameBuffer(id) => Err(RendererError::unknown("frame buffer", id)),
        }
    }

    fn resolve_view(&self, source: TextureSource) -> Option<&wgpu::TextureView> {
        match source {
            TextureSource::Texture(id) => self.textures.get(&id).map(|t| &t.view),
            TextureSource::FrameBuffer(id) => self.frame_buffers.get(&id).map(|t| &t.view),
        }
    }

    fn uniform_bind_group(&self, program: &Program) -> Result<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(program.uniform_slots.len());
        for &slot in &program.uniform_slots {
            let buffer = program
                .uniforms
                .get(&slot)
                .and_then(|id| self.uniform_buffers.get(id))
                .ok_or_else(|| {
                    RendererError::invalid(format!(
                        "program `{}` has no uniform buffer bound at slot {slot}",
                        program.name
                    ))
                })?;
            entries.push(wgpu::BindGroupEntry {
                binding: slot,
                resource: buffer.buffer.as_entire_binding(),
            });
        }
        Ok(self.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("flare uniform bind group"),
            layout: &program.uniform_layout,
            entries: &entries,
        }))
    }

    fn texture_bind_group(&self, program: &Program) -> Option<wgpu::BindGroup> {
        let layout = program.texture_layout.as_ref()?;
        let views: Vec<&wgpu::TextureView> = program
            .textures
            .iter()
            .map(|s| s.and_then(|s| self.resolve_view(s)).unwrap_or(&self.white.view))
            .collect();

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        }];
        entries.extend(views.iter().enumerate().map(|(slot, view)| wgpu::BindGroupEntry {
            binding: 1 + slot as u32,
            resource: wgpu::BindingResource::TextureView(view),
        }));

        Some(self.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("flare texture bind group"),
            layout,
            entries: &entries,
        }))
    }

    /// Validates the call's range and expands fans into a transient index buffer.
    fn draw_source(&self, call: &DrawCall, vertex_count: u64) -> Result<DrawSource<'_>> {
        let (ib, count) = match call.range {
            DrawRange::Vertices(n) => {
                if n as u64 > vertex_count {
                    return Err(RendererError::invalid(format!(
                        "draw of {n} vertices from a buffer holding {vertex_count}"
                    )));
                }
                if call.primitive == Primitive::TriangleFan {
                    let indices: Vec<u32> = (0..n).collect();
                    return Ok(self.expanded(&indices));
                }
                return Ok(DrawSource::Vertices(n));
            }
            DrawRange::Indexed(ib) => (ib, None),
            DrawRange::IndexedCount(ib, n) => (ib, Some(n)),
        };

        let data = self
            .index_buffers
            .get(&ib)
            .ok_or(RendererError::unknown("index buffer", ib))?;
        let count = count.unwrap_or(data.indices.len() as u32);
        let Some(indices) = data.indices.get(..count as usize) else {
            return Err(RendererError::invalid(format!(
                "draw of {count} indices from a buffer holding {}",
                data.indices.len()
            )));
        };
        if let Some(bad) = indices.iter().find(|&&i| i as u64 >= vertex_count) {
            return Err(RendererError::invalid(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }

        if call.primitive == Primitive::TriangleFan {
            return Ok(self.expanded(indices));
        }
        Ok(DrawSource::Indexed(&data.buffer, count))
    }

    fn expanded(&self, indices: &[u32]) -> DrawSource<'static> {
        let list = expand_fan(indices);
        let count = list.len() as u32;
        let buffer = self.device().create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("flare fan ibo"),
            contents: bytemuck::cast_slice(if list.is_empty() { &[0u32] } else { &list }),
            usage: wgpu::BufferUsages::INDEX,
        });
        DrawSource::Expanded(buffer, count)
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue().submit(std::iter::once(encoder.finish()));
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

/// Fan `[a, b, c, d]` → list `[a, b, c, a, c, d]`.
fn expand_fan(indices: &[u32]) -> Vec<u32> {
    let mut list = Vec::with_capacity(indices.len().saturating_sub(2) * 3);
    for i in 1..indices.len().saturating_sub(1) {
        list.extend_from_slice(&[indices[0], indices[i], indices[i + 1]]);
    }
    list
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rgba8 | TextureFormat::Rgb8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn extent(size: [u32; 2]) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size[0].max(1),
        height: size[1].max(1),
        depth_or_array_layers: 1,
    }
}

fn create_texture_data(
    device: &wgpu::Device,
    label: &str,
    size: [u32; 2],
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> TextureData {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    TextureData { texture, view, size }
}

fn write_texture(queue: &wgpu::Queue, texture: &wgpu::Texture, size: [u32; 2], bpp: u32, data: &[u8]) {
    if size[0] == 0 || size[1] == 0 {
        return;
    }
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(size[0] * bpp),
            rows_per_image: Some(size[1]),
        },
        extent(size),
    );
}

fn frame_buffer_usage() -> wgpu::TextureUsages {
    wgpu::TextureUsages::RENDER_ATTACHMENT
        | wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_SRC
}

/// Pads `data` with zeros to the 4-byte copy granularity.
fn padded(data: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    let len = align_up(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize;
    if len == data.len() {
        return data.into();
    }
    let mut out = data.to_vec();
    out.resize(len, 0);
    out.into()
}

/// Blocks until `module` has been validated and collects its error messages.
fn compile_errors(module: &wgpu::ShaderModule) -> Option<String> {
    let info = pollster::block_on(module.get_compilation_info());
    let errors: Vec<String> = info
        .messages
        .iter()
        .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
        .map(|m| match &m.location {
            Some(loc) => format!("{}:{}: {}", loc.line_number, loc.line_position, m.message),
            None => m.message.clone(),
        })
        .collect();
    (!errors.is_empty()).then(|| errors.join("; "))
}

fn uniform_layout_entries(slots: &[u32]) -> Vec<wgpu::BindGroupLayoutEntry> {
    slots
        .iter()
        .map(|&slot| wgpu::BindGroupLayoutEntry {
            binding: slot,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect()
}

fn texture_layout_entries(texture_slots: u32) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }];
    entries.extend((0..texture_slots).map(|slot| wgpu::BindGroupLayoutEntry {
        binding: 1 + slot,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }));
    entries
}

impl RendererApi for WgpuBackend {
    fn info(&self) -> BackendInfo {
        let (device, api) = self.gpu.adapter_summary();
        BackendInfo { kind: BackendKind::Wgpu, device, api }
    }

    // ── resources ─────────────────────────────────────────────────────────

    fn create_vertex_buffer(
        &mut self,
        id: ResourceId,
        size: u64,
        layout: &VertexLayout,
        data: Option<&[u8]>,
    ) -> Result<()> {
        if data.is_some_and(|d| d.len() as u64 > size) {
            return Err(RendererError::invalid("vertex data larger than buffer"));
        }
        let buffer = self.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("flare vertex buffer"),
            size: align_up(size.max(1), wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(data) = data.filter(|d| !d.is_empty()) {
            self.queue().write_buffer(&buffer, 0, &padded(data));
        }
        self.vertex_buffers.insert(
            id,
            VertexData { buffer, size, layout: layout.clone() },
        );
        Ok(())
    }

    fn update_vertex_buffer(&mut self, id: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let vb = self
            .vertex_buffers
            .get(&id)
            .ok_or(RendererError::unknown("vertex buffer", id))?;
        let end = offset.checked_add(data.len() as u64).filter(|&end| end <= vb.size);
        if end.is_none() {
            return Err(RendererError::invalid(format!(
                "vertex update of {} bytes at offset {offset} exceeds buffer size {}",
                data.len(),
                vb.size
            )));
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(RendererError::invalid(format!(
                "vertex update offset {offset} is not 4-byte aligned"
            )));
        }
        if !data.is_empty() {
            self.queue().write_buffer(&vb.buffer, offset, &padded(data));
        }
        Ok(())
    }

    fn create_index_buffer(&mut self, id: ResourceId, indices: &[u32]) -> Result<()> {
        let buffer = self.device().create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("flare index buffer"),
            contents: bytemuck::cast_slice(if indices.is_empty() { &[0u32] } else { indices }),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.index_buffers.insert(id, IndexData { buffer, indices: indices.to_vec() });
        Ok(())
    }

    fn create_uniform_buffer(&mut self, id: ResourceId, size: u64, data: Option<&[u8]>) -> Result<()> {
        let buffer = self.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("flare uniform buffer"),
            size: align_up(size.max(1), UNIFORM_ALIGN),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(data) = data.filter(|d| !d.is_empty()) {
            let n = data.len().min(size as usize);
            self.queue().write_buffer(&buffer, 0, &padded(&data[..n]));
        }
        self.uniform_buffers.insert(id, UniformData { buffer, size });
        Ok(())
    }

    fn update_uniform_buffer(&mut self, id: ResourceId, data: &[u8]) -> Result<()> {
        let ub = self
            .uniform_buffers
            .get(&id)
            .ok_or(RendererError::unknown("uniform buffer", id))?;
        if data.len() as u64 > ub.size {
            return Err(RendererError::invalid(format!(
                "uniform update of {} bytes exceeds buffer size {}",
                data.len(),
                ub.size
            )));
        }
        if !data.is_empty() {
            self.queue().write_buffer(&ub.buffer, 0, &padded(data));
        }
        Ok(())
    }

    fn create_texture(
        &mut self,
        id: ResourceId,
        size: [u32; 2],
        format: TextureFormat,
        data: Option<&[u8]>,
    ) -> Result<()> {
        if let Some(data) = data {
            check_data_len(size, format, data)?;
        }
        let texture = create_texture_data(
            self.device(),
            "flare texture",
            size,
            wgpu_format(format),
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        if let Some(data) = data {
            let (format, bytes) = expand_rgb(format, data);
            write_texture(self.queue(), &texture.texture, size, format.bytes_per_pixel(), &bytes);
        }
        self.textures.insert(id, texture);
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
        let current = self
            .textures
            .get(&id)
            .ok_or(RendererError::unknown("texture", id))?;

        let format_changed = current.texture.format() != wgpu_format(format);
        if current.size != size || format_changed {
            let texture = create_texture_data(
                self.device(),
                "flare texture",
                size,
                wgpu_format(format),
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            );
            self.textures.insert(id, texture);
        }

        let (format, bytes) = expand_rgb(format, data);
        if let Some(texture) = self.textures.get(&id) {
            write_texture(self.queue(), &texture.texture, size, format.bytes_per_pixel(), &bytes);
        }
        Ok(())
    }

    fn create_frame_buffer(&mut self, id: ResourceId, size: [u32; 2]) -> Result<()> {
        let fb = create_texture_data(
            self.device(),
            "flare frame buffer",
            size,
            FRAME_BUFFER_FORMAT,
            frame_buffer_usage(),
        );
        self.frame_buffers.insert(id, fb);
        Ok(())
    }

    fn resize_frame_buffer(&mut self, id: ResourceId, size: [u32; 2]) -> Result<()> {
        let fb = self
            .frame_buffers
            .get(&id)
            .ok_or(RendererError::unknown("frame buffer", id))?;
        if fb.size != size {
            let fb = create_texture_data(
                self.device(),
                "flare frame buffer",
                size,
                FRAME_BUFFER_FORMAT,
                frame_buffer_usage(),
            );
            self.frame_buffers.insert(id, fb);
        }
        Ok(())
    }

    fn read_frame_buffer(&mut self, id: ResourceId) -> Result<Image> {
        let fb = self
            .frame_buffers
            .get(&id)
            .ok_or(RendererError::unknown("frame buffer", id))?;
        let [width, height] = fb.size;
        if width == 0 || height == 0 {
            return Image::new(width, height, TextureFormat::Rgba8, Vec::new());
        }

        let row = width * 4;
        let padded_row = align_up(row as u64, READBACK_ROW_ALIGN as u64) as u32;
        let buffer = self.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("flare readback buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.encoder("flare readback encoder");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &fb.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            extent(fb.size),
        );
        self.submit(encoder);

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device()
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| RendererError::Device(e.to_string()))?;
        rx.recv()
            .map_err(|_| RendererError::Device("readback callback dropped".to_string()))?
            .map_err(|e| RendererError::Device(e.to_string()))?;

        let mut data = Vec::with_capacity((row * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for line in mapped.chunks_exact(padded_row as usize) {
                data.extend_from_slice(&line[..row as usize]);
            }
        }
        buffer.unmap();

        Image::new(width, height, TextureFormat::Rgba8, data)
    }

    fn create_shader_program(&mut self, id: ResourceId, sources: &ShaderSources) -> Result<()> {
        let device = self.gpu.device();
        let compile = |label: &str, source: &str| -> Result<wgpu::ShaderModule> {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            match compile_errors(&module) {
                Some(message) => Err(RendererError::ShaderCompile {
                    name: format!("{} ({label})", sources.name),
                    message,
                }),
                None => Ok(module),
            }
        };
        let vertex = compile("vertex", &sources.vertex)?;
        let fragment = compile("fragment", &sources.fragment)?;

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("flare uniform bgl"),
            entries: &uniform_layout_entries(&sources.uniform_slots),
        });
        let texture_layout = (sources.texture_slots > 0).then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("flare texture bgl"),
                entries: &texture_layout_entries(sources.texture_slots),
            })
        });

        let mut groups = vec![&uniform_layout];
        groups.extend(texture_layout.as_ref());
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("flare pipeline layout"),
            bind_group_layouts: &groups,
            immediate_size: 0,
        });

        log::debug!(
            "wgpu backend: program `{}` ({} uniform slots, {} texture slots)",
            sources.name,
            sources.uniform_slots.len(),
            sources.texture_slots
        );

        self.pipelines.evict_shader(id);
        self.programs.insert(
            id,
            Program {
                name: sources.name.clone(),
                vertex,
                fragment,
                uniform_layout,
                texture_layout,
                pipeline_layout,
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
        if self.resolve_view(source).is_none() {
            let (TextureSource::Texture(id) | TextureSource::FrameBuffer(id)) = source;
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
        if self.programs.remove(&id).is_some() {
            self.pipelines.evict_shader(id);
        }
        if self.target == RenderTarget::FrameBuffer(id) {
            self.target = RenderTarget::Window;
        }
    }

    // ── drawing ───────────────────────────────────────────────────────────

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        if !self.prepare_target()? {
            return Ok(());
        }

        let program = self
            .programs
            .get(&call.shader)
            .ok_or(RendererError::unknown("shader program", call.shader))?;
        let vb = self
            .vertex_buffers
            .get(&call.vertex_buffer)
            .ok_or(RendererError::unknown("vertex buffer", call.vertex_buffer))?;
        if let RenderTarget::FrameBuffer(target) = self.target {
            if program.textures.contains(&Some(TextureSource::FrameBuffer(target))) {
                return Err(RendererError::invalid(format!(
                    "program `{}` samples its own render target",
                    program.name
                )));
            }
        }

        let Some((_, format, size)) = self.target_view() else {
            return Ok(());
        };
        let key = PipelineKey {
            shader: call.shader,
            topology: pipeline::topology(call.primitive),
            blend: self.blend,
            format,
            layout: vb.layout.clone(),
        };
        self.pipelines.ensure(
            self.gpu.device(),
            &key,
            PipelineSource {
                name: &program.name,
                vertex: &program.vertex,
                fragment: &program.fragment,
                layout: &program.pipeline_layout,
            },
        )?;

        let stride = vertex_stride(&vb.layout);
        let vertex_count = if stride == 0 { 0 } else { vb.size / stride };
        let source = self.draw_source(call, vertex_count)?;
        let uniform_group = self.uniform_bind_group(program)?;
        let texture_group = self.texture_bind_group(program);

        let Some(viewport) = self.viewport.clamp_to(size) else {
            return Ok(());
        };
        let clip = match self.scissor {
            Some(s) => viewport.intersect(s),
            None => Some(viewport),
        };
        let (Some(clip), Some((view, _, _)), Some(pipeline)) =
            (clip, self.target_view(), self.pipelines.get(&key))
        else {
            return Ok(());
        };

        let mut encoder = self.encoder("flare draw encoder");
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("flare draw pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            rpass.set_pipeline(pipeline);
            rpass.set_viewport(
                viewport.x as f32,
                viewport.y as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );
            rpass.set_scissor_rect(clip.x as u32, clip.y as u32, clip.width, clip.height);
            rpass.set_bind_group(0, &uniform_group, &[]);
            if let Some(group) = &texture_group {
                rpass.set_bind_group(1, group, &[]);
            }
            rpass.set_vertex_buffer(0, vb.buffer.slice(..));

            match &source {
                DrawSource::Vertices(n) => rpass.draw(0..*n, 0..1),
                DrawSource::Indexed(buffer, n) => {
                    rpass.set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint32);
                    rpass.draw_indexed(0..*n, 0, 0..1);
                }
                DrawSource::Expanded(buffer, n) => {
                    rpass.set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint32);
                    rpass.draw_indexed(0..*n, 0, 0..1);
                }
            }
        }
        self.submit(encoder);
        Ok(())
    }

    fn clear_screen(&mut self) -> Result<()> {
        if !self.prepare_target()? {
            return Ok(());
        }
        let Some((view, _, _)) = self.target_view() else {
            return Ok(());
        };

        let mut encoder = self.encoder("flare clear encoder");
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("flare clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        self.submit(encoder);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        match self.frame.take() {
            Some(frame) => self.gpu.present(frame),
            None => log::trace!("present without a window frame; nothing drawn"),
        }
        self.gpu.take_error().map_or(Ok(()), Err)
    }

    fn recreate_swapchain(&mut self, size: [u32; 2]) -> Result<()> {
        // a held frame belongs to the old configuration
        self.frame = None;
        self.gpu.resize(size);
        Ok(())
    }

    fn set_swapchain_suspended(&mut self, suspended: bool) {
        if suspended {
            self.frame = None;
        }
        self.gpu.set_suspended(suspended);
    }

    fn device_memory(&self) -> Option<DeviceMemory> {
        self.gpu.memory()
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
        self.gpu.size()
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
        if data.is_empty() || !self.ensure_window_frame()? {
            return Ok(());
        }
        let Some(frame) = self.frame.as_ref() else {
            return Ok(());
        };

        let views: Vec<&wgpu::TextureView> = data
            .commands
            .iter()
            .map(|cmd| {
                cmd.texture
                    .and_then(|s| match s {
                        TextureSource::Texture(id) => self.textures.get(&id).map(|t| &t.view),
                        TextureSource::FrameBuffer(id) => self.frame_buffers.get(&id).map(|t| &t.view),
                    })
                    .unwrap_or(&self.white.view)
            })
            .collect();

        let device = self.gpu.device();
        let queue = self.gpu.queue();
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("flare overlay encoder") });
        self.overlay.renderer.render(
            device,
            queue,
            &mut encoder,
            OverlayTarget {
                view: &frame.view,
                format: self.gpu.format(),
                size: self.gpu.size(),
            },
            &self.sampler,
            data,
            &views,
        );
        queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_expands_to_triangle_list() {
        assert_eq!(expand_fan(&[0, 1, 2, 3]), vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(expand_fan(&[4, 5, 6]), vec![4, 5, 6]);
        assert!(expand_fan(&[0, 1]).is_empty());
    }

    #[test]
    fn uploads_pad_to_copy_alignment() {
        assert_eq!(padded(&[1, 2, 3, 4]).len(), 4);
        assert_eq!(&*padded(&[1, 2, 3, 4, 5]), &[1, 2, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    fn texture_layout_places_slots_after_sampler() {
        let entries = texture_layout_entries(3);
        let bindings: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3]);
        assert!(matches!(entries[0].ty, wgpu::BindingType::Sampler(_)));
    }

    #[test]
    fn uniform_layout_uses_slot_as_binding() {
        let entries = uniform_layout_entries(&[0, 1]);
        assert_eq!(entries[1].binding, 1);
        assert!(entries[0].visibility.contains(wgpu::ShaderStages::FRAGMENT));
    }

    #[test]
    fn formats_map_to_unorm() {
        assert_eq!(wgpu_format(TextureFormat::R8), wgpu::TextureFormat::R8Unorm);
        assert_eq!(extent([0, 5]).width, 1);
    }
}
