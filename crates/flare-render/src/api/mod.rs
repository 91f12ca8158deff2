//! Backend interface.
//!
//! `RendererApi` is implemented once per backend and lives exclusively on the
//! renderer thread. Methods assume exclusive access to the graphics context and
//! do no locking. Dispatch happens per draw call, never per vertex.

mod overlay;

use std::fmt;

use crate::coords::Rectangle;
use crate::error::Result;
use crate::resource::{Image, ResourceId, TextureFormat, TextureSource, VertexLayout};
use crate::shader::ShaderSources;

pub use overlay::{OverlayCommand, OverlayDrawData, OverlayVertex};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Primitive {
    Triangles,
    TriangleFan,
    Lines,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RenderingBlendMode {
    /// `src * src_alpha + dst`
    Additive,
    /// `src + dst * (1 - src)`
    Screen,
    /// `src * src_alpha + dst * (1 - src_alpha)`
    Overlay,
    /// Keep whatever mode is current.
    NotSpecified,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RenderingStage {
    VertexShader,
    FragmentShader,
}

/// Closed set of backends, chosen once at startup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Headless CPU reference rasterizer.
    Software,
    /// wgpu on a window surface.
    Wgpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Software => "Software",
            Self::Wgpu => "wgpu",
        })
    }
}

/// Description of the running backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub kind: BackendKind,
    /// Device or adapter name.
    pub device: String,
    /// Underlying graphics API (e.g. "Vulkan", "Metal", "CPU").
    pub api: String,
}

/// Memory held by the device, as its allocator reports it.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeviceMemory {
    /// Bytes in live allocations.
    pub allocated: u64,
    /// Bytes obtained from the driver, free space inside blocks included.
    pub reserved: u64,
}

/// Vertex source of a draw call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrawRange {
    /// First `n` vertices of the vertex buffer.
    Vertices(u32),
    /// Every index of the index buffer.
    Indexed(ResourceId),
    /// First `n` indices of the index buffer.
    IndexedCount(ResourceId, u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DrawCall {
    pub shader: ResourceId,
    pub primitive: Primitive,
    pub vertex_buffer: ResourceId,
    pub range: DrawRange,
}

/// Which surface draw calls currently land on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    Window,
    FrameBuffer(ResourceId),
}

/// Backend contract. Called only from the renderer thread.
pub trait RendererApi {
    fn info(&self) -> BackendInfo;

    // ── resources ─────────────────────────────────────────────────────────

    fn create_vertex_buffer(
        &mut self,
        id: ResourceId,
        size: u64,
        layout: &VertexLayout,
        data: Option<&[u8]>,
    ) -> Result<()>;

    /// Partial upload starting at byte `offset`.
    fn update_vertex_buffer(&mut self, id: ResourceId, offset: u64, data: &[u8]) -> Result<()>;

    fn create_index_buffer(&mut self, id: ResourceId, indices: &[u32]) -> Result<()>;

    fn create_uniform_buffer(&mut self, id: ResourceId, size: u64, data: Option<&[u8]>) -> Result<()>;

    fn update_uniform_buffer(&mut self, id: ResourceId, data: &[u8]) -> Result<()>;

    /// `data` is RGBA8 or R8 (RGB input is expanded before reaching the backend).
    fn create_texture(
        &mut self,
        id: ResourceId,
        size: [u32; 2],
        format: TextureFormat,
        data: Option<&[u8]>,
    ) -> Result<()>;

    fn set_texture_image(
        &mut self,
        id: ResourceId,
        size: [u32; 2],
        format: TextureFormat,
        data: &[u8],
    ) -> Result<()>;

    fn create_frame_buffer(&mut self, id: ResourceId, size: [u32; 2]) -> Result<()>;

    /// Resizes the color attachment. Previous contents are discarded.
    fn resize_frame_buffer(&mut self, id: ResourceId, size: [u32; 2]) -> Result<()>;

    /// Reads the color attachment back as RGBA8.
    fn read_frame_buffer(&mut self, id: ResourceId) -> Result<Image>;

    fn create_shader_program(&mut self, id: ResourceId, sources: &ShaderSources) -> Result<()>;

    fn bind_uniform_buffer(
        &mut self,
        shader: ResourceId,
        buffer: ResourceId,
        slot: u32,
        stage: RenderingStage,
    ) -> Result<()>;

    fn bind_texture(
        &mut self,
        shader: ResourceId,
        source: TextureSource,
        slot: u32,
        stage: RenderingStage,
    ) -> Result<()>;

    /// Frees the backend object. Unknown ids are ignored.
    fn destroy(&mut self, id: ResourceId);

    // ── drawing ───────────────────────────────────────────────────────────

    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    /// Clears the current render target to transparent black.
    fn clear_screen(&mut self) -> Result<()>;

    /// Also reports device errors raised since the previous present.
    fn present(&mut self) -> Result<()>;

    /// Takes effect at the next window draw.
    fn recreate_swapchain(&mut self, size: [u32; 2]) -> Result<()>;

    /// A suspended swapchain holds no frame and skips window draws until resumed.
    fn set_swapchain_suspended(&mut self, suspended: bool);

    fn device_memory(&self) -> Option<DeviceMemory>;

    // ── state ─────────────────────────────────────────────────────────────

    fn set_viewport(&mut self, viewport: Rectangle);
    fn viewport(&self) -> Rectangle;

    /// `None` disables scissoring.
    fn set_scissor(&mut self, scissor: Option<Rectangle>);
    fn scissor(&self) -> Option<Rectangle>;

    /// `NotSpecified` keeps the current mode.
    fn set_blend_mode(&mut self, mode: RenderingBlendMode);
    fn blend_mode(&self) -> RenderingBlendMode;

    fn set_render_target_window(&mut self);
    fn set_render_target_frame_buffer(&mut self, id: ResourceId) -> Result<()>;
    fn render_target(&self) -> RenderTarget;

    /// Size in pixels of the window surface.
    fn window_size(&self) -> [u32; 2];

    // ── overlay hooks ─────────────────────────────────────────────────────

    fn overlay_init(&mut self) -> Result<()>;
    fn overlay_new_frame(&mut self);
    fn overlay_end_frame(&mut self);
    fn draw_overlay(&mut self, data: &OverlayDrawData) -> Result<()>;
}
