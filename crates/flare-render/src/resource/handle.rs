use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::image::TextureFormat;
use super::layout::{LayoutElement, VertexLayout};

/// Backend-neutral resource identifier.
///
/// Ids are allocated on the renderer thread and never reused during a renderer's lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    #[inline]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    VertexBuffer,
    IndexBuffer,
    UniformBuffer,
    Texture,
    FrameBuffer,
    ShaderProgram,
}

/// Called with the resource id once the last handle clone is dropped.
///
/// The renderer routes this through its command queue so the GPU object is
/// destroyed on the renderer thread.
pub type Releaser = Arc<dyn Fn(ResourceId) + Send + Sync>;

pub(crate) struct ResourceInner<I> {
    id: ResourceId,
    kind: ResourceKind,
    info: I,
    bytes: AtomicU64,
    releaser: Releaser,
}

impl<I> Drop for ResourceInner<I> {
    fn drop(&mut self) {
        (self.releaser)(self.id);
    }
}

/// Observation interface used by the memory registry.
pub(crate) trait Tracked: Send + Sync {
    fn kind(&self) -> ResourceKind;
    fn gpu_bytes(&self) -> u64;
}

impl<I: Send + Sync> Tracked for ResourceInner<I> {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn gpu_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Shared-ownership GPU resource handle.
///
/// Cloning is cheap. Equality is identity (same underlying GPU object).
pub struct Handle<I> {
    pub(crate) inner: Arc<ResourceInner<I>>,
}

impl<I> Handle<I> {
    pub(crate) fn new(
        id: ResourceId,
        kind: ResourceKind,
        info: I,
        bytes: u64,
        releaser: Releaser,
    ) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                id,
                kind,
                info,
                bytes: AtomicU64::new(bytes),
                releaser,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.inner.kind
    }

    #[inline]
    pub fn info(&self) -> &I {
        &self.inner.info
    }

    /// Current GPU memory footprint in bytes.
    #[inline]
    pub fn gpu_bytes(&self) -> u64 {
        self.inner.bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn set_gpu_bytes(&self, bytes: u64) {
        self.inner.bytes.store(bytes, Ordering::Relaxed);
    }
}

impl<I> Clone for Handle<I> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<I> PartialEq for Handle<I> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<I> Eq for Handle<I> {}

impl<I> fmt::Debug for Handle<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.inner.kind)
            .field("id", &self.inner.id.0)
            .finish()
    }
}

// ── per-kind creation info ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VertexBufferInfo {
    pub size: u64,
    pub layout: VertexLayout,
    pub dynamic: bool,
}

#[derive(Debug, Clone)]
pub struct IndexBufferInfo {
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct UniformBufferInfo {
    pub name: String,
    pub slot: u32,
    pub layout: Vec<LayoutElement>,
    pub size: u64,
}

/// Texture metadata. Size and format change when a new image is uploaded.
#[derive(Debug)]
pub struct TextureInfo {
    state: Mutex<([u32; 2], TextureFormat)>,
}

impl TextureInfo {
    pub(crate) fn new(size: [u32; 2], format: TextureFormat) -> Self {
        Self { state: Mutex::new((size, format)) }
    }

    pub fn size(&self) -> [u32; 2] {
        self.state.lock().0
    }

    pub fn format(&self) -> TextureFormat {
        self.state.lock().1
    }

    pub(crate) fn set(&self, size: [u32; 2], format: TextureFormat) {
        *self.state.lock() = (size, format);
    }
}

/// Frame buffer metadata. Size changes on resize.
#[derive(Debug)]
pub struct FrameBufferInfo {
    size: Mutex<[u32; 2]>,
}

impl FrameBufferInfo {
    pub(crate) fn new(size: [u32; 2]) -> Self {
        Self { size: Mutex::new(size) }
    }

    pub fn size(&self) -> [u32; 2] {
        *self.size.lock()
    }

    pub(crate) fn set_size(&self, size: [u32; 2]) {
        *self.size.lock() = size;
    }
}

/// Where a program's WGSL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderStages {
    /// One file per stage. Includes resolve against the file's directory.
    Files { vertex: PathBuf, fragment: PathBuf },
    /// In-memory sources. Includes resolve against the renderer's shader directory.
    Raw { vertex: String, fragment: String },
}

/// Shader program description: stage sources plus the declared binding interface.
///
/// Uniform slot 0 is the per-frame buffer and is always bound by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgramDesc {
    pub name: String,
    pub stages: ShaderStages,
    pub uniform_slots: Vec<u32>,
    pub texture_slots: u32,
}

impl ShaderProgramDesc {
    pub fn from_files(
        name: impl Into<String>,
        vertex: impl Into<PathBuf>,
        fragment: impl Into<PathBuf>,
        uniform_slots: Vec<u32>,
        texture_slots: u32,
    ) -> Self {
        Self {
            name: name.into(),
            stages: ShaderStages::Files { vertex: vertex.into(), fragment: fragment.into() },
            uniform_slots,
            texture_slots,
        }
    }

    pub fn from_source(
        name: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
        uniform_slots: Vec<u32>,
        texture_slots: u32,
    ) -> Self {
        Self {
            name: name.into(),
            stages: ShaderStages::Raw { vertex: vertex.into(), fragment: fragment.into() },
            uniform_slots,
            texture_slots,
        }
    }
}

pub type VertexBuffer = Handle<VertexBufferInfo>;
pub type IndexBuffer = Handle<IndexBufferInfo>;
pub type UniformBuffer = Handle<UniformBufferInfo>;
pub type Texture = Handle<TextureInfo>;
pub type FrameBuffer = Handle<FrameBufferInfo>;
pub type ShaderProgram = Handle<ShaderProgramDesc>;

/// Anything that can be sampled by a shader.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureSource {
    Texture(ResourceId),
    /// Color attachment of a frame buffer.
    FrameBuffer(ResourceId),
}

impl From<&Texture> for TextureSource {
    fn from(texture: &Texture) -> Self {
        Self::Texture(texture.id())
    }
}

impl From<&FrameBuffer> for TextureSource {
    fn from(frame_buffer: &FrameBuffer) -> Self {
        Self::FrameBuffer(frame_buffer.id())
    }
}
