//! GPU resource handles and layouts.
//!
//! Handles are backend-neutral: they carry an id plus creation metadata. Backend
//! objects live on the renderer thread, keyed by [`ResourceId`].

mod handle;
mod image;
mod layout;
mod registry;

pub use handle::{
    FrameBuffer, FrameBufferInfo, Handle, IndexBuffer, IndexBufferInfo, Releaser, ResourceId,
    ResourceKind, ShaderProgram, ShaderProgramDesc, ShaderStages, Texture, TextureInfo, TextureSource,
    UniformBuffer, UniformBufferInfo, VertexBuffer, VertexBufferInfo,
};
pub use image::{Image, TextureFormat};
pub use layout::{uniform_block_size, vertex_stride, LayoutElement, ShaderVariableType, VertexLayout};
pub use registry::GpuMemoryUsage;

pub(crate) use image::{check_data_len, expand_rgb};
pub(crate) use layout::align_up;
pub(crate) use registry::ResourceRegistry;
