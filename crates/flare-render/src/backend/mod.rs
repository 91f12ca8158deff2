//! Backend implementations and startup selection.
//!
//! The backend is chosen once, when the renderer starts. Window-bound device
//! acquisition happens on the calling thread; the backend object itself is built
//! on the renderer thread and never leaves it.

pub mod software;
pub mod wgpu;

use std::sync::Arc;

use winit::window::Window;

use crate::api::{BackendKind, RendererApi};
use crate::error::{RendererError, Result};

pub use self::software::SoftwareBackend;
pub use self::wgpu::{Gpu, GpuInit, WgpuBackend};

/// Backend plus its startup parameters.
#[derive(Clone)]
pub enum BackendSelect {
    /// Headless rasterizer with a window surface of `size` pixels.
    Software { size: [u32; 2] },
    /// wgpu bound to `window`.
    Wgpu { window: Arc<Window>, gpu: GpuInit },
}

impl BackendSelect {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Software { .. } => BackendKind::Software,
            Self::Wgpu { .. } => BackendKind::Wgpu,
        }
    }
}

impl std::fmt::Debug for BackendSelect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software { size } => f.debug_struct("Software").field("size", size).finish(),
            Self::Wgpu { window, gpu } => f
                .debug_struct("Wgpu")
                .field("window", &window.id())
                .field("gpu", gpu)
                .finish(),
        }
    }
}

/// Backend whose platform objects exist, ready to move to the renderer thread.
pub(crate) enum PreparedBackend {
    Software([u32; 2]),
    Wgpu(Box<Gpu>),
}

impl PreparedBackend {
    /// Acquires the device and surface. Runs on the calling thread, since some
    /// platforms require surface creation on the thread owning the window.
    pub fn prepare(select: BackendSelect) -> Result<Self> {
        match select {
            BackendSelect::Software { size } => Ok(Self::Software(size)),
            BackendSelect::Wgpu { window, gpu } => {
                let gpu = pollster::block_on(Gpu::new(window, gpu))
                    .map_err(|e| RendererError::BackendInit(format!("{e:#}")))?;
                Ok(Self::Wgpu(Box::new(gpu)))
            }
        }
    }

    /// Builds the backend. Runs on the renderer thread.
    pub fn build(self) -> Box<dyn RendererApi> {
        match self {
            Self::Software(size) => Box::new(SoftwareBackend::new(size)),
            Self::Wgpu(gpu) => Box::new(WgpuBackend::new(*gpu)),
        }
    }
}
