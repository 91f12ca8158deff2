use std::path::PathBuf;
use std::time::Duration;

use crate::backend::BackendSelect;

/// Renderer startup configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub backend: BackendSelect,

    /// Directory holding the manifest's `*.vert.wgsl` / `*.frag.wgsl` files.
    pub shader_dir: PathBuf,

    /// `present` spins until this much time has passed since the previous present.
    pub max_frame_period: Duration,
}

impl RendererConfig {
    pub fn new(backend: BackendSelect) -> Self {
        Self {
            backend,
            shader_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders")),
            max_frame_period: Duration::from_secs_f64(1.0 / 60.0),
        }
    }

    /// Headless configuration with a window surface of `size` pixels.
    pub fn software(size: [u32; 2]) -> Self {
        Self::new(BackendSelect::Software { size })
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::software([1280, 720])
    }
}
