use std::path::PathBuf;

use crate::resource::ResourceId;
use crate::scene::LightKind;

/// Errors reported by the renderer.
///
/// Driver and environment failures (missing files, shader compilation, device loss)
/// are surfaced as values so the host application can decide to retry or exit.
#[derive(thiserror::Error, Debug)]
pub enum RendererError {
    #[error("failed to spawn renderer thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("renderer thread is not running")]
    Disconnected,

    #[error("command dropped because the window is minimized")]
    Minimized,

    #[error("backend initialization failed: {0}")]
    BackendInit(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("failed to read shader `{path}`: {source}")]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader `{shader}` includes `{include}`, which could not be read")]
    ShaderInclude { shader: PathBuf, include: PathBuf },

    #[error("shader `{0}` exceeds the include expansion limit (cyclic include?)")]
    ShaderIncludeDepth(PathBuf),

    #[error("shader program `{name}` failed to compile: {message}")]
    ShaderCompile { name: String, message: String },

    #[error("shader program `{0}` is not supported by this backend")]
    UnsupportedShader(String),

    #[error("unknown {kind} {id:?}")]
    UnknownResource { kind: &'static str, id: ResourceId },

    #[error("{kind} light capacity of {capacity} exceeded")]
    LightCapacity { kind: LightKind, capacity: usize },

    #[error("begin_scene called while a scene is already active")]
    SceneAlreadyActive,

    #[error("no active scene")]
    NoActiveScene,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{what} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        what: &'static str,
    },
}

impl RendererError {
    pub(crate) fn unknown(kind: &'static str, id: ResourceId) -> Self {
        Self::UnknownResource { kind, id }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

pub type Result<T, E = RendererError> = std::result::Result<T, E>;
