//! Flare renderer crate.
//!
//! Rendering core of the particle editor: a backend-neutral `RendererApi`, a
//! dedicated renderer thread fed by a command queue, quad batching, per-frame
//! lights and a two-pass blur.

pub mod api;
pub mod backend;
pub mod batch;
pub mod blur;
pub mod coords;
pub mod frame;
pub mod material;
pub mod resource;
pub mod scene;
pub mod shader;
pub mod time;

pub mod logging;
pub mod queue;

mod config;
mod error;
mod renderer;

pub use config::RendererConfig;
pub use error::{RendererError, Result};
pub use renderer::Renderer;
