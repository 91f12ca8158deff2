//! Frame pacing.

mod frame_pacer;

pub use frame_pacer::{FramePacer, FrameTime};
