//! Pixel-space coordinate types.
//!
//! World-space math uses `glam`; this module only covers integer pixel regions
//! handed to backends (viewports, scissors, overlay clips).

mod rect;

pub use rect::Rectangle;
