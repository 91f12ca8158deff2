//! Parameter blocks and geometry for the grid and lit sprite programs.
//!
//! Both programs read their parameters from a uniform buffer bound at
//! [`MATERIAL_UNIFORM_SLOT`], next to the per-frame buffer.

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

use crate::batch::FlatVertex;
use crate::blur::ImageVertex;
use crate::resource::{LayoutElement, ShaderVariableType};

/// Uniform slot of the per-program parameter block.
pub const MATERIAL_UNIFORM_SLOT: u32 = 2;

// ── lit sprite ────────────────────────────────────────────────────────────

/// Lit sprite parameters. Offsets: tint 0, base light 16, then the constant,
/// linear and quadratic attenuation coefficients at 20, 24 and 28.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct LitSpriteUniforms {
    pub tint: [f32; 4],
    /// Light applied regardless of scene lights.
    pub base_light: f32,
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

const _: () = {
    assert!(offset_of!(LitSpriteUniforms, tint) == 0);
    assert!(offset_of!(LitSpriteUniforms, base_light) == 16);
    assert!(offset_of!(LitSpriteUniforms, constant) == 20);
    assert!(offset_of!(LitSpriteUniforms, linear) == 24);
    assert!(offset_of!(LitSpriteUniforms, quadratic) == 28);
    assert!(size_of::<LitSpriteUniforms>() == 32);
};

impl Default for LitSpriteUniforms {
    fn default() -> Self {
        Self {
            tint: [1.0; 4],
            base_light: 0.1,
            constant: 1.0,
            linear: 0.01,
            quadratic: 0.0001,
        }
    }
}

impl LitSpriteUniforms {
    pub fn layout() -> Vec<LayoutElement> {
        use ShaderVariableType as T;
        vec![
            LayoutElement::new("Tint", 0, T::Vec4),
            LayoutElement::new("BaseLight", 0, T::Float),
            LayoutElement::new("MaterialConstantCoefficient", 0, T::Float),
            LayoutElement::new("MaterialLinearCoefficient", 0, T::Float),
            LayoutElement::new("MaterialQuadraticCoefficient", 0, T::Float),
        ]
    }

    /// `1 / (c + l·d + q·d²)`, zero when the denominator is not positive.
    pub fn attenuation(&self, distance: f32) -> f32 {
        let denom = self.constant + self.linear * distance + self.quadratic * distance * distance;
        if denom > 0.0 { 1.0 / denom } else { 0.0 }
    }
}

/// Six world-space vertices of a sprite centered on `center`, `scale` wide.
/// UV origin is the top-left of the image.
pub fn sprite_quad(center: Vec2, scale: f32, rotation: f32) -> [ImageVertex; 6] {
    let rot = Vec2::from_angle(rotation);
    let h = scale * 0.5;
    let corner = |x: f32, y: f32, u: f32, v: f32| ImageVertex {
        position: (center + rot.rotate(Vec2::new(x * h, y * h))).to_array(),
        uv: [u, v],
    };
    let (tl, bl, br, tr) = (
        corner(-1.0, 1.0, 0.0, 0.0),
        corner(-1.0, -1.0, 0.0, 1.0),
        corner(1.0, -1.0, 1.0, 1.0),
        corner(1.0, 1.0, 1.0, 0.0),
    );
    [tl, bl, br, tl, br, tr]
}

// ── grid ──────────────────────────────────────────────────────────────────

/// Grid parameters. Offsets: center 0, fade distance 8.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct GridUniforms {
    /// Render-unit point where lines are fully opaque.
    pub center: [f32; 2],
    /// Distance from `center` at which lines fade out. Non-positive disables fading.
    pub fade_distance: f32,
    pub _pad: f32,
}

const _: () = {
    assert!(offset_of!(GridUniforms, center) == 0);
    assert!(offset_of!(GridUniforms, fade_distance) == 8);
    assert!(size_of::<GridUniforms>() == 16);
};

impl GridUniforms {
    pub fn new(center: Vec2, fade_distance: f32) -> Self {
        Self { center: center.to_array(), fade_distance, _pad: 0.0 }
    }

    pub fn layout() -> Vec<LayoutElement> {
        use ShaderVariableType as T;
        vec![
            LayoutElement::new("Center", 0, T::Vec2),
            LayoutElement::new("FadeDistance", 0, T::Float),
        ]
    }

    /// Alpha multiplier at `world`.
    pub fn fade(&self, world: Vec2) -> f32 {
        if self.fade_distance <= 0.0 {
            return 1.0;
        }
        (1.0 - world.distance(Vec2::from(self.center)) / self.fade_distance).clamp(0.0, 1.0)
    }
}

/// Line-list vertices of a square grid spanning `-extent..=extent` on both axes.
pub fn grid_lines(extent: f32, spacing: f32, color: Vec4) -> Vec<FlatVertex> {
    if spacing <= 0.0 || extent <= 0.0 {
        return Vec::new();
    }
    let steps = (extent / spacing).floor() as i32;
    let mut out = Vec::with_capacity((steps as usize * 2 + 1) * 4);
    for i in -steps..=steps {
        let at = i as f32 * spacing;
        out.push(FlatVertex::new(Vec2::new(at, -extent), color));
        out.push(FlatVertex::new(Vec2::new(at, extent), color));
        out.push(FlatVertex::new(Vec2::new(-extent, at), color));
        out.push(FlatVertex::new(Vec2::new(extent, at), color));
    }
    out
}
