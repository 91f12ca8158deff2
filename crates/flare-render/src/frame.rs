//! Per-frame uniform buffer layout.
//!
//! `FrameUniforms` is the CPU mirror of the `FrameData` block every shader sees at
//! group 0 / binding 0. The WGSL declaration is generated from the same constants
//! (see [`wgsl_prelude`]), and the byte layout is checked at compile time.
//!
//! Layout (std140, 16-byte array stride):
//!
//! ```text
//! view_projection      mat4x4<f32>
//! radial_positions     array<vec4<f32>, MAX_RADIAL_LIGHTS>   xy used
//! radial_colors        array<vec4<f32>, MAX_RADIAL_LIGHTS>
//! radial_intensities   array<vec4<f32>, MAX_RADIAL_LIGHTS>   x used
//! spot_positions       array<vec4<f32>, MAX_SPOT_LIGHTS>     xy used
//! spot_colors          array<vec4<f32>, MAX_SPOT_LIGHTS>
//! spot_angles          array<vec4<f32>, MAX_SPOT_LIGHTS>     x used, radians
//! spot_inner_cutoffs   array<vec4<f32>, MAX_SPOT_LIGHTS>     x used, radians
//! spot_outer_cutoffs   array<vec4<f32>, MAX_SPOT_LIGHTS>     x used, radians
//! spot_intensities     array<vec4<f32>, MAX_SPOT_LIGHTS>     x used
//! ```

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::blur::{BLUR_HALF_TAPS, BLUR_SIGMA};
use crate::resource::{LayoutElement, ShaderVariableType};
use crate::scene::{RadialLight, SpotLight};

pub const MAX_RADIAL_LIGHTS: usize = 10;
pub const MAX_SPOT_LIGHTS: usize = 10;

/// Editor units to render units. Light positions are scaled by this on submission.
pub const GLOBAL_SCALE_FACTOR: f32 = 1000.0;

/// Bumped whenever the `FrameData` layout changes.
pub const FRAME_LAYOUT_VERSION: u32 = 1;

/// Uniform slot of the per-frame buffer in every shader program.
pub const FRAME_UNIFORM_SLOT: u32 = 0;

type Padded<const N: usize> = [[f32; 4]; N];

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view_projection: [[f32; 4]; 4],

    pub radial_positions: Padded<MAX_RADIAL_LIGHTS>,
    pub radial_colors: Padded<MAX_RADIAL_LIGHTS>,
    pub radial_intensities: Padded<MAX_RADIAL_LIGHTS>,

    pub spot_positions: Padded<MAX_SPOT_LIGHTS>,
    pub spot_colors: Padded<MAX_SPOT_LIGHTS>,
    pub spot_angles: Padded<MAX_SPOT_LIGHTS>,
    pub spot_inner_cutoffs: Padded<MAX_SPOT_LIGHTS>,
    pub spot_outer_cutoffs: Padded<MAX_SPOT_LIGHTS>,
    pub spot_intensities: Padded<MAX_SPOT_LIGHTS>,
}

const RADIAL_BLOCK: usize = 16 * MAX_RADIAL_LIGHTS;
const SPOT_BLOCK: usize = 16 * MAX_SPOT_LIGHTS;

const _: () = {
    assert!(size_of::<FrameUniforms>() == 64 + 3 * RADIAL_BLOCK + 6 * SPOT_BLOCK);
    assert!(size_of::<FrameUniforms>() % 16 == 0);
    assert!(offset_of!(FrameUniforms, radial_positions) == 64);
    assert!(offset_of!(FrameUniforms, radial_intensities) == 64 + 2 * RADIAL_BLOCK);
    assert!(offset_of!(FrameUniforms, spot_positions) == 64 + 3 * RADIAL_BLOCK);
    assert!(offset_of!(FrameUniforms, spot_intensities) == 64 + 3 * RADIAL_BLOCK + 5 * SPOT_BLOCK);
};

impl FrameUniforms {
    pub fn new(view_projection: Mat4) -> Self {
        let mut frame = Self::zeroed();
        frame.set_view_projection(view_projection);
        frame
    }

    pub fn set_view_projection(&mut self, view_projection: Mat4) {
        self.view_projection = view_projection.to_cols_array_2d();
    }

    pub fn view_projection(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view_projection)
    }

    /// Zeroes every light slot so unused entries contribute nothing.
    pub fn clear_lights(&mut self) {
        let view_projection = self.view_projection;
        *self = Self::zeroed();
        self.view_projection = view_projection;
    }

    /// Writes a radial light at `index`, scaling its position to render units.
    ///
    /// Panics if `index >= MAX_RADIAL_LIGHTS`; callers reserve indices through the
    /// scene tracker, which rejects overflow with an error first.
    pub fn write_radial(&mut self, index: usize, light: &RadialLight) {
        let p = light.position * GLOBAL_SCALE_FACTOR;
        self.radial_positions[index] = [p.x, p.y, 0.0, 0.0];
        self.radial_colors[index] = light.color.to_array();
        self.radial_intensities[index] = [light.intensity, 0.0, 0.0, 0.0];
    }

    /// Writes a spot light at `index`. Angles are converted from degrees to radians.
    ///
    /// Panics if `index >= MAX_SPOT_LIGHTS`.
    pub fn write_spot(&mut self, index: usize, light: &SpotLight) {
        let p = light.position * GLOBAL_SCALE_FACTOR;
        self.spot_positions[index] = [p.x, p.y, 0.0, 0.0];
        self.spot_colors[index] = light.color.to_array();
        self.spot_angles[index] = [light.angle.to_radians(), 0.0, 0.0, 0.0];
        self.spot_inner_cutoffs[index] = [light.inner_cutoff.to_radians(), 0.0, 0.0, 0.0];
        self.spot_outer_cutoffs[index] = [light.outer_cutoff.to_radians(), 0.0, 0.0, 0.0];
        self.spot_intensities[index] = [light.intensity, 0.0, 0.0, 0.0];
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Declared element list, in field order.
    pub fn layout() -> Vec<LayoutElement> {
        use ShaderVariableType as T;
        let r = MAX_RADIAL_LIGHTS as u32;
        let s = MAX_SPOT_LIGHTS as u32;
        vec![
            LayoutElement::new("ViewProjection", 0, T::Mat4),
            LayoutElement::array("RadialLightPosition", T::Vec2, r),
            LayoutElement::array("RadialLightColor", T::Vec4, r),
            LayoutElement::array("RadialLightIntensity", T::Float, r),
            LayoutElement::array("SpotLightPosition", T::Vec2, s),
            LayoutElement::array("SpotLightColor", T::Vec4, s),
            LayoutElement::array("SpotLightAngle", T::Float, s),
            LayoutElement::array("SpotLightInnerCutoff", T::Float, s),
            LayoutElement::array("SpotLightOuterCutoff", T::Float, s),
            LayoutElement::array("SpotLightIntensity", T::Float, s),
        ]
    }
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

/// WGSL declarations prepended to every shader module.
pub fn wgsl_prelude() -> String {
    let r = MAX_RADIAL_LIGHTS;
    let s = MAX_SPOT_LIGHTS;
    format!(
        "\
// flare frame layout v{FRAME_LAYOUT_VERSION} (generated)
const FRAME_LAYOUT_VERSION: u32 = {FRAME_LAYOUT_VERSION}u;
const MAX_RADIAL_LIGHTS: u32 = {r}u;
const MAX_SPOT_LIGHTS: u32 = {s}u;
const GLOBAL_SCALE_FACTOR: f32 = {GLOBAL_SCALE_FACTOR:?};
const BLUR_HALF_TAPS: i32 = {BLUR_HALF_TAPS};
const BLUR_SIGMA: f32 = {BLUR_SIGMA:?};

struct FrameData {{
    view_projection: mat4x4<f32>,
    radial_positions: array<vec4<f32>, {r}>,
    radial_colors: array<vec4<f32>, {r}>,
    radial_intensities: array<vec4<f32>, {r}>,
    spot_positions: array<vec4<f32>, {s}>,
    spot_colors: array<vec4<f32>, {s}>,
    spot_angles: array<vec4<f32>, {s}>,
    spot_inner_cutoffs: array<vec4<f32>, {s}>,
    spot_outer_cutoffs: array<vec4<f32>, {s}>,
    spot_intensities: array<vec4<f32>, {s}>,
}}

@group(0) @binding({FRAME_UNIFORM_SLOT}) var<uniform> u_frame: FrameData;

"
    )
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec4};

    use super::*;
    use crate::resource::uniform_block_size;

    #[test]
    fn declared_layout_matches_struct_size() {
        assert_eq!(
            uniform_block_size(&FrameUniforms::layout()),
            size_of::<FrameUniforms>() as u64
        );
    }

    #[test]
    fn radial_light_position_is_scaled() {
        let mut frame = FrameUniforms::default();
        frame.write_radial(
            3,
            &RadialLight {
                position: Vec2::new(0.5, -0.25),
                color: Vec4::new(1.0, 0.5, 0.0, 1.0),
                intensity: 7.0,
            },
        );
        assert_eq!(frame.radial_positions[3], [500.0, -250.0, 0.0, 0.0]);
        assert_eq!(frame.radial_colors[3], [1.0, 0.5, 0.0, 1.0]);
        assert_eq!(frame.radial_intensities[3][0], 7.0);
    }

    #[test]
    fn spot_light_angles_become_radians() {
        let mut frame = FrameUniforms::default();
        frame.write_spot(0, &SpotLight { angle: 180.0, ..SpotLight::default() });
        assert!((frame.spot_angles[0][0] - std::f32::consts::PI).abs() < 1e-6);
        assert!((frame.spot_inner_cutoffs[0][0] - 30f32.to_radians()).abs() < 1e-6);
        assert!((frame.spot_outer_cutoffs[0][0] - 40f32.to_radians()).abs() < 1e-6);
        assert_eq!(frame.spot_intensities[0][0], 50.0);
    }

    #[test]
    fn clear_lights_keeps_view_projection() {
        let vp = Mat4::from_scale(glam::Vec3::splat(2.0));
        let mut frame = FrameUniforms::new(vp);
        frame.write_radial(0, &RadialLight::default());
        frame.clear_lights();
        assert_eq!(frame.view_projection(), vp);
        assert_eq!(frame.radial_intensities[0], [0.0; 4]);
    }

    #[test]
    fn prelude_declares_capacities() {
        let prelude = wgsl_prelude();
        assert!(prelude.contains(&format!("array<vec4<f32>, {MAX_RADIAL_LIGHTS}>")));
        assert!(prelude.contains("@group(0) @binding(0) var<uniform> u_frame: FrameData;"));
        assert!(prelude.contains("const GLOBAL_SCALE_FACTOR: f32 = 1000.0;"));
    }
}
