//! Built-in interpretations of the manifest programs.
//!
//! The software backend does not execute WGSL. Each program is recognized by its
//! stage pair, or for in-memory sources by the stage interface it declares, and
//! evaluated natively with the same math as the shipped shaders.

use glam::{Mat4, Vec2, Vec4};

use crate::batch::{FlatVertex, QuadVertex};
use crate::blur::{gaussian_weights, BlurUniforms, ImageVertex, BLUR_HALF_TAPS};
use crate::error::{RendererError, Result};
use crate::frame::{FrameUniforms, MAX_RADIAL_LIGHTS, MAX_SPOT_LIGHTS};
use crate::material::{GridUniforms, LitSpriteUniforms};
use crate::shader::ShaderSources;

use super::raster::{Rgba, Surface, WHITE};

/// Program families the software backend knows how to evaluate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ProgramKind {
    /// World-space textured quads with lighting.
    QuadBatch,
    /// Clip-space textured quad.
    Image,
    /// Clip-space separable Gaussian blur.
    Blur,
    /// World-space solid color geometry.
    FlatColor,
    /// World-space lines fading away from a center point.
    Grid,
    /// World-space textured sprite with attenuated lighting.
    LitSprite,
}

impl ProgramKind {
    pub fn classify(sources: &ShaderSources) -> Result<Self> {
        let by_stem = match (sources.vertex_stem(), sources.fragment_stem()) {
            (Some("QuadBatch"), Some("QuadBatch")) => Some(Self::QuadBatch),
            (Some("Image"), Some("Image")) => Some(Self::Image),
            (Some("Image"), Some("Blur")) => Some(Self::Blur),
            (Some("FlatColor"), Some(_)) => Some(Self::FlatColor),
            (Some("Grid"), Some("Grid")) => Some(Self::Grid),
            (Some("LitSprite"), Some("LitSprite")) => Some(Self::LitSprite),
            _ => None,
        };
        let by_interface = || {
            if sources.vertex_path.is_some() {
                return None;
            }
            Self::from_interface(&sources.vertex, &sources.fragment)
        };
        by_stem
            .or_else(by_interface)
            .ok_or_else(|| RendererError::UnsupportedShader(sources.name.clone()))
    }

    /// Recognizes in-memory sources by the varyings their stages exchange.
    fn from_interface(vertex: &str, fragment: &str) -> Option<Self> {
        let declares = |name: &str| vertex.contains(name) && fragment.contains(name);
        if declares("QuadVaryings") {
            Some(Self::QuadBatch)
        } else if declares("GridVaryings") {
            Some(Self::Grid)
        } else if declares("SpriteVaryings") {
            Some(Self::LitSprite)
        } else if declares("ImageVaryings") {
            Some(if fragment.contains("BlurData") { Self::Blur } else { Self::Image })
        } else if declares("FlatVaryings") {
            Some(Self::FlatColor)
        } else {
            None
        }
    }

    /// Vertex size in bytes the program consumes.
    pub fn vertex_stride(self) -> usize {
        match self {
            Self::QuadBatch => size_of::<QuadVertex>(),
            Self::Image | Self::Blur => size_of::<ImageVertex>(),
            Self::FlatColor | Self::Grid => size_of::<FlatVertex>(),
            Self::LitSprite => size_of::<ImageVertex>(),
        }
    }

    /// Whether positions go through the frame's view-projection.
    fn is_world_space(self) -> bool {
        matches!(self, Self::QuadBatch | Self::FlatColor | Self::Grid | Self::LitSprite)
    }
}

// ── vertex stage ──────────────────────────────────────────────────────────

/// Output of the vertex stage.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub(crate) struct Varying {
    pub clip: [f32; 2],
    /// Pre-transform position, used for lighting.
    pub world: [f32; 2],
    pub color: [f32; 4],
    pub uv: [f32; 2],
    pub slot: f32,
}

impl Varying {
    pub fn lerp3(v: [&Varying; 3], w: [f32; 3]) -> Varying {
        let mix2 = |f: fn(&Varying) -> [f32; 2]| {
            let (a, b, c) = (f(v[0]), f(v[1]), f(v[2]));
            [
                a[0] * w[0] + b[0] * w[1] + c[0] * w[2],
                a[1] * w[0] + b[1] * w[1] + c[1] * w[2],
            ]
        };
        let color = Vec4::from(v[0].color) * w[0]
            + Vec4::from(v[1].color) * w[1]
            + Vec4::from(v[2].color) * w[2];
        Varying {
            clip: mix2(|v| v.clip),
            world: mix2(|v| v.world),
            color: color.to_array(),
            uv: mix2(|v| v.uv),
            // flat: constant per quad
            slot: v[0].slot,
        }
    }

    pub fn lerp2(a: &Varying, b: &Varying, t: f32) -> Varying {
        Self::lerp3([a, b, a], [1.0 - t, t, 0.0])
    }
}

/// Decodes and transforms every vertex of `bytes`.
pub(crate) fn run_vertex_stage(kind: ProgramKind, bytes: &[u8], view_projection: Mat4) -> Vec<Varying> {
    let stride = kind.vertex_stride();
    bytes
        .chunks_exact(stride)
        .map(|raw| {
            let mut v = match kind {
                ProgramKind::QuadBatch => {
                    let q: QuadVertex = bytemuck::pod_read_unaligned(raw);
                    Varying {
                        clip: q.position,
                        world: q.position,
                        color: q.color,
                        uv: q.tex_coord,
                        slot: q.texture_slot,
                    }
                }
                ProgramKind::Image | ProgramKind::Blur | ProgramKind::LitSprite => {
                    let i: ImageVertex = bytemuck::pod_read_unaligned(raw);
                    Varying {
                        clip: i.position,
                        world: i.position,
                        color: WHITE,
                        uv: i.uv,
                        slot: 0.0,
                    }
                }
                ProgramKind::FlatColor | ProgramKind::Grid => {
                    let f: FlatVertex = bytemuck::pod_read_unaligned(raw);
                    Varying {
                        clip: f.position,
                        world: f.position,
                        color: f.color,
                        ..Varying::default()
                    }
                }
            };
            if kind.is_world_space() {
                let p = view_projection * Vec4::new(v.world[0], v.world[1], 0.0, 1.0);
                let w = if p.w.abs() > f32::EPSILON { p.w } else { 1.0 };
                v.clip = [p.x / w, p.y / w];
            }
            v
        })
        .collect()
}

// ── fragment stage ────────────────────────────────────────────────────────

/// Per-draw inputs of the fragment stage.
pub(crate) struct FragmentInputs<'a> {
    pub kind: ProgramKind,
    pub frame: &'a FrameUniforms,
    pub blur: Option<BlurUniforms>,
    pub grid: Option<GridUniforms>,
    pub sprite: Option<LitSpriteUniforms>,
    /// Resolved texture per slot. Unbound slots sample white.
    pub textures: Vec<Option<&'a Surface>>,
    pub lights_active: bool,
}

impl FragmentInputs<'_> {
    fn texture(&self, slot: usize) -> Option<&Surface> {
        self.textures.get(slot).copied().flatten()
    }

    fn sample(&self, slot: usize, uv: [f32; 2]) -> Rgba {
        self.texture(slot).map_or(WHITE, |t| t.sample(uv))
    }

    pub fn shade(&self, v: &Varying) -> Rgba {
        match self.kind {
            ProgramKind::QuadBatch => {
                let slot = v.slot.round().max(0.0) as usize;
                let base = Vec4::from(self.sample(slot, v.uv)) * Vec4::from(v.color);
                if !self.lights_active {
                    return base.to_array();
                }
                let light = light_contribution(self.frame, Vec2::from(v.world));
                let rgb = base.truncate() + base.truncate() * light;
                rgb.extend(base.w).to_array()
            }
            ProgramKind::Image => self.sample(0, v.uv),
            ProgramKind::Blur => self.blur_sample(v.uv),
            ProgramKind::FlatColor => v.color,
            ProgramKind::Grid => {
                let fade = self.grid.map_or(1.0, |g| g.fade(Vec2::from(v.world)));
                [v.color[0], v.color[1], v.color[2], v.color[3] * fade]
            }
            ProgramKind::LitSprite => {
                let material = self.sprite.unwrap_or_default();
                let base = Vec4::from(self.sample(0, v.uv)) * Vec4::from(material.tint);
                let light = material.base_light + attenuated_light(self.frame, Vec2::from(v.world), &material);
                (base.truncate() * light).extend(base.w).to_array()
            }
        }
    }

    fn blur_sample(&self, uv: [f32; 2]) -> Rgba {
        let Some(params) = self.blur else {
            return self.sample(0, uv);
        };
        let resolution = Vec2::from(params.resolution).max(Vec2::ONE);
        let step = Vec2::from(params.direction) * params.radius / resolution;
        let uv = Vec2::from(uv);

        let mut sum = Vec4::ZERO;
        for (w, i) in gaussian_weights().into_iter().zip(-BLUR_HALF_TAPS..=BLUR_HALF_TAPS) {
            sum += Vec4::from(self.sample(0, (uv + step * i as f32).to_array())) * w;
        }
        sum.to_array()
    }
}

/// Additive light factor at `world` (render units). Zero with no lights.
///
/// Radial lights fade linearly to zero at `intensity * 10` units. Spot lights use
/// the same falloff, masked by a cone that is full inside the inner cutoff and
/// fades out at the outer cutoff.
pub(crate) fn light_contribution(frame: &FrameUniforms, world: Vec2) -> glam::Vec3 {
    let mut total = glam::Vec3::ZERO;

    for i in 0..MAX_RADIAL_LIGHTS {
        let intensity = frame.radial_intensities[i][0];
        if intensity <= 0.0 {
            continue;
        }
        let pos = Vec2::new(frame.radial_positions[i][0], frame.radial_positions[i][1]);
        let color = Vec4::from(frame.radial_colors[i]);
        let falloff = (1.0 - world.distance(pos) / (intensity * 10.0)).max(0.0);
        total += color.truncate() * color.w * falloff;
    }

    for i in 0..MAX_SPOT_LIGHTS {
        let intensity = frame.spot_intensities[i][0];
        if intensity <= 0.0 {
            continue;
        }
        let pos = Vec2::new(frame.spot_positions[i][0], frame.spot_positions[i][1]);
        let to_point = world - pos;
        let falloff = (1.0 - to_point.length() / (intensity * 10.0)).max(0.0);
        if falloff == 0.0 {
            continue;
        }
        let color = Vec4::from(frame.spot_colors[i]);
        total += color.truncate() * color.w * falloff * spot_cone(frame, i, to_point);
    }

    total
}

/// Light reaching a lit sprite at `world`: each light's intensity scaled by the
/// material's attenuation, spot lights masked by their cone.
pub(crate) fn attenuated_light(frame: &FrameUniforms, world: Vec2, material: &LitSpriteUniforms) -> glam::Vec3 {
    let mut total = glam::Vec3::ZERO;

    for i in 0..MAX_RADIAL_LIGHTS {
        let intensity = frame.radial_intensities[i][0];
        if intensity <= 0.0 {
            continue;
        }
        let pos = Vec2::new(frame.radial_positions[i][0], frame.radial_positions[i][1]);
        let color = Vec4::from(frame.radial_colors[i]);
        total += color.truncate() * color.w * intensity * material.attenuation(world.distance(pos));
    }

    for i in 0..MAX_SPOT_LIGHTS {
        let intensity = frame.spot_intensities[i][0];
        if intensity <= 0.0 {
            continue;
        }
        let pos = Vec2::new(frame.spot_positions[i][0], frame.spot_positions[i][1]);
        let to_point = world - pos;
        let color = Vec4::from(frame.spot_colors[i]);
        total += color.truncate()
            * color.w
            * intensity
            * spot_cone(frame, i, to_point)
            * material.attenuation(to_point.length());
    }

    total
}

/// Cone mask of spot light `i` for a point at `to_point` from the light: full
/// inside the inner cutoff, zero past the outer cutoff, linear in between.
fn spot_cone(frame: &FrameUniforms, i: usize, to_point: Vec2) -> f32 {
    let inner = frame.spot_inner_cutoffs[i][0];
    let outer = frame.spot_outer_cutoffs[i][0];
    let delta = to_point.to_angle() - frame.spot_angles[i][0];
    let delta = (delta.sin().atan2(delta.cos())).abs();
    if delta <= inner {
        1.0
    } else if delta >= outer || outer <= inner {
        0.0
    } else {
        1.0 - (delta - inner) / (outer - inner)
    }
}

/// Whether any light slot is in use.
pub(crate) fn has_lights(frame: &FrameUniforms) -> bool {
    frame.radial_intensities.iter().any(|i| i[0] > 0.0)
        || frame.spot_intensities.iter().any(|i| i[0] > 0.0)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::scene::{RadialLight, SpotLight};

    fn sources(vertex: &str, fragment: &str) -> ShaderSources {
        ShaderSources {
            name: format!("{vertex}/{fragment}"),
            vertex_path: Some(PathBuf::from(format!("shaders/{vertex}.vert.wgsl"))),
            fragment_path: Some(PathBuf::from(format!("shaders/{fragment}.frag.wgsl"))),
            vertex: String::new(),
            fragment: String::new(),
            uniform_slots: vec![0],
            texture_slots: 1,
        }
    }

    // ── classification ────────────────────────────────────────────────────

    #[test]
    fn programs_are_classified_by_stage_pair() {
        assert_eq!(ProgramKind::classify(&sources("QuadBatch", "QuadBatch")).unwrap(), ProgramKind::QuadBatch);
        assert_eq!(ProgramKind::classify(&sources("Image", "Blur")).unwrap(), ProgramKind::Blur);
        assert_eq!(ProgramKind::classify(&sources("FlatColor", "Anything")).unwrap(), ProgramKind::FlatColor);
        assert_eq!(ProgramKind::classify(&sources("Grid", "Grid")).unwrap(), ProgramKind::Grid);
        assert_eq!(ProgramKind::classify(&sources("LitSprite", "LitSprite")).unwrap(), ProgramKind::LitSprite);
        assert!(matches!(
            ProgramKind::classify(&sources("Custom", "Image")),
            Err(RendererError::UnsupportedShader(_))
        ));
    }

    #[test]
    fn in_memory_programs_are_classified_by_interface() {
        let raw = |vertex: &str, fragment: &str| ShaderSources {
            vertex_path: None,
            fragment_path: None,
            vertex: vertex.to_string(),
            fragment: fragment.to_string(),
            ..sources("", "")
        };
        let kind = |v: &str, f: &str| ProgramKind::classify(&raw(v, f)).ok();

        assert_eq!(kind("struct ImageVaryings {}", "ImageVaryings"), Some(ProgramKind::Image));
        assert_eq!(kind("ImageVaryings", "ImageVaryings BlurData"), Some(ProgramKind::Blur));
        assert_eq!(kind("FlatVaryings GridVaryings", "FlatVaryings GridVaryings"), Some(ProgramKind::Grid));
        assert_eq!(kind("ImageVaryings SpriteVaryings", "ImageVaryings SpriteVaryings"), Some(ProgramKind::LitSprite));
        assert_eq!(kind("QuadVaryings", "QuadVaryings"), Some(ProgramKind::QuadBatch));
        // stages that do not agree on an interface are not guessed
        assert_eq!(kind("QuadVaryings", "FlatVaryings"), None);
        assert_eq!(kind("", ""), None);
    }

    // ── vertex stage ──────────────────────────────────────────────────────

    #[test]
    fn world_space_vertices_use_view_projection() {
        let v = FlatVertex { position: [2.0, -4.0], color: [1.0; 4] };
        let out = run_vertex_stage(
            ProgramKind::FlatColor,
            bytemuck::bytes_of(&v),
            Mat4::from_scale(glam::Vec3::new(0.5, 0.25, 1.0)),
        );
        assert_eq!(out[0].clip, [1.0, -1.0]);
        assert_eq!(out[0].world, [2.0, -4.0]);
    }

    #[test]
    fn image_vertices_are_already_in_clip_space() {
        let v = ImageVertex { position: [0.5, 0.5], uv: [1.0, 0.0] };
        let out = run_vertex_stage(ProgramKind::Image, bytemuck::bytes_of(&v), Mat4::ZERO);
        assert_eq!(out[0].clip, [0.5, 0.5]);
        assert_eq!(out[0].uv, [1.0, 0.0]);
    }

    // ── lighting ──────────────────────────────────────────────────────────

    #[test]
    fn no_lights_contribute_nothing() {
        let frame = FrameUniforms::default();
        assert!(!has_lights(&frame));
        assert_eq!(light_contribution(&frame, Vec2::ZERO), glam::Vec3::ZERO);
    }

    #[test]
    fn radial_light_fades_with_distance() {
        let mut frame = FrameUniforms::default();
        frame.write_radial(0, &RadialLight { position: Vec2::ZERO, color: Vec4::ONE, intensity: 10.0 });
        assert!(has_lights(&frame));

        let near = light_contribution(&frame, Vec2::new(10.0, 0.0)).x;
        let far = light_contribution(&frame, Vec2::new(90.0, 0.0)).x;
        let outside = light_contribution(&frame, Vec2::new(150.0, 0.0)).x;
        assert!(near > far && far > 0.0);
        assert_eq!(outside, 0.0);
    }

    #[test]
    fn spot_light_is_masked_by_cone() {
        let mut frame = FrameUniforms::default();
        frame.write_spot(0, &SpotLight { angle: 0.0, ..SpotLight::default() });

        let ahead = light_contribution(&frame, Vec2::new(50.0, 0.0)).x;
        let behind = light_contribution(&frame, Vec2::new(-50.0, 0.0)).x;
        assert!(ahead > 0.0);
        assert_eq!(behind, 0.0);
    }

    #[test]
    fn attenuated_light_scales_intensity_by_distance() {
        let mut frame = FrameUniforms::default();
        frame.write_radial(0, &RadialLight { position: Vec2::ZERO, color: Vec4::ONE, intensity: 2.0 });
        let material = LitSpriteUniforms { constant: 1.0, linear: 0.1, quadratic: 0.0, ..Default::default() };

        let at_light = attenuated_light(&frame, Vec2::ZERO, &material).x;
        let away = attenuated_light(&frame, Vec2::new(10.0, 0.0), &material).x;
        assert!((at_light - 2.0).abs() < 1e-5);
        assert!((away - 1.0).abs() < 1e-5);
    }

    // ── fragment stage ────────────────────────────────────────────────────

    fn inputs(kind: ProgramKind, frame: &FrameUniforms) -> FragmentInputs<'_> {
        FragmentInputs {
            kind,
            frame,
            blur: None,
            grid: None,
            sprite: None,
            textures: vec![None],
            lights_active: has_lights(frame),
        }
    }

    #[test]
    fn grid_alpha_fades_with_distance_from_center() {
        let frame = FrameUniforms::default();
        let mut f = inputs(ProgramKind::Grid, &frame);
        f.grid = Some(GridUniforms::new(Vec2::ZERO, 100.0));

        let at = |x: f32| Varying { world: [x, 0.0], color: [1.0, 0.5, 0.25, 1.0], ..Varying::default() };
        assert_eq!(f.shade(&at(0.0)), [1.0, 0.5, 0.25, 1.0]);
        assert!((f.shade(&at(50.0))[3] - 0.5).abs() < 1e-6);
        assert_eq!(f.shade(&at(150.0))[3], 0.0);
    }

    #[test]
    fn unlit_sprite_shows_base_light_only() {
        let frame = FrameUniforms::default();
        let mut f = inputs(ProgramKind::LitSprite, &frame);
        f.sprite = Some(LitSpriteUniforms { tint: [1.0, 0.5, 1.0, 1.0], base_light: 0.5, ..Default::default() });

        let out = f.shade(&Varying { uv: [0.5, 0.5], ..Varying::default() });
        assert_eq!(out, [0.5, 0.25, 0.5, 1.0]);
    }
}
