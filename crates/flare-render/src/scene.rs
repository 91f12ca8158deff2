//! Scene description, cameras and light parameters.

use std::fmt;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::error::{RendererError, Result};
use crate::frame::{MAX_RADIAL_LIGHTS, MAX_SPOT_LIGHTS};
use crate::resource::FrameBuffer;

// ── camera ────────────────────────────────────────────────────────────────

/// Camera matrices for one scene.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SceneCamera {
    pub view: Mat4,
    pub projection: Mat4,
}

impl SceneCamera {
    #[inline]
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

impl Default for SceneCamera {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Editor camera: orthographic, positioned in render units.
///
/// `zoom` is the visible height in render units.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OrthoCamera {
    pub position: Vec2,
    zoom: f32,
}

impl OrthoCamera {
    pub const DEFAULT_ZOOM: f32 = 1000.0;
    pub const MIN_ZOOM: f32 = 100.0;
    pub const MAX_ZOOM: f32 = 2000.0;

    pub fn new(position: Vec2) -> Self {
        Self { position, zoom: Self::DEFAULT_ZOOM }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(Self::MIN_ZOOM, Self::MAX_ZOOM);
    }

    pub fn scene_camera(&self, aspect: f32) -> SceneCamera {
        let half_h = self.zoom * 0.5;
        let half_w = half_h * aspect.max(f32::EPSILON);
        SceneCamera {
            view: Mat4::from_translation(Vec3::new(-self.position.x, -self.position.y, 0.0)),
            projection: Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, -1.0, 1.0),
        }
    }

    /// Maps normalized device coordinates back to render-space coordinates.
    pub fn ndc_to_world(&self, ndc: Vec2, aspect: f32) -> Vec2 {
        let inverse = self.scene_camera(aspect).view_projection().inverse();
        inverse.transform_point3(ndc.extend(0.0)).truncate()
    }
}

impl Default for OrthoCamera {
    fn default() -> Self {
        Self::new(Vec2::ZERO)
    }
}

// ── scene ─────────────────────────────────────────────────────────────────

/// Parameters of one BeginScene/EndScene bracket.
#[derive(Debug, Clone)]
pub struct SceneDescription {
    pub camera: SceneCamera,
    /// Frame buffer the scene renders into. Blur reads and writes it.
    pub target: FrameBuffer,
    pub blur_enabled: bool,
    pub blur_radius: f32,
}

impl SceneDescription {
    pub fn new(camera: SceneCamera, target: FrameBuffer) -> Self {
        Self {
            camera,
            target,
            blur_enabled: false,
            blur_radius: 1.0,
        }
    }

    pub fn with_blur(mut self, radius: f32) -> Self {
        self.blur_enabled = true;
        self.blur_radius = radius;
        self
    }
}

// ── lights ────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LightKind {
    Radial,
    Spot,
}

impl fmt::Display for LightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Radial => "radial",
            Self::Spot => "spot",
        })
    }
}

/// Point light. Position in editor units.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RadialLight {
    pub position: Vec2,
    pub color: Vec4,
    pub intensity: f32,
}

impl Default for RadialLight {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            color: Vec4::ONE,
            intensity: 50.0,
        }
    }
}

/// Cone light. Position in editor units, angles in degrees.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpotLight {
    pub position: Vec2,
    pub color: Vec4,
    pub angle: f32,
    pub inner_cutoff: f32,
    pub outer_cutoff: f32,
    pub intensity: f32,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            color: Vec4::ONE,
            angle: 0.0,
            inner_cutoff: 30.0,
            outer_cutoff: 40.0,
            intensity: 50.0,
        }
    }
}

// ── lifecycle tracking ────────────────────────────────────────────────────

/// Application-side scene bracket and light counters.
///
/// Checked synchronously so misuse is reported to the caller instead of
/// surfacing later on the renderer thread.
#[derive(Debug, Default)]
pub(crate) struct SceneTracker {
    active: bool,
    radial: usize,
    spot: usize,
}

impl SceneTracker {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.active {
            return Err(RendererError::SceneAlreadyActive);
        }
        self.active = true;
        self.radial = 0;
        self.spot = 0;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        if !self.active {
            return Err(RendererError::NoActiveScene);
        }
        self.active = false;
        Ok(())
    }

    /// Reserves the next slot for a light of `kind`, returning its index.
    pub fn reserve_light(&mut self, kind: LightKind) -> Result<usize> {
        if !self.active {
            return Err(RendererError::NoActiveScene);
        }
        let (count, capacity) = match kind {
            LightKind::Radial => (&mut self.radial, MAX_RADIAL_LIGHTS),
            LightKind::Spot => (&mut self.spot, MAX_SPOT_LIGHTS),
        };
        if *count >= capacity {
            return Err(RendererError::LightCapacity { kind, capacity });
        }
        let index = *count;
        *count += 1;
        Ok(index)
    }

    pub fn light_count(&self, kind: LightKind) -> usize {
        match kind {
            LightKind::Radial => self.radial,
            LightKind::Spot => self.spot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── tracker ───────────────────────────────────────────────────────────

    #[test]
    fn nested_begin_is_rejected() {
        let mut t = SceneTracker::default();
        t.begin().unwrap();
        assert!(matches!(t.begin(), Err(RendererError::SceneAlreadyActive)));
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let mut t = SceneTracker::default();
        assert!(matches!(t.end(), Err(RendererError::NoActiveScene)));
        t.begin().unwrap();
        t.end().unwrap();
        assert!(matches!(t.end(), Err(RendererError::NoActiveScene)));
    }

    #[test]
    fn light_overflow_is_reported() {
        let mut t = SceneTracker::default();
        t.begin().unwrap();
        for i in 0..MAX_RADIAL_LIGHTS {
            assert_eq!(t.reserve_light(LightKind::Radial).unwrap(), i);
        }
        assert!(matches!(
            t.reserve_light(LightKind::Radial),
            Err(RendererError::LightCapacity { kind: LightKind::Radial, capacity: MAX_RADIAL_LIGHTS })
        ));
        // The other kind has its own budget.
        assert_eq!(t.reserve_light(LightKind::Spot).unwrap(), 0);
    }

    #[test]
    fn light_counts_reset_each_scene() {
        let mut t = SceneTracker::default();
        t.begin().unwrap();
        t.reserve_light(LightKind::Spot).unwrap();
        t.reserve_light(LightKind::Spot).unwrap();
        t.end().unwrap();

        t.begin().unwrap();
        assert_eq!(t.light_count(LightKind::Spot), 0);
        assert_eq!(t.reserve_light(LightKind::Spot).unwrap(), 0);
    }

    #[test]
    fn lights_outside_scene_are_rejected() {
        let mut t = SceneTracker::default();
        assert!(matches!(t.reserve_light(LightKind::Spot), Err(RendererError::NoActiveScene)));
    }

    // ── camera ────────────────────────────────────────────────────────────

    #[test]
    fn zoom_is_clamped() {
        let mut cam = OrthoCamera::default();
        assert_eq!(cam.zoom(), OrthoCamera::DEFAULT_ZOOM);
        cam.set_zoom(5.0);
        assert_eq!(cam.zoom(), OrthoCamera::MIN_ZOOM);
        cam.set_zoom(1e6);
        assert_eq!(cam.zoom(), OrthoCamera::MAX_ZOOM);
    }

    #[test]
    fn ortho_camera_maps_visible_edges_to_ndc() {
        let cam = OrthoCamera::new(Vec2::new(100.0, 0.0));
        let vp = cam.scene_camera(2.0).view_projection();
        // zoom 1000 -> half height 500, half width 1000
        let top_right = vp.transform_point3(Vec3::new(1100.0, 500.0, 0.0));
        assert!((top_right.x - 1.0).abs() < 1e-5);
        assert!((top_right.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn ndc_to_world_inverts_projection() {
        let cam = OrthoCamera::new(Vec2::new(-40.0, 25.0));
        let world = cam.ndc_to_world(Vec2::ZERO, 1.5);
        assert!((world - cam.position).length() < 1e-3);
    }
}
