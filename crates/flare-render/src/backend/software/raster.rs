//! CPU rasterization primitives: surfaces, coverage and blending.
//!
//! Coordinates are in pixels with a top-left origin; pixel `(x, y)` is sampled at
//! its center `(x + 0.5, y + 0.5)`.

use crate::api::RenderingBlendMode;
use crate::coords::Rectangle;
use crate::resource::{Image, TextureFormat};

pub(crate) type Rgba = [f32; 4];

pub(crate) const WHITE: Rgba = [1.0; 4];
pub(crate) const TRANSPARENT: Rgba = [0.0; 4];

// ── surface ───────────────────────────────────────────────────────────────

/// Linear float color surface used for textures, frame buffers and the window.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<Rgba>,
}

impl Surface {
    pub fn new(size: [u32; 2]) -> Self {
        Self {
            width: size[0],
            height: size[1],
            pixels: vec![TRANSPARENT; size[0] as usize * size[1] as usize],
        }
    }

    pub fn filled(size: [u32; 2], color: Rgba) -> Self {
        let mut s = Self::new(size);
        s.clear(color);
        s
    }

    /// Builds a surface from RGBA8 or R8 bytes. Length must already be validated.
    pub fn from_bytes(size: [u32; 2], format: TextureFormat, data: &[u8]) -> Self {
        let unorm = |b: u8| b as f32 / 255.0;
        let pixels = match format {
            TextureFormat::Rgba8 => data
                .chunks_exact(4)
                .map(|p| [unorm(p[0]), unorm(p[1]), unorm(p[2]), unorm(p[3])])
                .collect(),
            TextureFormat::Rgb8 => data
                .chunks_exact(3)
                .map(|p| [unorm(p[0]), unorm(p[1]), unorm(p[2]), 1.0])
                .collect(),
            TextureFormat::R8 => data.iter().map(|&r| [unorm(r), 0.0, 0.0, 1.0]).collect(),
        };
        Self { width: size[0], height: size[1], pixels }
    }

    #[inline]
    pub fn size(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    pub fn clear(&mut self, color: Rgba) {
        self.pixels.fill(color);
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Rgba {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn blend_pixel(&mut self, x: u32, y: u32, src: Rgba, mode: RenderingBlendMode) {
        let i = y as usize * self.width as usize + x as usize;
        self.pixels[i] = blend(mode, src, self.pixels[i]);
    }

    /// Nearest sample with clamp-to-edge addressing. `uv` origin is the top-left.
    pub fn sample(&self, uv: [f32; 2]) -> Rgba {
        if self.width == 0 || self.height == 0 {
            return TRANSPARENT;
        }
        let texel = |t: f32, n: u32| -> u32 {
            let i = (t * n as f32).floor();
            if i.is_nan() { 0 } else { i.clamp(0.0, (n - 1) as f32) as u32 }
        };
        self.get(texel(uv[0], self.width), texel(uv[1], self.height))
    }

    /// RGBA8 copy, rounded to nearest.
    pub fn to_image(&self) -> Image {
        let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let data = self
            .pixels
            .iter()
            .flat_map(|p| p.map(unorm))
            .collect();
        Image {
            width: self.width,
            height: self.height,
            format: TextureFormat::Rgba8,
            data,
        }
    }
}

// ── blending ──────────────────────────────────────────────────────────────

/// Fixed-function blend of `src` over `dst`. Results are clamped to [0, 1].
///
/// `NotSpecified` never reaches this point: backends keep the previous mode.
pub(crate) fn blend(mode: RenderingBlendMode, src: Rgba, dst: Rgba) -> Rgba {
    let [sr, sg, sb, sa] = src;
    let [dr, dg, db, da] = dst;
    let out = match mode {
        RenderingBlendMode::Additive => [sr * sa + dr, sg * sa + dg, sb * sa + db, sa + da],
        RenderingBlendMode::Screen => [
            sr + dr * (1.0 - sr),
            sg + dg * (1.0 - sg),
            sb + db * (1.0 - sb),
            sa + da * (1.0 - sa),
        ],
        RenderingBlendMode::Overlay | RenderingBlendMode::NotSpecified => {
            let inv = 1.0 - sa;
            [sr * sa + dr * inv, sg * sa + dg * inv, sb * sa + db * inv, sa + da * inv]
        }
    };
    out.map(|c| c.clamp(0.0, 1.0))
}

// ── coordinates ───────────────────────────────────────────────────────────

/// Normalized device coordinates to pixel coordinates inside `viewport`.
#[inline]
pub(crate) fn ndc_to_pixel(ndc: [f32; 2], viewport: Rectangle) -> [f64; 2] {
    [
        viewport.x as f64 + (ndc[0] as f64 + 1.0) * 0.5 * viewport.width as f64,
        viewport.y as f64 + (1.0 - ndc[1] as f64) * 0.5 * viewport.height as f64,
    ]
}

// ── coverage ──────────────────────────────────────────────────────────────

#[inline]
fn edge(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Whether a pixel center lying exactly on edge `a -> b` belongs to this triangle.
///
/// Exactly one of the two opposite directions owns any non-degenerate edge, so
/// triangles sharing an edge never both cover a pixel on it.
#[inline]
fn owns_edge(a: [f64; 2], b: [f64; 2]) -> bool {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    dy > 0.0 || (dy == 0.0 && dx < 0.0)
}

/// Calls `shade(x, y, weights)` for every pixel center covered by the triangle
/// and inside `clip`. `weights` are barycentric weights of `p[0]`, `p[1]`, `p[2]`.
pub(crate) fn fill_triangle<F>(p: [[f64; 2]; 3], clip: Rectangle, mut shade: F)
where
    F: FnMut(u32, u32, [f32; 3]),
{
    if clip.is_empty() {
        return;
    }
    let [a, mut b, mut c] = p;
    let mut order = [0usize, 1, 2];
    let mut area = edge(a, b, c);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    if area < 0.0 {
        std::mem::swap(&mut b, &mut c);
        order.swap(1, 2);
        area = -area;
    }

    let min_x = a[0].min(b[0]).min(c[0]).floor().max(clip.x as f64) as i64;
    let min_y = a[1].min(b[1]).min(c[1]).floor().max(clip.y as f64) as i64;
    let max_x = (a[0].max(b[0]).max(c[0]).ceil() as i64).min(clip.right());
    let max_y = (a[1].max(b[1]).max(c[1]).ceil() as i64).min(clip.bottom());

    let (own_bc, own_ca, own_ab) = (owns_edge(b, c), owns_edge(c, a), owns_edge(a, b));
    let inside = |e: f64, owned: bool| e > 0.0 || (e == 0.0 && owned);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let center = [x as f64 + 0.5, y as f64 + 0.5];
            let w0 = edge(b, c, center);
            let w1 = edge(c, a, center);
            let w2 = edge(a, b, center);
            if !(inside(w0, own_bc) && inside(w1, own_ca) && inside(w2, own_ab)) {
                continue;
            }

            let mut weights = [0.0f32; 3];
            weights[order[0]] = (w0 / area) as f32;
            weights[order[1]] = (w1 / area) as f32;
            weights[order[2]] = (w2 / area) as f32;
            shade(x as u32, y as u32, weights);
        }
    }
}

/// Calls `plot(x, y, t)` along the segment, `t` in [0, 1] from `p0` to `p1`.
///
/// Simple DDA: one sample per major-axis pixel, endpoints included.
pub(crate) fn draw_line<F>(p0: [f64; 2], p1: [f64; 2], clip: Rectangle, mut plot: F)
where
    F: FnMut(u32, u32, f32),
{
    if clip.is_empty() {
        return;
    }
    let dx = p1[0] - p0[0];
    let dy = p1[1] - p0[1];
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0);
    if !steps.is_finite() {
        return;
    }
    let steps = steps as i64;

    let mut last = None;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = (p0[0] + dx * t).floor() as i64;
        let y = (p0[1] + dy * t).floor() as i64;
        if last == Some((x, y)) || !clip.contains(x, y) {
            continue;
        }
        last = Some((x, y));
        plot(x as u32, y as u32, t as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(triangles: &[[[f64; 2]; 3]], size: u32) -> Vec<u32> {
        let mut hits = vec![0u32; (size * size) as usize];
        for &t in triangles {
            fill_triangle(t, Rectangle::full([size, size]), |x, y, _| {
                hits[(y * size + x) as usize] += 1;
            });
        }
        hits
    }

    // ── coverage ──────────────────────────────────────────────────────────

    #[test]
    fn shared_edges_are_covered_once() {
        // quad split along the diagonal, both windings
        let quad = [
            [[0.0, 0.0], [0.0, 8.0], [8.0, 8.0]],
            [[0.0, 0.0], [8.0, 8.0], [8.0, 0.0]],
        ];
        assert!(coverage(&quad, 8).iter().all(|&h| h == 1));

        let flipped = [
            [[0.0, 0.0], [8.0, 8.0], [0.0, 8.0]],
            [[0.0, 0.0], [8.0, 0.0], [8.0, 8.0]],
        ];
        assert!(coverage(&flipped, 8).iter().all(|&h| h == 1));
    }

    #[test]
    fn adjacent_quads_on_pixel_centers_do_not_overlap() {
        // edges run exactly through pixel centers at x = 2.5
        let tris = [
            [[0.5, 0.0], [0.5, 4.0], [2.5, 4.0]],
            [[0.5, 0.0], [2.5, 4.0], [2.5, 0.0]],
            [[2.5, 0.0], [2.5, 4.0], [4.5, 4.0]],
            [[2.5, 0.0], [4.5, 4.0], [4.5, 0.0]],
        ];
        let hits = coverage(&tris, 6);
        assert!(hits.iter().all(|&h| h <= 1));
        assert_eq!(hits.iter().sum::<u32>(), 4 * 4);
    }

    #[test]
    fn barycentric_weights_follow_input_order() {
        let tri = [[0.0, 0.0], [0.0, 4.0], [4.0, 0.0]];
        let mut seen = false;
        fill_triangle(tri, Rectangle::full([4, 4]), |x, y, w| {
            if (x, y) == (0, 0) {
                // center (0.5, 0.5)
                assert!((w[1] - 0.125).abs() < 1e-6);
                assert!((w[2] - 0.125).abs() < 1e-6);
                assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-6);
                seen = true;
            }
        });
        assert!(seen);
    }

    #[test]
    fn clip_rectangle_limits_coverage() {
        let tri = [[0.0, 0.0], [0.0, 16.0], [16.0, 16.0]];
        let mut max = (0, 0);
        fill_triangle(tri, Rectangle::new(2, 2, 4, 4), |x, y, _| {
            assert!((2..6).contains(&x) && (2..6).contains(&y));
            max = (max.0.max(x), max.1.max(y));
        });
        assert_eq!(max, (5, 5));
    }

    #[test]
    fn degenerate_triangle_draws_nothing() {
        let hits = coverage(&[[[0.0, 0.0], [2.0, 2.0], [4.0, 4.0]]], 4);
        assert!(hits.iter().all(|&h| h == 0));
    }

    // ── lines ─────────────────────────────────────────────────────────────

    #[test]
    fn horizontal_line_plots_each_pixel_once() {
        let mut xs = Vec::new();
        draw_line([0.5, 1.5], [5.5, 1.5], Rectangle::full([8, 8]), |x, y, _| {
            assert_eq!(y, 1);
            xs.push(x);
        });
        assert_eq!(xs, vec![0, 1, 2, 3, 4, 5]);
    }

    // ── blending ──────────────────────────────────────────────────────────

    #[test]
    fn blend_equations() {
        let src = [0.5, 0.25, 1.0, 0.5];
        let dst = [0.5, 0.5, 0.5, 1.0];

        let add = blend(RenderingBlendMode::Additive, src, dst);
        assert_eq!(add, [0.75, 0.625, 1.0, 1.0]);

        let screen = blend(RenderingBlendMode::Screen, src, dst);
        assert_eq!(screen, [0.75, 0.625, 1.0, 1.0]);

        let over = blend(RenderingBlendMode::Overlay, src, dst);
        assert_eq!(over, [0.5, 0.375, 0.75, 1.0]);
    }

    #[test]
    fn screen_onto_cleared_target_writes_source() {
        let src = [0.3, 0.6, 0.9, 0.7];
        assert_eq!(blend(RenderingBlendMode::Screen, src, TRANSPARENT), src);
    }

    // ── surfaces ──────────────────────────────────────────────────────────

    #[test]
    fn sampling_clamps_to_edge() {
        let mut s = Surface::new([2, 1]);
        s.blend_pixel(1, 0, WHITE, RenderingBlendMode::Overlay);
        assert_eq!(s.sample([0.25, 0.5]), TRANSPARENT);
        assert_eq!(s.sample([0.75, 0.5]), WHITE);
        assert_eq!(s.sample([7.0, -3.0]), WHITE);
        assert_eq!(s.sample([-7.0, 3.0]), TRANSPARENT);
    }

    #[test]
    fn bytes_round_trip_through_image() {
        let data = vec![0, 64, 128, 255, 10, 20, 30, 40];
        let s = Surface::from_bytes([2, 1], TextureFormat::Rgba8, &data);
        assert_eq!(s.to_image().data, data);

        let r = Surface::from_bytes([1, 1], TextureFormat::R8, &[51]);
        assert_eq!(r.to_image().data, vec![51, 0, 0, 255]);
    }

    #[test]
    fn viewport_maps_ndc_corners() {
        let vp = Rectangle::new(10, 20, 100, 50);
        assert_eq!(ndc_to_pixel([-1.0, 1.0], vp), [10.0, 20.0]);
        assert_eq!(ndc_to_pixel([1.0, -1.0], vp), [110.0, 70.0]);
    }
}
