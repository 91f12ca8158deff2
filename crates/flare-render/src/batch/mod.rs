//! Quad batch accumulator.
//!
//! Coalesces textured, colored, optionally rotated quads into few draw calls.
//! The batch flushes before appending whenever the vertex buffer would overflow
//! or no texture slot is free ("flush-then-append"); quads are never dropped.
//!
//! Slot 0 always holds the white fallback texture and is never evicted.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

use crate::resource::{LayoutElement, ShaderVariableType, VertexLayout};

pub const MAX_QUADS_PER_BATCH: usize = 1000;
pub const MAX_QUAD_VERTICES_PER_BATCH: usize = MAX_QUADS_PER_BATCH * 4;
pub const MAX_QUAD_TEXTURES_PER_BATCH: usize = 8;

// ── vertex ────────────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
    /// Batch-local texture slot, float-encoded for the vertex stream.
    pub texture_slot: f32,
    pub tex_coord: [f32; 2],
}

impl QuadVertex {
    pub fn layout() -> VertexLayout {
        use ShaderVariableType as T;
        vec![
            LayoutElement::new("POSITION", 0, T::Vec2),
            LayoutElement::new("COLOR", 0, T::Vec4),
            LayoutElement::new("TEXSLOT", 0, T::Float),
            LayoutElement::new("TEXCOORD", 0, T::Vec2),
        ]
    }
}

/// Position plus color, consumed by the flat-color and grid programs.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct FlatVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

impl FlatVertex {
    pub fn new(position: Vec2, color: Vec4) -> Self {
        Self { position: position.to_array(), color: color.to_array() }
    }

    pub fn layout() -> VertexLayout {
        vec![
            LayoutElement::new("POSITION", 0, ShaderVariableType::Vec2),
            LayoutElement::new("COLOR", 0, ShaderVariableType::Vec4),
        ]
    }
}

/// Repeating quad index pattern: 0-1-2, 0-2-3, offset by 4 per quad.
pub fn quad_indices(quads: usize) -> Vec<u32> {
    (0..quads as u32)
        .flat_map(|q| {
            let o = q * 4;
            [o, o + 1, o + 2, o, o + 2, o + 3]
        })
        .collect()
}

/// Index count drawn for `vertices` batched vertices.
#[inline]
pub fn index_count_for(vertices: usize) -> u32 {
    (vertices * 3 / 2) as u32
}

// ── quad geometry ─────────────────────────────────────────────────────────

const UNIT_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]];

/// Corners of an axis-aligned quad anchored at `position` (bottom-left corner).
fn axis_aligned_corners(position: Vec2, scale: f32) -> [Vec2; 4] {
    [
        position,
        position + Vec2::new(0.0, 1.0) * scale,
        position + Vec2::new(1.0, 1.0) * scale,
        position + Vec2::new(1.0, 0.0) * scale,
    ]
}

/// Corners of a quad centered on `position`, rotated by `rotation` radians.
fn rotated_corners(position: Vec2, scale: f32, rotation: f32) -> [Vec2; 4] {
    let d = 0.5 * scale;
    let rot = Vec2::from_angle(rotation);
    [
        Vec2::new(-d, -d),
        Vec2::new(-d, d),
        Vec2::new(d, d),
        Vec2::new(d, -d),
    ]
    .map(|offset| position + rot.rotate(offset))
}

/// One sprite submission.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quad {
    pub position: Vec2,
    pub color: Vec4,
    pub scale: f32,
    /// Radians. `None` draws an axis-aligned quad anchored at `position`;
    /// `Some` draws a quad centered on `position`.
    pub rotation: Option<f32>,
}

impl Quad {
    fn corners(&self) -> [Vec2; 4] {
        match self.rotation {
            None => axis_aligned_corners(self.position, self.scale),
            Some(r) => rotated_corners(self.position, self.scale, r),
        }
    }
}

// ── accumulator ───────────────────────────────────────────────────────────

/// CPU-side batch. `T` is the texture handle type; equality identifies a texture.
pub struct QuadBatch<T> {
    vertices: Vec<QuadVertex>,
    slots: Vec<T>,
    max_quads: usize,
    max_textures: usize,
}

impl<T: Clone + PartialEq> QuadBatch<T> {
    pub fn new(white: T) -> Self {
        Self::with_capacity(white, MAX_QUADS_PER_BATCH, MAX_QUAD_TEXTURES_PER_BATCH)
    }

    /// `max_textures` counts the white slot, so it must leave room for at least one more.
    pub fn with_capacity(white: T, max_quads: usize, max_textures: usize) -> Self {
        assert!(max_quads > 0, "a quad batch needs room for at least one quad");
        assert!(max_textures >= 2, "a quad batch needs a texture slot besides white");
        let mut slots = Vec::with_capacity(max_textures);
        slots.push(white);
        Self {
            vertices: Vec::with_capacity(max_quads * 4),
            slots,
            max_quads,
            max_textures,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    #[inline]
    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }

    #[inline]
    pub fn vertices(&self) -> &[QuadVertex] {
        &self.vertices
    }

    /// Texture slots in use, slot 0 first.
    #[inline]
    pub fn slots(&self) -> &[T] {
        &self.slots
    }

    /// Appends one quad. `texture = None` uses the white fallback.
    pub fn push<F>(&mut self, quad: &Quad, texture: Option<&T>, flush: &mut F)
    where
        F: FnMut(&[QuadVertex], &[T]),
    {
        let slot = self.reserve(1, texture, flush);
        self.append(quad, slot);
    }

    /// Appends `positions.len()` axis-aligned quads sharing one texture.
    ///
    /// Runs larger than the batch capacity are split into capacity-sized chunks.
    pub fn push_many<F>(
        &mut self,
        positions: &[Vec2],
        colors: &[Vec4],
        scales: &[f32],
        texture: Option<&T>,
        flush: &mut F,
    ) where
        F: FnMut(&[QuadVertex], &[T]),
    {
        debug_assert!(positions.len() == colors.len() && positions.len() == scales.len());
        let count = positions.len().min(colors.len()).min(scales.len());

        let mut start = 0;
        while start < count {
            let chunk = (count - start).min(self.max_quads);
            let slot = self.reserve(chunk, texture, flush);
            for i in start..start + chunk {
                let quad = Quad {
                    position: positions[i],
                    color: colors[i],
                    scale: scales[i],
                    rotation: None,
                };
                self.append(&quad, slot);
            }
            start += chunk;
        }
    }

    /// Hands the pending vertices to `flush` and resets the batch. No-op when empty.
    pub fn flush<F>(&mut self, flush: &mut F)
    where
        F: FnMut(&[QuadVertex], &[T]),
    {
        if self.vertices.is_empty() {
            return;
        }
        flush(&self.vertices, &self.slots);
        self.vertices.clear();
        self.slots.truncate(1);
    }

    /// Drops the pending vertices and texture slots without drawing them.
    pub fn discard(&mut self) {
        self.vertices.clear();
        self.slots.truncate(1);
    }

    /// Makes room for `quads` quads using `texture`, flushing first if needed.
    /// Returns the texture's slot.
    fn reserve<F>(&mut self, quads: usize, texture: Option<&T>, flush: &mut F) -> f32
    where
        F: FnMut(&[QuadVertex], &[T]),
    {
        let vertices_full = self.vertices.len() + quads * 4 > self.max_quads * 4;
        let slot_missing = texture.is_some_and(|t| self.find_slot(t).is_none())
            && self.slots.len() == self.max_textures;

        if vertices_full || slot_missing {
            self.flush(flush);
        }

        let Some(texture) = texture else { return 0.0 };
        match self.find_slot(texture) {
            Some(slot) => slot as f32,
            None => {
                self.slots.push(texture.clone());
                (self.slots.len() - 1) as f32
            }
        }
    }

    fn find_slot(&self, texture: &T) -> Option<usize> {
        self.slots.iter().position(|t| t == texture)
    }

    fn append(&mut self, quad: &Quad, slot: f32) {
        let color = quad.color.to_array();
        for (corner, uv) in quad.corners().into_iter().zip(UNIT_UVS) {
            self.vertices.push(QuadVertex {
                position: corner.to_array(),
                color,
                texture_slot: slot,
                tex_coord: uv,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::vertex_stride;

    const WHITE: u32 = 0;

    fn quad_at(x: f32) -> Quad {
        Quad {
            position: Vec2::new(x, 0.0),
            color: Vec4::ONE,
            scale: 1.0,
            rotation: None,
        }
    }

    fn noop(_: &[QuadVertex], _: &[u32]) {}

    // ── layout ────────────────────────────────────────────────────────────

    #[test]
    fn declared_layouts_match_vertex_sizes() {
        assert_eq!(vertex_stride(&QuadVertex::layout()), size_of::<QuadVertex>() as u64);
        assert_eq!(vertex_stride(&FlatVertex::layout()), size_of::<FlatVertex>() as u64);
    }

    #[test]
    fn index_pattern_repeats_per_quad() {
        assert_eq!(quad_indices(2), vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
        assert_eq!(index_count_for(8), 12);
    }

    // ── geometry ──────────────────────────────────────────────────────────

    #[test]
    fn axis_aligned_quad_corners_and_uvs() {
        let mut batch = QuadBatch::new(WHITE);
        let mut sink = noop;
        let quad = Quad { position: Vec2::new(2.0, 3.0), color: Vec4::ONE, scale: 4.0, rotation: None };
        batch.push(&quad, None, &mut sink);

        let v = batch.vertices();
        assert_eq!(v[0].position, [2.0, 3.0]);
        assert_eq!(v[1].position, [2.0, 7.0]);
        assert_eq!(v[2].position, [6.0, 7.0]);
        assert_eq!(v[3].position, [6.0, 3.0]);
        assert_eq!(v.iter().map(|v| v.tex_coord).collect::<Vec<_>>(), UNIT_UVS.to_vec());
        assert!(v.iter().all(|v| v.texture_slot == 0.0));
    }

    #[test]
    fn rotated_quad_is_centered() {
        let mut batch = QuadBatch::new(WHITE);
        let mut sink = noop;
        let quad = Quad {
            position: Vec2::new(10.0, 10.0),
            color: Vec4::ONE,
            scale: 2.0,
            rotation: Some(std::f32::consts::FRAC_PI_2),
        };
        batch.push(&quad, None, &mut sink);

        let v = batch.vertices();
        // (-1,-1) rotated by 90° is (1,-1)
        assert!((v[0].position[0] - 11.0).abs() < 1e-5);
        assert!((v[0].position[1] - 9.0).abs() < 1e-5);

        let center = v.iter().fold(Vec2::ZERO, |acc, v| acc + Vec2::from(v.position)) / 4.0;
        assert!((center - Vec2::new(10.0, 10.0)).length() < 1e-5);
    }

    // ── overflow ──────────────────────────────────────────────────────────

    #[test]
    fn full_buffer_flushes_before_append_without_losing_vertices() {
        let mut batch = QuadBatch::with_capacity(WHITE, 3, 4);
        let mut flushed = Vec::new();
        let mut sink = |v: &[QuadVertex], _: &[u32]| flushed.push(v.len());

        for i in 0..10 {
            batch.push(&quad_at(i as f32), None, &mut sink);
        }
        batch.flush(&mut sink);

        assert_eq!(flushed, vec![12, 12, 12, 4]);
        assert_eq!(flushed.iter().sum::<usize>(), 4 * 10);
    }

    #[test]
    fn flush_preserves_submission_order() {
        let mut batch = QuadBatch::with_capacity(WHITE, 2, 4);
        let mut xs = Vec::new();
        let mut sink = |v: &[QuadVertex], _: &[u32]| {
            xs.extend(v.iter().step_by(4).map(|v| v.position[0]));
        };
        for i in 0..5 {
            batch.push(&quad_at(i as f32), None, &mut sink);
        }
        batch.flush(&mut sink);
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn repeated_texture_reuses_slot() {
        let mut batch = QuadBatch::with_capacity(WHITE, 100, 4);
        let mut sink = noop;

        for _ in 0..5 {
            batch.push(&quad_at(0.0), Some(&7), &mut sink);
            batch.push(&quad_at(0.0), Some(&9), &mut sink);
        }
        assert_eq!(batch.slots(), &[WHITE, 7, 9]);
        let slots: Vec<f32> = batch.vertices().iter().step_by(4).map(|v| v.texture_slot).collect();
        assert_eq!(slots, vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn exhausted_slots_flush_and_keep_white_in_slot_zero() {
        let mut batch = QuadBatch::with_capacity(WHITE, 100, 3);
        let mut flushes: Vec<Vec<u32>> = Vec::new();
        let mut sink = |_: &[QuadVertex], slots: &[u32]| flushes.push(slots.to_vec());

        batch.push(&quad_at(0.0), Some(&1), &mut sink);
        batch.push(&quad_at(0.0), Some(&2), &mut sink);
        // already present: no flush even though the table is full
        batch.push(&quad_at(0.0), Some(&1), &mut sink);
        assert_eq!(batch.quad_count(), 3);

        batch.push(&quad_at(0.0), Some(&3), &mut sink);
        assert_eq!(flushes, vec![vec![WHITE, 1, 2]]);
        assert_eq!(batch.slots(), &[WHITE, 3]);
        assert_eq!(batch.vertices()[0].texture_slot, 1.0);
    }

    #[test]
    fn smallest_slot_table_flushes_on_each_new_texture() {
        let mut batch = QuadBatch::with_capacity(WHITE, 100, 2);
        let mut flushed = 0;
        let mut sink = |_: &[QuadVertex], slots: &[u32]| {
            assert!(slots.len() <= 2);
            flushed += 1;
        };

        batch.push(&quad_at(0.0), Some(&1), &mut sink);
        batch.push(&quad_at(0.0), Some(&2), &mut sink);
        batch.push(&quad_at(0.0), None, &mut sink);
        batch.push(&quad_at(0.0), Some(&3), &mut sink);
        batch.flush(&mut sink);

        assert_eq!(flushed, 3);
        assert_eq!(batch.slots(), &[WHITE]);
    }

    #[test]
    #[should_panic(expected = "texture slot besides white")]
    fn slot_table_without_room_past_white_is_rejected() {
        let _ = QuadBatch::with_capacity(WHITE, 10, 1);
    }

    #[test]
    fn white_texture_passed_explicitly_uses_slot_zero() {
        let mut batch = QuadBatch::with_capacity(WHITE, 10, 2);
        let mut sink = noop;
        batch.push(&quad_at(0.0), Some(&WHITE), &mut sink);
        assert_eq!(batch.slots(), &[WHITE]);
        assert_eq!(batch.vertices()[0].texture_slot, 0.0);
    }

    // ── bulk ──────────────────────────────────────────────────────────────

    #[test]
    fn push_many_splits_runs_larger_than_capacity() {
        let mut batch = QuadBatch::with_capacity(WHITE, 4, 2);
        let mut flushed = Vec::new();
        let mut sink = |v: &[QuadVertex], _: &[u32]| flushed.push(v.len() / 4);

        let n = 11;
        let positions: Vec<Vec2> = (0..n).map(|i| Vec2::new(i as f32, 0.0)).collect();
        let colors = vec![Vec4::ONE; n];
        let scales = vec![1.0; n];

        batch.push(&quad_at(0.0), None, &mut sink);
        batch.push_many(&positions, &colors, &scales, Some(&5), &mut sink);
        batch.flush(&mut sink);

        assert_eq!(flushed, vec![1, 4, 4, 3]);
        assert_eq!(flushed.iter().sum::<usize>(), n + 1);
    }

    #[test]
    fn push_many_fits_in_current_batch_when_room() {
        let mut batch = QuadBatch::with_capacity(WHITE, 10, 2);
        let mut flushes = 0;
        let mut sink = |_: &[QuadVertex], _: &[u32]| flushes += 1;

        batch.push(&quad_at(0.0), None, &mut sink);
        batch.push_many(&[Vec2::ZERO; 3], &[Vec4::ONE; 3], &[1.0; 3], None, &mut sink);
        assert_eq!(flushes, 0);
        assert_eq!(batch.quad_count(), 4);
    }

    #[test]
    fn discard_drops_pending_quads_without_flushing() {
        let mut batch = QuadBatch::with_capacity(WHITE, 10, 4);
        let mut flushed = 0;
        let mut sink = |_: &[QuadVertex], _: &[u32]| flushed += 1;

        batch.push(&quad_at(0.0), Some(&5), &mut sink);
        batch.discard();
        assert!(batch.is_empty());
        assert_eq!(batch.slots(), &[WHITE]);

        batch.flush(&mut sink);
        assert_eq!(flushed, 0);
    }

    #[test]
    fn flush_on_empty_batch_is_noop() {
        let mut batch = QuadBatch::new(WHITE);
        let mut flushes = 0;
        batch.flush(&mut |_: &[QuadVertex], _: &[u32]| flushes += 1);
        assert_eq!(flushes, 0);
    }
}
