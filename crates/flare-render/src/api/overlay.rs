use bytemuck::{Pod, Zeroable};

use crate::coords::Rectangle;
use crate::resource::TextureSource;

/// UI overlay vertex in display pixels.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct OverlayVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

/// One textured, clipped index range.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayCommand {
    pub index_offset: u32,
    pub index_count: u32,
    /// `None` samples the white fallback texture.
    pub texture: Option<TextureSource>,
    pub clip: Rectangle,
}

/// Owned UI overlay draw list.
///
/// Submitted by value so the renderer thread never reads caller memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayDrawData {
    /// Size of the UI's coordinate space in pixels. Mapped onto the window surface.
    pub display_size: [f32; 2],
    pub vertices: Vec<OverlayVertex>,
    pub indices: Vec<u32>,
    pub commands: Vec<OverlayCommand>,
}

impl OverlayDrawData {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() || self.indices.is_empty()
    }

    /// Appends an axis-aligned, untextured rectangle as its own command.
    pub fn push_rect(&mut self, rect: Rectangle, color: [f32; 4]) {
        let base = self.vertices.len() as u32;
        let (x0, y0) = (rect.x as f32, rect.y as f32);
        let (x1, y1) = (x0 + rect.width as f32, y0 + rect.height as f32);

        for (position, uv) in [
            ([x0, y0], [0.0, 0.0]),
            ([x0, y1], [0.0, 1.0]),
            ([x1, y1], [1.0, 1.0]),
            ([x1, y0], [1.0, 0.0]),
        ] {
            self.vertices.push(OverlayVertex { position, uv, color });
        }

        let index_offset = self.indices.len() as u32;
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        self.commands.push(OverlayCommand {
            index_offset,
            index_count: 6,
            texture: None,
            clip: rect,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rect_appends_quad_and_command() {
        let mut data = OverlayDrawData::default();
        data.push_rect(Rectangle::new(0, 0, 4, 4), [1.0; 4]);
        data.push_rect(Rectangle::new(4, 4, 2, 2), [1.0; 4]);

        assert_eq!(data.vertices.len(), 8);
        assert_eq!(data.indices[6..], [4, 5, 6, 4, 6, 7]);
        assert_eq!(data.commands[1].index_offset, 6);
        assert!(!data.is_empty());
    }
}
