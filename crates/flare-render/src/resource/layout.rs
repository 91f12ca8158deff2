use std::borrow::Cow;

/// Scalar/vector/matrix types that can appear in vertex and uniform layouts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderVariableType {
    Int,
    UnsignedInt,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl ShaderVariableType {
    /// Tightly packed size in bytes.
    pub const fn size(self) -> u64 {
        match self {
            Self::Int | Self::UnsignedInt | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat3 => 36,
            Self::Mat4 => 64,
        }
    }

    /// std140 base alignment.
    const fn std140_align(self) -> u64 {
        match self {
            Self::Int | Self::UnsignedInt | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat3 | Self::Mat4 => 16,
        }
    }

    /// std140 size of a single (non-array) value.
    const fn std140_size(self) -> u64 {
        match self {
            // matrices are stored as arrays of vec4 columns
            Self::Mat3 => 48,
            other => other.size(),
        }
    }
}

/// One named element of a vertex or uniform layout.
///
/// `count > 1` declares a fixed-length array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutElement {
    pub name: Cow<'static, str>,
    pub semantic_index: u32,
    pub ty: ShaderVariableType,
    pub count: u32,
}

impl LayoutElement {
    pub const fn new(name: &'static str, semantic_index: u32, ty: ShaderVariableType) -> Self {
        Self {
            name: Cow::Borrowed(name),
            semantic_index,
            ty,
            count: 1,
        }
    }

    pub const fn array(name: &'static str, ty: ShaderVariableType, count: u32) -> Self {
        Self {
            name: Cow::Borrowed(name),
            semantic_index: 0,
            ty,
            count,
        }
    }
}

/// Ordered vertex attribute list. Attribute `i` binds to shader location `i`.
pub type VertexLayout = Vec<LayoutElement>;

/// Byte stride of one vertex: attributes are tightly packed.
pub fn vertex_stride(layout: &[LayoutElement]) -> u64 {
    layout.iter().map(|e| e.ty.size() * e.count.max(1) as u64).sum()
}

/// Byte size of a uniform block following std140 rules.
///
/// Arrays use a 16-byte element stride; the block size is rounded up to 16.
pub fn uniform_block_size(layout: &[LayoutElement]) -> u64 {
    let mut offset = 0u64;
    for element in layout {
        if element.count > 1 {
            let stride = align_up(element.ty.std140_size(), 16);
            offset = align_up(offset, 16) + stride * element.count as u64;
        } else {
            offset = align_up(offset, element.ty.std140_align()) + element.ty.std140_size();
        }
    }
    align_up(offset, 16)
}

#[inline]
pub(crate) const fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use ShaderVariableType as T;

    #[test]
    fn vertex_stride_is_tightly_packed() {
        let layout = vec![
            LayoutElement::new("Position", 0, T::Vec2),
            LayoutElement::new("Color", 0, T::Vec4),
            LayoutElement::new("TexSlot", 0, T::Float),
            LayoutElement::new("TexCoord", 0, T::Vec2),
        ];
        assert_eq!(vertex_stride(&layout), 36);
    }

    #[test]
    fn uniform_scalars_pack_within_vec4() {
        // vec2 @0, vec2 @8, float @16 -> 20 bytes, rounded to 32
        let layout = vec![
            LayoutElement::new("Resolution", 0, T::Vec2),
            LayoutElement::new("Direction", 0, T::Vec2),
            LayoutElement::new("Radius", 0, T::Float),
        ];
        assert_eq!(uniform_block_size(&layout), 32);
    }

    #[test]
    fn uniform_arrays_use_vec4_stride() {
        let layout = vec![
            LayoutElement::new("ViewProjection", 0, T::Mat4),
            LayoutElement::array("Intensity", T::Float, 10),
        ];
        assert_eq!(uniform_block_size(&layout), 64 + 160);
    }

    #[test]
    fn uniform_vec3_aligns_to_16() {
        let layout = vec![
            LayoutElement::new("A", 0, T::Float),
            LayoutElement::new("B", 0, T::Vec3),
        ];
        assert_eq!(uniform_block_size(&layout), 32);
    }
}
