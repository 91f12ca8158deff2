//! Render pipeline construction and caching.

use std::collections::HashMap;

use crate::api::{Primitive, RenderingBlendMode};
use crate::error::{RendererError, Result};
use crate::resource::{vertex_stride, ResourceId, ShaderVariableType, VertexLayout};

// ── blend ─────────────────────────────────────────────────────────────────

fn component(src: wgpu::BlendFactor, dst: wgpu::BlendFactor) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: src,
        dst_factor: dst,
        operation: wgpu::BlendOperation::Add,
    }
}

pub(super) fn blend_state(mode: RenderingBlendMode) -> wgpu::BlendState {
    use wgpu::BlendFactor as F;
    match mode {
        RenderingBlendMode::Additive => wgpu::BlendState {
            color: component(F::SrcAlpha, F::One),
            alpha: component(F::One, F::One),
        },
        RenderingBlendMode::Screen => wgpu::BlendState {
            color: component(F::One, F::OneMinusSrc),
            alpha: component(F::One, F::OneMinusSrcAlpha),
        },
        RenderingBlendMode::Overlay | RenderingBlendMode::NotSpecified => wgpu::BlendState {
            color: component(F::SrcAlpha, F::OneMinusSrcAlpha),
            alpha: component(F::One, F::OneMinusSrcAlpha),
        },
    }
}

pub(super) fn topology(primitive: Primitive) -> wgpu::PrimitiveTopology {
    match primitive {
        // fans are expanded to lists before drawing
        Primitive::Triangles | Primitive::TriangleFan => wgpu::PrimitiveTopology::TriangleList,
        Primitive::Lines => wgpu::PrimitiveTopology::LineList,
    }
}

// ── vertex layout ─────────────────────────────────────────────────────────

fn vertex_format(ty: ShaderVariableType) -> Option<wgpu::VertexFormat> {
    Some(match ty {
        ShaderVariableType::Int => wgpu::VertexFormat::Sint32,
        ShaderVariableType::UnsignedInt => wgpu::VertexFormat::Uint32,
        ShaderVariableType::Float => wgpu::VertexFormat::Float32,
        ShaderVariableType::Vec2 => wgpu::VertexFormat::Float32x2,
        ShaderVariableType::Vec3 => wgpu::VertexFormat::Float32x3,
        ShaderVariableType::Vec4 => wgpu::VertexFormat::Float32x4,
        ShaderVariableType::Mat3 | ShaderVariableType::Mat4 => return None,
    })
}

/// Attribute list for `layout`: element `i` (and each array entry) takes the next
/// shader location, tightly packed.
pub(super) fn vertex_attributes(layout: &VertexLayout) -> Result<Vec<wgpu::VertexAttribute>> {
    let mut attributes = Vec::with_capacity(layout.len());
    let mut offset = 0u64;
    for element in layout {
        let format = vertex_format(element.ty).ok_or_else(|| {
            RendererError::invalid(format!(
                "vertex attribute `{}` has unsupported type {:?}",
                element.name, element.ty
            ))
        })?;
        for _ in 0..element.count.max(1) {
            attributes.push(wgpu::VertexAttribute {
                format,
                offset,
                shader_location: attributes.len() as u32,
            });
            offset += element.ty.size();
        }
    }
    Ok(attributes)
}

// ── cache ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub shader: ResourceId,
    pub topology: wgpu::PrimitiveTopology,
    pub blend: RenderingBlendMode,
    pub format: wgpu::TextureFormat,
    pub layout: VertexLayout,
}

/// Shader stages and pipeline layout a pipeline is built from.
pub(super) struct PipelineSource<'a> {
    pub name: &'a str,
    pub vertex: &'a wgpu::ShaderModule,
    pub fragment: &'a wgpu::ShaderModule,
    pub layout: &'a wgpu::PipelineLayout,
}

#[derive(Default)]
pub(super) struct PipelineCache {
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    /// Builds the pipeline for `key` unless it is cached.
    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        key: &PipelineKey,
        source: PipelineSource<'_>,
    ) -> Result<()> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let pipeline = build(device, key, &source)?;
        log::debug!(
            "pipeline created: `{}` {:?} {:?} {:?}",
            source.name,
            key.topology,
            key.blend,
            key.format
        );
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    pub fn get(&self, key: &PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(key)
    }

    /// Drops every pipeline built from `shader`.
    pub fn evict_shader(&mut self, shader: ResourceId) {
        self.pipelines.retain(|k, _| k.shader != shader);
    }
}

fn build(
    device: &wgpu::Device,
    key: &PipelineKey,
    source: &PipelineSource<'_>,
) -> Result<wgpu::RenderPipeline> {
    let attributes = vertex_attributes(&key.layout)?;
    let label = format!("flare {} pipeline", source.name);

    Ok(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&label),
        layout: Some(source.layout),

        vertex: wgpu::VertexState {
            module: source.vertex,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: vertex_stride(&key.layout),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }],
        },

        fragment: Some(wgpu::FragmentState {
            module: source.fragment,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: key.format,
                blend: Some(blend_state(key.blend)),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),

        primitive: wgpu::PrimitiveState {
            topology: key.topology,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },

        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::QuadVertex;
    use crate::resource::LayoutElement;

    #[test]
    fn quad_vertex_attributes_are_packed_in_order() {
        let attrs = vertex_attributes(&QuadVertex::layout()).unwrap();
        let offsets: Vec<u64> = attrs.iter().map(|a| a.offset).collect();
        let locations: Vec<u32> = attrs.iter().map(|a| a.shader_location).collect();
        assert_eq!(offsets, vec![0, 8, 24, 28]);
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(attrs[2].format, wgpu::VertexFormat::Float32);
    }

    #[test]
    fn array_elements_take_consecutive_locations() {
        let layout = vec![LayoutElement::array("W", ShaderVariableType::Vec2, 3)];
        let attrs = vertex_attributes(&layout).unwrap();
        assert_eq!(attrs.iter().map(|a| a.offset).collect::<Vec<_>>(), vec![0, 8, 16]);
    }

    #[test]
    fn matrix_attributes_are_rejected() {
        let layout = vec![LayoutElement::new("M", 0, ShaderVariableType::Mat4)];
        assert!(vertex_attributes(&layout).is_err());
    }

    #[test]
    fn screen_blend_uses_one_minus_src_color() {
        let b = blend_state(RenderingBlendMode::Screen);
        assert_eq!(b.color.dst_factor, wgpu::BlendFactor::OneMinusSrc);
        assert_eq!(topology(Primitive::TriangleFan), wgpu::PrimitiveTopology::TriangleList);
    }
}
