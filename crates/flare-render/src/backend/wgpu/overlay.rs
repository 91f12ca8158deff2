use bytemuck::{Pod, Zeroable};

use crate::api::{OverlayDrawData, OverlayVertex, RenderingBlendMode};
use crate::coords::Rectangle;

use super::pipeline::blend_state;

/// Destination of an overlay pass.
pub(super) struct OverlayTarget<'a> {
    pub view: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub size: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct DisplayUniform {
    size: [f32; 2],
    _pad: [f32; 2],
}

const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
    0 => Float32x2, // position
    1 => Float32x2, // uv
    2 => Float32x4  // color
];

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: size_of::<OverlayVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRS,
    }
}

/// UI overlay renderer.
///
/// Geometry arrives in display pixels and is mapped onto the window surface in the
/// vertex shader. Each command gets its own texture bind group and scissor.
#[derive(Default)]
pub(super) struct OverlayRenderer {
    pipeline_format: Option<wgpu::TextureFormat>,
    pipeline: Option<wgpu::RenderPipeline>,

    display_layout: Option<wgpu::BindGroupLayout>,
    texture_layout: Option<wgpu::BindGroupLayout>,
    display_bind_group: Option<wgpu::BindGroup>,
    display_ubo: Option<wgpu::Buffer>,

    vbo: Option<wgpu::Buffer>,
    vbo_capacity: usize,
    ibo: Option<wgpu::Buffer>,
    ibo_capacity: usize,
}

impl OverlayRenderer {
    /// Records `data` into `encoder`. `views` holds the resolved texture of each
    /// command, in command order.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: OverlayTarget<'_>,
        sampler: &wgpu::Sampler,
        data: &OverlayDrawData,
        views: &[&wgpu::TextureView],
    ) {
        if data.is_empty() {
            return;
        }

        self.ensure_pipeline(device, target.format);
        self.ensure_bindings(device);
        self.ensure_capacity(device, data.vertices.len(), data.indices.len());

        let (Some(vbo), Some(ibo), Some(ubo)) = (&self.vbo, &self.ibo, &self.display_ubo) else {
            return;
        };

        let display = DisplayUniform {
            size: [data.display_size[0].max(1.0), data.display_size[1].max(1.0)],
            _pad: [0.0; 2],
        };
        queue.write_buffer(ubo, 0, bytemuck::bytes_of(&display));
        queue.write_buffer(vbo, 0, bytemuck::cast_slice(&data.vertices));
        queue.write_buffer(ibo, 0, bytemuck::cast_slice(&data.indices));

        let (Some(pipeline), Some(display_group), Some(texture_layout)) =
            (&self.pipeline, &self.display_bind_group, &self.texture_layout)
        else {
            return;
        };

        let texture_groups: Vec<wgpu::BindGroup> = views
            .iter()
            .map(|view| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("flare overlay texture bind group"),
                    layout: texture_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                    ],
                })
            })
            .collect();

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("flare overlay pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, display_group, &[]);
        rpass.set_vertex_buffer(0, vbo.slice(..));
        rpass.set_index_buffer(ibo.slice(..), wgpu::IndexFormat::Uint32);

        let index_total = data.indices.len() as u32;
        for (cmd, group) in data.commands.iter().zip(&texture_groups) {
            let start = cmd.index_offset.min(index_total);
            let end = cmd.index_offset.saturating_add(cmd.index_count).min(index_total);
            if start == end {
                continue;
            }
            let Some(clip) = scaled_clip(cmd.clip, display.size, target.size) else {
                continue;
            };
            rpass.set_scissor_rect(clip.x as u32, clip.y as u32, clip.width, clip.height);
            rpass.set_bind_group(1, group, &[]);
            rpass.draw_indexed(start..end, 0, 0..1);
        }
    }

    fn ensure_pipeline(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) {
        if self.pipeline_format == Some(format) && self.pipeline.is_some() {
            return;
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("flare overlay shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("overlay.wgsl").into()),
        });

        let display_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("flare overlay display bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(size_of::<DisplayUniform>() as u64),
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("flare overlay texture bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("flare overlay pipeline layout"),
            bind_group_layouts: &[&display_layout, &texture_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("flare overlay pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(blend_state(RenderingBlendMode::Overlay)),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
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
        });

        self.pipeline_format = Some(format);
        self.pipeline = Some(pipeline);
        self.display_layout = Some(display_layout);
        self.texture_layout = Some(texture_layout);

        self.display_bind_group = None;
        self.display_ubo = None;
    }

    fn ensure_bindings(&mut self, device: &wgpu::Device) {
        if self.display_bind_group.is_some() && self.display_ubo.is_some() {
            return;
        }
        let Some(layout) = self.display_layout.as_ref() else { return };

        let ubo = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("flare overlay display ubo"),
            size: size_of::<DisplayUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("flare overlay display bind group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: ubo.as_entire_binding(),
            }],
        });

        self.display_ubo = Some(ubo);
        self.display_bind_group = Some(bind_group);
    }

    fn ensure_capacity(&mut self, device: &wgpu::Device, vertices: usize, indices: usize) {
        if vertices > self.vbo_capacity || self.vbo.is_none() {
            let cap = vertices.next_power_of_two().max(256);
            self.vbo = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("flare overlay vbo"),
                size: (cap * size_of::<OverlayVertex>()) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.vbo_capacity = cap;
        }

        if indices > self.ibo_capacity || self.ibo.is_none() {
            let cap = indices.next_power_of_two().max(512);
            self.ibo = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("flare overlay ibo"),
                size: (cap * size_of::<u32>()) as u64,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.ibo_capacity = cap;
        }
    }
}

/// Maps a clip rectangle from display pixels onto the target, clamped to its bounds.
pub(super) fn scaled_clip(clip: Rectangle, display: [f32; 2], target: [u32; 2]) -> Option<Rectangle> {
    let sx = target[0] as f32 / display[0].max(1.0);
    let sy = target[1] as f32 / display[1].max(1.0);
    let x0 = (clip.x as f32 * sx).floor() as i32;
    let y0 = (clip.y as f32 * sy).floor() as i32;
    let x1 = ((clip.x as f32 + clip.width as f32) * sx).ceil() as i32;
    let y1 = ((clip.y as f32 + clip.height as f32) * sy).ceil() as i32;
    Rectangle::new(x0, y0, (x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32)
        .clamp_to(target)
        .filter(|r| !r.is_empty())
}
