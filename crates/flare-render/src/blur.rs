//! Two-pass separable Gaussian blur.
//!
//! The scene target is blurred horizontally into an auxiliary frame buffer, then
//! vertically back into the target. Both passes run with Screen blending on a
//! cleared destination, so each pass writes the filtered value unchanged.

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};

use crate::api::{DrawCall, DrawRange, Primitive, RenderTarget, RendererApi, RenderingBlendMode, RenderingStage};
use crate::coords::Rectangle;
use crate::error::Result;
use crate::frame::FRAME_UNIFORM_SLOT;
use crate::resource::{
    FrameBuffer, LayoutElement, ShaderProgram, ShaderVariableType, TextureSource, UniformBuffer,
    VertexBuffer, VertexLayout,
};

/// Taps on each side of the center sample.
pub const BLUR_HALF_TAPS: i32 = 6;
pub const BLUR_SIGMA: f32 = 2.0;

/// Uniform slot of [`BlurUniforms`] in the blur program.
pub const BLUR_UNIFORM_SLOT: u32 = 1;

// ── uniforms ──────────────────────────────────────────────────────────────

/// Blur parameters. Offsets: resolution 0, direction 8, radius 16.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct BlurUniforms {
    pub resolution: [f32; 2],
    pub direction: [f32; 2],
    pub radius: f32,
    pub _pad: [f32; 3],
}

const _: () = {
    assert!(offset_of!(BlurUniforms, resolution) == 0);
    assert!(offset_of!(BlurUniforms, direction) == 8);
    assert!(offset_of!(BlurUniforms, radius) == 16);
    assert!(size_of::<BlurUniforms>() == 32);
};

impl BlurUniforms {
    pub fn new(size: [u32; 2], direction: [f32; 2], radius: f32) -> Self {
        Self {
            resolution: [size[0] as f32, size[1] as f32],
            direction,
            radius,
            _pad: [0.0; 3],
        }
    }

    pub fn layout() -> Vec<LayoutElement> {
        use ShaderVariableType as T;
        vec![
            LayoutElement::new("Resolution", 0, T::Vec2),
            LayoutElement::new("Direction", 0, T::Vec2),
            LayoutElement::new("Radius", 0, T::Float),
        ]
    }
}

/// Normalized kernel weights for taps `-BLUR_HALF_TAPS..=BLUR_HALF_TAPS`.
pub fn gaussian_weights() -> [f32; (2 * BLUR_HALF_TAPS + 1) as usize] {
    let mut weights = [0.0; (2 * BLUR_HALF_TAPS + 1) as usize];
    let denom = 2.0 * BLUR_SIGMA * BLUR_SIGMA;
    for (w, i) in weights.iter_mut().zip(-BLUR_HALF_TAPS..=BLUR_HALF_TAPS) {
        *w = (-((i * i) as f32) / denom).exp();
    }
    let sum: f32 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= sum);
    weights
}

// ── full-screen quad ──────────────────────────────────────────────────────

/// Position plus texture coordinate. Used by the image and blur programs.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct ImageVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

impl ImageVertex {
    pub fn layout() -> VertexLayout {
        vec![
            LayoutElement::new("POSITION", 0, ShaderVariableType::Vec2),
            LayoutElement::new("TEXCOORD", 0, ShaderVariableType::Vec2),
        ]
    }
}

/// Two triangles covering clip space. UV origin is the top-left of the image.
pub const FULLSCREEN_QUAD: [ImageVertex; 6] = {
    const fn v(x: f32, y: f32, u: f32, w: f32) -> ImageVertex {
        ImageVertex { position: [x, y], uv: [u, w] }
    }
    [
        v(-1.0, 1.0, 0.0, 0.0),
        v(-1.0, -1.0, 0.0, 1.0),
        v(1.0, -1.0, 1.0, 1.0),
        v(-1.0, 1.0, 0.0, 0.0),
        v(1.0, -1.0, 1.0, 1.0),
        v(1.0, 1.0, 1.0, 0.0),
    ]
};

// ── pass ──────────────────────────────────────────────────────────────────

/// Blur resources owned by the renderer thread.
pub struct BlurPass {
    aux: FrameBuffer,
    quad: VertexBuffer,
    uniforms: UniformBuffer,
    shader: ShaderProgram,
}

impl BlurPass {
    pub(crate) fn new(
        aux: FrameBuffer,
        quad: VertexBuffer,
        uniforms: UniformBuffer,
        shader: ShaderProgram,
    ) -> Self {
        Self { aux, quad, uniforms, shader }
    }

    pub fn aux(&self) -> &FrameBuffer {
        &self.aux
    }

    /// Vertex buffer holding [`FULLSCREEN_QUAD`].
    pub fn quad(&self) -> &VertexBuffer {
        &self.quad
    }

    /// Blurs `target` in place. Returns the number of draw calls issued.
    ///
    /// Viewport, scissor, blend mode and render target are restored afterwards,
    /// also when a pass fails.
    pub fn apply(
        &mut self,
        api: &mut dyn RendererApi,
        target: &FrameBuffer,
        radius: f32,
        frame_uniforms: &UniformBuffer,
    ) -> Result<u32> {
        let size = target.info().size();
        if size[0] == 0 || size[1] == 0 {
            return Ok(0);
        }

        let viewport = api.viewport();
        let scissor = api.scissor();
        let blend = api.blend_mode();
        let render_target = api.render_target();

        api.set_blend_mode(RenderingBlendMode::Screen);
        api.set_viewport(Rectangle::full(size));
        api.set_scissor(None);

        let result = self.passes(api, target, size, radius, frame_uniforms);

        api.set_blend_mode(blend);
        api.set_viewport(viewport);
        api.set_scissor(scissor);
        let restored = match render_target {
            RenderTarget::Window => {
                api.set_render_target_window();
                Ok(())
            }
            RenderTarget::FrameBuffer(id) => api.set_render_target_frame_buffer(id),
        };

        result.and_then(|draws| restored.map(|()| draws))
    }

    fn passes(
        &mut self,
        api: &mut dyn RendererApi,
        target: &FrameBuffer,
        size: [u32; 2],
        radius: f32,
        frame_uniforms: &UniformBuffer,
    ) -> Result<u32> {
        let shader = self.shader.id();

        if self.aux.info().size() != size {
            api.resize_frame_buffer(self.aux.id(), size)?;
            self.aux.info().set_size(size);
            self.aux.set_gpu_bytes(size[0] as u64 * size[1] as u64 * 4);
        }

        api.bind_uniform_buffer(shader, frame_uniforms.id(), FRAME_UNIFORM_SLOT, RenderingStage::VertexShader)?;
        api.bind_uniform_buffer(shader, self.uniforms.id(), BLUR_UNIFORM_SLOT, RenderingStage::FragmentShader)?;

        let call = DrawCall {
            shader,
            primitive: Primitive::Triangles,
            vertex_buffer: self.quad.id(),
            range: DrawRange::Vertices(FULLSCREEN_QUAD.len() as u32),
        };

        // horizontal: target -> aux
        let horizontal = BlurUniforms::new(size, [1.0, 0.0], radius);
        api.update_uniform_buffer(self.uniforms.id(), bytemuck::bytes_of(&horizontal))?;
        api.set_render_target_frame_buffer(self.aux.id())?;
        api.clear_screen()?;
        api.bind_texture(shader, TextureSource::from(target), 0, RenderingStage::FragmentShader)?;
        api.draw(&call)?;

        // vertical: aux -> target
        let vertical = BlurUniforms::new(size, [0.0, 1.0], radius);
        api.update_uniform_buffer(self.uniforms.id(), bytemuck::bytes_of(&vertical))?;
        api.set_render_target_frame_buffer(target.id())?;
        api.clear_screen()?;
        api.bind_texture(shader, TextureSource::from(&self.aux), 0, RenderingStage::FragmentShader)?;
        api.draw(&call)?;

        Ok(2)
    }
}
