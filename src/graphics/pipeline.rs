//! GPU color conversion pipeline.
//!
//! Compiles the YUV shader, owns the quad vertex buffer and the uniform
//! buffer, and records the draw. All binding state a draw needs travels in a
//! [`BindingContext`] built from the current texture set, so nothing depends
//! on what a previous draw left bound.

use wgpu::util::DeviceExt;

use super::projection::Projection;
use super::renderer::{RenderError, RenderResult};
use super::texture_set::GpuTextureSet;
use crate::frame::planar_buffer::Plane;

/// YUV to RGB matrix, column-major: columns multiply Y, U - 0.5 and V - 0.5.
///
/// BT.601-family coefficients for full-range Y. This is the only color
/// standard the pipeline supports.
pub const COLOR_MATRIX: [[f32; 3]; 3] = [
    [1.0, 1.0, 1.0],
    [0.0, -0.39465, 2.03211],
    [1.13983, -0.58060, 0.0],
];

/// Binding slot of the shared sampler.
const SAMPLER_BINDING: u32 = 0;
/// Binding slot of the uniform block.
const UNIFORM_BINDING: u32 = 4;

/// Binding slot the shader samples `plane` from: Y, U, V on 1, 2, 3.
pub fn plane_binding(plane: Plane) -> u32 {
    plane.index() as u32 + 1
}

/// CPU reference of the fragment shader's conversion, for 8-bit samples.
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [f32; 3] {
    let yuv = [
        y as f32 / 255.0,
        u as f32 / 255.0 - 0.5,
        v as f32 / 255.0 - 0.5,
    ];
    let mut rgb = [0.0f32; 3];
    for (channel, value) in rgb.iter_mut().enumerate() {
        let sum: f32 = (0..3).map(|col| COLOR_MATRIX[col][channel] * yuv[col]).sum();
        *value = sum.clamp(0.0, 1.0);
    }
    rgb
}

/// Vertex of the video quad.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    /// Position in world space, the quad spans -1.0 to 1.0
    position: [f32; 2],
    /// Texture coordinates, row 0 of the image at v = 0.0
    texture_coords: [f32; 2],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Triangle strip covering the quad.
const QUAD: [Vertex; 4] = [
    Vertex {
        position: [-1.0, -1.0],
        texture_coords: [0.0, 1.0],
    },
    Vertex {
        position: [1.0, -1.0],
        texture_coords: [1.0, 1.0],
    },
    Vertex {
        position: [-1.0, 1.0],
        texture_coords: [0.0, 0.0],
    },
    Vertex {
        position: [1.0, 1.0],
        texture_coords: [1.0, 0.0],
    },
];

/// GPU uniform block matching `Uniforms` in `yuv_shader.wgsl`.
///
/// The 3x3 color matrix is stored as three vec4 columns to follow the
/// uniform address space layout.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Uniforms {
    world: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
    color_matrix: [[f32; 4]; 3],
}

impl Uniforms {
    pub fn new(projection: &Projection) -> Self {
        let mut color_matrix = [[0.0f32; 4]; 3];
        for (padded, column) in color_matrix.iter_mut().zip(COLOR_MATRIX.iter()) {
            padded[..3].copy_from_slice(column);
        }

        Self {
            world: projection.world.into(),
            view: projection.view.into(),
            projection: projection.projection.into(),
            color_matrix,
        }
    }
}

/// Everything a draw binds: sampler, the three plane textures and the
/// uniform block. Rebuilt whenever the texture set reallocates.
#[derive(Debug)]
pub struct BindingContext {
    bind_group: wgpu::BindGroup,
    texture_generation: u64,
}

impl BindingContext {
    /// Whether this context still points at the textures of `textures`.
    pub fn is_current(&self, textures: &GpuTextureSet) -> bool {
        self.texture_generation == textures.generation()
    }
}

/// Compiled YUV to RGB program plus its fixed buffers.
#[derive(Debug)]
pub struct ConversionPipeline {
    render_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
}

impl ConversionPipeline {
    /// Compiles and links the shader for `format` render targets.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::GpuInitError` if shader compilation or pipeline
    /// creation reports a validation error.
    pub fn initialize(device: &wgpu::Device, format: wgpu::TextureFormat) -> RenderResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("YUV shader"),
            source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(include_str!(
                "../shaders/yuv_shader.wgsl"
            ))),
        });

        let texture_entry = |plane: Plane| wgpu::BindGroupLayoutEntry {
            binding: plane_binding(plane),
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("YUV bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: SAMPLER_BINDING,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(Plane::Y),
                texture_entry(Plane::U),
                texture_entry(Plane::V),
                wgpu::BindGroupLayoutEntry {
                    binding: UNIFORM_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("YUV pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("YUV render pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader_module,
                entry_point: Some("vs_main"),
                buffers: &[Vertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            log::error!("ConversionPipeline::initialize: {error}");
            return Err(RenderError::GpuInitError(error.to_string()));
        }

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("YUV quad vertices"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("YUV uniforms"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        log::info!("ConversionPipeline::initialize: pipeline ready for {format:?}");

        Ok(Self {
            render_pipeline,
            bind_group_layout,
            vertex_buffer,
            uniform_buffer,
        })
    }

    /// Builds the binding context for the textures currently in `textures`.
    pub fn bind(&self, device: &wgpu::Device, textures: &GpuTextureSet) -> BindingContext {
        let texture_entry = |plane: Plane| wgpu::BindGroupEntry {
            binding: plane_binding(plane),
            resource: wgpu::BindingResource::TextureView(textures.view(plane)),
        };

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("YUV bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: SAMPLER_BINDING,
                    resource: wgpu::BindingResource::Sampler(textures.sampler()),
                },
                texture_entry(Plane::Y),
                texture_entry(Plane::U),
                texture_entry(Plane::V),
                wgpu::BindGroupEntry {
                    binding: UNIFORM_BINDING,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        BindingContext {
            bind_group,
            texture_generation: textures.generation(),
        }
    }

    /// Uploads the matrices for the next draw.
    pub fn write_uniforms(&self, queue: &wgpu::Queue, uniforms: &Uniforms) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    /// Records the quad draw into `render_pass`.
    pub fn draw(&self, render_pass: &mut wgpu::RenderPass<'_>, bindings: &BindingContext) {
        render_pass.set_pipeline(&self.render_pipeline);
        render_pass.set_bind_group(0, &bindings.bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.draw(0..QUAD.len() as u32, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::planar_buffer::{rgb_to_yuv, BARS};
    use crate::graphics::projection::recompute;

    fn assert_close(actual: [f32; 3], expected: [f32; 3], tolerance: f32) {
        for channel in 0..3 {
            assert!(
                (actual[channel] - expected[channel]).abs() <= tolerance,
                "channel {channel}: {actual:?} vs {expected:?}"
            );
        }
    }

    #[test]
    fn test_neutral_chroma_is_gray() {
        for y in [0u8, 64, 128, 255] {
            let level = y as f32 / 255.0;
            assert_close(yuv_to_rgb(y, 128, 128), [level; 3], 0.005);
        }
    }

    #[test]
    fn test_matrix_inverts_bar_colors() {
        for (r, g, b) in BARS {
            let (y, u, v) = rgb_to_yuv(r, g, b);
            let expected = [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0];
            assert_close(yuv_to_rgb(y, u, v), expected, 0.02);
        }
    }

    #[test]
    fn test_output_is_clamped() {
        let rgb = yuv_to_rgb(255, 255, 255);
        assert!(rgb.iter().all(|c| (0.0..=1.0).contains(c)));
        let rgb = yuv_to_rgb(0, 0, 0);
        assert!(rgb.iter().all(|c| (0.0..=1.0).contains(c)));
    }

    #[test]
    fn test_uniform_layout() {
        // Three mat4x4 plus a mat3x3 padded to vec4 columns
        assert_eq!(std::mem::size_of::<Uniforms>(), 3 * 64 + 48);
        assert_eq!(std::mem::size_of::<Uniforms>() % 16, 0);

        let uniforms = Uniforms::new(&recompute(800, 600, 640, 480));
        assert_eq!(uniforms.color_matrix[2], [1.13983, -0.58060, 0.0, 0.0]);
        assert_eq!(uniforms.world[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_plane_bindings_follow_sampler() {
        assert_eq!(plane_binding(Plane::Y), 1);
        assert_eq!(plane_binding(Plane::U), 2);
        assert_eq!(plane_binding(Plane::V), 3);
    }

    #[test]
    fn test_quad_is_triangle_strip_over_full_texture() {
        assert_eq!(QUAD.len(), 4);
        // Top of the quad samples the first image row
        assert_eq!(QUAD[2].position, [-1.0, 1.0]);
        assert_eq!(QUAD[2].texture_coords, [0.0, 0.0]);
        assert_eq!(Vertex::layout().array_stride, 16);
    }
}
