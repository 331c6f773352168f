//! Offscreen wgpu implementation of [`Rasterizer`].
//!
//! Renders into an RGBA8 texture with alpha blending enabled, one pipeline
//! per installed program. Clears are deferred and folded into the load op of
//! the next draw, and readback goes through a padded staging buffer.

use super::{GpuContext, LinkedProgram, ProgramId, Rasterizer, UniformHandle, UniformValue, UNIFORM_BLOCK_SIZE};
use crate::error::{FilterError, Result};
use crate::frame::{Frame, MeshVertex, RowOrder};
use anyhow::anyhow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use wgpu::util::DeviceExt;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub struct WgpuRasterizer {
    ctx: Arc<GpuContext>,
    width: u32,
    height: u32,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    // Staging buffer for CPU readback
    staging_buffer: wgpu::Buffer,
    aligned_bytes_per_row: u32,
    mesh_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    uniforms: [u8; UNIFORM_BLOCK_SIZE],
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    bind_group: wgpu::BindGroup,
    programs: HashMap<ProgramId, wgpu::RenderPipeline>,
    next_id: u64,
    bound: Option<ProgramId>,
    pending_clear: Option<wgpu::Color>,
}

impl WgpuRasterizer {
    /// Create a rasterizer of the given size on an existing context.
    pub fn new(ctx: Arc<GpuContext>, width: u32, height: u32) -> Self {
        let device = &ctx.device;

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Filter Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        // Align to 256 bytes for COPY_BYTES_PER_ROW_ALIGNMENT
        let aligned_bytes_per_row = (width * 4 + 255) & !255;
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Filter Staging Buffer"),
            size: (aligned_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mesh_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Filter Mesh"),
            contents: bytemuck::cast_slice(&MeshVertex::quad()),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Filter Uniforms"),
            size: UNIFORM_BLOCK_SIZE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Filter Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(UNIFORM_BLOCK_SIZE as u64),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Filter Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Emote Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // Until an image is uploaded the sampler reads one transparent texel.
        let placeholder = image::RgbaImage::new(1, 1);
        let bind_group = Self::create_image_bind_group(
            &ctx,
            &bind_group_layout,
            &uniform_buffer,
            &sampler,
            &placeholder,
        );

        Self {
            ctx,
            width,
            height,
            target,
            target_view,
            staging_buffer,
            aligned_bytes_per_row,
            mesh_buffer,
            uniform_buffer,
            uniforms: [0; UNIFORM_BLOCK_SIZE],
            bind_group_layout,
            pipeline_layout,
            sampler,
            bind_group,
            programs: HashMap::new(),
            next_id: 1,
            bound: None,
            pending_clear: None,
        }
    }

    fn create_image_bind_group(
        ctx: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        uniform_buffer: &wgpu::Buffer,
        sampler: &wgpu::Sampler,
        image: &image::RgbaImage,
    ) -> wgpu::BindGroup {
        let (width, height) = image.dimensions();
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        };
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Emote Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if width > 0 && height > 0 {
            ctx.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                image.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                size,
            );
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Filter Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    fn create_pipeline(&self, program: &LinkedProgram) -> wgpu::RenderPipeline {
        let device = &self.ctx.device;
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} Vertex", program.filter)),
            source: wgpu::ShaderSource::Wgsl(program.vertex_wgsl.as_str().into()),
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} Fragment", program.filter)),
            source: wgpu::ShaderSource::Wgsl(program.fragment_wgsl.as_str().into()),
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{} Pipeline", program.filter)),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: Some(program.vertex_entry.as_str()),
                buffers: &[MeshVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: Some(program.fragment_entry.as_str()),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }
}

impl Rasterizer for WgpuRasterizer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::TopDown
    }

    fn create_program(&mut self, program: &LinkedProgram) -> Result<ProgramId> {
        if program.vertex_wgsl.is_empty() || program.fragment_wgsl.is_empty() {
            return Err(FilterError::ShaderLinkError {
                filter: program.filter.clone(),
                log: "missing stage source".to_string(),
            });
        }
        let pipeline = self.create_pipeline(program);
        let id = ProgramId(self.next_id);
        self.next_id += 1;
        self.programs.insert(id, pipeline);
        debug!("Created pipeline {:?} for {}", id, program.filter);
        Ok(id)
    }

    fn delete_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
        if self.bound == Some(id) {
            self.bound = None;
        }
    }

    fn use_program(&mut self, id: ProgramId) -> anyhow::Result<()> {
        if !self.programs.contains_key(&id) {
            return Err(anyhow!("program {:?} does not exist", id));
        }
        self.bound = Some(id);
        Ok(())
    }

    fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn set_uniform(&mut self, handle: UniformHandle, value: UniformValue) {
        value.write_into(handle, &mut self.uniforms);
    }

    fn upload_image(&mut self, image: &image::RgbaImage) -> anyhow::Result<()> {
        self.bind_group = Self::create_image_bind_group(
            &self.ctx,
            &self.bind_group_layout,
            &self.uniform_buffer,
            &self.sampler,
            image,
        );
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.pending_clear = Some(wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        });
    }

    fn draw_quad(&mut self) -> anyhow::Result<()> {
        let id = self.bound.ok_or_else(|| anyhow!("no program bound"))?;
        let pipeline = self
            .programs
            .get(&id)
            .ok_or_else(|| anyhow!("program {:?} does not exist", id))?;

        self.ctx.queue.write_buffer(&self.uniform_buffer, 0, &self.uniforms);

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Filter Encoder"),
        });
        {
            let load = match self.pending_clear.take() {
                Some(color) => wgpu::LoadOp::Clear(color),
                None => wgpu::LoadOp::Load,
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Filter Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &self.bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.mesh_buffer.slice(..));
            render_pass.draw(0..MeshVertex::COUNT as u32, 0..1);
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self) -> anyhow::Result<Frame> {
        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Filter Copy Encoder"),
        });

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.aligned_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        let submission_index = self.ctx.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = self.staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.ctx
            .device
            .poll(wgpu::PollType::Wait {
                timeout: None,
                submission_index: Some(submission_index),
            })
            .map_err(|e| anyhow!("GPU poll failed: {}", e))?;
        rx.recv()
            .map_err(|_| anyhow!("readback callback dropped"))?
            .map_err(|e| anyhow!("readback mapping failed: {}", e))?;

        let data = buffer_slice.get_mapped_range();

        // Remove padding from rows
        let row_bytes = (self.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height {
            let start = (y * self.aligned_bytes_per_row) as usize;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }

        drop(data);
        self.staging_buffer.unmap();

        Frame::from_data(self.width, self.height, RowOrder::TopDown, pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters;
    use crate::shader::{load_program, AttributeBindings};

    fn test_image() -> image::RgbaImage {
        image::RgbaImage::from_fn(16, 16, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                image::Rgba([200, 40, 40, 255])
            } else {
                image::Rgba([40, 40, 200, 255])
            }
        })
    }

    fn differing_pixels(a: &Frame, b: &Frame) -> usize {
        a.data
            .chunks_exact(4)
            .zip(b.data.chunks_exact(4))
            .filter(|(p, q)| p.iter().zip(q.iter()).any(|(x, y)| x.abs_diff(*y) > 2))
            .count()
    }

    #[test]
    fn test_readback_matches_clear_color() {
        let Some(ctx) = GpuContext::headless() else {
            eprintln!("skipping test_readback_matches_clear_color: no GPU adapter");
            return;
        };
        let mut rasterizer = WgpuRasterizer::new(ctx, 20, 10);
        let program = load_program(&mut rasterizer, filters::lookup("Hop").unwrap(), &AttributeBindings::mesh()).unwrap();
        rasterizer.upload_image(&image::RgbaImage::new(4, 4)).unwrap();
        program.draw_at(&mut rasterizer, 0.0).unwrap();
        let frame = rasterizer.read_pixels().unwrap();

        assert_eq!(frame.rows, RowOrder::TopDown);
        assert_eq!(frame.data.len(), 20 * 10 * 4);
        // A fully transparent image leaves the green screen untouched.
        assert_eq!(frame.pixel(0, 0), [0, 255, 0, 255]);
        assert_eq!(frame.pixel(19, 9), [0, 255, 0, 255]);
    }

    #[test]
    fn test_filters_repeat_after_loop_duration() {
        let Some(ctx) = GpuContext::headless() else {
            eprintln!("skipping test_filters_repeat_after_loop_duration: no GPU adapter");
            return;
        };
        let mut rasterizer = WgpuRasterizer::new(ctx, 64, 64);
        rasterizer.upload_image(&test_image()).unwrap();

        for definition in filters::all() {
            let program = load_program(&mut rasterizer, definition, &AttributeBindings::mesh()).unwrap();
            let duration = definition.loop_duration.as_secs();
            for t in [0.37, duration + 0.1, duration * 2.5, duration * 7.0 + 0.2] {
                program.draw_at(&mut rasterizer, t.rem_euclid(duration)).unwrap();
                let wrapped = rasterizer.read_pixels().unwrap();
                program.draw_at(&mut rasterizer, t).unwrap();
                let unwrapped = rasterizer.read_pixels().unwrap();

                let differing = differing_pixels(&wrapped, &unwrapped);
                assert!(
                    differing * 100 < 64 * 64,
                    "{} differs in {} pixels between t={} and t={}",
                    definition.name,
                    differing,
                    t,
                    t.rem_euclid(duration)
                );
            }
            rasterizer.delete_program(program.id());
        }
        assert_eq!(rasterizer.live_programs(), 0);
    }
}
