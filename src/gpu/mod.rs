//! wgpu device context.
//!
//! Both particle buffers are created with `STORAGE | VERTEX` usage so the
//! same allocation serves as compute source, compute destination and vertex
//! source. A frame is one command encoder: the compute pass is recorded
//! first, the render pass second, and wgpu inserts the storage-write to
//! vertex-read barrier between them.

mod target;

use std::collections::HashMap;
use std::sync::{mpsc, Arc};

use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::compute::{DispatchGroups, Kernel, WorkGroupSize};
use crate::device::{BufferInit, DeviceContext, FrameParams};
use crate::error::GpuError;
use crate::layout::{self, ParticleRecord, RECORD_SIZE};
use crate::pingpong::{Binding, ComputeBindings, DESTINATION_SLOT, PARAMS_SLOT, SOURCE_SLOT};
use crate::render::{BlendMode, GeometryView, VERTICES_PER_PARTICLE};
use crate::shaders;

use target::{AcquiredFrame, RenderTarget};
pub use target::OFFSCREEN_FORMAT;

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 0.0,
    b: 0.0,
    a: 1.0,
};

/// A particle storage buffer on the GPU.
pub struct GpuBuffer {
    id: u64,
    buffer: wgpu::Buffer,
    capacity: u32,
}

impl GpuBuffer {
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// A compiled compute pipeline.
pub struct GpuKernel {
    pipeline: wgpu::ComputePipeline,
}

/// A linked render pipeline.
pub struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
}

struct FrameInProgress {
    encoder: wgpu::CommandEncoder,
    acquired: AcquiredFrame,
    cleared: bool,
}

/// [`DeviceContext`] backed by wgpu, drawing to a window or an offscreen
/// texture.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: RenderTarget,
    params_buffer: wgpu::Buffer,
    compute_layout: wgpu::BindGroupLayout,
    render_layout: wgpu::BindGroupLayout,
    render_bind_group: wgpu::BindGroup,
    // Compute bind groups by (source id, destination id); a pair needs two.
    bind_groups: HashMap<(u64, u64), wgpu::BindGroup>,
    frame: Option<FrameInProgress>,
    next_buffer_id: u64,
}

impl GpuContext {
    /// Create a context drawing to `window`.
    pub async fn windowed(window: Arc<Window>) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = request_device(&adapter).await?;
        let target = RenderTarget::surface(&device, &adapter, surface, &window)?;
        Ok(Self::from_parts(device, queue, target))
    }

    /// Create a context drawing to a `width` x `height` offscreen texture.
    pub async fn headless(width: u32, height: u32) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = request_device(&adapter).await?;
        let target = RenderTarget::offscreen(&device, width, height);
        Ok(Self::from_parts(device, queue, target))
    }

    fn from_parts(device: wgpu::Device, queue: wgpu::Queue, target: RenderTarget) -> Self {
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Params"),
            contents: bytemuck::bytes_of(&FrameParams::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let compute_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compute Bind Group Layout"),
            entries: &[
                storage_entry(SOURCE_SLOT, true),
                storage_entry(DESTINATION_SLOT, false),
                wgpu::BindGroupLayoutEntry {
                    binding: PARAMS_SLOT,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let render_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Render Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let render_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Render Bind Group"),
            layout: &render_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        Self {
            device,
            queue,
            target,
            params_buffer,
            compute_layout,
            render_layout,
            render_bind_group,
            bind_groups: HashMap::new(),
            frame: None,
            next_buffer_id: 0,
        }
    }

    /// Resize the render target. Ignored for zero sizes.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.target.resize(&self.device, width, height);
    }

    /// Configure a lost or outdated surface again.
    pub fn reconfigure(&mut self) {
        self.target.reconfigure(&self.device);
    }

    /// Color format of the render target.
    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target.format()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// Bind group for one (source, destination) pairing, created on first use.
fn compute_bind_group<'a>(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    params: &wgpu::Buffer,
    cache: &'a mut HashMap<(u64, u64), wgpu::BindGroup>,
    source: &GpuBuffer,
    destination: &GpuBuffer,
) -> &'a wgpu::BindGroup {
    cache.entry((source.id, destination.id)).or_insert_with(|| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compute Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: SOURCE_SLOT,
                    resource: source.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: DESTINATION_SLOT,
                    resource: destination.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: PARAMS_SLOT,
                    resource: params.as_entire_binding(),
                },
            ],
        })
    })
}

async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), GpuError> {
    let info = adapter.get_info();
    log::info!("Using GPU adapter: {} ({:?})", info.name, info.backend);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        )
        .await?;
    Ok((device, queue))
}

fn blend_state(blend: BlendMode) -> wgpu::BlendState {
    match blend {
        BlendMode::Alpha => wgpu::BlendState::ALPHA_BLENDING,
        BlendMode::Additive => wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::OVER,
        },
    }
}

impl DeviceContext for GpuContext {
    type Buffer = GpuBuffer;
    type ComputeProgram = GpuKernel;
    type RenderProgram = GpuProgram;

    fn allocate(&mut self, label: &str, capacity: u32, init: BufferInit<'_>) -> Result<GpuBuffer, GpuError> {
        let size = capacity as u64 * RECORD_SIZE as u64;
        let limit = self.device.limits().max_storage_buffer_binding_size as u64;
        if size > limit {
            return Err(GpuError::BufferAllocation {
                label: label.to_string(),
                message: format!("{} bytes exceed the storage binding limit of {} bytes", size, limit),
            });
        }

        let usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::VERTEX
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = match init {
            BufferInit::Seed(records) => {
                layout::check_seed_len(records.len() * RECORD_SIZE, capacity)?;
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(records),
                    usage,
                })
            }
            BufferInit::Reserve => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            }),
        };
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::BufferAllocation {
                label: label.to_string(),
                message: err.to_string(),
            });
        }

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        log::debug!("Allocated `{}`: {} bytes", label, size);
        Ok(GpuBuffer { id, buffer, capacity })
    }

    fn buffer_size(&self, buffer: &GpuBuffer) -> u64 {
        buffer.buffer.size()
    }

    fn compile_kernel(&mut self, kernel: &Kernel, group: WorkGroupSize) -> Result<GpuKernel, GpuError> {
        let source = shaders::compute_shader(kernel, group);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compute Pipeline Layout"),
            bind_group_layouts: &[&self.compute_layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Compute Pipeline"),
            layout: Some(&layout),
            module: &module,
            entry_point: Some(shaders::COMPUTE_ENTRY),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::KernelCompilation(err.to_string()));
        }

        Ok(GpuKernel { pipeline })
    }

    fn compile_program(&mut self, view: &GeometryView, blend: BlendMode) -> Result<GpuProgram, GpuError> {
        let source = shaders::render_shader(view);
        let attributes: Vec<wgpu::VertexAttribute> = view
            .attributes
            .iter()
            .filter_map(|a| {
                a.location.map(|shader_location| wgpu::VertexAttribute {
                    format: a.vertex_format(),
                    offset: a.offset as u64,
                    shader_location,
                })
            })
            .collect();

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Render Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&self.render_layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Render Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some(shaders::VERTEX_ENTRY),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: view.stride as u64,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &attributes,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some(shaders::FRAGMENT_ENTRY),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.target.format(),
                    blend: Some(blend_state(blend)),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::ProgramLinking(err.to_string()));
        }

        Ok(GpuProgram { pipeline })
    }

    fn begin_frame(&mut self, params: &FrameParams) -> Result<(), GpuError> {
        // Acquire first: a lost surface must fail before anything is recorded.
        let acquired = self.target.acquire()?;
        self.queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(params));
        let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });
        self.frame = Some(FrameInProgress {
            encoder,
            acquired,
            cleared: false,
        });
        Ok(())
    }

    fn dispatch(
        &mut self,
        program: &GpuKernel,
        bindings: ComputeBindings<'_, GpuBuffer>,
        groups: DispatchGroups,
    ) -> Result<(), GpuError> {
        let frame = self.frame.as_mut().ok_or(GpuError::FrameNotStarted)?;
        if bindings.source.buffer.id == bindings.destination.buffer.id {
            return Err(GpuError::AliasedBindings);
        }
        let bind_group = compute_bind_group(
            &self.device,
            &self.compute_layout,
            &self.params_buffer,
            &mut self.bind_groups,
            bindings.source.buffer,
            bindings.destination.buffer,
        );

        let mut compute_pass = frame.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Compute Pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&program.pipeline);
        compute_pass.set_bind_group(0, bind_group, &[]);
        compute_pass.dispatch_workgroups(groups.x, groups.y, 1);
        Ok(())
    }

    fn draw(
        &mut self,
        program: &GpuProgram,
        vertices: Binding<'_, GpuBuffer>,
        _view: &GeometryView,
        count: u32,
    ) -> Result<(), GpuError> {
        let frame = self.frame.as_mut().ok_or(GpuError::FrameNotStarted)?;
        let load = if frame.cleared {
            wgpu::LoadOp::Load
        } else {
            wgpu::LoadOp::Clear(CLEAR_COLOR)
        };

        {
            let mut render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.acquired.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, &self.render_bind_group, &[]);
            render_pass.set_vertex_buffer(vertices.slot, vertices.buffer.buffer.slice(..));
            render_pass.draw(0..VERTICES_PER_PARTICLE, 0..count);
        }
        frame.cleared = true;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), GpuError> {
        let frame = self.frame.take().ok_or(GpuError::FrameNotStarted)?;
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        if let Some(output) = frame.acquired.surface_texture {
            output.present();
        }
        Ok(())
    }

    fn write_records(&mut self, buffer: &GpuBuffer, records: &[ParticleRecord]) -> Result<(), GpuError> {
        if self.frame.is_some() {
            return Err(GpuError::FrameInProgress);
        }
        layout::check_seed_len(records.len() * RECORD_SIZE, buffer.capacity)?;
        self.queue.write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(records));
        Ok(())
    }

    fn read_records(&mut self, buffer: &GpuBuffer) -> Result<Vec<ParticleRecord>, GpuError> {
        let size = buffer.buffer.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let records = {
            let data = slice.get_mapped_range();
            data.chunks_exact(RECORD_SIZE)
                .map(bytemuck::pod_read_unaligned::<ParticleRecord>)
                .collect()
        };
        staging.unmap();
        Ok(records)
    }

    fn viewport(&self) -> [f32; 2] {
        let (width, height) = self.target.size();
        [width as f32, height as f32]
    }

    fn max_groups_per_dimension(&self) -> u32 {
        self.device.limits().max_compute_workgroups_per_dimension
    }

    fn max_invocations_per_group(&self) -> u32 {
        self.device.limits().max_compute_invocations_per_workgroup
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        log::debug!("Releasing GPU context ({} buffers allocated)", self.next_buffer_id);
    }
}
