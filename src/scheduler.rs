//! Frame scheduler.
//!
//! Owns the device context, the buffer pair and both stages, and runs one
//! ping-pong transition per [`step`](FrameScheduler::step):
//!
//! 1. bind current as compute source and stale as compute destination
//! 2. dispatch the kernel over the whole population
//! 3. relabel roles, so the buffer just written becomes current
//! 4. draw from the current buffer's geometry view
//!
//! Compute and draw are recorded into the same frame and run in order on
//! one queue, so the draw always sees the completed dispatch. The first
//! frame needs no special case: B is written before it is ever drawn.

use crate::compute::{ComputeStage, DispatchGroups, Kernel, WorkGroupSize};
use crate::device::{DeviceContext, FrameParams};
use crate::error::{GpuError, PipelineError};
use crate::layout::ParticleRecord;
use crate::pingpong::{BufferLabel, BufferPair, Role, VERTEX_SLOT};
use crate::render::{BlendMode, GeometryView, RenderStage};

/// The double-buffered compute/render pipeline.
pub struct FrameScheduler<D: DeviceContext> {
    pair: BufferPair<D::Buffer>,
    compute: ComputeStage<D>,
    render: RenderStage<D>,
    groups: DispatchGroups,
    frame: u64,
    // Declared last so buffers and programs are released before the device.
    device: D,
}

impl<D: DeviceContext> FrameScheduler<D> {
    /// Build the pipeline: allocate the pair from `seed`, compile the kernel
    /// and link the render program.
    pub fn new(
        mut device: D,
        seed: &[ParticleRecord],
        kernel: Kernel,
        group: WorkGroupSize,
        blend: BlendMode,
    ) -> Result<Self, PipelineError> {
        let pair = BufferPair::allocate(&mut device, seed)?;
        let groups = group.groups_for(pair.capacity(), device.max_groups_per_dimension())?;
        let compute = ComputeStage::new(&mut device, kernel, group)?;
        let render = RenderStage::new(&mut device, pair.current_view(), blend)?;

        log::info!(
            "Pipeline ready: {} particles, {} kernel, groups of {}x{}, dispatch grid {}x{}",
            pair.capacity(),
            compute.kernel().name(),
            group.x(),
            group.y(),
            groups.x,
            groups.y
        );

        Ok(Self {
            pair,
            compute,
            render,
            groups,
            frame: 0,
            device,
        })
    }

    /// Advance the simulation one frame and draw the result.
    ///
    /// `time` is seconds since start and `delta_time` seconds since the
    /// previous frame; both are passed to kernels through [`FrameParams`].
    /// If the frame cannot start (e.g. the surface is lost) nothing is
    /// recorded and the roles are left unchanged.
    pub fn step(&mut self, time: f32, delta_time: f32) -> Result<(), GpuError> {
        let params = FrameParams {
            viewport: self.device.viewport(),
            frame_time: time,
            delta_time,
            population: self.pair.capacity(),
            frame: self.frame as u32,
            _pad: [0; 2],
        };
        self.device.begin_frame(&params)?;

        self.compute
            .dispatch(&mut self.device, self.pair.compute_bindings(), self.groups)?;

        self.pair.swap();

        self.render.draw(
            &mut self.device,
            self.pair.bind_as(Role::Vertex, VERTEX_SLOT),
            self.pair.current_view(),
            self.pair.capacity(),
        )?;

        self.device.end_frame()?;
        self.frame += 1;
        Ok(())
    }

    /// The buffer eligible for drawing: the one written by the most recent
    /// dispatch, or the seeded buffer before the first step.
    pub fn drawable(&self) -> &D::Buffer {
        self.pair.current()
    }

    /// Geometry view over [`drawable`](Self::drawable).
    pub fn drawable_view(&self) -> &GeometryView {
        self.pair.current_view()
    }

    /// Which physical buffer is current.
    pub fn current_label(&self) -> BufferLabel {
        self.pair.current_label()
    }

    /// Copy the current population back to the host.
    pub fn read_current(&mut self) -> Result<Vec<ParticleRecord>, GpuError> {
        self.device.read_records(self.pair.current())
    }

    /// Replace the current population. The next [`step`](Self::step) reads
    /// these records as its source.
    pub fn write_current(&mut self, records: &[ParticleRecord]) -> Result<(), GpuError> {
        self.device.write_records(self.pair.current(), records)
    }

    /// Copy one physical buffer back to the host.
    pub fn read_buffer(&mut self, label: BufferLabel) -> Result<Vec<ParticleRecord>, GpuError> {
        self.device.read_records(self.pair.buffer(label))
    }

    pub fn population(&self) -> u32 {
        self.pair.capacity()
    }

    pub fn groups(&self) -> DispatchGroups {
        self.groups
    }

    pub fn work_group(&self) -> WorkGroupSize {
        self.compute.group()
    }

    /// Frames stepped so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn pair(&self) -> &BufferPair<D::Buffer> {
        &self.pair
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: DeviceContext> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        log::debug!("Releasing pipeline after {} frames", self.frame);
    }
}
