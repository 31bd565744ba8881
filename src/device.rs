//! The device boundary.
//!
//! [`DeviceContext`] is everything the pipeline needs from a graphics
//! device: sized storage buffers, compute kernels dispatched over a
//! two-dimensional group grid, draw submission from a buffer-backed vertex
//! source, and a blend mode on the render program. Two contexts ship with
//! the crate: [`GpuContext`](crate::GpuContext) on wgpu and
//! [`SoftwareContext`](crate::SoftwareContext), a host reference device.

use bytemuck::{Pod, Zeroable};

use crate::compute::{DispatchGroups, Kernel, WorkGroupSize};
use crate::error::GpuError;
use crate::layout::ParticleRecord;
use crate::pingpong::{Binding, ComputeBindings};
use crate::render::{BlendMode, GeometryView};
use crate::Record;

/// Initial contents of a newly allocated storage buffer.
#[derive(Debug, Clone, Copy)]
pub enum BufferInit<'a> {
    /// Upload these records. Must hold exactly `capacity` records.
    Seed(&'a [ParticleRecord]),
    /// Leave contents unspecified; the first compute pass overwrites them.
    Reserve,
}

/// Per-frame values visible to both the compute kernel and the render
/// program (binding `PARAMS_SLOT` in compute, binding 0 in render).
#[repr(C)]
#[derive(Record, Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    /// Render target size in pixels.
    pub viewport: [f32; 2],
    /// Seconds since the pipeline started.
    pub frame_time: f32,
    /// Seconds since the previous frame.
    pub delta_time: f32,
    /// Number of particle records; kernels skip indices at or above this.
    pub population: u32,
    pub frame: u32,
    pub _pad: [u32; 2],
}

/// A graphics device able to run the double-buffered particle pipeline.
///
/// All work for one frame is recorded between [`begin_frame`] and
/// [`end_frame`] and executes in recording order on a single queue, so a
/// draw always observes the completed writes of a dispatch recorded before
/// it.
///
/// [`begin_frame`]: DeviceContext::begin_frame
/// [`end_frame`]: DeviceContext::end_frame
pub trait DeviceContext {
    /// Handle to a storage buffer sized for a whole population.
    type Buffer;
    /// A compiled compute kernel.
    type ComputeProgram;
    /// A linked render program.
    type RenderProgram;

    /// Allocate a buffer for `capacity` records.
    fn allocate(&mut self, label: &str, capacity: u32, init: BufferInit<'_>) -> Result<Self::Buffer, GpuError>;

    /// Size of `buffer` in bytes.
    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    /// Compile `kernel` for the given work-group shape.
    fn compile_kernel(&mut self, kernel: &Kernel, group: WorkGroupSize) -> Result<Self::ComputeProgram, GpuError>;

    /// Build the render program that expands records read through `view`.
    fn compile_program(&mut self, view: &GeometryView, blend: BlendMode) -> Result<Self::RenderProgram, GpuError>;

    /// Start recording a frame.
    fn begin_frame(&mut self, params: &FrameParams) -> Result<(), GpuError>;

    /// Record a compute dispatch.
    fn dispatch(
        &mut self,
        program: &Self::ComputeProgram,
        bindings: ComputeBindings<'_, Self::Buffer>,
        groups: DispatchGroups,
    ) -> Result<(), GpuError>;

    /// Record a draw of `count` records from the bound vertex buffer.
    fn draw(
        &mut self,
        program: &Self::RenderProgram,
        vertices: Binding<'_, Self::Buffer>,
        view: &GeometryView,
        count: u32,
    ) -> Result<(), GpuError>;

    /// Submit the frame.
    fn end_frame(&mut self) -> Result<(), GpuError>;

    /// Overwrite every record of `buffer` from the host. Only valid between
    /// frames; `records` must cover the whole buffer.
    fn write_records(&mut self, buffer: &Self::Buffer, records: &[ParticleRecord]) -> Result<(), GpuError>;

    /// Copy a buffer back to the host. Waits for all submitted work.
    fn read_records(&mut self, buffer: &Self::Buffer) -> Result<Vec<ParticleRecord>, GpuError>;

    /// Current render target size in pixels.
    fn viewport(&self) -> [f32; 2];

    /// Largest group count allowed in one dispatch dimension.
    fn max_groups_per_dimension(&self) -> u32;

    /// Largest number of invocations allowed in one work group.
    fn max_invocations_per_group(&self) -> u32;
}
