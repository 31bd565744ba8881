//! Host reference device.
//!
//! [`SoftwareContext`] runs the pipeline on the CPU with the same group grid
//! and record-index mapping as the generated WGSL, so every pipeline
//! property can be checked without a GPU. Reserved buffers are filled with
//! NaN; a draw that reached an unwritten buffer would show up immediately.

use crate::compute::{record_index, DispatchGroups, Kernel, WorkGroupSize};
use crate::device::{BufferInit, DeviceContext, FrameParams};
use crate::error::GpuError;
use crate::layout::{self, ParticleRecord, RECORD_SIZE};
use crate::pingpong::{Binding, ComputeBindings};
use crate::render::{BlendMode, GeometryView};

/// Draw calls kept by default; older ones are dropped.
pub const DEFAULT_DRAW_HISTORY: usize = 64;

/// Handle to a host buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftwareBuffer {
    id: usize,
    capacity: u32,
}

impl SoftwareBuffer {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Kernels the host device can execute.
#[derive(Debug, Clone, Copy, PartialEq)]
enum HostKernel {
    Identity,
    Integrate,
    Gravity { strength: f32, softening: f32 },
}

impl TryFrom<&Kernel> for HostKernel {
    type Error = GpuError;

    fn try_from(kernel: &Kernel) -> Result<Self, Self::Error> {
        match kernel {
            Kernel::Identity => Ok(HostKernel::Identity),
            Kernel::Integrate => Ok(HostKernel::Integrate),
            Kernel::Gravity { strength, softening } => Ok(HostKernel::Gravity {
                strength: *strength,
                softening: *softening,
            }),
            Kernel::Wgsl(_) => Err(GpuError::KernelCompilation(
                "raw WGSL kernels need a GPU context".to_string(),
            )),
        }
    }
}

impl HostKernel {
    fn run(&self, source: &[ParticleRecord], index: usize, population: u32) -> ParticleRecord {
        let mut p = source[index];
        match *self {
            HostKernel::Identity => {}
            HostKernel::Integrate => {
                p.set_position(p.position() + p.velocity());
            }
            HostKernel::Gravity { strength, softening } => {
                let here = p.position();
                let mut velocity = p.velocity();
                for (i, other) in source.iter().enumerate().take(population as usize) {
                    if i == index {
                        continue;
                    }
                    let toward = other.position() - here;
                    let dist_sq = toward.dot(toward) + softening;
                    velocity += toward * (strength / (dist_sq * dist_sq.sqrt()));
                }
                p.set_velocity(velocity);
                p.set_position(here + velocity);
            }
        }
        p
    }
}

/// A kernel compiled for the host device.
#[derive(Debug, Clone)]
pub struct SoftwareKernel {
    kernel: HostKernel,
    group: WorkGroupSize,
}

/// A render program on the host device.
#[derive(Debug, Clone)]
pub struct SoftwareProgram {
    blend: BlendMode,
    stride: u32,
}

/// One particle as assembled by the vertex stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Primitive {
    pub position_radius: [f32; 4],
    pub color: [f32; 4],
}

impl Primitive {
    /// Whether every attribute lane is finite.
    pub fn is_finite(&self) -> bool {
        self.position_radius.iter().chain(self.color.iter()).all(|v| v.is_finite())
    }
}

/// A recorded draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    /// Buffer the vertices were fetched from.
    pub buffer: SoftwareBuffer,
    /// Frame the draw was recorded in.
    pub frame: u64,
    pub blend: BlendMode,
    pub primitives: Vec<Primitive>,
}

/// Counters across all dispatches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatches: u64,
    /// Work items launched.
    pub invocations: u64,
    /// Work items whose index was at or past the population.
    pub skipped: u64,
    /// Records written.
    pub writes: u64,
}

/// CPU implementation of [`DeviceContext`].
///
/// Every draw is recorded with a copy of its primitives. Only the most
/// recent [`DEFAULT_DRAW_HISTORY`] draws are kept unless changed with
/// [`with_draw_history`](Self::with_draw_history).
#[derive(Debug)]
pub struct SoftwareContext {
    viewport: [f32; 2],
    buffers: Vec<Vec<ParticleRecord>>,
    max_groups_per_dimension: u32,
    max_invocations_per_group: u32,
    frame: Option<FrameParams>,
    frames_submitted: u64,
    draws: Vec<DrawCall>,
    draw_history: usize,
    stats: DispatchStats,
}

impl SoftwareContext {
    pub fn new(viewport: [f32; 2]) -> Self {
        Self {
            viewport,
            buffers: Vec::new(),
            max_groups_per_dimension: 65_535,
            max_invocations_per_group: 256,
            frame: None,
            frames_submitted: 0,
            draws: Vec::new(),
            draw_history: DEFAULT_DRAW_HISTORY,
            stats: DispatchStats::default(),
        }
    }

    /// Override the per-dimension group limit.
    pub fn with_max_groups_per_dimension(mut self, limit: u32) -> Self {
        self.max_groups_per_dimension = limit;
        self
    }

    /// Override the per-group invocation limit.
    pub fn with_max_invocations_per_group(mut self, limit: u32) -> Self {
        self.max_invocations_per_group = limit;
        self
    }

    /// Keep at most `limit` recorded draws.
    pub fn with_draw_history(mut self, limit: usize) -> Self {
        self.draw_history = limit;
        self
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.viewport = [width, height];
    }

    /// Draws recorded so far, oldest first.
    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    /// Take the recorded draws, leaving the list empty.
    pub fn take_draws(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.draws)
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Frames submitted with `end_frame`.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Raw contents of a buffer.
    pub fn contents(&self, buffer: &SoftwareBuffer) -> &[ParticleRecord] {
        &self.buffers[buffer.id]
    }

    fn frame_params(&self) -> Result<FrameParams, GpuError> {
        self.frame.ok_or(GpuError::FrameNotStarted)
    }
}

impl DeviceContext for SoftwareContext {
    type Buffer = SoftwareBuffer;
    type ComputeProgram = SoftwareKernel;
    type RenderProgram = SoftwareProgram;

    fn allocate(&mut self, label: &str, capacity: u32, init: BufferInit<'_>) -> Result<SoftwareBuffer, GpuError> {
        let contents = match init {
            BufferInit::Seed(records) => {
                layout::check_seed_len(records.len() * RECORD_SIZE, capacity)?;
                records.to_vec()
            }
            BufferInit::Reserve => {
                let poison = ParticleRecord::from_scalars([f32::NAN; layout::RECORD_SCALARS]);
                vec![poison; capacity as usize]
            }
        };
        let id = self.buffers.len();
        self.buffers.push(contents);
        log::trace!("Allocated host buffer {} (`{}`, {} records)", id, label, capacity);
        Ok(SoftwareBuffer { id, capacity })
    }

    fn buffer_size(&self, buffer: &SoftwareBuffer) -> u64 {
        buffer.capacity as u64 * RECORD_SIZE as u64
    }

    fn compile_kernel(&mut self, kernel: &Kernel, group: WorkGroupSize) -> Result<SoftwareKernel, GpuError> {
        Ok(SoftwareKernel {
            kernel: HostKernel::try_from(kernel)?,
            group,
        })
    }

    fn compile_program(&mut self, view: &GeometryView, blend: BlendMode) -> Result<SoftwareProgram, GpuError> {
        if view.attribute(0).is_none() || view.attribute(1).is_none() {
            return Err(GpuError::ProgramLinking(
                "vertex locations 0 and 1 must both be bound".to_string(),
            ));
        }
        Ok(SoftwareProgram {
            blend,
            stride: view.stride,
        })
    }

    fn begin_frame(&mut self, params: &FrameParams) -> Result<(), GpuError> {
        self.frame = Some(*params);
        Ok(())
    }

    fn dispatch(
        &mut self,
        program: &SoftwareKernel,
        bindings: ComputeBindings<'_, SoftwareBuffer>,
        groups: DispatchGroups,
    ) -> Result<(), GpuError> {
        let params = self.frame_params()?;
        let source_id = bindings.source.buffer.id;
        let destination_id = bindings.destination.buffer.id;
        if source_id == destination_id {
            return Err(GpuError::AliasedBindings);
        }

        // Every work item reads the pre-dispatch source.
        let source = self.buffers[source_id].clone();
        let destination = &mut self.buffers[destination_id];
        let size = program.group;

        for gy in 0..groups.y {
            for gx in 0..groups.x {
                for local in 0..size.invocations() {
                    self.stats.invocations += 1;
                    match record_index((gx, gy), local, groups, size, params.population) {
                        Some(index) => {
                            let index = index as usize;
                            destination[index] = program.kernel.run(&source, index, params.population);
                            self.stats.writes += 1;
                        }
                        None => self.stats.skipped += 1,
                    }
                }
            }
        }
        self.stats.dispatches += 1;
        Ok(())
    }

    fn draw(
        &mut self,
        program: &SoftwareProgram,
        vertices: Binding<'_, SoftwareBuffer>,
        view: &GeometryView,
        count: u32,
    ) -> Result<(), GpuError> {
        self.frame_params()?;
        if view.stride != program.stride {
            return Err(GpuError::ProgramLinking(format!(
                "geometry view stride {} does not match program stride {}",
                view.stride, program.stride
            )));
        }
        let bytes: &[u8] = bytemuck::cast_slice(&self.buffers[vertices.buffer.id]);
        let primitives = (0..count as usize)
            .filter_map(|i| {
                Some(Primitive {
                    position_radius: view.fetch(bytes, i, 0)?,
                    color: view.fetch(bytes, i, 1)?,
                })
            })
            .collect();

        self.draws.push(DrawCall {
            buffer: *vertices.buffer,
            frame: self.frames_submitted,
            blend: program.blend,
            primitives,
        });
        if self.draws.len() > self.draw_history {
            let excess = self.draws.len() - self.draw_history;
            self.draws.drain(..excess);
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), GpuError> {
        self.frame.take().ok_or(GpuError::FrameNotStarted)?;
        self.frames_submitted += 1;
        Ok(())
    }

    fn write_records(&mut self, buffer: &SoftwareBuffer, records: &[ParticleRecord]) -> Result<(), GpuError> {
        if self.frame.is_some() {
            return Err(GpuError::FrameInProgress);
        }
        layout::check_seed_len(records.len() * RECORD_SIZE, buffer.capacity)?;
        self.buffers[buffer.id].copy_from_slice(records);
        Ok(())
    }

    fn read_records(&mut self, buffer: &SoftwareBuffer) -> Result<Vec<ParticleRecord>, GpuError> {
        Ok(self.buffers[buffer.id].clone())
    }

    fn viewport(&self) -> [f32; 2] {
        self.viewport
    }

    fn max_groups_per_dimension(&self) -> u32 {
        self.max_groups_per_dimension
    }

    fn max_invocations_per_group(&self) -> u32 {
        self.max_invocations_per_group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pingpong::{BufferPair, Role, VERTEX_SLOT};
    use glam::{Vec3, Vec4};

    fn params(population: u32) -> FrameParams {
        FrameParams {
            viewport: [100.0, 100.0],
            population,
            ..Default::default()
        }
    }

    #[test]
    fn test_reserved_buffer_is_poisoned() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let buffer = device.allocate("b", 3, BufferInit::Reserve).unwrap();
        assert!(device.contents(&buffer).iter().all(|r| r.position().x.is_nan()));
    }

    #[test]
    fn test_seed_length_checked() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let seed = [ParticleRecord::new(Vec3::ZERO, 1.0, Vec3::ZERO, Vec4::ONE); 2];
        let result = device.allocate("a", 3, BufferInit::Seed(&seed));
        assert!(matches!(result, Err(GpuError::Layout(_))));
    }

    #[test]
    fn test_dispatch_requires_frame() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let seed = [ParticleRecord::new(Vec3::ZERO, 1.0, Vec3::ZERO, Vec4::ONE); 2];
        let pair = BufferPair::allocate(&mut device, &seed).unwrap();
        let kernel = device.compile_kernel(&Kernel::Identity, WorkGroupSize::DEFAULT).unwrap();
        let result = device.dispatch(&kernel, pair.compute_bindings(), DispatchGroups { x: 1, y: 1 });
        assert!(matches!(result, Err(GpuError::FrameNotStarted)));
    }

    #[test]
    fn test_aliased_bindings_rejected() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let seed = [ParticleRecord::new(Vec3::ZERO, 1.0, Vec3::ZERO, Vec4::ONE); 2];
        let pair = BufferPair::allocate(&mut device, &seed).unwrap();
        let kernel = device.compile_kernel(&Kernel::Identity, WorkGroupSize::DEFAULT).unwrap();
        let source = pair.bind_as(Role::ComputeSource, 0);
        let bindings = ComputeBindings {
            source,
            destination: source,
        };
        device.begin_frame(&params(2)).unwrap();
        let result = device.dispatch(&kernel, bindings, DispatchGroups { x: 1, y: 1 });
        assert!(matches!(result, Err(GpuError::AliasedBindings)));
    }

    #[test]
    fn test_gravity_pulls_pair_together() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let seed = [
            ParticleRecord::new(Vec3::new(-10.0, 0.0, 0.0), 1.0, Vec3::ZERO, Vec4::ONE),
            ParticleRecord::new(Vec3::new(10.0, 0.0, 0.0), 1.0, Vec3::ZERO, Vec4::ONE),
        ];
        let pair = BufferPair::allocate(&mut device, &seed).unwrap();
        let kernel = device.compile_kernel(&Kernel::gravity(), WorkGroupSize::DEFAULT).unwrap();

        device.begin_frame(&params(2)).unwrap();
        device
            .dispatch(&kernel, pair.compute_bindings(), DispatchGroups { x: 1, y: 1 })
            .unwrap();
        device.end_frame().unwrap();

        let out = device.read_records(pair.stale()).unwrap();
        assert!(out[0].velocity().x > 0.0);
        assert!(out[1].velocity().x < 0.0);
        assert_eq!(out[0].velocity().x, -out[1].velocity().x);
        assert!(out[0].position().x > -10.0);
    }

    #[test]
    fn test_wgsl_kernel_not_supported() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let result = device.compile_kernel(&Kernel::Wgsl(String::new()), WorkGroupSize::DEFAULT);
        assert!(matches!(result, Err(GpuError::KernelCompilation(_))));
    }

    #[test]
    fn test_draw_fetches_vertex_attributes() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let seed = [ParticleRecord::new(
            Vec3::new(1.0, 2.0, 0.0),
            3.0,
            Vec3::splat(7.0),
            Vec4::new(1.0, 0.5, 0.25, 1.0),
        )];
        let pair = BufferPair::allocate(&mut device, &seed).unwrap();
        let program = device
            .compile_program(pair.current_view(), BlendMode::Additive)
            .unwrap();

        device.begin_frame(&params(1)).unwrap();
        device
            .draw(&program, pair.bind_as(Role::Vertex, VERTEX_SLOT), pair.current_view(), 1)
            .unwrap();
        device.end_frame().unwrap();

        let draws = device.take_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].blend, BlendMode::Additive);
        assert_eq!(
            draws[0].primitives,
            vec![Primitive {
                position_radius: [1.0, 2.0, 0.0, 3.0],
                color: [1.0, 0.5, 0.25, 1.0],
            }]
        );
        assert!(device.draws().is_empty());
    }

    #[test]
    fn test_write_records_replaces_contents() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let buffer = device.allocate("b", 2, BufferInit::Reserve).unwrap();
        let records = [ParticleRecord::new(Vec3::X, 2.0, Vec3::Y, Vec4::ONE); 2];
        device.write_records(&buffer, &records).unwrap();
        assert_eq!(device.contents(&buffer), &records);
    }

    #[test]
    fn test_draw_history_is_bounded() {
        let seed = [ParticleRecord::new(Vec3::ZERO, 1.0, Vec3::ZERO, Vec4::ONE); 2];
        let mut device = SoftwareContext::new([100.0, 100.0]).with_draw_history(2);
        let pair = BufferPair::allocate(&mut device, &seed).unwrap();
        let program = device
            .compile_program(pair.current_view(), BlendMode::Alpha)
            .unwrap();

        for _ in 0..5 {
            device.begin_frame(&params(2)).unwrap();
            device
                .draw(&program, pair.bind_as(Role::Vertex, VERTEX_SLOT), pair.current_view(), 2)
                .unwrap();
            device.end_frame().unwrap();
        }
        let frames: Vec<_> = device.draws().iter().map(|d| d.frame).collect();
        assert_eq!(frames, vec![3, 4]);
    }
}
