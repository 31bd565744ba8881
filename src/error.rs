//! Error types for starfield.
//!
//! Every fatal condition of the pipeline maps to one of these enums. Setup
//! failures name the stage that failed (adapter, device, buffer allocation,
//! kernel compilation, program linking) so the diagnostic is actionable.

use thiserror::Error;

/// Errors in the shape of particle data handed to the pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Seed data does not cover exactly `capacity` records.
    #[error("seed data is {actual} bytes but {capacity} records need exactly {expected} bytes")]
    SizeMismatch {
        capacity: u32,
        expected: usize,
        actual: usize,
    },
}

/// Invalid pipeline configuration, rejected before any device work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The population must hold at least one particle.
    #[error("population count must be greater than zero")]
    EmptyPopulation,
    /// Work-group dimensions must be non-zero.
    #[error("work-group size {x}x{y} has a zero dimension")]
    ZeroWorkGroup { x: u32, y: u32 },
    /// `x * y` does not fit in 32 bits.
    #[error("work-group size {x}x{y} overflows the invocation count")]
    WorkGroupOverflow { x: u32, y: u32 },
    /// Work-group exceeds the device's invocation limit.
    #[error("work-group size {x}x{y} exceeds the limit of {limit} invocations per group")]
    WorkGroupTooLarge { x: u32, y: u32, limit: u32 },
    /// The population needs more groups than a two-dimensional grid can hold.
    #[error("{groups} work groups do not fit a {limit}x{limit} dispatch grid")]
    DispatchTooLarge { groups: u64, limit: u32 },
}

/// Errors raised by a device context.
#[derive(Debug, Error)]
pub enum GpuError {
    /// Failed to create a surface for rendering.
    #[error("failed to create GPU surface: {0}")]
    SurfaceCreation(#[from] wgpu::CreateSurfaceError),
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found; ensure your system has a GPU with Vulkan/Metal/DX12 support")]
    NoAdapter,
    /// The surface reports no usable format or alpha mode for this adapter.
    #[error("surface is not supported by the adapter: {0}")]
    SurfaceUnsupported(&'static str),
    /// Failed to create GPU device.
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
    /// A storage buffer could not be allocated.
    #[error("buffer allocation failed for `{label}`: {message}")]
    BufferAllocation { label: String, message: String },
    /// The compute kernel failed to compile.
    #[error("compute kernel compilation failed: {0}")]
    KernelCompilation(String),
    /// The render program failed to build.
    #[error("render program linking failed: {0}")]
    ProgramLinking(String),
    /// The surface texture for this frame could not be acquired.
    #[error("surface unavailable: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    /// Failed to map buffer for reading.
    #[error("failed to map GPU buffer: {0}")]
    BufferMapping(String),
    /// Work was recorded outside `begin_frame`/`end_frame`.
    #[error("no frame in progress; call begin_frame first")]
    FrameNotStarted,
    /// Host writes must happen between frames.
    #[error("a frame is in progress; call end_frame first")]
    FrameInProgress,
    /// Compute source and destination name the same physical buffer.
    #[error("compute source and destination are the same buffer")]
    AliasedBindings,
    /// Seed data handed to the device had the wrong size.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Errors raised while building a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Errors that can occur when running a simulation window.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Failed to create event loop.
    #[error("failed to create event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    /// Failed to create window.
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    /// Pipeline construction failed.
    #[error("pipeline setup failed: {0}")]
    Pipeline(#[from] PipelineError),
    /// A frame failed on the device.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_message_names_sizes() {
        let err = LayoutError::SizeMismatch {
            capacity: 4,
            expected: 192,
            actual: 180,
        };
        let msg = err.to_string();
        assert!(msg.contains("180"));
        assert!(msg.contains("192"));
        assert!(msg.contains("4 records"));
    }

    #[test]
    fn test_layout_error_converts_through_pipeline_error() {
        let err: PipelineError = LayoutError::SizeMismatch {
            capacity: 1,
            expected: 48,
            actual: 0,
        }
        .into();
        assert!(matches!(err, PipelineError::Layout(LayoutError::SizeMismatch { .. })));
    }

    #[test]
    fn test_setup_failures_name_their_stage() {
        assert!(GpuError::KernelCompilation("bad".into()).to_string().contains("kernel compilation"));
        assert!(GpuError::ProgramLinking("bad".into()).to_string().contains("program linking"));
        let alloc = GpuError::BufferAllocation {
            label: "Particle Buffer A".into(),
            message: "out of memory".into(),
        };
        assert!(alloc.to_string().contains("Particle Buffer A"));
    }
}
