//! # Starfield
//!
//! A double-buffered GPU particle pipeline: a compute kernel rewrites the
//! whole particle population every frame and the result is drawn as
//! instanced soft discs, without the data ever leaving the device.
//!
//! ## Quick Start
//!
//! ```ignore
//! use starfield::prelude::*;
//!
//! fn main() -> Result<(), SimulationError> {
//!     Simulation::new()
//!         .with_preset(Preset::CollidingGalaxies)
//!         .with_particle_count(60_000)
//!         .with_workgroup_size(256, 1)
//!         .run()
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A particle is a [`ParticleRecord`]: three packed `vec4<f32>` slots for
//! position and radius, velocity, and color. Its layout is described once by
//! `#[derive(Record)]`, which generates the WGSL struct and the field table
//! used for vertex attributes and host seeding.
//!
//! ### Ping-pong buffers
//!
//! A [`BufferPair`] holds two equally sized storage buffers. Each frame the
//! [`FrameScheduler`] dispatches the kernel from the `current` buffer into
//! the `stale` one, swaps the roles, and draws the buffer just written. The
//! role swap moves no data.
//!
//! ### Devices
//!
//! The pipeline is generic over [`DeviceContext`]. [`GpuContext`] runs on
//! wgpu, in a window or headless; [`SoftwareContext`] runs the same group
//! grid on the CPU and records what every draw saw.
//!
//! ```ignore
//! let mut scheduler = FrameScheduler::new(
//!     SoftwareContext::new([800.0, 600.0]),
//!     &population.records(),
//!     Kernel::Integrate,
//!     WorkGroupSize::DEFAULT,
//!     BlendMode::Alpha,
//! )?;
//! scheduler.step(0.0, 1.0 / 60.0)?;
//! ```

// Lets `#[derive(Record)]` refer to `::starfield` from inside this crate.
extern crate self as starfield;

pub mod compute;
mod device;
pub mod error;
mod gpu;
pub mod layout;
pub mod pingpong;
pub mod render;
mod scheduler;
pub mod shaders;
mod simulation;
pub mod software;
pub mod spawn;
pub mod time;

pub use bytemuck;
pub use glam::{Vec2, Vec3, Vec4};
pub use starfield_derive::Record;

pub use compute::{ComputeStage, DispatchGroups, Kernel, WorkGroupSize};
pub use device::{BufferInit, DeviceContext, FrameParams};
pub use error::{ConfigError, GpuError, LayoutError, PipelineError, SimulationError};
pub use gpu::{GpuBuffer, GpuContext, GpuKernel, GpuProgram, OFFSCREEN_FORMAT};
pub use layout::{FieldDesc, ParticleRecord, ScalarKind, RECORD_SCALARS, RECORD_SIZE};
pub use pingpong::{Binding, BufferLabel, BufferPair, ComputeBindings, Role};
pub use render::{BlendMode, GeometryView, RenderStage};
pub use scheduler::FrameScheduler;
pub use simulation::Simulation;
pub use software::SoftwareContext;
pub use spawn::{Population, Preset, SpawnContext};

/// Layout descriptor implemented by `#[derive(Record)]`.
///
/// # Do Not Implement Manually
///
/// The derive macro checks at compile time that the Rust layout matches the
/// WGSL layout; a hand-written impl skips those checks.
pub trait RecordLayout: bytemuck::Pod {
    /// Struct name, used for the WGSL struct as well.
    const NAME: &'static str;

    /// Fields in declaration order.
    const FIELDS: &'static [FieldDesc];

    /// WGSL struct definition with the same fields in the same order.
    const WGSL_STRUCT: &'static str;
}

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use starfield::prelude::*;
/// ```
pub mod prelude {
    pub use crate::compute::{Kernel, WorkGroupSize};
    pub use crate::device::DeviceContext;
    pub use crate::error::SimulationError;
    pub use crate::layout::ParticleRecord;
    pub use crate::render::BlendMode;
    pub use crate::scheduler::FrameScheduler;
    pub use crate::simulation::Simulation;
    pub use crate::software::SoftwareContext;
    pub use crate::spawn::{Population, Preset, SpawnContext};
    pub use crate::time::Time;
    pub use crate::{GpuContext, Record, RecordLayout};
    pub use crate::{Vec2, Vec3, Vec4};
    pub use bytemuck::{Pod, Zeroable};
}
