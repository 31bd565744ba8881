//! Storage buffer pair with ping-pong roles.
//!
//! Two physical buffers, A and B, each paired with its geometry view. A
//! single parity index says which one is `current` (authoritative, read by
//! compute and drawn) and which is `stale` (about to be overwritten).
//! Buffers and views live in the same slot, so relabeling one relabels the
//! other.

use crate::device::{BufferInit, DeviceContext};
use crate::error::{ConfigError, GpuError, PipelineError};
use crate::layout::{self, ParticleRecord};
use crate::render::GeometryView;

/// Compute binding slot of the buffer being read.
pub const SOURCE_SLOT: u32 = 0;
/// Compute binding slot of the buffer being written.
pub const DESTINATION_SLOT: u32 = 1;
/// Compute binding slot of the [`FrameParams`](crate::FrameParams) uniform.
pub const PARAMS_SLOT: u32 = 2;
/// Vertex buffer slot the render stage reads records from.
pub const VERTEX_SLOT: u32 = 0;

/// How a buffer is exposed to a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Read-only storage for the compute kernel. Always the current buffer.
    ComputeSource,
    /// Read-write storage for the compute kernel. Always the stale buffer.
    ComputeDestination,
    /// Instance-rate vertex source for the render stage. Always the current
    /// buffer.
    Vertex,
}

/// Physical buffer of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLabel {
    A,
    B,
}

/// A buffer exposed in a role at a binding slot. Binding is by reference;
/// no data moves.
pub struct Binding<'a, B> {
    pub buffer: &'a B,
    pub role: Role,
    pub slot: u32,
    pub label: BufferLabel,
}

impl<B> Clone for Binding<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Binding<'_, B> {}

/// Source and destination bindings of one compute dispatch.
pub struct ComputeBindings<'a, B> {
    pub source: Binding<'a, B>,
    pub destination: Binding<'a, B>,
}

impl<B> Clone for ComputeBindings<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for ComputeBindings<'_, B> {}

struct Slot<B> {
    buffer: B,
    view: GeometryView,
}

/// Two equally sized particle buffers and their geometry views.
pub struct BufferPair<B> {
    slots: [Slot<B>; 2],
    current: usize,
    capacity: u32,
}

impl<B> BufferPair<B> {
    /// Allocate the pair: A seeded with `seed`, B reserved.
    ///
    /// The population count is `seed.len()`; it never changes afterwards.
    pub fn allocate<D>(device: &mut D, seed: &[ParticleRecord]) -> Result<Self, PipelineError>
    where
        D: DeviceContext<Buffer = B>,
    {
        if seed.is_empty() {
            return Err(ConfigError::EmptyPopulation.into());
        }
        let capacity = u32::try_from(seed.len()).map_err(|_| GpuError::BufferAllocation {
            label: "Particle Buffer A".to_string(),
            message: format!("{} records exceed the addressable population", seed.len()),
        })?;

        let a = device.allocate("Particle Buffer A", capacity, BufferInit::Seed(seed))?;
        let b = device.allocate("Particle Buffer B", capacity, BufferInit::Reserve)?;
        log::debug!(
            "Allocated particle buffer pair: {} records, {} bytes each",
            capacity,
            device.buffer_size(&a)
        );

        let view = GeometryView::of::<ParticleRecord>();
        Ok(Self {
            slots: [
                Slot {
                    buffer: a,
                    view: view.clone(),
                },
                Slot { buffer: b, view },
            ],
            current: 0,
            capacity,
        })
    }

    /// Allocate the pair from a flat scalar sequence of `capacity` records.
    pub fn from_scalars<D>(device: &mut D, capacity: u32, scalars: &[f32]) -> Result<Self, PipelineError>
    where
        D: DeviceContext<Buffer = B>,
    {
        if capacity == 0 {
            return Err(ConfigError::EmptyPopulation.into());
        }
        let seed = layout::seed_records(scalars, capacity)?;
        Self::allocate(device, seed)
    }

    /// Number of records in each buffer.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Which physical buffer is current.
    #[inline]
    pub fn current_label(&self) -> BufferLabel {
        label_of(self.current)
    }

    /// The authoritative buffer.
    #[inline]
    pub fn current(&self) -> &B {
        &self.slots[self.current].buffer
    }

    /// The buffer about to be overwritten.
    #[inline]
    pub fn stale(&self) -> &B {
        &self.slots[1 - self.current].buffer
    }

    /// Geometry view over the current buffer.
    #[inline]
    pub fn current_view(&self) -> &GeometryView {
        &self.slots[self.current].view
    }

    /// Geometry view over the stale buffer.
    #[inline]
    pub fn stale_view(&self) -> &GeometryView {
        &self.slots[1 - self.current].view
    }

    /// Physical buffer by label, regardless of role.
    pub fn buffer(&self, label: BufferLabel) -> &B {
        match label {
            BufferLabel::A => &self.slots[0].buffer,
            BufferLabel::B => &self.slots[1].buffer,
        }
    }

    /// Expose a buffer in `role` at binding `slot`.
    pub fn bind_as(&self, role: Role, slot: u32) -> Binding<'_, B> {
        let index = match role {
            Role::ComputeSource | Role::Vertex => self.current,
            Role::ComputeDestination => 1 - self.current,
        };
        Binding {
            buffer: &self.slots[index].buffer,
            role,
            slot,
            label: label_of(index),
        }
    }

    /// Bindings for one dispatch: current as source, stale as destination.
    pub fn compute_bindings(&self) -> ComputeBindings<'_, B> {
        ComputeBindings {
            source: self.bind_as(Role::ComputeSource, SOURCE_SLOT),
            destination: self.bind_as(Role::ComputeDestination, DESTINATION_SLOT),
        }
    }

    /// Relabel roles: stale becomes current and current becomes stale, for
    /// buffers and views together. O(1); no data moves.
    pub(crate) fn swap(&mut self) {
        self.current = 1 - self.current;
    }
}

fn label_of(index: usize) -> BufferLabel {
    if index == 0 {
        BufferLabel::A
    } else {
        BufferLabel::B
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareContext;
    use glam::{Vec3, Vec4};

    fn seed(n: usize) -> Vec<ParticleRecord> {
        (0..n)
            .map(|i| ParticleRecord::new(Vec3::new(i as f32, 0.0, 0.0), 3.0, Vec3::ZERO, Vec4::ONE))
            .collect()
    }

    #[test]
    fn test_initial_roles() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let pair = BufferPair::allocate(&mut device, &seed(4)).unwrap();
        assert_eq!(pair.capacity(), 4);
        assert_eq!(pair.current_label(), BufferLabel::A);
        assert_eq!(pair.bind_as(Role::ComputeSource, SOURCE_SLOT).label, BufferLabel::A);
        assert_eq!(pair.bind_as(Role::ComputeDestination, DESTINATION_SLOT).label, BufferLabel::B);
        assert_eq!(pair.bind_as(Role::Vertex, VERTEX_SLOT).label, BufferLabel::A);
    }

    #[test]
    fn test_swap_relabels_without_copy() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let mut pair = BufferPair::allocate(&mut device, &seed(4)).unwrap();
        let a = *pair.buffer(BufferLabel::A);
        let b = *pair.buffer(BufferLabel::B);

        pair.swap();
        assert_eq!(pair.current_label(), BufferLabel::B);
        assert_eq!(*pair.current(), b);
        assert_eq!(*pair.stale(), a);

        pair.swap();
        assert_eq!(pair.current_label(), BufferLabel::A);
        assert_eq!(*pair.current(), a);
        assert_eq!(*pair.stale(), b);
    }

    #[test]
    fn test_roles_never_alias() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let mut pair = BufferPair::allocate(&mut device, &seed(3)).unwrap();
        for _ in 0..5 {
            let bindings = pair.compute_bindings();
            assert_ne!(bindings.source.label, bindings.destination.label);
            assert_ne!(*bindings.source.buffer, *bindings.destination.buffer);
            pair.swap();
        }
    }

    #[test]
    fn test_views_follow_buffers() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let mut pair = BufferPair::allocate(&mut device, &seed(2)).unwrap();
        let view_a = pair.current_view() as *const GeometryView;
        pair.swap();
        assert_eq!(pair.stale_view() as *const GeometryView, view_a);
        pair.swap();
        assert_eq!(pair.current_view() as *const GeometryView, view_a);
    }

    #[test]
    fn test_reserved_buffer_has_full_size() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let pair = BufferPair::allocate(&mut device, &seed(5)).unwrap();
        assert_eq!(device.buffer_size(pair.buffer(BufferLabel::B)), 5 * layout::RECORD_SIZE as u64);
        assert_eq!(device.read_records(pair.buffer(BufferLabel::A)).unwrap(), seed(5));
    }

    #[test]
    fn test_empty_population_rejected() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let result = BufferPair::allocate(&mut device, &[]);
        assert!(matches!(result, Err(PipelineError::Config(ConfigError::EmptyPopulation))));
    }

    #[test]
    fn test_from_scalars_rejects_mismatch() {
        let mut device = SoftwareContext::new([100.0, 100.0]);
        let scalars = vec![0.0f32; 4 * layout::RECORD_SCALARS - 3];
        let result = BufferPair::from_scalars(&mut device, 4, &scalars);
        assert!(matches!(
            result,
            Err(PipelineError::Layout(crate::error::LayoutError::SizeMismatch { .. }))
        ));
    }
}
