//! Render stage.
//!
//! Each particle record is one instance. The vertex stage expands it into a
//! six-vertex quad centered on the record's position whose half-size is the
//! record's radius in pixels, and the fragment stage shades a soft disc with
//! the record's color. Alpha blending is enabled for the whole pass so
//! overlapping particles accumulate.

use crate::device::DeviceContext;
use crate::error::GpuError;
use crate::layout::{self, FieldDesc};
use crate::pingpong::Binding;
use crate::RecordLayout;

/// Vertices emitted per particle (two triangles).
pub const VERTICES_PER_PARTICLE: u32 = 6;

/// How particle colors are combined with the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Standard alpha blending (default).
    #[default]
    Alpha,
    /// Additive blending. Overlapping particles become brighter.
    Additive,
}

/// How to read records in a buffer as vertex attributes.
///
/// Only fields marked `#[vertex(location = N)]` are fetched; everything
/// else in the record (the velocity slot) is stepped over by the stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryView {
    /// Distance between consecutive records in bytes.
    pub stride: u32,
    /// Vertex attributes ordered by shader location.
    pub attributes: Vec<FieldDesc>,
}

impl GeometryView {
    /// View over a buffer of `R` records.
    pub fn of<R: RecordLayout>() -> Self {
        Self {
            stride: layout::record_size::<R>() as u32,
            attributes: layout::vertex_fields::<R>(),
        }
    }

    /// Attribute at shader `location`, if the view reads one there.
    pub fn attribute(&self, location: u32) -> Option<&FieldDesc> {
        self.attributes.iter().find(|a| a.location == Some(location))
    }

    /// Attribute named `name`, if the view reads it.
    pub fn attribute_named(&self, name: &str) -> Option<&FieldDesc> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Fetch the attribute at `location` of record `index` from raw buffer
    /// bytes, as vertex assembly would. Missing lanes read as zero.
    pub fn fetch(&self, bytes: &[u8], index: usize, location: u32) -> Option<[f32; 4]> {
        let attribute = self.attribute(location)?;
        let start = index * self.stride as usize + attribute.offset as usize;
        let end = start + attribute.size() as usize;
        let raw = bytes.get(start..end)?;

        let mut out = [0.0f32; 4];
        for (lane, chunk) in out.iter_mut().zip(raw.chunks_exact(4)) {
            *lane = bytemuck::pod_read_unaligned(chunk);
        }
        Some(out)
    }
}

/// The linked render program and its blend mode.
pub struct RenderStage<D: DeviceContext> {
    program: D::RenderProgram,
    blend: BlendMode,
}

impl<D: DeviceContext> RenderStage<D> {
    pub fn new(device: &mut D, view: &GeometryView, blend: BlendMode) -> Result<Self, GpuError> {
        for required in ["position_radius", "color"] {
            if view.attribute_named(required).is_none() {
                return Err(GpuError::ProgramLinking(format!(
                    "geometry view has no `{}` vertex attribute",
                    required
                )));
            }
        }
        let program = device.compile_program(view, blend)?;
        log::debug!("Linked render program ({:?} blending, stride {})", blend, view.stride);
        Ok(Self { program, blend })
    }

    pub fn blend(&self) -> BlendMode {
        self.blend
    }

    /// Record a draw of `count` particles from `vertices`.
    pub fn draw(
        &self,
        device: &mut D,
        vertices: Binding<'_, D::Buffer>,
        view: &GeometryView,
        count: u32,
    ) -> Result<(), GpuError> {
        device.draw(&self.program, vertices, view, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ParticleRecord;
    use glam::{Vec3, Vec4};

    #[test]
    fn test_view_skips_velocity() {
        let view = GeometryView::of::<ParticleRecord>();
        assert_eq!(view.stride, 48);
        assert_eq!(view.attributes.len(), 2);
        assert!(view.attribute_named("velocity_pad").is_none());
        assert_eq!(view.attribute(0).map(|a| a.offset), Some(0));
        assert_eq!(view.attribute(1).map(|a| a.offset), Some(32));
    }

    #[test]
    fn test_fetch_reads_record_fields() {
        let records = [
            ParticleRecord::new(Vec3::new(1.0, 2.0, 3.0), 4.0, Vec3::splat(9.0), Vec4::new(0.1, 0.2, 0.3, 0.4)),
            ParticleRecord::new(Vec3::new(5.0, 6.0, 7.0), 8.0, Vec3::splat(9.0), Vec4::ONE),
        ];
        let bytes: &[u8] = bytemuck::cast_slice(&records);
        let view = GeometryView::of::<ParticleRecord>();

        assert_eq!(view.fetch(bytes, 0, 0), Some([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(view.fetch(bytes, 0, 1), Some([0.1, 0.2, 0.3, 0.4]));
        assert_eq!(view.fetch(bytes, 1, 0), Some([5.0, 6.0, 7.0, 8.0]));
        assert_eq!(view.fetch(bytes, 2, 0), None);
        assert_eq!(view.fetch(bytes, 0, 2), None);
    }
}
