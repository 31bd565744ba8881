//! Particle record layout.
//!
//! One particle is three packed `vec4<f32>` slots:
//!
//! | field             | offset | contents                 | render stage |
//! |-------------------|--------|--------------------------|--------------|
//! | `position_radius` | 0      | x, y, z, radius          | location 0   |
//! | `velocity_pad`    | 16     | vx, vy, vz, unused       | skipped      |
//! | `color`           | 32     | r, g, b, a               | location 1   |
//!
//! The host seeding code, the compute kernel and vertex assembly all read
//! this table through [`RecordLayout`], which `#[derive(Record)]` generates
//! from the struct itself.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::error::LayoutError;
use crate::{Record, RecordLayout};

/// Scalar type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Float,
    Uint,
}

/// Descriptor for one field of a fixed-layout record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDesc {
    /// Field name, shared by the Rust struct and the WGSL struct.
    pub name: &'static str,
    /// Byte offset from the start of the record.
    pub offset: u32,
    /// Number of 4-byte scalars.
    pub scalars: u32,
    pub kind: ScalarKind,
    /// Vertex shader location, or `None` if vertex assembly skips the field.
    pub location: Option<u32>,
}

impl FieldDesc {
    /// Size of the field in bytes.
    #[inline]
    pub const fn size(&self) -> u32 {
        self.scalars * 4
    }

    /// WGSL type of the field.
    pub fn wgsl_type(&self) -> String {
        let scalar = match self.kind {
            ScalarKind::Float => "f32",
            ScalarKind::Uint => "u32",
        };
        match self.scalars {
            1 => scalar.to_string(),
            n => format!("vec{}<{}>", n, scalar),
        }
    }

    /// Vertex format used when the field is read as a vertex attribute.
    pub fn vertex_format(&self) -> wgpu::VertexFormat {
        match (self.kind, self.scalars) {
            (ScalarKind::Float, 1) => wgpu::VertexFormat::Float32,
            (ScalarKind::Float, 2) => wgpu::VertexFormat::Float32x2,
            (ScalarKind::Float, 3) => wgpu::VertexFormat::Float32x3,
            (ScalarKind::Float, _) => wgpu::VertexFormat::Float32x4,
            (ScalarKind::Uint, 1) => wgpu::VertexFormat::Uint32,
            (ScalarKind::Uint, 2) => wgpu::VertexFormat::Uint32x2,
            (ScalarKind::Uint, 3) => wgpu::VertexFormat::Uint32x3,
            (ScalarKind::Uint, _) => wgpu::VertexFormat::Uint32x4,
        }
    }
}

/// State of one particle, as stored in both buffers of the pair.
#[repr(C)]
#[derive(Record, Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    /// x, y, z in pixels, w = radius in pixels.
    #[vertex(location = 0)]
    pub position_radius: [f32; 4],
    /// vx, vy, vz in pixels per frame; w is unused.
    pub velocity_pad: [f32; 4],
    /// Straight (non-premultiplied) RGBA.
    #[vertex(location = 1)]
    pub color: [f32; 4],
}

/// Size of one [`ParticleRecord`] in bytes.
pub const RECORD_SIZE: usize = std::mem::size_of::<ParticleRecord>();

/// Number of `f32` scalars in one [`ParticleRecord`].
pub const RECORD_SCALARS: usize = RECORD_SIZE / std::mem::size_of::<f32>();

impl ParticleRecord {
    pub fn new(position: Vec3, radius: f32, velocity: Vec3, color: Vec4) -> Self {
        Self {
            position_radius: position.extend(radius).to_array(),
            velocity_pad: velocity.extend(0.0).to_array(),
            color: color.to_array(),
        }
    }

    /// Build a record from its 12 scalars in field order.
    pub fn from_scalars(scalars: [f32; RECORD_SCALARS]) -> Self {
        bytemuck::cast(scalars)
    }

    /// The record's 12 scalars in field order.
    pub fn to_scalars(&self) -> [f32; RECORD_SCALARS] {
        bytemuck::cast(*self)
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec4::from_array(self.position_radius).truncate()
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.position_radius[3]
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        Vec4::from_array(self.velocity_pad).truncate()
    }

    #[inline]
    pub fn color(&self) -> Vec4 {
        Vec4::from_array(self.color)
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position_radius = position.extend(self.radius()).to_array();
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity_pad = velocity.extend(self.velocity_pad[3]).to_array();
    }
}

/// Total byte size of one record of type `R`.
#[inline]
pub fn record_size<R: RecordLayout>() -> usize {
    std::mem::size_of::<R>()
}

/// Byte offset of the named field of `R`, if it exists.
pub fn field_offset<R: RecordLayout>(name: &str) -> Option<u32> {
    field::<R>(name).map(|f| f.offset)
}

/// Descriptor of the named field of `R`, if it exists.
pub fn field<R: RecordLayout>(name: &str) -> Option<&'static FieldDesc> {
    R::FIELDS.iter().find(|f| f.name == name)
}

/// Fields of `R` read by vertex assembly, ordered by shader location.
pub fn vertex_fields<R: RecordLayout>() -> Vec<FieldDesc> {
    let mut fields: Vec<FieldDesc> = R::FIELDS.iter().filter(|f| f.location.is_some()).copied().collect();
    fields.sort_by_key(|f| f.location);
    fields
}

/// Interpret a flat scalar sequence as exactly `capacity` particle records.
///
/// Fails with [`LayoutError::SizeMismatch`] unless the sequence holds
/// `capacity * RECORD_SCALARS` scalars; nothing is truncated or padded.
pub fn seed_records(scalars: &[f32], capacity: u32) -> Result<&[ParticleRecord], LayoutError> {
    let bytes: &[u8] = bytemuck::cast_slice(scalars);
    check_seed_len(bytes.len(), capacity)?;
    bytemuck::try_cast_slice(bytes).map_err(|_| LayoutError::SizeMismatch {
        capacity,
        expected: capacity as usize * RECORD_SIZE,
        actual: bytes.len(),
    })
}

/// Check that a seed of `len` bytes covers exactly `capacity` records.
pub fn check_seed_len(len: usize, capacity: u32) -> Result<(), LayoutError> {
    let expected = capacity as usize * RECORD_SIZE;
    if len != expected {
        return Err(LayoutError::SizeMismatch {
            capacity,
            expected,
            actual: len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout_offsets() {
        assert_eq!(RECORD_SIZE, 48);
        assert_eq!(RECORD_SCALARS, 12);
        assert_eq!(field_offset::<ParticleRecord>("position_radius"), Some(0));
        assert_eq!(field_offset::<ParticleRecord>("velocity_pad"), Some(16));
        assert_eq!(field_offset::<ParticleRecord>("color"), Some(32));
        assert_eq!(field_offset::<ParticleRecord>("mass"), None);
    }

    #[test]
    fn test_vertex_fields_skip_velocity() {
        let fields = vertex_fields::<ParticleRecord>();
        let names: Vec<_> = fields.iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["position_radius", "color"]);
        assert_eq!(fields[0].location, Some(0));
        assert_eq!(fields[1].location, Some(1));
        assert_eq!(fields[1].vertex_format(), wgpu::VertexFormat::Float32x4);
    }

    #[test]
    fn test_scalars_roundtrip_field_order() {
        let record = ParticleRecord::new(
            Vec3::new(10.0, 20.0, 0.0),
            3.0,
            Vec3::new(1.0, 0.0, 0.0),
            Vec4::new(1.0, 0.5, 0.25, 1.0),
        );
        let scalars = record.to_scalars();
        assert_eq!(&scalars[0..4], &[10.0, 20.0, 0.0, 3.0]);
        assert_eq!(&scalars[4..8], &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(&scalars[8..12], &[1.0, 0.5, 0.25, 1.0]);
        assert_eq!(ParticleRecord::from_scalars(scalars), record);
    }

    #[test]
    fn test_seed_records_accepts_exact_length() {
        let scalars = vec![0.5f32; 4 * RECORD_SCALARS];
        let records = seed_records(&scalars, 4).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].color, [0.5; 4]);
    }

    #[test]
    fn test_seed_records_rejects_short_seed() {
        let scalars = vec![0.0f32; 4 * RECORD_SCALARS - 3];
        let err = seed_records(&scalars, 4).unwrap_err();
        assert_eq!(
            err,
            LayoutError::SizeMismatch {
                capacity: 4,
                expected: 192,
                actual: 180,
            }
        );
    }

    #[test]
    fn test_seed_records_rejects_long_seed() {
        let scalars = vec![0.0f32; 2 * RECORD_SCALARS + 1];
        assert!(seed_records(&scalars, 2).is_err());
    }

    #[test]
    fn test_wgsl_struct_matches_fields() {
        let wgsl = ParticleRecord::WGSL_STRUCT;
        assert!(wgsl.starts_with("struct ParticleRecord {"));
        assert!(wgsl.contains("position_radius: vec4<f32>,"));
        assert!(wgsl.contains("velocity_pad: vec4<f32>,"));
        assert!(wgsl.contains("color: vec4<f32>,"));
    }
}
