//! Compute stage: kernels and work-group partitioning.
//!
//! A dispatch covers the population with groups of `x * y` work items. The
//! number of groups is `ceil(N / (x * y))`, laid out along the first grid
//! dimension and folded into the second when it exceeds the device's
//! per-dimension limit. Every kernel maps its work item back to a record
//! index with [`record_index`] and does nothing when that index is at or
//! past the population; those are the leftovers of rounding up to whole
//! groups.

use crate::device::DeviceContext;
use crate::error::{ConfigError, GpuError, PipelineError};
use crate::pingpong::ComputeBindings;

/// Work items per group along each axis (`@workgroup_size(x, y, 1)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkGroupSize {
    x: u32,
    y: u32,
}

impl WorkGroupSize {
    pub const DEFAULT: WorkGroupSize = WorkGroupSize { x: 256, y: 1 };

    /// Both dimensions must be non-zero and `x * y` must fit in a `u32`.
    pub fn new(x: u32, y: u32) -> Result<Self, ConfigError> {
        if x == 0 || y == 0 {
            return Err(ConfigError::ZeroWorkGroup { x, y });
        }
        if x.checked_mul(y).is_none() {
            return Err(ConfigError::WorkGroupOverflow { x, y });
        }
        Ok(Self { x, y })
    }

    #[inline]
    pub const fn x(&self) -> u32 {
        self.x
    }

    #[inline]
    pub const fn y(&self) -> u32 {
        self.y
    }

    /// Work items in one group.
    #[inline]
    pub const fn invocations(&self) -> u32 {
        self.x * self.y
    }

    /// Groups needed to cover `population` records.
    ///
    /// `max_per_dimension` is the device limit on groups per grid axis.
    pub fn groups_for(&self, population: u32, max_per_dimension: u32) -> Result<DispatchGroups, ConfigError> {
        let total = (population as u64).div_ceil(self.invocations() as u64);
        let limit = max_per_dimension.max(1) as u64;
        if total <= limit {
            return Ok(DispatchGroups { x: total as u32, y: 1 });
        }
        let y = total.div_ceil(limit);
        if y > limit {
            return Err(ConfigError::DispatchTooLarge {
                groups: total,
                limit: max_per_dimension,
            });
        }
        Ok(DispatchGroups {
            x: limit as u32,
            y: y as u32,
        })
    }
}

impl Default for WorkGroupSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Number of groups dispatched along each grid axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGroups {
    pub x: u32,
    pub y: u32,
}

impl DispatchGroups {
    /// Total number of groups.
    #[inline]
    pub fn total(&self) -> u64 {
        self.x as u64 * self.y as u64
    }

    /// Total number of work items launched with groups of `size`.
    #[inline]
    pub fn coverage(&self, size: WorkGroupSize) -> u64 {
        self.total() * size.invocations() as u64
    }
}

/// Record index handled by one work item, or `None` if it is out of range.
///
/// `group` is the work item's group id, `local_index` its linear index
/// within the group. Mirrors the index computation in the generated WGSL.
#[inline]
pub fn record_index(
    group: (u32, u32),
    local_index: u32,
    groups: DispatchGroups,
    size: WorkGroupSize,
    population: u32,
) -> Option<u32> {
    let linear_group = group.1 as u64 * groups.x as u64 + group.0 as u64;
    let index = linear_group * size.invocations() as u64 + local_index as u64;
    (index < population as u64).then_some(index as u32)
}

/// Per-particle update rule run by the compute stage.
///
/// Every kernel reads the whole source population and writes one
/// destination record per work item. Velocities are in pixels per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    /// Copy every record unchanged.
    Identity,
    /// `position += velocity`.
    Integrate,
    /// All-pairs softened gravity, then `position += velocity`.
    ///
    /// Each other particle pulls with `strength / (d² + softening)^1.5`
    /// times the separation vector.
    Gravity { strength: f32, softening: f32 },
    /// Raw WGSL statements. The snippet sees `index: u32`, the mutable copy
    /// `p: ParticleRecord` of `source[index]`, the read-only
    /// `source: array<ParticleRecord>` and `params: FrameParams`; `p` is
    /// written to `destination[index]` afterwards.
    Wgsl(String),
}

impl Kernel {
    /// Gravity with the strength and softening used by the galaxy demo.
    pub fn gravity() -> Self {
        Kernel::Gravity {
            strength: 0.5,
            softening: 100.0,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Identity => "identity",
            Kernel::Integrate => "integrate",
            Kernel::Gravity { .. } => "gravity",
            Kernel::Wgsl(_) => "custom",
        }
    }

    /// WGSL statements for the kernel body.
    pub fn to_wgsl(&self) -> String {
        match self {
            Kernel::Identity => "    // Identity: record is copied unchanged".to_string(),
            Kernel::Integrate => r#"    // Integrate
    p.position_radius = vec4<f32>(p.position_radius.xyz + p.velocity_pad.xyz, p.position_radius.w);"#
                .to_string(),
            Kernel::Gravity { strength, softening } => format!(
                r#"    // Gravity
    let here = p.position_radius.xyz;
    var velocity = p.velocity_pad.xyz;
    for (var i = 0u; i < params.population; i++) {{
        if i == index {{
            continue;
        }}
        let toward = source[i].position_radius.xyz - here;
        let dist_sq = dot(toward, toward) + {softening};
        velocity += toward * ({strength} / (dist_sq * sqrt(dist_sq)));
    }}
    p.velocity_pad = vec4<f32>(velocity, p.velocity_pad.w);
    p.position_radius = vec4<f32>(here + velocity, p.position_radius.w);"#,
                softening = wgsl_float(*softening),
                strength = wgsl_float(*strength),
            ),
            Kernel::Wgsl(code) => code.clone(),
        }
    }
}

/// Format an `f32` as a WGSL float literal.
pub(crate) fn wgsl_float(value: f32) -> String {
    let s = format!("{:?}", value);
    if s.contains('.') || s.contains('e') {
        s
    } else {
        format!("{}.0", s)
    }
}

/// A compiled kernel plus the group shape it was compiled for.
pub struct ComputeStage<D: DeviceContext> {
    program: D::ComputeProgram,
    kernel: Kernel,
    group: WorkGroupSize,
}

impl<D: DeviceContext> ComputeStage<D> {
    /// Compile `kernel` on `device`. Fails if the group shape exceeds the
    /// device limit or the kernel does not compile.
    pub fn new(device: &mut D, kernel: Kernel, group: WorkGroupSize) -> Result<Self, PipelineError> {
        let limit = device.max_invocations_per_group();
        if group.invocations() > limit {
            return Err(ConfigError::WorkGroupTooLarge {
                x: group.x(),
                y: group.y(),
                limit,
            }
            .into());
        }
        let program = device.compile_kernel(&kernel, group)?;
        log::debug!("Compiled {} kernel with work groups of {}x{}", kernel.name(), group.x(), group.y());
        Ok(Self { program, kernel, group })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn group(&self) -> WorkGroupSize {
        self.group
    }

    /// Record one dispatch rewriting `bindings.destination` from
    /// `bindings.source`.
    pub fn dispatch(
        &self,
        device: &mut D,
        bindings: ComputeBindings<'_, D::Buffer>,
        groups: DispatchGroups,
    ) -> Result<(), GpuError> {
        device.dispatch(&self.program, bindings, groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_LIMIT: u32 = 65_535;

    #[test]
    fn test_four_records_two_by_one() {
        let size = WorkGroupSize::new(2, 1).unwrap();
        let groups = size.groups_for(4, NO_LIMIT).unwrap();
        assert_eq!(groups, DispatchGroups { x: 2, y: 1 });
        assert_eq!(groups.coverage(size), 4);

        let covered: Vec<_> = (0..groups.x)
            .flat_map(|g| (0..size.invocations()).map(move |l| (g, l)))
            .map(|(g, l)| record_index((g, 0), l, groups, size, 4))
            .collect();
        assert_eq!(covered, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_coverage_never_short() {
        for (x, y) in [(1, 1), (2, 1), (7, 3), (64, 4), (256, 1)] {
            let size = WorkGroupSize::new(x, y).unwrap();
            for n in [1u32, 2, 3, 63, 64, 65, 255, 256, 257, 1000, 60_000] {
                let groups = size.groups_for(n, NO_LIMIT).unwrap();
                let coverage = groups.coverage(size);
                assert!(coverage >= n as u64, "{}x{} short for {}", x, y, n);
                assert!(coverage - (n as u64) < size.invocations() as u64);
                let exact = n % size.invocations() == 0;
                assert_eq!(coverage == n as u64, exact);
            }
        }
    }

    #[test]
    fn test_out_of_range_items_are_skipped() {
        let size = WorkGroupSize::new(4, 2).unwrap();
        let groups = size.groups_for(10, NO_LIMIT).unwrap();
        assert_eq!(groups.total(), 2);

        let mut hits = vec![0u32; 10];
        let mut skipped = 0;
        for g in 0..groups.x {
            for l in 0..size.invocations() {
                match record_index((g, 0), l, groups, size, 10) {
                    Some(i) => hits[i as usize] += 1,
                    None => skipped += 1,
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
        assert_eq!(skipped, 6);
    }

    #[test]
    fn test_groups_fold_into_second_dimension() {
        let size = WorkGroupSize::new(1, 1).unwrap();
        let groups = size.groups_for(10, 4).unwrap();
        assert_eq!(groups, DispatchGroups { x: 4, y: 3 });

        let mut seen = Vec::new();
        for gy in 0..groups.y {
            for gx in 0..groups.x {
                if let Some(i) = record_index((gx, gy), 0, groups, size, 10) {
                    seen.push(i);
                }
            }
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_dispatch_too_large() {
        let size = WorkGroupSize::new(1, 1).unwrap();
        assert!(matches!(
            size.groups_for(17, 4),
            Err(ConfigError::DispatchTooLarge { groups: 17, limit: 4 })
        ));
    }

    #[test]
    fn test_zero_work_group_rejected() {
        assert_eq!(WorkGroupSize::new(0, 1), Err(ConfigError::ZeroWorkGroup { x: 0, y: 1 }));
        assert_eq!(WorkGroupSize::new(8, 0), Err(ConfigError::ZeroWorkGroup { x: 8, y: 0 }));
    }

    #[test]
    fn test_overflowing_work_group_rejected() {
        assert_eq!(
            WorkGroupSize::new(65_536, 65_536),
            Err(ConfigError::WorkGroupOverflow { x: 65_536, y: 65_536 })
        );
        let widest = WorkGroupSize::new(u32::MAX, 1).unwrap();
        assert_eq!(widest.invocations(), u32::MAX);
        assert_eq!((widest.x(), widest.y()), (u32::MAX, 1));
    }

    #[test]
    fn test_kernel_wgsl_snippets() {
        assert!(Kernel::Integrate.to_wgsl().contains("p.velocity_pad.xyz"));
        let gravity = Kernel::Gravity {
            strength: 2.0,
            softening: 0.5,
        }
        .to_wgsl();
        assert!(gravity.contains("2.0 / (dist_sq"));
        assert!(gravity.contains("+ 0.5;"));
        assert_eq!(Kernel::Wgsl("p.color.r = 1.0;".into()).to_wgsl(), "p.color.r = 1.0;");
    }

    #[test]
    fn test_wgsl_float_literals() {
        assert_eq!(wgsl_float(1.0), "1.0");
        assert_eq!(wgsl_float(0.25), "0.25");
        assert_eq!(wgsl_float(100.0), "100.0");
    }
}
