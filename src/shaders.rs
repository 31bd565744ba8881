//! WGSL generation for the compute and render programs.
//!
//! Structs are emitted from [`RecordLayout::WGSL_STRUCT`], so the shader
//! side of the record layout cannot drift from the Rust side.

use crate::compute::{Kernel, WorkGroupSize};
use crate::device::FrameParams;
use crate::layout::ParticleRecord;
use crate::pingpong::{DESTINATION_SLOT, PARAMS_SLOT, SOURCE_SLOT};
use crate::render::GeometryView;
use crate::RecordLayout;

/// Entry point of the compute shader.
pub const COMPUTE_ENTRY: &str = "main";
/// Entry point of the vertex stage.
pub const VERTEX_ENTRY: &str = "vs_main";
/// Entry point of the fragment stage.
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Generate the compute shader running `kernel` with groups of `group`.
///
/// The work item's record index is
/// `(group_id.y * num_groups.x + group_id.x) * (x * y) + local_index`,
/// matching [`record_index`](crate::compute::record_index).
pub fn compute_shader(kernel: &Kernel, group: WorkGroupSize) -> String {
    format!(
        r#"{record}

{params}

@group(0) @binding({source_slot}) var<storage, read> source: array<{record_name}>;
@group(0) @binding({destination_slot}) var<storage, read_write> destination: array<{record_name}>;
@group(0) @binding({params_slot}) var<uniform> params: {params_name};

@compute @workgroup_size({x}, {y}, 1)
fn {entry}(
    @builtin(workgroup_id) group_id: vec3<u32>,
    @builtin(num_workgroups) num_groups: vec3<u32>,
    @builtin(local_invocation_index) local_index: u32,
) {{
    let index = (group_id.y * num_groups.x + group_id.x) * {invocations}u + local_index;
    if index >= params.population {{
        return;
    }}

    var p = source[index];

{body}

    destination[index] = p;
}}
"#,
        record = ParticleRecord::WGSL_STRUCT,
        params = FrameParams::WGSL_STRUCT,
        record_name = ParticleRecord::NAME,
        params_name = FrameParams::NAME,
        source_slot = SOURCE_SLOT,
        destination_slot = DESTINATION_SLOT,
        params_slot = PARAMS_SLOT,
        x = group.x(),
        y = group.y(),
        invocations = group.invocations(),
        entry = COMPUTE_ENTRY,
        body = kernel.to_wgsl(),
    )
}

/// Generate the render shader for records read through `view`.
///
/// Each instance is one record. The vertex stage picks a quad corner from
/// `vertex_index`, scales it by the radius and maps pixels to clip space
/// with the origin at the bottom-left of the viewport.
pub fn render_shader(view: &GeometryView) -> String {
    let inputs = view
        .attributes
        .iter()
        .filter_map(|a| a.location.map(|loc| format!("    @location({}) {}: {},", loc, a.name, a.wgsl_type())))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"{params}

@group(0) @binding(0) var<uniform> params: {params_name};

struct RecordInput {{
{inputs}
}}

struct VertexOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) uv: vec2<f32>,
}}

@vertex
fn {vertex_entry}(@builtin(vertex_index) vertex_index: u32, particle: RecordInput) -> VertexOutput {{
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let corner = corners[vertex_index % 6u];

    let pixel = particle.position_radius.xy + corner * particle.position_radius.w;
    let ndc = pixel / params.viewport * 2.0 - vec2<f32>(1.0, 1.0);

    var out: VertexOutput;
    out.clip_position = vec4<f32>(ndc, 0.0, 1.0);
    out.color = particle.color;
    out.uv = corner;
    return out;
}}

@fragment
fn {fragment_entry}(in_frag: VertexOutput) -> @location(0) vec4<f32> {{
    let dist = length(in_frag.uv);
    if dist > 1.0 {{
        discard;
    }}
    let falloff = 1.0 - smoothstep(0.5, 1.0, dist);
    return vec4<f32>(in_frag.color.rgb, in_frag.color.a * falloff);
}}
"#,
        params = FrameParams::WGSL_STRUCT,
        params_name = FrameParams::NAME,
        inputs = inputs,
        vertex_entry = VERTEX_ENTRY,
        fragment_entry = FRAGMENT_ENTRY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_shader_bakes_group_size() {
        let src = compute_shader(&Kernel::Integrate, WorkGroupSize::new(16, 4).unwrap());
        assert!(src.contains("@workgroup_size(16, 4, 1)"));
        assert!(src.contains("* 64u + local_index"));
        assert!(src.contains("if index >= params.population"));
        assert!(src.contains("struct ParticleRecord {"));
        assert!(src.contains("var<storage, read> source: array<ParticleRecord>"));
        assert!(src.contains("var<storage, read_write> destination: array<ParticleRecord>"));
    }

    #[test]
    fn test_render_shader_reads_vertex_fields_only() {
        let src = render_shader(&GeometryView::of::<ParticleRecord>());
        assert!(src.contains("@location(0) position_radius: vec4<f32>,"));
        assert!(src.contains("@location(1) color: vec4<f32>,"));
        assert!(!src.contains("velocity_pad"));
    }
}
