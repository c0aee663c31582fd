//! GLSL source synthesis for the update and render programs.
//!
//! [`synthesize`] is a pure function of its arguments so the generated text
//! can be inspected without a device. Every source is laid out as:
//!
//! 1. the version/precision preamble,
//! 2. one declaration per uniform, input and output,
//! 3. the caller's body, verbatim.
//!
//! Uniforms live in a single std140 block at `set = 0, binding = 0`. Render
//! stage inputs and outputs are interface variables with explicit locations;
//! the update stage runs as a compute kernel, so its inputs and outputs are
//! private globals filled from, and flushed to, the record buffers by a
//! generated entry point that wraps the caller's `main`.

use std::fmt::Write as _;

use crate::layout::{packed_word_offsets, Declaration};
use crate::types::ScalarKind;

/// Threads per workgroup of the update kernel.
pub const WORKGROUP_SIZE: u32 = 64;

/// Output of the render vertex stage, consumed by the render fragment stage.
pub const VERTEX_COLOR: &str = "vertexColor";
/// Colour written by the render fragment stage.
pub const FRAG_COLOR: &str = "fragColor";

pub const UNIFORM_PREFIX: &str = "u_";
pub const INPUT_PREFIX: &str = "i_";
pub const OUTPUT_PREFIX: &str = "o_";

/// Pass-through fragment body used by every render program.
pub const RENDER_FRAGMENT_BODY: &str = "void main() {\n    fragColor = vertexColor;\n}\n";

const PREAMBLE: &str = "#version 450\nprecision highp float;\nprecision highp int;\n";

/// Name the caller's `main` is rewritten to inside the update kernel.
const UPDATE_ENTRY: &str = "feedback_update_main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Advances one record: struct in, struct out through the record buffers.
    Update,
    /// Derives a point position and colour from one record.
    RenderVertex,
    /// Writes the interpolated colour.
    RenderFragment,
}

impl Stage {
    pub fn naga_stage(self) -> wgpu::naga::ShaderStage {
        match self {
            Stage::Update => wgpu::naga::ShaderStage::Compute,
            Stage::RenderVertex => wgpu::naga::ShaderStage::Vertex,
            Stage::RenderFragment => wgpu::naga::ShaderStage::Fragment,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Update => "update kernel",
            Stage::RenderVertex => "render vertex",
            Stage::RenderFragment => "render fragment",
        }
    }
}

/// Assembles complete GLSL for `stage`.
pub fn synthesize(
    stage: Stage,
    uniforms: &[Declaration],
    inputs: &[Declaration],
    outputs: &[Declaration],
    body: &str,
) -> String {
    let mut source = String::from(PREAMBLE);
    source.push('\n');

    if stage == Stage::Update {
        let _ = writeln!(source, "layout(local_size_x = {WORKGROUP_SIZE}) in;\n");
    }

    if !uniforms.is_empty() {
        source.push_str("layout(std140, set = 0, binding = 0) uniform Params {\n");
        for decl in uniforms {
            let _ = writeln!(source, "    {} {};", decl.ty, decl.name);
        }
        source.push_str("};\n\n");
    }

    match stage {
        Stage::Update => {
            source.push_str(RECORD_BINDINGS);
            source.push('\n');
            push_declarations(&mut source, "", inputs, false);
            push_declarations(&mut source, "", outputs, false);
            source.push('\n');
            let _ = writeln!(source, "#define main {UPDATE_ENTRY}");
            source.push_str("#line 1\n");
            source.push_str(body);
            if !body.ends_with('\n') {
                source.push('\n');
            }
            source.push_str("#undef main\n\n");
            source.push_str(&update_entry_point(inputs, outputs));
        }
        Stage::RenderVertex | Stage::RenderFragment => {
            push_declarations(&mut source, "in", inputs, true);
            push_declarations(&mut source, "out", outputs, true);
            source.push_str("\n#line 1\n");
            source.push_str(body);
            if !body.ends_with('\n') {
                source.push('\n');
            }
        }
    }

    source
}

const RECORD_BINDINGS: &str = "layout(std430, set = 1, binding = 0) buffer SourceRecords {
    uint words[];
} feedback_source;
layout(std430, set = 1, binding = 1) buffer DestinationRecords {
    uint words[];
} feedback_destination;
layout(std140, set = 1, binding = 2) uniform Dispatch {
    uint unit_count;
} feedback_dispatch;
";

fn push_declarations(source: &mut String, qualifier: &str, decls: &[Declaration], located: bool) {
    for (location, decl) in decls.iter().enumerate() {
        if located {
            let _ = write!(source, "layout(location = {location}) ");
        }
        if qualifier.is_empty() {
            let _ = writeln!(source, "{} {};", decl.ty, decl.name);
        } else {
            let _ = writeln!(source, "{qualifier} {} {};", decl.ty, decl.name);
        }
    }
}

/// Generated `main` for the update kernel: unpack, call the body, repack.
fn update_entry_point(inputs: &[Declaration], outputs: &[Declaration]) -> String {
    let input_stride: u32 = inputs.iter().map(|decl| decl.ty.element_count()).sum();
    let output_stride: u32 = outputs.iter().map(|decl| decl.ty.element_count()).sum();

    let mut entry = String::from("void main() {\n");
    entry.push_str("    uint unit = gl_GlobalInvocationID.x;\n");
    entry.push_str("    if (unit >= feedback_dispatch.unit_count) {\n        return;\n    }\n");
    let _ = writeln!(entry, "    uint source_base = unit * {input_stride}u;");
    let _ = writeln!(entry, "    uint destination_base = unit * {output_stride}u;");

    for (decl, word) in inputs.iter().zip(packed_word_offsets(inputs)) {
        let components: Vec<String> = (0..decl.ty.element_count())
            .map(|component| {
                let load = format!("feedback_source.words[source_base + {}u]", word + component);
                unpack_word(decl.ty.scalar(), &load)
            })
            .collect();
        if components.len() == 1 {
            let _ = writeln!(entry, "    {} = {};", decl.name, components[0]);
        } else {
            let _ = writeln!(
                entry,
                "    {} = {}({});",
                decl.name,
                decl.ty,
                components.join(", ")
            );
        }
    }

    let _ = writeln!(entry, "    {UPDATE_ENTRY}();");

    for (decl, word) in outputs.iter().zip(packed_word_offsets(outputs)) {
        for component in 0..decl.ty.element_count() {
            let value = if decl.ty.element_count() == 1 {
                decl.name.clone()
            } else {
                format!("{}.{}", decl.name, SWIZZLE[component as usize])
            };
            let _ = writeln!(
                entry,
                "    feedback_destination.words[destination_base + {}u] = {};",
                word + component,
                pack_word(decl.ty.scalar(), &value)
            );
        }
    }

    entry.push_str("}\n");
    entry
}

const SWIZZLE: [char; 4] = ['x', 'y', 'z', 'w'];

fn unpack_word(scalar: ScalarKind, word: &str) -> String {
    match scalar {
        ScalarKind::Float => format!("uintBitsToFloat({word})"),
        ScalarKind::Int => format!("int({word})"),
        ScalarKind::Uint => word.to_string(),
    }
}

fn pack_word(scalar: ScalarKind, value: &str) -> String {
    match scalar {
        ScalarKind::Float => format!("floatBitsToUint({value})"),
        ScalarKind::Int => format!("uint({value})"),
        ScalarKind::Uint => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ParamLayout, StructLayout};
    use crate::types::FieldType;

    fn decl(name: &str, ty: &str) -> Declaration {
        Declaration::new(name, FieldType::lookup(ty).unwrap())
    }

    fn count_lines_ending_with(source: &str, suffix: &str) -> usize {
        source
            .lines()
            .filter(|line| line.trim_end().ends_with(suffix))
            .count()
    }

    #[test]
    fn emits_one_declaration_per_entry() {
        let source = synthesize(
            Stage::RenderVertex,
            &[decl("u_a", "float")],
            &[decl("i_x", "float")],
            &[decl("o_x", "float")],
            "void main() { o_x = i_x * u_a; }",
        );

        assert_eq!(count_lines_ending_with(&source, " float u_a;"), 1);
        assert_eq!(count_lines_ending_with(&source, "in float i_x;"), 1);
        assert_eq!(count_lines_ending_with(&source, "out float o_x;"), 1);
        assert!(source.contains("uniform Params {"));
        assert!(source.starts_with("#version 450\nprecision highp float;"));
    }

    #[test]
    fn body_is_appended_verbatim() {
        let body = "void main() {\n    vertexColor = vec4(i_x);\n    gl_Position = vec4(0.0);\n}\n";
        let source = synthesize(
            Stage::RenderVertex,
            &[],
            &[decl("i_x", "float")],
            &[decl(VERTEX_COLOR, "vec4")],
            body,
        );
        assert!(source.ends_with(body));
        assert!(!source.contains("uniform Params"));
    }

    #[test]
    fn render_inputs_bind_to_layout_locations() {
        let layout = StructLayout::new([("pos", "vec2"), ("life", "float"), ("hue", "vec3")]).unwrap();
        let source = synthesize(
            Stage::RenderVertex,
            &[],
            &layout.prefixed(INPUT_PREFIX),
            &[decl(VERTEX_COLOR, "vec4")],
            "void main() {}",
        );
        assert!(source.contains("layout(location = 0) in vec2 i_pos;"));
        assert!(source.contains("layout(location = 1) in float i_life;"));
        assert!(source.contains("layout(location = 2) in vec3 i_hue;"));
        assert!(source.contains("layout(location = 0) out vec4 vertexColor;"));
    }

    #[test]
    fn update_kernel_unpacks_and_repacks_in_layout_order() {
        let layout = StructLayout::new([("pos", "vec2"), ("life", "float")]).unwrap();
        let source = synthesize(
            Stage::Update,
            &[],
            &layout.prefixed(INPUT_PREFIX),
            &layout.prefixed(OUTPUT_PREFIX),
            "void main() { o_pos = i_pos; o_life = i_life; }",
        );

        assert!(source.contains("layout(local_size_x = 64) in;"));
        assert!(source.contains("#define main feedback_update_main"));
        assert!(source.contains("uint source_base = unit * 3u;"));
        assert!(source.contains(
            "i_pos = vec2(uintBitsToFloat(feedback_source.words[source_base + 0u]), \
             uintBitsToFloat(feedback_source.words[source_base + 1u]));"
        ));
        assert!(source.contains("i_life = uintBitsToFloat(feedback_source.words[source_base + 2u]);"));

        let stores: Vec<_> = source
            .lines()
            .filter(|line| line.contains("feedback_destination.words["))
            .map(str::trim)
            .collect();
        assert_eq!(
            stores,
            [
                "feedback_destination.words[destination_base + 0u] = floatBitsToUint(o_pos.x);",
                "feedback_destination.words[destination_base + 1u] = floatBitsToUint(o_pos.y);",
                "feedback_destination.words[destination_base + 2u] = floatBitsToUint(o_life);",
            ]
        );

        let body_at = source.find("o_pos = i_pos;").unwrap();
        let undef_at = source.find("#undef main").unwrap();
        let entry_at = source.rfind("void main() {").unwrap();
        assert!(body_at < undef_at && undef_at < entry_at);
    }

    #[test]
    fn update_kernel_declares_private_globals() {
        let source = synthesize(
            Stage::Update,
            &[],
            &[decl("i_v", "float")],
            &[decl("o_v", "float")],
            "void main() { o_v = i_v + 1.0; }",
        );
        assert_eq!(count_lines_ending_with(&source, "float i_v;"), 1);
        assert_eq!(count_lines_ending_with(&source, "float o_v;"), 1);
        assert!(!source.contains("in float i_v;"));
    }

    #[test]
    fn integer_fields_round_trip_through_words() {
        let source = synthesize(
            Stage::Update,
            &[],
            &[decl("i_cell", "ivec2"), decl("i_seed", "uint")],
            &[decl("o_cell", "ivec2"), decl("o_seed", "uint")],
            "void main() { o_cell = i_cell; o_seed = i_seed; }",
        );
        assert!(source.contains("i_cell = ivec2(int(feedback_source.words[source_base + 0u]), int(feedback_source.words[source_base + 1u]));"));
        assert!(source.contains("i_seed = feedback_source.words[source_base + 2u];"));
        assert!(source.contains("feedback_destination.words[destination_base + 1u] = uint(o_cell.y);"));
        assert!(source.contains("feedback_destination.words[destination_base + 2u] = o_seed;"));
    }

    #[test]
    fn uniform_block_uses_param_layout_order() {
        let params = ParamLayout::new([("time", "float"), ("gravity", "vec2")]).unwrap();
        let source = synthesize(
            Stage::Update,
            &params.prefixed(UNIFORM_PREFIX),
            &[decl("i_v", "float")],
            &[decl("o_v", "float")],
            "void main() { o_v = i_v; }",
        );
        let time_at = source.find("    float u_time;").unwrap();
        let gravity_at = source.find("    vec2 u_gravity;").unwrap();
        assert!(time_at < gravity_at);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let args = (
            [decl("u_t", "float")],
            [decl("i_p", "vec3")],
            [decl("o_p", "vec3")],
        );
        let first = synthesize(Stage::Update, &args.0, &args.1, &args.2, "void main() {}");
        let second = synthesize(Stage::Update, &args.0, &args.1, &args.2, "void main() {}");
        assert_eq!(first, second);
    }
}
