use std::fmt;

use crate::error::{FeedbackError, Result};

/// Every supported element is a 32-bit word.
pub const ELEMENT_BYTES: u32 = 4;

/// Underlying scalar of a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Float,
    Int,
    Uint,
}

/// One entry of the closed type table.
///
/// Field types are plain values: `total_bytes` is always
/// `element_count * element_byte_width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldType {
    name: &'static str,
    element_count: u32,
    scalar: ScalarKind,
}

impl FieldType {
    const fn new(name: &'static str, element_count: u32, scalar: ScalarKind) -> Self {
        Self {
            name,
            element_count,
            scalar,
        }
    }

    /// Resolves a GLSL type name against the table.
    pub fn lookup(name: &str) -> Option<Self> {
        TYPE_TABLE.iter().copied().find(|ty| ty.name == name)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    pub fn scalar(&self) -> ScalarKind {
        self.scalar
    }

    pub fn element_byte_width(&self) -> u32 {
        ELEMENT_BYTES
    }

    pub fn total_bytes(&self) -> u32 {
        self.element_count * self.element_byte_width()
    }

    /// Vertex attribute format used when the field feeds a vertex stage.
    pub fn vertex_format(&self) -> wgpu::VertexFormat {
        use wgpu::VertexFormat as F;
        match (self.scalar, self.element_count) {
            (ScalarKind::Float, 1) => F::Float32,
            (ScalarKind::Float, 2) => F::Float32x2,
            (ScalarKind::Float, 3) => F::Float32x3,
            (ScalarKind::Float, _) => F::Float32x4,
            (ScalarKind::Int, 1) => F::Sint32,
            (ScalarKind::Int, 2) => F::Sint32x2,
            (ScalarKind::Int, 3) => F::Sint32x3,
            (ScalarKind::Int, _) => F::Sint32x4,
            (ScalarKind::Uint, 1) => F::Uint32,
            (ScalarKind::Uint, 2) => F::Uint32x2,
            (ScalarKind::Uint, 3) => F::Uint32x3,
            (ScalarKind::Uint, _) => F::Uint32x4,
        }
    }

    /// Base alignment of the type inside a std140 uniform block.
    pub fn std140_alignment(&self) -> u32 {
        match self.element_count {
            1 => ELEMENT_BYTES,
            2 => 2 * ELEMENT_BYTES,
            _ => 4 * ELEMENT_BYTES,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub const TYPE_TABLE: [FieldType; 12] = [
    FieldType::new("float", 1, ScalarKind::Float),
    FieldType::new("vec2", 2, ScalarKind::Float),
    FieldType::new("vec3", 3, ScalarKind::Float),
    FieldType::new("vec4", 4, ScalarKind::Float),
    FieldType::new("int", 1, ScalarKind::Int),
    FieldType::new("ivec2", 2, ScalarKind::Int),
    FieldType::new("ivec3", 3, ScalarKind::Int),
    FieldType::new("ivec4", 4, ScalarKind::Int),
    FieldType::new("uint", 1, ScalarKind::Uint),
    FieldType::new("uvec2", 2, ScalarKind::Uint),
    FieldType::new("uvec3", 3, ScalarKind::Uint),
    FieldType::new("uvec4", 4, ScalarKind::Uint),
];

/// Type the loop driver's built-in params must be declared with.
pub(crate) const FLOAT: FieldType = TYPE_TABLE[0];

/// Type of the colour carried between the render stages.
pub(crate) const VEC4: FieldType = TYPE_TABLE[3];

/// Resolves `type_name` for `field`, failing with [`FeedbackError::UnknownType`].
pub(crate) fn resolve(field: &str, type_name: &str) -> Result<FieldType> {
    FieldType::lookup(type_name).ok_or_else(|| FeedbackError::UnknownType {
        field: field.to_string(),
        type_name: type_name.to_string(),
    })
}

/// Shader compilation backend requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderCompiler {
    /// Compile synthesized GLSL through shaderc into SPIR-V.
    Shaderc,
    /// Hand GLSL to naga's built-in frontend.
    NagaGlsl,
}

impl Default for ShaderCompiler {
    fn default() -> Self {
        if cfg!(feature = "shaderc") {
            ShaderCompiler::Shaderc
        } else {
            ShaderCompiler::NagaGlsl
        }
    }
}

impl fmt::Display for ShaderCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderCompiler::Shaderc => f.write_str("shaderc"),
            ShaderCompiler::NagaGlsl => f.write_str("naga"),
        }
    }
}
