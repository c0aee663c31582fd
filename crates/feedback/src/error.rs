use std::fmt;

/// Failures raised while building or driving a [`crate::FeedbackComputer`].
///
/// Structural problems (unknown types, bad unit counts, a missing device) are
/// always fatal. Shader compile and link problems only surface here when the
/// computer was built with [`DiagnosticPolicy::Deny`]; under the default
/// [`DiagnosticPolicy::Warn`] they are logged and kept as [`Diagnostic`]s.
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("field `{field}` uses unknown type `{type_name}`")]
    UnknownType { field: String, type_name: String },

    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),

    #[error("`{0}` is not a valid GLSL identifier")]
    InvalidIdentifier(String),

    #[error("struct description has no fields")]
    EmptyStruct,

    #[error("unit count must be at least 1")]
    ZeroUnits,

    #[error("{units} units exceed the device dispatch limit of {max}")]
    TooManyUnits { units: u32, max: u32 },

    #[error("{units} records need {bytes} bytes per buffer, above the device limit of {max}")]
    RecordBufferTooLarge { units: u32, bytes: u64, max: u64 },

    #[error("no {0} step was provided")]
    MissingStep(&'static str),

    #[error("cannot advance the {0} buffer into itself")]
    AliasedBuffers(&'static str),

    #[error("initial data is {actual} bytes, expected {expected} (units x record size)")]
    InitialDataSize { expected: u64, actual: u64 },

    #[error("no usable graphics context: {0}")]
    InvalidContext(String),

    #[error("unknown {scope} parameter `{name}`")]
    UnknownParam { scope: &'static str, name: String },

    #[error("parameter `{name}` expects {expected} bytes, got {actual}")]
    ParamSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("shader compilation failed for {label}: {message}")]
    ShaderCompile { label: String, message: String },

    #[error("program link failed for {label}: {message}")]
    ProgramLink { label: String, message: String },

    #[error("buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("buffer readback was abandoned before the mapping completed")]
    ReadbackAborted,

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error("cannot read back {0:?} targets as RGBA8")]
    UnsupportedReadback(wgpu::TextureFormat),

    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T, E = FeedbackError> = std::result::Result<T, E>;

/// Whether compiler and linker diagnostics abort construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticPolicy {
    /// Log the diagnostic and keep going with whatever program came out.
    #[default]
    Warn,
    /// Promote the first diagnostic into a [`FeedbackError`].
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    ShaderCompile,
    ProgramLink,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::ShaderCompile => f.write_str("shader compile"),
            DiagnosticKind::ProgramLink => f.write_str("program link"),
        }
    }
}

/// Compiler or linker output attached to one shader stage or pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub label: String,
    pub message: String,
}

impl Diagnostic {
    pub(crate) fn into_error(self) -> FeedbackError {
        match self.kind {
            DiagnosticKind::ShaderCompile => FeedbackError::ShaderCompile {
                label: self.label,
                message: self.message,
            },
            DiagnosticKind::ProgramLink => FeedbackError::ProgramLink {
                label: self.label,
                message: self.message,
            },
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.label, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_maps_diagnostic_kind_to_error_variant() {
        let compile = Diagnostic {
            kind: DiagnosticKind::ShaderCompile,
            label: "update".into(),
            message: "syntax error".into(),
        };
        assert!(matches!(
            compile.into_error(),
            FeedbackError::ShaderCompile { ref label, .. } if label == "update"
        ));

        let link = Diagnostic {
            kind: DiagnosticKind::ProgramLink,
            label: "render".into(),
            message: "location mismatch".into(),
        };
        assert!(matches!(link.into_error(), FeedbackError::ProgramLink { .. }));
    }
}
