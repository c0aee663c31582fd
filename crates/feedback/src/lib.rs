//! Struct-driven, double-buffered GPU feedback simulations.
//!
//! A caller describes a per-unit record as an ordered list of typed fields
//! and supplies two GLSL bodies: one that advances a record, one that turns a
//! record into a coloured point. The crate derives the packed byte layout,
//! synthesizes matching shader source, and runs the loop entirely on the GPU:
//!
//! ```text
//!   ComputerDescription
//!          │ fields, update/render GLSL, params
//!          ▼
//!   StructLayout ──▶ synthesize() ──▶ UpdateProgram / RenderProgram
//!          │                                   │
//!          ▼                                   ▼
//!   UnitBufferPair ◀──── FeedbackComputer::step() ──▶ render target
//!                               ▲
//!                               └── LoopDriver::tick() (one step per frame)
//! ```
//!
//! The update program runs as a compute kernel that reads one record buffer
//! and writes the other; the render program draws the freshly written buffer
//! as additive points. Records never round-trip through the host after the
//! initial upload unless a caller asks for them with
//! [`FeedbackComputer::read_records`].

mod compile;
mod computer;
mod error;
mod gpu;
mod layout;
mod runtime;
mod synth;
mod target;
mod types;
mod window;

pub use computer::{ComputerDescription, FeedbackComputer, StepProgram, DEFAULT_TARGET_FORMAT};
pub use error::{Diagnostic, DiagnosticKind, DiagnosticPolicy, FeedbackError, Result};
pub use gpu::{
    initial_records, AdapterProfile, BufferSide, GpuContext, ParamScope, UnitBuffer,
    UnitBufferPair,
};
pub use layout::{Declaration, FieldLayout, ParamLayout, ParamSlot, StructLayout};
pub use runtime::{
    time_source_for_policy, BoxedTimeSource, FixedTimeSource, LoopDriver, RunPolicy,
    SystemTimeSource, TimeSample, TimeSource, FRAME_PARAM, TIME_PARAM,
};
pub use synth::{
    synthesize, Stage, FRAG_COLOR, INPUT_PREFIX, OUTPUT_PREFIX, UNIFORM_PREFIX, VERTEX_COLOR,
    WORKGROUP_SIZE,
};
pub use target::OffscreenTarget;
pub use types::{FieldType, ScalarKind, ShaderCompiler, ELEMENT_BYTES, TYPE_TABLE};
pub use window::{run_window, WindowError, WindowOptions};
