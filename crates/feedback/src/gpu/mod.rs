//! GPU resources behind a feedback computer.
//!
//! - `context` owns the wgpu instance, device and queue, and is passed into
//!   every constructor explicitly.
//! - `buffers` allocates the front/back record buffers and reads them back.
//! - `params` mirrors each step's std140 uniform block on the host and writes
//!   it through the queue.
//! - `program` compiles synthesized GLSL into the update kernel and the point
//!   render pipeline, routing compiler and linker output into diagnostics.

mod buffers;
mod context;
mod params;
pub(crate) mod program;

pub use buffers::{initial_records, BufferSide, UnitBuffer, UnitBufferPair};
pub(crate) use buffers::map_and_copy;
pub use context::{AdapterProfile, GpuContext};
pub(crate) use context::new_instance;
pub(crate) use params::ParamBlock;
pub use params::ParamScope;
