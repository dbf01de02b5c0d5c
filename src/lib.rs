//! Hardware ray-traced renderer core: acceleration-structure builds,
//! shader-binding-table assembly, fence-gated resource lifetimes, and a
//! frame orchestrator with a raster fallback path.

pub mod accel;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod passes;
pub mod pipeline;
pub mod sbt;
pub mod scene;
pub mod sync;
pub mod wgpu_ctx;

pub use error::{Error, Result};
