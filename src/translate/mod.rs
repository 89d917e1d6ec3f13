//! Translation stages, run strictly in order by the pipeline.
//!
//! Each stage consumes the previous stage's unit by value, checks the
//! invariants it relies on, and returns the next unit or the first fatal
//! error.

pub mod cycles;
pub mod emit;
pub mod emit_body;
pub mod flatten;
pub mod memory;
pub mod metadata;
pub mod names;
pub mod normalize;
pub mod selectors;
pub mod source_builder;

pub use emit::{emit, NativeArtifactPair};
pub use flatten::flatten;
pub use memory::annotate;
pub use normalize::normalize;
pub use selectors::resolve;
