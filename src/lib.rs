//! Basalt - translates type-resolved Java compilation units into
//! reference-counted Objective-C declaration and definition units.

pub mod ast;
pub mod errors;
pub mod invariants;
pub mod library;
pub mod logging;
pub mod options;
pub mod pipeline;
pub mod test_support;
pub mod translate;
pub mod types;
pub mod visit;

pub use ast::{CompilationUnit, LocatedSpan, Position, SourceMap, Span};
pub use errors::{
    format_header, format_location, format_snippet, Colors, Diagnostic, ErrorConfig, Severity, Stage,
    TranslateError,
};
pub use library::LibraryMetadata;
pub use options::{MemoryModel, Options};
pub use pipeline::{Translation, TranslationFailure, Translator};
pub use translate::NativeArtifactPair;
pub use types::Type;
