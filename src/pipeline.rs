//! Translation pipeline: normalize, flatten, resolve, annotate, emit.
//!
//! Every stage runs once per unit, in that order, and each logs one
//! `pipeline` event with the stage name, the unit's path, the time spent
//! and its outcome. A failure anywhere ends the unit without artifacts.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;

use crate::ast::CompilationUnit;
use crate::errors::{Diagnostic, Stage, TranslateError};
use crate::library::LibraryMetadata;
use crate::options::Options;
use crate::translate::{self, NativeArtifactPair};

/// Result of a successful translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub artifacts: NativeArtifactPair,
    /// Non-fatal findings, such as weakened cycle fields
    pub diagnostics: Vec<Diagnostic>,
}

/// A unit that produced no artifacts.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{source_path}: {error}")]
pub struct TranslationFailure {
    pub source_path: String,
    #[source]
    pub error: TranslateError,
    /// Source text of the unit, kept for rendering snippets
    pub source_text: Option<String>,
}

impl TranslationFailure {
    pub fn diagnostic(&self) -> Diagnostic {
        self.error.to_diagnostic()
    }
}

#[derive(Debug, Clone)]
pub struct Translator {
    options: Options,
    library: Arc<LibraryMetadata>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(Options::default(), LibraryMetadata::builtin())
    }
}

impl Translator {
    pub fn new(options: Options, library: LibraryMetadata) -> Self {
        Self::with_shared_library(options, Arc::new(library))
    }

    pub fn with_shared_library(options: Options, library: Arc<LibraryMetadata>) -> Self {
        Self { options, library }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn library(&self) -> &LibraryMetadata {
        &self.library
    }

    pub fn translate(&self, unit: CompilationUnit) -> Result<Translation, TranslationFailure> {
        let source_path = unit.source_path.clone();
        let source_text = unit.source.clone();
        self.run(unit).map_err(|error| TranslationFailure {
            source_path,
            error,
            source_text,
        })
    }

    /// Translate independent units in parallel. Results keep the input
    /// order.
    pub fn translate_batch(
        &self,
        units: Vec<CompilationUnit>,
    ) -> Vec<Result<Translation, TranslationFailure>> {
        units.into_par_iter().map(|unit| self.translate(unit)).collect()
    }

    fn run(&self, unit: CompilationUnit) -> Result<Translation, TranslateError> {
        let path = unit.source_path.clone();
        let library = self.library.as_ref();

        let unit = timed(&path, Stage::Normalize, || translate::normalize(unit))?;
        let unit = timed(&path, Stage::Flatten, || translate::flatten(unit))?;
        let unit = timed(&path, Stage::Resolve, || translate::resolve(unit, library, &self.options))?;
        let (unit, diagnostics) = timed(&path, Stage::Memory, || translate::annotate(unit, library))?;
        let artifacts = timed(&path, Stage::Emit, || translate::emit(unit, library, &self.options))?;

        for diagnostic in &diagnostics {
            tracing::warn!(target: "pipeline", unit = %path, title = diagnostic.title, "{}", diagnostic.message);
        }
        Ok(Translation {
            artifacts,
            diagnostics,
        })
    }
}

fn timed<T>(
    unit: &str,
    stage: Stage,
    run: impl FnOnce() -> Result<T, TranslateError>,
) -> Result<T, TranslateError> {
    let started = Instant::now();
    let result = run();
    let elapsed_us = started.elapsed().as_micros() as u64;
    match &result {
        Ok(_) => tracing::debug!(
            target: "pipeline",
            stage = stage.name(),
            unit,
            elapsed_us,
            status = "ok"
        ),
        Err(err) if err.is_internal() => tracing::error!(
            target: "pipeline",
            stage = stage.name(),
            unit,
            elapsed_us,
            status = err.kind(),
            "{}",
            err
        ),
        Err(err) => tracing::info!(
            target: "pipeline",
            stage = stage.name(),
            unit,
            elapsed_us,
            status = err.kind(),
            "{}",
            err
        ),
    }
    result
}
