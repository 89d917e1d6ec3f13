//! Translation errors, diagnostics and their terminal rendering.
//!
//! Every stage returns `Result<_, TranslateError>`; the first error aborts
//! the unit. Warnings travel separately as `Diagnostic`s so a successful
//! translation can still report what it changed (weakened fields).
//!
//! Rendering follows an Elm-style layout:
//!
//! ```text
//! -- UNSUPPORTED CONSTRUCT -----------------------------------
//! com/example/Foo.java:3:9
//!
//! 3 |     Runnable r = this::run;
//!                      ^^^^^^^^^
//!
//! unsupported construct: method reference `this::run`
//! ```

use std::fmt;

use thiserror::Error;

use crate::ast::{SourceMap, Span};

/// ANSI color codes for terminal output
#[derive(Debug, Clone)]
pub struct Colors {
    pub enabled: bool,
}

impl Colors {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn red(&self) -> &'static str {
        if self.enabled { "\x1b[31m" } else { "" }
    }

    pub fn cyan(&self) -> &'static str {
        if self.enabled { "\x1b[36m" } else { "" }
    }

    pub fn yellow(&self) -> &'static str {
        if self.enabled { "\x1b[33m" } else { "" }
    }

    pub fn magenta(&self) -> &'static str {
        if self.enabled { "\x1b[35m" } else { "" }
    }

    pub fn bold(&self) -> &'static str {
        if self.enabled { "\x1b[1m" } else { "" }
    }

    pub fn reset(&self) -> &'static str {
        if self.enabled { "\x1b[0m" } else { "" }
    }
}

impl Default for Colors {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Configuration for diagnostic display
#[derive(Debug, Clone, Default)]
pub struct ErrorConfig {
    pub colors: Colors,
    pub filename: Option<String>,
}

impl ErrorConfig {
    pub fn new(use_color: bool) -> Self {
        Self {
            colors: Colors::new(use_color),
            filename: None,
        }
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Normalize,
    Flatten,
    Resolve,
    Memory,
    Emit,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Normalize,
        Stage::Flatten,
        Stage::Resolve,
        Stage::Memory,
        Stage::Emit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Normalize => "normalize",
            Stage::Flatten => "flatten",
            Stage::Resolve => "resolve",
            Stage::Memory => "memory",
            Stage::Emit => "emit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fatal translation error. Any of these aborts the unit; no artifacts are
/// produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslateError {
    #[error("unsupported construct: {construct}")]
    UnsupportedConstruct { construct: String, span: Span },

    #[error("local variable `{name}` is captured by `{class}` but is not effectively final")]
    NonEffectivelyFinalCapture {
        name: String,
        class: String,
        span: Span,
    },

    #[error("no unique native name for `{name}` in {scope} after {attempts} attempts")]
    SelectorCollisionUnresolved {
        scope: String,
        name: String,
        attempts: usize,
        span: Span,
    },

    #[error(
        "field `{field}` of `{type_name}` is required strong but breaks the reference cycle {}",
        .cycle.join(" -> ")
    )]
    OwnershipConflict {
        type_name: String,
        field: String,
        cycle: Vec<String>,
        span: Span,
    },

    #[error("internal invariant violated in {stage} stage: {message}")]
    InternalInvariantViolation {
        stage: Stage,
        message: String,
        span: Span,
    },
}

impl TranslateError {
    pub fn unsupported(construct: impl Into<String>, span: Span) -> Self {
        TranslateError::UnsupportedConstruct {
            construct: construct.into(),
            span,
        }
    }

    pub fn internal(stage: Stage, message: impl Into<String>, span: Span) -> Self {
        TranslateError::InternalInvariantViolation {
            stage,
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            TranslateError::UnsupportedConstruct { span, .. }
            | TranslateError::NonEffectivelyFinalCapture { span, .. }
            | TranslateError::SelectorCollisionUnresolved { span, .. }
            | TranslateError::OwnershipConflict { span, .. }
            | TranslateError::InternalInvariantViolation { span, .. } => *span,
        }
    }

    /// Internal violations are translator bugs, not problems in the input.
    pub fn is_internal(&self) -> bool {
        matches!(self, TranslateError::InternalInvariantViolation { .. })
    }

    /// Stable machine-readable name, used in structured log events.
    pub fn kind(&self) -> &'static str {
        match self {
            TranslateError::UnsupportedConstruct { .. } => "unsupported_construct",
            TranslateError::NonEffectivelyFinalCapture { .. } => "non_effectively_final_capture",
            TranslateError::SelectorCollisionUnresolved { .. } => "selector_collision_unresolved",
            TranslateError::OwnershipConflict { .. } => "ownership_conflict",
            TranslateError::InternalInvariantViolation { .. } => "internal_invariant_violation",
        }
    }

    /// Header shown above the rendered diagnostic.
    pub fn title(&self) -> &'static str {
        match self {
            TranslateError::UnsupportedConstruct { .. } => "UNSUPPORTED CONSTRUCT",
            TranslateError::NonEffectivelyFinalCapture { .. } => "CAPTURE ERROR",
            TranslateError::SelectorCollisionUnresolved { .. } => "NAME COLLISION",
            TranslateError::OwnershipConflict { .. } => "OWNERSHIP CONFLICT",
            TranslateError::InternalInvariantViolation { .. } => "INTERNAL ERROR",
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            severity: if self.is_internal() {
                Severity::Internal
            } else {
                Severity::Error
            },
            span: self.span(),
            title: self.title(),
            message: self.to_string(),
        }
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    /// A translator bug, reported apart from user errors
    Internal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Internal => write!(f, "internal error"),
        }
    }
}

/// A located message attached to a unit's translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub title: &'static str,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(title: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            span,
            title,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }

    /// Render for a terminal. Snippets are shown only when the unit's
    /// source text is available and the span is real.
    pub fn render(&self, config: &ErrorConfig, source_map: Option<&SourceMap>) -> String {
        let colors = &config.colors;
        let mut out = format_header(self.title, self.severity, colors);
        out.push('\n');
        match source_map {
            Some(map) if !self.span.is_synthetic() => {
                out.push_str(&format_location(config.filename.as_deref(), &self.span, map, colors));
                out.push_str("\n\n");
                out.push_str(&format_snippet(map, &self.span, colors));
                out.push_str("\n\n");
            }
            _ => {
                if let Some(file) = &config.filename {
                    out.push_str(&format!("{}{}{}\n\n", colors.bold(), file, colors.reset()));
                } else {
                    out.push('\n');
                }
            }
        }
        out.push_str(&self.message);
        out.push('\n');
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

// ============================================================================
// Formatting helpers
// ============================================================================

/// Format a source line with a caret underline below the span.
///
/// ```text
/// 12 |         count++;
///              ^^^^^^^
/// ```
pub fn format_snippet(source_map: &SourceMap, span: &Span, colors: &Colors) -> String {
    let loc = source_map.locate(span);
    let line_text = source_map.line(loc.start.line).unwrap_or("");
    let gutter = loc.start.line.to_string();

    let mut out = format!(
        "{}{} |{} {}\n",
        colors.cyan(),
        gutter,
        colors.reset(),
        line_text
    );

    let padding = " ".repeat(gutter.len() + 3 + loc.start.column - 1);
    let underline = if loc.start.line == loc.end.line {
        "^".repeat(loc.end.column.saturating_sub(loc.start.column).max(1))
    } else {
        "^".to_string()
    };
    out.push_str(&format!(
        "{}{}{}{}",
        padding,
        colors.red(),
        underline,
        colors.reset()
    ));
    out
}

/// `-- TITLE ------------`, colored by severity. Internal errors are
/// magenta so they never read as a user mistake.
pub fn format_header(title: &str, severity: Severity, colors: &Colors) -> String {
    let dashes = "-".repeat(60usize.saturating_sub(title.len() + 4).max(4));
    let color = match severity {
        Severity::Warning => colors.yellow(),
        Severity::Error => colors.cyan(),
        Severity::Internal => colors.magenta(),
    };
    format!("{}-- {} {}{}", color, title, dashes, colors.reset())
}

/// `path/File.java:12:15`
pub fn format_location(
    filename: Option<&str>,
    span: &Span,
    source_map: &SourceMap,
    colors: &Colors,
) -> String {
    let pos = source_map.position(span.start);
    let file = filename.unwrap_or("<input>");
    format!("{}{}:{}{}", colors.bold(), file, pos, colors.reset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_are_distinct() {
        let err = TranslateError::internal(Stage::Emit, "lambda reached emitter", Span::default());
        assert!(err.is_internal());
        let diag = err.to_diagnostic();
        assert_eq!(diag.severity, Severity::Internal);
        let rendered = diag.render(&ErrorConfig::default(), None);
        assert!(rendered.starts_with("-- INTERNAL ERROR"));
        assert!(rendered.contains("emit stage"));

        let user = TranslateError::unsupported("method reference", Span::default());
        assert!(!user.is_internal());
        assert_eq!(user.to_diagnostic().severity, Severity::Error);
    }

    #[test]
    fn test_render_with_snippet() {
        let source = "class A {\n  int x = y;\n}";
        let map = SourceMap::new(source);
        let err = TranslateError::NonEffectivelyFinalCapture {
            name: "y".into(),
            class: "A$1".into(),
            span: Span::new(20, 21),
        };
        let config = ErrorConfig::new(false).with_filename("A.java");
        let rendered = err.to_diagnostic().render(&config, Some(&map));
        assert!(rendered.contains("-- CAPTURE ERROR"));
        assert!(rendered.contains("A.java:2:11"));
        assert!(rendered.contains("2 |   int x = y;"));
        assert!(rendered.contains("          ^"));
        assert!(rendered.contains("`y` is captured by `A$1`"));
    }

    #[test]
    fn test_ownership_conflict_names_cycle() {
        let err = TranslateError::OwnershipConflict {
            type_name: "p.B".into(),
            field: "a".into(),
            cycle: vec!["p.A".into(), "p.B".into(), "p.A".into()],
            span: Span::default(),
        };
        assert!(err.to_string().contains("p.A -> p.B -> p.A"));
    }

    #[test]
    fn test_format_header_width() {
        let colors = Colors::new(false);
        let header = format_header("NAME COLLISION", Severity::Error, &colors);
        assert!(header.starts_with("-- NAME COLLISION -"));
        assert_eq!(header.len(), 60);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Internal > Severity::Error);
        assert!(Diagnostic::warning("WEAKENED FIELD", "x", Span::default()).severity < Severity::Error);
    }
}
