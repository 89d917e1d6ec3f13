//! Translation options.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Memory management convention of the generated code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryModel {
    /// Manual reference counting: retain/release rendered explicitly
    #[default]
    ReferenceCounting,
    /// Automatic reference counting: ownership ops elided, qualifiers kept
    Arc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub memory_model: MemoryModel,
    /// Emit the reflective metadata block in definition units
    pub emit_reflection: bool,
    /// Bound on the selector and type name disambiguation loop
    pub max_disambiguation_attempts: usize,
    /// Package to native prefix (`com.example.util` -> `CEU`)
    pub package_prefixes: BTreeMap<String, String>,
    /// Comment placed at the top of both artifacts
    pub file_banner: Option<String>,
}

pub const DEFAULT_DISAMBIGUATION_ATTEMPTS: usize = 8;

impl Default for Options {
    fn default() -> Self {
        Self {
            memory_model: MemoryModel::ReferenceCounting,
            emit_reflection: true,
            max_disambiguation_attempts: DEFAULT_DISAMBIGUATION_ATTEMPTS,
            package_prefixes: BTreeMap::new(),
            file_banner: None,
        }
    }
}

impl Options {
    pub fn with_memory_model(mut self, model: MemoryModel) -> Self {
        self.memory_model = model;
        self
    }

    pub fn with_reflection(mut self, enabled: bool) -> Self {
        self.emit_reflection = enabled;
        self
    }

    pub fn with_max_disambiguation_attempts(mut self, attempts: usize) -> Self {
        self.max_disambiguation_attempts = attempts;
        self
    }

    pub fn with_package_prefix(mut self, package: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.package_prefixes.insert(package.into(), prefix.into());
        self
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.file_banner = Some(banner.into());
        self
    }

    pub fn is_arc(&self) -> bool {
        self.memory_model == MemoryModel::Arc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.memory_model, MemoryModel::ReferenceCounting);
        assert!(options.emit_reflection);
        assert_eq!(options.max_disambiguation_attempts, 8);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let options: Options = serde_json::from_str(r#"{"memory_model":"arc"}"#).unwrap();
        assert!(options.is_arc());
        assert_eq!(options.max_disambiguation_attempts, DEFAULT_DISAMBIGUATION_ATTEMPTS);
    }

    #[test]
    fn builders_compose() {
        let options = Options::default()
            .with_reflection(false)
            .with_package_prefix("com.example", "CE")
            .with_banner("generated");
        assert!(!options.emit_reflection);
        assert_eq!(options.package_prefixes.get("com.example").map(String::as_str), Some("CE"));
        assert_eq!(options.file_banner.as_deref(), Some("generated"));
    }
}
