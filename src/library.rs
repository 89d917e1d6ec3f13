//! Read-only metadata about the emulated runtime library.
//!
//! Types declared outside the unit are looked up here for their native
//! name, whether they render as a class or a protocol, and their ownership
//! convention. Method mappings replace the derived selector of well-known
//! root-object methods (`toString()` becomes `description`).
//!
//! The table is immutable once built and shared between parallel
//! translations behind an `Arc`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Type;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryTypeKind {
    #[default]
    Class,
    Protocol,
}

/// Reference-count convention of a library type's instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryOwnership {
    #[default]
    Standard,
    /// Instances are never deallocated; references need no retain
    Immortal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryType {
    pub native_name: String,
    #[serde(default)]
    pub kind: LibraryTypeKind,
    #[serde(default)]
    pub ownership: LibraryOwnership,
    /// Header that declares the type; derived from the native name if absent
    #[serde(default)]
    pub header: Option<String>,
}

/// Fixed selector for a method identified by name and erased parameter
/// types. Applies to the method and every override of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodMapping {
    pub name: String,
    /// Erased parameter types, as rendered by `Type`'s `Display`
    #[serde(default)]
    pub params: Vec<String>,
    pub selector: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryMetadata {
    #[serde(default)]
    pub types: BTreeMap<String, LibraryType>,
    #[serde(default)]
    pub methods: Vec<MethodMapping>,
}

fn class(native: &str) -> LibraryType {
    LibraryType {
        native_name: native.to_string(),
        kind: LibraryTypeKind::Class,
        ownership: LibraryOwnership::Standard,
        header: None,
    }
}

fn protocol(native: &str) -> LibraryType {
    LibraryType {
        kind: LibraryTypeKind::Protocol,
        ..class(native)
    }
}

fn immortal(native: &str) -> LibraryType {
    LibraryType {
        ownership: LibraryOwnership::Immortal,
        ..class(native)
    }
}

impl LibraryMetadata {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Root object, string, boxed, throwable and collection types of the
    /// emulated library.
    pub fn builtin() -> Self {
        let mut types = BTreeMap::new();
        let mut add = |name: &str, ty: LibraryType| {
            types.insert(name.to_string(), ty);
        };

        add("java.lang.Object", class("NSObject"));
        add("java.lang.String", class("NSString"));
        add("java.lang.Class", immortal("IOSClass"));
        add("java.lang.Cloneable", protocol("NSCopying"));
        add("java.lang.Number", class("NSNumber"));
        for boxed in ["Boolean", "Byte", "Character", "Short", "Integer", "Long", "Float", "Double"] {
            add(&format!("java.lang.{}", boxed), class(&format!("JavaLang{}", boxed)));
        }
        for throwable in [
            "Throwable",
            "Exception",
            "RuntimeException",
            "Error",
            "AssertionError",
            "NullPointerException",
            "IllegalArgumentException",
            "IllegalStateException",
            "IndexOutOfBoundsException",
            "UnsupportedOperationException",
            "ClassCastException",
        ] {
            add(&format!("java.lang.{}", throwable), class(&format!("JavaLang{}", throwable)));
        }
        add("java.lang.Enum", class("JavaLangEnum"));
        add("java.lang.StringBuilder", class("JavaLangStringBuilder"));
        for proto in ["Iterable", "AutoCloseable", "Runnable", "Comparable", "CharSequence"] {
            add(&format!("java.lang.{}", proto), protocol(&format!("JavaLang{}", proto)));
        }
        add("java.io.Closeable", protocol("JavaIoCloseable"));
        add("java.io.IOException", class("JavaIoIOException"));
        add("java.io.Serializable", protocol("JavaIoSerializable"));
        for proto in ["Iterator", "Collection", "List", "Set", "Map", "Comparator"] {
            add(&format!("java.util.{}", proto), protocol(&format!("JavaUtil{}", proto)));
        }
        for class_name in ["ArrayList", "HashMap", "HashSet", "LinkedList"] {
            add(&format!("java.util.{}", class_name), class(&format!("JavaUtil{}", class_name)));
        }
        add("java.util.function.Supplier", protocol("JavaUtilFunctionSupplier"));
        add("java.util.function.Function", protocol("JavaUtilFunctionFunction"));
        add("java.util.function.Consumer", protocol("JavaUtilFunctionConsumer"));

        let mapping = |name: &str, params: &[&str], selector: &str| MethodMapping {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            selector: selector.to_string(),
        };
        let methods = vec![
            mapping("toString", &[], "description"),
            mapping("hashCode", &[], "hash"),
            mapping("equals", &["java.lang.Object"], "isEqual:"),
            mapping("clone", &[], "java_clone"),
            mapping("getClass", &[], "java_getClass"),
            mapping("finalize", &[], "java_finalize"),
        ];

        Self { types, methods }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Entries of `other` replace same-named entries of `self`.
    pub fn merge(&mut self, other: LibraryMetadata) {
        self.types.extend(other.types);
        for mapping in other.methods {
            self.methods
                .retain(|existing| !(existing.name == mapping.name && existing.params == mapping.params));
            self.methods.push(mapping);
        }
    }

    pub fn lookup(&self, qualified_name: &str) -> Option<&LibraryType> {
        self.types.get(qualified_name)
    }

    pub fn native_name(&self, qualified_name: &str) -> Option<&str> {
        self.lookup(qualified_name).map(|ty| ty.native_name.as_str())
    }

    pub fn is_protocol(&self, qualified_name: &str) -> bool {
        self.lookup(qualified_name)
            .is_some_and(|ty| ty.kind == LibraryTypeKind::Protocol)
    }

    pub fn is_immortal(&self, qualified_name: &str) -> bool {
        self.lookup(qualified_name)
            .is_some_and(|ty| ty.ownership == LibraryOwnership::Immortal)
    }

    /// Native names of every library type, for collision checks.
    pub fn native_names(&self) -> impl Iterator<Item = &str> {
        self.types.values().map(|ty| ty.native_name.as_str())
    }

    /// Mapped selector for a method with these erased parameter types.
    pub fn mapped_selector(&self, name: &str, params: &[Type]) -> Option<&str> {
        self.methods
            .iter()
            .find(|mapping| {
                mapping.name == name
                    && mapping.params.len() == params.len()
                    && mapping
                        .params
                        .iter()
                        .zip(params)
                        .all(|(expected, actual)| *expected == actual.erasure().to_string())
            })
            .map(|mapping| mapping.selector.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_maps_root_types() {
        let library = LibraryMetadata::builtin();
        assert_eq!(library.native_name("java.lang.Object"), Some("NSObject"));
        assert_eq!(library.native_name("java.lang.String"), Some("NSString"));
        assert!(library.is_protocol("java.lang.Runnable"));
        assert!(!library.is_protocol("java.lang.Exception"));
        assert!(library.is_immortal("java.lang.Class"));
    }

    #[test]
    fn mapped_selector_matches_erased_params() {
        let library = LibraryMetadata::builtin();
        assert_eq!(library.mapped_selector("toString", &[]), Some("description"));
        assert_eq!(
            library.mapped_selector("equals", &[Type::object()]),
            Some("isEqual:")
        );
        assert_eq!(library.mapped_selector("equals", &[Type::string()]), None);
        assert_eq!(library.mapped_selector("toString", &[Type::int()]), None);
    }

    #[test]
    fn json_entries_merge_over_builtins() {
        let mut library = LibraryMetadata::builtin();
        let extra = LibraryMetadata::from_json(
            r#"{
                "types": {
                    "java.lang.String": { "native_name": "JreString" },
                    "com.acme.Clock": { "native_name": "ACClock", "ownership": "immortal" }
                },
                "methods": [
                    { "name": "toString", "selector": "toDescription" }
                ]
            }"#,
        )
        .unwrap();
        library.merge(extra);
        assert_eq!(library.native_name("java.lang.String"), Some("JreString"));
        assert!(library.is_immortal("com.acme.Clock"));
        assert_eq!(library.mapped_selector("toString", &[]), Some("toDescription"));
        assert_eq!(
            library.methods.iter().filter(|m| m.name == "toString").count(),
            1
        );
    }
}
