//! Native naming rules shared by the resolver and the emitter.
//!
//! Types flatten to `CamelCasedPackage` + binary name with `$` replaced by
//! `_`. Selectors append one keyword per parameter: `With<Token>:` for the
//! first, `with<Token>:` for the rest. Tokens are the primitive keyword
//! capitalized, the native type name for references (`id` for the root
//! object), with `Array` and the dimension count appended for arrays.

use std::collections::HashMap;

use crate::ast::{CompilationUnit, TypeKind};
use crate::library::LibraryMetadata;
use crate::options::Options;
use crate::types::{split_qualified, Type, OBJECT};

/// Root object messages. Source methods with these names are renamed so
/// they cannot override the runtime's by accident.
pub const NS_OBJECT_MESSAGES: &[&str] = &[
    "alloc",
    "attributeKeys",
    "autoContentAccessingProxy",
    "autorelease",
    "classCode",
    "classDescription",
    "classForArchiver",
    "classForKeyedArchiver",
    "classFallbacksForKeyedArchiver",
    "classForPortCoder",
    "className",
    "copy",
    "dealloc",
    "description",
    "hash",
    "init",
    "initialize",
    "isProxy",
    "load",
    "mutableCopy",
    "new",
    "release",
    "retain",
    "retainCount",
    "scriptingProperties",
    "self",
    "superclass",
    "toManyRelationshipKeys",
    "toOneRelationshipKeys",
    "version",
];

/// C and Objective-C keywords, common typedefs and runtime macros.
pub const RESERVED_NAMES: &[&str] = &[
    // C
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "_Complex", "_Imaginary",
    // Objective-C
    "BOOL", "Class", "SEL", "IMP", "id", "nil", "Nil", "NO", "YES", "NULL", "self", "super",
    "_cmd", "instancetype", "Protocol", "bool", "true", "false",
    // runtime typedefs
    "jboolean", "jbyte", "jchar", "jshort", "jint", "jlong", "jfloat", "jdouble",
    "NSInteger", "NSUInteger", "CGFloat", "errno", "EOF", "stdin", "stdout", "stderr",
    "assert", "abort", "exit", "free", "malloc", "printf", "main", "signal", "time",
];

/// Objective-C type qualifiers that cannot name a parameter.
pub const BAD_PARAMETER_NAMES: &[&str] = &["in", "out", "inout", "oneway", "bycopy", "byref"];

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_NAMES.contains(&name) || NS_OBJECT_MESSAGES.contains(&name)
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `com.example.util` -> `ComExampleUtil`
pub fn camel_case_qualified(name: &str) -> String {
    name.split('.').filter(|part| !part.is_empty()).map(capitalize).collect()
}

/// Selectors are either one plain keyword or one or more `keyword:` parts.
pub fn is_valid_selector(selector: &str) -> bool {
    let word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !selector.contains(':') {
        return word(selector);
    }
    selector.ends_with(':') && selector[..selector.len() - 1].split(':').all(word)
}

/// Native prefix for a package: an explicit mapping, or the camel-cased
/// package name.
pub fn package_prefix(package: &str, options: &Options) -> String {
    match options.package_prefixes.get(package) {
        Some(prefix) => prefix.clone(),
        None => camel_case_qualified(package),
    }
}

/// Flat native name for a type of the unit, before collision handling.
pub fn flat_type_name(binary_name: &str, package: &str, options: &Options) -> String {
    let local = if package.is_empty() {
        binary_name
    } else {
        binary_name
            .strip_prefix(package)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(binary_name)
    };
    format!("{}{}", package_prefix(package, options), local.replace('$', "_"))
}

/// Method name part of a selector, with root-object messages renamed.
pub fn method_base_name(name: &str) -> String {
    let name = name.replace('$', "_");
    if is_reserved_name(&name) {
        format!("{}__", name)
    } else {
        name
    }
}

/// Native name of a local or parameter.
pub fn variable_name(name: &str, is_parameter: bool) -> String {
    let name = name.replace('$', "_");
    if name == "initialize" {
        "initialize_".to_string()
    } else if is_reserved_name(&name) {
        format!("{}_", name)
    } else if is_parameter && BAD_PARAMETER_NAMES.contains(&name.as_str()) {
        format!("{}Arg", name)
    } else {
        name
    }
}

/// Instance variable name of a field.
pub fn ivar_name(field: &str) -> String {
    format!("{}_", field.replace('$', "_"))
}

/// Global holding a static field.
pub fn static_var_name(flat_type: &str, field: &str) -> String {
    format!("{}_{}", flat_type, field.replace('$', "_"))
}

/// Native names of every type a unit can mention: the unit's own (after
/// resolution), the library's, and a derived name for anything else.
#[derive(Debug, Clone)]
pub struct NameTable<'a> {
    library: &'a LibraryMetadata,
    types: HashMap<String, String>,
    protocols: HashMap<String, bool>,
}

impl<'a> NameTable<'a> {
    pub fn new(library: &'a LibraryMetadata) -> Self {
        Self {
            library,
            types: HashMap::new(),
            protocols: HashMap::new(),
        }
    }

    /// Table over a resolved unit.
    pub fn for_unit(unit: &CompilationUnit, library: &'a LibraryMetadata) -> Self {
        let mut table = Self::new(library);
        for decl in &unit.types {
            if let Some(flat) = &decl.flat_name {
                table.insert(&decl.qualified_name, flat.clone(), decl.kind == TypeKind::Interface);
            }
        }
        table
    }

    pub fn insert(&mut self, qualified_name: &str, flat_name: String, is_protocol: bool) {
        self.types.insert(qualified_name.to_string(), flat_name);
        self.protocols.insert(qualified_name.to_string(), is_protocol);
    }

    pub fn library(&self) -> &'a LibraryMetadata {
        self.library
    }

    pub fn type_name(&self, qualified_name: &str) -> String {
        if let Some(flat) = self.types.get(qualified_name) {
            return flat.clone();
        }
        if let Some(native) = self.library.native_name(qualified_name) {
            return native.to_string();
        }
        let (package, simple) = split_qualified(qualified_name);
        format!("{}{}", camel_case_qualified(package), simple.replace('$', "_"))
    }

    pub fn is_protocol(&self, qualified_name: &str) -> bool {
        match self.protocols.get(qualified_name) {
            Some(is_protocol) => *is_protocol,
            None => self.library.is_protocol(qualified_name),
        }
    }

    /// Selector keyword token for a parameter type.
    pub fn parameter_token(&self, ty: &Type) -> String {
        let (base, dims) = ty.array_base();
        let base = base.erasure();
        let name = match &base {
            Type::Primitive(prim) => prim.keyword().to_string(),
            Type::Class { name, .. } if dims == 0 && name == OBJECT => return "id".to_string(),
            Type::Class { name, .. } => self.type_name(name),
            _ if dims == 0 => return "id".to_string(),
            _ => self.type_name(OBJECT),
        };
        match dims {
            0 => name,
            1 => format!("{}Array", name),
            n => format!("{}Array{}", name, n),
        }
    }

    /// Selector for a method name (already renamed) and parameter types.
    /// A name that already contains `:` is a complete selector.
    pub fn selector(&self, name: &str, params: &[Type]) -> String {
        if name.contains(':') {
            return name.to_string();
        }
        let mut selector = name.to_string();
        for (i, ty) in params.iter().enumerate() {
            let token = capitalize(&self.parameter_token(ty));
            if i == 0 {
                selector.push_str("With");
            } else {
                selector.push_str("with");
            }
            selector.push_str(&token);
            selector.push(':');
        }
        selector
    }

    /// Native declaration type (`jint`, `NSString *`, `id<JavaLangRunnable>`).
    pub fn objc_type(&self, ty: &Type) -> String {
        match ty.erasure() {
            Type::Void => "void".to_string(),
            Type::Null => "id".to_string(),
            Type::Primitive(prim) => prim.native_name().to_string(),
            Type::Array(element) => match *element {
                Type::Primitive(prim) => format!("{} *", prim.array_class()),
                _ => "IOSObjectArray *".to_string(),
            },
            Type::Class { name, .. } if name == OBJECT => "id".to_string(),
            Type::Class { name, .. } if self.is_protocol(&name) => {
                format!("id<{}>", self.type_name(&name))
            }
            Type::Class { name, .. } => format!("{} *", self.type_name(&name)),
            Type::TypeVar { .. } => "id".to_string(),
        }
    }

    /// Class or protocol names a type mentions, for forward declarations.
    pub fn referenced_type(&self, ty: &Type) -> Option<(String, bool)> {
        match ty.erasure() {
            Type::Array(element) => match *element {
                Type::Primitive(prim) => Some((prim.array_class().to_string(), false)),
                _ => Some(("IOSObjectArray".to_string(), false)),
            },
            Type::Class { name, .. } if name == OBJECT => None,
            Type::Class { name, .. } => Some((self.type_name(&name), self.is_protocol(&name))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;

    #[test]
    fn flat_names_use_camel_cased_package() {
        let options = Options::default();
        assert_eq!(
            flat_type_name("com.example.Outer$Inner", "com.example", &options),
            "ComExampleOuter_Inner"
        );
        assert_eq!(flat_type_name("Main", "", &options), "Main");
        let options = options.with_package_prefix("com.example", "CE");
        assert_eq!(flat_type_name("com.example.Outer$1", "com.example", &options), "CEOuter_1");
    }

    #[test]
    fn selectors_follow_keyword_rules() {
        let library = LibraryMetadata::builtin();
        let names = NameTable::new(&library);
        assert_eq!(names.selector("foo", &[]), "foo");
        assert_eq!(names.selector("foo", &[Type::int()]), "fooWithInt:");
        assert_eq!(
            names.selector("foo", &[Type::string(), Type::object()]),
            "fooWithNSString:withId:"
        );
        assert_eq!(
            names.selector("sum", &[Type::array(Type::array(Type::int()))]),
            "sumWithIntArray2:"
        );
        assert_eq!(
            names.selector("put", &[Type::array(Type::object()), Type::Primitive(PrimitiveType::Long)]),
            "putWithNSObjectArray:withLong:"
        );
        assert_eq!(names.selector("isEqual:", &[Type::object()]), "isEqual:");
    }

    #[test]
    fn reserved_names_are_renamed() {
        assert_eq!(method_base_name("hash"), "hash__");
        assert_eq!(method_base_name("run"), "run");
        assert_eq!(method_base_name("instanceInit$"), "instanceInit_");
        assert_eq!(variable_name("id", false), "id_");
        assert_eq!(variable_name("out", true), "outArg");
        assert_eq!(variable_name("out", false), "out");
        assert_eq!(variable_name("initialize", false), "initialize_");
        assert_eq!(ivar_name("count"), "count_");
        assert_eq!(ivar_name("this$0"), "this_0_");
    }

    #[test]
    fn selector_validation() {
        assert!(is_valid_selector("description"));
        assert!(is_valid_selector("isEqual:"));
        assert!(is_valid_selector("a:b:"));
        assert!(!is_valid_selector("a:b"));
        assert!(!is_valid_selector(""));
        assert!(!is_valid_selector("with space:"));
    }

    #[test]
    fn objc_types() {
        let library = LibraryMetadata::builtin();
        let mut names = NameTable::new(&library);
        names.insert("p.Shape", "PShape".into(), true);
        assert_eq!(names.objc_type(&Type::int()), "jint");
        assert_eq!(names.objc_type(&Type::string()), "NSString *");
        assert_eq!(names.objc_type(&Type::object()), "id");
        assert_eq!(names.objc_type(&Type::class("p.Shape")), "id<PShape>");
        assert_eq!(names.objc_type(&Type::class("java.lang.Runnable")), "id<JavaLangRunnable>");
        assert_eq!(names.objc_type(&Type::array(Type::int())), "IOSIntArray *");
        assert_eq!(names.objc_type(&Type::array(Type::string())), "IOSObjectArray *");
    }
}
