//! Source-language types as they arrive from the front end.
//!
//! Types are already resolved: class types carry their qualified name and
//! generic arguments, type variables carry their first bound. The translator
//! only ever reasons about erased types (generic arguments dropped, type
//! variables replaced by their bound), which is what the native object model
//! can express.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Qualified name of the root object type.
pub const OBJECT: &str = "java.lang.Object";
/// Qualified name of the string type.
pub const STRING: &str = "java.lang.String";
/// Root of the throwable hierarchy.
pub const THROWABLE: &str = "java.lang.Throwable";
pub const ENUM: &str = "java.lang.Enum";
pub const CLASS: &str = "java.lang.Class";
pub const ITERABLE: &str = "java.lang.Iterable";
pub const ITERATOR: &str = "java.util.Iterator";
pub const AUTO_CLOSEABLE: &str = "java.lang.AutoCloseable";
pub const ASSERTION_ERROR: &str = "java.lang.AssertionError";

/// Primitive (value) types of the object language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

pub const ALL_PRIMITIVES: [PrimitiveType; 8] = [
    PrimitiveType::Boolean,
    PrimitiveType::Byte,
    PrimitiveType::Char,
    PrimitiveType::Short,
    PrimitiveType::Int,
    PrimitiveType::Long,
    PrimitiveType::Float,
    PrimitiveType::Double,
];

impl PrimitiveType {
    /// Source keyword (`int`, `boolean`, ...)
    pub fn keyword(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Char => "char",
            PrimitiveType::Short => "short",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
        }
    }

    /// Fixed token used when this type appears in a method selector.
    pub fn selector_token(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "Boolean",
            PrimitiveType::Byte => "Byte",
            PrimitiveType::Char => "Char",
            PrimitiveType::Short => "Short",
            PrimitiveType::Int => "Int",
            PrimitiveType::Long => "Long",
            PrimitiveType::Float => "Float",
            PrimitiveType::Double => "Double",
        }
    }

    /// Native typedef (`jint`, `jboolean`, ...)
    pub fn native_name(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "jboolean",
            PrimitiveType::Byte => "jbyte",
            PrimitiveType::Char => "jchar",
            PrimitiveType::Short => "jshort",
            PrimitiveType::Int => "jint",
            PrimitiveType::Long => "jlong",
            PrimitiveType::Float => "jfloat",
            PrimitiveType::Double => "jdouble",
        }
    }

    /// Single-character type descriptor used in reflection metadata.
    pub fn descriptor(self) -> char {
        match self {
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Byte => 'B',
            PrimitiveType::Char => 'C',
            PrimitiveType::Short => 'S',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
            PrimitiveType::Float => 'F',
            PrimitiveType::Double => 'D',
        }
    }

    /// Emulated-library array class holding elements of this type.
    pub fn array_class(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "IOSBooleanArray",
            PrimitiveType::Byte => "IOSByteArray",
            PrimitiveType::Char => "IOSCharArray",
            PrimitiveType::Short => "IOSShortArray",
            PrimitiveType::Int => "IOSIntArray",
            PrimitiveType::Long => "IOSLongArray",
            PrimitiveType::Float => "IOSFloatArray",
            PrimitiveType::Double => "IOSDoubleArray",
        }
    }

    /// Qualified name of the boxed counterpart.
    pub fn boxed_class(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "java.lang.Boolean",
            PrimitiveType::Byte => "java.lang.Byte",
            PrimitiveType::Char => "java.lang.Character",
            PrimitiveType::Short => "java.lang.Short",
            PrimitiveType::Int => "java.lang.Integer",
            PrimitiveType::Long => "java.lang.Long",
            PrimitiveType::Float => "java.lang.Float",
            PrimitiveType::Double => "java.lang.Double",
        }
    }

    /// Accessor on the boxed class returning the primitive value.
    pub fn unbox_method(self) -> String {
        format!("{}Value", self.keyword())
    }

    /// Inverse of `boxed_class`.
    pub fn from_boxed(name: &str) -> Option<Self> {
        ALL_PRIMITIVES
            .into_iter()
            .find(|prim| prim.boxed_class() == name)
    }

    /// Whether a `switch` may dispatch on this type directly.
    pub fn is_switchable(self) -> bool {
        matches!(
            self,
            PrimitiveType::Byte | PrimitiveType::Char | PrimitiveType::Short | PrimitiveType::Int
        )
    }
}

/// A resolved source-language type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    /// The type of the `null` literal
    Null,
    Primitive(PrimitiveType),
    /// A class, interface or enum type
    Class {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Type>,
    },
    Array(Box<Type>),
    TypeVar {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bound: Option<Box<Type>>,
    },
}

impl Type {
    pub fn class(name: impl Into<String>) -> Self {
        Type::Class {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn object() -> Self {
        Type::class(OBJECT)
    }

    pub fn string() -> Self {
        Type::class(STRING)
    }

    pub fn int() -> Self {
        Type::Primitive(PrimitiveType::Int)
    }

    pub fn boolean() -> Self {
        Type::Primitive(PrimitiveType::Boolean)
    }

    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Primitive(_))
    }

    /// Whether values of this type are heap object references.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::Null | Type::Class { .. } | Type::Array(_) | Type::TypeVar { .. }
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Class { name, .. } if name == STRING)
    }

    /// Erase generic arguments and replace type variables by their bound.
    pub fn erasure(&self) -> Type {
        match self {
            Type::Class { name, .. } => Type::class(name.clone()),
            Type::Array(element) => Type::array(element.erasure()),
            Type::TypeVar { bound, .. } => match bound {
                Some(bound) => bound.erasure(),
                None => Type::object(),
            },
            other => other.clone(),
        }
    }

    /// Replace type variables bound in `bindings`, leaving others alone.
    pub fn substitute(&self, bindings: &HashMap<String, Type>) -> Type {
        match self {
            Type::TypeVar { name, .. } => match bindings.get(name) {
                Some(bound) => bound.clone(),
                None => self.clone(),
            },
            Type::Class { name, args } => Type::Class {
                name: name.clone(),
                args: args.iter().map(|arg| arg.substitute(bindings)).collect(),
            },
            Type::Array(element) => Type::array(element.substitute(bindings)),
            other => other.clone(),
        }
    }

    /// Type variable bindings a parameterized use of a generic type makes,
    /// given the names of the type's parameters. A raw use binds nothing.
    pub fn bindings(&self, params: &[String]) -> HashMap<String, Type> {
        match self {
            Type::Class { args, .. } if args.len() == params.len() => {
                params.iter().cloned().zip(args.iter().cloned()).collect()
            }
            _ => HashMap::new(),
        }
    }

    /// Qualified class name of the erased type, if it is a class type.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Class { name, .. } => Some(name),
            Type::TypeVar { bound: Some(bound), .. } => bound.class_name(),
            Type::TypeVar { bound: None, .. } => Some(OBJECT),
            _ => None,
        }
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Innermost element type and the number of array dimensions.
    pub fn array_base(&self) -> (&Type, usize) {
        let mut ty = self;
        let mut dims = 0;
        while let Type::Array(element) = ty {
            ty = element;
            dims += 1;
        }
        (ty, dims)
    }

    /// Type descriptor of the erased type (`I`, `[I`, `Ljava/lang/String;`).
    pub fn descriptor(&self) -> String {
        match self.erasure() {
            Type::Void => "V".to_string(),
            Type::Null => format!("L{};", OBJECT.replace('.', "/")),
            Type::Primitive(p) => p.descriptor().to_string(),
            Type::Class { name, .. } => format!("L{};", name.replace('.', "/")),
            Type::Array(element) => format!("[{}", element.descriptor()),
            Type::TypeVar { .. } => format!("L{};", OBJECT.replace('.', "/")),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Primitive(p) => write!(f, "{}", p.keyword()),
            Type::Class { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    write!(f, "<{}>", args.join(", "))?;
                }
                Ok(())
            }
            Type::Array(element) => write!(f, "{}[]", element),
            Type::TypeVar { name, .. } => write!(f, "{}", name),
        }
    }
}

/// Split a qualified name into (package, simple name).
pub fn split_qualified(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => (&name[..idx], &name[idx + 1..]),
        None => ("", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erasure_drops_generic_arguments_and_type_variables() {
        let list = Type::Class {
            name: "java.util.List".into(),
            args: vec![Type::string()],
        };
        assert_eq!(list.erasure(), Type::class("java.util.List"));

        let unbounded = Type::TypeVar {
            name: "T".into(),
            bound: None,
        };
        assert_eq!(unbounded.erasure(), Type::object());

        let bounded = Type::TypeVar {
            name: "N".into(),
            bound: Some(Box::new(Type::class("java.lang.Number"))),
        };
        assert_eq!(bounded.erasure(), Type::class("java.lang.Number"));
    }

    #[test]
    fn substitution_binds_supertype_arguments() {
        let t = Type::TypeVar {
            name: "T".into(),
            bound: None,
        };
        let boxed = Type::Class {
            name: "p.Box".into(),
            args: vec![Type::string()],
        };
        let bindings = boxed.bindings(&["T".to_string()]);
        assert_eq!(t.substitute(&bindings), Type::string());
        assert_eq!(Type::array(t.clone()).substitute(&bindings).erasure(), Type::array(Type::string()));
        assert!(Type::class("p.Box").bindings(&["T".to_string()]).is_empty());
        assert_eq!(t.substitute(&HashMap::new()).erasure(), Type::object());
    }

    #[test]
    fn descriptors_follow_erasure() {
        assert_eq!(Type::int().descriptor(), "I");
        assert_eq!(Type::array(Type::int()).descriptor(), "[I");
        assert_eq!(Type::string().descriptor(), "Ljava/lang/String;");
        assert_eq!(Type::Void.descriptor(), "V");
    }

    #[test]
    fn array_base_counts_dimensions() {
        let ty = Type::array(Type::array(Type::string()));
        let (base, dims) = ty.array_base();
        assert_eq!(base, &Type::string());
        assert_eq!(dims, 2);
    }

    #[test]
    fn display_reads_like_source() {
        let ty = Type::Class {
            name: "java.util.Map".into(),
            args: vec![Type::string(), Type::class("java.lang.Integer")],
        };
        assert_eq!(ty.to_string(), "java.util.Map<java.lang.String, java.lang.Integer>");
        assert_eq!(Type::array(Type::int()).to_string(), "int[]");
    }

    #[test]
    fn boxing_round_trips() {
        for prim in ALL_PRIMITIVES {
            assert_eq!(PrimitiveType::from_boxed(prim.boxed_class()), Some(prim));
        }
        assert_eq!(PrimitiveType::Int.unbox_method(), "intValue");
        assert_eq!(PrimitiveType::from_boxed("java.lang.String"), None);
    }

    #[test]
    fn split_qualified_handles_default_package() {
        assert_eq!(split_qualified("com.example.Foo"), ("com.example", "Foo"));
        assert_eq!(split_qualified("Foo"), ("", "Foo"));
    }
}
