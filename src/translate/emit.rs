//! Code emitter: renders an annotated unit as a declaration unit (`.h`)
//! and a definition unit (`.m`).
//!
//! Emission is pure. Types are written with every supertype declared in
//! the unit ahead of its subtypes, otherwise in declaration order; include
//! and forward declaration lists are sorted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ast::*;
use crate::errors::{Stage, TranslateError};
use crate::invariants::{check, Level};
use crate::library::LibraryMetadata;
use crate::options::Options;
use crate::translate::emit_body::{declaration, BodyEmitter};
use crate::translate::metadata::write_metadata;
use crate::translate::names::NameTable;
use crate::translate::selectors::supertype_order;
use crate::translate::source_builder::{include_guard, SourceBuilder};
use crate::types::{Type, OBJECT, STRING};
use crate::visit::{walk_unit, Visitor};

type Result<T> = std::result::Result<T, TranslateError>;

/// The two artifacts of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeArtifactPair {
    /// Relative path of the declaration unit (`com/example/Foo.h`)
    pub header_path: String,
    /// Relative path of the definition unit (`com/example/Foo.m`)
    pub source_path: String,
    pub header: String,
    pub source: String,
    /// Hex digest over both texts, for incremental build caches
    pub fingerprint: String,
}

impl NativeArtifactPair {
    fn new(header_path: String, source_path: String, header: String, source: String) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(header_path.as_bytes());
        hasher.update(&[0]);
        hasher.update(header.as_bytes());
        hasher.update(&[0]);
        hasher.update(source.as_bytes());
        let fingerprint = hasher.finalize().to_hex().to_string();
        Self {
            header_path,
            source_path,
            header,
            source,
            fingerprint,
        }
    }
}

pub fn emit(unit: CompilationUnit, library: &LibraryMetadata, options: &Options) -> Result<NativeArtifactPair> {
    check(&unit, Level::Annotated, Stage::Emit)?;
    let names = NameTable::for_unit(&unit, library);
    let emitter = Emitter {
        unit: &unit,
        names: &names,
        options,
    };
    let (header_path, source_path) = artifact_paths(&unit);
    let header = emitter.header(&header_path)?;
    let source = emitter.source(&header_path)?;
    Ok(NativeArtifactPair::new(header_path, source_path, header, source))
}

/// Package directories plus the source file's stem.
pub fn artifact_paths(unit: &CompilationUnit) -> (String, String) {
    let file = unit.source_path.rsplit('/').next().unwrap_or(&unit.source_path);
    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    let base = match &unit.package {
        Some(package) if !package.is_empty() => format!("{}/{}", package.replace('.', "/"), stem),
        _ => stem.to_string(),
    };
    (format!("{}.h", base), format!("{}.m", base))
}

fn internal(message: impl Into<String>, span: Span) -> TranslateError {
    TranslateError::internal(Stage::Emit, message, span)
}

fn flat_name(decl: &TypeDecl) -> Result<&str> {
    decl.flat_name
        .as_deref()
        .ok_or_else(|| internal(format!("type `{}` has no native name", decl.qualified_name), decl.span))
}

fn ivar_qualifier(ownership: Option<Ownership>, arc: bool) -> &'static str {
    match (ownership, arc) {
        (Some(Ownership::Weak), false) => "WEAK_ ",
        (Some(Ownership::Weak), true) => "__weak ",
        (Some(Ownership::UnsafeUnretained), _) => "__unsafe_unretained ",
        _ => "",
    }
}

fn is_strong_reference(field: &FieldDecl) -> bool {
    field.ty.is_reference() && field.ownership == Some(Ownership::Strong)
}

fn has_static_initializer(decl: &TypeDecl) -> bool {
    decl.members
        .iter()
        .any(|member| matches!(member, Member::StaticInitializer(_)))
}

/// Every type an annotated unit's bodies and signatures mention.
#[derive(Default)]
struct TypeUses(Vec<Type>);

impl TypeUses {
    fn class(&mut self, name: &str) {
        self.0.push(Type::class(name));
    }
}

impl Visitor for TypeUses {
    fn visit_expr(&mut self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::New { class, .. } => self.class(class),
            ExprKind::MethodCall { method, .. } => self.class(&method.declaring),
            ExprKind::FieldAccess { field, .. } => self.class(&field.declaring),
            ExprKind::Cast(_) | ExprKind::NewArray { .. } => self.0.push(expr.ty.clone()),
            ExprKind::InstanceOf { test, .. } => self.0.push(test.clone()),
            ExprKind::ClassLiteral(ty) => {
                self.class(crate::types::CLASS);
                self.0.push(ty.clone());
            }
            _ => {}
        }
        true
    }

    fn visit_var(&mut self, var: &VarDecl) {
        self.0.push(var.ty.clone());
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
        if let StmtKind::Try { catches, .. } = &stmt.kind {
            for clause in catches {
                self.0.extend(clause.types.iter().cloned());
            }
        }
        true
    }

    fn visit_type(&mut self, decl: &TypeDecl) -> bool {
        for field in decl.fields() {
            self.0.push(field.ty.clone());
        }
        for method in decl.methods() {
            self.0.push(method.return_type.clone());
        }
        true
    }
}

struct Emitter<'u, 'a> {
    unit: &'u CompilationUnit,
    names: &'u NameTable<'a>,
    options: &'u Options,
}

impl<'u, 'a> Emitter<'u, 'a> {
    fn arc(&self) -> bool {
        self.options.is_arc()
    }

    fn is_unit_type(&self, qualified_name: &str) -> bool {
        self.unit.types.iter().any(|decl| decl.qualified_name == qualified_name)
    }

    fn ordered_types(&self) -> Vec<&'u TypeDecl> {
        supertype_order(self.unit)
            .into_iter()
            .map(|i| &self.unit.types[i])
            .collect()
    }

    fn banner(&self, out: &mut SourceBuilder) {
        out.line("//");
        if let Some(banner) = &self.options.file_banner {
            for line in banner.lines() {
                out.line(format!("//  {}", line).trim_end());
            }
        }
        out.line(format!("//  source: {}", self.unit.source_path));
        out.line("//");
        out.blank();
    }

    /// Header declaring a type from outside the unit. Foundation types come
    /// with the runtime header.
    fn header_for(&self, ty: &Type) -> Option<String> {
        let (base, dims) = ty.array_base();
        if dims > 0 {
            return Some(match base {
                Type::Primitive(_) if dims == 1 => "IOSPrimitiveArray.h".to_string(),
                _ => "IOSObjectArray.h".to_string(),
            });
        }
        let name = base.erasure().class_name()?.to_string();
        if name == OBJECT || name == STRING || self.is_unit_type(&name) {
            return None;
        }
        let library = self.names.library();
        match library.lookup(&name) {
            Some(entry) => match &entry.header {
                Some(header) => Some(header.clone()),
                None => Some(format!("{}.h", entry.native_name)),
            },
            None => Some(format!("{}.h", name.replace('.', "/"))),
        }
    }

    fn supertypes(decl: &TypeDecl) -> impl Iterator<Item = &Type> {
        decl.superclass.iter().chain(&decl.interfaces)
    }

    // ========================================================================
    // Declaration unit
    // ========================================================================

    fn header(&self, header_path: &str) -> Result<String> {
        let mut out = SourceBuilder::new();
        self.banner(&mut out);
        let guard = include_guard(header_path);
        out.line(format!("#ifndef {}", guard));
        out.line(format!("#define {}", guard));
        out.blank();

        let mut includes = BTreeSet::new();
        for decl in &self.unit.types {
            includes.extend(Self::supertypes(decl).filter_map(|ty| self.header_for(ty)));
        }
        out.line("#include \"J2ObjC_header.h\"");
        for include in &includes {
            out.line(format!("#include \"{}\"", include));
        }
        out.blank();

        let mut classes = BTreeSet::new();
        let mut protocols = BTreeSet::new();
        for decl in &self.unit.types {
            let supertypes: Vec<&str> = Self::supertypes(decl).filter_map(Type::class_name).collect();
            let mut signature_types: Vec<&Type> = decl
                .fields()
                .filter(|field| !field.is_static() || !field.ty.is_primitive())
                .map(|field| &field.ty)
                .collect();
            for method in decl.methods() {
                if method.modifiers.visibility == Visibility::Private {
                    continue;
                }
                signature_types.push(&method.return_type);
                signature_types.extend(method.params.iter().map(|param| &param.ty));
            }
            for ty in signature_types {
                if ty.class_name().is_some_and(|name| supertypes.contains(&name)) {
                    continue;
                }
                match self.names.referenced_type(ty) {
                    Some((name, true)) => {
                        protocols.insert(name);
                    }
                    Some((name, false)) if name != "NSString" => {
                        classes.insert(name);
                    }
                    _ => {}
                }
            }
        }
        for class in &classes {
            out.line(format!("@class {};", class));
        }
        for protocol in &protocols {
            out.line(format!("@protocol {};", protocol));
        }
        out.blank();

        for decl in self.ordered_types() {
            self.declare_type(&mut out, decl)?;
        }

        out.line(format!("#endif // {}", guard));
        Ok(out.finish())
    }

    fn declare_type(&self, out: &mut SourceBuilder, decl: &TypeDecl) -> Result<()> {
        let flat = flat_name(decl)?;
        if decl.kind == TypeKind::Enum {
            out.open(format!("typedef NS_ENUM(NSUInteger, {}_Enum) {{", flat));
            for (ordinal, constant) in decl.enum_constants.iter().enumerate() {
                out.line(format!("{}_Enum_{} = {},", flat, constant.name, ordinal));
            }
            out.close("};");
            out.blank();
        }

        let protocols: Vec<String> = decl
            .interfaces
            .iter()
            .filter_map(Type::class_name)
            .map(|name| self.names.type_name(name))
            .collect();

        if decl.is_interface() {
            let mut supers = protocols;
            supers.push("NSObject".to_string());
            out.line(format!("@protocol {} <{}>", flat, supers.join(", ")));
            out.blank();
            for method in decl.methods() {
                if method.body.is_some() {
                    return Err(TranslateError::unsupported(
                        format!("interface method `{}` with a body", method.name),
                        method.span,
                    ));
                }
                if method.is_static() {
                    return Err(TranslateError::unsupported(
                        format!("static interface method `{}`", method.name),
                        method.span,
                    ));
                }
                out.line(format!("{};", self.signature(method)?));
                out.blank();
            }
            out.line("@end");
            out.blank();
        } else {
            let superclass = decl
                .superclass_name()
                .map_or_else(|| "NSObject".to_string(), |name| self.names.type_name(name));
            let protocols = if protocols.is_empty() {
                String::new()
            } else {
                format!(" <{}>", protocols.join(", "))
            };
            let ivars: Vec<&FieldDecl> = decl.fields().filter(|field| !field.is_static()).collect();
            if ivars.is_empty() {
                out.line(format!("@interface {} : {}{}", flat, superclass, protocols));
            } else {
                out.line(format!("@interface {} : {}{} {{", flat, superclass, protocols));
                out.line(" @public");
                out.indent();
                for field in &ivars {
                    out.line(format!("{};", self.ivar(field)?));
                }
                out.dedent();
                out.line("}");
            }
            out.blank();
            for method in decl.methods() {
                if method.modifiers.visibility == Visibility::Private {
                    continue;
                }
                out.line(format!("{};", self.signature(method)?));
                out.blank();
            }
            out.line("@end");
            out.blank();
        }

        if has_static_initializer(decl) {
            if decl.is_interface() {
                return Err(TranslateError::unsupported(
                    format!("static state initialized at run time in interface `{}`", decl.qualified_name),
                    decl.span,
                ));
            }
            out.line(format!("J2OBJC_STATIC_INIT({})", flat));
        } else {
            out.line(format!("J2OBJC_EMPTY_STATIC_INIT({})", flat));
        }
        out.blank();

        let mut setters = false;
        for field in decl.fields().filter(|field| !field.is_static() && is_strong_reference(field)) {
            let native = self.field_native_name(field)?;
            out.line(format!(
                "J2OBJC_FIELD_SETTER({}, {}, {})",
                flat,
                native,
                self.names.objc_type(&field.ty)
            ));
            setters = true;
        }
        if setters {
            out.blank();
        }

        let mut statics = false;
        for field in decl.fields().filter(|field| field.is_static()) {
            let native = self.field_native_name(field)?;
            match &field.init {
                Some(init) if field.is_compile_time_constant() && field.ty.is_primitive() => {
                    let value = self.constant(init)?;
                    out.line(format!("#define {} {}", native, value));
                }
                _ => out.line(format!(
                    "FOUNDATION_EXPORT {};",
                    declaration(&self.names.objc_type(&field.ty), native)
                )),
            }
            statics = true;
        }
        if statics {
            out.blank();
        }

        out.line(format!("J2OBJC_TYPE_LITERAL_HEADER({})", flat));
        out.blank();
        Ok(())
    }

    fn field_native_name<'f>(&self, field: &'f FieldDecl) -> Result<&'f str> {
        field
            .native_name
            .as_deref()
            .ok_or_else(|| internal(format!("field `{}` has no native name", field.name), field.span))
    }

    fn ivar(&self, field: &FieldDecl) -> Result<String> {
        let native = self.field_native_name(field)?;
        Ok(format!(
            "{}{}",
            ivar_qualifier(field.ownership, self.arc()),
            declaration(&self.names.objc_type(&field.ty), native)
        ))
    }

    fn constant(&self, init: &Expr) -> Result<String> {
        let mut scratch = SourceBuilder::new();
        let empty = Block::default();
        BodyEmitter::for_block(self.names, &mut scratch, self.arc(), &empty).expr(init)
    }

    fn signature(&self, method: &MethodDecl) -> Result<String> {
        let selector = method
            .selector
            .as_deref()
            .ok_or_else(|| internal(format!("method `{}` has no selector", method.name), method.span))?;
        let prefix = if method.is_static() { "+" } else { "-" };
        let return_type = if method.is_constructor() {
            "instancetype".to_string()
        } else if selector == "hash" {
            "NSUInteger".to_string()
        } else {
            self.names.objc_type(&method.return_type)
        };
        if method.params.is_empty() {
            return Ok(format!("{} ({}){}", prefix, return_type, selector));
        }
        let keywords: Vec<&str> = selector.split_inclusive(':').collect();
        if keywords.len() != method.params.len() {
            return Err(internal(
                format!("selector `{}` does not match {} parameters", selector, method.params.len()),
                method.span,
            ));
        }
        let parts: Vec<String> = keywords
            .iter()
            .zip(&method.params)
            .map(|(keyword, param)| {
                let name = param.native_name.clone().unwrap_or_else(|| param.name.clone());
                format!("{}({}){}", keyword, self.names.objc_type(&param.ty), name)
            })
            .collect();
        Ok(format!("{} ({}){}", prefix, return_type, parts.join(" ")))
    }

    // ========================================================================
    // Definition unit
    // ========================================================================

    fn source(&self, header_path: &str) -> Result<String> {
        let mut out = SourceBuilder::new();
        self.banner(&mut out);
        out.line(format!("#include \"{}\"", header_path));
        out.line("#include \"J2ObjC_source.h\"");

        let mut header_includes = BTreeSet::new();
        for decl in &self.unit.types {
            header_includes.extend(Self::supertypes(decl).filter_map(|ty| self.header_for(ty)));
        }
        let mut uses = TypeUses::default();
        walk_unit(&mut uses, self.unit);
        let includes: BTreeSet<String> = uses
            .0
            .iter()
            .filter_map(|ty| self.header_for(ty))
            .filter(|include| !header_includes.contains(include))
            .collect();
        for include in &includes {
            out.line(format!("#include \"{}\"", include));
        }
        out.blank();

        for decl in self.ordered_types() {
            self.define_type(&mut out, decl)?;
        }
        Ok(out.finish())
    }

    fn define_type(&self, out: &mut SourceBuilder, decl: &TypeDecl) -> Result<()> {
        let flat = flat_name(decl)?;

        let mut globals = false;
        for field in decl.fields().filter(|field| field.is_static()) {
            let native = self.field_native_name(field)?;
            let decl_text = declaration(&self.names.objc_type(&field.ty), native);
            match &field.init {
                Some(_) if field.is_compile_time_constant() && field.ty.is_primitive() => continue,
                Some(init) if field.is_compile_time_constant() => {
                    out.line(format!("{} = {};", decl_text, self.constant(init)?));
                }
                _ => out.line(format!("{};", decl_text)),
            }
            globals = true;
        }
        if globals {
            out.blank();
        }

        if decl.is_interface() {
            out.line(format!("J2OBJC_INTERFACE_TYPE_LITERAL_SOURCE({})", flat));
            out.blank();
            return Ok(());
        }

        let private: Vec<&MethodDecl> = decl
            .methods()
            .filter(|method| method.modifiers.visibility == Visibility::Private)
            .collect();
        if !private.is_empty() {
            out.line(format!("@interface {} ()", flat));
            out.blank();
            for method in &private {
                out.line(format!("{};", self.signature(method)?));
                out.blank();
            }
            out.line("@end");
            out.blank();
        }

        out.line(format!("@implementation {}", flat));
        out.blank();
        for method in decl.methods() {
            self.define_method(out, method)?;
            out.blank();
        }

        let released: Vec<&FieldDecl> = decl
            .fields()
            .filter(|field| !field.is_static() && is_strong_reference(field))
            .collect();
        if !self.arc() && !released.is_empty() {
            out.open("- (void)dealloc {");
            for field in released {
                out.line(format!("RELEASE_({});", self.field_native_name(field)?));
            }
            out.line("[super dealloc];");
            out.close("}");
            out.blank();
        }

        for member in &decl.members {
            if let Member::StaticInitializer(block) = member {
                out.open("+ (void)initialize {");
                out.open(format!("if (self == [{} class]) {{", flat));
                BodyEmitter::for_block(self.names, out, self.arc(), block).stmts(&block.stmts)?;
                out.line(format!("J2OBJC_SET_INITIALIZED({})", flat));
                out.close("}");
                out.close("}");
                out.blank();
            }
        }

        if self.options.emit_reflection {
            write_metadata(out, decl, flat);
            out.blank();
        }

        out.line("@end");
        out.blank();
        out.line(format!("J2OBJC_CLASS_TYPE_LITERAL_SOURCE({})", flat));
        out.blank();
        Ok(())
    }

    fn define_method(&self, out: &mut SourceBuilder, method: &MethodDecl) -> Result<()> {
        let signature = self.signature(method)?;
        let Some(body) = &method.body else {
            if method.modifiers.is_native {
                return Err(TranslateError::unsupported(
                    format!("native method `{}`", method.name),
                    method.span,
                ));
            }
            out.open(format!("{} {{", signature));
            out.line("// can't call an abstract method");
            out.line("[self doesNotRecognizeSelector:_cmd];");
            if !method.return_type.is_void() {
                out.line(format!("return {};", zero_value(&method.return_type)));
            }
            out.close("}");
            return Ok(());
        };
        out.open(format!("{} {{", signature));
        BodyEmitter::for_method(self.names, out, self.arc(), method).stmts(&body.stmts)?;
        let returns = matches!(
            body.stmts.last().map(|stmt| &stmt.kind),
            Some(StmtKind::Return(_)) | Some(StmtKind::Throw(_))
        );
        if method.is_constructor() && !returns {
            out.line("return self;");
        }
        out.close("}");
        Ok(())
    }
}

fn zero_value(ty: &Type) -> &'static str {
    match ty {
        Type::Primitive(crate::types::PrimitiveType::Boolean) => "false",
        Type::Primitive(_) => "0",
        _ => "nil",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths_follow_package() {
        let unit = CompilationUnit::new("src/com/example/Foo.java", Some("com.example"));
        assert_eq!(
            artifact_paths(&unit),
            ("com/example/Foo.h".to_string(), "com/example/Foo.m".to_string())
        );
        let unit = CompilationUnit::new("Main.java", None);
        assert_eq!(artifact_paths(&unit), ("Main.h".to_string(), "Main.m".to_string()));
    }

    #[test]
    fn test_ivar_qualifiers_by_memory_model() {
        assert_eq!(ivar_qualifier(Some(Ownership::Weak), false), "WEAK_ ");
        assert_eq!(ivar_qualifier(Some(Ownership::Weak), true), "__weak ");
        assert_eq!(ivar_qualifier(Some(Ownership::UnsafeUnretained), false), "__unsafe_unretained ");
        assert_eq!(ivar_qualifier(Some(Ownership::Strong), true), "");
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = NativeArtifactPair::new("A.h".into(), "A.m".into(), "h".into(), "m".into());
        let b = NativeArtifactPair::new("A.h".into(), "A.m".into(), "h".into(), "m".into());
        let c = NativeArtifactPair::new("A.h".into(), "A.m".into(), "h".into(), "m2".into());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
    }
}
