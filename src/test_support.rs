//! Test support for driving the translation pipeline.
//!
//! This module provides:
//! - builders for the type-resolved trees a front end would hand over
//! - stage-by-stage runners, so tests can inspect any intermediate unit
//! - small queries over translated units
//!
//! Tests should check not only the emitted text but the tree each stage
//! produces: which qualifier a local received, where a release guard went,
//! which selector a call site carries.

use crate::ast::*;
use crate::errors::{Diagnostic, TranslateError};
use crate::library::LibraryMetadata;
use crate::options::Options;
use crate::pipeline::{Translation, TranslationFailure, Translator};
use crate::translate::{annotate, flatten, normalize, resolve};
use crate::types::Type;
use crate::visit::{walk_block, Visitor};

// ============================================================================
// Builders
// ============================================================================

/// A unit in `package` holding `types`, with a path derived from the first
/// type's simple name.
pub fn unit(package: &str, types: Vec<TypeDecl>) -> CompilationUnit {
    let file = types.first().map_or("Empty", |decl| decl.name.as_str()).to_string();
    let path = if package.is_empty() {
        format!("{}.java", file)
    } else {
        format!("{}/{}.java", package.replace('.', "/"), file)
    };
    let mut unit = CompilationUnit::new(path, (!package.is_empty()).then_some(package));
    unit.types = types;
    unit
}

pub fn class(qualified_name: &str) -> TypeDecl {
    TypeDecl::new(TypeKind::Class, qualified_name)
}

pub fn interface(qualified_name: &str) -> TypeDecl {
    TypeDecl::new(TypeKind::Interface, qualified_name)
}

pub fn enumeration(qualified_name: &str, constants: &[&str]) -> TypeDecl {
    let mut decl = TypeDecl::new(TypeKind::Enum, qualified_name);
    decl.enum_constants = constants
        .iter()
        .map(|name| EnumConstant {
            name: name.to_string(),
            args: Vec::new(),
            ctor: None,
            body: None,
            span: Span::default(),
        })
        .collect();
    decl
}

/// Member type declared inside `outer`.
pub fn member_class(outer: &TypeDecl, name: &str, is_static: bool) -> TypeDecl {
    let mut decl = class(&format!("{}.{}", outer.qualified_name, name));
    decl.nesting = Nesting::Member;
    decl.modifiers.is_static = is_static;
    decl.enclosing = Some(outer.qualified_name.clone());
    decl
}

pub fn private() -> Modifiers {
    Modifiers {
        visibility: Visibility::Private,
        ..Modifiers::default()
    }
}

pub fn public_static() -> Modifiers {
    Modifiers {
        is_static: true,
        ..Modifiers::public()
    }
}

pub fn field(name: &str, ty: Type) -> Member {
    Member::Field(FieldDecl::new(name, ty))
}

pub fn method(name: &str, params: Vec<VarDecl>, return_type: Type, body: Vec<Stmt>) -> Member {
    Member::Method(MethodDecl::new(name, params, return_type).with_body(body))
}

pub fn static_method(name: &str, params: Vec<VarDecl>, return_type: Type, body: Vec<Stmt>) -> Member {
    Member::Method(
        MethodDecl::new(name, params, return_type)
            .with_body(body)
            .with_modifiers(public_static()),
    )
}

pub fn constructor(params: Vec<VarDecl>, body: Vec<Stmt>) -> Member {
    Member::Method(MethodDecl::constructor(params).with_body(body))
}

/// Hands out unit-unique local ids the way a front end would.
#[derive(Debug, Default)]
pub struct Locals {
    gen: LocalGen,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(&mut self, name: &str, ty: Type) -> VarDecl {
        VarDecl::new(self.gen.fresh(), name, ty)
    }

    pub fn param(&mut self, name: &str, ty: Type) -> VarDecl {
        VarDecl::param(self.gen.fresh(), name, ty)
    }
}

/// `this.name`
pub fn this_field(owner: &str, name: &str, ty: Type) -> Expr {
    Expr::field(
        Some(Expr::this(Type::class(owner))),
        FieldRef::new(owner, name),
        ty,
    )
}

pub fn call_on(target: Expr, declaring: &str, name: &str, params: Vec<Type>, ret: Type, args: Vec<Expr>) -> Expr {
    Expr::call(Some(target), MethodRef::new(declaring, name, params, ret), args)
}

// ============================================================================
// Stage runners
// ============================================================================

pub fn normalized(unit: CompilationUnit) -> Result<CompilationUnit, TranslateError> {
    normalize(unit)
}

pub fn flattened(unit: CompilationUnit) -> Result<CompilationUnit, TranslateError> {
    flatten(normalize(unit)?)
}

pub fn resolved(unit: CompilationUnit) -> Result<CompilationUnit, TranslateError> {
    resolve(flattened(unit)?, &LibraryMetadata::builtin(), &Options::default())
}

pub fn annotated(unit: CompilationUnit) -> Result<(CompilationUnit, Vec<Diagnostic>), TranslateError> {
    annotate(resolved(unit)?, &LibraryMetadata::builtin())
}

pub fn translate(unit: CompilationUnit) -> Result<Translation, TranslationFailure> {
    Translator::default().translate(unit)
}

pub fn translate_with(unit: CompilationUnit, options: Options) -> Result<Translation, TranslationFailure> {
    Translator::new(options, LibraryMetadata::builtin()).translate(unit)
}

// ============================================================================
// Queries
// ============================================================================

pub fn type_named<'u>(unit: &'u CompilationUnit, qualified_name: &str) -> &'u TypeDecl {
    unit.find_type(qualified_name)
        .unwrap_or_else(|| panic!("no type `{}` in unit", qualified_name))
}

/// First method called `name`; `<init>` finds the first constructor.
pub fn method_named<'d>(decl: &'d TypeDecl, name: &str) -> &'d MethodDecl {
    decl.methods()
        .find(|method| method.name == name)
        .unwrap_or_else(|| panic!("no method `{}` in `{}`", name, decl.qualified_name))
}

pub fn body_of<'u>(unit: &'u CompilationUnit, ty: &str, name: &str) -> &'u Block {
    method_named(type_named(unit, ty), name)
        .body
        .as_ref()
        .unwrap_or_else(|| panic!("method `{}` has no body", name))
}

/// Statements anywhere in `block`, nested ones included, that match.
pub fn count_stmts(block: &Block, pred: impl Fn(&Stmt) -> bool) -> usize {
    struct Counter<F> {
        pred: F,
        count: usize,
    }
    impl<F: Fn(&Stmt) -> bool> Visitor for Counter<F> {
        fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
            if (self.pred)(stmt) {
                self.count += 1;
            }
            true
        }
    }
    let mut counter = Counter { pred, count: 0 };
    walk_block(&mut counter, block);
    counter.count
}

/// Every expression anywhere in `block` that matches.
pub fn find_exprs(block: &Block, pred: impl Fn(&Expr) -> bool) -> Vec<Expr> {
    struct Finder<F> {
        pred: F,
        found: Vec<Expr>,
    }
    impl<F: Fn(&Expr) -> bool> Visitor for Finder<F> {
        fn visit_expr(&mut self, expr: &Expr) -> bool {
            if (self.pred)(expr) {
                self.found.push(expr.clone());
            }
            true
        }
    }
    let mut finder = Finder {
        pred,
        found: Vec::new(),
    };
    walk_block(&mut finder, block);
    finder.found
}

/// Selectors of every method of a type, in declaration order.
pub fn selectors_of(decl: &TypeDecl) -> Vec<String> {
    decl.methods().filter_map(|method| method.selector.clone()).collect()
}
