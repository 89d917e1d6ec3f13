//! Translator AST.
//!
//! The front end hands over one type-resolved `CompilationUnit`; every stage
//! of the pipeline consumes a unit by value and returns a new one. The same
//! node types serve all stages: later stages fill in the `Option` slots
//! (binary names, flat names, selectors, ownership qualifiers) and the
//! normalizer introduces the two lowered statement forms (`Guarded`,
//! `Stmt::Local` with a loop-element origin) that earlier input never uses.
//!
//! ## Identity
//!
//! Types are keyed by their qualified name, which the front end guarantees
//! to be unique within the unit (anonymous and local classes get synthetic
//! keys). Local variables are keyed by `LocalId`, unique per unit; names are
//! for display only and may repeat across scopes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Type;

// ============================================================================
// Source positions
// ============================================================================

/// Byte range into the original source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Spans synthesized by the translator carry no position.
    pub fn is_synthetic(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

/// Human-readable source position (1-indexed line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    /// Counted in characters, not bytes
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedSpan {
    pub start: Position,
    pub end: Position,
}

impl fmt::Display for LocatedSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(
                f,
                "{}:{}-{}",
                self.start.line, self.start.column, self.end.column
            )
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Maps byte offsets of a unit's source text to line:column positions.
///
/// Spans arrive from the front end's serialized AST, so offsets are clamped
/// to the text and snapped back to the nearest character boundary instead of
/// being trusted.
#[derive(Debug, Clone)]
pub struct SourceMap {
    source: String,
    /// Byte offset of the start of each line
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            source: source.to_string(),
            line_starts,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    fn clamp(&self, offset: usize) -> usize {
        let mut offset = offset.min(self.source.len());
        while offset > 0 && !self.source.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }

    /// Convert a byte offset to a 1-indexed position.
    pub fn position(&self, byte_offset: usize) -> Position {
        let offset = self.clamp(byte_offset);
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_idx).copied().unwrap_or(0);
        let column = self
            .source
            .get(line_start..offset)
            .map(|text| text.chars().count())
            .unwrap_or(0)
            + 1;
        Position {
            line: line_idx + 1,
            column,
        }
    }

    pub fn locate(&self, span: &Span) -> LocatedSpan {
        LocatedSpan {
            start: self.position(span.start),
            end: self.position(span.end),
        }
    }

    /// Text of a 1-indexed line, without the line terminator.
    pub fn line(&self, line_num: usize) -> Option<&str> {
        if line_num == 0 || line_num > self.line_starts.len() {
            return None;
        }
        let line_idx = line_num - 1;
        let start = self.line_starts[line_idx];
        let end = match self.line_starts.get(line_idx + 1) {
            Some(next) => next - 1,
            None => self.source.len(),
        };
        self.source
            .get(start..end)
            .map(|line| line.trim_end_matches('\r'))
    }

    pub fn span_text(&self, span: &Span) -> &str {
        let start = self.clamp(span.start);
        let end = self.clamp(span.end).max(start);
        &self.source[start..end]
    }
}

// ============================================================================
// Compilation unit and type declarations
// ============================================================================

/// One source file, fully type-resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationUnit {
    /// Path of the source file relative to the source root
    pub source_path: String,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    pub types: Vec<TypeDecl>,
    /// Original source text, used only to render diagnostic snippets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl CompilationUnit {
    pub fn new(source_path: impl Into<String>, package: Option<&str>) -> Self {
        Self {
            source_path: source_path.into(),
            package: package.map(str::to_string),
            imports: Vec::new(),
            types: Vec::new(),
            source: None,
        }
    }

    pub fn package_name(&self) -> &str {
        self.package.as_deref().unwrap_or("")
    }

    /// Find a top-level (or, after flattening, any) type by qualified name.
    pub fn find_type(&self, qualified_name: &str) -> Option<&TypeDecl> {
        self.types
            .iter()
            .find(|decl| decl.qualified_name == qualified_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nesting {
    TopLevel,
    /// Declared in another type's body; `Modifiers::is_static` distinguishes
    /// static nested types from inner classes
    Member,
    /// Declared inside a method body
    Local,
    Anonymous,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Protected,
    #[default]
    Package,
    Private,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub is_abstract: bool,
    pub is_synchronized: bool,
    pub is_native: bool,
}

impl Modifiers {
    pub fn public() -> Self {
        Self {
            visibility: Visibility::Public,
            ..Self::default()
        }
    }

    /// JVM-style access flags, used by reflection metadata.
    pub fn access_flags(&self) -> u32 {
        let mut flags = match self.visibility {
            Visibility::Public => 0x0001,
            Visibility::Private => 0x0002,
            Visibility::Protected => 0x0004,
            Visibility::Package => 0,
        };
        if self.is_static {
            flags |= 0x0008;
        }
        if self.is_final {
            flags |= 0x0010;
        }
        if self.is_synchronized {
            flags |= 0x0020;
        }
        if self.is_native {
            flags |= 0x0100;
        }
        if self.is_abstract {
            flags |= 0x0400;
        }
        flags
    }
}

/// Source annotations the translator understands. Others are dropped by the
/// front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    /// Field must not keep its referent alive
    Weak,
    /// The synthesized enclosing-instance field of this type is weak
    WeakOuter,
    /// Field must keep its referent alive, even on a reference cycle
    Strong,
    /// Explicit native name for a type or selector for a method
    ObjectiveCName(String),
}

/// Ownership qualifier attached to fields, parameters and locals by the
/// memory model translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    Strong,
    Weak,
    UnsafeUnretained,
    /// Primitive value, no ownership
    Value,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ownership::Strong => "strong",
            Ownership::Weak => "weak",
            Ownership::UnsafeUnretained => "unsafe_unretained",
            Ownership::Value => "value",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub kind: TypeKind,
    pub nesting: Nesting,
    /// Simple name; empty for anonymous classes
    pub name: String,
    /// Unique key within the unit
    pub qualified_name: String,
    /// `Outer$Inner` style name, assigned by the flattener
    #[serde(default)]
    pub binary_name: Option<String>,
    /// Native identifier, assigned by the resolver
    #[serde(default)]
    pub flat_name: Option<String>,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Names of the declared type parameters, in order
    #[serde(default)]
    pub type_params: Vec<String>,
    #[serde(default)]
    pub superclass: Option<Type>,
    #[serde(default)]
    pub interfaces: Vec<Type>,
    #[serde(default)]
    pub members: Vec<Member>,
    /// Member types; emptied by the flattener
    #[serde(default)]
    pub nested: Vec<TypeDecl>,
    #[serde(default)]
    pub enum_constants: Vec<EnumConstant>,
    /// Lexically enclosing type (qualified name), kept after flattening
    #[serde(default)]
    pub enclosing: Option<String>,
    /// Synthesized by the flattener
    #[serde(default)]
    pub captures: Vec<Capture>,
    #[serde(default)]
    pub span: Span,
}

impl TypeDecl {
    pub fn new(kind: TypeKind, qualified_name: impl Into<String>) -> Self {
        let qualified_name = qualified_name.into();
        let name = crate::types::split_qualified(&qualified_name).1.to_string();
        Self {
            kind,
            nesting: Nesting::TopLevel,
            name,
            qualified_name,
            binary_name: None,
            flat_name: None,
            modifiers: Modifiers::public(),
            annotations: Vec::new(),
            type_params: Vec::new(),
            superclass: None,
            interfaces: Vec::new(),
            members: Vec::new(),
            nested: Vec::new(),
            enum_constants: Vec::new(),
            enclosing: None,
            captures: Vec::new(),
            span: Span::default(),
        }
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Inner classes (non-static member classes) always hold their enclosing
    /// instance.
    pub fn is_inner_member(&self) -> bool {
        self.nesting == Nesting::Member
            && !self.modifiers.is_static
            && self.kind == TypeKind::Class
    }

    pub fn as_type(&self) -> Type {
        Type::class(self.qualified_name.clone())
    }

    pub fn has_annotation(&self, annotation: &Annotation) -> bool {
        self.annotations.contains(annotation)
    }

    pub fn native_name_annotation(&self) -> Option<&str> {
        native_name_annotation(&self.annotations)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.members.iter().filter_map(|member| match member {
            Member::Field(field) => Some(field),
            _ => None,
        })
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDecl> {
        self.members.iter().filter_map(|member| match member {
            Member::Method(method) => Some(method),
            _ => None,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields().find(|field| field.name == name)
    }

    pub fn constructors(&self) -> impl Iterator<Item = &MethodDecl> {
        self.methods()
            .filter(|method| method.kind == MethodKind::Constructor)
    }

    /// The superclass name, defaulting to the root object for classes.
    pub fn superclass_name(&self) -> Option<&str> {
        match &self.superclass {
            Some(ty) => ty.class_name(),
            None if self.kind == TypeKind::Interface => None,
            None if self.kind == TypeKind::Enum => Some(crate::types::ENUM),
            None => Some(crate::types::OBJECT),
        }
    }
}

pub fn native_name_annotation(annotations: &[Annotation]) -> Option<&str> {
    annotations.iter().find_map(|annotation| match annotation {
        Annotation::ObjectiveCName(name) => Some(name.as_str()),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumConstant {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
    /// Constructor selected by the front end
    #[serde(default)]
    pub ctor: Option<MethodRef>,
    /// Constant-specific class body (not supported)
    #[serde(default)]
    pub body: Option<Box<TypeDecl>>,
    #[serde(default)]
    pub span: Span,
}

/// State a flattened type carries in place of lexical access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub kind: CaptureKind,
    /// Synthesized field name (`this$0`, `x`, `val$x`)
    pub field: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    OuterInstance { outer: String },
    Local { id: LocalId, name: String },
}

// ============================================================================
// Members
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Member {
    Field(FieldDecl),
    Method(MethodDecl),
    /// Instance initializer block
    Initializer(Block),
    StaticInitializer(Block),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub init: Option<Expr>,
    /// Set by the flattener for capture fields
    #[serde(default)]
    pub synthetic: bool,
    /// Set by the memory model translator
    #[serde(default)]
    pub ownership: Option<Ownership>,
    /// Set by the resolver
    #[serde(default)]
    pub native_name: Option<String>,
    #[serde(default)]
    pub span: Span,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            modifiers: Modifiers::default(),
            annotations: Vec::new(),
            init: None,
            synthetic: false,
            ownership: None,
            native_name: None,
            span: Span::default(),
        }
    }

    pub fn with_init(mut self, init: Expr) -> Self {
        self.init = Some(init);
        self
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.is_static
    }

    /// Static final primitive or string field with a literal initializer.
    pub fn is_compile_time_constant(&self) -> bool {
        self.modifiers.is_static
            && self.modifiers.is_final
            && (self.ty.is_primitive() || self.ty.is_string())
            && matches!(
                self.init.as_ref().map(|init| &init.kind),
                Some(ExprKind::Literal(_))
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Method,
    Constructor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub kind: MethodKind,
    /// `<init>` for constructors
    pub name: String,
    pub params: Vec<VarDecl>,
    pub return_type: Type,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Checked exception list; dropped by the normalizer
    #[serde(default)]
    pub thrown: Vec<Type>,
    #[serde(default)]
    pub is_varargs: bool,
    /// Abstract and interface methods have none
    #[serde(default)]
    pub body: Option<Block>,
    /// Number of leading parameters synthesized by the flattener
    #[serde(default)]
    pub captured_params: usize,
    /// Set by the resolver
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub span: Span,
}

pub const CONSTRUCTOR_NAME: &str = "<init>";

impl MethodDecl {
    pub fn new(name: impl Into<String>, params: Vec<VarDecl>, return_type: Type) -> Self {
        Self {
            kind: MethodKind::Method,
            name: name.into(),
            params,
            return_type,
            modifiers: Modifiers::public(),
            annotations: Vec::new(),
            thrown: Vec::new(),
            is_varargs: false,
            body: None,
            captured_params: 0,
            selector: None,
            span: Span::default(),
        }
    }

    pub fn constructor(params: Vec<VarDecl>) -> Self {
        Self {
            kind: MethodKind::Constructor,
            ..Self::new(CONSTRUCTOR_NAME, params, Type::Void)
        }
    }

    pub fn with_body(mut self, stmts: Vec<Stmt>) -> Self {
        self.body = Some(Block::new(stmts));
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == MethodKind::Constructor
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.is_static
    }

    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|param| param.ty.clone()).collect()
    }

    /// Reference to this method as seen from a call site.
    pub fn to_ref(&self, declaring: &str) -> MethodRef {
        MethodRef {
            declaring: declaring.to_string(),
            name: self.name.clone(),
            params: self.param_types(),
            return_type: self.return_type.clone(),
            is_static: self.modifiers.is_static,
            is_varargs: self.is_varargs,
        }
    }
}

// ============================================================================
// Locals
// ============================================================================

/// Unit-wide identity of a local variable or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// Fresh local id supply for translator temporaries.
#[derive(Debug, Clone)]
pub struct LocalGen {
    next: u32,
}

impl LocalGen {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Ids produced will not collide with any id up to and including `max`.
    pub fn starting_after(max: Option<LocalId>) -> Self {
        Self {
            next: max.map(|id| id.0 + 1).unwrap_or(0),
        }
    }

    pub fn fresh(&mut self) -> LocalId {
        let id = LocalId(self.next);
        self.next += 1;
        id
    }
}

impl Default for LocalGen {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarOrigin {
    #[default]
    Local,
    Parameter,
    CatchParameter,
    Resource,
    /// Element variable of a desugared enhanced-for
    LoopElement,
    /// Translator temporary
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub id: LocalId,
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub origin: VarOrigin,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub ownership: Option<Ownership>,
    #[serde(default)]
    pub native_name: Option<String>,
    #[serde(default)]
    pub span: Span,
}

impl VarDecl {
    pub fn new(id: LocalId, name: impl Into<String>, ty: Type) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            origin: VarOrigin::Local,
            is_final: false,
            ownership: None,
            native_name: None,
            span: Span::default(),
        }
    }

    pub fn param(id: LocalId, name: impl Into<String>, ty: Type) -> Self {
        Self {
            origin: VarOrigin::Parameter,
            ..Self::new(id, name, ty)
        }
    }

    pub fn with_origin(mut self, origin: VarOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn reference(&self) -> Expr {
        Expr::local(self.id, self.ty.clone())
    }
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StmtKind {
    Local {
        var: VarDecl,
        init: Option<Expr>,
    },
    Expr(Expr),
    Block(Block),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        update: Vec<Expr>,
        body: Box<Stmt>,
    },
    /// Enhanced for; removed by the normalizer
    ForEach {
        var: VarDecl,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Labeled {
        label: String,
        body: Box<Stmt>,
    },
    Break(Option<String>),
    Continue(Option<String>),
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        #[serde(default)]
        resources: Vec<Resource>,
        body: Block,
        #[serde(default)]
        catches: Vec<CatchClause>,
        #[serde(default)]
        finally: Option<Block>,
    },
    /// Body whose cleanup runs on every exit path
    Guarded {
        body: Block,
        cleanup: Cleanup,
    },
    Switch {
        selector: Expr,
        cases: Vec<SwitchCase>,
    },
    Synchronized {
        lock: Expr,
        body: Block,
    },
    /// Local class declaration; hoisted by the flattener
    LocalClass(Box<TypeDecl>),
    Assert {
        cond: Expr,
        message: Option<Expr>,
    },
    SuperConstructorCall {
        ctor: MethodRef,
        args: Vec<Expr>,
        /// Explicit enclosing instance (`outer.super(...)`)
        #[serde(default)]
        outer: Option<Expr>,
        #[serde(default)]
        captured: Vec<Expr>,
        /// Set by the resolver
        #[serde(default)]
        selector: Option<String>,
    },
    ThisConstructorCall {
        ctor: MethodRef,
        args: Vec<Expr>,
        #[serde(default)]
        captured: Vec<Expr>,
        #[serde(default)]
        selector: Option<String>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cleanup {
    /// Run the block (a lowered `finally`)
    Finally(Block),
    /// Release an owning local
    Release(LocalId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub var: VarDecl,
    pub init: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub var: VarDecl,
    /// More than one entry for a multi-catch
    pub types: Vec<Type>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Empty for `default`
    pub labels: Vec<Expr>,
    pub body: Vec<Stmt>,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn local(var: VarDecl, init: Option<Expr>) -> Self {
        Stmt::new(StmtKind::Local { var, init })
    }

    pub fn expr(expr: Expr) -> Self {
        Stmt::new(StmtKind::Expr(expr))
    }

    pub fn block(stmts: Vec<Stmt>) -> Self {
        Stmt::new(StmtKind::Block(Block::new(stmts)))
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Stmt::new(StmtKind::Return(value))
    }

    pub fn throw(value: Expr) -> Self {
        Stmt::new(StmtKind::Throw(value))
    }

    pub fn if_then(cond: Expr, then_branch: Stmt, else_branch: Option<Stmt>) -> Self {
        Stmt::new(StmtKind::If {
            cond,
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        })
    }

    pub fn while_loop(cond: Expr, body: Stmt) -> Self {
        Stmt::new(StmtKind::While {
            cond,
            body: Box::new(body),
        })
    }

    pub fn guarded(body: Vec<Stmt>, cleanup: Cleanup) -> Self {
        Stmt::new(StmtKind::Guarded {
            body: Block::new(body),
            cleanup,
        })
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    /// Static type of the expression
    pub ty: Type,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Char(char),
    Int(i64),
    Long(i64),
    Float(f64),
    Double(f64),
    String(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnaryOp {
    pub fn is_increment(self) -> bool {
        matches!(
            self,
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// How an assignment treats the reference it stores. Set by the memory
/// model translator; `Plain` for values and non-owning targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignMode {
    #[default]
    Plain,
    /// Retain the new value, release the old one
    StrongRetain,
    /// The new value is already +1; release the old one
    StrongConsume,
}

/// Static reference to a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub declaring: String,
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    /// Set by the resolver
    #[serde(default)]
    pub native_name: Option<String>,
}

impl FieldRef {
    pub fn new(declaring: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring: declaring.into(),
            name: name.into(),
            is_static: false,
            native_name: None,
        }
    }

    pub fn new_static(declaring: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_static: true,
            ..Self::new(declaring, name)
        }
    }
}

/// Overload selected by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub declaring: String,
    pub name: String,
    pub params: Vec<Type>,
    pub return_type: Type,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_varargs: bool,
}

impl MethodRef {
    pub fn new(
        declaring: impl Into<String>,
        name: impl Into<String>,
        params: Vec<Type>,
        return_type: Type,
    ) -> Self {
        Self {
            declaring: declaring.into(),
            name: name.into(),
            params,
            return_type,
            is_static: false,
            is_varargs: false,
        }
    }

    pub fn constructor(declaring: impl Into<String>, params: Vec<Type>) -> Self {
        Self::new(declaring, CONSTRUCTOR_NAME, params, Type::Void)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LambdaBody {
    Expr(Box<Expr>),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    Literal(Literal),
    Local(LocalId),
    /// `this`, or `Outer.this` when qualified with an enclosing type
    This {
        #[serde(default)]
        qualifier: Option<String>,
    },
    /// `target` is `None` for static fields
    FieldAccess {
        target: Option<Box<Expr>>,
        field: FieldRef,
    },
    ArrayAccess {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    ArrayLength(Box<Expr>),
    MethodCall {
        target: Option<Box<Expr>>,
        method: MethodRef,
        args: Vec<Expr>,
        #[serde(default)]
        is_super: bool,
        /// Set by the resolver
        #[serde(default)]
        selector: Option<String>,
    },
    New {
        /// Qualified name of the instantiated type
        class: String,
        ctor: MethodRef,
        args: Vec<Expr>,
        /// Explicit enclosing instance (`outer.new Inner()`)
        #[serde(default)]
        outer: Option<Box<Expr>>,
        /// Anonymous class body; hoisted by the flattener
        #[serde(default)]
        body: Option<Box<TypeDecl>>,
        /// Values for the instantiated type's captures, set by the flattener
        #[serde(default)]
        captured: Vec<Expr>,
        /// Set by the resolver
        #[serde(default)]
        selector: Option<String>,
    },
    NewArray {
        element: Type,
        dims: Vec<Expr>,
        #[serde(default)]
        init: Option<Vec<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        /// Compound operator (`+=` is `Some(Add)`)
        #[serde(default)]
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
        #[serde(default)]
        mode: AssignMode,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Cast to `Expr::ty`
    Cast(Box<Expr>),
    InstanceOf {
        expr: Box<Expr>,
        test: Type,
    },
    ClassLiteral(Type),
    Lambda {
        params: Vec<VarDecl>,
        body: LambdaBody,
        /// Functional interface method implemented by the lambda
        method: MethodRef,
    },
    MethodReference {
        target: String,
        name: String,
    },
    /// Ordinal of an enum constant, produced by the normalizer
    EnumOrdinal {
        enum_type: String,
        constant: String,
    },
    /// Call of a runtime C function (`objc_sync_enter`, ...)
    NativeCall {
        function: String,
        args: Vec<Expr>,
    },
    /// Explicit ownership operations, inserted by the memory translator
    Retain(Box<Expr>),
    Autorelease(Box<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Self {
            kind,
            ty,
            span: Span::default(),
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn local(id: LocalId, ty: Type) -> Self {
        Expr::new(ExprKind::Local(id), ty)
    }

    pub fn this(ty: Type) -> Self {
        Expr::new(ExprKind::This { qualifier: None }, ty)
    }

    pub fn int(value: i64) -> Self {
        Expr::new(ExprKind::Literal(Literal::Int(value)), Type::int())
    }

    pub fn boolean(value: bool) -> Self {
        Expr::new(ExprKind::Literal(Literal::Bool(value)), Type::boolean())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::new(ExprKind::Literal(Literal::String(value.into())), Type::string())
    }

    pub fn null() -> Self {
        Expr::new(ExprKind::Literal(Literal::Null), Type::Null)
    }

    pub fn field(target: Option<Expr>, field: FieldRef, ty: Type) -> Self {
        Expr::new(
            ExprKind::FieldAccess {
                target: target.map(Box::new),
                field,
            },
            ty,
        )
    }

    pub fn call(target: Option<Expr>, method: MethodRef, args: Vec<Expr>) -> Self {
        let ty = method.return_type.clone();
        Expr::new(
            ExprKind::MethodCall {
                target: target.map(Box::new),
                method,
                args,
                is_super: false,
                selector: None,
            },
            ty,
        )
    }

    pub fn new_object(class: impl Into<String>, param_types: Vec<Type>, args: Vec<Expr>) -> Self {
        let class = class.into();
        Expr::new(
            ExprKind::New {
                ctor: MethodRef::constructor(class.clone(), param_types),
                class: class.clone(),
                args,
                outer: None,
                body: None,
                captured: Vec::new(),
                selector: None,
            },
            Type::class(class),
        )
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        let ty = target.ty.clone();
        Expr::new(
            ExprKind::Assign {
                op: None,
                target: Box::new(target),
                value: Box::new(value),
                mode: AssignMode::Plain,
            },
            ty,
        )
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, ty: Type) -> Self {
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    pub fn not(operand: Expr) -> Self {
        Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
            Type::boolean(),
        )
    }

    pub fn instance_of(expr: Expr, test: Type) -> Self {
        Expr::new(
            ExprKind::InstanceOf {
                expr: Box::new(expr),
                test,
            },
            Type::boolean(),
        )
    }

    pub fn cast(expr: Expr, ty: Type) -> Self {
        Expr::new(ExprKind::Cast(Box::new(expr)), ty)
    }

    pub fn native_call(function: impl Into<String>, args: Vec<Expr>, ty: Type) -> Self {
        Expr::new(
            ExprKind::NativeCall {
                function: function.into(),
                args,
            },
            ty,
        )
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(Literal::Null))
    }

    /// The local a bare local read refers to.
    pub fn as_local(&self) -> Option<LocalId> {
        match self.kind {
            ExprKind::Local(id) => Some(id),
            _ => None,
        }
    }
}
