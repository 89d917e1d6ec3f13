//! Method bodies: statements and expressions of an annotated unit rendered
//! as Objective-C.
//!
//! Labeled loops become `goto`s to `<label>_continue` at the end of the
//! loop body and `<label>_break` after the loop; only labels that some
//! jump uses are written out.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::errors::{Stage, TranslateError};
use crate::translate::names::{capitalize, NameTable};
use crate::translate::source_builder::{escape_string, SourceBuilder};
use crate::types::{PrimitiveType, Type, OBJECT};
use crate::visit::{walk_block, walk_method, Visitor};

type Result<T> = std::result::Result<T, TranslateError>;

/// `NSString *` + `name` -> `NSString *name`, `jint` + `x` -> `jint x`
pub fn declaration(ty: &str, name: &str) -> String {
    if ty.ends_with('*') {
        format!("{}{}", ty, name)
    } else {
        format!("{} {}", ty, name)
    }
}

/// Class object expression for a type.
pub fn class_literal(names: &NameTable<'_>, ty: &Type) -> String {
    match ty.erasure() {
        Type::Void => "[IOSClass voidClass]".to_string(),
        Type::Primitive(prim) => format!("[IOSClass {}Class]", prim.keyword()),
        Type::Array(element) => format!("IOSClass_arrayOf({})", class_literal(names, &element)),
        Type::Class { name, .. } => format!("{}_class_()", names.type_name(&name)),
        Type::Null | Type::TypeVar { .. } => format!("{}_class_()", names.type_name(OBJECT)),
    }
}

/// Native names of every variable declared in a body.
#[derive(Default)]
struct VarNames(HashMap<LocalId, String>);

impl Visitor for VarNames {
    fn visit_var(&mut self, var: &VarDecl) {
        let name = var.native_name.clone().unwrap_or_else(|| var.name.replace('$', "_"));
        self.0.insert(var.id, name);
    }
}

/// Labels some `break` or `continue` jumps to.
#[derive(Default)]
struct JumpTargets {
    breaks: HashSet<String>,
    continues: HashSet<String>,
}

impl Visitor for JumpTargets {
    fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Break(Some(label)) => {
                self.breaks.insert(label.clone());
            }
            StmtKind::Continue(Some(label)) => {
                self.continues.insert(label.clone());
            }
            _ => {}
        }
        true
    }
}

/// Renders one body into the unit's definition buffer.
pub struct BodyEmitter<'e, 'a> {
    names: &'e NameTable<'a>,
    out: &'e mut SourceBuilder,
    arc: bool,
    in_constructor: bool,
    vars: HashMap<LocalId, String>,
    jumps: JumpTargets,
}

fn internal(message: impl Into<String>, span: Span) -> TranslateError {
    TranslateError::internal(Stage::Emit, message, span)
}

fn primitive_of(ty: &Type) -> Option<PrimitiveType> {
    match ty {
        Type::Primitive(prim) => Some(*prim),
        _ => None,
    }
}

fn is_atomic(expr: &Expr) -> bool {
    !matches!(
        expr.kind,
        ExprKind::Binary { .. }
            | ExprKind::Conditional { .. }
            | ExprKind::Assign { .. }
            | ExprKind::Unary { .. }
            | ExprKind::Cast(_)
    ) || matches!(&expr.kind, ExprKind::Cast(_) if expr.ty.is_reference())
}

impl<'e, 'a> BodyEmitter<'e, 'a> {
    pub fn for_method(
        names: &'e NameTable<'a>,
        out: &'e mut SourceBuilder,
        arc: bool,
        method: &MethodDecl,
    ) -> Self {
        let mut vars = VarNames::default();
        walk_method(&mut vars, method);
        let mut jumps = JumpTargets::default();
        walk_method(&mut jumps, method);
        Self {
            names,
            out,
            arc,
            in_constructor: method.is_constructor(),
            vars: vars.0,
            jumps,
        }
    }

    pub fn for_block(names: &'e NameTable<'a>, out: &'e mut SourceBuilder, arc: bool, block: &Block) -> Self {
        let mut vars = VarNames::default();
        walk_block(&mut vars, block);
        let mut jumps = JumpTargets::default();
        walk_block(&mut jumps, block);
        Self {
            names,
            out,
            arc,
            in_constructor: false,
            vars: vars.0,
            jumps,
        }
    }

    pub fn stmts(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    /// Statements of a nested body without another pair of braces.
    fn nested(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Block(block) => self.stmts(&block.stmts),
            _ => self.stmt(stmt),
        }
    }

    fn var_name(&self, id: LocalId, span: Span) -> Result<String> {
        self.vars
            .get(&id)
            .cloned()
            .ok_or_else(|| internal(format!("local {} is used but never declared", id.0), span))
    }

    fn local_qualifier(&self, var: &VarDecl) -> &'static str {
        match var.ownership {
            Some(Ownership::Weak) if self.arc => "__weak ",
            Some(Ownership::UnsafeUnretained) if self.arc => "__unsafe_unretained ",
            _ => "",
        }
    }

    fn local_decl(&mut self, var: &VarDecl, init: Option<&Expr>) -> Result<String> {
        let name = self.var_name(var.id, var.span)?;
        let ty = self.names.objc_type(&var.ty);
        let decl = format!("{}{}", self.local_qualifier(var), declaration(&ty, &name));
        Ok(match init {
            Some(init) => format!("{} = {}", decl, self.expr(init)?),
            None if var.ty.is_reference() => format!("{} = nil", decl),
            None => decl,
        })
    }

    pub fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Local { var, init } => {
                let decl = self.local_decl(var, init.as_ref())?;
                self.out.line(format!("{};", decl));
            }
            StmtKind::Expr(expr) => {
                let text = self.expr(expr)?;
                self.out.line(format!("{};", text));
            }
            StmtKind::Block(block) => {
                self.out.open("{");
                self.stmts(&block.stmts)?;
                self.out.close("}");
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.if_chain("if", cond, then_branch, else_branch.as_deref())?,
            StmtKind::While { .. } | StmtKind::DoWhile { .. } | StmtKind::For { .. } => {
                self.looped(stmt, None)?
            }
            StmtKind::Labeled { label, body } => match &body.kind {
                StmtKind::While { .. } | StmtKind::DoWhile { .. } | StmtKind::For { .. } => {
                    self.looped(body, Some(label))?
                }
                _ => {
                    self.out.open("{");
                    self.nested(body)?;
                    self.out.close("}");
                    self.break_label(label);
                }
            },
            StmtKind::Break(None) => self.out.line("break;"),
            StmtKind::Break(Some(label)) => self.out.line(format!("goto {}_break;", label)),
            StmtKind::Continue(None) => self.out.line("continue;"),
            StmtKind::Continue(Some(label)) => self.out.line(format!("goto {}_continue;", label)),
            StmtKind::Return(value) => match value {
                _ if self.in_constructor => self.out.line("return self;"),
                Some(value) => {
                    let text = self.expr(value)?;
                    self.out.line(format!("return {};", text));
                }
                None => self.out.line("return;"),
            },
            StmtKind::Throw(value) => {
                let text = self.expr(value)?;
                self.out.line(format!("@throw {};", text));
            }
            StmtKind::Try { body, catches, .. } => {
                self.out.open("@try {");
                self.stmts(&body.stmts)?;
                self.out.dedent();
                for clause in catches {
                    let [caught] = clause.types.as_slice() else {
                        return Err(internal("multi-catch reached the emitter", stmt.span));
                    };
                    let name = self.var_name(clause.var.id, clause.var.span)?;
                    let ty = self.names.objc_type(caught);
                    self.out.open(format!("}} @catch ({}) {{", declaration(&ty, &name)));
                    self.stmts(&clause.body.stmts)?;
                    self.out.dedent();
                }
                self.out.line("}");
            }
            StmtKind::Guarded { body, cleanup } => self.guarded(body, cleanup, stmt.span)?,
            StmtKind::Switch { selector, cases } => {
                let selector = self.expr(selector)?;
                self.out.open(format!("switch ({}) {{", selector));
                for case in cases {
                    if case.labels.is_empty() {
                        self.out.line("default:");
                    }
                    for label in &case.labels {
                        let label = self.case_label(label)?;
                        self.out.line(format!("case {}:", label));
                    }
                    if !case.body.is_empty() {
                        self.out.open("{");
                        self.stmts(&case.body)?;
                        self.out.close("}");
                    }
                }
                self.out.close("}");
            }
            StmtKind::SuperConstructorCall {
                args,
                captured,
                selector,
                ..
            } => {
                let message = self.message(selector.as_deref(), captured.iter().chain(args), stmt.span)?;
                self.out.line(format!("self = [super {}];", message));
            }
            StmtKind::ThisConstructorCall {
                args,
                captured,
                selector,
                ..
            } => {
                let message = self.message(selector.as_deref(), captured.iter().chain(args), stmt.span)?;
                self.out.line(format!("self = [self {}];", message));
            }
            StmtKind::Empty => {}
            StmtKind::ForEach { .. }
            | StmtKind::Synchronized { .. }
            | StmtKind::LocalClass(_)
            | StmtKind::Assert { .. } => {
                return Err(internal("unlowered statement reached the emitter", stmt.span));
            }
        }
        Ok(())
    }

    fn if_chain(&mut self, keyword: &str, cond: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>) -> Result<()> {
        let cond = self.expr(cond)?;
        self.out.open(format!("{} ({}) {{", keyword, cond));
        self.nested(then_branch)?;
        self.out.dedent();
        match else_branch.map(|stmt| &stmt.kind) {
            Some(StmtKind::If {
                cond,
                then_branch,
                else_branch,
            }) => self.if_chain("} else if", cond, then_branch, else_branch.as_deref()),
            Some(_) => {
                self.out.open("} else {");
                if let Some(stmt) = else_branch {
                    self.nested(stmt)?;
                }
                self.out.close("}");
                Ok(())
            }
            None => {
                self.out.line("}");
                Ok(())
            }
        }
    }

    fn break_label(&mut self, label: &str) {
        if self.jumps.breaks.contains(label) {
            self.out.line(format!("{}_break: ;", label));
        }
    }

    fn continue_label(&mut self, label: Option<&String>) {
        if let Some(label) = label {
            if self.jumps.continues.contains(label) {
                self.out.line(format!("{}_continue: ;", label));
            }
        }
    }

    fn for_init(&mut self, init: &[Stmt]) -> Result<Option<String>> {
        match init {
            [] => Ok(Some(String::new())),
            [Stmt {
                kind: StmtKind::Local { var, init },
                ..
            }] => Ok(Some(self.local_decl(var, init.as_ref())?)),
            _ if init.iter().all(|stmt| matches!(stmt.kind, StmtKind::Expr(_))) => {
                let mut parts = Vec::with_capacity(init.len());
                for stmt in init {
                    if let StmtKind::Expr(expr) = &stmt.kind {
                        parts.push(self.expr(expr)?);
                    }
                }
                Ok(Some(parts.join(", ")))
            }
            _ => Ok(None),
        }
    }

    fn looped(&mut self, stmt: &Stmt, label: Option<&String>) -> Result<()> {
        match &stmt.kind {
            StmtKind::While { cond, body } => {
                let cond = self.expr(cond)?;
                self.out.open(format!("while ({}) {{", cond));
                self.nested(body)?;
                self.continue_label(label);
                self.out.close("}");
            }
            StmtKind::DoWhile { body, cond } => {
                self.out.open("do {");
                self.nested(body)?;
                self.continue_label(label);
                let cond = self.expr(cond)?;
                self.out.close(format!("}} while ({});", cond));
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let (init_text, hoisted) = match self.for_init(init)? {
                    Some(text) => (text, false),
                    None => {
                        self.out.open("{");
                        self.stmts(init)?;
                        (String::new(), true)
                    }
                };
                let cond = match cond {
                    Some(cond) => self.expr(cond)?,
                    None => String::new(),
                };
                let mut updates = Vec::with_capacity(update.len());
                for expr in update {
                    updates.push(self.expr(expr)?);
                }
                self.out
                    .open(format!("for ({}; {}; {}) {{", init_text, cond, updates.join(", ")));
                self.nested(body)?;
                self.continue_label(label);
                self.out.close("}");
                if hoisted {
                    self.out.close("}");
                }
            }
            _ => return Err(internal("expected a loop", stmt.span)),
        }
        if let Some(label) = label {
            self.break_label(label);
        }
        Ok(())
    }

    fn guarded(&mut self, body: &Block, cleanup: &Cleanup, span: Span) -> Result<()> {
        match cleanup {
            Cleanup::Release(_) if self.arc => {
                self.out.open("{");
                self.stmts(&body.stmts)?;
                self.out.close("}");
            }
            Cleanup::Release(id) => {
                let name = self.var_name(*id, span)?;
                self.out.open("@try {");
                self.stmts(&body.stmts)?;
                self.out.dedent();
                self.out.open("} @finally {");
                self.out.line(format!("[{} release];", name));
                self.out.close("}");
            }
            Cleanup::Finally(finally) => {
                self.out.open("@try {");
                self.stmts(&body.stmts)?;
                self.out.dedent();
                self.out.open("} @finally {");
                self.stmts(&finally.stmts)?;
                self.out.close("}");
            }
        }
        Ok(())
    }

    fn case_label(&mut self, label: &Expr) -> Result<String> {
        match &label.kind {
            ExprKind::EnumOrdinal { enum_type, constant } => {
                Ok(format!("{}_Enum_{}", self.names.type_name(enum_type), constant))
            }
            _ => self.expr(label),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn message<'x>(
        &mut self,
        selector: Option<&str>,
        args: impl Iterator<Item = &'x Expr>,
        span: Span,
    ) -> Result<String> {
        let selector = selector.ok_or_else(|| internal("call without selector", span))?;
        let mut rendered = Vec::new();
        for arg in args {
            rendered.push(self.expr(arg)?);
        }
        if rendered.is_empty() {
            return Ok(selector.to_string());
        }
        Ok(selector
            .split_inclusive(':')
            .zip(rendered)
            .map(|(keyword, arg)| format!("{}{}", keyword, arg))
            .collect::<Vec<_>>()
            .join(" "))
    }

    fn operand(&mut self, expr: &Expr) -> Result<String> {
        let text = self.expr(expr)?;
        Ok(if is_atomic(expr) { text } else { format!("({})", text) })
    }

    /// Receiver of a message or field access, null-checked unless it
    /// cannot be nil.
    fn receiver(&mut self, expr: &Expr) -> Result<String> {
        let text = self.expr(expr)?;
        Ok(match &expr.kind {
            ExprKind::This { .. }
            | ExprKind::New { .. }
            | ExprKind::Literal(Literal::String(_))
            | ExprKind::ClassLiteral(_)
            | ExprKind::Autorelease(_)
            | ExprKind::Retain(_) => text,
            ExprKind::NativeCall { function, .. } if function == "nil_chk" => text,
            _ => format!("nil_chk({})", text),
        })
    }

    fn literal(&self, literal: &Literal) -> String {
        match literal {
            Literal::Bool(true) => "true".to_string(),
            Literal::Bool(false) => "false".to_string(),
            Literal::Char(c) if c.is_ascii_graphic() && *c != '\'' && *c != '\\' => format!("'{}'", c),
            Literal::Char(c) => format!("0x{:04x}", *c as u32),
            Literal::Int(value) if *value == i64::from(i32::MIN) => "((jint) 0x80000000)".to_string(),
            Literal::Int(value) => value.to_string(),
            Literal::Long(value) if *value == i64::MIN => "((jlong) 0x8000000000000000LL)".to_string(),
            Literal::Long(value) => format!("{}LL", value),
            Literal::Float(value) => float_literal(*value, "f"),
            Literal::Double(value) => float_literal(*value, ""),
            Literal::String(value) => format!("@\"{}\"", escape_string(value)),
            Literal::Null => "nil".to_string(),
        }
    }

    fn field_target(&mut self, target: Option<&Expr>, field: &FieldRef, span: Span) -> Result<String> {
        let native = field
            .native_name
            .clone()
            .ok_or_else(|| internal(format!("field `{}` has no native name", field.name), span))?;
        if field.is_static {
            return Ok(native);
        }
        match target {
            None => Ok(format!("self->{}", native)),
            Some(Expr {
                kind: ExprKind::This { .. },
                ..
            }) => Ok(format!("self->{}", native)),
            Some(target) => {
                let receiver = self.receiver(target)?;
                let ty = self.names.objc_type(&Type::class(field.declaring.clone()));
                Ok(format!("(({}) {})->{}", ty, receiver, native))
            }
        }
    }

    fn array_element(&mut self, array: &Expr, index: &Expr, ty: &Type) -> Result<(Option<PrimitiveType>, String, String)> {
        let array_text = self.expr(array)?;
        let index_text = self.expr(index)?;
        Ok((primitive_of(ty), format!("nil_chk({})", array_text), index_text))
    }

    fn string_concat(&mut self, expr: &Expr) -> Result<String> {
        fn collect<'x>(expr: &'x Expr, parts: &mut Vec<&'x Expr>) {
            match &expr.kind {
                ExprKind::Binary {
                    op: BinaryOp::Add,
                    lhs,
                    rhs,
                } if expr.ty.is_string() => {
                    collect(lhs, parts);
                    collect(rhs, parts);
                }
                _ => parts.push(expr),
            }
        }
        let mut parts = Vec::new();
        collect(expr, &mut parts);
        let mut codes = String::new();
        let mut rendered = Vec::with_capacity(parts.len());
        for part in parts {
            codes.push(match &part.ty {
                Type::Primitive(prim) => prim.descriptor(),
                ty if ty.is_string() => '$',
                _ => '@',
            });
            rendered.push(self.expr(part)?);
        }
        Ok(format!("JreStrcat(\"{}\", {})", codes, rendered.join(", ")))
    }

    fn assign(
        &mut self,
        op: Option<BinaryOp>,
        target: &Expr,
        value: &Expr,
        mode: AssignMode,
    ) -> Result<String> {
        let value_text = self.expr(value)?;
        if let ExprKind::ArrayAccess { array, index } = &target.kind {
            let (prim, array_text, index_text) = self.array_element(array, index, &target.ty)?;
            return Ok(match (prim, op) {
                (Some(prim), None) => format!(
                    "*{}_GetRef({}, {}) = {}",
                    prim.array_class(),
                    array_text,
                    index_text,
                    value_text
                ),
                (Some(prim), Some(op)) => format!(
                    "*{}_GetRef({}, {}) {}= {}",
                    prim.array_class(),
                    array_text,
                    index_text,
                    op.symbol(),
                    value_text
                ),
                (None, _) => format!("IOSObjectArray_Set({}, {}, {})", array_text, index_text, value_text),
            });
        }

        let target_text = self.lvalue(target)?;
        if !self.arc {
            match mode {
                AssignMode::StrongRetain => {
                    return Ok(format!("JreStrongAssign(&{}, {})", target_text, value_text))
                }
                AssignMode::StrongConsume => {
                    return Ok(format!("JreStrongAssignAndConsume(&{}, {})", target_text, value_text))
                }
                AssignMode::Plain => {}
            }
        }
        Ok(match op {
            None => format!("{} = {}", target_text, value_text),
            Some(BinaryOp::UShr) => {
                let bits = if primitive_of(&target.ty) == Some(PrimitiveType::Long) { 64 } else { 32 };
                format!("{0} = JreURShift{1}({0}, {2})", target_text, bits, value_text)
            }
            Some(op) => format!("{} {}= {}", target_text, op.symbol(), value_text),
        })
    }

    fn lvalue(&mut self, target: &Expr) -> Result<String> {
        match &target.kind {
            ExprKind::Local(id) => self.var_name(*id, target.span),
            ExprKind::FieldAccess { target: object, field } => {
                self.field_target(object.as_deref(), field, target.span)
            }
            ExprKind::ArrayAccess { array, index } => {
                let (prim, array_text, index_text) = self.array_element(array, index, &target.ty)?;
                match prim {
                    Some(prim) => Ok(format!("*{}_GetRef({}, {})", prim.array_class(), array_text, index_text)),
                    None => Err(internal("object array element used as an lvalue", target.span)),
                }
            }
            _ => Err(internal("assignment to a non-lvalue", target.span)),
        }
    }

    fn cast(&mut self, inner: &Expr, ty: &Type) -> Result<String> {
        let text = self.operand(inner)?;
        match ty.erasure() {
            Type::Primitive(prim) => Ok(format!("({}) {}", prim.native_name(), text)),
            Type::Class { name, .. } if name == OBJECT => Ok(text),
            Type::Class { name, .. } if self.names.is_protocol(&name) => Ok(format!(
                "((id<{0}>) cast_check({1}, {0}_class_()))",
                self.names.type_name(&name),
                text
            )),
            other => {
                let native = self.names.objc_type(&other);
                let class = native.trim_end_matches(" *");
                Ok(format!("(({}) cast_chk({}, [{} class]))", native, text, class))
            }
        }
    }

    pub fn expr(&mut self, expr: &Expr) -> Result<String> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(self.literal(literal)),
            ExprKind::Local(id) => self.var_name(*id, expr.span),
            ExprKind::This { qualifier: None } => Ok("self".to_string()),
            ExprKind::This { qualifier: Some(_) } => Err(internal("qualified this reached the emitter", expr.span)),
            ExprKind::FieldAccess { target, field } => self.field_target(target.as_deref(), field, expr.span),
            ExprKind::ArrayAccess { array, index } => {
                let (prim, array_text, index_text) = self.array_element(array, index, &expr.ty)?;
                Ok(match prim {
                    Some(prim) => format!("{}_Get({}, {})", prim.array_class(), array_text, index_text),
                    None => format!("IOSObjectArray_Get({}, {})", array_text, index_text),
                })
            }
            ExprKind::ArrayLength(array) => {
                let array = self.expr(array)?;
                Ok(format!("((IOSArray *) nil_chk({}))->size_", array))
            }
            ExprKind::MethodCall {
                target,
                method,
                args,
                is_super,
                selector,
            } => {
                let receiver = if method.is_static {
                    self.names.type_name(&method.declaring)
                } else if *is_super {
                    "super".to_string()
                } else {
                    match target {
                        Some(target) => self.receiver(target)?,
                        None => "self".to_string(),
                    }
                };
                let message = self.message(selector.as_deref(), args.iter(), expr.span)?;
                Ok(format!("[{} {}]", receiver, message))
            }
            ExprKind::New {
                class,
                args,
                captured,
                selector,
                body: None,
                ..
            } => {
                let message = self.message(selector.as_deref(), captured.iter().chain(args), expr.span)?;
                Ok(format!("[[{} alloc] {}]", self.names.type_name(class), message))
            }
            ExprKind::New { body: Some(_), .. } => Err(internal("anonymous class body reached the emitter", expr.span)),
            ExprKind::NewArray { dims, init, .. } => self.new_array(expr, dims, init.as_deref()),
            ExprKind::Unary { op, operand } => {
                let text = match (op, &operand.kind) {
                    (op, ExprKind::ArrayAccess { .. }) if op.is_increment() => {
                        format!("({})", self.lvalue(operand)?)
                    }
                    _ => self.operand(operand)?,
                };
                Ok(match op {
                    UnaryOp::Neg => format!("-{}", text),
                    UnaryOp::Plus => format!("+{}", text),
                    UnaryOp::Not => format!("!{}", text),
                    UnaryOp::BitNot => format!("~{}", text),
                    UnaryOp::PreInc => format!("++{}", text),
                    UnaryOp::PreDec => format!("--{}", text),
                    UnaryOp::PostInc => format!("{}++", text),
                    UnaryOp::PostDec => format!("{}--", text),
                })
            }
            ExprKind::Binary { op, .. } if *op == BinaryOp::Add && expr.ty.is_string() => self.string_concat(expr),
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_text = self.operand(lhs)?;
                let rhs_text = self.operand(rhs)?;
                let floating = matches!(
                    primitive_of(&expr.ty),
                    Some(PrimitiveType::Float | PrimitiveType::Double)
                );
                Ok(match op {
                    BinaryOp::Rem if floating => format!("fmod({}, {})", lhs_text, rhs_text),
                    BinaryOp::UShr => {
                        let bits = if primitive_of(&lhs.ty) == Some(PrimitiveType::Long) { 64 } else { 32 };
                        format!("JreURShift{}({}, {})", bits, lhs_text, rhs_text)
                    }
                    op => format!("{} {} {}", lhs_text, op.symbol(), rhs_text),
                })
            }
            ExprKind::Assign {
                op,
                target,
                value,
                mode,
            } => self.assign(*op, target, value, *mode),
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.operand(cond)?;
                let then_text = self.operand(then_expr)?;
                let else_text = self.operand(else_expr)?;
                Ok(format!("{} ? {} : {}", cond, then_text, else_text))
            }
            ExprKind::Cast(inner) => self.cast(inner, &expr.ty),
            ExprKind::InstanceOf { expr: inner, test } => {
                let text = self.expr(inner)?;
                match test.erasure() {
                    Type::Class { name, .. } if !self.names.is_protocol(&name) => {
                        Ok(format!("[{} isKindOfClass:[{} class]]", text, self.names.type_name(&name)))
                    }
                    other => Ok(format!("[{} isInstance:{}]", class_literal(self.names, &other), text)),
                }
            }
            ExprKind::ClassLiteral(ty) => Ok(class_literal(self.names, ty)),
            ExprKind::EnumOrdinal { enum_type, constant } => {
                Ok(format!("{}_Enum_{}", self.names.type_name(enum_type), constant))
            }
            ExprKind::NativeCall { function, args } => {
                let mut rendered = Vec::with_capacity(args.len());
                for arg in args {
                    rendered.push(self.expr(arg)?);
                }
                Ok(format!("{}({})", function, rendered.join(", ")))
            }
            ExprKind::Retain(inner) if self.arc => self.expr(inner),
            ExprKind::Retain(inner) => Ok(format!("[{} retain]", self.expr(inner)?)),
            ExprKind::Autorelease(inner) if self.arc => self.expr(inner),
            ExprKind::Autorelease(inner) => Ok(format!("[{} autorelease]", self.expr(inner)?)),
            ExprKind::Lambda { .. } | ExprKind::MethodReference { .. } => {
                Err(internal("functional expression reached the emitter", expr.span))
            }
        }
    }

    fn new_array(&mut self, expr: &Expr, dims: &[Expr], init: Option<&[Expr]>) -> Result<String> {
        let Some(element) = expr.ty.element_type() else {
            return Err(internal("array creation without an array type", expr.span));
        };
        if let Some(values) = init {
            let mut rendered = Vec::with_capacity(values.len());
            for value in values {
                rendered.push(self.expr(value)?);
            }
            let count = rendered.len();
            let list = rendered.join(", ");
            return Ok(match primitive_of(element) {
                Some(prim) => format!(
                    "[{} arrayWith{}s:({}[]){{ {} }} count:{}]",
                    prim.array_class(),
                    capitalize(prim.keyword()),
                    prim.native_name(),
                    list,
                    count
                ),
                None => format!(
                    "[IOSObjectArray arrayWithObjects:(id[]){{ {} }} count:{} type:{}]",
                    list,
                    count,
                    class_literal(self.names, element)
                ),
            });
        }

        let mut lengths = Vec::with_capacity(dims.len());
        for dim in dims {
            lengths.push(self.expr(dim)?);
        }
        let (base, total_dims) = expr.ty.array_base();
        match (lengths.as_slice(), primitive_of(element)) {
            ([length], Some(prim)) => Ok(format!("[{} arrayWithLength:{}]", prim.array_class(), length)),
            ([length], None) => Ok(format!(
                "[IOSObjectArray arrayWithLength:{} type:{}]",
                length,
                class_literal(self.names, element)
            )),
            ([], _) => Err(internal("array creation without dimensions", expr.span)),
            (lengths, _) => {
                let list = lengths.join(", ");
                // Trailing unsized dimensions make the innermost created
                // level an object array.
                match primitive_of(base).filter(|_| lengths.len() == total_dims) {
                    Some(prim) => Ok(format!(
                        "[IOSObjectArray arrayWithDimensions:{} lengths:(jint[]){{ {} }} type:[IOSClass {}Class]]",
                        lengths.len(),
                        list,
                        prim.keyword()
                    )),
                    None => Ok(format!(
                        "[IOSObjectArray arrayWithDimensions:{} lengths:(jint[]){{ {} }} type:{}]",
                        lengths.len(),
                        list,
                        class_literal(self.names, base)
                    )),
                }
            }
        }
    }
}

fn float_literal(value: f64, suffix: &str) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "INFINITY".to_string() } else { "-INFINITY".to_string() }
    } else if suffix.is_empty() {
        format!("{:?}", value)
    } else {
        format!("{:?}{}", value as f32, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::LibraryMetadata;

    fn render(stmts: Vec<Stmt>, arc: bool) -> String {
        let library = LibraryMetadata::builtin();
        let names = NameTable::new(&library);
        let mut out = SourceBuilder::new();
        let block = Block::new(stmts);
        let mut emitter = BodyEmitter::for_block(&names, &mut out, arc, &block);
        emitter.stmts(&block.stmts).unwrap();
        out.finish()
    }

    fn var(id: u32, name: &str, ty: Type) -> VarDecl {
        let mut var = VarDecl::new(LocalId(id), name, ty);
        var.native_name = Some(name.to_string());
        var.ownership = Some(Ownership::Strong);
        var
    }

    #[test]
    fn test_release_guard_renders_try_finally() {
        let s = var(0, "s", Type::string());
        let stmts = vec![
            Stmt::local(s.clone(), Some(Expr::new(ExprKind::Retain(Box::new(Expr::string("x"))), Type::string()))),
            Stmt::guarded(vec![Stmt::ret(None)], Cleanup::Release(LocalId(0))),
        ];
        assert_eq!(
            render(stmts.clone(), false),
            "NSString *s = [@\"x\" retain];\n@try {\n  return;\n} @finally {\n  [s release];\n}\n"
        );
        assert_eq!(render(stmts, true), "NSString *s = @\"x\";\n{\n  return;\n}\n");
    }

    #[test]
    fn test_labeled_continue_jumps_to_end_of_body() {
        let i = var(0, "i", Type::int());
        let body = Stmt::block(vec![Stmt::new(StmtKind::Continue(Some("outer".into())))]);
        let stmts = vec![
            Stmt::local(i.clone(), Some(Expr::int(0))),
            Stmt::new(StmtKind::Labeled {
                label: "outer".into(),
                body: Box::new(Stmt::while_loop(Expr::boolean(true), body)),
            }),
        ];
        assert_eq!(
            render(stmts, false),
            "jint i = 0;\nwhile (true) {\n  goto outer_continue;\n  outer_continue: ;\n}\n"
        );
    }

    #[test]
    fn test_string_concatenation_uses_type_codes() {
        let n = var(0, "n", Type::int());
        let concat = Expr::binary(
            BinaryOp::Add,
            Expr::binary(BinaryOp::Add, Expr::string("n="), n.reference(), Type::string()),
            Expr::null(),
            Type::string(),
        );
        let stmts = vec![Stmt::local(n, Some(Expr::int(1))), Stmt::expr(concat)];
        assert!(render(stmts, false).ends_with("JreStrcat(\"$I@\", @\"n=\", n, nil);\n"));
    }

    #[test]
    fn test_else_if_chain() {
        let x = var(0, "x", Type::int());
        let stmt = Stmt::if_then(
            Expr::binary(BinaryOp::Lt, x.reference(), Expr::int(0), Type::boolean()),
            Stmt::ret(None),
            Some(Stmt::if_then(
                Expr::binary(BinaryOp::Gt, x.reference(), Expr::int(0), Type::boolean()),
                Stmt::ret(None),
                Some(Stmt::block(vec![])),
            )),
        );
        let text = render(vec![Stmt::local(x, Some(Expr::int(0))), stmt], false);
        assert_eq!(
            text,
            "jint x = 0;\nif (x < 0) {\n  return;\n} else if (x > 0) {\n  return;\n} else {\n}\n"
        );
    }

    #[test]
    fn test_int_min_literal() {
        let x = var(0, "x", Type::int());
        let text = render(vec![Stmt::local(x, Some(Expr::int(i64::from(i32::MIN))))], false);
        assert_eq!(text, "jint x = ((jint) 0x80000000);\n");
    }
}
