//! Memory model translator.
//!
//! Attaches an ownership qualifier to every field, parameter and local,
//! weakens fields that close a reference cycle between types of the unit,
//! and makes reference counting explicit in the tree:
//!
//! - each owning local guards the rest of its block with a
//!   `Cleanup::Release`, so exactly one release runs on every exit path;
//! - `new` is a +1 value; one that no strong store consumes is wrapped in
//!   `Autorelease`, and +0 values stored into owning locals in `Retain`;
//! - a +0 reference returned or thrown from inside a release guard is
//!   retained and autoreleased first;
//! - strong field, static and local stores carry `AssignMode::StrongRetain`
//!   or `AssignMode::StrongConsume`.
//!
//! Qualifiers are computed the same way in both memory models; the emitter
//! drops the explicit operations when targeting automatic reference counting.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::errors::{Diagnostic, Stage, TranslateError};
use crate::invariants::{check, Level};
use crate::library::LibraryMetadata;
use crate::translate::cycles::{describe_cycle, FieldGraph};
use crate::translate::flatten::OUTER_FIELD;
use crate::types::Type;
use crate::visit::{
    walk_block, walk_block_mut, walk_method, AssignmentCounts, VisitResult, Visitor, VisitorMut,
};

type Result<T> = std::result::Result<T, TranslateError>;

/// Title of the warning emitted for every weakened field.
pub const CYCLE_WARNING: &str = "REFERENCE CYCLE";

/// Qualifiers of the unit's fields, keyed by (declaring type, field name).
type FieldTable = HashMap<(String, String), Ownership>;

pub fn annotate(
    mut unit: CompilationUnit,
    library: &LibraryMetadata,
) -> Result<(CompilationUnit, Vec<Diagnostic>)> {
    check(&unit, Level::Resolved, Stage::Memory)?;
    let warnings = qualify_fields(&mut unit, library)?;

    let mut fields = FieldTable::new();
    for decl in &unit.types {
        for field in decl.fields() {
            if let Some(ownership) = field.ownership {
                fields.insert((decl.qualified_name.clone(), field.name.clone()), ownership);
            }
        }
    }

    for decl in &mut unit.types {
        for member in &mut decl.members {
            match member {
                Member::Method(method) => annotate_method(method, &fields, library)?,
                Member::StaticInitializer(block) => {
                    let facts = LocalFacts::of_block(block);
                    let owning = qualify_locals(block, None, &facts, library)?;
                    let rewriter = Rewriter::new(&fields, owning);
                    *block = rewriter.block(std::mem::take(block));
                }
                Member::Field(_) | Member::Initializer(_) => {}
            }
        }
    }
    Ok((unit, warnings))
}

fn is_immortal(ty: &Type, library: &LibraryMetadata) -> bool {
    ty.erasure()
        .class_name()
        .is_some_and(|name| library.is_immortal(name))
}

fn field_qualifier(decl: &TypeDecl, field: &FieldDecl, library: &LibraryMetadata) -> Ownership {
    if !field.ty.is_reference() {
        Ownership::Value
    } else if field.annotations.contains(&Annotation::Weak) {
        Ownership::Weak
    } else if field.name == OUTER_FIELD && decl.has_annotation(&Annotation::WeakOuter) {
        Ownership::Weak
    } else if is_immortal(&field.ty, library) {
        Ownership::UnsafeUnretained
    } else {
        Ownership::Strong
    }
}

/// Qualify every field, then weaken one strong field per cycle.
fn qualify_fields(unit: &mut CompilationUnit, library: &LibraryMetadata) -> Result<Vec<Diagnostic>> {
    for decl in &mut unit.types {
        let qualifiers: Vec<Option<Ownership>> = decl
            .members
            .iter()
            .map(|member| match member {
                Member::Field(field) => Some(field_qualifier(decl, field, library)),
                _ => None,
            })
            .collect();
        for (member, qualifier) in decl.members.iter_mut().zip(qualifiers) {
            if let Member::Field(field) = member {
                field.ownership = qualifier;
            }
        }
    }

    let graph = FieldGraph::of_unit(unit, |_, field| field.ownership == Some(Ownership::Strong));
    let mut warnings = Vec::new();
    for broken in graph.break_cycles() {
        let cycle = describe_cycle(unit, &broken.cycle);
        let owner = &mut unit.types[broken.edge.owner];
        let type_name = owner.qualified_name.clone();
        let owner_span = owner.span;
        let Some(Member::Field(field)) = owner.members.get_mut(broken.edge.member) else {
            return Err(TranslateError::internal(
                Stage::Memory,
                format!("cycle edge does not name a field of `{}`", type_name),
                owner_span,
            ));
        };
        if field.annotations.contains(&Annotation::Strong) {
            return Err(TranslateError::OwnershipConflict {
                type_name,
                field: field.name.clone(),
                cycle,
                span: field.span,
            });
        }
        tracing::debug!(
            target: "memory",
            field = %format!("{}.{}", type_name, field.name),
            "weakening cycle edge"
        );
        field.ownership = Some(Ownership::Weak);
        warnings.push(Diagnostic::warning(
            CYCLE_WARNING,
            format!(
                "field `{}` of `{}` closes the reference cycle {} and is declared weak",
                field.name,
                type_name,
                cycle.join(" -> ")
            ),
            field.span,
        ));
    }
    Ok(warnings)
}

/// Reassignments and captures of the locals of one body.
struct LocalFacts {
    assignments: AssignmentCounts,
    captured: HashSet<LocalId>,
}

#[derive(Default)]
struct CapturedLocals(HashSet<LocalId>);

impl CapturedLocals {
    fn add(&mut self, values: &[Expr]) {
        self.0.extend(values.iter().filter_map(Expr::as_local));
    }
}

impl Visitor for CapturedLocals {
    fn visit_expr(&mut self, expr: &Expr) -> bool {
        if let ExprKind::New { captured, .. } = &expr.kind {
            self.add(captured);
        }
        true
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::SuperConstructorCall { captured, .. }
            | StmtKind::ThisConstructorCall { captured, .. } => self.add(captured),
            _ => {}
        }
        true
    }
}

impl LocalFacts {
    fn of_method(method: &MethodDecl) -> Self {
        let mut captured = CapturedLocals::default();
        walk_method(&mut captured, method);
        Self {
            assignments: AssignmentCounts::of_method(method),
            captured: captured.0,
        }
    }

    fn of_block(block: &Block) -> Self {
        let mut captured = CapturedLocals::default();
        walk_block(&mut captured, block);
        Self {
            assignments: AssignmentCounts::of_block(block),
            captured: captured.0,
        }
    }
}

/// Sets variable qualifiers and records which locals own their value.
struct LocalQualifier<'a> {
    facts: &'a LocalFacts,
    library: &'a LibraryMetadata,
    owning: HashSet<LocalId>,
}

impl VisitorMut for LocalQualifier<'_> {
    fn visit_var_mut(&mut self, var: &mut VarDecl) -> VisitResult {
        let reassigned = self.facts.assignments.is_reassigned(var.id);
        let qualifier = if !var.ty.is_reference() {
            Ownership::Value
        } else if is_immortal(&var.ty, self.library) {
            Ownership::UnsafeUnretained
        } else if var.origin == VarOrigin::LoopElement
            && !reassigned
            && !self.facts.captured.contains(&var.id)
        {
            Ownership::UnsafeUnretained
        } else {
            Ownership::Strong
        };
        var.ownership = Some(qualifier);

        let borrows = matches!(var.origin, VarOrigin::Parameter | VarOrigin::CatchParameter);
        if qualifier == Ownership::Strong && (!borrows || reassigned) {
            self.owning.insert(var.id);
        }
        Ok(())
    }
}

fn qualify_locals(
    block: &mut Block,
    params: Option<&mut Vec<VarDecl>>,
    facts: &LocalFacts,
    library: &LibraryMetadata,
) -> Result<HashSet<LocalId>> {
    let mut qualifier = LocalQualifier {
        facts,
        library,
        owning: HashSet::new(),
    };
    if let Some(params) = params {
        for param in params {
            qualifier.visit_var_mut(param)?;
        }
    }
    walk_block_mut(&mut qualifier, block)?;
    Ok(qualifier.owning)
}

fn is_ctor_call(stmt: &Stmt) -> bool {
    matches!(
        stmt.kind,
        StmtKind::SuperConstructorCall { .. } | StmtKind::ThisConstructorCall { .. }
    )
}

fn retain_stmt(var: &VarDecl) -> Stmt {
    Stmt::expr(Expr::new(
        ExprKind::Retain(Box::new(var.reference())),
        var.ty.clone(),
    ))
}

fn annotate_method(method: &mut MethodDecl, fields: &FieldTable, library: &LibraryMetadata) -> Result<()> {
    let facts = LocalFacts::of_method(method);
    let mut body = method.body.take();
    let mut no_body = Block::default();
    let owning = qualify_locals(
        body.as_mut().unwrap_or(&mut no_body),
        Some(&mut method.params),
        &facts,
        library,
    )?;
    let Some(body) = body else { return Ok(()) };
    let rewriter = Rewriter::new(fields, owning);

    // The constructor call and the capture stores before it stay first.
    let mut prefix = body.stmts;
    let prefix_len = if method.is_constructor() {
        prefix.iter().position(is_ctor_call).map_or(0, |i| i + 1)
    } else {
        0
    };
    let rest = prefix.split_off(prefix_len);
    let mut stmts: Vec<Stmt> = prefix.into_iter().map(|stmt| rewriter.stmt(stmt)).collect();

    // Reassigned parameters stop borrowing: retain on entry, release on exit.
    let adopted: Vec<&VarDecl> = method
        .params
        .iter()
        .filter(|param| rewriter.owning.contains(&param.id))
        .collect();
    rewriter.enter_guards(adopted.len());
    let mut guarded = rewriter.stmts(rest);
    rewriter.leave_guards(adopted.len());
    for param in adopted.iter().rev() {
        guarded = vec![Stmt::guarded(guarded, Cleanup::Release(param.id))];
    }
    stmts.extend(adopted.iter().map(|param| retain_stmt(param)));
    stmts.extend(guarded);
    method.body = Some(Block::new(stmts));
    Ok(())
}

struct Rewriter<'a> {
    fields: &'a FieldTable,
    owning: HashSet<LocalId>,
    /// Release guards around the statement being rewritten.
    release_depth: Cell<usize>,
}

fn is_plus_one(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::New { .. } | ExprKind::Retain(_))
}

/// Values that need no retain to be held: nil and constant strings.
fn is_constant(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Literal(_) | ExprKind::ClassLiteral(_))
}

fn wrap(kind: fn(Box<Expr>) -> ExprKind, expr: Expr) -> Expr {
    let ty = expr.ty.clone();
    let span = expr.span;
    Expr::new(kind(Box::new(expr)), ty).at(span)
}

impl<'a> Rewriter<'a> {
    fn new(fields: &'a FieldTable, owning: HashSet<LocalId>) -> Self {
        Self {
            fields,
            owning,
            release_depth: Cell::new(0),
        }
    }

    fn enter_guards(&self, count: usize) {
        self.release_depth.set(self.release_depth.get() + count);
    }

    fn leave_guards(&self, count: usize) {
        self.release_depth.set(self.release_depth.get() - count);
    }

    /// Rewrite the statements a release guard will enclose.
    fn released_after(&self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        self.enter_guards(1);
        let stmts = self.stmts(stmts);
        self.leave_guards(1);
        stmts
    }

    fn block(&self, block: Block) -> Block {
        Block::new(self.stmts(block.stmts))
    }

    /// Rewrite a statement list; an owning local guards everything after
    /// it.
    fn stmts(&self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len());
        let mut rest = stmts.into_iter();
        while let Some(stmt) = rest.next() {
            let guard = match &stmt.kind {
                StmtKind::Local { var, .. } if self.owning.contains(&var.id) => Some(var.id),
                _ => None,
            };
            out.push(self.stmt(stmt));
            if let Some(id) = guard {
                let body = self.released_after(rest.collect());
                out.push(Stmt::guarded(body, Cleanup::Release(id)));
                break;
            }
        }
        out
    }

    fn boxed(&self, stmt: Box<Stmt>) -> Box<Stmt> {
        Box::new(self.stmt(*stmt))
    }

    fn has_owning_init(&self, init: &[Stmt]) -> bool {
        init.iter().any(|stmt| {
            matches!(&stmt.kind, StmtKind::Local { var, .. } if self.owning.contains(&var.id))
        })
    }

    /// Move owning loop variables in front of the loop so they can guard
    /// it like any other local.
    fn hoist_loop_init(&self, stmt: Stmt, label: Option<String>) -> Stmt {
        let span = stmt.span;
        match stmt.kind {
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } if self.has_owning_init(&init) => {
                let mut stmts = init;
                let bare = Stmt::new(StmtKind::For {
                    init: Vec::new(),
                    cond,
                    update,
                    body,
                })
                .at(span);
                stmts.push(match label {
                    Some(label) => Stmt::new(StmtKind::Labeled {
                        label,
                        body: Box::new(bare),
                    })
                    .at(span),
                    None => bare,
                });
                Stmt::new(StmtKind::Block(self.block(Block::new(stmts)))).at(span)
            }
            kind => {
                let inner = self.stmt(Stmt { kind, span });
                match label {
                    Some(label) => Stmt::new(StmtKind::Labeled {
                        label,
                        body: Box::new(inner),
                    })
                    .at(span),
                    None => inner,
                }
            }
        }
    }

    fn catch_body(&self, var: &VarDecl, body: Block) -> Block {
        if !self.owning.contains(&var.id) {
            return self.block(body);
        }
        Block::new(vec![
            retain_stmt(var),
            Stmt::guarded(self.released_after(body.stmts), Cleanup::Release(var.id)),
        ])
    }

    fn stmt(&self, stmt: Stmt) -> Stmt {
        let span = stmt.span;
        let kind = match stmt.kind {
            StmtKind::Local { var, init } => {
                let init = init.map(|init| {
                    if self.owning.contains(&var.id) {
                        self.owned(init)
                    } else {
                        self.expr(init)
                    }
                });
                StmtKind::Local { var, init }
            }
            StmtKind::Expr(expr) => StmtKind::Expr(self.expr(expr)),
            StmtKind::Block(block) => StmtKind::Block(self.block(block)),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => StmtKind::If {
                cond: self.expr(cond),
                then_branch: self.boxed(then_branch),
                else_branch: else_branch.map(|stmt| self.boxed(stmt)),
            },
            StmtKind::While { cond, body } => StmtKind::While {
                cond: self.expr(cond),
                body: self.boxed(body),
            },
            StmtKind::DoWhile { body, cond } => StmtKind::DoWhile {
                body: self.boxed(body),
                cond: self.expr(cond),
            },
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                if self.has_owning_init(&init) {
                    let stmt = Stmt::new(StmtKind::For {
                        init,
                        cond,
                        update,
                        body,
                    })
                    .at(span);
                    return self.hoist_loop_init(stmt, None);
                }
                StmtKind::For {
                    init: init.into_iter().map(|stmt| self.stmt(stmt)).collect(),
                    cond: cond.map(|cond| self.expr(cond)),
                    update: update.into_iter().map(|expr| self.expr(expr)).collect(),
                    body: self.boxed(body),
                }
            }
            StmtKind::Labeled { label, body } => return self.hoist_loop_init(*body, Some(label)),
            StmtKind::Return(Some(value)) => StmtKind::Return(Some(self.escaping(value))),
            StmtKind::Throw(value) => StmtKind::Throw(self.escaping(value)),
            StmtKind::Try {
                resources,
                body,
                catches,
                finally,
            } => StmtKind::Try {
                resources,
                body: self.block(body),
                catches: catches
                    .into_iter()
                    .map(|clause| CatchClause {
                        body: self.catch_body(&clause.var, clause.body),
                        var: clause.var,
                        types: clause.types,
                    })
                    .collect(),
                finally: finally.map(|block| self.block(block)),
            },
            StmtKind::Guarded { body, cleanup } => StmtKind::Guarded {
                body: self.block(body),
                cleanup: match cleanup {
                    Cleanup::Finally(block) => Cleanup::Finally(self.block(block)),
                    release => release,
                },
            },
            StmtKind::Switch { selector, cases } => StmtKind::Switch {
                selector: self.expr(selector),
                cases: cases
                    .into_iter()
                    .map(|case| SwitchCase {
                        labels: case.labels,
                        body: self.stmts(case.body),
                    })
                    .collect(),
            },
            StmtKind::SuperConstructorCall {
                ctor,
                args,
                outer,
                captured,
                selector,
            } => StmtKind::SuperConstructorCall {
                ctor,
                args: self.exprs(args),
                outer: outer.map(|outer| self.expr(outer)),
                captured: self.exprs(captured),
                selector,
            },
            StmtKind::ThisConstructorCall {
                ctor,
                args,
                captured,
                selector,
            } => StmtKind::ThisConstructorCall {
                ctor,
                args: self.exprs(args),
                captured: self.exprs(captured),
                selector,
            },
            other => other,
        };
        Stmt { kind, span }
    }

    fn exprs(&self, exprs: Vec<Expr>) -> Vec<Expr> {
        exprs.into_iter().map(|expr| self.expr(expr)).collect()
    }

    fn boxed_expr(&self, expr: Box<Expr>) -> Box<Expr> {
        Box::new(self.expr(*expr))
    }

    /// A value in a position that does not take ownership.
    fn expr(&self, expr: Expr) -> Expr {
        let expr = self.children(expr);
        if is_plus_one(&expr) {
            wrap(ExprKind::Autorelease, expr)
        } else {
            expr
        }
    }

    /// A value leaving the method by `return` or `throw`. Inside a release
    /// guard a +0 reference may be owned only by a guarded local, so it is
    /// retained and autoreleased before the guard runs.
    fn escaping(&self, expr: Expr) -> Expr {
        if self.release_depth.get() == 0 {
            return self.expr(expr);
        }
        let expr = self.children(expr);
        if is_plus_one(&expr) {
            wrap(ExprKind::Autorelease, expr)
        } else if !expr.ty.is_reference()
            || is_constant(&expr)
            || matches!(expr.kind, ExprKind::This { .. } | ExprKind::Autorelease(_))
        {
            expr
        } else {
            wrap(ExprKind::Autorelease, wrap(ExprKind::Retain, expr))
        }
    }

    /// A value stored into an owning local: +1 afterwards.
    fn owned(&self, expr: Expr) -> Expr {
        let expr = self.children(expr);
        if is_plus_one(&expr) || is_constant(&expr) {
            expr
        } else {
            wrap(ExprKind::Retain, expr)
        }
    }

    fn is_strong_target(&self, target: &Expr) -> bool {
        if !target.ty.is_reference() {
            return false;
        }
        match &target.kind {
            ExprKind::Local(id) => self.owning.contains(id),
            ExprKind::FieldAccess { field, .. } => {
                match self.fields.get(&(field.declaring.clone(), field.name.clone())) {
                    Some(ownership) => *ownership == Ownership::Strong,
                    None => true,
                }
            }
            _ => false,
        }
    }

    /// Rewrite the subexpressions of `expr`, leaving its own ownership
    /// alone.
    fn children(&self, expr: Expr) -> Expr {
        let Expr { kind, ty, span } = expr;
        let kind = match kind {
            ExprKind::FieldAccess { target, field } => ExprKind::FieldAccess {
                target: target.map(|target| self.boxed_expr(target)),
                field,
            },
            ExprKind::ArrayAccess { array, index } => ExprKind::ArrayAccess {
                array: self.boxed_expr(array),
                index: self.boxed_expr(index),
            },
            ExprKind::ArrayLength(array) => ExprKind::ArrayLength(self.boxed_expr(array)),
            ExprKind::MethodCall {
                target,
                method,
                args,
                is_super,
                selector,
            } => ExprKind::MethodCall {
                target: target.map(|target| self.boxed_expr(target)),
                method,
                args: self.exprs(args),
                is_super,
                selector,
            },
            ExprKind::New {
                class,
                ctor,
                args,
                outer,
                body,
                captured,
                selector,
            } => ExprKind::New {
                class,
                ctor,
                args: self.exprs(args),
                outer: outer.map(|outer| self.boxed_expr(outer)),
                body,
                captured: self.exprs(captured),
                selector,
            },
            ExprKind::NewArray { element, dims, init } => ExprKind::NewArray {
                element,
                dims: self.exprs(dims),
                init: init.map(|init| self.exprs(init)),
            },
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op,
                operand: self.boxed_expr(operand),
            },
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op,
                lhs: self.boxed_expr(lhs),
                rhs: self.boxed_expr(rhs),
            },
            ExprKind::Assign {
                op,
                target,
                value,
                ..
            } => {
                let strong = op.is_none() && self.is_strong_target(&target);
                let target = Box::new(self.children(*target));
                if strong {
                    let value = self.children(*value);
                    let mode = if is_plus_one(&value) {
                        AssignMode::StrongConsume
                    } else {
                        AssignMode::StrongRetain
                    };
                    ExprKind::Assign {
                        op,
                        target,
                        value: Box::new(value),
                        mode,
                    }
                } else {
                    ExprKind::Assign {
                        op,
                        target,
                        value: self.boxed_expr(value),
                        mode: AssignMode::Plain,
                    }
                }
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => ExprKind::Conditional {
                cond: self.boxed_expr(cond),
                then_expr: self.boxed_expr(then_expr),
                else_expr: self.boxed_expr(else_expr),
            },
            ExprKind::Cast(inner) => ExprKind::Cast(self.boxed_expr(inner)),
            ExprKind::InstanceOf { expr, test } => ExprKind::InstanceOf {
                expr: self.boxed_expr(expr),
                test,
            },
            ExprKind::NativeCall { function, args } => ExprKind::NativeCall {
                function,
                args: self.exprs(args),
            },
            ExprKind::Retain(inner) => ExprKind::Retain(Box::new(self.children(*inner))),
            ExprKind::Autorelease(inner) => ExprKind::Autorelease(Box::new(self.children(*inner))),
            other => other,
        };
        Expr { kind, ty, span }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::translate::{flatten::flatten, normalize::normalize, selectors::resolve};

    fn prepared(types: Vec<TypeDecl>) -> CompilationUnit {
        let mut unit = CompilationUnit::new("p/A.java", Some("p"));
        unit.types = types;
        let library = LibraryMetadata::builtin();
        let unit = flatten(normalize(unit).unwrap()).unwrap();
        resolve(unit, &library, &Options::default()).unwrap()
    }

    fn annotated(types: Vec<TypeDecl>) -> (CompilationUnit, Vec<Diagnostic>) {
        annotate(prepared(types), &LibraryMetadata::builtin()).unwrap()
    }

    fn holder(name: &str, field: &str, target: &str) -> TypeDecl {
        let mut decl = TypeDecl::new(TypeKind::Class, name);
        decl.members
            .push(Member::Field(FieldDecl::new(field, Type::class(target))));
        decl
    }

    fn ownership(unit: &CompilationUnit, ty: &str, field: &str) -> Option<Ownership> {
        unit.find_type(ty)?.field(field)?.ownership
    }

    fn body_of<'a>(unit: &'a CompilationUnit, name: &str) -> &'a [Stmt] {
        unit.types[0]
            .methods()
            .find(|m| m.name == name)
            .and_then(|m| m.body.as_ref())
            .map(|b| b.stmts.as_slice())
            .unwrap()
    }

    #[test]
    fn test_two_type_cycle_weakens_later_declaration() {
        let (unit, warnings) = annotated(vec![holder("p.A", "b", "p.B"), holder("p.B", "a", "p.A")]);
        assert_eq!(ownership(&unit, "p.A", "b"), Some(Ownership::Strong));
        assert_eq!(ownership(&unit, "p.B", "a"), Some(Ownership::Weak));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("p.A -> p.B -> p.A"));

        let (swapped, _) = annotated(vec![holder("p.B", "a", "p.A"), holder("p.A", "b", "p.B")]);
        assert_eq!(ownership(&swapped, "p.B", "a"), Some(Ownership::Strong));
        assert_eq!(ownership(&swapped, "p.A", "b"), Some(Ownership::Weak));
    }

    #[test]
    fn test_required_strong_field_conflicts() {
        let mut b = holder("p.B", "a", "p.A");
        if let Some(Member::Field(field)) = b.members.first_mut() {
            field.annotations.push(Annotation::Strong);
        }
        let unit = prepared(vec![holder("p.A", "b", "p.B"), b]);
        let err = annotate(unit, &LibraryMetadata::builtin()).unwrap_err();
        match err {
            TranslateError::OwnershipConflict { field, cycle, .. } => {
                assert_eq!(field, "a");
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_explicit_weak_and_immortal_fields() {
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A");
        decl.members.push(Member::Field(
            FieldDecl::new("self_ref", Type::class("p.A")).with_annotation(Annotation::Weak),
        ));
        decl.members
            .push(Member::Field(FieldDecl::new("kind", Type::class("java.lang.Class"))));
        decl.members.push(Member::Field(FieldDecl::new("n", Type::int())));
        let (unit, warnings) = annotated(vec![decl]);
        assert!(warnings.is_empty());
        assert_eq!(ownership(&unit, "p.A", "self_ref"), Some(Ownership::Weak));
        assert_eq!(ownership(&unit, "p.A", "kind"), Some(Ownership::UnsafeUnretained));
        assert_eq!(ownership(&unit, "p.A", "n"), Some(Ownership::Value));
    }

    #[test]
    fn test_owning_local_guards_rest_of_block() {
        let x = VarDecl::new(LocalId(0), "x", Type::object());
        let body = vec![
            Stmt::local(x.clone(), Some(Expr::new_object("java.lang.Object", vec![], vec![]))),
            Stmt::ret(Some(x.reference())),
        ];
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A");
        decl.members.push(Member::Method(
            MethodDecl::new("make", vec![], Type::object()).with_body(body),
        ));
        let (unit, _) = annotated(vec![decl]);
        let stmts = body_of(&unit, "make");
        assert_eq!(stmts.len(), 2);
        let StmtKind::Local { var, init: Some(init) } = &stmts[0].kind else { panic!() };
        assert_eq!(var.ownership, Some(Ownership::Strong));
        // the new object is consumed by the local, not autoreleased
        assert!(matches!(init.kind, ExprKind::New { .. }));
        let StmtKind::Guarded { body, cleanup } = &stmts[1].kind else { panic!() };
        assert_eq!(*cleanup, Cleanup::Release(LocalId(0)));
        let StmtKind::Return(Some(value)) = &body.stmts[0].kind else { panic!() };
        let ExprKind::Autorelease(inner) = &value.kind else { panic!() };
        assert!(matches!(inner.kind, ExprKind::Retain(_)));
    }

    #[test]
    fn test_unconsumed_new_is_autoreleased_and_field_store_consumes() {
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A");
        decl.members
            .push(Member::Field(FieldDecl::new("o", Type::object())));
        let store = Expr::assign(
            Expr::field(Some(Expr::this(Type::class("p.A"))), FieldRef::new("p.A", "o"), Type::object()),
            Expr::new_object("java.lang.Object", vec![], vec![]),
        );
        let mut log = MethodRef::new("p.A", "log", vec![Type::object()], Type::Void);
        log.is_static = true;
        let print = Expr::call(
            None,
            log,
            vec![Expr::new_object("java.lang.Object", vec![], vec![])],
        );
        decl.members.push(Member::Method(
            MethodDecl::new("f", vec![], Type::Void).with_body(vec![Stmt::expr(store), Stmt::expr(print)]),
        ));
        let (unit, _) = annotated(vec![decl]);
        let stmts = body_of(&unit, "f");
        let StmtKind::Expr(store) = &stmts[0].kind else { panic!() };
        let ExprKind::Assign { mode, value, .. } = &store.kind else { panic!() };
        assert_eq!(*mode, AssignMode::StrongConsume);
        assert!(matches!(value.kind, ExprKind::New { .. }));
        let StmtKind::Expr(call) = &stmts[1].kind else { panic!() };
        let ExprKind::MethodCall { args, .. } = &call.kind else { panic!() };
        assert!(matches!(args[0].kind, ExprKind::Autorelease(_)));
    }

    #[test]
    fn test_reassigned_parameter_is_retained_on_entry() {
        let p = VarDecl::param(LocalId(0), "s", Type::string());
        let body = vec![Stmt::expr(Expr::assign(p.reference(), Expr::string("x")))];
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A");
        decl.members.push(Member::Method(
            MethodDecl::new("f", vec![p], Type::Void).with_body(body),
        ));
        let (unit, _) = annotated(vec![decl]);
        let stmts = body_of(&unit, "f");
        assert!(matches!(&stmts[0].kind, StmtKind::Expr(e) if matches!(e.kind, ExprKind::Retain(_))));
        let StmtKind::Guarded { body, cleanup } = &stmts[1].kind else { panic!() };
        assert_eq!(*cleanup, Cleanup::Release(LocalId(0)));
        let StmtKind::Expr(assign) = &body.stmts[0].kind else { panic!() };
        assert!(matches!(assign.kind, ExprKind::Assign { mode: AssignMode::StrongRetain, .. }));
    }

    #[test]
    fn test_array_loop_element_is_unretained() {
        let items = VarDecl::param(LocalId(0), "items", Type::array(Type::string()));
        let item = VarDecl::new(LocalId(1), "item", Type::string());
        let body = vec![Stmt::new(StmtKind::ForEach {
            var: item,
            iterable: items.reference(),
            body: Box::new(Stmt::block(vec![])),
        })];
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A");
        decl.members.push(Member::Method(
            MethodDecl::new("f", vec![items], Type::Void).with_body(body),
        ));
        let (unit, _) = annotated(vec![decl]);
        let mut qualifiers = HashMap::new();
        struct Vars<'a>(&'a mut HashMap<String, Option<Ownership>>);
        impl Visitor for Vars<'_> {
            fn visit_var(&mut self, var: &VarDecl) {
                self.0.insert(var.name.clone(), var.ownership);
            }
        }
        crate::visit::walk_unit(&mut Vars(&mut qualifiers), &unit);
        assert_eq!(qualifiers["item"], Some(Ownership::UnsafeUnretained));
        assert_eq!(qualifiers["items"], Some(Ownership::Strong));
        for (name, qualifier) in &qualifiers {
            if name.starts_with("i$") || name.starts_with("n$") {
                assert_eq!(*qualifier, Some(Ownership::Value), "{name}");
            }
            if name.starts_with("a$") {
                assert_eq!(*qualifier, Some(Ownership::Strong), "{name}");
            }
        }
    }

    #[test]
    fn test_value_read_through_guarded_local_outlives_release() {
        let mut decl = holder("p.A", "child", "p.A");
        let x = VarDecl::new(LocalId(0), "x", Type::class("p.A"));
        let child = Expr::field(Some(x.reference()), FieldRef::new("p.A", "child"), Type::class("p.A"));
        let body = vec![
            Stmt::local(x.clone(), Some(Expr::new_object("p.A", vec![], vec![]))),
            Stmt::ret(Some(child)),
        ];
        decl.members.push(Member::Method(
            MethodDecl::new("first", vec![], Type::class("p.A")).with_body(body),
        ));
        let (unit, _) = annotated(vec![decl]);
        let stmts = body_of(&unit, "first");
        let StmtKind::Guarded { body, .. } = &stmts[1].kind else { panic!() };
        let StmtKind::Return(Some(value)) = &body.stmts[0].kind else { panic!() };
        let ExprKind::Autorelease(inner) = &value.kind else { panic!("{value:?}") };
        let ExprKind::Retain(read) = &inner.kind else { panic!("{inner:?}") };
        assert!(matches!(read.kind, ExprKind::FieldAccess { .. }));
    }

    #[test]
    fn test_unguarded_return_is_left_alone() {
        let mut decl = holder("p.A", "child", "p.A");
        let this_child = Expr::field(
            Some(Expr::this(Type::class("p.A"))),
            FieldRef::new("p.A", "child"),
            Type::class("p.A"),
        );
        decl.members.push(Member::Method(
            MethodDecl::new("first", vec![], Type::class("p.A")).with_body(vec![Stmt::ret(Some(this_child))]),
        ));
        let (unit, _) = annotated(vec![decl]);
        let StmtKind::Return(Some(value)) = &body_of(&unit, "first")[0].kind else { panic!() };
        assert!(matches!(value.kind, ExprKind::FieldAccess { .. }));
    }

    #[test]
    fn test_thrown_owning_local_is_retained_and_autoreleased() {
        let e = VarDecl::new(LocalId(0), "e", Type::class("java.lang.Throwable"));
        let body = vec![
            Stmt::local(e.clone(), Some(Expr::new_object("java.lang.Throwable", vec![], vec![]))),
            Stmt::new(StmtKind::Throw(e.reference())),
        ];
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A");
        decl.members.push(Member::Method(
            MethodDecl::new("fail", vec![], Type::Void).with_body(body),
        ));
        let (unit, _) = annotated(vec![decl]);
        let StmtKind::Guarded { body, .. } = &body_of(&unit, "fail")[1].kind else { panic!() };
        let StmtKind::Throw(value) = &body.stmts[0].kind else { panic!() };
        let ExprKind::Autorelease(inner) = &value.kind else { panic!("{value:?}") };
        assert!(matches!(inner.kind, ExprKind::Retain(_)));
    }
}
