//! Generic traversals over the translator AST.
//!
//! `Visitor` is a read-only pre-order walk used by analyses (free locals,
//! assignment counts, invariant checks). `VisitorMut` is a fallible
//! post-order rewrite used by passes that patch nodes in place without
//! changing the tree's shape (call-site selectors, native names).
//! Passes that restructure the tree write their own recursion.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::errors::TranslateError;

// ============================================================================
// Read-only visitor
// ============================================================================

pub trait Visitor {
    /// Return `false` to skip the statement's children.
    fn visit_stmt(&mut self, _stmt: &Stmt) -> bool {
        true
    }

    /// Return `false` to skip the expression's children.
    fn visit_expr(&mut self, _expr: &Expr) -> bool {
        true
    }

    /// Called for every type body reached, including the root of a
    /// `walk_type` call. Return `false` to skip it.
    fn visit_type(&mut self, _decl: &TypeDecl) -> bool {
        true
    }

    /// Called after a type body has been walked.
    fn leave_type(&mut self, _decl: &TypeDecl) {}

    /// Every variable declaration: locals, parameters, catch and loop
    /// variables, resources, lambda parameters.
    fn visit_var(&mut self, _var: &VarDecl) {}
}

pub fn walk_unit<V: Visitor>(v: &mut V, unit: &CompilationUnit) {
    for decl in &unit.types {
        walk_type(v, decl);
    }
}

pub fn walk_type<V: Visitor>(v: &mut V, decl: &TypeDecl) {
    if !v.visit_type(decl) {
        return;
    }
    for member in &decl.members {
        walk_member(v, member);
    }
    for constant in &decl.enum_constants {
        for arg in &constant.args {
            walk_expr(v, arg);
        }
        if let Some(body) = &constant.body {
            walk_type(v, body);
        }
    }
    for nested in &decl.nested {
        walk_type(v, nested);
    }
    v.leave_type(decl);
}

pub fn walk_member<V: Visitor>(v: &mut V, member: &Member) {
    match member {
        Member::Field(field) => {
            if let Some(init) = &field.init {
                walk_expr(v, init);
            }
        }
        Member::Method(method) => walk_method(v, method),
        Member::Initializer(block) | Member::StaticInitializer(block) => walk_block(v, block),
    }
}

pub fn walk_method<V: Visitor>(v: &mut V, method: &MethodDecl) {
    for param in &method.params {
        v.visit_var(param);
    }
    if let Some(body) = &method.body {
        walk_block(v, body);
    }
}

pub fn walk_block<V: Visitor>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        walk_stmt(v, stmt);
    }
}

pub fn walk_stmt<V: Visitor>(v: &mut V, stmt: &Stmt) {
    if !v.visit_stmt(stmt) {
        return;
    }
    match &stmt.kind {
        StmtKind::Local { var, init } => {
            v.visit_var(var);
            if let Some(init) = init {
                walk_expr(v, init);
            }
        }
        StmtKind::Expr(expr) | StmtKind::Throw(expr) => walk_expr(v, expr),
        StmtKind::Block(block) => walk_block(v, block),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            walk_expr(v, cond);
            walk_stmt(v, then_branch);
            if let Some(else_branch) = else_branch {
                walk_stmt(v, else_branch);
            }
        }
        StmtKind::While { cond, body } => {
            walk_expr(v, cond);
            walk_stmt(v, body);
        }
        StmtKind::DoWhile { body, cond } => {
            walk_stmt(v, body);
            walk_expr(v, cond);
        }
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => {
            for stmt in init {
                walk_stmt(v, stmt);
            }
            if let Some(cond) = cond {
                walk_expr(v, cond);
            }
            for expr in update {
                walk_expr(v, expr);
            }
            walk_stmt(v, body);
        }
        StmtKind::ForEach {
            var,
            iterable,
            body,
        } => {
            v.visit_var(var);
            walk_expr(v, iterable);
            walk_stmt(v, body);
        }
        StmtKind::Labeled { body, .. } => walk_stmt(v, body),
        StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Empty => {}
        StmtKind::Return(value) => {
            if let Some(value) = value {
                walk_expr(v, value);
            }
        }
        StmtKind::Try {
            resources,
            body,
            catches,
            finally,
        } => {
            for resource in resources {
                v.visit_var(&resource.var);
                walk_expr(v, &resource.init);
            }
            walk_block(v, body);
            for catch in catches {
                v.visit_var(&catch.var);
                walk_block(v, &catch.body);
            }
            if let Some(finally) = finally {
                walk_block(v, finally);
            }
        }
        StmtKind::Guarded { body, cleanup } => {
            walk_block(v, body);
            if let Cleanup::Finally(block) = cleanup {
                walk_block(v, block);
            }
        }
        StmtKind::Switch { selector, cases } => {
            walk_expr(v, selector);
            for case in cases {
                for label in &case.labels {
                    walk_expr(v, label);
                }
                for stmt in &case.body {
                    walk_stmt(v, stmt);
                }
            }
        }
        StmtKind::Synchronized { lock, body } => {
            walk_expr(v, lock);
            walk_block(v, body);
        }
        StmtKind::LocalClass(decl) => walk_type(v, decl),
        StmtKind::Assert { cond, message } => {
            walk_expr(v, cond);
            if let Some(message) = message {
                walk_expr(v, message);
            }
        }
        StmtKind::SuperConstructorCall {
            args,
            outer,
            captured,
            ..
        } => {
            if let Some(outer) = outer {
                walk_expr(v, outer);
            }
            for expr in captured.iter().chain(args) {
                walk_expr(v, expr);
            }
        }
        StmtKind::ThisConstructorCall { args, captured, .. } => {
            for expr in captured.iter().chain(args) {
                walk_expr(v, expr);
            }
        }
    }
}

pub fn walk_expr<V: Visitor>(v: &mut V, expr: &Expr) {
    if !v.visit_expr(expr) {
        return;
    }
    match &expr.kind {
        ExprKind::Literal(_)
        | ExprKind::Local(_)
        | ExprKind::This { .. }
        | ExprKind::ClassLiteral(_)
        | ExprKind::MethodReference { .. }
        | ExprKind::EnumOrdinal { .. } => {}
        ExprKind::FieldAccess { target, .. } => {
            if let Some(target) = target {
                walk_expr(v, target);
            }
        }
        ExprKind::ArrayAccess { array, index } => {
            walk_expr(v, array);
            walk_expr(v, index);
        }
        ExprKind::ArrayLength(inner)
        | ExprKind::Cast(inner)
        | ExprKind::Retain(inner)
        | ExprKind::Autorelease(inner) => walk_expr(v, inner),
        ExprKind::MethodCall { target, args, .. } => {
            if let Some(target) = target {
                walk_expr(v, target);
            }
            for arg in args {
                walk_expr(v, arg);
            }
        }
        ExprKind::New {
            args,
            outer,
            body,
            captured,
            ..
        } => {
            if let Some(outer) = outer {
                walk_expr(v, outer);
            }
            for arg in captured.iter().chain(args) {
                walk_expr(v, arg);
            }
            if let Some(body) = body {
                walk_type(v, body);
            }
        }
        ExprKind::NewArray { dims, init, .. } => {
            for dim in dims {
                walk_expr(v, dim);
            }
            for elem in init.iter().flatten() {
                walk_expr(v, elem);
            }
        }
        ExprKind::Unary { operand, .. } => walk_expr(v, operand),
        ExprKind::Binary { lhs, rhs, .. } => {
            walk_expr(v, lhs);
            walk_expr(v, rhs);
        }
        ExprKind::Assign { target, value, .. } => {
            walk_expr(v, target);
            walk_expr(v, value);
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            walk_expr(v, cond);
            walk_expr(v, then_expr);
            walk_expr(v, else_expr);
        }
        ExprKind::InstanceOf { expr, .. } => walk_expr(v, expr),
        ExprKind::Lambda { params, body, .. } => {
            for param in params {
                v.visit_var(param);
            }
            match body {
                LambdaBody::Expr(expr) => walk_expr(v, expr),
                LambdaBody::Block(block) => walk_block(v, block),
            }
        }
        ExprKind::NativeCall { args, .. } => {
            for arg in args {
                walk_expr(v, arg);
            }
        }
    }
}

// ============================================================================
// Mutable visitor
// ============================================================================

pub type VisitResult = Result<(), TranslateError>;

/// In-place rewrite, children first.
pub trait VisitorMut {
    fn visit_expr_mut(&mut self, _expr: &mut Expr) -> VisitResult {
        Ok(())
    }

    fn visit_stmt_mut(&mut self, _stmt: &mut Stmt) -> VisitResult {
        Ok(())
    }

    fn visit_var_mut(&mut self, _var: &mut VarDecl) -> VisitResult {
        Ok(())
    }

    /// Called before a method's parameters and body are visited.
    fn enter_method_mut(&mut self, _method: &mut MethodDecl) -> VisitResult {
        Ok(())
    }

    fn leave_method_mut(&mut self, _method: &mut MethodDecl) -> VisitResult {
        Ok(())
    }

    /// Whether to walk into anonymous class bodies and local classes.
    fn descend_into_types(&self) -> bool {
        true
    }
}

pub fn walk_type_mut<V: VisitorMut>(v: &mut V, decl: &mut TypeDecl) -> VisitResult {
    for member in &mut decl.members {
        match member {
            Member::Field(field) => {
                if let Some(init) = &mut field.init {
                    walk_expr_mut(v, init)?;
                }
            }
            Member::Method(method) => {
                v.enter_method_mut(method)?;
                for param in &mut method.params {
                    v.visit_var_mut(param)?;
                }
                if let Some(body) = &mut method.body {
                    walk_block_mut(v, body)?;
                }
                v.leave_method_mut(method)?;
            }
            Member::Initializer(block) | Member::StaticInitializer(block) => {
                walk_block_mut(v, block)?
            }
        }
    }
    for constant in &mut decl.enum_constants {
        for arg in &mut constant.args {
            walk_expr_mut(v, arg)?;
        }
    }
    for nested in &mut decl.nested {
        walk_type_mut(v, nested)?;
    }
    Ok(())
}

pub fn walk_block_mut<V: VisitorMut>(v: &mut V, block: &mut Block) -> VisitResult {
    for stmt in &mut block.stmts {
        walk_stmt_mut(v, stmt)?;
    }
    Ok(())
}

pub fn walk_stmt_mut<V: VisitorMut>(v: &mut V, stmt: &mut Stmt) -> VisitResult {
    match &mut stmt.kind {
        StmtKind::Local { var, init } => {
            v.visit_var_mut(var)?;
            if let Some(init) = init {
                walk_expr_mut(v, init)?;
            }
        }
        StmtKind::Expr(expr) | StmtKind::Throw(expr) => walk_expr_mut(v, expr)?,
        StmtKind::Block(block) => walk_block_mut(v, block)?,
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            walk_expr_mut(v, cond)?;
            walk_stmt_mut(v, then_branch)?;
            if let Some(else_branch) = else_branch {
                walk_stmt_mut(v, else_branch)?;
            }
        }
        StmtKind::While { cond, body } => {
            walk_expr_mut(v, cond)?;
            walk_stmt_mut(v, body)?;
        }
        StmtKind::DoWhile { body, cond } => {
            walk_stmt_mut(v, body)?;
            walk_expr_mut(v, cond)?;
        }
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => {
            for stmt in init {
                walk_stmt_mut(v, stmt)?;
            }
            if let Some(cond) = cond {
                walk_expr_mut(v, cond)?;
            }
            for expr in update {
                walk_expr_mut(v, expr)?;
            }
            walk_stmt_mut(v, body)?;
        }
        StmtKind::ForEach {
            var,
            iterable,
            body,
        } => {
            v.visit_var_mut(var)?;
            walk_expr_mut(v, iterable)?;
            walk_stmt_mut(v, body)?;
        }
        StmtKind::Labeled { body, .. } => walk_stmt_mut(v, body)?,
        StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Empty => {}
        StmtKind::Return(value) => {
            if let Some(value) = value {
                walk_expr_mut(v, value)?;
            }
        }
        StmtKind::Try {
            resources,
            body,
            catches,
            finally,
        } => {
            for resource in resources {
                v.visit_var_mut(&mut resource.var)?;
                walk_expr_mut(v, &mut resource.init)?;
            }
            walk_block_mut(v, body)?;
            for catch in catches {
                v.visit_var_mut(&mut catch.var)?;
                walk_block_mut(v, &mut catch.body)?;
            }
            if let Some(finally) = finally {
                walk_block_mut(v, finally)?;
            }
        }
        StmtKind::Guarded { body, cleanup } => {
            walk_block_mut(v, body)?;
            if let Cleanup::Finally(block) = cleanup {
                walk_block_mut(v, block)?;
            }
        }
        StmtKind::Switch { selector, cases } => {
            walk_expr_mut(v, selector)?;
            for case in cases {
                for label in &mut case.labels {
                    walk_expr_mut(v, label)?;
                }
                for stmt in &mut case.body {
                    walk_stmt_mut(v, stmt)?;
                }
            }
        }
        StmtKind::Synchronized { lock, body } => {
            walk_expr_mut(v, lock)?;
            walk_block_mut(v, body)?;
        }
        StmtKind::LocalClass(decl) => {
            if v.descend_into_types() {
                walk_type_mut(v, decl)?
            }
        }
        StmtKind::Assert { cond, message } => {
            walk_expr_mut(v, cond)?;
            if let Some(message) = message {
                walk_expr_mut(v, message)?;
            }
        }
        StmtKind::SuperConstructorCall {
            args,
            outer,
            captured,
            ..
        } => {
            if let Some(outer) = outer {
                walk_expr_mut(v, outer)?;
            }
            for expr in captured.iter_mut().chain(args.iter_mut()) {
                walk_expr_mut(v, expr)?;
            }
        }
        StmtKind::ThisConstructorCall { args, captured, .. } => {
            for expr in captured.iter_mut().chain(args.iter_mut()) {
                walk_expr_mut(v, expr)?;
            }
        }
    }
    v.visit_stmt_mut(stmt)
}

pub fn walk_expr_mut<V: VisitorMut>(v: &mut V, expr: &mut Expr) -> VisitResult {
    match &mut expr.kind {
        ExprKind::Literal(_)
        | ExprKind::Local(_)
        | ExprKind::This { .. }
        | ExprKind::ClassLiteral(_)
        | ExprKind::MethodReference { .. }
        | ExprKind::EnumOrdinal { .. } => {}
        ExprKind::FieldAccess { target, .. } => {
            if let Some(target) = target {
                walk_expr_mut(v, target)?;
            }
        }
        ExprKind::ArrayAccess { array, index } => {
            walk_expr_mut(v, array)?;
            walk_expr_mut(v, index)?;
        }
        ExprKind::ArrayLength(inner)
        | ExprKind::Cast(inner)
        | ExprKind::Retain(inner)
        | ExprKind::Autorelease(inner) => walk_expr_mut(v, inner)?,
        ExprKind::MethodCall { target, args, .. } => {
            if let Some(target) = target {
                walk_expr_mut(v, target)?;
            }
            for arg in args {
                walk_expr_mut(v, arg)?;
            }
        }
        ExprKind::New {
            args,
            outer,
            body,
            captured,
            ..
        } => {
            if let Some(outer) = outer {
                walk_expr_mut(v, outer)?;
            }
            for arg in captured.iter_mut().chain(args.iter_mut()) {
                walk_expr_mut(v, arg)?;
            }
            if let Some(body) = body {
                if v.descend_into_types() {
                    walk_type_mut(v, body)?;
                }
            }
        }
        ExprKind::NewArray { dims, init, .. } => {
            for dim in dims {
                walk_expr_mut(v, dim)?;
            }
            for elem in init.iter_mut().flatten() {
                walk_expr_mut(v, elem)?;
            }
        }
        ExprKind::Unary { operand, .. } => walk_expr_mut(v, operand)?,
        ExprKind::Binary { lhs, rhs, .. } => {
            walk_expr_mut(v, lhs)?;
            walk_expr_mut(v, rhs)?;
        }
        ExprKind::Assign { target, value, .. } => {
            walk_expr_mut(v, target)?;
            walk_expr_mut(v, value)?;
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            walk_expr_mut(v, cond)?;
            walk_expr_mut(v, then_expr)?;
            walk_expr_mut(v, else_expr)?;
        }
        ExprKind::InstanceOf { expr, .. } => walk_expr_mut(v, expr)?,
        ExprKind::Lambda { params, body, .. } => {
            for param in params {
                v.visit_var_mut(param)?;
            }
            match body {
                LambdaBody::Expr(expr) => walk_expr_mut(v, expr)?,
                LambdaBody::Block(block) => walk_block_mut(v, block)?,
            }
        }
        ExprKind::NativeCall { args, .. } => {
            for arg in args {
                walk_expr_mut(v, arg)?;
            }
        }
    }
    v.visit_expr_mut(expr)
}

// ============================================================================
// Common analyses
// ============================================================================

struct MaxLocal(Option<LocalId>);

impl Visitor for MaxLocal {
    fn visit_expr(&mut self, expr: &Expr) -> bool {
        if let ExprKind::Local(id) = expr.kind {
            self.0 = self.0.max(Some(id));
        }
        true
    }

    fn visit_var(&mut self, var: &VarDecl) {
        self.0 = self.0.max(Some(var.id));
    }
}

/// Largest local id anywhere in the unit, so temporaries can be numbered
/// after it.
pub fn max_local_id(unit: &CompilationUnit) -> Option<LocalId> {
    let mut finder = MaxLocal(None);
    walk_unit(&mut finder, unit);
    for decl in &unit.types {
        for capture in &decl.captures {
            if let CaptureKind::Local { id, .. } = capture.kind {
                finder.0 = finder.0.max(Some(id));
            }
        }
    }
    finder.0
}

/// Locals read or written, and locals declared, within a subtree.
#[derive(Debug, Default)]
pub struct LocalUsage {
    pub referenced: HashSet<LocalId>,
    pub declared: HashSet<LocalId>,
    /// First reference span per local, for diagnostics
    pub first_use: HashMap<LocalId, Span>,
}

impl LocalUsage {
    pub fn of_type(decl: &TypeDecl) -> Self {
        let mut usage = LocalUsage::default();
        walk_type(&mut usage, decl);
        usage
    }

    /// Referenced but not declared inside, in id order.
    pub fn free(&self) -> Vec<LocalId> {
        let mut free: Vec<LocalId> = self
            .referenced
            .difference(&self.declared)
            .copied()
            .collect();
        free.sort();
        free
    }
}

impl Visitor for LocalUsage {
    fn visit_expr(&mut self, expr: &Expr) -> bool {
        if let ExprKind::Local(id) = expr.kind {
            self.referenced.insert(id);
            self.first_use.entry(id).or_insert(expr.span);
        }
        true
    }

    fn visit_var(&mut self, var: &VarDecl) {
        self.declared.insert(var.id);
    }
}

/// Number of writes to each local (assignments, increments).
#[derive(Debug, Default)]
pub struct AssignmentCounts {
    counts: HashMap<LocalId, usize>,
    /// Locals declared with a value (initialized locals, parameters, catch
    /// and loop variables, resources)
    initialized: HashSet<LocalId>,
    /// Blank locals that may be written when already assigned
    repeated: HashSet<LocalId>,
}

impl AssignmentCounts {
    pub fn of_unit(unit: &CompilationUnit) -> Self {
        let mut counts = AssignmentCounts::default();
        walk_unit(&mut counts, unit);
        let mut repeated = RepeatedWrites::default();
        walk_unit(&mut repeated, unit);
        counts.repeated = repeated.0;
        counts
    }

    pub fn of_method(method: &MethodDecl) -> Self {
        let mut counts = AssignmentCounts::default();
        walk_method(&mut counts, method);
        let mut repeated = RepeatedWrites::default();
        if let Some(body) = &method.body {
            repeated.body(&method.params, &body.stmts);
        }
        walk_method(&mut repeated, method);
        counts.repeated = repeated.0;
        counts
    }

    pub fn of_block(block: &Block) -> Self {
        let mut counts = AssignmentCounts::default();
        walk_block(&mut counts, block);
        let mut repeated = RepeatedWrites::default();
        repeated.body(&[], &block.stmts);
        walk_block(&mut repeated, block);
        counts.repeated = repeated.0;
        counts
    }

    pub fn writes(&self, id: LocalId) -> usize {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    /// Whether the local is written after it first holds a value. A blank
    /// local may be written once on each path (`if` arms, `switch` cases).
    pub fn is_reassigned(&self, id: LocalId) -> bool {
        if self.initialized.contains(&id) {
            self.writes(id) > 0
        } else {
            self.repeated.contains(&id)
        }
    }

    fn record(&mut self, target: &Expr) {
        if let ExprKind::Local(id) = target.kind {
            *self.counts.entry(id).or_insert(0) += 1;
        }
    }
}

impl Visitor for AssignmentCounts {
    fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
        if let StmtKind::Local { var, init: Some(_) } = &stmt.kind {
            self.initialized.insert(var.id);
        }
        true
    }

    fn visit_expr(&mut self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Assign { target, .. } => self.record(target),
            ExprKind::Unary { op, operand } if op.is_increment() => self.record(operand),
            _ => {}
        }
        true
    }

    fn visit_var(&mut self, var: &VarDecl) {
        if var.origin != VarOrigin::Local && var.origin != VarOrigin::Synthetic {
            self.initialized.insert(var.id);
        }
    }
}

// ============================================================================
// Definite unassignment
// ============================================================================

/// Locals possibly assigned at a program point; `None` once the point is
/// unreachable.
type MaybeAssigned = Option<HashSet<LocalId>>;

fn join(a: MaybeAssigned, b: MaybeAssigned) -> MaybeAssigned {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Some(a)
        }
        (a, None) => a,
        (None, b) => b,
    }
}

fn with_writes(state: &MaybeAssigned, writes: &HashSet<LocalId>) -> MaybeAssigned {
    state.as_ref().map(|set| set.union(writes).copied().collect())
}

/// Local writes in evaluation order, not entering nested type or lambda
/// bodies.
#[derive(Default)]
struct Writes(Vec<LocalId>);

impl Writes {
    fn record(&mut self, target: &Expr) {
        if let ExprKind::Local(id) = target.kind {
            self.0.push(id);
        }
    }

    fn in_stmts(stmts: &[Stmt]) -> HashSet<LocalId> {
        let mut writes = Writes::default();
        for stmt in stmts {
            walk_stmt(&mut writes, stmt);
        }
        writes.0.into_iter().collect()
    }
}

impl Visitor for Writes {
    fn visit_expr(&mut self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Assign { target, .. } => self.record(target),
            ExprKind::Unary { op, operand } if op.is_increment() => self.record(operand),
            ExprKind::Lambda { .. } => return false,
            _ => {}
        }
        true
    }

    fn visit_type(&mut self, _decl: &TypeDecl) -> bool {
        false
    }
}

/// Flow walk over one body, flagging writes to locals that may already be
/// assigned. Loops and `switch` are treated as having run every write in
/// them; writes to locals of an enclosing body are always flagged.
struct Unassignment<'r> {
    declared: HashSet<LocalId>,
    repeated: &'r mut HashSet<LocalId>,
}

impl Unassignment<'_> {
    fn write(&mut self, id: LocalId, state: &mut MaybeAssigned) {
        if !self.declared.contains(&id) {
            self.repeated.insert(id);
        } else if let Some(set) = state {
            if !set.insert(id) {
                self.repeated.insert(id);
            }
        }
    }

    fn declare(&mut self, var: &VarDecl, state: &mut MaybeAssigned) {
        self.declared.insert(var.id);
        if let Some(set) = state {
            set.insert(var.id);
        }
    }

    fn expr(&mut self, expr: &Expr, mut state: MaybeAssigned) -> MaybeAssigned {
        let mut writes = Writes::default();
        walk_expr(&mut writes, expr);
        for id in writes.0 {
            self.write(id, &mut state);
        }
        state
    }

    fn simple(&mut self, stmt: &Stmt, mut state: MaybeAssigned) -> MaybeAssigned {
        let mut writes = Writes::default();
        walk_stmt(&mut writes, stmt);
        for id in writes.0 {
            self.write(id, &mut state);
        }
        state
    }

    fn stmts(&mut self, stmts: &[Stmt], mut state: MaybeAssigned) -> MaybeAssigned {
        for stmt in stmts {
            state = self.stmt(stmt, state);
        }
        state
    }

    /// A cleanup block runs after any prefix of `ran`; it completes the
    /// paths in `out` unless it never completes itself.
    fn cleanup(
        &mut self,
        entry: &MaybeAssigned,
        ran: &[&[Stmt]],
        cleanup: &[Stmt],
        out: MaybeAssigned,
    ) -> MaybeAssigned {
        let mut writes = HashSet::new();
        for stmts in ran {
            writes.extend(Writes::in_stmts(stmts));
        }
        match self.stmts(cleanup, with_writes(entry, &writes)) {
            Some(after) => out.map(|set| set.union(&after).copied().collect()),
            None => None,
        }
    }

    fn looping(&mut self, stmt: &Stmt, state: MaybeAssigned) -> MaybeAssigned {
        let entry = with_writes(&state, &Writes::in_stmts(std::slice::from_ref(stmt)));
        match &stmt.kind {
            StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
                let inner = self.expr(cond, entry.clone());
                self.stmt(body, inner);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let mut inner = self.stmts(init, entry.clone());
                if let Some(cond) = cond {
                    inner = self.expr(cond, inner);
                }
                let after_body = self.stmt(body, inner);
                for expr in update {
                    self.expr(expr, after_body.clone());
                }
            }
            StmtKind::ForEach { var, iterable, body } => {
                let mut inner = self.expr(iterable, entry.clone());
                self.declare(var, &mut inner);
                self.stmt(body, inner);
            }
            _ => {}
        }
        entry
    }

    fn stmt(&mut self, stmt: &Stmt, state: MaybeAssigned) -> MaybeAssigned {
        match &stmt.kind {
            StmtKind::Local { var, init } => {
                self.declared.insert(var.id);
                let mut state = match init {
                    Some(init) => self.expr(init, state),
                    None => state,
                };
                if let Some(set) = &mut state {
                    // a blank declaration starts over on every loop iteration
                    if init.is_some() {
                        set.insert(var.id);
                    } else {
                        set.remove(&var.id);
                    }
                }
                state
            }
            StmtKind::Block(block) => self.stmts(&block.stmts, state),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let state = self.expr(cond, state);
                let then_out = self.stmt(then_branch, state.clone());
                let else_out = match else_branch {
                    Some(else_branch) => self.stmt(else_branch, state),
                    None => state,
                };
                join(then_out, else_out)
            }
            StmtKind::While { .. }
            | StmtKind::DoWhile { .. }
            | StmtKind::For { .. }
            | StmtKind::ForEach { .. } => self.looping(stmt, state),
            StmtKind::Labeled { body, .. } => {
                let escaped = with_writes(&state, &Writes::in_stmts(std::slice::from_ref(&**body)));
                let out = self.stmt(body, state);
                join(out, escaped)
            }
            StmtKind::Break(_) | StmtKind::Continue(_) => None,
            StmtKind::Return(_) | StmtKind::Throw(_) => {
                self.simple(stmt, state);
                None
            }
            StmtKind::Switch { selector, cases } => {
                let state = self.expr(selector, state);
                let mut writes = HashSet::new();
                let mut fall: MaybeAssigned = None;
                for case in cases {
                    writes.extend(Writes::in_stmts(&case.body));
                    let entry = join(state.clone(), fall);
                    fall = self.stmts(&case.body, entry);
                }
                with_writes(&state, &writes)
            }
            StmtKind::Try {
                resources,
                body,
                catches,
                finally,
            } => {
                let mut inner = state.clone();
                for resource in resources {
                    inner = self.expr(&resource.init, inner);
                    self.declare(&resource.var, &mut inner);
                }
                let mut out = self.stmts(&body.stmts, inner);
                let caught = with_writes(&state, &Writes::in_stmts(&body.stmts));
                for clause in catches {
                    let mut entry = caught.clone();
                    self.declare(&clause.var, &mut entry);
                    out = join(out, self.stmts(&clause.body.stmts, entry));
                }
                match finally {
                    Some(finally) => {
                        let mut ran: Vec<&[Stmt]> = vec![body.stmts.as_slice()];
                        ran.extend(catches.iter().map(|clause| clause.body.stmts.as_slice()));
                        self.cleanup(&state, &ran, &finally.stmts, out)
                    }
                    None => out,
                }
            }
            StmtKind::Guarded { body, cleanup } => {
                let out = self.stmts(&body.stmts, state.clone());
                match cleanup {
                    Cleanup::Finally(block) => {
                        self.cleanup(&state, &[body.stmts.as_slice()], &block.stmts, out)
                    }
                    _ => out,
                }
            }
            StmtKind::Synchronized { lock, body } => {
                let state = self.expr(lock, state);
                self.stmts(&body.stmts, state)
            }
            StmtKind::LocalClass(_) | StmtKind::Empty => state,
            StmtKind::Expr(_)
            | StmtKind::Assert { .. }
            | StmtKind::SuperConstructorCall { .. }
            | StmtKind::ThisConstructorCall { .. } => self.simple(stmt, state),
        }
    }
}

/// Runs the flow walk over every body it reaches: methods, initializers
/// and lambdas, of the root type and every nested one.
#[derive(Default)]
struct RepeatedWrites(HashSet<LocalId>);

impl RepeatedWrites {
    fn flow(&mut self, params: &[VarDecl]) -> (Unassignment<'_>, MaybeAssigned) {
        let ids: HashSet<LocalId> = params.iter().map(|param| param.id).collect();
        let flow = Unassignment {
            declared: ids.clone(),
            repeated: &mut self.0,
        };
        (flow, Some(ids))
    }

    fn body(&mut self, params: &[VarDecl], stmts: &[Stmt]) {
        let (mut flow, entry) = self.flow(params);
        flow.stmts(stmts, entry);
    }
}

impl Visitor for RepeatedWrites {
    fn visit_type(&mut self, decl: &TypeDecl) -> bool {
        for member in &decl.members {
            match member {
                Member::Method(method) => {
                    if let Some(body) = &method.body {
                        self.body(&method.params, &body.stmts);
                    }
                }
                Member::Initializer(block) | Member::StaticInitializer(block) => {
                    self.body(&[], &block.stmts)
                }
                Member::Field(_) => {}
            }
        }
        true
    }

    fn visit_expr(&mut self, expr: &Expr) -> bool {
        if let ExprKind::Lambda { params, body, .. } = &expr.kind {
            match body {
                LambdaBody::Block(block) => self.body(params, &block.stmts),
                LambdaBody::Expr(value) => {
                    let (mut flow, entry) = self.flow(params);
                    flow.expr(value, entry);
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn var(id: u32, name: &str) -> VarDecl {
        VarDecl::new(LocalId(id), name, Type::int())
    }

    #[test]
    fn test_assignment_counts_distinguish_initialized_locals() {
        let a = var(0, "a");
        let b = var(1, "b");
        let block = Block::new(vec![
            Stmt::local(a.clone(), Some(Expr::int(1))),
            Stmt::local(b.clone(), None),
            Stmt::expr(Expr::assign(b.reference(), Expr::int(2))),
        ]);
        let counts = AssignmentCounts::of_block(&block);
        assert!(!counts.is_reassigned(a.id));
        assert!(!counts.is_reassigned(b.id), "single deferred assignment");

        let mut block = block;
        block.stmts.push(Stmt::expr(Expr::new(
            ExprKind::Unary {
                op: UnaryOp::PostInc,
                operand: Box::new(a.reference()),
            },
            Type::int(),
        )));
        let counts = AssignmentCounts::of_block(&block);
        assert!(counts.is_reassigned(a.id));
        assert_eq!(counts.writes(a.id), 1);
    }

    fn assign(target: &VarDecl, value: i64) -> Stmt {
        Stmt::expr(Expr::assign(target.reference(), Expr::int(value)))
    }

    #[test]
    fn test_blank_local_assigned_once_per_branch() {
        let flag = VarDecl::param(LocalId(0), "flag", Type::boolean());
        let c = var(1, "c");
        let block = Block::new(vec![
            Stmt::local(c.clone(), None),
            Stmt::if_then(flag.reference(), assign(&c, 1), Some(assign(&c, 2))),
        ]);
        assert!(!AssignmentCounts::of_block(&block).is_reassigned(c.id));

        // an early exit leaves the fall-through path unassigned
        let block = Block::new(vec![
            Stmt::local(c.clone(), None),
            Stmt::if_then(flag.reference(), Stmt::block(vec![assign(&c, 1), Stmt::ret(None)]), None),
            assign(&c, 2),
        ]);
        assert!(!AssignmentCounts::of_block(&block).is_reassigned(c.id));

        let block = Block::new(vec![
            Stmt::local(c.clone(), None),
            Stmt::if_then(flag.reference(), assign(&c, 1), None),
            assign(&c, 2),
        ]);
        assert!(AssignmentCounts::of_block(&block).is_reassigned(c.id));
    }

    #[test]
    fn test_blank_local_in_switch_cases_and_loops() {
        let k = VarDecl::param(LocalId(0), "k", Type::int());
        let c = var(1, "c");
        let case = |label: Option<i64>, value: i64, brk: bool| {
            let mut body = vec![assign(&c, value)];
            if brk {
                body.push(Stmt::new(StmtKind::Break(None)));
            }
            SwitchCase {
                labels: label.map(Expr::int).into_iter().collect(),
                body,
            }
        };
        let switch = |fall_through: bool| {
            Block::new(vec![
                Stmt::local(c.clone(), None),
                Stmt::new(StmtKind::Switch {
                    selector: k.reference(),
                    cases: vec![case(Some(1), 1, !fall_through), case(None, 2, true)],
                }),
            ])
        };
        assert!(!AssignmentCounts::of_block(&switch(false)).is_reassigned(c.id));
        assert!(AssignmentCounts::of_block(&switch(true)).is_reassigned(c.id));

        let looped = Block::new(vec![
            Stmt::local(c.clone(), None),
            Stmt::while_loop(Expr::boolean(true), Stmt::block(vec![assign(&c, 1)])),
        ]);
        assert!(AssignmentCounts::of_block(&looped).is_reassigned(c.id));

        // declared inside the loop: a fresh variable on every iteration
        let d = var(2, "d");
        let fresh = Block::new(vec![Stmt::while_loop(
            Expr::boolean(true),
            Stmt::block(vec![Stmt::local(d.clone(), None), assign(&d, 1)]),
        )]);
        assert!(!AssignmentCounts::of_block(&fresh).is_reassigned(d.id));
    }

    #[test]
    fn test_free_locals_exclude_declared() {
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A$1");
        let inner = var(5, "inner");
        decl.members.push(Member::Method(
            MethodDecl::new("run", vec![], Type::Void).with_body(vec![
                Stmt::local(inner.clone(), Some(Expr::local(LocalId(2), Type::int()))),
                Stmt::expr(inner.reference()),
            ]),
        ));
        let usage = LocalUsage::of_type(&decl);
        assert_eq!(usage.free(), vec![LocalId(2)]);
    }

    struct Renumber;

    impl VisitorMut for Renumber {
        fn visit_expr_mut(&mut self, expr: &mut Expr) -> VisitResult {
            if let ExprKind::Literal(Literal::Int(value)) = &mut expr.kind {
                *value += 1;
            }
            Ok(())
        }
    }

    #[test]
    fn test_mutable_walk_reaches_nested_expressions() {
        let mut stmt = Stmt::if_then(
            Expr::boolean(true),
            Stmt::ret(Some(Expr::binary(BinaryOp::Add, Expr::int(1), Expr::int(2), Type::int()))),
            None,
        );
        walk_stmt_mut(&mut Renumber, &mut stmt).unwrap();
        let StmtKind::If { then_branch, .. } = &stmt.kind else {
            panic!("expected if");
        };
        let StmtKind::Return(Some(value)) = &then_branch.kind else {
            panic!("expected return");
        };
        let ExprKind::Binary { lhs, rhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(lhs.kind, ExprKind::Literal(Literal::Int(2)));
        assert_eq!(rhs.kind, ExprKind::Literal(Literal::Int(3)));
    }
}
