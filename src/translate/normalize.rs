//! Unit normalizer: desugar the source language into a primitive subset.
//!
//! ## Architecture
//!
//! ```text
//! CompilationUnit (front end)
//!     |
//!     v
//! per type:  members ----> statements / expressions rewritten bottom-up
//!            nested types  (same pass, recursively)
//!            constructors  default ctor, explicit super(), enum name/ordinal
//!            initializers  instance inits -> ctor prologue, statics -> one block
//!     |
//!     v
//! CompilationUnit (primitive subset)
//! ```
//!
//! After this pass the unit contains no enhanced-for, varargs sugar,
//! multi-catch, `finally` on `try`, try-with-resources, string or enum
//! switches, synchronized blocks or methods, lambdas, asserts, instance
//! initializers or checked exception lists. `finally` and resource cleanup
//! become `Guarded` statements, which the emitter renders as
//! `@try`/`@finally`.
//!
//! Temporaries get fresh `LocalId`s numbered after the largest id in the
//! input and `$`-suffixed names that cannot clash with source identifiers.

use std::collections::HashMap;

use crate::ast::*;
use crate::errors::TranslateError;
use crate::types::{
    PrimitiveType, Type, ASSERTION_ERROR, AUTO_CLOSEABLE, CLASS, ENUM, ITERABLE, ITERATOR, OBJECT,
    STRING, THROWABLE,
};
use crate::visit::{max_local_id, walk_stmt_mut, VisitResult, VisitorMut};

type Result<T> = std::result::Result<T, TranslateError>;

/// Desugar a unit into the primitive subset.
pub fn normalize(unit: CompilationUnit) -> Result<CompilationUnit> {
    let mut normalizer = Normalizer {
        locals: LocalGen::starting_after(max_local_id(&unit)),
        classes: Vec::new(),
        lambda_counts: HashMap::new(),
    };
    let CompilationUnit {
        source_path,
        package,
        imports,
        types,
        source,
    } = unit;
    let types = types
        .into_iter()
        .map(|decl| normalizer.normalize_type(decl))
        .collect::<Result<Vec<_>>>()?;
    Ok(CompilationUnit {
        source_path,
        package,
        imports,
        types,
        source,
    })
}

struct Normalizer {
    locals: LocalGen,
    /// Qualified names of the classes whose bodies are being rewritten
    classes: Vec<String>,
    lambda_counts: HashMap<String, u32>,
}

fn nil_chk(expr: Expr) -> Expr {
    let ty = expr.ty.clone();
    Expr::native_call("nil_chk", vec![expr], ty)
}

fn with_label(label: Option<String>, stmt: Stmt) -> Stmt {
    match label {
        Some(label) => {
            let span = stmt.span;
            Stmt::new(StmtKind::Labeled {
                label,
                body: Box::new(stmt),
            })
            .at(span)
        }
        None => stmt,
    }
}

fn super_call(ctor: MethodRef, args: Vec<Expr>) -> Stmt {
    Stmt::new(StmtKind::SuperConstructorCall {
        ctor,
        args,
        outer: None,
        captured: Vec::new(),
        selector: None,
    })
}

fn starts_with_ctor_call(body: &Block) -> bool {
    matches!(
        body.stmts.first().map(|stmt| &stmt.kind),
        Some(StmtKind::SuperConstructorCall { .. } | StmtKind::ThisConstructorCall { .. })
    )
}

fn delegates_to_this(body: &Block) -> bool {
    matches!(
        body.stmts.first().map(|stmt| &stmt.kind),
        Some(StmtKind::ThisConstructorCall { .. })
    )
}

/// Rewrites `this` inside a lambda body to the enclosing instance. Class
/// bodies nested in the lambda keep their own `this`.
struct QualifyThis {
    enclosing: String,
}

impl VisitorMut for QualifyThis {
    fn visit_expr_mut(&mut self, expr: &mut Expr) -> VisitResult {
        if let ExprKind::This { qualifier } = &mut expr.kind {
            if qualifier.is_none() {
                *qualifier = Some(self.enclosing.clone());
            }
        }
        Ok(())
    }

    fn descend_into_types(&self) -> bool {
        false
    }
}

impl Normalizer {
    fn temp(&mut self, prefix: &str, ty: Type) -> VarDecl {
        let id = self.locals.fresh();
        VarDecl::new(id, format!("{}${}", prefix, id.0), ty).with_origin(VarOrigin::Synthetic)
    }

    fn param(&mut self, name: &str, ty: Type) -> VarDecl {
        let id = self.locals.fresh();
        VarDecl::param(id, name, ty)
    }

    fn current_class(&self) -> Option<&String> {
        self.classes.last()
    }

    // ========================================================================
    // Types and members
    // ========================================================================

    fn normalize_type(&mut self, decl: TypeDecl) -> Result<TypeDecl> {
        if let Some(constant) = decl.enum_constants.iter().find(|c| c.body.is_some()) {
            return Err(TranslateError::unsupported(
                format!("enum constant `{}` with a class body", constant.name),
                constant.span,
            ));
        }
        self.classes.push(decl.qualified_name.clone());
        let result = self.normalize_type_body(decl);
        self.classes.pop();
        result
    }

    fn normalize_type_body(&mut self, mut decl: TypeDecl) -> Result<TypeDecl> {
        let members = std::mem::take(&mut decl.members);
        let mut rewritten = Vec::with_capacity(members.len());
        for member in members {
            rewritten.push(match member {
                Member::Field(mut field) => {
                    field.init = field.init.map(|init| self.expr(init)).transpose()?;
                    Member::Field(field)
                }
                Member::Method(method) => Member::Method(self.method(&decl, method)?),
                Member::Initializer(block) => Member::Initializer(self.block(block)?),
                Member::StaticInitializer(block) => Member::StaticInitializer(self.block(block)?),
            });
        }
        decl.members = rewritten;

        for constant in &mut decl.enum_constants {
            let args = std::mem::take(&mut constant.args)
                .into_iter()
                .map(|arg| self.expr(arg))
                .collect::<Result<Vec<_>>>()?;
            constant.args = match &constant.ctor {
                Some(ctor) => pack_varargs(ctor, args, constant.span)?,
                None => args,
            };
        }

        let nested = std::mem::take(&mut decl.nested);
        decl.nested = nested
            .into_iter()
            .map(|mut nested| {
                nested.nesting = Nesting::Member;
                nested
                    .enclosing
                    .get_or_insert_with(|| decl.qualified_name.clone());
                self.normalize_type(nested)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut static_prologue = Vec::new();
        if decl.kind != TypeKind::Interface {
            self.add_constructors(&mut decl);
            if decl.kind == TypeKind::Enum {
                static_prologue = self.lower_enum(&mut decl);
            }
            self.lower_instance_initializers(&mut decl);
        }
        lower_static_initializers(&mut decl, static_prologue);
        Ok(decl)
    }

    fn method(&mut self, decl: &TypeDecl, mut method: MethodDecl) -> Result<MethodDecl> {
        method.thrown.clear();
        if method.modifiers.is_synchronized {
            method.modifiers.is_synchronized = false;
            if let Some(body) = method.body.take() {
                let lock = if method.is_static() {
                    Expr::new(ExprKind::ClassLiteral(decl.as_type()), Type::class(CLASS))
                } else {
                    Expr::this(decl.as_type())
                };
                let span = body.stmts.first().map(|s| s.span).unwrap_or(method.span);
                method.body = Some(Block::new(vec![
                    Stmt::new(StmtKind::Synchronized { lock, body }).at(span)
                ]));
            }
        }
        method.body = method.body.map(|body| self.block(body)).transpose()?;
        Ok(method)
    }

    /// Default constructor when none is declared, and an explicit
    /// superclass constructor call at the head of every constructor that
    /// does not start with one.
    fn add_constructors(&mut self, decl: &mut TypeDecl) {
        if decl.constructors().next().is_none() {
            let visibility = if decl.kind == TypeKind::Enum {
                Visibility::Private
            } else {
                decl.modifiers.visibility
            };
            let mut ctor = MethodDecl::constructor(Vec::new()).with_body(Vec::new());
            ctor.modifiers = Modifiers {
                visibility,
                ..Modifiers::default()
            };
            ctor.span = decl.span;
            decl.members.insert(0, Member::Method(ctor));
        }
        let super_name = decl.superclass_name().unwrap_or(OBJECT).to_string();
        for member in &mut decl.members {
            let Member::Method(method) = member else {
                continue;
            };
            if !method.is_constructor() {
                continue;
            }
            let body = method.body.get_or_insert_with(Block::default);
            if !starts_with_ctor_call(body) {
                body.stmts.insert(
                    0,
                    super_call(MethodRef::constructor(super_name.clone(), Vec::new()), Vec::new()),
                );
            }
        }
    }

    /// Enum constructors take the constant's name and ordinal last and pass
    /// them to the enum base class; constants become static fields created
    /// at class initialization. Returns the creation statements.
    fn lower_enum(&mut self, decl: &mut TypeDecl) -> Vec<Stmt> {
        let qualified = decl.qualified_name.clone();
        let enum_ty = decl.as_type();
        let base_ctor = MethodRef::constructor(ENUM, vec![Type::string(), Type::int()]);

        for member in &mut decl.members {
            let Member::Method(method) = member else {
                continue;
            };
            if !method.is_constructor() {
                continue;
            }
            let name = self.param("__name", Type::string());
            let ordinal = self.param("__ordinal", Type::int());
            let extra = vec![name.reference(), ordinal.reference()];
            let body = method.body.get_or_insert_with(Block::default);
            match body.stmts.first_mut().map(|stmt| &mut stmt.kind) {
                Some(StmtKind::ThisConstructorCall { ctor, args, .. }) => {
                    ctor.params.extend([Type::string(), Type::int()]);
                    args.extend(extra);
                }
                Some(StmtKind::SuperConstructorCall { ctor, args, .. }) => {
                    *ctor = base_ctor.clone();
                    *args = extra;
                }
                _ => body.stmts.insert(0, super_call(base_ctor.clone(), extra)),
            }
            method.params.push(name);
            method.params.push(ordinal);
        }

        let mut creations = Vec::new();
        let mut fields = Vec::new();
        for (ordinal, constant) in decl.enum_constants.iter_mut().enumerate() {
            let mut ctor = constant
                .ctor
                .take()
                .unwrap_or_else(|| MethodRef::constructor(qualified.clone(), Vec::new()));
            ctor.declaring = qualified.clone();
            ctor.is_varargs = false;
            ctor.params.extend([Type::string(), Type::int()]);
            let mut args = std::mem::take(&mut constant.args);
            args.push(Expr::string(constant.name.clone()));
            args.push(Expr::int(ordinal as i64));
            let value = Expr::new(
                ExprKind::New {
                    class: qualified.clone(),
                    ctor,
                    args,
                    outer: None,
                    body: None,
                    captured: Vec::new(),
                    selector: None,
                },
                enum_ty.clone(),
            )
            .at(constant.span);
            let target = Expr::field(
                None,
                FieldRef::new_static(qualified.clone(), constant.name.clone()),
                enum_ty.clone(),
            );
            creations.push(Stmt::expr(Expr::assign(target, value)).at(constant.span));

            let mut field = FieldDecl::new(constant.name.clone(), enum_ty.clone());
            field.modifiers = Modifiers {
                visibility: Visibility::Public,
                is_static: true,
                is_final: true,
                ..Modifiers::default()
            };
            field.span = constant.span;
            fields.push(Member::Field(field));
        }
        decl.members.splice(0..0, fields);
        creations
    }

    /// Move instance field initializers and initializer blocks into the
    /// constructors that do not delegate to `this(...)`. With more than one
    /// such constructor the statements go into a private method called from
    /// each, so nested class bodies in them exist once.
    fn lower_instance_initializers(&mut self, decl: &mut TypeDecl) {
        let qualified = decl.qualified_name.clone();
        let this_ty = decl.as_type();
        let mut inits = Vec::new();
        for member in &mut decl.members {
            match member {
                Member::Field(field) if !field.is_static() => {
                    if let Some(init) = field.init.take() {
                        let target = Expr::field(
                            Some(Expr::this(this_ty.clone())),
                            FieldRef::new(qualified.clone(), field.name.clone()),
                            field.ty.clone(),
                        );
                        inits.push(Stmt::expr(Expr::assign(target, init)).at(field.span));
                    }
                }
                Member::Initializer(block) => {
                    inits.push(Stmt::new(StmtKind::Block(std::mem::take(block))));
                }
                _ => {}
            }
        }
        decl.members
            .retain(|member| !matches!(member, Member::Initializer(_)));
        if inits.is_empty() {
            return;
        }

        let targets = decl
            .constructors()
            .filter(|ctor| !ctor.body.as_ref().is_some_and(delegates_to_this))
            .count();
        let prologue = if targets > 1 {
            let mut init_method = MethodDecl::new(INSTANCE_INIT_METHOD, Vec::new(), Type::Void)
                .with_body(inits)
                .with_modifiers(Modifiers {
                    visibility: Visibility::Private,
                    ..Modifiers::default()
                });
            init_method.span = decl.span;
            let call = Expr::call(
                Some(Expr::this(this_ty.clone())),
                init_method.to_ref(&qualified),
                Vec::new(),
            );
            decl.members.push(Member::Method(init_method));
            vec![Stmt::expr(call)]
        } else {
            inits
        };

        for member in &mut decl.members {
            let Member::Method(method) = member else {
                continue;
            };
            if !method.is_constructor() {
                continue;
            }
            let Some(body) = method.body.as_mut() else {
                continue;
            };
            if delegates_to_this(body) {
                continue;
            }
            let at = if starts_with_ctor_call(body) { 1 } else { 0 };
            body.stmts.splice(at..at, prologue.iter().cloned());
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn block(&mut self, block: Block) -> Result<Block> {
        let stmts = block
            .stmts
            .into_iter()
            .map(|stmt| self.stmt(stmt))
            .collect::<Result<Vec<_>>>()?;
        Ok(Block::new(stmts))
    }

    fn boxed_stmt(&mut self, stmt: Stmt) -> Result<Box<Stmt>> {
        Ok(Box::new(self.stmt(stmt)?))
    }

    fn opt_expr(&mut self, expr: Option<Expr>) -> Result<Option<Expr>> {
        expr.map(|expr| self.expr(expr)).transpose()
    }

    fn exprs(&mut self, exprs: Vec<Expr>) -> Result<Vec<Expr>> {
        exprs.into_iter().map(|expr| self.expr(expr)).collect()
    }

    fn stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let span = stmt.span;
        let kind = match stmt.kind {
            StmtKind::Local { var, init } => StmtKind::Local {
                var,
                init: self.opt_expr(init)?,
            },
            StmtKind::Expr(expr) => StmtKind::Expr(self.expr(expr)?),
            StmtKind::Block(block) => StmtKind::Block(self.block(block)?),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => StmtKind::If {
                cond: self.expr(cond)?,
                then_branch: self.boxed_stmt(*then_branch)?,
                else_branch: match else_branch {
                    Some(stmt) => Some(self.boxed_stmt(*stmt)?),
                    None => None,
                },
            },
            StmtKind::While { cond, body } => StmtKind::While {
                cond: self.expr(cond)?,
                body: self.boxed_stmt(*body)?,
            },
            StmtKind::DoWhile { body, cond } => StmtKind::DoWhile {
                body: self.boxed_stmt(*body)?,
                cond: self.expr(cond)?,
            },
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => StmtKind::For {
                init: init
                    .into_iter()
                    .map(|stmt| self.stmt(stmt))
                    .collect::<Result<Vec<_>>>()?,
                cond: self.opt_expr(cond)?,
                update: self.exprs(update)?,
                body: self.boxed_stmt(*body)?,
            },
            StmtKind::ForEach {
                var,
                iterable,
                body,
            } => return self.foreach(var, iterable, *body, None, span),
            StmtKind::Labeled { label, body } => return self.labeled(label, *body, span),
            kind @ (StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Empty) => kind,
            StmtKind::Return(value) => StmtKind::Return(self.opt_expr(value)?),
            StmtKind::Throw(value) => StmtKind::Throw(self.expr(value)?),
            StmtKind::Try {
                resources,
                body,
                catches,
                finally,
            } => return self.try_stmt(resources, body, catches, finally, span),
            StmtKind::Guarded { body, cleanup } => StmtKind::Guarded {
                body: self.block(body)?,
                cleanup: match cleanup {
                    Cleanup::Finally(block) => Cleanup::Finally(self.block(block)?),
                    release => release,
                },
            },
            StmtKind::Switch { selector, cases } => {
                return self.switch(selector, cases, None, span)
            }
            StmtKind::Synchronized { lock, body } => return self.synchronized(lock, body, span),
            StmtKind::LocalClass(decl) => {
                let mut decl = *decl;
                decl.nesting = Nesting::Local;
                if decl.enclosing.is_none() {
                    decl.enclosing = self.current_class().cloned();
                }
                StmtKind::LocalClass(Box::new(self.normalize_type(decl)?))
            }
            StmtKind::Assert { cond, message } => return self.assert(cond, message, span),
            StmtKind::SuperConstructorCall {
                ctor,
                args,
                outer,
                captured,
                selector,
            } => {
                let args = self.exprs(args)?;
                StmtKind::SuperConstructorCall {
                    args: pack_varargs(&ctor, args, span)?,
                    ctor,
                    outer: self.opt_expr(outer)?,
                    captured,
                    selector,
                }
            }
            StmtKind::ThisConstructorCall {
                ctor,
                args,
                captured,
                selector,
            } => {
                let args = self.exprs(args)?;
                StmtKind::ThisConstructorCall {
                    args: pack_varargs(&ctor, args, span)?,
                    ctor,
                    captured,
                    selector,
                }
            }
        };
        Ok(Stmt { kind, span })
    }

    /// Labels stay on the loop or switch a rewrite produces, not on the
    /// block holding its temporaries.
    fn labeled(&mut self, label: String, body: Stmt, span: Span) -> Result<Stmt> {
        let body_span = body.span;
        match body.kind {
            StmtKind::ForEach {
                var,
                iterable,
                body,
            } => self.foreach(var, iterable, *body, Some(label), body_span),
            StmtKind::Switch { selector, cases } => {
                self.switch(selector, cases, Some(label), body_span)
            }
            kind => {
                let body = self.stmt(Stmt {
                    kind,
                    span: body_span,
                })?;
                Ok(Stmt::new(StmtKind::Labeled {
                    label,
                    body: Box::new(body),
                })
                .at(span))
            }
        }
    }

    fn foreach(
        &mut self,
        mut var: VarDecl,
        iterable: Expr,
        body: Stmt,
        label: Option<String>,
        span: Span,
    ) -> Result<Stmt> {
        let iterable = self.expr(iterable)?;
        let body = self.stmt(body)?;
        var.origin = VarOrigin::LoopElement;
        let int = Type::int();

        if let Some(element_ty) = iterable.ty.element_type().cloned() {
            let array = self.temp("a", iterable.ty.clone());
            let length = self.temp("n", int.clone());
            let index = self.temp("i", int.clone());
            let element = Expr::new(
                ExprKind::ArrayAccess {
                    array: Box::new(array.reference()),
                    index: Box::new(index.reference()),
                },
                element_ty,
            );
            let element = coerce(element, &var.ty);
            let var_span = var.span;
            let loop_body = Stmt::block(vec![Stmt::local(var, Some(element)).at(var_span), body]);
            let for_loop = Stmt::new(StmtKind::For {
                init: vec![Stmt::local(index.clone(), Some(Expr::int(0)))],
                cond: Some(Expr::binary(
                    BinaryOp::Lt,
                    index.reference(),
                    length.reference(),
                    Type::boolean(),
                )),
                update: vec![Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::PreInc,
                        operand: Box::new(index.reference()),
                    },
                    int.clone(),
                )],
                body: Box::new(loop_body),
            })
            .at(span);
            let array_ref = array.reference();
            return Ok(Stmt::block(vec![
                Stmt::local(array, Some(nil_chk(iterable))),
                Stmt::local(
                    length,
                    Some(Expr::new(ExprKind::ArrayLength(Box::new(array_ref)), int)),
                ),
                with_label(label, for_loop),
            ])
            .at(span));
        }

        let iterator_ty = Type::class(ITERATOR);
        let iterator = self.temp("it", iterator_ty.clone());
        let declaring = iterable.ty.class_name().unwrap_or(ITERABLE).to_string();
        let start = Expr::call(
            Some(nil_chk(iterable)),
            MethodRef::new(declaring, "iterator", Vec::new(), iterator_ty),
            Vec::new(),
        );
        let has_next = Expr::call(
            Some(iterator.reference()),
            MethodRef::new(ITERATOR, "hasNext", Vec::new(), Type::boolean()),
            Vec::new(),
        );
        let next = Expr::call(
            Some(iterator.reference()),
            MethodRef::new(ITERATOR, "next", Vec::new(), Type::object()),
            Vec::new(),
        );
        let element = coerce(next, &var.ty);
        let var_span = var.span;
        let loop_body = Stmt::block(vec![Stmt::local(var, Some(element)).at(var_span), body]);
        let for_loop = Stmt::new(StmtKind::For {
            init: vec![Stmt::local(iterator, Some(start))],
            cond: Some(has_next),
            update: Vec::new(),
            body: Box::new(loop_body),
        })
        .at(span);
        Ok(with_label(label, for_loop))
    }

    fn try_stmt(
        &mut self,
        resources: Vec<Resource>,
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
        span: Span,
    ) -> Result<Stmt> {
        let mut body = self.block(body)?;
        if !resources.is_empty() {
            body = Block::new(vec![self.resources(resources, body)?.at(span)]);
        }

        let mut clauses = Vec::with_capacity(catches.len());
        for mut clause in catches {
            if clause.types.is_empty() {
                return Err(TranslateError::unsupported(
                    "catch clause without an exception type",
                    clause.var.span,
                ));
            }
            clause.var.origin = VarOrigin::CatchParameter;
            clause.body = self.block(clause.body)?;
            clauses.push(clause);
        }
        if clauses.iter().any(|clause| clause.types.len() > 1) {
            clauses = vec![self.merge_catches(clauses)];
        }

        let core = if clauses.is_empty() {
            Stmt::new(StmtKind::Block(body)).at(span)
        } else {
            Stmt::new(StmtKind::Try {
                resources: Vec::new(),
                body,
                catches: clauses,
                finally: None,
            })
            .at(span)
        };
        match finally {
            Some(finally) => {
                let finally = self.block(finally)?;
                Ok(Stmt::guarded(vec![core], Cleanup::Finally(finally)).at(span))
            }
            None => Ok(core),
        }
    }

    /// Each resource is declared, then guards everything after it; cleanups
    /// therefore run innermost first, in reverse declaration order.
    fn resources(&mut self, resources: Vec<Resource>, body: Block) -> Result<Stmt> {
        let mut inner = body;
        for Resource { mut var, init } in resources.into_iter().rev() {
            var.origin = VarOrigin::Resource;
            let init = self.expr(init)?;
            let declaring = var.ty.class_name().unwrap_or(AUTO_CLOSEABLE).to_string();
            let close = Expr::call(
                Some(var.reference()),
                MethodRef::new(declaring, "close", Vec::new(), Type::Void),
                Vec::new(),
            );
            let not_null = Expr::binary(BinaryOp::Ne, var.reference(), Expr::null(), Type::boolean());
            let cleanup = Block::new(vec![Stmt::if_then(not_null, Stmt::expr(close), None)]);
            let span = var.span;
            inner = Block::new(vec![
                Stmt::local(var, Some(init)).at(span),
                Stmt::guarded(inner.stmts, Cleanup::Finally(cleanup)),
            ]);
        }
        Ok(Stmt::new(StmtKind::Block(inner)))
    }

    /// One catch of the root throwable type dispatching with `instanceof`
    /// in clause order; unmatched exceptions are rethrown.
    fn merge_catches(&mut self, clauses: Vec<CatchClause>) -> CatchClause {
        let throwable_ty = Type::class(THROWABLE);
        let caught = self
            .temp("t", throwable_ty.clone())
            .with_origin(VarOrigin::CatchParameter);
        let mut chain = Stmt::throw(caught.reference());
        for clause in clauses.into_iter().rev() {
            let test = clause
                .types
                .iter()
                .map(|ty| Expr::instance_of(caught.reference(), ty.clone()))
                .reduce(|lhs, rhs| Expr::binary(BinaryOp::Or, lhs, rhs, Type::boolean()))
                .unwrap_or_else(|| Expr::boolean(true));
            let var_ty = clause.var.ty.clone();
            let var_span = clause.var.span;
            let mut body = vec![
                Stmt::local(clause.var, Some(Expr::cast(caught.reference(), var_ty))).at(var_span),
            ];
            body.extend(clause.body.stmts);
            chain = Stmt::if_then(test, Stmt::block(body), Some(chain));
        }
        CatchClause {
            var: caught,
            types: vec![throwable_ty],
            body: Block::new(vec![chain]),
        }
    }

    fn switch(
        &mut self,
        selector: Expr,
        cases: Vec<SwitchCase>,
        label: Option<String>,
        span: Span,
    ) -> Result<Stmt> {
        let selector = self.expr(selector)?;
        let mut normalized = Vec::with_capacity(cases.len());
        for case in cases {
            normalized.push(SwitchCase {
                labels: self.exprs(case.labels)?,
                body: case
                    .body
                    .into_iter()
                    .map(|stmt| self.stmt(stmt))
                    .collect::<Result<Vec<_>>>()?,
            });
        }
        let cases = normalized;

        match &selector.ty {
            Type::Primitive(prim) if prim.is_switchable() => Ok(with_label(
                label,
                Stmt::new(StmtKind::Switch { selector, cases }).at(span),
            )),
            ty if ty.is_string() => self.string_switch(selector, cases, label, span),
            Type::Class { name, .. } => {
                if let Some(prim) = PrimitiveType::from_boxed(name).filter(|p| p.is_switchable()) {
                    let selector = unbox(nil_chk(selector), prim);
                    return Ok(with_label(
                        label,
                        Stmt::new(StmtKind::Switch { selector, cases }).at(span),
                    ));
                }
                enum_switch(selector, cases, label, span)
            }
            other => Err(TranslateError::unsupported(
                format!("switch on a value of type `{}`", other),
                selector.span,
            )),
        }
    }

    /// `switch (s)` on strings: an `equals` chain computes the case index,
    /// then an integer switch dispatches on it.
    fn string_switch(
        &mut self,
        selector: Expr,
        cases: Vec<SwitchCase>,
        label: Option<String>,
        span: Span,
    ) -> Result<Stmt> {
        let value = self.temp("s", Type::string());
        let index = self.temp("idx", Type::int());
        let mut strings: Vec<String> = Vec::new();
        let mut int_cases = Vec::with_capacity(cases.len());
        for case in cases {
            let mut labels = Vec::with_capacity(case.labels.len());
            for case_label in case.labels {
                let ExprKind::Literal(Literal::String(text)) = &case_label.kind else {
                    return Err(TranslateError::unsupported(
                        "non-constant label in a string switch",
                        case_label.span,
                    ));
                };
                labels.push(Expr::int(strings.len() as i64).at(case_label.span));
                strings.push(text.clone());
            }
            int_cases.push(SwitchCase {
                labels,
                body: case.body,
            });
        }

        let equals = MethodRef::new(STRING, "equals", vec![Type::object()], Type::boolean());
        let mut chain: Option<Stmt> = None;
        for (i, text) in strings.iter().enumerate().rev() {
            let test = Expr::call(
                Some(value.reference()),
                equals.clone(),
                vec![Expr::string(text.clone())],
            );
            let assign = Stmt::expr(Expr::assign(index.reference(), Expr::int(i as i64)));
            chain = Some(Stmt::if_then(test, assign, chain));
        }

        let mut stmts = vec![
            Stmt::local(value, Some(nil_chk(selector))),
            Stmt::local(index.clone(), Some(Expr::int(-1))),
        ];
        stmts.extend(chain);
        stmts.push(with_label(
            label,
            Stmt::new(StmtKind::Switch {
                selector: index.reference(),
                cases: int_cases,
            })
            .at(span),
        ));
        Ok(Stmt::block(stmts).at(span))
    }

    fn synchronized(&mut self, lock: Expr, body: Block, span: Span) -> Result<Stmt> {
        let lock = self.expr(lock)?;
        let body = self.block(body)?;
        let monitor = self.temp("lock", Type::object());
        let enter = Expr::native_call("objc_sync_enter", vec![monitor.reference()], Type::int());
        let exit = Expr::native_call("objc_sync_exit", vec![monitor.reference()], Type::int());
        Ok(Stmt::block(vec![
            Stmt::local(monitor, Some(nil_chk(lock))),
            Stmt::expr(enter),
            Stmt::guarded(body.stmts, Cleanup::Finally(Block::new(vec![Stmt::expr(exit)]))),
        ])
        .at(span))
    }

    fn assert(&mut self, cond: Expr, message: Option<Expr>, span: Span) -> Result<Stmt> {
        let cond = self.expr(cond)?;
        let message = self.opt_expr(message)?;
        let (params, args) = match message {
            Some(message) => {
                let param = if message.ty.is_primitive() {
                    message.ty.clone()
                } else {
                    Type::object()
                };
                (vec![param], vec![message])
            }
            None => (Vec::new(), Vec::new()),
        };
        let error = Expr::new_object(ASSERTION_ERROR, params, args).at(span);
        Ok(Stmt::if_then(Expr::not(cond), Stmt::throw(error), None).at(span))
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn boxed(&mut self, expr: Expr) -> Result<Box<Expr>> {
        Ok(Box::new(self.expr(expr)?))
    }

    fn expr(&mut self, expr: Expr) -> Result<Expr> {
        let Expr { kind, ty, span } = expr;
        let kind = match kind {
            kind @ (ExprKind::Literal(_)
            | ExprKind::Local(_)
            | ExprKind::This { .. }
            | ExprKind::ClassLiteral(_)
            | ExprKind::EnumOrdinal { .. }) => kind,
            ExprKind::MethodReference { target, name } => {
                return Err(TranslateError::unsupported(
                    format!("method reference `{}::{}`", target, name),
                    span,
                ))
            }
            ExprKind::FieldAccess { target, field } => ExprKind::FieldAccess {
                target: match target {
                    Some(target) => Some(self.boxed(*target)?),
                    None => None,
                },
                field,
            },
            ExprKind::ArrayAccess { array, index } => ExprKind::ArrayAccess {
                array: self.boxed(*array)?,
                index: self.boxed(*index)?,
            },
            ExprKind::ArrayLength(inner) => ExprKind::ArrayLength(self.boxed(*inner)?),
            ExprKind::Cast(inner) => ExprKind::Cast(self.boxed(*inner)?),
            ExprKind::Retain(inner) => ExprKind::Retain(self.boxed(*inner)?),
            ExprKind::Autorelease(inner) => ExprKind::Autorelease(self.boxed(*inner)?),
            ExprKind::MethodCall {
                target,
                method,
                args,
                is_super,
                selector,
            } => {
                let target = match target {
                    Some(target) => Some(self.boxed(*target)?),
                    None => None,
                };
                let args = self.exprs(args)?;
                ExprKind::MethodCall {
                    target,
                    args: pack_varargs(&method, args, span)?,
                    method,
                    is_super,
                    selector,
                }
            }
            ExprKind::New {
                class,
                ctor,
                args,
                outer,
                body,
                captured,
                selector,
            } => {
                let args = self.exprs(args)?;
                let args = pack_varargs(&ctor, args, span)?;
                let outer = match outer {
                    Some(outer) => Some(self.boxed(*outer)?),
                    None => None,
                };
                if let Some(body) = body {
                    return self.anonymous(ctor, args, outer, *body, ty, span);
                }
                ExprKind::New {
                    class,
                    ctor,
                    args,
                    outer,
                    body: None,
                    captured,
                    selector,
                }
            }
            ExprKind::NewArray {
                element,
                dims,
                init,
            } => ExprKind::NewArray {
                element,
                dims: self.exprs(dims)?,
                init: init.map(|init| self.exprs(init)).transpose()?,
            },
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op,
                operand: self.boxed(*operand)?,
            },
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op,
                lhs: self.boxed(*lhs)?,
                rhs: self.boxed(*rhs)?,
            },
            ExprKind::Assign {
                op,
                target,
                value,
                mode,
            } => {
                let target = self.boxed(*target)?;
                let value = self.boxed(*value)?;
                match op {
                    Some(op) if target.ty.is_string() => string_compound_assign(op, target, value, span)?,
                    op => ExprKind::Assign {
                        op,
                        target,
                        value,
                        mode,
                    },
                }
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => ExprKind::Conditional {
                cond: self.boxed(*cond)?,
                then_expr: self.boxed(*then_expr)?,
                else_expr: self.boxed(*else_expr)?,
            },
            ExprKind::InstanceOf { expr, test } => ExprKind::InstanceOf {
                expr: self.boxed(*expr)?,
                test,
            },
            ExprKind::Lambda {
                params,
                body,
                method,
            } => return self.lambda(params, body, method, ty, span),
            ExprKind::NativeCall { function, args } => ExprKind::NativeCall {
                function,
                args: self.exprs(args)?,
            },
        };
        Ok(Expr { kind, ty, span })
    }

    /// An anonymous class gets a constructor that forwards the superclass
    /// constructor's arguments; the instantiation then calls that
    /// constructor.
    fn anonymous(
        &mut self,
        super_ctor: MethodRef,
        args: Vec<Expr>,
        outer: Option<Box<Expr>>,
        mut decl: TypeDecl,
        ty: Type,
        span: Span,
    ) -> Result<Expr> {
        decl.nesting = Nesting::Anonymous;
        decl.name.clear();
        if decl.enclosing.is_none() {
            decl.enclosing = self.current_class().cloned();
        }
        let super_ctor = match &decl.superclass {
            Some(_) => MethodRef {
                is_varargs: false,
                ..super_ctor
            },
            None => MethodRef::constructor(OBJECT, Vec::new()),
        };

        let mut params = Vec::new();
        let mut outer_param = None;
        let mut args = args;
        if let Some(outer) = outer {
            let param = self.param("outer$super", outer.ty.clone());
            outer_param = Some(param.reference());
            params.push(param);
            args.insert(0, *outer);
        }
        let forwarded: Vec<VarDecl> = super_ctor
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| self.param(&format!("arg${}", i), ty.clone()))
            .collect();
        let super_args = forwarded.iter().map(VarDecl::reference).collect();
        params.extend(forwarded);

        let param_types: Vec<Type> = params.iter().map(|p| p.ty.clone()).collect();
        let mut ctor = MethodDecl::constructor(params).with_body(vec![Stmt::new(
            StmtKind::SuperConstructorCall {
                ctor: super_ctor,
                args: super_args,
                outer: outer_param,
                captured: Vec::new(),
                selector: None,
            },
        )]);
        ctor.modifiers = Modifiers::default();
        ctor.span = span;
        decl.members.insert(0, Member::Method(ctor));

        let decl = self.normalize_type(decl)?;
        let class = decl.qualified_name.clone();
        Ok(Expr {
            kind: ExprKind::New {
                ctor: MethodRef::constructor(class.clone(), param_types),
                class,
                args,
                outer: None,
                body: Some(Box::new(decl)),
                captured: Vec::new(),
                selector: None,
            },
            ty,
            span,
        })
    }

    /// A lambda becomes an anonymous class implementing its functional
    /// interface. `this` in the body keeps meaning the enclosing instance.
    fn lambda(
        &mut self,
        params: Vec<VarDecl>,
        body: LambdaBody,
        method: MethodRef,
        ty: Type,
        span: Span,
    ) -> Result<Expr> {
        let Some(enclosing) = self.current_class().cloned() else {
            return Err(TranslateError::unsupported("lambda outside of a class", span));
        };
        if params.len() != method.params.len() {
            return Err(TranslateError::unsupported(
                format!(
                    "lambda with {} parameters for `{}` taking {}",
                    params.len(),
                    method.name,
                    method.params.len()
                ),
                span,
            ));
        }
        let count = self.lambda_counts.entry(enclosing.clone()).or_insert(0);
        *count += 1;
        let key = format!("{}$$Lambda${}", enclosing, count);

        let mut stmts = match body {
            LambdaBody::Expr(expr) if method.return_type.is_void() => vec![Stmt::expr(*expr)],
            LambdaBody::Expr(expr) => {
                let span = expr.span;
                vec![Stmt::ret(Some(*expr)).at(span)]
            }
            LambdaBody::Block(block) => block.stmts,
        };
        let mut qualify = QualifyThis {
            enclosing: enclosing.clone(),
        };
        for stmt in &mut stmts {
            walk_stmt_mut(&mut qualify, stmt)?;
        }

        let mut method_params = Vec::with_capacity(params.len());
        let mut prologue = Vec::new();
        for (mut param, iface_ty) in params.into_iter().zip(&method.params) {
            if param.ty.erasure() == iface_ty.erasure() {
                param.origin = VarOrigin::Parameter;
                method_params.push(param);
            } else {
                let raw = self.param(&format!("{}$raw", param.name), iface_ty.clone());
                let value = coerce(raw.reference(), &param.ty);
                param.origin = VarOrigin::Local;
                prologue.push(Stmt::local(param, Some(value)));
                method_params.push(raw);
            }
        }
        prologue.extend(stmts);

        let mut implementation =
            MethodDecl::new(method.name.clone(), method_params, method.return_type.clone())
                .with_body(prologue);
        implementation.span = span;

        let mut decl = TypeDecl::new(TypeKind::Class, key.clone());
        decl.name.clear();
        decl.nesting = Nesting::Anonymous;
        decl.modifiers = Modifiers::default();
        decl.enclosing = Some(enclosing);
        decl.interfaces = vec![Type::class(method.declaring.clone())];
        decl.members.push(Member::Method(implementation));
        decl.span = span;

        let new_expr = Expr {
            kind: ExprKind::New {
                class: key,
                ctor: MethodRef::constructor(OBJECT, Vec::new()),
                args: Vec::new(),
                outer: None,
                body: Some(Box::new(decl)),
                captured: Vec::new(),
                selector: None,
            },
            ty,
            span,
        };
        self.expr(new_expr)
    }
}

/// Name of the private method holding instance initializers shared by
/// several constructors.
pub const INSTANCE_INIT_METHOD: &str = "instanceInit$";

fn lower_static_initializers(decl: &mut TypeDecl, prologue: Vec<Stmt>) {
    let qualified = decl.qualified_name.clone();
    let mut stmts = prologue;
    for member in &mut decl.members {
        match member {
            Member::Field(field) if field.is_static() && !field.is_compile_time_constant() => {
                if let Some(init) = field.init.take() {
                    let target = Expr::field(
                        None,
                        FieldRef::new_static(qualified.clone(), field.name.clone()),
                        field.ty.clone(),
                    );
                    stmts.push(Stmt::expr(Expr::assign(target, init)).at(field.span));
                }
            }
            Member::StaticInitializer(block) => {
                stmts.push(Stmt::new(StmtKind::Block(std::mem::take(block))));
            }
            _ => {}
        }
    }
    decl.members
        .retain(|member| !matches!(member, Member::StaticInitializer(_)));
    if !stmts.is_empty() {
        decl.members.push(Member::StaticInitializer(Block::new(stmts)));
    }
}

/// Pack trailing arguments of a varargs call into an explicit array,
/// unless the call already passes an array (or `null`) in that position.
fn pack_varargs(method: &MethodRef, mut args: Vec<Expr>, span: Span) -> Result<Vec<Expr>> {
    if !method.is_varargs {
        return Ok(args);
    }
    let malformed = || {
        TranslateError::unsupported(
            format!("malformed varargs call to `{}`", method.name),
            span,
        )
    };
    let fixed = method.params.len().checked_sub(1).ok_or_else(malformed)?;
    let vararg_ty = &method.params[fixed];
    let element = vararg_ty.element_type().ok_or_else(malformed)?;
    if args.len() < fixed {
        return Err(malformed());
    }
    if args.len() == fixed + 1 {
        let last = &args[fixed];
        let passes_array = match last.ty.element_type() {
            Some(passed) => {
                last.ty.erasure() == vararg_ty.erasure()
                    || (passed.is_reference() && element.is_reference())
            }
            None => false,
        };
        if last.is_null_literal() || passes_array {
            return Ok(args);
        }
    }
    let rest = args.split_off(fixed);
    let span = rest
        .iter()
        .map(|arg| arg.span)
        .reduce(|a, b| a.merge(&b))
        .unwrap_or(span);
    args.push(
        Expr::new(
            ExprKind::NewArray {
                element: element.clone(),
                dims: Vec::new(),
                init: Some(rest),
            },
            vararg_ty.clone(),
        )
        .at(span),
    );
    Ok(args)
}

fn unbox(expr: Expr, prim: PrimitiveType) -> Expr {
    let boxed = prim.boxed_class();
    let receiver = if expr.ty.class_name() == Some(boxed) {
        expr
    } else {
        Expr::cast(expr, Type::class(boxed))
    };
    Expr::call(
        Some(receiver),
        MethodRef::new(boxed, prim.unbox_method(), Vec::new(), Type::Primitive(prim)),
        Vec::new(),
    )
}

/// Convert an element value read from an array or iterator to the loop
/// variable's type.
fn coerce(expr: Expr, target: &Type) -> Expr {
    match target {
        Type::Primitive(prim) if expr.ty.is_reference() => unbox(expr, *prim),
        _ if expr.ty.erasure() == target.erasure() || target.class_name() == Some(OBJECT) => expr,
        _ => Expr::cast(expr, target.clone()),
    }
}

/// `s += x` on strings becomes `s = s + x` when evaluating the target twice
/// has no side effects.
fn string_compound_assign(
    op: BinaryOp,
    target: Box<Expr>,
    value: Box<Expr>,
    span: Span,
) -> Result<ExprKind> {
    let simple = match &target.kind {
        ExprKind::Local(_) => true,
        ExprKind::FieldAccess { target, .. } => match target {
            None => true,
            Some(inner) => matches!(inner.kind, ExprKind::This { .. } | ExprKind::Local(_)),
        },
        _ => false,
    };
    if op != BinaryOp::Add || !simple {
        return Err(TranslateError::unsupported(
            "compound string assignment to a computed target",
            span,
        ));
    }
    let concat = Expr::binary(BinaryOp::Add, (*target).clone(), *value, Type::string()).at(span);
    Ok(ExprKind::Assign {
        op: None,
        target,
        value: Box::new(concat),
        mode: AssignMode::Plain,
    })
}

/// Enum switches dispatch on the constant ordinal.
fn enum_switch(
    selector: Expr,
    cases: Vec<SwitchCase>,
    label: Option<String>,
    span: Span,
) -> Result<Stmt> {
    let mut rewritten = Vec::with_capacity(cases.len());
    for case in cases {
        let mut labels = Vec::with_capacity(case.labels.len());
        for case_label in case.labels {
            let ExprKind::FieldAccess { field, .. } = &case_label.kind else {
                return Err(TranslateError::unsupported(
                    format!("switch on a value of type `{}`", selector.ty),
                    selector.span,
                ));
            };
            labels.push(
                Expr::new(
                    ExprKind::EnumOrdinal {
                        enum_type: field.declaring.clone(),
                        constant: field.name.clone(),
                    },
                    Type::int(),
                )
                .at(case_label.span),
            );
        }
        rewritten.push(SwitchCase {
            labels,
            body: case.body,
        });
    }
    let ordinal = Expr::call(
        Some(nil_chk(selector)),
        MethodRef::new(ENUM, "ordinal", Vec::new(), Type::int()),
        Vec::new(),
    );
    Ok(with_label(
        label,
        Stmt::new(StmtKind::Switch {
            selector: ordinal,
            cases: rewritten,
        })
        .at(span),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::{check, Level};
    use crate::errors::Stage;

    fn unit_with_method(stmts: Vec<Stmt>) -> CompilationUnit {
        let mut unit = CompilationUnit::new("p/A.java", Some("p"));
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A");
        decl.members.push(Member::Method(
            MethodDecl::new("f", vec![], Type::Void).with_body(stmts),
        ));
        unit.types.push(decl);
        unit
    }

    fn method_body<'a>(unit: &'a CompilationUnit, name: &str) -> &'a Block {
        unit.types[0]
            .methods()
            .find(|m| m.name == name)
            .and_then(|m| m.body.as_ref())
            .unwrap()
    }

    #[test]
    fn test_varargs_packing() {
        let method = MethodRef {
            is_varargs: true,
            ..MethodRef::new("p.A", "g", vec![Type::int(), Type::array(Type::string())], Type::Void)
        };
        let packed = pack_varargs(
            &method,
            vec![Expr::int(1), Expr::string("a"), Expr::string("b")],
            Span::default(),
        )
        .unwrap();
        assert_eq!(packed.len(), 2);
        let ExprKind::NewArray { init: Some(init), .. } = &packed[1].kind else {
            panic!("expected packed array");
        };
        assert_eq!(init.len(), 2);

        let passthrough = pack_varargs(
            &method,
            vec![Expr::int(1), Expr::local(LocalId(3), Type::array(Type::string()))],
            Span::default(),
        )
        .unwrap();
        assert!(matches!(passthrough[1].kind, ExprKind::Local(_)));

        let null = pack_varargs(&method, vec![Expr::int(1), Expr::null()], Span::default()).unwrap();
        assert!(null[1].is_null_literal());

        let empty = pack_varargs(&method, vec![Expr::int(1)], Span::default()).unwrap();
        assert!(matches!(&empty[1].kind, ExprKind::NewArray { init: Some(init), .. } if init.is_empty()));

        assert!(pack_varargs(&method, vec![], Span::default()).is_err());
    }

    #[test]
    fn test_default_constructor_and_explicit_super() {
        let unit = normalize(unit_with_method(vec![])).unwrap();
        let ctor = unit.types[0].constructors().next().unwrap();
        let body = ctor.body.as_ref().unwrap();
        assert!(matches!(
            &body.stmts[0].kind,
            StmtKind::SuperConstructorCall { ctor, .. } if ctor.declaring == OBJECT
        ));
    }

    #[test]
    fn test_field_initializers_move_into_constructor() {
        let mut unit = unit_with_method(vec![]);
        unit.types[0]
            .members
            .push(Member::Field(FieldDecl::new("x", Type::int()).with_init(Expr::int(4))));
        let unit = normalize(unit).unwrap();
        let decl = &unit.types[0];
        assert!(decl.field("x").unwrap().init.is_none());
        let body = decl.constructors().next().unwrap().body.as_ref().unwrap();
        assert_eq!(body.stmts.len(), 2);
        assert!(matches!(&body.stmts[1].kind, StmtKind::Expr(e) if matches!(e.kind, ExprKind::Assign { .. })));
        check(&unit, Level::Normalized, Stage::Flatten).unwrap();
    }

    #[test]
    fn test_initializers_shared_by_two_constructors_go_through_a_method() {
        let mut unit = unit_with_method(vec![]);
        let decl = &mut unit.types[0];
        decl.members
            .push(Member::Field(FieldDecl::new("x", Type::int()).with_init(Expr::int(4))));
        decl.members
            .push(Member::Method(MethodDecl::constructor(vec![]).with_body(vec![])));
        decl.members.push(Member::Method(
            MethodDecl::constructor(vec![VarDecl::param(LocalId(0), "y", Type::int())])
                .with_body(vec![]),
        ));
        let unit = normalize(unit).unwrap();
        let decl = &unit.types[0];
        assert!(decl.methods().any(|m| m.name == INSTANCE_INIT_METHOD));
        for ctor in decl.constructors() {
            let body = ctor.body.as_ref().unwrap();
            assert!(matches!(
                &body.stmts[1].kind,
                StmtKind::Expr(e) if matches!(&e.kind, ExprKind::MethodCall { method, .. } if method.name == INSTANCE_INIT_METHOD)
            ));
        }
    }

    #[test]
    fn test_static_initializers_merge() {
        let mut unit = unit_with_method(vec![]);
        let decl = &mut unit.types[0];
        let mut constant = FieldDecl::new("K", Type::int()).with_init(Expr::int(1));
        constant.modifiers.is_static = true;
        constant.modifiers.is_final = true;
        let mut counter = FieldDecl::new("n", Type::int()).with_init(Expr::int(2));
        counter.modifiers.is_static = true;
        decl.members.push(Member::Field(constant));
        decl.members.push(Member::Field(counter));
        decl.members.push(Member::StaticInitializer(Block::new(vec![Stmt::new(
            StmtKind::Empty,
        )])));
        let unit = normalize(unit).unwrap();
        let decl = &unit.types[0];
        assert!(decl.field("K").unwrap().init.is_some());
        assert!(decl.field("n").unwrap().init.is_none());
        let statics: Vec<_> = decl
            .members
            .iter()
            .filter(|m| matches!(m, Member::StaticInitializer(_)))
            .collect();
        assert_eq!(statics.len(), 1);
        let Member::StaticInitializer(block) = statics[0] else {
            unreachable!()
        };
        assert_eq!(block.stmts.len(), 2);
    }

    #[test]
    fn test_assert_becomes_throw() {
        let unit = normalize(unit_with_method(vec![Stmt::new(StmtKind::Assert {
            cond: Expr::boolean(false),
            message: Some(Expr::string("boom")),
        })]))
        .unwrap();
        let body = method_body(&unit, "f");
        let StmtKind::If { then_branch, .. } = &body.stmts[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(
            &then_branch.kind,
            StmtKind::Throw(e) if matches!(&e.kind, ExprKind::New { class, .. } if class == ASSERTION_ERROR)
        ));
    }

    #[test]
    fn test_method_reference_is_unsupported() {
        let reference = Expr::new(
            ExprKind::MethodReference {
                target: "p.A".into(),
                name: "run".into(),
            },
            Type::class("java.lang.Runnable"),
        )
        .at(Span::new(10, 16));
        let err = normalize(unit_with_method(vec![Stmt::expr(reference)])).unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedConstruct { span, .. } if span == Span::new(10, 16)));
    }

    #[test]
    fn test_switch_on_long_is_unsupported() {
        let selector = Expr::local(LocalId(0), Type::Primitive(PrimitiveType::Long));
        let err = normalize(unit_with_method(vec![Stmt::new(StmtKind::Switch {
            selector,
            cases: vec![],
        })]))
        .unwrap_err();
        assert!(err.to_string().contains("long"));
    }

    #[test]
    fn test_synchronized_method_locks_this() {
        let mut unit = unit_with_method(vec![]);
        if let Member::Method(m) = &mut unit.types[0].members[0] {
            m.modifiers.is_synchronized = true;
        }
        let unit = normalize(unit).unwrap();
        let body = method_body(&unit, "f");
        let StmtKind::Block(block) = &body.stmts[0].kind else {
            panic!("expected lowered block");
        };
        assert!(matches!(
            &block.stmts[1].kind,
            StmtKind::Expr(e) if matches!(&e.kind, ExprKind::NativeCall { function, .. } if function == "objc_sync_enter")
        ));
        assert!(matches!(block.stmts[2].kind, StmtKind::Guarded { .. }));
        check(&unit, Level::Normalized, Stage::Flatten).unwrap();
    }

    #[test]
    fn test_lambda_this_refers_to_enclosing_instance() {
        let method = MethodRef::new("java.lang.Runnable", "run", vec![], Type::Void);
        let call = Expr::call(
            Some(Expr::this(Type::class("p.A"))),
            MethodRef::new("p.A", "f", vec![], Type::Void),
            vec![],
        );
        let lambda = Expr::new(
            ExprKind::Lambda {
                params: vec![],
                body: LambdaBody::Expr(Box::new(call)),
                method,
            },
            Type::class("java.lang.Runnable"),
        );
        let unit = normalize(unit_with_method(vec![Stmt::expr(lambda)])).unwrap();
        let body = method_body(&unit, "f");
        let StmtKind::Expr(new_expr) = &body.stmts[0].kind else {
            panic!("expected expression");
        };
        let ExprKind::New { body: Some(decl), class, .. } = &new_expr.kind else {
            panic!("expected anonymous class");
        };
        assert_eq!(class, "p.A$$Lambda$1");
        assert_eq!(decl.nesting, Nesting::Anonymous);
        assert_eq!(decl.interfaces, vec![Type::class("java.lang.Runnable")]);
        let run = decl.methods().find(|m| m.name == "run").unwrap();
        let StmtKind::Expr(call) = &run.body.as_ref().unwrap().stmts[0].kind else {
            panic!("expected call");
        };
        let ExprKind::MethodCall { target: Some(target), .. } = &call.kind else {
            panic!("expected method call");
        };
        assert_eq!(
            target.kind,
            ExprKind::This {
                qualifier: Some("p.A".into())
            }
        );
        assert!(decl.constructors().next().is_some());
    }
}
