//! Entry checks that each stage runs on the unit it receives.
//!
//! A stage relies on every earlier stage having done its job. Anything an
//! earlier stage should have removed or filled in is reported as an
//! `InternalInvariantViolation` tagged with the checking stage, never as a
//! user error.

use crate::ast::*;
use crate::errors::{Stage, TranslateError};
use crate::visit::{walk_unit, Visitor};

/// How far along the pipeline a unit is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Normalized,
    Flattened,
    Resolved,
    Annotated,
}

struct Checker {
    stage: Stage,
    level: Level,
    violation: Option<TranslateError>,
}

impl Checker {
    fn fail(&mut self, message: String, span: Span) {
        if self.violation.is_none() {
            self.violation = Some(TranslateError::internal(self.stage, message, span));
        }
    }

    fn at_least(&self, level: Level) -> bool {
        self.level >= level
    }

    fn check_member(&mut self, decl: &TypeDecl, member: &Member) {
        match member {
            Member::Initializer(_) => self.fail(
                format!("instance initializer left in `{}`", decl.qualified_name),
                decl.span,
            ),
            Member::Field(field) => {
                if field.init.is_some() && !field.is_compile_time_constant() {
                    self.fail(
                        format!("field initializer left on `{}.{}`", decl.qualified_name, field.name),
                        field.span,
                    );
                }
                if self.at_least(Level::Resolved) && field.native_name.is_none() {
                    self.fail(format!("field `{}` has no native name", field.name), field.span);
                }
                if self.at_least(Level::Annotated) && field.ownership.is_none() {
                    self.fail(format!("field `{}` has no ownership qualifier", field.name), field.span);
                }
            }
            Member::Method(method) => {
                if !method.thrown.is_empty() {
                    self.fail(format!("checked exceptions left on `{}`", method.name), method.span);
                }
                if method.modifiers.is_synchronized {
                    self.fail(format!("synchronized method `{}` not lowered", method.name), method.span);
                }
                if self.at_least(Level::Resolved) && method.selector.is_none() {
                    self.fail(format!("method `{}` has no selector", method.name), method.span);
                }
            }
            Member::StaticInitializer(_) => {}
        }
    }
}

impl Visitor for Checker {
    fn visit_type(&mut self, decl: &TypeDecl) -> bool {
        if self.at_least(Level::Flattened) {
            if !decl.nested.is_empty() || decl.nesting != Nesting::TopLevel {
                self.fail(
                    format!("nested type `{}` was not hoisted", decl.qualified_name),
                    decl.span,
                );
            }
            if decl.binary_name.is_none() {
                self.fail(format!("`{}` has no binary name", decl.qualified_name), decl.span);
            }
        }
        if self.at_least(Level::Resolved) && decl.flat_name.is_none() {
            self.fail(format!("`{}` has no native name", decl.qualified_name), decl.span);
        }
        if decl.enum_constants.iter().any(|constant| constant.body.is_some()) {
            self.fail(
                format!("enum constant body left in `{}`", decl.qualified_name),
                decl.span,
            );
        }
        for member in &decl.members {
            self.check_member(decl, member);
        }
        self.violation.is_none()
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
        let leftover = match &stmt.kind {
            StmtKind::ForEach { .. } => Some("enhanced for"),
            StmtKind::Try {
                resources, finally, ..
            } if !resources.is_empty() || finally.is_some() => Some("try with resources or finally"),
            StmtKind::Try { catches, .. } if catches.iter().any(|c| c.types.len() != 1) => {
                Some("multi-catch")
            }
            StmtKind::Synchronized { .. } => Some("synchronized block"),
            StmtKind::Assert { .. } => Some("assert"),
            StmtKind::Switch { selector, cases } => {
                let symbolic = cases.iter().flat_map(|c| &c.labels).any(|label| {
                    matches!(
                        label.kind,
                        ExprKind::FieldAccess { .. } | ExprKind::Literal(Literal::String(_))
                    )
                });
                if symbolic || selector.ty.is_reference() {
                    Some("string or enum switch")
                } else {
                    None
                }
            }
            StmtKind::LocalClass(_) if self.at_least(Level::Flattened) => Some("local class"),
            StmtKind::SuperConstructorCall { selector: None, .. }
            | StmtKind::ThisConstructorCall { selector: None, .. }
                if self.at_least(Level::Resolved) =>
            {
                Some("constructor call without selector")
            }
            _ => None,
        };
        if let Some(what) = leftover {
            self.fail(format!("{} reached the {} stage", what, self.stage), stmt.span);
        }
        self.violation.is_none()
    }

    fn visit_expr(&mut self, expr: &Expr) -> bool {
        let leftover = match &expr.kind {
            ExprKind::Lambda { .. } => Some("lambda"),
            ExprKind::MethodReference { .. } => Some("method reference"),
            ExprKind::Assign {
                op: Some(_), target, ..
            } if target.ty.is_string() => Some("string compound assignment"),
            ExprKind::New { body: Some(_), .. } if self.at_least(Level::Flattened) => {
                Some("anonymous class body")
            }
            ExprKind::This {
                qualifier: Some(_),
            } if self.at_least(Level::Flattened) => Some("qualified this"),
            ExprKind::MethodCall { selector: None, .. } | ExprKind::New { selector: None, .. }
                if self.at_least(Level::Resolved) =>
            {
                Some("call without selector")
            }
            ExprKind::FieldAccess { field, .. }
                if self.at_least(Level::Resolved) && field.native_name.is_none() =>
            {
                Some("field access without native name")
            }
            _ => None,
        };
        if let Some(what) = leftover {
            self.fail(format!("{} reached the {} stage", what, self.stage), expr.span);
        }
        self.violation.is_none()
    }

    fn visit_var(&mut self, var: &VarDecl) {
        if self.at_least(Level::Resolved) && var.native_name.is_none() {
            self.fail(format!("local `{}` has no native name", var.name), var.span);
        }
        if self.at_least(Level::Annotated) && var.ownership.is_none() {
            self.fail(format!("local `{}` has no ownership qualifier", var.name), var.span);
        }
    }
}

/// Verify the unit has reached `level`, reporting the first violation.
pub fn check(unit: &CompilationUnit, level: Level, stage: Stage) -> Result<(), TranslateError> {
    let mut checker = Checker {
        stage,
        level,
        violation: None,
    };
    walk_unit(&mut checker, unit);
    match checker.violation {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn unit_with(stmts: Vec<Stmt>) -> CompilationUnit {
        let mut unit = CompilationUnit::new("p/A.java", Some("p"));
        let mut decl = TypeDecl::new(TypeKind::Class, "p.A");
        decl.members.push(Member::Method(
            MethodDecl::new("f", vec![], Type::Void).with_body(stmts),
        ));
        unit.types.push(decl);
        unit
    }

    #[test]
    fn leftover_sugar_is_internal() {
        let var = VarDecl::new(LocalId(0), "x", Type::int());
        let unit = unit_with(vec![Stmt::new(StmtKind::ForEach {
            var,
            iterable: Expr::local(LocalId(1), Type::array(Type::int())),
            body: Box::new(Stmt::block(vec![])),
        })]);
        let err = check(&unit, Level::Normalized, Stage::Flatten).unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("enhanced for"));
    }

    #[test]
    fn unflattened_units_fail_flattened_check() {
        let mut unit = unit_with(vec![]);
        unit.types[0].binary_name = Some("p.A".into());
        assert!(check(&unit, Level::Flattened, Stage::Resolve).is_ok());
        unit.types[0]
            .nested
            .push(TypeDecl::new(TypeKind::Class, "p.A.B"));
        assert!(check(&unit, Level::Flattened, Stage::Resolve).is_err());
    }

    #[test]
    fn primitive_subset_passes() {
        let x = VarDecl::new(LocalId(0), "x", Type::int());
        let unit = unit_with(vec![
            Stmt::local(x.clone(), Some(Expr::int(1))),
            Stmt::ret(None),
        ]);
        assert!(check(&unit, Level::Normalized, Stage::Flatten).is_ok());
    }
}
