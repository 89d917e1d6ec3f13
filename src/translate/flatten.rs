//! Structural flattener: hoist every member, local and anonymous class to
//! the top level of the unit.
//!
//! Three phases:
//!
//! 1. **Extract** - a pre-order walk pulls nested type bodies out of their
//!    parents (member types, `LocalClass` statements, anonymous `New`
//!    bodies) and assigns binary names (`Outer$Inner`, `Outer$1Local`,
//!    `Outer$1`).
//! 2. **Analyze** - per hoisted type, collect the free locals it reads and
//!    the enclosing instances it reaches, then propagate both to a fixed
//!    point: instantiating a capturing class means supplying its captures,
//!    and a class nested in a class nested in `Outer` reaches `Outer`
//!    through its parent's `this$0`.
//! 3. **Rewrite** - synthesize one field and one leading constructor
//!    parameter per capture, turn captured reads into field reads,
//!    qualified `Outer.this` into `this$0` chains, and pass captured values
//!    explicitly at every instantiation and `super(...)`/`this(...)` call.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::ast::*;
use crate::errors::{Stage, TranslateError};
use crate::invariants::{check, Level};
use crate::types::Type;
use crate::visit::{
    max_local_id, walk_block_mut, walk_expr_mut, walk_type, walk_type_mut, walk_unit,
    AssignmentCounts, LocalUsage, VisitResult, Visitor, VisitorMut,
};

type Result<T> = std::result::Result<T, TranslateError>;

/// Field holding the enclosing instance.
pub const OUTER_FIELD: &str = "this$0";

/// Captures of every hoisted type that has any, keyed by qualified name.
type CaptureTable = HashMap<String, Vec<Capture>>;

pub fn flatten(unit: CompilationUnit) -> Result<CompilationUnit> {
    check(&unit, Level::Normalized, Stage::Flatten)?;
    let vars = VarTable::of_unit(&unit);
    let assignments = AssignmentCounts::of_unit(&unit);
    let mut locals = LocalGen::starting_after(max_local_id(&unit));

    let CompilationUnit {
        source_path,
        package,
        imports,
        types,
        source,
    } = unit;

    let mut hoisted = Vec::new();
    let mut counters = Counters::default();
    for decl in types {
        let binary = decl.qualified_name.clone();
        extract(decl, binary, true, &mut counters, &mut hoisted)?;
    }

    let table = analyze(&hoisted, &vars, &assignments)?;
    let types = hoisted
        .into_iter()
        .map(|hoisted| rewrite(hoisted.decl, &table, &mut locals))
        .collect::<Result<Vec<_>>>()?;

    Ok(CompilationUnit {
        source_path,
        package,
        imports,
        types,
        source,
    })
}

// ============================================================================
// Extraction
// ============================================================================

struct Hoisted {
    decl: TypeDecl,
    /// Declared where no `this` exists (static member, static method or
    /// static initializer)
    static_context: bool,
}

#[derive(Default)]
struct Counters {
    anonymous: HashMap<String, u32>,
    local: HashMap<(String, String), u32>,
}

struct BodyCollector<'a> {
    enclosing: &'a str,
    binary: &'a str,
    static_context: bool,
    counters: &'a mut Counters,
    found: Vec<(TypeDecl, String, bool)>,
}

impl BodyCollector<'_> {
    fn take(&mut self, mut decl: TypeDecl, anonymous: bool) {
        let binary = if anonymous {
            let n = self
                .counters
                .anonymous
                .entry(self.binary.to_string())
                .or_insert(0);
            *n += 1;
            format!("{}${}", self.binary, n)
        } else {
            let n = self
                .counters
                .local
                .entry((self.binary.to_string(), decl.name.clone()))
                .or_insert(0);
            *n += 1;
            format!("{}${}{}", self.binary, n, decl.name)
        };
        decl.enclosing
            .get_or_insert_with(|| self.enclosing.to_string());
        self.found.push((decl, binary, self.static_context));
    }
}

impl VisitorMut for BodyCollector<'_> {
    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) -> VisitResult {
        if matches!(stmt.kind, StmtKind::LocalClass(_)) {
            if let StmtKind::LocalClass(decl) = std::mem::replace(&mut stmt.kind, StmtKind::Empty) {
                self.take(*decl, false);
            }
        }
        Ok(())
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) -> VisitResult {
        if let ExprKind::New { body, .. } = &mut expr.kind {
            if let Some(decl) = body.take() {
                self.take(*decl, true);
            }
        }
        Ok(())
    }

    fn descend_into_types(&self) -> bool {
        false
    }
}

fn extract(
    mut decl: TypeDecl,
    binary: String,
    static_context: bool,
    counters: &mut Counters,
    out: &mut Vec<Hoisted>,
) -> Result<()> {
    let qualified = decl.qualified_name.clone();
    let nested = std::mem::take(&mut decl.nested);

    let found = {
        let mut collector = BodyCollector {
            enclosing: &qualified,
            binary: &binary,
            static_context: false,
            counters: &mut *counters,
            found: Vec::new(),
        };
        for member in &mut decl.members {
            match member {
                Member::Field(field) => {
                    collector.static_context = field.is_static();
                    if let Some(init) = &mut field.init {
                        walk_expr_mut(&mut collector, init)?;
                    }
                }
                Member::Method(method) => {
                    collector.static_context = method.is_static();
                    if let Some(body) = &mut method.body {
                        walk_block_mut(&mut collector, body)?;
                    }
                }
                Member::Initializer(block) => {
                    collector.static_context = false;
                    walk_block_mut(&mut collector, block)?;
                }
                Member::StaticInitializer(block) => {
                    collector.static_context = true;
                    walk_block_mut(&mut collector, block)?;
                }
            }
        }
        collector.static_context = true;
        for constant in &mut decl.enum_constants {
            for arg in &mut constant.args {
                walk_expr_mut(&mut collector, arg)?;
            }
        }
        collector.found
    };

    decl.binary_name = Some(binary.clone());
    out.push(Hoisted {
        decl,
        static_context,
    });

    for (child, child_binary, child_static) in found {
        extract(child, child_binary, child_static, counters, out)?;
    }
    for mut child in nested {
        let child_binary = format!("{}${}", binary, child.name);
        child
            .enclosing
            .get_or_insert_with(|| qualified.clone());
        let child_static = !child.is_inner_member();
        extract(child, child_binary, child_static, counters, out)?;
    }
    Ok(())
}

// ============================================================================
// Analysis
// ============================================================================

/// Name and type of every variable declared in the unit.
struct VarTable(HashMap<LocalId, (String, Type)>);

impl VarTable {
    fn of_unit(unit: &CompilationUnit) -> Self {
        let mut table = VarTable(HashMap::new());
        walk_unit(&mut table, unit);
        table
    }
}

impl Visitor for VarTable {
    fn visit_var(&mut self, var: &VarDecl) {
        self.0
            .entry(var.id)
            .or_insert_with(|| (var.name.clone(), var.ty.clone()));
    }
}

/// What one hoisted type's own code touches.
#[derive(Default)]
struct Facts {
    usage: LocalUsage,
    qualified_this: BTreeSet<String>,
    /// Instantiated or super-called types, and whether an explicit
    /// enclosing instance is supplied
    instantiations: Vec<(String, bool)>,
}

impl Facts {
    fn of_type(decl: &TypeDecl) -> Self {
        let mut facts = Facts::default();
        walk_type(&mut facts, decl);
        facts
    }
}

impl Visitor for Facts {
    fn visit_stmt(&mut self, stmt: &Stmt) -> bool {
        if let StmtKind::SuperConstructorCall { ctor, outer, .. } = &stmt.kind {
            self.instantiations
                .push((ctor.declaring.clone(), outer.is_some()));
        }
        true
    }

    fn visit_expr(&mut self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::This {
                qualifier: Some(qualifier),
            } => {
                self.qualified_this.insert(qualifier.clone());
            }
            ExprKind::New { class, outer, .. } => {
                self.instantiations.push((class.clone(), outer.is_some()));
            }
            _ => {}
        }
        Visitor::visit_expr(&mut self.usage, expr)
    }

    fn visit_var(&mut self, var: &VarDecl) {
        self.usage.visit_var(var);
    }
}

fn analyze(
    hoisted: &[Hoisted],
    vars: &VarTable,
    assignments: &AssignmentCounts,
) -> Result<CaptureTable> {
    let n = hoisted.len();
    let key = |i: usize| hoisted[i].decl.qualified_name.as_str();
    let index: HashMap<&str, usize> = (0..n).map(|i| (key(i), i)).collect();
    let facts: Vec<Facts> = hoisted.iter().map(|h| Facts::of_type(&h.decl)).collect();

    // Captured locals: own free locals, plus whatever the classes this one
    // instantiates capture and it does not declare itself.
    let mut captured: Vec<BTreeSet<LocalId>> = facts
        .iter()
        .map(|f| f.usage.free().into_iter().collect())
        .collect();
    loop {
        let mut changed = false;
        for i in 0..n {
            let mut inherited = Vec::new();
            for (class, _) in &facts[i].instantiations {
                if let Some(&j) = index.get(class.as_str()) {
                    inherited.extend(
                        captured[j]
                            .iter()
                            .copied()
                            .filter(|id| !facts[i].usage.declared.contains(id)),
                    );
                }
            }
            for id in inherited {
                changed |= captured[i].insert(id);
            }
        }
        if !changed {
            break;
        }
    }

    // Enclosing instances reached through `this$0`.
    let mut reach: Vec<BTreeSet<String>> = (0..n)
        .map(|i| {
            facts[i]
                .qualified_this
                .iter()
                .filter(|q| q.as_str() != key(i))
                .cloned()
                .collect()
        })
        .collect();
    let wants_outer = |i: usize, reach: &BTreeSet<String>| {
        !hoisted[i].static_context && (hoisted[i].decl.is_inner_member() || !reach.is_empty())
    };
    let mut needs_outer: Vec<bool> = (0..n).map(|i| wants_outer(i, &reach[i])).collect();
    loop {
        let mut changed = false;
        for i in 0..n {
            let mut add = Vec::new();
            for (class, explicit) in &facts[i].instantiations {
                if *explicit {
                    continue;
                }
                let Some(&j) = index.get(class.as_str()) else {
                    continue;
                };
                if let (true, Some(outer)) = (needs_outer[j], &hoisted[j].decl.enclosing) {
                    if outer != key(i) {
                        add.push(outer.clone());
                    }
                }
            }
            for j in 0..n {
                if needs_outer[j] && hoisted[j].decl.enclosing.as_deref() == Some(key(i)) {
                    add.extend(reach[j].iter().filter(|q| q.as_str() != key(i)).cloned());
                }
            }
            for q in add {
                changed |= reach[i].insert(q);
            }
            let needs = wants_outer(i, &reach[i]);
            if needs != needs_outer[i] {
                needs_outer[i] = needs;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut table = CaptureTable::new();
    for i in 0..n {
        let decl = &hoisted[i].decl;
        if hoisted[i].static_context {
            if let Some(target) = reach[i].iter().next() {
                return Err(TranslateError::unsupported(
                    format!("use of the enclosing instance of `{}` from a static context", target),
                    decl.span,
                ));
            }
        }
        let mut captures = Vec::new();
        if needs_outer[i] {
            let outer = decl.enclosing.clone().ok_or_else(|| {
                TranslateError::internal(
                    Stage::Flatten,
                    format!("`{}` needs an enclosing instance but has no enclosing type", key(i)),
                    decl.span,
                )
            })?;
            captures.push(Capture {
                kind: CaptureKind::OuterInstance {
                    outer: outer.clone(),
                },
                field: OUTER_FIELD.to_string(),
                ty: Type::class(outer),
            });
        }

        if !captured[i].is_empty() && !matches!(decl.nesting, Nesting::Local | Nesting::Anonymous) {
            return Err(TranslateError::internal(
                Stage::Flatten,
                format!("`{}` reads locals it does not declare", key(i)),
                decl.span,
            ));
        }
        let mut used: HashSet<String> = decl.fields().map(|f| f.name.clone()).collect();
        for &id in &captured[i] {
            let Some((name, ty)) = vars.0.get(&id) else {
                return Err(TranslateError::internal(
                    Stage::Flatten,
                    format!("local {} is referenced but never declared", id),
                    decl.span,
                ));
            };
            if assignments.is_reassigned(id) {
                return Err(TranslateError::NonEffectivelyFinalCapture {
                    name: name.clone(),
                    class: decl.binary_name.clone().unwrap_or_else(|| key(i).to_string()),
                    span: facts[i]
                        .usage
                        .first_use
                        .get(&id)
                        .copied()
                        .unwrap_or(decl.span),
                });
            }
            let mut field = name.clone();
            if used.contains(&field) {
                field = format!("val${}", name);
                let mut k = 1;
                while used.contains(&field) {
                    k += 1;
                    field = format!("val${}${}", name, k);
                }
            }
            used.insert(field.clone());
            captures.push(Capture {
                kind: CaptureKind::Local {
                    id,
                    name: name.clone(),
                },
                field,
                ty: ty.clone(),
            });
        }
        if !captures.is_empty() {
            table.insert(key(i).to_string(), captures);
        }
    }
    Ok(table)
}

fn outer_of(captures: &[Capture]) -> Option<&str> {
    captures.iter().find_map(|capture| match &capture.kind {
        CaptureKind::OuterInstance { outer } => Some(outer.as_str()),
        CaptureKind::Local { .. } => None,
    })
}

// ============================================================================
// Rewriting
// ============================================================================

fn rewrite(mut decl: TypeDecl, table: &CaptureTable, locals: &mut LocalGen) -> Result<TypeDecl> {
    let key = decl.qualified_name.clone();
    let captures = table.get(&key).cloned().unwrap_or_default();
    if !captures.is_empty() {
        add_capture_fields(&mut decl, &captures);
        add_capture_params(&mut decl, &captures, locals);
    }

    let mut rewriter = CaptureRewriter {
        table,
        current: &key,
        captures: &captures,
        ctor_values: HashMap::new(),
        ctor_outer: None,
    };
    walk_type_mut(&mut rewriter, &mut decl)?;

    decl.captures = captures;
    decl.nesting = Nesting::TopLevel;
    Ok(decl)
}

fn add_capture_fields(decl: &mut TypeDecl, captures: &[Capture]) {
    let fields = captures.iter().map(|capture| {
        let mut field = FieldDecl::new(capture.field.clone(), capture.ty.clone());
        field.modifiers = Modifiers {
            visibility: Visibility::Private,
            is_final: true,
            ..Modifiers::default()
        };
        field.synthetic = true;
        field.span = decl.span;
        Member::Field(field)
    });
    let fields: Vec<Member> = fields.collect();
    decl.members.splice(0..0, fields);
}

/// Every constructor takes the captures as leading parameters. Constructors
/// that delegate to `this(...)` pass them on; the others store them before
/// anything else runs.
fn add_capture_params(decl: &mut TypeDecl, captures: &[Capture], locals: &mut LocalGen) {
    let key = decl.qualified_name.clone();
    let this_ty = decl.as_type();
    let capture_types: Vec<Type> = captures.iter().map(|c| c.ty.clone()).collect();
    for member in &mut decl.members {
        let Member::Method(method) = member else {
            continue;
        };
        if !method.is_constructor() {
            continue;
        }
        let params: Vec<VarDecl> = captures
            .iter()
            .map(|capture| {
                let name = match &capture.kind {
                    CaptureKind::OuterInstance { .. } => "outer$".to_string(),
                    CaptureKind::Local { name, .. } => format!("capture${}", name),
                };
                VarDecl::param(locals.fresh(), name, capture.ty.clone())
            })
            .collect();

        let body = method.body.get_or_insert_with(Block::default);
        match body.stmts.first_mut().map(|stmt| &mut stmt.kind) {
            Some(StmtKind::ThisConstructorCall { ctor, captured, .. }) => {
                *captured = params.iter().map(VarDecl::reference).collect();
                ctor.params.splice(0..0, capture_types.iter().cloned());
            }
            _ => {
                let stores: Vec<Stmt> = captures
                    .iter()
                    .zip(&params)
                    .map(|(capture, param)| {
                        let target = Expr::field(
                            Some(Expr::this(this_ty.clone())),
                            FieldRef::new(key.clone(), capture.field.clone()),
                            capture.ty.clone(),
                        );
                        Stmt::expr(Expr::assign(target, param.reference()))
                    })
                    .collect();
                body.stmts.splice(0..0, stores);
            }
        }
        method.params.splice(0..0, params);
        method.captured_params = captures.len();
    }
}

struct CaptureRewriter<'a> {
    table: &'a CaptureTable,
    current: &'a str,
    captures: &'a [Capture],
    /// Inside a constructor: captured local -> capture parameter
    ctor_values: HashMap<LocalId, Expr>,
    /// Inside a constructor: the enclosing-instance parameter
    ctor_outer: Option<Expr>,
}

impl CaptureRewriter<'_> {
    fn captured_value(&self, id: LocalId) -> Option<Expr> {
        if let Some(value) = self.ctor_values.get(&id) {
            return Some(value.clone());
        }
        self.captures.iter().find_map(|capture| match capture.kind {
            CaptureKind::Local { id: captured, .. } if captured == id => Some(Expr::field(
                Some(Expr::this(Type::class(self.current))),
                FieldRef::new(self.current, capture.field.clone()),
                capture.ty.clone(),
            )),
            _ => None,
        })
    }

    /// `target.this` as seen from the current class.
    fn enclosing_path(&self, target: &str, span: Span) -> Result<Expr> {
        let mut expr = Expr::this(Type::class(self.current)).at(span);
        let mut cur = self.current.to_string();
        let mut hops = 0;
        while cur != target {
            let Some(outer) = self.table.get(&cur).and_then(|c| outer_of(c)) else {
                return Err(TranslateError::internal(
                    Stage::Flatten,
                    format!("no enclosing instance path from `{}` to `{}`", self.current, target),
                    span,
                ));
            };
            expr = match (&self.ctor_outer, hops) {
                (Some(param), 0) => param.clone().at(span),
                _ => Expr::field(
                    Some(expr),
                    FieldRef::new(cur.clone(), OUTER_FIELD),
                    Type::class(outer),
                )
                .at(span),
            };
            cur = outer.to_string();
            hops += 1;
            if hops > self.table.len() {
                return Err(TranslateError::internal(
                    Stage::Flatten,
                    format!("enclosing instance chain of `{}` is cyclic", self.current),
                    span,
                ));
            }
        }
        Ok(expr)
    }

    /// Values for the captures of `class`, in capture order, with their
    /// types. `None` when the class captures nothing.
    fn captured_args(
        &self,
        class: &str,
        mut explicit_outer: Option<Expr>,
        span: Span,
    ) -> Result<Option<(Vec<Expr>, Vec<Type>)>> {
        let captures = self.table.get(class).map(Vec::as_slice).unwrap_or_default();
        let mut values = Vec::with_capacity(captures.len());
        for capture in captures {
            values.push(match &capture.kind {
                CaptureKind::OuterInstance { outer } => match explicit_outer.take() {
                    Some(value) => value,
                    None => self.enclosing_path(outer, span)?,
                },
                CaptureKind::Local { id, .. } => self
                    .captured_value(*id)
                    .unwrap_or_else(|| Expr::local(*id, capture.ty.clone()))
                    .at(span),
            });
        }
        if explicit_outer.is_some() {
            return Err(TranslateError::unsupported(
                format!("qualified instantiation of `{}`, which has no enclosing instance", class),
                span,
            ));
        }
        if captures.is_empty() {
            return Ok(None);
        }
        let types = captures.iter().map(|c| c.ty.clone()).collect();
        Ok(Some((values, types)))
    }
}

impl VisitorMut for CaptureRewriter<'_> {
    fn enter_method_mut(&mut self, method: &mut MethodDecl) -> VisitResult {
        self.ctor_values.clear();
        self.ctor_outer = None;
        if method.is_constructor() && method.captured_params == self.captures.len() {
            for (capture, param) in self.captures.iter().zip(&method.params) {
                match &capture.kind {
                    CaptureKind::OuterInstance { .. } => self.ctor_outer = Some(param.reference()),
                    CaptureKind::Local { id, .. } => {
                        self.ctor_values.insert(*id, param.reference());
                    }
                }
            }
        }
        Ok(())
    }

    fn leave_method_mut(&mut self, _method: &mut MethodDecl) -> VisitResult {
        self.ctor_values.clear();
        self.ctor_outer = None;
        Ok(())
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) -> VisitResult {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Local(id) => {
                if let Some(value) = self.captured_value(*id) {
                    *expr = value.at(span);
                }
            }
            ExprKind::This { qualifier } => {
                if let Some(target) = qualifier.take() {
                    if target != self.current {
                        *expr = self.enclosing_path(&target, span)?;
                    }
                }
            }
            ExprKind::New {
                class,
                ctor,
                outer,
                captured,
                ..
            } => {
                let explicit = outer.take().map(|outer| *outer);
                if let Some((values, types)) = self.captured_args(class, explicit, span)? {
                    *captured = values;
                    ctor.params.splice(0..0, types);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) -> VisitResult {
        let span = stmt.span;
        if let StmtKind::SuperConstructorCall {
            ctor,
            outer,
            captured,
            ..
        } = &mut stmt.kind
        {
            let explicit = outer.take();
            if let Some((values, types)) = self.captured_args(&ctor.declaring, explicit, span)? {
                *captured = values;
                ctor.params.splice(0..0, types);
            }
        }
        Ok(())
    }
}
