//! Source-level sugar lowered before emission
//!
//! Each test checks both sides: the normalized tree no longer holds the
//! construct, and the emitted body carries the runtime calls it became.

use basalt::ast::*;
use basalt::test_support::*;
use basalt::types::Type;

fn single_method(name: &str, params: Vec<VarDecl>, ret: Type, body: Vec<Stmt>) -> CompilationUnit {
    let mut decl = class("p.A");
    decl.members.push(method(name, params, ret, body));
    unit("p", vec![decl])
}

fn compound_add(target: Expr, value: Expr) -> Expr {
    let ty = target.ty.clone();
    Expr::new(
        ExprKind::Assign {
            op: Some(BinaryOp::Add),
            target: Box::new(target),
            value: Box::new(value),
            mode: AssignMode::Plain,
        },
        ty,
    )
}

// ============================================================================
// Loops
// ============================================================================

fn array_sum() -> CompilationUnit {
    let mut locals = Locals::new();
    let xs = locals.param("xs", Type::array(Type::int()));
    let total = locals.var("total", Type::int());
    let x = locals.var("x", Type::int());
    let body = vec![
        Stmt::local(total.clone(), Some(Expr::int(0))),
        Stmt::new(StmtKind::ForEach {
            var: x.clone(),
            iterable: xs.reference(),
            body: Box::new(Stmt::expr(compound_add(total.reference(), x.reference()))),
        }),
        Stmt::ret(Some(total.reference())),
    ];
    single_method("sum", vec![xs], Type::int(), body)
}

#[test]
fn foreach_over_array_becomes_indexed_loop() {
    let unit = normalized(array_sum()).unwrap();
    let body = body_of(&unit, "p.A", "sum");
    assert_eq!(count_stmts(body, |s| matches!(s.kind, StmtKind::ForEach { .. })), 0);
    assert_eq!(count_stmts(body, |s| matches!(s.kind, StmtKind::For { .. })), 1);
    let nil_checks = find_exprs(body, |e| {
        matches!(&e.kind, ExprKind::NativeCall { function, .. } if function == "nil_chk")
    });
    assert_eq!(nil_checks.len(), 1);

    let source = translate(array_sum()).unwrap().artifacts.source;
    assert!(source.contains("- (jint)sumWithIntArray:(IOSIntArray *)xs {"));
    assert!(source.contains("IOSIntArray_Get("));
    assert!(source.contains("->size_"));
    assert!(source.contains("total += x;"));
    assert!(source.contains("#include \"IOSPrimitiveArray.h\""));
}

#[test]
fn labeled_continue_jumps_to_loop_end() {
    let mut locals = Locals::new();
    let flag = locals.param("flag", Type::boolean());
    let inner = Stmt::while_loop(
        flag.reference(),
        Stmt::block(vec![Stmt::new(StmtKind::Continue(Some("outer".into())))]),
    );
    let outer = Stmt::new(StmtKind::Labeled {
        label: "outer".into(),
        body: Box::new(Stmt::while_loop(flag.reference(), Stmt::block(vec![inner]))),
    });
    let source = translate(single_method("spin", vec![flag], Type::Void, vec![outer]))
        .unwrap()
        .artifacts
        .source;
    assert!(source.contains("goto outer_continue;"));
    assert!(source.contains("outer_continue: ;"));
    assert!(!source.contains("outer_break"));
}

// ============================================================================
// Switch
// ============================================================================

fn string_switch() -> CompilationUnit {
    let mut locals = Locals::new();
    let s = locals.param("s", Type::string());
    let case = |label: Option<&str>, value: i64| SwitchCase {
        labels: label.map(Expr::string).into_iter().collect(),
        body: vec![Stmt::ret(Some(Expr::int(value)))],
    };
    let switch = Stmt::new(StmtKind::Switch {
        selector: s.reference(),
        cases: vec![case(Some("a"), 1), case(Some("b"), 2), case(None, 0)],
    });
    single_method("code", vec![s], Type::int(), vec![switch])
}

#[test]
fn string_switch_dispatches_on_case_index() {
    let unit = normalized(string_switch()).unwrap();
    let body = body_of(&unit, "p.A", "code");
    let switches = count_stmts(body, |s| {
        matches!(&s.kind, StmtKind::Switch { selector, .. } if selector.ty == Type::int())
    });
    assert_eq!(switches, 1);

    let source = translate(string_switch()).unwrap().artifacts.source;
    assert!(source.contains("isEqual:@\"a\"]"));
    assert!(source.contains("isEqual:@\"b\"]"));
    assert!(source.contains("case 0:"));
    assert!(source.contains("case 1:"));
    assert!(source.contains("default:"));
}

// ============================================================================
// Locks and assertions
// ============================================================================

#[test]
fn synchronized_block_enters_and_exits_monitor() {
    let mut locals = Locals::new();
    let lock = locals.param("lock", Type::object());
    let sync = Stmt::new(StmtKind::Synchronized {
        lock: lock.reference(),
        body: Block::new(vec![Stmt::ret(None)]),
    });
    let source = translate(single_method("guarded", vec![lock], Type::Void, vec![sync]))
        .unwrap()
        .artifacts
        .source;
    let enter = source.find("objc_sync_enter(").unwrap();
    let finally = source.find("@finally").unwrap();
    let exit = source.find("objc_sync_exit(").unwrap();
    assert!(enter < finally && finally < exit);
}

#[test]
fn assert_throws_assertion_error() {
    let mut locals = Locals::new();
    let ok = locals.param("ok", Type::boolean());
    let check = Stmt::new(StmtKind::Assert {
        cond: ok.reference(),
        message: None,
    });
    let unit = single_method("check", vec![ok], Type::Void, vec![check]);
    let normalized = normalized(unit.clone()).unwrap();
    let body = body_of(&normalized, "p.A", "check");
    assert_eq!(count_stmts(body, |s| matches!(s.kind, StmtKind::Assert { .. })), 0);
    assert_eq!(count_stmts(body, |s| matches!(s.kind, StmtKind::Throw(_))), 1);

    let source = translate(unit).unwrap().artifacts.source;
    assert!(source.contains("@throw"));
    assert!(source.contains("[[JavaLangAssertionError alloc] init]"));
    assert!(source.contains("#include \"JavaLangAssertionError.h\""));
}

// ============================================================================
// Lambdas
// ============================================================================

fn lambda_unit() -> CompilationUnit {
    let this = Expr::this(Type::class("p.A"));
    let tick = call_on(this, "p.A", "tick", vec![], Type::Void, vec![]);
    let lambda = Expr::new(
        ExprKind::Lambda {
            params: vec![],
            body: LambdaBody::Expr(Box::new(tick)),
            method: MethodRef::new("java.lang.Runnable", "run", vec![], Type::Void),
        },
        Type::class("java.lang.Runnable"),
    );
    let mut decl = class("p.A");
    decl.members.push(method("tick", vec![], Type::Void, vec![]));
    decl.members.push(method(
        "make",
        vec![],
        Type::class("java.lang.Runnable"),
        vec![Stmt::ret(Some(lambda))],
    ));
    unit("p", vec![decl])
}

#[test]
fn lambda_becomes_class_holding_enclosing_instance() {
    let flat = flattened(lambda_unit()).unwrap();
    assert_eq!(flat.types.len(), 2);
    let hoisted = &flat.types[1];
    assert_eq!(hoisted.binary_name.as_deref(), Some("p.A$1"));
    assert_eq!(hoisted.interfaces, vec![Type::class("java.lang.Runnable")]);
    assert_eq!(hoisted.captures.len(), 1);
    assert_eq!(hoisted.captures[0].field, "this$0");

    let translation = translate(lambda_unit()).unwrap();
    let header = &translation.artifacts.header;
    assert!(header.contains("@interface PA_1 : NSObject <JavaLangRunnable>"));
    assert!(header.contains("PA *this_0_;"));
    assert!(header.contains("#include \"JavaLangRunnable.h\""));
    let source = &translation.artifacts.source;
    assert!(source.contains("[[PA_1 alloc] initWithPA:self]"));
    assert!(source.contains("- (void)run {"));
    assert!(source.contains("this_0_) tick]"));
}
