//! Property-based tests for the translation pipeline
//!
//! These tests check properties that must hold for every input:
//! - Translation is deterministic
//! - Selectors are unique within a type and well formed
//! - After memory annotation, strong instance fields form no cycle
//! - Every owning local is released exactly once, whatever the exit path
//! - A blank local assigned once on every path can be captured

use std::collections::HashSet;

use proptest::prelude::*;

use basalt::ast::*;
use basalt::test_support::*;
use basalt::translate::cycles::FieldGraph;
use basalt::translate::names::is_valid_selector;
use basalt::types::Type;
use basalt::TranslateError;

// ============================================================================
// Generators
// ============================================================================

fn arb_param_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::int()),
        Just(Type::boolean()),
        Just(Type::string()),
        Just(Type::object()),
        Just(Type::class("p.T0")),
        Just(Type::array(Type::int())),
        Just(Type::array(Type::string())),
    ]
}

/// Method signatures with distinct (name, parameter types) pairs.
fn arb_signatures() -> impl Strategy<Value = Vec<(String, Vec<Type>)>> {
    let name = prop_oneof![
        Just("f".to_string()),
        Just("get".to_string()),
        Just("count".to_string()),
        Just("hash".to_string()),
        Just("description".to_string()),
        Just("init".to_string()),
    ];
    prop::collection::vec((name, prop::collection::vec(arb_param_type(), 0..3)), 1..8).prop_map(
        |sigs| {
            let mut seen = HashSet::new();
            sigs.into_iter()
                .filter(|(name, params)| seen.insert((name.clone(), params.clone())))
                .collect()
        },
    )
}

/// Nested `if`/`else` shapes; every leaf is one assignment.
#[derive(Debug, Clone)]
enum Branches {
    Leaf,
    If(Box<Branches>, Box<Branches>),
}

fn arb_branches() -> impl Strategy<Value = Branches> {
    Just(Branches::Leaf).prop_recursive(4, 16, 2, |inner| {
        (inner.clone(), inner).prop_map(|(then, other)| Branches::If(Box::new(then), Box::new(other)))
    })
}

/// `(owner, target, explicitly_weak)` edges among `n` types.
fn arb_field_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize, bool)>)> {
    (1usize..5).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec((0..n, 0..n, prop::bool::weighted(0.2)), 0..10),
        )
    })
}

// ============================================================================
// Unit builders
// ============================================================================

fn overload_unit(signatures: &[(String, Vec<Type>)]) -> CompilationUnit {
    let mut locals = Locals::new();
    let mut decl = class("p.T0");
    for (name, params) in signatures {
        let params = params
            .iter()
            .enumerate()
            .map(|(i, ty)| locals.param(&format!("a{}", i), ty.clone()))
            .collect();
        decl.members.push(method(name, params, Type::Void, vec![]));
    }
    unit("p", vec![decl])
}

fn graph_unit(n: usize, edges: &[(usize, usize, bool)]) -> CompilationUnit {
    let mut types: Vec<TypeDecl> = (0..n).map(|i| class(&format!("p.T{}", i))).collect();
    for (i, &(owner, target, weak)) in edges.iter().enumerate() {
        let mut field = FieldDecl::new(format!("f{}", i), Type::class(format!("p.T{}", target)));
        if weak {
            field = field.with_annotation(Annotation::Weak);
        }
        types[owner].members.push(Member::Field(field));
    }
    unit("p", types)
}

/// `run(flag)` declaring one owning local per entry, each optionally
/// followed by an early return.
fn release_unit(early_returns: &[bool]) -> (CompilationUnit, Vec<VarDecl>) {
    let mut locals = Locals::new();
    let flag = locals.param("flag", Type::boolean());
    let mut owned = Vec::new();
    let mut body = Vec::new();
    for (i, &early) in early_returns.iter().enumerate() {
        let var = locals.var(&format!("s{}", i), Type::class("p.Box"));
        body.push(Stmt::local(var.clone(), Some(Expr::new_object("p.Box", vec![], vec![]))));
        if early {
            body.push(Stmt::if_then(flag.reference(), Stmt::ret(None), None));
        }
        owned.push(var);
    }
    let mut main = class("p.Main");
    main.members.push(method("run", vec![flag], Type::Void, body));
    (unit("p", vec![class("p.Box"), main]), owned)
}

fn assign_on_every_path(shape: &Branches, flag: &VarDecl, target: &VarDecl, next: &mut i64) -> Stmt {
    match shape {
        Branches::Leaf => {
            *next += 1;
            Stmt::expr(Expr::assign(target.reference(), Expr::int(*next)))
        }
        Branches::If(then, other) => Stmt::if_then(
            flag.reference(),
            assign_on_every_path(then, flag, target, next),
            Some(assign_on_every_path(other, flag, target, next)),
        ),
    }
}

/// `run(flag)` assigning a blank local once per path, then capturing it.
fn capture_unit(shape: &Branches, extra_write: bool) -> CompilationUnit {
    let mut locals = Locals::new();
    let flag = locals.param("flag", Type::boolean());
    let value = locals.var("value", Type::int());
    let mut next = 0;

    let mut local = class("p.Main.1Reader");
    local.name = "Reader".into();
    local.nesting = Nesting::Local;
    local.members.push(method("get", vec![], Type::int(), vec![Stmt::ret(Some(value.reference()))]));

    let mut body = vec![
        Stmt::local(value.clone(), None),
        assign_on_every_path(shape, &flag, &value, &mut next),
    ];
    if extra_write {
        body.push(Stmt::expr(Expr::assign(value.reference(), Expr::int(0))));
    }
    body.push(Stmt::new(StmtKind::LocalClass(Box::new(local))));
    let mut main = class("p.Main");
    main.members.push(method("run", vec![flag], Type::Void, body));
    unit("p", vec![main])
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn translation_is_deterministic(signatures in arb_signatures()) {
        let first = translate(overload_unit(&signatures)).unwrap();
        let second = translate(overload_unit(&signatures)).unwrap();
        prop_assert_eq!(&first.artifacts.header, &second.artifacts.header);
        prop_assert_eq!(&first.artifacts.source, &second.artifacts.source);
        prop_assert_eq!(first.artifacts.fingerprint, second.artifacts.fingerprint);
    }

    #[test]
    fn selectors_are_unique_per_type(signatures in arb_signatures()) {
        let resolved = resolved(overload_unit(&signatures)).unwrap();
        let decl = type_named(&resolved, "p.T0");
        let selectors = selectors_of(decl);
        let distinct: HashSet<&String> = selectors.iter().collect();
        prop_assert_eq!(distinct.len(), selectors.len(), "selectors: {:?}", selectors);
        for selector in &selectors {
            prop_assert!(is_valid_selector(selector), "invalid selector {}", selector);
        }
        for method in decl.methods() {
            let colons = method.selector.as_deref().unwrap_or_default().matches(':').count();
            prop_assert_eq!(colons, method.params.len());
        }
    }

    #[test]
    fn strong_fields_form_no_cycle((n, edges) in arb_field_graph()) {
        let (unit, warnings) = annotated(graph_unit(n, &edges)).unwrap();
        let strong = FieldGraph::of_unit(&unit, |_, field| field.ownership == Some(Ownership::Strong));
        prop_assert!(strong.find_cycle(&HashSet::new()).is_none());

        let weakened = unit
            .types
            .iter()
            .flat_map(|decl| decl.fields())
            .filter(|field| {
                field.ownership == Some(Ownership::Weak) && !field.annotations.contains(&Annotation::Weak)
            })
            .count();
        prop_assert_eq!(weakened, warnings.len());
    }

    #[test]
    fn every_owning_local_released_once(early_returns in prop::collection::vec(any::<bool>(), 1..5)) {
        let (input, owned) = release_unit(&early_returns);
        let (unit, _) = annotated(input.clone()).unwrap();
        let body = body_of(&unit, "p.Main", "run");
        for var in &owned {
            let releases = count_stmts(body, |stmt| {
                matches!(stmt.kind, StmtKind::Guarded { cleanup: Cleanup::Release(id), .. } if id == var.id)
            });
            prop_assert_eq!(releases, 1, "local {}", var.name);
        }

        let source = translate(input).unwrap().artifacts.source;
        for var in &owned {
            let release = format!("[{} release];", var.name);
            prop_assert_eq!(source.matches(&release).count(), 1, "{}", release);
        }
    }

    #[test]
    fn blank_local_written_once_per_path_is_capturable(shape in arb_branches()) {
        let flat = flattened(capture_unit(&shape, false));
        prop_assert!(flat.is_ok(), "{:?}", flat.as_ref().err());
        let flat = flat.unwrap();
        prop_assert_eq!(type_named(&flat, "p.Main.1Reader").captures.len(), 1);

        let rejected = flattened(capture_unit(&shape, true));
        let is_capture_error = matches!(rejected, Err(TranslateError::NonEffectivelyFinalCapture { .. }));
        prop_assert!(is_capture_error);
    }
}
