//! Name resolver: native type names, method selectors, field and local
//! names.
//!
//! Types are named first so parameter tokens can use them. Selectors are
//! assigned per type with supertypes of the unit handled before their
//! subtypes, so an override reuses the selector it inherits. Within one
//! type, fixed selectors (overrides, `@ObjectiveCName`, library mappings)
//! are placed before derived ones; a derived selector that collides gets
//! `_<index>` appended to its last keyword, where `index` is the method's
//! position among the type's methods.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::errors::{Stage, TranslateError};
use crate::invariants::{check, Level};
use crate::library::LibraryMetadata;
use crate::options::Options;
use crate::translate::names::{
    flat_type_name, is_valid_selector, ivar_name, method_base_name, static_var_name,
    variable_name, NameTable,
};
use crate::types::Type;
use crate::visit::{walk_type_mut, VisitResult, VisitorMut};

type Result<T> = std::result::Result<T, TranslateError>;

/// A method as overriding sees it: name and erased parameter types.
type MethodKey = (String, Vec<Type>);

fn method_key(name: &str, params: &[Type]) -> MethodKey {
    (name.to_string(), params.iter().map(Type::erasure).collect())
}

/// A method a subtype can override, with its parameter types written in
/// terms of the type it is visible on.
#[derive(Debug, Clone)]
struct InheritedMethod {
    name: String,
    params: Vec<Type>,
    selector: String,
}

impl InheritedMethod {
    fn key(&self) -> MethodKey {
        method_key(&self.name, &self.params)
    }
}

/// Selectors visible on each type of the unit, inherited ones included.
#[derive(Debug, Default)]
struct SelectorTable {
    /// Everything callable through the type
    all: HashMap<String, HashMap<MethodKey, String>>,
    /// What subtypes inherit: no constructors, statics or privates
    inheritable: HashMap<String, Vec<InheritedMethod>>,
}

pub fn resolve(
    mut unit: CompilationUnit,
    library: &LibraryMetadata,
    options: &Options,
) -> Result<CompilationUnit> {
    check(&unit, Level::Flattened, Stage::Resolve)?;
    assign_type_names(&mut unit, library, options)?;
    let names = NameTable::for_unit(&unit, library);
    let table = assign_method_selectors(&mut unit, &names, options)?;
    let mut resolver = CallSiteResolver {
        names: &names,
        table: &table,
    };
    for decl in &mut unit.types {
        let flat = decl.flat_name.clone().unwrap_or_default();
        for member in &mut decl.members {
            if let Member::Field(field) = member {
                field.native_name = Some(if field.is_static() {
                    static_var_name(&flat, &field.name)
                } else {
                    ivar_name(&field.name)
                });
            }
        }
        walk_type_mut(&mut resolver, decl)?;
    }
    Ok(unit)
}

/// `base`, or the first of `candidate(1..=attempts)` that is free.
fn first_free(
    base: &str,
    attempts: usize,
    is_free: impl Fn(&str) -> bool,
    candidate: impl Fn(usize) -> String,
) -> Option<String> {
    if is_free(base) {
        return Some(base.to_string());
    }
    (1..=attempts).map(candidate).find(|name| is_free(name))
}

fn assign_type_names(
    unit: &mut CompilationUnit,
    library: &LibraryMetadata,
    options: &Options,
) -> Result<()> {
    let mut taken: HashSet<String> = library.native_names().map(str::to_string).collect();
    let package = unit.package_name().to_string();
    let scope = format!("unit `{}`", unit.source_path);
    for decl in &mut unit.types {
        let base = match decl.native_name_annotation() {
            Some(name) => name.to_string(),
            None => {
                let binary = decl.binary_name.as_deref().unwrap_or(&decl.qualified_name);
                flat_type_name(binary, &package, options)
            }
        };
        let name = first_free(
            &base,
            options.max_disambiguation_attempts,
            |candidate| !taken.contains(candidate),
            |k| format!("{}_{}", base, k),
        )
        .ok_or_else(|| TranslateError::SelectorCollisionUnresolved {
            scope: scope.clone(),
            name: base.clone(),
            attempts: options.max_disambiguation_attempts,
            span: decl.span,
        })?;
        taken.insert(name.clone());
        decl.flat_name = Some(name);
    }
    Ok(())
}

/// Unit types ordered so every supertype declared in the unit comes first.
pub(crate) fn supertype_order(unit: &CompilationUnit) -> Vec<usize> {
    let index: HashMap<&str, usize> = unit
        .types
        .iter()
        .enumerate()
        .map(|(i, decl)| (decl.qualified_name.as_str(), i))
        .collect();

    fn visit(
        i: usize,
        unit: &CompilationUnit,
        index: &HashMap<&str, usize>,
        seen: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if seen[i] {
            return;
        }
        seen[i] = true;
        let decl = &unit.types[i];
        let supers = decl
            .superclass
            .iter()
            .chain(&decl.interfaces)
            .filter_map(Type::class_name);
        for name in supers {
            if let Some(&j) = index.get(name) {
                visit(j, unit, index, seen, order);
            }
        }
        order.push(i);
    }

    let mut seen = vec![false; unit.types.len()];
    let mut order = Vec::with_capacity(unit.types.len());
    for i in 0..unit.types.len() {
        visit(i, unit, &index, &mut seen, &mut order);
    }
    order
}

/// Insert `suffix` at the end of the selector's last keyword.
fn suffix_last_keyword(selector: &str, suffix: &str) -> String {
    match selector.strip_suffix(':') {
        Some(head) => format!("{}{}:", head, suffix),
        None => format!("{}{}", selector, suffix),
    }
}

fn derived_selector(names: &NameTable<'_>, name: &str, params: &[Type]) -> String {
    if name == CONSTRUCTOR_NAME {
        return names.selector("init", params);
    }
    if let Some(mapped) = names.library().mapped_selector(name, params) {
        return mapped.to_string();
    }
    names.selector(&method_base_name(name), params)
}

fn is_inheritable(method: &MethodDecl) -> bool {
    !method.is_constructor() && !method.is_static() && method.modifiers.visibility != Visibility::Private
}

fn assign_method_selectors(
    unit: &mut CompilationUnit,
    names: &NameTable<'_>,
    options: &Options,
) -> Result<SelectorTable> {
    let type_params: HashMap<String, Vec<String>> = unit
        .types
        .iter()
        .map(|decl| (decl.qualified_name.clone(), decl.type_params.clone()))
        .collect();
    let mut table = SelectorTable::default();
    for i in supertype_order(unit) {
        let decl = &mut unit.types[i];

        // Supertype methods with the supertype's arguments substituted, so
        // `put(T)` seen through `Box<String>` is keyed as `put(String)`.
        let mut inherited_methods: Vec<InheritedMethod> = Vec::new();
        let mut inherited: HashMap<MethodKey, String> = HashMap::new();
        // Call sites may still name the method by the supertype's erasure.
        let mut erased_aliases: HashMap<MethodKey, String> = HashMap::new();
        for sup in decl.superclass.iter().chain(&decl.interfaces) {
            let Some(name) = sup.class_name() else { continue };
            let Some(visible) = table.inheritable.get(name) else { continue };
            let bindings = sup.bindings(type_params.get(name).map_or(&[][..], Vec::as_slice));
            for method in visible {
                erased_aliases
                    .entry(method.key())
                    .or_insert_with(|| method.selector.clone());
                let seen = InheritedMethod {
                    name: method.name.clone(),
                    params: method.params.iter().map(|ty| ty.substitute(&bindings)).collect(),
                    selector: method.selector.clone(),
                };
                let key = seen.key();
                if !inherited.contains_key(&key) {
                    inherited.insert(key, seen.selector.clone());
                    inherited_methods.push(seen);
                }
            }
        }

        let scope = format!("`{}`", decl.qualified_name);
        let methods: Vec<&mut MethodDecl> = decl
            .members
            .iter_mut()
            .filter_map(|member| match member {
                Member::Method(method) => Some(method),
                _ => None,
            })
            .collect();
        let keys: Vec<MethodKey> = methods
            .iter()
            .map(|m| method_key(&m.name, &m.param_types()))
            .collect();

        let mut taken: HashSet<String> = HashSet::new();
        let mut assigned: Vec<Option<String>> = vec![None; methods.len()];

        for (idx, method) in methods.iter().enumerate() {
            let overridden = inherited
                .get(&keys[idx])
                .filter(|_| is_inheritable(method));
            let fixed = if let Some(selector) = overridden {
                Some(selector.clone())
            } else if let Some(name) = native_name_annotation(&method.annotations) {
                if !is_valid_selector(name) {
                    return Err(TranslateError::unsupported(
                        format!("invalid selector `{}` on `{}`", name, method.name),
                        method.span,
                    ));
                }
                Some(name.to_string())
            } else if method.is_constructor() {
                None
            } else {
                names
                    .library()
                    .mapped_selector(&method.name, &keys[idx].1)
                    .map(str::to_string)
            };
            if let Some(selector) = fixed {
                if !taken.insert(selector.clone()) {
                    return Err(TranslateError::SelectorCollisionUnresolved {
                        scope,
                        name: selector,
                        attempts: 0,
                        span: method.span,
                    });
                }
                assigned[idx] = Some(selector);
            }
        }

        // Inherited selectors that nothing here overrides are still taken.
        for (key, selector) in &inherited {
            if !keys.contains(key) {
                taken.insert(selector.clone());
            }
        }

        for (idx, method) in methods.iter().enumerate() {
            if assigned[idx].is_some() {
                continue;
            }
            let base = derived_selector(names, &method.name, &keys[idx].1);
            let selector = first_free(
                &base,
                options.max_disambiguation_attempts,
                |candidate| !taken.contains(candidate),
                |k| {
                    if k == 1 {
                        suffix_last_keyword(&base, &format!("_{}", idx))
                    } else {
                        suffix_last_keyword(&base, &format!("_{}_{}", idx, k))
                    }
                },
            )
            .ok_or_else(|| TranslateError::SelectorCollisionUnresolved {
                scope: scope.clone(),
                name: base.clone(),
                attempts: options.max_disambiguation_attempts,
                span: method.span,
            })?;
            taken.insert(selector.clone());
            assigned[idx] = Some(selector);
        }

        let mut all = inherited;
        let mut inheritable = inherited_methods;
        for ((method, key), selector) in methods.into_iter().zip(keys).zip(assigned) {
            let Some(selector) = selector else { continue };
            if is_inheritable(method) {
                inheritable.retain(|seen| seen.key() != key);
                inheritable.push(InheritedMethod {
                    name: method.name.clone(),
                    params: method.param_types(),
                    selector: selector.clone(),
                });
            }
            all.insert(key, selector.clone());
            method.selector = Some(selector);
        }
        for (key, selector) in erased_aliases {
            all.entry(key).or_insert(selector);
        }
        table.all.insert(decl.qualified_name.clone(), all);
        table.inheritable.insert(decl.qualified_name.clone(), inheritable);
    }
    Ok(table)
}

/// Fills in selectors at call sites and native names of field accesses and
/// variables.
struct CallSiteResolver<'t, 'a> {
    names: &'t NameTable<'a>,
    table: &'t SelectorTable,
}

impl CallSiteResolver<'_, '_> {
    fn selector_for(&self, method: &MethodRef) -> String {
        let key = method_key(&method.name, &method.params);
        match self.table.all.get(&method.declaring).and_then(|visible| visible.get(&key)) {
            Some(selector) => selector.clone(),
            None => derived_selector(self.names, &method.name, &method.params),
        }
    }

    fn field_name(&self, field: &FieldRef) -> String {
        if field.is_static {
            static_var_name(&self.names.type_name(&field.declaring), &field.name)
        } else {
            ivar_name(&field.name)
        }
    }
}

impl VisitorMut for CallSiteResolver<'_, '_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) -> VisitResult {
        match &mut expr.kind {
            ExprKind::MethodCall {
                method, selector, ..
            } => *selector = Some(self.selector_for(method)),
            ExprKind::New { ctor, selector, .. } => *selector = Some(self.selector_for(ctor)),
            ExprKind::FieldAccess { field, .. } => field.native_name = Some(self.field_name(field)),
            _ => {}
        }
        Ok(())
    }

    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) -> VisitResult {
        match &mut stmt.kind {
            StmtKind::SuperConstructorCall { ctor, selector, .. }
            | StmtKind::ThisConstructorCall { ctor, selector, .. } => {
                *selector = Some(self.selector_for(ctor))
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_var_mut(&mut self, var: &mut VarDecl) -> VisitResult {
        var.native_name = Some(variable_name(&var.name, var.origin == VarOrigin::Parameter));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;

    fn class(qualified: &str) -> TypeDecl {
        let mut decl = TypeDecl::new(TypeKind::Class, qualified);
        decl.binary_name = Some(qualified.to_string());
        decl
    }

    fn method(name: &str, params: Vec<Type>) -> MethodDecl {
        let params = params
            .into_iter()
            .enumerate()
            .map(|(i, ty)| VarDecl::param(LocalId(i as u32), format!("p{}", i), ty))
            .collect();
        MethodDecl::new(name, params, Type::Void).with_body(vec![])
    }

    fn resolved(types: Vec<TypeDecl>) -> CompilationUnit {
        let mut unit = CompilationUnit::new("p/A.java", Some("p"));
        unit.types = types;
        resolve(unit, &LibraryMetadata::builtin(), &Options::default()).unwrap()
    }

    fn selectors(decl: &TypeDecl) -> Vec<&str> {
        decl.methods().filter_map(|m| m.selector.as_deref()).collect()
    }

    #[test]
    fn test_selectors_follow_parameter_tokens() {
        let mut decl = class("p.A");
        decl.members.push(Member::Method(method("run", vec![])));
        decl.members.push(Member::Method(method(
            "put",
            vec![Type::int(), Type::string(), Type::array(Type::object())],
        )));
        decl.members.push(Member::Method(method("id", vec![Type::object()])));
        let unit = resolved(vec![decl]);
        assert_eq!(unit.types[0].flat_name.as_deref(), Some("PA"));
        assert_eq!(
            selectors(&unit.types[0]),
            vec![
                "run",
                "putWithInt:withNSString:withNSObjectArray:",
                "id__WithId:"
            ]
        );
    }

    #[test]
    fn test_override_reuses_inherited_selector() {
        let mut base = class("p.Base");
        base.members.push(Member::Method(method("visit", vec![Type::class("p.Base")])));
        let mut sub = class("p.Sub");
        sub.superclass = Some(Type::class("p.Base"));
        sub.members.push(Member::Method(method("visit", vec![Type::class("p.Base")])));
        // subtype first: ordering must not depend on declaration order
        let unit = resolved(vec![sub, base]);
        assert_eq!(selectors(&unit.types[0]), vec!["visitWithPBase:"]);
        assert_eq!(selectors(&unit.types[1]), vec!["visitWithPBase:"]);
    }

    #[test]
    fn test_override_through_parameterized_supertype() {
        let t = Type::TypeVar {
            name: "T".into(),
            bound: None,
        };
        let mut boxed = class("p.Box");
        boxed.type_params = vec!["T".into()];
        boxed.members.push(Member::Method(method("put", vec![t.clone()])));
        let mut strings = class("p.StringBox");
        strings.superclass = Some(Type::Class {
            name: "p.Box".into(),
            args: vec![Type::string()],
        });
        strings.members.push(Member::Method(method("put", vec![Type::string()])));
        strings.members.push(Member::Method(method("put", vec![Type::int()])));
        let mut last = class("p.LastBox");
        last.superclass = Some(Type::class("p.StringBox"));
        last.members.push(Member::Method(method("put", vec![Type::string()])));

        let unit = resolved(vec![last, strings, boxed]);
        assert_eq!(selectors(&unit.types[2]), vec!["putWithId:"]);
        assert_eq!(selectors(&unit.types[1]), vec!["putWithId:", "putWithInt:"]);
        assert_eq!(selectors(&unit.types[0]), vec!["putWithId:"]);
    }

    #[test]
    fn test_raw_supertype_erases_to_bound() {
        let t = Type::TypeVar {
            name: "T".into(),
            bound: Some(Box::new(Type::class("java.lang.Number"))),
        };
        let mut base = class("p.Base");
        base.type_params = vec!["T".into()];
        base.members.push(Member::Method(method("take", vec![t])));
        let mut sub = class("p.Sub");
        sub.superclass = Some(Type::class("p.Base"));
        sub.members.push(Member::Method(method("take", vec![Type::class("java.lang.Number")])));
        let unit = resolved(vec![base, sub]);
        assert_eq!(selectors(&unit.types[0]), vec!["takeWithNSNumber:"]);
        assert_eq!(selectors(&unit.types[1]), vec!["takeWithNSNumber:"]);
    }

    #[test]
    fn test_library_mappings_apply_to_overrides() {
        let mut decl = class("p.A");
        decl.members.push(Member::Method(method("toString", vec![])));
        decl.members.push(Member::Method(method("equals", vec![Type::object()])));
        decl.members.push(Member::Method(method("hashCode", vec![])));
        let unit = resolved(vec![decl]);
        assert_eq!(selectors(&unit.types[0]), vec!["description", "isEqual:", "hash"]);
    }

    #[test]
    fn test_collision_gets_declaration_index() {
        let mut decl = class("p.A");
        decl.members.push(Member::Method(method("hash", vec![])));
        decl.members.push(Member::Method(method("hash__", vec![])));
        decl.members.push(Member::Method(method("f", vec![Type::int()])));
        let unit = resolved(vec![decl]);
        assert_eq!(selectors(&unit.types[0]), vec!["hash__", "hash___1", "fWithInt:"]);
    }

    #[test]
    fn test_collision_bound_is_reported() {
        let mut decl = class("p.A");
        decl.members.push(Member::Method(method("hash", vec![])));
        decl.members.push(Member::Method(method("hash__", vec![])));
        let mut unit = CompilationUnit::new("p/A.java", Some("p"));
        unit.types.push(decl);
        let options = Options::default().with_max_disambiguation_attempts(0);
        let err = resolve(unit, &LibraryMetadata::builtin(), &options).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::SelectorCollisionUnresolved { attempts: 0, .. }
        ));
    }

    #[test]
    fn test_type_name_collision_with_library() {
        let mut unit = CompilationUnit::new("NSString.java", None);
        unit.types.push(class("NSString"));
        let unit = resolve(unit, &LibraryMetadata::builtin(), &Options::default()).unwrap();
        assert_eq!(unit.types[0].flat_name.as_deref(), Some("NSString_1"));
    }

    #[test]
    fn test_constructor_selector_includes_captures() {
        let mut decl = class("p.A$1");
        let outer = VarDecl::param(LocalId(0), "outer$", Type::class("p.A"));
        let n = VarDecl::param(LocalId(1), "n", Type::Primitive(PrimitiveType::Long));
        let mut ctor = MethodDecl::constructor(vec![outer, n]);
        ctor.captured_params = 1;
        ctor.body = Some(Block::new(vec![]));
        decl.members.push(Member::Method(ctor));
        let unit = resolved(vec![decl]);
        assert_eq!(selectors(&unit.types[0]), vec!["initWithPA:withLong:"]);
    }

    #[test]
    fn test_call_sites_and_fields_get_native_names() {
        let x = VarDecl::new(LocalId(5), "out", Type::int());
        let body = vec![
            Stmt::local(
                x,
                Some(Expr::field(
                    None,
                    FieldRef::new_static("p.A", "COUNT"),
                    Type::int(),
                )),
            ),
            Stmt::expr(Expr::call(
                Some(Expr::this(Type::class("p.A"))),
                MethodRef::new("p.A", "toString", vec![], Type::string()),
                vec![],
            )),
        ];
        let mut decl = class("p.A");
        decl.members.push(Member::Field(FieldDecl::new("count", Type::int())));
        decl.members.push(Member::Method(method("f", vec![]).with_body(body)));
        let unit = resolved(vec![decl]);
        assert!(check(&unit, Level::Resolved, Stage::Memory).is_ok());

        let decl = &unit.types[0];
        assert_eq!(decl.field("count").and_then(|f| f.native_name.as_deref()), Some("count_"));
        let Some(Member::Method(f)) = decl.members.get(1) else { panic!("method expected") };
        let stmts = &f.body.as_ref().unwrap().stmts;
        let StmtKind::Local { var, init: Some(init) } = &stmts[0].kind else { panic!() };
        // not a parameter, so no `Arg` suffix
        assert_eq!(var.native_name.as_deref(), Some("out"));
        let ExprKind::FieldAccess { field, .. } = &init.kind else { panic!() };
        assert_eq!(field.native_name.as_deref(), Some("PA_COUNT"));
        let StmtKind::Expr(call) = &stmts[1].kind else { panic!() };
        let ExprKind::MethodCall { selector, .. } = &call.kind else { panic!() };
        assert_eq!(selector.as_deref(), Some("description"));
    }
}
