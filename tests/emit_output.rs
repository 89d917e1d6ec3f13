//! Shape of the emitted declaration and definition units
//!
//! These tests check the structure a build system and the runtime rely
//! on: file layout, include guards, declaration order, static state and
//! the reflective metadata block.

use basalt::ast::*;
use basalt::test_support::*;
use basalt::types::{PrimitiveType, Type};
use basalt::{MemoryModel, Options};

fn constant(name: &str, value: i64) -> Member {
    let modifiers = Modifiers {
        is_final: true,
        ..public_static()
    };
    Member::Field(
        FieldDecl::new(name, Type::int())
            .with_modifiers(modifiers)
            .with_init(Expr::int(value)),
    )
}

fn abstract_method(name: &str, return_type: Type) -> Member {
    Member::Method(MethodDecl::new(name, vec![], return_type))
}

// ============================================================================
// Layout
// ============================================================================

#[test]
fn header_is_guarded_and_bannered() {
    let options = Options::default().with_banner("Generated by basalt\nDo not edit");
    let translation = translate_with(unit("p", vec![class("p.A")]), options).unwrap();
    let artifacts = &translation.artifacts;
    assert_eq!(artifacts.header_path, "p/A.h");
    assert_eq!(artifacts.source_path, "p/A.m");

    let header = &artifacts.header;
    assert!(header.starts_with(
        "//\n//  Generated by basalt\n//  Do not edit\n//  source: p/A.java\n//\n\n#ifndef P_A_H\n#define P_A_H\n"
    ));
    assert!(header.contains("#include \"J2ObjC_header.h\""));
    assert!(header.trim_end().ends_with("#endif // P_A_H"));
    assert!(header.contains("@interface PA : NSObject"));
    assert!(header.contains("J2OBJC_EMPTY_STATIC_INIT(PA)"));
    assert!(header.contains("J2OBJC_TYPE_LITERAL_HEADER(PA)"));

    let source = &artifacts.source;
    assert!(source.contains("#include \"p/A.h\"\n#include \"J2ObjC_source.h\""));
    assert!(source.contains("@implementation PA"));
    assert!(source.contains("J2OBJC_CLASS_TYPE_LITERAL_SOURCE(PA)"));
}

#[test]
fn package_prefix_replaces_camel_cased_package() {
    let options = Options::default().with_package_prefix("com.example.app", "CEA");
    let translation = translate_with(unit("com.example.app", vec![class("com.example.app.Main")]), options).unwrap();
    assert!(translation.artifacts.header.contains("@interface CEAMain : NSObject"));
    assert_eq!(translation.artifacts.header_path, "com/example/app/Main.h");

    let plain = translate(unit("com.example.app", vec![class("com.example.app.Main")])).unwrap();
    assert!(plain.artifacts.header.contains("@interface ComExampleAppMain : NSObject"));
}

#[test]
fn supertypes_declared_before_subtypes() {
    let mut sub = class("p.Sub");
    sub.superclass = Some(Type::class("p.Base"));
    let translation = translate(unit("p", vec![sub, class("p.Base")])).unwrap();
    let header = &translation.artifacts.header;
    let base = header.find("@interface PBase : NSObject").unwrap();
    let sub = header.find("@interface PSub : PBase").unwrap();
    assert!(base < sub);
}

// ============================================================================
// Members
// ============================================================================

#[test]
fn primitive_constant_becomes_define() {
    let mut decl = class("p.Limits");
    decl.members.push(constant("MAX", 10));
    let translation = translate(unit("p", vec![decl])).unwrap();
    assert!(translation.artifacts.header.contains("#define PLimits_MAX 10"));
    assert!(!translation.artifacts.source.contains("PLimits_MAX"));
}

#[test]
fn runtime_static_state_gets_initialize() {
    let mut decl = class("p.Counter");
    decl.members.push(Member::Field(
        FieldDecl::new("count", Type::int())
            .with_modifiers(public_static())
            .with_init(Expr::int(5)),
    ));
    let translation = translate(unit("p", vec![decl])).unwrap();
    let header = &translation.artifacts.header;
    assert!(header.contains("J2OBJC_STATIC_INIT(PCounter)"));
    assert!(header.contains("FOUNDATION_EXPORT jint PCounter_count;"));

    let source = &translation.artifacts.source;
    assert!(source.contains("jint PCounter_count;"));
    assert!(source.contains("+ (void)initialize {"));
    assert!(source.contains("if (self == [PCounter class]) {"));
    assert!(source.contains("PCounter_count = 5;"));
    assert!(source.contains("J2OBJC_SET_INITIALIZED(PCounter)"));
}

#[test]
fn private_methods_stay_out_of_the_header() {
    let mut decl = class("p.A");
    decl.members.push(Member::Method(
        MethodDecl::new("helper", vec![], Type::Void)
            .with_body(vec![])
            .with_modifiers(private()),
    ));
    decl.members.push(method("run", vec![], Type::Void, vec![]));
    let translation = translate(unit("p", vec![decl])).unwrap();
    assert!(!translation.artifacts.header.contains("helper"));
    assert!(translation.artifacts.header.contains("- (void)run;"));
    let source = &translation.artifacts.source;
    let extension = source.find("@interface PA ()").unwrap();
    let implementation = source.find("@implementation PA").unwrap();
    assert!(extension < implementation);
    assert!(source.contains("- (void)helper {"));
}

#[test]
fn strong_fields_get_setters_and_release_in_dealloc() {
    let mut decl = class("p.Person");
    decl.members.push(field("name", Type::string()));
    decl.members.push(field("age", Type::int()));
    let translation = translate(unit("p", vec![decl])).unwrap();
    let header = &translation.artifacts.header;
    assert!(header.contains("NSString *name_;"));
    assert!(header.contains("jint age_;"));
    assert!(header.contains("J2OBJC_FIELD_SETTER(PPerson, name_, NSString *)"));
    assert!(!header.contains("J2OBJC_FIELD_SETTER(PPerson, age_"));

    let source = &translation.artifacts.source;
    assert!(source.contains("- (void)dealloc {"));
    assert!(source.contains("RELEASE_(name_);"));
    assert!(!source.contains("RELEASE_(age_);"));
    assert!(source.contains("[super dealloc];"));

    let arc = translate_with(
        unit("p", vec![{
            let mut decl = class("p.Person");
            decl.members.push(field("name", Type::string()));
            decl
        }]),
        Options::default().with_memory_model(MemoryModel::Arc),
    )
    .unwrap();
    assert!(!arc.artifacts.source.contains("dealloc"));
}

#[test]
fn default_constructor_returns_self() {
    let translation = translate(unit("p", vec![class("p.A")])).unwrap();
    assert!(translation.artifacts.header.contains("- (instancetype)init;"));
    let source = &translation.artifacts.source;
    assert!(source.contains("- (instancetype)init {"));
    assert!(source.contains("self = [super init];"));
    assert!(source.contains("return self;"));
}

// ============================================================================
// Interfaces and enums
// ============================================================================

#[test]
fn interface_becomes_protocol() {
    let mut shape = interface("p.Shape");
    shape
        .members
        .push(abstract_method("area", Type::Primitive(PrimitiveType::Double)));
    let mut square = class("p.Square");
    square.interfaces.push(Type::class("p.Shape"));
    square.members.push(method(
        "area",
        vec![],
        Type::Primitive(PrimitiveType::Double),
        vec![Stmt::ret(Some(Expr::new(
            ExprKind::Literal(Literal::Double(4.0)),
            Type::Primitive(PrimitiveType::Double),
        )))],
    ));
    let translation = translate(unit("p", vec![square, shape])).unwrap();
    let header = &translation.artifacts.header;
    assert!(header.contains("@protocol PShape <NSObject>"));
    assert!(header.contains("- (jdouble)area;"));
    assert!(header.contains("@interface PSquare : NSObject <PShape>"));
    let protocol = header.find("@protocol PShape <NSObject>").unwrap();
    let class = header.find("@interface PSquare").unwrap();
    assert!(protocol < class);
    assert!(translation
        .artifacts
        .source
        .contains("J2OBJC_INTERFACE_TYPE_LITERAL_SOURCE(PShape)"));
}

#[test]
fn interface_default_method_is_unsupported() {
    let mut shape = interface("p.Shape");
    shape.members.push(method("describe", vec![], Type::Void, vec![]));
    let failure = translate(unit("p", vec![shape])).unwrap_err();
    assert_eq!(failure.error.kind(), "unsupported_construct");
}

#[test]
fn enum_gets_ordinal_typedef_and_constant_globals() {
    let translation = translate(unit("p", vec![enumeration("p.Color", &["RED", "GREEN"])])).unwrap();
    let header = &translation.artifacts.header;
    assert!(header.contains("typedef NS_ENUM(NSUInteger, PColor_Enum) {"));
    assert!(header.contains("PColor_Enum_RED = 0,"));
    assert!(header.contains("PColor_Enum_GREEN = 1,"));
    assert!(header.contains("@interface PColor : JavaLangEnum"));
    assert!(header.contains("#include \"JavaLangEnum.h\""));
    assert!(header.contains("J2OBJC_STATIC_INIT(PColor)"));
    assert!(header.contains("FOUNDATION_EXPORT PColor *PColor_RED;"));
    assert!(translation.artifacts.source.contains("+ (void)initialize {"));
}

// ============================================================================
// Reflection
// ============================================================================

#[test]
fn metadata_block_follows_reflection_option() {
    let mut decl = class("p.A");
    decl.members.push(field("x", Type::int()));
    decl.members.push(method("run", vec![], Type::Void, vec![]));

    let with = translate(unit("p", vec![decl.clone()])).unwrap();
    let source = &with.artifacts.source;
    assert!(source.contains("+ (const J2ObjcClassInfo *)__metadata {"));
    assert!(source.contains("\"run\""));
    assert!(source.contains("\"x_\""));
    assert!(source.contains("static const J2ObjcClassInfo _PA = { \"A\", \"p\""));

    let without = translate_with(unit("p", vec![decl]), Options::default().with_reflection(false)).unwrap();
    assert!(!without.artifacts.source.contains("__metadata"));
}
