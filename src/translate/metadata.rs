//! Reflective metadata block of a definition unit.
//!
//! One `+__metadata` method per class returning a static class-info record
//! with a method table (selector, source name, return descriptor, access
//! flags) and a field table (native name, source name, descriptor, access
//! flags). Rows follow declaration order.

use crate::ast::{Member, TypeDecl, CONSTRUCTOR_NAME};
use crate::translate::source_builder::{escape_string, SourceBuilder};
use crate::types::split_qualified;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRow {
    pub selector: String,
    pub java_name: String,
    pub return_descriptor: String,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRow {
    pub native_name: String,
    pub java_name: String,
    pub descriptor: String,
    pub flags: u32,
}

/// Synthetic members carry the JVM `ACC_SYNTHETIC` bit.
const SYNTHETIC: u32 = 0x1000;

pub fn method_rows(decl: &TypeDecl) -> Vec<MethodRow> {
    decl.methods()
        .filter_map(|method| {
            let selector = method.selector.clone()?;
            let return_descriptor = if method.name == CONSTRUCTOR_NAME {
                "V".to_string()
            } else {
                method.return_type.descriptor()
            };
            Some(MethodRow {
                selector,
                java_name: method.name.clone(),
                return_descriptor,
                flags: method.modifiers.access_flags(),
            })
        })
        .collect()
}

pub fn field_rows(decl: &TypeDecl) -> Vec<FieldRow> {
    decl.members
        .iter()
        .filter_map(|member| match member {
            Member::Field(field) => Some(field),
            _ => None,
        })
        .filter_map(|field| {
            let mut flags = field.modifiers.access_flags();
            if field.synthetic {
                flags |= SYNTHETIC;
            }
            Some(FieldRow {
                native_name: field.native_name.clone()?,
                java_name: field.name.clone(),
                descriptor: field.ty.descriptor(),
                flags,
            })
        })
        .collect()
}

fn c_string(s: &str) -> String {
    format!("\"{}\"", escape_string(s))
}

/// Write the `+__metadata` method of a class.
pub fn write_metadata(out: &mut SourceBuilder, decl: &TypeDecl, flat_name: &str) {
    let methods = method_rows(decl);
    let fields = field_rows(decl);
    let (package, _) = split_qualified(&decl.qualified_name);

    out.open("+ (const J2ObjcClassInfo *)__metadata {");
    if !methods.is_empty() {
        out.open("static const J2ObjcMethodInfo methods[] = {");
        for row in &methods {
            out.line(format!(
                "{{ {}, {}, {}, 0x{:x} }},",
                c_string(&row.selector),
                c_string(&row.java_name),
                c_string(&row.return_descriptor),
                row.flags
            ));
        }
        out.close("};");
    }
    if !fields.is_empty() {
        out.open("static const J2ObjcFieldInfo fields[] = {");
        for row in &fields {
            out.line(format!(
                "{{ {}, {}, {}, 0x{:x} }},",
                c_string(&row.native_name),
                c_string(&row.java_name),
                c_string(&row.descriptor),
                row.flags
            ));
        }
        out.close("};");
    }
    let package = if package.is_empty() { "NULL".to_string() } else { c_string(package) };
    let binary = decl.binary_name.as_deref().unwrap_or(&decl.name);
    let (_, simple) = split_qualified(binary);
    out.line(format!(
        "static const J2ObjcClassInfo _{} = {{ {}, {}, {}, {}, 0x{:x}, {}, {} }};",
        flat_name,
        c_string(simple),
        package,
        if methods.is_empty() { "NULL" } else { "methods" },
        if fields.is_empty() { "NULL" } else { "fields" },
        decl.modifiers.access_flags(),
        methods.len(),
        fields.len()
    ));
    out.line(format!("return &_{};", flat_name));
    out.close("}");
}
