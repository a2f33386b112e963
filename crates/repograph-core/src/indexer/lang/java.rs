//! Java declarations and references.
//!
//! The module of a Java file is its `package` declaration (empty for the
//! default package), never its path.

use tree_sitter::Node;

use crate::indexer::symbols::{base_type_name, clean_children, Collector};
use crate::models::{DeclKind, ImportClause, RefKind};

pub fn walk(c: &mut Collector<'_>, root: Node<'_>) {
    let package = clean_children(root)
        .into_iter()
        .find(|n| n.kind() == "package_declaration")
        .and_then(|decl| {
            clean_children(decl)
                .into_iter()
                .find(|n| matches!(n.kind(), "scoped_identifier" | "identifier"))
        })
        .map(|n| c.text(n).to_string())
        .unwrap_or_default();
    c.set_module(package);
    visit(c, root);
}

fn visit(c: &mut Collector<'_>, node: Node<'_>) {
    if node.is_error() {
        return;
    }
    match node.kind() {
        "package_declaration" => {}
        "import_declaration" => import_declaration(c, node),
        "class_declaration" | "enum_declaration" | "record_declaration" => {
            type_declaration(c, node, DeclKind::Class)
        }
        "interface_declaration" | "annotation_type_declaration" => {
            type_declaration(c, node, DeclKind::Interface)
        }
        "method_declaration" | "constructor_declaration" => method_declaration(c, node),
        "method_invocation" => method_invocation(c, node),
        "object_creation_expression" => object_creation(c, node),
        _ => visit_children(c, node),
    }
}

fn visit_children(c: &mut Collector<'_>, node: Node<'_>) {
    for child in clean_children(node) {
        visit(c, child);
    }
}

/// `import a.b.C;` / `import a.b.*;` / `import static a.b.C.m;`
fn import_declaration(c: &mut Collector<'_>, node: Node<'_>) {
    let children = clean_children(node);
    let Some(path) = children
        .iter()
        .find(|n| matches!(n.kind(), "scoped_identifier" | "identifier"))
    else {
        return;
    };
    let clause = ImportClause {
        wildcard: children.iter().any(|n| n.kind() == "asterisk"),
        ..ImportClause::default()
    };
    c.import(c.text(*path), clause, node);
}

/// Record a written type as `kind`, splitting a qualifier into the receiver.
fn type_reference(c: &mut Collector<'_>, kind: RefKind, node: Node<'_>) {
    match node.kind() {
        "type_identifier" => c.reference(kind, c.text(node), None, node),
        "scoped_type_identifier" => {
            let written = base_type_name(c.text(node));
            let receiver = written.rsplit_once('.').map(|(q, _)| q);
            c.reference(kind, written, receiver, node);
        }
        "generic_type" => {
            if let Some(base) = clean_children(node).into_iter().next() {
                type_reference(c, kind, base);
            }
        }
        _ => {}
    }
}

fn type_declaration(c: &mut Collector<'_>, node: Node<'_>, kind: DeclKind) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    c.enter(kind, c.text(name), node);
    for child in clean_children(node) {
        match child.kind() {
            "superclass" => {
                for ty in clean_children(child) {
                    type_reference(c, RefKind::Inheritance, ty);
                }
            }
            "super_interfaces" | "extends_interfaces" => {
                for list in clean_children(child) {
                    for ty in clean_children(list) {
                        type_reference(c, RefKind::Inheritance, ty);
                    }
                }
            }
            _ => {}
        }
    }
    if let Some(body) = node.child_by_field_name("body") {
        visit_children(c, body);
    }
    c.leave();
}

fn method_declaration(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    c.enter(DeclKind::Method, c.text(name), node);
    if let Some(body) = node.child_by_field_name("body") {
        visit_children(c, body);
    }
    c.leave();
}

fn method_invocation(c: &mut Collector<'_>, node: Node<'_>) {
    if let Some(name) = node.child_by_field_name("name") {
        let name = c.text(name);
        match node.child_by_field_name("object") {
            Some(object) => {
                let receiver = c.text(object);
                c.reference(RefKind::Call, &format!("{receiver}.{name}"), Some(receiver), node);
            }
            None => c.reference(RefKind::Call, name, None, node),
        }
    }
    visit_children(c, node);
}

fn object_creation(c: &mut Collector<'_>, node: Node<'_>) {
    if let Some(ty) = node.child_by_field_name("type") {
        type_reference(c, RefKind::Instantiation, ty);
    }
    visit_children(c, node);
}
