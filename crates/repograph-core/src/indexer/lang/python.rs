//! Python declarations and references.

use tree_sitter::Node;

use crate::indexer::symbols::{clean_children, Collector};
use crate::models::{DeclKind, ImportClause, ImportedName, RefKind};

pub fn walk(c: &mut Collector<'_>, node: Node<'_>) {
    if node.is_error() {
        return;
    }
    match node.kind() {
        "import_statement" => import_statement(c, node),
        "import_from_statement" => import_from_statement(c, node),
        "class_definition" => class_definition(c, node),
        "function_definition" => function_definition(c, node),
        "call" => call(c, node),
        _ => walk_children(c, node),
    }
}

fn walk_children(c: &mut Collector<'_>, node: Node<'_>) {
    for child in clean_children(node) {
        walk(c, child);
    }
}

fn aliased(c: &Collector<'_>, node: Node<'_>) -> (String, Option<String>) {
    match node.kind() {
        "aliased_import" => {
            let name = node
                .child_by_field_name("name")
                .map(|n| c.text(n))
                .unwrap_or_default();
            let alias = node.child_by_field_name("alias").map(|n| c.text(n).to_string());
            (name.to_string(), alias)
        }
        _ => (c.text(node).to_string(), None),
    }
}

/// `import a.b` / `import a.b as c`
fn import_statement(c: &mut Collector<'_>, node: Node<'_>) {
    let mut cursor = node.walk();
    let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
    for name in names {
        let (module, alias) = aliased(c, name);
        let clause = ImportClause {
            module_alias: alias,
            ..ImportClause::default()
        };
        c.import(&module, clause, node);
    }
}

/// `from m import x as y, z` / `from . import x` / `from m import *`
fn import_from_statement(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(module) = node.child_by_field_name("module_name") else {
        return;
    };
    let module = c.text(module).to_string();

    let mut clause = ImportClause::default();
    let mut cursor = node.walk();
    let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
    for name in names {
        let (name, alias) = aliased(c, name);
        clause.names.push(ImportedName { name, alias });
    }
    clause.wildcard = clean_children(node)
        .iter()
        .any(|child| child.kind() == "wildcard_import");
    c.import(&module, clause, node);
}

fn class_definition(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    c.enter(DeclKind::Class, c.text(name), node);
    if let Some(bases) = node.child_by_field_name("superclasses") {
        for base in clean_children(bases) {
            match base.kind() {
                "identifier" => c.reference(RefKind::Inheritance, c.text(base), None, base),
                "attribute" => {
                    let receiver = base.child_by_field_name("object").map(|o| c.text(o));
                    c.reference(RefKind::Inheritance, c.text(base), receiver, base);
                }
                _ => {}
            }
        }
    }
    if let Some(body) = node.child_by_field_name("body") {
        walk_children(c, body);
    }
    c.leave();
}

fn function_definition(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    let kind = match c.enclosing_kind() {
        Some(DeclKind::Class) => DeclKind::Method,
        _ => DeclKind::Function,
    };
    c.enter(kind, c.text(name), node);
    if let Some(params) = node.child_by_field_name("parameters") {
        walk_children(c, params);
    }
    if let Some(body) = node.child_by_field_name("body") {
        walk_children(c, body);
    }
    c.leave();
}

fn call(c: &mut Collector<'_>, node: Node<'_>) {
    if let Some(function) = node.child_by_field_name("function") {
        match function.kind() {
            "identifier" => c.reference(RefKind::Call, c.text(function), None, node),
            "attribute" => {
                let receiver = function.child_by_field_name("object").map(|o| c.text(o));
                c.reference(RefKind::Call, c.text(function), receiver, node);
            }
            _ => {}
        }
    }
    walk_children(c, node);
}
