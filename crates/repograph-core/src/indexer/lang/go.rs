//! Go declarations and references.

use tree_sitter::Node;

use crate::indexer::symbols::{clean_children, go_module_name, unquote, Collector};
use crate::models::{DeclKind, ImportClause, RefKind};

pub fn walk(c: &mut Collector<'_>, root: Node<'_>) {
    let package = clean_children(root)
        .into_iter()
        .find(|n| n.kind() == "package_clause")
        .and_then(|clause| clean_children(clause).into_iter().next())
        .map(|n| c.text(n).to_string())
        .unwrap_or_default();
    let module = go_module_name(c.path(), &package);
    c.set_module(module);
    visit(c, root);
}

fn visit(c: &mut Collector<'_>, node: Node<'_>) {
    if node.is_error() {
        return;
    }
    match node.kind() {
        "package_clause" => {}
        "import_spec" => import_spec(c, node),
        "function_declaration" => function_declaration(c, node),
        "method_declaration" => method_declaration(c, node),
        "type_spec" => type_spec(c, node),
        "call_expression" => call_expression(c, node),
        "composite_literal" => composite_literal(c, node),
        _ => visit_children(c, node),
    }
}

fn visit_children(c: &mut Collector<'_>, node: Node<'_>) {
    for child in clean_children(node) {
        visit(c, child);
    }
}

/// `import "a/b"` / `import x "a/b"` / `import . "a/b"`
fn import_spec(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(path) = node.child_by_field_name("path") else {
        return;
    };
    let path = unquote(c.text(path));
    let mut clause = ImportClause::default();
    match node.child_by_field_name("name") {
        Some(name) if name.kind() == "dot" => clause.wildcard = true,
        Some(name) if name.kind() == "blank_identifier" => {}
        Some(name) => clause.module_alias = Some(c.text(name).to_string()),
        None => {
            clause.module_alias = path.rsplit('/').next().map(str::to_string);
        }
    }
    c.import(path, clause, node);
}

fn function_declaration(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    c.enter(DeclKind::Function, c.text(name), node);
    if let Some(body) = node.child_by_field_name("body") {
        visit_children(c, body);
    }
    c.leave();
}

/// Receiver type name of `func (s *Server) Run()`.
fn receiver_type(c: &Collector<'_>, receiver: Node<'_>) -> Option<String> {
    let param = clean_children(receiver)
        .into_iter()
        .find(|n| n.kind() == "parameter_declaration")?;
    let mut ty = param.child_by_field_name("type")?;
    loop {
        match ty.kind() {
            "pointer_type" => ty = clean_children(ty).into_iter().next()?,
            "generic_type" => ty = ty.child_by_field_name("type")?,
            "type_identifier" => return Some(c.text(ty).to_string()),
            _ => return None,
        }
    }
}

fn method_declaration(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    let owner = node
        .child_by_field_name("receiver")
        .and_then(|r| receiver_type(c, r));

    match owner {
        Some(owner) => {
            c.push_scope(DeclKind::Class, &owner);
            c.enter(DeclKind::Method, c.text(name), node);
            if let Some(body) = node.child_by_field_name("body") {
                visit_children(c, body);
            }
            c.leave();
            c.leave();
        }
        None => {
            c.enter(DeclKind::Method, c.text(name), node);
            if let Some(body) = node.child_by_field_name("body") {
                visit_children(c, body);
            }
            c.leave();
        }
    }
}

fn type_reference(c: &mut Collector<'_>, kind: RefKind, node: Node<'_>) {
    match node.kind() {
        "type_identifier" => c.reference(kind, c.text(node), None, node),
        "qualified_type" => {
            let package = node.child_by_field_name("package").map(|p| c.text(p));
            c.reference(kind, c.text(node), package, node);
        }
        "pointer_type" | "generic_type" => {
            if let Some(inner) = clean_children(node).into_iter().next() {
                type_reference(c, kind, inner);
            }
        }
        _ => {}
    }
}

fn type_spec(c: &mut Collector<'_>, node: Node<'_>) {
    let (Some(name), Some(ty)) = (
        node.child_by_field_name("name"),
        node.child_by_field_name("type"),
    ) else {
        return;
    };
    let name = c.text(name);
    match ty.kind() {
        "struct_type" => {
            c.enter(DeclKind::Class, name, node);
            // Embedded fields have a type but no name.
            for list in clean_children(ty) {
                for field in clean_children(list) {
                    if field.kind() == "field_declaration"
                        && field.child_by_field_name("name").is_none()
                    {
                        if let Some(embedded) = field.child_by_field_name("type") {
                            type_reference(c, RefKind::Inheritance, embedded);
                        }
                    }
                }
            }
            c.leave();
        }
        "interface_type" => {
            c.enter(DeclKind::Interface, name, node);
            for elem in clean_children(ty) {
                if elem.kind() == "type_elem" {
                    for embedded in clean_children(elem) {
                        type_reference(c, RefKind::Inheritance, embedded);
                    }
                }
            }
            c.leave();
        }
        _ => {}
    }
}

fn call_expression(c: &mut Collector<'_>, node: Node<'_>) {
    if let Some(function) = node.child_by_field_name("function") {
        match function.kind() {
            "identifier" => c.reference(RefKind::Call, c.text(function), None, node),
            "selector_expression" => {
                let operand = function.child_by_field_name("operand").map(|o| c.text(o));
                c.reference(RefKind::Call, c.text(function), operand, node);
            }
            _ => {}
        }
    }
    visit_children(c, node);
}

fn composite_literal(c: &mut Collector<'_>, node: Node<'_>) {
    if let Some(ty) = node.child_by_field_name("type") {
        type_reference(c, RefKind::Instantiation, ty);
    }
    visit_children(c, node);
}
