//! TypeScript, TSX and JavaScript declarations and references.
//!
//! The three grammars share node names for everything extracted here, so one
//! walker serves all of them. CommonJS `require` calls are recorded as imports.

use tree_sitter::Node;

use crate::indexer::symbols::{clean_children, unquote, Collector};
use crate::models::{DeclKind, ImportClause, ImportedName, RefKind};

pub fn walk(c: &mut Collector<'_>, node: Node<'_>) {
    if node.is_error() {
        return;
    }
    match node.kind() {
        "import_statement" => import_statement(c, node),
        "export_statement" => export_statement(c, node),
        "class_declaration" | "abstract_class_declaration" | "class" => {
            class_declaration(c, node)
        }
        "interface_declaration" => interface_declaration(c, node),
        "function_declaration" | "generator_function_declaration" => {
            function_declaration(c, node)
        }
        "method_definition" | "abstract_method_signature" => method_definition(c, node),
        "variable_declarator" => variable_declarator(c, node),
        "call_expression" => call_expression(c, node),
        "new_expression" => new_expression(c, node),
        _ => walk_children(c, node),
    }
}

fn walk_children(c: &mut Collector<'_>, node: Node<'_>) {
    for child in clean_children(node) {
        walk(c, child);
    }
}

fn specifiers(c: &Collector<'_>, list: Node<'_>) -> Vec<ImportedName> {
    clean_children(list)
        .into_iter()
        .filter(|n| matches!(n.kind(), "import_specifier" | "export_specifier"))
        .filter_map(|spec| {
            let name = spec.child_by_field_name("name")?;
            let alias = spec
                .child_by_field_name("alias")
                .map(|a| c.text(a).to_string());
            Some(ImportedName {
                name: c.text(name).to_string(),
                alias,
            })
        })
        .collect()
}

/// `import d, { a as b } from './m'` / `import * as ns from './m'` /
/// `import x = require('./m')`
fn import_statement(c: &mut Collector<'_>, node: Node<'_>) {
    let mut clause = ImportClause::default();
    let mut source = node.child_by_field_name("source").map(|s| c.text(s));

    for child in clean_children(node) {
        match child.kind() {
            "import_clause" => {
                for part in clean_children(child) {
                    match part.kind() {
                        "identifier" => clause.names.push(ImportedName {
                            name: "default".to_string(),
                            alias: Some(c.text(part).to_string()),
                        }),
                        "namespace_import" => {
                            clause.module_alias = clean_children(part)
                                .into_iter()
                                .find(|n| n.kind() == "identifier")
                                .map(|n| c.text(n).to_string());
                        }
                        "named_imports" => clause.names.extend(specifiers(c, part)),
                        _ => {}
                    }
                }
            }
            "import_require_clause" => {
                for part in clean_children(child) {
                    match part.kind() {
                        "identifier" => clause.module_alias = Some(c.text(part).to_string()),
                        "string" => source = Some(c.text(part)),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(source) = source {
        c.import(unquote(source), clause, node);
    }
}

/// Re-exports are imports of the re-exported module; anything else is a
/// declaration wrapper.
fn export_statement(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(source) = node.child_by_field_name("source") else {
        walk_children(c, node);
        return;
    };
    let mut clause = ImportClause::default();
    for child in clean_children(node) {
        match child.kind() {
            "export_clause" => clause.names.extend(specifiers(c, child)),
            "namespace_export" => {
                clause.module_alias = clean_children(child)
                    .into_iter()
                    .next()
                    .map(|n| c.text(n).to_string());
            }
            _ => {}
        }
    }
    if clause.names.is_empty() && clause.module_alias.is_none() {
        clause.wildcard = true;
    }
    c.import(unquote(c.text(source)), clause, node);
}

fn heritage_reference(c: &mut Collector<'_>, node: Node<'_>) {
    match node.kind() {
        "identifier" | "type_identifier" => {
            c.reference(RefKind::Inheritance, c.text(node), None, node)
        }
        "member_expression" | "nested_type_identifier" => {
            let written = c.text(node);
            let receiver = written.rsplit_once('.').map(|(q, _)| q);
            c.reference(RefKind::Inheritance, written, receiver, node);
        }
        "generic_type" => {
            if let Some(base) = clean_children(node).into_iter().next() {
                heritage_reference(c, base);
            }
        }
        "extends_clause" | "implements_clause" | "extends_type_clause" => {
            for part in clean_children(node) {
                heritage_reference(c, part);
            }
        }
        _ => {}
    }
}

fn class_declaration(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        // Anonymous class expression.
        walk_children(c, node);
        return;
    };
    c.enter(DeclKind::Class, c.text(name), node);
    for child in clean_children(node) {
        if child.kind() == "class_heritage" {
            for part in clean_children(child) {
                heritage_reference(c, part);
            }
        }
    }
    if let Some(body) = node.child_by_field_name("body") {
        walk_children(c, body);
    }
    c.leave();
}

fn interface_declaration(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    c.enter(DeclKind::Interface, c.text(name), node);
    for child in clean_children(node) {
        if child.kind() == "extends_type_clause" {
            heritage_reference(c, child);
        }
    }
    c.leave();
}

fn function_declaration(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        walk_children(c, node);
        return;
    };
    c.enter(DeclKind::Function, c.text(name), node);
    if let Some(body) = node.child_by_field_name("body") {
        walk_children(c, body);
    }
    c.leave();
}

fn method_definition(c: &mut Collector<'_>, node: Node<'_>) {
    let Some(name) = node.child_by_field_name("name") else {
        return;
    };
    c.enter(DeclKind::Method, c.text(name), node);
    if let Some(body) = node.child_by_field_name("body") {
        walk_children(c, body);
    }
    c.leave();
}

fn is_require(c: &Collector<'_>, call: Node<'_>) -> Option<String> {
    let function = call.child_by_field_name("function")?;
    if function.kind() != "identifier" || c.text(function) != "require" {
        return None;
    }
    let args = call.child_by_field_name("arguments")?;
    let first = clean_children(args).into_iter().next()?;
    (first.kind() == "string").then(|| unquote(c.text(first)).to_string())
}

/// `const f = () => {}` declares `f`; `const m = require('./m')` imports.
fn variable_declarator(c: &mut Collector<'_>, node: Node<'_>) {
    let (Some(name), Some(value)) = (
        node.child_by_field_name("name"),
        node.child_by_field_name("value"),
    ) else {
        walk_children(c, node);
        return;
    };

    if value.kind() == "call_expression" {
        if let Some(source) = is_require(c, value) {
            let mut clause = ImportClause::default();
            match name.kind() {
                "identifier" => clause.module_alias = Some(c.text(name).to_string()),
                "object_pattern" => {
                    for part in clean_children(name) {
                        if part.kind() == "shorthand_property_identifier_pattern" {
                            clause.names.push(ImportedName {
                                name: c.text(part).to_string(),
                                alias: None,
                            });
                        }
                    }
                }
                _ => {}
            }
            c.import(&source, clause, node);
            return;
        }
    }

    let is_function = matches!(
        value.kind(),
        "arrow_function" | "function_expression" | "function" | "generator_function"
    );
    if is_function && name.kind() == "identifier" {
        c.enter(DeclKind::Function, c.text(name), node);
        if let Some(body) = value.child_by_field_name("body") {
            walk_children(c, body);
        }
        c.leave();
    } else {
        walk(c, value);
    }
}

fn call_expression(c: &mut Collector<'_>, node: Node<'_>) {
    if let Some(function) = node.child_by_field_name("function") {
        match function.kind() {
            "identifier" => c.reference(RefKind::Call, c.text(function), None, node),
            "member_expression" => {
                let receiver = function.child_by_field_name("object").map(|o| c.text(o));
                c.reference(RefKind::Call, c.text(function), receiver, node);
            }
            "import" => {
                let source = node
                    .child_by_field_name("arguments")
                    .and_then(|args| clean_children(args).into_iter().next())
                    .filter(|arg| arg.kind() == "string")
                    .map(|arg| unquote(c.text(arg)).to_string());
                if let Some(source) = source {
                    c.import(&source, ImportClause::default(), node);
                }
            }
            _ => {}
        }
    }
    walk_children(c, node);
}

fn new_expression(c: &mut Collector<'_>, node: Node<'_>) {
    if let Some(constructor) = node.child_by_field_name("constructor") {
        match constructor.kind() {
            "identifier" => {
                c.reference(RefKind::Instantiation, c.text(constructor), None, node)
            }
            "member_expression" => {
                let receiver = constructor
                    .child_by_field_name("object")
                    .map(|o| c.text(o));
                c.reference(RefKind::Instantiation, c.text(constructor), receiver, node);
            }
            _ => {}
        }
    }
    walk_children(c, node);
}

#[cfg(test)]
mod tests {
    use crate::indexer::symbols::test_helpers::{decls, extract, refs};
    use crate::models::{DeclKind, Language, RefKind};

    #[test]
    fn test_typescript_declarations() {
        let src = r#"
import { Engine as E, start } from './engine';
import * as util from '../util';
import Default from './default';

export interface Shape extends Named {}

export class Circle extends Base implements Shape {
    area(): number {
        return util.square(this.radius());
    }
    radius(): number { return 1; }
}

export const build = (n: number) => {
    const e = new E();
    start(e);
    console.log(n);
};

function helper() {}
"#;
        let symbols = extract("src/shapes.ts", Language::TypeScript, src);
        assert_eq!(symbols.module, "src.shapes");
        assert_eq!(
            decls(&symbols),
            vec![
                (DeclKind::Interface, "src.shapes.Shape".to_string()),
                (DeclKind::Class, "src.shapes.Circle".to_string()),
                (DeclKind::Method, "src.shapes.Circle.area".to_string()),
                (DeclKind::Method, "src.shapes.Circle.radius".to_string()),
                (DeclKind::Function, "src.shapes.build".to_string()),
                (DeclKind::Function, "src.shapes.helper".to_string()),
            ]
        );
        assert_eq!(
            refs(&symbols, RefKind::Inheritance),
            vec![
                ("Named".to_string(), None),
                ("Base".to_string(), None),
                ("Shape".to_string(), None),
            ]
        );
        assert_eq!(
            refs(&symbols, RefKind::Call),
            vec![
                ("util.square".to_string(), Some("util".to_string())),
                ("this.radius".to_string(), Some("this".to_string())),
                ("start".to_string(), None),
            ]
        );
        assert_eq!(
            refs(&symbols, RefKind::Instantiation),
            vec![("E".to_string(), None)]
        );

        let imports: Vec<_> = symbols
            .references()
            .filter_map(|r| r.hint())
            .filter(|h| h.kind == RefKind::Import)
            .cloned()
            .collect();
        assert_eq!(imports.len(), 3);
        let named = imports[0].import.as_ref().unwrap();
        assert_eq!(imports[0].target, "./engine");
        assert_eq!(named.names[0].local_name(), "E");
        assert_eq!(named.names[1].local_name(), "start");
        assert_eq!(
            imports[1].import.as_ref().unwrap().module_alias.as_deref(),
            Some("util")
        );
        assert_eq!(
            imports[2].import.as_ref().unwrap().names[0].local_name(),
            "Default"
        );
    }

    #[test]
    fn test_commonjs_require() {
        let src = "const fs = require('fs');\nconst { run } = require('./runner');\nrun();\n";
        let symbols = extract("lib/main.js", Language::JavaScript, src);
        let imports: Vec<_> = symbols
            .references()
            .filter_map(|r| r.hint())
            .filter(|h| h.kind == RefKind::Import)
            .cloned()
            .collect();
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].target, "fs");
        assert_eq!(
            imports[0].import.as_ref().unwrap().module_alias.as_deref(),
            Some("fs")
        );
        assert_eq!(imports[1].target, "./runner");
        assert_eq!(imports[1].import.as_ref().unwrap().names[0].name, "run");
        assert_eq!(refs(&symbols, RefKind::Call), vec![("run".to_string(), None)]);
    }

    #[test]
    fn test_tsx_component() {
        let src = "export function View() {\n  return <div>{format()}</div>;\n}\n";
        let symbols = extract("ui/View.tsx", Language::Tsx, src);
        assert_eq!(
            decls(&symbols),
            vec![(DeclKind::Function, "ui.View.View".to_string())]
        );
        assert_eq!(
            refs(&symbols, RefKind::Call),
            vec![("format".to_string(), None)]
        );
    }
}
