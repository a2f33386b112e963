//! Grammar registry and tree-sitter invocation with error classification.

use tree_sitter::{Node, Parser, Tree};

use crate::errors::{FileParseError, ParseCategory};
use crate::models::{Language, ParseOutcome};

/// Source and tree of a file with a usable parse.
pub struct ParsedUnit {
    pub path: String,
    pub language: Language,
    pub source: String,
    pub tree: Tree,
}

impl ParsedUnit {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }
}

pub fn grammar_for(language: Language) -> tree_sitter::Language {
    match language {
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
    }
}

/// First line (1-based) holding an error or missing node, if any.
pub fn first_error_line(node: Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .find_map(first_error_line);
    found
}

/// Parse `bytes` with the grammar registered for `language`.
///
/// Returns the unit together with `Ok` or `Partial`; every condition that
/// leaves no usable tree is a `FileParseError`.
pub fn parse_source(
    path: &str,
    language: Language,
    bytes: &[u8],
    timeout_ms: u64,
) -> Result<(ParsedUnit, ParseOutcome), FileParseError> {
    let source = std::str::from_utf8(bytes)
        .map_err(|e| FileParseError::new(path, ParseCategory::Decode, e.to_string()))?
        .to_string();

    let mut parser = Parser::new();
    parser
        .set_language(&grammar_for(language))
        .map_err(|e| FileParseError::new(path, ParseCategory::Grammar, e.to_string()))?;
    if timeout_ms > 0 {
        parser.set_timeout_micros(timeout_ms.saturating_mul(1_000));
    }

    let tree = parser.parse(source.as_bytes(), None).ok_or_else(|| {
        FileParseError::new(
            path,
            ParseCategory::Timeout,
            format!("no tree produced within {timeout_ms} ms"),
        )
    })?;

    let root = tree.root_node();
    if root.is_error() {
        return Err(FileParseError::new(
            path,
            ParseCategory::Syntax,
            "no recoverable structure",
        ));
    }

    let outcome = if root.has_error() {
        let line = first_error_line(root).unwrap_or(1);
        ParseOutcome::Partial(format!("{path}: syntax error near line {line}"))
    } else {
        ParseOutcome::Ok
    };

    Ok((
        ParsedUnit {
            path: path.to_string(),
            language,
            source,
            tree,
        },
        outcome,
    ))
}
