//! Symbol extraction from parsed syntax trees.
//!
//! Each language walker turns a (possibly partial) tree into the ordered
//! declaration and reference records of one file. Nothing is resolved here:
//! references keep their target exactly as written, and subtrees tree-sitter
//! marked as `ERROR` are skipped wholesale.

use std::path::Path;

use tree_sitter::Node;

use crate::indexer::lang;
use crate::indexer::parser::ParsedUnit;
use crate::models::{
    DeclKind, ImportClause, Language, RefKind, Span, SymbolRecord, TargetHint,
};

// ---------------------------------------------------------------------------
// Extracted types
// ---------------------------------------------------------------------------

/// Every record extracted from one usable file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSymbols {
    pub path: String,
    pub language: Language,
    /// Module (package) the file contributes to.
    pub module: String,
    pub records: Vec<SymbolRecord>,
}

impl FileSymbols {
    pub fn declarations(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.records.iter().filter(|r| r.decl_kind().is_some())
    }

    pub fn references(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.records.iter().filter(|r| r.hint().is_some())
    }
}

pub fn extract_symbols(unit: &ParsedUnit) -> FileSymbols {
    let module = to_module_name(&unit.path, unit.language);
    let mut collector = Collector::new(&unit.path, unit.source.as_bytes(), module);
    match unit.language {
        Language::Python => lang::python::walk(&mut collector, unit.root()),
        Language::Java => lang::java::walk(&mut collector, unit.root()),
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            lang::typescript::walk(&mut collector, unit.root())
        }
        Language::Go => lang::go::walk(&mut collector, unit.root()),
    }
    collector.finish(unit.language)
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Convert a file path to a dotted module name.
///
/// Strips the file extension and joins path components with dots. Python
/// package initialisers name their package. Java and Go replace this with
/// their package declaration once it is seen.
pub fn to_module_name(path: &str, language: Language) -> String {
    let p = Path::new(path);
    let without_ext = p.with_extension("");
    let mut parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if language == Language::Python && parts.last() == Some(&"__init__") {
        parts.pop();
    }
    parts.join(".")
}

/// Go packages are named by their directory, qualified with the declared
/// package name when it differs from the directory name.
pub fn go_module_name(path: &str, package: &str) -> String {
    let dir = Path::new(path)
        .parent()
        .map(|d| d.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    if dir.is_empty() {
        return package.to_string();
    }
    let dotted = dir.replace('/', ".");
    match dir.rsplit('/').next() {
        Some(last) if last == package => dotted,
        _ if package.is_empty() => dotted,
        _ => format!("{dotted}.{package}"),
    }
}

fn is_call_keyword(name: &str) -> bool {
    matches!(
        name,
        "if" | "for" | "while" | "switch" | "return" | "new" | "function" | "class" | "catch"
    )
}

const PYTHON_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "callable", "chr", "dict", "dir", "divmod",
    "enumerate", "eval", "exec", "filter", "float", "format", "frozenset", "getattr",
    "globals", "hasattr", "hash", "hex", "id", "input", "int", "isinstance", "issubclass",
    "iter", "len", "list", "locals", "map", "max", "min", "next", "object", "open", "ord",
    "pow", "print", "property", "range", "repr", "reversed", "round", "set", "setattr",
    "slice", "sorted", "staticmethod", "classmethod", "str", "sum", "super", "tuple", "type",
    "vars", "zip",
];

const GO_BUILTINS: &[&str] = &[
    "append", "cap", "clear", "close", "complex", "copy", "delete", "imag", "len", "make",
    "max", "min", "new", "panic", "print", "println", "real", "recover",
];

const ECMASCRIPT_BUILTINS: &[&str] = &[
    "require", "parseInt", "parseFloat", "isNaN", "isFinite", "setTimeout", "setInterval",
    "clearTimeout", "clearInterval", "String", "Number", "Boolean", "Symbol", "BigInt",
    "encodeURIComponent", "decodeURIComponent", "structuredClone", "fetch", "super",
];

const ECMASCRIPT_BUILTIN_RECEIVERS: &[&str] = &[
    "console", "Math", "JSON", "Object", "Array", "Promise", "Reflect", "Number", "String",
    "Date", "process",
];

const ECMASCRIPT_BUILTIN_TYPES: &[&str] = &[
    "Array", "Date", "Error", "Map", "Set", "WeakMap", "WeakSet", "Promise", "RegExp",
    "TypeError", "RangeError", "URL", "Object", "Proxy",
];

const JAVA_BUILTIN_RECEIVERS: &[&str] = &[
    "System.out", "System.err", "System", "Math", "String", "Integer", "Long", "Double",
    "Boolean", "Objects", "Arrays", "Collections", "List", "Map", "Set", "Optional",
];

const JAVA_BUILTIN_TYPES: &[&str] = &[
    "Object", "String", "StringBuilder", "Integer", "Long", "Double", "Float", "Boolean",
    "Character", "Byte", "Short", "Thread", "Exception", "RuntimeException", "Error",
    "IllegalArgumentException", "IllegalStateException", "UnsupportedOperationException",
    "NullPointerException", "IndexOutOfBoundsException",
];

/// Calls that obviously target the language runtime rather than repository
/// code.
pub fn is_builtin_call(language: Language, name: &str, receiver: Option<&str>) -> bool {
    if is_call_keyword(name) {
        return true;
    }
    match (language, receiver) {
        (Language::Python, None) => PYTHON_BUILTINS.contains(&name),
        (Language::Go, None) => GO_BUILTINS.contains(&name),
        (Language::Java, Some(recv)) => JAVA_BUILTIN_RECEIVERS.contains(&recv),
        (l, None) if l.is_ecmascript() => ECMASCRIPT_BUILTINS.contains(&name),
        (l, Some(recv)) if l.is_ecmascript() => {
            let head = recv.split('.').next().unwrap_or(recv);
            ECMASCRIPT_BUILTIN_RECEIVERS.contains(&head)
        }
        _ => false,
    }
}

pub fn is_builtin_type(language: Language, name: &str) -> bool {
    match language {
        Language::Python => PYTHON_BUILTINS.contains(&name) || name == "Exception",
        Language::Java => JAVA_BUILTIN_TYPES.contains(&name),
        l if l.is_ecmascript() => ECMASCRIPT_BUILTIN_TYPES.contains(&name),
        _ => false,
    }
}

/// Strip generic arguments and array suffixes from a written type.
pub fn base_type_name(written: &str) -> &str {
    let end = written
        .find(|c: char| c == '<' || c == '[' || c == '(')
        .unwrap_or(written.len());
    written[..end].trim()
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Mutable walk state shared by the language walkers.
pub struct Collector<'a> {
    path: &'a str,
    source: &'a [u8],
    module: String,
    scope: Vec<String>,
    scope_kinds: Vec<DeclKind>,
    records: Vec<SymbolRecord>,
}

impl<'a> Collector<'a> {
    pub fn new(path: &'a str, source: &'a [u8], module: String) -> Self {
        Self {
            path,
            source,
            module,
            scope: Vec::new(),
            scope_kinds: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.path
    }

    pub fn set_module(&mut self, module: String) {
        self.module = module;
    }

    pub fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source).unwrap_or("")
    }

    pub fn span(&self, node: Node<'_>) -> Span {
        Span {
            file: self.path.to_string(),
            start_line: node.start_position().row as u32 + 1,
            end_line: node.end_position().row as u32 + 1,
            bytes: (node.end_byte() - node.start_byte()) as u64,
        }
    }

    /// Kind of the innermost enclosing declaration.
    pub fn enclosing_kind(&self) -> Option<DeclKind> {
        self.scope_kinds.last().copied()
    }

    /// Nearest enclosing class or interface name.
    pub fn enclosing_type(&self) -> Option<&str> {
        self.scope_kinds
            .iter()
            .zip(self.scope.iter())
            .rev()
            .find(|(kind, _)| kind.is_type())
            .map(|(_, name)| name.as_str())
    }

    pub fn declare(&mut self, decl: DeclKind, name: &str, node: Node<'_>) {
        if name.is_empty() {
            return;
        }
        let span = self.span(node);
        self.records.push(SymbolRecord::declaration(
            decl,
            name,
            &self.module,
            &self.scope,
            span,
        ));
    }

    /// Declare and make the declaration the current scope until `leave`.
    pub fn enter(&mut self, decl: DeclKind, name: &str, node: Node<'_>) {
        self.declare(decl, name, node);
        self.push_scope(decl, name);
    }

    pub fn push_scope(&mut self, decl: DeclKind, name: &str) {
        self.scope.push(name.to_string());
        self.scope_kinds.push(decl);
    }

    pub fn leave(&mut self) {
        self.scope.pop();
        self.scope_kinds.pop();
    }

    pub fn reference(
        &mut self,
        kind: RefKind,
        target: &str,
        receiver: Option<&str>,
        node: Node<'_>,
    ) {
        let target = target.trim();
        if target.is_empty() {
            return;
        }
        let hint = TargetHint {
            kind,
            target: target.to_string(),
            receiver: receiver
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            import: None,
        };
        let span = self.span(node);
        self.records
            .push(SymbolRecord::reference(hint, &self.module, &self.scope, span));
    }

    pub fn import(&mut self, target: &str, clause: ImportClause, node: Node<'_>) {
        let target = target.trim();
        if target.is_empty() {
            return;
        }
        let hint = TargetHint {
            kind: RefKind::Import,
            target: target.to_string(),
            receiver: None,
            import: Some(clause),
        };
        let span = self.span(node);
        self.records
            .push(SymbolRecord::reference(hint, &self.module, &self.scope, span));
    }

    /// Apply builtin filtering and stamp the final module name on every
    /// record (package declarations may appear after early records).
    pub fn finish(self, language: Language) -> FileSymbols {
        let module = self.module;
        let records = self
            .records
            .into_iter()
            .filter(|record| match record.hint() {
                Some(hint) => match hint.kind {
                    RefKind::Call => {
                        !is_builtin_call(language, &record.name, hint.receiver.as_deref())
                    }
                    RefKind::Instantiation | RefKind::Inheritance => {
                        !is_builtin_type(language, &record.name)
                    }
                    RefKind::Import => true,
                },
                None => true,
            })
            .map(|mut record| {
                record.module = module.clone();
                record
            })
            .collect();
        FileSymbols {
            path: self.path.to_string(),
            language,
            module,
            records,
        }
    }
}

/// Named children excluding error-recovery subtrees.
pub fn clean_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let children = node
        .named_children(&mut cursor)
        .filter(|child| !child.is_error())
        .collect();
    children
}

/// Strip one layer of matching string quotes.
pub fn unquote(text: &str) -> &str {
    let t = text.trim();
    for q in ['"', '\'', '`'] {
        if t.len() >= 2 && t.starts_with(q) && t.ends_with(q) {
            return &t[1..t.len() - 1];
        }
    }
    t
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use crate::indexer::parser::parse_source;
    use crate::models::SymbolKind;

    pub fn extract(path: &str, language: Language, source: &str) -> FileSymbols {
        let (unit, _) = parse_source(path, language, source.as_bytes(), 0).unwrap();
        extract_symbols(&unit)
    }

    pub fn decls(symbols: &FileSymbols) -> Vec<(DeclKind, String)> {
        symbols
            .records
            .iter()
            .filter_map(|r| match &r.kind {
                SymbolKind::Declaration { decl } => Some((*decl, r.qualified_name())),
                SymbolKind::Reference { .. } => None,
            })
            .collect()
    }

    pub fn refs(symbols: &FileSymbols, kind: RefKind) -> Vec<(String, Option<String>)> {
        symbols
            .references()
            .filter_map(|r| r.hint())
            .filter(|h| h.kind == kind)
            .map(|h| (h.target.clone(), h.receiver.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_module_name() {
        assert_eq!(to_module_name("pkg/a.py", Language::Python), "pkg.a");
        assert_eq!(to_module_name("pkg/__init__.py", Language::Python), "pkg");
        assert_eq!(to_module_name("./src/app.ts", Language::TypeScript), "src.app");
        assert_eq!(to_module_name("a.py", Language::Python), "a");
    }

    #[test]
    fn test_go_module_name() {
        assert_eq!(go_module_name("main.go", "main"), "main");
        assert_eq!(go_module_name("pkg/util/strings.go", "util"), "pkg.util");
        assert_eq!(go_module_name("cmd/server/main.go", "main"), "cmd.server.main");
    }

    #[test]
    fn test_builtins() {
        assert!(is_builtin_call(Language::Python, "print", None));
        assert!(!is_builtin_call(Language::Python, "print", Some("logger")));
        assert!(is_builtin_call(Language::Go, "make", None));
        assert!(is_builtin_call(Language::TypeScript, "log", Some("console")));
        assert!(is_builtin_call(Language::Java, "println", Some("System.out")));
        assert!(!is_builtin_call(Language::Java, "run", Some("worker")));
        assert!(is_builtin_type(Language::Java, "StringBuilder"));
        assert!(!is_builtin_type(Language::Java, "OrderService"));
    }

    #[test]
    fn test_base_type_name_and_unquote() {
        assert_eq!(base_type_name("List<String>"), "List");
        assert_eq!(base_type_name("int[]"), "int");
        assert_eq!(base_type_name("Foo"), "Foo");
        assert_eq!(unquote("'./a'"), "./a");
        assert_eq!(unquote("\"fmt\""), "fmt");
        assert_eq!(unquote("plain"), "plain");
    }
}
