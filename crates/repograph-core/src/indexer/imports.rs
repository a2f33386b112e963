//! Import resolution from written module paths to repository files.

use std::collections::BTreeSet;
use std::path::Path;

use crate::models::Language;

/// The set of files an import may resolve to, plus repository-wide module
/// facts read from build files.
#[derive(Debug, Clone, Default)]
pub struct RepoLayout {
    files: BTreeSet<String>,
    go_module: Option<String>,
}

/// What a resolved import points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    File(String),
    /// Every file of a package directory (Go packages, Java wildcards).
    Package(Vec<String>),
}

impl ImportTarget {
    pub fn files(&self) -> &[String] {
        match self {
            Self::File(path) => std::slice::from_ref(path),
            Self::Package(paths) => paths,
        }
    }
}

impl RepoLayout {
    pub fn new<I>(files: I, go_mod: Option<&str>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            files: files.into_iter().collect(),
            go_module: go_mod.and_then(parse_go_module),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    pub fn go_module(&self) -> Option<&str> {
        self.go_module.as_deref()
    }

    /// Files directly inside `dir` with the given extension, sorted.
    pub fn files_in_dir(&self, dir: &str, extension: &str) -> Vec<String> {
        self.files
            .iter()
            .filter(|p| parent_dir(p) == dir && p.ends_with(extension))
            .cloned()
            .collect()
    }

    fn first_existing<I>(&self, candidates: I) -> Option<String>
    where
        I: IntoIterator<Item = String>,
    {
        candidates
            .into_iter()
            .map(|c| normalize_posix_path(&c))
            .find(|c| self.files.contains(c))
    }
}

pub fn parse_go_module(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.trim()
            .strip_prefix("module ")
            .map(|m| m.trim().trim_matches('"').to_string())
    })
}

pub(crate) fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

pub(crate) fn normalize_posix_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            _ => stack.push(part),
        }
    }
    stack.join("/")
}

fn join_dir(dir: &str, rest: &str) -> String {
    if dir.is_empty() {
        rest.to_string()
    } else {
        format!("{dir}/{rest}")
    }
}

/// Python module text of `name` imported from `module` (`from . import x`).
pub fn python_submodule(module: &str, name: &str) -> String {
    if module.ends_with('.') {
        format!("{module}{name}")
    } else {
        format!("{module}.{name}")
    }
}

fn resolve_python(layout: &RepoLayout, source_path: &str, module: &str) -> Option<String> {
    if module.is_empty() {
        return None;
    }
    let source_dir = parent_dir(source_path);
    let bases = if module.starts_with('.') {
        let levels = module.chars().take_while(|&c| c == '.').count();
        let suffix = module[levels..].replace('.', "/");
        let mut dir = Path::new(source_dir);
        for _ in 0..levels.saturating_sub(1) {
            dir = dir.parent().unwrap_or(Path::new(""));
        }
        let dir = dir.to_string_lossy().replace('\\', "/");
        vec![if suffix.is_empty() { dir } else { join_dir(&dir, &suffix) }]
    } else {
        let base = module.replace('.', "/");
        vec![base.clone(), join_dir(source_dir, &base)]
    };

    bases.iter().find_map(|base| {
        layout.first_existing([
            format!("{base}.py"),
            format!("{base}.pyi"),
            format!("{base}/__init__.py"),
        ])
    })
}

/// Repository file whose path is `relative` or ends with `/relative`.
fn find_by_suffix(layout: &RepoLayout, relative: &str) -> Option<String> {
    if layout.contains(relative) {
        return Some(relative.to_string());
    }
    let suffix = format!("/{relative}");
    layout.files.iter().find(|p| p.ends_with(&suffix)).cloned()
}

fn resolve_java(layout: &RepoLayout, module: &str, wildcard: bool) -> Option<ImportTarget> {
    let relative = module.replace('.', "/");
    if wildcard {
        let dir = layout
            .files
            .iter()
            .map(|p| parent_dir(p))
            .find(|dir| *dir == relative || dir.ends_with(&format!("/{relative}")))?
            .to_string();
        let files = layout.files_in_dir(&dir, ".java");
        return (!files.is_empty()).then_some(ImportTarget::Package(files));
    }

    // `import static a.b.C.m` names a member of `a/b/C.java`.
    let mut path = relative.as_str();
    loop {
        if let Some(found) = find_by_suffix(layout, &format!("{path}.java")) {
            return Some(ImportTarget::File(found));
        }
        path = path.rsplit_once('/')?.0;
    }
}

const ECMASCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"];

fn resolve_ecmascript(layout: &RepoLayout, source_path: &str, module: &str) -> Option<String> {
    if !module.starts_with('.') {
        return None;
    }
    let base = normalize_posix_path(&join_dir(parent_dir(source_path), module));

    let mut candidates = vec![base.clone()];
    // ESM sources written against compiled output: `./util.js` for `util.ts`.
    for (written, sources) in [
        (".js", &["ts", "tsx"][..]),
        (".mjs", &["mts"][..]),
        (".cjs", &["cts"][..]),
    ] {
        if let Some(stem) = base.strip_suffix(written) {
            candidates.extend(sources.iter().map(|ext| format!("{stem}.{ext}")));
        }
    }
    candidates.extend(ECMASCRIPT_EXTENSIONS.iter().map(|ext| format!("{base}.{ext}")));
    candidates.extend(
        ECMASCRIPT_EXTENSIONS
            .iter()
            .map(|ext| format!("{base}/index.{ext}")),
    );
    layout.first_existing(candidates)
}

fn resolve_go(layout: &RepoLayout, source_path: &str, module: &str) -> Option<ImportTarget> {
    let dir = if module.starts_with('.') {
        normalize_posix_path(&join_dir(parent_dir(source_path), module))
    } else {
        let root = layout.go_module()?;
        if module == root {
            String::new()
        } else {
            module.strip_prefix(root)?.strip_prefix('/')?.to_string()
        }
    };
    let files = layout.files_in_dir(&dir, ".go");
    (!files.is_empty()).then_some(ImportTarget::Package(files))
}

/// Resolve one written import of `source_path`; `None` means external.
pub fn resolve_import(
    layout: &RepoLayout,
    source_path: &str,
    language: Language,
    module: &str,
    wildcard: bool,
) -> Option<ImportTarget> {
    match language {
        Language::Python => resolve_python(layout, source_path, module).map(ImportTarget::File),
        Language::Java => resolve_java(layout, module, wildcard),
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            resolve_ecmascript(layout, source_path, module).map(ImportTarget::File)
        }
        Language::Go => resolve_go(layout, source_path, module),
    }
}
