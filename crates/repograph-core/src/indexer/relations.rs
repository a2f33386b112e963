//! Cross-file relationship resolution.
//!
//! Resolution runs over one arena. Every declaration of the repository is
//! indexed first; each reference is then resolved in a flat loop against that
//! table, so forward and cyclic references need no ordering. Edges and
//! clusters point at arena indices, never at live records.
//!
//! Lookup cascade for a reference (first non-empty step wins):
//! 1. same-file scope chain, innermost scope outward
//! 2. named import bindings
//! 3. wildcard imports
//! 4. same-package files (Go, Java)
//! 5. receiver-qualified lookups (module aliases, `self`/`this`, type names)
//! 6. global fallbacks by method or class name

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::config::TieBreak;
use crate::graph::ids;
use crate::indexer::imports::{python_submodule, resolve_import, ImportTarget, RepoLayout};
use crate::indexer::symbols::FileSymbols;
use crate::models::{
    join_qualified, DeclKind, EdgeKind, ImportClause, Language, NodeId, RefKind, SymbolRecord,
    TargetHint,
};

pub type FileId = usize;
pub type DeclId = usize;

/// An arena handle to a graph node: a file or one of its declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolRef {
    File(FileId),
    Decl(DeclId),
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: String,
    pub language: Language,
    pub module: String,
}

#[derive(Debug, Clone)]
pub struct DeclEntry {
    pub file: FileId,
    pub kind: DeclKind,
    pub name: String,
    pub qualified: String,
    pub enclosing: Option<DeclId>,
    pub top_level: bool,
    pub start_line: u32,
    pub end_line: u32,
    pub bytes: u64,
}

/// One statically resolved reference occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEdge {
    pub source: SymbolRef,
    pub target: SymbolRef,
    pub kind: EdgeKind,
}

/// References from one source with the same written target that resolved to
/// zero or several candidates.
#[derive(Debug, Clone)]
pub struct AmbiguousCluster {
    pub cluster_id: String,
    pub source: SymbolRef,
    pub target_text: String,
    pub kind: RefKind,
    pub candidates: Vec<DeclId>,
    pub reference_count: u64,
    pub path: String,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct ExternalImport {
    pub file: FileId,
    pub module: String,
    pub line: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RelationMap {
    pub files: Vec<FileEntry>,
    pub decls: Vec<DeclEntry>,
    pub edges: Vec<ResolvedEdge>,
    pub clusters: Vec<AmbiguousCluster>,
    pub external_imports: Vec<ExternalImport>,
}

impl RelationMap {
    pub fn node_id(&self, symbol: SymbolRef) -> NodeId {
        match symbol {
            SymbolRef::File(file) => ids::file_node_id(&self.files[file].path),
            SymbolRef::Decl(decl) => {
                let entry = &self.decls[decl];
                ids::node_id(entry.kind.into(), &self.files[entry.file].path, &entry.qualified)
            }
        }
    }

    /// Qualified name of a declaration, path of a file.
    pub fn display_name(&self, symbol: SymbolRef) -> &str {
        match symbol {
            SymbolRef::File(file) => &self.files[file].path,
            SymbolRef::Decl(decl) => &self.decls[decl].qualified,
        }
    }

    pub fn ambiguous_references(&self) -> u64 {
        self.clusters.iter().map(|c| c.reference_count).sum()
    }
}

/// Resolve every reference of `files` into edges, clusters and external
/// imports. `layout` lists every crawled file, usable or not.
pub fn map_relations(files: &[FileSymbols], layout: &RepoLayout, tie_break: TieBreak) -> RelationMap {
    let mut mapper = Mapper {
        inputs: files,
        layout,
        tie_break,
        map: RelationMap::default(),
        index: DeclIndex::default(),
        clusters: IndexMap::new(),
    };
    mapper.index_declarations();
    for file in 0..files.len() {
        mapper.resolve_file(file);
    }
    let map = mapper.finish();
    tracing::debug!(
        files = map.files.len(),
        declarations = map.decls.len(),
        edges = map.edges.len(),
        clusters = map.clusters.len(),
        external = map.external_imports.len(),
        "relationships mapped"
    );
    map
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DeclIndex {
    file_by_path: HashMap<String, FileId>,
    by_qualified: HashMap<String, Vec<DeclId>>,
    by_file_qualified: HashMap<(FileId, String), Vec<DeclId>>,
    /// Module-level declarations by (file, name).
    top_level: HashMap<(FileId, String), Vec<DeclId>>,
    by_name: HashMap<String, Vec<DeclId>>,
    members: HashMap<(DeclId, String), Vec<DeclId>>,
    /// Files sharing a package, for languages where that implies visibility.
    packages: HashMap<(Language, String), Vec<FileId>>,
}

/// Names a file can see through its imports.
#[derive(Default)]
struct FileScope {
    bindings: HashMap<String, Vec<DeclId>>,
    module_aliases: HashMap<String, Vec<FileId>>,
    wildcard_files: Vec<FileId>,
    /// Local names bound by imports that resolve outside the repository (or
    /// to something that is not a declaration); references through them are
    /// dropped.
    external: HashSet<String>,
}

enum Lookup {
    /// Candidates reachable from the reference; exactly one resolves it.
    Visible(Vec<DeclId>),
    /// Not statically resolvable; same-named declarations, for inference.
    Unscoped(Vec<DeclId>),
    External,
}

fn is_callable_target(kind: DeclKind) -> bool {
    kind.is_callable() || kind == DeclKind::Class
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Type named by a receiver: `Engine` or `Engine(...)`.
fn receiver_type_name(receiver: &str) -> Option<&str> {
    let name = match receiver.split_once('(') {
        Some((head, _)) if receiver.ends_with(')') => head,
        Some(_) => return None,
        None => receiver,
    };
    is_identifier(name).then_some(name)
}

/// Leading identifier of a receiver expression (`os` of `os.path`).
fn receiver_head(receiver: &str) -> &str {
    let end = receiver
        .find(|c: char| c == '.' || c == '(' || c == '[')
        .unwrap_or(receiver.len());
    &receiver[..end]
}

struct Mapper<'a> {
    inputs: &'a [FileSymbols],
    layout: &'a RepoLayout,
    tie_break: TieBreak,
    map: RelationMap,
    index: DeclIndex,
    clusters: IndexMap<(SymbolRef, String, RefKind), AmbiguousCluster>,
}

impl Mapper<'_> {
    // -- pass 1 -------------------------------------------------------------

    fn index_declarations(&mut self) {
        let inputs = self.inputs;
        let mut enclosing_names: Vec<Option<String>> = Vec::new();

        for (file, symbols) in inputs.iter().enumerate() {
            self.map.files.push(FileEntry {
                path: symbols.path.clone(),
                language: symbols.language,
                module: symbols.module.clone(),
            });
            self.index.file_by_path.insert(symbols.path.clone(), file);
            if matches!(symbols.language, Language::Go | Language::Java) {
                self.index
                    .packages
                    .entry((symbols.language, symbols.module.clone()))
                    .or_default()
                    .push(file);
            }

            for record in symbols.declarations() {
                let Some(kind) = record.decl_kind() else {
                    continue;
                };
                let id = self.map.decls.len();
                let qualified = record.qualified_name();
                let top_level = record.scope.is_empty();

                self.index.by_qualified.entry(qualified.clone()).or_default().push(id);
                self.index
                    .by_file_qualified
                    .entry((file, qualified.clone()))
                    .or_default()
                    .push(id);
                self.index.by_name.entry(record.name.clone()).or_default().push(id);
                if top_level {
                    self.index
                        .top_level
                        .entry((file, record.name.clone()))
                        .or_default()
                        .push(id);
                }
                enclosing_names.push(record.enclosing_qualified_name());
                self.map.decls.push(DeclEntry {
                    file,
                    kind,
                    name: record.name.clone(),
                    qualified,
                    enclosing: None,
                    top_level,
                    start_line: record.span.start_line,
                    end_line: record.span.end_line,
                    bytes: record.span.bytes,
                });
            }
        }

        for (id, enclosing) in enclosing_names.into_iter().enumerate() {
            let Some(enclosing) = enclosing else {
                continue;
            };
            let file = self.map.decls[id].file;
            // Go methods may be declared in a different file than their type.
            let owner = self
                .index
                .by_file_qualified
                .get(&(file, enclosing.clone()))
                .and_then(|ids| ids.first().copied())
                .or_else(|| {
                    self.index.by_qualified.get(&enclosing).and_then(|ids| {
                        ids.iter().copied().find(|d| self.map.decls[*d].kind.is_type())
                    })
                });
            if let Some(owner) = owner {
                self.map.decls[id].enclosing = Some(owner);
                let name = self.map.decls[id].name.clone();
                self.index.members.entry((owner, name)).or_default().push(id);
            }
        }
    }

    // -- pass 2 -------------------------------------------------------------

    fn resolve_file(&mut self, file: FileId) {
        let inputs = self.inputs;
        let symbols = &inputs[file];
        let mut scope = FileScope::default();

        for record in symbols.references() {
            if let Some(hint) = record.hint().filter(|h| h.kind == RefKind::Import) {
                self.import(file, record, hint, &mut scope);
            }
        }
        for record in symbols.references() {
            if let Some(hint) = record.hint().filter(|h| h.kind != RefKind::Import) {
                self.reference(file, record, hint, &scope);
            }
        }
    }

    fn finish(mut self) -> RelationMap {
        self.map.clusters = self.clusters.into_values().collect();
        self.map
    }

    // -- imports ------------------------------------------------------------

    fn files_of(&self, target: &ImportTarget) -> Vec<FileId> {
        target
            .files()
            .iter()
            .filter_map(|path| self.index.file_by_path.get(path).copied())
            .collect()
    }

    fn top_level_in(&self, files: &[FileId], name: &str) -> Vec<DeclId> {
        files
            .iter()
            .filter_map(|f| self.index.top_level.get(&(*f, name.to_string())))
            .flatten()
            .copied()
            .collect()
    }

    fn import(&mut self, file: FileId, record: &SymbolRecord, hint: &TargetHint, scope: &mut FileScope) {
        let entry = &self.map.files[file];
        let (path, language) = (entry.path.clone(), entry.language);
        let default_clause = ImportClause::default();
        let clause = hint.import.as_ref().unwrap_or(&default_clause);
        let target = resolve_import(self.layout, &path, language, &hint.target, clause.wildcard);

        let linked = match language {
            Language::Python => self.bind_python(&path, &hint.target, clause, target, scope),
            Language::Java => self.bind_java(&hint.target, clause, target, scope),
            Language::TypeScript | Language::Tsx | Language::JavaScript => {
                self.bind_ecmascript(clause, target, scope)
            }
            Language::Go => self.bind_go(clause, target, scope),
        };

        let Some(mut linked) = linked else {
            tracing::trace!(path = %path, module = %hint.target, "external import");
            self.map.external_imports.push(ExternalImport {
                file,
                module: hint.target.clone(),
                line: record.span.start_line,
            });
            return;
        };
        linked.sort_unstable();
        linked.dedup();
        for target in linked.into_iter().filter(|t| *t != file) {
            self.map.edges.push(ResolvedEdge {
                source: SymbolRef::File(file),
                target: SymbolRef::File(target),
                kind: EdgeKind::Import,
            });
        }
    }

    /// `None` when the import names nothing in the repository.
    fn bind_python(
        &self,
        path: &str,
        module: &str,
        clause: &ImportClause,
        target: Option<ImportTarget>,
        scope: &mut FileScope,
    ) -> Option<Vec<FileId>> {
        let base = target.as_ref().map(|t| self.files_of(t));

        if clause.names.is_empty() {
            let Some(base) = base else {
                let local = clause
                    .module_alias
                    .clone()
                    .unwrap_or_else(|| receiver_head(module).to_string());
                scope.external.insert(local);
                return None;
            };
            if clause.wildcard {
                scope.wildcard_files.extend(&base);
            } else {
                let local = clause.module_alias.clone().unwrap_or_else(|| module.to_string());
                scope.module_aliases.entry(local).or_default().extend(&base);
            }
            return Some(base);
        }

        let mut linked = Vec::new();
        let mut resolved = base.is_some();
        for name in &clause.names {
            let local = name.local_name().to_string();
            let decls = base
                .as_deref()
                .map(|files| self.top_level_in(files, &name.name))
                .unwrap_or_default();
            if !decls.is_empty() {
                linked.extend(decls.iter().map(|d| self.map.decls[*d].file));
                scope.bindings.entry(local).or_default().extend(decls);
                continue;
            }
            let submodule = python_submodule(module, &name.name);
            if let Some(sub) = resolve_import(self.layout, path, Language::Python, &submodule, false) {
                let files = self.files_of(&sub);
                linked.extend(&files);
                scope.module_aliases.entry(local).or_default().extend(files);
                resolved = true;
                continue;
            }
            // A variable or re-export: known module, unmodelled binding.
            linked.extend(base.iter().flatten());
            scope.external.insert(local);
        }
        resolved.then_some(linked)
    }

    fn bind_java(
        &self,
        module: &str,
        clause: &ImportClause,
        target: Option<ImportTarget>,
        scope: &mut FileScope,
    ) -> Option<Vec<FileId>> {
        if clause.wildcard {
            let files = self.files_of(&target?);
            scope.wildcard_files.extend(files);
            return Some(Vec::new());
        }

        let simple = module.rsplit('.').next().unwrap_or(module).to_string();
        let decls: Vec<DeclId> = self
            .index
            .by_qualified
            .get(module)
            .into_iter()
            .flatten()
            .copied()
            .filter(|d| self.map.files[self.map.decls[*d].file].language == Language::Java)
            .collect();
        if !decls.is_empty() {
            let linked = decls.iter().map(|d| self.map.decls[*d].file).collect();
            scope.bindings.entry(simple).or_default().extend(decls);
            return Some(linked);
        }

        let Some(target) = target else {
            scope.external.insert(simple);
            return None;
        };
        let files = self.files_of(&target);
        let decls = self.top_level_in(&files, &simple);
        if !decls.is_empty() {
            scope.bindings.entry(simple).or_default().extend(decls);
        }
        Some(files)
    }

    fn bind_ecmascript(
        &self,
        clause: &ImportClause,
        target: Option<ImportTarget>,
        scope: &mut FileScope,
    ) -> Option<Vec<FileId>> {
        let Some(target) = target else {
            scope.external.extend(clause.module_alias.iter().cloned());
            scope
                .external
                .extend(clause.names.iter().map(|n| n.local_name().to_string()));
            return None;
        };
        let files = self.files_of(&target);
        if let Some(alias) = &clause.module_alias {
            scope.module_aliases.entry(alias.clone()).or_default().extend(&files);
        }
        for name in &clause.names {
            let local = name.local_name().to_string();
            let is_default = name.name == "default";
            let lookup = if is_default { local.as_str() } else { name.name.as_str() };
            let decls = self.top_level_in(&files, lookup);
            if !decls.is_empty() {
                scope.bindings.entry(local).or_default().extend(decls);
            } else if is_default {
                scope.module_aliases.entry(local).or_default().extend(&files);
            } else {
                scope.external.insert(local);
            }
        }
        Some(files)
    }

    fn bind_go(
        &self,
        clause: &ImportClause,
        target: Option<ImportTarget>,
        scope: &mut FileScope,
    ) -> Option<Vec<FileId>> {
        let Some(target) = target else {
            scope.external.extend(clause.module_alias.iter().cloned());
            return None;
        };
        let files = self.files_of(&target);
        if clause.wildcard {
            scope.wildcard_files.extend(&files);
        } else if let Some(alias) = &clause.module_alias {
            scope.module_aliases.entry(alias.clone()).or_default().extend(&files);
        }
        Some(files)
    }

    // -- references ---------------------------------------------------------

    /// Innermost declaration enclosing the reference, else its file.
    fn source_of(&self, file: FileId, record: &SymbolRecord) -> SymbolRef {
        let line = record.span.start_line;
        record
            .enclosing_qualified_name()
            .and_then(|q| self.index.by_file_qualified.get(&(file, q)))
            .and_then(|ids| {
                ids.iter()
                    .copied()
                    .find(|d| {
                        let decl = &self.map.decls[*d];
                        decl.start_line <= line && line <= decl.end_line
                    })
                    .or_else(|| ids.first().copied())
            })
            .map(SymbolRef::Decl)
            .unwrap_or(SymbolRef::File(file))
    }

    fn decls_at(&self, file: FileId, qualified: String) -> &[DeclId] {
        self.index
            .by_file_qualified
            .get(&(file, qualified))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Names visible without a receiver: scope chain, bindings, wildcard
    /// imports, then same-package files.
    fn visible(
        &self,
        file: FileId,
        record: &SymbolRecord,
        name: &str,
        scope: &FileScope,
        accept: fn(DeclKind) -> bool,
    ) -> Vec<DeclId> {
        let entry = &self.map.files[file];
        let filter = |ids: &[DeclId]| -> Vec<DeclId> {
            ids.iter()
                .copied()
                .filter(|d| accept(self.map.decls[*d].kind))
                .collect()
        };

        for depth in (0..=record.scope.len()).rev() {
            let prefix = &record.scope[..depth];
            // Python class bodies do not enclose the methods defined in them.
            if depth > 0 && entry.language == Language::Python {
                let owner = join_qualified(&entry.module, prefix, None);
                if self
                    .decls_at(file, owner)
                    .iter()
                    .any(|d| self.map.decls[*d].kind.is_type())
                {
                    continue;
                }
            }
            let hits = filter(self.decls_at(file, join_qualified(&entry.module, prefix, Some(name))));
            if !hits.is_empty() {
                return hits;
            }
        }

        if let Some(bound) = scope.bindings.get(name) {
            let hits = filter(bound.as_slice());
            if !hits.is_empty() {
                return hits;
            }
        }

        let hits = filter(self.top_level_in(&scope.wildcard_files, name).as_slice());
        if !hits.is_empty() {
            return hits;
        }

        if let Some(files) = self.index.packages.get(&(entry.language, entry.module.clone())) {
            let others: Vec<FileId> = files.iter().copied().filter(|f| *f != file).collect();
            return filter(self.top_level_in(&others, name).as_slice());
        }
        Vec::new()
    }

    fn global(&self, name: &str, accept: fn(DeclKind) -> bool) -> Vec<DeclId> {
        self.index
            .by_name
            .get(name)
            .into_iter()
            .flatten()
            .copied()
            .filter(|d| accept(self.map.decls[*d].kind))
            .collect()
    }

    fn members_of(&self, owners: &[DeclId], name: &str) -> Vec<DeclId> {
        owners
            .iter()
            .filter_map(|owner| self.index.members.get(&(*owner, name.to_string())))
            .flatten()
            .copied()
            .collect()
    }

    fn enclosing_type(&self, file: FileId, record: &SymbolRecord) -> Option<DeclId> {
        let module = &self.map.files[file].module;
        (1..=record.scope.len()).rev().find_map(|depth| {
            let qualified = join_qualified(module, &record.scope[..depth], None);
            let is_type = |d: &DeclId| self.map.decls[*d].kind.is_type();
            self.decls_at(file, qualified.clone())
                .iter()
                .copied()
                .find(is_type)
                .or_else(|| {
                    self.index
                        .by_qualified
                        .get(&qualified)
                        .and_then(|ids| ids.iter().copied().find(is_type))
                })
        })
    }

    fn lookup_call(&self, file: FileId, record: &SymbolRecord, hint: &TargetHint, scope: &FileScope) -> Lookup {
        let name = record.name.as_str();
        let is_method = |k: DeclKind| k == DeclKind::Method;

        let Some(receiver) = hint.receiver.as_deref() else {
            let visible = self.visible(file, record, name, scope, is_callable_target);
            if !visible.is_empty() {
                return Lookup::Visible(visible);
            }
            if scope.external.contains(name) {
                return Lookup::External;
            }
            return Lookup::Unscoped(self.global(name, is_callable_target));
        };

        if matches!(receiver, "self" | "this" | "cls") {
            if let Some(owner) = self.enclosing_type(file, record) {
                let members = self.members_of(&[owner], name);
                if !members.is_empty() {
                    return Lookup::Visible(members);
                }
            }
            return Lookup::Unscoped(self.global(name, is_method));
        }

        if let Some(files) = scope.module_aliases.get(receiver) {
            let decls = self.top_level_in(files, name);
            return Lookup::Visible(decls.into_iter().filter(|d| is_callable_target(self.map.decls[*d].kind)).collect());
        }
        let head = receiver_head(receiver);
        if scope.external.contains(receiver) || scope.external.contains(head) {
            return Lookup::External;
        }
        if let Some(type_name) = receiver_type_name(receiver) {
            let types = self.visible(file, record, type_name, scope, |k| k.is_type());
            let members = self.members_of(&types, name);
            if !members.is_empty() {
                return Lookup::Visible(members);
            }
        }
        // Untyped receiver: any method of that name is only a candidate.
        Lookup::Unscoped(self.global(name, is_method))
    }

    fn lookup_type(&self, file: FileId, record: &SymbolRecord, hint: &TargetHint, scope: &FileScope) -> Lookup {
        let name = record.name.as_str();
        let is_type = |k: DeclKind| k.is_type();

        match hint.receiver.as_deref() {
            Some(receiver) => {
                if let Some(files) = scope.module_aliases.get(receiver) {
                    let decls = self.top_level_in(files, name);
                    return Lookup::Visible(decls.into_iter().filter(|d| self.map.decls[*d].kind.is_type()).collect());
                }
                let head = receiver_head(receiver);
                if scope.external.contains(receiver) || scope.external.contains(head) {
                    return Lookup::External;
                }
                // `Outer.Inner`
                if let Some(outer) = receiver_type_name(receiver) {
                    let owners = self.visible(file, record, outer, scope, is_type);
                    let inner: Vec<DeclId> = self
                        .members_of(&owners, name)
                        .into_iter()
                        .filter(|d| self.map.decls[*d].kind.is_type())
                        .collect();
                    if !inner.is_empty() {
                        return Lookup::Visible(inner);
                    }
                }
            }
            None => {
                let visible = self.visible(file, record, name, scope, is_type);
                if !visible.is_empty() {
                    return Lookup::Visible(visible);
                }
                if scope.external.contains(name) {
                    return Lookup::External;
                }
            }
        }
        Lookup::Visible(self.global(name, is_type))
    }

    /// Choose among candidates; `None` leaves the reference ambiguous.
    fn pick(&self, file: FileId, line: u32, candidates: &[DeclId]) -> Option<DeclId> {
        match candidates {
            [] => return None,
            [only] => return Some(*only),
            _ => {}
        }
        if self.tie_break == TieBreak::Strict {
            return None;
        }
        // Only collisions inside the referencing file are tie-broken.
        if candidates.iter().any(|d| self.map.decls[*d].file != file) {
            return None;
        }
        let position = |d: &DeclId| (self.map.decls[*d].start_line, *d);
        candidates
            .iter()
            .copied()
            .filter(|d| self.map.decls[*d].start_line <= line)
            .max_by_key(position)
            .or_else(|| candidates.iter().copied().max_by_key(position))
    }

    fn reference(&mut self, file: FileId, record: &SymbolRecord, hint: &TargetHint, scope: &FileScope) {
        let lookup = match hint.kind {
            RefKind::Call => self.lookup_call(file, record, hint, scope),
            RefKind::Inheritance | RefKind::Instantiation => self.lookup_type(file, record, hint, scope),
            RefKind::Import => return,
        };
        let (mut candidates, visible) = match lookup {
            Lookup::External => return,
            Lookup::Visible(c) => (c, true),
            Lookup::Unscoped(c) => (c, false),
        };
        candidates.sort_unstable();
        candidates.dedup();

        let source = self.source_of(file, record);
        let picked = if visible {
            self.pick(file, record.span.start_line, &candidates)
        } else {
            None
        };

        match picked {
            Some(target) => {
                let kind = match hint.kind {
                    RefKind::Inheritance => EdgeKind::Inheritance,
                    RefKind::Instantiation => EdgeKind::Composition,
                    _ if self.map.decls[target].kind.is_type() => EdgeKind::Composition,
                    _ => EdgeKind::Call,
                };
                self.map.edges.push(ResolvedEdge {
                    source,
                    target: SymbolRef::Decl(target),
                    kind,
                });
            }
            None => {
                let key = (source, hint.target.clone(), hint.kind);
                if !self.clusters.contains_key(&key) {
                    let cluster_id = ids::cluster_id(&self.map.node_id(source), &hint.target, hint.kind);
                    self.clusters.insert(
                        key.clone(),
                        AmbiguousCluster {
                            cluster_id,
                            source,
                            target_text: hint.target.clone(),
                            kind: hint.kind,
                            candidates: Vec::new(),
                            reference_count: 0,
                            path: record.span.file.clone(),
                            line: record.span.start_line,
                        },
                    );
                }
                if let Some(cluster) = self.clusters.get_mut(&key) {
                    cluster.reference_count += 1;
                    for candidate in candidates {
                        if !cluster.candidates.contains(&candidate) {
                            cluster.candidates.push(candidate);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::symbols::test_helpers::extract;

    fn map_with(files: &[(&str, Language, &str)], go_mod: Option<&str>, tie_break: TieBreak) -> RelationMap {
        let symbols: Vec<FileSymbols> = files
            .iter()
            .map(|(path, language, src)| extract(path, *language, src))
            .collect();
        let layout = RepoLayout::new(files.iter().map(|(p, _, _)| p.to_string()), go_mod);
        map_relations(&symbols, &layout, tie_break)
    }

    fn map(files: &[(&str, Language, &str)]) -> RelationMap {
        map_with(files, None, TieBreak::MostRecent)
    }

    fn edges(map: &RelationMap, kind: EdgeKind) -> Vec<(String, String)> {
        map.edges
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| {
                (
                    map.display_name(e.source).to_string(),
                    map.display_name(e.target).to_string(),
                )
            })
            .collect()
    }

    fn pair(a: &str, b: &str) -> (String, String) {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn test_python_import_and_call() {
        let m = map(&[
            ("a.py", Language::Python, "def foo():\n    return 1\n"),
            ("c.py", Language::Python, "from a import foo\n\ndef main():\n    foo()\n"),
            ("d.py", Language::Python, "import a\n\na.foo()\n"),
        ]);
        assert_eq!(
            edges(&m, EdgeKind::Import),
            vec![pair("c.py", "a.py"), pair("d.py", "a.py")]
        );
        assert_eq!(
            edges(&m, EdgeKind::Call),
            vec![pair("c.main", "a.foo"), pair("d.py", "a.foo")]
        );
        assert!(m.clusters.is_empty());
        assert!(m.external_imports.is_empty());
    }

    #[test]
    fn test_self_calls_and_composition() {
        let m = map(&[(
            "pkg/greet.py",
            Language::Python,
            "\
class Greeter:
    def hello(self):
        return self.format()

    def format(self):
        return 'hi'

def main():
    Greeter().hello()
",
        )]);
        assert_eq!(
            edges(&m, EdgeKind::Call),
            vec![
                pair("pkg.greet.Greeter.hello", "pkg.greet.Greeter.format"),
                pair("pkg.greet.main", "pkg.greet.Greeter.hello"),
            ]
        );
        assert_eq!(
            edges(&m, EdgeKind::Composition),
            vec![pair("pkg.greet.main", "pkg.greet.Greeter")]
        );
    }

    #[test]
    fn test_unimported_duplicates_become_one_cluster() {
        let m = map(&[
            ("x.py", Language::Python, "def process():\n    pass\n"),
            ("y.py", Language::Python, "def process():\n    pass\n"),
            ("z.py", Language::Python, "def run():\n    process()\n    process()\n    process()\n"),
        ]);
        assert!(edges(&m, EdgeKind::Call).is_empty());
        assert_eq!(m.clusters.len(), 1);
        let cluster = &m.clusters[0];
        assert_eq!(cluster.reference_count, 3);
        assert_eq!(cluster.candidates.len(), 2);
        assert_eq!(cluster.target_text, "process");
        assert_eq!(m.display_name(cluster.source), "z.run");
        assert_eq!(m.ambiguous_references(), 3);
    }

    #[test]
    fn test_untyped_receiver_forms_cluster() {
        let m = map(&[
            (
                "a.py",
                Language::Python,
                "class A:\n    def run(self):\n        pass\n\nclass B:\n    def run(self):\n        pass\n",
            ),
            ("c.py", Language::Python, "def f(x):\n    x.run()\n"),
        ]);
        assert!(edges(&m, EdgeKind::Call).is_empty());
        assert_eq!(m.clusters.len(), 1);
        assert_eq!(m.clusters[0].candidates.len(), 2);
        assert_eq!(m.display_name(m.clusters[0].source), "c.f");
    }

    #[test]
    fn test_unique_method_name_is_not_a_static_call() {
        let m = map(&[
            (
                "q.py",
                Language::Python,
                "class Queue:\n    def append(self, item):\n        pass\n",
            ),
            ("c.py", Language::Python, "def f():\n    items = []\n    items.append(1)\n"),
        ]);
        assert!(edges(&m, EdgeKind::Call).is_empty());
        assert_eq!(m.clusters.len(), 1);
        let names: Vec<&str> = m.clusters[0]
            .candidates
            .iter()
            .map(|d| m.decls[*d].qualified.as_str())
            .collect();
        assert_eq!(names, vec!["q.Queue.append"]);
    }

    #[test]
    fn test_self_call_without_member_forms_cluster() {
        let m = map(&[
            ("c.py", Language::Python, "class C:\n    def go(self):\n        self.missing()\n"),
            ("d.py", Language::Python, "class D:\n    def missing(self):\n        pass\n"),
        ]);
        assert!(edges(&m, EdgeKind::Call).is_empty());
        assert_eq!(m.clusters.len(), 1);
        assert_eq!(m.clusters[0].candidates.len(), 1);
        assert_eq!(m.display_name(m.clusters[0].source), "c.C.go");
    }

    #[test]
    fn test_imported_duplicate_from_other_file_is_not_tie_broken() {
        let m = map(&[
            (
                "a.py",
                Language::Python,
                "def helper():\n    return 1\n\ndef helper():\n    return 2\n",
            ),
            ("c.py", Language::Python, "from a import helper\n\ndef main():\n    helper()\n"),
        ]);
        assert_eq!(edges(&m, EdgeKind::Import), vec![pair("c.py", "a.py")]);
        assert!(edges(&m, EdgeKind::Call).is_empty());
        assert_eq!(m.clusters.len(), 1);
        assert_eq!(m.clusters[0].candidates.len(), 2);
    }

    #[test]
    fn test_reference_without_candidates_forms_empty_cluster() {
        let m = map(&[("u.py", Language::Python, "def f():\n    undefined_thing()\n")]);
        assert!(m.edges.is_empty());
        assert_eq!(m.clusters.len(), 1);
        let cluster = &m.clusters[0];
        assert!(cluster.candidates.is_empty());
        assert_eq!(cluster.reference_count, 1);
        assert_eq!(cluster.target_text, "undefined_thing");
        assert_eq!(m.ambiguous_references(), 1);
    }

    #[test]
    fn test_external_imports_suppress_references() {
        let m = map(&[
            ("svc.py", Language::Python, "def get():\n    pass\n"),
            (
                "app.py",
                Language::Python,
                "import requests\nfrom flask import Flask\n\nrequests.get('x')\nFlask(__name__)\n",
            ),
        ]);
        assert!(m.edges.is_empty());
        assert!(m.clusters.is_empty());
        assert_eq!(m.external_imports.len(), 2);
    }

    #[test]
    fn test_python_submodule_import() {
        let m = map(&[
            ("pkg/__init__.py", Language::Python, ""),
            ("pkg/util.py", Language::Python, "def helper():\n    pass\n"),
            ("pkg/main.py", Language::Python, "from . import util\n\nutil.helper()\n"),
        ]);
        assert_eq!(edges(&m, EdgeKind::Import), vec![pair("pkg/main.py", "pkg/util.py")]);
        assert_eq!(edges(&m, EdgeKind::Call), vec![pair("pkg/main.py", "pkg.util.helper")]);
    }

    const REDEFINED: &str = "\
function helper() { return 1; }
function early() { helper(); }
function helper() { return 2; }
function late() { helper(); }
";

    #[test]
    fn test_most_recent_tie_break() {
        let m = map(&[("lib.js", Language::JavaScript, REDEFINED)]);
        let calls: Vec<(String, u32)> = m
            .edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Call)
            .map(|e| match e.target {
                SymbolRef::Decl(d) => (m.display_name(e.source).to_string(), m.decls[d].start_line),
                SymbolRef::File(_) => unreachable!(),
            })
            .collect();
        assert_eq!(calls, vec![("lib.early".to_string(), 1), ("lib.late".to_string(), 3)]);
    }

    #[test]
    fn test_most_recent_without_earlier_declaration_takes_latest() {
        let src = "first();\nfunction first() { return 1; }\nfunction first() { return 2; }\n";
        let m = map(&[("hoist.js", Language::JavaScript, src)]);
        let targets: Vec<u32> = m
            .edges
            .iter()
            .filter_map(|e| match e.target {
                SymbolRef::Decl(d) => Some(m.decls[d].start_line),
                SymbolRef::File(_) => None,
            })
            .collect();
        assert_eq!(targets, vec![3]);
    }

    #[test]
    fn test_strict_tie_break_reports_ambiguity() {
        let m = map_with(&[("lib.js", Language::JavaScript, REDEFINED)], None, TieBreak::Strict);
        assert!(edges(&m, EdgeKind::Call).is_empty());
        assert_eq!(m.clusters.len(), 2);
        assert!(m.clusters.iter().all(|c| c.candidates.len() == 2));
    }

    #[test]
    fn test_go_packages_and_methods() {
        let m = map_with(
            &[
                (
                    "internal/store/db.go",
                    Language::Go,
                    "package store\n\ntype DB struct{}\n\nfunc Open() *DB { return &DB{} }\n",
                ),
                (
                    "internal/store/query.go",
                    Language::Go,
                    "package store\n\nfunc (d *DB) Query() { helper() }\n\nfunc helper() {}\n",
                ),
                (
                    "main.go",
                    Language::Go,
                    "package main\n\nimport (\n    \"fmt\"\n    \"example.com/app/internal/store\"\n)\n\nfunc main() {\n    db := store.Open()\n    db.Query()\n    fmt.Println(db)\n}\n",
                ),
            ],
            Some("module example.com/app\n"),
            TieBreak::MostRecent,
        );
        assert_eq!(
            edges(&m, EdgeKind::Import),
            vec![
                pair("main.go", "internal/store/db.go"),
                pair("main.go", "internal/store/query.go"),
            ]
        );
        assert_eq!(
            edges(&m, EdgeKind::Call),
            vec![
                pair("internal.store.DB.Query", "internal.store.helper"),
                pair("main.main", "internal.store.Open"),
            ]
        );
        assert_eq!(edges(&m, EdgeKind::Composition), vec![pair("internal.store.Open", "internal.store.DB")]);
        assert_eq!(m.external_imports.len(), 1);
        // `db` has no declared type, so `Query` stays a candidate.
        assert_eq!(m.clusters.len(), 1);
        let names: Vec<&str> = m.clusters[0]
            .candidates
            .iter()
            .map(|d| m.decls[*d].qualified.as_str())
            .collect();
        assert_eq!(names, vec!["internal.store.DB.Query"]);
    }

    #[test]
    fn test_java_imports_and_inheritance() {
        let m = map(&[
            (
                "src/com/acme/core/Engine.java",
                Language::Java,
                "package com.acme.core;\n\npublic class Engine { public void start() {} }\n",
            ),
            (
                "src/com/acme/app/Base.java",
                Language::Java,
                "package com.acme.app;\n\npublic class Base {}\n",
            ),
            (
                "src/com/acme/app/App.java",
                Language::Java,
                "package com.acme.app;\n\nimport com.acme.core.Engine;\nimport java.util.List;\n\npublic class App extends Base {\n    void run() {\n        Engine e = new Engine();\n        e.start();\n    }\n}\n",
            ),
        ]);
        assert_eq!(
            edges(&m, EdgeKind::Import),
            vec![pair("src/com/acme/app/App.java", "src/com/acme/core/Engine.java")]
        );
        assert_eq!(
            edges(&m, EdgeKind::Inheritance),
            vec![pair("com.acme.app.App", "com.acme.app.Base")]
        );
        assert_eq!(
            edges(&m, EdgeKind::Composition),
            vec![pair("com.acme.app.App.run", "com.acme.core.Engine")]
        );
        assert!(edges(&m, EdgeKind::Call).is_empty());
        assert_eq!(m.external_imports.len(), 1);
        assert_eq!(m.clusters.len(), 1);
        assert_eq!(m.clusters[0].candidates.len(), 1);
        assert_eq!(m.display_name(m.clusters[0].source), "com.acme.app.App.run");
    }

    #[test]
    fn test_typescript_bindings() {
        let m = map(&[
            (
                "src/util.ts",
                Language::TypeScript,
                "export function format(x: string) { return x; }\nexport class Store {}\n",
            ),
            (
                "src/app.ts",
                Language::TypeScript,
                "import Store from './util';\nimport { format as fmt } from './util';\nimport * as u from './util';\nimport React from 'react';\n\nfunction render() {\n    fmt('a');\n    u.format('b');\n    new Store();\n    React.createElement('div');\n}\n",
            ),
        ]);
        // One occurrence per import statement; the builder merges them.
        assert_eq!(
            edges(&m, EdgeKind::Import),
            vec![pair("src/app.ts", "src/util.ts"); 3]
        );
        assert_eq!(
            edges(&m, EdgeKind::Call),
            vec![pair("src.app.render", "src.util.format"), pair("src.app.render", "src.util.format")]
        );
        assert_eq!(edges(&m, EdgeKind::Composition), vec![pair("src.app.render", "src.util.Store")]);
        assert_eq!(m.external_imports.len(), 1);
        assert!(m.clusters.is_empty());
    }
}
