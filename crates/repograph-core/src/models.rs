//! Shared typed models used across indexing, graph assembly, storage, and
//! orchestration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = String;
pub type NodeId = String;
pub type GraphVersionId = String;

/// Highest confidence an inferred edge or explanation may carry.
pub const MAX_INFERRED_CONFIDENCE: f64 = 0.99;

/// Failed attempts after which a job is terminally failed.
pub const MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Languages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    TypeScript,
    Tsx,
    JavaScript,
    Go,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::Java,
        Language::TypeScript,
        Language::Tsx,
        Language::JavaScript,
        Language::Go,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::JavaScript => "javascript",
            Self::Go => "go",
        }
    }

    /// TypeScript, TSX and JavaScript share one extraction walker.
    pub fn is_ecmascript(&self) -> bool {
        matches!(self, Self::TypeScript | Self::Tsx | Self::JavaScript)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .iter()
            .find(|lang| lang.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown language: {s}"))
    }
}

// ---------------------------------------------------------------------------
// AnalysisJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One repository analysis request and its retry-bounded lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: JobId,
    pub repo_ref: String,
    pub status: JobStatus,
    /// Number of failed attempts so far (0..=MAX_ATTEMPTS).
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub graph_version: Option<GraphVersionId>,
    pub coverage: Option<Coverage>,
}

impl AnalysisJob {
    pub fn new(repo_ref: &str) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            repo_ref: repo_ref.to_string(),
            status: JobStatus::Queued,
            attempt_count: 0,
            created_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
            graph_version: None,
            coverage: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SourceFile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "lowercase")]
pub enum ParseOutcome {
    Ok,
    Partial(String),
    Failed(String),
    /// Unsupported language or over the size cap; never parsed.
    Skipped(String),
}

impl ParseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial(_) => "partial",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Ok => None,
            Self::Partial(d) | Self::Failed(d) | Self::Skipped(d) => Some(d.as_str()),
        }
    }

    /// Whether the file has a tree usable for graph nodes.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ok | Self::Partial(_))
    }

    pub fn from_parts(outcome: &str, detail: Option<String>) -> Self {
        let detail = detail.unwrap_or_default();
        match outcome {
            "ok" => Self::Ok,
            "partial" => Self::Partial(detail),
            "failed" => Self::Failed(detail),
            _ => Self::Skipped(detail),
        }
    }
}

/// A crawled file as recorded by the job that crawled it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub language: Option<Language>,
    pub content_hash: String,
    pub size_bytes: u64,
    pub line_count: u64,
    pub outcome: ParseOutcome,
}

// ---------------------------------------------------------------------------
// SymbolRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Module,
    Class,
    Interface,
    Function,
    Method,
}

impl DeclKind {
    pub fn is_type(&self) -> bool {
        matches!(self, Self::Class | Self::Interface)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function | Self::Method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Import,
    Call,
    Inheritance,
    Instantiation,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Call => "call",
            Self::Inheritance => "inheritance",
            Self::Instantiation => "instantiation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Length of the spanned source text.
    pub bytes: u64,
}

/// `from m import name as alias` / `import { name as alias } from 'm'`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedName {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportedName {
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Import-specific detail attached to `RefKind::Import` references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportClause {
    pub names: Vec<ImportedName>,
    /// Local name bound to the whole module (`import a.b as c`, `import * as c`,
    /// Go package alias).
    pub module_alias: Option<String>,
    pub wildcard: bool,
}

/// What a reference points at, as written in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHint {
    pub kind: RefKind,
    /// Module path for imports, referenced name otherwise.
    pub target: String,
    /// Receiver or qualifier expression (`obj` in `obj.run()`).
    pub receiver: Option<String>,
    pub import: Option<ImportClause>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "lowercase")]
pub enum SymbolKind {
    Declaration { decl: DeclKind },
    Reference { hint: TargetHint },
}

/// A single extracted declaration or reference scoped to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub kind: SymbolKind,
    /// Declared name, or the referenced name for references.
    pub name: String,
    /// Module (or package) the file contributes to; may be empty.
    pub module: String,
    /// Enclosing scope path below the module, outermost first.
    pub scope: Vec<String>,
    pub span: Span,
}

impl SymbolRecord {
    pub fn declaration(
        decl: DeclKind,
        name: &str,
        module: &str,
        scope: &[String],
        span: Span,
    ) -> Self {
        Self {
            kind: SymbolKind::Declaration { decl },
            name: name.to_string(),
            module: module.to_string(),
            scope: scope.to_vec(),
            span,
        }
    }

    pub fn reference(hint: TargetHint, module: &str, scope: &[String], span: Span) -> Self {
        let name = match hint.kind {
            RefKind::Import => hint.target.clone(),
            _ => hint
                .target
                .rsplit('.')
                .next()
                .unwrap_or(hint.target.as_str())
                .to_string(),
        };
        Self {
            kind: SymbolKind::Reference { hint },
            name,
            module: module.to_string(),
            scope: scope.to_vec(),
            span,
        }
    }

    pub fn decl_kind(&self) -> Option<DeclKind> {
        match &self.kind {
            SymbolKind::Declaration { decl } => Some(*decl),
            SymbolKind::Reference { .. } => None,
        }
    }

    pub fn hint(&self) -> Option<&TargetHint> {
        match &self.kind {
            SymbolKind::Declaration { .. } => None,
            SymbolKind::Reference { hint } => Some(hint),
        }
    }

    /// Dotted path of the declaration (`module.Outer.name`).
    pub fn qualified_name(&self) -> String {
        join_qualified(&self.module, &self.scope, Some(&self.name))
    }

    /// Dotted path of the innermost enclosing declaration, `None` at module level.
    pub fn enclosing_qualified_name(&self) -> Option<String> {
        if self.scope.is_empty() {
            None
        } else {
            Some(join_qualified(&self.module, &self.scope, None))
        }
    }
}

pub fn join_qualified(module: &str, scope: &[String], name: Option<&str>) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(scope.len() + 2);
    if !module.is_empty() {
        parts.push(module);
    }
    parts.extend(scope.iter().map(String::as_str));
    if let Some(name) = name {
        parts.push(name);
    }
    parts.join(".")
}

// ---------------------------------------------------------------------------
// Graph types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Module,
    Class,
    Interface,
    Function,
    Method,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Module => "module",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Function => "function",
            Self::Method => "method",
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "module" => Ok(Self::Module),
            "class" => Ok(Self::Class),
            "interface" => Ok(Self::Interface),
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

impl From<DeclKind> for NodeKind {
    fn from(kind: DeclKind) -> Self {
        match kind {
            DeclKind::Module => Self::Module,
            DeclKind::Class => Self::Class,
            DeclKind::Interface => Self::Interface,
            DeclKind::Function => Self::Function,
            DeclKind::Method => Self::Method,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub lines: u64,
    pub bytes: u64,
}

/// Plain-language purpose supplied by the inference collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExplanation {
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub label: String,
    pub kind: NodeKind,
    pub path: String,
    pub language: Language,
    pub qualified_name: String,
    pub metrics: NodeMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<NodeExplanation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Import,
    Call,
    Inheritance,
    Composition,
    Dataflow,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Call => "call",
            Self::Inheritance => "inheritance",
            Self::Composition => "composition",
            Self::Dataflow => "dataflow",
        }
    }
}

impl FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "import" => Ok(Self::Import),
            "call" => Ok(Self::Call),
            "inheritance" => Ok(Self::Inheritance),
            "composition" => Ok(Self::Composition),
            "dataflow" => Ok(Self::Dataflow),
            other => Err(format!("unknown edge kind: {other}")),
        }
    }
}

/// Where an edge came from. Static edges are certain; inferred edges carry the
/// collaborator's confidence, always below 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Provenance {
    Static,
    Inferred { confidence: f64 },
}

impl Provenance {
    /// Build an inferred provenance, capping confidence below certainty.
    /// Returns `None` for values that are not a usable confidence.
    pub fn inferred(confidence: f64) -> Option<Self> {
        if !confidence.is_finite() || confidence <= 0.0 {
            return None;
        }
        Some(Self::Inferred {
            confidence: confidence.min(MAX_INFERRED_CONFIDENCE),
        })
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Static => 1.0,
            Self::Inferred { confidence } => *confidence,
        }
    }

    pub fn is_inferred(&self) -> bool {
        matches!(self, Self::Inferred { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "EdgeWire", try_from = "EdgeWire")]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    pub weight: u32,
    pub provenance: Provenance,
    pub description: Option<String>,
}

impl GraphEdge {
    pub fn new_static(source: &str, target: &str, kind: EdgeKind) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            kind,
            weight: 1,
            provenance: Provenance::Static,
            description: None,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.provenance.confidence()
    }

    pub fn inferred_by_ai(&self) -> bool {
        self.provenance.is_inferred()
    }

    pub fn key(&self) -> (NodeId, NodeId, EdgeKind) {
        (self.source.clone(), self.target.clone(), self.kind)
    }
}

/// Flat wire shape of an edge, with the provenance spelled out the way
/// consumers read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EdgeWire {
    source: NodeId,
    target: NodeId,
    kind: EdgeKind,
    weight: u32,
    confidence: f64,
    #[serde(rename = "inferredByAI")]
    inferred_by_ai: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl From<GraphEdge> for EdgeWire {
    fn from(edge: GraphEdge) -> Self {
        Self {
            confidence: edge.confidence(),
            inferred_by_ai: edge.inferred_by_ai(),
            source: edge.source,
            target: edge.target,
            kind: edge.kind,
            weight: edge.weight,
            description: edge.description,
        }
    }
}

impl TryFrom<EdgeWire> for GraphEdge {
    type Error = String;

    fn try_from(wire: EdgeWire) -> Result<Self, Self::Error> {
        let provenance = if wire.inferred_by_ai {
            if wire.confidence >= 1.0 {
                return Err(format!(
                    "inferred edge {} -> {} claims confidence {}",
                    wire.source, wire.target, wire.confidence
                ));
            }
            Provenance::inferred(wire.confidence)
                .ok_or_else(|| format!("invalid confidence {}", wire.confidence))?
        } else {
            if (wire.confidence - 1.0).abs() > f64::EPSILON {
                return Err(format!(
                    "static edge {} -> {} must have confidence 1.0",
                    wire.source, wire.target
                ));
            }
            Provenance::Static
        };
        Ok(Self {
            source: wire.source,
            target: wire.target,
            kind: wire.kind,
            weight: wire.weight,
            provenance,
            description: wire.description,
        })
    }
}

/// Per-job counts qualifying how complete a result is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub files_total: u64,
    pub files_parsed: u64,
    pub files_partial: u64,
    pub files_failed: u64,
    pub files_unsupported: u64,
    pub static_edges: u64,
    pub inferred_edges: u64,
    pub ambiguous_references: u64,
    pub unresolved_references: u64,
    pub external_imports: u64,
    pub nodes_explained: u64,
    pub partial_relationship_coverage: bool,
}

/// The immutable, versioned output of one completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisGraph {
    pub version_id: GraphVersionId,
    pub repo_ref: String,
    pub job_id: JobId,
    pub generated_at: DateTime<Utc>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub coverage: Coverage,
}

impl AnalysisGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes
            .binary_search_by(|n| n.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    pub fn node_by_qualified_name(&self, qualified_name: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.qualified_name == qualified_name)
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Rough in-memory footprint, used for the cache byte budget.
    pub fn approx_bytes(&self) -> usize {
        let nodes: usize = self
            .nodes
            .iter()
            .map(|n| {
                96 + n.id.len()
                    + n.label.len()
                    + n.path.len()
                    + n.qualified_name.len()
                    + n.explanation.as_ref().map_or(0, |e| e.text.len() + 16)
            })
            .sum();
        let edges: usize = self
            .edges
            .iter()
            .map(|e| {
                64 + e.source.len() + e.target.len() + e.description.as_ref().map_or(0, String::len)
            })
            .sum();
        256 + nodes + edges
    }
}
