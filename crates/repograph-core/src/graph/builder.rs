//! Graph assembly.
//!
//! Building happens in two phases. `build_draft` turns the usable files and
//! the relation map into nodes and static edges; the inference gateway may
//! then add inferred edges and explanations to the draft; `finish` freezes it
//! into a sorted, versioned `AnalysisGraph`.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::errors::{AnalysisError, AnalysisResult};
use crate::graph::ids;
use crate::indexer::relations::{RelationMap, SymbolRef};
use crate::models::{
    AnalysisGraph, Coverage, EdgeKind, GraphEdge, GraphNode, NodeExplanation, NodeId, NodeKind,
    NodeMetrics, ParseOutcome, Provenance, SourceFile,
};

type EdgeKey = (NodeId, NodeId, EdgeKind);

#[derive(Debug, Clone)]
pub struct GraphDraft {
    nodes: BTreeMap<NodeId, GraphNode>,
    edges: BTreeMap<EdgeKey, GraphEdge>,
    coverage: Coverage,
    rejected_edges: u64,
}

/// Whether `candidate` should replace `current` for the same edge key.
fn outranks(candidate: &Provenance, current: &Provenance) -> bool {
    match (candidate, current) {
        (Provenance::Static, Provenance::Inferred { .. }) => true,
        (Provenance::Inferred { confidence: a }, Provenance::Inferred { confidence: b }) => a > b,
        _ => false,
    }
}

fn file_coverage(files: &[SourceFile]) -> Coverage {
    let mut coverage = Coverage {
        files_total: files.len() as u64,
        ..Coverage::default()
    };
    for file in files {
        match file.outcome {
            ParseOutcome::Ok => coverage.files_parsed += 1,
            ParseOutcome::Partial(_) => coverage.files_partial += 1,
            ParseOutcome::Failed(_) => coverage.files_failed += 1,
            ParseOutcome::Skipped(_) => coverage.files_unsupported += 1,
        }
    }
    coverage
}

/// Nodes for every usable file and its declarations, plus the static edges.
pub fn build_draft(files: &[SourceFile], relations: &RelationMap) -> AnalysisResult<GraphDraft> {
    let by_path: HashMap<&str, &SourceFile> = files.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut draft = GraphDraft {
        nodes: BTreeMap::new(),
        edges: BTreeMap::new(),
        coverage: file_coverage(files),
        rejected_edges: 0,
    };

    for entry in &relations.files {
        let source = by_path
            .get(entry.path.as_str())
            .filter(|f| f.outcome.is_usable())
            .ok_or_else(|| {
                AnalysisError::Graph(format!("{} has symbols but no usable parse", entry.path))
            })?;
        let label = entry.path.rsplit('/').next().unwrap_or(&entry.path);
        draft.add_node(GraphNode {
            id: ids::file_node_id(&entry.path),
            label: label.to_string(),
            kind: NodeKind::File,
            path: entry.path.clone(),
            language: entry.language,
            qualified_name: entry.path.clone(),
            metrics: NodeMetrics {
                lines: source.line_count,
                bytes: source.size_bytes,
            },
            explanation: None,
        });
    }

    for (idx, decl) in relations.decls.iter().enumerate() {
        let file = &relations.files[decl.file];
        draft.add_node(GraphNode {
            id: relations.node_id(SymbolRef::Decl(idx)),
            label: decl.name.clone(),
            kind: decl.kind.into(),
            path: file.path.clone(),
            language: file.language,
            qualified_name: decl.qualified.clone(),
            metrics: NodeMetrics {
                lines: u64::from(decl.end_line.saturating_sub(decl.start_line)) + 1,
                bytes: decl.bytes,
            },
            explanation: None,
        });
    }

    for edge in &relations.edges {
        let source = relations.node_id(edge.source);
        let target = relations.node_id(edge.target);
        draft.add_edge(GraphEdge::new_static(&source, &target, edge.kind));
    }

    draft.coverage.external_imports = relations.external_imports.len() as u64;
    draft.coverage.ambiguous_references = relations.ambiguous_references();

    tracing::debug!(
        nodes = draft.nodes.len(),
        edges = draft.edges.len(),
        "graph draft built"
    );
    Ok(draft)
}

impl GraphDraft {
    /// First node wins for a given id.
    fn add_node(&mut self, node: GraphNode) {
        self.nodes.entry(node.id.clone()).or_insert(node);
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes_without_explanation(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values().filter(|n| n.explanation.is_none())
    }

    pub fn coverage_mut(&mut self) -> &mut Coverage {
        &mut self.coverage
    }

    pub fn rejected_edges(&self) -> u64 {
        self.rejected_edges
    }

    /// Merge an edge into the draft. Duplicates on (source, target, kind)
    /// sum their weights and keep the stronger provenance. Edges with an
    /// endpoint outside the node set are rejected.
    pub fn add_edge(&mut self, edge: GraphEdge) -> bool {
        if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
            tracing::debug!(source = %edge.source, target = %edge.target, "rejecting dangling edge");
            self.rejected_edges += 1;
            return false;
        }
        match self.edges.get_mut(&edge.key()) {
            Some(existing) => {
                existing.weight = existing.weight.saturating_add(edge.weight);
                if outranks(&edge.provenance, &existing.provenance) {
                    existing.provenance = edge.provenance;
                    existing.description = edge.description;
                }
            }
            None => {
                self.edges.insert(edge.key(), edge);
            }
        }
        true
    }

    pub fn set_explanation(&mut self, id: &str, explanation: NodeExplanation) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.explanation = Some(explanation);
                true
            }
            None => false,
        }
    }

    /// Freeze the draft into a new graph version.
    pub fn finish(self, repo_ref: &str, job_id: &str) -> AnalysisGraph {
        let mut coverage = self.coverage;
        let edges: Vec<GraphEdge> = self.edges.into_values().collect();
        let nodes: Vec<GraphNode> = self.nodes.into_values().collect();
        coverage.static_edges = edges.iter().filter(|e| !e.inferred_by_ai()).count() as u64;
        coverage.inferred_edges = edges.len() as u64 - coverage.static_edges;
        coverage.nodes_explained = nodes.iter().filter(|n| n.explanation.is_some()).count() as u64;

        let graph = AnalysisGraph {
            version_id: uuid::Uuid::new_v4().to_string(),
            repo_ref: repo_ref.to_string(),
            job_id: job_id.to_string(),
            generated_at: Utc::now(),
            nodes,
            edges,
            coverage,
        };
        tracing::debug!(
            version = %graph.version_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "graph finished"
        );
        graph
    }
}
