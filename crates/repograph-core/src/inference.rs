//! Inference gateway: turns ambiguous clusters (and optionally unexplained
//! nodes) into bounded requests to an external inference collaborator and
//! merges the answers into a graph draft as inferred data.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use crate::errors::InferenceError;
use crate::graph::builder::GraphDraft;
use crate::indexer::relations::{RelationMap, SymbolRef};
use crate::models::{
    EdgeKind, GraphEdge, NodeExplanation, NodeId, NodeKind, Provenance, RefKind,
};

/// A node offered to the collaborator as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateNode {
    pub id: NodeId,
    pub label: String,
    pub kind: NodeKind,
    pub path: String,
    pub qualified_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum InferenceSubject {
    /// A reference the mapper could not pin to one declaration.
    Cluster {
        cluster_id: String,
        source: CandidateNode,
        target_text: String,
        kind: RefKind,
        reference_count: u64,
        path: String,
        line: u32,
        candidates: Vec<CandidateNode>,
    },
    /// A node whose purpose has not been explained yet.
    Node { node: CandidateNode },
}

impl InferenceSubject {
    pub fn subject_id(&self) -> &str {
        match self {
            Self::Cluster { cluster_id, .. } => cluster_id,
            Self::Node { node } => &node.id,
        }
    }

    fn reference_count(&self) -> u64 {
        match self {
            Self::Cluster {
                reference_count, ..
            } => *reference_count,
            Self::Node { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceBatch {
    pub repo_ref: String,
    /// Position of this batch within the job, starting at 0.
    pub sequence: usize,
    pub subjects: Vec<InferenceSubject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Suggestion {
    Edge {
        target: NodeId,
        kind: EdgeKind,
        #[serde(default)]
        description: Option<String>,
    },
    Explanation { text: String },
}

/// One answer from the collaborator, naming the subject it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceCandidate {
    pub subject_id: String,
    pub suggestion: Suggestion,
    pub confidence: f64,
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn infer(&self, batch: InferenceBatch) -> Result<Vec<InferenceCandidate>, InferenceError>;
}

/// Offline stand-in: every request is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledInference;

#[async_trait]
impl InferenceService for DisabledInference {
    async fn infer(&self, _batch: InferenceBatch) -> Result<Vec<InferenceCandidate>, InferenceError> {
        Err(InferenceError::Unavailable("inference is disabled".into()))
    }
}

/// What one augmentation pass did to a draft.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceReport {
    pub batches_sent: usize,
    pub batches_failed: usize,
    pub edges_added: u64,
    pub explanations_added: u64,
    pub candidates_dropped: u64,
    /// Ambiguous references left without an inferred edge.
    pub unresolved_references: u64,
    pub partial: bool,
}

pub struct InferenceGateway {
    service: Arc<dyn InferenceService>,
    config: InferenceConfig,
}

fn candidate_node(draft: &GraphDraft, id: &str) -> Option<CandidateNode> {
    draft.node(id).map(|n| CandidateNode {
        id: n.id.clone(),
        label: n.label.clone(),
        kind: n.kind,
        path: n.path.clone(),
        qualified_name: n.qualified_name.clone(),
    })
}

impl InferenceGateway {
    pub fn new(service: Arc<dyn InferenceService>, config: InferenceConfig) -> Self {
        Self { service, config }
    }

    fn subjects(&self, relations: &RelationMap, draft: &GraphDraft) -> Vec<InferenceSubject> {
        let mut subjects = Vec::new();
        for cluster in &relations.clusters {
            let Some(source) = candidate_node(draft, &relations.node_id(cluster.source)) else {
                continue;
            };
            let candidates = cluster
                .candidates
                .iter()
                .filter_map(|&decl| candidate_node(draft, &relations.node_id(SymbolRef::Decl(decl))))
                .collect();
            subjects.push(InferenceSubject::Cluster {
                cluster_id: cluster.cluster_id.clone(),
                source,
                target_text: cluster.target_text.clone(),
                kind: cluster.kind,
                reference_count: cluster.reference_count,
                path: cluster.path.clone(),
                line: cluster.line,
                candidates,
            });
        }
        if self.config.explain_nodes {
            subjects.extend(
                draft
                    .nodes_without_explanation()
                    .take(self.config.max_explained_nodes)
                    .filter_map(|n| candidate_node(draft, &n.id))
                    .map(|node| InferenceSubject::Node { node }),
            );
        }
        subjects
    }

    /// Apply one answer. Returns whether it changed the draft.
    fn apply(
        draft: &mut GraphDraft,
        subject: &InferenceSubject,
        candidate: InferenceCandidate,
    ) -> bool {
        let Some(provenance) = Provenance::inferred(candidate.confidence) else {
            return false;
        };
        match (subject, candidate.suggestion) {
            (
                InferenceSubject::Cluster {
                    source,
                    reference_count,
                    ..
                },
                Suggestion::Edge {
                    target,
                    kind,
                    description,
                },
            ) => {
                if target == source.id {
                    return false;
                }
                draft.add_edge(GraphEdge {
                    source: source.id.clone(),
                    target,
                    kind,
                    weight: u32::try_from(*reference_count).unwrap_or(u32::MAX).max(1),
                    provenance,
                    description,
                })
            }
            (InferenceSubject::Node { node }, Suggestion::Explanation { text }) => {
                let text = text.trim();
                if text.is_empty() {
                    return false;
                }
                draft.set_explanation(
                    &node.id,
                    NodeExplanation {
                        text: text.to_string(),
                        confidence: provenance.confidence(),
                    },
                )
            }
            _ => false,
        }
    }

    /// Send every subject to the collaborator and merge the answers into
    /// `draft`, recording degraded coverage on the draft itself.
    pub async fn augment(
        &self,
        repo_ref: &str,
        relations: &RelationMap,
        draft: &mut GraphDraft,
    ) -> InferenceReport {
        let subjects = self.subjects(relations, draft);
        let mut report = InferenceReport::default();

        if subjects.is_empty() {
            return report;
        }

        if !self.config.enabled {
            report.unresolved_references = subjects.iter().map(InferenceSubject::reference_count).sum();
            report.partial = report.unresolved_references > 0;
            tracing::debug!(
                repo = repo_ref,
                unresolved = report.unresolved_references,
                "inference disabled; ambiguous references left unresolved"
            );
            Self::record(draft, &report);
            return report;
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        for (sequence, chunk) in subjects.chunks(self.config.batch_size.max(1)).enumerate() {
            let batch = InferenceBatch {
                repo_ref: repo_ref.to_string(),
                sequence,
                subjects: chunk.to_vec(),
            };
            report.batches_sent += 1;

            let answer = match tokio::time::timeout(timeout, self.service.infer(batch)).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout(self.config.timeout_ms)),
            };
            let candidates = match answer {
                Ok(candidates) => candidates,
                Err(err) => {
                    let omitted: u64 = chunk.iter().map(InferenceSubject::reference_count).sum();
                    tracing::warn!(
                        repo = repo_ref,
                        batch = sequence,
                        omitted,
                        error = %err,
                        "inference batch failed; references omitted"
                    );
                    report.batches_failed += 1;
                    report.unresolved_references += omitted;
                    report.partial = true;
                    continue;
                }
            };

            let by_id: HashMap<&str, &InferenceSubject> =
                chunk.iter().map(|s| (s.subject_id(), s)).collect();
            let mut answered: HashSet<&str> = HashSet::new();
            for candidate in candidates {
                let Some(&subject) = by_id.get(candidate.subject_id.as_str()) else {
                    tracing::debug!(subject = %candidate.subject_id, "dropping candidate for unknown subject");
                    report.candidates_dropped += 1;
                    continue;
                };
                let explanation = matches!(candidate.suggestion, Suggestion::Explanation { .. });
                if Self::apply(draft, subject, candidate) {
                    answered.insert(subject.subject_id());
                    if explanation {
                        report.explanations_added += 1;
                    } else {
                        report.edges_added += 1;
                    }
                } else {
                    report.candidates_dropped += 1;
                }
            }

            report.unresolved_references += chunk
                .iter()
                .filter(|s| !answered.contains(s.subject_id()))
                .map(InferenceSubject::reference_count)
                .sum::<u64>();
        }

        tracing::debug!(
            repo = repo_ref,
            batches = report.batches_sent,
            failed = report.batches_failed,
            edges = report.edges_added,
            explanations = report.explanations_added,
            dropped = report.candidates_dropped,
            "inference pass finished"
        );
        Self::record(draft, &report);
        report
    }

    fn record(draft: &mut GraphDraft, report: &InferenceReport) {
        let coverage = draft.coverage_mut();
        coverage.unresolved_references += report.unresolved_references;
        coverage.partial_relationship_coverage |= report.partial;
    }
}
