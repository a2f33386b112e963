//! One attempt of one job: crawl, parse, map, build, infer, commit.
//!
//! Cancellation and stage hooks are checked at every boundary. Work already
//! in flight when a job is cancelled runs to completion and is discarded.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::errors::{AnalysisError, AnalysisResult, RepoAccessError};
use crate::events::Milestone;
use crate::graph::builder::build_draft;
use crate::indexer::imports::RepoLayout;
use crate::indexer::pipeline::{parallel_extract, FileInput, PipelineOptions};
use crate::indexer::relations::map_relations;
use crate::models::{AnalysisGraph, AnalysisJob, JobStatus, ParseOutcome, SourceFile};
use crate::orchestrator::{blocking, Shared};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Crawl,
    Parse,
    Map,
    Build,
    Infer,
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawl => "crawl",
            Self::Parse => "parse",
            Self::Map => "map",
            Self::Build => "build",
            Self::Infer => "infer",
            Self::Commit => "commit",
        }
    }

    fn milestone(&self) -> Option<Milestone> {
        match self {
            Self::Crawl => Some(Milestone::CrawlingDone),
            Self::Parse => Some(Milestone::ParsingDone),
            Self::Map => Some(Milestone::MappingDone),
            Self::Build => Some(Milestone::GraphBuilt),
            Self::Infer => Some(Milestone::InferenceDone),
            Self::Commit => None,
        }
    }

    /// Fraction of the job done once this stage finishes.
    fn progress(&self) -> f64 {
        match self {
            Self::Crawl => 0.2,
            Self::Parse => 0.5,
            Self::Map => 0.65,
            Self::Build => 0.75,
            Self::Infer => 0.9,
            Self::Commit => 1.0,
        }
    }
}

/// Observer called around every stage of every attempt.
pub trait StageHooks: Send + Sync {
    /// An error fails the attempt exactly as a failure inside the stage would.
    fn before_stage(&self, _job: &AnalysisJob, _attempt: u32, _stage: Stage) -> AnalysisResult<()> {
        Ok(())
    }

    fn after_stage(&self, _job: &AnalysisJob, _attempt: u32, _stage: Stage) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl StageHooks for NoopHooks {}

pub(crate) struct Attempt<'a> {
    shared: &'a Shared,
    job: &'a AnalysisJob,
    attempt: u32,
    token: &'a CancellationToken,
}

impl<'a> Attempt<'a> {
    pub(crate) fn new(
        shared: &'a Shared,
        job: &'a AnalysisJob,
        attempt: u32,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            shared,
            job,
            attempt,
            token,
        }
    }

    fn enter(&self, stage: Stage) -> AnalysisResult<()> {
        if self.token.is_cancelled() {
            return Err(AnalysisError::Cancelled(self.job.job_id.clone()));
        }
        self.shared.hooks.before_stage(self.job, self.attempt, stage)?;
        tracing::debug!(job_id = %self.job.job_id, stage = stage.as_str(), "stage started");
        Ok(())
    }

    fn leave(&self, stage: Stage) {
        self.shared.hooks.after_stage(self.job, self.attempt, stage);
        if let Some(milestone) = stage.milestone() {
            self.shared.report(&self.job.job_id, milestone, stage.progress());
        }
    }

    /// List and read every file. A file that vanished between listing and
    /// reading fails on its own; any other access error fails the attempt.
    async fn crawl(&self) -> AnalysisResult<Vec<FileInput>> {
        let repo_ref = self.job.repo_ref.as_str();
        let repo = &self.shared.repo;
        let mut paths = repo.list_files(repo_ref).await?;
        paths.sort();
        paths.dedup();

        let concurrency = self.shared.config.pipeline.file_concurrency.max(1);
        let reads: Vec<(String, Result<Vec<u8>, RepoAccessError>)> = stream::iter(paths)
            .map(|path| async move {
                let content = repo.read_file(repo_ref, &path).await;
                (path, content)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut inputs = Vec::with_capacity(reads.len());
        for (path, content) in reads {
            match content {
                Ok(bytes) => inputs.push(FileInput {
                    path,
                    content: Ok(bytes),
                }),
                Err(err @ RepoAccessError::NotFound(_)) => {
                    tracing::warn!(job_id = %self.job.job_id, path = %path, error = %err, "file vanished during crawl");
                    inputs.push(FileInput {
                        path,
                        content: Err(err.to_string()),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        inputs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(inputs)
    }

    pub(crate) async fn run(self) -> AnalysisResult<(AnalysisJob, Arc<AnalysisGraph>)> {
        let config = &self.shared.config;

        self.enter(Stage::Crawl)?;
        let inputs = self.crawl().await?;
        let go_mod = inputs
            .iter()
            .find(|input| input.path == "go.mod")
            .and_then(|input| input.content.as_ref().ok())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
        tracing::debug!(job_id = %self.job.job_id, files = inputs.len(), "crawl finished");
        self.leave(Stage::Crawl);

        self.enter(Stage::Parse)?;
        let options = PipelineOptions {
            max_file_bytes: config.pipeline.max_file_bytes,
            parse_timeout_ms: config.pipeline.parse_timeout_ms,
            workers: config.pipeline.file_concurrency,
        };
        let results = blocking("parse", move || Ok(parallel_extract(&inputs, &options))).await?;
        let mut files: Vec<SourceFile> = Vec::with_capacity(results.len());
        let mut symbols = Vec::new();
        for result in results {
            files.push(result.file);
            symbols.extend(result.symbols);
        }
        let failed = files
            .iter()
            .filter(|f| matches!(f.outcome, ParseOutcome::Failed(_)))
            .count();
        tracing::debug!(job_id = %self.job.job_id, parsed = symbols.len(), failed, "parse finished");
        self.leave(Stage::Parse);

        self.enter(Stage::Map)?;
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let tie_break = config.resolution.tie_break;
        let relations = blocking("map", move || {
            let layout = RepoLayout::new(paths, go_mod.as_deref());
            Ok(map_relations(&symbols, &layout, tie_break))
        })
        .await?;
        self.leave(Stage::Map);

        self.enter(Stage::Build)?;
        let mut draft = build_draft(&files, &relations)?;
        self.leave(Stage::Build);

        self.enter(Stage::Infer)?;
        let report = self
            .shared
            .gateway
            .augment(&self.job.repo_ref, &relations, &mut draft)
            .await;
        if report.partial {
            tracing::warn!(
                job_id = %self.job.job_id,
                unresolved = report.unresolved_references,
                "relationship coverage is partial"
            );
        }
        self.leave(Stage::Infer);

        self.enter(Stage::Commit)?;
        if !self.shared.begin_commit(&self.job.job_id, self.token) {
            return Err(AnalysisError::Cancelled(self.job.job_id.clone()));
        }
        let graph = draft.finish(&self.job.repo_ref, &self.job.job_id);
        let mut completed = self.job.clone();
        completed.status = JobStatus::Complete;
        completed.completed_at = Some(graph.generated_at);
        completed.failure_reason = None;
        completed.graph_version = Some(graph.version_id.clone());
        completed.coverage = Some(graph.coverage.clone());

        let store = Arc::clone(&self.shared.store);
        let record = completed.clone();
        let graph = blocking("commit", move || store.commit(&record, &files, graph)).await?;
        self.leave(Stage::Commit);

        Ok((completed, graph))
    }
}
