//! Job orchestration: a bounded worker pool draining a FIFO of analysis
//! jobs, with bounded retries, cancellation and startup recovery.
//!
//! State machine per job:
//!
//! ```text
//! queued -> running -> complete
//! queued -> running -> queued            (failed attempt, attempts < 3)
//! queued -> running -> failed            (third failed attempt, fatal error, or cancel)
//! queued -> failed                       (cancelled before a worker picked it up)
//! ```

pub mod queue;
pub mod stages;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::errors::{AnalysisError, AnalysisResult};
use crate::events::{EventBus, JobEvent, Milestone};
use crate::inference::{DisabledInference, InferenceGateway, InferenceService};
use crate::models::{
    AnalysisGraph, AnalysisJob, Coverage, GraphVersionId, JobId, JobStatus, MAX_ATTEMPTS,
};
use crate::repository::RepositoryAccess;
use crate::store::results::ResultStore;

use queue::JobQueue;
pub use stages::{NoopHooks, Stage, StageHooks};

/// What `get_status` reports for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub repo_ref: String,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub progress_fraction: f64,
    pub failure_reason: Option<String>,
    pub graph_version: Option<GraphVersionId>,
    pub coverage: Option<Coverage>,
}

impl JobStatusView {
    fn new(job: &AnalysisJob, progress_fraction: f64) -> Self {
        Self {
            job_id: job.job_id.clone(),
            repo_ref: job.repo_ref.clone(),
            status: job.status,
            attempt_count: job.attempt_count,
            progress_fraction,
            failure_reason: job.failure_reason.clone(),
            graph_version: job.graph_version.clone(),
            coverage: job.coverage.clone(),
        }
    }
}

struct JobEntry {
    job: AnalysisJob,
    progress: f64,
    cancel: CancellationToken,
    /// Set once the running attempt has started writing its result.
    committing: bool,
    status_tx: watch::Sender<JobStatus>,
}

impl JobEntry {
    fn new(job: AnalysisJob) -> Self {
        let (status_tx, _) = watch::channel(job.status);
        Self {
            job,
            progress: 0.0,
            cancel: CancellationToken::new(),
            committing: false,
            status_tx,
        }
    }

    fn view(&self) -> JobStatusView {
        JobStatusView::new(&self.job, self.progress)
    }
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, JobEntry>,
    /// The one queued or running job of each repository.
    active_by_repo: HashMap<String, JobId>,
}

impl State {
    fn release_repo(&mut self, repo_ref: &str, job_id: &str) {
        if self.active_by_repo.get(repo_ref).map(String::as_str) == Some(job_id) {
            self.active_by_repo.remove(repo_ref);
        }
    }
}

/// Run blocking work off the async workers.
pub(crate) async fn blocking<T, F>(stage: &'static str, f: F) -> AnalysisResult<T>
where
    F: FnOnce() -> AnalysisResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AnalysisError::transient(stage, e.to_string()))?
}

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) repo: Arc<dyn RepositoryAccess>,
    pub(crate) gateway: InferenceGateway,
    pub(crate) store: Arc<ResultStore>,
    pub(crate) hooks: Arc<dyn StageHooks>,
    events: EventBus,
    state: Mutex<State>,
    queue: JobQueue,
    shutdown: CancellationToken,
}

impl Shared {
    pub(crate) fn report(&self, job_id: &str, milestone: Milestone, progress_fraction: f64) {
        if let Some(entry) = self.state.lock().jobs.get_mut(job_id) {
            entry.progress = progress_fraction;
        }
        self.events.send(JobEvent::Progress {
            job_id: job_id.to_string(),
            milestone,
            progress_fraction,
            at: Utc::now(),
        });
    }

    async fn persist(&self, job: &AnalysisJob) -> AnalysisResult<()> {
        let store = Arc::clone(&self.store);
        let job = job.clone();
        blocking("persist", move || store.save_job(&job)).await
    }

    /// Mirror `job` into the in-memory entry and wake waiters.
    fn update_entry(&self, job: &AnalysisJob, progress: f64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(entry) = state.jobs.get_mut(&job.job_id) {
            entry.job = job.clone();
            entry.progress = progress;
            entry.status_tx.send_replace(job.status);
        }
        if job.status.is_terminal() {
            state.release_repo(&job.repo_ref, &job.job_id);
        }
    }

    /// Mark the job as committing unless it was cancelled first. Checked
    /// under the state lock so `cancel` sees one or the other.
    fn begin_commit(&self, job_id: &str, token: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        if token.is_cancelled() {
            return false;
        }
        if let Some(entry) = state.jobs.get_mut(job_id) {
            entry.committing = true;
        }
        true
    }

    /// Re-queue jobs a previous process left unfinished. Attempts are not
    /// charged for the interruption.
    async fn recover(&self) -> AnalysisResult<usize> {
        let store = Arc::clone(&self.store);
        let unfinished = blocking("recovery", move || store.unfinished_jobs()).await?;
        let count = unfinished.len();
        for mut job in unfinished {
            let previous = job.status;
            job.status = JobStatus::Queued;
            self.persist(&job).await?;
            {
                let mut state = self.state.lock();
                state
                    .active_by_repo
                    .entry(job.repo_ref.clone())
                    .or_insert_with(|| job.job_id.clone());
                state.jobs.insert(job.job_id.clone(), JobEntry::new(job.clone()));
            }
            tracing::info!(job_id = %job.job_id, repo = %job.repo_ref, previous = %previous, "recovered unfinished job");
            self.queue.push_back(job.job_id);
        }
        Ok(count)
    }

    async fn run_job(&self, job_id: &str) {
        let claimed = {
            let mut state = self.state.lock();
            match state.jobs.get_mut(job_id) {
                Some(entry) if entry.job.status == JobStatus::Queued => {
                    entry.job.status = JobStatus::Running;
                    entry.progress = 0.0;
                    entry.committing = false;
                    entry.status_tx.send_replace(JobStatus::Running);
                    Some((entry.job.clone(), entry.cancel.clone()))
                }
                _ => None,
            }
        };
        let Some((job, token)) = claimed else {
            tracing::debug!(job_id, "skipping job that is no longer queued");
            return;
        };

        let attempt = job.attempt_count + 1;
        if let Err(err) = self.persist(&job).await {
            tracing::warn!(job_id, error = %err, "could not record running status");
        }
        self.events.send(JobEvent::Started {
            job_id: job.job_id.clone(),
            attempt,
            at: Utc::now(),
        });
        tracing::info!(job_id, repo = %job.repo_ref, attempt, "job started");

        let outcome = stages::Attempt::new(self, &job, attempt, &token).run().await;
        match outcome {
            Ok((completed, graph)) => self.complete(&completed, &graph),
            Err(err) if token.is_cancelled() || matches!(err, AnalysisError::Cancelled(_)) => {
                self.fail(job, "cancelled".to_string()).await;
            }
            Err(err) => self.fail_attempt(job, err).await,
        }
    }

    fn complete(&self, job: &AnalysisJob, graph: &AnalysisGraph) {
        self.update_entry(job, 1.0);
        self.events.send(JobEvent::Completed {
            job_id: job.job_id.clone(),
            graph_version: graph.version_id.clone(),
            coverage: graph.coverage.clone(),
            at: Utc::now(),
        });
        tracing::info!(
            job_id = %job.job_id,
            version = %graph.version_id,
            nodes = graph.nodes.len(),
            static_edges = graph.coverage.static_edges,
            inferred_edges = graph.coverage.inferred_edges,
            "job complete"
        );
    }

    async fn fail_attempt(&self, mut job: AnalysisJob, err: AnalysisError) {
        job.attempt_count += 1;
        let reason = err.to_string();
        if !err.is_retryable() || job.attempt_count >= MAX_ATTEMPTS {
            self.fail(job, reason).await;
            return;
        }

        tracing::warn!(
            job_id = %job.job_id,
            attempt_count = job.attempt_count,
            error = %reason,
            "attempt failed; job re-queued"
        );
        job.status = JobStatus::Queued;
        job.failure_reason = Some(reason.clone());
        self.update_entry(&job, 0.0);
        if let Err(err) = self.persist(&job).await {
            tracing::warn!(job_id = %job.job_id, error = %err, "could not record retry");
        }
        self.events.send(JobEvent::Retrying {
            job_id: job.job_id.clone(),
            attempt_count: job.attempt_count,
            reason,
            at: Utc::now(),
        });
        self.queue.push_back(job.job_id);
    }

    /// Terminal failure.
    async fn fail(&self, mut job: AnalysisJob, reason: String) {
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.failure_reason = Some(reason.clone());
        let progress = self
            .state
            .lock()
            .jobs
            .get(&job.job_id)
            .map_or(0.0, |entry| entry.progress);
        self.update_entry(&job, progress);
        if let Err(err) = self.persist(&job).await {
            tracing::warn!(job_id = %job.job_id, error = %err, "could not record failure");
        }
        tracing::warn!(
            job_id = %job.job_id,
            attempt_count = job.attempt_count,
            reason = %reason,
            "job failed"
        );
        self.events.send(JobEvent::Failed {
            job_id: job.job_id.clone(),
            attempt_count: job.attempt_count,
            reason,
            at: Utc::now(),
        });
    }
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    tracing::debug!(worker, "worker started");
    while let Some(job_id) = shared.queue.pop(&shared.shutdown).await {
        shared.run_job(&job_id).await;
    }
    tracing::debug!(worker, "worker stopped");
}

pub struct OrchestratorBuilder {
    config: EngineConfig,
    repo: Arc<dyn RepositoryAccess>,
    inference: Option<Arc<dyn InferenceService>>,
    store: Option<Arc<ResultStore>>,
    hooks: Option<Arc<dyn StageHooks>>,
    events: Option<EventBus>,
}

impl OrchestratorBuilder {
    pub fn inference(mut self, service: Arc<dyn InferenceService>) -> Self {
        self.inference = Some(service);
        self
    }

    /// Use an already opened store instead of opening `config.store.path`.
    pub fn store(mut self, store: Arc<ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn StageHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Open the store, recover unfinished jobs and spawn the workers.
    pub async fn start(self) -> AnalysisResult<Orchestrator> {
        self.config.validate()?;
        let store = match self.store {
            Some(store) => store,
            None => {
                let config = self.config.clone();
                Arc::new(blocking("open store", move || ResultStore::open(&config)).await?)
            }
        };
        let inference = self
            .inference
            .unwrap_or_else(|| Arc::new(DisabledInference));
        let workers = self.config.orchestrator.effective_workers();

        let shared = Arc::new(Shared {
            gateway: InferenceGateway::new(inference, self.config.inference.clone()),
            config: self.config,
            repo: self.repo,
            store,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
            events: self.events.unwrap_or_default(),
            state: Mutex::new(State::default()),
            queue: JobQueue::new(),
            shutdown: CancellationToken::new(),
        });

        let recovered = shared.recover().await?;
        let handles = (0..workers)
            .map(|idx| tokio::spawn(worker_loop(Arc::clone(&shared), idx)))
            .collect();
        tracing::info!(workers, recovered, "orchestrator started");

        Ok(Orchestrator {
            shared,
            workers: Mutex::new(handles),
        })
    }
}

enum CancelTarget {
    Unknown,
    Finished,
    Queued(AnalysisJob),
    Running,
    Committing,
}

/// Entry point for submitting and tracking analysis jobs.
pub struct Orchestrator {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn builder(config: EngineConfig, repo: Arc<dyn RepositoryAccess>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            repo,
            inference: None,
            store: None,
            hooks: None,
            events: None,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.shared.store
    }

    /// Queue an analysis of `repo_ref`. While a job for the same repository
    /// is queued or running, its id is returned instead of a new one.
    pub async fn submit(&self, repo_ref: &str) -> AnalysisResult<JobId> {
        let job = {
            let mut state = self.shared.state.lock();
            if let Some(existing) = state.active_by_repo.get(repo_ref) {
                tracing::debug!(repo = repo_ref, job_id = %existing, "analysis already in progress");
                return Ok(existing.clone());
            }
            let job = AnalysisJob::new(repo_ref);
            state
                .active_by_repo
                .insert(repo_ref.to_string(), job.job_id.clone());
            state.jobs.insert(job.job_id.clone(), JobEntry::new(job.clone()));
            job
        };

        if let Err(err) = self.shared.persist(&job).await {
            let mut state = self.shared.state.lock();
            state.jobs.remove(&job.job_id);
            state.release_repo(repo_ref, &job.job_id);
            return Err(err);
        }

        self.shared.events.send(JobEvent::Queued {
            job_id: job.job_id.clone(),
            repo_ref: repo_ref.to_string(),
            at: job.created_at,
        });
        tracing::info!(job_id = %job.job_id, repo = repo_ref, "job queued");
        self.shared.queue.push_back(job.job_id.clone());
        Ok(job.job_id)
    }

    pub async fn get_status(&self, job_id: &str) -> AnalysisResult<JobStatusView> {
        let view = self.shared.state.lock().jobs.get(job_id).map(JobEntry::view);
        if let Some(view) = view {
            return Ok(view);
        }
        let store = Arc::clone(&self.shared.store);
        let id = job_id.to_string();
        match blocking("status", move || store.load_job(&id)).await? {
            Some(job) => {
                let progress = if job.status == JobStatus::Complete { 1.0 } else { 0.0 };
                Ok(JobStatusView::new(&job, progress))
            }
            None => Err(AnalysisError::UnknownJob(job_id.to_string())),
        }
    }

    /// The graph of a complete job; `NotReady` for any other status.
    pub async fn get_result(&self, job_id: &str) -> AnalysisResult<Arc<AnalysisGraph>> {
        let view = self.get_status(job_id).await?;
        if view.status != JobStatus::Complete {
            return Err(AnalysisError::NotReady {
                job_id: job_id.to_string(),
                status: view.status.to_string(),
            });
        }
        let version = view.graph_version.ok_or_else(|| {
            AnalysisError::Store(format!("job {job_id} is complete without a graph version"))
        })?;
        let store = Arc::clone(&self.shared.store);
        let repo_ref = view.repo_ref;
        let lookup = version.clone();
        blocking("result", move || store.graph(&repo_ref, &lookup))
            .await?
            .ok_or_else(|| AnalysisError::Store(format!("graph version {version} is missing")))
    }

    /// Cancel a queued or running job. A running job stops at its next stage
    /// boundary. Returns `false` when the job had already finished or its
    /// attempt is already committing; such a job completes normally.
    pub async fn cancel(&self, job_id: &str) -> AnalysisResult<bool> {
        let target = {
            let mut state = self.shared.state.lock();
            match state.jobs.get_mut(job_id) {
                None => CancelTarget::Unknown,
                Some(entry) if entry.job.status.is_terminal() => CancelTarget::Finished,
                Some(entry) if entry.committing => CancelTarget::Committing,
                Some(entry) => {
                    entry.cancel.cancel();
                    if entry.job.status == JobStatus::Queued {
                        let job = entry.job.clone();
                        // Keeps workers from claiming it before `fail` lands.
                        entry.job.status = JobStatus::Failed;
                        CancelTarget::Queued(job)
                    } else {
                        CancelTarget::Running
                    }
                }
            }
        };

        match target {
            CancelTarget::Unknown => {
                // Finished jobs from earlier runs live only in the store.
                self.get_status(job_id).await.map(|_| false)
            }
            CancelTarget::Finished => Ok(false),
            CancelTarget::Committing => {
                tracing::info!(job_id, "job is committing; cancellation ignored");
                Ok(false)
            }
            CancelTarget::Queued(job) => {
                tracing::info!(job_id, "cancelling queued job");
                self.shared.fail(job, "cancelled".to_string()).await;
                Ok(true)
            }
            CancelTarget::Running => {
                tracing::info!(job_id, "cancellation requested for running job");
                Ok(true)
            }
        }
    }

    /// Wait until the job is complete or terminally failed.
    pub async fn wait(&self, job_id: &str) -> AnalysisResult<JobStatusView> {
        let rx = self
            .shared
            .state
            .lock()
            .jobs
            .get(job_id)
            .map(|entry| entry.status_tx.subscribe());
        if let Some(mut rx) = rx {
            rx.wait_for(|status| status.is_terminal())
                .await
                .map_err(|_| AnalysisError::transient("wait", "job tracking stopped"))?;
        }
        self.get_status(job_id).await
    }

    /// Stop the workers after their current job.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "worker ended abnormally");
            }
        }
        tracing::info!("orchestrator stopped");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::errors::RepoAccessError;
    use crate::inference::{InferenceCandidate, InferenceSubject, Suggestion};
    use crate::models::EdgeKind;
    use crate::test_support::{FakeRepository, InferenceScript, ListBehavior, ScriptedInference};

    fn config(dir: &tempfile::TempDir) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.orchestrator.workers = 2;
        config.store.path = dir.path().join("repograph.db");
        config.inference.timeout_ms = 50;
        config
    }

    async fn start(
        dir: &tempfile::TempDir,
        repo: Arc<FakeRepository>,
        hooks: Option<Arc<dyn StageHooks>>,
        inference: Option<Arc<dyn InferenceService>>,
    ) -> Orchestrator {
        let mut builder = Orchestrator::builder(config(dir), repo);
        if let Some(hooks) = hooks {
            builder = builder.hooks(hooks);
        }
        if let Some(inference) = inference {
            builder = builder.inference(inference);
        }
        builder.start().await.unwrap()
    }

    const ABC: &[(&str, &[u8])] = &[
        ("a.py", b"def foo():\n    return 1\n"),
        ("b.py", b"def broken(:\n    pass\n"),
        ("c.py", b"from a import foo\n\ndef main():\n    foo()\n"),
    ];

    #[tokio::test]
    async fn test_valid_partial_and_importing_files() {
        let dir = tempfile::tempdir().unwrap();
        let orch = start(&dir, FakeRepository::with_files("repo", ABC), None, None).await;

        let job_id = orch.submit("repo").await.unwrap();
        let view = orch.wait(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Complete);
        assert_eq!(view.progress_fraction, 1.0);

        let graph = orch.get_result(&job_id).await.unwrap();
        let c = &graph.coverage;
        assert_eq!((c.files_total, c.files_parsed, c.files_partial, c.files_failed), (3, 2, 1, 0));
        assert_eq!(c.static_edges, 2);
        assert_eq!(c.inferred_edges, 0);

        let name = |id: &str| graph.node(id).unwrap().qualified_name.clone();
        let imports: Vec<_> = graph.edges_of_kind(EdgeKind::Import).collect();
        let calls: Vec<_> = graph.edges_of_kind(EdgeKind::Call).collect();
        assert_eq!(imports.len(), 1);
        assert_eq!(calls.len(), 1);
        assert_eq!((name(&imports[0].source), name(&imports[0].target)), ("c.py".to_string(), "a.py".to_string()));
        assert_eq!((name(&calls[0].source), name(&calls[0].target)), ("c.main".to_string(), "a.foo".to_string()));
        for edge in [imports[0], calls[0]] {
            assert_eq!(edge.confidence(), 1.0);
            assert!(!edge.inferred_by_ai());
        }
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_nodes_come_only_from_parseable_files() {
        let dir = tempfile::tempdir().unwrap();
        let files: &[(&str, &[u8])] = &[
            ("ok1.py", b"def one():\n    pass\n"),
            ("ok2.go", b"package main\n\nfunc Two() {}\n"),
            ("bad1.py", &[0xff, 0xfe, 0xfa]),
            ("bad2.java", &[0xc3, 0x28, 0x00]),
            ("gone.ts", b"export const x = 1;\n"),
        ];
        let repo = FakeRepository::with_files("repo", files);
        repo.fail_read("gone.ts", RepoAccessError::NotFound("gone.ts".into()));
        let orch = start(&dir, repo, None, None).await;

        let job_id = orch.submit("repo").await.unwrap();
        assert_eq!(orch.wait(&job_id).await.unwrap().status, JobStatus::Complete);
        let graph = orch.get_result(&job_id).await.unwrap();

        let mut paths: Vec<&str> = graph.nodes.iter().map(|n| n.path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths, vec!["ok1.py", "ok2.go"]);
        assert_eq!(graph.coverage.files_failed, 3);
        assert_eq!(graph.coverage.files_parsed, 2);
    }

    struct FailMapping {
        calls: AtomicU32,
    }

    impl StageHooks for FailMapping {
        fn before_stage(&self, _job: &AnalysisJob, _attempt: u32, stage: Stage) -> AnalysisResult<()> {
            if stage == Stage::Map {
                self.calls.fetch_add(1, Ordering::SeqCst);
                return Err(AnalysisError::transient("map", "worker crashed"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mapping_failure_retries_then_fails_terminally() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = Arc::new(FailMapping {
            calls: AtomicU32::new(0),
        });
        let orch = start(&dir, FakeRepository::with_files("repo", ABC), Some(hooks.clone()), None).await;
        let mut events = orch.events().subscribe();

        let job_id = orch.submit("repo").await.unwrap();
        let view = orch.wait(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.attempt_count, MAX_ATTEMPTS);
        assert!(view.failure_reason.unwrap().contains("worker crashed"));
        assert_eq!(hooks.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);

        let mut retries = 0;
        while let Ok(event) = events.try_recv() {
            if let JobEvent::Retrying { attempt_count, .. } = event {
                retries += 1;
                assert!(attempt_count < MAX_ATTEMPTS);
            }
        }
        assert_eq!(retries, 2);

        // Terminal: nothing re-queues it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hooks.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert!(matches!(
            orch.get_result(&job_id).await,
            Err(AnalysisError::NotReady { .. })
        ));
        let stored = orch.store().load_job(&job_id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    struct FailFirstMapOf(&'static str);

    impl StageHooks for FailFirstMapOf {
        fn before_stage(&self, job: &AnalysisJob, attempt: u32, stage: Stage) -> AnalysisResult<()> {
            if stage == Stage::Map && job.repo_ref == self.0 && attempt == 1 {
                return Err(AnalysisError::transient("map", "worker crashed"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_queues_behind_newer_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeRepository::with_files("a", ABC);
        repo.set_files("b", ABC);
        repo.set_list_delay(Duration::from_millis(50));
        let mut config = config(&dir);
        config.orchestrator.workers = 1;
        let orch = Orchestrator::builder(config, repo)
            .hooks(Arc::new(FailFirstMapOf("a")))
            .start()
            .await
            .unwrap();
        let mut events = orch.events().subscribe();

        let a = orch.submit("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = orch.submit("b").await.unwrap();

        let view_a = orch.wait(&a).await.unwrap();
        let view_b = orch.wait(&b).await.unwrap();
        assert_eq!(view_a.status, JobStatus::Complete);
        assert_eq!(view_a.attempt_count, 1);
        assert_eq!(view_b.status, JobStatus::Complete);

        let mut started = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let JobEvent::Started { job_id, attempt, .. } = event {
                started.push((job_id, attempt));
            }
        }
        assert_eq!(started, vec![(a.clone(), 1), (b.clone(), 1), (a.clone(), 2)]);
    }

    #[tokio::test]
    async fn test_transient_crawl_failure_recovers_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeRepository::with_files("repo", ABC);
        repo.set_list_behavior(ListBehavior::FlakyTimes(1));
        let orch = start(&dir, repo, None, None).await;

        let job_id = orch.submit("repo").await.unwrap();
        let view = orch.wait(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Complete);
        assert_eq!(view.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_access_denied_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeRepository::with_files("repo", ABC);
        repo.set_list_behavior(ListBehavior::Fail(RepoAccessError::AccessDenied("private".into())));
        let orch = start(&dir, repo.clone(), None, None).await;

        let job_id = orch.submit("repo").await.unwrap();
        let view = orch.wait(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.attempt_count, 1);
        assert!(view.failure_reason.unwrap().contains("access denied"));
        assert_eq!(repo.list_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let missing = orch.submit("no-such-repo").await.unwrap();
        assert_eq!(orch.wait(&missing).await.unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn test_reanalysis_keeps_ids_and_static_edges() {
        let dir = tempfile::tempdir().unwrap();
        let orch = start(&dir, FakeRepository::with_files("repo", ABC), None, None).await;

        let first = orch.submit("repo").await.unwrap();
        orch.wait(&first).await.unwrap();
        let second = orch.submit("repo").await.unwrap();
        assert_ne!(first, second);
        orch.wait(&second).await.unwrap();

        let one = orch.get_result(&first).await.unwrap();
        let two = orch.get_result(&second).await.unwrap();
        assert_ne!(one.version_id, two.version_id);
        let ids = |g: &AnalysisGraph| g.nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&one), ids(&two));
        let statics = |g: &AnalysisGraph| {
            g.edges
                .iter()
                .filter(|e| !e.inferred_by_ai())
                .cloned()
                .collect::<Vec<_>>()
        };
        assert_eq!(statics(&one), statics(&two));
        assert_eq!(orch.store().database().version_count("repo").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_submit_is_idempotent_while_active() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeRepository::with_files("repo", ABC);
        repo.set_list_delay(Duration::from_millis(100));
        let orch = start(&dir, repo, None, None).await;

        let a = orch.submit("repo").await.unwrap();
        let b = orch.submit("repo").await.unwrap();
        assert_eq!(a, b);
        orch.wait(&a).await.unwrap();
        let c = orch.submit("repo").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_inference_timeout_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let files: &[(&str, &[u8])] = &[
            ("x.py", b"def process():\n    pass\n"),
            ("y.py", b"def process():\n    pass\n"),
            (
                "z.py",
                b"def run():\n    process()\n    process()\n    process()\n    process()\n    process()\n",
            ),
        ];
        let inference = ScriptedInference::new(InferenceScript::Hang);
        let orch = start(
            &dir,
            FakeRepository::with_files("repo", files),
            None,
            Some(inference.clone()),
        )
        .await;

        let job_id = orch.submit("repo").await.unwrap();
        let view = orch.wait(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Complete);
        let coverage = view.coverage.unwrap();
        assert_eq!(coverage.unresolved_references, 5);
        assert_eq!(coverage.inferred_edges, 0);
        assert!(coverage.partial_relationship_coverage);
        assert_eq!(inference.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_inferred_edges_reach_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let files: &[(&str, &[u8])] = &[
            ("x.py", b"def process():\n    pass\n"),
            ("y.py", b"def process():\n    pass\n"),
            ("z.py", b"def run():\n    process()\n"),
        ];
        let inference = ScriptedInference::answering(|batch| {
            batch
                .subjects
                .iter()
                .filter_map(|s| match s {
                    InferenceSubject::Cluster {
                        cluster_id,
                        candidates,
                        ..
                    } => Some(InferenceCandidate {
                        subject_id: cluster_id.clone(),
                        suggestion: Suggestion::Edge {
                            target: candidates[0].id.clone(),
                            kind: EdgeKind::Call,
                            description: None,
                        },
                        confidence: 0.6,
                    }),
                    InferenceSubject::Node { .. } => None,
                })
                .collect()
        });
        let orch = start(&dir, FakeRepository::with_files("repo", files), None, Some(inference)).await;

        let job_id = orch.submit("repo").await.unwrap();
        orch.wait(&job_id).await.unwrap();
        let graph = orch.get_result(&job_id).await.unwrap();
        let inferred: Vec<_> = graph.edges.iter().filter(|e| e.inferred_by_ai()).collect();
        assert_eq!(inferred.len(), 1);
        assert_eq!(inferred[0].confidence(), 0.6);
        assert_eq!(graph.coverage.ambiguous_references, 1);
        assert_eq!(graph.coverage.unresolved_references, 0);
    }

    #[tokio::test]
    async fn test_cancel_queued_and_running_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeRepository::with_files("slow", ABC);
        repo.set_files("other", ABC);
        repo.set_list_delay(Duration::from_millis(100));
        let mut config = config(&dir);
        config.orchestrator.workers = 1;
        let orch = Orchestrator::builder(config, repo).start().await.unwrap();

        let running = orch.submit("slow").await.unwrap();
        let queued = orch.submit("other").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(orch.cancel(&queued).await.unwrap());
        let view = orch.get_status(&queued).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.failure_reason.as_deref(), Some("cancelled"));

        assert!(orch.cancel(&running).await.unwrap());
        let view = orch.wait(&running).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.failure_reason.as_deref(), Some("cancelled"));
        assert_eq!(view.attempt_count, 0);

        assert!(!orch.cancel(&running).await.unwrap());
        assert!(matches!(
            orch.cancel("nope").await,
            Err(AnalysisError::UnknownJob(_))
        ));
    }

    struct SlowAfterCommit {
        committed: std::sync::atomic::AtomicBool,
    }

    impl StageHooks for SlowAfterCommit {
        fn after_stage(&self, _job: &AnalysisJob, _attempt: u32, stage: Stage) {
            if stage == Stage::Commit {
                self.committed.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_after_commit_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = Arc::new(SlowAfterCommit {
            committed: std::sync::atomic::AtomicBool::new(false),
        });
        let orch = start(&dir, FakeRepository::with_files("repo", ABC), Some(hooks.clone()), None).await;

        let job_id = orch.submit("repo").await.unwrap();
        while !hooks.committed.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(!orch.cancel(&job_id).await.unwrap());

        let view = orch.wait(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Complete);
        assert!(orch.get_result(&job_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_progress_events_and_unknown_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let orch = start(&dir, FakeRepository::with_files("repo", ABC), None, None).await;
        let mut events = orch.events().subscribe();

        let job_id = orch.submit("repo").await.unwrap();
        orch.wait(&job_id).await.unwrap();

        let mut milestones = Vec::new();
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                JobEvent::Progress { milestone, .. } => milestones.push(milestone),
                JobEvent::Completed { .. } => completed = true,
                _ => {}
            }
        }
        assert_eq!(
            milestones,
            vec![
                Milestone::CrawlingDone,
                Milestone::ParsingDone,
                Milestone::MappingDone,
                Milestone::GraphBuilt,
                Milestone::InferenceDone,
            ]
        );
        assert!(completed);
        assert!(matches!(
            orch.get_status("missing").await,
            Err(AnalysisError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_recovers_unfinished_and_serves_finished_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FakeRepository::with_files("repo", ABC);

        let finished = {
            let orch = start(&dir, repo.clone(), None, None).await;
            let job_id = orch.submit("repo").await.unwrap();
            orch.wait(&job_id).await.unwrap();
            orch.shutdown().await;
            job_id
        };

        // A job a crashed process left running.
        let stale = {
            let store = ResultStore::open(&config(&dir)).unwrap();
            let mut job = AnalysisJob::new("repo");
            job.status = JobStatus::Running;
            job.attempt_count = 1;
            store.save_job(&job).unwrap();
            job.job_id
        };

        let orch = start(&dir, repo, None, None).await;
        let view = orch.wait(&stale).await.unwrap();
        assert_eq!(view.status, JobStatus::Complete);
        assert_eq!(view.attempt_count, 1);

        let old = orch.get_status(&finished).await.unwrap();
        assert_eq!(old.status, JobStatus::Complete);
        let graph = orch.get_result(&finished).await.unwrap();
        assert_eq!(graph.job_id, finished);
    }
}
