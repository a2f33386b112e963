//! In-crate fakes for the two collaborators, shared by unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::TieBreak;
use crate::errors::{InferenceError, RepoAccessError};
use crate::graph::builder::{build_draft, GraphDraft};
use crate::indexer::imports::RepoLayout;
use crate::indexer::pipeline::{parallel_extract, FileInput, PipelineOptions};
use crate::indexer::relations::{map_relations, RelationMap};
use crate::indexer::symbols::FileSymbols;
use crate::inference::{InferenceBatch, InferenceCandidate, InferenceService};
use crate::models::SourceFile;
use crate::repository::RepositoryAccess;

/// Extract, map and build a draft for in-memory sources.
pub fn draft_from_sources(files: &[(&str, &str)], tie_break: TieBreak) -> (RelationMap, GraphDraft) {
    let inputs: Vec<FileInput> = files
        .iter()
        .map(|(path, text)| FileInput {
            path: path.to_string(),
            content: Ok(text.as_bytes().to_vec()),
        })
        .collect();
    let results = parallel_extract(&inputs, &PipelineOptions::default());
    let sources: Vec<SourceFile> = results.iter().map(|r| r.file.clone()).collect();
    let symbols: Vec<FileSymbols> = results.into_iter().filter_map(|r| r.symbols).collect();
    let layout = RepoLayout::new(sources.iter().map(|f| f.path.clone()), None);
    let relations = map_relations(&symbols, &layout, tie_break);
    let draft = build_draft(&sources, &relations).unwrap();
    (relations, draft)
}

/// What a [`FakeRepository`] does when asked to crawl.
#[derive(Debug, Clone)]
pub enum ListBehavior {
    Ok,
    Fail(RepoAccessError),
    /// Fail with `Unavailable` on the first `n` crawls, then succeed.
    FlakyTimes(usize),
}

/// Repository held in memory, keyed by repo ref, with error injection.
pub struct FakeRepository {
    repos: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    read_errors: Mutex<BTreeMap<String, RepoAccessError>>,
    list_behavior: Mutex<ListBehavior>,
    list_delay: Mutex<Option<Duration>>,
    pub list_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self {
            repos: Mutex::new(BTreeMap::new()),
            read_errors: Mutex::new(BTreeMap::new()),
            list_behavior: Mutex::new(ListBehavior::Ok),
            list_delay: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_files(repo_ref: &str, files: &[(&str, &[u8])]) -> Arc<Self> {
        let repo = Self::new();
        repo.set_files(repo_ref, files);
        Arc::new(repo)
    }

    pub fn set_files(&self, repo_ref: &str, files: &[(&str, &[u8])]) {
        let map = files
            .iter()
            .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
            .collect();
        self.repos.lock().insert(repo_ref.to_string(), map);
    }

    pub fn fail_read(&self, path: &str, err: RepoAccessError) {
        self.read_errors.lock().insert(path.to_string(), err);
    }

    pub fn set_list_behavior(&self, behavior: ListBehavior) {
        *self.list_behavior.lock() = behavior;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl RepositoryAccess for FakeRepository {
    async fn list_files(&self, repo_ref: &str) -> Result<Vec<String>, RepoAccessError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut behavior = self.list_behavior.lock();
            match &mut *behavior {
                ListBehavior::Ok => {}
                ListBehavior::Fail(err) => return Err(err.clone()),
                ListBehavior::FlakyTimes(remaining) => {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(RepoAccessError::Unavailable("flaky remote".into()));
                    }
                }
            }
        }
        self.repos
            .lock()
            .get(repo_ref)
            .map(|files| files.keys().cloned().collect())
            .ok_or_else(|| RepoAccessError::NotFound(repo_ref.to_string()))
    }

    async fn read_file(&self, repo_ref: &str, path: &str) -> Result<Vec<u8>, RepoAccessError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.read_errors.lock().get(path) {
            return Err(err.clone());
        }
        self.repos
            .lock()
            .get(repo_ref)
            .and_then(|files| files.get(path).cloned())
            .ok_or_else(|| RepoAccessError::NotFound(path.to_string()))
    }
}

type Responder = Box<dyn Fn(&InferenceBatch) -> Vec<InferenceCandidate> + Send + Sync>;

pub enum InferenceScript {
    Answer(Responder),
    Unavailable,
    /// Sleep well past any configured timeout.
    Hang,
}

/// Inference collaborator that follows a script and records every batch.
pub struct ScriptedInference {
    script: InferenceScript,
    pub batches: Mutex<Vec<InferenceBatch>>,
}

impl ScriptedInference {
    pub fn new(script: InferenceScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            batches: Mutex::new(Vec::new()),
        })
    }

    pub fn answering<F>(f: F) -> Arc<Self>
    where
        F: Fn(&InferenceBatch) -> Vec<InferenceCandidate> + Send + Sync + 'static,
    {
        Self::new(InferenceScript::Answer(Box::new(f)))
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn infer(&self, batch: InferenceBatch) -> Result<Vec<InferenceCandidate>, InferenceError> {
        self.batches.lock().push(batch.clone());
        match &self.script {
            InferenceScript::Answer(f) => Ok(f(&batch)),
            InferenceScript::Unavailable => Err(InferenceError::Unavailable("scripted outage".into())),
            InferenceScript::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(vec![])
            }
        }
    }
}
