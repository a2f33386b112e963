//! Durable store plus write-through cache for completed results.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::errors::AnalysisResult;
use crate::models::{AnalysisGraph, AnalysisJob, SourceFile};
use crate::store::cache::{CacheStats, GraphCache};
use crate::store::database::Database;

/// Everything here is blocking; async callers go through `spawn_blocking`.
pub struct ResultStore {
    db: Database,
    cache: GraphCache,
    commit_lock: Mutex<()>,
}

impl ResultStore {
    pub fn open(config: &EngineConfig) -> AnalysisResult<Self> {
        let db = Database::new(&config.store.path)?;
        db.init_schema()?;
        tracing::info!(path = %db.db_path().display(), "result store opened");
        Ok(Self::with_database(db, config))
    }

    pub fn with_database(db: Database, config: &EngineConfig) -> Self {
        Self {
            db,
            cache: GraphCache::new(&config.cache),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn save_job(&self, job: &AnalysisJob) -> AnalysisResult<()> {
        self.db.save_job(job)
    }

    pub fn load_job(&self, job_id: &str) -> AnalysisResult<Option<AnalysisJob>> {
        self.db.load_job(job_id)
    }

    pub fn unfinished_jobs(&self) -> AnalysisResult<Vec<AnalysisJob>> {
        self.db.unfinished_jobs()
    }

    /// Persist one completed attempt, then swap the cached graph.
    ///
    /// Commits are serialised so the durable head and the cached entry of a
    /// repository always name the same version.
    pub fn commit(
        &self,
        job: &AnalysisJob,
        files: &[SourceFile],
        graph: AnalysisGraph,
    ) -> AnalysisResult<Arc<AnalysisGraph>> {
        let _guard = self.commit_lock.lock();
        self.db.commit_result(job, files, &graph)?;
        let graph = Arc::new(graph);
        let evicted = self.cache.insert(&graph.repo_ref, Arc::clone(&graph));
        if evicted > 0 {
            tracing::debug!(evicted, "cache over budget after commit");
        }
        Ok(graph)
    }

    /// A specific graph version; served from the cache when it holds that
    /// version, otherwise read back and cached again if it is the head.
    pub fn graph(&self, repo_ref: &str, version_id: &str) -> AnalysisResult<Option<Arc<AnalysisGraph>>> {
        if let Some(cached) = self.cache.get(repo_ref) {
            if cached.version_id == version_id {
                return Ok(Some(cached));
            }
        }
        let Some(graph) = self.db.load_graph(version_id)? else {
            return Ok(None);
        };
        let graph = Arc::new(graph);

        let _guard = self.commit_lock.lock();
        if self.db.head_version(repo_ref)?.as_deref() == Some(version_id) {
            tracing::debug!(repo = repo_ref, version = version_id, "repopulating cache from store");
            self.cache.insert(repo_ref, Arc::clone(&graph));
        }
        Ok(Some(graph))
    }

    /// The repository's current graph, if it was ever analysed.
    pub fn current_graph(&self, repo_ref: &str) -> AnalysisResult<Option<Arc<AnalysisGraph>>> {
        if let Some(cached) = self.cache.get(repo_ref) {
            return Ok(Some(cached));
        }
        match self.db.head_version(repo_ref)? {
            Some(version) => self.graph(repo_ref, &version),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn evict(&self, repo_ref: &str) -> bool {
        self.cache.remove(repo_ref)
    }
}
