//! In-memory LRU of each repository's current graph.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::models::AnalysisGraph;

struct CacheEntry {
    graph: Arc<AnalysisGraph>,
    bytes: usize,
}

#[derive(Default)]
struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Bounded by entry count and an approximate byte budget. Least recently
/// used entries go first; the newest entry is kept even when it alone
/// exceeds the byte budget.
pub struct GraphCache {
    max_entries: usize,
    max_bytes: usize,
    state: Mutex<CacheState>,
}

impl GraphCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries.max(1),
            max_bytes: config.max_bytes.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn get(&self, repo_ref: &str) -> Option<Arc<AnalysisGraph>> {
        let mut state = self.state.lock();
        // Re-insert to move the entry to the most recently used end.
        match state.entries.shift_remove_entry(repo_ref) {
            Some((key, entry)) => {
                let graph = Arc::clone(&entry.graph);
                state.entries.insert(key, entry);
                state.hits += 1;
                Some(graph)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Replace the entry for `repo_ref` and evict down to the budget.
    /// Returns the number of evicted entries.
    pub fn insert(&self, repo_ref: &str, graph: Arc<AnalysisGraph>) -> usize {
        let bytes = graph.approx_bytes();
        let mut state = self.state.lock();
        if let Some(old) = state.entries.shift_remove(repo_ref) {
            state.total_bytes -= old.bytes;
        }
        state.entries.insert(repo_ref.to_string(), CacheEntry { graph, bytes });
        state.total_bytes += bytes;

        let mut evicted = 0;
        while state.entries.len() > self.max_entries
            || (state.total_bytes > self.max_bytes && state.entries.len() > 1)
        {
            let Some((key, entry)) = state.entries.shift_remove_index(0) else {
                break;
            };
            state.total_bytes -= entry.bytes;
            evicted += 1;
            tracing::debug!(repo = %key, bytes = entry.bytes, "evicted cached graph");
        }
        state.evictions += evicted as u64;
        evicted
    }

    pub fn remove(&self, repo_ref: &str) -> bool {
        let mut state = self.state.lock();
        match state.entries.shift_remove(repo_ref) {
            Some(entry) => {
                state.total_bytes -= entry.bytes;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, repo_ref: &str) -> bool {
        self.state.lock().entries.contains_key(repo_ref)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}
