//! Engine configuration: TOML file, then `REPOGRAPH_*` environment overrides,
//! then validation.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub orchestrator: OrchestratorConfig,
    pub pipeline: PipelineConfig,
    pub resolution: ResolutionConfig,
    pub inference: InferenceConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrent jobs; 0 means one per CPU.
    pub workers: usize,
}

impl OrchestratorConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Files read and parsed concurrently within one job.
    pub file_concurrency: usize,
    /// Files above this size are recorded as skipped.
    pub max_file_bytes: u64,
    /// Per-file parse budget; 0 disables the timeout.
    pub parse_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            file_concurrency: 8,
            max_file_bytes: 1024 * 1024,
            parse_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the latest same-file declaration at or before the reference.
    #[default]
    MostRecent,
    /// Never pick among several candidates.
    Strict,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "most_recent" => Ok(Self::MostRecent),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown tie-break policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub tie_break: TieBreak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub enabled: bool,
    /// Subjects (clusters or nodes) per request.
    pub batch_size: usize,
    pub timeout_ms: u64,
    pub explain_nodes: bool,
    pub max_explained_nodes: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 32,
            timeout_ms: 30_000,
            explain_nodes: false,
            max_explained_nodes: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Approximate byte budget across all cached graphs.
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 64,
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".repograph/repograph.db"),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> AnalysisResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| AnalysisError::Config(format!("{key}: cannot parse {raw:?}")))
}

fn parse_bool(key: &str, raw: &str) -> AnalysisResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AnalysisError::Config(format!(
            "{key}: expected a boolean, got {raw:?}"
        ))),
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> AnalysisResult<Self> {
        toml::from_str(content).map_err(|e| AnalysisError::Config(e.to_string()))
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> AnalysisResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// File (when given, else defaults), then process environment, then
    /// validation.
    pub fn resolve(path: Option<&Path>) -> AnalysisResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `REPOGRAPH_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> AnalysisResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        macro_rules! override_with {
            ($key:literal, $field:expr, $parse:expr) => {
                if let Some(raw) = lookup($key) {
                    $field = $parse($key, &raw)?;
                }
            };
        }

        override_with!("REPOGRAPH_WORKERS", self.orchestrator.workers, parse_env);
        override_with!(
            "REPOGRAPH_FILE_CONCURRENCY",
            self.pipeline.file_concurrency,
            parse_env
        );
        override_with!(
            "REPOGRAPH_MAX_FILE_BYTES",
            self.pipeline.max_file_bytes,
            parse_env
        );
        override_with!(
            "REPOGRAPH_PARSE_TIMEOUT_MS",
            self.pipeline.parse_timeout_ms,
            parse_env
        );
        override_with!("REPOGRAPH_TIE_BREAK", self.resolution.tie_break, parse_env);
        override_with!("REPOGRAPH_INFERENCE", self.inference.enabled, parse_bool);
        override_with!(
            "REPOGRAPH_INFERENCE_BATCH_SIZE",
            self.inference.batch_size,
            parse_env
        );
        override_with!(
            "REPOGRAPH_INFERENCE_TIMEOUT_MS",
            self.inference.timeout_ms,
            parse_env
        );
        override_with!(
            "REPOGRAPH_EXPLAIN_NODES",
            self.inference.explain_nodes,
            parse_bool
        );
        override_with!(
            "REPOGRAPH_CACHE_MAX_ENTRIES",
            self.cache.max_entries,
            parse_env
        );
        override_with!("REPOGRAPH_CACHE_MAX_BYTES", self.cache.max_bytes, parse_env);
        if let Some(raw) = lookup("REPOGRAPH_STORE_PATH") {
            self.store.path = PathBuf::from(raw);
        }
        Ok(())
    }

    pub fn validate(&self) -> AnalysisResult<()> {
        if self.pipeline.file_concurrency == 0 {
            return Err(AnalysisError::Config(
                "pipeline.file_concurrency must be at least 1".into(),
            ));
        }
        if self.inference.batch_size == 0 {
            return Err(AnalysisError::Config(
                "inference.batch_size must be at least 1".into(),
            ));
        }
        if self.inference.enabled && self.inference.timeout_ms == 0 {
            return Err(AnalysisError::Config(
                "inference.timeout_ms must be positive when inference is enabled".into(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(AnalysisError::Config(
                "cache.max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
