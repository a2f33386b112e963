//! Repository access collaborator contract and a local directory implementation.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;

use crate::errors::RepoAccessError;
use crate::indexer::filesystem::{is_implicitly_ignored_dir, is_sensitive};

/// The two operations the engine needs from wherever source code lives.
#[async_trait]
pub trait RepositoryAccess: Send + Sync {
    /// Repository-relative, `/`-separated paths of every candidate file.
    async fn list_files(&self, repo_ref: &str) -> Result<Vec<String>, RepoAccessError>;

    async fn read_file(&self, repo_ref: &str, path: &str) -> Result<Vec<u8>, RepoAccessError>;
}

/// Treats `repo_ref` as a directory, optionally relative to a fixed root.
///
/// `.gitignore` and `.repographignore` rules are honoured, version-control
/// and dependency directories are skipped, and files that look like secrets
/// are never listed.
#[derive(Debug, Clone, Default)]
pub struct LocalRepository {
    root: Option<PathBuf>,
}

impl LocalRepository {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve_root(&self, repo_ref: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(repo_ref),
            None => PathBuf::from(repo_ref),
        }
    }
}

fn classify_io(err: &std::io::Error, what: &str) -> RepoAccessError {
    match err.kind() {
        ErrorKind::NotFound => RepoAccessError::NotFound(what.to_string()),
        ErrorKind::PermissionDenied => RepoAccessError::AccessDenied(what.to_string()),
        _ => RepoAccessError::Unavailable(format!("{what}: {err}")),
    }
}

fn is_contained(rel_path: &str) -> bool {
    Path::new(rel_path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn walk(root: &Path) -> Result<Vec<String>, RepoAccessError> {
    let meta = std::fs::metadata(root).map_err(|e| classify_io(&e, &root.display().to_string()))?;
    if !meta.is_dir() {
        return Err(RepoAccessError::NotFound(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .git_global(false)
        .require_git(false)
        .add_custom_ignore_filename(".repographignore")
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !(is_dir && is_implicitly_ignored_dir(&entry.file_name().to_string_lossy()))
        });

    let mut files = Vec::new();
    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read directory entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if is_sensitive(&rel) {
            tracing::debug!(path = %rel, "skipping sensitive file");
            continue;
        }
        files.push(rel);
    }
    files.sort();
    Ok(files)
}

#[async_trait]
impl RepositoryAccess for LocalRepository {
    async fn list_files(&self, repo_ref: &str) -> Result<Vec<String>, RepoAccessError> {
        let root = self.resolve_root(repo_ref);
        tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|e| RepoAccessError::Unavailable(format!("crawl task failed: {e}")))?
    }

    async fn read_file(&self, repo_ref: &str, path: &str) -> Result<Vec<u8>, RepoAccessError> {
        if !is_contained(path) {
            return Err(RepoAccessError::NotFound(format!(
                "{path} is outside the repository"
            )));
        }
        let absolute = self.resolve_root(repo_ref).join(path);
        tokio::fs::read(&absolute)
            .await
            .map_err(|e| classify_io(&e, path))
    }
}
