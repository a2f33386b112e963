//! SQLite storage for jobs, crawled files and graph versions.
//!
//! Each public method opens its own connection, so one `Database` can be
//! shared across blocking tasks without managing connection lifetime.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{AnalysisError, AnalysisResult};
use crate::models::{
    AnalysisGraph, AnalysisJob, Coverage, GraphEdge, GraphNode, GraphVersionId, JobStatus,
    NodeExplanation, NodeMetrics, ParseOutcome, Provenance, SourceFile,
};
use crate::store::schema;

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> AnalysisResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AnalysisError::Store(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_field<T>(raw: &str) -> AnalysisResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>().map_err(AnalysisError::Store)
}

const JOB_COLUMNS: &str = "job_id, repo_ref, status, attempt_count, created_at, completed_at, \
                           failure_reason, graph_version, coverage_json";

struct JobRow {
    job_id: String,
    repo_ref: String,
    status: String,
    attempt_count: i64,
    created_at: String,
    completed_at: Option<String>,
    failure_reason: Option<String>,
    graph_version: Option<String>,
    coverage_json: Option<String>,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            repo_ref: row.get(1)?,
            status: row.get(2)?,
            attempt_count: row.get(3)?,
            created_at: row.get(4)?,
            completed_at: row.get(5)?,
            failure_reason: row.get(6)?,
            graph_version: row.get(7)?,
            coverage_json: row.get(8)?,
        })
    }

    fn into_job(self) -> AnalysisResult<AnalysisJob> {
        Ok(AnalysisJob {
            status: parse_field::<JobStatus>(&self.status)?,
            attempt_count: u32::try_from(self.attempt_count)
                .map_err(|_| AnalysisError::Store(format!("bad attempt count for {}", self.job_id)))?,
            created_at: parse_time(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
            coverage: self
                .coverage_json
                .as_deref()
                .map(serde_json::from_str::<Coverage>)
                .transpose()?,
            job_id: self.job_id,
            repo_ref: self.repo_ref,
            failure_reason: self.failure_reason,
            graph_version: self.graph_version,
        })
    }
}

/// SQLite store of analysis jobs and their immutable graph versions.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// The path is expanded and parent directories are created.
    pub fn new(db_path: impl AsRef<Path>) -> AnalysisResult<Self> {
        let expanded = expand_tilde(&db_path.as_ref().to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> AnalysisResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// WAL mode, tables and indexes, then pending migrations.
    pub fn init_schema(&self) -> AnalysisResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    fn write_job(conn: &Connection, job: &AnalysisJob) -> AnalysisResult<()> {
        let coverage = job.coverage.as_ref().map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO jobs (job_id, repo_ref, status, attempt_count, created_at, completed_at, \
                               failure_reason, graph_version, coverage_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(job_id) DO UPDATE SET \
                 status = excluded.status, \
                 attempt_count = excluded.attempt_count, \
                 completed_at = excluded.completed_at, \
                 failure_reason = excluded.failure_reason, \
                 graph_version = excluded.graph_version, \
                 coverage_json = excluded.coverage_json;",
            params![
                job.job_id,
                job.repo_ref,
                job.status.as_str(),
                i64::from(job.attempt_count),
                timestamp(&job.created_at),
                job.completed_at.as_ref().map(timestamp),
                job.failure_reason,
                job.graph_version,
                coverage,
            ],
        )?;
        Ok(())
    }

    /// Insert or update the job row.
    pub fn save_job(&self, job: &AnalysisJob) -> AnalysisResult<()> {
        let conn = self.connect()?;
        Self::write_job(&conn, job)
    }

    pub fn load_job(&self, job_id: &str) -> AnalysisResult<Option<AnalysisJob>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1;"),
                params![job_id],
                JobRow::from_row,
            )
            .optional()?;
        row.map(JobRow::into_job).transpose()
    }

    /// Jobs left `queued` or `running`, oldest first.
    pub fn unfinished_jobs(&self) -> AnalysisResult<Vec<AnalysisJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status IN ('queued', 'running') \
             ORDER BY created_at, rowid;"
        ))?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Write the completed job, its files and its graph version, and move the
    /// repository head, all in one transaction.
    pub fn commit_result(
        &self,
        job: &AnalysisJob,
        files: &[SourceFile],
        graph: &AnalysisGraph,
    ) -> AnalysisResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        Self::write_job(&tx, job)?;

        tx.execute("DELETE FROM job_files WHERE job_id = ?1;", params![job.job_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO job_files (job_id, path, language, content_hash, size_bytes, \
                                        line_count, outcome, detail) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            )?;
            for file in files {
                stmt.execute(params![
                    job.job_id,
                    file.path,
                    file.language.map(|l| l.as_str()),
                    file.content_hash,
                    file.size_bytes as i64,
                    file.line_count as i64,
                    file.outcome.as_str(),
                    file.outcome.detail(),
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO graph_versions (version_id, repo_ref, job_id, generated_at, coverage_json) \
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                graph.version_id,
                graph.repo_ref,
                graph.job_id,
                timestamp(&graph.generated_at),
                serde_json::to_string(&graph.coverage)?,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_nodes (version_id, node_id, label, kind, path, language, \
                                          qualified_name, lines, bytes, explanation, \
                                          explanation_confidence) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            )?;
            for node in &graph.nodes {
                stmt.execute(params![
                    graph.version_id,
                    node.id,
                    node.label,
                    node.kind.as_str(),
                    node.path,
                    node.language.as_str(),
                    node.qualified_name,
                    node.metrics.lines as i64,
                    node.metrics.bytes as i64,
                    node.explanation.as_ref().map(|e| e.text.as_str()),
                    node.explanation.as_ref().map(|e| e.confidence),
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_edges (version_id, source_id, target_id, kind, weight, \
                                          confidence, inferred, description) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            )?;
            for edge in &graph.edges {
                stmt.execute(params![
                    graph.version_id,
                    edge.source,
                    edge.target,
                    edge.kind.as_str(),
                    i64::from(edge.weight),
                    edge.confidence(),
                    edge.inferred_by_ai(),
                    edge.description,
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO repo_heads (repo_ref, version_id, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(repo_ref) DO UPDATE SET \
                 version_id = excluded.version_id, \
                 updated_at = excluded.updated_at;",
            params![graph.repo_ref, graph.version_id, timestamp(&Utc::now())],
        )?;

        tx.commit()?;
        tracing::debug!(
            job_id = %job.job_id,
            version = %graph.version_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "graph version committed"
        );
        Ok(())
    }

    pub fn job_files(&self, job_id: &str) -> AnalysisResult<Vec<SourceFile>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT path, language, content_hash, size_bytes, line_count, outcome, detail \
             FROM job_files WHERE job_id = ?1 ORDER BY path;",
        )?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(path, language, content_hash, size, lines, outcome, detail)| {
                Ok(SourceFile {
                    path,
                    language: language.as_deref().map(parse_field).transpose()?,
                    content_hash,
                    size_bytes: size.max(0) as u64,
                    line_count: lines.max(0) as u64,
                    outcome: ParseOutcome::from_parts(&outcome, detail),
                })
            })
            .collect()
    }

    /// Current graph version of a repository.
    pub fn head_version(&self, repo_ref: &str) -> AnalysisResult<Option<GraphVersionId>> {
        let conn = self.connect()?;
        let version = conn
            .query_row(
                "SELECT version_id FROM repo_heads WHERE repo_ref = ?1;",
                params![repo_ref],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    pub fn version_count(&self, repo_ref: &str) -> AnalysisResult<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM graph_versions WHERE repo_ref = ?1;",
            params![repo_ref],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn load_graph(&self, version_id: &str) -> AnalysisResult<Option<AnalysisGraph>> {
        let conn = self.connect()?;
        let header = conn
            .query_row(
                "SELECT repo_ref, job_id, generated_at, coverage_json \
                 FROM graph_versions WHERE version_id = ?1;",
                params![version_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((repo_ref, job_id, generated_at, coverage_json)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT node_id, label, kind, path, language, qualified_name, lines, bytes, \
                    explanation, explanation_confidence \
             FROM graph_nodes WHERE version_id = ?1;",
        )?;
        let node_rows = stmt
            .query_map(params![version_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<f64>>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut nodes = node_rows
            .into_iter()
            .map(
                |(id, label, kind, path, language, qualified_name, lines, bytes, text, confidence)| {
                    Ok(GraphNode {
                        id,
                        label,
                        kind: parse_field(&kind)?,
                        path,
                        language: parse_field(&language)?,
                        qualified_name,
                        metrics: NodeMetrics {
                            lines: lines.max(0) as u64,
                            bytes: bytes.max(0) as u64,
                        },
                        explanation: text.map(|text| NodeExplanation {
                            text,
                            confidence: confidence.unwrap_or_default(),
                        }),
                    })
                },
            )
            .collect::<AnalysisResult<Vec<_>>>()?;
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, kind, weight, confidence, inferred, description \
             FROM graph_edges WHERE version_id = ?1;",
        )?;
        let edge_rows = stmt
            .query_map(params![version_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut edges = edge_rows
            .into_iter()
            .map(|(source, target, kind, weight, confidence, inferred, description)| {
                let provenance = if inferred {
                    Provenance::inferred(confidence).ok_or_else(|| {
                        AnalysisError::Store(format!(
                            "edge {source} -> {target} has invalid confidence {confidence}"
                        ))
                    })?
                } else {
                    Provenance::Static
                };
                Ok(GraphEdge {
                    kind: parse_field(&kind)?,
                    weight: u32::try_from(weight).unwrap_or(u32::MAX),
                    provenance,
                    description,
                    source,
                    target,
                })
            })
            .collect::<AnalysisResult<Vec<_>>>()?;
        edges.sort_by_key(GraphEdge::key);

        Ok(Some(AnalysisGraph {
            version_id: version_id.to_string(),
            repo_ref,
            job_id,
            generated_at: parse_time(&generated_at)?,
            nodes,
            edges,
            coverage: serde_json::from_str(&coverage_json)?,
        }))
    }
}
