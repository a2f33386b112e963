//! SQLite schema DDL and migration steps.

use rusqlite::Connection;

use crate::errors::AnalysisResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Executed with `IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS jobs (
        job_id TEXT PRIMARY KEY,
        repo_ref TEXT NOT NULL,
        status TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        completed_at TEXT,
        failure_reason TEXT,
        graph_version TEXT,
        coverage_json TEXT
    );",
    "CREATE TABLE IF NOT EXISTS job_files (
        job_id TEXT NOT NULL REFERENCES jobs(job_id),
        path TEXT NOT NULL,
        language TEXT,
        content_hash TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        line_count INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        detail TEXT,
        PRIMARY KEY(job_id, path)
    );",
    "CREATE TABLE IF NOT EXISTS graph_versions (
        version_id TEXT PRIMARY KEY,
        repo_ref TEXT NOT NULL,
        job_id TEXT NOT NULL REFERENCES jobs(job_id),
        generated_at TEXT NOT NULL,
        coverage_json TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS graph_nodes (
        version_id TEXT NOT NULL REFERENCES graph_versions(version_id),
        node_id TEXT NOT NULL,
        label TEXT NOT NULL,
        kind TEXT NOT NULL,
        path TEXT NOT NULL,
        language TEXT NOT NULL,
        qualified_name TEXT NOT NULL,
        lines INTEGER NOT NULL,
        bytes INTEGER NOT NULL,
        explanation TEXT,
        explanation_confidence REAL,
        PRIMARY KEY(version_id, node_id)
    );",
    "CREATE TABLE IF NOT EXISTS graph_edges (
        version_id TEXT NOT NULL REFERENCES graph_versions(version_id),
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        weight INTEGER NOT NULL,
        confidence REAL NOT NULL,
        inferred INTEGER NOT NULL,
        description TEXT,
        PRIMARY KEY(version_id, source_id, target_id, kind)
    );",
    "CREATE TABLE IF NOT EXISTS repo_heads (
        repo_ref TEXT PRIMARY KEY,
        version_id TEXT NOT NULL REFERENCES graph_versions(version_id),
        updated_at TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_jobs_repo_status ON jobs(repo_ref, status);",
    "CREATE INDEX IF NOT EXISTS idx_graph_versions_repo ON graph_versions(repo_ref, generated_at);",
    "CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(version_id, target_id);",
];

/// Run all pending migrations up to [`SCHEMA_VERSION`]. Each step runs in
/// its own SAVEPOINT so a failure rolls back only that step.
pub fn migrate_schema(conn: &Connection) -> AnalysisResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT repograph_migrate_step;")?;

        let step_result = (|| -> AnalysisResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            conn.execute_batch("RELEASE SAVEPOINT repograph_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                tracing::debug!(version = next_version, "schema migrated");
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT repograph_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT repograph_migrate_step;");
                return Err(e);
            }
        }
    }

    Ok(())
}

/// 0 when the key is absent or unparseable.
pub fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> AnalysisResult<()> {
    conn.execute(
        "INSERT INTO schema_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

/// v0 -> v1: baseline, created by `SCHEMA_STATEMENTS`.
fn migrate_to_v1(_conn: &Connection) -> AnalysisResult<()> {
    Ok(())
}

/// v1 -> v2: index used by startup recovery to find unfinished jobs.
fn migrate_to_v2(conn: &Connection) -> AnalysisResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at);",
    )?;
    Ok(())
}
