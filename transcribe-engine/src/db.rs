//! SQLite mirror of job records.
//!
//! The job store ([`crate::jobs::JobStore`]) remains the sole
//! authority for in-flight state and the sole thing the orchestrator
//! reads back from; this module exists purely so an operator can
//! inspect a job after the process restarts, or run `SELECT` queries
//! for observability. Losing the mirror (e.g. disk full) is never
//! allowed to fail a job — callers treat write errors as log-and-continue.
//!
//! One row per job: complex fields JSON-encoded alongside a few scalar
//! columns used for quick filtering, upserted on every update.

use crate::jobs::JobRecord;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use transcribe_common::model::JobId;

/// Opens (creating if needed) the sqlite mirror database and ensures
/// the `jobs` table exists.
pub async fn init_database_pool(db_path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    initialize_schema(&pool).await?;
    Ok(pool)
}

async fn initialize_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL,
            current_stage TEXT NOT NULL,
            source TEXT NOT NULL,
            options TEXT NOT NULL,
            error TEXT,
            artifacts TEXT NOT NULL,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Upserts the full record for one job.
pub async fn save_job(pool: &SqlitePool, record: &JobRecord) -> anyhow::Result<()> {
    let job_id = record.job_id.to_string();
    let status = serde_json::to_string(&record.status)?;
    let source = serde_json::to_string(&record.source)?;
    let options = serde_json::to_string(&record.options)?;
    let error = record.error.as_ref().map(serde_json::to_string).transpose()?;
    let artifacts = serde_json::to_string(&record.artifacts)?;
    let metadata = serde_json::to_string(&record.metadata)?;
    let created_at = record.created_at.to_rfc3339();
    let started_at = record.started_at.map(|t| t.to_rfc3339());
    let finished_at = record.finished_at.map(|t| t.to_rfc3339());

    sqlx::query(
        r#"
        INSERT INTO jobs (
            job_id, status, progress, current_stage, source, options,
            error, artifacts, metadata, created_at, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id) DO UPDATE SET
            status = excluded.status,
            progress = excluded.progress,
            current_stage = excluded.current_stage,
            error = excluded.error,
            artifacts = excluded.artifacts,
            metadata = excluded.metadata,
            started_at = excluded.started_at,
            finished_at = excluded.finished_at
        "#,
    )
    .bind(job_id)
    .bind(status)
    .bind(record.progress as i64)
    .bind(&record.current_stage)
    .bind(source)
    .bind(options)
    .bind(error)
    .bind(artifacts)
    .bind(metadata)
    .bind(created_at)
    .bind(started_at)
    .bind(finished_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Loads a mirrored job record, if one has been saved.
pub async fn load_job(pool: &SqlitePool, job_id: JobId) -> anyhow::Result<Option<JobRecord>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, status, progress, current_stage, source, options,
               error, artifacts, metadata, created_at, started_at, finished_at
        FROM jobs WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let status = serde_json::from_str(&row.get::<String, _>("status"))?;
    let source = serde_json::from_str(&row.get::<String, _>("source"))?;
    let options = serde_json::from_str(&row.get::<String, _>("options"))?;
    let error = row
        .get::<Option<String>, _>("error")
        .map(|s| serde_json::from_str(&s))
        .transpose()?;
    let artifacts = serde_json::from_str(&row.get::<String, _>("artifacts"))?;
    let metadata = serde_json::from_str(&row.get::<String, _>("metadata"))?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))?
        .with_timezone(&chrono::Utc);
    let started_at = row
        .get::<Option<String>, _>("started_at")
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()?
        .map(|t| t.with_timezone(&chrono::Utc));
    let finished_at = row
        .get::<Option<String>, _>("finished_at")
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()?
        .map(|t| t.with_timezone(&chrono::Utc));

    Ok(Some(JobRecord {
        job_id,
        source,
        options,
        status,
        progress: row.get::<i64, _>("progress") as u8,
        current_stage: row.get("current_stage"),
        created_at,
        started_at,
        finished_at,
        error,
        artifacts,
        metadata,
    }))
}
