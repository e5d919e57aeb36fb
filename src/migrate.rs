//! Idempotent schema creation.
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so initialization is safe
//! to run repeatedly and from concurrent callers. Chunk rows use an
//! AUTOINCREMENT surrogate id; retrieval relies on it for stable,
//! insertion-ordered tie-breaking.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    // Student submission fragments, partitioned by course + assignment + student
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submission_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rubric and exemplar fragments, partitioned by course + assignment + class
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reference_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            course_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            doc_class TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Generated feedback records, append-only
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submission_scope \
         ON submission_chunks(course_id, assignment_id, student_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reference_scope \
         ON reference_chunks(course_id, assignment_id, doc_class)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_feedback_scope \
         ON feedback(course_id, assignment_id, student_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
