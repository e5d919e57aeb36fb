//! Vector persistence and partition-scoped nearest-neighbor retrieval.
//!
//! [`VectorStore`] owns the chunk tables and the feedback table. Ingestion
//! writes a fragment batch and its vectors in one transaction, so a
//! concurrent reader observes either none or all of the batch. Retrieval
//! loads the partition's vectors and ranks them by cosine distance in Rust
//! (ascending, ties broken by insertion order), which keeps the distance
//! metric identical between ingestion and every query.
//!
//! Dimension discipline: all vectors stored in one partition share one
//! dimension. A batch that disagrees internally, with its partition, or
//! with a query vector is rejected with [`StoreError::DimensionMismatch`] —
//! a configuration error, distinct from an empty result.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{DocClass, FeedbackPayload, FeedbackRecord, Fragment, RetrievedFragment, Scope};

/// Store-level error classes callers may need to discriminate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("fragment/vector batch misaligned: {fragments} fragments, {vectors} vectors")]
    BatchMismatch { fragments: usize, vectors: usize },
    #[error("refusing to ingest an empty batch")]
    EmptyBatch,
    #[error("submission scope requires a student id")]
    MissingStudent,
}

pub struct VectorStore {
    pool: SqlitePool,
}

impl VectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a fragment batch with its vectors, atomically.
    ///
    /// Ensures the schema exists first (idempotent), so ingestion works
    /// against a fresh database without a prior `init`.
    ///
    /// Fragments and vectors must be equal-length and order-aligned. The
    /// batch is validated (alignment, internal dimension consistency,
    /// partition dimension consistency) before anything is written; the
    /// inserts then run in one transaction, so a failed or cancelled call
    /// leaves the partition exactly as it was.
    pub async fn ingest(
        &self,
        scope: &Scope,
        class: DocClass,
        fragments: &[Fragment],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        if fragments.is_empty() || vectors.is_empty() {
            return Err(StoreError::EmptyBatch.into());
        }
        if fragments.len() != vectors.len() {
            return Err(StoreError::BatchMismatch {
                fragments: fragments.len(),
                vectors: vectors.len(),
            }
            .into());
        }

        crate::migrate::run_migrations_on(&self.pool).await?;

        let dims = vectors[0].len();
        for vec in vectors {
            if vec.len() != dims {
                return Err(StoreError::DimensionMismatch {
                    expected: dims,
                    got: vec.len(),
                }
                .into());
            }
        }

        if let Some(stored_dims) = self.partition_dims(scope, class).await? {
            if stored_dims != dims {
                return Err(StoreError::DimensionMismatch {
                    expected: stored_dims,
                    got: dims,
                }
                .into());
            }
        }

        let mut tx = self.pool.begin().await?;

        match class {
            DocClass::Submission => {
                let student_id = scope
                    .student_id
                    .as_deref()
                    .ok_or(StoreError::MissingStudent)?;
                for (fragment, vec) in fragments.iter().zip(vectors.iter()) {
                    sqlx::query(
                        "INSERT INTO submission_chunks \
                         (student_id, assignment_id, course_id, chunk_index, content, hash, model, dims, embedding) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(student_id)
                    .bind(&scope.assignment_id)
                    .bind(&scope.course_id)
                    .bind(fragment.index)
                    .bind(&fragment.content)
                    .bind(&fragment.hash)
                    .bind(model)
                    .bind(dims as i64)
                    .bind(vec_to_blob(vec))
                    .execute(&mut *tx)
                    .await?;
                }
            }
            DocClass::Rubric | DocClass::Exemplar => {
                for (fragment, vec) in fragments.iter().zip(vectors.iter()) {
                    sqlx::query(
                        "INSERT INTO reference_chunks \
                         (course_id, assignment_id, doc_class, chunk_index, content, hash, model, dims, embedding) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&scope.course_id)
                    .bind(&scope.assignment_id)
                    .bind(class.as_str())
                    .bind(fragment.index)
                    .bind(&fragment.content)
                    .bind(&fragment.hash)
                    .bind(model)
                    .bind(dims as i64)
                    .bind(vec_to_blob(vec))
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Nearest-neighbor query within one partition.
    ///
    /// Returns at most `k` fragments ordered by ascending cosine distance,
    /// ties broken by insertion order. A missing partition yields an empty
    /// result; a stored-vs-query dimension disagreement is an error.
    pub async fn top_k(
        &self,
        scope: &Scope,
        class: DocClass,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedFragment>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = self.partition_rows(scope, class).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(i64, RetrievedFragment)> = Vec::with_capacity(rows.len());
        for (id, content, blob) in rows {
            let vec = blob_to_vec(&blob);
            if vec.len() != query_vec.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: vec.len(),
                    got: query_vec.len(),
                }
                .into());
            }
            let distance = 1.0 - cosine_similarity(query_vec, &vec);
            scored.push((id, RetrievedFragment { content, distance }));
        }

        scored.sort_by(|a, b| {
            a.1.distance
                .partial_cmp(&b.1.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, f)| f).collect())
    }

    /// Append one feedback record. Never updates an existing row.
    pub async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO feedback (id, student_id, assignment_id, course_id, payload_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.student_id)
        .bind(&record.assignment_id)
        .bind(&record.course_id)
        .bind(record.payload.to_json().to_string())
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Feedback payloads recorded for a student's assignment, oldest first.
    pub async fn feedback_for(&self, scope: &Scope) -> Result<Vec<serde_json::Value>> {
        let student_id = scope
            .student_id
            .as_deref()
            .ok_or(StoreError::MissingStudent)?;
        let rows = sqlx::query(
            "SELECT payload_json FROM feedback \
             WHERE course_id = ? AND assignment_id = ? AND student_id = ? \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&scope.course_id)
        .bind(&scope.assignment_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let mut payloads = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("payload_json");
            payloads.push(serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)));
        }
        Ok(payloads)
    }

    /// Dimension of the vectors already stored in a partition, if any.
    async fn partition_dims(&self, scope: &Scope, class: DocClass) -> Result<Option<usize>> {
        let dims: Option<i64> = match class {
            DocClass::Submission => {
                let student_id = scope
                    .student_id
                    .as_deref()
                    .ok_or(StoreError::MissingStudent)?;
                sqlx::query_scalar(
                    "SELECT dims FROM submission_chunks \
                     WHERE course_id = ? AND assignment_id = ? AND student_id = ? LIMIT 1",
                )
                .bind(&scope.course_id)
                .bind(&scope.assignment_id)
                .bind(student_id)
                .fetch_optional(&self.pool)
                .await?
            }
            DocClass::Rubric | DocClass::Exemplar => {
                sqlx::query_scalar(
                    "SELECT dims FROM reference_chunks \
                     WHERE course_id = ? AND assignment_id = ? AND doc_class = ? LIMIT 1",
                )
                .bind(&scope.course_id)
                .bind(&scope.assignment_id)
                .bind(class.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(dims.map(|d| d as usize))
    }

    /// All (id, content, embedding) rows in a partition, insertion order.
    async fn partition_rows(
        &self,
        scope: &Scope,
        class: DocClass,
    ) -> Result<Vec<(i64, String, Vec<u8>)>> {
        let rows = match class {
            DocClass::Submission => {
                let student_id = scope
                    .student_id
                    .as_deref()
                    .ok_or(StoreError::MissingStudent)?;
                sqlx::query(
                    "SELECT id, content, embedding FROM submission_chunks \
                     WHERE course_id = ? AND assignment_id = ? AND student_id = ? \
                     ORDER BY id ASC",
                )
                .bind(&scope.course_id)
                .bind(&scope.assignment_id)
                .bind(student_id)
                .fetch_all(&self.pool)
                .await?
            }
            DocClass::Rubric | DocClass::Exemplar => {
                sqlx::query(
                    "SELECT id, content, embedding FROM reference_chunks \
                     WHERE course_id = ? AND assignment_id = ? AND doc_class = ? \
                     ORDER BY id ASC",
                )
                .bind(&scope.course_id)
                .bind(&scope.assignment_id)
                .bind(class.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("content"), row.get("embedding")))
            .collect())
    }
}
