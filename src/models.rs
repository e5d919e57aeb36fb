//! Core data types that flow through the ingestion and feedback pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Caller-supplied composite key isolating one logical corpus from another.
///
/// The exact key composition is decided by the integrating application;
/// the store composes partition keys from whichever parts are present.
/// `student_id` is required for submission partitions only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub course_id: String,
    pub assignment_id: String,
    pub student_id: Option<String>,
}

impl Scope {
    pub fn new(course_id: impl Into<String>, assignment_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            assignment_id: assignment_id.into(),
            student_id: None,
        }
    }

    #[must_use]
    pub fn with_student(mut self, student_id: impl Into<String>) -> Self {
        self.student_id = Some(student_id.into());
        self
    }
}

/// Classification of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocClass {
    Rubric,
    Exemplar,
    Submission,
}

impl DocClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocClass::Rubric => "rubric",
            DocClass::Exemplar => "exemplar",
            DocClass::Submission => "submission",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rubric" => Some(DocClass::Rubric),
            "exemplar" => Some(DocClass::Exemplar),
            "submission" => Some(DocClass::Submission),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded span of cleaned source text, immutable once created.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Zero-based ordinal position within the source document.
    pub index: i64,
    pub content: String,
    /// SHA-256 of the content, stored alongside for auditing.
    pub hash: String,
}

impl Fragment {
    pub fn new(index: i64, content: impl Into<String>) -> Self {
        let content = content.into();
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        Self {
            index,
            content,
            hash,
        }
    }

    /// Build an ordered fragment sequence from cleaned chunk texts.
    pub fn sequence(texts: &[String]) -> Vec<Fragment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Fragment::new(i as i64, t.clone()))
            .collect()
    }
}

/// A fragment returned from a nearest-neighbor query.
#[derive(Debug, Clone)]
pub struct RetrievedFragment {
    pub content: String,
    /// Cosine distance to the query vector (lower is closer).
    pub distance: f32,
}

/// Structured feedback body expected from the language model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackBody {
    /// Holistic mark out of 20.
    pub mark: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub advice: String,
}

/// Outcome of feedback generation.
///
/// A model response that parses as [`FeedbackBody`] becomes `Structured`;
/// anything else is wrapped as `RawText` so the student still receives the
/// commentary. Both variants serialize to the same external JSON shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackPayload {
    Structured(FeedbackBody),
    RawText(String),
}

impl FeedbackPayload {
    /// External JSON shape: the structured fields directly, or the raw
    /// text under a `"feedback"` key.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FeedbackPayload::Structured(body) => {
                serde_json::to_value(body).unwrap_or_else(|_| serde_json::json!({}))
            }
            FeedbackPayload::RawText(text) => serde_json::json!({ "feedback": text }),
        }
    }
}

/// One durably recorded feedback result. Append-only: a resubmission
/// creates a new record, never overwrites.
#[derive(Debug, Clone)]
pub struct FeedbackRecord {
    pub id: String,
    pub student_id: String,
    pub assignment_id: String,
    pub course_id: String,
    pub payload: FeedbackPayload,
    pub created_at: DateTime<Utc>,
}
