//! Two-category context gathering for feedback generation.
//!
//! One query vector fans out into two independent partition queries:
//! rubric fragments (how the work is judged) and exemplar fragments (what
//! strong work looks like). The categories stay separate all the way into
//! the prompt; there is no merging or cross-category re-ranking.

use anyhow::Result;

use crate::config::RetrievalConfig;
use crate::models::{DocClass, Scope};
use crate::store::VectorStore;

/// Context assembled for one feedback request, grouped by category.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub rubric: Vec<String>,
    pub reference: Vec<String>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.rubric.is_empty() && self.reference.is_empty()
    }
}

/// Gather rubric and exemplar context for a query vector.
///
/// Each category uses its own configured `k` and queries its own
/// partition. An empty partition contributes an empty category rather
/// than failing the request, so feedback still proceeds when, say, no
/// exemplars were ever ingested for the assignment.
pub async fn retrieve_context(
    store: &VectorStore,
    scope: &Scope,
    query_vec: &[f32],
    config: &RetrievalConfig,
) -> Result<RetrievedContext> {
    let (rubric, reference) = tokio::try_join!(
        store.top_k(scope, DocClass::Rubric, query_vec, config.rubric_k),
        store.top_k(scope, DocClass::Exemplar, query_vec, config.reference_k),
    )?;

    tracing::debug!(
        rubric = rubric.len(),
        reference = reference.len(),
        course = %scope.course_id,
        assignment = %scope.assignment_id,
        "retrieved context"
    );

    Ok(RetrievedContext {
        rubric: rubric.into_iter().map(|f| f.content).collect(),
        reference: reference.into_iter().map(|f| f.content).collect(),
    })
}
