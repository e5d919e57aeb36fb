//! Command-level pipelines: document ingestion and feedback runs.
//!
//! These glue the component layers together in the order the data flows:
//! read file -> chunk -> embed -> store for ingestion; read file -> embed
//! query -> retrieve context -> generate -> print for feedback. All policy
//! (strategies, ks, providers) comes in through [`Config`]; nothing here
//! reads the environment.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::chunk::{self, ChunkStrategy};
use crate::config::{Config, Credentials};
use crate::db;
use crate::embedding;
use crate::feedback;
use crate::llm;
use crate::models::{DocClass, Fragment, Scope};
use crate::retrieval;
use crate::store::VectorStore;

/// Chunk, embed, and store one plain-text document.
pub async fn run_ingest(
    config: &Config,
    credentials: &Credentials,
    file: &Path,
    scope: &Scope,
    class: DocClass,
    strategy: ChunkStrategy,
) -> Result<()> {
    let text = read_document(file)?;

    let provider = embedding::create_provider(&config.embedding, credentials)?;
    tracing::info!(
        model = provider.model_name(),
        dims = provider.dims(),
        class = %class,
        "ingesting {}",
        file.display()
    );

    let texts = chunk::chunk_text(&text, strategy, provider.as_ref(), &config.chunking).await?;
    if texts.is_empty() {
        bail!(
            "No usable fragments in {} (all content shorter than {} chars?)",
            file.display(),
            config.chunking.min_chars
        );
    }
    let fragments = Fragment::sequence(&texts);

    let vectors = provider.embed(&texts).await?;

    let pool = db::connect(config).await?;
    let store = VectorStore::new(pool);
    store
        .ingest(scope, class, &fragments, &vectors, provider.model_name())
        .await?;

    println!(
        "Ingested {} as {}: {} fragments, {} dims ({}) ... ok",
        file.display(),
        class,
        fragments.len(),
        provider.dims(),
        provider.model_name()
    );
    Ok(())
}

/// Retrieve context for a submitted essay, generate feedback, record it,
/// and print the payload JSON.
pub async fn run_feedback(
    config: &Config,
    credentials: &Credentials,
    file: &Path,
    scope: &Scope,
) -> Result<()> {
    let essay = read_document(file)?;

    let provider = embedding::create_provider(&config.embedding, credentials)?;
    let model = llm::create_model(&config.llm, credentials)?;

    let query_vec = provider.embed_query(&essay).await?;

    let pool = db::connect(config).await?;
    let store = VectorStore::new(pool);

    let context = retrieval::retrieve_context(&store, scope, &query_vec, &config.retrieval).await?;
    if context.is_empty() {
        tracing::warn!(
            course = %scope.course_id,
            assignment = %scope.assignment_id,
            "no rubric or exemplar context found; feedback will be ungrounded"
        );
    }

    let record =
        feedback::generate_feedback(model.as_ref(), &store, scope, &context, &essay).await?;

    println!("{}", serde_json::to_string_pretty(&record.payload.to_json())?);
    Ok(())
}

fn read_document(file: &Path) -> Result<String> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if text.trim().is_empty() {
        bail!("{} is empty", file.display());
    }
    Ok(text)
}
