//! End-to-end pipeline tests over an in-memory database, with deterministic
//! in-process embedding and language-model backends standing in for the
//! network vendors.

use anyhow::Result;
use async_trait::async_trait;

use feedback_harness::chunk::{self, ChunkStrategy};
use feedback_harness::config::{ChunkingConfig, RetrievalConfig};
use feedback_harness::db;
use feedback_harness::embedding::EmbeddingProvider;
use feedback_harness::feedback::generate_feedback;
use feedback_harness::llm::{ChatMessage, LanguageModel};
use feedback_harness::migrate;
use feedback_harness::models::{DocClass, FeedbackPayload, Fragment, Scope};
use feedback_harness::retrieval::retrieve_context;
use feedback_harness::store::VectorStore;

const DIMS: usize = 8;

/// Deterministic embedding: a smoothed character histogram. Identical text
/// maps to an identical vector, so self-retrieval ranks exact matches first.
struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_one(t)).collect())
    }
}

fn embed_one(text: &str) -> Vec<f32> {
    let mut vec = vec![1.0f32; DIMS];
    for (i, b) in text.bytes().enumerate() {
        vec[(i + b as usize) % DIMS] += b as f32 / 255.0;
    }
    vec
}

/// Deterministic embedding keyed on subject matter, so semantic chunking
/// has a real gradient to find: sentence groups mentioning the sea land on
/// one axis, everything else on the other.
struct TopicEmbedder;

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-embedder"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.contains("tide") || t.contains("ocean") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }
}

struct MarkerModel {
    response: String,
}

#[async_trait]
impl LanguageModel for MarkerModel {
    fn model_name(&self) -> &str {
        "marker-model"
    }

    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(self.response.clone())
    }
}

async fn fresh_store() -> VectorStore {
    let pool = db::connect_in_memory().await.unwrap();
    migrate::run_migrations_on(&pool).await.unwrap();
    VectorStore::new(pool)
}

async fn ingest_texts(
    store: &VectorStore,
    scope: &Scope,
    class: DocClass,
    texts: &[&str],
) -> Vec<Fragment> {
    let embedder = HashEmbedder;
    let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let fragments = Fragment::sequence(&texts);
    let vectors = embedder.embed(&texts).await.unwrap();
    store
        .ingest(scope, class, &fragments, &vectors, embedder.model_name())
        .await
        .unwrap();
    fragments
}

#[tokio::test]
async fn ingested_fragments_are_their_own_nearest_neighbors() {
    let store = fresh_store().await;
    let scope = Scope::new("ENG101", "essay-1");
    let fragments = ingest_texts(
        &store,
        &scope,
        DocClass::Rubric,
        &[
            "Thesis: the essay states a clear, arguable position.",
            "Evidence: claims are backed by cited sources.",
            "Structure: paragraphs follow a logical progression.",
        ],
    )
    .await;

    for fragment in &fragments {
        let qvec = embed_one(&fragment.content);
        let results = store
            .top_k(&scope, DocClass::Rubric, &qvec, 1)
            .await
            .unwrap();
        assert_eq!(results[0].content, fragment.content);
        assert!(results[0].distance.abs() < 1e-5);
    }
}

#[tokio::test]
async fn chunking_feeds_ingestion_and_short_fragments_never_land_in_the_store() {
    let store = fresh_store().await;
    let scope = Scope::new("ENG101", "essay-1");
    let embedder = HashEmbedder;
    let cfg = ChunkingConfig {
        max_chars: 65,
        overlap_chars: 5,
        min_chars: 20,
        ..ChunkingConfig::default()
    };

    // The lone "Ok." paragraph is below min_chars and must be dropped.
    let text = "The opening paragraph introduces the argument in some detail.\n\n\
                Ok.\n\n\
                The closing paragraph restates the thesis and its implications.";
    let texts = chunk::chunk_text(text, ChunkStrategy::FixedRecursive, &embedder, &cfg)
        .await
        .unwrap();
    assert!(texts.iter().all(|t| t.chars().count() >= cfg.min_chars));

    let fragments = Fragment::sequence(&texts);
    let vectors = embedder.embed(&texts).await.unwrap();
    store
        .ingest(&scope, DocClass::Exemplar, &fragments, &vectors, "hash")
        .await
        .unwrap();

    let all = store
        .top_k(&scope, DocClass::Exemplar, &embed_one(text), 100)
        .await
        .unwrap();
    assert_eq!(all.len(), texts.len());
    assert!(all.iter().all(|f| f.content != "Ok."));
}

#[tokio::test]
async fn semantic_strategy_splits_where_the_topic_shifts() {
    let cfg = ChunkingConfig {
        sentence_buffer: 0,
        breakpoint_percentile: 80.0,
        ..ChunkingConfig::default()
    };
    let text = "The tide rises twice each day along most coastlines. \
                The ocean current carries warm water toward the poles. \
                Every tide leaves a line of debris on the sand. \
                Quadratic equations have at most two real roots. \
                Factoring is often faster than the general formula. \
                A negative discriminant means no real solution exists.";

    // Same entry point as the fixed strategy; only the selector differs.
    let fragments = chunk::chunk_text(text, ChunkStrategy::Semantic, &TopicEmbedder, &cfg)
        .await
        .unwrap();

    assert_eq!(fragments.len(), 2, "expected one breakpoint at the topic shift");
    assert!(fragments[0].contains("tide rises"));
    assert!(fragments[0].contains("line of debris"));
    assert!(!fragments[0].contains("Quadratic"));
    assert!(fragments[1].starts_with("Quadratic"));
    assert!(fragments[1].contains("discriminant"));
    assert!(fragments
        .iter()
        .all(|f| f.chars().count() >= cfg.min_chars));
}

#[tokio::test]
async fn semantic_strategy_feeds_the_store_like_the_fixed_one() {
    let store = fresh_store().await;
    let scope = Scope::new("ENG101", "essay-1");
    let cfg = ChunkingConfig {
        sentence_buffer: 0,
        breakpoint_percentile: 80.0,
        ..ChunkingConfig::default()
    };
    let text = "The tide shapes the shoreline over centuries. \
                The ocean floor is mapped by sonar soundings. \
                Linear algebra underpins computer graphics. \
                Matrix multiplication is not commutative in general.";

    let texts = chunk::chunk_text(text, ChunkStrategy::Semantic, &TopicEmbedder, &cfg)
        .await
        .unwrap();
    assert!(!texts.is_empty());

    let embedder = HashEmbedder;
    let fragments = Fragment::sequence(&texts);
    let vectors = embedder.embed(&texts).await.unwrap();
    store
        .ingest(&scope, DocClass::Exemplar, &fragments, &vectors, "hash")
        .await
        .unwrap();

    let results = store
        .top_k(&scope, DocClass::Exemplar, &embed_one(&texts[0]), 1)
        .await
        .unwrap();
    assert_eq!(results[0].content, texts[0]);
}

#[tokio::test]
async fn partitions_do_not_leak_across_assignments_or_classes() {
    let store = fresh_store().await;
    let a1 = Scope::new("ENG101", "essay-1");
    let a2 = Scope::new("ENG101", "essay-2");

    ingest_texts(&store, &a1, DocClass::Rubric, &["rubric for essay one"]).await;
    ingest_texts(&store, &a2, DocClass::Rubric, &["rubric for essay two"]).await;
    ingest_texts(&store, &a1, DocClass::Exemplar, &["exemplar for essay one"]).await;

    let qvec = embed_one("rubric for essay one");
    let results = store.top_k(&a1, DocClass::Rubric, &qvec, 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "rubric for essay one");
}

#[tokio::test]
async fn failed_batch_leaves_the_partition_untouched() {
    let store = fresh_store().await;
    let scope = Scope::new("ENG101", "essay-1");
    ingest_texts(&store, &scope, DocClass::Rubric, &["an existing rubric fragment"]).await;

    // Second batch disagrees with the partition's dimensionality.
    let texts = vec!["a fragment at the wrong dimensionality".to_string()];
    let err = store
        .ingest(
            &scope,
            DocClass::Rubric,
            &Fragment::sequence(&texts),
            &[vec![1.0; DIMS + 1]],
            "hash",
        )
        .await;
    assert!(err.is_err());

    let results = store
        .top_k(&scope, DocClass::Rubric, &vec![1.0; DIMS], 10)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "an existing rubric fragment");
}

#[tokio::test]
async fn feedback_run_grounds_on_both_categories_and_records_the_mark() {
    let store = fresh_store().await;
    let scope = Scope::new("ENG101", "essay-1").with_student("s123");

    ingest_texts(
        &store,
        &scope,
        DocClass::Rubric,
        &[
            "Thesis: the essay states a clear, arguable position.",
            "Evidence: claims are backed by cited sources.",
        ],
    )
    .await;
    ingest_texts(
        &store,
        &scope,
        DocClass::Exemplar,
        &["An exemplar introduction that frames the debate before taking a side."],
    )
    .await;

    let essay = "Social media has reshaped public discourse. This essay argues that...";
    let qvec = embed_one(essay);
    let context = retrieve_context(&store, &scope, &qvec, &RetrievalConfig::default())
        .await
        .unwrap();
    assert_eq!(context.rubric.len(), 2);
    assert_eq!(context.reference.len(), 1);

    let model = MarkerModel {
        response: r#"{"mark": 16, "strengths": ["engaging opening"], "weaknesses": ["few citations"], "advice": "add sources"}"#
            .to_string(),
    };
    let record = generate_feedback(&model, &store, &scope, &context, essay)
        .await
        .unwrap();

    match &record.payload {
        FeedbackPayload::Structured(body) => assert_eq!(body.mark, 16.0),
        other => panic!("expected structured payload, got {:?}", other),
    }
    assert_eq!(record.student_id, "s123");
    assert_eq!(store.feedback_for(&scope).await.unwrap().len(), 1);
}

#[tokio::test]
async fn feedback_survives_a_non_json_model_response() {
    let store = fresh_store().await;
    let scope = Scope::new("ENG101", "essay-1").with_student("s123");
    ingest_texts(&store, &scope, DocClass::Rubric, &["a rubric fragment for grounding"]).await;

    let essay = "A short but complete essay.";
    let context = retrieve_context(
        &store,
        &scope,
        &embed_one(essay),
        &RetrievalConfig::default(),
    )
    .await
    .unwrap();

    let model = MarkerModel {
        response: "I'd give this about 12/20. The argument needs more support.".to_string(),
    };
    let record = generate_feedback(&model, &store, &scope, &context, essay)
        .await
        .unwrap();
    assert!(matches!(record.payload, FeedbackPayload::RawText(_)));

    let payloads = store.feedback_for(&scope).await.unwrap();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0]["feedback"].as_str().unwrap().contains("12/20"));
}
