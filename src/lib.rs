//! Retrieval-augmented essay feedback over a local SQLite vector store.
//!
//! Course material (marking rubrics, exemplar essays) and student
//! submissions are chunked, embedded, and stored per course/assignment
//! partition. A feedback run embeds the submitted essay, retrieves the
//! closest rubric and exemplar fragments, and asks a language model for
//! structured feedback with a mark out of 20.
//!
//! ```text
//!   document ──> chunk ──> embed ──> VectorStore (SQLite)
//!                                         │
//!   essay ──> embed_query ──> retrieve ───┘──> [RUBRIC]/[EXEMPLAR] prompt
//!                                                   │
//!                                        LanguageModel ──> feedback record
//! ```
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | TOML config, validation, credentials value object |
//! | [`models`] | Scopes, fragments, feedback payloads |
//! | [`chunk`] | Fixed-recursive splitter, fragment cleaning, strategy dispatch |
//! | [`semantic`] | Embedding-gradient (semantic) splitter |
//! | [`embedding`] | Provider trait, OpenAI/Gitee backends, vector codecs |
//! | [`llm`] | Chat-completions backends for feedback generation |
//! | [`db`] / [`migrate`] | SQLite pool and idempotent schema |
//! | [`store`] | Atomic batch ingestion, partitioned top-k retrieval |
//! | [`retrieval`] | Two-category context gathering |
//! | [`feedback`] | Prompt assembly, response parsing, persistence |
//! | [`ingest`] | Command-level ingest and feedback pipelines |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod feedback;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod semantic;
pub mod store;
