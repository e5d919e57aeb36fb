//! # Feedback Harness CLI (`fbk`)
//!
//! The `fbk` binary drives the essay-feedback pipeline: database
//! initialization, ingestion of rubrics, exemplars, and submissions, and
//! feedback generation for a submitted essay.
//!
//! ## Usage
//!
//! ```bash
//! fbk --config ./config/feedback.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fbk init` | Create the SQLite database and run schema migrations |
//! | `fbk ingest <file>` | Chunk, embed, and store a document |
//! | `fbk feedback <file>` | Generate and record feedback for an essay |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! fbk init
//!
//! # Ingest a rubric for an assignment
//! fbk ingest rubric.txt --course ENG101 --assignment essay-1 --class rubric
//!
//! # Ingest an exemplar with semantic chunking
//! fbk ingest exemplar.txt --course ENG101 --assignment essay-1 \
//!     --class exemplar --chunker semantic
//!
//! # Ingest a student's submission
//! fbk ingest essay.txt --course ENG101 --assignment essay-1 \
//!     --class submission --student s123
//!
//! # Generate feedback for that submission
//! fbk feedback essay.txt --course ENG101 --assignment essay-1 --student s123
//!
//! # Override the configured providers for one run
//! fbk feedback essay.txt --course ENG101 --assignment essay-1 \
//!     --student s123 --embedder openai --provider deepseek
//! ```
//!
//! API keys are read from the environment (or a `.env` file):
//! `OPENAI_API_KEY`, `GITEE_API_KEY`, `DEEPSEEK_API_KEY` as required by the
//! configured providers.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedback_harness::chunk::ChunkStrategy;
use feedback_harness::config::{self, Credentials};
use feedback_harness::ingest;
use feedback_harness::migrate;
use feedback_harness::models::{DocClass, Scope};

/// Feedback Harness CLI — retrieval-augmented essay feedback over a local
/// SQLite vector store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/feedback.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "fbk",
    about = "Feedback Harness — retrieval-augmented essay feedback over a local SQLite vector store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/feedback.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Chunk, embed, and store a plain-text document.
    ///
    /// Rubrics and exemplars are shared per course + assignment;
    /// submissions additionally require `--student`.
    Ingest {
        /// Path to the plain-text document.
        file: PathBuf,

        /// Course identifier (e.g. `ENG101`).
        #[arg(long)]
        course: String,

        /// Assignment identifier within the course.
        #[arg(long)]
        assignment: String,

        /// Student identifier. Required when `--class submission`.
        #[arg(long)]
        student: Option<String>,

        /// Document class: `rubric`, `exemplar`, or `submission`.
        #[arg(long = "class")]
        doc_class: String,

        /// Chunking strategy: `fixed` (deterministic, default) or
        /// `semantic` (embedding-gradient breakpoints).
        #[arg(long, default_value = "fixed")]
        chunker: String,

        /// Embedding provider override for this run: `openai` or `gitee`.
        /// Defaults to the config file's `[embedding].provider`.
        #[arg(long)]
        embedder: Option<String>,
    },

    /// Generate and record feedback for a submitted essay.
    ///
    /// Embeds the essay, retrieves the closest rubric and exemplar
    /// fragments for the assignment, asks the configured language model
    /// for structured feedback, stores the result, and prints it.
    Feedback {
        /// Path to the plain-text essay.
        file: PathBuf,

        /// Course identifier.
        #[arg(long)]
        course: String,

        /// Assignment identifier within the course.
        #[arg(long)]
        assignment: String,

        /// Student identifier the feedback is recorded under.
        #[arg(long)]
        student: String,

        /// Embedding provider override for this run: `openai` or `gitee`.
        /// Must match the provider the assignment's documents were
        /// ingested with, or retrieval fails on dimensions.
        #[arg(long)]
        embedder: Option<String>,

        /// LLM provider override for this run: `openai`, `deepseek`, or
        /// `gitee`. Defaults to the config file's `[llm].provider`.
        #[arg(long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;
    let credentials = Credentials::from_env();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            course,
            assignment,
            student,
            doc_class,
            chunker,
            embedder,
        } => {
            let Some(class) = DocClass::parse(&doc_class) else {
                bail!("Unknown document class: '{}'. Must be rubric, exemplar, or submission.", doc_class);
            };
            let Some(strategy) = ChunkStrategy::parse(&chunker) else {
                bail!("Unknown chunker: '{}'. Must be fixed or semantic.", chunker);
            };
            if class == DocClass::Submission && student.is_none() {
                bail!("--student is required when ingesting a submission");
            }
            if let Some(embedder) = embedder {
                cfg.embedding.provider = embedder;
            }

            let mut scope = Scope::new(course, assignment);
            if let Some(student) = student {
                scope = scope.with_student(student);
            }
            ingest::run_ingest(&cfg, &credentials, &file, &scope, class, strategy).await?;
        }
        Commands::Feedback {
            file,
            course,
            assignment,
            student,
            embedder,
            provider,
        } => {
            if let Some(embedder) = embedder {
                cfg.embedding.provider = embedder;
            }
            if let Some(provider) = provider {
                cfg.llm.provider = provider;
            }
            let scope = Scope::new(course, assignment).with_student(student);
            ingest::run_feedback(&cfg, &credentials, &file, &scope).await?;
        }
    }

    Ok(())
}
