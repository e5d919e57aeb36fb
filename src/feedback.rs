//! Feedback generation: prompt assembly, model call, response parsing,
//! durable persistence.
//!
//! The prompt is three turns: a system contract asking for structured
//! JSON, an assistant turn carrying the retrieved context under
//! `[RUBRIC]` / `[EXEMPLAR]` headers, and a user turn with the essay. A
//! response that parses into the expected JSON shape is stored as
//! structured feedback; anything else is preserved verbatim as raw-text
//! feedback rather than discarded. Persistence happens exactly once,
//! after generation succeeds; a failed generation writes nothing.

use anyhow::{Context, Result};
use chrono::Utc;

use crate::llm::{ChatMessage, LanguageModel};
use crate::models::{FeedbackBody, FeedbackPayload, FeedbackRecord, Scope};
use crate::retrieval::RetrievedContext;
use crate::store::VectorStore;

const SYSTEM_PROMPT: &str = "You are an experienced essay marker. Using the rubric excerpts and \
exemplar excerpts provided, assess the student's essay. Respond with a single JSON object and \
nothing else, with these fields: \"mark\" (a number out of 20), \"strengths\" (a list of \
strings), \"weaknesses\" (a list of strings), and \"advice\" (a string with concrete next \
steps). Ground every point in the rubric where possible.";

/// Generate feedback for an essay and record it.
///
/// Returns the recorded payload. The record id is a fresh UUID; repeated
/// calls for the same student append rather than overwrite.
pub async fn generate_feedback(
    model: &dyn LanguageModel,
    store: &VectorStore,
    scope: &Scope,
    context: &RetrievedContext,
    essay: &str,
) -> Result<FeedbackRecord> {
    let student_id = scope
        .student_id
        .clone()
        .context("Feedback generation requires a student id")?;

    let messages = build_messages(context, essay);

    tracing::info!(model = model.model_name(), "requesting feedback");
    let response = model.generate(&messages).await?;

    let payload = parse_payload(&response);
    if matches!(payload, FeedbackPayload::RawText(_)) {
        tracing::warn!("model response was not valid structured feedback; storing raw text");
    }

    let record = FeedbackRecord {
        id: uuid::Uuid::new_v4().to_string(),
        student_id,
        assignment_id: scope.assignment_id.clone(),
        course_id: scope.course_id.clone(),
        payload,
        created_at: Utc::now(),
    };
    store.insert_feedback(&record).await?;

    Ok(record)
}

fn build_messages(context: &RetrievedContext, essay: &str) -> Vec<ChatMessage> {
    let mut context_block = String::new();
    context_block.push_str("[RUBRIC]\n");
    if context.rubric.is_empty() {
        context_block.push_str("(no rubric excerpts available)\n");
    } else {
        for fragment in &context.rubric {
            context_block.push_str(fragment);
            context_block.push('\n');
        }
    }
    context_block.push_str("\n[EXEMPLAR]\n");
    if context.reference.is_empty() {
        context_block.push_str("(no exemplar excerpts available)\n");
    } else {
        for fragment in &context.reference {
            context_block.push_str(fragment);
            context_block.push('\n');
        }
    }

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::assistant(context_block),
        ChatMessage::user(format!(
            "Provide holistic feedback and a mark out of 20 for the following essay:\n\n{}",
            essay
        )),
    ]
}

/// Parse a model response into a feedback payload.
///
/// Tolerates a Markdown code fence around the JSON. A response that does
/// not parse as the structured shape is kept as raw text.
fn parse_payload(response: &str) -> FeedbackPayload {
    let candidate = strip_code_fence(response.trim());
    match serde_json::from_str::<FeedbackBody>(candidate) {
        Ok(body) => FeedbackPayload::Structured(body),
        Err(_) => FeedbackPayload::RawText(response.trim().to_string()),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop a language tag like ```json on the fence line.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
