use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::error::ChatError;
use crate::llm::answer::{answer_question, sanitize_history};
use crate::models::{ChatRequest, ChatResponse};
use crate::search::retriever::retrieve;
use crate::state::AppState;

/// POST /chat - Retrieval-augmented answer about a processed repository.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ChatError> {
    // ── Step 1: Validate input ────────────────────────────
    let Json(req) = payload.map_err(|e| ChatError::BadRequest(e.body_text()))?;

    let repo_name = req.repo_name.trim();
    if repo_name.is_empty() {
        return Err(ChatError::BadRequest("repo_name is required".to_string()));
    }
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ChatError::BadRequest("question is required".to_string()));
    }
    if req.gemini_api_key.is_blank() {
        return Err(ChatError::BadRequest("gemini_api_key is required".to_string()));
    }

    // ── Step 2: Snapshot the session ──────────────────────
    let session = state.registry.get(repo_name)?;
    let retrieval = &state.config.retrieval;
    let history = sanitize_history(&req.chat_history, retrieval);

    // ── Step 3: Retrieve context ──────────────────────────
    let hits = retrieve(
        &session,
        state.embedder.as_ref(),
        question,
        retrieval.top_k,
        &req.gemini_api_key,
    )
    .await?;

    // ── Step 4: Generate ──────────────────────────────────
    let answer = answer_question(
        state.generator.as_ref(),
        question,
        &hits,
        history,
        &req.gemini_api_key,
        retrieval,
    )
    .await?;

    tracing::info!(
        "Answered question about '{repo_name}' from {} chunks",
        hits.len()
    );
    Ok(Json(ChatResponse { answer }))
}
