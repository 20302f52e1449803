use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde_json::{json, Value};

use crate::content::{read_file, validate_relative_path};
use crate::error::ChatError;
use crate::ingest;
use crate::models::{FileContent, FileContentQuery, ProcessRepoRequest, ProcessRepoResponse};
use crate::state::AppState;

/// GET / - Liveness check
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Repo Chat API is running" }))
}

/// POST /process-repo - Clone, index and publish a repository session.
/// Responds once the session is ready to chat with.
pub async fn process_repo(
    State(state): State<AppState>,
    payload: Result<Json<ProcessRepoRequest>, JsonRejection>,
) -> Result<Json<ProcessRepoResponse>, ChatError> {
    let Json(req) = payload.map_err(|e| ChatError::BadRequest(e.body_text()))?;

    let url = req.url.trim();
    if url.is_empty() {
        return Err(ChatError::BadRequest("url is required".to_string()));
    }
    if req.gemini_api_key.is_blank() {
        return Err(ChatError::BadRequest("gemini_api_key is required".to_string()));
    }

    let response = ingest::process_repo(state, url, req.gemini_api_key).await?;
    Ok(Json(response))
}

/// GET /file-content?repo_name=&file_path= - Raw text of one indexed file
pub async fn file_content(
    State(state): State<AppState>,
    query: Result<Query<FileContentQuery>, QueryRejection>,
) -> Result<Json<FileContent>, ChatError> {
    let Query(query) = query.map_err(|e| ChatError::BadRequest(e.body_text()))?;

    let repo_name = query.repo_name.trim();
    if repo_name.is_empty() {
        return Err(ChatError::BadRequest("repo_name is required".to_string()));
    }
    // Traversal attempts are refused whether or not the session exists.
    validate_relative_path(&query.file_path)?;

    let session = state.registry.get(repo_name)?;
    let file = read_file(&session, &query.file_path).await?;
    Ok(Json(file))
}
