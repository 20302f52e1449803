//! Error taxonomy shared by every component.
//!
//! Each variant renders a deterministic, single-line message. At the HTTP
//! boundary the message becomes the `detail` field of the error body and the
//! variant picks the status code, so the frontend can show
//! `Error: <detail>` without knowing anything about the failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed or incomplete request payload.
    #[error("{0}")]
    BadRequest(String),

    /// The submitted repository URL cannot be used.
    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),

    /// Clone failed: unreachable host, auth to the source host, disk, timeout.
    #[error("Failed to fetch repository: {0}")]
    Fetch(String),

    /// The working tree root could not be read.
    #[error("Failed to index repository: {0}")]
    Index(String),

    #[error("Access denied: '{0}' is outside the repository")]
    PathViolation(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Cannot display binary file: {0}")]
    NotText(String),

    #[error("Repository '{0}' has not been processed yet")]
    SessionNotFound(String),

    /// The query embedder does not produce vectors in the index's space.
    #[error("Embedding scheme mismatch: index built with {index}, query uses {query}; re-process the repository")]
    SchemeMismatch { index: String, query: String },

    #[error("The model provider rejected the API key: {0}")]
    UpstreamAuth(String),

    #[error("The model provider is rate limiting requests: {0}")]
    UpstreamRateLimit(String),

    #[error("The model provider failed: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::BadRequest(_) | ChatError::InvalidUrl(_) | ChatError::NotText(_) => {
                StatusCode::BAD_REQUEST
            }
            ChatError::Fetch(_) | ChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ChatError::Index(_) | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::PathViolation(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) | ChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ChatError::SchemeMismatch { .. } => StatusCode::CONFLICT,
            ChatError::UpstreamAuth(_) => StatusCode::UNAUTHORIZED,
            ChatError::UpstreamRateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Errors from a provider that are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Upstream(_))
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ChatError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::Internal(format!("background task failed: {err}"))
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, "{self}");
        } else {
            tracing::warn!(status = %status, "{self}");
        }
        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}
