pub mod chat;
pub mod repos;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// All HTTP routes, bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(repos::root))
        .route("/process-repo", post(repos::process_repo))
        .route("/chat", post(chat::chat))
        .route("/file-content", get(repos::file_content))
        .with_state(state)
}
