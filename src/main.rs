use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use repo_chat::api;
use repo_chat::config::Config;
use repo_chat::ingest::clear_stale_workdirs;
use repo_chat::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "LLM provider: {} ({}), chat model {}, embedding model {}",
        config.llm.provider,
        config.llm.base_url,
        config.llm.chat_model,
        config.llm.embedding_model
    );

    let removed = clear_stale_workdirs(&config.repos_dir())?;
    if removed > 0 {
        tracing::info!("Removed {removed} stale working trees");
    }

    let origin: HeaderValue = config.frontend_url.parse()?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config)?;

    let app = api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
