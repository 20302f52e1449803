use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::git::{GitFetcher, SourceFetcher};
use crate::llm::embeddings::{create_embedder, Embedder};
use crate::llm::generate::{create_generator, Generator};
use crate::session::SessionRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub clone_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    /// Production wiring: providers from `config.llm`, libgit2 fetcher.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.llm.request_timeout_secs))
            .build()?;

        let embedder = create_embedder(&http_client, &config.llm)?;
        let generator = create_generator(&http_client, &config.llm)?;
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(GitFetcher::new(config.git_token.clone()));

        Self::with_providers(config, embedder, generator, fetcher)
    }

    /// Wiring with caller-supplied providers and fetcher.
    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> anyhow::Result<Self> {
        // Ensure data directories exist
        std::fs::create_dir_all(config.repos_dir())?;

        let max_concurrent_clones = config.max_concurrent_clones.max(1);
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            embedder,
            generator,
            fetcher,
            clone_semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_clones)),
        })
    }
}
