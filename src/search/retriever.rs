use crate::error::ChatError;
use crate::llm::embeddings::{embed_single, EmbedTask, Embedder};
use crate::models::{ApiKey, ScoredChunk};
use crate::session::Session;

/// The `k` chunks of `session` most similar to `question`.
///
/// An empty index answers with nothing and never calls the provider. A query
/// embedded in a different vector space than the index is refused.
pub async fn retrieve(
    session: &Session,
    embedder: &dyn Embedder,
    question: &str,
    k: usize,
    api_key: &ApiKey,
) -> Result<Vec<ScoredChunk>, ChatError> {
    let index = &session.index;
    if index.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let query_scheme = embedder.scheme();
    if &query_scheme != index.scheme() {
        return Err(ChatError::SchemeMismatch {
            index: index.scheme().to_string(),
            query: query_scheme.to_string(),
        });
    }

    let query = embed_single(embedder, question, EmbedTask::Query, api_key).await?;
    if Some(query.len()) != index.dims() {
        return Err(ChatError::SchemeMismatch {
            index: format!("{} ({} dims)", index.scheme(), index.dims().unwrap_or(0)),
            query: format!("{query_scheme} ({} dims)", query.len()),
        });
    }

    let hits = index.search(&query, k);
    tracing::debug!(
        "Retrieved {} chunks for '{}' (best score {:.3})",
        hits.len(),
        session.name,
        hits.first().map(|h| h.score).unwrap_or(0.0)
    );
    Ok(hits)
}
