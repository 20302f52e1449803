//! Builds a session's vector index from its chunks.
//!
//! Batches are embedded concurrently; a failing batch never cancels its
//! siblings. A batch that fails falls back to embedding its chunks one at a
//! time, and chunks that still fail are dropped with a warning. A rejected API
//! key stops further batches from starting and aborts the whole build once the
//! batches already in flight settle.

use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::ChatError;
use crate::llm::embeddings::{EmbedTask, Embedder};
use crate::models::{ApiKey, Chunk};
use crate::search::vector::VectorIndex;

/// Text actually embedded for a chunk: the path gives the model a hint about
/// what the snippet is.
pub fn embedding_text(chunk: &Chunk) -> String {
    format!("File: {}\n{}", chunk.file_path, chunk.content)
}

struct BatchOutcome {
    batch: usize,
    embedded: Vec<(Chunk, Vec<f32>)>,
}

/// Embed `chunks` (at most `max_chunks` of them) into a fresh index.
pub async fn build_index(
    mut chunks: Vec<Chunk>,
    embedder: &dyn Embedder,
    api_key: &ApiKey,
    llm: &LlmConfig,
    max_chunks: usize,
) -> Result<VectorIndex, ChatError> {
    let mut index = VectorIndex::new(embedder.scheme());
    if chunks.is_empty() {
        return Ok(index);
    }
    if chunks.len() > max_chunks {
        tracing::warn!(
            "Repository produced {} chunks, embedding only the first {max_chunks}",
            chunks.len()
        );
        chunks.truncate(max_chunks);
    }

    let total = chunks.len();
    let batch_size = llm.embed_batch_size.max(1);
    let mut batches: Vec<Vec<Chunk>> = Vec::with_capacity(total.div_ceil(batch_size));
    let mut rest = chunks.into_iter().peekable();
    while rest.peek().is_some() {
        batches.push(rest.by_ref().take(batch_size).collect());
    }

    let attempts = llm.embed_chunk_attempts.max(1);
    let backoff = Duration::from_millis(llm.retry_backoff_ms);
    // Set by the first rejected key; batches not yet started are skipped.
    let key_rejected = &AtomicBool::new(false);

    let outcomes: Vec<Result<Option<BatchOutcome>, ChatError>> =
        stream::iter(batches.into_iter().enumerate())
            .map(move |(batch, chunks)| async move {
                if key_rejected.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                let result =
                    embed_batch(embedder, api_key, batch, chunks, attempts, backoff, key_rejected)
                        .await;
                if matches!(result, Err(ChatError::UpstreamAuth(_))) {
                    key_rejected.store(true, Ordering::SeqCst);
                }
                result.map(Some)
            })
            .buffer_unordered(llm.embed_concurrency.max(1))
            .collect()
            .await;

    // Only a rejected key surfaces as a batch error; every batch has settled.
    let mut ok: Vec<BatchOutcome> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        ok.extend(outcome?);
    }
    // Insert in chunk order so the index is independent of completion order.
    ok.sort_by_key(|o| o.batch);

    let mut mismatched = 0usize;
    for (chunk, embedding) in ok.into_iter().flat_map(|o| o.embedded) {
        if !index.insert(chunk, embedding) {
            mismatched += 1;
        }
    }
    if mismatched > 0 {
        tracing::warn!("Dropped {mismatched} embeddings with an unexpected dimension");
    }

    if index.is_empty() {
        return Err(ChatError::Upstream(format!(
            "none of {total} chunks could be embedded"
        )));
    }
    tracing::info!("Embedded {} of {total} chunks", index.len());
    Ok(index)
}

async fn embed_batch(
    embedder: &dyn Embedder,
    api_key: &ApiKey,
    batch: usize,
    chunks: Vec<Chunk>,
    attempts: usize,
    backoff: Duration,
    key_rejected: &AtomicBool,
) -> Result<BatchOutcome, ChatError> {
    let texts: Vec<String> = chunks.iter().map(embedding_text).collect();

    match embedder.embed(&texts, EmbedTask::Document, api_key).await {
        Ok(vectors) if vectors.len() == chunks.len() => {
            return Ok(BatchOutcome {
                batch,
                embedded: chunks.into_iter().zip(vectors).collect(),
            });
        }
        Ok(vectors) => tracing::warn!(
            "Batch {batch}: got {} embeddings for {} chunks, retrying per chunk",
            vectors.len(),
            chunks.len()
        ),
        Err(e @ ChatError::UpstreamAuth(_)) => return Err(e),
        Err(e) => tracing::warn!("Batch {batch} failed, retrying per chunk: {e}"),
    }

    let mut embedded = Vec::with_capacity(chunks.len());
    for (chunk, text) in chunks.into_iter().zip(texts) {
        if key_rejected.load(Ordering::SeqCst) {
            break;
        }
        match embed_one(embedder, api_key, &text, attempts, backoff).await {
            Ok(vector) => embedded.push((chunk, vector)),
            Err(e @ ChatError::UpstreamAuth(_)) => return Err(e),
            Err(e) => tracing::warn!(
                "Skipping chunk {} of {}: {e}",
                chunk.ordinal,
                chunk.file_path
            ),
        }
    }
    Ok(BatchOutcome { batch, embedded })
}

async fn embed_one(
    embedder: &dyn Embedder,
    api_key: &ApiKey,
    text: &str,
    attempts: usize,
    backoff: Duration,
) -> Result<Vec<f32>, ChatError> {
    let texts = [text.to_string()];
    let mut last_err = ChatError::Upstream("no embedding attempts made".to_string());

    for attempt in 1..=attempts {
        match embedder.embed(&texts, EmbedTask::Document, api_key).await {
            Ok(mut vectors) if vectors.len() == 1 => return Ok(vectors.remove(0)),
            Ok(vectors) => {
                last_err = ChatError::Upstream(format!(
                    "expected 1 embedding, got {}",
                    vectors.len()
                ));
            }
            Err(e @ ChatError::UpstreamAuth(_)) => return Err(e),
            Err(e) => last_err = e,
        }
        if attempt < attempts {
            tokio::time::sleep(backoff * attempt as u32).await;
        }
    }
    Err(last_err)
}
