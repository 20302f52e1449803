use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::LlmConfig;
use crate::error::ChatError;
use crate::llm::provider::send_json;
use crate::models::ApiKey;

/// Maximum characters to send per text to the embedding API.
/// text-embedding-004 accepts 2 048 tokens; code averages well over 3 chars
/// per token, so 6 000 chars stays inside the window for dense files too.
const MAX_EMBED_CHARS: usize = 6_000;

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    // Find the last char boundary at or before the limit
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// What an embedding will be compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    /// Chunk text stored in an index
    Document,
    /// A question searched against an index
    Query,
}

/// Identifies the vector space an embedder produces.
///
/// An index only answers queries embedded under the same scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingScheme {
    pub provider: String,
    pub model: String,
}

impl fmt::Display for EmbeddingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Turns texts into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn scheme(&self) -> EmbeddingScheme;

    /// One vector per input text, in input order.
    async fn embed(
        &self,
        texts: &[String],
        task: EmbedTask,
        api_key: &ApiKey,
    ) -> Result<Vec<Vec<f32>>, ChatError>;
}

/// Embed a single text.
pub async fn embed_single(
    embedder: &dyn Embedder,
    text: &str,
    task: EmbedTask,
    api_key: &ApiKey,
) -> Result<Vec<f32>, ChatError> {
    embedder
        .embed(&[text.to_string()], task, api_key)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::Upstream("no embedding returned".to_string()))
}

fn check_count(provider: &str, expected: usize, got: usize) -> Result<(), ChatError> {
    if expected != got {
        return Err(ChatError::Upstream(format!(
            "{provider} returned {got} embeddings for {expected} texts"
        )));
    }
    Ok(())
}

// ─── Gemini ──────────────────────────────────────────────

/// Gemini `batchEmbedContents`, authenticated with the caller's key.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBatchEmbedRequest {
    requests: Vec<GeminiEmbedRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiEmbedRequest {
    model: String,
    content: GeminiContent,
    task_type: &'static str,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiBatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn scheme(&self) -> EmbeddingScheme {
        EmbeddingScheme {
            provider: "gemini".to_string(),
            model: self.model.clone(),
        }
    }

    async fn embed(
        &self,
        texts: &[String],
        task: EmbedTask,
        api_key: &ApiKey,
    ) -> Result<Vec<Vec<f32>>, ChatError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/models/{}:batchEmbedContents", self.base_url, self.model);
        let task_type = match task {
            EmbedTask::Document => "RETRIEVAL_DOCUMENT",
            EmbedTask::Query => "RETRIEVAL_QUERY",
        };
        let req = GeminiBatchEmbedRequest {
            requests: texts
                .iter()
                .map(|t| GeminiEmbedRequest {
                    model: format!("models/{}", self.model),
                    content: GeminiContent {
                        parts: vec![GeminiPart {
                            text: truncate_for_embedding(t).to_string(),
                        }],
                    },
                    task_type,
                })
                .collect(),
        };

        let body: GeminiBatchEmbedResponse = send_json(
            "Gemini embed API",
            self.client
                .post(&url)
                .header("x-goog-api-key", api_key.expose())
                .json(&req),
        )
        .await?;

        check_count("Gemini embed API", texts.len(), body.embeddings.len())?;
        Ok(body.embeddings.into_iter().map(|e| e.values).collect())
    }
}

// ─── Ollama ──────────────────────────────────────────────

/// Local Ollama `/api/embed`; ignores the API key.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to silently truncate inputs that exceed the model's context
    /// length instead of returning a 400 error.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn scheme(&self) -> EmbeddingScheme {
        EmbeddingScheme {
            provider: "ollama".to_string(),
            model: self.model.clone(),
        }
    }

    async fn embed(
        &self,
        texts: &[String],
        _task: EmbedTask,
        _api_key: &ApiKey,
    ) -> Result<Vec<Vec<f32>>, ChatError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let req = OllamaEmbedRequest {
            model: self.model.clone(),
            input: texts
                .iter()
                .map(|t| truncate_for_embedding(t).to_string())
                .collect(),
            truncate: true,
        };

        let body: OllamaEmbedResponse =
            send_json("Ollama embed API", self.client.post(&url).json(&req)).await?;

        check_count("Ollama embed API", texts.len(), body.embeddings.len())?;
        Ok(body.embeddings)
    }
}

/// Build the configured embedder.
pub fn create_embedder(
    client: &reqwest::Client,
    config: &LlmConfig,
) -> anyhow::Result<std::sync::Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "gemini" => Ok(std::sync::Arc::new(GeminiEmbedder::new(
            client.clone(),
            &config.base_url,
            &config.embedding_model,
        ))),
        "ollama" => Ok(std::sync::Arc::new(OllamaEmbedder::new(
            client.clone(),
            &config.base_url,
            &config.embedding_model,
        ))),
        other => anyhow::bail!("Unknown LLM provider: {other}"),
    }
}
