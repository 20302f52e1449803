use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::ChatError;
use crate::llm::provider::{send_json, with_one_retry};
use crate::models::{ApiKey, ChatTurn};

/// A fully assembled model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Behavioural rules for the model
    pub system: String,
    /// Prior exchanges, oldest first
    pub history: Vec<ChatTurn>,
    /// Retrieved context followed by the question
    pub user: String,
}

/// Produces an answer for a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt, api_key: &ApiKey) -> Result<String, ChatError>;
}

fn non_empty(provider: &str, text: String) -> Result<String, ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::Upstream(format!("{provider} returned an empty answer")));
    }
    Ok(text)
}

// ─── Gemini ──────────────────────────────────────────────

pub struct GeminiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    backoff: Duration,
}

impl GeminiGenerator {
    pub fn new(client: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.chat_model.clone(),
            temperature: config.temperature,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn request_body(&self, prompt: &Prompt) -> GeminiGenerateRequest {
        let mut contents = Vec::with_capacity(prompt.history.len() * 2 + 1);
        for turn in &prompt.history {
            contents.push(GeminiMessage::new("user", &turn.question));
            contents.push(GeminiMessage::new("model", &turn.answer));
        }
        contents.push(GeminiMessage::new("user", &prompt.user));

        GeminiGenerateRequest {
            system_instruction: GeminiSystem {
                parts: vec![GeminiPart {
                    text: prompt.system.clone(),
                }],
            },
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerateRequest {
    system_instruction: GeminiSystem,
    contents: Vec<GeminiMessage>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiSystem {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiMessage {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

impl GeminiMessage {
    fn new(role: &'static str, text: &str) -> Self {
        Self {
            role,
            parts: vec![GeminiPart {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

/// Concatenate the first candidate's text parts.
fn extract_gemini_text(body: GeminiGenerateResponse) -> Result<String, ChatError> {
    if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ChatError::Upstream(format!(
            "Gemini blocked the prompt ({reason})"
        )));
    }
    let text: String = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    non_empty("Gemini", text)
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &Prompt, api_key: &ApiKey) -> Result<String, ChatError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let req = self.request_body(prompt);
        let (url, req) = (&url, &req);

        with_one_retry(self.backoff, "Gemini generateContent", || async move {
            let body: GeminiGenerateResponse = send_json(
                "Gemini chat API",
                self.client
                    .post(url)
                    .header("x-goog-api-key", api_key.expose())
                    .json(req),
            )
            .await?;
            extract_gemini_text(body)
        })
        .await
    }
}

// ─── Ollama ──────────────────────────────────────────────

pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    backoff: Duration,
}

impl OllamaGenerator {
    pub fn new(client: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.chat_model.clone(),
            temperature: config.temperature,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn request_body(&self, prompt: &Prompt) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(prompt.history.len() * 2 + 2);
        messages.push(OllamaMessage::new("system", &prompt.system));
        for turn in &prompt.history {
            messages.push(OllamaMessage::new("user", &turn.question));
            messages.push(OllamaMessage::new("assistant", &turn.answer));
        }
        messages.push(OllamaMessage::new("user", &prompt.user));

        OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        }
    }
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl OllamaMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &Prompt, _api_key: &ApiKey) -> Result<String, ChatError> {
        let url = format!("{}/api/chat", self.base_url);
        let req = self.request_body(prompt);
        let (url, req) = (&url, &req);

        with_one_retry(self.backoff, "Ollama chat", || async move {
            let body: OllamaChatResponse =
                send_json("Ollama chat API", self.client.post(url).json(req)).await?;
            non_empty("Ollama", body.message.content)
        })
        .await
    }
}

/// Build the configured generator.
pub fn create_generator(
    client: &reqwest::Client,
    config: &LlmConfig,
) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(client.clone(), config))),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(client.clone(), config))),
        other => anyhow::bail!("Unsupported LLM provider for chat: {other}"),
    }
}
