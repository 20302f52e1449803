//! Grounded answer synthesis: turns a question, the retrieved chunks and the
//! caller's prior turns into a prompt, then asks the generator for an answer.

use std::fmt::Write;

use crate::config::RetrievalConfig;
use crate::error::ChatError;
use crate::llm::generate::{Generator, Prompt};
use crate::models::{ApiKey, ChatTurn, ScoredChunk};

/// Chat-template control tokens that must never reach the model verbatim.
const CONTROL_TOKENS: &[&str] = &[
    "<start_of_turn>",
    "<end_of_turn>",
    "[INST]",
    "[/INST]",
    "<<SYS>>",
    "<</SYS>>",
];

/// Longest `<|...|>` token stripped by the sanitizer.
const MAX_PIPE_TOKEN_LEN: usize = 32;

/// Remove chat-template control tokens (`<|im_start|>`, `<|eot_id|>`,
/// `<start_of_turn>`, ...) so user text and repository content cannot forge
/// conversation turns.
pub fn sanitize_for_prompt(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("<|") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("|>") {
            Some(close)
                if close <= MAX_PIPE_TOKEN_LEN
                    && after[..close]
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                rest = &after[close + 2..];
            }
            _ => {
                out.push_str("<|");
                rest = after;
            }
        }
    }
    out.push_str(rest);

    for token in CONTROL_TOKENS {
        if out.contains(token) {
            out = out.replace(token, "");
        }
    }
    out
}

pub fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    s.char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= max_len)
        .map(|(_, c)| c)
        .collect()
}

/// Keep the well-formed `[question, answer]` pairs, most recent
/// `max_history_pairs` of them, oldest first.
pub fn sanitize_history(raw: &[serde_json::Value], config: &RetrievalConfig) -> Vec<ChatTurn> {
    let clean = |text: &str| sanitize_for_prompt(&truncate_to_char_boundary(text, config.max_message_chars));

    let turns: Vec<ChatTurn> = raw
        .iter()
        .filter_map(ChatTurn::from_wire)
        .map(|turn| ChatTurn {
            question: clean(&turn.question),
            answer: clean(&turn.answer),
        })
        .collect();

    let skip = turns.len().saturating_sub(config.max_history_pairs);
    turns.into_iter().skip(skip).collect()
}

pub fn build_system_prompt() -> String {
    String::from(
        "You are a code assistant answering questions about a single git repository.\n\
         Each user message includes source code retrieved from that repository.\n\
         Answer ONLY based on the provided code and the earlier conversation.\n\
         If the snippets don't answer the question, say what you found and what's missing.\n\
         Reference file paths and line numbers. Use markdown code blocks with language tags.",
    )
}

/// Render retrieved chunks as labelled blocks, stopping before `max_chars`.
/// A first block that alone exceeds the budget is truncated rather than dropped.
pub fn build_context_block(hits: &[ScoredChunk], max_chars: usize) -> String {
    let mut ctx = String::from("Here is source code from the repository:\n\n");

    if hits.is_empty() {
        ctx.push_str("(No relevant code was found for this question.)\n");
        return ctx;
    }

    let mut used = 0usize;
    for (i, hit) in hits.iter().enumerate() {
        let chunk = &hit.chunk;
        let mut block = String::new();
        let _ = write!(
            block,
            "--- {} (lines {}-{}) [{}] ---\n{}\n\n",
            chunk.file_path,
            chunk.start_line,
            chunk.end_line,
            chunk.language,
            sanitize_for_prompt(&chunk.content)
        );

        if used + block.len() > max_chars {
            if i == 0 {
                ctx.push_str(&truncate_to_char_boundary(&block, max_chars));
                ctx.push('\n');
            } else {
                tracing::debug!("Context budget reached after {i} of {} chunks", hits.len());
            }
            break;
        }
        used += block.len();
        ctx.push_str(&block);
    }

    ctx
}

/// Assemble the model request. Context is embedded in the final user message
/// so smaller models attend to it.
pub fn build_prompt(
    question: &str,
    hits: &[ScoredChunk],
    history: Vec<ChatTurn>,
    config: &RetrievalConfig,
) -> Prompt {
    let question = sanitize_for_prompt(&truncate_to_char_boundary(
        question.trim(),
        config.max_message_chars,
    ));
    let context_block = build_context_block(hits, config.max_context_chars);

    Prompt {
        system: build_system_prompt(),
        history,
        user: format!("{context_block}---\nQuestion: {question}"),
    }
}

/// Produce a grounded answer for `question`.
pub async fn answer_question(
    generator: &dyn Generator,
    question: &str,
    hits: &[ScoredChunk],
    history: Vec<ChatTurn>,
    api_key: &ApiKey,
    config: &RetrievalConfig,
) -> Result<String, ChatError> {
    let prompt = build_prompt(question, hits, history, config);
    tracing::debug!(
        "Generating answer from {} chunks and {} prior turns",
        hits.len(),
        prompt.history.len()
    );
    let answer = generator.generate(&prompt, api_key).await?;
    Ok(answer.trim().to_string())
}
