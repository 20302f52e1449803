//! Code chunking: overlapping, boundary-aware spans of a file's text.
//!
//! Syntax boundaries come from tree-sitter for supported languages; every
//! file also gets blank-line, line, statement and whitespace fallbacks, with a
//! hard cut for pathological single-line files. Dropping each chunk's leading
//! overlap and concatenating the rest reproduces the file exactly.

pub mod ast;
pub mod boundary;

use crate::config::ChunkConfig;
use crate::models::Chunk;

/// Languages with tree-sitter AST support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Tsx,
    Unknown,
}

impl Language {
    /// Map a language tag (as produced by `tree::detect_language`) to a variant.
    pub fn from_tag(lang: &str) -> Self {
        match lang.to_lowercase().as_str() {
            "rust" | "rs" => Language::Rust,
            "javascript" | "js" | "jsx" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            _ => Language::Unknown,
        }
    }

    /// Return the tree-sitter Language for this variant, or None if unsupported.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Language::Unknown => None,
        }
    }
}

/// Split one file into ordered chunks. Whitespace-only files yield none.
pub fn chunk_file(file_path: &str, content: &str, language: &str, config: &ChunkConfig) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let syntax = ast::syntax_boundaries(content, Language::from_tag(language), config.chunk_size)
        .unwrap_or_default();
    let spans = boundary::plan_spans(
        content,
        config.chunk_size,
        config.effective_overlap(),
        &syntax,
    );

    let newlines: Vec<usize> = content
        .bytes()
        .enumerate()
        .filter(|(_, b)| *b == b'\n')
        .map(|(i, _)| i)
        .collect();
    let line_of = |offset: usize| newlines.partition_point(|&p| p < offset) + 1;

    spans
        .into_iter()
        .enumerate()
        .map(|(ordinal, span)| Chunk {
            file_path: file_path.to_string(),
            ordinal,
            start: span.start,
            overlap: span.overlap,
            content: content[span.start..span.end].to_string(),
            language: language.to_string(),
            start_line: line_of(span.start),
            end_line: line_of(span.end.saturating_sub(1).max(span.start)),
        })
        .collect()
}

/// Rebuild a file's text from its chunks, in ordinal order.
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_content).collect()
}
