//! # repo-chat
//!
//! Backend for chatting with a code repository: clone it, show its file
//! tree, and answer questions grounded in its source.
//!
//! ## Architecture
//!
//! ```text
//!   POST /process-repo                         POST /chat
//!          │                                        │
//!          ▼                                        ▼
//!   ┌──────────────┐                      ┌──────────────────┐
//!   │  git fetch   │ shallow clone        │ session snapshot │
//!   └──────┬───────┘                      └────────┬─────────┘
//!          ▼                                       ▼
//!   ┌──────────────┐                      ┌──────────────────┐
//!   │  tree walk   │ ignore policy        │    retriever     │ cosine top-K
//!   └──────┬───────┘                      └────────┬─────────┘
//!          ▼                                       ▼
//!   ┌──────────────┐                      ┌──────────────────┐
//!   │   chunker    │ tree-sitter cuts     │ answer synthesis │ grounded prompt
//!   └──────┬───────┘                      └────────┬─────────┘
//!          ▼                                       ▼
//!   ┌──────────────┐                           { answer }
//!   │ index build  │ batched embeddings
//!   └──────┬───────┘
//!          ▼
//!   ┌──────────────┐
//!   │   registry   │ atomic swap per repo name
//!   └──────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration: ignore policy, chunking, retrieval, LLM
//! - [`error`] - `ChatError` and its HTTP rendering
//! - [`models`] - Wire types, `TreeNode`, `Chunk`, the redacted `ApiKey`
//! - [`git`] - URL validation, repo naming and libgit2 cloning behind `SourceFetcher`
//! - [`tree`] - Ordered file tree of a working directory
//! - [`content`] - Contained reads of indexed files
//! - [`chunking`] - Boundary-aware overlapping chunks with exact reassembly
//! - [`llm::embeddings`] / [`llm::generate`] - Gemini and Ollama providers
//! - [`llm::answer`] - History sanitising and grounded prompt assembly
//! - [`search`] - Per-session vector index, its builder, and the retriever
//! - [`session`] - Registry of live sessions keyed by repository name
//! - [`ingest`] - The fetch-to-publish pipeline
//! - [`api`] - Axum handlers and router
//! - [`state`] - Shared application state

pub mod api;
pub mod chunking;
pub mod config;
pub mod content;
pub mod error;
pub mod git;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod search;
pub mod session;
pub mod state;
pub mod tree;
