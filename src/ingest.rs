//! Ingest pipeline: fetch -> tree -> chunks -> index -> registry swap.
//!
//! The work runs on its own task so a caller that disconnects mid-ingest does
//! not abandon a half-built session. Ingests of the same repository name are
//! serialised by the registry's build lock; the previous session keeps
//! serving until the new one is published.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::chunking::chunk_file;
use crate::config::ChunkConfig;
use crate::error::ChatError;
use crate::git::{dir_size_bytes, parse_repo_url, RepoUrl};
use crate::models::{ApiKey, Chunk, ProcessRepoResponse};
use crate::search::builder::build_index;
use crate::session::Session;
use crate::state::AppState;
use crate::tree::{build_tree, detect_language, FileTree};

const MAX_CLONE_SECS: u64 = 24 * 60 * 60;

/// Fetch, index and publish the repository at `raw_url`.
pub async fn process_repo(
    state: AppState,
    raw_url: &str,
    api_key: ApiKey,
) -> Result<ProcessRepoResponse, ChatError> {
    let repo = parse_repo_url(raw_url, state.config.allow_local_urls)?;
    tokio::spawn(run_ingest(state, repo, api_key)).await?
}

async fn run_ingest(
    state: AppState,
    repo: RepoUrl,
    api_key: ApiKey,
) -> Result<ProcessRepoResponse, ChatError> {
    let name = repo.name.clone();
    let build_lock = state.registry.build_lock(&name);
    let result = {
        let _build_guard = build_lock.lock().await;
        build_and_publish(&state, repo, api_key).await
    };
    state.registry.release_build_lock(&name, build_lock);
    result
}

async fn build_and_publish(
    state: &AppState,
    repo: RepoUrl,
    api_key: ApiKey,
) -> Result<ProcessRepoResponse, ChatError> {
    let name = repo.name.clone();
    tracing::info!("Processing repository '{name}' from {}", repo.url);

    // ── Fetch ────────────────────────────────────────────
    let repos_dir = state.config.repos_dir();
    tokio::fs::create_dir_all(&repos_dir)
        .await
        .map_err(|e| ChatError::Fetch(format!("cannot create {}: {e}", repos_dir.display())))?;
    let workdir = tempfile::Builder::new()
        .prefix(&format!("{name}-"))
        .tempdir_in(&repos_dir)
        .map_err(|e| ChatError::Fetch(format!("cannot create working directory: {e}")))?;

    let permit = state
        .clone_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ChatError::internal("clone semaphore closed"))?;

    // Capped at a day so the deadline arithmetic cannot overflow.
    let timeout = Duration::from_secs(state.config.clone_timeout_secs.min(MAX_CLONE_SECS));
    let deadline = Instant::now() + timeout;
    let fetcher = state.fetcher.clone();
    let repo_for_fetch = repo.clone();

    // The permit and the working directory stay with the blocking thread, so
    // a clone that outlives the timeout still counts against the clone limit
    // and its directory is removed only after it stops writing.
    let fetch = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let outcome = fetcher.fetch(&repo_for_fetch, workdir.path(), deadline)?;
        let repo_size = dir_size_bytes(workdir.path());
        Ok::<_, ChatError>((workdir, outcome, repo_size))
    });

    let (workdir, outcome, repo_size) = match tokio::time::timeout(timeout, fetch).await {
        Ok(joined) => joined??,
        Err(_) => {
            return Err(ChatError::Fetch(format!(
                "clone timed out after {}s",
                state.config.clone_timeout_secs
            )))
        }
    };

    let max_mb = state.config.max_repo_size_mb;
    if repo_size > max_mb.saturating_mul(1024 * 1024) {
        return Err(ChatError::Fetch(format!(
            "repository size ({} MB) exceeds limit ({max_mb} MB)",
            repo_size / (1024 * 1024)
        )));
    }
    let head_commit = outcome.head_commit;

    // ── Tree + chunks ────────────────────────────────────
    let root = workdir.path().to_path_buf();
    let policy = state.config.index.clone();
    let chunking = state.config.chunking.clone();
    let (tree, chunks) = tokio::task::spawn_blocking(move || {
        let tree = build_tree(&root, &policy)?;
        let chunks = chunk_tree(&root, &tree, &chunking);
        Ok::<_, ChatError>((tree, chunks))
    })
    .await??;
    tracing::info!(
        "Found {} indexable files and {} chunks in '{name}'",
        tree.file_count(),
        chunks.len()
    );

    // ── Embeddings ───────────────────────────────────────
    let index = build_index(
        chunks,
        state.embedder.as_ref(),
        &api_key,
        &state.config.llm,
        state.config.chunking.max_chunks,
    )
    .await?;

    // ── Publish ──────────────────────────────────────────
    let file_tree = tree.nodes.clone();
    let message = format!(
        "Repository '{name}' processed: {} files indexed, {} chunks embedded",
        tree.file_count(),
        index.len()
    );
    let session = Session::new(
        name.clone(),
        repo.url.clone(),
        workdir,
        tree,
        index,
        head_commit,
    );
    state.registry.insert(session);
    tracing::info!(
        "{message} ({} live sessions)",
        state.registry.session_count()
    );

    Ok(ProcessRepoResponse {
        message,
        repo_name: name,
        file_tree,
    })
}

/// Chunk every text file of `tree`. Empty files, files that vanished, and
/// files that are not UTF-8 are skipped.
fn chunk_tree(root: &Path, tree: &FileTree, config: &ChunkConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for file in tree.files() {
        if file.size == 0 {
            continue;
        }
        let content = match std::fs::read(root.join(&file.relative_path)) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    tracing::debug!("Skipping non-UTF-8 file {}", file.relative_path);
                    continue;
                }
            },
            Err(e) => {
                tracing::debug!("Skipping unreadable file {}: {e}", file.relative_path);
                continue;
            }
        };
        let language = detect_language(&file.relative_path);
        chunks.extend(chunk_file(&file.relative_path, &content, language, config));
    }
    chunks
}

/// Remove working trees left behind by a previous process. Sessions do not
/// survive a restart, so nothing under `repos_dir` is live at startup.
pub fn clear_stale_workdirs(repos_dir: &Path) -> anyhow::Result<usize> {
    if !repos_dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(repos_dir)? {
        let path = entry?.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Could not remove stale {}: {e}", path.display()),
        }
    }
    Ok(removed)
}
