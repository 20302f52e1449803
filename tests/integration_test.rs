//! Integration tests for the repo-chat pipeline.
//!
//! These tests exercise ingest, chat and file access end to end with stub
//! providers and a fixture fetcher, so no network, git host or model is needed.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::Json;
use parking_lot::Mutex;
use serde_json::json;

use repo_chat::api;
use repo_chat::chunking::{chunk_file, reassemble};
use repo_chat::config::{ChunkConfig, Config};
use repo_chat::error::ChatError;
use repo_chat::git::{FetchOutcome, RepoUrl, SourceFetcher};
use repo_chat::llm::embeddings::{EmbedTask, Embedder, EmbeddingScheme};
use repo_chat::llm::generate::{Generator, Prompt};
use repo_chat::models::{
    ApiKey, ChatRequest, FileContentQuery, ProcessRepoRequest, TreeNode,
};
use repo_chat::search::retriever::retrieve;
use repo_chat::state::AppState;

// ─── Stubs ───────────────────────────────────────────────

const DIMS: usize = 64;

/// Deterministic bag-of-words embedder: each lower-cased word is hashed into
/// one of `DIMS` buckets.
struct BagEmbedder;

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

#[async_trait]
impl Embedder for BagEmbedder {
    fn scheme(&self) -> EmbeddingScheme {
        EmbeddingScheme {
            provider: "test".into(),
            model: "bag-of-words".into(),
        }
    }

    async fn embed(
        &self,
        texts: &[String],
        _task: EmbedTask,
        _api_key: &ApiKey,
    ) -> Result<Vec<Vec<f32>>, ChatError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                for word in text
                    .split(|c: char| !c.is_ascii_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    v[bucket(&word.to_lowercase())] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Answers by listing the sources it was given, and remembers the prompt.
#[derive(Default)]
struct EchoGenerator {
    last_prompt: Mutex<Option<Prompt>>,
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, prompt: &Prompt, _api_key: &ApiKey) -> Result<String, ChatError> {
        *self.last_prompt.lock() = Some(prompt.clone());
        let sources: Vec<&str> = prompt
            .user
            .lines()
            .filter_map(|l| l.strip_prefix("--- "))
            .filter_map(|l| l.split(" (lines").next())
            .collect();
        Ok(format!("Based on {}: it adds numbers.", sources.join(", ")))
    }
}

/// Writes a small project into the destination. URLs mentioning
/// "unreachable" fail the way an unreachable host would.
#[derive(Default)]
struct FixtureFetcher {
    fetches: AtomicUsize,
}

impl SourceFetcher for FixtureFetcher {
    fn fetch(
        &self,
        repo: &RepoUrl,
        dest: &Path,
        _deadline: Instant,
    ) -> Result<FetchOutcome, ChatError> {
        if repo.url.contains("unreachable") {
            return Err(ChatError::Fetch(format!("could not resolve host for {}", repo.url)));
        }
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;

        let files: &[(&str, String)] = &[
            ("README.md", "# Widgets\n\nA tiny arithmetic library.\n".to_string()),
            (
                "src/lib.rs",
                "/// Add two numbers.\npub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n".to_string(),
            ),
            (
                "src/main.rs",
                "fn main() {\n    println!(\"{}\", widgets::add(2, 3));\n}\n".to_string(),
            ),
            ("VERSION", format!("{n}\n")),
            ("node_modules/left-pad/index.js", "module.exports = 1;\n".to_string()),
            ("Cargo.lock", "# lockfile\n".to_string()),
        ];
        for (rel, content) in files {
            let path = dest.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        Ok(FetchOutcome {
            head_commit: Some(format!("rev{n}")),
        })
    }
}

struct Harness {
    state: AppState,
    generator: Arc<EchoGenerator>,
    _data: tempfile::TempDir,
}

/// Ignores its deadline and overruns it, recording how many fetches run at
/// the same time.
struct SlowFetcher {
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl SourceFetcher for SlowFetcher {
    fn fetch(
        &self,
        _repo: &RepoUrl,
        dest: &Path,
        _deadline: Instant,
    ) -> Result<FetchOutcome, ChatError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        std::fs::write(dest.join("README.md"), "late\n").unwrap();
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchOutcome::default())
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(FixtureFetcher::default()), |_| {})
}

fn harness_with(fetcher: Arc<dyn SourceFetcher>, tweak: impl FnOnce(&mut Config)) -> Harness {
    let data = tempfile::TempDir::new().unwrap();
    let mut config = Config {
        data_dir: data.path().to_path_buf(),
        ..Config::default()
    };
    config.llm.retry_backoff_ms = 1;
    tweak(&mut config);

    let generator = Arc::new(EchoGenerator::default());
    let state = AppState::with_providers(
        config,
        Arc::new(BagEmbedder),
        generator.clone(),
        fetcher,
    )
    .unwrap();
    Harness {
        state,
        generator,
        _data: data,
    }
}

fn process_request(url: &str) -> ProcessRepoRequest {
    ProcessRepoRequest {
        url: url.to_string(),
        gemini_api_key: ApiKey::new("test-key"),
    }
}

fn chat_request(repo: &str, question: &str, history: Vec<serde_json::Value>) -> ChatRequest {
    ChatRequest {
        repo_name: repo.to_string(),
        question: question.to_string(),
        chat_history: history,
        gemini_api_key: ApiKey::new("test-key"),
    }
}

async fn ingest(state: &AppState, url: &str) -> Result<repo_chat::models::ProcessRepoResponse, ChatError> {
    api::repos::process_repo(State(state.clone()), Ok(Json(process_request(url))))
        .await
        .map(|Json(resp)| resp)
}

// ─── End to end ──────────────────────────────────────────

#[tokio::test]
async fn test_process_then_chat_end_to_end() {
    let h = harness();

    let resp = ingest(&h.state, "github.com/acme/widgets").await.unwrap();
    assert_eq!(resp.repo_name, "widgets");
    assert!(resp.message.contains("widgets"));

    let names: Vec<&str> = resp.file_tree.iter().map(|n| n.name()).collect();
    assert_eq!(names, vec!["src", "README.md", "VERSION"]);
    let TreeNode::Folder { children, .. } = &resp.file_tree[0] else {
        panic!("src should be a folder");
    };
    let src: Vec<&str> = children.iter().map(|n| n.name()).collect();
    assert_eq!(src, vec!["lib.rs", "main.rs"]);

    let session = h.state.registry.get("widgets").unwrap();
    assert_eq!(session.url, "https://github.com/acme/widgets");
    assert_eq!(session.head_commit.as_deref(), Some("rev1"));
    assert!(session.chunk_count() >= 3);

    let Json(answer) = api::chat::chat(
        State(h.state.clone()),
        Ok(Json(chat_request("widgets", "How does the add function work?", vec![]))),
    )
    .await
    .unwrap();
    assert!(!answer.answer.is_empty());
    assert!(answer.answer.contains("src/lib.rs"), "{}", answer.answer);
}

#[tokio::test]
async fn test_chat_history_reaches_prompt_and_malformed_pairs_are_dropped() {
    let h = harness();
    ingest(&h.state, "https://github.com/acme/widgets").await.unwrap();

    let history = vec![
        json!(["What is this repo?", "An arithmetic library."]),
        json!(["broken"]),
        json!(["", "blank question"]),
    ];
    api::chat::chat(
        State(h.state.clone()),
        Ok(Json(chat_request("widgets", "Where is main?", history))),
    )
    .await
    .unwrap();

    let prompt = h.generator.last_prompt.lock().clone().unwrap();
    assert_eq!(prompt.history.len(), 1);
    assert_eq!(prompt.history[0].question, "What is this repo?");
    assert!(prompt.user.ends_with("Question: Where is main?"));
}

// ─── Failure paths ───────────────────────────────────────

#[tokio::test]
async fn test_unreachable_url_leaves_no_session() {
    let h = harness();
    let err = ingest(&h.state, "https://unreachable.invalid/acme/ghost")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Fetch(_)));
    assert!(!h.state.registry.contains("ghost"));

    // The failed working directory is cleaned up.
    let leftovers = std::fs::read_dir(h.state.config.repos_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_invalid_url_is_rejected_before_fetch() {
    let h = harness();
    let err = ingest(&h.state, "ftp://example.com/repo").await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidUrl(_)));

    let err = ingest(&h.state, "   ").await.unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));
}

#[tokio::test]
async fn test_blank_api_key_is_bad_request() {
    let h = harness();
    let req = ProcessRepoRequest {
        url: "https://github.com/acme/widgets".into(),
        gemini_api_key: ApiKey::new("  "),
    };
    let err = api::repos::process_repo(State(h.state.clone()), Ok(Json(req)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));
}

#[tokio::test]
async fn test_chat_unknown_repo_is_session_not_found() {
    let h = harness();
    let err = api::chat::chat(
        State(h.state.clone()),
        Ok(Json(chat_request("nope", "hello?", vec![]))),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ChatError::SessionNotFound(ref n) if n == "nope"));
    assert_eq!(err.to_string(), "Repository 'nope' has not been processed yet");
}

#[tokio::test]
async fn test_oversized_repository_is_rejected() {
    let h = harness_with(Arc::new(FixtureFetcher::default()), |c| c.max_repo_size_mb = 0);
    let err = ingest(&h.state, "https://github.com/acme/widgets")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Fetch(ref m) if m.contains("exceeds limit")), "{err}");
    assert!(!h.state.registry.contains("widgets"));
    let leftovers = std::fs::read_dir(h.state.config.repos_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_huge_size_limit_does_not_overflow() {
    let h = harness_with(Arc::new(FixtureFetcher::default()), |c| {
        c.max_repo_size_mb = u64::MAX
    });
    ingest(&h.state, "https://github.com/acme/widgets").await.unwrap();
    assert!(h.state.registry.contains("widgets"));
}

#[tokio::test]
async fn test_clone_timeout_holds_limit_until_fetch_stops() {
    let fetcher = Arc::new(SlowFetcher::new(Duration::from_millis(1500)));
    let h = harness_with(fetcher.clone(), |c| {
        c.clone_timeout_secs = 1;
        c.max_concurrent_clones = 1;
    });

    for url in ["https://github.com/acme/slow-a", "https://github.com/acme/slow-b"] {
        let err = ingest(&h.state, url).await.unwrap_err();
        assert!(matches!(err, ChatError::Fetch(ref m) if m.contains("timed out")), "{err}");
    }
    assert_eq!(h.state.registry.session_count(), 0);

    // Overrunning fetches finish in the background; their directories go with them.
    let repos_dir = h.state.config.repos_dir();
    let started = Instant::now();
    while std::fs::read_dir(&repos_dir).unwrap().count() > 0 {
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "working directories left behind"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(fetcher.running.load(Ordering::SeqCst), 0);
    assert_eq!(fetcher.peak.load(Ordering::SeqCst), 1);
}

// ─── File content ────────────────────────────────────────

fn file_query(repo: &str, path: &str) -> FileContentQuery {
    FileContentQuery {
        repo_name: repo.to_string(),
        file_path: path.to_string(),
    }
}

#[tokio::test]
async fn test_file_content_serves_indexed_files_only() {
    let h = harness();
    ingest(&h.state, "https://github.com/acme/widgets").await.unwrap();

    let Json(file) = api::repos::file_content(
        State(h.state.clone()),
        Ok(Query(file_query("widgets", "src/lib.rs"))),
    )
    .await
    .unwrap();
    assert_eq!(file.name, "lib.rs");
    assert!(file.content.contains("pub fn add"));

    let err = api::repos::file_content(
        State(h.state.clone()),
        Ok(Query(file_query("widgets", "Cargo.lock"))),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn test_traversal_is_path_violation_for_every_session() {
    let h = harness();
    ingest(&h.state, "https://github.com/acme/widgets").await.unwrap();

    for repo in ["widgets", "never-processed"] {
        let err = api::repos::file_content(
            State(h.state.clone()),
            Ok(Query(file_query(repo, "../../etc/passwd"))),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::PathViolation(_)), "{repo}: {err}");
    }
}

// ─── Sessions ────────────────────────────────────────────

#[tokio::test]
async fn test_reprocessing_replaces_session_atomically() {
    let h = harness();
    ingest(&h.state, "https://github.com/acme/widgets").await.unwrap();
    let old = h.state.registry.get("widgets").unwrap();
    let old_root = old.root().to_path_buf();

    ingest(&h.state, "https://gitlab.com/other/widgets.git").await.unwrap();
    let new = h.state.registry.get("widgets").unwrap();

    assert_eq!(h.state.registry.session_count(), 1);
    assert_eq!(new.head_commit.as_deref(), Some("rev2"));
    assert_eq!(new.url, "https://gitlab.com/other/widgets.git");

    // The earlier snapshot stays complete and readable until released.
    assert_eq!(old.head_commit.as_deref(), Some("rev1"));
    assert_eq!(
        std::fs::read_to_string(old_root.join("VERSION")).unwrap(),
        "1\n"
    );
    drop(old);
    assert!(!old_root.exists());
}

#[tokio::test]
async fn test_concurrent_ingests_of_one_name_serialise() {
    let h = harness();
    let (a, b) = tokio::join!(
        ingest(&h.state, "https://github.com/acme/widgets"),
        ingest(&h.state, "https://github.com/fork/widgets"),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(h.state.registry.session_count(), 1);
    let session = h.state.registry.get("widgets").unwrap();
    assert_eq!(session.head_commit.as_deref(), Some("rev2"));
    // Only the live session's working tree remains on disk.
    let dirs = std::fs::read_dir(h.state.config.repos_dir()).unwrap().count();
    assert_eq!(dirs, 1);
}

// ─── Retrieval + chunking properties ─────────────────────

#[tokio::test]
async fn test_retriever_is_deterministic() {
    let h = harness();
    ingest(&h.state, "https://github.com/acme/widgets").await.unwrap();
    let session = h.state.registry.get("widgets").unwrap();
    let key = ApiKey::new("test-key");

    let first = retrieve(&session, &BagEmbedder, "add numbers", 3, &key).await.unwrap();
    let second = retrieve(&session, &BagEmbedder, "add numbers", 3, &key).await.unwrap();

    let ids = |hits: &[repo_chat::models::ScoredChunk]| -> Vec<(String, usize)> {
        hits.iter()
            .map(|h| (h.chunk.file_path.clone(), h.chunk.ordinal))
            .collect()
    };
    assert_eq!(ids(&first), ids(&second));
    assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn test_chunks_reassemble_source_exactly() {
    let source: String = (0..200)
        .map(|i| format!("pub fn f{i}(x: u32) -> u32 {{\n    x + {i}\n}}\n\n"))
        .collect();
    let config = ChunkConfig {
        chunk_size: 300,
        chunk_overlap: 60,
        max_chunks: usize::MAX,
    };
    let chunks = chunk_file("src/gen.rs", &source, "rust", &config);
    assert!(chunks.len() > 10);
    assert_eq!(reassemble(&chunks), source);
}

// ─── HTTP surface ────────────────────────────────────────

#[tokio::test]
async fn test_http_liveness_and_malformed_payloads() {
    let h = harness();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(h.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let root: serde_json::Value = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["message"], "Repo Chat API is running");

    let resp = client
        .post(format!("http://{addr}/chat"))
        .header("content-type", "application/json")
        .body(r#"{"repo_name": "widgets""#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"].is_string());

    let resp = client
        .post(format!("http://{addr}/process-repo"))
        .json(&json!({ "url": "https://github.com/acme/widgets" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("http://{addr}/file-content?repo_name=widgets"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({
            "repo_name": "ghost",
            "question": "hi",
            "chat_history": [],
            "gemini_api_key": "secret-key-value"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let text = resp.text().await.unwrap();
    assert!(!text.contains("secret-key-value"));
}
