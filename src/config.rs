use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where cloned working trees are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Origin allowed by CORS (the browser UI)
    pub frontend_url: String,
    /// Embedding / generation provider configuration
    pub llm: LlmConfig,
    /// Which files make it into the tree and the index
    pub index: IndexPolicy,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    /// Maximum concurrent clone operations
    pub max_concurrent_clones: usize,
    /// Clone timeout in seconds
    pub clone_timeout_secs: u64,
    /// Maximum working tree size in MB (checked after clone)
    pub max_repo_size_mb: u64,
    /// Git personal access token for cloning private repos
    pub git_token: Option<String>,
    /// Accept `file://` repository URLs. Development and tests only.
    pub allow_local_urls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "gemini" or "ollama"
    pub provider: String,
    /// Base URL for the provider API
    pub base_url: String,
    /// Model used to answer questions
    pub chat_model: String,
    /// Model used for chunk and question embeddings
    pub embedding_model: String,
    /// Texts per embedding request
    pub embed_batch_size: usize,
    /// Embedding requests in flight during an index build
    pub embed_concurrency: usize,
    /// Attempts per chunk once its batch has failed
    pub embed_chunk_attempts: usize,
    /// Delay before the single retry of a transient provider failure
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

/// Ignore rules applied by the tree indexer. Everything the tree omits is
/// also absent from the index and unreachable through the content store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexPolicy {
    /// Files larger than this are left out of the tree
    pub max_file_bytes: u64,
    /// Directory names skipped wherever they appear
    pub ignored_dirs: Vec<String>,
    /// Lower-case extensions (without the dot) of binary / media files
    pub ignored_extensions: Vec<String>,
    /// Exact file names skipped (lockfiles)
    pub ignored_files: Vec<String>,
    /// Skip dot-files and dot-directories
    pub skip_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Target chunk length in bytes
    pub chunk_size: usize,
    /// Bytes repeated from the end of the previous chunk
    pub chunk_overlap: usize,
    /// Upper bound on chunks embedded per repository
    pub max_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks handed to the answer synthesizer
    pub top_k: usize,
    /// Most recent question/answer pairs kept in the prompt
    pub max_history_pairs: usize,
    /// Per-message cap for the question and history entries
    pub max_message_chars: usize,
    /// Cap on the retrieved-context section of the prompt
    pub max_context_chars: usize,
}

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:8000".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            llm: LlmConfig::default(),
            index: IndexPolicy::default(),
            chunking: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            max_concurrent_clones: 2,
            clone_timeout_secs: 300,
            max_repo_size_mb: 500,
            git_token: None,
            allow_local_urls: false,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            chat_model: "gemini-2.5-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            embed_batch_size: 32,
            embed_concurrency: 4,
            embed_chunk_attempts: 2,
            retry_backoff_ms: 500,
            request_timeout_secs: 120,
            temperature: 0.0,
        }
    }
}

impl Default for IndexPolicy {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            max_file_bytes: 1_048_576,
            ignored_dirs: strings(&[
                ".git",
                ".hg",
                ".svn",
                "node_modules",
                "bower_components",
                "target",
                "dist",
                "build",
                "__pycache__",
                "vendor",
                "venv",
                ".venv",
                "env",
            ]),
            ignored_extensions: strings(&[
                "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd", "pdf", "zip",
                "gz", "tgz", "bz2", "xz", "7z", "rar", "tar", "jar", "war", "class", "exe",
                "dll", "so", "dylib", "o", "a", "lib", "bin", "wasm", "pyc", "pyo", "mp3",
                "mp4", "wav", "ogg", "mov", "avi", "mkv", "flac", "woff", "woff2", "ttf",
                "otf", "eot", "sqlite", "db", "lock",
            ]),
            ignored_files: strings(&[
                "package-lock.json",
                "yarn.lock",
                "pnpm-lock.yaml",
                "Cargo.lock",
                "poetry.lock",
                "Pipfile.lock",
                "Gemfile.lock",
                "composer.lock",
                "go.sum",
            ]),
            skip_hidden: true,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 200,
            max_chunks: 2000,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            max_history_pairs: 10,
            max_message_chars: 4000,
            max_context_chars: 24_000,
        }
    }
}

impl ChunkConfig {
    /// Overlap clamped so every chunk advances past the previous one.
    pub fn effective_overlap(&self) -> usize {
        self.chunk_overlap.min(self.chunk_size / 2)
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("REPO_CHAT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("REPO_CHAT_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("FRONTEND_URL") {
            config.frontend_url = url;
        }

        // Provider
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            if provider == "ollama" {
                config.llm.base_url = OLLAMA_BASE_URL.to_string();
                config.llm.chat_model = "llama3.2".to_string();
                config.llm.embedding_model = "nomic-embed-text".to_string();
            }
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            config.llm.chat_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        set_parsed(&mut config.llm.embed_batch_size, "LLM_EMBED_BATCH_SIZE");
        set_parsed(&mut config.llm.embed_concurrency, "LLM_EMBED_CONCURRENCY");
        set_parsed(&mut config.llm.embed_chunk_attempts, "LLM_EMBED_CHUNK_ATTEMPTS");
        set_parsed(&mut config.llm.retry_backoff_ms, "LLM_RETRY_BACKOFF_MS");
        set_parsed(&mut config.llm.request_timeout_secs, "LLM_REQUEST_TIMEOUT_SECS");
        set_parsed(&mut config.llm.temperature, "LLM_TEMPERATURE");

        // Ignore policy
        set_parsed(&mut config.index.max_file_bytes, "REPO_CHAT_MAX_FILE_BYTES");
        if let Ok(val) = std::env::var("REPO_CHAT_IGNORED_DIRS") {
            config.index.ignored_dirs = parse_list(&val);
        }
        if let Ok(val) = std::env::var("REPO_CHAT_IGNORED_EXTENSIONS") {
            config.index.ignored_extensions = parse_list(&val)
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect();
        }
        if let Ok(val) = std::env::var("REPO_CHAT_IGNORED_FILES") {
            config.index.ignored_files = parse_list(&val);
        }
        set_parsed(&mut config.index.skip_hidden, "REPO_CHAT_SKIP_HIDDEN");

        // Chunking / retrieval
        set_parsed(&mut config.chunking.chunk_size, "REPO_CHAT_CHUNK_SIZE");
        set_parsed(&mut config.chunking.chunk_overlap, "REPO_CHAT_CHUNK_OVERLAP");
        set_parsed(&mut config.chunking.max_chunks, "REPO_CHAT_MAX_CHUNKS");
        set_parsed(&mut config.retrieval.top_k, "REPO_CHAT_TOP_K");
        set_parsed(&mut config.retrieval.max_history_pairs, "REPO_CHAT_MAX_HISTORY_PAIRS");
        set_parsed(&mut config.retrieval.max_context_chars, "REPO_CHAT_MAX_CONTEXT_CHARS");
        set_parsed(&mut config.retrieval.max_message_chars, "REPO_CHAT_MAX_MESSAGE_CHARS");

        // Fetcher
        set_parsed(&mut config.max_concurrent_clones, "REPO_CHAT_MAX_CONCURRENT_CLONES");
        set_parsed(&mut config.clone_timeout_secs, "REPO_CHAT_CLONE_TIMEOUT_SECS");
        set_parsed(&mut config.max_repo_size_mb, "REPO_CHAT_MAX_REPO_SIZE_MB");
        if let Ok(token) = std::env::var("REPO_CHAT_GIT_TOKEN") {
            config.git_token = Some(token);
        }
        set_parsed(&mut config.allow_local_urls, "REPO_CHAT_ALLOW_LOCAL_URLS");

        config
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }
}

fn set_parsed<T: FromStr>(target: &mut T, var: &str) {
    if let Ok(val) = std::env::var(var) {
        match val.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!("Ignoring unparsable value for {var}: {val:?}"),
        }
    }
}

/// Split a comma-separated environment value, dropping empty items.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_trims_and_drops_empty() {
        assert_eq!(
            parse_list(" node_modules, ,target,"),
            vec!["node_modules".to_string(), "target".to_string()]
        );
    }

    #[test]
    fn test_default_overlap_is_below_half_chunk() {
        let chunking = ChunkConfig::default();
        assert_eq!(chunking.effective_overlap(), 200);

        let greedy = ChunkConfig {
            chunk_size: 100,
            chunk_overlap: 90,
            max_chunks: 10,
        };
        assert_eq!(greedy.effective_overlap(), 50);
    }

    #[test]
    fn test_default_policy_ignores_vcs_and_lockfiles() {
        let policy = IndexPolicy::default();
        assert!(policy.ignored_dirs.iter().any(|d| d == ".git"));
        assert!(policy.ignored_files.iter().any(|f| f == "Cargo.lock"));
        assert_eq!(policy.max_file_bytes, 1024 * 1024);
    }

    #[test]
    fn test_message_cap_env_override() {
        std::env::set_var("REPO_CHAT_MAX_MESSAGE_CHARS", "123");
        let config = Config::from_env();
        std::env::remove_var("REPO_CHAT_MAX_MESSAGE_CHARS");
        assert_eq!(config.retrieval.max_message_chars, 123);
    }
}
