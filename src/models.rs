use serde::{Deserialize, Serialize};
use std::fmt;

/// A node in a repository's file tree.
///
/// Wire shape: `{"type": "file", "name": ..}` or
/// `{"type": "folder", "name": .., "children": [..]}`. A file's relative path
/// is the chain of its ancestors' names and is not stored on the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    File {
        name: String,
        #[serde(skip)]
        size: u64,
    },
    Folder {
        name: String,
        children: Vec<TreeNode>,
    },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::File { name, .. } | TreeNode::Folder { name, .. } => name,
        }
    }
}

/// A caller-supplied model provider key.
///
/// Passed explicitly down every call chain that talks to a provider and never
/// stored. `Debug` is redacted so the key cannot leak through logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// A bounded span of one file's text, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub file_path: String,
    /// Position of the chunk within its file, starting at 0
    pub ordinal: usize,
    /// Byte offset of `content` in the file
    pub start: usize,
    /// Leading bytes of `content` repeated from the previous chunk
    pub overlap: usize,
    pub content: String,
    pub language: String,
    /// 1-based first line
    pub start_line: usize,
    /// 1-based last line
    pub end_line: usize,
}

impl Chunk {
    /// The part of the chunk not shared with its predecessor.
    pub fn fresh_content(&self) -> &str {
        &self.content[self.overlap..]
    }
}

/// A retrieved chunk with its similarity to the question.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One prior question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

impl ChatTurn {
    /// Accepts a `[question, answer]` pair of non-blank strings.
    pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
        let pair = value.as_array()?;
        if pair.len() != 2 {
            return None;
        }
        let question = pair[0].as_str()?.trim();
        let answer = pair[1].as_str()?.trim();
        if question.is_empty() || answer.is_empty() {
            return None;
        }
        Some(Self {
            question: question.to_string(),
            answer: answer.to_string(),
        })
    }
}

/// POST /process-repo request
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRepoRequest {
    pub url: String,
    pub gemini_api_key: ApiKey,
}

/// POST /process-repo response
#[derive(Debug, Clone, Serialize)]
pub struct ProcessRepoResponse {
    pub message: String,
    pub repo_name: String,
    pub file_tree: Vec<TreeNode>,
}

/// POST /chat request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub repo_name: String,
    pub question: String,
    /// `[question, answer]` pairs, oldest first. Kept loosely typed so one
    /// malformed pair is dropped instead of failing the whole request.
    #[serde(default)]
    pub chat_history: Vec<serde_json::Value>,
    pub gemini_api_key: ApiKey,
}

/// POST /chat response
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

/// GET /file-content query string
#[derive(Debug, Clone, Deserialize)]
pub struct FileContentQuery {
    pub repo_name: String,
    pub file_path: String,
}

/// GET /file-content response
#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    pub name: String,
    pub content: String,
}
