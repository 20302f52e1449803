//! Tree indexer: walks a working tree into an ordered [`TreeNode`] hierarchy.
//!
//! Ordering is folders first, then files, each sorted case-insensitively by
//! name, so the same filesystem state always yields the same tree. Entries the
//! [`IndexPolicy`] rejects never appear, and neither do children the walker
//! cannot read.

use std::collections::BTreeSet;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use crate::config::IndexPolicy;
use crate::error::ChatError;
use crate::models::TreeNode;

/// The indexed view of one working tree.
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    pub nodes: Vec<TreeNode>,
    files: BTreeSet<String>,
}

/// A file leaf with its `/`-separated path relative to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    pub relative_path: String,
    pub size: u64,
}

impl FileTree {
    pub fn contains_file(&self, relative_path: &str) -> bool {
        self.files.contains(relative_path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// File leaves in tree order.
    pub fn files(&self) -> Vec<TreeFile> {
        let mut out = Vec::with_capacity(self.files.len());
        collect_files(&self.nodes, "", &mut out);
        out
    }
}

fn collect_files(nodes: &[TreeNode], prefix: &str, out: &mut Vec<TreeFile>) {
    for node in nodes {
        let path = if prefix.is_empty() {
            node.name().to_string()
        } else {
            format!("{prefix}/{}", node.name())
        };
        match node {
            TreeNode::File { size, .. } => out.push(TreeFile {
                relative_path: path,
                size: *size,
            }),
            TreeNode::Folder { children, .. } => collect_files(children, &path, out),
        }
    }
}

/// Folder under construction while the walk is inside it.
struct OpenFolder {
    depth: usize,
    name: String,
    children: Vec<TreeNode>,
}

/// Walk `root` and build its tree.
pub fn build_tree(root: &Path, policy: &IndexPolicy) -> Result<FileTree, ChatError> {
    std::fs::read_dir(root)
        .map_err(|e| ChatError::Index(format!("cannot read {}: {e}", root.display())))?;

    let mut files = BTreeSet::new();
    // stack[0] is the root pseudo-folder.
    let mut stack = vec![OpenFolder {
        depth: 0,
        name: String::new(),
        children: Vec::new(),
    }];
    let mut path_parts: Vec<String> = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by(|a, b| {
            let a_dir = a.file_type().is_dir();
            let b_dir = b.file_type().is_dir();
            b_dir.cmp(&a_dir).then_with(|| {
                let a_name = a.file_name().to_string_lossy().to_lowercase();
                let b_name = b.file_name().to_string_lossy().to_lowercase();
                a_name.cmp(&b_name).then_with(|| a.file_name().cmp(b.file_name()))
            })
        })
        .into_iter()
        .filter_entry(|e| !is_ignored(e, policy));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping unreadable entry: {e}");
                continue;
            }
        };

        let depth = entry.depth();
        close_folders(&mut stack, &mut path_parts, depth);

        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type();
        if file_type.is_dir() {
            path_parts.push(name.clone());
            stack.push(OpenFolder {
                depth,
                name,
                children: Vec::new(),
            });
        } else if file_type.is_file() {
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::debug!("Skipping {}: {e}", entry.path().display());
                    continue;
                }
            };
            if size > policy.max_file_bytes {
                continue;
            }
            let relative = if path_parts.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", path_parts.join("/"), name)
            };
            files.insert(relative);
            if let Some(parent) = stack.last_mut() {
                parent.children.push(TreeNode::File { name, size });
            }
        }
        // Symlinks and special files are not part of the tree.
    }

    close_folders(&mut stack, &mut path_parts, 1);
    let nodes = stack.pop().map(|root| root.children).unwrap_or_default();

    Ok(FileTree { nodes, files })
}

/// Attach every open folder at `depth` or deeper to its parent.
fn close_folders(stack: &mut Vec<OpenFolder>, path_parts: &mut Vec<String>, depth: usize) {
    while stack.len() > 1 && stack.last().is_some_and(|f| f.depth >= depth) {
        if let Some(done) = stack.pop() {
            path_parts.pop();
            if let Some(parent) = stack.last_mut() {
                parent.children.push(TreeNode::Folder {
                    name: done.name,
                    children: done.children,
                });
            }
        }
    }
}

fn is_ignored(entry: &DirEntry, policy: &IndexPolicy) -> bool {
    let name = entry.file_name().to_string_lossy();
    if policy.skip_hidden && name.starts_with('.') {
        return true;
    }
    if entry.file_type().is_dir() {
        return policy.ignored_dirs.iter().any(|d| d == name.as_ref());
    }
    if policy.ignored_files.iter().any(|f| f == name.as_ref()) {
        return true;
    }
    let ext = entry
        .path()
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    !ext.is_empty() && policy.ignored_extensions.iter().any(|e| *e == ext)
}

/// Language tag used to label chunks in prompts.
pub fn detect_language(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "jsx",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "tsx",
        "go" => "go",
        "java" => "java",
        "c" => "c",
        "cpp" | "cc" | "h" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "lua" => "lua",
        "sh" | "bash" | "zsh" | "fish" => "shell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" | "scss" | "less" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "md" | "rst" | "txt" => "text",
        "proto" => "protobuf",
        "graphql" | "gql" => "graphql",
        "vue" => "vue",
        "svelte" => "svelte",
        "zig" => "zig",
        "dart" => "dart",
        "ex" | "exs" => "elixir",
        "hs" => "haskell",
        "tf" | "hcl" => "hcl",
        "nix" => "nix",
        _ => "text",
    }
}
