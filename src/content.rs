//! Content store: on-demand reads of indexed files inside a session's
//! working tree.

use std::path::{Component, Path};

use crate::error::ChatError;
use crate::models::FileContent;
use crate::session::Session;

/// Normalize a client-supplied relative path to the `/`-separated form used
/// by the tree, rejecting anything that could leave the working tree.
pub fn validate_relative_path(raw: &str) -> Result<String, ChatError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ChatError::BadRequest("file_path is required".to_string()));
    }

    let unified = trimmed.replace('\\', "/");
    let looks_absolute = unified.starts_with('/')
        || unified.as_bytes().get(1) == Some(&b':')
        || Path::new(trimmed).is_absolute();
    if looks_absolute {
        return Err(ChatError::PathViolation(trimmed.to_string()));
    }

    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ChatError::PathViolation(trimmed.to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(ChatError::BadRequest("file_path is required".to_string()));
    }
    Ok(parts.join("/"))
}

/// Read one indexed file from a session's working tree.
pub async fn read_file(session: &Session, raw_path: &str) -> Result<FileContent, ChatError> {
    let relative = validate_relative_path(raw_path)?;
    if !session.tree.contains_file(&relative) {
        return Err(ChatError::NotFound(relative));
    }

    // Symlinked parents could still point outside the root.
    let root = tokio::fs::canonicalize(session.root())
        .await
        .map_err(|e| ChatError::Internal(format!("working tree unavailable: {e}")))?;
    let resolved = tokio::fs::canonicalize(root.join(&relative))
        .await
        .map_err(|_| ChatError::NotFound(relative.clone()))?;
    if !resolved.starts_with(&root) {
        return Err(ChatError::PathViolation(relative));
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|_| ChatError::NotFound(relative.clone()))?;
    let content = String::from_utf8(bytes).map_err(|_| ChatError::NotText(relative.clone()))?;

    let name = relative
        .rsplit('/')
        .next()
        .unwrap_or(relative.as_str())
        .to_string();
    Ok(FileContent {
        path: relative,
        name,
        content,
    })
}
