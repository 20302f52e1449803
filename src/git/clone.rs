use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use walkdir::WalkDir;

use crate::error::ChatError;

/// A repository URL that passed validation, with the session name derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    pub url: String,
    pub name: String,
}

impl RepoUrl {
    pub fn is_local(&self) -> bool {
        self.url.starts_with("file://")
    }
}

/// Validate a submitted URL and derive the repository name.
///
/// `github.com/acme/widgets` is read as `https://github.com/acme/widgets`.
/// Only network schemes are accepted unless `allow_local` is set.
pub fn parse_repo_url(raw: &str, allow_local: bool) -> Result<RepoUrl, ChatError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ChatError::BadRequest("url is required".to_string()));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(ChatError::InvalidUrl("URL must not contain whitespace".to_string()));
    }

    let url = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let allowed = url.starts_with("https://")
        || url.starts_with("http://")
        || url.starts_with("git://")
        || (allow_local && url.starts_with("file://"));
    if !allowed {
        return Err(ChatError::InvalidUrl(
            "only https://, http://, and git:// URLs are allowed".to_string(),
        ));
    }

    // Reject user:password@host so credentials never end up in logs.
    if let Some(rest) = url.split("://").nth(1) {
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.contains('@') {
            return Err(ChatError::InvalidUrl(
                "credentials in the URL are not supported".to_string(),
            ));
        }
    }

    let name = repo_name_from_url(&url)?;
    Ok(RepoUrl { url, name })
}

/// Last path segment of the URL with any `.git` suffix removed.
pub fn repo_name_from_url(url: &str) -> Result<String, ChatError> {
    let path = url.split("://").nth(1).unwrap_or(url);
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let host = segments.next();
    let last = segments.last().or(if url.starts_with("file://") { host } else { None });

    let name = last
        .map(|s| s.strip_suffix(".git").unwrap_or(s))
        .unwrap_or_default();

    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(ChatError::InvalidUrl(format!(
            "cannot derive a repository name from {url}"
        )));
    }
    Ok(name.to_string())
}

/// Outcome of a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub head_commit: Option<String>,
}

/// Produces a working tree for a repository URL in an empty directory.
///
/// Runs on a blocking thread. Implementations stop transferring once
/// `deadline` passes.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, repo: &RepoUrl, dest: &Path, deadline: Instant)
        -> Result<FetchOutcome, ChatError>;
}

/// libgit2-backed fetcher: shallow clone, record HEAD, drop `.git`.
pub struct GitFetcher {
    token: Option<String>,
}

impl GitFetcher {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl SourceFetcher for GitFetcher {
    fn fetch(
        &self,
        repo: &RepoUrl,
        dest: &Path,
        deadline: Instant,
    ) -> Result<FetchOutcome, ChatError> {
        // The local transport does not support shallow fetches.
        let shallow = !repo.is_local();
        clone_repo(&repo.url, dest, self.token.as_deref(), shallow, deadline)
            .map_err(|e| ChatError::Fetch(format!("{e:#}")))?;

        let head_commit = match head_commit_sha(dest) {
            Ok(sha) => Some(sha),
            Err(e) => {
                tracing::warn!("Could not read HEAD for {}: {e:#}", repo.name);
                None
            }
        };

        let git_dir = dest.join(".git");
        if git_dir.exists() {
            std::fs::remove_dir_all(&git_dir)
                .map_err(|e| ChatError::Fetch(format!("failed to remove .git: {e}")))?;
        }

        Ok(FetchOutcome { head_commit })
    }
}

/// Clone a git repository into `target`, which must be empty or absent.
///
/// The transfer is aborted from the progress callbacks once `deadline` passes.
pub fn clone_repo(
    url: &str,
    target: &Path,
    token: Option<&str>,
    shallow: bool,
    deadline: Instant,
) -> Result<()> {
    if Instant::now() >= deadline {
        anyhow::bail!("clone of {url} exceeded its time limit before it started");
    }
    tracing::info!("Cloning {} into {}", url, target.display());

    let mut callbacks = git2::RemoteCallbacks::new();
    if let Some(token) = token {
        let token = token.to_string();
        let mut attempts = 0;
        callbacks.credentials(move |_url, _username, _allowed| {
            attempts += 1;
            if attempts > 1 {
                return Err(git2::Error::from_str("authentication to the source host failed"));
            }
            git2::Cred::userpass_plaintext("x-access-token", &token)
        });
    }

    // Returning false from either callback makes libgit2 abort the transfer.
    callbacks.transfer_progress(move |_| Instant::now() < deadline);
    callbacks.sideband_progress(move |_| Instant::now() < deadline);

    let mut fetch = git2::FetchOptions::new();
    fetch.remote_callbacks(callbacks);
    if shallow {
        fetch.depth(1);
    }

    git2::build::RepoBuilder::new()
        .fetch_options(fetch)
        .clone(url, target)
        .map_err(|e| {
            if Instant::now() >= deadline {
                anyhow::anyhow!("clone of {url} exceeded its time limit")
            } else {
                anyhow::Error::new(e).context(format!("Failed to clone {url}"))
            }
        })?;

    tracing::info!("Clone complete: {}", target.display());
    Ok(())
}

/// SHA of the commit HEAD points at.
pub fn head_commit_sha(repo_dir: &Path) -> Result<String> {
    let repo = git2::Repository::open(repo_dir).context("Failed to open cloned repository")?;
    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .context("Repository has no HEAD commit")?;
    Ok(commit.id().to_string())
}

/// Total size of regular files under `dir`.
pub fn dir_size_bytes(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
