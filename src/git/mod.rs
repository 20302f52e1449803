//! Repository fetching: URL validation, name derivation, and cloning.

mod clone;

pub use clone::{
    clone_repo, dir_size_bytes, head_commit_sha, parse_repo_url, repo_name_from_url,
    FetchOutcome, GitFetcher, RepoUrl, SourceFetcher,
};
