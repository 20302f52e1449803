//! Session registry: repository name -> live {working tree, file tree, index}.
//!
//! Readers clone an `Arc<Session>` out of the map and drop the lock before any
//! await, so a re-ingest that swaps the entry never disturbs a request already
//! holding the old snapshot. The old working directory is removed once its
//! last holder lets go.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::error::ChatError;
use crate::search::vector::VectorIndex;
use crate::tree::FileTree;

/// Everything known about one ingested repository. Holds no API key.
#[derive(Debug)]
pub struct Session {
    pub name: String,
    pub url: String,
    workdir: TempDir,
    pub tree: FileTree,
    pub index: VectorIndex,
    pub created_at: DateTime<Utc>,
    pub head_commit: Option<String>,
}

impl Session {
    pub fn new(
        name: String,
        url: String,
        workdir: TempDir,
        tree: FileTree,
        index: VectorIndex,
        head_commit: Option<String>,
    ) -> Self {
        Self {
            name,
            url,
            workdir,
            tree,
            index,
            created_at: Utc::now(),
            head_commit,
        }
    }

    /// Root of the session's working tree.
    pub fn root(&self) -> &Path {
        self.workdir.path()
    }

    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    build_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current session for `name`.
    pub fn get(&self, name: &str) -> Result<Arc<Session>, ChatError> {
        self.sessions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ChatError::SessionNotFound(name.to_string()))
    }

    /// Publish a session, replacing any previous one under the same name.
    /// Returns the replaced session, if any.
    pub fn insert(&self, session: Session) -> Option<Arc<Session>> {
        let name = session.name.clone();
        let previous = self.sessions.write().insert(name.clone(), Arc::new(session));
        if previous.is_some() {
            tracing::info!("Replaced session '{name}'");
        }
        previous
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.read().contains_key(name)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Lock serialising ingests of one repository name. Different names get
    /// different locks and proceed in parallel.
    pub fn build_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.build_locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Hand back a lock obtained from [`build_lock`](Self::build_lock). The
    /// entry is forgotten once no other ingest holds or awaits it.
    pub fn release_build_lock(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.build_locks.lock();
        drop(lock);
        if locks.get(name).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(name);
        }
    }
}
