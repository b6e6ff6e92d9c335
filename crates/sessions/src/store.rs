//! Per-tenant storage: opens the identity and history stores for one
//! workspace/project pair so widgets for different bots never share state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::history::{HistoryStore, JsonHistoryStore, MemoryHistoryStore};
use crate::identity::{FileIdentityStore, IdentityStore, MemoryIdentityStore};

/// Storage key for the session id of a tenant.
pub fn identity_key(workspace: &str, project: &str) -> String {
    format!("session_id_{workspace}_{project}")
}

/// Storage key for the chat history of a tenant.
pub fn history_key(workspace: &str, project: &str) -> String {
    format!("chat_history_{workspace}_{project}")
}

/// Opens the stores for a tenant.
pub trait SessionStorage: Send + Sync {
    fn identity(&self, workspace: &str, project: &str) -> Arc<dyn IdentityStore>;
    fn history(&self, workspace: &str, project: &str) -> Arc<dyn HistoryStore>;
}

/// File-backed storage under `<state_path>/sessions/`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(state_path: &Path) -> Self {
        let dir = state_path.join("sessions");
        tracing::info!(path = %dir.display(), "widget storage opened");
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SessionStorage for FileStorage {
    fn identity(&self, workspace: &str, project: &str) -> Arc<dyn IdentityStore> {
        Arc::new(FileIdentityStore::new(
            &self.dir,
            &identity_key(workspace, project),
        ))
    }

    fn history(&self, workspace: &str, project: &str) -> Arc<dyn HistoryStore> {
        Arc::new(JsonHistoryStore::new(
            &self.dir,
            &history_key(workspace, project),
        ))
    }
}

/// In-memory storage.  Returns the same store instance for the same tenant,
/// so state survives `clear_session` → `init` cycles within one process.
#[derive(Default)]
pub struct MemoryStorage {
    identities: Mutex<HashMap<String, Arc<MemoryIdentityStore>>>,
    histories: Mutex<HashMap<String, Arc<MemoryHistoryStore>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_store(&self, workspace: &str, project: &str) -> Arc<MemoryIdentityStore> {
        self.identities
            .lock()
            .entry(identity_key(workspace, project))
            .or_default()
            .clone()
    }

    pub fn history_store(&self, workspace: &str, project: &str) -> Arc<MemoryHistoryStore> {
        self.histories
            .lock()
            .entry(history_key(workspace, project))
            .or_default()
            .clone()
    }
}

impl SessionStorage for MemoryStorage {
    fn identity(&self, workspace: &str, project: &str) -> Arc<dyn IdentityStore> {
        self.identity_store(workspace, project)
    }

    fn history(&self, workspace: &str, project: &str) -> Arc<dyn HistoryStore> {
        self.history_store(workspace, project)
    }
}
