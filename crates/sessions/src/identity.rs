//! Identity store: the server-assigned session id for one widget tenant.
//!
//! The id is opaque: the client never mints one, it only remembers what the
//! server handed out so the next handshake resumes the same conversation.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use cw_domain::error::{Error, Result};

/// Persists the session id.
pub trait IdentityStore: Send + Sync {
    /// The remembered id, if any.
    fn get(&self) -> Option<String>;
    fn set(&self, id: &str) -> Result<()>;
    fn remove(&self) -> Result<()>;
}

/// Identity store backed by a single small file.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(dir: &Path, key: &str) -> Self {
        Self {
            path: dir.join(key),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn get(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                let id = raw.trim();
                (!id.is_empty()).then(|| id.to_owned())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read session id");
                None
            }
        }
    }

    fn set(&self, id: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(Error::Io)?;
        }
        std::fs::write(&self.path, id).map_err(Error::Io)
    }

    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// In-memory identity store.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    id: RwLock<Option<String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self) -> Option<String> {
        self.id.read().clone()
    }

    fn set(&self, id: &str) -> Result<()> {
        *self.id.write() = Some(id.to_owned());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.id.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdentityStore::new(&dir.path().join("nested"), "session_id_w_p");
        assert_eq!(store.get(), None);

        store.set("abc-123").unwrap();
        assert_eq!(store.get().as_deref(), Some("abc-123"));

        store.remove().unwrap();
        assert_eq!(store.get(), None);
        // Removing twice is fine.
        store.remove().unwrap();
    }

    #[test]
    fn memory_store() {
        let store = MemoryIdentityStore::new();
        store.set("x").unwrap();
        assert_eq!(store.get().as_deref(), Some("x"));
        store.remove().unwrap();
        assert_eq!(store.get(), None);
    }
}
