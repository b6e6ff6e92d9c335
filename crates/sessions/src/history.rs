//! Chat history: the ordered log of conversation turns for one tenant.
//!
//! Turns are stored raw (structured templates included); normalization
//! happens when history is read back for display.  The JSON store keeps an
//! in-memory write-through cache so reads never hit disk after the first
//! load.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use cw_domain::error::{Error, Result};
use cw_domain::trace::TraceEvent;
use cw_domain::turn::{decode_turns, ConversationTurn};

/// Persists the conversation log.
pub trait HistoryStore: Send + Sync {
    /// All stored turns, oldest first.  Unreadable storage reads as empty.
    fn get(&self) -> Vec<ConversationTurn>;
    fn push(&self, turn: ConversationTurn) -> Result<()>;
    /// Reset to an empty log.
    fn clean(&self) -> Result<()>;
}

/// History store backed by a JSON array file.
pub struct JsonHistoryStore {
    path: PathBuf,
    cache: RwLock<Option<Vec<ConversationTurn>>>,
}

impl JsonHistoryStore {
    pub fn new(dir: &Path, key: &str) -> Self {
        Self {
            path: dir.join(format!("{key}.json")),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn set(&self, turns: Vec<ConversationTurn>) -> Result<()> {
        // Disk first; the cache only changes once the write succeeded.
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(Error::Io)?;
        }
        let json = serde_json::to_string(&turns)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        *self.cache.write() = Some(turns);
        Ok(())
    }

    fn read_from_disk(&self) -> Option<Vec<ConversationTurn>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Some(Vec::new()),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read chat history");
                return None;
            }
        };
        let value = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "malformed chat history");
                return None;
            }
        };
        let turns = decode_turns(&value);
        if turns.is_none() {
            tracing::warn!(path = %self.path.display(), "chat history is not a list");
        }
        turns
    }
}

impl HistoryStore for JsonHistoryStore {
    fn get(&self) -> Vec<ConversationTurn> {
        // Fast path: return from cache.
        if let Some(turns) = self.cache.read().as_ref() {
            return turns.clone();
        }

        match self.read_from_disk() {
            Some(turns) => {
                *self.cache.write() = Some(turns.clone());
                turns
            }
            None => {
                if let Err(e) = self.clean() {
                    tracing::warn!(error = %e, "failed to reset chat history");
                }
                Vec::new()
            }
        }
    }

    fn push(&self, turn: ConversationTurn) -> Result<()> {
        let mut turns = self.get();
        turns.push(turn);
        self.set(turns)
    }

    fn clean(&self) -> Result<()> {
        self.set(Vec::new())?;
        TraceEvent::HistoryCleared {
            reason: format!("clean {}", self.path.display()),
        }
        .emit();
        Ok(())
    }
}

/// In-memory history store.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    turns: RwLock<Vec<ConversationTurn>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turns(turns: Vec<ConversationTurn>) -> Self {
        Self {
            turns: RwLock::new(turns),
        }
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn get(&self) -> Vec<ConversationTurn> {
        self.turns.read().clone()
    }

    fn push(&self, turn: ConversationTurn) -> Result<()> {
        self.turns.write().push(turn);
        Ok(())
    }

    fn clean(&self) -> Result<()> {
        self.turns.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_domain::turn::MadeBy;

    #[test]
    fn json_store_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path(), "chat_history_w_p");
        assert!(store.get().is_empty());

        store.push(ConversationTurn::user("hi")).unwrap();
        store.push(ConversationTurn::bot("hello")).unwrap();

        // A fresh instance reads the same file.
        let reopened = JsonHistoryStore::new(dir.path(), "chat_history_w_p");
        let turns = reopened.get();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].made_by, MadeBy::User);
        assert_eq!(turns[1].content, "hello");
    }

    #[test]
    fn corrupt_file_reads_empty_and_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path(), "h");
        std::fs::write(store.path(), "{\"not\":\"an array\"}").unwrap();

        assert!(store.get().is_empty());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "[]");
    }

    #[test]
    fn one_bad_turn_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path(), "h");
        std::fs::write(
            store.path(),
            r#"[{"content":"hi","made_by":"user"},{"content":null,"made_by":"user"},{"content":"hello","made_by":"chatbot"}]"#,
        )
        .unwrap();

        assert_eq!(
            store.get(),
            vec![ConversationTurn::user("hi"), ConversationTurn::bot("hello")]
        );
    }

    #[test]
    fn clean_empties_store() {
        let store = MemoryHistoryStore::with_turns(vec![ConversationTurn::bot("a")]);
        store.clean().unwrap();
        assert!(store.get().is_empty());
    }
}
