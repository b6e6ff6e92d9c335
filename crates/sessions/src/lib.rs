//! Client-side session storage for the chat widget.
//!
//! Two small stores per tenant (workspace/project): the server-assigned
//! session id, and the append-only conversation log.  Both sit behind
//! traits so the session controller can run against files, memory, or an
//! embedder-provided backend.

pub mod history;
pub mod identity;
pub mod store;

pub use history::{HistoryStore, JsonHistoryStore, MemoryHistoryStore};
pub use identity::{FileIdentityStore, IdentityStore, MemoryIdentityStore};
pub use store::{history_key, identity_key, FileStorage, MemoryStorage, SessionStorage};
