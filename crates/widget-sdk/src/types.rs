//! Callback and error types shared by the builder, the driver, and callers.

use std::sync::Arc;

use cw_protocol::PayloadError;

/// Receives every bot emission (and the extracted text of templates).
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Receives `true` when the notification channel opens, `false` when it
/// closes.
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;

pub(crate) fn noop_message() -> MessageCallback {
    Arc::new(|_| {})
}

pub(crate) fn noop_connection() -> ConnectionCallback {
    Arc::new(|_| {})
}

/// The two embedder callbacks.  Reset to no-ops when a session ends.
#[derive(Clone)]
pub(crate) struct Callbacks {
    pub on_message: MessageCallback,
    pub on_connection: ConnectionCallback,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            on_message: noop_message(),
            on_connection: noop_connection(),
        }
    }
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum WidgetError {
    #[error("Invalid hook URL")]
    InvalidHookUrl,
    #[error("no active session configuration")]
    NotInitialized,
    #[error("session ended")]
    SessionEnded,
    #[error("payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("config: {0}")]
    Config(String),
    #[error("shutdown")]
    Shutdown,
    #[error(transparent)]
    Domain(#[from] cw_domain::error::Error),
}
