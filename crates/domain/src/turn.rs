//! Conversation turns as stored in history and returned to the embedder.

use serde::{Deserialize, Serialize};

/// Who produced a turn.  The wire names match what the bot backend stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MadeBy {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "chatbot")]
    Bot,
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub content: String,
    pub made_by: MadeBy,
    /// Opaque debug payload attached by the backend to an emission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            made_by: MadeBy::User,
            debug: None,
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            made_by: MadeBy::Bot,
            debug: None,
        }
    }

    pub fn with_debug(mut self, debug: Option<serde_json::Value>) -> Self {
        self.debug = debug;
        self
    }
}

/// Decode a JSON array of turns one element at a time, skipping the ones
/// that do not parse.  `None` when `value` is not an array.
pub fn decode_turns(value: &serde_json::Value) -> Option<Vec<ConversationTurn>> {
    let items = value.as_array()?;
    let mut turns = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match ConversationTurn::deserialize(item) {
            Ok(turn) => turns.push(turn),
            Err(e) => tracing::warn!(index, error = %e, "skipping malformed turn"),
        }
    }
    Some(turns)
}
