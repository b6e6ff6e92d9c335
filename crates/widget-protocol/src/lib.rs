//! Widget protocol: notification-channel frames and webhook request bodies.
//!
//! The notification channel is a WebSocket.  The client speaks once (the
//! handshake); everything afterwards flows server → client.  Server frames
//! carry no type tag and are told apart by which key they contain.

pub mod payload;

use cw_domain::turn::{decode_turns, ConversationTurn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use payload::{Payload, PayloadError, META_KEY};

/// Client → server: first frame on every (re)connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    /// `null` until the server has assigned a session id.
    pub user_id_cookie: Option<String>,
    pub api_key: String,
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Handshake accepted; carries the (possibly new) session id.
    HandshakeAck {
        user_id_cookie: String,
        history: Option<Vec<ConversationTurn>>,
    },
    /// The server rejected the session.
    Error { error: Value },
    /// Bot output.  `emission` may be plain text or a structured template.
    Emission {
        emission: String,
        debug: Option<Value>,
    },
    /// Valid JSON of no known shape.
    Unknown(Value),
}

impl ServerFrame {
    /// Parse a text frame.  Fails only on invalid JSON.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    /// Classify by shape: a truthy `user_id_cookie` wins, then a truthy
    /// `error`, then anything carrying an `emission`.
    pub fn from_value(value: Value) -> Self {
        if let Some(id) = value
            .get("user_id_cookie")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            let history = value.get("history").and_then(decode_turns);
            return ServerFrame::HandshakeAck {
                user_id_cookie: id.to_owned(),
                history,
            };
        }

        if let Some(error) = value.get("error").filter(|e| is_truthy(e)) {
            return ServerFrame::Error {
                error: error.clone(),
            };
        }

        let emission = match value.get("emission") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        match emission {
            Some(emission) => ServerFrame::Emission {
                emission,
                debug: value.get("debug").filter(|d| !d.is_null()).cloned(),
            },
            None => ServerFrame::Unknown(value),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Body of a webhook POST carrying one user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostBody {
    pub data: Value,
    pub api_key: String,
    pub input: String,
    pub user_id_cookie: Option<String>,
}

/// Body of a successful metadata fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotMetadata {
    pub name: String,
}
