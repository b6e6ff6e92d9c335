//! Shared types for the chat widget runtime: errors, configuration, trace
//! events, conversation turns and structured-template decoding.

pub mod config;
pub mod error;
pub mod template;
pub mod trace;
pub mod turn;

/// Reserved input that makes the bot emit its opening line without any
/// user input.  Never shown in normalized history.
pub const CONVERSATION_STARTER: &str = "__CONVERSATION_STARTER__";

/// Bot name used when the metadata endpoint cannot be reached.
pub const DEFAULT_BOT_NAME: &str = "Twyla Bot";
