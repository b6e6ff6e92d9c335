//! `cw-widget-sdk`: client runtime for an embeddable chat widget.
//!
//! The widget keeps a push channel (WebSocket) open to the bot's
//! notification service, posts user input to the bot's webhook over HTTP,
//! and keeps a per-project session id and chat history in local storage so
//! a conversation survives restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  WidgetHandle (clone freely)                                 │
//! │      │ commands                                              │
//! │      ▼                                                       │
//! │  driver task ── owns ──▶ SessionController (pure, sync)      │
//! │      ▲   │ effects                                           │
//! │      │   ├─▶ connection task  (tokio-tungstenite)            │
//! │      │   ├─▶ post worker      (Webhook, sequential)          │
//! │      │   ├─▶ metadata fetch   (Webhook)                      │
//! │      │   └─▶ retry timer                                     │
//! │      └──── events (Opened / Frame / Closed / RetryElapsed)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Session flow
//!
//! 1. `init`: derive the channel URL from the hook URL and connect
//! 2. On open: send `{user_id_cookie, api_key}`
//! 3. On ack `{user_id_cookie}`: adopt/persist the id (a new id wipes the
//!    history), fetch the bot's name, resolve `init` with the normalized
//!    history, then flush queued messages in order
//! 4. On `{emission}`: invoke the message callback and record a bot turn
//! 5. On close: retry after a fixed delay until the session is ended
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), cw_widget_sdk::WidgetError> {
//! use cw_widget_sdk::{SessionConfig, WidgetClientBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! let widget = WidgetClientBuilder::new().build()?.spawn(CancellationToken::new());
//! let outcome = widget
//!     .init(
//!         SessionConfig::new("https://api.canvas.twyla.ai/widget-hook/acme/faq", "key"),
//!         |text| println!("bot: {text}"),
//!     )
//!     .await?;
//! println!("talking to {}", outcome.bot_name);
//! widget.send("hello");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod controller;
pub mod endpoint;
pub mod normalize;
pub mod reconnect;
pub mod reporter;
pub mod types;
pub mod webhook;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::WidgetClientBuilder;
pub use client::{WidgetClient, WidgetHandle};
pub use controller::{InitOutcome, Phase, SessionConfig, SessionController};
pub use endpoint::{resolve, EndpointDescriptor};
pub use normalize::normalize;
pub use reconnect::ReconnectPolicy;
pub use reporter::{ErrorReporter, TracingReporter};
pub use types::{ConnectionCallback, MessageCallback, WidgetError};
pub use webhook::{HttpWebhook, Webhook};

// Re-export the wire and storage types embedders touch.
pub use cw_domain::turn::{ConversationTurn, MadeBy};
pub use cw_protocol::{BotMetadata, PayloadError, PostBody};
