//! Session controller: the widget's connection and conversation state
//! machine.
//!
//! ```text
//! Idle ──init──▶ Connecting ──open──▶ Connected ◀──open── Disconnected
//!                                        │                    ▲
//!                                        └───────close────────┘
//!            end_session / clear_session ──▶ Ended
//! ```
//!
//! The controller performs no I/O.  Commands and [`Event`]s mutate state and
//! return the [`Effect`]s the driver must carry out (open a socket, post a
//! message, resolve a waiting caller…).  Storage is the one exception: the
//! identity and history stores are called synchronously.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use cw_domain::config::PageConfig;
use cw_domain::template::{self, Template};
use cw_domain::trace::TraceEvent;
use cw_domain::turn::ConversationTurn;
use cw_domain::{CONVERSATION_STARTER, DEFAULT_BOT_NAME};
use cw_protocol::{Handshake, Payload, PayloadError, PostBody, ServerFrame};
use cw_sessions::{HistoryStore, IdentityStore, SessionStorage};
use serde_json::Value;

use crate::endpoint::{self, EndpointDescriptor};
use crate::normalize::normalize;
use crate::reconnect::ReconnectPolicy;
use crate::reporter::ErrorReporter;

/// Identifies one connection attempt.  Events from older attempts are
/// ignored.
pub type ConnectionId = u64;

/// Identifies one `init` call.  Metadata results for an older one are
/// ignored.
pub type InitGeneration = u64;

/// What the embedder passes to `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub hook_url: String,
    pub api_key: String,
    /// `false` disables bot-side conversation logging.
    pub logging: bool,
}

impl SessionConfig {
    pub fn new(hook_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            hook_url: hook_url.into(),
            api_key: api_key.into(),
            logging: true,
        }
    }
}

/// Resolved value of a successful `init`.
#[derive(Debug, Clone, PartialEq)]
pub struct InitOutcome {
    pub bot_name: String,
    /// Normalized history, followed by any messages queued before the
    /// handshake completed.
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Ended,
}

/// Inputs from the connection and timers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Opened { connection: ConnectionId },
    Closed { connection: ConnectionId },
    Frame { connection: ConnectionId, text: String },
    RetryElapsed { connection: ConnectionId },
    /// Result of the metadata fetch requested during the handshake.
    MetadataFetched {
        init: InitGeneration,
        result: Result<String, String>,
    },
}

/// Work the driver must perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Connect {
        connection: ConnectionId,
        url: String,
    },
    Disconnect {
        connection: ConnectionId,
    },
    SendFrame {
        connection: ConnectionId,
        frame: Handshake,
    },
    Post {
        hook_url: String,
        body: PostBody,
    },
    FetchMetadata {
        init: InitGeneration,
        hook_url: String,
        api_key: String,
    },
    ScheduleReconnect {
        connection: ConnectionId,
        delay: Duration,
    },
    /// Invoke the connection-change callback.
    ConnectionChanged(bool),
    /// Invoke the message callback.
    Message(String),
    ResolveInit(InitOutcome),
    RejectInit(String),
    /// Drop interest in the pending `init` without settling it.
    AbandonInit,
    ResolveUserId(String),
    AbandonUserIdWait,
    /// Replace both callbacks with no-ops.
    ResetCallbacks,
}

pub struct SessionController {
    storage: Arc<dyn SessionStorage>,
    reporter: Arc<dyn ErrorReporter>,
    reconnect: ReconnectPolicy,
    fallback_bot_name: String,
    page: PageConfig,

    phase: Phase,
    config: Option<SessionConfig>,
    endpoint: Option<EndpointDescriptor>,
    session_id: Option<String>,
    identity: Option<Arc<dyn IdentityStore>>,
    history: Option<Arc<dyn HistoryStore>>,
    payload: Payload,
    connected: bool,
    in_session: bool,
    queue: VecDeque<String>,
    connection: ConnectionId,
    attempt: u32,
    init_generation: InitGeneration,
    init_pending: bool,
    /// Init history waiting for the metadata fetch to finish.
    awaiting_metadata: Option<Vec<ConversationTurn>>,
    user_id_waiting: bool,
}

impl SessionController {
    pub fn new(storage: Arc<dyn SessionStorage>, reporter: Arc<dyn ErrorReporter>) -> Self {
        let page = PageConfig::default();
        Self {
            storage,
            reporter,
            reconnect: ReconnectPolicy::default(),
            fallback_bot_name: DEFAULT_BOT_NAME.into(),
            payload: Payload::new(page.origin.clone(), page.pathname.clone()),
            page,
            phase: Phase::Idle,
            config: None,
            endpoint: None,
            session_id: None,
            identity: None,
            history: None,
            connected: false,
            in_session: false,
            queue: VecDeque::new(),
            connection: 0,
            attempt: 0,
            init_generation: 0,
            init_pending: false,
            awaiting_metadata: None,
            user_id_waiting: false,
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_fallback_bot_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_bot_name = name.into();
        self
    }

    pub fn with_page(mut self, page: PageConfig) -> Self {
        self.payload = Payload::new(page.origin.clone(), page.pathname.clone());
        self.page = page;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn in_session(&self) -> bool {
        self.in_session
    }

    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    pub fn endpoint(&self) -> Option<&EndpointDescriptor> {
        self.endpoint.as_ref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn init_generation(&self) -> InitGeneration {
        self.init_generation
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start a session: resolve the channel endpoint and connect.
    pub fn init(&mut self, config: SessionConfig) -> Vec<Effect> {
        let mut fx = Vec::new();

        if self.init_pending {
            fx.push(Effect::AbandonInit);
        }
        if matches!(
            self.phase,
            Phase::Connecting | Phase::Connected | Phase::Disconnected
        ) {
            fx.push(Effect::Disconnect {
                connection: self.connection,
            });
            self.connected = false;
        }

        self.in_session = true;
        self.init_generation += 1;
        self.init_pending = true;
        self.awaiting_metadata = None;
        if !config.logging {
            self.payload.set_logging(false);
        }

        let hook_url = config.hook_url.clone();
        self.config = Some(config);

        let endpoint = match endpoint::resolve(&hook_url) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!(hook_url = %hook_url, error = %e, "init rejected");
                self.reporter.report("Invalid hook URL", &hook_url);
                self.init_pending = false;
                self.in_session = false;
                self.phase = Phase::Idle;
                fx.push(Effect::RejectInit("Invalid hook URL".into()));
                return fx;
            }
        };

        TraceEvent::EndpointResolved {
            channel_url: endpoint.channel_url.clone(),
            workspace: endpoint.workspace_name.clone(),
            project: endpoint.project_name.clone(),
        }
        .emit();

        let tenant_changed = self.endpoint.as_ref().map_or(true, |prev| {
            prev.workspace_name != endpoint.workspace_name
                || prev.project_name != endpoint.project_name
        });
        if tenant_changed || self.identity.is_none() {
            let identity = self
                .storage
                .identity(&endpoint.workspace_name, &endpoint.project_name);
            self.history = Some(
                self.storage
                    .history(&endpoint.workspace_name, &endpoint.project_name),
            );
            self.session_id = identity.get();
            self.identity = Some(identity);
        } else if self.session_id.is_none() {
            self.session_id = self.identity.as_ref().and_then(|i| i.get());
        }

        self.endpoint = Some(endpoint);
        self.attempt = 0;
        fx.extend(self.open_connection());
        fx
    }

    /// Send a message now if connected, otherwise queue it.
    pub fn send(&mut self, message: impl Into<String>) -> Vec<Effect> {
        let message = message.into();

        if self.connected {
            if let Some(config) = &self.config {
                let body = PostBody {
                    data: self.payload.to_value(),
                    api_key: config.api_key.clone(),
                    input: message.clone(),
                    user_id_cookie: self.session_id.clone(),
                };
                let hook_url = config.hook_url.clone();
                self.push_history(ConversationTurn::user(message));
                return vec![Effect::Post { hook_url, body }];
            }
        }

        // A lone starter is superseded by any newer message.
        let dropped_starter = self.queue.len() == 1
            && self.queue.front().map(String::as_str) == Some(CONVERSATION_STARTER);
        if dropped_starter {
            self.queue.clear();
        }
        self.queue.push_back(message);

        TraceEvent::MessageQueued {
            queue_len: self.queue.len(),
            dropped_starter,
        }
        .emit();

        Vec::new()
    }

    /// Ask the bot for its opening line.  Call right after `init`.
    pub fn initiate_conversation(&mut self) -> Vec<Effect> {
        self.send(CONVERSATION_STARTER)
    }

    /// Wait for the session id.  Resolves immediately when already known.
    pub fn request_user_id(&mut self) -> Vec<Effect> {
        match &self.session_id {
            Some(id) => vec![Effect::ResolveUserId(id.clone())],
            None => {
                self.user_id_waiting = true;
                Vec::new()
            }
        }
    }

    /// Close the session for good.  Pending waits are dropped unsettled.
    pub fn end_session(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();

        // Must be cleared before the socket closes so no retry is scheduled.
        self.in_session = false;

        if matches!(
            self.phase,
            Phase::Connecting | Phase::Connected | Phase::Disconnected
        ) {
            fx.push(Effect::Disconnect {
                connection: self.connection,
            });
        }
        self.connected = false;
        self.phase = Phase::Ended;

        fx.push(Effect::ResetCallbacks);
        self.queue.clear();

        if self.user_id_waiting {
            self.user_id_waiting = false;
            fx.push(Effect::AbandonUserIdWait);
        }
        if self.init_pending {
            self.init_pending = false;
            fx.push(Effect::AbandonInit);
        }
        self.init_generation += 1;
        self.awaiting_metadata = None;

        tracing::info!(connection = self.connection, "session ended");
        fx
    }

    /// End the session and forget everything about it.
    pub fn clear_session(&mut self) -> Vec<Effect> {
        let fx = self.end_session();

        self.session_id = None;
        self.config = None;
        self.endpoint = None;
        self.payload = Payload::new(self.page.origin.clone(), self.page.pathname.clone());

        if let Some(identity) = self.identity.take() {
            if let Err(e) = identity.remove() {
                self.reporter.report("Remove session id", &e.to_string());
            }
        }
        if let Some(history) = self.history.take() {
            if let Err(e) = history.clean() {
                self.reporter.report("Clear history", &e.to_string());
            }
        }

        fx
    }

    // ── Payload ──────────────────────────────────────────────────────

    pub fn attach_to_payload(&mut self, key: &str, value: Value) -> Result<(), PayloadError> {
        self.payload.attach(key, value)
    }

    pub fn detach_from_payload(&mut self, key: &str) -> Result<(), PayloadError> {
        self.payload.detach(key)
    }

    pub fn set_metadata(&mut self, key: &str, value: Value) -> Result<(), PayloadError> {
        self.payload.set_metadata(key, value)
    }

    pub fn toggle_logging(&mut self, enabled: bool) {
        self.payload.set_logging(enabled);
    }

    pub fn is_logging(&self) -> bool {
        self.payload.is_logging()
    }

    // ── Events ───────────────────────────────────────────────────────

    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Opened { connection } => self.on_open(connection),
            Event::Closed { connection } => self.on_close(connection),
            Event::Frame { connection, text } => self.on_frame(connection, &text),
            Event::RetryElapsed { connection } => self.on_retry(connection),
            Event::MetadataFetched { init, result } => self.on_metadata(init, result),
        }
    }

    fn on_open(&mut self, connection: ConnectionId) -> Vec<Effect> {
        if connection != self.connection || !self.in_session {
            return Vec::new();
        }

        self.connected = true;
        self.phase = Phase::Connected;
        self.attempt = 0;
        TraceEvent::ConnectionChanged {
            connection,
            connected: true,
        }
        .emit();

        let api_key = self
            .config
            .as_ref()
            .map(|c| c.api_key.clone())
            .unwrap_or_default();

        vec![
            Effect::ConnectionChanged(true),
            Effect::SendFrame {
                connection,
                frame: Handshake {
                    user_id_cookie: self.session_id.clone(),
                    api_key,
                },
            },
        ]
    }

    fn on_close(&mut self, connection: ConnectionId) -> Vec<Effect> {
        if connection != self.connection {
            return Vec::new();
        }

        self.connected = false;
        TraceEvent::ConnectionChanged {
            connection,
            connected: false,
        }
        .emit();
        let mut fx = vec![Effect::ConnectionChanged(false)];

        if !self.in_session {
            self.phase = Phase::Ended;
            return fx;
        }

        self.phase = Phase::Disconnected;
        let delay = self.reconnect.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        TraceEvent::ReconnectScheduled {
            connection,
            delay_ms: delay.as_millis() as u64,
        }
        .emit();
        fx.push(Effect::ScheduleReconnect { connection, delay });
        fx
    }

    fn on_retry(&mut self, connection: ConnectionId) -> Vec<Effect> {
        if !self.in_session || connection != self.connection || self.connected {
            return Vec::new();
        }
        self.open_connection()
    }

    fn on_frame(&mut self, connection: ConnectionId, text: &str) -> Vec<Effect> {
        if connection != self.connection || !self.in_session {
            return Vec::new();
        }

        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "failed to parse frame");
                return Vec::new();
            }
        };

        match frame {
            ServerFrame::HandshakeAck {
                user_id_cookie,
                history,
            } => self.on_handshake_ack(user_id_cookie, history),
            ServerFrame::Error { error } => {
                tracing::warn!(error = %error, "server rejected session");
                self.session_id = None;
                Vec::new()
            }
            ServerFrame::Emission { emission, debug } => self.on_emission(emission, debug),
            ServerFrame::Unknown(value) => {
                tracing::debug!(frame = %value, "ignoring frame");
                Vec::new()
            }
        }
    }

    fn on_handshake_ack(
        &mut self,
        id: String,
        server_history: Option<Vec<ConversationTurn>>,
    ) -> Vec<Effect> {
        let mut fx = Vec::new();

        if self.session_id.as_deref() != Some(id.as_str()) {
            let previous = self.session_id.replace(id.clone());
            if let Some(identity) = &self.identity {
                if let Err(e) = identity.set(&id) {
                    self.reporter.report("Persist session id", &e.to_string());
                }
            }
            // A new id is a new conversation.
            if let Some(history) = &self.history {
                if let Err(e) = history.clean() {
                    self.reporter.report("Clear history", &e.to_string());
                }
            }
            TraceEvent::SessionAdopted {
                previous,
                session_id: id.clone(),
            }
            .emit();
        }

        if self.user_id_waiting {
            self.user_id_waiting = false;
            fx.push(Effect::ResolveUserId(id));
        }

        if self.init_pending && self.awaiting_metadata.is_none() {
            if let Some(config) = &self.config {
                let stored = self.history.as_ref().map(|h| h.get()).unwrap_or_default();
                let source = if stored.is_empty() {
                    server_history.unwrap_or_default()
                } else {
                    stored
                };

                let mut turns = normalize(&source);
                turns.extend(
                    self.queue
                        .iter()
                        .filter(|m| m.as_str() != CONVERSATION_STARTER)
                        .map(|m| ConversationTurn::user(m.clone())),
                );
                self.awaiting_metadata = Some(turns);
                fx.push(Effect::FetchMetadata {
                    init: self.init_generation,
                    hook_url: config.hook_url.clone(),
                    api_key: config.api_key.clone(),
                });
            }
        }

        if !self.queue.is_empty() {
            let pending: Vec<String> = self.queue.drain(..).collect();
            TraceEvent::QueueFlushed {
                messages: pending.len(),
            }
            .emit();
            for message in pending {
                fx.extend(self.send(message));
            }
        }

        fx
    }

    fn on_emission(&mut self, emission: String, debug: Option<Value>) -> Vec<Effect> {
        let mut fx = Vec::new();

        if let Some(text) = template::decode(&emission)
            .as_ref()
            .and_then(Template::display_text)
        {
            fx.push(Effect::Message(text.to_owned()));
        }
        fx.push(Effect::Message(emission.clone()));

        self.push_history(ConversationTurn::bot(emission).with_debug(debug));
        fx
    }

    fn on_metadata(&mut self, init: InitGeneration, result: Result<String, String>) -> Vec<Effect> {
        if init != self.init_generation {
            tracing::debug!(init, current = self.init_generation, "stale metadata ignored");
            return Vec::new();
        }
        let bot_name = match result {
            Ok(name) => name,
            Err(e) => {
                self.reporter.report("Get metadata error:", &e);
                self.fallback_bot_name.clone()
            }
        };

        let Some(history) = self.awaiting_metadata.take() else {
            return Vec::new();
        };
        if !self.init_pending {
            return Vec::new();
        }
        self.init_pending = false;

        vec![Effect::ResolveInit(InitOutcome { bot_name, history })]
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn open_connection(&mut self) -> Vec<Effect> {
        let Some(endpoint) = &self.endpoint else {
            return Vec::new();
        };
        self.connection += 1;
        self.phase = Phase::Connecting;
        vec![Effect::Connect {
            connection: self.connection,
            url: endpoint.channel_url.clone(),
        }]
    }

    fn push_history(&self, turn: ConversationTurn) {
        if let Some(history) = &self.history {
            if let Err(e) = history.push(turn) {
                self.reporter.report("Append history", &e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_domain::turn::MadeBy;
    use cw_sessions::MemoryStorage;
    use parking_lot::Mutex;
    use serde_json::json;

    const HOOK: &str = "https://api.canvas.twyla.ai/widget-hook/massive-dynamic/z10";

    #[derive(Default)]
    struct RecordingReporter(Mutex<Vec<(String, String)>>);

    impl ErrorReporter for RecordingReporter {
        fn report(&self, context: &str, detail: &str) {
            self.0.lock().push((context.into(), detail.into()));
        }
    }

    struct Harness {
        ctl: SessionController,
        storage: Arc<MemoryStorage>,
        reporter: Arc<RecordingReporter>,
    }

    impl Harness {
        fn new() -> Self {
            let storage = Arc::new(MemoryStorage::new());
            let reporter = Arc::new(RecordingReporter::default());
            let ctl = SessionController::new(storage.clone(), reporter.clone());
            Self {
                ctl,
                storage,
                reporter,
            }
        }

        fn history(&self) -> Vec<ConversationTurn> {
            self.storage.history_store("massive-dynamic", "z10").get()
        }

        /// init + open; returns the handshake frame sent.
        fn connect(&mut self) -> Handshake {
            self.ctl.init(SessionConfig::new(HOOK, "key-1"));
            let fx = self.ctl.handle(Event::Opened {
                connection: self.ctl.connection(),
            });
            fx.into_iter()
                .find_map(|e| match e {
                    Effect::SendFrame { frame, .. } => Some(frame),
                    _ => None,
                })
                .expect("handshake frame")
        }

        /// Metadata result for the current `init`.
        fn metadata(&mut self, result: Result<&str, &str>) -> Vec<Effect> {
            let init = self.ctl.init_generation();
            self.ctl.handle(Event::MetadataFetched {
                init,
                result: result.map(str::to_owned).map_err(str::to_owned),
            })
        }

        fn frame(&mut self, value: serde_json::Value) -> Vec<Effect> {
            let connection = self.ctl.connection();
            self.ctl.handle(Event::Frame {
                connection,
                text: value.to_string(),
            })
        }
    }

    fn posts(fx: &[Effect]) -> Vec<&PostBody> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Post { body, .. } => Some(body),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn invalid_hook_rejects_init() {
        let mut h = Harness::new();
        let fx = h.ctl.init(SessionConfig::new("https://example.com/short", "k"));
        assert_eq!(fx, vec![Effect::RejectInit("Invalid hook URL".into())]);
        assert_eq!(h.ctl.phase(), Phase::Idle);
        assert!(!h.ctl.in_session());
        assert_eq!(h.reporter.0.lock()[0].0, "Invalid hook URL");
    }

    #[test]
    fn init_connects_to_resolved_channel() {
        let mut h = Harness::new();
        let fx = h.ctl.init(SessionConfig::new(HOOK, "key-1"));
        assert_eq!(
            fx,
            vec![Effect::Connect {
                connection: 1,
                url: "wss://notification.canvas.twyla.ai/widget-notifications/massive-dynamic/z10"
                    .into(),
            }]
        );
        assert_eq!(h.ctl.phase(), Phase::Connecting);
        assert!(h.ctl.in_session());
    }

    #[test]
    fn open_sends_handshake_with_null_id() {
        let mut h = Harness::new();
        h.ctl.init(SessionConfig::new(HOOK, "key-1"));
        let fx = h.ctl.handle(Event::Opened { connection: 1 });
        assert_eq!(fx[0], Effect::ConnectionChanged(true));
        assert_eq!(
            fx[1],
            Effect::SendFrame {
                connection: 1,
                frame: Handshake {
                    user_id_cookie: None,
                    api_key: "key-1".into()
                }
            }
        );
        assert!(h.ctl.is_connected());
    }

    #[test]
    fn handshake_uses_persisted_id() {
        let mut h = Harness::new();
        h.storage
            .identity_store("massive-dynamic", "z10")
            .set("known")
            .unwrap();
        let frame = h.connect();
        assert_eq!(frame.user_id_cookie.as_deref(), Some("known"));
    }

    #[test]
    fn queued_messages_flush_in_order_after_ack() {
        let mut h = Harness::new();
        h.ctl.init(SessionConfig::new(HOOK, "key-1"));
        assert!(h.ctl.send("first").is_empty());
        assert!(h.ctl.send("second").is_empty());
        h.ctl.handle(Event::Opened { connection: 1 });

        let fx = h.frame(json!({"user_id_cookie": "sid-1"}));
        assert!(fx.contains(&Effect::FetchMetadata {
            init: 1,
            hook_url: HOOK.into(),
            api_key: "key-1".into()
        }));

        let bodies = posts(&fx);
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0].input, "first");
        assert_eq!(bodies[1].input, "second");
        assert_eq!(bodies[0].user_id_cookie.as_deref(), Some("sid-1"));
        assert_eq!(bodies[0].data, h.ctl.payload().to_value());
        assert_eq!(h.ctl.queued().count(), 0);

        // Flushed messages are recorded as user turns.
        let history = h.history();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|t| t.made_by == MadeBy::User));

        let fx = h.metadata(Ok("Helper"));
        assert_eq!(
            fx,
            vec![Effect::ResolveInit(InitOutcome {
                bot_name: "Helper".into(),
                history: vec![
                    ConversationTurn::user("first"),
                    ConversationTurn::user("second")
                ],
            })]
        );
    }

    #[test]
    fn starter_is_not_part_of_init_history() {
        let mut h = Harness::new();
        h.ctl.init(SessionConfig::new(HOOK, "key-1"));
        h.ctl.initiate_conversation();
        h.ctl.handle(Event::Opened { connection: 1 });
        let fx = h.frame(json!({"user_id_cookie": "sid-1"}));

        // The starter is still posted so the bot greets the user.
        assert_eq!(posts(&fx)[0].input, CONVERSATION_STARTER);

        let fx = h.metadata(Ok("Bot"));
        let Effect::ResolveInit(outcome) = &fx[0] else {
            panic!("expected init resolution");
        };
        assert!(outcome.history.is_empty());
    }

    #[test]
    fn new_message_supersedes_lone_starter() {
        let mut h = Harness::new();
        h.ctl.init(SessionConfig::new(HOOK, "k"));
        h.ctl.initiate_conversation();
        h.ctl.send("hello");
        assert_eq!(h.ctl.queued().collect::<Vec<_>>(), vec!["hello"]);

        h.ctl.send("again");
        assert_eq!(h.ctl.queued().collect::<Vec<_>>(), vec!["hello", "again"]);
    }

    #[test]
    fn starter_behind_other_messages_is_kept() {
        let mut h = Harness::new();
        h.ctl.init(SessionConfig::new(HOOK, "k"));
        h.ctl.send("hello");
        h.ctl.initiate_conversation();
        h.ctl.send("more");
        assert_eq!(
            h.ctl.queued().collect::<Vec<_>>(),
            vec!["hello", CONVERSATION_STARTER, "more"]
        );
    }

    #[test]
    fn new_session_id_is_persisted_and_wipes_history() {
        let mut h = Harness::new();
        let history = h.storage.history_store("massive-dynamic", "z10");
        history.push(ConversationTurn::user("old")).unwrap();
        h.storage
            .identity_store("massive-dynamic", "z10")
            .set("old-id")
            .unwrap();

        h.connect();
        h.frame(json!({"user_id_cookie": "new-id"}));

        assert_eq!(h.ctl.session_id(), Some("new-id"));
        assert_eq!(
            h.storage
                .identity_store("massive-dynamic", "z10")
                .get()
                .as_deref(),
            Some("new-id")
        );
        assert!(h.history().is_empty());
    }

    #[test]
    fn same_session_id_keeps_normalized_history() {
        let mut h = Harness::new();
        let quick = json!({
            "template_type": "fbmessenger.quick_reply",
            "text": "Pick",
            "quick_replies": [{"payload": "P1", "title": "Option 1"}]
        })
        .to_string();
        let history = h.storage.history_store("massive-dynamic", "z10");
        history.push(ConversationTurn::bot(quick)).unwrap();
        history.push(ConversationTurn::user("P1")).unwrap();
        h.storage
            .identity_store("massive-dynamic", "z10")
            .set("sid")
            .unwrap();

        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        let fx = h.metadata(Ok("Bot"));
        let Effect::ResolveInit(outcome) = &fx[0] else {
            panic!("expected init resolution");
        };
        assert_eq!(
            outcome.history,
            vec![
                ConversationTurn::bot("Pick"),
                ConversationTurn::user("Option 1")
            ]
        );
    }

    #[test]
    fn server_history_seeds_empty_store() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({
            "user_id_cookie": "sid",
            "history": [{"content": "from server", "made_by": "chatbot"}]
        }));
        let fx = h.metadata(Ok("Bot"));
        let Effect::ResolveInit(outcome) = &fx[0] else {
            panic!("expected init resolution");
        };
        assert_eq!(outcome.history, vec![ConversationTurn::bot("from server")]);
    }

    #[test]
    fn metadata_failure_falls_back() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        let fx = h.metadata(Err("403"));
        assert_eq!(
            fx,
            vec![Effect::ResolveInit(InitOutcome {
                bot_name: DEFAULT_BOT_NAME.into(),
                history: vec![],
            })]
        );
        assert_eq!(h.reporter.0.lock()[0].0, "Get metadata error:");
    }

    #[test]
    fn second_ack_does_not_refetch_metadata() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        let fx = h.frame(json!({"user_id_cookie": "sid"}));
        assert!(!fx
            .iter()
            .any(|e| matches!(e, Effect::FetchMetadata { .. })));
    }

    #[test]
    fn close_schedules_fixed_delay_retry() {
        let mut h = Harness::new();
        h.connect();
        let fx = h.ctl.handle(Event::Closed { connection: 1 });
        assert_eq!(
            fx,
            vec![
                Effect::ConnectionChanged(false),
                Effect::ScheduleReconnect {
                    connection: 1,
                    delay: Duration::from_secs(2)
                }
            ]
        );
        assert_eq!(h.ctl.phase(), Phase::Disconnected);

        let fx = h.ctl.handle(Event::RetryElapsed { connection: 1 });
        assert!(matches!(fx[0], Effect::Connect { connection: 2, .. }));

        // Connection 2 fails too: same delay again.
        let fx = h.ctl.handle(Event::Closed { connection: 2 });
        assert_eq!(
            fx[1],
            Effect::ScheduleReconnect {
                connection: 2,
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn stale_connection_events_are_ignored() {
        let mut h = Harness::new();
        h.connect();
        h.ctl.handle(Event::Closed { connection: 1 });
        h.ctl.handle(Event::RetryElapsed { connection: 1 });

        assert!(h.ctl.handle(Event::Opened { connection: 1 }).is_empty());
        assert!(h.ctl.handle(Event::Closed { connection: 1 }).is_empty());
        assert!(h
            .ctl
            .handle(Event::Frame {
                connection: 1,
                text: json!({"emission": "late"}).to_string()
            })
            .is_empty());
    }

    #[test]
    fn reconnect_resends_handshake_with_known_id() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        h.ctl.handle(Event::Closed { connection: 1 });
        h.ctl.handle(Event::RetryElapsed { connection: 1 });
        let fx = h.ctl.handle(Event::Opened { connection: 2 });
        assert_eq!(
            fx[1],
            Effect::SendFrame {
                connection: 2,
                frame: Handshake {
                    user_id_cookie: Some("sid".into()),
                    api_key: "key-1".into()
                }
            }
        );
    }

    #[test]
    fn connected_send_posts_and_records() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        let fx = h.ctl.send("hi there");
        let bodies = posts(&fx);
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].api_key, "key-1");
        assert_eq!(h.history().last(), Some(&ConversationTurn::user("hi there")));
    }

    #[test]
    fn logging_disabled_marks_payload() {
        let mut h = Harness::new();
        let mut config = SessionConfig::new(HOOK, "k");
        config.logging = false;
        h.ctl.init(config);
        h.ctl.handle(Event::Opened { connection: 1 });
        h.frame(json!({"user_id_cookie": "sid"}));
        let fx = h.ctl.send("x");
        assert_eq!(posts(&fx)[0].data["_logging_disabled"], json!(true));
        assert!(!h.ctl.is_logging());
    }

    #[test]
    fn button_emission_yields_text_then_raw() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));

        let raw = json!({
            "template_type": "fbmessenger.button_sub_template",
            "payload": {"text": "Choose", "buttons": [{"payload": "B1", "title": "One"}]}
        })
        .to_string();
        let fx = h.frame(json!({"emission": raw, "debug": {"node": 3}}));
        assert_eq!(
            fx,
            vec![Effect::Message("Choose".into()), Effect::Message(raw.clone())]
        );

        let history = h.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, raw);
        assert_eq!(history[0].made_by, MadeBy::Bot);
        assert_eq!(history[0].debug, Some(json!({"node": 3})));
    }

    #[test]
    fn plain_emission_yields_one_message() {
        let mut h = Harness::new();
        h.connect();
        let fx = h.frame(json!({"emission": "Hello!"}));
        assert_eq!(fx, vec![Effect::Message("Hello!".into())]);
    }

    #[test]
    fn error_frame_forgets_session_id() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        let fx = h.frame(json!({"error": "expired"}));
        assert!(fx.is_empty());
        assert_eq!(h.ctl.session_id(), None);
        assert!(h.ctl.is_connected());

        h.ctl.handle(Event::Closed { connection: 1 });
        h.ctl.handle(Event::RetryElapsed { connection: 1 });
        let fx = h.ctl.handle(Event::Opened { connection: 2 });
        assert!(matches!(
            &fx[1],
            Effect::SendFrame { frame, .. } if frame.user_id_cookie.is_none()
        ));
    }

    #[test]
    fn user_id_wait_resolves_once() {
        let mut h = Harness::new();
        h.ctl.init(SessionConfig::new(HOOK, "k"));
        assert!(h.ctl.request_user_id().is_empty());
        h.ctl.handle(Event::Opened { connection: 1 });

        let fx = h.frame(json!({"user_id_cookie": "sid"}));
        assert!(fx.contains(&Effect::ResolveUserId("sid".into())));

        let fx = h.frame(json!({"user_id_cookie": "sid"}));
        assert!(!fx.iter().any(|e| matches!(e, Effect::ResolveUserId(_))));

        assert_eq!(
            h.ctl.request_user_id(),
            vec![Effect::ResolveUserId("sid".into())]
        );
    }

    #[test]
    fn end_session_stops_reconnecting_and_abandons_init() {
        let mut h = Harness::new();
        h.ctl.init(SessionConfig::new(HOOK, "k"));
        h.ctl.request_user_id();
        h.ctl.send("queued");

        let fx = h.ctl.end_session();
        assert_eq!(
            fx,
            vec![
                Effect::Disconnect { connection: 1 },
                Effect::ResetCallbacks,
                Effect::AbandonUserIdWait,
                Effect::AbandonInit
            ]
        );
        assert_eq!(h.ctl.queued().count(), 0);

        let fx = h.ctl.handle(Event::Closed { connection: 1 });
        assert_eq!(fx, vec![Effect::ConnectionChanged(false)]);
        assert_eq!(h.ctl.phase(), Phase::Ended);
        assert!(h.ctl.handle(Event::RetryElapsed { connection: 1 }).is_empty());
    }

    #[test]
    fn metadata_after_end_session_is_ignored() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        let init = h.ctl.init_generation();
        h.ctl.end_session();
        assert!(h
            .ctl
            .handle(Event::MetadataFetched {
                init,
                result: Ok("Bot".into()),
            })
            .is_empty());
    }

    #[test]
    fn late_metadata_does_not_resolve_next_init() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        let first = h.ctl.init_generation();
        h.ctl.end_session();

        h.ctl.init(SessionConfig::new(
            "https://api.canvas.twyla.ai/widget-hook/massive-dynamic/other",
            "key-2",
        ));
        let connection = h.ctl.connection();
        h.ctl.handle(Event::Opened { connection });
        let fx = h.frame(json!({"user_id_cookie": "sid2"}));
        let second = h.ctl.init_generation();
        assert_ne!(first, second);
        assert!(fx.contains(&Effect::FetchMetadata {
            init: second,
            hook_url: "https://api.canvas.twyla.ai/widget-hook/massive-dynamic/other".into(),
            api_key: "key-2".into(),
        }));

        let fx = h.ctl.handle(Event::MetadataFetched {
            init: first,
            result: Ok("Bot A".into()),
        });
        assert!(fx.is_empty());

        let fx = h.metadata(Ok("Bot B"));
        assert_eq!(
            fx,
            vec![Effect::ResolveInit(InitOutcome {
                bot_name: "Bot B".into(),
                history: Vec::new(),
            })]
        );
    }

    #[test]
    fn clear_session_forgets_everything() {
        let mut h = Harness::new();
        h.connect();
        h.frame(json!({"user_id_cookie": "sid"}));
        h.frame(json!({"emission": "hello"}));
        h.ctl.attach_to_payload("cart", json!(3)).unwrap();
        assert!(!h.history().is_empty());

        h.ctl.clear_session();
        assert_eq!(h.ctl.session_id(), None);
        assert!(h.ctl.config().is_none());
        assert!(h.ctl.endpoint().is_none());
        assert_eq!(h.ctl.payload().get("cart"), None);
        assert!(h.history().is_empty());
        assert_eq!(
            h.storage.identity_store("massive-dynamic", "z10").get(),
            None
        );

        // A fresh init starts from a null session id.
        let frame = h.connect();
        assert_eq!(frame.user_id_cookie, None);
        assert_eq!(frame.api_key, "key-1");
    }

    #[test]
    fn reinit_closes_previous_connection() {
        let mut h = Harness::new();
        h.connect();
        let fx = h.ctl.init(SessionConfig::new(HOOK, "k2"));
        assert_eq!(fx[0], Effect::AbandonInit);
        assert_eq!(fx[1], Effect::Disconnect { connection: 1 });
        assert!(matches!(fx[2], Effect::Connect { connection: 2, .. }));
    }
}
