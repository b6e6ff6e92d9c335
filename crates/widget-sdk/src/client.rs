//! Widget driver: owns the [`SessionController`] in a single tokio task and
//! carries out its effects: the notification socket, webhook posts, metadata
//! fetches, and reconnect timers.
//!
//! Commands from [`WidgetHandle`] and events from connection tasks arrive on
//! channels and are processed one at a time, so frames are handled strictly
//! in arrival order.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use cw_protocol::{PayloadError, PostBody};

use crate::controller::{ConnectionId, Effect, Event, InitOutcome, SessionConfig, SessionController};
use crate::reporter::ErrorReporter;
use crate::types::{Callbacks, ConnectionCallback, MessageCallback, WidgetError};
use crate::webhook::Webhook;

type Reply<T> = oneshot::Sender<Result<T, WidgetError>>;

enum Command {
    Init {
        config: SessionConfig,
        on_message: MessageCallback,
        reply: Reply<InitOutcome>,
    },
    Send(String),
    InitiateConversation,
    OnConnectionChange(ConnectionCallback),
    UserId(Reply<String>),
    BotName {
        hook_url: Option<String>,
        api_key: Option<String>,
        reply: Reply<String>,
    },
    Attach {
        key: String,
        value: Value,
        reply: Reply<()>,
    },
    Detach {
        key: String,
        reply: Reply<()>,
    },
    SetMetadata {
        key: String,
        value: Value,
        reply: Reply<()>,
    },
    ToggleLogging(bool),
    IsLogging(oneshot::Sender<bool>),
    EndSession,
    ClearSession,
}

/// A configured widget, not yet running.
///
/// Create via [`WidgetClientBuilder`](crate::builder::WidgetClientBuilder).
pub struct WidgetClient {
    pub(crate) controller: SessionController,
    pub(crate) webhook: Arc<dyn Webhook>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
}

impl WidgetClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::WidgetClientBuilder {
        crate::builder::WidgetClientBuilder::new()
    }

    /// Spawn the driver task.  Must be called inside a tokio runtime.
    ///
    /// The task runs until `shutdown` is cancelled or every handle is
    /// dropped.
    pub fn spawn(self, shutdown: CancellationToken) -> WidgetHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (post_tx, post_rx) = mpsc::unbounded_channel();

        tokio::spawn(post_worker(
            post_rx,
            self.webhook.clone(),
            self.reporter.clone(),
            shutdown.clone(),
        ));

        let driver = Driver {
            ctl: self.controller,
            webhook: self.webhook,
            callbacks: Callbacks::default(),
            events: event_tx,
            posts: post_tx,
            link: None,
            pending_init: None,
            parked_inits: Vec::new(),
            user_id_waiters: Vec::new(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(driver.run(cmd_rx, event_rx));

        WidgetHandle {
            commands: cmd_tx,
            shutdown,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap, cloneable handle to a running widget.
#[derive(Clone)]
pub struct WidgetHandle {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl WidgetHandle {
    /// Start a session and wait for the handshake.
    ///
    /// Resolves with the bot's name and the display history.  Fails with
    /// [`WidgetError::InvalidHookUrl`] when no channel can be derived from
    /// `config.hook_url`.  If the session is ended before the handshake
    /// completes, the returned future stays pending until shutdown.
    pub async fn init<F>(
        &self,
        config: SessionConfig,
        on_message: F,
    ) -> Result<InitOutcome, WidgetError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let on_message: MessageCallback = Arc::new(on_message);
        self.request(|reply| Command::Init {
            config,
            on_message,
            reply,
        })
        .await
    }

    /// Send user input.  Queued while the channel is down.
    pub fn send(&self, message: impl Into<String>) {
        self.fire(Command::Send(message.into()));
    }

    /// Ask the bot for its opening line.
    pub fn initiate_conversation(&self) {
        self.fire(Command::InitiateConversation);
    }

    pub fn on_connection_change<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.fire(Command::OnConnectionChange(Arc::new(callback)));
    }

    /// The server-assigned session id, waiting for the handshake if needed.
    pub async fn user_id(&self) -> Result<String, WidgetError> {
        self.request(Command::UserId).await
    }

    /// Fetch the bot's display name.  Defaults to the active session's hook
    /// and key.
    pub async fn bot_name(
        &self,
        hook_url: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<String, WidgetError> {
        let hook_url = hook_url.map(str::to_owned);
        let api_key = api_key.map(str::to_owned);
        self.request(|reply| Command::BotName {
            hook_url,
            api_key,
            reply,
        })
        .await
    }

    pub async fn attach_to_payload(&self, key: &str, value: Value) -> Result<(), WidgetError> {
        let key = key.to_owned();
        self.request(|reply| Command::Attach { key, value, reply })
            .await
    }

    pub async fn detach_from_payload(&self, key: &str) -> Result<(), WidgetError> {
        let key = key.to_owned();
        self.request(|reply| Command::Detach { key, reply }).await
    }

    pub async fn set_metadata(&self, key: &str, value: Value) -> Result<(), WidgetError> {
        let key = key.to_owned();
        self.request(|reply| Command::SetMetadata { key, value, reply })
            .await
    }

    pub fn toggle_logging(&self, enabled: bool) {
        self.fire(Command::ToggleLogging(enabled));
    }

    pub async fn is_logging(&self) -> Result<bool, WidgetError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::IsLogging(tx))
            .map_err(|_| WidgetError::Shutdown)?;
        rx.await.map_err(|_| WidgetError::Shutdown)
    }

    /// Close the session.  No reconnects follow.
    pub fn end_session(&self) {
        self.fire(Command::EndSession);
    }

    /// Close the session and erase the stored id and history.
    pub fn clear_session(&self) {
        self.fire(Command::ClearSession);
    }

    /// Stop the driver and every task it spawned.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn fire(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            tracing::debug!("widget driver is gone, command dropped");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, WidgetError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| WidgetError::Shutdown)?;
        rx.await.map_err(|_| WidgetError::Shutdown)?
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The live socket: its id, outbound frames, and a token to close it.
struct Link {
    connection: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

struct Driver {
    ctl: SessionController,
    webhook: Arc<dyn Webhook>,
    callbacks: Callbacks,
    events: mpsc::UnboundedSender<Event>,
    posts: mpsc::UnboundedSender<(String, PostBody)>,
    link: Option<Link>,
    pending_init: Option<Reply<InitOutcome>>,
    /// Abandoned inits: kept unsettled until the driver exits.
    parked_inits: Vec<Reply<InitOutcome>>,
    user_id_waiters: Vec<Reply<String>>,
    shutdown: CancellationToken,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("widget shutdown requested");
                    break;
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        tracing::debug!("all widget handles dropped");
                        break;
                    }
                },
                Some(event) = events.recv() => {
                    let fx = self.ctl.handle(event);
                    self.apply(fx);
                }
            }
        }

        let fx = self.ctl.end_session();
        self.apply(fx);
        if !self.parked_inits.is_empty() {
            tracing::debug!(count = self.parked_inits.len(), "dropping abandoned inits");
        }
        self.shutdown.cancel();
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Init {
                config,
                on_message,
                reply,
            } => {
                self.callbacks.on_message = on_message;
                let fx = self.ctl.init(config);
                // An AbandonInit here refers to the previous init.
                let (abandon, rest): (Vec<_>, Vec<_>) = fx
                    .into_iter()
                    .partition(|e| matches!(e, Effect::AbandonInit));
                if !abandon.is_empty() {
                    self.park_init();
                }
                self.pending_init = Some(reply);
                self.apply(rest);
            }
            Command::Send(message) => {
                let fx = self.ctl.send(message);
                self.apply(fx);
            }
            Command::InitiateConversation => {
                let fx = self.ctl.initiate_conversation();
                self.apply(fx);
            }
            Command::OnConnectionChange(callback) => {
                self.callbacks.on_connection = callback;
            }
            Command::UserId(reply) => {
                self.user_id_waiters.push(reply);
                let fx = self.ctl.request_user_id();
                self.apply(fx);
            }
            Command::BotName {
                hook_url,
                api_key,
                reply,
            } => self.fetch_bot_name(hook_url, api_key, reply),
            Command::Attach { key, value, reply } => {
                let result = self.ctl.attach_to_payload(&key, value);
                let _ = reply.send(payload_result("attach", result));
            }
            Command::Detach { key, reply } => {
                let result = self.ctl.detach_from_payload(&key);
                let _ = reply.send(payload_result("detach", result));
            }
            Command::SetMetadata { key, value, reply } => {
                let result = self.ctl.set_metadata(&key, value);
                let _ = reply.send(payload_result("set_metadata", result));
            }
            Command::ToggleLogging(enabled) => self.ctl.toggle_logging(enabled),
            Command::IsLogging(reply) => {
                let _ = reply.send(self.ctl.is_logging());
            }
            Command::EndSession => {
                let fx = self.ctl.end_session();
                self.apply(fx);
            }
            Command::ClearSession => {
                let fx = self.ctl.clear_session();
                self.apply(fx);
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Connect { connection, url } => self.connect(connection, url),
                Effect::Disconnect { connection } => {
                    if self.link.as_ref().is_some_and(|l| l.connection == connection) {
                        if let Some(link) = self.link.take() {
                            link.cancel.cancel();
                        }
                    }
                }
                Effect::SendFrame { connection, frame } => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to serialize handshake");
                            continue;
                        }
                    };
                    match &self.link {
                        Some(link) if link.connection == connection => {
                            let _ = link.outbound.send(text);
                        }
                        _ => tracing::debug!(connection, "no live link for frame"),
                    }
                }
                Effect::Post { hook_url, body } => {
                    let _ = self.posts.send((hook_url, body));
                }
                Effect::FetchMetadata {
                    init,
                    hook_url,
                    api_key,
                } => {
                    let webhook = self.webhook.clone();
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        let result = webhook
                            .fetch_metadata(&hook_url, &api_key)
                            .await
                            .map(|meta| meta.name)
                            .map_err(|e| e.to_string());
                        let _ = events.send(Event::MetadataFetched { init, result });
                    });
                }
                Effect::ScheduleReconnect { connection, delay } => {
                    let events = self.events.clone();
                    let shutdown = self.shutdown.clone();
                    tracing::info!(
                        connection,
                        delay_ms = delay.as_millis() as u64,
                        "reconnecting"
                    );
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {
                                let _ = events.send(Event::RetryElapsed { connection });
                            }
                            _ = shutdown.cancelled() => {}
                        }
                    });
                }
                Effect::ConnectionChanged(connected) => (self.callbacks.on_connection)(connected),
                Effect::Message(text) => (self.callbacks.on_message)(text),
                Effect::ResolveInit(outcome) => {
                    if let Some(reply) = self.pending_init.take() {
                        let _ = reply.send(Ok(outcome));
                    }
                }
                Effect::RejectInit(reason) => {
                    tracing::warn!(reason = %reason, "init rejected");
                    if let Some(reply) = self.pending_init.take() {
                        let _ = reply.send(Err(WidgetError::InvalidHookUrl));
                    }
                }
                Effect::AbandonInit => self.park_init(),
                Effect::ResolveUserId(id) => {
                    for waiter in self.user_id_waiters.drain(..) {
                        let _ = waiter.send(Ok(id.clone()));
                    }
                }
                Effect::AbandonUserIdWait => {
                    for waiter in self.user_id_waiters.drain(..) {
                        let _ = waiter.send(Err(WidgetError::SessionEnded));
                    }
                }
                Effect::ResetCallbacks => self.callbacks = Callbacks::default(),
            }
        }
    }

    fn park_init(&mut self) {
        if let Some(reply) = self.pending_init.take() {
            self.parked_inits.push(reply);
        }
    }

    fn connect(&mut self, connection: ConnectionId, url: String) {
        if let Some(old) = self.link.take() {
            old.cancel.cancel();
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();
        self.link = Some(Link {
            connection,
            outbound,
            cancel: cancel.clone(),
        });

        tokio::spawn(run_connection(
            connection,
            url,
            outbound_rx,
            self.events.clone(),
            cancel,
        ));
    }

    fn fetch_bot_name(
        &self,
        hook_url: Option<String>,
        api_key: Option<String>,
        reply: Reply<String>,
    ) {
        let active = self.ctl.config();
        let hook_url = hook_url.or_else(|| active.map(|c| c.hook_url.clone()));
        let api_key = api_key.or_else(|| active.map(|c| c.api_key.clone()));
        let (Some(hook_url), Some(api_key)) = (hook_url, api_key) else {
            let _ = reply.send(Err(WidgetError::NotInitialized));
            return;
        };

        let webhook = self.webhook.clone();
        tokio::spawn(async move {
            let result = webhook
                .fetch_metadata(&hook_url, &api_key)
                .await
                .map(|meta| meta.name)
                .map_err(WidgetError::from);
            let _ = reply.send(result);
        });
    }
}

fn payload_result(op: &str, result: Result<(), PayloadError>) -> Result<(), WidgetError> {
    result.map_err(|e| {
        tracing::warn!(op, error = %e, "payload update rejected");
        WidgetError::Payload(e)
    })
}

// ── Tasks ──────────────────────────────────────────────────────────

/// One socket lifetime.  Always ends with exactly one `Closed` event.
async fn run_connection(
    connection: ConnectionId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    tracing::info!(url = %url, connection, "connecting to notification channel");

    let connected = tokio::select! {
        r = tokio_tungstenite::connect_async(url.as_str()) => r,
        _ = cancel.cancelled() => {
            let _ = events.send(Event::Closed { connection });
            return;
        }
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::warn!(connection, error = %e, "connect failed");
            let _ = events.send(Event::Closed { connection });
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();
    let _ = events.send(Event::Opened { connection });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(connection, error = %e, "socket write failed");
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(Event::Frame { connection, text });
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(connection, "notification channel closed");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(connection, error = %e, "socket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = events.send(Event::Closed { connection });
}

/// Posts run one at a time so the bot sees messages in send order.
async fn post_worker(
    mut posts: mpsc::UnboundedReceiver<(String, PostBody)>,
    webhook: Arc<dyn Webhook>,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: CancellationToken,
) {
    loop {
        let (hook_url, body) = tokio::select! {
            next = posts.recv() => match next {
                Some(next) => next,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        if let Err(e) = webhook.post_message(&hook_url, &body).await {
            reporter.report("Send message error:", &e.to_string());
        }
    }
}
