//! Builder pattern for constructing a [`WidgetClient`].

use std::sync::Arc;
use std::time::Duration;

use cw_domain::config::{PageConfig, WidgetConfig};
use cw_domain::DEFAULT_BOT_NAME;
use cw_sessions::{FileStorage, MemoryStorage, SessionStorage};

use crate::client::WidgetClient;
use crate::controller::SessionController;
use crate::reconnect::ReconnectPolicy;
use crate::reporter::{ErrorReporter, TracingReporter};
use crate::types::WidgetError;
use crate::webhook::{HttpWebhook, Webhook};

/// Fluent builder for [`WidgetClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use cw_widget_sdk::WidgetClientBuilder;
/// # use cw_sessions::FileStorage;
/// # use std::sync::Arc;
/// let client = WidgetClientBuilder::new()
///     .storage(Arc::new(FileStorage::new("./data/widget".as_ref())))
///     .page("https://shop.example.com", "/checkout")
///     .retry_delay(std::time::Duration::from_secs(2))
///     .build()
///     .unwrap();
/// ```
pub struct WidgetClientBuilder {
    pub(crate) storage: Option<Arc<dyn SessionStorage>>,
    pub(crate) webhook: Option<Arc<dyn Webhook>>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) fallback_bot_name: String,
    pub(crate) page: PageConfig,
    pub(crate) http_timeout: Duration,
}

impl WidgetClientBuilder {
    pub fn new() -> Self {
        Self {
            storage: None,
            webhook: None,
            reporter: Arc::new(TracingReporter),
            reconnect: ReconnectPolicy::default(),
            fallback_bot_name: DEFAULT_BOT_NAME.into(),
            page: PageConfig::default(),
            http_timeout: Duration::from_secs(30),
        }
    }

    /// Seed every setting from a loaded [`WidgetConfig`].  State is kept on
    /// disk under `storage.state_path`.
    pub fn from_config(cfg: &WidgetConfig) -> Self {
        Self::new()
            .storage(Arc::new(FileStorage::new(&cfg.storage.state_path)))
            .reconnect(ReconnectPolicy::from_config(&cfg.reconnect))
            .fallback_bot_name(cfg.fallback_bot_name.clone())
            .page_config(cfg.page.clone())
            .http_timeout(Duration::from_millis(cfg.http.timeout_ms))
    }

    // ── Collaborators ────────────────────────────────────────────────

    /// Where the session id and history live (default: in memory).
    pub fn storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Replace the HTTP webhook, e.g. with a recording fake.
    pub fn webhook(mut self, webhook: Arc<dyn Webhook>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Override the fixed reconnect delay (default 2s).
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.reconnect = ReconnectPolicy { retry_delay: delay };
        self
    }

    /// Bot name used when the metadata fetch fails.
    pub fn fallback_bot_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_bot_name = name.into();
        self
    }

    /// Timeout for the default HTTP webhook.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    // ── Page context ─────────────────────────────────────────────────

    /// Origin and pathname reported in `_meta`.
    pub fn page(mut self, origin: impl Into<String>, pathname: impl Into<String>) -> Self {
        self.page = PageConfig {
            origin: Some(origin.into()),
            pathname: Some(pathname.into()),
        };
        self
    }

    pub fn page_config(mut self, page: PageConfig) -> Self {
        self.page = page;
        self
    }

    /// Build the [`WidgetClient`].
    pub fn build(self) -> Result<WidgetClient, WidgetError> {
        if self.reconnect.retry_delay.is_zero() {
            return Err(WidgetError::Config("retry delay must be positive".into()));
        }

        let webhook: Arc<dyn Webhook> = match self.webhook {
            Some(webhook) => webhook,
            None => {
                let cfg = cw_domain::config::HttpConfig {
                    timeout_ms: self.http_timeout.as_millis() as u64,
                };
                Arc::new(HttpWebhook::new(&cfg)?)
            }
        };
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        let controller = SessionController::new(storage, self.reporter.clone())
            .with_reconnect(self.reconnect)
            .with_fallback_bot_name(self.fallback_bot_name)
            .with_page(self.page);

        Ok(WidgetClient {
            controller,
            webhook,
            reporter: self.reporter,
        })
    }
}

impl Default for WidgetClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
