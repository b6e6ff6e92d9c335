use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for one embedded widget instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Webhook address of the bot, e.g.
    /// `https://api.canvas.twyla.ai/widget-hook/<workspace>/<project>`.
    #[serde(default)]
    pub hook_url: String,

    /// Opaque API key passed through in the handshake and every request.
    #[serde(default)]
    pub api_key: String,

    /// Conversation logging on the bot side.  `false` marks every outbound
    /// payload with `_logging_disabled`.
    #[serde(default = "d_true")]
    pub logging: bool,

    /// Name reported when the metadata endpoint is unreachable.
    #[serde(default = "d_fallback_bot_name")]
    pub fallback_bot_name: String,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub page: PageConfig,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            hook_url: String::new(),
            api_key: String::new(),
            logging: true,
            fallback_bot_name: d_fallback_bot_name(),
            reconnect: ReconnectConfig::default(),
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
            page: PageConfig::default(),
        }
    }
}

// ── Reconnect ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Fixed delay between a dropped connection and the next attempt.
    #[serde(default = "d_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: d_retry_delay_ms(),
        }
    }
}

// ── HTTP ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout for message posts and metadata fetches.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: d_timeout_ms(),
        }
    }
}

// ── Storage ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the persisted session id and chat history.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
        }
    }
}

// ── Page context ───────────────────────────────────────────────────

/// Where the widget is embedded.  Reported in the `_meta` section of every
/// outbound payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub pathname: Option<String>,
}

fn d_true() -> bool {
    true
}
fn d_fallback_bot_name() -> String {
    crate::DEFAULT_BOT_NAME.into()
}
fn d_retry_delay_ms() -> u64 {
    2_000
}
fn d_timeout_ms() -> u64 {
    30_000
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data/widget")
}

impl WidgetConfig {
    /// Load from a TOML file.
    pub fn load(path: &str) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WidgetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        Self::load(path).unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl WidgetConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.  Endpoint shape is
    /// checked by the resolver at `init` time, not here.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.hook_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "hook_url".into(),
                message: "hook_url must not be empty".into(),
            });
        }

        if self.api_key.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "api_key".into(),
                message: "no api_key configured".into(),
            });
        }

        if self.reconnect.retry_delay_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "reconnect.retry_delay_ms".into(),
                message: "zero retry delay reconnects in a tight loop".into(),
            });
        }

        if self.http.timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "http.timeout_ms".into(),
                message: "timeout must be greater than 0".into(),
            });
        }

        if self.fallback_bot_name.trim().is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "fallback_bot_name".into(),
                message: "empty fallback bot name".into(),
            });
        }

        errors
    }
}
