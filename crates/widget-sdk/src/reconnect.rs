//! Reconnect policy: a fixed delay, retried for as long as the session is
//! active.  No growth, no jitter, no attempt cap.

use std::time::Duration;

use cw_domain::config::ReconnectConfig;

/// Controls how the widget reconnects after the notification channel drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay between a close and the next connection attempt.
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(2_000),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &ReconnectConfig) -> Self {
        Self {
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }

    /// Delay before the given attempt (0-indexed).  Always the same.
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.retry_delay
    }
}
