use serde::Serialize;

/// Structured trace events emitted across all widget crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    EndpointResolved {
        channel_url: String,
        workspace: String,
        project: String,
    },
    ConnectionChanged {
        connection: u64,
        connected: bool,
    },
    SessionAdopted {
        previous: Option<String>,
        session_id: String,
    },
    HistoryCleared {
        reason: String,
    },
    MessageQueued {
        queue_len: usize,
        dropped_starter: bool,
    },
    QueueFlushed {
        messages: usize,
    },
    MessagePosted {
        status: u16,
        duration_ms: u64,
    },
    MetadataFetched {
        status: u16,
        duration_ms: u64,
    },
    ReconnectScheduled {
        connection: u64,
        delay_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cw_event");
    }
}
