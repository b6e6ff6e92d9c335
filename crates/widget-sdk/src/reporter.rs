//! Error reporting collaborator.

/// Receives non-fatal failures.  Must never fail or panic.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, context: &str, detail: &str);
}

/// Forwards reports to `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, context: &str, detail: &str) {
        tracing::error!(context = context, detail = detail, "widget error");
    }
}
