//! Best-effort error reporting for background tasks

/// Sink for errors raised on the agent's background tasks, such as failed
/// heartbeat pings or exhausted reconnect budgets. Reporting is advisory:
/// implementations must not panic or block.
pub trait ErrorLogger: Send + Sync + 'static {
    fn log_error(&self, error: &(dyn std::error::Error + 'static));
}

/// Default logger that reports through `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ErrorLogger for TracingLogger {
    fn log_error(&self, error: &(dyn std::error::Error + 'static)) {
        tracing::warn!("background task error: {error}");
    }
}
