//! Agent error taxonomy

use covstream_shared::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the streaming client.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Every connect attempt in the configured budget failed.
    #[error("unable to reach collector after {attempts} attempts")]
    Connect {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// No usable connection at the time of the call.
    #[error("connection is not established or already closed")]
    NotConnected,

    /// Mid-stream read or write failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Frame encoding failure, e.g. a class name above the wire limit.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
