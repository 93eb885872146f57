//! Session metadata

use serde::{Deserialize, Serialize};

/// Identifies one coverage collection session.
///
/// Written once per dump, and again for every heartbeat ping with a fresh
/// dump timestamp. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier, typically the host name or an explicit agent id
    pub id: String,

    /// Epoch milliseconds when the session started
    pub start_timestamp: i64,

    /// Epoch milliseconds when this dump was taken
    pub dump_timestamp: i64,
}

impl SessionInfo {
    /// Create session metadata for one dump.
    pub fn new(id: impl Into<String>, start_timestamp: i64, dump_timestamp: i64) -> Self {
        Self {
            id: id.into(),
            start_timestamp,
            dump_timestamp,
        }
    }
}
