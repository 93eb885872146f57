//! Execution data model

pub mod execution;
pub mod session;

pub use execution::{ExecutionRecord, DEFAULT_CORRELATION_ID};
pub use session::SessionInfo;
