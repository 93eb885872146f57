//! Shared types and wire codec for covstream
//!
//! This crate contains the execution data model and the binary frame codec
//! used by both the coverage agent and the collector side of covstream.

pub mod error;
pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::ProtocolError;
pub use types::{ExecutionRecord, SessionInfo};
