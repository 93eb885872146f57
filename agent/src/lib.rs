//! Coverage Execution-Data Streaming Agent
//!
//! This library provides the client side of the covstream transport: it
//! connects to a collector over TCP, streams binary-encoded execution data,
//! reconnects after drops, and keeps idle connections alive with a
//! periodic heartbeat.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod logger;
pub mod retry;
pub mod runtime;

pub use client::{Connector, TcpClient, TcpConnector};
pub use config::AgentOptions;
pub use connection::Connection;
pub use error::AgentError;
pub use logger::{ErrorLogger, TracingLogger};
pub use runtime::{CoverageSource, InMemoryRuntime};
