//! Configuration for the streaming agent

use std::time::Duration;

/// Connection options for the streaming agent.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Collector host name or IP address
    pub address: String,

    /// Collector TCP port
    pub port: u16,

    /// Additional connect attempts after the first failure; zero or
    /// negative retries forever
    pub retry_count: i32,

    /// Delay between connect attempts
    pub retry_delay: Duration,

    /// Period of the liveness heartbeat
    pub heartbeat_interval: Duration,

    /// Reconnect automatically when the collector drops the connection
    pub keep_alive: bool,

    /// Explicit session identifier (None = host name, or `agent-<pid>`)
    pub session_id: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 6300,
            retry_count: 10,
            retry_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            keep_alive: true,
            session_id: None,
        }
    }
}

impl AgentOptions {
    /// Session identifier to report, falling back to the host name or the
    /// process id when none was configured.
    pub fn session_id(&self) -> String {
        self.session_id.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| format!("agent-{}", std::process::id()))
        })
    }

    /// Collector endpoint in `host:port` form.
    pub fn remote(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.address.trim().is_empty() {
            anyhow::bail!("Collector address must not be empty");
        }

        if self.port == 0 {
            anyhow::bail!("Collector port must be greater than 0");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("Heartbeat interval must be greater than 0");
        }

        Ok(())
    }
}
