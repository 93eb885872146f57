//! Collector client controller
//!
//! Owns the connection lifecycle: connect with bounded or unbounded retry,
//! the blocking streaming loop, keep-alive reconnects, the heartbeat
//! scheduler, and shutdown. This is the only component with socket-level
//! knowledge; the coverage source just pushes records through it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentOptions;
use crate::connection::Connection;
use crate::error::AgentError;
use crate::logger::{ErrorLogger, TracingLogger};
use crate::retry;
use crate::runtime::CoverageSource;

/// Grace period for the streaming worker to wind down after the channel is
/// closed; a wedged worker is aborted once it elapses.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Dials the channel a [`TcpClient`] streams over. Abstracted so tests can
/// inject fake channels and connect faults; production code uses
/// [`TcpConnector`].
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    fn connect(&self) -> impl Future<Output = std::io::Result<Self::Stream>> + Send;
}

/// Connects a TCP socket to the configured collector endpoint.
pub struct TcpConnector {
    remote: String,
}

impl TcpConnector {
    pub fn new(options: &AgentOptions) -> Self {
        Self {
            remote: options.remote(),
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> impl Future<Output = std::io::Result<TcpStream>> + Send {
        TcpStream::connect(self.remote.clone())
    }
}

/// Handle on the live connection, shared between the streaming worker
/// (writer on reconnect) and the heartbeat task (reader on every tick).
type SharedConnection<S> = Arc<RwLock<Option<Arc<Connection<S>>>>>;

/// Streaming client for one collector.
///
/// `startup` establishes the first connection and spawns two background
/// tasks: a streaming worker that keeps the connection running (and
/// reconnects while keep-alive is set) and a heartbeat that pings the
/// collector on a fixed period. `shutdown` tears both down.
pub struct TcpClient<C: Connector> {
    options: AgentOptions,
    connector: Arc<C>,
    source: Arc<dyn CoverageSource>,
    logger: Arc<dyn ErrorLogger>,
    connection: SharedConnection<C::Stream>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl TcpClient<TcpConnector> {
    /// Client over a real TCP socket.
    pub fn new(options: AgentOptions, source: Arc<dyn CoverageSource>) -> Self {
        let connector = TcpConnector::new(&options);
        Self::with_connector(options, connector, source)
    }
}

impl<C: Connector> TcpClient<C> {
    /// Client over a custom channel dialer.
    pub fn with_connector(
        options: AgentOptions,
        connector: C,
        source: Arc<dyn CoverageSource>,
    ) -> Self {
        Self {
            options,
            connector: Arc::new(connector),
            source,
            logger: Arc::new(TracingLogger),
            connection: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
            worker: None,
            heartbeat: None,
        }
    }

    /// Replace the best-effort error logger used by the background tasks.
    pub fn with_logger(mut self, logger: Arc<dyn ErrorLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Connect to the collector and start the background tasks.
    ///
    /// Fails with [`AgentError::Connect`] when the configured retry budget
    /// is exhausted before any attempt succeeds; a retry count of zero or
    /// less retries forever.
    pub async fn startup(&mut self) -> Result<(), AgentError> {
        let stream = connect_with_retry(&self.options, self.connector.as_ref()).await?;
        let conn = Arc::new(Connection::new(stream, self.source.clone()));
        conn.init().await?;
        *self.connection.write().await = Some(conn.clone());
        info!("connected to collector at {}", self.options.remote());

        self.worker = Some(tokio::spawn(stream_loop(
            self.options.clone(),
            self.connector.clone(),
            self.source.clone(),
            self.logger.clone(),
            self.connection.clone(),
            self.cancel.clone(),
            conn,
        )));
        self.heartbeat = Some(tokio::spawn(heartbeat_loop(
            self.options.heartbeat_interval,
            self.connection.clone(),
            self.logger.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Encode and transmit the snapshot for `correlation_id` on the live
    /// connection; `reset` asks the coverage source to clear its counters
    /// afterwards. Fails when no usable connection exists.
    pub async fn write_execution_data(
        &self,
        correlation_id: &str,
        reset: bool,
    ) -> Result<(), AgentError> {
        let conn = self
            .connection
            .read()
            .await
            .clone()
            .ok_or(AgentError::NotConnected)?;
        conn.send_record(correlation_id, reset).await
    }

    /// True when no live connection exists.
    pub async fn is_closed(&self) -> bool {
        match self.connection.read().await.as_ref() {
            Some(conn) => conn.is_closed(),
            None => true,
        }
    }

    /// Close the connection, stop the heartbeat, and wait for both
    /// background tasks to end. A close failure is returned after the
    /// shutdown sequence has still run to completion.
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        self.cancel.cancel();

        let close_result = match self.connection.read().await.clone() {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };

        if let Some(mut heartbeat) = self.heartbeat.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut heartbeat)
                .await
                .is_err()
            {
                heartbeat.abort();
                let _ = heartbeat.await;
            }
        }
        if let Some(mut worker) = self.worker.take() {
            // Bounded wait; a worker stuck in I/O the close did not unblock
            // must not hang shutdown forever.
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await.is_err() {
                warn!("streaming worker did not stop in time, aborting it");
                worker.abort();
                let _ = worker.await;
            }
        }

        // A reconnect that completed while we were cancelling may have
        // installed a fresh connection after the snapshot above; close
        // whatever is left in the handle.
        let late_result = match self.connection.write().await.take() {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };
        close_result.and(late_result)
    }
}

/// One connect sequence honoring the configured retry policy.
async fn connect_with_retry<C: Connector>(
    options: &AgentOptions,
    connector: &C,
) -> Result<C::Stream, AgentError> {
    let attempts = if options.retry_count > 0 {
        options.retry_count as u32 + 1
    } else {
        u32::MAX
    };
    retry::retry_fixed(
        "collector connect",
        options.retry_count,
        options.retry_delay,
        || connector.connect(),
    )
    .await
    .map_err(|source| AgentError::Connect { attempts, source })
}

/// Streaming worker: keeps the current connection running and, while
/// keep-alive is set, reconnects after drops. Implemented as an iterative
/// loop; a recursive re-dial would grow the stack on long-lived flaky
/// links.
async fn stream_loop<C: Connector>(
    options: AgentOptions,
    connector: Arc<C>,
    source: Arc<dyn CoverageSource>,
    logger: Arc<dyn ErrorLogger>,
    shared: SharedConnection<C::Stream>,
    cancel: CancellationToken,
    first: Arc<Connection<C::Stream>>,
) {
    let mut conn = first;
    loop {
        // Race the connection against the controller token: the connection
        // only watches its own close, and a cancellation arriving between
        // reconnect and the next iteration must still tear it down.
        let result = tokio::select! {
            _ = cancel.cancelled() => conn.close().await,
            result = conn.run() => result,
        };
        if let Err(e) = result {
            warn!("connection ended: {e}");
            logger.log_error(&e);
        }
        shared.write().await.take();

        if cancel.is_cancelled() || !options.keep_alive {
            break;
        }
        info!("connection to collector lost, reconnecting");
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            connected = connect_with_retry(&options, connector.as_ref()) => match connected {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("reconnect budget exhausted: {e}");
                    logger.log_error(&e);
                    break;
                }
            },
        };
        let next = Arc::new(Connection::new(stream, source.clone()));
        if let Err(e) = next.init().await {
            logger.log_error(&e);
            let _ = next.close().await;
            break;
        }
        if cancel.is_cancelled() {
            let _ = next.close().await;
            break;
        }
        *shared.write().await = Some(next.clone());
        info!("reconnected to collector at {}", options.remote());
        conn = next;
    }
    debug!("streaming worker stopped");
}

/// Heartbeat task: pings the collector on a fixed period, first tick
/// immediately. Failures are advisory only and never tear the connection
/// down; ticks with no live connection are skipped silently.
async fn heartbeat_loop<S: AsyncRead + AsyncWrite + Send + 'static>(
    interval: Duration,
    shared: SharedConnection<S>,
    logger: Arc<dyn ErrorLogger>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let conn = shared.read().await.clone();
        match conn {
            Some(conn) if !conn.is_closed() => {
                if let Err(e) = conn.send_heartbeat().await {
                    warn!("heartbeat failed: {e}");
                    logger.log_error(&e);
                }
            }
            _ => debug!("heartbeat skipped, no live connection"),
        }
    }
    debug!("heartbeat stopped");
}
