//! One live collector connection
//!
//! Binds a single socket-like channel to the frame codec. All frame writes,
//! data and heartbeat alike, are serialized through one writer lock so
//! concurrent callers never interleave partial frames on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use covstream_shared::protocol::wire;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::AgentError;
use crate::runtime::CoverageSource;

/// A single execution-data stream over one channel.
///
/// Reconnects never reuse a `Connection`; a fresh instance opens a
/// brand-new stream with its own header.
pub struct Connection<S> {
    writer: Mutex<WriteHalf<S>>,
    reader: Mutex<Option<ReadHalf<S>>>,
    source: Arc<dyn CoverageSource>,
    initialized: AtomicBool,
    closed: AtomicBool,
    /// Fired by `close` to unblock a pending `run`
    shutdown: CancellationToken,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Connection<S> {
    pub fn new(stream: S, source: Arc<dyn CoverageSource>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            source,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Write the stream header. Runs exactly once, before any other write;
    /// later calls are no-ops.
    pub async fn init(&self) -> Result<(), AgentError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&wire::header_frame()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Encode and transmit the finalized snapshot for `correlation_id`.
    /// When `reset` is set the coverage source clears its counters after a
    /// successful write. I/O failures propagate to the caller.
    pub async fn send_record(&self, correlation_id: &str, reset: bool) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::NotConnected);
        }
        let (session, records) = self.source.collect(correlation_id);

        // Encode everything up front so encoding errors surface before any
        // byte reaches the wire.
        let mut frames: Vec<Bytes> = Vec::with_capacity(records.len() + 1);
        frames.push(wire::session_info_frame(&session)?);
        for record in &records {
            if let Some(frame) = wire::execution_data_frame(record)? {
                frames.push(frame);
            }
        }

        let mut writer = self.writer.lock().await;
        for frame in &frames {
            writer.write_all(frame).await?;
        }
        writer.flush().await?;
        drop(writer);

        if reset {
            self.source.reset(correlation_id);
        }
        debug!(
            "sent {} execution records for correlation {correlation_id}",
            frames.len() - 1
        );
        Ok(())
    }

    /// Liveness ping: a SESSION_INFO frame with a fresh dump timestamp.
    /// Fails loudly when the channel is unusable; the caller decides
    /// whether that matters.
    pub async fn send_heartbeat(&self) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::NotConnected);
        }
        let frame = wire::session_info_frame(&self.source.session())?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        trace!("heartbeat sent");
        Ok(())
    }

    /// Non-blocking liveness check.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the channel. Idempotent and safe from any task; also
    /// unblocks a pending [`run`](Self::run). Never waits on the writer
    /// lock: a writer wedged against a stalled peer must not block close,
    /// so the graceful wire shutdown is skipped in that case and the
    /// channel is torn down when the connection is dropped.
    pub async fn close(&self) -> Result<(), AgentError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.shutdown().await?;
        }
        Ok(())
    }

    /// Keep the connection active until the collector closes it, local
    /// `close` is called, or I/O fails. The connection is always closed
    /// when this returns.
    pub async fn run(&self) -> Result<(), AgentError> {
        let reader = self.reader.lock().await.take();
        let Some(mut reader) = reader else {
            return Err(AgentError::NotConnected);
        };
        let mut buf = [0u8; 1024];
        let result = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("connection closed locally");
                    break Ok(());
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("collector closed the connection");
                        break Ok(());
                    }
                    Ok(n) => trace!("discarding {n} bytes from collector"),
                    Err(_) if self.is_closed() => break Ok(()),
                    Err(e) => break Err(AgentError::Io(e)),
                },
            }
        };
        let _ = self.close().await;
        result
    }
}
