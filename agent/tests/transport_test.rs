//! End-to-end transport tests: connect retry, streaming, heartbeat and
//! shutdown behavior, over both fake duplex channels and a real TCP
//! collector.

use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use covstream_agent::{AgentError, AgentOptions, Connector, InMemoryRuntime, TcpClient};
use covstream_shared::protocol::reader::{ExecutionDataReader, Frame};
use covstream_shared::protocol::wire;
use covstream_shared::types::DEFAULT_CORRELATION_ID;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio_test::assert_ok;

/// Connector yielding in-memory duplex channels, failing the first
/// `fail_first` attempts. The far end of every established channel is
/// handed out through `server_rx`.
struct MockConnector {
    fail_first: u32,
    attempts: Arc<AtomicU32>,
    server_tx: mpsc::UnboundedSender<DuplexStream>,
}

impl MockConnector {
    fn new(fail_first: u32) -> (Self, Arc<AtomicU32>, mpsc::UnboundedReceiver<DuplexStream>) {
        let attempts = Arc::new(AtomicU32::new(0));
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        (
            Self {
                fail_first,
                attempts: attempts.clone(),
                server_tx,
            },
            attempts,
            server_rx,
        )
    }
}

impl Connector for MockConnector {
    type Stream = DuplexStream;

    fn connect(&self) -> impl Future<Output = std::io::Result<DuplexStream>> + Send {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        let result = if n < self.fail_first {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
        } else {
            let (near, far) = tokio::io::duplex(64 * 1024);
            let _ = self.server_tx.send(far);
            Ok(near)
        };
        async move { result }
    }
}

/// Connector whose dials wait on a semaphore permit, so a test can hold a
/// reconnect attempt open and release it at a chosen moment.
struct GatedConnector {
    permits: Arc<Semaphore>,
    server_tx: mpsc::UnboundedSender<DuplexStream>,
}

impl GatedConnector {
    fn new() -> (Self, Arc<Semaphore>, mpsc::UnboundedReceiver<DuplexStream>) {
        let permits = Arc::new(Semaphore::new(1));
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        (
            Self {
                permits: permits.clone(),
                server_tx,
            },
            permits,
            server_rx,
        )
    }
}

impl Connector for GatedConnector {
    type Stream = DuplexStream;

    fn connect(&self) -> impl Future<Output = std::io::Result<DuplexStream>> + Send {
        let permits = self.permits.clone();
        let server_tx = self.server_tx.clone();
        async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            permit.forget();
            let (near, far) = tokio::io::duplex(64 * 1024);
            let _ = server_tx.send(far);
            Ok(near)
        }
    }
}

fn fast_options() -> AgentOptions {
    AgentOptions {
        retry_count: 3,
        retry_delay: Duration::from_millis(5),
        heartbeat_interval: Duration::from_millis(50),
        keep_alive: false,
        session_id: Some("it-session".to_string()),
        ..AgentOptions::default()
    }
}

fn test_runtime() -> Arc<InMemoryRuntime> {
    let runtime = Arc::new(InMemoryRuntime::new("it-session"));
    runtime.register_class(0xA1, "com/example/Alpha", 6);
    runtime.register_class(0xB2, "com/example/Beta", 10);
    runtime
}

async fn read_until_eof(mut stream: DuplexStream) -> Vec<u8> {
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await.unwrap();
    bytes
}

#[tokio::test]
async fn test_startup_succeeds_within_retry_budget() {
    let (connector, attempts, mut server_rx) = MockConnector::new(2);
    let mut client = TcpClient::with_connector(fast_options(), connector, test_runtime());

    client.startup().await.expect("third attempt must succeed");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(server_rx.recv().await.is_some());

    assert_ok!(client.shutdown().await);
}

#[tokio::test]
async fn test_startup_fails_after_exhausted_budget() {
    let (connector, attempts, _server_rx) = MockConnector::new(u32::MAX);
    let mut client = TcpClient::with_connector(fast_options(), connector, test_runtime());

    match client.startup().await {
        Err(AgentError::Connect { attempts: reported, .. }) => assert_eq!(reported, 4),
        other => panic!("expected Connect error, got {other:?}"),
    }
    // first attempt + 3 retries
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_unbounded_retry_survives_many_failures() {
    let (connector, attempts, _server_rx) = MockConnector::new(10);
    let options = AgentOptions {
        retry_count: 0,
        ..fast_options()
    };
    let mut client = TcpClient::with_connector(options, connector, test_runtime());

    client.startup().await.expect("11th attempt must succeed");
    assert_eq!(attempts.load(Ordering::SeqCst), 11);

    assert_ok!(client.shutdown().await);
}

#[tokio::test]
async fn test_stream_opens_with_file_header() {
    let (connector, _, mut server_rx) = MockConnector::new(0);
    let mut client = TcpClient::with_connector(fast_options(), connector, test_runtime());

    client.startup().await.unwrap();
    let mut server = server_rx.recv().await.unwrap();
    let mut first = [0u8; 5];
    server.read_exact(&mut first).await.unwrap();
    assert_eq!(&first[..3], &[0x01, 0xC0, 0xC0]);
    assert_eq!(first, wire::header_frame());

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_frames_flow_while_idle() {
    let (connector, _, mut server_rx) = MockConnector::new(0);
    let mut client = TcpClient::with_connector(fast_options(), connector, test_runtime());

    client.startup().await.unwrap();
    let server = server_rx.recv().await.unwrap();
    // Several heartbeat periods pass with no data traffic
    tokio::time::sleep(Duration::from_millis(180)).await;
    client.shutdown().await.unwrap();

    let bytes = read_until_eof(server).await;
    let frames = ExecutionDataReader::new(Cursor::new(bytes))
        .unwrap()
        .read_all()
        .unwrap();
    let pings = frames
        .iter()
        .filter(|f| matches!(f, Frame::SessionInfo(_)))
        .count();
    assert!(pings >= 2, "expected repeated heartbeats, got {pings}");
    match &frames[0] {
        Frame::SessionInfo(info) => assert_eq!(info.id, "it-session"),
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn test_execution_data_reaches_the_wire() {
    let (connector, _, mut server_rx) = MockConnector::new(0);
    let runtime = test_runtime();
    let options = AgentOptions {
        // Long heartbeat keeps the stream free of pings for this test
        heartbeat_interval: Duration::from_secs(3600),
        ..fast_options()
    };
    let mut client = TcpClient::with_connector(options, connector, runtime.clone());

    client.startup().await.unwrap();
    let server = server_rx.recv().await.unwrap();

    runtime.record_probe("req-1", 0xA1, 1);
    runtime.record_probe("req-1", 0xA1, 5);
    runtime.record_probe("req-1", 0xB2, 0);
    client.write_execution_data("req-1", true).await.unwrap();
    client.shutdown().await.unwrap();

    let bytes = read_until_eof(server).await;
    let frames = ExecutionDataReader::new(Cursor::new(bytes))
        .unwrap()
        .read_all()
        .unwrap();
    let records: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            Frame::ExecutionData(rec) => Some(rec),
            _ => None,
        })
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].class_id, 0xA1);
    assert_eq!(records[0].correlation_id, "req-1");
    assert_eq!(
        records[0].probes,
        vec![false, true, false, false, false, true]
    );
    assert_eq!(records[1].class_id, 0xB2);

    // reset=true cleared the source
    let (_, left) = covstream_agent::CoverageSource::collect(runtime.as_ref(), "req-1");
    assert!(left.is_empty());
}

#[tokio::test]
async fn test_snapshot_without_hits_sends_only_session_info() {
    let (connector, _, mut server_rx) = MockConnector::new(0);
    let options = AgentOptions {
        heartbeat_interval: Duration::from_secs(3600),
        ..fast_options()
    };
    let mut client = TcpClient::with_connector(options, connector, test_runtime());

    client.startup().await.unwrap();
    let server = server_rx.recv().await.unwrap();
    client
        .write_execution_data(DEFAULT_CORRELATION_ID, false)
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let bytes = read_until_eof(server).await;
    let frames = ExecutionDataReader::new(Cursor::new(bytes))
        .unwrap()
        .read_all()
        .unwrap();
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], Frame::SessionInfo(_)));
}

#[tokio::test]
async fn test_keep_alive_reconnects_with_fresh_header() {
    let (connector, attempts, mut server_rx) = MockConnector::new(0);
    let options = AgentOptions {
        keep_alive: true,
        heartbeat_interval: Duration::from_secs(3600),
        ..fast_options()
    };
    let mut client = TcpClient::with_connector(options, connector, test_runtime());

    client.startup().await.unwrap();
    let first = server_rx.recv().await.unwrap();

    // Collector drops the connection; the worker must dial again
    drop(first);
    let second = tokio::time::timeout(Duration::from_secs(5), server_rx.recv())
        .await
        .expect("reconnect timed out")
        .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    client.shutdown().await.unwrap();
    let bytes = read_until_eof(second).await;
    // The new stream starts over with its own header
    assert_eq!(&bytes[..5], &wire::header_frame());
}

#[tokio::test]
async fn test_no_reconnect_without_keep_alive() {
    let (connector, attempts, mut server_rx) = MockConnector::new(0);
    let mut client = TcpClient::with_connector(fast_options(), connector, test_runtime());

    client.startup().await.unwrap();
    let first = server_rx.recv().await.unwrap();
    drop(first);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(client.is_closed().await);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_mid_reconnect_terminates_everything() {
    let (connector, _, mut server_rx) = MockConnector::new(0);
    let options = AgentOptions {
        keep_alive: true,
        retry_count: 0, // unbounded: the worker would retry forever
        retry_delay: Duration::from_millis(20),
        ..fast_options()
    };
    let mut client = TcpClient::with_connector(options, connector, test_runtime());

    client.startup().await.unwrap();
    let first = server_rx.recv().await.unwrap();

    // Swallow further channels so the worker keeps cycling through
    // reconnects while we shut down
    tokio::spawn(async move { while server_rx.recv().await.is_some() {} });
    drop(first);
    tokio::time::sleep(Duration::from_millis(30)).await;

    tokio::time::timeout(Duration::from_secs(5), client.shutdown())
        .await
        .expect("shutdown must not hang")
        .unwrap();
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_shutdown_racing_a_completing_reconnect_closes_it() {
    let (connector, permits, mut server_rx) = GatedConnector::new();
    let options = AgentOptions {
        keep_alive: true,
        heartbeat_interval: Duration::from_secs(3600),
        ..fast_options()
    };
    let mut client = TcpClient::with_connector(options, connector, test_runtime());

    client.startup().await.unwrap();
    let first = server_rx.recv().await.unwrap();

    // Collector drops the connection; the worker's next dial now waits on
    // the gate
    drop(first);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Release the dial while shutdown is in flight, so a fresh connection
    // can land concurrently with the cancellation
    let shutdown = tokio::spawn(async move {
        assert_ok!(client.shutdown().await);
        client
    });
    permits.add_permits(1);

    let client = tokio::time::timeout(Duration::from_secs(5), shutdown)
        .await
        .expect("shutdown must not hang")
        .unwrap();
    assert!(client.is_closed().await);

    // Whatever channel the late dial produced must have been torn down
    while let Ok(late) = server_rx.try_recv() {
        tokio::time::timeout(Duration::from_secs(1), read_until_eof(late))
            .await
            .expect("late connection must be closed");
    }
}

#[tokio::test]
async fn test_write_before_startup_is_not_connected() {
    let (connector, _, _server_rx) = MockConnector::new(0);
    let client = TcpClient::with_connector(fast_options(), connector, test_runtime());

    assert!(matches!(
        client.write_execution_data("req-1", false).await,
        Err(AgentError::NotConnected)
    ));
}

/// The same codec drives file dumps; a written `.exec` file decodes back
/// to the collected snapshot.
#[tokio::test]
async fn test_exec_file_round_trip() {
    use covstream_shared::protocol::ExecutionDataWriter;
    use std::io::{BufReader, BufWriter};

    let runtime = test_runtime();
    runtime.record_probe(DEFAULT_CORRELATION_ID, 0xB2, 7);
    let (session, records) =
        covstream_agent::CoverageSource::collect(runtime.as_ref(), DEFAULT_CORRELATION_ID);

    let file = tempfile::NamedTempFile::new().unwrap();
    let mut writer =
        ExecutionDataWriter::new(BufWriter::new(file.reopen().unwrap())).unwrap();
    writer.write_session_info(&session).unwrap();
    for record in &records {
        writer.write_execution_record(record).unwrap();
    }
    writer.flush().unwrap();
    drop(writer);

    let frames = ExecutionDataReader::new(BufReader::new(file.reopen().unwrap()))
        .unwrap()
        .read_all()
        .unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], Frame::SessionInfo(session));
    assert_eq!(frames[1], Frame::ExecutionData(records[0].clone()));
}

/// Full round trip against a real TCP collector.
#[tokio::test]
async fn test_tcp_collector_end_to_end() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let collector = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut bytes = Vec::new();
        socket.read_to_end(&mut bytes).await.unwrap();
        bytes
    });

    let runtime = test_runtime();
    let options = AgentOptions {
        address: "127.0.0.1".to_string(),
        port,
        heartbeat_interval: Duration::from_secs(3600),
        keep_alive: false,
        session_id: Some("it-session".to_string()),
        ..AgentOptions::default()
    };
    let mut client = TcpClient::new(options, runtime.clone());
    client.startup().await.unwrap();

    runtime.record_probe(DEFAULT_CORRELATION_ID, 0xA1, 3);
    client
        .write_execution_data(DEFAULT_CORRELATION_ID, false)
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let bytes = collector.await.unwrap();
    let frames = ExecutionDataReader::new(Cursor::new(bytes))
        .unwrap()
        .read_all()
        .unwrap();
    assert!(matches!(frames[0], Frame::SessionInfo(_)));
    match &frames[1] {
        Frame::ExecutionData(rec) => {
            assert_eq!(rec.class_id, 0xA1);
            assert_eq!(rec.class_name, "com/example/Alpha");
            assert_eq!(rec.probes[3], true);
        }
        other => panic!("unexpected frame {other:?}"),
    }
}
