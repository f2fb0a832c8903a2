//! DeviceSession: the device half of one relay session.
//!
//! Owns the device connection and the byte-stream channel opened on it.
//!
//! ```text
//! start()  ─► connect ─► GET /webrtc/info ─► open stream ─► spawn read loop
//!
//!   read loop:   [len:4][payload] ... ─► DeviceEvent::Object(payload)
//!   write_object(payload) ─► [len:4][payload]
//! ```
//!
//! The read loop runs in its own task and reports through an `mpsc` channel.
//! Writes are serialized by an async mutex over the write half, so reads and
//! writes never wait on each other.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signaling_core::{decode_length, encode_object, FramingError, FRAME_HEADER_SIZE};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::discovery::{resolve_stream_port, DiscoveryError, WEBRTC_INFO_METHOD, WEBRTC_INFO_PATH};
use super::transport::{
    ConnectOptions, DeviceConnection, DeviceConnector, DeviceStream, StreamWriter, TransportError,
};
use crate::domain::{
    BridgeConfig, DeviceSessionState, PortDiscoveryPolicy, SessionId, WriteRetryPolicy,
};

/// What the read loop reports to the client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// One complete framed object, payload only.
    Object(Vec<u8>),
    /// The stream ended or failed; no further events follow.
    StreamFailed(String),
}

/// Errors that end a device session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device session already started")]
    AlreadyStarted,

    #[error("device connect failed: {0}")]
    Connect(#[source] TransportError),

    #[error("stream port query failed: {0}")]
    Query(#[source] TransportError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("stream open failed: {0}")]
    StreamOpen(#[source] TransportError),

    #[error("{step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },

    #[error("stream write failed: {0}")]
    Write(#[source] io::Error),

    #[error("device session is not connected")]
    NotConnected,

    #[error(transparent)]
    Framing(#[from] FramingError),
}

pub struct DeviceSession {
    id: SessionId,
    state: DeviceSessionState,
    connection: Option<Box<dyn DeviceConnection>>,
    writer: Option<Mutex<StreamWriter>>,
    stream_port: Option<u32>,
    /// Cleared by `stop` and by the read loop when the stream fails.
    connected: Arc<AtomicBool>,
    read_task: Option<JoinHandle<()>>,
    port_discovery: PortDiscoveryPolicy,
    connect_timeout: Duration,
    io_timeout: Duration,
    write_retry: WriteRetryPolicy,
}

impl DeviceSession {
    pub fn new(id: SessionId, config: &BridgeConfig) -> Self {
        Self {
            id,
            state: DeviceSessionState::Idle,
            connection: None,
            writer: None,
            stream_port: None,
            connected: Arc::new(AtomicBool::new(false)),
            read_task: None,
            port_discovery: config.port_discovery,
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
            write_retry: config.write_retry,
        }
    }

    pub fn state(&self) -> DeviceSessionState {
        self.state
    }

    /// `true` while the stream is open and the read loop has not failed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn stream_port(&self) -> Option<u32> {
        self.stream_port
    }

    /// Connects to the device, discovers the stream port, opens the stream and
    /// starts the read loop.
    ///
    /// Each setup step is bounded by the connect timeout.  On any failure the
    /// session is stopped (state `Closed`) before the error is returned.
    pub async fn start(
        &mut self,
        connector: &dyn DeviceConnector,
        options: ConnectOptions,
        events: mpsc::Sender<DeviceEvent>,
    ) -> Result<(), SessionError> {
        if self.state != DeviceSessionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }

        match self.try_start(connector, options, events).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("session {}: device session setup failed: {e}", self.id);
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn try_start(
        &mut self,
        connector: &dyn DeviceConnector,
        options: ConnectOptions,
        events: mpsc::Sender<DeviceEvent>,
    ) -> Result<(), SessionError> {
        let limit = self.connect_timeout;
        self.transition(DeviceSessionState::Connecting);
        info!(
            "session {}: connecting to device {} of product {} ({} credential)",
            self.id,
            options.device_id,
            options.product_id,
            options.credential.kind()
        );

        let connection = within("device connect", limit, connector.connect(options))
            .await?
            .map_err(SessionError::Connect)?;
        let connection: &dyn DeviceConnection = &**self.connection.insert(connection);

        let response = within(
            "stream port query",
            limit,
            connection.query(WEBRTC_INFO_METHOD, WEBRTC_INFO_PATH),
        )
        .await?
        .map_err(SessionError::Query)?;
        let port = resolve_stream_port(&response, self.port_discovery)?;

        self.transition(DeviceSessionState::StreamOpening);
        debug!("session {}: opening stream on port {port}", self.id);

        let connection = self
            .connection
            .as_deref()
            .ok_or(SessionError::NotConnected)?;
        let DeviceStream { reader, writer } =
            within("stream open", limit, connection.open_stream(port))
                .await?
                .map_err(SessionError::StreamOpen)?;

        self.writer = Some(Mutex::new(writer));
        self.stream_port = Some(port);
        self.connected.store(true, Ordering::Release);
        self.transition(DeviceSessionState::Connected);

        self.read_task = Some(tokio::spawn(read_objects(
            reader,
            self.id,
            events,
            Arc::clone(&self.connected),
        )));

        info!("session {}: device stream open on port {port}", self.id);
        Ok(())
    }

    /// Frames `payload` and writes it to the device stream.
    ///
    /// Concurrent callers are serialized, so frames never interleave.
    pub async fn write_object(&self, payload: &[u8]) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let writer = self.writer.as_ref().ok_or(SessionError::NotConnected)?;
        let frame = encode_object(payload)?;

        let mut writer = writer.lock().await;
        within(
            "stream write",
            self.io_timeout,
            write_frame(&mut *writer, &frame, &self.write_retry),
        )
        .await?
        .map_err(SessionError::Write)?;

        trace!("session {}: wrote {} byte object", self.id, payload.len());
        Ok(())
    }

    /// Closes the device connection and stops the read loop.
    ///
    /// Safe to call in any state and any number of times.  Close errors are
    /// logged, never returned.
    pub async fn stop(&mut self) {
        if self.state == DeviceSessionState::Closed {
            return;
        }

        self.connected.store(false, Ordering::Release);
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        self.writer = None;

        if let Some(connection) = self.connection.take() {
            close_connection(self.id, connection, self.connect_timeout).await;
        }

        self.transition(DeviceSessionState::Closed);
        info!("session {}: device session closed", self.id);
    }

    fn transition(&mut self, next: DeviceSessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal device session transition {:?} → {next:?}",
            self.state
        );
        debug!("session {}: device {:?} → {next:?}", self.id, self.state);
        self.state = next;
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        // Dropped without `stop`: unwinding from a panic, or setup cancelled.
        if let Some(connection) = self.connection.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(close_connection(self.id, connection, self.connect_timeout));
            }
        }
    }
}

/// Closes `connection`, logging rather than returning any failure.
async fn close_connection(id: SessionId, connection: Box<dyn DeviceConnection>, limit: Duration) {
    match timeout(limit, connection.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("session {id}: device close failed: {e}"),
        Err(_) => debug!("session {id}: device close timed out"),
    }
}

// ── Stream I/O ────────────────────────────────────────────────────────────────

async fn within<F: Future>(
    step: &'static str,
    after: Duration,
    fut: F,
) -> Result<F::Output, SessionError> {
    timeout(after, fut)
        .await
        .map_err(|_| SessionError::Timeout { step, after })
}

/// Reads framed objects until the stream fails, forwarding each payload.
///
/// A short read of either the length prefix or the payload is fatal and no
/// partial object is ever forwarded.  Ends quietly if the receiver is gone.
pub(crate) async fn read_objects<R>(
    mut reader: R,
    id: SessionId,
    events: mpsc::Sender<DeviceEvent>,
    connected: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let mut prefix = [0u8; FRAME_HEADER_SIZE];
        if let Err(e) = reader.read_exact(&mut prefix).await {
            break format!("reading length prefix: {e}");
        }

        // Grow the buffer as bytes arrive rather than trusting the prefix.
        let declared = u64::from(decode_length(prefix));
        let mut payload = Vec::new();
        match (&mut reader).take(declared).read_to_end(&mut payload).await {
            Ok(n) if n as u64 == declared => {}
            Ok(n) => break format!("stream ended after {n} of {declared} payload bytes"),
            Err(e) => break format!("reading payload: {e}"),
        }

        trace!("session {id}: read {declared} byte object");
        if events.send(DeviceEvent::Object(payload)).await.is_err() {
            debug!("session {id}: client session gone; read loop exiting");
            connected.store(false, Ordering::Release);
            return;
        }
    };

    connected.store(false, Ordering::Release);
    warn!("session {id}: device stream failed: {reason}");
    let _ = events.send(DeviceEvent::StreamFailed(reason)).await;
}

/// Writes one whole frame, retrying only while none of it has been accepted.
pub(crate) async fn write_frame<W>(
    writer: &mut W,
    frame: &[u8],
    policy: &WriteRetryPolicy,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut written = 0;
    let mut failures = 0u32;

    while written < frame.len() {
        match writer.write(&frame[written..]).await {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "device stream accepted no bytes",
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if written == 0 && failures + 1 < max_attempts => {
                failures += 1;
                let delay = policy.backoff_for(failures);
                debug!("stream write failed ({e}); retry {failures} in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    writer.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fake_device::FakeConnector;
    use crate::application::transport::status;
    use signaling_core::Credential;
    use tokio_test::io::Builder;

    fn options() -> ConnectOptions {
        ConnectOptions {
            product_id: "p1".into(),
            device_id: "d1".into(),
            credential: Credential::ServerConnectToken("tok".into()),
            username: "u".into(),
            password: "pw".into(),
            server_url: None,
        }
    }

    fn quick_retry(max_attempts: u32) -> WriteRetryPolicy {
        WriteRetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn broken_pipe() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "pipe")
    }

    async fn drain(mut rx: mpsc::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    // ── read_objects ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_read_forwards_complete_objects_in_order() {
        // Arrange: two objects, the second split across reads
        let reader = Builder::new()
            .read(&[2, 0, 0, 0, b'h', b'i'])
            .read(&[3, 0, 0])
            .read(&[0, b'a', b'b', b'c'])
            .build();
        let (tx, rx) = mpsc::channel(8);
        let connected = Arc::new(AtomicBool::new(true));

        // Act
        read_objects(reader, SessionId::new(), tx, Arc::clone(&connected)).await;

        // Assert: both objects, then the failure from end of stream
        let events = drain(rx).await;
        assert_eq!(events[0], DeviceEvent::Object(b"hi".to_vec()));
        assert_eq!(events[1], DeviceEvent::Object(b"abc".to_vec()));
        assert!(matches!(events[2], DeviceEvent::StreamFailed(_)));
        assert_eq!(events.len(), 3);
        assert!(!connected.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_read_short_prefix_fails_stream() {
        let reader = Builder::new().read(&[3, 0]).build();
        let (tx, rx) = mpsc::channel(8);

        read_objects(reader, SessionId::new(), tx, Arc::new(AtomicBool::new(true))).await;

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], DeviceEvent::StreamFailed(r) if r.contains("prefix")));
    }

    #[tokio::test]
    async fn test_read_short_payload_forwards_nothing() {
        // Arrange: declares 3 bytes, delivers 2, then the stream ends
        let reader = Builder::new().read(&[3, 0, 0, 0, b'a', b'b']).build();
        let (tx, rx) = mpsc::channel(8);

        // Act
        read_objects(reader, SessionId::new(), tx, Arc::new(AtomicBool::new(true))).await;

        // Assert: no partial object
        let events = drain(rx).await;
        assert_eq!(
            events,
            vec![DeviceEvent::StreamFailed(
                "stream ended after 2 of 3 payload bytes".into()
            )]
        );
    }

    #[tokio::test]
    async fn test_read_zero_length_object() {
        let reader = Builder::new().read(&[0, 0, 0, 0]).build();
        let (tx, rx) = mpsc::channel(8);

        read_objects(reader, SessionId::new(), tx, Arc::new(AtomicBool::new(true))).await;

        let events = drain(rx).await;
        assert_eq!(events[0], DeviceEvent::Object(Vec::new()));
    }

    // ── write_frame ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_write_frame_writes_whole_frame() {
        let frame = encode_object(b"hello").unwrap();
        let mut writer = Builder::new().write(&frame).build();

        write_frame(&mut writer, &frame, &quick_retry(3)).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_frame_retries_before_first_byte() {
        // Arrange: two refusals, then the frame goes through
        let frame = encode_object(b"hello").unwrap();
        let mut writer = Builder::new()
            .write_error(broken_pipe())
            .write_error(broken_pipe())
            .write(&frame)
            .build();

        // Act
        let result = write_frame(&mut writer, &frame, &quick_retry(3)).await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_write_frame_gives_up_after_budget() {
        let frame = encode_object(b"x").unwrap();
        let mut writer = Builder::new()
            .write_error(broken_pipe())
            .write_error(broken_pipe())
            .build();

        let err = write_frame(&mut writer, &frame, &quick_retry(2))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_write_frame_never_retries_after_partial_write() {
        // Arrange: 3 bytes accepted, then an error; a retry would corrupt framing
        let frame = encode_object(b"hello").unwrap();
        let mut writer = Builder::new()
            .write(&frame[..3])
            .write_error(broken_pipe())
            .build();

        // Act
        let result = write_frame(&mut writer, &frame, &quick_retry(5)).await;

        // Assert
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    // ── DeviceSession lifecycle ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_start_uses_discovered_port() {
        // Arrange
        let connector = FakeConnector::with_port(4242);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        // Act
        session.start(&connector, options(), tx).await.unwrap();

        // Assert
        assert_eq!(session.state(), DeviceSessionState::Connected);
        assert!(session.is_connected());
        assert_eq!(session.stream_port(), Some(4242));
        let log = connector.log();
        assert_eq!(log.queries, vec![("GET".to_owned(), "/webrtc/info".to_owned())]);
        assert_eq!(log.opened_ports, vec![4242]);
    }

    #[tokio::test]
    async fn test_start_strict_discovery_failure_closes_session() {
        // Arrange
        let connector = FakeConnector::with_status(status::NOT_FOUND);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        // Act
        let err = session.start(&connector, options(), tx).await.unwrap_err();

        // Assert: no stream opened, connection closed
        assert!(matches!(
            err,
            SessionError::Discovery(DiscoveryError::UnexpectedStatus(404))
        ));
        assert_eq!(session.state(), DeviceSessionState::Closed);
        let log = connector.log();
        assert!(log.opened_ports.is_empty());
        assert_eq!(log.closes, 1);
    }

    #[tokio::test]
    async fn test_start_fallback_opens_configured_port() {
        let connector = FakeConnector::with_status(status::NOT_FOUND);
        let config = BridgeConfig {
            port_discovery: PortDiscoveryPolicy::Fallback(42),
            ..BridgeConfig::default()
        };
        let mut session = DeviceSession::new(SessionId::new(), &config);
        let (tx, _rx) = mpsc::channel(8);

        session.start(&connector, options(), tx).await.unwrap();

        assert_eq!(connector.log().opened_ports, vec![42]);
    }

    #[tokio::test]
    async fn test_start_connect_failure_is_fatal() {
        let connector = FakeConnector::refusing();
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        let err = session.start(&connector, options(), tx).await.unwrap_err();

        assert!(matches!(err, SessionError::Connect(_)));
        assert_eq!(session.state(), DeviceSessionState::Closed);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let connector = FakeConnector::with_port(7);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        session.start(&connector, options(), tx.clone()).await.unwrap();

        let err = session.start(&connector, options(), tx).await.unwrap_err();

        assert!(matches!(err, SessionError::AlreadyStarted));
        assert_eq!(connector.log().connects.len(), 1);
    }

    #[tokio::test]
    async fn test_write_object_reaches_device_framed() {
        // Arrange
        let connector = FakeConnector::with_port(4242);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        session.start(&connector, options(), tx).await.unwrap();
        let mut device = connector.take_device_end().unwrap();

        // Act
        session.write_object(b"hello").await.unwrap();

        // Assert: 4-byte length 5, then the payload
        let mut buf = [0u8; 9];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &[5, 0, 0, 0]);
        assert_eq!(&buf[4..], b"hello");
    }

    #[tokio::test]
    async fn test_device_objects_arrive_as_events() {
        let connector = FakeConnector::with_port(4242);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        session.start(&connector, options(), tx).await.unwrap();
        let mut device = connector.take_device_end().unwrap();

        device
            .write_all(&encode_object(br#"{"type":0}"#).unwrap())
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(DeviceEvent::Object(br#"{"type":0}"#.to_vec()))
        );
    }

    #[tokio::test]
    async fn test_write_before_start_is_not_connected() {
        let session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let err = session.write_object(b"x").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        // Arrange
        let connector = FakeConnector::with_port(4242);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        session.start(&connector, options(), tx).await.unwrap();

        // Act
        session.stop().await;
        session.stop().await;

        // Assert: connection closed exactly once, writes refused
        assert_eq!(session.state(), DeviceSessionState::Closed);
        assert!(!session.is_connected());
        assert_eq!(connector.log().closes, 1);
        assert!(matches!(
            session.write_object(b"x").await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_times_out_on_hanging_connect() {
        // Arrange
        let connector = FakeConnector::hanging();
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);

        // Act
        let err = session.start(&connector, options(), tx).await.unwrap_err();

        // Assert
        assert!(matches!(
            err,
            SessionError::Timeout { step: "device connect", after } if after == Duration::from_secs(10)
        ));
        assert_eq!(session.state(), DeviceSessionState::Closed);
        assert!(connector.log().queries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_times_out_when_device_never_reads() {
        // Arrange: hold the device end but never read, so the pipe fills up
        let connector = FakeConnector::with_port(4242);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        session.start(&connector, options(), tx).await.unwrap();
        let _device = connector.take_device_end().unwrap();

        // Act
        let err = session.write_object(&vec![b'x'; 256 * 1024]).await.unwrap_err();

        // Assert
        assert!(matches!(err, SessionError::Timeout { step: "stream write", .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_never_interleave() {
        // Arrange
        const WRITERS: usize = 50;
        const PAYLOAD: usize = 1000;
        let connector = FakeConnector::with_port(4242);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        session.start(&connector, options(), tx).await.unwrap();
        let mut device = connector.take_device_end().unwrap();
        let session = Arc::new(session);

        // Act: every writer sends a payload made of its own byte
        let writers: Vec<_> = (0..WRITERS)
            .map(|i| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.write_object(&[i as u8; PAYLOAD]).await })
            })
            .collect();
        let mut received = vec![0u8; WRITERS * (FRAME_HEADER_SIZE + PAYLOAD)];
        device.read_exact(&mut received).await.unwrap();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        // Assert: each frame is whole and carries a single writer's bytes
        let mut seen = Vec::new();
        let mut rest = &received[..];
        while !rest.is_empty() {
            let (payload, consumed) = signaling_core::decode_object(rest).unwrap();
            assert_eq!(payload.len(), PAYLOAD);
            assert!(payload.iter().all(|b| *b == payload[0]));
            seen.push(payload[0]);
            rest = &rest[consumed..];
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..WRITERS as u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_drop_without_stop_still_closes_connection() {
        // Arrange
        let connector = FakeConnector::with_port(4242);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        session.start(&connector, options(), tx).await.unwrap();

        // Act
        drop(session);

        // Assert: the close runs on a spawned task
        timeout(Duration::from_secs(1), async {
            while connector.log().closes == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connection never closed after drop");
        assert_eq!(connector.log().closes, 1);
    }

    #[tokio::test]
    async fn test_stop_releases_stream_halves() {
        // Arrange
        let connector = FakeConnector::with_port(4242);
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        session.start(&connector, options(), tx).await.unwrap();
        let mut device = connector.take_device_end().unwrap();

        // Act
        session.stop().await;

        // Assert: the device sees end of stream once the aborted reader is gone
        let mut rest = Vec::new();
        let read = timeout(Duration::from_secs(1), device.read_to_end(&mut rest)).await;
        assert!(matches!(read, Ok(Ok(0))));
    }

    #[tokio::test]
    async fn test_stop_before_start_closes() {
        let mut session = DeviceSession::new(SessionId::new(), &BridgeConfig::default());
        session.stop().await;
        assert_eq!(session.state(), DeviceSessionState::Closed);
    }
}
