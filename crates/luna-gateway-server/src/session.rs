//! Per-connection WebSocket session: the read loop that dispatches frames to
//! the bound handler and the write loop that drains the outbound queue.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use luna_gateway::{
    Connection, Frame, MessageContext, OutboundReceiver, Registry, RouteMatch, SharedHandler,
};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::config::WebSocketConfig;
use crate::error::{ServerError, ServerResult};

/// Tracks message size violations for a connection.
#[derive(Debug, Default)]
pub struct ViolationTracker {
    count: u32,
}

impl ViolationTracker {
    /// Create a new violation tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self { count: 0 }
    }

    /// Record a violation and return the current count.
    pub const fn record_violation(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    /// Get the current violation count.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Whether the connection should be terminated.
    #[must_use]
    pub const fn should_terminate(&self, max_violations: u32) -> bool {
        self.count > max_violations
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// The connection was closed locally (replacement, shutdown, slow consumer).
    ClosedLocally,
    /// Reading from the transport failed.
    ReadError(String),
    /// Writing to the transport failed.
    WriteError(String),
    /// The peer exceeded the oversized-message allowance.
    TooManyViolations,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("closed by peer"),
            Self::ClosedLocally => f.write_str("closed locally"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::WriteError(e) => write!(f, "write error: {e}"),
            Self::TooManyViolations => f.write_str("too many oversized messages"),
        }
    }
}

/// Get the size of a WebSocket message in bytes.
#[must_use]
pub fn ws_message_size(ws_msg: &WsMessage) -> usize {
    match ws_msg {
        WsMessage::Text(text) => text.len(),
        WsMessage::Binary(data) | WsMessage::Ping(data) | WsMessage::Pong(data) => data.len(),
        WsMessage::Close(frame) => frame.as_ref().map_or(0, |f| f.reason.len() + 2),
        WsMessage::Frame(frame) => frame.len(),
    }
}

/// Check if a WebSocket message size is within the allowed limits.
///
/// # Errors
///
/// Returns `ServerError::MessageTooLarge` if the message exceeds the configured limit.
pub fn validate_message_size(ws_msg: &WsMessage, config: &WebSocketConfig) -> ServerResult<()> {
    let size = ws_message_size(ws_msg);
    if config.is_message_size_valid(size) {
        Ok(())
    } else {
        Err(ServerError::MessageTooLarge {
            size,
            limit: config.max_message_size,
        })
    }
}

/// Turn a raw WebSocket message into an application frame.
///
/// Control frames yield `Ok(None)`; a close frame yields
/// `ServerError::ConnectionClosed`.
///
/// # Errors
///
/// Returns `ServerError::ConnectionClosed` for close frames.
pub fn process_ws_message(ws_msg: WsMessage) -> ServerResult<Option<Frame>> {
    match ws_msg {
        WsMessage::Text(text) => Ok(Some(Frame::Text(text))),
        WsMessage::Binary(data) => Ok(Some(Frame::Binary(data))),
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(None),
        WsMessage::Close(_) => {
            debug!("Received close frame");
            Err(ServerError::ConnectionClosed)
        }
    }
}

/// [`process_ws_message`] with size validation first.
///
/// # Errors
///
/// Returns `ServerError::MessageTooLarge` if the message exceeds the configured limit,
/// or `ServerError::ConnectionClosed` for close frames.
pub fn process_ws_message_with_limits(
    ws_msg: WsMessage,
    config: &WebSocketConfig,
) -> ServerResult<Option<Frame>> {
    validate_message_size(&ws_msg, config)?;
    process_ws_message(ws_msg)
}

/// Convert an outbound frame to a WebSocket message.
#[must_use]
pub fn frame_to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text),
        Frame::Binary(data) => WsMessage::Binary(data),
    }
}

/// Invoke `handler` for one frame, containing failures.
///
/// Errors and panics are logged and swallowed so that one bad message never
/// ends the session. Returns whether the handler succeeded.
pub async fn dispatch(handler: &SharedHandler, ctx: MessageContext) -> bool {
    let key = ctx.key().clone();
    let outcome = AssertUnwindSafe(async move { handler.call(ctx).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "Handler failed, continuing");
            false
        }
        Err(_) => {
            error!(key = %key, "Handler panicked, continuing");
            false
        }
    }
}

/// Run a session for an upgraded WebSocket stream.
///
/// Runs the read loop and the write loop concurrently until either ends,
/// then closes `connection` and removes it from `registry` (only if it is
/// still the registered connection for its key).
pub async fn run_session<S>(
    ws_stream: S,
    connection: Arc<Connection>,
    outbound_rx: OutboundReceiver,
    route: RouteMatch,
    registry: Registry,
    ws_config: WebSocketConfig,
) -> SessionEnd
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Sink<WsMessage>
        + Unpin
        + Send,
    <S as Sink<WsMessage>>::Error: fmt::Display,
{
    let (ws_sink, ws_stream) = ws_stream.split();
    let key = connection.key().clone();
    let connection_id = connection.id();

    info!(
        key = %key,
        connection_id = %connection_id,
        pattern = route.pattern(),
        "Starting session"
    );

    let end = tokio::select! {
        end = read_loop(ws_stream, &connection, &route, &registry, ws_config) => end,
        end = write_loop(ws_sink, &connection, outbound_rx) => end,
    };

    connection.close();
    let removed = registry.remove(key.as_str(), &connection);

    info!(key = %key, connection_id = %connection_id, reason = %end, removed, "Session ended");
    end
}

async fn read_loop<R>(
    mut ws_stream: R,
    connection: &Arc<Connection>,
    route: &RouteMatch,
    registry: &Registry,
    ws_config: WebSocketConfig,
) -> SessionEnd
where
    R: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut violations = ViolationTracker::new();

    while let Some(msg_result) = ws_stream.next().await {
        let ws_msg = match msg_result {
            Ok(msg) => msg,
            Err(e) => {
                warn!(key = %connection.key(), error = %e, "WebSocket read error");
                return SessionEnd::ReadError(e.to_string());
            }
        };

        let frame = match process_ws_message_with_limits(ws_msg, &ws_config) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(ServerError::ConnectionClosed) => return SessionEnd::PeerClosed,
            Err(ServerError::MessageTooLarge { size, limit }) => {
                let violation_count = violations.record_violation();
                warn!(
                    key = %connection.key(),
                    size = size,
                    limit = limit,
                    violations = violation_count,
                    "Received oversized message"
                );

                if violations.should_terminate(ws_config.max_violations) {
                    error!(
                        key = %connection.key(),
                        violations = violation_count,
                        "Terminating connection due to repeated size violations"
                    );
                    return SessionEnd::TooManyViolations;
                }
                continue;
            }
            Err(e) => {
                warn!(key = %connection.key(), error = %e, "Failed to process message");
                continue;
            }
        };

        let ctx = MessageContext::new(
            frame,
            route.shared_params(),
            Arc::clone(connection),
            registry.clone(),
        );
        dispatch(route.handler(), ctx).await;
    }

    SessionEnd::PeerClosed
}

async fn write_loop<W>(
    mut ws_sink: W,
    connection: &Connection,
    mut outbound_rx: OutboundReceiver,
) -> SessionEnd
where
    W: Sink<WsMessage> + Unpin,
    W::Error: fmt::Display,
{
    loop {
        tokio::select! {
            biased;

            () = connection.closed() => {
                let close = WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "connection closed by server".into(),
                }));
                if let Err(e) = ws_sink.send(close).await {
                    debug!(key = %connection.key(), error = %e, "Failed to send close frame");
                }
                return SessionEnd::ClosedLocally;
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::ClosedLocally;
                };
                if let Err(e) = ws_sink.send(frame_to_ws(frame)).await {
                    error!(key = %connection.key(), error = %e, "Failed to send message");
                    return SessionEnd::WriteError(e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luna_gateway::{HandlerError, HandlerResult, Params, Router};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    // ==================== Helpers ====================

    async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    type Recorded = mpsc::UnboundedReceiver<(String, Option<String>, Frame)>;

    /// Router whose `/user/{id}` handler forwards every context to a channel.
    fn recording_route() -> (RouteMatch, Recorded) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut router = Router::new();
        router
            .add_route("/user/{id}", move |ctx: MessageContext| {
                let tx = tx.clone();
                async move {
                    tx.send((
                        ctx.key().to_string(),
                        ctx.param("id").map(str::to_string),
                        ctx.payload().clone(),
                    ))
                    .map_err(|e| HandlerError::Internal(e.to_string()))
                }
            })
            .unwrap();
        (router.match_path("/user/alice").unwrap(), rx)
    }

    fn route_with(handler: impl luna_gateway::Handler) -> RouteMatch {
        let mut router = Router::new();
        router.add_route("/user/{id}", handler).unwrap();
        router.match_path("/user/alice").unwrap()
    }

    // ==================== ViolationTracker Tests ====================

    #[test]
    fn test_violation_tracker_record() {
        let mut tracker = ViolationTracker::new();

        assert_eq!(tracker.record_violation(), 1);
        assert_eq!(tracker.record_violation(), 2);
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn test_violation_tracker_should_terminate() {
        let mut tracker = ViolationTracker::new();

        tracker.record_violation();
        assert!(!tracker.should_terminate(1));

        tracker.record_violation();
        assert!(tracker.should_terminate(1));
    }

    #[test]
    fn test_violation_tracker_saturating_add() {
        let mut tracker = ViolationTracker { count: u32::MAX };
        assert_eq!(tracker.record_violation(), u32::MAX);
    }

    // ==================== Message Conversion Tests ====================

    #[test]
    fn test_ws_message_size() {
        assert_eq!(ws_message_size(&WsMessage::Text("hello world".to_string())), 11);
        assert_eq!(ws_message_size(&WsMessage::Binary(vec![1, 2, 3, 4, 5])), 5);
        assert_eq!(ws_message_size(&WsMessage::Ping(vec![1, 2, 3])), 3);
        assert_eq!(ws_message_size(&WsMessage::Close(None)), 0);
    }

    #[test]
    fn test_validate_message_size_at_limit() {
        let config = WebSocketConfig::new().with_max_message_size(5);
        assert!(validate_message_size(&WsMessage::Text("12345".to_string()), &config).is_ok());

        match validate_message_size(&WsMessage::Text("123456".to_string()), &config) {
            Err(ServerError::MessageTooLarge { size, limit }) => {
                assert_eq!(size, 6);
                assert_eq!(limit, 5);
            }
            other => panic!("Expected MessageTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_process_ws_message_data_frames() {
        assert_eq!(
            process_ws_message(WsMessage::Text("hi".to_string())).unwrap(),
            Some(Frame::text("hi"))
        );
        assert_eq!(
            process_ws_message(WsMessage::Binary(vec![7])).unwrap(),
            Some(Frame::Binary(vec![7]))
        );
    }

    #[test]
    fn test_process_ws_message_control_frames() {
        assert!(process_ws_message(WsMessage::Ping(vec![1])).unwrap().is_none());
        assert!(process_ws_message(WsMessage::Pong(vec![1])).unwrap().is_none());
        assert!(matches!(
            process_ws_message(WsMessage::Close(None)),
            Err(ServerError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_process_with_limits_rejects_oversized() {
        let config = WebSocketConfig::new().with_max_message_size(2);
        let result = process_ws_message_with_limits(WsMessage::Text("big".to_string()), &config);
        assert!(matches!(result, Err(ServerError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_frame_to_ws() {
        assert_eq!(frame_to_ws(Frame::text("a")), WsMessage::Text("a".to_string()));
        assert_eq!(frame_to_ws(Frame::Binary(vec![1])), WsMessage::Binary(vec![1]));
    }

    // ==================== Dispatch Tests ====================

    #[tokio::test]
    async fn test_dispatch_contains_errors_and_panics() {
        let (connection, _rx) = Connection::new("alice", 1);
        let make_ctx = || {
            MessageContext::new(
                Frame::text("x"),
                Arc::new(Params::new()),
                connection.clone(),
                Registry::new(),
            )
        };

        let ok = route_with(|_ctx: MessageContext| async { Ok::<(), HandlerError>(()) });
        assert!(dispatch(ok.handler(), make_ctx()).await);

        let failing = route_with(|_ctx: MessageContext| async {
            Err::<(), _>(HandlerError::Rejected("no".into()))
        });
        assert!(!dispatch(failing.handler(), make_ctx()).await);

        let panicking = route_with(|_ctx: MessageContext| async {
            let result: HandlerResult = Err(HandlerError::Internal("boom".into()));
            if result.is_err() {
                panic!("handler exploded");
            }
            result
        });
        assert!(!dispatch(panicking.handler(), make_ctx()).await);
    }

    // ==================== Session Loop Tests ====================

    #[tokio::test]
    async fn test_session_delivers_frames_in_order() {
        let (server, mut client) = ws_pair().await;
        let registry = Registry::new();
        let (connection, outbound_rx) = Connection::new("alice", 8);
        registry.register(connection.clone());
        let (route, mut seen) = recording_route();

        let session = tokio::spawn(run_session(
            server,
            connection,
            outbound_rx,
            route,
            registry.clone(),
            WebSocketConfig::new(),
        ));

        for text in ["m1", "m2", "m3"] {
            client.send(WsMessage::Text(text.to_string())).await.unwrap();
        }

        for expected in ["m1", "m2", "m3"] {
            let (key, id, frame) = timeout(TEST_TIMEOUT, seen.recv()).await.unwrap().unwrap();
            assert_eq!(key, "alice");
            assert_eq!(id.as_deref(), Some("alice"));
            assert_eq!(frame, Frame::text(expected));
        }

        client.close(None).await.unwrap();
        let end = timeout(TEST_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::PeerClosed);
        assert!(registry.lookup("alice").is_none());
    }

    #[tokio::test]
    async fn test_session_continues_after_handler_error() {
        let (server, mut client) = ws_pair().await;
        let (tx, mut seen) = mpsc::unbounded_channel();
        let route = route_with(move |ctx: MessageContext| {
            let tx = tx.clone();
            async move {
                let text = ctx.payload().as_text().unwrap_or_default().to_string();
                if text == "bad" {
                    return Err(HandlerError::Rejected(text));
                }
                tx.send(text).map_err(|e| HandlerError::Internal(e.to_string()))
            }
        });
        let (connection, outbound_rx) = Connection::new("alice", 8);

        tokio::spawn(run_session(
            server,
            connection,
            outbound_rx,
            route,
            Registry::new(),
            WebSocketConfig::new(),
        ));

        client.send(WsMessage::Text("bad".to_string())).await.unwrap();
        client.send(WsMessage::Text("good".to_string())).await.unwrap();

        let received = timeout(TEST_TIMEOUT, seen.recv()).await.unwrap().unwrap();
        assert_eq!(received, "good");
    }

    #[tokio::test]
    async fn test_session_pushes_outbound_frames() {
        let (server, mut client) = ws_pair().await;
        let (connection, outbound_rx) = Connection::new("alice", 8);
        let (route, _seen) = recording_route();

        tokio::spawn(run_session(
            server,
            connection.clone(),
            outbound_rx,
            route,
            Registry::new(),
            WebSocketConfig::new(),
        ));

        connection.send(Frame::text("pushed")).unwrap();
        let msg = timeout(TEST_TIMEOUT, client.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(msg, WsMessage::Text("pushed".to_string()));
    }

    #[tokio::test]
    async fn test_reply_from_handler_reaches_client() {
        let (server, mut client) = ws_pair().await;
        let (connection, outbound_rx) = Connection::new("alice", 8);
        let route = route_with(|ctx: MessageContext| async move {
            let text = ctx.payload().as_text().unwrap_or_default().to_uppercase();
            ctx.reply(Frame::text(text))?;
            Ok::<(), HandlerError>(())
        });

        tokio::spawn(run_session(
            server,
            connection,
            outbound_rx,
            route,
            Registry::new(),
            WebSocketConfig::new(),
        ));

        client.send(WsMessage::Text("echo".to_string())).await.unwrap();
        let msg = timeout(TEST_TIMEOUT, client.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(msg, WsMessage::Text("ECHO".to_string()));
    }

    #[tokio::test]
    async fn test_local_close_unblocks_session_and_notifies_peer() {
        let (server, mut client) = ws_pair().await;
        let registry = Registry::new();
        let (connection, outbound_rx) = Connection::new("alice", 8);
        registry.register(connection.clone());
        let (route, _seen) = recording_route();

        let session = tokio::spawn(run_session(
            server,
            connection.clone(),
            outbound_rx,
            route,
            registry.clone(),
            WebSocketConfig::new(),
        ));

        assert!(connection.close());
        assert!(!connection.close());

        let end = timeout(TEST_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::ClosedLocally);
        assert!(registry.is_empty());

        let msg = timeout(TEST_TIMEOUT, client.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(msg, WsMessage::Close(_)));
    }

    #[tokio::test]
    async fn test_replaced_session_does_not_remove_successor() {
        let (server, _client) = ws_pair().await;
        let registry = Registry::new();
        let (first, first_rx) = Connection::new("u1", 8);
        registry.register(first.clone());
        let (route, _seen) = recording_route();

        let session = tokio::spawn(run_session(
            server,
            first.clone(),
            first_rx,
            route,
            registry.clone(),
            WebSocketConfig::new(),
        ));

        let (second, _second_rx) = Connection::new("u1", 8);
        registry.register(second.clone());

        let end = timeout(TEST_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::ClosedLocally);
        assert!(first.is_closed());
        assert!(Arc::ptr_eq(&registry.lookup("u1").unwrap(), &second));
    }

    #[tokio::test]
    async fn test_oversized_messages_terminate_after_allowance() {
        let (server, mut client) = ws_pair().await;
        let (connection, outbound_rx) = Connection::new("alice", 8);
        let (route, mut seen) = recording_route();
        let config = WebSocketConfig::new()
            .with_max_message_size(4)
            .with_max_violations(1);

        let session = tokio::spawn(run_session(
            server,
            connection,
            outbound_rx,
            route,
            Registry::new(),
            config,
        ));

        client.send(WsMessage::Text("too long".to_string())).await.unwrap();
        client.send(WsMessage::Text("ok".to_string())).await.unwrap();
        let (_, _, frame) = timeout(TEST_TIMEOUT, seen.recv()).await.unwrap().unwrap();
        assert_eq!(frame, Frame::text("ok"));

        client.send(WsMessage::Text("too long".to_string())).await.unwrap();
        let end = timeout(TEST_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::TooManyViolations);
    }

    #[tokio::test]
    async fn test_message_within_limit_survives_protocol_layer() {
        // Frame limit configured below the message limit.
        let config = WebSocketConfig::new()
            .with_max_message_size(1024 * 1024)
            .with_max_frame_size(64 * 1024);
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(
            server_io,
            Role::Server,
            Some(config.protocol_config()),
        )
        .await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let registry = Registry::new();
        let (connection, outbound_rx) = Connection::new("alice", 8);
        registry.register(connection.clone());
        let (route, mut seen) = recording_route();

        let session = tokio::spawn(run_session(
            server,
            connection.clone(),
            outbound_rx,
            route,
            registry.clone(),
            config,
        ));

        let large = "x".repeat(100 * 1024);
        client.send(WsMessage::Text(large.clone())).await.unwrap();
        client.send(WsMessage::Text("after".to_string())).await.unwrap();

        let (_, _, frame) = timeout(TEST_TIMEOUT, seen.recv()).await.unwrap().unwrap();
        assert_eq!(frame, Frame::text(large));
        let (_, _, frame) = timeout(TEST_TIMEOUT, seen.recv()).await.unwrap().unwrap();
        assert_eq!(frame, Frame::text("after"));
        assert!(!connection.is_closed());
        assert!(registry.lookup("alice").is_some());

        client.close(None).await.unwrap();
        let end = timeout(TEST_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::PeerClosed);
    }

    #[tokio::test]
    async fn test_dropped_transport_ends_session() {
        let (server, client) = ws_pair().await;
        let registry = Registry::new();
        let (connection, outbound_rx) = Connection::new("alice", 8);
        registry.register(connection.clone());
        let (route, _seen) = recording_route();

        let session = tokio::spawn(run_session(
            server,
            connection.clone(),
            outbound_rx,
            route,
            registry.clone(),
            WebSocketConfig::new(),
        ));

        drop(client);
        let end = timeout(TEST_TIMEOUT, session).await.unwrap().unwrap();
        assert!(matches!(end, SessionEnd::PeerClosed | SessionEnd::ReadError(_)));
        assert!(connection.is_closed());
        assert!(registry.is_empty());
    }
}
