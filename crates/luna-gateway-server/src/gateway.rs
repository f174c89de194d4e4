//! The gateway: accepts TCP connections, admits and upgrades them, and
//! starts one session task per registered connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use luna_gateway::{Connection, Frame, IdentityKey, Registry, RouteMatch, Router};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::extractor::{KeyExtractor, UpgradeRequest};
use crate::session::{SessionEnd, run_session};

/// An upgrade request that passed routing and key extraction.
#[derive(Debug, Clone)]
pub struct Admission {
    key: IdentityKey,
    route: RouteMatch,
}

impl Admission {
    /// Identity key the connection will be registered under.
    #[must_use]
    pub const fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// The matched route and its captured parameters.
    #[must_use]
    pub const fn route(&self) -> &RouteMatch {
        &self.route
    }
}

/// WebSocket gateway.
///
/// Cheap to clone; clones share the router, registry and shutdown signal.
#[derive(Clone)]
pub struct Gateway {
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    extractor: Arc<dyn KeyExtractor>,
    registry: Registry,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Create a gateway. The router is frozen from here on.
    #[must_use]
    pub fn new(config: ServerConfig, router: Router, extractor: impl KeyExtractor) -> Self {
        Self {
            config: Arc::new(config),
            router: Arc::new(router),
            extractor: Arc::new(extractor),
            registry: Registry::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the route table.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Get a handle to the connection registry.
    #[must_use]
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether [`Gateway::shutdown`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Decide whether an upgrade request may proceed.
    ///
    /// Checks the route first, then the identity key, then capacity. A key
    /// that is already registered is always admitted since it replaces its
    /// predecessor rather than adding a connection. Never mutates the
    /// registry.
    ///
    /// # Errors
    ///
    /// - `ServerError::NoRoute` if no pattern matches the request path
    /// - `ServerError::MissingKey` if the extractor yields no key, or an
    ///   empty key while empty keys are disallowed
    /// - `ServerError::TooManyConnections` if the registry is full
    pub fn admit(&self, request: &UpgradeRequest) -> ServerResult<Admission> {
        let path = request.uri().path();
        let route = self
            .router
            .match_path(path)
            .ok_or_else(|| ServerError::NoRoute(path.to_string()))?;

        let key = self
            .extractor
            .extract_key(request)
            .map(IdentityKey::from)
            .filter(|key| self.config.allow_empty_keys || !key.is_empty())
            .ok_or(ServerError::MissingKey)?;

        let max = self.config.max_connections;
        if self.registry.len() >= max && self.registry.lookup(key.as_str()).is_none() {
            return Err(ServerError::TooManyConnections(max));
        }

        Ok(Admission { key, route })
    }

    /// Upgrade `stream`, register the connection and spawn its session.
    ///
    /// Admission runs inside the handshake, so a rejected request gets an
    /// HTTP error response and nothing is registered. The whole handshake is
    /// bounded by `connection_timeout`.
    ///
    /// # Errors
    ///
    /// Returns the admission error for rejected requests,
    /// `ServerError::HandshakeTimeout` if the peer is too slow,
    /// `ServerError::WebSocket` if the handshake fails, or
    /// `ServerError::ConnectionClosed` if the gateway is shutting down.
    pub async fn connect<S>(&self, stream: S) -> ServerResult<JoinHandle<SessionEnd>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut admission = None;
        let mut rejection = None;

        let callback = |request: &UpgradeRequest, response: Response| {
            match self.admit(request) {
                Ok(admitted) => {
                    admission = Some(admitted);
                    Ok(response)
                }
                Err(e) => {
                    let response = rejection_response(&e);
                    rejection = Some(e);
                    Err(response)
                }
            }
        };

        let handshake = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(self.config.websocket.protocol_config()),
        );

        let outcome = tokio::time::timeout(self.config.connection_timeout, handshake).await;
        let ws_stream = match outcome {
            Ok(Ok(ws_stream)) => ws_stream,
            Ok(Err(e)) => return Err(rejection.unwrap_or_else(|| e.into())),
            Err(_) => return Err(ServerError::HandshakeTimeout),
        };

        let Some(admission) = admission else {
            return Err(ServerError::Internal("handshake completed without admission".into()));
        };

        self.start_session(ws_stream, admission).await
    }

    async fn start_session<S>(
        &self,
        mut ws_stream: WebSocketStream<S>,
        admission: Admission,
    ) -> ServerResult<JoinHandle<SessionEnd>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Admission { key, route } = admission;
        let (connection, outbound_rx) = Connection::new(key, self.config.outbound_queue_capacity);

        if let Some(previous) = self.registry.register(Arc::clone(&connection)) {
            debug!(
                key = %connection.key(),
                previous = %previous.id(),
                "Previous connection displaced"
            );
        }

        // A shut-down registry refuses or drains the connection; either way it is closed.
        if self.is_shutdown() || self.registry.is_shut_down() {
            connection.close();
            self.registry.remove(connection.key().as_str(), &connection);
            let going_away = CloseFrame {
                code: CloseCode::Away,
                reason: "server shutting down".into(),
            };
            if let Err(e) = ws_stream.close(Some(going_away)).await {
                debug!(key = %connection.key(), error = %e, "Failed to send close frame");
            }
            info!(key = %connection.key(), "Upgrade completed during shutdown, connection closed");
            return Err(ServerError::ConnectionClosed);
        }

        info!(
            key = %connection.key(),
            connection_id = %connection.id(),
            pattern = route.pattern(),
            "WebSocket connection established"
        );

        Ok(tokio::spawn(run_session(
            ws_stream,
            connection,
            outbound_rx,
            route,
            self.registry.clone(),
            self.config.websocket,
        )))
    }

    /// Bind `addr` and serve until [`Gateway::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::BindFailed` if the address cannot be bound.
    pub async fn serve(&self, addr: SocketAddr) -> ServerResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))?;

        self.serve_listener(listener).await
    }

    /// Serve connections from an already bound listener until
    /// [`Gateway::shutdown`] is called, then close every connection.
    ///
    /// # Errors
    ///
    /// Currently infallible once the listener is bound; accept errors are
    /// logged and the loop continues.
    pub async fn serve_listener(&self, listener: TcpListener) -> ServerResult<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, routes = self.router.len(), "Gateway listening");
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
            }
        }

        let closed = self.registry.shutdown();
        info!(closed, "Gateway shut down");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        debug!(peer = %peer_addr, "New connection");

        let gateway = self.clone();
        tokio::spawn(async move {
            match gateway.connect(stream).await {
                Ok(_session) => debug!(peer = %peer_addr, "Upgrade accepted"),
                Err(e) if e.is_rejection() => info!(
                    peer = %peer_addr,
                    status = e.status_code().as_u16(),
                    error = %e,
                    "Upgrade rejected"
                ),
                Err(e) => warn!(peer = %peer_addr, error = %e, "WebSocket handshake failed"),
            }
        });
    }

    /// Stop accepting connections and close every registered connection.
    ///
    /// Upgrades that complete afterwards are closed with a going-away frame
    /// instead of being registered.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let closed = self.registry.shutdown();
        debug!(closed, "Registry shut down");
    }

    /// Push a frame to the live connection for `key`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::NotConnected` if there is no live connection for
    /// `key`, or `ServerError::Send` if queueing failed.
    pub fn send_to(&self, key: &str, frame: Frame) -> ServerResult<()> {
        self.registry.send_to(key, frame)?;
        Ok(())
    }

    /// Push a frame to every live connection. Returns how many received it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        self.registry.broadcast(frame)
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("connections", &self.registry.len())
            .finish_non_exhaustive()
    }
}

fn rejection_response(error: &ServerError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() = error.status_code();
    response
}
