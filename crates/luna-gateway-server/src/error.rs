//! Error types for the gateway server.

use std::net::SocketAddr;

use luna_gateway::{IdentityKey, RegistryError, SendError};
use thiserror::Error;
use tokio_tungstenite::tungstenite::http::StatusCode;

/// Errors that can occur in the gateway server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// WebSocket error occurred.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// No route pattern matches the upgrade path.
    #[error("no route matches {0}")]
    NoRoute(String),

    /// The key extractor yielded no usable identity key.
    #[error("missing identity key")]
    MissingKey,

    /// The connection limit has been reached.
    #[error("connection limit of {0} reached")]
    TooManyConnections(usize),

    /// The upgrade handshake did not finish in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Message exceeds the configured size limit.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the offending message.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// No live connection for the key.
    #[error("no connection registered for {0}")]
    NotConnected(IdentityKey),

    /// Queueing an outbound frame failed.
    #[error(transparent)]
    Send(#[from] SendError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Whether this error rejected an upgrade request before the handshake
    /// completed (as opposed to a transport failure).
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NoRoute(_) | Self::MissingKey | Self::TooManyConnections(_)
        )
    }

    /// HTTP status sent back when this error rejects an upgrade.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NoRoute(_) => StatusCode::NOT_FOUND,
            Self::MissingKey => StatusCode::UNAUTHORIZED,
            Self::TooManyConnections(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::HandshakeTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::WebSocket(_) | Self::MessageTooLarge { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<RegistryError> for ServerError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(key) => Self::NotConnected(key),
            RegistryError::Send(e) => Self::Send(e),
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
