//! Handle to one upgraded client connection.
//!
//! A [`Connection`] is the shared, transport-free half of a session: it owns
//! the bounded outbound queue and the close signal. The transport itself is
//! owned by the session task in `luna-gateway-server`, which drains the queue
//! and exits once [`Connection::close`] fires.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::frame::Frame;

/// Opaque per-client identity supplied by the identity provider at upgrade
/// time.
///
/// The core never validates keys. An empty key is representable, but the
/// gateway rejects it unless explicitly configured otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Wrap a key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unwrap into the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for IdentityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for IdentityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for IdentityKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Errors returned when queueing an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection has already been closed.
    #[error("connection for {0} is closed")]
    Closed(IdentityKey),

    /// The outbound queue was full; the connection has been closed.
    #[error("outbound queue for {0} is full, connection closed")]
    QueueFull(IdentityKey),
}

/// Receiving end of a connection's outbound queue, drained by its write loop.
pub type OutboundReceiver = mpsc::Receiver<Frame>;

/// One live client connection, shared between the registry, the session
/// task and handlers.
///
/// Outbound backpressure: the queue is bounded and [`Connection::send`] never
/// waits. A full queue means the peer is not keeping up, so the connection is
/// closed and [`SendError::QueueFull`] is returned.
pub struct Connection {
    id: Uuid,
    key: IdentityKey,
    created_at: DateTime<Utc>,
    outbound: mpsc::Sender<Frame>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Connection {
    /// Create a connection for `key` with an outbound queue of
    /// `queue_capacity` frames (at least one).
    ///
    /// Returns the shared handle and the receiver the write loop drains.
    #[must_use]
    pub fn new(
        key: impl Into<IdentityKey>,
        queue_capacity: usize,
    ) -> (Arc<Self>, OutboundReceiver) {
        let (outbound, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            key: key.into(),
            created_at: Utc::now(),
            outbound,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        (connection, outbound_rx)
    }

    /// Unique connection identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Identity key this connection was registered under.
    #[must_use]
    pub const fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// When the connection was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether [`Connection::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a frame for delivery without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is closed, or
    /// [`SendError::QueueFull`] if the queue is full, in which case the
    /// connection is closed as well.
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed(self.key.clone()));
        }

        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    key = %self.key,
                    connection_id = %self.id,
                    capacity = self.outbound.max_capacity(),
                    "Outbound queue full, disconnecting slow consumer"
                );
                self.close();
                Err(SendError::QueueFull(self.key.clone()))
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                Err(SendError::Closed(self.key.clone()))
            }
        }
    }

    /// Close the connection, unblocking its session loops.
    ///
    /// Idempotent: returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.cancel();
        debug!(key = %self.key, connection_id = %self.id, "Connection closed");
        true
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
