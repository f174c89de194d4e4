//! Registry of live connections keyed by identity.
//!
//! Enforces at most one live [`Connection`] per [`IdentityKey`]. Registering
//! a second connection under a key closes the first one before the new
//! mapping becomes visible.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::connection::{Connection, IdentityKey, SendError};
use crate::frame::Frame;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No live connection is registered under the key.
    #[error("no connection registered for {0}")]
    NotFound(IdentityKey),

    /// The connection exists but the frame could not be queued.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Shared registry of live connections.
///
/// Cloning is cheap and every clone sees the same mapping. All operations
/// take a single short-lived lock and never perform I/O while holding it.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<IdentityKey, Arc<Connection>>,
    shut_down: bool,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `connection` under its identity key.
    ///
    /// Any connection previously registered under the same key is closed
    /// while the lock is held, so two live connections are never visible
    /// under one key. The displaced connection is returned. An already
    /// closed connection is not installed. After [`Registry::shutdown`] the
    /// connection is closed instead of installed; callers detect this with
    /// [`Connection::is_closed`].
    pub fn register(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        if connection.is_closed() {
            debug!(key = %connection.key(), "Refusing to register closed connection");
            return None;
        }

        let mut state = self.state.lock();
        if state.shut_down {
            connection.close();
            drop(state);
            debug!(key = %connection.key(), "Registry shut down, connection refused");
            return None;
        }

        let previous = state
            .connections
            .insert(connection.key().clone(), Arc::clone(&connection));

        if let Some(previous) = &previous {
            if !Arc::ptr_eq(previous, &connection) {
                previous.close();
                info!(
                    key = %connection.key(),
                    replaced = %previous.id(),
                    connection_id = %connection.id(),
                    "Replaced existing connection"
                );
            }
        }
        drop(state);

        debug!(key = %connection.key(), connection_id = %connection.id(), "Connection registered");
        previous
    }

    /// Current live connection for `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<Arc<Connection>> {
        self.state
            .lock()
            .connections
            .get(key)
            .filter(|connection| !connection.is_closed())
            .cloned()
    }

    /// Remove the mapping for `key` only if it still points at `connection`.
    ///
    /// A replaced connection's teardown therefore never evicts its
    /// successor. Returns whether a mapping was removed.
    pub fn remove(&self, key: &str, connection: &Arc<Connection>) -> bool {
        let mut state = self.state.lock();
        let is_current = state
            .connections
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, connection));

        if is_current {
            state.connections.remove(key);
            debug!(key = %key, connection_id = %connection.id(), "Connection removed");
        }
        is_current
    }

    /// Queue `frame` on the live connection for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no live connection exists, or
    /// [`RegistryError::Send`] if queueing failed.
    pub fn send_to(&self, key: &str, frame: Frame) -> Result<(), RegistryError> {
        let connection = self
            .lookup(key)
            .ok_or_else(|| RegistryError::NotFound(IdentityKey::from(key)))?;
        connection.send(frame)?;
        Ok(())
    }

    /// Queue `frame` on every live connection.
    ///
    /// Returns the number of connections the frame was queued on.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let mut sent = 0;
        for connection in self.connections() {
            match connection.send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!(key = %connection.key(), error = %e, "Broadcast skipped connection");
                }
            }
        }
        sent
    }

    /// Snapshot of all live connections.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.state
            .lock()
            .connections
            .values()
            .filter(|connection| !connection.is_closed())
            .cloned()
            .collect()
    }

    /// Snapshot of all registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<IdentityKey> {
        self.state.lock().connections.keys().cloned().collect()
    }

    /// Close and drop every registered connection. Returns how many there were.
    ///
    /// Later registrations are still accepted.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.state.lock().connections.drain().collect();
        Self::close_drained(drained)
    }

    /// Close every registered connection and refuse all later registrations.
    ///
    /// The flag is set under the same lock [`Registry::register`] takes, so
    /// no connection can slip in after the drain. Returns how many
    /// connections were closed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.shut_down = true;
            state.connections.drain().collect()
        };
        Self::close_drained(drained)
    }

    /// Whether [`Registry::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    fn close_drained(drained: Vec<(IdentityKey, Arc<Connection>)>) -> usize {
        for (_, connection) in &drained {
            connection.close();
        }
        drained.len()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().connections.is_empty()
    }
}
