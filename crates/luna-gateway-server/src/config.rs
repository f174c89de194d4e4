//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as ProtocolConfig;

/// Default maximum WebSocket message size: 1MB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default maximum WebSocket frame size: 1MB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default maximum violations before connection termination.
pub const DEFAULT_MAX_VIOLATIONS: u32 = 3;

/// Default capacity of each connection's outbound queue, in frames.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Configuration for WebSocket message handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Maximum allowed message size in bytes.
    /// Larger messages are dropped and counted as a violation.
    pub max_message_size: usize,
    /// Maximum allowed frame size in bytes, enforced by the protocol layer.
    /// Never effectively lower than `max_message_size`, so any message
    /// within the message limit is accepted even as a single frame.
    pub max_frame_size: usize,
    /// Maximum number of size violations before terminating the connection.
    /// Set to 0 to close immediately on first violation.
    pub max_violations: u32,
}

impl WebSocketConfig {
    /// Create a new WebSocket configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum number of violations before termination.
    #[must_use]
    pub const fn with_max_violations(mut self, max: u32) -> Self {
        self.max_violations = max;
        self
    }

    /// Check if a message size is within the allowed limit.
    #[must_use]
    pub const fn is_message_size_valid(&self, size: usize) -> bool {
        size <= self.max_message_size
    }

    /// Protocol-level settings handed to the WebSocket handshake.
    ///
    /// The message limit is checked per message so that oversized messages
    /// count as violations instead of dropping the connection outright. The
    /// protocol layer therefore has to let every message up to that limit
    /// through: its frame limit is raised to at least `max_message_size`, and
    /// its own message limit never sits below the frame limit.
    #[must_use]
    pub fn protocol_config(&self) -> ProtocolConfig {
        let frame_limit = self.max_frame_size.max(self.max_message_size);
        let mut config = ProtocolConfig::default();
        config.max_frame_size = Some(frame_limit);
        config.max_message_size = Some(
            config
                .max_message_size
                .map_or(frame_limit, |limit| limit.max(frame_limit)),
        );
        config
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the gateway server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the WebSocket server to.
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent registered connections.
    pub max_connections: usize,
    /// Upper bound on the whole upgrade handshake, key extraction included.
    pub connection_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Whether an empty identity key is accepted at upgrade time.
    pub allow_empty_keys: bool,
    /// WebSocket configuration for message size limits.
    pub websocket: WebSocketConfig,
}

impl ServerConfig {
    /// Create a new server configuration with the specified bind address.
    #[must_use]
    pub const fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            connection_timeout: Duration::from_secs(10),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            allow_empty_keys: false,
            websocket: WebSocketConfig::new(),
        }
    }

    /// Set the WebSocket configuration.
    #[must_use]
    pub const fn with_websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.websocket = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub const fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Accept or reject empty identity keys.
    #[must_use]
    pub const fn with_allow_empty_keys(mut self, allow: bool) -> Self {
        self.allow_empty_keys = allow;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(([0, 0, 0, 0], 9005).into())
    }
}
