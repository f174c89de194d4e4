//! # luna-gateway-server
//!
//! WebSocket gateway for keyed, routed client connections.
//!
//! Clients connect with an HTTP upgrade request. The gateway matches the
//! request path against the route table, asks the key extractor for the
//! client's identity key, completes the upgrade and registers the connection
//! under that key. Each connection then gets one task running its read loop
//! (frames to the bound handler, in order) and its write loop (outbound
//! queue to the socket).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   GET /user/alice?user=alice   ┌──────────────────┐
//! │    client    │───────────────────────────────►│     Gateway      │
//! └──────────────┘                                │  admit: Router   │
//!        ▲                                        │         Extractor│
//!        │            WebSocket frames            │                  │
//!        └───────────────────────────────────────►│  ┌────────────┐  │
//!                                                 │  │  session   │  │
//!                                                 │  │ read/write │  │
//!                                                 │  └────────────┘  │
//!                                                 │  ┌────────────┐  │
//!                                                 │  │  Registry  │  │
//!                                                 │  └────────────┘  │
//!                                                 └──────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use luna_gateway::{HandlerError, MessageContext, Router};
//! use luna_gateway_server::{Gateway, QueryKeyExtractor, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut router = Router::new();
//!     router
//!         .add_route("/echo/{room}", |ctx: MessageContext| async move {
//!             ctx.reply(ctx.payload().clone())?;
//!             Ok::<(), HandlerError>(())
//!         })
//!         .unwrap();
//!
//!     let config = ServerConfig::default().with_max_connections(1000);
//!     let addr = config.bind_addr;
//!     let gateway = Gateway::new(config, router, QueryKeyExtractor::new("user"));
//!     gateway.serve(addr).await.unwrap();
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod session;

// Re-export main types
pub use config::{
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_VIOLATIONS,
    DEFAULT_OUTBOUND_QUEUE_CAPACITY, ServerConfig, WebSocketConfig,
};
pub use error::{ServerError, ServerResult};
pub use extractor::{HeaderKeyExtractor, KeyExtractor, QueryKeyExtractor, UpgradeRequest};
pub use gateway::{Admission, Gateway};
pub use session::{
    SessionEnd, ViolationTracker, dispatch, frame_to_ws, process_ws_message,
    process_ws_message_with_limits, run_session, validate_message_size, ws_message_size,
};
