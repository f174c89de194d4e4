//! # luna-gateway
//!
//! Connection bookkeeping and path routing for keyed WebSocket sessions.
//!
//! This crate holds the transport-agnostic half of the gateway:
//!
//! - [`Registry`] - At most one live [`Connection`] per [`IdentityKey`]
//! - [`Router`] - Path patterns such as `/user/{id}` bound to [`Handler`]s
//! - [`MessageContext`] - What a handler receives for every inbound [`Frame`]
//!
//! The WebSocket accept loop and the per-connection read/write loops live in
//! `luna-gateway-server`.
//!
//! ## Example
//!
//! ```rust
//! use luna_gateway::{HandlerResult, MessageContext, Router};
//!
//! async fn on_message(ctx: MessageContext) -> HandlerResult {
//!     tracing::info!(key = %ctx.key(), id = ?ctx.param("id"), "message");
//!     Ok(())
//! }
//!
//! let mut router = Router::new();
//! router.add_route("/user/{id}", on_message).unwrap();
//!
//! let matched = router.match_path("/user/42").unwrap();
//! assert_eq!(matched.params().get("id"), Some("42"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod context;
pub mod frame;
pub mod handler;
pub mod registry;
pub mod router;

pub use connection::{Connection, IdentityKey, OutboundReceiver, SendError};
pub use context::{MessageContext, Params};
pub use frame::Frame;
pub use handler::{Handler, HandlerError, HandlerResult, SharedHandler};
pub use registry::{Registry, RegistryError};
pub use router::{Pattern, RouteMatch, Router, RouterError};
