//! # luna-chat
//!
//! A small chat server on the luna gateway. Two endpoints are served:
//!
//! - `ws://host:9005/ws/connect?user=<email>` speaks the browser protocol:
//!   every frame is an [`Envelope`] whose `path` names the target user
//!   (`/user/<email>`). `message` envelopes relay their `data` there.
//! - `ws://host:9005/user/{id}?user=<email>` takes plain [`ChatMessage`]s;
//!   those with a `to` field are relayed to that user's live connection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod handlers;
pub mod identity;
pub mod message;

use luna_gateway::RouterError;
use luna_gateway_server::{Gateway, ServerConfig};

pub use cli::{Cli, SeedUser};
pub use handlers::{CONNECT_ROUTE, USER_ROUTE, build_router, handle_envelope, handle_user_message};
pub use identity::{DirectoryKeyExtractor, IdentityError, User, UserDirectory};
pub use message::{Action, ChatMessage, Envelope};

/// Assemble the chat gateway.
///
/// # Errors
///
/// Returns `RouterError` if the chat routes fail to register.
pub fn build_gateway(
    config: ServerConfig,
    key_param: &str,
    require_known_user: bool,
    directory: UserDirectory,
) -> Result<Gateway, RouterError> {
    let router = build_router()?;
    let extractor = DirectoryKeyExtractor::new(key_param, directory)
        .with_require_known_user(require_known_user);
    Ok(Gateway::new(config, router, extractor))
}
