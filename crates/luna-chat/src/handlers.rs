//! WebSocket message handlers for the chat server.

use std::sync::Arc;

use luna_gateway::{
    Frame, HandlerError, HandlerResult, MessageContext, Pattern, RegistryError, Router,
    RouterError,
};
use tracing::{debug, info};

use crate::message::{Action, ChatMessage, Envelope};

/// Route for clients that post plain chat messages.
pub const USER_ROUTE: &str = "/user/{id}";

/// Route for browser clients speaking the envelope protocol.
pub const CONNECT_ROUTE: &str = "/ws/connect";

/// Build the chat route table.
///
/// # Errors
///
/// Returns `RouterError` if a route fails to register.
pub fn build_router() -> Result<Router, RouterError> {
    let user_path = Arc::new(Pattern::parse(USER_ROUTE)?);

    let mut router = Router::new();
    router.add_route(USER_ROUTE, handle_user_message)?;
    router.add_route(CONNECT_ROUTE, move |ctx: MessageContext| {
        handle_envelope(ctx, Arc::clone(&user_path))
    })?;
    Ok(router)
}

/// Handle a message on `/user/{id}`.
///
/// Logs the message and, when it names a recipient, relays it to that
/// key's live connection with `from` set to the sender's key. A recipient
/// that is not connected is not an error.
///
/// # Errors
///
/// Returns `HandlerError::Decode` for payloads that are not a chat message,
/// or `HandlerError::Send` if the recipient's queue rejected the relay.
pub async fn handle_user_message(ctx: MessageContext) -> HandlerResult {
    let message: ChatMessage = ctx.decode()?;

    info!(
        key = %ctx.key(),
        id = ctx.param("id").unwrap_or_default(),
        from = %message.from,
        text = %message.text,
        "New message"
    );

    match message.to.clone() {
        Some(to) => relay(&ctx, message, &to),
        None => Ok(()),
    }
}

/// Handle an envelope on `/ws/connect`.
///
/// `subscribe` only validates and logs its path. `message` relays `data` to
/// the user named by the path, `/user/{id}`.
///
/// # Errors
///
/// Returns `HandlerError::Decode` for payloads that are not an envelope,
/// `HandlerError::Rejected` for a path outside `/user/{id}` or a message
/// without data, or `HandlerError::Send` if the relay could not be queued.
pub async fn handle_envelope(ctx: MessageContext, user_path: Arc<Pattern>) -> HandlerResult {
    let envelope: Envelope = ctx.decode()?;

    let to = user_path
        .capture(&envelope.path)
        .and_then(|params| params.get("id").map(str::to_string))
        .ok_or_else(|| HandlerError::Rejected(format!("unknown path {}", envelope.path)))?;

    match envelope.action {
        Action::Subscribe => {
            info!(key = %ctx.key(), path = %envelope.path, "Subscribed");
            Ok(())
        }
        Action::Message => {
            let mut message = envelope
                .data
                .ok_or_else(|| HandlerError::Rejected("message without data".into()))?;

            info!(
                key = %ctx.key(),
                path = %envelope.path,
                from = %message.from,
                text = %message.text,
                "New message"
            );

            message.to = Some(to.clone());
            relay(&ctx, message, &to)
        }
    }
}

fn relay(ctx: &MessageContext, mut message: ChatMessage, to: &str) -> HandlerResult {
    message.from = ctx.key().to_string();
    let frame = Frame::json(&message).map_err(|e| HandlerError::Internal(e.to_string()))?;

    match ctx.registry().send_to(to, frame) {
        Ok(()) => {
            debug!(from = %ctx.key(), to = %to, "Message relayed");
            Ok(())
        }
        Err(RegistryError::NotFound(_)) => {
            debug!(from = %ctx.key(), to = %to, "Recipient offline, message dropped");
            Ok(())
        }
        Err(RegistryError::Send(e)) => Err(e.into()),
    }
}
