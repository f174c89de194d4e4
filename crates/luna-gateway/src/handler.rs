//! Message handler abstraction.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::connection::SendError;
use crate::context::MessageContext;

/// Errors a handler may return for a single frame.
///
/// These never end the session: the read loop logs them and moves on to the
/// next frame.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload could not be decoded.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// The payload decoded but was refused by the application.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// Pushing an outbound frame failed.
    #[error("send failed: {0}")]
    Send(#[from] SendError),

    /// Any other handler failure.
    #[error("handler failed: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type returned by handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Processes frames arriving on connections whose upgrade path matched the
/// handler's route.
///
/// Implemented for any `Fn(MessageContext) -> impl Future<Output = HandlerResult>`,
/// so plain `async fn`s and closures can be registered directly.
pub trait Handler: Send + Sync + 'static {
    /// Handle one frame.
    fn call(&self, ctx: MessageContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: MessageContext) -> BoxFuture<'static, HandlerResult> {
        (self)(ctx).boxed()
    }
}

/// Reference-counted handler shared between the router and session tasks.
pub type SharedHandler = Arc<dyn Handler>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, Frame, Params, Registry};

    fn make_context(text: &str) -> MessageContext {
        let (connection, _rx) = Connection::new("alice", 1);
        MessageContext::new(Frame::text(text), Arc::new(Params::new()), connection, Registry::new())
    }

    async fn echo_len(ctx: MessageContext) -> HandlerResult {
        if ctx.payload().is_empty() {
            return Err(HandlerError::Rejected("empty".into()));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_async_fn_is_handler() {
        let handler: SharedHandler = Arc::new(echo_len);
        assert!(handler.call(make_context("x")).await.is_ok());
        assert!(matches!(
            handler.call(make_context("")).await,
            Err(HandlerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_closure_is_handler() {
        let handler: SharedHandler = Arc::new(|ctx: MessageContext| async move {
            ctx.decode::<serde_json::Value>().map(|_| ())
        });
        assert!(handler.call(make_context("{}")).await.is_ok());
        assert!(matches!(
            handler.call(make_context("{")).await,
            Err(HandlerError::Decode(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = HandlerError::Rejected("spam".into());
        assert_eq!(err.to_string(), "message rejected: spam");

        let err: HandlerError = SendError::Closed("bob".into()).into();
        assert!(err.to_string().contains("bob"));
    }
}
