//! Per-frame message context handed to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::connection::{Connection, IdentityKey, SendError};
use crate::frame::Frame;
use crate::handler::HandlerError;
use crate::registry::Registry;

/// Path parameters captured when a route pattern matched, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Create an empty parameter set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Value bound to `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value.as_str())
    }

    /// Number of bound parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameters were bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(name, value)` pairs in pattern order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Copy the parameters into a map.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        self.0.iter().cloned().collect()
    }

    pub(crate) fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_string(), value.to_string()));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Everything a handler gets for one inbound frame.
///
/// Built by the session read loop for every text or binary frame and moved
/// into the handler; nothing retains it afterwards.
#[derive(Debug, Clone)]
pub struct MessageContext {
    payload: Frame,
    key: IdentityKey,
    params: Arc<Params>,
    connection: Arc<Connection>,
    registry: Registry,
}

impl MessageContext {
    /// Assemble a context for a frame received on `connection`.
    #[must_use]
    pub fn new(
        payload: Frame,
        params: Arc<Params>,
        connection: Arc<Connection>,
        registry: Registry,
    ) -> Self {
        Self {
            payload,
            key: connection.key().clone(),
            params,
            connection,
            registry,
        }
    }

    /// The raw inbound frame.
    #[must_use]
    pub const fn payload(&self) -> &Frame {
        &self.payload
    }

    /// Take ownership of the raw frame.
    #[must_use]
    pub fn into_payload(self) -> Frame {
        self.payload
    }

    /// Identity key of the originating connection.
    #[must_use]
    pub const fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// Path parameters bound when the connection was upgraded.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Shorthand for `params().get(name)`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Decode`] when the payload does not parse.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(self.payload.decode_json()?)
    }

    /// Queue a frame back to the originating connection.
    ///
    /// # Errors
    ///
    /// Propagates [`SendError`] from [`Connection::send`].
    pub fn reply(&self, frame: Frame) -> Result<(), SendError> {
        self.connection.send(frame)
    }

    /// The originating connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The registry, for pushing frames to other keys.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Ping {
        seq: u32,
    }

    fn make_context(payload: Frame) -> (MessageContext, crate::OutboundReceiver) {
        let (connection, rx) = Connection::new("alice", 4);
        let params: Params = [("id", "alice")].into_iter().collect();
        let ctx = MessageContext::new(payload, Arc::new(params), connection, Registry::new());
        (ctx, rx)
    }

    #[test]
    fn test_params_lookup() {
        let params: Params = [("room", "lobby"), ("id", "7")].into_iter().collect();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("room"), Some("lobby"));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_params_iter_keeps_order() {
        let params: Params = [("a", "1"), ("b", "2")].into_iter().collect();
        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2")]);
    }

    #[test]
    fn test_params_to_map() {
        let params: Params = [("id", "42")].into_iter().collect();
        let map = params.to_map();
        assert_eq!(map.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_empty_params() {
        let params = Params::new();
        assert!(params.is_empty());
        assert_eq!(params, Params::default());
    }

    #[test]
    fn test_context_accessors() {
        let (ctx, _rx) = make_context(Frame::text("hello"));
        assert_eq!(ctx.key().as_str(), "alice");
        assert_eq!(ctx.param("id"), Some("alice"));
        assert_eq!(ctx.payload(), &Frame::text("hello"));
        assert_eq!(ctx.connection().key(), ctx.key());
    }

    #[test]
    fn test_context_decode() {
        let (ctx, _rx) = make_context(Frame::text(r#"{"seq":3}"#));
        let ping: Ping = ctx.decode().unwrap();
        assert_eq!(ping.seq, 3);
    }

    #[test]
    fn test_context_decode_error() {
        let (ctx, _rx) = make_context(Frame::text("garbage"));
        let result = ctx.decode::<Ping>();
        assert!(matches!(result, Err(HandlerError::Decode(_))));
    }

    #[test]
    fn test_reply_goes_to_origin() {
        let (ctx, mut rx) = make_context(Frame::text("ping"));
        ctx.reply(Frame::text("pong")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Frame::text("pong"));
    }

    #[test]
    fn test_into_payload() {
        let (ctx, _rx) = make_context(Frame::binary(vec![1, 2, 3]));
        assert_eq!(ctx.into_payload(), Frame::Binary(vec![1, 2, 3]));
    }
}
