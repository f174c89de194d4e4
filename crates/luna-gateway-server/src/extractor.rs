//! Identity key extraction at upgrade time.
//!
//! The identity provider owns authentication; the gateway only asks it for
//! the key a connection should be registered under.

use tokio_tungstenite::tungstenite::handshake::server::Request;

/// The HTTP upgrade request as seen during the WebSocket handshake.
pub type UpgradeRequest = Request;

/// Derives the identity key for an upgrade request.
///
/// Called once per upgrade attempt, inside the handshake. Implementations
/// must be fast and side-effect free; returning `None` rejects the upgrade
/// with `401 Unauthorized`.
pub trait KeyExtractor: Send + Sync + 'static {
    /// Extract the identity key, if the request carries one.
    fn extract_key(&self, request: &UpgradeRequest) -> Option<String>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&UpgradeRequest) -> Option<String> + Send + Sync + 'static,
{
    fn extract_key(&self, request: &UpgradeRequest) -> Option<String> {
        (self)(request)
    }
}

/// Reads the key from a URL query parameter, e.g. `?user=alice`.
#[derive(Debug, Clone)]
pub struct QueryKeyExtractor {
    param: String,
}

impl QueryKeyExtractor {
    /// Extract from the query parameter named `param`.
    #[must_use]
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }

    /// The query parameter name.
    #[must_use]
    pub fn param(&self) -> &str {
        &self.param
    }
}

impl KeyExtractor for QueryKeyExtractor {
    fn extract_key(&self, request: &UpgradeRequest) -> Option<String> {
        let query = request.uri().query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == self.param.as_str())
            .map(|(_, value)| value.into_owned())
    }
}

/// Reads the key from a request header.
#[derive(Debug, Clone)]
pub struct HeaderKeyExtractor {
    header: String,
}

impl HeaderKeyExtractor {
    /// Extract from the header named `header`.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl KeyExtractor for HeaderKeyExtractor {
    fn extract_key(&self, request: &UpgradeRequest) -> Option<String> {
        request
            .headers()
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }
}
