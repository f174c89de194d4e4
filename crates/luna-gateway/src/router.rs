//! Path-pattern routing.
//!
//! Patterns are `/`-separated segments, each either a literal (`user`) or a
//! named parameter (`{id}`). They are parsed once at registration into a list
//! of segment matchers and walked per request; no regular expressions.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::context::Params;
use crate::handler::{Handler, SharedHandler};

/// Errors that can occur while registering routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The exact pattern is already registered.
    #[error("route {0} is already registered")]
    DuplicateRoute(String),

    /// The pattern could not be parsed.
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    fn accepts(&self, segment: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == segment,
            Self::Param(_) => !segment.is_empty(),
        }
    }
}

/// A parsed route pattern such as `/user/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidPattern`] if the pattern does not start
    /// with `/`, has an empty segment (other than the root pattern `/`), has a
    /// malformed or empty `{}` parameter, or repeats a parameter name.
    pub fn parse(pattern: &str) -> Result<Self, RouterError> {
        let invalid = |reason| RouterError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        if pattern == "/" {
            return Ok(Self {
                raw: pattern.to_string(),
                segments: vec![Segment::Literal(String::new())],
            });
        }

        let mut segments = Vec::new();
        for segment in path_segments(pattern) {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }

            let parsed = match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some("") => return Err(invalid("empty parameter name")),
                Some(name) if name.contains(['{', '}']) => return Err(invalid("unbalanced braces")),
                Some(name) => {
                    if segments
                        .iter()
                        .any(|s| matches!(s, Segment::Param(existing) if existing == name))
                    {
                        return Err(invalid("duplicate parameter name"));
                    }
                    Segment::Param(name.to_string())
                }
                None if segment.contains(['{', '}']) => return Err(invalid("unbalanced braces")),
                None => Segment::Literal(segment.to_string()),
            };
            segments.push(parsed);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the parameters, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Whether `path` fits this pattern. Does not allocate.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let mut parts = path_segments(path);
        for segment in &self.segments {
            match parts.next() {
                Some(part) if segment.accepts(part) => {}
                _ => return false,
            }
        }
        parts.next().is_none()
    }

    /// Match `path` and capture its parameters.
    #[must_use]
    pub fn capture(&self, path: &str) -> Option<Params> {
        if !self.matches(path) {
            return None;
        }

        let mut params = Params::new();
        for (segment, part) in self.segments.iter().zip(path_segments(path)) {
            if let Segment::Param(name) = segment {
                params.push(name, part);
            }
        }
        Some(params)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Segments of a request path: the leading `/` is dropped, the rest split on
/// `/`. The root path yields a single empty segment.
fn path_segments(path: &str) -> std::str::Split<'_, char> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}

struct Route {
    pattern: Pattern,
    handler: SharedHandler,
}

/// A successful route lookup.
#[derive(Clone)]
pub struct RouteMatch {
    pattern: Arc<str>,
    handler: SharedHandler,
    params: Arc<Params>,
}

impl RouteMatch {
    /// The pattern that matched.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The handler bound to the pattern.
    #[must_use]
    pub const fn handler(&self) -> &SharedHandler {
        &self.handler
    }

    /// Parameters captured from the path.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Shared parameters, for attaching to every frame of a connection.
    #[must_use]
    pub fn shared_params(&self) -> Arc<Params> {
        Arc::clone(&self.params)
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("pattern", &self.pattern)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Table of route patterns and their handlers.
///
/// Routes are added during startup through `&mut self`; once the router is
/// handed to the gateway it is shared read-only, so lookups need no locking.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::DuplicateRoute`] if the identical pattern is
    /// already registered, or [`RouterError::InvalidPattern`] if it does not
    /// parse.
    pub fn add_route<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<(), RouterError> {
        self.add_shared_route(pattern, Arc::new(handler))
    }

    /// Bind an already shared handler to `pattern`.
    ///
    /// # Errors
    ///
    /// Same as [`Router::add_route`].
    pub fn add_shared_route(
        &mut self,
        pattern: &str,
        handler: SharedHandler,
    ) -> Result<(), RouterError> {
        let pattern = Pattern::parse(pattern)?;
        if self.routes.iter().any(|route| route.pattern.raw == pattern.raw) {
            return Err(RouterError::DuplicateRoute(pattern.raw));
        }

        tracing::debug!(pattern = %pattern, "Route registered");
        self.routes.push(Route { pattern, handler });
        Ok(())
    }

    /// Find the route for `path` and capture its parameters.
    ///
    /// Matching is case-sensitive and exact-length. When several patterns
    /// fit the same path, the one registered first wins.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<RouteMatch> {
        self.routes.iter().find_map(|route| {
            route.pattern.capture(path).map(|params| RouteMatch {
                pattern: Arc::from(route.pattern.as_str()),
                handler: Arc::clone(&route.handler),
                params: Arc::new(params),
            })
        })
    }

    /// Registered patterns, in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.pattern.as_str())
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .finish()
    }
}
