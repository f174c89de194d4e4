//! In-memory user directory and the key extractor built on it.
//!
//! Accounts live only as long as the process. A connection's identity key is
//! the user's email address.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use luna_gateway_server::{KeyExtractor, QueryKeyExtractor, UpgradeRequest};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors from the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Another account already uses this email.
    #[error("email {0} is already in use")]
    DuplicateEmail(String),

    /// A required field was empty.
    #[error("required field {0} is missing")]
    MissingField(&'static str),
}

/// A registered user.
#[derive(Clone, Serialize)]
pub struct User {
    /// Unique user id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Email address, doubling as the connection key.
    pub email: String,
    #[serde(skip_serializing)]
    password: String,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether `password` matches the stored one.
    #[must_use]
    pub fn check_password(&self, password: &str) -> bool {
        self.password == password
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Default)]
struct DirectoryInner {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

/// Thread-safe in-memory user store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    inner: Arc<RwLock<DirectoryInner>>,
}

impl UserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MissingField`] if any field is empty, or
    /// [`IdentityError::DuplicateEmail`] if the email is taken.
    pub fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, IdentityError> {
        for (field, value) in [("name", name), ("email", email), ("password", password)] {
            if value.is_empty() {
                return Err(IdentityError::MissingField(field));
            }
        }

        let mut inner = self.inner.write();
        if inner.by_email.contains_key(email) {
            debug!(email = %email, "Rejected duplicate email");
            return Err(IdentityError::DuplicateEmail(email.to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            created_at: Utc::now(),
        };
        inner.by_email.insert(user.email.clone(), user.id);
        inner.by_id.insert(user.id, user.clone());
        drop(inner);

        info!(user_id = %user.id, email = %user.email, "User created");
        Ok(user)
    }

    /// Look up the user owning the connection key (their email).
    #[must_use]
    pub fn find_user_by_key(&self, key: &str) -> Option<User> {
        let inner = self.inner.read();
        inner
            .by_email
            .get(key)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Look up a user by id.
    #[must_use]
    pub fn find_user_by_id(&self, id: &Uuid) -> Option<User> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Check credentials, returning the user on success.
    #[must_use]
    pub fn authenticate(&self, email: &str, password: &str) -> Option<User> {
        self.find_user_by_key(email)
            .filter(|user| user.check_password(password))
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether there are no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

/// Reads the connection key from a query parameter and, optionally, only
/// accepts keys that belong to a known user.
#[derive(Debug, Clone)]
pub struct DirectoryKeyExtractor {
    query: QueryKeyExtractor,
    directory: UserDirectory,
    require_known_user: bool,
}

impl DirectoryKeyExtractor {
    /// Read the key from query parameter `param`.
    #[must_use]
    pub fn new(param: impl Into<String>, directory: UserDirectory) -> Self {
        Self {
            query: QueryKeyExtractor::new(param),
            directory,
            require_known_user: false,
        }
    }

    /// Reject keys that do not match a user's email.
    #[must_use]
    pub const fn with_require_known_user(mut self, require: bool) -> Self {
        self.require_known_user = require;
        self
    }
}

impl KeyExtractor for DirectoryKeyExtractor {
    fn extract_key(&self, request: &UpgradeRequest) -> Option<String> {
        let key = self.query.extract_key(request)?;
        if self.require_known_user && self.directory.find_user_by_key(&key).is_none() {
            debug!(key = %key, "Unknown user");
            return None;
        }
        Some(key)
    }
}
