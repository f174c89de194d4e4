//! Command-line argument parsing with clap.

use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;
use luna_gateway_server::{DEFAULT_OUTBOUND_QUEUE_CAPACITY, ServerConfig};

/// Luna chat server - keyed WebSocket chat on `/user/{id}`.
#[derive(Parser, Debug, Clone)]
#[command(name = "luna-chat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, env = "LUNA_BIND", default_value = "0.0.0.0:9005")]
    pub bind: SocketAddr,

    /// Maximum number of concurrent connections.
    #[arg(long, env = "LUNA_MAX_CONNECTIONS", default_value_t = 1000)]
    pub max_connections: usize,

    /// Outbound queue capacity per connection, in messages.
    #[arg(long, env = "LUNA_OUTBOUND_QUEUE", default_value_t = DEFAULT_OUTBOUND_QUEUE_CAPACITY)]
    pub outbound_queue: usize,

    /// Query parameter carrying the connection key.
    #[arg(long, env = "LUNA_KEY_PARAM", default_value = "user")]
    pub key_param: String,

    /// Only accept keys that belong to a known user.
    #[arg(long, env = "LUNA_REQUIRE_KNOWN_USER")]
    pub require_known_user: bool,

    /// Create a user at startup. Repeatable.
    #[arg(long = "seed-user", value_name = "NAME:EMAIL:PASSWORD")]
    pub seed_users: Vec<SeedUser>,

    /// Emit logs as JSON.
    #[arg(long, env = "LUNA_LOG_JSON")]
    pub log_json: bool,
}

impl Cli {
    /// Gateway configuration derived from the arguments.
    #[must_use]
    pub const fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.bind)
            .with_max_connections(self.max_connections)
            .with_outbound_queue_capacity(self.outbound_queue)
    }
}

/// A user to create at startup, given as `NAME:EMAIL:PASSWORD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUser {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Password; may itself contain `:`.
    pub password: String,
}

impl FromStr for SeedUser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(email), Some(password))
                if !name.is_empty() && !email.is_empty() && !password.is_empty() =>
            {
                Ok(Self {
                    name: name.to_string(),
                    email: email.to_string(),
                    password: password.to_string(),
                })
            }
            _ => Err(format!("expected NAME:EMAIL:PASSWORD, got {s:?}")),
        }
    }
}
