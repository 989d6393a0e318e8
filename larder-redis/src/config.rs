//! Redis pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::{RedisError, Result};

/// Redis pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Server address as `host:port`.
    pub host: String,
    /// Username for Redis 6+ ACL.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Database number (0-15).
    pub database: Option<u8>,
    /// Use TLS (`rediss://`).
    pub tls: bool,
    /// Maximum number of idle connections kept in the pool.
    pub max_idle: u32,
    /// Maximum number of connections, idle and checked out combined.
    pub max_active: u32,
    /// Idle connections eagerly maintained. `None` keeps dialing fully lazy.
    pub min_idle: Option<u32>,
    /// Idle connections are closed after this long.
    #[serde(with = "secs_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    /// Bound on dialing a connection and on waiting for a checkout.
    #[serde(with = "secs_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    /// Bound on a single command round trip.
    #[serde(with = "secs_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(240)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost:6379".to_string(),
            username: None,
            password: None,
            database: None,
            tls: false,
            max_idle: 50,
            max_active: 10_000,
            min_idle: None,
            idle_timeout: default_idle_timeout(),
            connection_timeout: default_connection_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl RedisConfig {
    /// Create a configuration for the given `host:port`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::new()
    }

    /// Load configuration from process environment variables.
    ///
    /// Recognized variables: `REDIS_HOST`, `REDIS_USERNAME`, `REDIS_PASSWORD`,
    /// `REDIS_DATABASE`, `REDIS_TLS`, `REDIS_MAX_IDLE`, `REDIS_MAX_ACTIVE`,
    /// `REDIS_IDLE_TIMEOUT` and `REDIS_COMMAND_TIMEOUT` (seconds).
    pub fn from_env() -> RedisConfigBuilder {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> RedisConfigBuilder
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = RedisConfigBuilder::new();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = non_empty("REDIS_HOST") {
            builder = builder.host(host);
        }

        if let Some(username) = non_empty("REDIS_USERNAME") {
            builder = builder.username(username);
        }

        if let Some(password) = non_empty("REDIS_PASSWORD") {
            builder = builder.password(password);
        }

        if let Some(db) = non_empty("REDIS_DATABASE")
            && let Ok(db_num) = db.parse() {
                builder = builder.database(db_num);
            }

        if let Some(tls) = non_empty("REDIS_TLS") {
            builder = builder.tls(tls == "1" || tls.eq_ignore_ascii_case("true"));
        }

        if let Some(max_idle) = non_empty("REDIS_MAX_IDLE")
            && let Ok(n) = max_idle.parse() {
                builder = builder.max_idle(n);
            }

        if let Some(max_active) = non_empty("REDIS_MAX_ACTIVE")
            && let Ok(n) = max_active.parse() {
                builder = builder.max_active(n);
            }

        if let Some(secs) = non_empty("REDIS_IDLE_TIMEOUT")
            && let Ok(secs) = secs.parse() {
                builder = builder.idle_timeout(Duration::from_secs(secs));
            }

        if let Some(secs) = non_empty("REDIS_COMMAND_TIMEOUT")
            && let Ok(secs) = secs.parse() {
                builder = builder.command_timeout(Duration::from_secs(secs));
            }

        builder
    }

    /// Check the limits and timeouts for values the pool cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RedisError::Config("host must not be empty".to_string()));
        }
        if self.max_active == 0 {
            return Err(RedisError::Config("max_active must be at least 1".to_string()));
        }
        if let Some(min_idle) = self.min_idle
            && min_idle > self.max_idle {
                return Err(RedisError::Config(format!(
                    "min_idle ({}) exceeds max_idle ({})",
                    min_idle, self.max_idle
                )));
            }
        if self.command_timeout.is_zero() || self.connection_timeout.is_zero() {
            return Err(RedisError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Get the full connection URL with auth and database.
    pub fn connection_url(&self) -> Result<String> {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let mut url = Url::parse(&format!("{}://{}", scheme, self.host))
            .map_err(|e| RedisError::Config(format!("invalid host '{}': {}", self.host, e)))?;

        if let Some(password) = &self.password {
            if let Some(username) = &self.username {
                url.set_username(username)
                    .map_err(|_| RedisError::Config("cannot set username".to_string()))?;
            }
            url.set_password(Some(password))
                .map_err(|_| RedisError::Config("cannot set password".to_string()))?;
        }

        if let Some(db) = self.database {
            url.set_path(&db.to_string());
        }

        Ok(url.to_string())
    }
}

/// Builder for Redis pool configuration.
#[derive(Default)]
pub struct RedisConfigBuilder {
    config: RedisConfig,
}

impl RedisConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RedisConfig::default(),
        }
    }

    /// Set the server address (`host:port`).
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the username (Redis 6+ ACL).
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set the database number.
    pub fn database(mut self, db: u8) -> Self {
        self.config.database = Some(db);
        self
    }

    /// Enable TLS.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.config.tls = enabled;
        self
    }

    /// Set the maximum number of idle connections.
    pub fn max_idle(mut self, max_idle: u32) -> Self {
        self.config.max_idle = max_idle;
        self
    }

    /// Set the maximum number of connections.
    pub fn max_active(mut self, max_active: u32) -> Self {
        self.config.max_active = max_active;
        self
    }

    /// Keep this many idle connections dialed at all times.
    pub fn min_idle(mut self, min_idle: u32) -> Self {
        self.config.min_idle = Some(min_idle);
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RedisConfig {
        self.config
    }
}

mod secs_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
