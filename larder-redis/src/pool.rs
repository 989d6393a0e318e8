//! Redis connection pool.

use bb8::{ManageConnection, Pool, PooledConnection, RunError};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{RedisConfig, RedisError, Result};

/// A dialed connection plus the flag the pool consults when it comes back.
pub struct ManagedConnection {
    inner: MultiplexedConnection,
    broken: bool,
}

/// Dials connections, pings them on checkout, and rejects broken ones on return.
pub struct RedisManager {
    client: Client,
    connection_timeout: Duration,
    /// Most recent dial failure, cleared by the next successful dial.
    ///
    /// The pool hands connect errors to its error sink rather than to the
    /// waiting checkout, so the waiter reads them from here.
    last_dial_error: Arc<Mutex<Option<String>>>,
}

impl RedisManager {
    /// Create a manager for the configured server. Does not dial.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.connection_url()?)
            .map_err(|e| RedisError::Config(e.to_string()))?;
        Ok(Self {
            client,
            connection_timeout: config.connection_timeout,
            last_dial_error: Arc::new(Mutex::new(None)),
        })
    }

    fn dial_failed(&self, message: String) -> RedisError {
        *self.last_dial_error.lock() = Some(message.clone());
        RedisError::Connection(message)
    }
}

impl ManageConnection for RedisManager {
    type Connection = ManagedConnection;
    type Error = RedisError;

    async fn connect(&self) -> Result<Self::Connection> {
        let dial = self.client.get_multiplexed_async_connection();
        let inner = match tokio::time::timeout(self.connection_timeout, dial).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(error = %e, "Redis dial failed");
                return Err(self.dial_failed(e.to_string()));
            }
            Err(_) => {
                warn!(timeout = ?self.connection_timeout, "Redis dial timed out");
                return Err(self.dial_failed(format!(
                    "dial timed out after {:?}",
                    self.connection_timeout
                )));
            }
        };
        *self.last_dial_error.lock() = None;
        debug!("Dialed new Redis connection");
        Ok(ManagedConnection {
            inner,
            broken: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<()> {
        let ping = async {
            let _: String = redis::cmd("PING").query_async(&mut conn.inner).await?;
            Ok::<(), redis::RedisError>(())
        };
        match tokio::time::timeout(self.connection_timeout, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                debug!(error = %e, "Discarding connection that failed its liveness check");
                Err(RedisError::Connection(e.to_string()))
            }
            Err(_) => Err(RedisError::Connection("liveness check timed out".to_string())),
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.broken
    }
}

/// Bounded pool of Redis connections.
///
/// Cloning is cheap; every clone refers to the same pool.
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool<RedisManager>,
    config: Arc<RedisConfig>,
    last_dial_error: Arc<Mutex<Option<String>>>,
}

impl RedisPool {
    /// Build the pool.
    ///
    /// No connection is dialed unless `min_idle` is set; the first checkout dials.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;
        let manager = RedisManager::new(&config)?;
        let last_dial_error = manager.last_dial_error.clone();

        let pool = Pool::builder()
            .max_size(config.max_active)
            .min_idle(config.min_idle)
            .idle_timeout(Some(config.idle_timeout))
            .connection_timeout(config.connection_timeout)
            .test_on_check_out(true)
            .retry_connection(false)
            .build(manager)
            .await?;

        info!(
            host = %config.host,
            max_active = config.max_active,
            max_idle = config.max_idle,
            "Redis connection pool created"
        );

        Ok(Self {
            pool,
            config: Arc::new(config),
            last_dial_error,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Check out a connection, dialing one if none is idle.
    ///
    /// A checkout that timed out because dialing failed reports
    /// [`RedisError::Connection`] with the dial error. Only a checkout that
    /// waited on a healthy but exhausted pool reports
    /// [`RedisError::CheckoutTimeout`].
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await.map_err(|e| match e {
            RunError::User(err) => err,
            RunError::TimedOut => match self.last_dial_error.lock().clone() {
                Some(message) => RedisError::Connection(message),
                None => RedisError::CheckoutTimeout(self.config.connection_timeout),
            },
        })?;
        Ok(RedisConnection {
            conn,
            pool: self,
        })
    }

    /// Round-trip a `PING` through a pooled connection.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        let _: String = conn.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}

/// A checked-out connection. Returned to the pool on drop.
pub struct RedisConnection<'a> {
    conn: PooledConnection<'a, RedisManager>,
    pool: &'a RedisPool,
}

impl RedisConnection<'_> {
    /// Run a command under the pool's command timeout.
    ///
    /// A connection that times out or loses its transport is discarded
    /// instead of going back to the pool.
    pub async fn query<T: FromRedisValue>(&mut self, cmd: &Cmd) -> Result<T> {
        let timeout = self.pool.config.command_timeout;
        let outcome = tokio::time::timeout(timeout, cmd.query_async(&mut self.conn.inner)).await;
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = RedisError::from(e);
                if err.is_connection_error() {
                    self.conn.broken = true;
                }
                Err(err)
            }
            Err(_) => {
                self.conn.broken = true;
                Err(RedisError::Timeout(timeout))
            }
        }
    }

    /// Mark the connection so the pool drops it instead of reusing it.
    pub fn discard(&mut self) {
        self.conn.broken = true;
    }
}

impl Drop for RedisConnection<'_> {
    fn drop(&mut self) {
        if !self.conn.broken && self.pool.stats().idle_connections >= self.pool.config.max_idle {
            // Idle set is full; close this one rather than park it.
            self.conn.broken = true;
        }
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total connections, idle and checked out.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}
