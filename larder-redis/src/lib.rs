//! # Larder Redis
//!
//! Bounded Redis connection pool used by the networked cache backend and by
//! any session store that shares it.
//!
//! ## Features
//!
//! - **Lazy dialing**: no connection is opened until the first checkout
//! - **Checkout ping**: idle connections are `PING`ed before reuse and
//!   silently replaced when the ping fails
//! - **Idle and active limits**: `max_idle` parked connections, `max_active` total
//! - **Per-command timeout**: a stuck round trip cannot pin a connection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use larder_redis::{RedisConfig, RedisPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .host("localhost:6379")
//!         .max_idle(10)
//!         .build();
//!
//!     let pool = RedisPool::new(config).await?;
//!
//!     let mut conn = pool.get().await?;
//!     let _: () = conn.query(redis::cmd("SET").arg("key").arg("value")).await?;
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pool;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{ManagedConnection, PoolStats, RedisConnection, RedisManager, RedisPool};

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::pool::{PoolStats, RedisConnection, RedisPool};
}
