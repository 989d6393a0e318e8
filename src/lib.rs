//! # Larder
//!
//! An application cache that stores, reads and expires key/value data
//! through one async contract, backed either by a pooled Redis server or by
//! an embedded value-log store on local disk.
//!
//! The pieces live in their own crates and are re-exported here:
//!
//! - [`larder_redis`] - bounded, lazily dialed Redis connection pool
//! - [`larder_store`] - append-only value-log engine with online GC
//! - [`larder_cache`] - the [`Cache`](larder_cache::Cache) trait and both backends
//! - [`larder_cron`] - cron scheduler used for value-log maintenance
//!
//! This crate reads the environment, picks the backend, shares the Redis pool
//! with the session store and schedules daily GC for the embedded store.
//!
//! ## Quick Start
//!
//! ```no_run
//! use larder::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LarderError> {
//!     let _guard = LogConfig::from_env().init();
//!
//!     // CACHE=embedded, CACHE_PREFIX=shop, ...
//!     let larder = Larder::bootstrap(AppConfig::load(".")?).await?;
//!     let cache = larder.cache().clone();
//!
//!     cache.set("user:42:profile", br#"{"name":"Ada"}"#, 60).await?;
//!     if cache.has("user:42:profile").await? {
//!         let profile = cache.get("user:42:profile").await?;
//!         tracing::info!(bytes = profile.len(), "profile cached");
//!     }
//!     cache.empty_by_match("user:*").await?;
//!
//!     larder.shutdown().await
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod selector;
pub mod session;

pub use bootstrap::{GC_JOB, Larder};
pub use config::{AppConfig, DEFAULT_GC_MAX_ROUNDS, DEFAULT_GC_THRESHOLD};
pub use error::{LarderError, LarderResult};
pub use selector::{Backends, CacheSelector};
pub use session::SessionBackend;

pub use larder_cache;
pub use larder_cron;
pub use larder_redis;
pub use larder_store;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::bootstrap::Larder;
    pub use crate::config::AppConfig;
    pub use crate::error::{LarderError, LarderResult};
    pub use crate::logging::LogConfig;
    pub use crate::session::SessionBackend;
    pub use larder_cache::prelude::*;
}
