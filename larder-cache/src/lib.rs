//! Pluggable cache for Larder.
//!
//! One async [`Cache`] contract over two backends: a pooled Redis server
//! ([`RedisCache`]) and an embedded value-log store ([`EmbeddedCache`]).
//! [`CacheHandle`] holds whichever one was selected at startup, or nothing.
//!
//! # Features
//!
//! - **Namespaces** - every key is stored as `<prefix>:<key>`; pattern
//!   operations never reach outside the namespace
//! - **TTL** - native `EX` on Redis, lazy expiry on the embedded store
//! - **Glob patterns** - Redis `MATCH` syntax on both backends
//! - **Typed helpers** - JSON and string accessors via [`CacheExt`]
//!
//! # Examples
//!
//! ## Embedded Cache
//!
//! ```no_run
//! use larder_cache::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CacheError> {
//!     let cache = EmbeddedCache::open("/srv/app/tmp/cache", CacheConfig::new().with_key_prefix("app")?)?;
//!
//!     cache.set("user:42:profile", br#"{"name":"Alice"}"#, 60).await?;
//!     assert!(cache.has("user:42:profile").await?);
//!
//!     cache.empty_by_match("user:*").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Typed Values
//!
//! ```no_run
//! use larder_cache::*;
//!
//! # async fn example(cache: &CacheHandle) -> Result<(), CacheError> {
//! let count: u64 = cache
//!     .remember("stats:visits", 300, || async { Ok(1_024) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedded_cache;
pub mod error;
pub mod handle;
pub mod pattern;
pub mod redis_cache;
pub mod traits;

pub use config::*;
pub use embedded_cache::*;
pub use error::*;
pub use handle::*;
pub use pattern::KeyPattern;
pub use redis_cache::*;
pub use traits::*;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{BackendKind, CacheConfig};
    pub use crate::embedded_cache::{EmbeddedCache, GcReport};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::handle::CacheHandle;
    pub use crate::redis_cache::RedisCache;
    pub use crate::traits::{Cache, CacheExt};
}
