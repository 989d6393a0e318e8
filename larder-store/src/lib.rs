//! # Larder Store
//!
//! Embedded, append-only key-value store used by the local cache backend.
//!
//! Values are appended to numbered segment files and located through an
//! in-memory key directory rebuilt on open. Overwritten, deleted and expired
//! values stay on disk until [`Store::run_value_log_gc`] rewrites the segment
//! holding them.
//!
//! ## Features
//!
//! - **Checksummed records**: every frame carries a CRC32C of its payload
//! - **Crash recovery**: a torn write at the tail of the newest segment is
//!   truncated on open
//! - **Lazy TTL**: expired keys disappear on read, no purge thread
//! - **Online GC**: segments are rewritten while reads and writes continue
//! - **Single owner**: the directory is locked for the lifetime of the handle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use larder_store::Store;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), larder_store::StoreError> {
//! let store = Store::open("/var/lib/app/tmp/cache")?;
//!
//! store.put(b"greeting", b"hello", Some(Duration::from_secs(60)))?;
//! assert_eq!(store.get(b"greeting")?, Some(b"hello".to_vec()));
//!
//! // Reclaim segments that are at least 70% garbage.
//! while store.run_value_log_gc(0.7).is_ok() {}
//!
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod clock;
mod error;
mod gc;
mod lock;
mod record;
mod segment;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use gc::GcOutcome;
pub use store::{DEFAULT_MAX_SEGMENT_BYTES, Store, StoreOptions};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::gc::GcOutcome;
    pub use crate::store::{Store, StoreOptions};
}
