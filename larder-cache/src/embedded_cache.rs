//! Embedded cache implementation over the local value-log store.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::pattern::KeyPattern;
use crate::traits::Cache;
use async_trait::async_trait;
use larder_store::{Store, StoreError, StoreResult};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Summary of a [`EmbeddedCache::collect_garbage`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// GC passes attempted.
    pub rounds: usize,
    /// Segments rewritten and removed.
    pub segments_rewritten: usize,
    /// Net bytes freed.
    pub reclaimed_bytes: u64,
    /// Live records copied forward.
    pub records_rewritten: usize,
}

/// Cache backed by an embedded [`Store`].
///
/// Engine calls run on the blocking thread pool. Pattern operations scan
/// every key in the namespace, so their cost grows with the total key count
/// rather than the number of matches.
#[derive(Clone)]
pub struct EmbeddedCache {
    store: Store,
    config: CacheConfig,
}

impl EmbeddedCache {
    /// Wrap an open store.
    pub fn new(store: Store, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Open the store at `dir` with default options.
    pub fn open(dir: impl AsRef<Path>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let store = Store::open(dir)?;
        Ok(Self::new(store, config))
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Run value-log GC until nothing qualifies or `max_rounds` passes ran.
    ///
    /// Long-running; schedule it off the request path.
    pub async fn collect_garbage(&self, threshold: f64, max_rounds: usize) -> CacheResult<GcReport> {
        let report = self
            .blocking(move |store| {
                let mut report = GcReport::default();
                while report.rounds < max_rounds {
                    report.rounds += 1;
                    match store.run_value_log_gc(threshold) {
                        Ok(outcome) => {
                            report.segments_rewritten += 1;
                            report.reclaimed_bytes += outcome.reclaimed_bytes;
                            report.records_rewritten += outcome.rewritten_records;
                        }
                        Err(StoreError::NoRewrite) => break,
                        Err(StoreError::GcInProgress) => {
                            warn!("Value-log GC already running, skipping");
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(report)
            })
            .await
            .map_err(|e| e.logged("collect_garbage", ""))?;

        info!(
            rounds = report.rounds,
            segments = report.segments_rewritten,
            reclaimed_bytes = report.reclaimed_bytes,
            "Value-log GC finished"
        );
        Ok(report)
    }

    /// Flush and release the store.
    pub async fn close(&self) -> CacheResult<()> {
        self.blocking(|store| store.close()).await
    }

    async fn blocking<T, F>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce(Store) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(store)).await??)
    }

    /// Logical keys in this namespace matching `pattern`.
    async fn matching(&self, pattern: KeyPattern) -> CacheResult<Vec<String>> {
        let config = self.config.clone();
        self.blocking(move |store| {
            let physical = store.keys_with_prefix(config.physical_prefix().as_bytes())?;
            Ok(physical
                .iter()
                .filter_map(|key| std::str::from_utf8(key).ok())
                .filter_map(|key| config.strip_key(key))
                .filter(|key| pattern.matches(key))
                .map(str::to_string)
                .collect())
        })
        .await
    }
}

#[async_trait]
impl Cache for EmbeddedCache {
    async fn has(&self, key: &str) -> CacheResult<bool> {
        let physical = self.config.build_key(key);
        self.blocking(move |store| store.contains(physical.as_bytes()))
            .await
            .map_err(|e| e.logged("has", key))
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        let physical = self.config.build_key(key);
        match self.blocking(move |store| store.get(physical.as_bytes())).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(CacheError::NotFound(key.to_string()).logged("get", key)),
            Err(e) => Err(e.logged("get", key)),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> CacheResult<()> {
        let physical = self.config.build_key(key);
        let value = value.to_vec();
        let ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds));
        self.blocking(move |store| store.put(physical.as_bytes(), &value, ttl))
            .await
            .map_err(|e| e.logged("set", key))
    }

    async fn forget(&self, key: &str) -> CacheResult<()> {
        let physical = self.config.build_key(key);
        self.blocking(move |store| store.delete(physical.as_bytes()).map(|_| ()))
            .await
            .map_err(|e| e.logged("forget", key))
    }

    async fn empty_by_match(&self, pattern: &str) -> CacheResult<()> {
        let compiled = KeyPattern::new(pattern)?;
        let keys = self
            .matching(compiled)
            .await
            .map_err(|e| e.logged("empty_by_match", pattern))?;

        let config = self.config.clone();
        let removed = self
            .blocking(move |store| {
                let mut removed = 0usize;
                for key in &keys {
                    if store.delete(config.build_key(key).as_bytes())? {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await
            .map_err(|e| e.logged("empty_by_match", pattern))?;

        debug!(pattern, removed, "Removed matching embedded keys");
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let compiled = KeyPattern::new(pattern)?;
        let mut keys = self
            .matching(compiled)
            .await
            .map_err(|e| e.logged("keys", pattern))?;
        keys.sort_unstable();
        Ok(keys)
    }
}
