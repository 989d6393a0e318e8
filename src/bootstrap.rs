//! Process-level wiring of cache, session pool and maintenance jobs.

use crate::config::AppConfig;
use crate::error::LarderResult;
use crate::selector::CacheSelector;
use crate::session::SessionBackend;
use larder_cache::{CacheHandle, EmbeddedCache};
use larder_cron::{CronError, CronScheduler};
use larder_redis::RedisPool;
use tracing::info;

/// Name of the scheduled value-log GC job.
pub const GC_JOB: &str = "value-log-gc";

/// The cache stack for one process.
///
/// Built once by [`Larder::bootstrap`]; hand out clones of [`Larder::cache`]
/// and [`Larder::session_backend`] to consumers and call
/// [`Larder::shutdown`] once on the way out.
///
/// # Examples
///
/// ```no_run
/// use larder::prelude::*;
///
/// # async fn run() -> Result<(), LarderError> {
/// let larder = Larder::bootstrap(AppConfig::load("/srv/app")?).await?;
///
/// larder.cache().set("greeting", b"hello", 60).await?;
///
/// larder.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Larder {
    config: AppConfig,
    cache: CacheHandle,
    redis: Option<RedisPool>,
    session: SessionBackend,
    scheduler: CronScheduler,
}

impl Larder {
    /// Select the backend, share the Redis pool with sessions and start the
    /// maintenance scheduler.
    ///
    /// With the embedded backend a [`GC_JOB`] is registered on
    /// `config.gc_schedule`. Must be called from within a Tokio runtime.
    pub async fn bootstrap(config: AppConfig) -> LarderResult<Self> {
        config.validate()?;
        let backends = CacheSelector::select(&config).await?;
        let session = SessionBackend::new(config.session_type.as_deref(), backends.redis.as_ref());

        let scheduler = CronScheduler::new();
        if let Some(embedded) = backends.cache.as_embedded() {
            register_gc_job(&scheduler, embedded.clone(), &config)?;
        }
        scheduler.start()?;

        info!(
            backend = %backends.cache.backend_kind(),
            session = session.kind().unwrap_or("none"),
            jobs = ?scheduler.list_jobs(),
            "Larder ready"
        );

        Ok(Self {
            config,
            cache: backends.cache,
            redis: backends.redis,
            session,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The selected cache. Cheap to clone.
    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    /// The session store decision, carrying the shared pool for Redis.
    pub fn session_backend(&self) -> &SessionBackend {
        &self.session
    }

    /// The Redis pool, if any consumer needed one.
    pub fn redis_pool(&self) -> Option<&RedisPool> {
        self.redis.as_ref()
    }

    /// The maintenance scheduler, for registering further jobs.
    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    /// Run value-log GC now instead of waiting for its schedule.
    ///
    /// Fails with [`CronError::JobNotFound`] when the embedded backend is
    /// not in use.
    pub async fn collect_garbage_now(&self) -> LarderResult<()> {
        Ok(self.scheduler.run_now(GC_JOB).await?)
    }

    /// Orderly teardown: stop the scheduler and wait for a running GC,
    /// close the embedded store, then release the Redis pool.
    pub async fn shutdown(self) -> LarderResult<()> {
        info!("Shutting down cache stack");
        self.scheduler.shutdown().await;

        if let Some(embedded) = self.cache.as_embedded() {
            embedded.close().await?;
        }

        if let Some(pool) = self.redis {
            let stats = pool.stats();
            info!(
                connections = stats.connections,
                idle = stats.idle_connections,
                "Releasing Redis pool"
            );
            drop(pool);
        }

        info!("Cache stack stopped");
        Ok(())
    }
}

fn register_gc_job(
    scheduler: &CronScheduler,
    cache: EmbeddedCache,
    config: &AppConfig,
) -> LarderResult<()> {
    let threshold = config.gc_threshold;
    let max_rounds = config.gc_max_rounds;

    scheduler.add_job(GC_JOB, &config.gc_schedule, move |_ctx| {
        let cache = cache.clone();
        async move {
            cache
                .collect_garbage(threshold, max_rounds)
                .await
                .map(|_| ())
                .map_err(|e| CronError::ExecutionFailed(e.to_string()))
        }
    })?;

    info!(
        job = GC_JOB,
        schedule = %config.gc_schedule,
        threshold,
        max_rounds,
        "Scheduled value-log GC"
    );
    Ok(())
}
