//! Application configuration loaded from the environment.

use crate::error::{LarderError, LarderResult};
use larder_cache::{BackendKind, CacheConfig};
use larder_cron::{CronExpression, CronPresets};
use larder_redis::RedisConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default discard ratio a value-log segment must reach before GC rewrites it.
pub const DEFAULT_GC_THRESHOLD: f64 = 0.7;

/// Default upper bound on segments rewritten per scheduled GC run.
pub const DEFAULT_GC_MAX_ROUNDS: usize = 16;

/// Everything bootstrap needs, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application root; the embedded store lives under `<root>/tmp/cache`.
    pub root: PathBuf,

    /// Selected cache backend (`CACHE`)
    pub cache: BackendKind,

    /// Session store kind (`SESSION_TYPE`), passed through untouched
    pub session_type: Option<String>,

    /// Redis pool settings (`REDIS_*`)
    pub redis: RedisConfig,

    /// Namespace prefix (`CACHE_PREFIX`, falling back to `REDIS_PREFIX`)
    pub key_prefix: Option<String>,

    /// Value-log GC discard ratio (`CACHE_GC_THRESHOLD`)
    pub gc_threshold: f64,

    /// Cron expression for the GC job (`CACHE_GC_SCHEDULE`)
    pub gc_schedule: String,

    /// Segments rewritten at most per GC run
    pub gc_max_rounds: usize,
}

impl AppConfig {
    /// Defaults for an application rooted at `root`: cache disabled.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: BackendKind::Disabled,
            session_type: None,
            redis: RedisConfig::default(),
            key_prefix: None,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            gc_schedule: CronPresets::DAILY.to_string(),
            gc_max_rounds: DEFAULT_GC_MAX_ROUNDS,
        }
    }

    /// Load from the process environment and `<root>/.env`.
    ///
    /// Variables already set in the process win over the file. A missing
    /// `.env` is fine; an unreadable or malformed one is an error.
    pub fn load(root: impl AsRef<Path>) -> LarderResult<Self> {
        let root = root.as_ref();
        let dotenv_path = root.join(".env");

        let mut file_vars = HashMap::new();
        if dotenv_path.is_file() {
            for item in dotenvy::from_path_iter(&dotenv_path)? {
                let (name, value) = item?;
                file_vars.insert(name, value);
            }
            tracing::debug!(path = %dotenv_path.display(), vars = file_vars.len(), "Loaded .env");
        }

        Self::from_lookup(root, |name| {
            std::env::var(name).ok().or_else(|| file_vars.get(name).cloned())
        })
    }

    /// Resolve configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(root: impl Into<PathBuf>, lookup: F) -> LarderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::new(root);

        if let Some(cache) = non_empty("CACHE") {
            config.cache = cache.parse()?;
        }

        config.session_type = non_empty("SESSION_TYPE").map(|s| s.to_ascii_lowercase());
        config.redis = RedisConfig::from_lookup(&lookup).build();
        config.key_prefix = non_empty("CACHE_PREFIX").or_else(|| non_empty("REDIS_PREFIX"));

        if let Some(threshold) = non_empty("CACHE_GC_THRESHOLD") {
            config.gc_threshold = threshold.parse().map_err(|_| {
                LarderError::Config(format!("CACHE_GC_THRESHOLD is not a number: {:?}", threshold))
            })?;
        }

        if let Some(schedule) = non_empty("CACHE_GC_SCHEDULE") {
            config.gc_schedule = schedule;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cache stack cannot run with.
    pub fn validate(&self) -> LarderResult<()> {
        if !(self.gc_threshold > 0.0 && self.gc_threshold < 1.0) {
            return Err(LarderError::Config(format!(
                "GC threshold must be between 0 and 1 exclusive, got {}",
                self.gc_threshold
            )));
        }
        if self.gc_max_rounds == 0 {
            return Err(LarderError::Config("gc_max_rounds must be at least 1".to_string()));
        }
        CronExpression::parse(&self.gc_schedule)
            .map_err(|e| LarderError::Config(format!("CACHE_GC_SCHEDULE: {}", e)))?;
        self.cache_config()?;
        Ok(())
    }

    /// Directory of the embedded store.
    pub fn storage_dir(&self) -> PathBuf {
        self.root.join("tmp").join("cache")
    }

    /// Namespace settings for whichever cache backend is built.
    pub fn cache_config(&self) -> LarderResult<CacheConfig> {
        Ok(match &self.key_prefix {
            Some(prefix) => CacheConfig::new().with_key_prefix(prefix.clone())?,
            None => CacheConfig::new(),
        })
    }

    /// Whether sessions are stored in Redis.
    pub fn redis_sessions(&self) -> bool {
        self.session_type.as_deref() == Some("redis")
    }

    /// Whether any consumer needs the Redis pool.
    pub fn needs_redis(&self) -> bool {
        self.cache == BackendKind::Redis || self.redis_sessions()
    }
}
