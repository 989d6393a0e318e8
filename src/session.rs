//! Session store wiring.

use larder_redis::RedisPool;

/// What the session subsystem should use, as decided at bootstrap.
///
/// When sessions are kept in Redis this carries the same pool the cache
/// uses, so the process never opens two pools to one server.
#[derive(Clone, Default)]
pub enum SessionBackend {
    Redis(RedisPool),
    /// Any other `SESSION_TYPE` (`cookie`, a database kind, ...), untouched.
    Other(String),
    #[default]
    None,
}

impl SessionBackend {
    pub(crate) fn new(session_type: Option<&str>, pool: Option<&RedisPool>) -> Self {
        match (session_type, pool) {
            (Some("redis"), Some(pool)) => Self::Redis(pool.clone()),
            (Some(kind), _) => Self::Other(kind.to_string()),
            (None, _) => Self::None,
        }
    }

    /// The configured session type, if any.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Redis(_) => Some("redis"),
            Self::Other(kind) => Some(kind),
            Self::None => None,
        }
    }

    pub fn redis_pool(&self) -> Option<&RedisPool> {
        match self {
            Self::Redis(pool) => Some(pool),
            _ => None,
        }
    }
}

impl std::fmt::Debug for SessionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionBackend").field(&self.kind()).finish()
    }
}
