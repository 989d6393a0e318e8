//! Cache configuration types.

use crate::error::{CacheError, CacheResult};
use crate::pattern::{KeyPattern, escape};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which backend serves the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Pooled Redis server
    Redis,
    /// Local value-log store
    Embedded,
    /// No cache configured
    Disabled,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis => write!(f, "Redis"),
            Self::Embedded => write!(f, "Embedded"),
            Self::Disabled => write!(f, "Disabled"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    /// Parse the `CACHE` setting. Empty means disabled.
    fn from_str(s: &str) -> CacheResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "disabled" => Ok(Self::Disabled),
            "redis" | "networked" => Ok(Self::Redis),
            "badger" | "embedded" => Ok(Self::Embedded),
            other => Err(CacheError::Config(format!(
                "unknown cache backend {:?}, expected redis or embedded",
                other
            ))),
        }
    }
}

/// Separator between the namespace and the logical key.
pub const KEY_SEPARATOR: char = ':';

/// Per-cache settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prepended to every key as `<prefix>:<key>`
    pub key_prefix: Option<String>,
}

impl CacheConfig {
    /// Configuration without a namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key prefix. An empty prefix means no namespace.
    ///
    /// A prefix may not contain the `:` separator: `app` would otherwise
    /// claim the keys of `app:x` as its own `x:*`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> CacheResult<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        self.key_prefix = (!prefix.is_empty()).then_some(prefix);
        Ok(self)
    }

    /// Check a configuration built by hand or deserialized.
    pub fn validate(&self) -> CacheResult<()> {
        match &self.key_prefix {
            Some(prefix) => validate_prefix(prefix),
            None => Ok(()),
        }
    }

    /// Build the physical key for a logical key.
    pub fn build_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}{}{}", prefix, KEY_SEPARATOR, key),
            None => key.to_string(),
        }
    }

    /// Recover the logical key, or `None` if `key` is outside this namespace.
    pub fn strip_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        match &self.key_prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())?
                .strip_prefix(KEY_SEPARATOR),
            None => Some(key),
        }
    }

    /// The physical prefix every key in this namespace starts with.
    pub fn physical_prefix(&self) -> String {
        self.build_key("")
    }

    /// Pattern over physical keys selecting `pattern` inside this namespace.
    pub fn physical_pattern(&self, pattern: &KeyPattern) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}{}{}", escape(prefix), KEY_SEPARATOR, pattern.as_str()),
            None => pattern.as_str().to_string(),
        }
    }
}

fn validate_prefix(prefix: &str) -> CacheResult<()> {
    if prefix.contains(KEY_SEPARATOR) {
        return Err(CacheError::Config(format!(
            "key prefix {:?} must not contain {:?}",
            prefix, KEY_SEPARATOR
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("redis".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert_eq!("networked".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert_eq!("badger".parse::<BackendKind>().unwrap(), BackendKind::Embedded);
        assert_eq!(" Embedded ".parse::<BackendKind>().unwrap(), BackendKind::Embedded);
        assert_eq!("".parse::<BackendKind>().unwrap(), BackendKind::Disabled);
        assert!(matches!(
            "memcached".parse::<BackendKind>(),
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn test_build_key_with_prefix() {
        let config = CacheConfig::new().with_key_prefix("myapp").unwrap();
        assert_eq!(config.build_key("user:123"), "myapp:user:123");
        assert_eq!(config.physical_prefix(), "myapp:");
    }

    #[test]
    fn test_build_key_without_prefix() {
        let config = CacheConfig::new();
        assert_eq!(config.build_key("user:123"), "user:123");
        assert_eq!(CacheConfig::new().with_key_prefix("").unwrap(), config);
    }

    #[test]
    fn test_strip_key() {
        let config = CacheConfig::new().with_key_prefix("app").unwrap();
        assert_eq!(config.strip_key("app:user:1"), Some("user:1"));
        assert_eq!(config.strip_key("apple:user:1"), None);
        assert_eq!(config.strip_key("other:user:1"), None);
        assert_eq!(CacheConfig::new().strip_key("app:x"), Some("app:x"));
    }

    #[test]
    fn test_physical_pattern_escapes_prefix() {
        let config = CacheConfig::new().with_key_prefix("tenant[1]").unwrap();
        let pattern = KeyPattern::new("user:*").unwrap();
        assert_eq!(config.physical_pattern(&pattern), "tenant\\[1\\]:user:*");
    }

    #[test]
    fn test_prefix_with_separator_rejected() {
        for bad in ["app:x", ":", "a:b:c", "app:"] {
            assert!(
                matches!(
                    CacheConfig::new().with_key_prefix(bad),
                    Err(CacheError::Config(_))
                ),
                "prefix {:?} accepted",
                bad
            );
        }

        let deserialized = CacheConfig {
            key_prefix: Some("app:x".to_string()),
        };
        assert!(matches!(deserialized.validate(), Err(CacheError::Config(_))));
        assert!(CacheConfig::new().with_key_prefix("app").unwrap().validate().is_ok());
    }
}
