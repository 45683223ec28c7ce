// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration
//!
//! Loaded from YAML. Durations are human strings ("5m", "30s", "1h30m").
//! Every field has a default, so an empty document is a valid configuration.

use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Freshness window for cached preview results
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on the whole miss path of one preview
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

/// Result cache settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Time-to-live for cached row sets
    #[serde(deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
    /// Maximum number of cached row sets, 0 disables caching
    pub max_entries: usize,
    /// Run a background sweeper at this interval
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            max_entries: 1024,
            sweep_interval: None,
        }
    }
}

/// Settings applied to every ephemeral store connection
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// DuckDB worker threads per store
    pub threads: Option<u32>,
    /// DuckDB memory limit per store, e.g. "512MB"
    pub max_memory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub store: StoreConfig,
    #[serde(deserialize_with = "deserialize_duration")]
    pub query_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration::parse(&text).map_err(serde::de::Error::custom)
}

pub(crate) fn deserialize_optional_duration<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = Option::<String>::deserialize(deserializer)?;
    text.map(|t| parse_duration::parse(&t).map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml_str("").expect("empty config");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.query_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_human_durations() {
        let config = EngineConfig::from_yaml_str(
            r#"
cache:
  ttl: 90s
  max_entries: 10
  sweep_interval: 1m
store:
  threads: 2
  max_memory: 256MB
query_timeout: 2m
"#,
        )
        .expect("parse");

        assert_eq!(config.cache.ttl, Duration::from_secs(90));
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.sweep_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.store.threads, Some(2));
        assert_eq!(config.store.max_memory.as_deref(), Some("256MB"));
        assert_eq!(config.query_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = EngineConfig::from_yaml_str("cache:\n  max_entries: 0\n").expect("parse");
        assert_eq!(config.cache.max_entries, 0);
        assert_eq!(config.cache.ttl, DEFAULT_CACHE_TTL);
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        assert!(EngineConfig::from_yaml_str("query_timeout: soon\n").is_err());
        assert!(EngineConfig::from_yaml_str("unknown_key: 1\n").is_err());
    }
}
