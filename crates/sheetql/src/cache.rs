// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Result cache
//!
//! Memoizes preview row sets by (raw query text, dataset id) for a fixed
//! time-to-live. Entries expire lazily on read; an optional sweeper task
//! removes expired entries in the background.

use async_trait::async_trait;
use diagnostics::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::dataset::DatasetId;
use crate::error::CacheError;
use crate::execute::RowSet;

/// Identity of a cached result. The query is the text the caller sent, before
/// any rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub dataset: DatasetId,
}

impl CacheKey {
    pub fn new<S: Into<String>>(query: S, dataset: DatasetId) -> Self {
        Self {
            query: query.into(),
            dataset,
        }
    }
}

/// Read-through cache in front of the preview pipeline.
///
/// Failures are soft: the pipeline logs them and carries on without the
/// cache.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<RowSet>>, CacheError>;

    async fn put(&self, key: CacheKey, rows: Arc<RowSet>) -> Result<(), CacheError>;
}

#[derive(Clone, Debug)]
struct CachedRows {
    rows: Arc<RowSet>,
    inserted: Instant,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

/// Process-local cache backed by a synchronized map
#[derive(Clone, Debug)]
pub struct MemoryResultCache {
    entries: Arc<RwLock<HashMap<CacheKey, CachedRows>>>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for MemoryResultCache {
    fn default() -> Self {
        Self::with_config(&CacheConfig::default())
    }
}

impl MemoryResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries,
        }
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl, config.max_entries)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let total_entries = entries.len();
        let expired_entries = entries.values().filter(|e| self.is_expired(e)).count();

        CacheStats {
            total_entries,
            expired_entries,
            active_entries: total_entries - expired_entries,
        }
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !self.is_expired(e));
        before - entries.len()
    }

    /// Sweep expired entries every `interval` until the handle is aborted
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    debug!("Cache sweeper removed {removed} expired entries", removed: removed);
                }
            }
        })
    }

    fn is_expired(&self, entry: &CachedRows) -> bool {
        entry.inserted.elapsed() >= self.ttl
    }

    fn evict_oldest(entries: &mut HashMap<CacheKey, CachedRows>) {
        if let Some(oldest) = entries
            .iter()
            .min_by_key(|(_, e)| e.inserted)
            .map(|(k, _)| k.clone())
        {
            _ = entries.remove(&oldest);
            debug!("Cache full, evicted oldest entry");
        }
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<RowSet>>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !self.is_expired(entry) => return Ok(Some(entry.rows.clone())),
                Some(_) => {}
            }
        }

        // Expired: drop it unless a concurrent writer already refreshed it
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| self.is_expired(e)) {
            _ = entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: CacheKey, rows: Arc<RowSet>) -> Result<(), CacheError> {
        if self.max_entries == 0 {
            return Ok(());
        }
        let mut entries = self.entries.write().await;
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            Self::evict_oldest(&mut entries);
        }
        _ = entries.insert(
            key,
            CachedRows {
                rows,
                inserted: Instant::now(),
            },
        );
        Ok(())
    }
}
