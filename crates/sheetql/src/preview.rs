// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Preview pipeline
//!
//! Validate, then look the result up in the cache. On a miss the dataset is
//! ingested into a fresh ephemeral store, the query is rewritten against the
//! resolved identifiers and executed, and the rows are cached.
//!
//! The miss path is blocking work and runs on tokio's blocking pool under a
//! timeout. Dropping the request future or hitting the timeout cancels it:
//! a running statement is interrupted, the worker stops at its next
//! checkpoint and the store guard releases the connection.

use diagnostics::*;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, MemoryResultCache, ResultCache};
use crate::config::{EngineConfig, StoreConfig};
use crate::dataset::{DatasetId, DatasetLookup, OwnerId, TabularSource};
use crate::error::{ExecutionError, PreviewError, Result};
use crate::execute::{RowSet, execute};
use crate::ingest::ingest;
use crate::materialize::materialize;
use crate::resolve::{IdentifierMap, TableMapping};
use crate::rewrite::rewrite;
use crate::store::{EphemeralStore, checkpoint};

/// One ad-hoc query against one dataset, on behalf of one caller
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewRequest {
    pub owner: OwnerId,
    pub dataset: DatasetId,
    pub query: String,
}

impl PreviewRequest {
    pub fn new<S: Into<String>>(owner: OwnerId, dataset: DatasetId, query: S) -> Self {
        Self {
            owner,
            dataset,
            query: query.into(),
        }
    }
}

/// Counters of pipeline side effects
#[derive(Debug, Default)]
pub struct PipelineStats {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    ingestions: AtomicU64,
    executions: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub ingestions: u64,
    pub executions: u64,
    pub failures: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            ingestions: self.ingestions.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        _ = counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct PreviewEngine {
    lookup: Arc<dyn DatasetLookup>,
    cache: Arc<dyn ResultCache>,
    config: EngineConfig,
    stats: Arc<PipelineStats>,
    sweeper: Option<JoinHandle<()>>,
}

impl PreviewEngine {
    /// Engine with the in-process result cache. When a sweep interval is
    /// configured and a tokio runtime is available, a sweeper task is started
    /// and stopped again when the engine is dropped.
    pub fn new(lookup: Arc<dyn DatasetLookup>, config: EngineConfig) -> Self {
        let cache = MemoryResultCache::with_config(&config.cache);
        let sweeper = match (
            config.cache.sweep_interval,
            tokio::runtime::Handle::try_current(),
        ) {
            (Some(interval), Ok(_)) => Some(cache.spawn_sweeper(interval)),
            (Some(_), Err(_)) => {
                warn!("No tokio runtime, cache sweeper not started");
                None
            }
            (None, _) => None,
        };

        let mut engine = Self::with_cache(lookup, Arc::new(cache), config);
        engine.sweeper = sweeper;
        engine
    }

    pub fn with_cache(
        lookup: Arc<dyn DatasetLookup>,
        cache: Arc<dyn ResultCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            lookup,
            cache,
            config,
            stats: Arc::new(PipelineStats::default()),
            sweeper: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run a preview, serving it from the cache when a fresh result exists
    pub async fn preview(&self, request: &PreviewRequest) -> Result<Arc<RowSet>> {
        PipelineStats::bump(&self.stats.requests);
        let started = Instant::now();
        let result = self.run_preview(request).await;

        let dataset = request.dataset.to_string();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(rows) => {
                let row_count = rows.len();
                info!(
                    "Preview of {dataset} returned {row_count} rows in {elapsed_ms} ms",
                    dataset: dataset,
                    row_count: row_count,
                    elapsed_ms: elapsed_ms
                );
            }
            Err(e) => {
                PipelineStats::bump(&self.stats.failures);
                let code = e.code();
                let message = e.to_string();
                warn!(
                    "Preview of {dataset} failed with {code}: {message}",
                    dataset: dataset,
                    code: code,
                    message: message
                );
            }
        }
        result
    }

    /// Logical to physical mapping of every sheet in a dataset, without
    /// running a query
    pub async fn describe(&self, owner: &OwnerId, dataset: &DatasetId) -> Result<Vec<TableMapping>> {
        let source = self.locate(owner, dataset).await?;
        let store_config = self.config.store.clone();
        let stats = self.stats.clone();

        self.run_blocking("describe", move |cancel| {
            let (_store, names) = load(&source, &store_config, &stats, cancel)?;
            Ok(names.into_layout())
        })
        .await
    }

    async fn run_preview(&self, request: &PreviewRequest) -> Result<Arc<RowSet>> {
        if request.query.trim().is_empty() {
            return Err(PreviewError::validation("query text is empty"));
        }
        let source = self.locate(&request.owner, &request.dataset).await?;

        let key = CacheKey::new(request.query.clone(), request.dataset);
        match self.cache.get(&key).await {
            Ok(Some(rows)) => {
                PipelineStats::bump(&self.stats.cache_hits);
                debug!("Cache hit");
                return Ok(rows);
            }
            Ok(None) => {
                PipelineStats::bump(&self.stats.cache_misses);
                debug!("Cache miss");
            }
            Err(e) => {
                PipelineStats::bump(&self.stats.cache_misses);
                let reason = e.to_string();
                warn!("Cache lookup failed, bypassing cache: {reason}", reason: reason);
            }
        }

        let query = request.query.clone();
        let store_config = self.config.store.clone();
        let stats = self.stats.clone();
        let rows = self
            .run_blocking("preview", move |cancel| {
                let (store, names) = load(&source, &store_config, &stats, cancel)?;
                let sql = rewrite(&query, &names);
                debug!("Rewritten query: {sql}", sql: sql);
                checkpoint(cancel, "execute")?;
                PipelineStats::bump(&stats.executions);
                execute(store.connection()?, &sql, &names, cancel)
            })
            .await?;
        let rows = Arc::new(rows);

        if let Err(e) = self.cache.put(key, rows.clone()).await {
            let reason = e.to_string();
            warn!("Cache store failed, result not cached: {reason}", reason: reason);
        }
        Ok(rows)
    }

    /// Ownership is checked before anything else touches the dataset, the
    /// cache included
    async fn locate(&self, owner: &OwnerId, dataset: &DatasetId) -> Result<TabularSource> {
        if dataset.is_nil() {
            return Err(PreviewError::validation("dataset reference is missing"));
        }
        self.lookup
            .locate(owner, dataset)
            .await
            .ok_or_else(|| PreviewError::NotFound {
                dataset: *dataset,
                owner: owner.clone(),
            })
    }

    /// Run blocking stages on the blocking pool under the query timeout
    async fn run_blocking<T, F>(&self, stage: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        // Cancels the worker if this future is dropped before it finishes
        let guard = cancel.clone().drop_guard();
        let worker_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || work(&worker_cancel));

        let timeout = self.config.query_timeout;
        let result = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ExecutionError::Worker(join.to_string()).into()),
            Err(_) => {
                cancel.cancel();
                let timeout_ms = timeout.as_millis() as u64;
                Err(PreviewError::Cancelled(format!(
                    "{stage} timed out after {timeout_ms} ms"
                )))
            }
        };
        _ = guard.disarm();
        result
    }
}

impl Drop for PreviewEngine {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Ingest a dataset into a fresh store and resolve its identifiers
fn load(
    source: &TabularSource,
    store_config: &StoreConfig,
    stats: &PipelineStats,
    cancel: &CancellationToken,
) -> Result<(EphemeralStore, IdentifierMap)> {
    checkpoint(cancel, "ingest")?;
    PipelineStats::bump(&stats.ingestions);
    let sheets = ingest(source)?;

    checkpoint(cancel, "materialize")?;
    let mut store = EphemeralStore::open(store_config)?;
    store.interrupt_on(cancel)?;
    let conn = store.connection_mut()?;
    let schema = materialize(conn, &sheets, cancel)?;
    let table_count = schema.tables.len();
    let row_count = schema.total_rows();
    debug!(
        "Materialized {table_count} tables with {row_count} rows",
        table_count: table_count,
        row_count: row_count
    );

    checkpoint(cancel, "resolve")?;
    let names = IdentifierMap::resolve(conn)?;
    Ok((store, names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawSheet;
    use crate::value::Value;
    use std::time::Duration;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    async fn engine_with_sheet(config: EngineConfig) -> (PreviewEngine, OwnerId, DatasetId) {
        let catalog = crate::dataset::MemoryCatalog::new();
        let owner = OwnerId::from("owner-1");
        let dataset = catalog
            .register(
                owner.clone(),
                TabularSource::inline(vec![RawSheet::new(
                    "Sheet1",
                    vec![
                        vec![text("A"), text("B")],
                        vec![Value::Integer(1), text("x")],
                        vec![Value::Integer(2), text("y")],
                    ],
                )]),
            )
            .await;
        (PreviewEngine::new(Arc::new(catalog), config), owner, dataset)
    }

    #[tokio::test]
    async fn test_preview_then_cache_hit() {
        let (engine, owner, dataset) = engine_with_sheet(EngineConfig::default()).await;
        let request = PreviewRequest::new(owner, dataset, "SELECT B FROM [Sheet1] ORDER BY A");

        let first = engine.preview(&request).await.expect("first");
        assert_eq!(first.rows, vec![vec![text("x")], vec![text("y")]]);
        let second = engine.preview(&request).await.expect("second");
        assert_eq!(first, second);

        let stats = engine.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.ingestions, 1);
        assert_eq!(stats.executions, 1);
    }

    #[tokio::test]
    async fn test_validation_happens_first() {
        let (engine, owner, dataset) = engine_with_sheet(EngineConfig::default()).await;

        let err = engine
            .preview(&PreviewRequest::new(owner.clone(), dataset, "   "))
            .await
            .expect_err("empty query");
        assert_eq!(err.code(), "ValidationError");

        let err = engine
            .preview(&PreviewRequest::new(owner, DatasetId::nil(), "SELECT 1"))
            .await
            .expect_err("missing dataset");
        assert_eq!(err.code(), "ValidationError");

        let stats = engine.stats();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.ingestions, 0);
    }

    #[tokio::test]
    async fn test_cached_rows_are_not_served_to_other_owners() {
        let (engine, owner, dataset) = engine_with_sheet(EngineConfig::default()).await;
        let query = "SELECT * FROM [Sheet1]";
        engine
            .preview(&PreviewRequest::new(owner, dataset, query))
            .await
            .expect("owner");

        let err = engine
            .preview(&PreviewRequest::new(OwnerId::from("intruder"), dataset, query))
            .await
            .expect_err("not owner");
        assert_eq!(err.code(), "NotFoundError");
        assert_eq!(engine.stats().cache_hits, 0);
    }

    #[tokio::test]
    async fn test_describe_lists_mapping() {
        let (engine, owner, dataset) = engine_with_sheet(EngineConfig::default()).await;
        let layout = engine.describe(&owner, &dataset).await.expect("describe");
        assert_eq!(layout.len(), 1);
        assert_eq!(layout[0].logical, "Sheet1");
        assert_eq!(layout[0].physical, "sheet1");
        assert_eq!(layout[0].columns.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_cancels() {
        let config = EngineConfig {
            query_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        let (engine, owner, dataset) = engine_with_sheet(config).await;
        let err = engine
            .preview(&PreviewRequest::new(owner, dataset, "SELECT * FROM [Sheet1]"))
            .await
            .expect_err("timeout");
        assert_eq!(err.code(), "Cancelled");
    }
}
