// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Ephemeral store guard
//!
//! One in-memory DuckDB database per preview. The guard owns the connection
//! and closes it on every exit path, including cancellation and panics, which
//! discards every table the request created. Once tied to a cancellation
//! token, cancelling the token interrupts whatever statement is running.

use diagnostics::*;
use duckdb::{Config, Connection};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::error::{ExecutionError, PreviewError};

/// How many rows are inserted or fetched between cancellation checks
pub(crate) const CANCEL_CHECK_ROWS: usize = 1024;

/// Return `Cancelled` once the request has been abandoned
pub(crate) fn checkpoint(cancel: &CancellationToken, stage: &str) -> Result<(), PreviewError> {
    if cancel.is_cancelled() {
        return Err(PreviewError::Cancelled(format!("abandoned during {stage}")));
    }
    Ok(())
}

pub struct EphemeralStore {
    conn: Option<Connection>,
    opened: Instant,
    watcher: Option<JoinHandle<()>>,
}

impl EphemeralStore {
    /// Open a fresh in-memory store. External access (reading or writing host
    /// files, installing extensions) is disabled before any caller SQL runs.
    pub fn open(config: &StoreConfig) -> Result<Self, ExecutionError> {
        let mut db_config = Config::default()
            .enable_external_access(false)
            .map_err(store_error)?;
        if let Some(threads) = config.threads {
            db_config = db_config.threads(i64::from(threads)).map_err(store_error)?;
        }
        if let Some(limit) = &config.max_memory {
            db_config = db_config.max_memory(limit).map_err(store_error)?;
        }

        let conn = Connection::open_in_memory_with_flags(db_config).map_err(store_error)?;
        debug!("Opened ephemeral store");
        Ok(Self {
            conn: Some(conn),
            opened: Instant::now(),
            watcher: None,
        })
    }

    /// Interrupt the running statement when `cancel` fires. The watcher runs
    /// on the current tokio runtime; without one, cancellation is only seen
    /// at checkpoints.
    pub fn interrupt_on(&mut self, cancel: &CancellationToken) -> Result<(), ExecutionError> {
        let interrupt = self.connection()?.interrupt_handle();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, running statements cannot be interrupted");
            return Ok(());
        };

        let cancel = cancel.clone();
        if let Some(previous) = self.watcher.replace(runtime.spawn(async move {
            cancel.cancelled().await;
            debug!("Interrupting ephemeral store");
            interrupt.interrupt();
        })) {
            previous.abort();
        }
        Ok(())
    }

    pub fn connection(&self) -> Result<&Connection, ExecutionError> {
        self.conn
            .as_ref()
            .ok_or_else(|| ExecutionError::Store("store already closed".to_string()))
    }

    pub fn connection_mut(&mut self) -> Result<&mut Connection, ExecutionError> {
        self.conn
            .as_mut()
            .ok_or_else(|| ExecutionError::Store("store already closed".to_string()))
    }

    /// Close the store now and report the outcome. Dropping the guard does
    /// the same but can only log a failure.
    pub fn close(mut self) -> Result<(), ExecutionError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), ExecutionError> {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let lifetime_ms = self.opened.elapsed().as_millis() as u64;
        match conn.close() {
            Ok(()) => {
                debug!("Released ephemeral store after {lifetime_ms} ms", lifetime_ms: lifetime_ms);
                Ok(())
            }
            Err((_conn, e)) => Err(store_error(e)),
        }
    }
}

impl Drop for EphemeralStore {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            let reason = e.to_string();
            warn!("Ephemeral store did not close cleanly: {reason}", reason: reason);
        }
    }
}

fn store_error(e: duckdb::Error) -> ExecutionError {
    ExecutionError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_query_close() {
        let store = EphemeralStore::open(&StoreConfig::default()).expect("open");
        let one: i64 = store
            .connection()
            .expect("connection")
            .query_row("SELECT 1", [], |row| row.get(0))
            .expect("query");
        assert_eq!(one, 1);
        store.close().expect("close");
    }

    #[test]
    fn test_stores_are_isolated() {
        let a = EphemeralStore::open(&StoreConfig::default()).expect("open a");
        let b = EphemeralStore::open(&StoreConfig::default()).expect("open b");
        a.connection()
            .expect("a")
            .execute_batch("CREATE TABLE only_in_a (x VARCHAR)")
            .expect("create");

        let err = b
            .connection()
            .expect("b")
            .execute_batch("SELECT * FROM only_in_a");
        assert!(err.is_err());
    }

    #[test]
    fn test_external_access_is_disabled() {
        let store = EphemeralStore::open(&StoreConfig::default()).expect("open");
        let result = store
            .connection()
            .expect("connection")
            .execute_batch("COPY (SELECT 1) TO '/tmp/sheetql_should_not_exist.csv'");
        assert!(result.is_err());
    }

    #[test]
    fn test_store_limits_apply() {
        let config = StoreConfig {
            threads: Some(1),
            max_memory: Some("128MB".to_string()),
        };
        let store = EphemeralStore::open(&config).expect("open with limits");
        let threads: i64 = store
            .connection()
            .expect("connection")
            .query_row("SELECT current_setting('threads')", [], |row| row.get(0))
            .expect("setting");
        assert_eq!(threads, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_interrupts_running_statement() {
        let token = CancellationToken::new();
        let mut store = EphemeralStore::open(&StoreConfig::default()).expect("open");
        store.interrupt_on(&token).expect("watch");

        let worker = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let result: Result<i64, duckdb::Error> = store
                .connection()
                .expect("connection")
                .query_row("SELECT count(*) FROM range(20000000000)", [], |row| row.get(0));
            drop(store);
            (result, started.elapsed())
        });

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        token.cancel();

        let (result, elapsed) = tokio::time::timeout(std::time::Duration::from_secs(20), worker)
            .await
            .expect("statement was not interrupted")
            .expect("worker");
        assert!(result.is_err());
        assert!(elapsed < std::time::Duration::from_secs(20));
    }

    #[test]
    fn test_interrupt_needs_no_runtime() {
        let mut store = EphemeralStore::open(&StoreConfig::default()).expect("open");
        store
            .interrupt_on(&CancellationToken::new())
            .expect("without a runtime");
        store.close().expect("close");
    }

    #[test]
    fn test_checkpoint() {
        let token = CancellationToken::new();
        assert!(checkpoint(&token, "ingest").is_ok());
        token.cancel();
        let err = checkpoint(&token, "ingest").expect_err("cancelled");
        assert_eq!(err.code(), "Cancelled");
    }
}
