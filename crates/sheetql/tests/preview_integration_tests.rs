// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use sheetql::{
    CacheConfig, CacheError, CacheKey, DatasetId, EngineConfig, MemoryCatalog, OwnerId,
    PreviewEngine, PreviewError, PreviewRequest, RawSheet, ResultCache, RowSet, SchemaError,
    TabularSource, Value,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn owner() -> OwnerId {
    OwnerId::from("analyst@example.com")
}

/// Engine over a catalog holding one dataset owned by `owner()`
async fn engine_for(source: TabularSource, config: EngineConfig) -> (PreviewEngine, DatasetId) {
    let catalog = MemoryCatalog::new();
    let dataset = catalog.register(owner(), source).await;
    (PreviewEngine::new(Arc::new(catalog), config), dataset)
}

async fn workbook_engine() -> (PreviewEngine, DatasetId) {
    engine_for(
        TabularSource::from_path(fixture("orders.xlsx")),
        EngineConfig::default(),
    )
    .await
}

#[tokio::test]
async fn test_workbook_round_trip() -> TestResult {
    let (engine, dataset) = workbook_engine().await;
    let rows = engine
        .preview(&PreviewRequest::new(owner(), dataset, "SELECT * FROM [Sheet1]"))
        .await?;

    assert_eq!(rows.columns, vec!["A", "B"]);
    // Storage columns are text, so stored cells come back as text
    assert_eq!(
        rows.rows,
        vec![vec![text("1"), text("x")], vec![text("2"), text("y")]]
    );
    Ok(())
}

#[tokio::test]
async fn test_headers_survive_materialization() -> TestResult {
    let (engine, dataset) = workbook_engine().await;
    let layout = engine.describe(&owner(), &dataset).await?;

    let sheets: Vec<&str> = layout.iter().map(|t| t.logical.as_str()).collect();
    assert_eq!(sheets, vec!["Sheet1", "Customers", "Empty"]);

    let customers: Vec<&str> = layout[1]
        .columns
        .iter()
        .map(|c| c.logical.as_str())
        .collect();
    assert_eq!(customers, vec!["id", "Full Name", "valid", "Unit Price ($)"]);
    let physical: Vec<&str> = layout[1]
        .columns
        .iter()
        .map(|c| c.physical.as_str())
        .collect();
    assert_eq!(physical, vec!["id", "full_name", "valid", "unit_price"]);
    Ok(())
}

#[tokio::test]
async fn test_second_identical_request_is_served_from_cache() -> TestResult {
    let (engine, dataset) = workbook_engine().await;
    let request = PreviewRequest::new(owner(), dataset, "SELECT B FROM [Sheet1] WHERE A = '2'");

    let first = engine.preview(&request).await?;
    let after_first = engine.stats();
    let second = engine.preview(&request).await?;
    let after_second = engine.stats();

    assert_eq!(first, second);
    assert_eq!(after_first.ingestions, 1);
    assert_eq!(after_second.ingestions, after_first.ingestions);
    assert_eq!(after_second.executions, after_first.executions);
    assert_eq!(after_second.cache_hits, 1);

    // Different text is a different key
    engine
        .preview(&PreviewRequest::new(owner(), dataset, "SELECT B FROM [Sheet1]"))
        .await?;
    assert_eq!(engine.stats().ingestions, 2);
    Ok(())
}

#[tokio::test]
async fn test_expired_result_reruns_pipeline() -> TestResult {
    let config = EngineConfig {
        cache: CacheConfig {
            ttl: Duration::from_millis(50),
            ..CacheConfig::default()
        },
        ..EngineConfig::default()
    };
    let (engine, dataset) =
        engine_for(TabularSource::from_path(fixture("orders.xlsx")), config).await;
    let request = PreviewRequest::new(owner(), dataset, "SELECT count(*) FROM [Customers]");

    engine.preview(&request).await?;
    tokio::time::sleep(Duration::from_millis(120)).await;
    let rows = engine.preview(&request).await?;

    assert_eq!(rows.rows, vec![vec![Value::Integer(3)]]);
    let stats = engine.stats();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.ingestions, 2);
    Ok(())
}

#[tokio::test]
async fn test_bracketed_sheet_and_spaced_header() -> TestResult {
    let (engine, dataset) = workbook_engine().await;
    let rows = engine
        .preview(&PreviewRequest::new(
            owner(),
            dataset,
            "SELECT Full Name FROM [Customers] WHERE valid = 'yes' ORDER BY id",
        ))
        .await?;

    assert_eq!(rows.columns, vec!["Full Name"]);
    assert_eq!(
        rows.rows,
        vec![vec![text("Ada Lovelace")], vec![text("Grace Hopper")]]
    );
    Ok(())
}

#[tokio::test]
async fn test_embedded_names_are_not_rewritten() -> TestResult {
    let source = TabularSource::inline(vec![RawSheet::new(
        "T",
        vec![
            vec![text("id"), text("name")],
            vec![text("7"), text("id card")],
        ],
    )]);
    let (engine, dataset) = engine_for(source, EngineConfig::default()).await;

    let rows = engine
        .preview(&PreviewRequest::new(
            owner(),
            dataset,
            "WITH v AS (SELECT id AS valid, 'id' AS label FROM [T]) \
             SELECT valid, label FROM v -- id",
        ))
        .await?;

    assert_eq!(rows.columns, vec!["valid", "label"]);
    assert_eq!(rows.rows, vec![vec![text("7"), text("id")]]);
    Ok(())
}

#[tokio::test]
async fn test_string_literal_forms_keep_their_text() -> TestResult {
    let source = TabularSource::inline(vec![RawSheet::new(
        "T",
        vec![vec![text("id")], vec![text("7")]],
    )]);
    let (engine, dataset) = engine_for(source, EngineConfig::default()).await;

    let rows = engine
        .preview(&PreviewRequest::new(
            owner(),
            dataset,
            "SELECT $$id$$ AS a, E'it\\'s id' AS b, id FROM [T]",
        ))
        .await?;

    assert_eq!(rows.columns, vec!["a", "b", "id"]);
    assert_eq!(rows.rows, vec![vec![text("id"), text("it's id"), text("7")]]);
    Ok(())
}

#[tokio::test]
async fn test_computed_results_are_typed() -> TestResult {
    let (engine, dataset) = workbook_engine().await;
    let rows = engine
        .preview(&PreviewRequest::new(
            owner(),
            dataset,
            "SELECT count(*) AS n, sum(CAST(Unit Price ($) AS DOUBLE)) AS total FROM [Customers]",
        ))
        .await?;

    assert_eq!(rows.columns, vec!["n", "total"]);
    assert_eq!(rows.rows, vec![vec![Value::Integer(3), Value::Real(22.75)]]);
    Ok(())
}

#[tokio::test]
async fn test_header_only_sheet_returns_no_rows() -> TestResult {
    let (engine, dataset) = workbook_engine().await;
    let rows = engine
        .preview(&PreviewRequest::new(owner(), dataset, "SELECT * FROM [Empty]"))
        .await?;

    assert!(rows.is_empty());
    assert_eq!(rows.columns, vec!["Code", "Label"]);
    Ok(())
}

#[tokio::test]
async fn test_empty_header_row_fails_ingestion() {
    let (engine, dataset) = engine_for(
        TabularSource::from_path(fixture("blank_header.xlsx")),
        EngineConfig::default(),
    )
    .await;

    let err = engine
        .preview(&PreviewRequest::new(owner(), dataset, "SELECT 1"))
        .await
        .expect_err("blank header");
    assert_eq!(err.code(), "IngestError:EmptyHeader");
    assert_eq!(engine.stats().executions, 0);
}

#[tokio::test]
async fn test_short_row_fails_materialization() {
    let source = TabularSource::inline(vec![RawSheet::new(
        "Sheet1",
        vec![
            vec![text("A"), text("B")],
            vec![Value::Integer(1), text("x")],
            vec![Value::Integer(2)],
        ],
    )]);
    let (engine, dataset) = engine_for(source, EngineConfig::default()).await;

    let err = engine
        .preview(&PreviewRequest::new(owner(), dataset, "SELECT * FROM [Sheet1]"))
        .await
        .expect_err("short row");
    assert_eq!(err.code(), "SchemaError:ColumnValueMismatch");
    assert_eq!(engine.stats().executions, 0);
}

#[tokio::test]
async fn test_unknown_names_surface_as_execution_errors() {
    let (engine, dataset) = workbook_engine().await;

    let err = engine
        .preview(&PreviewRequest::new(owner(), dataset, "SELECT Missing FROM [Customers]"))
        .await
        .expect_err("unknown column");
    assert_eq!(err.code(), "ExecutionError:Engine");

    let err = engine
        .preview(&PreviewRequest::new(owner(), dataset, "SELECT * FROM [Nope]"))
        .await
        .expect_err("unknown sheet");
    assert_eq!(err.code(), "ExecutionError:Engine");

    let report = err.report();
    assert_eq!(report.kind.to_string(), "ExecutionError");
}

#[tokio::test]
async fn test_foreign_or_missing_dataset_is_not_found() {
    let (engine, dataset) = workbook_engine().await;

    let err = engine
        .preview(&PreviewRequest::new(
            OwnerId::from("someone-else"),
            dataset,
            "SELECT * FROM [Sheet1]",
        ))
        .await
        .expect_err("foreign owner");
    assert_eq!(err.code(), "NotFoundError");

    let err = engine
        .preview(&PreviewRequest::new(owner(), DatasetId::new(), "SELECT 1"))
        .await
        .expect_err("unknown dataset");
    assert_eq!(err.code(), "NotFoundError");
    assert_eq!(engine.stats().ingestions, 0);
}

#[tokio::test]
async fn test_csv_dataset() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("readings.csv");
    std::fs::write(&path, "Station,Depth (m)\nnorth,1.5\nsouth,2.25\n")?;
    let (engine, dataset) =
        engine_for(TabularSource::from_path(&path), EngineConfig::default()).await;

    let rows = engine
        .preview(&PreviewRequest::new(
            owner(),
            dataset,
            "SELECT Station FROM [readings] WHERE CAST(Depth (m) AS DOUBLE) > 2",
        ))
        .await?;
    assert_eq!(rows.rows, vec![vec![text("south")]]);
    Ok(())
}

#[tokio::test]
async fn test_ragged_csv_fails_materialization() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("ragged.csv");
    std::fs::write(&path, "A,B\n1,x\n2\n")?;
    let (engine, dataset) =
        engine_for(TabularSource::from_path(&path), EngineConfig::default()).await;

    let err = engine
        .preview(&PreviewRequest::new(owner(), dataset, "SELECT * FROM [ragged]"))
        .await
        .expect_err("short record");
    assert_eq!(
        err,
        PreviewError::Schema(SchemaError::ColumnValueMismatch {
            table: "ragged".into(),
            row: 3,
            expected: 2,
            actual: 1,
        })
    );
    assert_eq!(engine.stats().executions, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_previews_are_isolated() -> TestResult {
    let (engine, dataset) = workbook_engine().await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // Distinct text per task so every request takes the miss path
            let query = format!("SELECT B FROM [Sheet1] ORDER BY A /* {i} */");
            engine
                .preview(&PreviewRequest::new(owner(), dataset, query))
                .await
        }));
    }

    for handle in handles {
        let rows = handle.await??;
        assert_eq!(rows.rows, vec![vec![text("x")], vec![text("y")]]);
    }
    assert_eq!(engine.stats().ingestions, 8);
    Ok(())
}

#[test]
fn test_timeout_stops_the_running_statement() -> TestResult {
    // One blocking thread: the follow-up task only runs once the timed-out
    // worker has given its thread back
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(1)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let config = EngineConfig {
            query_timeout: Duration::from_millis(300),
            ..EngineConfig::default()
        };
        let source = TabularSource::inline(vec![RawSheet::new(
            "T",
            vec![vec![text("id")], vec![text("1")]],
        )]);
        let (engine, dataset) = engine_for(source, config).await;

        let started = std::time::Instant::now();
        let err = engine
            .preview(&PreviewRequest::new(
                owner(),
                dataset,
                "SELECT count(*) FROM range(20000000000)",
            ))
            .await
            .expect_err("timeout");
        assert_eq!(err.code(), "Cancelled");
        assert!(started.elapsed() < Duration::from_secs(5));

        let freed = tokio::time::timeout(
            Duration::from_secs(15),
            tokio::task::spawn_blocking(|| ()),
        )
        .await;
        assert!(freed.is_ok(), "worker still holds the store");
        Ok(())
    })
}

/// Cache backend that fails every operation
struct BrokenCache;

#[async_trait]
impl ResultCache for BrokenCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Arc<RowSet>>, CacheError> {
        Err(CacheError::Unavailable("out of memory".into()))
    }

    async fn put(&self, _key: CacheKey, _rows: Arc<RowSet>) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("out of memory".into()))
    }
}

#[tokio::test]
async fn test_cache_failure_is_soft() -> TestResult {
    let catalog = MemoryCatalog::new();
    let dataset = catalog
        .register(owner(), TabularSource::from_path(fixture("orders.xlsx")))
        .await;
    let engine = PreviewEngine::with_cache(
        Arc::new(catalog),
        Arc::new(BrokenCache),
        EngineConfig::default(),
    );
    let request = PreviewRequest::new(owner(), dataset, "SELECT A FROM [Sheet1]");

    let first = engine.preview(&request).await?;
    let second = engine.preview(&request).await?;
    assert_eq!(first, second);
    assert_eq!(engine.stats().ingestions, 2);
    assert_eq!(engine.stats().failures, 0);
    Ok(())
}
