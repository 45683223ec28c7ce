// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! SheetQL - ad-hoc SQL previews over spreadsheet datasets
//!
//! Each preview loads the dataset into a throwaway in-memory DuckDB store,
//! rewrites sheet and header names in the caller's query to the physical
//! identifiers of that store, runs it and caches the rows for a short time.
//!
//! Set SHEETQL_LOG to control logging (off, error, warn, info, debug).

/// Scalar values
pub mod value;

/// Dataset identity and lookup
pub mod dataset;

// Error types
pub mod error;

// Engine configuration
pub mod config;

/// Sheet ingestion from workbooks, delimited files and inline grids
pub mod ingest;

// Ephemeral store guard
pub mod store;

/// Tables and rows inside the ephemeral store
pub mod materialize;

pub mod resolve;

/// Token-aware query rewriting
pub mod rewrite;

pub mod execute;

// Result cache
pub mod cache;

/// The preview pipeline
pub mod preview;

pub use cache::{CacheKey, CacheStats, MemoryResultCache, ResultCache};
pub use config::{CacheConfig, ConfigError, EngineConfig, StoreConfig};
pub use dataset::{Dataset, DatasetId, DatasetLookup, MemoryCatalog, OwnerId, TabularSource};
pub use error::{
    CacheError, ErrorKind, ErrorReport, ExecutionError, IngestError, PreviewError, Result,
    SchemaError,
};
pub use execute::RowSet;
pub use ingest::{RawSheet, Sheet};
pub use preview::{PipelineStats, PreviewEngine, PreviewRequest, StatsSnapshot};
pub use resolve::{ColumnMapping, IdentifierMap, TableMapping};
pub use value::{Row, Value};
