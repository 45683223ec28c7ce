// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

// Error types for the preview pipeline

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::dataset::{DatasetId, OwnerId};

/// Which stage of a preview request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    ValidationError,
    NotFoundError,
    IngestError,
    SchemaError,
    ExecutionError,
    CacheError,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::IngestError => "IngestError",
            ErrorKind::SchemaError => "SchemaError",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::CacheError => "CacheError",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("sheet '{sheet}' is missing its header row")]
    EmptyHeader { sheet: String },

    #[error("invalid column name in sheet '{sheet}' at cell {row},{column}")]
    InvalidColumnName {
        sheet: String,
        row: usize,
        column: usize,
    },

    #[error("duplicate column name '{name}' in sheet '{sheet}'")]
    DuplicateColumnName { sheet: String, name: String },

    #[error("dataset contains no sheets")]
    NoSheets,

    #[error("cannot read {path}: {message}")]
    Source { path: PathBuf, message: String },
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::EmptyHeader { .. } => "IngestError:EmptyHeader",
            IngestError::InvalidColumnName { .. } => "IngestError:InvalidColumnName",
            IngestError::DuplicateColumnName { .. } => "IngestError:DuplicateColumnName",
            IngestError::NoSheets => "IngestError:NoSheets",
            IngestError::Source { .. } => "IngestError:Source",
        }
    }

    pub(crate) fn unreadable<P: Into<PathBuf>, E: fmt::Display>(path: P, err: E) -> Self {
        IngestError::Source {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error(
        "mismatch between the number of columns and values in table '{table}' row {row}: expected {expected}, got {actual}"
    )]
    ColumnValueMismatch {
        table: String,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("identifier '{name}' is ambiguous between '{first}' and '{second}'")]
    AmbiguousIdentifier {
        name: String,
        first: String,
        second: String,
    },

    #[error("store rejected schema operation: {0}")]
    Store(String),
}

impl SchemaError {
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::ColumnValueMismatch { .. } => "SchemaError:ColumnValueMismatch",
            SchemaError::AmbiguousIdentifier { .. } => "SchemaError:AmbiguousIdentifier",
            SchemaError::Store(_) => "SchemaError:Store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// Opening or configuring the ephemeral store failed
    #[error("ephemeral store unavailable: {0}")]
    Store(String),

    /// The engine rejected or failed the query
    #[error("{0}")]
    Engine(String),

    #[error("preview worker failed: {0}")]
    Worker(String),
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::Store(_) => "ExecutionError:Store",
            ExecutionError::Engine(_) => "ExecutionError:Engine",
            ExecutionError::Worker(_) => "ExecutionError:Worker",
        }
    }
}

impl From<duckdb::Error> for ExecutionError {
    fn from(e: duckdb::Error) -> Self {
        ExecutionError::Engine(e.to_string())
    }
}

/// Failures of the result cache backend. Never surfaced to callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// The single failure a preview caller observes
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreviewError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("dataset {dataset} not found for owner {owner}")]
    NotFound { dataset: DatasetId, owner: OwnerId },

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("preview cancelled: {0}")]
    Cancelled(String),
}

impl PreviewError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        PreviewError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PreviewError::Validation(_) => ErrorKind::ValidationError,
            PreviewError::NotFound { .. } => ErrorKind::NotFoundError,
            PreviewError::Ingest(_) => ErrorKind::IngestError,
            PreviewError::Schema(_) => ErrorKind::SchemaError,
            PreviewError::Execution(_) => ErrorKind::ExecutionError,
            PreviewError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PreviewError::Validation(_) => "ValidationError",
            PreviewError::NotFound { .. } => "NotFoundError",
            PreviewError::Ingest(e) => e.code(),
            PreviewError::Schema(e) => e.code(),
            PreviewError::Execution(e) => e.code(),
            PreviewError::Cancelled(_) => "Cancelled",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable form of a [`PreviewError`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, PreviewError>;
