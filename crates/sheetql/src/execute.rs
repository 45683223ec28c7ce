// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Query execution against the ephemeral store

use diagnostics::*;
use duckdb::Connection;
use duckdb::types::Value as EngineValue;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ExecutionError, PreviewError};
use crate::resolve::IdentifierMap;
use crate::store::{CANCEL_CHECK_ROWS, checkpoint};
use crate::value::{Row, Value};

/// Rows of a preview result, with the output column names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Run the rewritten query and collect every row. Output columns that are
/// physical identifiers are reported under their logical names.
pub fn execute(
    conn: &Connection,
    sql: &str,
    names: &IdentifierMap,
    cancel: &CancellationToken,
) -> Result<RowSet, PreviewError> {
    let mut stmt = conn.prepare(sql).map_err(|e| engine_error(e, cancel))?;
    let mut rows = stmt.query([]).map_err(|e| engine_error(e, cancel))?;

    let columns: Vec<String> = rows
        .as_ref()
        .map(|stmt| stmt.column_names())
        .unwrap_or_default()
        .into_iter()
        .map(|name| names.logical_column(&name).map_or(name.clone(), str::to_string))
        .collect();
    let width = columns.len();

    let mut result = Vec::new();
    while let Some(row) = rows.next().map_err(|e| engine_error(e, cancel))? {
        if result.len() % CANCEL_CHECK_ROWS == 0 {
            checkpoint(cancel, "execute")?;
        }
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            let value: EngineValue = row.get(index).map_err(|e| engine_error(e, cancel))?;
            values.push(Value::from(value));
        }
        result.push(values);
    }

    let row_count = result.len();
    debug!("Query returned {row_count} rows", row_count: row_count);
    Ok(RowSet {
        columns,
        rows: result,
    })
}

/// An interrupted statement fails with an engine error; report it as the
/// cancellation it is
fn engine_error(e: duckdb::Error, cancel: &CancellationToken) -> PreviewError {
    match checkpoint(cancel, "execute") {
        Err(cancelled) => cancelled,
        Ok(()) => ExecutionError::from(e).into(),
    }
}
