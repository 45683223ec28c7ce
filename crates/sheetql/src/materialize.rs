// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Schema materialization
//!
//! Creates one text-typed table per ingested sheet inside an ephemeral store
//! and inserts its rows through bound parameters. The logical sheet and
//! header names are attached to the physical objects as comments, which is
//! where the identifier resolver reads them back from.

use diagnostics::*;
use duckdb::{Connection, params_from_iter};
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

use crate::error::{PreviewError, SchemaError};
use crate::ingest::Sheet;
use crate::store::{CANCEL_CHECK_ROWS, checkpoint};

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded quotes
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Reduce a logical name to `[a-z0-9_]`. Runs of other characters collapse
/// to one underscore. A name left empty becomes `prefix`, a name starting
/// with a digit gets `prefix_` in front.
pub(crate) fn sanitize(logical: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(logical.len());
    let mut pending_underscore = false;
    for ch in logical.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_underscore && !out.is_empty() {
                out.push('_');
            }
            pending_underscore = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_underscore = true;
        }
    }

    if out.is_empty() {
        prefix.to_string()
    } else if out.starts_with(|c: char| c.is_ascii_digit()) {
        format!("{prefix}_{out}")
    } else {
        out
    }
}

/// Allocates distinct physical names within one namespace. Asking twice for
/// the same logical name returns the same physical name.
#[derive(Debug, Default)]
pub(crate) struct PhysicalNamer {
    prefix: &'static str,
    assigned: HashMap<String, String>,
    used: HashSet<String>,
}

impl PhysicalNamer {
    pub(crate) fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            ..Default::default()
        }
    }

    pub(crate) fn assign(&mut self, logical: &str) -> String {
        if let Some(physical) = self.assigned.get(logical) {
            return physical.clone();
        }
        let base = sanitize(logical, self.prefix);
        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        self.assigned.insert(logical.to_string(), candidate.clone());
        candidate
    }
}

/// What the materializer created for one sheet
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedTable {
    pub sheet: String,
    pub table: String,
    pub columns: Vec<String>,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializedSchema {
    pub tables: Vec<MaterializedTable>,
}

impl MaterializedSchema {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// Create and fill one table per sheet.
///
/// Each sheet is inserted inside its own transaction. A row whose width does
/// not match the header fails the whole preview and leaves that sheet's table
/// empty; sheets materialized before it are left in place for the store
/// teardown to discard.
pub fn materialize(
    conn: &mut Connection,
    sheets: &[Sheet],
    cancel: &CancellationToken,
) -> Result<MaterializedSchema, PreviewError> {
    let mut tables = PhysicalNamer::new("t");
    let mut columns = PhysicalNamer::new("c");
    let mut schema = MaterializedSchema::default();

    for sheet in sheets {
        checkpoint(cancel, "materialize")?;

        let table = tables.assign(sheet.name());
        let physical_columns: Vec<String> = sheet
            .columns()
            .iter()
            .map(|c| columns.assign(&c.name))
            .collect();

        create_table(conn, sheet, &table, &physical_columns)?;
        let rows = insert_rows(conn, sheet, &table, &physical_columns, cancel)?;

        let sheet_name = sheet.name();
        let table_name = table.clone();
        debug!(
            "Materialized sheet {sheet_name} as {table} with {rows} rows",
            sheet_name: sheet_name,
            table: table_name,
            rows: rows
        );
        schema.tables.push(MaterializedTable {
            sheet: sheet.name().to_string(),
            table,
            columns: physical_columns,
            rows,
        });
    }

    Ok(schema)
}

fn create_table(
    conn: &Connection,
    sheet: &Sheet,
    table: &str,
    physical_columns: &[String],
) -> Result<(), SchemaError> {
    let quoted_table = quote_identifier(table);
    let definitions: Vec<String> = physical_columns
        .iter()
        .map(|c| format!("{} VARCHAR", quote_identifier(c)))
        .collect();

    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS {quoted_table} ({});\n",
        definitions.join(", ")
    );
    ddl.push_str(&format!(
        "COMMENT ON TABLE {quoted_table} IS {};\n",
        quote_literal(sheet.name())
    ));
    for (column, physical) in sheet.columns().iter().zip(physical_columns) {
        ddl.push_str(&format!(
            "COMMENT ON COLUMN {quoted_table}.{} IS {};\n",
            quote_identifier(physical),
            quote_literal(&column.name)
        ));
    }

    conn.execute_batch(&ddl).map_err(store_error)
}

fn insert_rows(
    conn: &mut Connection,
    sheet: &Sheet,
    table: &str,
    physical_columns: &[String],
    cancel: &CancellationToken,
) -> Result<usize, PreviewError> {
    let expected = physical_columns.len();
    let column_list: Vec<String> = physical_columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect();
    let placeholders = vec!["?"; expected].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_identifier(table),
        column_list.join(", ")
    );

    let tx = conn.transaction().map_err(store_error)?;
    {
        let mut stmt = tx.prepare(&sql).map_err(store_error)?;
        for index in 0..sheet.row_count() {
            let actual = sheet.row_width(index);
            if actual != expected {
                // Data row `index` sits below the header, in 1-based sheet rows
                return Err(SchemaError::ColumnValueMismatch {
                    table: sheet.name().to_string(),
                    row: index + 2,
                    expected,
                    actual,
                }
                .into());
            }
            if index % CANCEL_CHECK_ROWS == 0 {
                checkpoint(cancel, "materialize")?;
            }

            let values = sheet.row(index).unwrap_or_default();
            stmt.execute(params_from_iter(
                values.iter().map(|value| value.to_storage_text()),
            ))
            .map_err(store_error)?;
        }
    }
    tx.commit().map_err(store_error)?;

    Ok(sheet.row_count())
}

fn store_error(e: duckdb::Error) -> SchemaError {
    SchemaError::Store(e.to_string())
}
