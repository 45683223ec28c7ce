// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Identifier resolution
//!
//! Reads the materialized schema back out of the store catalog and builds
//! the logical to physical mapping the rewriter and executor use.

use diagnostics::*;
use duckdb::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::SchemaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub logical: String,
    pub physical: String,
}

/// One sheet and its columns, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMapping {
    pub logical: String,
    pub physical: String,
    pub columns: Vec<ColumnMapping>,
}

/// Bidirectional logical/physical name mapping for one request
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    tables: BiMap,
    columns: BiMap,
    layout: Vec<TableMapping>,
}

#[derive(Debug, Clone, Default)]
struct BiMap {
    forward: BTreeMap<String, String>,
    reverse: HashMap<String, String>,
}

impl BiMap {
    fn insert(&mut self, logical: &str, physical: &str) -> Result<(), SchemaError> {
        if let Some(existing) = self.forward.get(logical) {
            if existing != physical {
                return Err(SchemaError::AmbiguousIdentifier {
                    name: logical.to_string(),
                    first: existing.clone(),
                    second: physical.to_string(),
                });
            }
        }
        if let Some(existing) = self.reverse.get(physical) {
            if existing != logical {
                return Err(SchemaError::AmbiguousIdentifier {
                    name: physical.to_string(),
                    first: existing.clone(),
                    second: logical.to_string(),
                });
            }
        }
        self.forward.insert(logical.to_string(), physical.to_string());
        self.reverse.insert(physical.to_string(), logical.to_string());
        Ok(())
    }
}

impl IdentifierMap {
    /// Inspect the store catalog. Tables and columns without a logical name
    /// recorded on them are not part of the mapping.
    pub fn resolve(conn: &Connection) -> Result<Self, SchemaError> {
        let mut map = IdentifierMap::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        let mut stmt = conn
            .prepare(
                "SELECT table_name, comment FROM duckdb_tables() \
                 WHERE schema_name = 'main' AND comment IS NOT NULL AND comment <> '' \
                 ORDER BY table_oid",
            )
            .map_err(store_error)?;
        let tables = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(store_error)?;
        for table in tables {
            let (physical, logical) = table.map_err(store_error)?;
            map.tables.insert(&logical, &physical)?;
            positions.insert(physical.clone(), map.layout.len());
            map.layout.push(TableMapping {
                logical,
                physical,
                columns: Vec::new(),
            });
        }

        let mut stmt = conn
            .prepare(
                "SELECT table_name, column_name, comment FROM duckdb_columns() \
                 WHERE schema_name = 'main' AND comment IS NOT NULL AND comment <> '' \
                 ORDER BY table_name, column_index",
            )
            .map_err(store_error)?;
        let columns = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(store_error)?;
        for column in columns {
            let (table, physical, logical) = column.map_err(store_error)?;
            let Some(&position) = positions.get(&table) else {
                continue;
            };
            map.columns.insert(&logical, &physical)?;
            map.layout[position]
                .columns
                .push(ColumnMapping { logical, physical });
        }

        let table_count = map.layout.len();
        let column_count = map.columns.forward.len();
        debug!("Resolved {table_count} tables and {column_count} distinct columns", table_count: table_count, column_count: column_count);
        Ok(map)
    }

    /// Physical table for a logical sheet name
    pub fn table(&self, logical: &str) -> Option<&str> {
        self.tables.forward.get(logical).map(String::as_str)
    }

    /// Physical column for a logical header
    pub fn column(&self, logical: &str) -> Option<&str> {
        self.columns.forward.get(logical).map(String::as_str)
    }

    pub fn logical_table(&self, physical: &str) -> Option<&str> {
        self.tables.reverse.get(physical).map(String::as_str)
    }

    pub fn logical_column(&self, physical: &str) -> Option<&str> {
        self.columns.reverse.get(physical).map(String::as_str)
    }

    /// Every logical column name
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.forward.keys().map(String::as_str)
    }

    pub fn layout(&self) -> &[TableMapping] {
        &self.layout
    }

    pub fn into_layout(self) -> Vec<TableMapping> {
        self.layout
    }
}

fn store_error(e: duckdb::Error) -> SchemaError {
    SchemaError::Store(e.to_string())
}
