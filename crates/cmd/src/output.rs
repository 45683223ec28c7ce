// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Rendering of preview results for the terminal

use std::sync::Arc;

use anyhow::{Result, anyhow};
use arrow::util::pretty::pretty_format_batches;
use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_csv::WriterBuilder;
use arrow_schema::{DataType, Field, Schema};
use clap::ValueEnum;
use sheetql::{RowSet, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table
    #[default]
    Table,
    /// Comma-separated values with a header line
    Csv,
    /// JSON array of row arrays
    Json,
}

/// Narrowest Arrow type that holds every non-null value of a column
fn column_type(rows: &RowSet, index: usize) -> DataType {
    let mut data_type = DataType::Null;
    for value in rows.rows.iter().filter_map(|row| row.get(index)) {
        data_type = match (value, &data_type) {
            (Value::Null, _) => continue,
            (Value::Text(_), _) | (_, DataType::Utf8) => DataType::Utf8,
            (Value::Integer(_), DataType::Null | DataType::Int64) => DataType::Int64,
            (Value::Integer(_) | Value::Real(_), _) => DataType::Float64,
        };
    }
    if data_type == DataType::Null {
        DataType::Utf8
    } else {
        data_type
    }
}

fn column_array(rows: &RowSet, index: usize, data_type: &DataType) -> ArrayRef {
    let cells = rows.rows.iter().map(|row| row.get(index).unwrap_or(&Value::Null));
    match data_type {
        DataType::Int64 => Arc::new(Int64Array::from_iter(cells.map(|v| match v {
            Value::Integer(i) => Some(*i),
            _ => None,
        }))),
        DataType::Float64 => Arc::new(Float64Array::from_iter(cells.map(|v| match v {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }))),
        _ => Arc::new(StringArray::from_iter(cells.map(|v| match v {
            Value::Null => None,
            other => Some(other.to_string()),
        }))),
    }
}

/// Convert a row set to a single Arrow batch
pub fn to_record_batch(rows: &RowSet) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(rows.columns.len());
    let mut arrays = Vec::with_capacity(rows.columns.len());
    for (index, name) in rows.columns.iter().enumerate() {
        let data_type = column_type(rows, index);
        arrays.push(column_array(rows, index, &data_type));
        fields.push(Field::new(name, data_type, true));
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|e| anyhow!("Failed to build result batch: {}", e))
}

/// Render a row set in the requested format
pub fn render(rows: &RowSet, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string(&rows.rows)
            .map_err(|e| anyhow!("Failed to serialize rows: {}", e)),
        OutputFormat::Table => {
            if rows.columns.is_empty() {
                return Ok("No results found.".to_string());
            }
            let batch = to_record_batch(rows)?;
            let table = pretty_format_batches(&[batch])
                .map_err(|e| anyhow!("Failed to format results as table: {}", e))?;
            Ok(table.to_string())
        }
        OutputFormat::Csv => {
            let batch = to_record_batch(rows)?;
            let mut buffer = Vec::new();
            {
                let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
                writer
                    .write(&batch)
                    .map_err(|e| anyhow!("Failed to write CSV: {}", e))?;
            }
            let text = String::from_utf8(buffer)
                .map_err(|e| anyhow!("CSV output is not UTF-8: {}", e))?;
            Ok(text.trim_end().to_string())
        }
    }
}
