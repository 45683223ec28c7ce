// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Dataset ingestion
//!
//! Turns a [`TabularSource`] into column-oriented [`Sheet`]s. The first row
//! of every sheet is the header row; everything below it is data. Values are
//! captured as-is, no coercion happens here.

use calamine::{Data, Range, Reader};
use diagnostics::*;
use std::collections::HashSet;
use std::path::Path;

use crate::dataset::TabularSource;
use crate::error::IngestError;
use crate::value::{Row, Value};

/// A sheet as it comes out of the source: header row first, then data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Row>,
}

impl RawSheet {
    pub fn new<S: Into<String>>(name: S, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// An ingested sheet, stored column by column.
///
/// Every column holds exactly `row_count()` values. The width each data row
/// had in the source is kept separately so that short or long rows are
/// reported by the materializer instead of being silently padded.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    columns: Vec<Column>,
    row_widths: Vec<usize>,
}

impl Sheet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.row_widths.len()
    }

    /// Number of cells data row `index` carried in the source
    pub fn row_width(&self, index: usize) -> usize {
        self.row_widths.get(index).copied().unwrap_or(0)
    }

    /// Values of data row `index`, in column order
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.row_count() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[index]).collect())
    }
}

/// Ingest every sheet of a dataset source
pub fn ingest(source: &TabularSource) -> Result<Vec<Sheet>, IngestError> {
    let sheets = match source {
        TabularSource::Workbook(path) => read_workbook(path)?,
        TabularSource::Csv(path) => vec![read_csv(path)?],
        TabularSource::Inline(raw) => raw
            .iter()
            .map(|sheet| build_sheet(&sheet.name, sheet.rows.iter()))
            .collect::<Result<Vec<_>, _>>()?,
    };

    if sheets.is_empty() {
        return Err(IngestError::NoSheets);
    }

    let sheet_count = sheets.len();
    let source_name = source.describe();
    debug!(
        "Ingested {sheet_count} sheets from {source_name}",
        sheet_count: sheet_count,
        source_name: source_name
    );
    Ok(sheets)
}

/// Build a sheet from its rows. The first row is the header.
pub fn build_sheet<I, R>(name: &str, rows: I) -> Result<Sheet, IngestError>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[Value]>,
{
    let mut rows = rows.into_iter();
    let header = match rows.next() {
        Some(header) => header,
        None => {
            return Err(IngestError::EmptyHeader {
                sheet: name.to_string(),
            });
        }
    };
    let names = header_names(name, header.as_ref())?;

    let mut columns: Vec<Column> = names
        .into_iter()
        .map(|name| Column {
            name,
            values: Vec::new(),
        })
        .collect();
    let mut row_widths = Vec::new();

    for row in rows {
        let cells = row.as_ref();
        for (index, column) in columns.iter_mut().enumerate() {
            column
                .values
                .push(cells.get(index).cloned().unwrap_or(Value::Null));
        }
        row_widths.push(cells.len());
    }

    let row_count = row_widths.len();
    let column_count = columns.len();
    debug!(
        "Sheet {name}: {column_count} columns, {row_count} data rows",
        name: name,
        column_count: column_count,
        row_count: row_count
    );

    Ok(Sheet {
        name: name.to_string(),
        columns,
        row_widths,
    })
}

fn header_names(sheet: &str, header: &[Value]) -> Result<Vec<String>, IngestError> {
    let text: Vec<Option<String>> = header.iter().map(header_text).collect();
    if text.iter().all(Option::is_none) {
        return Err(IngestError::EmptyHeader {
            sheet: sheet.to_string(),
        });
    }

    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(text.len());
    for (index, name) in text.into_iter().enumerate() {
        let name = name.ok_or_else(|| IngestError::InvalidColumnName {
            sheet: sheet.to_string(),
            row: 1,
            column: index + 1,
        })?;
        if !seen.insert(name.clone()) {
            return Err(IngestError::DuplicateColumnName {
                sheet: sheet.to_string(),
                name,
            });
        }
        names.push(name);
    }
    Ok(names)
}

/// Trimmed header text, `None` for a null or blank cell
fn header_text(cell: &Value) -> Option<String> {
    let text = match cell {
        Value::Null => return None,
        Value::Text(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if text.is_empty() { None } else { Some(text) }
}

fn read_workbook(path: &Path) -> Result<Vec<Sheet>, IngestError> {
    let mut workbook =
        calamine::open_workbook_auto(path).map_err(|e| IngestError::unreadable(path, e))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| IngestError::unreadable(path, e))?;
        sheets.push(sheet_from_range(&name, &range)?);
    }
    Ok(sheets)
}

/// Calamine trims empty leading rows and columns from a range, so a range
/// that does not start on the first row means the header row is empty.
fn sheet_from_range(name: &str, range: &Range<Data>) -> Result<Sheet, IngestError> {
    let (first_row, first_col) = match range.start() {
        Some((0, col)) => (0, col),
        _ => {
            return Err(IngestError::EmptyHeader {
                sheet: name.to_string(),
            });
        }
    };
    debug!(
        "Sheet {name} range starts at row {first_row}, column {first_col}",
        name: name,
        first_row: first_row,
        first_col: first_col
    );

    let leading = first_col as usize;
    build_sheet(
        name,
        range.rows().map(|cells| {
            let mut row = vec![Value::Null; leading];
            row.extend(cells.iter().map(Value::from));
            row
        }),
    )
}

/// Read a delimited file as a single sheet of text cells. Empty fields are
/// null. Records keep the width they have in the file, so a ragged file is
/// rejected by the materializer rather than here.
fn read_csv(path: &Path) -> Result<Sheet, IngestError> {
    let delimiter = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| IngestError::unreadable(path, e))?;

    let mut rows: Vec<Row> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::unreadable(path, e))?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Sheet1")
        .to_string();
    build_sheet(&name, rows.iter())
}
