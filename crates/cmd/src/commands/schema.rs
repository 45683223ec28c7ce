// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow};
use sheetql::{RowSet, TableMapping, Value};

use crate::common::Session;
use crate::output::{OutputFormat, render};

/// One row per column: sheet, table, header, physical column
fn layout_rows(layout: &[TableMapping]) -> RowSet {
    let rows = layout
        .iter()
        .flat_map(|table| {
            table.columns.iter().map(move |column| {
                vec![
                    Value::Text(table.logical.clone()),
                    Value::Text(table.physical.clone()),
                    Value::Text(column.logical.clone()),
                    Value::Text(column.physical.clone()),
                ]
            })
        })
        .collect();
    RowSet {
        columns: ["sheet", "table", "column", "physical_column"]
            .map(String::from)
            .to_vec(),
        rows,
    }
}

/// Show how every sheet and header of the dataset is named inside the store
pub async fn schema_command<F>(session: &Session, format: OutputFormat, mut output: F) -> Result<()>
where
    F: FnMut(String),
{
    let layout = session
        .engine
        .describe(&session.owner, &session.dataset)
        .await
        .map_err(|e| anyhow!("{}: {}", e.code(), e))?;

    match format {
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(&layout)
                .map_err(|e| anyhow!("Failed to serialize schema: {}", e))?;
            output(text);
            return Ok(());
        }
        OutputFormat::Csv => {
            output(render(&layout_rows(&layout), OutputFormat::Csv)?);
            return Ok(());
        }
        OutputFormat::Table => {}
    }

    for table in &layout {
        output(format!("[{}] -> \"{}\"", table.logical, table.physical));
        for column in &table.columns {
            output(format!("  {} -> \"{}\"", column.logical, column.physical));
        }
    }
    Ok(())
}
