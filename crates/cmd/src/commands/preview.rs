// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow};
use diagnostics::*;
use sheetql::PreviewRequest;

use crate::common::Session;
use crate::output::{OutputFormat, render};

/// Run a preview query and hand the rendered result to `output`.
///
/// With `repeat > 1` the same request is issued again, so the later runs
/// show the cache at work. Only the last result is rendered.
pub async fn preview_command<F>(
    session: &Session,
    query: &str,
    format: OutputFormat,
    repeat: usize,
    mut output: F,
) -> Result<()>
where
    F: FnMut(String),
{
    let request = PreviewRequest::new(session.owner.clone(), session.dataset, query);
    let runs = repeat.max(1);

    let mut last = None;
    for run in 1..=runs {
        match session.engine.preview(&request).await {
            Ok(rows) => {
                debug!("Run {run} of {runs} done", run: run, runs: runs);
                last = Some(rows);
            }
            Err(e) => {
                if format == OutputFormat::Json {
                    let report = serde_json::to_string(&e.report())
                        .map_err(|e| anyhow!("Failed to serialize error: {}", e))?;
                    output(report);
                }
                return Err(anyhow!("{}: {}", e.code(), e));
            }
        }
    }

    if let Some(rows) = last {
        output(render(&rows, format)?);
    }
    Ok(())
}
