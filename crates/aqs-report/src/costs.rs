//! Per-course, per-backend token and cost rows of a run.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use aqs_core::metrics::TokenMetrics;
use aqs_core::report::RunSummary;

/// Label of the grand-total row.
pub const TOTAL_ROW: &str = "TOTAL";

/// One spreadsheet row. Costs are USD.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostRow {
    pub course_id: String,
    pub backend: String,
    pub tasks: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

impl CostRow {
    fn new(course_id: &str, backend: &str, tasks: usize, tokens: &TokenMetrics) -> Self {
        let cost = tokens.cost();
        Self {
            course_id: course_id.to_string(),
            backend: backend.to_string(),
            tasks,
            input_tokens: tokens.input_tokens(),
            output_tokens: tokens.output_tokens(),
            reasoning_tokens: tokens.reasoning_tokens(),
            total_tokens: tokens.total_tokens(),
            input_cost_usd: cost.input,
            output_cost_usd: cost.output,
            total_cost_usd: cost.total,
        }
    }
}

/// Rows ordered by course then backend, followed by a grand total.
///
/// Every task record counts towards `tasks`. Reused tasks add no tokens.
pub fn cost_rows(summary: &RunSummary) -> Vec<CostRow> {
    let mut groups: BTreeMap<(&str, &str), (usize, TokenMetrics)> = BTreeMap::new();
    for record in &summary.tasks {
        let group = groups
            .entry((record.task.course_id.as_str(), record.task.backend.as_str()))
            .or_default();
        group.0 += 1;
        group.1 += record.tokens;
    }

    let mut total = TokenMetrics::default();
    let mut rows = Vec::with_capacity(groups.len() + 1);
    for ((course, backend), (tasks, tokens)) in &groups {
        total += *tokens;
        rows.push(CostRow::new(course, backend, *tasks, tokens));
    }
    rows.push(CostRow::new(TOTAL_ROW, "", summary.tasks.len(), &total));
    rows
}

/// Write the cost rows as CSV with a header line.
pub fn write_cost_csv<W: Write>(summary: &RunSummary, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for row in cost_rows(summary) {
        writer
            .serialize(&row)
            .with_context(|| format!("failed to write cost row for {}", row.course_id))?;
    }
    writer.flush().context("failed to flush cost csv")?;
    Ok(())
}

/// The CSV as a string.
pub fn render_cost_csv(summary: &RunSummary) -> Result<String> {
    let mut buf = Vec::new();
    write_cost_csv(summary, &mut buf)?;
    String::from_utf8(buf).context("cost csv is not utf-8")
}
