//! The `aqs costs` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use aqs_core::report::RunSummary;
use aqs_report::{cost_rows, write_cost_csv};

pub fn execute(summary_path: PathBuf, format: String) -> Result<()> {
    let summary = RunSummary::load_json(&summary_path)?;

    match format.as_str() {
        "csv" => write_cost_csv(&summary, std::io::stdout().lock())?,
        "table" => {
            let mut table = Table::new();
            table.set_header(vec![
                "Course",
                "Backend",
                "Tasks",
                "Input tokens",
                "Output tokens",
                "Reasoning tokens",
                "Input cost",
                "Output cost",
                "Total cost",
            ]);
            for row in cost_rows(&summary) {
                table.add_row(vec![
                    Cell::new(&row.course_id),
                    Cell::new(&row.backend),
                    Cell::new(row.tasks),
                    Cell::new(row.input_tokens),
                    Cell::new(row.output_tokens),
                    Cell::new(row.reasoning_tokens),
                    Cell::new(format!("${:.6}", row.input_cost_usd)),
                    Cell::new(format!("${:.6}", row.output_cost_usd)),
                    Cell::new(format!("${:.6}", row.total_cost_usd)),
                ]);
            }
            println!("{table}");
        }
        other => anyhow::bail!("unknown format '{other}' (expected table or csv)"),
    }
    Ok(())
}
