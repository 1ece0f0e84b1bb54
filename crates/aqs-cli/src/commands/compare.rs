//! The `aqs compare` command.

use std::path::PathBuf;

use anyhow::Result;

use aqs_core::report::RunSummary;

pub fn execute(
    baseline_path: PathBuf,
    current_path: PathBuf,
    threshold: f64,
    fail_on_regression: bool,
    format: String,
) -> Result<()> {
    anyhow::ensure!(threshold >= 0.0, "threshold must not be negative");

    let baseline = RunSummary::load_json(&baseline_path)?;
    let current = RunSummary::load_json(&current_path)?;

    let report = current.compare(&baseline, threshold);

    match format.as_str() {
        "markdown" | "md" => println!("{}", report.to_markdown()),
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "text" => print!("{}", report.to_text()),
        other => anyhow::bail!("unknown format '{other}' (expected text, json or markdown)"),
    }

    if fail_on_regression && report.has_regressions() {
        std::process::exit(1);
    }

    Ok(())
}
