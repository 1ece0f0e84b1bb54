//! The `aqs list-backends` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use aqs_providers::{build_registry, load_config_from};

pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let registry = build_registry(&config)?;

    let mut table = Table::new();
    table.set_header(vec![
        "Backend",
        "Provider",
        "Model",
        "Context",
        "Input $/M",
        "Output $/M",
        "Default",
    ]);

    for d in registry.descriptors() {
        let is_default = config.default_backends.contains(&d.name);
        table.add_row(vec![
            Cell::new(&d.name),
            Cell::new(&d.provider),
            Cell::new(&d.model),
            Cell::new(format!("{}K", d.context_window / 1000)),
            Cell::new(format!("${:.2}", d.pricing.input_per_million)),
            Cell::new(format!("${:.2}", d.pricing.output_per_million)),
            Cell::new(if is_default { "yes" } else { "" }),
        ]);
    }

    println!("{table}");
    Ok(())
}
