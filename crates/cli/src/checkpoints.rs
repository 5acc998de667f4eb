//! `--show-checkpoints` table.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use vault2git_core::Database;

use crate::style;

/// Print every stored checkpoint with its commit map size.
pub fn print_table(db: &Database) -> Result<()> {
    let checkpoints = db
        .list_checkpoints()
        .context("failed to read checkpoints")?;

    if checkpoints.is_empty() {
        println!("{}", style::dim("No branch has been replicated yet."));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Branch", "Last version", "Recorded versions", "Updated"]);

    for entry in &checkpoints {
        let recorded = db
            .count_commit_map(&entry.branch)
            .context("failed to read commit map")?;
        table.add_row(vec![
            Cell::new(&entry.branch),
            Cell::new(entry.last_version),
            Cell::new(recorded),
            Cell::new(&entry.updated_at[..19.min(entry.updated_at.len())]),
        ]);
    }

    println!();
    println!("{}", style::header(&format!("Checkpoints ({})", checkpoints.len())));
    println!("{}", table);
    Ok(())
}
