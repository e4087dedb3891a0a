//! Config scaffolding: `weekly-merge init`.

use anyhow::Result;
use std::path::PathBuf;
use weekly_merge::config::{CONFIG_FILE, write_template};

use super::super::Cli;

pub fn cmd_init(cli: &Cli, force: bool) -> Result<()> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    write_template(&path, force)?;

    println!(
        "{} {}",
        console::style("Created").green().bold(),
        path.display()
    );
    println!("Set github.org (or GITHUB_ORG) before running a merge.");
    Ok(())
}
