//! Configuration checks: `weekly-merge validate`.

use anyhow::Result;

use super::super::Cli;

pub fn cmd_validate(cli: &Cli) -> Result<()> {
    let config = super::load_config(cli)?;
    let report = config.validate();

    println!();
    if config.file_exists() {
        println!("Validating {}", config.path.display());
    } else {
        println!(
            "No config file at {}; checking defaults and environment",
            config.path.display()
        );
    }
    println!();

    for error in &report.errors {
        println!("  {} {}", console::style("error:").red().bold(), error);
    }
    for warning in &report.warnings {
        println!("  {} {}", console::style("warning:").yellow(), warning);
    }

    if !report.is_valid() {
        anyhow::bail!(
            "Configuration has {} error(s)",
            report.errors.len()
        );
    }

    println!("{}", console::style("Configuration is valid.").green());
    Ok(())
}
