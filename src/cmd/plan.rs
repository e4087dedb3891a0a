//! Execution plan listing: `weekly-merge plan`.

use anyhow::Result;

use super::super::Cli;

pub fn cmd_plan(cli: &Cli) -> Result<()> {
    let config = super::load_config(cli)?;
    let plan = config.execution_plan()?;

    println!();
    println!("{}", console::style("Execution Plan").bold().cyan());
    println!("─────────────────────────");
    if config.file_exists() {
        println!("Source: {}", config.path.display());
    } else {
        println!("Source: built-in weekly plan");
    }
    println!();

    for phase in plan.phases() {
        println!(
            "Phase {} {}",
            phase.number,
            console::style(format!("({})", phase.concurrency)).dim()
        );
        for repository in &phase.repositories {
            println!("  - {}", repository);
        }
    }
    println!();
    println!(
        "{} phase(s), {} repositories",
        plan.len(),
        plan.repositories().count()
    );
    Ok(())
}
