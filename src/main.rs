use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "weekly-merge")]
#[command(version, about = "Weekly multi-repository merge orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (defaults to ./merge.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a merge.toml template
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the execution plan
    Plan,
    /// Check the configuration for errors and warnings
    Validate,
    /// Rehearse a merge run with the dry-run executor
    Run {
        /// Merge direction: master-to-release or release-to-develop
        direction: String,

        /// Simulated time per repository, in milliseconds
        #[arg(long, default_value = "250")]
        delay_ms: u64,

        /// Repositories to report as failed (comma-separated)
        #[arg(long, value_delimiter = ',')]
        fail: Vec<String>,

        /// Print the final run record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&cli, *force)?,
        Commands::Plan => cmd::cmd_plan(&cli)?,
        Commands::Validate => cmd::cmd_validate(&cli)?,
        Commands::Run {
            direction,
            delay_ms,
            fail,
            json,
        } => {
            let options = cmd::RunOptions {
                direction: direction.clone(),
                delay: std::time::Duration::from_millis(*delay_ms),
                fail: fail.clone(),
                json: *json,
            };
            cmd::cmd_run(&cli, options).await?;
        }
    }

    Ok(())
}
