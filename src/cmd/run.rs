//! Merge run rehearsal: `weekly-merge run <direction>`.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use weekly_merge::events::TracingObserver;
use weekly_merge::executor::DryRunExecutor;
use weekly_merge::logging::{LogOptions, init_logging};
use weekly_merge::{Direction, Orchestrator, RunSnapshot, RunStatus};

use super::super::Cli;

pub struct RunOptions {
    pub direction: String,
    pub delay: Duration,
    pub fail: Vec<String>,
    pub json: bool,
}

pub async fn cmd_run(cli: &Cli, options: RunOptions) -> Result<()> {
    let config = super::load_config(cli)?;
    let _log_guard = init_logging(&LogOptions {
        level: config.log_level(),
        json: config.log_json(),
        directory: config.log_dir(),
    })?;

    let direction: Direction = options.direction.parse()?;
    let plan = config.execution_plan()?;

    let report = config.validate();
    for issue in report.errors.iter().chain(&report.warnings) {
        tracing::warn!("config: {}", issue);
    }

    let executor =
        Arc::new(DryRunExecutor::new(options.delay).with_failures(options.fail.iter().cloned()));
    let orchestrator = Arc::new(
        Orchestrator::new(plan, executor)
            .with_history_capacity(config.history_capacity())
            .with_observer(Arc::new(TracingObserver)),
    );

    if !options.json {
        println!();
        println!("{}", console::style("Weekly Merge (dry run)").bold().cyan());
        println!("─────────────────────────");
        println!(
            "Direction: {} → {}",
            direction.base_branch(),
            direction.target_branch()
        );
        println!(
            "Organization: {}",
            config.toml.org().unwrap_or("(not set)")
        );
        println!("Phases: {}", orchestrator.plan().len());
        println!();
    }

    // Ctrl-C asks the engine to stop after the phase in flight.
    let stopper = Arc::clone(&orchestrator);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && stopper.stop() {
            eprintln!(
                "{}",
                console::style("Stop requested; finishing the current phase.").yellow()
            );
        }
    });

    let result = orchestrator.start(direction).await;
    interrupt.abort();

    let run = match result {
        Ok(run) => run,
        Err(e) => {
            if let Some(run) = e.failed_run() {
                report_run(run, options.json)?;
            }
            return Err(e.into());
        }
    };

    report_run(&run, options.json)?;

    if run.status == RunStatus::Completed && run.failed_count() > 0 {
        anyhow::bail!("{} repository merge(s) failed", run.failed_count());
    }
    Ok(())
}

fn report_run(run: &RunSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
        return Ok(());
    }

    let status = match run.status {
        RunStatus::Completed => console::style(run.status.as_str()).green().bold(),
        RunStatus::Cancelled => console::style(run.status.as_str()).yellow().bold(),
        _ => console::style(run.status.as_str()).red().bold(),
    };
    println!(
        "Run {} {} in {}s",
        run.id,
        status,
        run.duration_seconds.unwrap_or(0)
    );

    for outcome in &run.outcomes {
        if outcome.is_success() {
            let branch = outcome
                .artifacts
                .as_ref()
                .and_then(|a| a.hotfix_branch.as_deref())
                .unwrap_or("-");
            println!(
                "  {} {} {}",
                console::style("✓").green(),
                outcome.repository,
                console::style(branch).dim()
            );
        } else {
            println!(
                "  {} {} {}",
                console::style("✗").red(),
                outcome.repository,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    if let Some(error) = &run.error {
        println!("  {} {}", console::style("Error:").red().bold(), error);
    }
    println!();
    println!(
        "Completed: {}  Failed: {}",
        run.completed_count(),
        run.failed_count()
    );
    Ok(())
}
