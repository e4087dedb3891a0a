//! Phase runner: walks the execution plan for one run.
//!
//! Every Work Executor call runs on its own tokio task so that a panic inside
//! an executor is caught at the join and turned into a structural failure
//! instead of unwinding through the orchestrator.

use anyhow::{Result, anyhow};
use futures::future::join_all;
use merge_common::{Direction, RepositoryOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::state::RunCell;
use crate::events::{EventBus, RunEvent};
use crate::executor::WorkExecutor;
use crate::plan::{ExecutionPlan, Phase};

/// How the plan walk ended when no structural fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkEnd {
    /// Every phase (or, from `run_phase`, the one phase) ran.
    Finished,
    /// The run was sealed before the next phase could start.
    Stopped,
}

pub(crate) struct PhaseRunner {
    cell: Arc<RunCell>,
    plan: Arc<ExecutionPlan>,
    executor: Arc<dyn WorkExecutor>,
    events: Arc<EventBus>,
    run_id: String,
    direction: Direction,
}

impl PhaseRunner {
    pub(crate) fn new(
        cell: Arc<RunCell>,
        plan: Arc<ExecutionPlan>,
        executor: Arc<dyn WorkExecutor>,
        events: Arc<EventBus>,
    ) -> Self {
        let (run_id, direction) = cell.update(|run| (run.id.clone(), run.direction));
        Self {
            cell,
            plan,
            executor,
            events,
            run_id,
            direction,
        }
    }

    /// Walk every phase in order.
    ///
    /// Returns `Err` only for structural faults: an executor that returned an
    /// error or panicked. Per-repository merge failures are data.
    pub(crate) async fn walk(&self) -> Result<WalkEnd> {
        for phase in self.plan.phases() {
            if self.run_phase(phase).await? == WalkEnd::Stopped {
                return Ok(WalkEnd::Stopped);
            }
        }

        if self.cell.is_running() {
            Ok(WalkEnd::Finished)
        } else {
            Ok(WalkEnd::Stopped)
        }
    }

    /// Run one phase to completion, or return `Stopped` without launching
    /// anything if the run was sealed before the phase could start.
    async fn run_phase(&self, phase: &Phase) -> Result<WalkEnd> {
        // Cancellation is honoured here only; a phase in flight drains.
        let started = self.cell.publish(
            &self.events,
            &RunEvent::PhaseStarted {
                run_id: self.run_id.clone(),
                phase: phase.number,
                repositories: phase.repositories.clone(),
                parallel: phase.is_parallel(),
            },
        );
        if !started {
            tracing::info!(
                run_id = %self.run_id,
                next_phase = phase.number,
                "run stopped, skipping remaining phases"
            );
            return Ok(WalkEnd::Stopped);
        }

        tracing::debug!(
            run_id = %self.run_id,
            phase = phase.number,
            concurrency = %phase.concurrency,
            "scheduling phase"
        );
        self.cell.update(|run| run.current_phase = phase.number);

        let outcomes = if phase.is_parallel() {
            self.run_parallel(phase).await?
        } else {
            self.run_serial(phase).await?
        };

        self.cell.publish(
            &self.events,
            &RunEvent::PhaseCompleted {
                run_id: self.run_id.clone(),
                phase: phase.number,
                outcomes,
            },
        );
        Ok(WalkEnd::Finished)
    }

    /// One repository at a time, in listed order. A failed outcome does not
    /// stop the phase; a structural fault does.
    async fn run_serial(&self, phase: &Phase) -> Result<Vec<RepositoryOutcome>> {
        let mut outcomes = Vec::with_capacity(phase.repositories.len());
        for repository in &phase.repositories {
            let handle = self.spawn_repository(repository);
            outcomes.push(settle(repository, handle.await)?);
        }
        Ok(outcomes)
    }

    /// Launch every repository at once and wait for all of them, even when
    /// some fail or fault. Outcomes come back in listed order.
    async fn run_parallel(&self, phase: &Phase) -> Result<Vec<RepositoryOutcome>> {
        let handles: Vec<JoinHandle<Result<RepositoryOutcome>>> = phase
            .repositories
            .iter()
            .map(|repository| self.spawn_repository(repository))
            .collect();

        let joined = join_all(handles).await;

        let mut outcomes = Vec::with_capacity(joined.len());
        let mut fault = None;
        for (repository, result) in phase.repositories.iter().zip(joined) {
            match settle(repository, result) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    if fault.is_none() {
                        fault = Some(e);
                    }
                }
            }
        }

        match fault {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    fn spawn_repository(&self, repository: &str) -> JoinHandle<Result<RepositoryOutcome>> {
        let cell = Arc::clone(&self.cell);
        let executor = Arc::clone(&self.executor);
        let events = Arc::clone(&self.events);
        let run_id = self.run_id.clone();
        let direction = self.direction;
        let repository = repository.to_string();

        tokio::spawn(async move {
            cell.publish(
                &events,
                &RunEvent::RepositoryStarted {
                    run_id: run_id.clone(),
                    repository: repository.clone(),
                    direction,
                },
            );

            let outcome = executor.perform_merge(&repository, direction).await?;

            if !outcome.is_success() {
                tracing::warn!(
                    %run_id,
                    %repository,
                    error = outcome.error.as_deref().unwrap_or("unknown error"),
                    "repository merge failed"
                );
            }
            cell.update(|run| run.outcomes.push(outcome.clone()));
            cell.publish(&events, &RunEvent::repository_settled(&run_id, outcome.clone()));
            Ok(outcome)
        })
    }
}

/// Flatten a joined executor task into an outcome or a structural fault.
fn settle(
    repository: &str,
    joined: std::result::Result<Result<RepositoryOutcome>, tokio::task::JoinError>,
) -> Result<RepositoryOutcome> {
    match joined {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(e.context(format!("Work executor failed for {}", repository))),
        Err(join_err) if join_err.is_panic() => {
            Err(anyhow!("Work executor panicked for {}", repository))
        }
        Err(join_err) => Err(anyhow!(
            "Work executor task for {} did not complete: {}",
            repository,
            join_err
        )),
    }
}
