//! The process orchestration engine.
//!
//! Owns at most one active run and a bounded history of terminated runs.
//! State machine per run:
//!
//! ```text
//!  (idle) ──start──> running ──all phases──> completed ─┐
//!                       │ ──structural fault──> failed ─┼──> (idle)
//!                       └──stop──────────────> cancelled┘
//! ```
//!
//! A stop request is cooperative: the phase in flight is allowed to settle
//! and no later phase is scheduled.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use merge_common::{Direction, RunSnapshot, RunStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use super::runner::{PhaseRunner, WalkEnd};
use super::state::RunCell;
use crate::errors::OrchestratorError;
use crate::events::{EventBus, RunEvent, RunObserver};
use crate::executor::WorkExecutor;
use crate::history::{DEFAULT_HISTORY_CAPACITY, DEFAULT_HISTORY_LIMIT, RunHistory};
use crate::plan::ExecutionPlan;

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestratorStatus {
    Idle,
    Active(RunSnapshot),
}

impl OrchestratorStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn run(&self) -> Option<&RunSnapshot> {
        match self {
            Self::Idle => None,
            Self::Active(run) => Some(run),
        }
    }
}

struct EngineState {
    active: Option<Arc<RunCell>>,
    history: RunHistory,
    /// Start instant of the previous run; keeps run ids strictly increasing.
    last_started_at: Option<DateTime<Utc>>,
}

/// Everything a run task needs, shared between the handle and its tasks.
struct Engine {
    plan: Arc<ExecutionPlan>,
    executor: Arc<dyn WorkExecutor>,
    events: Arc<EventBus>,
    state: Mutex<EngineState>,
}

/// Drives weekly merge runs through the execution plan.
///
/// Construct once per process and share it behind an `Arc`. Each run is
/// driven on a task the orchestrator owns: dropping the future returned by
/// `start` does not abandon the run, it keeps going to its terminal state.
pub struct Orchestrator {
    inner: Arc<Engine>,
}

impl Orchestrator {
    pub fn new(plan: ExecutionPlan, executor: Arc<dyn WorkExecutor>) -> Self {
        Self {
            inner: Arc::new(Engine {
                plan: Arc::new(plan),
                executor,
                events: Arc::new(EventBus::new()),
                state: Mutex::new(EngineState {
                    active: None,
                    history: RunHistory::new(DEFAULT_HISTORY_CAPACITY),
                    last_started_at: None,
                }),
            }),
        }
    }

    /// Replace the history buffer with one of the given capacity.
    pub fn with_history_capacity(self, capacity: usize) -> Self {
        self.inner.lock_state().history = RunHistory::new(capacity);
        self
    }

    /// Register an observer at construction time.
    pub fn with_observer(self, observer: Arc<dyn RunObserver>) -> Self {
        self.inner.events.subscribe(observer);
        self
    }

    pub fn subscribe(&self, observer: Arc<dyn RunObserver>) {
        self.inner.events.subscribe(observer);
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.inner.plan
    }

    /// Parse a direction name and start a run with it.
    ///
    /// An unknown name is rejected before any run exists: no event is
    /// published and nothing is archived.
    pub async fn start_named(&self, direction: &str) -> Result<RunSnapshot, OrchestratorError> {
        let direction: Direction = direction.parse()?;
        self.start(direction).await
    }

    /// Run the whole plan for `direction`.
    ///
    /// Returns the terminal snapshot when the run completes or is stopped
    /// (a stopped run carries whatever the drained phase produced). Fails with
    /// `AlreadyRunning` without touching the active run, or with `RunFailed`
    /// after archiving a run that hit a structural fault.
    ///
    /// The run is admitted and handed to its own task on the first poll, so
    /// the returned future only waits for the result.
    pub async fn start(&self, direction: Direction) -> Result<RunSnapshot, OrchestratorError> {
        let cell = self.inner.admit(direction)?;
        let run_id = cell.id();
        tracing::info!(%run_id, %direction, phases = self.inner.plan.len(), "starting weekly merge");

        cell.publish(
            &self.inner.events,
            &RunEvent::RunStarted {
                run_id,
                direction,
                total_phases: self.inner.plan.len(),
            },
        );

        let engine = Arc::clone(&self.inner);
        let driven = Arc::clone(&cell);
        let driver = tokio::spawn(async move { engine.drive(driven).await });

        match driver.await {
            Ok(result) => result,
            Err(join_err) => self
                .inner
                .fail(&cell, format!("Run task did not complete: {}", join_err)),
        }
    }

    /// Request cancellation of the active run.
    ///
    /// Returns `false` when there is nothing to stop. Otherwise the run is
    /// marked cancelled, detached and archived immediately; its in-flight
    /// phase keeps running to completion but no further phase starts.
    ///
    /// Safe to call from inside a [`RunObserver`].
    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    pub fn current_status(&self) -> OrchestratorStatus {
        let active = self.inner.lock_state().active.clone();
        match active {
            Some(cell) => OrchestratorStatus::Active(cell.snapshot()),
            None => OrchestratorStatus::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().active.is_some()
    }

    /// Up to `limit` terminated runs, most recent first.
    pub fn history(&self, limit: usize) -> Vec<RunSnapshot> {
        self.inner.lock_state().history.recent(limit)
    }

    /// `history` with the default limit.
    pub fn recent_history(&self) -> Vec<RunSnapshot> {
        self.history(DEFAULT_HISTORY_LIMIT)
    }
}

impl Engine {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Occupancy guard: create and install a new run, or reject.
    fn admit(&self, direction: Direction) -> Result<Arc<RunCell>, OrchestratorError> {
        let mut state = self.lock_state();
        if let Some(active) = &state.active {
            return Err(OrchestratorError::AlreadyRunning {
                run_id: active.id(),
            });
        }

        let mut started_at = Utc::now();
        if let Some(last) = state.last_started_at
            && started_at.timestamp_millis() <= last.timestamp_millis()
        {
            started_at = last + ChronoDuration::milliseconds(1);
        }
        state.last_started_at = Some(started_at);

        let cell = Arc::new(RunCell::new(RunSnapshot::start(
            direction,
            self.plan.len(),
            started_at,
        )));
        state.active = Some(Arc::clone(&cell));
        Ok(cell)
    }

    /// Walk the plan and settle the run. Runs on the run's own task.
    async fn drive(&self, cell: Arc<RunCell>) -> Result<RunSnapshot, OrchestratorError> {
        let runner = PhaseRunner::new(
            Arc::clone(&cell),
            Arc::clone(&self.plan),
            Arc::clone(&self.executor),
            Arc::clone(&self.events),
        );

        match runner.walk().await {
            Ok(WalkEnd::Finished) => self.complete(&cell),
            Ok(WalkEnd::Stopped) => Ok(cell.snapshot()),
            Err(fault) => self.fail(&cell, format!("{:#}", fault)),
        }
    }

    /// Detach the run if it is still the active one and archive its snapshot.
    fn archive(&self, cell: &Arc<RunCell>, snapshot: &RunSnapshot) {
        let mut state = self.lock_state();
        if state
            .active
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, cell))
        {
            state.active = None;
        }
        state.history.record(snapshot.clone());
    }

    fn complete(&self, cell: &Arc<RunCell>) -> Result<RunSnapshot, OrchestratorError> {
        let Some(run) = cell.terminate(RunStatus::Completed, None, Utc::now()) else {
            // A stop request won the race after the final phase drained.
            return Ok(cell.snapshot());
        };

        self.archive(cell, &run);
        tracing::info!(
            run_id = %run.id,
            completed = run.completed_count(),
            failed = run.failed_count(),
            duration_seconds = run.duration_seconds.unwrap_or(0),
            "weekly merge completed"
        );
        cell.publish_terminal(
            &self.events,
            RunEvent::RunCompleted {
                run_id: run.id.clone(),
                direction: run.direction,
                outcomes: run.outcomes.clone(),
                duration_seconds: run.duration_seconds.unwrap_or(0),
            },
        );
        Ok(run)
    }

    fn fail(&self, cell: &Arc<RunCell>, error: String) -> Result<RunSnapshot, OrchestratorError> {
        let Some(run) = cell.terminate(RunStatus::Failed, Some(error.clone()), Utc::now()) else {
            tracing::error!(
                run_id = %cell.id(),
                %error,
                "structural fault while draining a stopped run"
            );
            return Ok(cell.snapshot());
        };

        self.archive(cell, &run);
        tracing::error!(run_id = %run.id, %error, "weekly merge failed");
        cell.publish_terminal(
            &self.events,
            RunEvent::RunFailed {
                run_id: run.id.clone(),
                direction: run.direction,
                error,
            },
        );
        Err(OrchestratorError::RunFailed { run: Box::new(run) })
    }

    fn stop(&self) -> bool {
        let Some(cell) = self.lock_state().active.take() else {
            return false;
        };

        let Some(run) = cell.terminate(RunStatus::Cancelled, None, Utc::now()) else {
            return false;
        };

        self.lock_state().history.record(run.clone());
        tracing::warn!(
            run_id = %run.id,
            phase = run.current_phase,
            "weekly merge stopped by request"
        );
        cell.publish_terminal(
            &self.events,
            RunEvent::RunCancelled {
                run_id: run.id.clone(),
                direction: run.direction,
                duration_seconds: run.duration_seconds.unwrap_or(0),
            },
        );
        true
    }
}
