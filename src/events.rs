//! Lifecycle events and observer fan-out.
//!
//! The orchestrator publishes a [`RunEvent`] at every lifecycle step. An
//! [`EventBus`] delivers each one synchronously to every registered
//! [`RunObserver`]. Observer faults, returned errors and panics alike, are
//! logged and never reach the orchestrator.

use anyhow::Result;
use merge_common::{Direction, RepositoryOutcome};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Events emitted while a merge run progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run was accepted and is about to walk the plan.
    RunStarted {
        run_id: String,
        direction: Direction,
        total_phases: usize,
    },
    /// Every phase finished. Individual outcomes may still be failures.
    RunCompleted {
        run_id: String,
        direction: Direction,
        outcomes: Vec<RepositoryOutcome>,
        duration_seconds: u64,
    },
    /// The run aborted on a structural fault.
    RunFailed {
        run_id: String,
        direction: Direction,
        error: String,
    },
    /// A stop request was accepted.
    RunCancelled {
        run_id: String,
        direction: Direction,
        duration_seconds: u64,
    },
    PhaseStarted {
        run_id: String,
        phase: usize,
        repositories: Vec<String>,
        parallel: bool,
    },
    PhaseCompleted {
        run_id: String,
        phase: usize,
        outcomes: Vec<RepositoryOutcome>,
    },
    RepositoryStarted {
        run_id: String,
        repository: String,
        direction: Direction,
    },
    RepositoryCompleted {
        run_id: String,
        outcome: RepositoryOutcome,
    },
    RepositoryFailed {
        run_id: String,
        outcome: RepositoryOutcome,
    },
}

impl RunEvent {
    /// Wrap a settled outcome in the matching completed/failed event.
    pub fn repository_settled(run_id: &str, outcome: RepositoryOutcome) -> Self {
        let run_id = run_id.to_string();
        if outcome.is_success() {
            Self::RepositoryCompleted { run_id, outcome }
        } else {
            Self::RepositoryFailed { run_id, outcome }
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. }
            | Self::RunCancelled { run_id, .. }
            | Self::PhaseStarted { run_id, .. }
            | Self::PhaseCompleted { run_id, .. }
            | Self::RepositoryStarted { run_id, .. }
            | Self::RepositoryCompleted { run_id, .. }
            | Self::RepositoryFailed { run_id, .. } => run_id,
        }
    }

    /// Wire name of the event, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::RunCancelled { .. } => "run_cancelled",
            Self::PhaseStarted { .. } => "phase_started",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::RepositoryStarted { .. } => "repository_started",
            Self::RepositoryCompleted { .. } => "repository_completed",
            Self::RepositoryFailed { .. } => "repository_failed",
        }
    }

    /// True for the single event that closes a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. } | Self::RunFailed { .. } | Self::RunCancelled { .. }
        )
    }
}

/// Receives lifecycle events.
///
/// Called synchronously on the orchestrator's task, so implementations should
/// hand work off (channel, spawn) rather than block. An observer may call
/// `Orchestrator::stop`; events raised while one is being delivered are
/// queued and handed out after it returns.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent) -> Result<()>;
}

/// Fan-out point between the orchestrator and its observers.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn RunObserver>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn RunObserver>) {
        match self.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub fn observer_count(&self) -> usize {
        match self.observers.read() {
            Ok(observers) => observers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Deliver an event to every observer in subscription order.
    pub fn publish(&self, event: &RunEvent) {
        // Snapshot the list so a slow observer never holds the lock.
        let observers: Vec<Arc<dyn RunObserver>> = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        for (index, observer) in observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        observer = index,
                        event = event.kind(),
                        run_id = event.run_id(),
                        "observer failed: {:#}",
                        e
                    );
                }
                Err(_) => {
                    tracing::error!(
                        observer = index,
                        event = event.kind(),
                        run_id = event.run_id(),
                        "observer panicked"
                    );
                }
            }
        }
    }
}

/// Re-publishes events as JSON on a broadcast channel, for transports such
/// as a WebSocket hub that subscribe once and forward outward.
pub struct BroadcastObserver {
    tx: broadcast::Sender<String>,
}

impl BroadcastObserver {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl RunObserver for BroadcastObserver {
    fn on_event(&self, event: &RunEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let _ = self.tx.send(json); // Ignore error if no receivers
        Ok(())
    }
}

/// Writes every event to the tracing log.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_event(&self, event: &RunEvent) -> Result<()> {
        match event {
            RunEvent::RunStarted {
                run_id,
                direction,
                total_phases,
            } => {
                tracing::info!(%run_id, %direction, total_phases, "weekly merge started");
            }
            RunEvent::RunCompleted {
                run_id,
                outcomes,
                duration_seconds,
                ..
            } => {
                let failed = outcomes.iter().filter(|o| !o.is_success()).count();
                tracing::info!(
                    %run_id,
                    repositories = outcomes.len(),
                    failed,
                    duration_seconds,
                    "weekly merge completed"
                );
            }
            RunEvent::RunFailed { run_id, error, .. } => {
                tracing::error!(%run_id, %error, "weekly merge failed");
            }
            RunEvent::RunCancelled {
                run_id,
                duration_seconds,
                ..
            } => {
                tracing::warn!(%run_id, duration_seconds, "weekly merge cancelled");
            }
            RunEvent::PhaseStarted {
                phase,
                repositories,
                parallel,
                ..
            } => {
                tracing::info!(
                    phase,
                    parallel,
                    repositories = %repositories.join(", "),
                    "phase started"
                );
            }
            RunEvent::PhaseCompleted { phase, outcomes, .. } => {
                tracing::info!(phase, repositories = outcomes.len(), "phase completed");
            }
            RunEvent::RepositoryStarted { repository, .. } => {
                tracing::info!(%repository, "repository merge started");
            }
            RunEvent::RepositoryCompleted { outcome, .. } => {
                tracing::info!(repository = %outcome.repository, "repository merge completed");
            }
            RunEvent::RepositoryFailed { outcome, .. } => {
                tracing::warn!(
                    repository = %outcome.repository,
                    error = outcome.error.as_deref().unwrap_or("unknown error"),
                    "repository merge failed"
                );
            }
        }
        Ok(())
    }
}
