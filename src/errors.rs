//! Typed error hierarchy for the merge orchestrator.
//!
//! Two top-level enums cover the two places structure can go wrong:
//! - `OrchestratorError`: start requests and structural run failures
//! - `PlanError`: malformed execution plans rejected at construction

use merge_common::RunSnapshot;
use thiserror::Error;

/// Errors surfaced to callers of the orchestrator.
///
/// Per-repository merge failures never appear here; they are recorded as
/// failed outcomes inside the run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("A merge run is already in progress ({run_id})")]
    AlreadyRunning { run_id: String },

    #[error(transparent)]
    InvalidDirection(#[from] merge_common::UnsupportedDirection),

    #[error("Merge run {} failed: {}", run.id, run.error.as_deref().unwrap_or("unknown error"))]
    RunFailed { run: Box<RunSnapshot> },
}

impl OrchestratorError {
    /// The archived snapshot of a run that failed structurally.
    pub fn failed_run(&self) -> Option<&RunSnapshot> {
        match self {
            Self::RunFailed { run } => Some(run),
            _ => None,
        }
    }
}

/// Errors from validating an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Execution plan has no phases")]
    Empty,

    #[error("Phase {phase} lists no repositories")]
    EmptyPhase { phase: usize },

    #[error("Phase numbers must be contiguous from 1: expected {expected}, found {found}")]
    NonContiguous { expected: usize, found: usize },

    #[error("Repository {repository} appears more than once in the plan")]
    DuplicateRepository { repository: String },
}
