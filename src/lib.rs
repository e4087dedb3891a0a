pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod plan;

// Shared domain types live in merge-common; re-export for library users.
pub use merge_common::{
    Direction, MergeArtifacts, OutcomeStatus, PullRequestRef, RepositoryOutcome, RunSnapshot,
    RunStatus, UnsupportedDirection,
};
pub use orchestrator::{Orchestrator, OrchestratorStatus};
