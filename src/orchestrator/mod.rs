mod engine;
mod runner;
mod state;

pub use engine::{Orchestrator, OrchestratorStatus};
