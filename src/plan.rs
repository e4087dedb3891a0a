//! Execution plan: the fixed, ordered list of phases a merge run walks.
//!
//! The plan is validated once at construction and is immutable afterwards.
//! The orchestrator shares it by `Arc` and never derives it from runtime data.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::PlanError;

/// Whether the repositories of a phase run one at a time or all at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    #[default]
    Serial,
    Parallel,
}

impl Concurrency {
    pub fn from_parallel(parallel: bool) -> Self {
        if parallel { Self::Parallel } else { Self::Serial }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel)
    }
}

impl std::fmt::Display for Concurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Concurrency::Serial => write!(f, "serial"),
            Concurrency::Parallel => write!(f, "parallel"),
        }
    }
}

/// A single step of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based phase number
    pub number: usize,
    /// Repositories processed in this phase, in listed order
    pub repositories: Vec<String>,
    #[serde(default)]
    pub concurrency: Concurrency,
}

impl Phase {
    pub fn new(number: usize, repositories: &[&str], concurrency: Concurrency) -> Self {
        Self {
            number,
            repositories: repositories.iter().map(|r| r.to_string()).collect(),
            concurrency,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.concurrency.is_parallel()
    }
}

/// Validated, ordered list of phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    phases: Vec<Phase>,
}

impl ExecutionPlan {
    /// Validate and wrap a list of phases.
    ///
    /// Phase numbers must run 1, 2, 3, ... in order, every phase must name at
    /// least one repository, and no repository may appear twice.
    pub fn new(phases: Vec<Phase>) -> Result<Self, PlanError> {
        if phases.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut seen = HashSet::new();
        for (idx, phase) in phases.iter().enumerate() {
            let expected = idx + 1;
            if phase.number != expected {
                return Err(PlanError::NonContiguous {
                    expected,
                    found: phase.number,
                });
            }
            if phase.repositories.is_empty() {
                return Err(PlanError::EmptyPhase {
                    phase: phase.number,
                });
            }
            for repo in &phase.repositories {
                if !seen.insert(repo.as_str()) {
                    return Err(PlanError::DuplicateRepository {
                        repository: repo.clone(),
                    });
                }
            }
        }

        Ok(Self { phases })
    }

    /// Build a plan from unnumbered groups, numbering them in order.
    pub fn from_groups<I>(groups: I) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = (Vec<String>, Concurrency)>,
    {
        let phases = groups
            .into_iter()
            .enumerate()
            .map(|(idx, (repositories, concurrency))| Phase {
                number: idx + 1,
                repositories,
                concurrency,
            })
            .collect();
        Self::new(phases)
    }

    /// The weekly merge order: the shared core library first, then the
    /// external API it feeds, then the three settlement services together.
    pub fn weekly_default() -> Self {
        Self {
            phases: vec![
                Phase::new(1, &["danal-core"], Concurrency::Serial),
                Phase::new(2, &["smart-settlement-extapi"], Concurrency::Serial),
                Phase::new(
                    3,
                    &[
                        "smart-settlement-batch",
                        "smart-settlement-api",
                        "smart-settlement-merchant-interface",
                    ],
                    Concurrency::Parallel,
                ),
            ],
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Every repository in plan order.
    pub fn repositories(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .flat_map(|p| p.repositories.iter().map(String::as_str))
    }
}
