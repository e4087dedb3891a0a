//! Shared domain types for the weekly merge orchestrator.
//!
//! These types cross every boundary of the system: the Work Executor produces
//! [`RepositoryOutcome`]s, the orchestrator accumulates them into a
//! [`RunSnapshot`], and observers and history readers receive clones of both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a string does not name a supported merge direction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported merge direction '{0}'. Valid values: master-to-release, release-to-develop")]
pub struct UnsupportedDirection(pub String);

/// Which branch flows into which for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    MasterToRelease,
    ReleaseToDevelop,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::MasterToRelease, Direction::ReleaseToDevelop];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterToRelease => "master-to-release",
            Self::ReleaseToDevelop => "release-to-develop",
        }
    }

    /// Branch the hotfix branch is cut from.
    pub fn base_branch(&self) -> &'static str {
        match self {
            Self::MasterToRelease => "master",
            Self::ReleaseToDevelop => "release",
        }
    }

    /// Branch the pull request targets.
    pub fn target_branch(&self) -> &'static str {
        match self {
            Self::MasterToRelease => "release",
            Self::ReleaseToDevelop => "develop",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = UnsupportedDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "master-to-release" => Ok(Self::MasterToRelease),
            "release-to-develop" => Ok(Self::ReleaseToDevelop),
            other => Err(UnsupportedDirection(other.to_string())),
        }
    }
}

/// Lifecycle status of a run. There is no `Idle` variant: an idle
/// orchestrator simply has no run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a single repository's merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Reference to a pull request opened on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

/// Artifacts a successful merge leaves behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeArtifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotfix_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestRef>,
}

/// The recorded result of processing one repository within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryOutcome {
    pub repository: String,
    pub direction: Direction,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<MergeArtifacts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl RepositoryOutcome {
    pub fn completed(repository: &str, direction: Direction, artifacts: MergeArtifacts) -> Self {
        Self {
            repository: repository.to_string(),
            direction,
            status: OutcomeStatus::Completed,
            artifacts: Some(artifacts),
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(repository: &str, direction: Direction, error: impl Into<String>) -> Self {
        Self {
            repository: repository.to_string(),
            direction,
            status: OutcomeStatus::Failed,
            artifacts: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// A point-in-time copy of a run. Active runs are read through snapshots and
/// history entries are snapshots taken at termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: String,
    pub direction: Direction,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds, set once the run terminates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// 1-based index of the phase currently (or last) executing.
    pub current_phase: usize,
    pub total_phases: usize,
    #[serde(default)]
    pub outcomes: Vec<RepositoryOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSnapshot {
    /// Create a running snapshot positioned at phase 1.
    pub fn start(direction: Direction, total_phases: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            id: run_id(direction, started_at),
            direction,
            status: RunStatus::Running,
            started_at,
            ended_at: None,
            duration_seconds: None,
            current_phase: 1,
            total_phases,
            outcomes: Vec::new(),
            error: None,
        }
    }

    /// Move into a terminal status, stamping end time and duration.
    pub fn finish(&mut self, status: RunStatus, ended_at: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(ended_at);
        self.duration_seconds = Some(whole_seconds_between(self.started_at, ended_at));
    }

    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn completed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }
}

/// Run identifiers combine the direction with the start instant in millis.
pub fn run_id(direction: Direction, started_at: DateTime<Utc>) -> String {
    format!("{}-{}", direction, started_at.timestamp_millis())
}

/// Rounded whole seconds between two instants; never negative.
pub fn whole_seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let millis = (end - start).num_milliseconds().max(0) as u64;
    (millis + 500) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn direction_parses_known_values() {
        assert_eq!(
            "master-to-release".parse::<Direction>().unwrap(),
            Direction::MasterToRelease
        );
        assert_eq!(
            "release-to-develop".parse::<Direction>().unwrap(),
            Direction::ReleaseToDevelop
        );
    }

    #[test]
    fn direction_rejects_unknown_value() {
        let err = "develop-to-master".parse::<Direction>().unwrap_err();
        assert_eq!(err.0, "develop-to-master");
        assert!(err.to_string().contains("develop-to-master"));
    }

    #[test]
    fn direction_branches() {
        assert_eq!(Direction::MasterToRelease.base_branch(), "master");
        assert_eq!(Direction::MasterToRelease.target_branch(), "release");
        assert_eq!(Direction::ReleaseToDevelop.base_branch(), "release");
        assert_eq!(Direction::ReleaseToDevelop.target_branch(), "develop");
    }

    #[test]
    fn direction_serializes_kebab_case() {
        let json = serde_json::to_string(&Direction::ReleaseToDevelop).unwrap();
        assert_eq!(json, "\"release-to-develop\"");
    }

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn run_id_combines_direction_and_millis() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            run_id(Direction::MasterToRelease, at),
            "master-to-release-1700000000123"
        );
    }

    #[test]
    fn duration_rounds_to_nearest_second() {
        let start = Utc.timestamp_millis_opt(0).unwrap();
        assert_eq!(whole_seconds_between(start, Utc.timestamp_millis_opt(1_499).unwrap()), 1);
        assert_eq!(whole_seconds_between(start, Utc.timestamp_millis_opt(1_500).unwrap()), 2);
        assert_eq!(whole_seconds_between(Utc.timestamp_millis_opt(5_000).unwrap(), start), 0);
    }

    #[test]
    fn snapshot_finish_stamps_duration() {
        let start = Utc.timestamp_millis_opt(10_000).unwrap();
        let mut run = RunSnapshot::start(Direction::MasterToRelease, 3, start);
        assert!(run.is_active());
        assert_eq!(run.current_phase, 1);

        run.finish(RunStatus::Completed, Utc.timestamp_millis_opt(42_000).unwrap());
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.duration_seconds, Some(32));
        assert!(!run.is_active());
    }

    #[test]
    fn snapshot_counts_outcomes() {
        let mut run = RunSnapshot::start(Direction::MasterToRelease, 1, Utc::now());
        run.outcomes.push(RepositoryOutcome::completed(
            "a",
            Direction::MasterToRelease,
            MergeArtifacts::default(),
        ));
        run.outcomes
            .push(RepositoryOutcome::failed("b", Direction::MasterToRelease, "boom"));
        assert_eq!(run.completed_count(), 1);
        assert_eq!(run.failed_count(), 1);
    }

    #[test]
    fn outcome_skips_empty_fields_when_serialized() {
        let outcome = RepositoryOutcome::failed("core", Direction::MasterToRelease, "conflict");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "conflict");
        assert!(json.get("artifacts").is_none());
    }
}
