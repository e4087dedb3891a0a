//! The Work Executor seam.
//!
//! The orchestrator never talks to the hosting service itself. Each unit of
//! work goes through a [`WorkExecutor`], which performs a single attempt and
//! translates ordinary merge failures into a failed [`RepositoryOutcome`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use merge_common::{Direction, MergeArtifacts, RepositoryOutcome};
use std::collections::HashSet;
use std::time::Duration;

/// Performs the remote merge work for one repository.
///
/// Contract:
/// - `Ok(outcome)` for every domain result, successful or not. A rejected
///   branch or pull request is `Ok(RepositoryOutcome::failed(..))`.
/// - `Err(_)` only for unexpected faults. The orchestrator treats these as
///   structural failures and fails the whole run.
/// - One attempt per call; retries belong to the implementation.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn perform_merge(&self, repository: &str, direction: Direction)
        -> Result<RepositoryOutcome>;
}

/// Name of the branch a merge is staged on, e.g.
/// `hotfix-master/merge-master-into-release-20241014`.
pub fn hotfix_branch_name(direction: Direction, date: NaiveDate) -> String {
    format!(
        "hotfix-{base}/merge-{base}-into-{target}-{date}",
        base = direction.base_branch(),
        target = direction.target_branch(),
        date = date.format("%Y%m%d"),
    )
}

/// Title used for the generated pull request.
pub fn pull_request_title(direction: Direction, date: NaiveDate) -> String {
    format!(
        "[Auto] Merge {} into {} - {}",
        direction.base_branch(),
        direction.target_branch(),
        date.format("%Y-%m-%d"),
    )
}

/// Executor that touches nothing remote. It waits for the configured delay
/// and reports the branch it would have created, which makes it useful for
/// rehearsing a plan end to end.
#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor {
    delay: Duration,
    failing: HashSet<String>,
}

impl DryRunExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing: HashSet::new(),
        }
    }

    /// Report these repositories as failed merges.
    pub fn with_failures<I, S>(mut self, repositories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(repositories.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl WorkExecutor for DryRunExecutor {
    async fn perform_merge(
        &self,
        repository: &str,
        direction: Direction,
    ) -> Result<RepositoryOutcome> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.contains(repository) {
            return Ok(RepositoryOutcome::failed(
                repository,
                direction,
                format!("dry run: simulated failure for {}", repository),
            ));
        }

        let today = Utc::now().date_naive();
        tracing::debug!(
            repository,
            title = %pull_request_title(direction, today),
            "dry run: skipping pull request creation"
        );
        Ok(RepositoryOutcome::completed(
            repository,
            direction,
            MergeArtifacts {
                hotfix_branch: Some(hotfix_branch_name(direction, today)),
                pull_request: None,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 14).unwrap()
    }

    #[test]
    fn test_hotfix_branch_name() {
        assert_eq!(
            hotfix_branch_name(Direction::MasterToRelease, date()),
            "hotfix-master/merge-master-into-release-20241014"
        );
        assert_eq!(
            hotfix_branch_name(Direction::ReleaseToDevelop, date()),
            "hotfix-release/merge-release-into-develop-20241014"
        );
    }

    #[test]
    fn test_pull_request_title() {
        assert_eq!(
            pull_request_title(Direction::ReleaseToDevelop, date()),
            "[Auto] Merge release into develop - 2024-10-14"
        );
    }

    #[tokio::test]
    async fn test_dry_run_succeeds_with_branch() {
        let executor = DryRunExecutor::default();
        let outcome = executor
            .perform_merge("danal-core", Direction::MasterToRelease)
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.repository, "danal-core");
        let branch = outcome
            .artifacts
            .and_then(|a| a.hotfix_branch)
            .expect("dry run should report a branch");
        assert!(branch.starts_with("hotfix-master/merge-master-into-release-"));
    }

    #[tokio::test]
    async fn test_dry_run_simulated_failure_is_an_outcome() {
        let executor = DryRunExecutor::default().with_failures(["broken"]);
        let outcome = executor
            .perform_merge("broken", Direction::ReleaseToDevelop)
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert!(outcome.error.unwrap().contains("broken"));
    }
}
