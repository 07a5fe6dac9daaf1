//! Batch synchronisation of student forks with the assignments template.
//!
//! Each repository gets its own retry budget. A failure on one repository is
//! counted and logged but never aborts the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::Scm;
use super::retry::{RetryConfig, RetryError, retry_remote};

/// One fork to synchronise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub org: String,
    pub repo: String,
    pub branch: String,
}

/// Tuning for [`sync_forks`].
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub retry: RetryConfig,
    /// Maximum number of syncs in flight.
    pub concurrency: usize,
    /// Delay between starting consecutive syncs.
    pub stagger: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::DEFAULT,
            concurrency: 10,
            stagger: Duration::from_millis(100),
        }
    }
}

/// Outcome of a batch.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: Vec<String>,
    pub failed: Vec<(String, RetryError)>,
}

impl SyncReport {
    pub fn error_count(&self) -> usize {
        self.failed.len()
    }
}

/// Synchronises every target, at most `config.concurrency` at a time.
pub async fn sync_forks(
    scm: Arc<dyn Scm>,
    targets: Vec<SyncTarget>,
    config: SyncConfig,
) -> SyncReport {
    let started = Instant::now();
    let total = targets.len();
    let slots = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (i, target) in targets.into_iter().enumerate() {
        if i > 0 && !config.stagger.is_zero() {
            tokio::time::sleep(config.stagger).await;
        }

        let scm = Arc::clone(&scm);
        let slots = Arc::clone(&slots);
        tasks.spawn(async move {
            let _permit = slots.acquire_owned().await;
            let result = retry_remote(config.retry, || {
                let scm = Arc::clone(&scm);
                let target = target.clone();
                async move {
                    scm.sync_fork(&target.org, &target.repo, &target.branch)
                        .await
                }
            })
            .await;
            (target.repo, result)
        });
    }

    let mut report = SyncReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((repo, Ok(()))) => report.synced.push(repo),
            Ok((repo, Err(e))) => {
                warn!(repo = %repo, error = %e, "Failed to sync fork");
                report.failed.push((repo, e));
            }
            Err(e) => error!(error = %e, "Fork sync task panicked"),
        }
    }

    info!(
        total,
        synced = report.synced.len(),
        errors = report.error_count(),
        elapsed = ?started.elapsed(),
        "Fork sync finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::ScmError;
    use crate::test_utils::FakeScm;

    fn targets(names: &[&str]) -> Vec<SyncTarget> {
        names
            .iter()
            .map(|n| SyncTarget {
                org: "dat320".to_string(),
                repo: n.to_string(),
                branch: "main".to_string(),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_does_not_abort_batch() {
        let scm = Arc::new(FakeScm::new());
        scm.fail_sync("bob-labs", vec![ScmError::other(Some(403), "Forbidden")]);

        let report = sync_forks(
            scm.clone(),
            targets(&["alice-labs", "bob-labs", "carol-labs"]),
            SyncConfig::default(),
        )
        .await;

        assert_eq!(report.error_count(), 1);
        assert_eq!(report.failed[0].0, "bob-labs");
        let mut synced = report.synced.clone();
        synced.sort();
        assert_eq!(synced, vec!["alice-labs", "carol-labs"]);
        assert_eq!(scm.sync_calls("bob-labs"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_fork_is_retried() {
        let scm = Arc::new(FakeScm::new());
        scm.fail_sync(
            "alice-labs",
            vec![ScmError::secondary_rate_limit(Some(Duration::from_secs(10)))],
        );

        let report = sync_forks(scm.clone(), targets(&["alice-labs"]), SyncConfig::default()).await;

        assert_eq!(report.synced, vec!["alice-labs"]);
        assert_eq!(scm.sync_calls("alice-labs"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn starts_are_staggered() {
        let scm = Arc::new(FakeScm::new());
        let start = Instant::now();

        let report = sync_forks(
            scm,
            targets(&["a", "b", "c", "d"]),
            SyncConfig::default(),
        )
        .await;

        assert_eq!(report.synced.len(), 4);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn empty_batch_is_empty_report() {
        let report = sync_forks(Arc::new(FakeScm::new()), Vec::new(), SyncConfig::default()).await;
        assert!(report.synced.is_empty());
        assert_eq!(report.error_count(), 0);
    }
}
