//! Event handlers.
//!
//! [`EventRouter`] matches each [`InboundEvent`] to its handler. Handlers are
//! stateless: everything they need is looked up through the [`Store`] on
//! every call, and their only side effects go through the [`Scm`], the
//! [`Runner`] and the submission stream.
//!
//! # Event Types
//!
//! | Event | Handler |
//! |-------|---------|
//! | `push` | `handle_push`: tests repo, assignments template, student and group repos |
//! | `pull_request.opened` | `handle_pull_request_opened`: link to an issue's task |
//! | `pull_request.closed` | `handle_pull_request_closed`: finalize merged PRs |
//! | `pull_request_review.submitted` | `handle_review`: teacher approval |
//! | `installation.created` | `handle_installation`: bootstrap a course |

mod feedback;
mod installation;
mod pull_request;
mod push;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::dispatch::EventHandler;
use crate::github::{RetryConfig, RetryError, Scm, ScmError, SyncConfig, retry_remote};
use crate::runner::{Runner, RunnerError};
use crate::store::{Store, StoreError};
use crate::stream::StreamServices;
use crate::types::{Submission, UserId};
use crate::webhooks::InboundEvent;

pub use pull_request::{IssueRefError, find_issue};
pub use push::{extract_assignment_names, load_assignment_definitions};

/// How an event ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event led to an action.
    Handled,
    /// Nothing to do for this event.
    Ignored(String),
}

impl Outcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Outcome::Ignored(reason.into())
    }
}

/// Errors that abort handling of a single event.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A lookup or update in the store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A provider call failed after retries.
    #[error("remote operation failed: {0}")]
    Remote(#[from] RetryError),

    /// A provider call that is never retried failed.
    #[error("remote operation failed: {0}")]
    Scm(#[from] ScmError),

    /// The test run failed or timed out.
    #[error("test run failed: {0}")]
    Runner(#[from] RunnerError),

    /// The pull request body does not reference exactly one known issue.
    #[error("cannot link pull request: {0}")]
    IssueRef(#[from] IssueRefError),

    /// The sender may not perform this action.
    #[error("not permitted: {0}")]
    NotPermitted(String),

    /// The target of a create already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Inconsistent or malformed data.
    #[error("{0}")]
    Invalid(String),
}

/// Settings shared by all handlers.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Where working copies of course repositories are kept.
    pub workspace_dir: PathBuf,

    /// Runner timeout when neither the assignment nor the course sets one.
    pub default_runner_timeout: Duration,

    /// Retry budget for individual provider calls.
    pub retry: RetryConfig,

    /// Tuning for fork synchronisation batches.
    pub sync: SyncConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("./workspace"),
            default_runner_timeout: Duration::from_secs(600),
            retry: RetryConfig::DEFAULT,
            sync: SyncConfig::default(),
        }
    }
}

/// Routes each event to its handler.
pub struct EventRouter {
    store: Arc<dyn Store>,
    scm: Arc<dyn Scm>,
    runner: Arc<dyn Runner>,
    streams: StreamServices,
    config: HandlerConfig,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn Store>,
        scm: Arc<dyn Scm>,
        runner: Arc<dyn Runner>,
        streams: StreamServices,
        config: HandlerConfig,
    ) -> Self {
        Self {
            store,
            scm,
            runner,
            streams,
            config,
        }
    }

    /// Runs a provider call under the configured retry budget.
    async fn remote<T, F, Fut>(&self, operation: F) -> Result<T, HandlerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScmError>>,
    {
        Ok(retry_remote(self.config.retry, operation).await?)
    }

    /// Stores `submission` and pushes it to `recipients`.
    async fn record_and_publish(
        &self,
        submission: Submission,
        recipients: &[UserId],
    ) -> Result<Submission, HandlerError> {
        let submission = self.store.record_submission(submission).await?;
        let delivered = self
            .streams
            .submissions
            .send_to(submission.clone(), recipients)
            .await;
        debug!(
            submission = submission.id,
            score = submission.score,
            recipients = recipients.len(),
            delivered,
            "Recorded submission"
        );
        Ok(submission)
    }
}

#[async_trait]
impl EventHandler for EventRouter {
    async fn handle(&self, event: InboundEvent) -> Result<Outcome, HandlerError> {
        match event {
            InboundEvent::Push(e) => self.handle_push(e).await,
            InboundEvent::PullRequestOpened(e) => self.handle_pull_request_opened(e).await,
            InboundEvent::PullRequestClosed(e) => self.handle_pull_request_closed(e).await,
            InboundEvent::PullRequestReviewed(e) => self.handle_review(e).await,
            InboundEvent::InstallationCreated(e) => self.handle_installation(e).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::dispatch::{DispatchOutcome, Dispatcher};
    use crate::test_utils::{Harness, push_event};
    use crate::types::CommitId;

    #[tokio::test]
    async fn redelivered_push_is_graded_once() {
        let h = Harness::with_course_timeout(300);
        let dispatcher = Dispatcher::new(h.router.clone(), 5);
        let mut alice = h.streams.submissions.subscribe(UserId(2)).await;

        let event = push_event("abc123");
        let key = event.dedupe_key();
        assert_eq!(
            dispatcher.dispatch(event.clone(), key.clone()),
            DispatchOutcome::Accepted
        );
        assert_eq!(dispatcher.dispatch(event, key.clone()), DispatchOutcome::Duplicate);

        let published = alice.recv().await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(published.commit_id, CommitId::new("abc123"));
        assert_eq!(published.user_id, Some(UserId(2)));
        let jobs = h.runner.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].timeout, Duration::from_secs(300));
        assert!(!dispatcher.gate().contains(&key));
    }

    #[tokio::test]
    async fn push_for_unknown_repository_fails() {
        let h = Harness::from_store(crate::store::MemoryStore::new());

        let err = h.router.handle(push_event("abc123")).await.unwrap_err();

        assert!(matches!(err, HandlerError::Store(ref e) if e.is_not_found()));
    }
}
