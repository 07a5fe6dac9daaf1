//! Handlers for `pull_request` and `pull_request_review` events.
//!
//! # Event Actions
//!
//! | Event | Behavior |
//! |-------|----------|
//! | `opened` | Link the pull request to the task of the issue it closes |
//! | `closed` (merged) | Finalize: drop the record and its issue link |
//! | `closed` (not merged) | No action |
//! | review `approved` by a teacher | Mark the pull request approved |
//!
//! Only group repositories carry tracked pull requests.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument};

use crate::types::{Issue, PullRequestRecord, PullRequestStage};
use crate::webhooks::{PullRequestEvent, PullRequestReviewEvent, ReviewState};

use super::{EventRouter, HandlerError, Outcome};

/// `Fixes #12`, `closes #3`, `Resolves #40` at the end of a line.
static ISSUE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?imR)(?:fixes|closes|resolves)\s#(\d+)$").expect("issue reference pattern is valid")
});

/// Why a pull request body could not be linked to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IssueRefError {
    #[error("body references more than one issue")]
    MultipleReferences,

    #[error("body has no \"fixes #<issue>\" line")]
    NoReference,

    #[error("issue #{0} is not tracked in this repository")]
    UnknownIssue(u64),
}

/// Finds the single issue a pull request body closes.
///
/// The body must contain exactly one `#`, on a line ending in
/// `fixes #<n>`, `closes #<n>` or `resolves #<n>` (any case), and `<n>` must
/// be one of `issues`.
///
/// # Example
///
/// ```
/// use grader_hooks::handlers::{IssueRefError, find_issue};
/// use grader_hooks::types::{Issue, TaskId};
///
/// let issues = [Issue { number: 4, task_id: TaskId(1) }];
/// assert_eq!(find_issue("Closes #4", &issues).unwrap().task_id, TaskId(1));
/// assert_eq!(find_issue("Closes #5", &issues), Err(IssueRefError::UnknownIssue(5)));
/// ```
pub fn find_issue<'a>(body: &str, issues: &'a [Issue]) -> Result<&'a Issue, IssueRefError> {
    if body.matches('#').count() > 1 {
        return Err(IssueRefError::MultipleReferences);
    }

    let number: u64 = ISSUE_REFERENCE
        .captures(body)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or(IssueRefError::NoReference)?;

    issues
        .iter()
        .find(|issue| issue.number == number)
        .ok_or(IssueRefError::UnknownIssue(number))
}

impl EventRouter {
    #[instrument(skip_all, fields(repo = %event.repo.full_name, pr = %event.number))]
    pub(super) async fn handle_pull_request_opened(
        &self,
        event: PullRequestEvent,
    ) -> Result<Outcome, HandlerError> {
        let repo = self.store.repository_by_remote_id(event.repo.id).await?;
        if !repo.is_group_repo() {
            return Ok(Outcome::ignored("pull request outside a group repository"));
        }

        let issue = find_issue(&event.body, &repo.issues)?;
        let task = self.store.task(issue.task_id).await?;
        let owner = self.store.user_by_remote_id(event.sender.id).await?;

        self.store
            .create_pull_request(PullRequestRecord {
                remote_repo_id: repo.remote_id,
                number: event.number,
                issue_number: issue.number,
                task_id: task.id,
                user_id: owner.id,
                source_branch: event.head_ref.clone(),
                stage: PullRequestStage::Draft,
                reviewers: Vec::new(),
                feedback_comment_id: None,
            })
            .await?;

        info!(issue = issue.number, task = %task.name, owner = %owner.login, "Linked pull request to task");
        Ok(Outcome::Handled)
    }

    #[instrument(skip_all, fields(repo = %event.repo.full_name, pr = %event.number))]
    pub(super) async fn handle_pull_request_closed(
        &self,
        event: PullRequestEvent,
    ) -> Result<Outcome, HandlerError> {
        if !event.merged {
            return Ok(Outcome::ignored("pull request closed without merging"));
        }

        match self.store.pull_request(event.repo.id, event.number).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Ok(Outcome::ignored("pull request is not tracked"));
            }
            Err(e) => return Err(e.into()),
        }

        self.store
            .finalize_pull_request(event.repo.id, event.number)
            .await?;
        info!("Finalized merged pull request");
        Ok(Outcome::Handled)
    }

    #[instrument(skip_all, fields(repo = %event.repo.full_name, pr = %event.number, reviewer = %event.sender.login))]
    pub(super) async fn handle_review(
        &self,
        event: PullRequestReviewEvent,
    ) -> Result<Outcome, HandlerError> {
        if event.state != ReviewState::Approved {
            return Ok(Outcome::ignored("review is not an approval"));
        }

        let mut pr = match self.store.pull_request(event.repo.id, event.number).await {
            Ok(pr) => pr,
            Err(e) if e.is_not_found() => {
                return Ok(Outcome::ignored("pull request is not tracked"));
            }
            Err(e) => return Err(e.into()),
        };

        let org_id = match event.org_id {
            Some(id) => id,
            None => self.store.repository_by_remote_id(event.repo.id).await?.org_id,
        };
        let course = self.store.course_by_org_id(org_id).await?;
        let reviewer = self.store.user_by_remote_id(event.sender.id).await?;
        let enrollment = self.store.enrollment(reviewer.id, course.id).await?;

        if !enrollment.is_teacher() {
            return Ok(Outcome::ignored("approval from a non-teacher"));
        }

        pr.stage = PullRequestStage::Approved;
        self.store.update_pull_request(pr).await?;
        info!("Pull request approved");
        Ok(Outcome::Handled)
    }
}
