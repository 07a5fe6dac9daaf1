//! Typed webhook events.
//!
//! Payloads are decoded once at the HTTP boundary into [`InboundEvent`] and
//! matched exhaustively by the event router. Only the fields the handlers need
//! are kept.

use serde::{Deserialize, Serialize};

use crate::types::{CommitId, InstallationId, OrgId, PrNumber, RemoteRepoId, RemoteUserId};

use super::dedupe::DedupeKey;

/// A parsed webhook event the pipeline knows how to handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundEvent {
    /// Commits were pushed to a branch.
    Push(PushEvent),

    /// A pull request was opened.
    PullRequestOpened(PullRequestEvent),

    /// A pull request was closed (merged or not).
    PullRequestClosed(PullRequestEvent),

    /// A review was submitted on a pull request.
    PullRequestReviewed(PullRequestReviewEvent),

    /// The app was installed on an organization.
    InstallationCreated(InstallationEvent),
}

impl InboundEvent {
    /// Returns the short event name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Push(_) => "push",
            InboundEvent::PullRequestOpened(_) => "pull_request.opened",
            InboundEvent::PullRequestClosed(_) => "pull_request.closed",
            InboundEvent::PullRequestReviewed(_) => "pull_request_review.submitted",
            InboundEvent::InstallationCreated(_) => "installation.created",
        }
    }

    /// Returns the key identifying re-deliveries of this logical event.
    pub fn dedupe_key(&self) -> DedupeKey {
        match self {
            InboundEvent::Push(e) => DedupeKey::push(e.head_commit()),
            InboundEvent::PullRequestOpened(e) => {
                DedupeKey::pull_request(e.repo.id, e.number, "opened", &e.head_sha)
            }
            InboundEvent::PullRequestClosed(e) => {
                DedupeKey::pull_request(e.repo.id, e.number, "closed", &e.head_sha)
            }
            InboundEvent::PullRequestReviewed(e) => {
                DedupeKey::pull_request_review(e.repo.id, e.number, e.review_id)
            }
            InboundEvent::InstallationCreated(e) => DedupeKey::installation(e.installation_id),
        }
    }
}

/// Repository fields common to all repository events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub id: RemoteRepoId,
    pub full_name: String,
    pub default_branch: String,
}

/// The account that triggered an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: RemoteUserId,
    pub login: String,
}

/// The files touched by one pushed commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFiles {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl CommitFiles {
    /// Iterates over every touched path.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .map(String::as_str)
    }
}

/// A push to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repo: RepoRef,
    /// Full ref, e.g. `refs/heads/main`.
    pub git_ref: String,
    /// The pushed-to tip (`after`).
    pub after: CommitId,
    /// The head commit, absent for some pushes (e.g. tag-only pushes).
    pub head_commit_id: Option<CommitId>,
    pub sender: Sender,
    pub commits: Vec<CommitFiles>,
}

impl PushEvent {
    /// Returns the branch name from the ref (`refs/heads/feature/x` → `feature/x`).
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }

    /// Returns true if the push targets the repository's default branch.
    pub fn is_default_branch(&self) -> bool {
        self.branch() == self.repo.default_branch
    }

    /// Returns the head commit, falling back to the `after` SHA.
    pub fn head_commit(&self) -> &CommitId {
        self.head_commit_id.as_ref().unwrap_or(&self.after)
    }

    /// Returns the repository name without its owner.
    pub fn repo_name(&self) -> &str {
        self.repo
            .full_name
            .rsplit_once('/')
            .map_or(self.repo.full_name.as_str(), |(_, name)| name)
    }
}

/// A pull request lifecycle event (`opened` or `closed`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub repo: RepoRef,
    pub number: PrNumber,
    pub title: String,
    pub body: String,
    pub head_ref: String,
    pub head_sha: CommitId,
    pub merged: bool,
    pub sender: Sender,
}

/// State of a submitted review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

/// A review submitted on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestReviewEvent {
    pub repo: RepoRef,
    pub org_id: Option<OrgId>,
    pub number: PrNumber,
    pub review_id: u64,
    pub state: ReviewState,
    pub sender: Sender,
}

/// The app was installed on an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationEvent {
    pub installation_id: InstallationId,
    pub account_id: OrgId,
    pub account_login: String,
    pub sender: Sender,
}
