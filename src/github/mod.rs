//! Remote provider access.
//!
//! Handlers talk to the hosting provider only through the narrow [`Scm`]
//! trait. Rate-limit failures come back as classified [`ScmError`]s, which
//! [`retry_remote`] knows how to wait out.
//!
//! - [`OctocrabScm`] implements the trait against the GitHub REST API
//! - [`sync_forks`] drives a batch of fork synchronisations, one retry budget
//!   per repository

mod client;
mod error;
mod retry;
mod sync;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{OrgId, RemoteRepoId, RepoKind};

pub use client::OctocrabScm;
pub use error::{Classification, ScmError, ScmErrorKind, classify, from_response};
pub use retry::{RetryConfig, RetryError, retry_remote};
pub use sync::{SyncConfig, SyncReport, SyncTarget, sync_forks};

/// Organization metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMetadata {
    pub id: OrgId,
    pub login: String,
}

/// A repository created on the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRepository {
    pub remote_id: RemoteRepoId,
    pub name: String,
    pub kind: RepoKind,
}

/// Repositories every course organization gets on installation.
pub const COURSE_REPOSITORIES: [(&str, RepoKind); 3] = [
    ("info", RepoKind::Info),
    ("assignments", RepoKind::Assignments),
    ("tests", RepoKind::Tests),
];

/// Operations the event handlers need from the hosting provider.
///
/// Every call is a single remote request (or a single `git` invocation for
/// [`clone_repository`](Scm::clone_repository)). All but
/// [`create_course_repositories`](Scm::create_course_repositories) are safe
/// to repeat.
#[async_trait]
pub trait Scm: Send + Sync {
    /// Brings `org/repo`'s `branch` up to date with its upstream.
    async fn sync_fork(&self, org: &str, repo: &str, branch: &str) -> Result<(), ScmError>;

    /// Clones `org/repo` into `dest`, replacing anything already there.
    async fn clone_repository(&self, org: &str, repo: &str, dest: &Path) -> Result<(), ScmError>;

    /// Posts a comment on issue or pull request `number`, returning its ID.
    async fn create_issue_comment(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, ScmError>;

    /// Replaces the body of an existing comment.
    async fn update_issue_comment(
        &self,
        org: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ScmError>;

    /// Requests reviews from `reviewers` (logins) on pull request `number`.
    async fn request_reviewers(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        reviewers: &[String],
    ) -> Result<(), ScmError>;

    /// Looks up an organization by login.
    async fn get_organization(&self, login: &str) -> Result<OrgMetadata, ScmError>;

    /// Creates the [`COURSE_REPOSITORIES`] in `org`.
    async fn create_course_repositories(
        &self,
        org: &str,
    ) -> Result<Vec<CreatedRepository>, ScmError>;
}
