//! Persistence interface.
//!
//! Handlers look up everything they need per call through [`Store`]; they
//! hold no state between events. The queries are deliberately narrow: the
//! pipeline never manages schema or runs arbitrary queries.

mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    Assignment, AssignmentDefinition, Course, CourseId, Enrollment, Group, GroupId, OrgId,
    PrNumber, PullRequestRecord, RemoteRepoId, RemoteUserId, RepoKind, Repository, Submission,
    Task, TaskId, User, UserId,
};

pub use memory::{MemoryStore, Seed};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record matched the query.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A record with the same identity already exists.
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    /// IO error reading a seed file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Seed file is not valid JSON.
    #[error("invalid seed data: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The queries and updates the event handlers make.
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Courses and repositories ────────────────────────────────────────────

    async fn repository_by_remote_id(&self, id: RemoteRepoId) -> StoreResult<Repository>;

    async fn course_by_org_id(&self, org: OrgId) -> StoreResult<Course>;

    /// Lists the organization's repositories of any of `kinds`.
    async fn list_repositories(&self, org: OrgId, kinds: &[RepoKind])
    -> StoreResult<Vec<Repository>>;

    /// Creates a course and its repositories. Fails if the organization
    /// already has a course.
    async fn create_course(&self, course: Course, repos: Vec<Repository>) -> StoreResult<Course>;

    // ─── Assignments ─────────────────────────────────────────────────────────

    async fn assignments_by_course(&self, course: CourseId) -> StoreResult<Vec<Assignment>>;

    /// Inserts or updates assignments by name, creating missing tasks.
    async fn upsert_assignments(
        &self,
        course: CourseId,
        definitions: Vec<AssignmentDefinition>,
    ) -> StoreResult<Vec<Assignment>>;

    async fn task(&self, id: TaskId) -> StoreResult<Task>;

    // ─── Users, enrollments and groups ───────────────────────────────────────

    async fn user_by_login(&self, login: &str) -> StoreResult<User>;

    async fn user_by_remote_id(&self, id: RemoteUserId) -> StoreResult<User>;

    async fn user(&self, id: UserId) -> StoreResult<User>;

    async fn enrollment(&self, user: UserId, course: CourseId) -> StoreResult<Enrollment>;

    async fn enrollments_by_course(&self, course: CourseId) -> StoreResult<Vec<Enrollment>>;

    async fn update_last_activity(
        &self,
        user: UserId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn group(&self, id: GroupId) -> StoreResult<Group>;

    // ─── Pull requests ───────────────────────────────────────────────────────

    async fn pull_request(
        &self,
        repo: RemoteRepoId,
        number: PrNumber,
    ) -> StoreResult<PullRequestRecord>;

    /// Finds the open pull request whose head is `source_branch`.
    async fn pull_request_by_branch(
        &self,
        repo: RemoteRepoId,
        source_branch: &str,
    ) -> StoreResult<PullRequestRecord>;

    async fn create_pull_request(&self, record: PullRequestRecord) -> StoreResult<()>;

    async fn update_pull_request(&self, record: PullRequestRecord) -> StoreResult<()>;

    /// Removes a merged pull request and the issue it closed.
    async fn finalize_pull_request(&self, repo: RemoteRepoId, number: PrNumber)
    -> StoreResult<()>;

    /// Counts pull requests not yet approved that each user is reviewing.
    async fn review_load(&self, users: &[UserId]) -> StoreResult<HashMap<UserId, usize>>;

    // ─── Submissions ─────────────────────────────────────────────────────────

    /// Stores a submission, assigning its ID.
    async fn record_submission(&self, submission: Submission) -> StoreResult<Submission>;
}
