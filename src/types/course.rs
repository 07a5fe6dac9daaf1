//! Course-side records the event handlers look up through the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{
    AssignmentId, CourseId, GroupId, OrgId, PrNumber, RemoteRepoId, RemoteUserId, TaskId, UserId,
};

/// A course, bound one-to-one to a provider organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    pub code: String,
    pub org_id: OrgId,
    pub org_name: String,
    pub creator: UserId,
    /// Runner timeout applied to assignments that don't set their own.
    #[serde(default)]
    pub runner_timeout_secs: Option<u64>,
}

/// The role a repository plays within a course organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoKind {
    /// Course information repository.
    Info,
    /// Shared template every student repository is forked from.
    Assignments,
    /// Test definitions; pushes here change assignment definitions.
    Tests,
    /// A single student's repository.
    User,
    /// A group's shared repository.
    Group,
}

/// An issue in a group repository, linked to an assignment task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub task_id: TaskId,
}

/// A provider-side repository tracked by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub remote_id: RemoteRepoId,
    pub org_id: OrgId,
    pub name: String,
    pub kind: RepoKind,
    /// Owner of a `User` repository.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Owner of a `Group` repository.
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl Repository {
    pub fn is_tests_repo(&self) -> bool {
        self.kind == RepoKind::Tests
    }

    pub fn is_assignments_repo(&self) -> bool {
        self.kind == RepoKind::Assignments
    }

    pub fn is_user_repo(&self) -> bool {
        self.kind == RepoKind::User
    }

    pub fn is_group_repo(&self) -> bool {
        self.kind == RepoKind::Group
    }
}

/// An assignment as defined in the course's tests repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub course_id: CourseId,
    /// Also the top-level directory name in student repositories.
    pub name: String,
    pub order: u32,
    #[serde(default)]
    pub is_group_lab: bool,
    /// Manually graded assignments are never run, only recorded.
    #[serde(default)]
    pub graded_manually: bool,
    /// Minimum task score (0-100) before reviewers are assigned.
    #[serde(default)]
    pub score_limit: u32,
    #[serde(default)]
    pub container_timeout_secs: Option<u64>,
}

/// An assignment definition read from the tests repository, before it has an ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentDefinition {
    pub name: String,
    pub order: u32,
    #[serde(default)]
    pub is_group_lab: bool,
    #[serde(default)]
    pub graded_manually: bool,
    #[serde(default)]
    pub score_limit: u32,
    #[serde(default)]
    pub container_timeout_secs: Option<u64>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// A task within an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub assignment_id: AssignmentId,
    pub name: String,
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub remote_id: RemoteUserId,
    #[serde(default)]
    pub is_admin: bool,
}

/// A user's role within a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentRole {
    Student,
    Teacher,
}

/// A user's membership in a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub role: EnrollmentRole,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn is_teacher(&self) -> bool {
        self.role == EnrollmentRole::Teacher
    }
}

/// A student group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub course_id: CourseId,
    pub members: Vec<UserId>,
}

/// Review stage of a tracked pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestStage {
    /// Opened, tests not yet passing the score limit.
    Draft,
    /// Reviewers assigned.
    Review,
    /// Approved by a teacher.
    Approved,
}

/// A pull request the service tracks, linked to an issue and its task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRecord {
    pub remote_repo_id: RemoteRepoId,
    pub number: PrNumber,
    pub issue_number: u64,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub source_branch: String,
    pub stage: PullRequestStage,
    #[serde(default)]
    pub reviewers: Vec<UserId>,
    #[serde(default)]
    pub feedback_comment_id: Option<u64>,
}

impl PullRequestRecord {
    pub fn has_reviewers(&self) -> bool {
        !self.reviewers.is_empty()
    }

    pub fn has_feedback_comment(&self) -> bool {
        self.feedback_comment_id.is_some()
    }
}
