//! In-process [`Store`] backed by a mutex-guarded set of tables.
//!
//! Courses, users and enrollments are created outside this service; a JSON
//! seed file provides them at startup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{
    Assignment, AssignmentDefinition, AssignmentId, Course, CourseId, Enrollment, Group, GroupId,
    OrgId, PrNumber, PullRequestRecord, PullRequestStage, RemoteRepoId, RemoteUserId, RepoKind,
    Repository, Submission, Task, TaskId, User, UserId,
};

use super::{Store, StoreError, StoreResult};

/// The full contents of a [`MemoryStore`], also its seed file format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub courses: Vec<Course>,
    pub repositories: Vec<Repository>,
    pub assignments: Vec<Assignment>,
    pub tasks: Vec<Task>,
    pub users: Vec<User>,
    pub enrollments: Vec<Enrollment>,
    pub groups: Vec<Group>,
    pub pull_requests: Vec<PullRequestRecord>,
    pub submissions: Vec<Submission>,
}

/// A [`Store`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Seed>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        Self {
            data: Mutex::new(seed),
        }
    }

    /// Loads a store from a JSON seed file.
    pub fn from_seed_file(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read(path)?;
        let seed: Seed = serde_json::from_slice(&contents)?;
        info!(
            path = %path.display(),
            courses = seed.courses.len(),
            repositories = seed.repositories.len(),
            users = seed.users.len(),
            "Loaded seed data"
        );
        Ok(Self::from_seed(seed))
    }

    /// Returns a copy of everything stored.
    pub fn snapshot(&self) -> Seed {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Seed> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_id(ids: impl Iterator<Item = u64>) -> u64 {
    ids.max().unwrap_or(0) + 1
}

#[async_trait]
impl Store for MemoryStore {
    async fn repository_by_remote_id(&self, id: RemoteRepoId) -> StoreResult<Repository> {
        self.lock()
            .repositories
            .iter()
            .find(|r| r.remote_id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("repository", id))
    }

    async fn course_by_org_id(&self, org: OrgId) -> StoreResult<Course> {
        self.lock()
            .courses
            .iter()
            .find(|c| c.org_id == org)
            .cloned()
            .ok_or_else(|| StoreError::not_found("course for organization", org))
    }

    async fn list_repositories(
        &self,
        org: OrgId,
        kinds: &[RepoKind],
    ) -> StoreResult<Vec<Repository>> {
        Ok(self
            .lock()
            .repositories
            .iter()
            .filter(|r| r.org_id == org && kinds.contains(&r.kind))
            .cloned()
            .collect())
    }

    async fn create_course(&self, course: Course, repos: Vec<Repository>) -> StoreResult<Course> {
        let mut data = self.lock();
        if data.courses.iter().any(|c| c.org_id == course.org_id) {
            return Err(StoreError::AlreadyExists {
                entity: "course for organization",
                key: course.org_id.to_string(),
            });
        }

        let course = Course {
            id: CourseId(next_id(data.courses.iter().map(|c| c.id.0))),
            ..course
        };
        data.courses.push(course.clone());
        data.repositories.extend(repos);
        Ok(course)
    }

    async fn assignments_by_course(&self, course: CourseId) -> StoreResult<Vec<Assignment>> {
        let mut assignments: Vec<Assignment> = self
            .lock()
            .assignments
            .iter()
            .filter(|a| a.course_id == course)
            .cloned()
            .collect();
        assignments.sort_by_key(|a| a.order);
        Ok(assignments)
    }

    async fn upsert_assignments(
        &self,
        course: CourseId,
        definitions: Vec<AssignmentDefinition>,
    ) -> StoreResult<Vec<Assignment>> {
        let mut data = self.lock();

        for def in definitions {
            let existing = data
                .assignments
                .iter()
                .position(|a| a.course_id == course && a.name == def.name);

            let assignment_id = match existing {
                Some(idx) => {
                    let a = &mut data.assignments[idx];
                    a.order = def.order;
                    a.is_group_lab = def.is_group_lab;
                    a.graded_manually = def.graded_manually;
                    a.score_limit = def.score_limit;
                    a.container_timeout_secs = def.container_timeout_secs;
                    a.id
                }
                None => {
                    let id = AssignmentId(next_id(data.assignments.iter().map(|a| a.id.0)));
                    data.assignments.push(Assignment {
                        id,
                        course_id: course,
                        name: def.name.clone(),
                        order: def.order,
                        is_group_lab: def.is_group_lab,
                        graded_manually: def.graded_manually,
                        score_limit: def.score_limit,
                        container_timeout_secs: def.container_timeout_secs,
                    });
                    id
                }
            };

            for task_name in def.tasks {
                let known = data
                    .tasks
                    .iter()
                    .any(|t| t.assignment_id == assignment_id && t.name == task_name);
                if !known {
                    let id = TaskId(next_id(data.tasks.iter().map(|t| t.id.0)));
                    data.tasks.push(Task {
                        id,
                        assignment_id,
                        name: task_name,
                    });
                }
            }
        }

        let mut assignments: Vec<Assignment> = data
            .assignments
            .iter()
            .filter(|a| a.course_id == course)
            .cloned()
            .collect();
        assignments.sort_by_key(|a| a.order);
        Ok(assignments)
    }

    async fn task(&self, id: TaskId) -> StoreResult<Task> {
        self.lock()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("task", id))
    }

    async fn user_by_login(&self, login: &str) -> StoreResult<User> {
        self.lock()
            .users
            .iter()
            .find(|u| u.login.eq_ignore_ascii_case(login))
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", login))
    }

    async fn user_by_remote_id(&self, id: RemoteUserId) -> StoreResult<User> {
        self.lock()
            .users
            .iter()
            .find(|u| u.remote_id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user with remote id", id))
    }

    async fn user(&self, id: UserId) -> StoreResult<User> {
        self.lock()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", id))
    }

    async fn enrollment(&self, user: UserId, course: CourseId) -> StoreResult<Enrollment> {
        self.lock()
            .enrollments
            .iter()
            .find(|e| e.user_id == user && e.course_id == course)
            .cloned()
            .ok_or_else(|| StoreError::not_found("enrollment", format!("{user} in {course}")))
    }

    async fn enrollments_by_course(&self, course: CourseId) -> StoreResult<Vec<Enrollment>> {
        Ok(self
            .lock()
            .enrollments
            .iter()
            .filter(|e| e.course_id == course)
            .cloned()
            .collect())
    }

    async fn update_last_activity(
        &self,
        user: UserId,
        course: CourseId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut data = self.lock();
        let enrollment = data
            .enrollments
            .iter_mut()
            .find(|e| e.user_id == user && e.course_id == course)
            .ok_or_else(|| StoreError::not_found("enrollment", format!("{user} in {course}")))?;
        enrollment.last_activity = Some(at);
        Ok(())
    }

    async fn group(&self, id: GroupId) -> StoreResult<Group> {
        self.lock()
            .groups
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("group", id))
    }

    async fn pull_request(
        &self,
        repo: RemoteRepoId,
        number: PrNumber,
    ) -> StoreResult<PullRequestRecord> {
        self.lock()
            .pull_requests
            .iter()
            .find(|p| p.remote_repo_id == repo && p.number == number)
            .cloned()
            .ok_or_else(|| StoreError::not_found("pull request", format!("{number} in {repo}")))
    }

    async fn pull_request_by_branch(
        &self,
        repo: RemoteRepoId,
        source_branch: &str,
    ) -> StoreResult<PullRequestRecord> {
        self.lock()
            .pull_requests
            .iter()
            .find(|p| p.remote_repo_id == repo && p.source_branch == source_branch)
            .cloned()
            .ok_or_else(|| {
                StoreError::not_found("pull request", format!("{source_branch} in {repo}"))
            })
    }

    async fn create_pull_request(&self, record: PullRequestRecord) -> StoreResult<()> {
        let mut data = self.lock();
        if data
            .pull_requests
            .iter()
            .any(|p| p.remote_repo_id == record.remote_repo_id && p.number == record.number)
        {
            return Err(StoreError::AlreadyExists {
                entity: "pull request",
                key: format!("{} in {}", record.number, record.remote_repo_id),
            });
        }
        data.pull_requests.push(record);
        Ok(())
    }

    async fn update_pull_request(&self, record: PullRequestRecord) -> StoreResult<()> {
        let mut data = self.lock();
        let slot = data
            .pull_requests
            .iter_mut()
            .find(|p| p.remote_repo_id == record.remote_repo_id && p.number == record.number)
            .ok_or_else(|| {
                StoreError::not_found(
                    "pull request",
                    format!("{} in {}", record.number, record.remote_repo_id),
                )
            })?;
        *slot = record;
        Ok(())
    }

    async fn finalize_pull_request(
        &self,
        repo: RemoteRepoId,
        number: PrNumber,
    ) -> StoreResult<()> {
        let mut data = self.lock();
        let idx = data
            .pull_requests
            .iter()
            .position(|p| p.remote_repo_id == repo && p.number == number)
            .ok_or_else(|| StoreError::not_found("pull request", format!("{number} in {repo}")))?;
        let record = data.pull_requests.remove(idx);

        if let Some(repository) = data.repositories.iter_mut().find(|r| r.remote_id == repo) {
            repository
                .issues
                .retain(|issue| issue.number != record.issue_number);
        }
        Ok(())
    }

    async fn review_load(&self, users: &[UserId]) -> StoreResult<HashMap<UserId, usize>> {
        let data = self.lock();
        Ok(users
            .iter()
            .map(|user| {
                let load = data
                    .pull_requests
                    .iter()
                    .filter(|p| p.stage != PullRequestStage::Approved && p.reviewers.contains(user))
                    .count();
                (*user, load)
            })
            .collect())
    }

    async fn record_submission(&self, submission: Submission) -> StoreResult<Submission> {
        let mut data = self.lock();
        let submission = Submission {
            id: next_id(data.submissions.iter().map(|s| s.id)),
            ..submission
        };
        data.submissions.push(submission.clone());
        Ok(submission)
    }
}
