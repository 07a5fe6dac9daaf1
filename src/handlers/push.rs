//! Handler for `push` events.
//!
//! # Repository Kinds
//!
//! | Kind | Behavior |
//! |------|----------|
//! | tests | Re-read assignment definitions from the default branch |
//! | assignments | Refresh the template clone, sync every student fork |
//! | user | Run touched individual assignments, publish to the owner |
//! | group | Run touched group assignments, publish to all members; on a task branch also update the pull request |
//! | info | No action |
//!
//! Pushes to anything but the default branch are ignored, except in group
//! repositories where task branches carry pull requests.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::github::{SyncTarget, sync_forks};
use crate::runner::{RunJob, job_timeout, run_with_timeout};
use crate::types::{
    Assignment, AssignmentDefinition, Course, CourseId, GroupId, RepoKind, Repository, Submission,
    TestResults, UserId,
};
use crate::webhooks::PushEvent;

use super::{EventRouter, HandlerError, Outcome};

/// File in each assignment directory of the tests repository.
const ASSIGNMENT_FILE: &str = "assignment.json";

/// Who a submission belongs to.
#[derive(Debug, Clone, Copy)]
enum SubmissionOwner {
    User(UserId),
    Group(GroupId),
}

/// Everything a single assignment run needs to know about the push.
struct PushContext<'a> {
    event: &'a PushEvent,
    repo: &'a Repository,
    course: &'a Course,
    owner: SubmissionOwner,
    recipients: &'a [UserId],
}

impl EventRouter {
    #[instrument(skip_all, fields(repo = %event.repo.full_name, commit = %event.head_commit().short()))]
    pub(super) async fn handle_push(&self, event: PushEvent) -> Result<Outcome, HandlerError> {
        let repo = self.store.repository_by_remote_id(event.repo.id).await?;
        let course = self.store.course_by_org_id(repo.org_id).await?;

        if !repo.is_group_repo() && !event.is_default_branch() {
            return Ok(Outcome::ignored(format!(
                "push to non-default branch {}",
                event.branch()
            )));
        }

        match repo.kind {
            RepoKind::Tests => self.refresh_assignments(&repo, &course).await,
            RepoKind::Assignments => self.sync_student_forks(&event, &repo, &course).await,
            RepoKind::User => self.handle_student_push(&event, &repo, &course).await,
            RepoKind::Group => self.handle_group_push(&event, &repo, &course).await,
            RepoKind::Info => Ok(Outcome::ignored("push to info repository")),
        }
    }

    /// Re-reads the assignment definitions from a fresh clone of the tests
    /// repository.
    async fn refresh_assignments(
        &self,
        repo: &Repository,
        course: &Course,
    ) -> Result<Outcome, HandlerError> {
        let dest = self.workspace_path(course, repo);
        self.remote(|| {
            self.scm
                .clone_repository(&course.org_name, &repo.name, &dest)
        })
        .await?;

        let definitions = load_assignment_definitions(&dest)?;
        if definitions.is_empty() {
            return Ok(Outcome::ignored("tests repository defines no assignments"));
        }

        let assignments = self.store.upsert_assignments(course.id, definitions).await?;
        info!(
            course = %course.code,
            assignments = assignments.len(),
            "Updated assignments"
        );
        Ok(Outcome::Handled)
    }

    /// Refreshes the template clone and brings every student fork up to date.
    async fn sync_student_forks(
        &self,
        event: &PushEvent,
        repo: &Repository,
        course: &Course,
    ) -> Result<Outcome, HandlerError> {
        let dest = self.workspace_path(course, repo);
        self.remote(|| {
            self.scm
                .clone_repository(&course.org_name, &repo.name, &dest)
        })
        .await?;

        let forks = self
            .store
            .list_repositories(course.org_id, &[RepoKind::User, RepoKind::Group])
            .await?;
        if forks.is_empty() {
            return Ok(Outcome::ignored("no student repositories to update"));
        }

        let targets = forks
            .into_iter()
            .map(|fork| SyncTarget {
                org: course.org_name.clone(),
                repo: fork.name,
                branch: event.repo.default_branch.clone(),
            })
            .collect();
        let report = sync_forks(Arc::clone(&self.scm), targets, self.config.sync).await;

        if report.error_count() > 0 {
            warn!(
                course = %course.code,
                errors = report.error_count(),
                "Some student forks were not updated"
            );
        }
        Ok(Outcome::Handled)
    }

    async fn handle_student_push(
        &self,
        event: &PushEvent,
        repo: &Repository,
        course: &Course,
    ) -> Result<Outcome, HandlerError> {
        let owner = repo.user_id.ok_or_else(|| {
            HandlerError::Invalid(format!("user repository {} has no owner", repo.name))
        })?;
        self.touch_activity(owner, course.id).await;

        let assignments = self.touched_assignments(event, course, false).await?;
        if assignments.is_empty() {
            return Ok(Outcome::ignored("push touches no individual assignments"));
        }

        let ctx = PushContext {
            event,
            repo,
            course,
            owner: SubmissionOwner::User(owner),
            recipients: &[owner],
        };

        let mut first_error = None;
        for assignment in &assignments {
            if let Err(e) = self.run_assignment(&ctx, assignment).await {
                warn!(assignment = %assignment.name, error = %e, "Assignment run failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(Outcome::Handled),
        }
    }

    async fn handle_group_push(
        &self,
        event: &PushEvent,
        repo: &Repository,
        course: &Course,
    ) -> Result<Outcome, HandlerError> {
        let group_id = repo.group_id.ok_or_else(|| {
            HandlerError::Invalid(format!("group repository {} has no group", repo.name))
        })?;
        let group = self.store.group(group_id).await?;
        let sender = self.store.user_by_login(&event.sender.login).await?;
        match self.store.enrollment(sender.id, course.id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                warn!(sender = %sender.login, course = %course.code, "Push from user outside the course");
                return Ok(Outcome::ignored(format!(
                    "{} is not enrolled in {}",
                    sender.login, course.code
                )));
            }
            Err(e) => return Err(e.into()),
        }
        self.touch_activity(sender.id, course.id).await;

        let assignments = self.touched_assignments(event, course, true).await?;
        if assignments.is_empty() {
            return Ok(Outcome::ignored("push touches no group assignments"));
        }

        let ctx = PushContext {
            event,
            repo,
            course,
            owner: SubmissionOwner::Group(group.id),
            recipients: &group.members,
        };

        let mut first_error = None;
        for assignment in &assignments {
            let results = match self.run_assignment(&ctx, assignment).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(assignment = %assignment.name, error = %e, "Assignment run failed");
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            // Task branches carry pull requests; the default branch does not.
            let Some(results) = results else { continue };
            if event.is_default_branch() {
                continue;
            }
            if let Err(e) = self
                .update_pull_request_feedback(event, repo, course, assignment, &results)
                .await
            {
                warn!(assignment = %assignment.name, error = %e, "Pull request update failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(Outcome::Handled),
        }
    }

    /// Runs (or, for manually graded assignments, just records) one
    /// assignment and publishes the submission. Returns the test results
    /// when tests were run.
    async fn run_assignment(
        &self,
        ctx: &PushContext<'_>,
        assignment: &Assignment,
    ) -> Result<Option<TestResults>, HandlerError> {
        let (user_id, group_id) = match ctx.owner {
            SubmissionOwner::User(id) => (Some(id), None),
            SubmissionOwner::Group(id) => (None, Some(id)),
        };
        let commit_id = ctx.event.head_commit().clone();

        if assignment.graded_manually {
            debug!(assignment = %assignment.name, "Manually graded, recording without a run");
            let submission = Submission {
                id: 0,
                assignment_id: assignment.id,
                user_id,
                group_id,
                commit_id,
                score: 0,
                manual_review: true,
                results: None,
                built_at: Utc::now(),
            };
            self.record_and_publish(submission, ctx.recipients).await?;
            return Ok(None);
        }

        let job = RunJob {
            org: ctx.course.org_name.clone(),
            repo: ctx.repo.name.clone(),
            assignment: assignment.name.clone(),
            commit: commit_id.clone(),
            branch: ctx.event.branch().to_string(),
            timeout: job_timeout(assignment, ctx.course, self.config.default_runner_timeout),
        };
        let results = run_with_timeout(self.runner.as_ref(), &job).await?;

        let submission = Submission {
            id: 0,
            assignment_id: assignment.id,
            user_id,
            group_id,
            commit_id,
            score: results.sum(),
            manual_review: false,
            results: Some(results.clone()),
            built_at: Utc::now(),
        };
        self.record_and_publish(submission, ctx.recipients).await?;
        Ok(Some(results))
    }

    /// Course assignments named by the push's top-level directories, limited
    /// to group or individual assignments.
    async fn touched_assignments(
        &self,
        event: &PushEvent,
        course: &Course,
        group_labs: bool,
    ) -> Result<Vec<Assignment>, HandlerError> {
        let names = extract_assignment_names(event);
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let known = self.store.assignments_by_course(course.id).await?;
        let mut touched = Vec::new();
        for name in &names {
            match known.iter().find(|a| &a.name == name) {
                Some(a) if a.is_group_lab == group_labs => touched.push(a.clone()),
                Some(a) => {
                    debug!(assignment = %a.name, group_lab = a.is_group_lab, "Skipping assignment for other repository kind");
                }
                None => debug!(directory = %name, "No assignment with this name"),
            }
        }
        Ok(touched)
    }

    async fn touch_activity(&self, user: UserId, course: CourseId) {
        if let Err(e) = self
            .store
            .update_last_activity(user, course, Utc::now())
            .await
        {
            warn!(user = %user, course = %course, error = %e, "Failed to update last activity");
        }
    }

    fn workspace_path(&self, course: &Course, repo: &Repository) -> PathBuf {
        self.config
            .workspace_dir
            .join(&course.org_name)
            .join(&repo.name)
    }
}

/// Collects the top-level directory of every file the push added, modified
/// or removed. Files at the repository root name no assignment.
pub fn extract_assignment_names(event: &PushEvent) -> BTreeSet<String> {
    event
        .commits
        .iter()
        .flat_map(|commit| commit.paths())
        .filter_map(|path| path.split_once('/').map(|(dir, _)| dir))
        .filter(|dir| !dir.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
struct RawDefinition {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    order: u32,
    #[serde(default)]
    is_group_lab: bool,
    #[serde(default)]
    graded_manually: bool,
    #[serde(default)]
    score_limit: u32,
    #[serde(default)]
    container_timeout_secs: Option<u64>,
    #[serde(default)]
    tasks: Vec<String>,
}

/// Reads `<dir>/<assignment>/assignment.json` for every assignment directory
/// in a tests repository checkout.
///
/// Directories without the file are skipped. A definition without a `name`
/// takes the directory name. The result is sorted by `order`, then name.
pub fn load_assignment_definitions(dir: &Path) -> Result<Vec<AssignmentDefinition>, HandlerError> {
    let unreadable = |path: &Path, e: &dyn std::fmt::Display| {
        HandlerError::Invalid(format!("cannot read {}: {}", path.display(), e))
    };

    let entries = std::fs::read_dir(dir).map_err(|e| unreadable(dir, &e))?;
    let mut definitions = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| unreadable(dir, &e))?;
        let path = entry.path().join(ASSIGNMENT_FILE);
        if !entry.path().is_dir() || !path.is_file() {
            continue;
        }

        let contents = std::fs::read(&path).map_err(|e| unreadable(&path, &e))?;
        let raw: RawDefinition =
            serde_json::from_slice(&contents).map_err(|e| unreadable(&path, &e))?;

        definitions.push(AssignmentDefinition {
            name: raw
                .name
                .unwrap_or_else(|| entry.file_name().to_string_lossy().into_owned()),
            order: raw.order,
            is_group_lab: raw.is_group_lab,
            graded_manually: raw.graded_manually,
            score_limit: raw.score_limit,
            container_timeout_secs: raw.container_timeout_secs,
            tasks: raw.tasks,
        });
    }

    definitions.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::dispatch::EventHandler;
    use crate::github::ScmError;
    use crate::runner::RunnerError;
    use crate::store::{MemoryStore, Store};
    use crate::test_utils::{Harness, group_push_event, push_event, push_event_for};
    use crate::types::{
        AssignmentId, CommitId, PrNumber, PullRequestRecord, PullRequestStage, RemoteUserId, TaskId,
        User,
    };
    use crate::webhooks::InboundEvent;

    fn write_definition(root: &Path, dir: &str, json: &str) {
        std::fs::create_dir_all(root.join(dir)).unwrap();
        std::fs::write(root.join(dir).join(ASSIGNMENT_FILE), json).unwrap();
    }

    #[test]
    fn names_are_first_path_components() {
        let InboundEvent::Push(mut event) = push_event("abc123") else {
            unreachable!()
        };
        event.commits[0].added = vec!["lab1/main.go".to_string(), "README.md".to_string()];
        event.commits[0].modified = vec!["lab1/sub/x.go".to_string()];
        event.commits[0].removed = vec!["lab2/old.go".to_string()];

        let names: Vec<_> = extract_assignment_names(&event).into_iter().collect();

        assert_eq!(names, vec!["lab1", "lab2"]);
    }

    #[test]
    fn definitions_are_read_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "lab2", r#"{"order": 2, "is_group_lab": true}"#);
        write_definition(
            dir.path(),
            "lab1",
            r#"{"name": "lab1", "order": 1, "score_limit": 80, "tasks": ["hello"]}"#,
        );
        std::fs::create_dir_all(dir.path().join("scripts")).unwrap();
        std::fs::write(dir.path().join("README.md"), "tests").unwrap();

        let definitions = load_assignment_definitions(dir.path()).unwrap();

        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].name, "lab1");
        assert_eq!(definitions[0].tasks, vec!["hello"]);
        assert_eq!(definitions[1].name, "lab2");
        assert!(definitions[1].is_group_lab);
    }

    #[test]
    fn malformed_definition_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "lab1", "{ nope");

        let err = load_assignment_definitions(dir.path()).unwrap_err();

        assert!(matches!(err, HandlerError::Invalid(ref msg) if msg.contains("lab1")));
    }

    #[tokio::test]
    async fn student_push_runs_and_publishes_to_owner() {
        let h = Harness::new();
        let mut alice = h.streams.submissions.subscribe(UserId(2)).await;

        let outcome = h.router.handle(push_event("abc123")).await.unwrap();

        assert_eq!(outcome, Outcome::Handled);
        let jobs = h.runner.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].assignment, "lab1");
        assert_eq!(jobs[0].repo, "alice-labs");
        assert_eq!(jobs[0].commit, CommitId::new("abc123"));

        let published = alice.recv().await.unwrap();
        assert_eq!(published.assignment_id, AssignmentId(1));
        assert_eq!(published.user_id, Some(UserId(2)));
        assert_eq!(published.score, 100);
        assert_eq!(h.store.snapshot().submissions.len(), 1);

        let enrollment = h.store.enrollment(UserId(2), h.course.id).await.unwrap();
        assert!(enrollment.last_activity.is_some());
    }

    #[tokio::test]
    async fn course_timeout_reaches_runner() {
        let h = Harness::with_course_timeout(120);

        h.router.handle(push_event("abc123")).await.unwrap();

        assert_eq!(h.runner.jobs()[0].timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn non_default_branch_of_user_repo_is_ignored() {
        let h = Harness::new();
        let InboundEvent::Push(mut event) = push_event("abc123") else {
            unreachable!()
        };
        event.git_ref = "refs/heads/feature".to_string();

        let outcome = h.router.handle(InboundEvent::Push(event)).await.unwrap();

        assert!(matches!(outcome, Outcome::Ignored(_)));
        assert!(h.runner.jobs().is_empty());
    }

    #[tokio::test]
    async fn group_assignments_do_not_run_in_user_repo() {
        let h = Harness::new();
        let event = push_event_for(h.repo("alice-labs"), "def456", &["lab2/go.mod"]);

        let outcome = h.router.handle(event).await.unwrap();

        assert!(matches!(outcome, Outcome::Ignored(_)));
        assert!(h.runner.jobs().is_empty());
    }

    #[tokio::test]
    async fn manual_assignment_is_recorded_without_run() {
        let h = Harness::new();
        let mut alice = h.streams.submissions.subscribe(UserId(2)).await;
        let event = push_event_for(h.repo("alice-labs"), "def456", &["lab3/report.md"]);

        h.router.handle(event).await.unwrap();

        assert!(h.runner.jobs().is_empty());
        let published = alice.recv().await.unwrap();
        assert!(published.manual_review);
        assert_eq!(published.results, None);
    }

    #[tokio::test]
    async fn runner_failure_is_reported_after_other_runs() {
        let h = Harness::new();
        h.runner.fail_next(RunnerError::Failed("compile error".to_string()));
        let event = push_event_for(
            h.repo("alice-labs"),
            "def456",
            &["lab1/main.go", "lab3/report.md"],
        );

        let err = h.router.handle(event).await.unwrap_err();

        assert!(matches!(err, HandlerError::Runner(_)));
        // lab3 is still recorded.
        assert_eq!(h.store.snapshot().submissions.len(), 1);
    }

    #[tokio::test]
    async fn group_push_publishes_to_all_members() {
        let h = Harness::new();
        let mut alice = h.streams.submissions.subscribe(UserId(2)).await;
        let mut bob = h.streams.submissions.subscribe(UserId(3)).await;
        let mut carol = h.streams.submissions.subscribe(UserId(4)).await;

        let outcome = h
            .router
            .handle(group_push_event("main", "bob", "fff000"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(h.runner.jobs()[0].assignment, "lab2");
        assert_eq!(alice.recv().await.unwrap().group_id, Some(GroupId(1)));
        assert_eq!(bob.recv().await.unwrap().group_id, Some(GroupId(1)));
        assert!(carol.try_recv().is_none());
    }

    #[tokio::test]
    async fn group_push_from_unenrolled_user_is_ignored() {
        let mut data = crate::test_utils::seed();
        data.users.push(User {
            id: UserId(9),
            login: "mallory".to_string(),
            remote_id: RemoteUserId(1009),
            is_admin: false,
        });
        let h = Harness::from_store(MemoryStore::from_seed(data));
        let mut alice = h.streams.submissions.subscribe(UserId(2)).await;

        let outcome = h
            .router
            .handle(group_push_event("main", "mallory", "bad000"))
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Ignored(_)));
        assert!(h.runner.jobs().is_empty());
        assert!(h.store.snapshot().submissions.is_empty());
        assert!(alice.try_recv().is_none());
    }

    #[tokio::test]
    async fn passing_task_branch_assigns_reviewers_and_comments() {
        let h = Harness::new();
        let repo = h.repo("group-a");
        h.store
            .create_pull_request(PullRequestRecord {
                remote_repo_id: repo.remote_id,
                number: PrNumber(7),
                issue_number: 1,
                task_id: TaskId(1),
                user_id: UserId(2),
                source_branch: "hello-task".to_string(),
                stage: PullRequestStage::Draft,
                reviewers: Vec::new(),
                feedback_comment_id: None,
            })
            .await
            .unwrap();

        h.router
            .handle(group_push_event("hello-task", "alice", "aaa111"))
            .await
            .unwrap();

        let pr = h.store.pull_request(repo.remote_id, PrNumber(7)).await.unwrap();
        assert_eq!(pr.stage, PullRequestStage::Review);
        assert_eq!(pr.reviewers, vec![UserId(1), UserId(3)]);
        assert_eq!(h.scm.reviewer_requests(), vec![(7, vec!["teacher".to_string(), "bob".to_string()])]);
        assert_eq!(pr.feedback_comment_id, Some(1));
        assert_eq!(h.scm.comments().len(), 1);

        // A second push edits the same comment and keeps the reviewers.
        h.router
            .handle(group_push_event("hello-task", "alice", "aaa222"))
            .await
            .unwrap();

        assert_eq!(h.scm.comments().len(), 1);
        assert_eq!(h.scm.comment_edits(), 1);
        assert_eq!(h.scm.reviewer_requests().len(), 1);
    }

    #[tokio::test]
    async fn task_branch_without_pull_request_still_records() {
        let h = Harness::new();

        let outcome = h
            .router
            .handle(group_push_event("scratch", "alice", "aaa111"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(h.store.snapshot().submissions.len(), 1);
        assert!(h.scm.comments().is_empty());
    }

    #[tokio::test]
    async fn tests_repo_push_upserts_definitions() {
        let h = Harness::new();
        h.scm.set_clone_fixture(
            "tests",
            vec![
                ("lab1/assignment.json", r#"{"order": 1, "score_limit": 90}"#),
                ("lab4/assignment.json", r#"{"order": 4, "tasks": ["a", "b"]}"#),
            ],
        );
        let event = push_event_for(h.repo("tests"), "ccc333", &["lab4/assignment.json"]);

        let outcome = h.router.handle(event).await.unwrap();

        assert_eq!(outcome, Outcome::Handled);
        let assignments = h.store.assignments_by_course(h.course.id).await.unwrap();
        let lab1 = assignments.iter().find(|a| a.name == "lab1").unwrap();
        assert_eq!(lab1.score_limit, 90);
        assert!(assignments.iter().any(|a| a.name == "lab4"));
    }

    #[tokio::test]
    async fn assignments_repo_push_syncs_student_forks() {
        let h = Harness::new();
        let event = push_event_for(h.repo("assignments"), "ddd444", &["lab1/README.md"]);

        let outcome = h.router.handle(event).await.unwrap();

        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(h.scm.clone_calls(), vec!["assignments".to_string()]);
        for fork in ["group-a", "alice-labs", "bob-labs"] {
            assert_eq!(h.scm.sync_calls(fork), 1, "{fork}");
        }
        assert_eq!(h.scm.sync_calls("info"), 0);
    }

    #[tokio::test]
    async fn failed_template_clone_fails_the_event() {
        let h = Harness::new();
        h.scm.fail_clone(ScmError::other(Some(404), "Not Found"));
        let event = push_event_for(h.repo("assignments"), "ddd444", &["lab1/README.md"]);

        let err = h.router.handle(event).await.unwrap_err();

        assert!(matches!(err, HandlerError::Remote(_)));
        assert_eq!(h.scm.sync_calls("alice-labs"), 0);
    }

    #[tokio::test]
    async fn info_repo_push_is_ignored() {
        let h = Harness::new();
        let event = push_event_for(h.repo("info"), "eee555", &["README.md"]);

        let outcome = h.router.handle(event).await.unwrap();

        assert!(matches!(outcome, Outcome::Ignored(_)));
    }
}
