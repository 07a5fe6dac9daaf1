//! Shared fixtures and fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::github::{
    COURSE_REPOSITORIES, CreatedRepository, OrgMetadata, RetryConfig, Scm, ScmError, SyncConfig,
};
use crate::handlers::{EventRouter, HandlerConfig};
use crate::runner::{RunJob, Runner, RunnerError};
use crate::store::{MemoryStore, Seed};
use crate::stream::StreamServices;
use crate::types::{
    Assignment, AssignmentId, CommitId, Course, CourseId, Enrollment, EnrollmentRole, Group,
    GroupId, InstallationId, Issue, OrgId, PrNumber, RemoteRepoId, RemoteUserId, RepoKind,
    Repository, Task, TaskId, TestResults, TestScore, User, UserId,
};
use crate::webhooks::{
    CommitFiles, InboundEvent, InstallationEvent, PullRequestEvent, PullRequestReviewEvent,
    PushEvent, RepoRef, ReviewState, Sender,
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

pub fn course() -> Course {
    Course {
        id: CourseId(1),
        name: "Operating Systems".to_string(),
        code: "DAT320".to_string(),
        org_id: OrgId(100),
        org_name: "dat320".to_string(),
        creator: UserId(1),
        runner_timeout_secs: None,
    }
}

pub fn assignment(id: u64, name: &str) -> Assignment {
    Assignment {
        id: AssignmentId(id),
        course_id: CourseId(1),
        name: name.to_string(),
        order: id as u32,
        is_group_lab: false,
        graded_manually: false,
        score_limit: 80,
        container_timeout_secs: None,
    }
}

fn user(id: u64, login: &str, is_admin: bool) -> User {
    User {
        id: UserId(id),
        login: login.to_string(),
        remote_id: RemoteUserId(1000 + id),
        is_admin,
    }
}

fn repo(remote_id: u64, name: &str, kind: RepoKind) -> Repository {
    Repository {
        remote_id: RemoteRepoId(remote_id),
        org_id: OrgId(100),
        name: name.to_string(),
        kind,
        user_id: None,
        group_id: None,
        issues: Vec::new(),
    }
}

fn enrollment(user: u64, role: EnrollmentRole) -> Enrollment {
    Enrollment {
        user_id: UserId(user),
        course_id: CourseId(1),
        role,
        last_activity: None,
    }
}

/// One course (DAT320, org 100) with a teacher, three students and a group.
///
/// | Repository | Remote ID | Kind |
/// |------------|-----------|------|
/// | `tests` | 10 | tests |
/// | `assignments` | 11 | assignments |
/// | `group-a` | 12 | group 1 (alice, bob) |
/// | `alice-labs` | 13 | user 2 |
/// | `bob-labs` | 14 | user 3 |
/// | `info` | 15 | info |
///
/// `lab1` is individual, `lab2` is a group lab with task `hello`, `lab3` is
/// graded manually.
pub fn seed() -> Seed {
    let mut group_repo = repo(12, "group-a", RepoKind::Group);
    group_repo.group_id = Some(GroupId(1));
    let mut alice_repo = repo(13, "alice-labs", RepoKind::User);
    alice_repo.user_id = Some(UserId(2));
    let mut bob_repo = repo(14, "bob-labs", RepoKind::User);
    bob_repo.user_id = Some(UserId(3));

    let mut lab2 = assignment(2, "lab2");
    lab2.is_group_lab = true;
    let mut lab3 = assignment(3, "lab3");
    lab3.graded_manually = true;

    Seed {
        courses: vec![course()],
        repositories: vec![
            repo(10, "tests", RepoKind::Tests),
            repo(11, "assignments", RepoKind::Assignments),
            group_repo,
            alice_repo,
            bob_repo,
            repo(15, "info", RepoKind::Info),
        ],
        assignments: vec![assignment(1, "lab1"), lab2, lab3],
        tasks: vec![Task {
            id: TaskId(1),
            assignment_id: AssignmentId(2),
            name: "hello".to_string(),
        }],
        users: vec![
            user(1, "teacher", true),
            user(2, "alice", false),
            user(3, "bob", false),
            user(4, "carol", false),
        ],
        enrollments: vec![
            enrollment(1, EnrollmentRole::Teacher),
            enrollment(2, EnrollmentRole::Student),
            enrollment(3, EnrollmentRole::Student),
            enrollment(4, EnrollmentRole::Student),
        ],
        groups: vec![Group {
            id: GroupId(1),
            course_id: CourseId(1),
            members: vec![UserId(2), UserId(3)],
        }],
        ..Default::default()
    }
}

fn login_remote_id(login: &str) -> RemoteUserId {
    let id = match login {
        "teacher" => 1,
        "alice" => 2,
        "bob" => 3,
        "carol" => 4,
        _ => 99,
    };
    RemoteUserId(1000 + id)
}

fn repo_ref(repo: &Repository) -> RepoRef {
    RepoRef {
        id: repo.remote_id,
        full_name: format!("dat320/{}", repo.name),
        default_branch: "main".to_string(),
    }
}

fn sender(login: &str) -> Sender {
    Sender {
        id: login_remote_id(login),
        login: login.to_string(),
    }
}

fn push(repo: &Repository, branch: &str, login: &str, commit: &str, paths: &[&str]) -> PushEvent {
    PushEvent {
        repo: repo_ref(repo),
        git_ref: format!("refs/heads/{branch}"),
        after: CommitId::new(commit),
        head_commit_id: Some(CommitId::new(commit)),
        sender: sender(login),
        commits: vec![CommitFiles {
            modified: paths.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }],
    }
}

/// A push by alice to `alice-labs` on `main` touching `lab1/main.go`.
pub fn push_event(commit: &str) -> InboundEvent {
    let mut alice_repo = repo(13, "alice-labs", RepoKind::User);
    alice_repo.user_id = Some(UserId(2));
    InboundEvent::Push(push(&alice_repo, "main", "alice", commit, &["lab1/main.go"]))
}

/// A push by alice to `repo`'s default branch touching `paths`.
pub fn push_event_for(repo: Repository, commit: &str, paths: &[&str]) -> InboundEvent {
    InboundEvent::Push(push(&repo, "main", "alice", commit, paths))
}

/// A push by `login` to `group-a` on `branch` touching `lab2/hello.go`.
pub fn group_push_event(branch: &str, login: &str, commit: &str) -> InboundEvent {
    let mut group_repo = repo(12, "group-a", RepoKind::Group);
    group_repo.group_id = Some(GroupId(1));
    InboundEvent::Push(push(&group_repo, branch, login, commit, &["lab2/hello.go"]))
}

/// A pull request by alice from `hello-task`.
pub fn pull_request_event(repo: &Repository, number: u64, body: &str, merged: bool) -> PullRequestEvent {
    PullRequestEvent {
        repo: repo_ref(repo),
        number: PrNumber(number),
        title: "Hello task".to_string(),
        body: body.to_string(),
        head_ref: "hello-task".to_string(),
        head_sha: CommitId::new("abc123"),
        merged,
        sender: sender("alice"),
    }
}

pub fn review_event(
    repo: &Repository,
    number: u64,
    state: ReviewState,
    reviewer: RemoteUserId,
) -> PullRequestReviewEvent {
    PullRequestReviewEvent {
        repo: repo_ref(repo),
        org_id: None,
        number: PrNumber(number),
        review_id: 1,
        state,
        sender: Sender {
            id: reviewer,
            login: format!("user-{reviewer}"),
        },
    }
}

pub fn installation_event(org: OrgId, login: &str, sender_id: RemoteUserId) -> InstallationEvent {
    InstallationEvent {
        installation_id: InstallationId(1),
        account_id: org,
        account_login: login.to_string(),
        sender: Sender {
            id: sender_id,
            login: format!("user-{sender_id}"),
        },
    }
}

// ─── Fake provider ───────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeScmState {
    sync_failures: HashMap<String, VecDeque<ScmError>>,
    sync_calls: HashMap<String, usize>,
    clone_failures: VecDeque<ScmError>,
    clone_calls: Vec<String>,
    clone_fixtures: HashMap<String, Vec<(String, String)>>,
    comments: Vec<(u64, String)>,
    comment_edits: usize,
    reviewer_requests: Vec<(u64, Vec<String>)>,
    orgs: HashMap<String, OrgId>,
    create_failures: VecDeque<ScmError>,
    created_batches: usize,
}

/// An [`Scm`] that records calls and fails on demand.
pub struct FakeScm {
    state: Mutex<FakeScmState>,
}

impl FakeScm {
    pub fn new() -> Self {
        let state = FakeScmState {
            orgs: HashMap::from([
                ("dat320".to_string(), OrgId(100)),
                ("dat520".to_string(), OrgId(200)),
            ]),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Queues errors returned by successive syncs of `repo`.
    pub fn fail_sync(&self, repo: &str, errors: Vec<ScmError>) {
        self.state
            .lock()
            .unwrap()
            .sync_failures
            .insert(repo.to_string(), errors.into());
    }

    pub fn sync_calls(&self, repo: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .sync_calls
            .get(repo)
            .copied()
            .unwrap_or(0)
    }

    pub fn fail_clone(&self, error: ScmError) {
        self.state.lock().unwrap().clone_failures.push_back(error);
    }

    /// Files written into the destination whenever `repo` is cloned.
    pub fn set_clone_fixture(&self, repo: &str, files: Vec<(&str, &str)>) {
        let files = files
            .into_iter()
            .map(|(path, contents)| (path.to_string(), contents.to_string()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .clone_fixtures
            .insert(repo.to_string(), files);
    }

    pub fn clone_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().clone_calls.clone()
    }

    /// Comments created, as (issue number, body).
    pub fn comments(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().comments.clone()
    }

    pub fn comment_edits(&self) -> usize {
        self.state.lock().unwrap().comment_edits
    }

    pub fn reviewer_requests(&self) -> Vec<(u64, Vec<String>)> {
        self.state.lock().unwrap().reviewer_requests.clone()
    }

    pub fn fail_create_repositories(&self, error: ScmError) {
        self.state.lock().unwrap().create_failures.push_back(error);
    }

    pub fn created_repository_batches(&self) -> usize {
        self.state.lock().unwrap().created_batches
    }
}

#[async_trait]
impl Scm for FakeScm {
    async fn sync_fork(&self, _org: &str, repo: &str, _branch: &str) -> Result<(), ScmError> {
        let mut state = self.state.lock().unwrap();
        *state.sync_calls.entry(repo.to_string()).or_default() += 1;
        match state.sync_failures.get_mut(repo).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn clone_repository(&self, _org: &str, repo: &str, dest: &Path) -> Result<(), ScmError> {
        let files = {
            let mut state = self.state.lock().unwrap();
            state.clone_calls.push(repo.to_string());
            if let Some(err) = state.clone_failures.pop_front() {
                return Err(err);
            }
            state.clone_fixtures.get(repo).cloned().unwrap_or_default()
        };

        let _ = std::fs::remove_dir_all(dest);
        std::fs::create_dir_all(dest).unwrap();
        for (path, contents) in files {
            let path = dest.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, ScmError> {
        let mut state = self.state.lock().unwrap();
        state.comments.push((number, body.to_string()));
        Ok(state.comments.len() as u64)
    }

    async fn update_issue_comment(
        &self,
        _org: &str,
        _repo: &str,
        _comment_id: u64,
        _body: &str,
    ) -> Result<(), ScmError> {
        self.state.lock().unwrap().comment_edits += 1;
        Ok(())
    }

    async fn request_reviewers(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
        reviewers: &[String],
    ) -> Result<(), ScmError> {
        self.state
            .lock()
            .unwrap()
            .reviewer_requests
            .push((number, reviewers.to_vec()));
        Ok(())
    }

    async fn get_organization(&self, login: &str) -> Result<OrgMetadata, ScmError> {
        match self.state.lock().unwrap().orgs.get(login) {
            Some(id) => Ok(OrgMetadata {
                id: *id,
                login: login.to_string(),
            }),
            None => Err(ScmError::other(Some(404), "Not Found")),
        }
    }

    async fn create_course_repositories(
        &self,
        _org: &str,
    ) -> Result<Vec<CreatedRepository>, ScmError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        state.created_batches += 1;
        Ok(COURSE_REPOSITORIES
            .iter()
            .enumerate()
            .map(|(i, (name, kind))| CreatedRepository {
                remote_id: RemoteRepoId(500 + i as u64),
                name: name.to_string(),
                kind: *kind,
            })
            .collect())
    }
}

// ─── Fake runner ─────────────────────────────────────────────────────────────

/// A [`Runner`] that records jobs and returns canned results.
///
/// The default results give task `hello` full marks.
pub struct FakeRunner {
    jobs: Mutex<Vec<RunJob>>,
    failures: Mutex<VecDeque<RunnerError>>,
    results: TestResults,
    delay: Option<Duration>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            results: TestResults {
                scores: vec![TestScore {
                    task: "hello".to_string(),
                    test_name: "TestHello".to_string(),
                    score: 10,
                    max_score: 10,
                    weight: 1,
                }],
                ..Default::default()
            },
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_results(mut self, results: TestResults) -> Self {
        self.results = results;
        self
    }

    /// Makes the next run fail with `error`.
    pub fn fail_next(&self, error: RunnerError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn jobs(&self) -> Vec<RunJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run(&self, job: &RunJob) -> Result<TestResults, RunnerError> {
        self.jobs.lock().unwrap().push(job.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.results.clone())
    }
}

// ─── Router harness ──────────────────────────────────────────────────────────

/// An [`EventRouter`] wired to a [`MemoryStore`], [`FakeScm`] and
/// [`FakeRunner`].
pub struct Harness {
    pub router: Arc<EventRouter>,
    pub store: Arc<MemoryStore>,
    pub scm: Arc<FakeScm>,
    pub runner: Arc<FakeRunner>,
    pub streams: StreamServices,
    pub course: Course,
    _workspace: TempDir,
}

impl Harness {
    /// The [`seed`] plus issue #1 (task `hello`) in `group-a`.
    pub fn new() -> Self {
        Self::from_store(MemoryStore::from_seed(harness_seed()))
    }

    /// The same fixture with a runner that takes `delay` per job.
    pub fn with_slow_runner(delay: Duration) -> Self {
        Self::with_runner(
            MemoryStore::from_seed(harness_seed()),
            FakeRunner::new().with_delay(delay),
        )
    }

    pub fn with_course_timeout(secs: u64) -> Self {
        let mut data = harness_seed();
        data.courses[0].runner_timeout_secs = Some(secs);
        Self::from_store(MemoryStore::from_seed(data))
    }

    pub fn from_store(store: MemoryStore) -> Self {
        Self::with_runner(store, FakeRunner::new())
    }

    pub fn with_runner(store: MemoryStore, runner: FakeRunner) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let store = Arc::new(store);
        let scm = Arc::new(FakeScm::new());
        let runner = Arc::new(runner);
        let streams = StreamServices::new();
        let config = HandlerConfig {
            workspace_dir: workspace.path().to_path_buf(),
            default_runner_timeout: Duration::from_secs(600),
            retry: RetryConfig::DEFAULT,
            sync: SyncConfig {
                stagger: Duration::ZERO,
                ..SyncConfig::default()
            },
        };
        let router = Arc::new(EventRouter::new(
            store.clone(),
            scm.clone(),
            runner.clone(),
            streams.clone(),
            config,
        ));
        let course = store
            .snapshot()
            .courses
            .first()
            .cloned()
            .unwrap_or_else(course);

        Self {
            router,
            store,
            scm,
            runner,
            streams,
            course,
            _workspace: workspace,
        }
    }

    /// The stored repository called `name`.
    pub fn repo(&self, name: &str) -> Repository {
        self.store
            .snapshot()
            .repositories
            .into_iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no repository {name}"))
    }
}

fn harness_seed() -> Seed {
    let mut data = seed();
    data.repositories[2].issues.push(Issue {
        number: 1,
        task_id: TaskId(1),
    });
    data
}
