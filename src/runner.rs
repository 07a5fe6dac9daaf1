//! Test execution.
//!
//! The sandbox that builds and tests student code is external. The core only
//! hands it a [`RunJob`] and a deadline; whatever the runner returns (or the
//! deadline expiring) is a handler-local outcome that is never retried.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::types::{Assignment, CommitId, Course, TestResults};

/// Errors from a test run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The run exceeded its deadline and was cancelled.
    #[error("test run timed out after {0:?}")]
    Timeout(Duration),

    /// The runner ran but reported failure.
    #[error("test run failed: {0}")]
    Failed(String),

    /// The runner's output could not be decoded.
    #[error("invalid runner output: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    /// IO error starting or talking to the runner.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunJob {
    pub org: String,
    pub repo: String,
    pub assignment: String,
    pub commit: CommitId,
    pub branch: String,
    /// Deadline for the whole run; also handed to the sandbox.
    pub timeout: Duration,
}

/// Executes the tests of one assignment for one commit.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, job: &RunJob) -> Result<TestResults, RunnerError>;
}

/// Picks the deadline for a run: the assignment's own timeout, else the
/// course's, else `default`.
pub fn job_timeout(assignment: &Assignment, course: &Course, default: Duration) -> Duration {
    assignment
        .container_timeout_secs
        .or(course.runner_timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Runs `job` under its timeout. Expiry cancels only the run.
#[instrument(skip(runner), fields(assignment = %job.assignment, commit = %job.commit.short()))]
pub async fn run_with_timeout(runner: &dyn Runner, job: &RunJob) -> Result<TestResults, RunnerError> {
    let timeout = job.timeout;
    match tokio::time::timeout(timeout, runner.run(job)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Test run timed out");
            Err(RunnerError::Timeout(timeout))
        }
    }
}

/// Runs an external command per job and reads [`TestResults`] as JSON from
/// its stdout.
///
/// The job is passed in `GRADER_ORG`, `GRADER_REPO`, `GRADER_ASSIGNMENT`,
/// `GRADER_COMMIT`, `GRADER_BRANCH` and `GRADER_TIMEOUT_SECS`. The child is
/// killed if the run is cancelled.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Runner for CommandRunner {
    async fn run(&self, job: &RunJob) -> Result<TestResults, RunnerError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .env("GRADER_ORG", &job.org)
            .env("GRADER_REPO", &job.repo)
            .env("GRADER_ASSIGNMENT", &job.assignment)
            .env("GRADER_COMMIT", job.commit.as_str())
            .env("GRADER_BRANCH", &job.branch)
            .env("GRADER_TIMEOUT_SECS", job.timeout.as_secs().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(RunnerError::Failed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr
            )));
        }

        let results: TestResults = serde_json::from_slice(&output.stdout)?;
        debug!(tests = results.scores.len(), "Runner finished");
        Ok(results)
    }
}
