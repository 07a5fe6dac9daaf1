//! Test results produced by the runner and the submissions recorded from them.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AssignmentId, CommitId, GroupId, UserId};

/// The score of a single test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestScore {
    /// Task the test belongs to; empty for tests outside any task.
    #[serde(default)]
    pub task: String,
    pub test_name: String,
    pub score: u32,
    pub max_score: u32,
    pub weight: u32,
}

/// Everything a runner reports for one assignment run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub scores: Vec<TestScore>,
    #[serde(default)]
    pub build_log: String,
    #[serde(default)]
    pub exec_time_ms: u64,
}

impl TestResults {
    /// Returns the weighted total in the range 0-100.
    pub fn sum(&self) -> u32 {
        self.weighted_sum(None)
    }

    /// Returns the weighted total of the tests belonging to `task`, in the range 0-100.
    ///
    /// A score above its max counts as the max. Tests with `max_score == 0`
    /// contribute nothing.
    pub fn task_sum(&self, task: &str) -> u32 {
        self.weighted_sum(Some(task))
    }

    fn weighted_sum(&self, task: Option<&str>) -> u32 {
        let selected: Vec<&TestScore> = self
            .scores
            .iter()
            .filter(|s| task.is_none_or(|t| s.task == t))
            .collect();

        let total_weight: f64 = selected.iter().map(|s| f64::from(s.weight)).sum();
        if total_weight == 0.0 {
            return 0;
        }

        let total: f64 = selected
            .iter()
            .filter(|s| s.max_score > 0)
            .map(|s| {
                let score = f64::from(s.score.min(s.max_score));
                (score / f64::from(s.max_score)) * (f64::from(s.weight) / total_weight)
            })
            .sum();

        (total * 100.0).round() as u32
    }

    /// Renders the feedback comment posted on a pull request for `task`.
    pub fn markdown_comment(&self, task: &str, score_limit: u32) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## Test results for task `{}`\n", task);
        let _ = writeln!(out, "| Test | Score | Weight |");
        let _ = writeln!(out, "|------|------:|-------:|");
        for s in self.scores.iter().filter(|s| s.task == task) {
            let _ = writeln!(
                out,
                "| {} | {}/{} | {} |",
                s.test_name, s.score, s.max_score, s.weight
            );
        }
        let sum = self.task_sum(task);
        let _ = writeln!(out, "\n**Total: {}%** (required: {}%)", sum, score_limit);
        if sum >= score_limit {
            let _ = writeln!(out, "\nAll required tests pass; reviewers will be assigned.");
        }
        out
    }
}

/// A recorded submission, also the payload streamed to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: u64,
    pub assignment_id: AssignmentId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    pub commit_id: CommitId,
    pub score: u32,
    /// True when the assignment is graded manually and nothing was run.
    pub manual_review: bool,
    #[serde(default)]
    pub results: Option<TestResults>,
    pub built_at: DateTime<Utc>,
}
