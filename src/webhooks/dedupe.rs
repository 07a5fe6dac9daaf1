//! Idempotency keys for webhook events.
//!
//! The provider delivers at least once and may redeliver the same logical
//! event under a new delivery ID. A key names the logical event so the
//! dispatcher can drop a redelivery while the original is still in flight.
//!
//! # Key Formats by Event Type
//!
//! - `push`: `<head-commit-id>`
//! - `pull_request.<action>`: `pull_request:<repo-id>:<number>:<action>:<head-sha>`
//! - `pull_request_review`: `pull_request_review:<repo-id>:<number>:<review-id>`
//! - `installation.created`: `installation:<installation-id>:created`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{CommitId, InstallationId, PrNumber, RemoteRepoId};

/// A key identifying one logical webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupeKey(String);

impl DedupeKey {
    /// Key for a push: the head commit itself.
    pub fn push(head_commit: &CommitId) -> Self {
        DedupeKey(head_commit.as_str().to_string())
    }

    /// Key for a pull request lifecycle event.
    pub fn pull_request(
        repo: RemoteRepoId,
        number: PrNumber,
        action: &str,
        head_sha: &CommitId,
    ) -> Self {
        DedupeKey(format!(
            "pull_request:{}:{}:{}:{}",
            repo,
            number.0,
            action,
            head_sha.as_str()
        ))
    }

    /// Key for a submitted review.
    pub fn pull_request_review(repo: RemoteRepoId, number: PrNumber, review_id: u64) -> Self {
        DedupeKey(format!(
            "pull_request_review:{}:{}:{}",
            repo, number.0, review_id
        ))
    }

    /// Key for an app installation.
    pub fn installation(id: InstallationId) -> Self {
        DedupeKey(format!("installation:{}:created", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DedupeKey {
    fn from(s: &str) -> Self {
        DedupeKey(s.to_string())
    }
}

impl From<String> for DedupeKey {
    fn from(s: String) -> Self {
        DedupeKey(s)
    }
}
