//! Webhook payload parser.
//!
//! Parses raw webhook JSON into a typed [`InboundEvent`]. The event type comes
//! from the `X-GitHub-Event` header; the payload is decoded once here and never
//! inspected dynamically again.
//!
//! # Outcomes
//!
//! - `Ok(Some(event))`: a recognised event the router handles
//! - `Ok(None)`: a recognised-but-unhandled event type or action (answered 200)
//! - `Err(_)`: malformed JSON or missing required fields (answered 400)

use serde::Deserialize;
use thiserror::Error;

use crate::types::{CommitId, InstallationId, OrgId, PrNumber, RemoteRepoId, RemoteUserId};

use super::events::{
    CommitFiles, InboundEvent, InstallationEvent, PullRequestEvent, PullRequestReviewEvent,
    PushEvent, RepoRef, ReviewState, Sender,
};

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Field has an invalid value.
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into a typed event.
///
/// ```
/// use grader_hooks::webhooks::{InboundEvent, parse_webhook};
///
/// let payload = br#"{
///     "ref": "refs/heads/main",
///     "after": "abc123",
///     "head_commit": { "id": "abc123" },
///     "repository": { "id": 1, "full_name": "course/alice-labs", "default_branch": "main" },
///     "sender": { "id": 7, "login": "alice" },
///     "commits": [{ "added": ["lab1/main.go"], "modified": [], "removed": [] }]
/// }"#;
///
/// let event = parse_webhook("push", payload).unwrap();
/// assert!(matches!(event, Some(InboundEvent::Push(_))));
/// assert!(parse_webhook("star", b"{}").unwrap().is_none());
/// ```
pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<Option<InboundEvent>, ParseError> {
    match event_type {
        "push" => parse_push(payload),
        "pull_request" => parse_pull_request(payload),
        "pull_request_review" => parse_pull_request_review(payload),
        "installation" => parse_installation(payload),
        _ => Ok(None),
    }
}

// ============================================================================
// Raw payload structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawRepository {
    id: u64,
    full_name: String,
    #[serde(default = "default_branch_name")]
    default_branch: String,
}

fn default_branch_name() -> String {
    "main".to_string()
}

impl From<RawRepository> for RepoRef {
    fn from(raw: RawRepository) -> Self {
        RepoRef {
            id: RemoteRepoId(raw.id),
            full_name: raw.full_name,
            default_branch: raw.default_branch,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: u64,
    login: String,
}

impl From<RawUser> for Sender {
    fn from(raw: RawUser) -> Self {
        Sender {
            id: RemoteUserId(raw.id),
            login: raw.login,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawOrganization {
    id: u64,
}

// ============================================================================
// push
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    head_commit: Option<RawHeadCommit>,
    repository: RawRepository,
    sender: RawUser,
    #[serde(default)]
    commits: Vec<RawCommit>,
}

#[derive(Debug, Deserialize)]
struct RawHeadCommit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
}

fn parse_push(payload: &[u8]) -> Result<Option<InboundEvent>, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;

    // Branch deletions carry no commits to grade.
    if raw.deleted {
        return Ok(None);
    }

    Ok(Some(InboundEvent::Push(PushEvent {
        repo: raw.repository.into(),
        git_ref: raw.git_ref,
        after: CommitId(raw.after),
        head_commit_id: raw.head_commit.map(|c| CommitId(c.id)),
        sender: raw.sender.into(),
        commits: raw
            .commits
            .into_iter()
            .map(|c| CommitFiles {
                added: c.added,
                modified: c.modified,
                removed: c.removed,
            })
            .collect(),
    })))
}

// ============================================================================
// pull_request
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
    sender: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    body: Option<String>,
    merged: Option<bool>,
    head: RawRef,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
}

fn parse_pull_request(payload: &[u8]) -> Result<Option<InboundEvent>, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    let event = PullRequestEvent {
        repo: raw.repository.into(),
        number: PrNumber(raw.pull_request.number),
        title: raw.pull_request.title,
        body: raw.pull_request.body.unwrap_or_default(),
        head_ref: raw.pull_request.head.ref_name,
        head_sha: CommitId(raw.pull_request.head.sha),
        merged: raw.pull_request.merged.unwrap_or(false),
        sender: raw.sender.into(),
    };

    Ok(match raw.action.as_str() {
        "opened" => Some(InboundEvent::PullRequestOpened(event)),
        "closed" => Some(InboundEvent::PullRequestClosed(event)),
        // edited, synchronize, labeled, ... are not acted on
        _ => None,
    })
}

// ============================================================================
// pull_request_review
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPullRequestReviewPayload {
    action: String,
    review: RawReview,
    pull_request: RawPullRequestMinimal,
    repository: RawRepository,
    organization: Option<RawOrganization>,
    sender: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    id: u64,
    state: String,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestMinimal {
    number: u64,
}

fn parse_review_state(state: &str) -> Result<ReviewState, ParseError> {
    // Webhooks send lowercase states, the REST API uppercase.
    match state.to_uppercase().as_str() {
        "APPROVED" => Ok(ReviewState::Approved),
        "CHANGES_REQUESTED" => Ok(ReviewState::ChangesRequested),
        "COMMENTED" => Ok(ReviewState::Commented),
        "DISMISSED" => Ok(ReviewState::Dismissed),
        "PENDING" => Ok(ReviewState::Pending),
        _ => Err(ParseError::InvalidField {
            field: "review.state",
            value: state.to_string(),
        }),
    }
}

fn parse_pull_request_review(payload: &[u8]) -> Result<Option<InboundEvent>, ParseError> {
    let raw: RawPullRequestReviewPayload = serde_json::from_slice(payload)?;

    if raw.action != "submitted" {
        return Ok(None);
    }

    Ok(Some(InboundEvent::PullRequestReviewed(PullRequestReviewEvent {
        repo: raw.repository.into(),
        org_id: raw.organization.map(|o| OrgId(o.id)),
        number: PrNumber(raw.pull_request.number),
        review_id: raw.review.id,
        state: parse_review_state(&raw.review.state)?,
        sender: raw.sender.into(),
    })))
}

// ============================================================================
// installation
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawInstallationPayload {
    action: String,
    installation: RawInstallation,
    sender: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawInstallation {
    id: u64,
    account: RawUser,
}

fn parse_installation(payload: &[u8]) -> Result<Option<InboundEvent>, ParseError> {
    let raw: RawInstallationPayload = serde_json::from_slice(payload)?;

    if raw.action != "created" {
        return Ok(None);
    }

    Ok(Some(InboundEvent::InstallationCreated(InstallationEvent {
        installation_id: InstallationId(raw.installation.id),
        account_id: OrgId(raw.installation.account.id),
        account_login: raw.installation.account.login,
        sender: raw.sender.into(),
    })))
}
