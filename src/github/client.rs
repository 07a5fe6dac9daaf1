//! Octocrab-backed implementation of [`Scm`].

use std::path::Path;

use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::json;
use tracing::{debug, instrument};

use crate::git;
use crate::types::{OrgId, RemoteRepoId};

use super::error::{ScmError, from_response, is_rate_limit_error, is_secondary_rate_limit};
use super::{COURSE_REPOSITORIES, CreatedRepository, OrgMetadata, Scm};

/// A GitHub API client authenticated with a single token.
#[derive(Clone)]
pub struct OctocrabScm {
    /// The underlying octocrab client.
    client: Octocrab,

    /// Token reused for authenticated `git clone` URLs.
    token: String,
}

impl OctocrabScm {
    /// Creates a client from a GitHub token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let token = token.into();
        let client = Octocrab::builder().personal_token(token.clone()).build()?;
        Ok(Self { client, token })
    }

    /// Returns a reference to the underlying octocrab client.
    pub fn inner(&self) -> &Octocrab {
        &self.client
    }

    /// Converts an octocrab error into a classified [`ScmError`].
    ///
    /// Typed octocrab errors don't carry response headers, so for a primary
    /// rate limit the reset time is fetched from the rate limit endpoint
    /// (which does not count against the quota).
    async fn classify_error(&self, err: octocrab::Error) -> ScmError {
        let (status, message) = match &err {
            octocrab::Error::GitHub { source, .. } => {
                (source.status_code.as_u16(), source.message.clone())
            }
            other => return ScmError::other(None, other.to_string()),
        };

        let throttled = status == 403 || status == 429;
        if throttled && is_rate_limit_error(&message) && !is_secondary_rate_limit(&message) {
            let reset = match self.client.ratelimit().get().await {
                Ok(limits) => Some(limits.resources.core.reset as i64),
                Err(e) => {
                    debug!(error = %e, "Could not fetch rate limit reset time");
                    None
                }
            };
            return from_response(status, &message, Some(0), reset, None);
        }

        from_response(status, &message, None, None, None)
    }
}

impl std::fmt::Debug for OctocrabScm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabScm").finish_non_exhaustive()
    }
}

#[async_trait]
impl Scm for OctocrabScm {
    #[instrument(skip(self))]
    async fn sync_fork(&self, org: &str, repo: &str, branch: &str) -> Result<(), ScmError> {
        let route = format!("/repos/{org}/{repo}/merge-upstream");
        let result: Result<serde_json::Value, _> = self
            .client
            .post(route, Some(&json!({ "branch": branch })))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.classify_error(e).await),
        }
    }

    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn clone_repository(&self, org: &str, repo: &str, dest: &Path) -> Result<(), ScmError> {
        let url = git::clone_url(&self.token, org, repo);
        let dest = dest.to_path_buf();
        let head = tokio::task::spawn_blocking(move || {
            git::clone_fresh(&url, &dest)?;
            git::head_commit(&dest)
        })
        .await
        .map_err(|e| ScmError::other(None, format!("clone task failed: {e}")))?
        .map_err(|e| ScmError::other(None, e.to_string()))?;
        debug!(org, repo, head = %head, "Cloned repository");
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, ScmError> {
        match self.client.issues(org, repo).create_comment(number, body).await {
            Ok(comment) => Ok(comment.id.0),
            Err(e) => Err(self.classify_error(e).await),
        }
    }

    async fn update_issue_comment(
        &self,
        org: &str,
        repo: &str,
        comment_id: u64,
        body: &str,
    ) -> Result<(), ScmError> {
        match self
            .client
            .issues(org, repo)
            .update_comment(octocrab::models::CommentId(comment_id), body)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(self.classify_error(e).await),
        }
    }

    async fn request_reviewers(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        reviewers: &[String],
    ) -> Result<(), ScmError> {
        match self
            .client
            .pulls(org, repo)
            .request_reviews(number, reviewers.to_vec(), Vec::<String>::new())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(self.classify_error(e).await),
        }
    }

    async fn get_organization(&self, login: &str) -> Result<OrgMetadata, ScmError> {
        match self.client.orgs(login).get().await {
            Ok(org) => Ok(OrgMetadata {
                id: OrgId(org.id.0),
                login: org.login,
            }),
            Err(e) => Err(self.classify_error(e).await),
        }
    }

    #[instrument(skip(self))]
    async fn create_course_repositories(
        &self,
        org: &str,
    ) -> Result<Vec<CreatedRepository>, ScmError> {
        let route = format!("/orgs/{org}/repos");
        let mut created = Vec::with_capacity(COURSE_REPOSITORIES.len());

        for (name, kind) in COURSE_REPOSITORIES {
            let body = json!({ "name": name, "private": true, "auto_init": true });
            let result: Result<octocrab::models::Repository, _> =
                self.client.post(&route, Some(&body)).await;
            match result {
                Ok(repo) => created.push(CreatedRepository {
                    remote_id: RemoteRepoId(repo.id.0),
                    name: repo.name,
                    kind,
                }),
                Err(e) => return Err(self.classify_error(e).await),
            }
        }

        Ok(created)
    }
}
