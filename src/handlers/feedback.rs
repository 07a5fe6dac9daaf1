//! Pull request feedback for group task branches.
//!
//! After a run on a task branch, the pull request for that branch gets a
//! results comment (edited in place on later pushes). Once the linked task
//! reaches the assignment's score limit, one teacher and one fellow group
//! member are requested as reviewers, each chosen by least current review
//! load.

use std::collections::HashMap;

use tracing::{debug, info, instrument};

use crate::types::{
    Assignment, Course, PullRequestRecord, PullRequestStage, Repository, TestResults, UserId,
};
use crate::webhooks::PushEvent;

use super::{EventRouter, HandlerError};

impl EventRouter {
    #[instrument(skip_all, fields(branch = %event.branch(), assignment = %assignment.name))]
    pub(super) async fn update_pull_request_feedback(
        &self,
        event: &PushEvent,
        repo: &Repository,
        course: &Course,
        assignment: &Assignment,
        results: &TestResults,
    ) -> Result<(), HandlerError> {
        let mut pr = match self
            .store
            .pull_request_by_branch(repo.remote_id, event.branch())
            .await
        {
            Ok(pr) => pr,
            Err(e) if e.is_not_found() => {
                debug!("No pull request for branch");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let task = self.store.task(pr.task_id).await?;
        if task.assignment_id != assignment.id {
            debug!(task = %task.name, "Pull request belongs to another assignment");
            return Ok(());
        }

        let score = results.task_sum(&task.name);
        debug!(pr = %pr.number, task = %task.name, score, limit = assignment.score_limit, "Task score");
        if score >= assignment.score_limit && !pr.has_reviewers() {
            self.assign_reviewers(course, repo, &mut pr).await?;
        }

        let body = results.markdown_comment(&task.name, assignment.score_limit);
        let number = pr.number.0;
        match pr.feedback_comment_id {
            Some(comment_id) => {
                self.remote(|| {
                    self.scm
                        .update_issue_comment(&course.org_name, &repo.name, comment_id, &body)
                })
                .await?;
            }
            None => {
                let comment_id = self
                    .remote(|| {
                        self.scm
                            .create_issue_comment(&course.org_name, &repo.name, number, &body)
                    })
                    .await?;
                pr.feedback_comment_id = Some(comment_id);
                self.store.update_pull_request(pr).await?;
            }
        }
        Ok(())
    }

    async fn assign_reviewers(
        &self,
        course: &Course,
        repo: &Repository,
        pr: &mut PullRequestRecord,
    ) -> Result<(), HandlerError> {
        let teachers: Vec<UserId> = self
            .store
            .enrollments_by_course(course.id)
            .await?
            .into_iter()
            .filter(|e| e.is_teacher())
            .map(|e| e.user_id)
            .collect();

        let group_id = repo.group_id.ok_or_else(|| {
            HandlerError::Invalid(format!("group repository {} has no group", repo.name))
        })?;
        let students: Vec<UserId> = self
            .store
            .group(group_id)
            .await?
            .members
            .into_iter()
            .filter(|member| *member != pr.user_id)
            .collect();

        let candidates: Vec<UserId> = teachers.iter().chain(&students).copied().collect();
        let load = self.store.review_load(&candidates).await?;

        let teacher = least_loaded(&teachers, &load).ok_or_else(|| {
            HandlerError::Invalid(format!("course {} has no teachers", course.code))
        })?;
        let mut reviewers = vec![teacher];
        match least_loaded(&students, &load) {
            Some(student) => reviewers.push(student),
            None => debug!("No other group member to review"),
        }

        let mut logins = Vec::with_capacity(reviewers.len());
        for id in &reviewers {
            logins.push(self.store.user(*id).await?.login);
        }

        let number = pr.number.0;
        self.remote(|| {
            self.scm
                .request_reviewers(&course.org_name, &repo.name, number, &logins)
        })
        .await?;
        info!(pr = %pr.number, reviewers = ?logins, "Requested reviews");

        pr.reviewers = reviewers;
        pr.stage = PullRequestStage::Review;
        self.store.update_pull_request(pr.clone()).await?;
        Ok(())
    }
}

/// The candidate with the fewest open reviews; ties go to the lowest ID.
fn least_loaded(candidates: &[UserId], load: &HashMap<UserId, usize>) -> Option<UserId> {
    candidates
        .iter()
        .copied()
        .min_by_key(|id| (load.get(id).copied().unwrap_or(0), *id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_loaded_prefers_fewest_reviews() {
        let load = HashMap::from([(UserId(1), 3), (UserId(2), 1), (UserId(3), 1)]);

        assert_eq!(least_loaded(&[UserId(1), UserId(2), UserId(3)], &load), Some(UserId(2)));
        assert_eq!(least_loaded(&[UserId(1)], &load), Some(UserId(1)));
        assert_eq!(least_loaded(&[], &load), None);
    }

    #[test]
    fn unknown_candidates_count_as_idle() {
        let load = HashMap::from([(UserId(1), 2)]);

        assert_eq!(least_loaded(&[UserId(1), UserId(9)], &load), Some(UserId(9)));
    }
}
