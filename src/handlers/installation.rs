//! Handler for `installation` events: bootstrapping a course.
//!
//! Installing the app on an organization creates the course repositories
//! and the course record. Only administrators may do this, and only once
//! per organization.

use tracing::{info, instrument};

use crate::types::{Course, CourseId, Repository};
use crate::webhooks::InstallationEvent;

use super::{EventRouter, HandlerError, Outcome};

impl EventRouter {
    #[instrument(skip_all, fields(org = %event.account_login, sender = %event.sender.login))]
    pub(super) async fn handle_installation(
        &self,
        event: InstallationEvent,
    ) -> Result<Outcome, HandlerError> {
        let admin = match self.store.user_by_remote_id(event.sender.id).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                return Err(HandlerError::NotPermitted(format!(
                    "unknown user {}",
                    event.sender.login
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if !admin.is_admin {
            return Err(HandlerError::NotPermitted(format!(
                "{} is not an administrator",
                admin.login
            )));
        }

        match self.store.course_by_org_id(event.account_id).await {
            Ok(course) => {
                return Err(HandlerError::AlreadyExists(format!(
                    "course {} for organization {}",
                    course.code, event.account_login
                )));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let org = self
            .remote(|| self.scm.get_organization(&event.account_login))
            .await?;

        // Not retried; creation is not idempotent.
        let created = self.scm.create_course_repositories(&org.login).await?;

        let repos = created
            .into_iter()
            .map(|r| Repository {
                remote_id: r.remote_id,
                org_id: org.id,
                name: r.name,
                kind: r.kind,
                user_id: None,
                group_id: None,
                issues: Vec::new(),
            })
            .collect();

        let course = self
            .store
            .create_course(
                Course {
                    id: CourseId(0),
                    name: org.login.clone(),
                    code: org.login.to_uppercase(),
                    org_id: org.id,
                    org_name: org.login.clone(),
                    creator: admin.id,
                    runner_timeout_secs: None,
                },
                repos,
            )
            .await?;

        info!(course = %course.id, code = %course.code, "Created course");
        Ok(Outcome::Handled)
    }
}
