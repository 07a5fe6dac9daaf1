//! Core domain types for the grading webhook pipeline.

pub mod course;
pub mod ids;
pub mod results;

pub use course::{
    Assignment, AssignmentDefinition, Course, Enrollment, EnrollmentRole, Group, Issue,
    PullRequestRecord, PullRequestStage, RepoKind, Repository, Task, User,
};
pub use ids::{
    AssignmentId, CommitId, CourseId, DeliveryId, GroupId, InstallationId, OrgId, PrNumber,
    RemoteRepoId, RemoteUserId, TaskId, UserId,
};
pub use results::{Submission, TestResults, TestScore};
