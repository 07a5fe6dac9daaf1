//! Grader Hooks - webhook ingestion and grading dispatch for course repositories.
//!
//! GitHub deliveries are verified, deduplicated and handed to a bounded
//! [`dispatch::Dispatcher`], which runs the matching handler in
//! [`handlers`]. Recorded submissions are fanned out to connected clients
//! through [`stream`].

pub mod config;
pub mod dispatch;
pub mod git;
pub mod github;
pub mod handlers;
pub mod runner;
pub mod server;
pub mod store;
pub mod stream;
pub mod types;
pub mod webhooks;

#[cfg(test)]
mod test_utils;
