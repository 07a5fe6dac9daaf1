//! Live result streaming.
//!
//! Freshly recorded submissions are pushed to connected clients through a
//! [`StreamService`] keyed by user ID; nothing is buffered for clients that
//! are not connected.

mod service;

use std::sync::Arc;

use crate::types::{Submission, UserId};

pub use service::{StreamService, Subscriber};

/// The streams the service publishes.
#[derive(Clone, Default)]
pub struct StreamServices {
    pub submissions: Arc<StreamService<UserId, Submission>>,
}

impl StreamServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends every open stream, so connections held by clients can finish.
    pub async fn close(&self) {
        self.submissions.close_all().await;
    }
}
