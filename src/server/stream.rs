//! Server-sent event stream of freshly recorded submissions.

use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use serde::Deserialize;
use tracing::{debug, warn};

use super::AppState;
use crate::stream::StreamService;
use crate::types::{Submission, UserId};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub user_id: u64,
}

/// Streams every submission published to `user_id` as a `submission` event
/// with a JSON body, until the client disconnects.
///
/// Opening a second stream for the same user closes the first.
pub async fn submissions_handler(
    State(app_state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user = UserId(query.user_id);
    let service = Arc::clone(&app_state.streams().submissions);
    let mut subscriber = service.subscribe(user).await;
    let release = ReleaseOnDrop {
        service,
        user,
        serial: subscriber.serial(),
    };

    let events = stream! {
        let _release = release;
        while let Some(submission) = subscriber.recv().await {
            match Event::default().event("submission").json_data(&submission) {
                Ok(event) => {
                    yield Ok::<_, Infallible>(event);
                }
                Err(e) => {
                    warn!(user = %user, error = %e, "Failed to encode submission");
                }
            }
        }
        debug!(user = %user, "Submission stream closed");
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Drops the subscription once the client goes away, unless a newer stream
/// for the same user has replaced it.
struct ReleaseOnDrop {
    service: Arc<StreamService<UserId, Submission>>,
    user: UserId,
    serial: u64,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let service = Arc::clone(&self.service);
        let (user, serial) = (self.user, self.serial);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                service.release(user, serial).await;
            });
        }
    }
}
