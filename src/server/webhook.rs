//! Webhook endpoint handler.
//!
//! Verifies the delivery's signature, decodes the payload once into an
//! [`InboundEvent`](crate::webhooks::InboundEvent) and hands it to the
//! dispatcher. The response never waits for the event to be handled.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::dispatch::DispatchOutcome;
use crate::types::DeliveryId;
use crate::webhooks::{ParseError, SignatureError, parse_webhook, verify_signature};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that reject a delivery at the HTTP boundary.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing event type header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// No signature header at all.
    #[error("missing signature")]
    MissingSignature,

    /// Signature present but wrong.
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// Payload could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) | WebhookError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::MissingSignature | WebhookError::InvalidSignature(_) => {
                StatusCode::UNAUTHORIZED
            }
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Event`: Event type (e.g., "push", "pull_request")
///   - `X-Hub-Signature-256`: HMAC-SHA256 signature of the payload
/// - Optional headers:
///   - `X-GitHub-Delivery`: Delivery ID, logged for correlation
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK `accepted`: handling started in the background
/// - 200 OK `duplicate`: the same event is already being handled
/// - 200 OK `ignored`: event type or action the service does not handle
/// - 200 OK `shutting down`: the dispatcher no longer admits work
/// - 400 Bad Request: missing event header or undecodable payload
/// - 401 Unauthorized: missing or invalid signature
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT).ok_or(WebhookError::MissingHeader(HEADER_EVENT))?;
    let delivery_id = DeliveryId::new(get_header(&headers, HEADER_DELIVERY).unwrap_or("-"));

    debug!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        "Received webhook"
    );

    // Nothing is parsed before the signature checks out.
    let signature = get_header(&headers, HEADER_SIGNATURE).ok_or_else(|| {
        warn!(delivery_id = %delivery_id, "Webhook without signature");
        WebhookError::MissingSignature
    })?;
    if let Err(e) = verify_signature(&body, signature, app_state.webhook_secret()) {
        warn!(delivery_id = %delivery_id, error = %e, "Invalid webhook signature");
        return Err(e.into());
    }

    let event = match parse_webhook(event_type, &body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!(delivery_id = %delivery_id, event_type = %event_type, "Unhandled event");
            return Ok((StatusCode::OK, "ignored"));
        }
        Err(e) => {
            warn!(delivery_id = %delivery_id, event_type = %event_type, error = %e, "Malformed payload");
            return Err(e.into());
        }
    };

    let kind = event.kind();
    let key = event.dedupe_key();
    let response = match app_state.dispatcher().dispatch(event, key.clone()) {
        DispatchOutcome::Accepted => {
            info!(delivery_id = %delivery_id, event = kind, key = %key, "Webhook accepted");
            "accepted"
        }
        DispatchOutcome::Duplicate => "duplicate",
        DispatchOutcome::ShuttingDown => {
            warn!(delivery_id = %delivery_id, event = kind, "Webhook arrived during shutdown");
            "shutting down"
        }
    };
    Ok((StatusCode::OK, response))
}

/// Extracts a header value as a string.
fn get_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
