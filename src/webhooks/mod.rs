//! Webhook handling for provider events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - The typed [`InboundEvent`] sum type and its payload parser
//! - Idempotency keys for dropping redeliveries

pub mod dedupe;
pub mod events;
pub mod parser;
pub mod signature;

pub use dedupe::DedupeKey;
pub use events::{
    CommitFiles, InboundEvent, InstallationEvent, PullRequestEvent, PullRequestReviewEvent,
    PushEvent, RepoRef, ReviewState, Sender,
};
pub use parser::{ParseError, parse_webhook};
pub use signature::{
    SignatureError, compute_signature, parse_signature_header, sign_payload, verify_signature,
};
