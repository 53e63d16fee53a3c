//! Remote store interface
//!
//! The cloud's data API, abstracted behind a trait so the dispatcher and
//! puller can run against an in-process fake in tests.

pub mod http;

pub use http::HttpRemoteStore;

use async_trait::async_trait;
use shared::sync::{EntityKind, MutationRequest, PullBatch, PushOutcome};
use thiserror::Error;

/// Transport-level errors from the remote API
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection-level failure (refused, reset, DNS, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request timed out — the mutation may still have been applied
    /// remotely, which is why idempotency keys are mandatory
    #[error("Request timed out")]
    Timeout,

    /// Unexpected HTTP status outside the protocol's outcome encoding
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not decode as a protocol message
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Transient errors are retried with backoff; everything else is
    /// surfaced as a permanent failure
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) => false,
        }
    }
}

/// The cloud's request/response data API
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Submit one mutation, tagged with its idempotency key.
    ///
    /// A resubmission under a previously applied key must return
    /// `PushOutcome::Applied` with the version of the first application.
    async fn push(&self, request: &MutationRequest) -> Result<PushOutcome, RemoteError>;

    /// Fetch all changes of `kind` after `cursor`, up to `limit` records
    async fn pull(
        &self,
        kind: EntityKind,
        cursor: u64,
        limit: u32,
    ) -> Result<PullBatch, RemoteError>;
}
