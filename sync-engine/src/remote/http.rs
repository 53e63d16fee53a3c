//! HttpRemoteStore — HTTP client for the cloud data API

use async_trait::async_trait;
use reqwest::Client;
use shared::sync::{EntityKind, MutationRequest, PullBatch, PushOutcome, TerminalContext};
use std::time::Duration;

use super::{RemoteError, RemoteStore};

/// HTTP client for the cloud sync API
pub struct HttpRemoteStore {
    client: Client,
    cloud_url: String,
    /// Identity attached to every request — explicit, never ambient
    ctx: TerminalContext,
}

impl HttpRemoteStore {
    /// Create a new client against the cloud base URL
    /// (e.g. "https://cloud.example.com").
    pub fn new(
        cloud_url: String,
        ctx: TerminalContext,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            cloud_url,
            ctx,
        })
    }

    fn map_send_error(e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn push(&self, request: &MutationRequest) -> Result<PushOutcome, RemoteError> {
        let url = format!("{}/api/terminal/mutations", self.cloud_url);

        let response = self
            .client
            .post(&url)
            .header("X-Business-Id", &self.ctx.business_id)
            .header("X-Terminal-Id", &self.ctx.terminal_id)
            .json(request)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        // Conflict and rejection are encoded in the response body, not the
        // status line — any 2xx carries a PushOutcome
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status, body });
        }

        response
            .json::<PushOutcome>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn pull(
        &self,
        kind: EntityKind,
        cursor: u64,
        limit: u32,
    ) -> Result<PullBatch, RemoteError> {
        let url = format!("{}/api/terminal/changes", self.cloud_url);

        let response = self
            .client
            .get(&url)
            .header("X-Business-Id", &self.ctx.business_id)
            .header("X-Terminal-Id", &self.ctx.terminal_id)
            .query(&[
                ("kind", kind.as_str().to_string()),
                ("after", cursor.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status, body });
        }

        response
            .json::<PullBatch>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
