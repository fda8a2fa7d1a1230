//! Access to the authoritative remote event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::commands::{Command, CommandOutcome};
use crate::error::{ErrorResponse, KernelError, Result};
use crate::events::{EventQuery, StoredEvent, UserId};
use crate::kernel::Kernel;

/// Header carrying the caller's identity.
pub const USER_HEADER: &str = "x-user-id";

/// The authoritative log, as seen by a client.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    /// Submit a command; the remote applies its own idempotency check.
    async fn submit(&self, user: &UserId, command: &Command) -> Result<CommandOutcome>;

    /// Fetch the remote log in order, optionally from `since`.
    async fn fetch(&self, user: &UserId, since: Option<DateTime<Utc>>) -> Result<Vec<StoredEvent>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Process
// ═══════════════════════════════════════════════════════════════════════════════

/// A kernel in the same process acting as the remote.
#[derive(Clone)]
pub struct InProcessRemote {
    kernel: Kernel,
}

impl InProcessRemote {
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }
}

#[async_trait]
impl RemoteLog for InProcessRemote {
    async fn submit(&self, user: &UserId, command: &Command) -> Result<CommandOutcome> {
        self.kernel.submit(user, command).await
    }

    async fn fetch(&self, user: &UserId, since: Option<DateTime<Utc>>) -> Result<Vec<StoredEvent>> {
        let query = EventQuery {
            since,
            idempotency_key: None,
        };
        self.kernel.events(user, &query).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub command: Command,
}

/// Client for the kernel's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Turn a non-success response into the remote's own error.
    async fn error_from(response: reqwest::Response) -> KernelError {
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(body) => KernelError::from(body),
            Err(e) if status.is_server_error() => {
                KernelError::storage_unavailable(format!("remote returned {}: {}", status, e))
            }
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl RemoteLog for HttpRemote {
    #[instrument(skip(self, command), fields(user_id = %user, key = %command.idempotency_key))]
    async fn submit(&self, user: &UserId, command: &Command) -> Result<CommandOutcome> {
        let response = self
            .client
            .post(format!("{}/v1/commands", self.base_url))
            .header(USER_HEADER, user.as_str())
            .json(&SubmitRequest {
                command: command.clone(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }

    #[instrument(skip(self), fields(user_id = %user))]
    async fn fetch(&self, user: &UserId, since: Option<DateTime<Utc>>) -> Result<Vec<StoredEvent>> {
        let mut request = self
            .client
            .get(format!("{}/v1/events", self.base_url))
            .header(USER_HEADER, user.as_str());
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json().await?)
    }
}
