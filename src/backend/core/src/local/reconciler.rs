//! Background task that drains the outbox.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::client::LocalFirstClient;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Name used in logs
    pub name: String,
    /// Wait between passes when the remote is healthy and nothing was enqueued
    pub idle_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            name: "reconciler".to_string(),
            idle_interval: Duration::from_secs(30),
        }
    }
}

/// Handle to a running reconciler.
pub struct ReconcilerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop after the current pass and wait for the task to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.join.await;
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

pub struct Reconciler {
    client: Arc<LocalFirstClient>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(client: Arc<LocalFirstClient>, config: ReconcilerConfig) -> Self {
        Self { client, config }
    }

    /// Spawn the drain loop.
    ///
    /// A pass runs immediately, whenever a command is enqueued, and after
    /// each delay: the idle interval when the last pass was clean, otherwise
    /// the retry backoff for the number of consecutive transient failures.
    pub fn spawn(self) -> ReconcilerHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let join = tokio::spawn(async move { self.run(child).await });
        ReconcilerHandle { token, join }
    }

    async fn run(self, token: CancellationToken) {
        info!(reconciler = %self.config.name, user_id = %self.client.user(), "Reconciler started");
        let retry = self.client.retry_policy().clone();
        let mut failures: u32 = 0;

        loop {
            match self.client.reconcile_once().await {
                Ok(report) if report.is_clean() => failures = 0,
                Ok(report) => {
                    debug!(
                        reconciler = %self.config.name,
                        error = report.transient_error.as_deref().unwrap_or_default(),
                        "Remote unavailable, backing off"
                    );
                    failures = failures.saturating_add(1);
                }
                Err(e) => {
                    error!(reconciler = %self.config.name, error = %e, "Reconciliation pass failed");
                    failures = failures.saturating_add(1);
                }
            }

            let delay = if failures == 0 {
                self.config.idle_interval
            } else {
                retry.next_retry_delay(failures - 1)
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.client.wait_for_work() => {}
            }
        }

        info!(reconciler = %self.config.name, "Reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use crate::events::UserId;
    use crate::kernel::Kernel;
    use crate::local::client::ClientConfig;
    use crate::local::remote::InProcessRemote;
    use crate::local::store::InMemoryLocalStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_drains_enqueued_commands() {
        let kernel = Kernel::in_memory();
        let user = UserId::new("u1");
        let client = Arc::new(
            LocalFirstClient::open(
                user.clone(),
                Arc::new(InProcessRemote::new(kernel.clone())),
                Arc::new(InMemoryLocalStore::new()),
                ClientConfig::default(),
            )
            .await
            .unwrap(),
        );

        let handle = Reconciler::new(
            client.clone(),
            ReconcilerConfig {
                name: "test".into(),
                idle_interval: Duration::from_millis(20),
            },
        )
        .spawn();

        client
            .submit(&Command::new(
                "log_habit",
                json!({ "habitId": "walk", "done": true }),
                "k1",
            ))
            .await
            .unwrap();

        let mut drained = false;
        for _ in 0..100 {
            if client.pending().await.is_empty() && kernel.log().find_by_key(&user, "k1").await.unwrap().is_some() {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        assert!(drained);
    }
}
