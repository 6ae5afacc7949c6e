//! Background sweepers.
//!
//! Independent periodic workers: replay-cache TTL purge, approval expiry,
//! idempotency-record expiry, webhook redelivery, and ledger anchoring.
//! Each loop owns its own interval and tolerates concurrent instances, so
//! running the sweepers from several processes is safe.

use std::sync::Arc;
use std::time::Duration;

use sardis_ledger::AnchorService;
use sardis_mandate::ReplayCache;
use sardis_policy::ApprovalWorkflow;

use crate::engine::unix_now;
use crate::idempotency::IdempotencyStore;
use crate::webhook::WebhookDispatcher;

/// Intervals for each sweeper.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub replay_purge: Duration,
    pub approval_expiry: Duration,
    pub idempotency_purge: Duration,
    pub webhook_delivery: Duration,
    pub ledger_anchoring: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            replay_purge: Duration::from_secs(60),
            approval_expiry: Duration::from_secs(30),
            idempotency_purge: Duration::from_secs(300),
            webhook_delivery: Duration::from_secs(5),
            ledger_anchoring: Duration::from_secs(600),
        }
    }
}

/// Handles for the spawned sweeper tasks; dropping them detaches the
/// tasks, aborting them shuts the sweepers down.
pub struct SweeperHandles {
    pub tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SweeperHandles {
    pub fn abort_all(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Spawn all background sweepers onto the current runtime.
pub fn spawn_sweepers(
    config: SweeperConfig,
    replay: Arc<dyn ReplayCache>,
    approvals: Arc<ApprovalWorkflow>,
    idempotency: Arc<dyn IdempotencyStore>,
    webhooks: Arc<WebhookDispatcher>,
    anchors: Option<Arc<AnchorService>>,
) -> SweeperHandles {
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.replay_purge);
        loop {
            interval.tick().await;
            match replay.purge_expired(unix_now()) {
                Ok(purged) if purged > 0 => {
                    tracing::info!(purged, "purged expired replay-cache entries");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "replay purge failed"),
            }
        }
    }));

    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.approval_expiry);
        loop {
            interval.tick().await;
            if let Err(e) = approvals.sweep_expired().await {
                tracing::error!(error = %e, "approval expiry sweep failed");
            }
        }
    }));

    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.idempotency_purge);
        loop {
            interval.tick().await;
            match idempotency.purge_expired(unix_now()).await {
                Ok(purged) if purged > 0 => {
                    tracing::info!(purged, "purged expired idempotency records");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "idempotency purge failed"),
            }
        }
    }));

    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.webhook_delivery);
        loop {
            interval.tick().await;
            webhooks.process_due().await;
        }
    }));

    if let Some(anchors) = anchors {
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.ledger_anchoring);
            loop {
                interval.tick().await;
                match anchors.anchor_once().await {
                    Ok(Some(anchor)) => {
                        tracing::info!(anchor_id = %anchor.anchor_id, "ledger batch anchored");
                    }
                    Ok(None) => {}
                    Err(e) => tracing::error!(error = %e, "anchoring sweep failed"),
                }
            }
        }));
    }

    SweeperHandles { tasks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryIdempotencyStore;
    use crate::webhook::{DeliveryTransport, WebhookDispatcher};
    use async_trait::async_trait;
    use sardis_mandate::InMemoryReplayCache;
    use sardis_policy::InMemoryApprovalRepository;

    struct NullTransport;
    #[async_trait]
    impl DeliveryTransport for NullTransport {
        async fn post(
            &self,
            _url: &str,
            _body: &[u8],
            _headers: &[(String, String)],
        ) -> Result<(u16, String), String> {
            Ok((200, String::new()))
        }
    }

    #[tokio::test]
    async fn sweepers_run_and_purge() {
        let replay = Arc::new(InMemoryReplayCache::new());
        replay.check_and_insert("stale-mandate", 1).unwrap();

        let handles = spawn_sweepers(
            SweeperConfig {
                replay_purge: Duration::from_millis(5),
                approval_expiry: Duration::from_millis(5),
                idempotency_purge: Duration::from_millis(5),
                webhook_delivery: Duration::from_millis(5),
                ledger_anchoring: Duration::from_millis(5),
            },
            replay.clone(),
            Arc::new(ApprovalWorkflow::new(Arc::new(InMemoryApprovalRepository::new()))),
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::new(WebhookDispatcher::new(Arc::new(NullTransport))),
            None,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!replay.contains("stale-mandate").unwrap());
        handles.abort_all();
    }
}
