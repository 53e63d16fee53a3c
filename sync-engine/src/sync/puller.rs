//! ReconciliationPuller — keeps cloud-authoritative state fresh locally
//!
//! Periodic (and reconnect-triggered) pull of menu, option, inventory and
//! loyalty changes since the persisted per-kind cursor. The cursor only
//! advances after a page is durably applied, so a restart resumes instead of
//! re-pulling everything; a failed pull leaves it untouched and retries with
//! the dispatcher's backoff strategy.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::Config;
use crate::remote::RemoteStore;
use crate::store::LocalStore;
use crate::sync::backoff::BackoffPolicy;
use crate::utils::SyncResult;
use shared::sync::EntityKind;
use shared::util::now_millis;

pub struct ReconciliationPuller {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    config: Arc<Config>,
    backoff: BackoffPolicy,
    online: watch::Receiver<bool>,
    shutdown: CancellationToken,
}

impl ReconciliationPuller {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        config: Arc<Config>,
        online: watch::Receiver<bool>,
        shutdown: CancellationToken,
    ) -> Self {
        let backoff = BackoffPolicy::new(config.retry_base_delay_ms, config.retry_max_delay_ms);
        Self {
            store,
            remote,
            config,
            backoff,
            online,
            shutdown,
        }
    }

    /// Run the puller loop
    pub async fn run(mut self) {
        tracing::info!("ReconciliationPuller started");

        let mut pull_interval =
            tokio::time::interval(Duration::from_secs(self.config.pull_interval_secs));
        let mut failure_count: u32 = 0;
        let mut next_retry_at: i64 = 0;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("ReconciliationPuller shutting down");
                    break;
                }

                _ = pull_interval.tick() => {}

                result = self.online.changed() => {
                    if result.is_err() {
                        tracing::info!("Connectivity channel closed, ReconciliationPuller stopping");
                        break;
                    }
                    // Reconnect triggers an immediate pull; going offline
                    // just parks the loop until the next signal
                }
            }

            if !*self.online.borrow() {
                continue;
            }
            if now_millis() < next_retry_at {
                continue;
            }

            match self.pull_all().await {
                Ok(total) => {
                    failure_count = 0;
                    next_retry_at = 0;
                    if total > 0 {
                        tracing::info!(changes = total, "Reconciliation pull complete");
                    }
                }
                Err(e) => {
                    next_retry_at = self.backoff.next_attempt_at(failure_count);
                    failure_count += 1;
                    tracing::warn!(
                        failure_count,
                        error = %e,
                        "Reconciliation pull failed, cursor unchanged"
                    );
                }
            }
        }

        tracing::info!("ReconciliationPuller stopped");
    }

    /// Pull every cloud-authoritative kind once
    pub(crate) async fn pull_all(&self) -> SyncResult<usize> {
        let mut total = 0;
        for &kind in EntityKind::PULLED {
            total += self.pull_kind(kind).await?;
        }
        Ok(total)
    }

    /// Pull one kind, page by page, until a short page arrives
    pub(crate) async fn pull_kind(&self, kind: EntityKind) -> SyncResult<usize> {
        let mut total = 0;
        loop {
            let cursor = self.store.get_cursor(kind)?;
            let batch = self
                .remote
                .pull(kind, cursor, self.config.pull_page_limit)
                .await?;

            if batch.changes.is_empty() {
                break;
            }

            let page_len = batch.changes.len();
            let stats = self
                .store
                .apply_remote_changes(&batch.changes, kind, batch.cursor)?;
            tracing::debug!(
                kind = %kind,
                applied = stats.applied,
                deferred = stats.deferred,
                deleted = stats.deleted,
                cursor = batch.cursor,
                "Applied pulled changes"
            );
            total += page_len;

            if (page_len as u32) < self.config.pull_page_limit {
                break;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use shared::sync::{MutationRequest, Operation, PullBatch, PushOutcome, RemoteChange, TerminalContext};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Cloud fake for the pull side: a per-kind change log served in pages
    #[derive(Default)]
    struct FakeFeed {
        changes: Mutex<Vec<RemoteChange>>,
        fail_pulls: AtomicBool,
        pull_count: Mutex<u32>,
    }

    impl FakeFeed {
        fn publish(&self, kind: EntityKind, entity_id: &str, value: serde_json::Value, version: u64) {
            self.changes.lock().push(RemoteChange {
                kind,
                entity_id: entity_id.to_string(),
                value,
                version,
                deleted: false,
            });
        }
    }

    #[async_trait]
    impl RemoteStore for FakeFeed {
        async fn push(&self, _request: &MutationRequest) -> Result<PushOutcome, RemoteError> {
            unreachable!("puller never pushes")
        }

        async fn pull(
            &self,
            kind: EntityKind,
            cursor: u64,
            limit: u32,
        ) -> Result<PullBatch, RemoteError> {
            *self.pull_count.lock() += 1;
            if self.fail_pulls.load(Ordering::SeqCst) {
                return Err(RemoteError::Transport("unreachable".to_string()));
            }

            let changes: Vec<RemoteChange> = self
                .changes
                .lock()
                .iter()
                .filter(|c| c.kind == kind && c.version > cursor)
                .take(limit as usize)
                .cloned()
                .collect();
            let new_cursor = changes.iter().map(|c| c.version).max().unwrap_or(cursor);
            Ok(PullBatch {
                changes,
                cursor: new_cursor,
            })
        }
    }

    fn puller_with(store: LocalStore, feed: Arc<FakeFeed>, page_limit: u32) -> ReconciliationPuller {
        let mut config = Config::with_overrides("/tmp/unused", "http://unused");
        config.pull_page_limit = page_limit;
        let (online_tx, online_rx) = watch::channel(true);
        std::mem::drop(online_tx);
        ReconciliationPuller::new(
            store,
            feed,
            Arc::new(config),
            online_rx,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_pull_applies_changes_and_is_idempotent() {
        let store = LocalStore::open_in_memory().unwrap();
        let feed = Arc::new(FakeFeed::default());
        let latte = shared::models::MenuItem {
            id: "latte".to_string(),
            name: "Latte".to_string(),
            category: "coffee".to_string(),
            price: 4.5,
            is_active: true,
            kds_routing: Some("bar".to_string()),
            sort_order: 1,
            version: 3,
            created_at: 0,
            updated_at: 0,
        };
        feed.publish(
            EntityKind::MenuItem,
            "latte",
            serde_json::to_value(&latte).unwrap(),
            3,
        );
        feed.publish(
            EntityKind::InventoryItem,
            "milk",
            serde_json::json!({"name": "Milk", "on_hand": 24}),
            7,
        );

        let puller = puller_with(store.clone(), feed.clone(), 100);
        assert_eq!(puller.pull_all().await.unwrap(), 2);
        assert_eq!(store.get_cursor(EntityKind::MenuItem).unwrap(), 3);
        assert_eq!(store.get_cursor(EntityKind::InventoryItem).unwrap(), 7);

        let record = store.get_entity(EntityKind::MenuItem, "latte").unwrap().unwrap();
        let stored: shared::models::MenuItem = serde_json::from_value(record.value.clone()).unwrap();
        assert_eq!(stored.price, 4.5);
        assert_eq!(stored.kds_routing.as_deref(), Some("bar"));

        // No new remote changes: pulling again is a no-op
        assert_eq!(puller.pull_all().await.unwrap(), 0);
        assert_eq!(store.get_cursor(EntityKind::MenuItem).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_pull_pages_until_short_page() {
        let store = LocalStore::open_in_memory().unwrap();
        let feed = Arc::new(FakeFeed::default());
        for i in 1..=5u64 {
            feed.publish(
                EntityKind::MenuItem,
                &format!("item-{i}"),
                serde_json::json!({"name": format!("Item {i}")}),
                i,
            );
        }

        let puller = puller_with(store.clone(), feed.clone(), 2);
        assert_eq!(puller.pull_kind(EntityKind::MenuItem).await.unwrap(), 5);
        assert_eq!(store.get_cursor(EntityKind::MenuItem).unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failed_pull_leaves_cursor_unchanged() {
        let store = LocalStore::open_in_memory().unwrap();
        let feed = Arc::new(FakeFeed::default());
        feed.publish(
            EntityKind::MenuItem,
            "latte",
            serde_json::json!({"name": "Latte"}),
            3,
        );

        let puller = puller_with(store.clone(), feed.clone(), 100);
        assert_eq!(puller.pull_all().await.unwrap(), 1);

        feed.publish(
            EntityKind::MenuItem,
            "mocha",
            serde_json::json!({"name": "Mocha"}),
            4,
        );
        feed.fail_pulls.store(true, Ordering::SeqCst);
        assert!(puller.pull_all().await.is_err());
        assert_eq!(store.get_cursor(EntityKind::MenuItem).unwrap(), 3);

        // Recovery resumes from the persisted cursor
        feed.fail_pulls.store(false, Ordering::SeqCst);
        assert_eq!(puller.pull_all().await.unwrap(), 1);
        assert_eq!(store.get_cursor(EntityKind::MenuItem).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_pull_defers_entity_with_outstanding_mutation() {
        let store = LocalStore::open_in_memory().unwrap();
        let ctx = TerminalContext {
            business_id: "biz-1".to_string(),
            terminal_id: "t-1".to_string(),
        };
        store
            .record_local_write(
                &ctx,
                EntityKind::InventoryItem,
                "milk",
                Operation::Create,
                serde_json::json!({"name": "Milk", "on_hand": 10}),
            )
            .unwrap();

        let feed = Arc::new(FakeFeed::default());
        feed.publish(
            EntityKind::InventoryItem,
            "milk",
            serde_json::json!({"name": "Milk", "on_hand": 6}),
            9,
        );

        let puller = puller_with(store.clone(), feed.clone(), 100);
        puller.pull_all().await.unwrap();

        // Cursor advanced, but the local copy still shows the queued write
        assert_eq!(store.get_cursor(EntityKind::InventoryItem).unwrap(), 9);
        let record = store
            .get_entity(EntityKind::InventoryItem, "milk")
            .unwrap()
            .unwrap();
        assert_eq!(record.value["on_hand"], 10);
        assert_eq!(store.stats().unwrap().deferred_changes, 1);
    }
}
