//! SyncEngine — public facade over the sync subsystem
//!
//! The terminal's business logic talks to this type only: local writes go
//! through [`SyncEngine::enqueue_local_change`] and return as soon as the
//! write+enqueue transaction commits; background workers handle everything
//! else. Permanent failures surface through registered callbacks so the UI
//! can offer a manual "resync" action.

use std::sync::Arc;
use tokio::sync::{Notify, watch};

use crate::core::{BackgroundTasks, Config, TaskKind};
use crate::remote::{HttpRemoteStore, RemoteStore};
use crate::store::{LocalStore, MutationEntry, QueueStats};
use crate::sync::{ReconciliationPuller, SyncDispatcher};
use crate::utils::{SyncError, SyncResult};
use shared::sync::{EntityKind, Operation, TerminalContext};

/// Callback invoked for every permanently failed mutation
pub type FailureCallback = Box<dyn Fn(&MutationEntry) + Send + Sync>;

/// Registry of permanent-failure callbacks
#[derive(Default)]
pub struct FailureRegistry {
    callbacks: parking_lot::Mutex<Vec<FailureCallback>>,
}

impl FailureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: FailureCallback) {
        self.callbacks.lock().push(callback);
    }

    pub fn notify(&self, entry: &MutationEntry) {
        for callback in self.callbacks.lock().iter() {
            callback(entry);
        }
    }
}

/// Offline-first sync engine for one terminal
pub struct SyncEngine {
    config: Arc<Config>,
    ctx: TerminalContext,
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    online_tx: watch::Sender<bool>,
    wake: Arc<Notify>,
    failures: Arc<FailureRegistry>,
    tasks: parking_lot::Mutex<Option<BackgroundTasks>>,
}

impl SyncEngine {
    /// Build an engine over an already-open store and remote.
    ///
    /// Starts optimistically online; [`SyncEngine::connectivity_changed`]
    /// corrects that as soon as the platform reports otherwise.
    pub fn new(
        config: Config,
        ctx: TerminalContext,
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let (online_tx, _online_rx) = watch::channel(true);
        Self {
            config: Arc::new(config),
            ctx,
            store,
            remote,
            online_tx,
            wake: Arc::new(Notify::new()),
            failures: Arc::new(FailureRegistry::new()),
            tasks: parking_lot::Mutex::new(None),
        }
    }

    /// Open the local store under `config.work_dir` and connect the HTTP
    /// remote — the production wiring.
    pub fn open(config: Config, ctx: TerminalContext) -> SyncResult<Self> {
        std::fs::create_dir_all(&config.work_dir)?;
        let store = LocalStore::open(config.db_path())?;
        let remote = HttpRemoteStore::new(
            config.cloud_url.clone(),
            ctx.clone(),
            std::time::Duration::from_millis(config.request_timeout_ms),
        )?;
        Ok(Self::new(config, ctx, store, Arc::new(remote)))
    }

    /// Spawn the dispatcher and puller workers
    pub fn start(&self) {
        let mut tasks = BackgroundTasks::new();

        let dispatcher = SyncDispatcher::new(
            self.store.clone(),
            self.remote.clone(),
            self.config.clone(),
            self.online_tx.subscribe(),
            self.wake.clone(),
            self.failures.clone(),
            tasks.shutdown_token(),
        );
        tasks.spawn("sync_dispatcher", TaskKind::Worker, dispatcher.run());

        let puller = ReconciliationPuller::new(
            self.store.clone(),
            self.remote.clone(),
            self.config.clone(),
            self.online_tx.subscribe(),
            tasks.shutdown_token(),
        );
        tasks.spawn("reconciliation_puller", TaskKind::Periodic, puller.run());

        tracing::info!(
            business_id = %self.ctx.business_id,
            terminal_id = %self.ctx.terminal_id,
            "SyncEngine started"
        );
        *self.tasks.lock() = Some(tasks);
    }

    /// Stop the background workers gracefully
    pub async fn shutdown(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }
    }

    // ========== Business-logic surface ==========

    /// Record a local write and queue it for the cloud.
    ///
    /// Returns once the write+enqueue transaction commits — a failure here
    /// means the business write itself failed, never a silently dropped
    /// mutation. The dispatcher is nudged but not waited for.
    pub fn enqueue_local_change(
        &self,
        kind: EntityKind,
        entity_id: &str,
        op: Operation,
        payload: serde_json::Value,
    ) -> SyncResult<MutationEntry> {
        if !kind.is_mutable() {
            return Err(SyncError::validation(format!(
                "{kind} is cloud-authoritative and cannot be mutated locally"
            )));
        }

        let entry = self
            .store
            .record_local_write(&self.ctx, kind, entity_id, op, payload)?;
        self.wake.notify_one();
        Ok(entry)
    }

    /// Register a callback for permanently failed mutations
    pub fn on_permanent_failure(&self, callback: impl Fn(&MutationEntry) + Send + Sync + 'static) {
        self.failures.register(Box::new(callback));
    }

    /// Platform connectivity signal — pauses/resumes dispatch and pull
    pub fn connectivity_changed(&self, is_online: bool) {
        tracing::info!(is_online, "Connectivity changed");
        let _ = self.online_tx.send(is_online);
        if is_online {
            self.wake.notify_one();
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    // ========== Operator surface ==========

    /// Queue statistics (pending badge, diagnostics screen)
    pub fn queue_stats(&self) -> SyncResult<QueueStats> {
        Ok(self.store.stats()?)
    }

    /// Mutations awaiting manual reconciliation
    pub fn permanent_failures(&self) -> SyncResult<Vec<MutationEntry>> {
        Ok(self.store.permanent_failures()?)
    }

    /// Operator "resync" action: put a permanently failed mutation back in
    /// the queue with fresh bookkeeping
    pub fn requeue_permanent_failure(&self, mutation_id: &str) -> SyncResult<MutationEntry> {
        let entry = self.store.requeue_permanent_failure(mutation_id)?;
        self.wake.notify_one();
        Ok(entry)
    }

    /// Operator discard: drop a permanently failed mutation, unblocking the
    /// entity's newer mutations
    pub fn discard_permanent_failure(&self, mutation_id: &str) -> SyncResult<()> {
        self.store.discard_permanent_failure(mutation_id)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Direct read access to the local store (UI queries)
    pub fn store(&self) -> &LocalStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use shared::sync::{MutationRequest, PullBatch, PushOutcome};

    struct NullRemote;

    #[async_trait]
    impl RemoteStore for NullRemote {
        async fn push(&self, _request: &MutationRequest) -> Result<PushOutcome, RemoteError> {
            Err(RemoteError::Transport("offline".to_string()))
        }

        async fn pull(
            &self,
            _kind: EntityKind,
            _cursor: u64,
            _limit: u32,
        ) -> Result<PullBatch, RemoteError> {
            Err(RemoteError::Transport("offline".to_string()))
        }
    }

    fn test_engine() -> SyncEngine {
        let config = Config::with_overrides("/tmp/unused", "http://unused");
        let ctx = TerminalContext {
            business_id: "biz-1".to_string(),
            terminal_id: "terminal-1".to_string(),
        };
        let store = LocalStore::open_in_memory().unwrap();
        SyncEngine::new(config, ctx, store, Arc::new(NullRemote))
    }

    #[tokio::test]
    async fn test_enqueue_returns_after_local_commit() {
        let engine = test_engine();

        let order = shared::models::Order {
            id: "order-1".to_string(),
            order_number: 101,
            status: shared::models::OrderStatus::Open,
            customer_id: None,
            customer_name: Some("Dana".to_string()),
            customer_phone: None,
            is_paid: false,
            total_amount: 18.5,
            note: None,
            version: 0,
            created_at: shared::util::now_millis(),
            updated_at: shared::util::now_millis(),
        };
        let entry = engine
            .enqueue_local_change(
                EntityKind::Order,
                &order.id,
                Operation::Create,
                serde_json::to_value(&order).unwrap(),
            )
            .unwrap();
        assert_eq!(entry.business_id, "biz-1");

        let stats = engine.queue_stats().unwrap();
        assert_eq!(stats.pending, 1);

        let record = engine
            .store()
            .get_entity(EntityKind::Order, "order-1")
            .unwrap()
            .unwrap();
        assert_eq!(record.version, 1);
        let stored: shared::models::Order = serde_json::from_value(record.value).unwrap();
        assert_eq!(stored.status, shared::models::OrderStatus::Open);
        assert_eq!(stored.customer_name.as_deref(), Some("Dana"));
    }

    #[tokio::test]
    async fn test_cloud_authoritative_kinds_are_not_mutable() {
        let engine = test_engine();

        let result = engine.enqueue_local_change(
            EntityKind::MenuItem,
            "latte",
            Operation::Update,
            serde_json::json!({"price": 9.0}),
        );
        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(engine.queue_stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_connectivity_signal_round_trip() {
        let engine = test_engine();
        assert!(engine.is_online());
        engine.connectivity_changed(false);
        assert!(!engine.is_online());
        engine.connectivity_changed(true);
        assert!(engine.is_online());
    }
}
