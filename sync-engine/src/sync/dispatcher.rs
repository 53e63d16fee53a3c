//! SyncDispatcher — background worker that drains the mutation queue
//!
//! Waits for a wake signal (new enqueue, connectivity restored) or the
//! periodic scan tick, then dispatches pending mutations to the cloud:
//! idempotency-guard check, push, outcome handling (settle / resolve
//! conflict / backoff retry / permanent failure).
//!
//! The loop tolerates being killed at any point — every piece of resume
//! state lives in the local store, never only in memory.

use std::sync::Arc;
use tokio::sync::{Notify, watch};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::Config;
use crate::engine::FailureRegistry;
use crate::remote::RemoteStore;
use crate::store::{LocalStore, MutationEntry};
use crate::sync::backoff::BackoffPolicy;
use crate::sync::resolver::{ConflictResolver, Resolution};
use shared::sync::{MutationRequest, PushOutcome};

pub struct SyncDispatcher {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    config: Arc<Config>,
    backoff: BackoffPolicy,
    online: watch::Receiver<bool>,
    wake: Arc<Notify>,
    failures: Arc<FailureRegistry>,
    shutdown: CancellationToken,
}

impl SyncDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        config: Arc<Config>,
        online: watch::Receiver<bool>,
        wake: Arc<Notify>,
        failures: Arc<FailureRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        let backoff = BackoffPolicy::new(config.retry_base_delay_ms, config.retry_max_delay_ms);
        Self {
            store,
            remote,
            config,
            backoff,
            online,
            wake,
            failures,
            shutdown,
        }
    }

    /// Run the dispatcher loop
    ///
    /// 1. Recover entries left in flight by a crash
    /// 2. Drain the queue whenever woken, online permitting
    /// 3. Evict expired idempotency-guard entries on the scan tick
    pub async fn run(mut self) {
        tracing::info!("SyncDispatcher started");

        match self.store.recover_in_flight() {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "Recovered in-flight mutations to pending"),
            Err(e) => tracing::error!(error = %e, "Failed to recover in-flight mutations"),
        }

        let mut scan_interval =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs));
        scan_interval.tick().await; // skip immediate tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("SyncDispatcher shutting down");
                    break;
                }

                _ = self.wake.notified() => {}

                _ = scan_interval.tick() => {
                    self.evict_guards();
                }

                result = self.online.changed() => {
                    if result.is_err() {
                        tracing::info!("Connectivity channel closed, SyncDispatcher stopping");
                        break;
                    }
                }
            }

            if !*self.online.borrow() {
                continue;
            }
            self.drain_queue().await;
        }

        tracing::info!("SyncDispatcher stopped");
    }

    /// Dispatch batches until nothing is currently dispatchable
    pub(crate) async fn drain_queue(&self) {
        loop {
            if self.shutdown.is_cancelled() || !*self.online.borrow() {
                return;
            }

            let batch = match self.store.dequeue_batch(
                self.config.batch_max_items,
                self.config.batch_max_bytes,
                self.config.max_entities_in_flight,
            ) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to dequeue mutation batch");
                    return;
                }
            };

            if batch.is_empty() {
                return;
            }

            tracing::debug!(count = batch.len(), "Dispatching mutation batch");
            for entry in batch {
                self.dispatch_entry(entry).await;
            }
        }
    }

    async fn dispatch_entry(&self, entry: MutationEntry) {
        // A mutation whose outcome is already recorded settles without
        // resubmission (a prior attempt succeeded but the ack was lost)
        match self.store.guard_outcome(&entry.id) {
            Ok(Some(new_version)) => {
                tracing::debug!(
                    mutation_id = %entry.id,
                    entity_id = %entry.entity_id,
                    "Mutation already settled per idempotency guard"
                );
                self.settle(&entry, new_version);
                return;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(mutation_id = %entry.id, error = %e, "Idempotency guard lookup failed");
                return;
            }
        }

        let request = build_request(&entry);
        match self.remote.push(&request).await {
            Ok(PushOutcome::Applied { new_version }) => {
                tracing::debug!(
                    mutation_id = %entry.id,
                    entity_id = %entry.entity_id,
                    new_version,
                    "Mutation applied"
                );
                self.settle(&entry, new_version);
            }
            Ok(PushOutcome::Conflict {
                current_version,
                current_value,
            }) => {
                self.resolve_conflict(entry, current_version, current_value)
                    .await;
            }
            Ok(PushOutcome::Rejected { reason }) => {
                self.fail_permanent(&entry, &format!("rejected by cloud: {reason}"));
            }
            Err(e) if e.is_transient() => {
                self.fail_transient(&entry, &e.to_string());
            }
            Err(e) => {
                self.fail_permanent(&entry, &e.to_string());
            }
        }
    }

    /// Apply the entity-type resolution policy for a version conflict
    async fn resolve_conflict(
        &self,
        entry: MutationEntry,
        current_version: u64,
        current_value: serde_json::Value,
    ) {
        match ConflictResolver::resolve(&entry, current_version, &current_value) {
            Resolution::AlreadyApplied => {
                self.settle(&entry, current_version);
            }

            Resolution::Reject { reason } => {
                // Correct the local copy to the authoritative remote state
                if let Err(e) = self.store.overwrite_entity(
                    entry.kind,
                    &entry.entity_id,
                    current_value,
                    current_version,
                ) {
                    tracing::error!(entity_id = %entry.entity_id, error = %e, "Failed to correct local entity");
                }
                self.fail_permanent(&entry, &reason);
            }

            Resolution::Resubmit {
                payload,
                base_snapshot,
                base_version,
                reconciled,
            } => {
                if let Err(e) = self.store.overwrite_entity(
                    entry.kind,
                    &entry.entity_id,
                    reconciled,
                    base_version,
                ) {
                    tracing::error!(entity_id = %entry.entity_id, error = %e, "Failed to store reconciled entity");
                }

                let rewritten = match self.store.rewrite_in_flight(
                    entry.seq,
                    payload,
                    base_snapshot,
                    base_version,
                ) {
                    Ok(rewritten) => rewritten,
                    Err(e) => {
                        tracing::error!(mutation_id = %entry.id, error = %e, "Failed to rewrite mutation after conflict");
                        return;
                    }
                };

                tracing::info!(
                    mutation_id = %rewritten.id,
                    entity_id = %rewritten.entity_id,
                    base_version,
                    "Conflict re-expressed, resubmitting"
                );

                // One immediate resubmission; a second conflict goes back
                // through backoff so a hot entity cannot starve the loop
                let request = build_request(&rewritten);
                match self.remote.push(&request).await {
                    Ok(PushOutcome::Applied { new_version }) => self.settle(&rewritten, new_version),
                    Ok(PushOutcome::Conflict { .. }) => {
                        self.fail_transient(&rewritten, "conflict persisted after re-expression");
                    }
                    Ok(PushOutcome::Rejected { reason }) => {
                        self.fail_permanent(&rewritten, &format!("rejected by cloud: {reason}"));
                    }
                    Err(e) if e.is_transient() => self.fail_transient(&rewritten, &e.to_string()),
                    Err(e) => self.fail_permanent(&rewritten, &e.to_string()),
                }
            }
        }
    }

    fn settle(&self, entry: &MutationEntry, new_version: u64) {
        match self.store.mark_settled(entry, new_version) {
            Ok(Some(deferred)) => {
                tracing::debug!(
                    entity_id = %entry.entity_id,
                    version = deferred.version,
                    "Applied deferred pulled change after settle"
                );
            }
            Ok(None) => {}
            Err(e) => {
                // The push landed; the entry will re-settle through the
                // guard or the cloud's dedup on the next attempt
                tracing::error!(mutation_id = %entry.id, error = %e, "Failed to persist settle");
            }
        }
    }

    fn fail_transient(&self, entry: &MutationEntry, error: &str) {
        if entry.attempt_count + 1 >= self.config.max_attempts {
            self.fail_permanent(
                entry,
                &format!("retry attempts exhausted ({}): {error}", self.config.max_attempts),
            );
            return;
        }

        let next_attempt_at = self.backoff.next_attempt_at(entry.attempt_count);
        match self
            .store
            .mark_failed_transient(entry.seq, error, next_attempt_at)
        {
            Ok(attempt_count) => {
                tracing::warn!(
                    mutation_id = %entry.id,
                    entity_id = %entry.entity_id,
                    attempt_count,
                    "Mutation attempt failed, will retry: {error}"
                );
            }
            Err(e) => {
                tracing::error!(mutation_id = %entry.id, error = %e, "Failed to mark mutation for retry");
            }
        }
    }

    fn fail_permanent(&self, entry: &MutationEntry, reason: &str) {
        match self.store.mark_failed_permanent(entry.seq, reason) {
            Ok(failed) => {
                tracing::error!(
                    mutation_id = %failed.id,
                    entity_id = %failed.entity_id,
                    "Mutation permanently failed: {reason}"
                );
                self.failures.notify(&failed);
            }
            Err(e) => {
                tracing::error!(mutation_id = %entry.id, error = %e, "Failed to mark mutation permanently failed");
            }
        }
    }

    fn evict_guards(&self) {
        let retention_ms = (self.config.guard_retention_secs as i64) * 1000;
        match self.store.evict_expired_guards(retention_ms) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(count = n, "Evicted expired idempotency guard entries"),
            Err(e) => tracing::error!(error = %e, "Guard eviction failed"),
        }
    }
}

fn build_request(entry: &MutationEntry) -> MutationRequest {
    MutationRequest {
        idempotency_key: entry.id.clone(),
        business_id: entry.business_id.clone(),
        kind: entry.kind,
        entity_id: entry.entity_id.clone(),
        op: entry.op,
        payload: entry.payload.clone(),
        base_version: entry.base_version,
    }
}
