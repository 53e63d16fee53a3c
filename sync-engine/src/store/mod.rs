//! redb-based local store for the terminal
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `entities` | `(kind, entity_id)` | `VersionedRecord` | Local copy of business entities |
//! | `mutation_queue` | `seq` | `MutationEntry` | Pending outbound changes (FIFO) |
//! | `idempotency_guard` | `mutation_id` | `GuardEntry` | Settled-mutation dedup index |
//! | `cursors` | `kind` | `u64` | Reconciliation pull cursors |
//! | `deferred_changes` | `(kind, entity_id)` | `RemoteChange` | Pulled changes held back by outbound mutations |
//! | `meta` | `&str` | `u64` | Queue sequence counter |
//!
//! # Durability
//!
//! redb commits are persistent as soon as `commit()` returns (copy-on-write
//! with atomic pointer swap), which is what makes the write-ahead contract
//! hold on a terminal that can lose power mid-shift: the business-entity
//! write and its queue entry land in one transaction, so either both survive
//! a crash or neither does.

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
};
use serde::{Deserialize, Serialize};
use shared::sync::{EntityKind, Operation, RemoteChange, TerminalContext};
use shared::util::{mutation_id, now_millis};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Table for entity records: key = (kind, entity_id), value = JSON-serialized VersionedRecord
const ENTITIES_TABLE: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("entities");

/// Table for the mutation queue: key = seq, value = JSON-serialized MutationEntry
const QUEUE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("mutation_queue");

/// Table for the idempotency guard: key = mutation_id, value = JSON-serialized GuardEntry
const GUARD_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("idempotency_guard");

/// Table for reconciliation cursors: key = kind, value = last pulled remote version
const CURSORS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("cursors");

/// Table for deferred pulled changes: key = (kind, entity_id), value = JSON-serialized RemoteChange
const DEFERRED_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("deferred_changes");

/// Table for counters: key = "queue_seq", value = u64
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const QUEUE_SEQ_KEY: &str = "queue_seq";

/// Mutation lifecycle state
///
/// `Settled` never appears in storage — a settled entry is removed from the
/// queue and only its idempotency-guard record remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
    Pending,
    InFlight,
    Settled,
    FailedPermanent,
}

/// One pending outbound change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEntry {
    /// Queue position (FIFO order, assigned at enqueue)
    pub seq: u64,
    /// Globally unique mutation ID — the idempotency key
    pub id: String,
    /// Business the write was recorded under (explicit, never ambient)
    pub business_id: String,
    pub kind: EntityKind,
    pub entity_id: String,
    pub op: Operation,
    /// Field-level change set (update) or full record (create)
    pub payload: serde_json::Value,
    /// Prior values of the fields touched by `payload`
    ///
    /// Needed to re-express an update as a delta during conflict resolution
    /// (inventory counts). Null for create/delete.
    pub base_snapshot: serde_json::Value,
    /// Entity version the mutation was computed against
    pub base_version: u64,
    pub status: MutationStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<i64>,
    /// Unix millis; entry is not dispatchable before this instant
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
}

/// Idempotency guard record for a settled mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardEntry {
    pub new_version: u64,
    pub recorded_at: i64,
}

/// Versioned local copy of a business entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub version: u64,
    pub value: serde_json::Value,
    pub updated_at: i64,
}

/// Result of applying a pulled batch
#[derive(Debug, Clone, Default)]
pub struct AppliedChanges {
    pub applied: usize,
    pub deferred: usize,
    pub deleted: usize,
}

/// Queue statistics (UI pending badge, diagnostics)
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub failed_permanent: u64,
    pub guard_entries: u64,
    pub deferred_changes: u64,
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Mutation not found: {0}")]
    MutationNotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shallow merge of a change set onto a base record (top-level keys)
pub(crate) fn merge_patch(base: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in patch_map {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Prior values of the top-level keys a change set touches
fn snapshot_of(current: &serde_json::Value, patch: &serde_json::Value) -> serde_json::Value {
    let serde_json::Value::Object(patch_map) = patch else {
        return serde_json::Value::Null;
    };
    let mut snapshot = serde_json::Map::new();
    for key in patch_map.keys() {
        snapshot.insert(
            key.clone(),
            current.get(key).cloned().unwrap_or(serde_json::Value::Null),
        );
    }
    serde_json::Value::Object(snapshot)
}

/// Terminal-local store backed by redb
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
}

impl LocalStore {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    /// Create all tables so later read transactions never hit a missing table
    fn init_tables(&self) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTITIES_TABLE)?;
            let _ = write_txn.open_table(QUEUE_TABLE)?;
            let _ = write_txn.open_table(GUARD_TABLE)?;
            let _ = write_txn.open_table(CURSORS_TABLE)?;
            let _ = write_txn.open_table(DEFERRED_TABLE)?;

            let mut meta = write_txn.open_table(META_TABLE)?;
            if meta.get(QUEUE_SEQ_KEY)?.is_none() {
                meta.insert(QUEUE_SEQ_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========== Local Writes ==========

    /// Apply a local business write and enqueue its outbound mutation.
    ///
    /// One write transaction covers both the entity record and the queue
    /// entry — the write-ahead contract: the caller's write is only complete
    /// once its mutation is durably queued.
    pub fn record_local_write(
        &self,
        ctx: &TerminalContext,
        kind: EntityKind,
        entity_id: &str,
        op: Operation,
        payload: serde_json::Value,
    ) -> StoreResult<MutationEntry> {
        let now = now_millis();
        let txn = self.db.begin_write()?;

        let entry = {
            let mut entities = txn.open_table(ENTITIES_TABLE)?;
            let key = (kind.as_str(), entity_id);

            let current: Option<VersionedRecord> = match entities.get(key)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            let base_version = current.as_ref().map(|r| r.version).unwrap_or(0);

            let base_snapshot = match op {
                Operation::Update => {
                    let current_value = current
                        .as_ref()
                        .map(|r| &r.value)
                        .unwrap_or(&serde_json::Value::Null);
                    snapshot_of(current_value, &payload)
                }
                Operation::Create | Operation::Delete => serde_json::Value::Null,
            };

            // Apply the write to the local entity copy
            match op {
                Operation::Create => {
                    let record = VersionedRecord {
                        version: base_version + 1,
                        value: payload.clone(),
                        updated_at: now,
                    };
                    let bytes = serde_json::to_vec(&record)?;
                    entities.insert(key, bytes.as_slice())?;
                }
                Operation::Update => {
                    let merged = merge_patch(
                        current
                            .as_ref()
                            .map(|r| &r.value)
                            .unwrap_or(&serde_json::Value::Null),
                        &payload,
                    );
                    let record = VersionedRecord {
                        version: base_version + 1,
                        value: merged,
                        updated_at: now,
                    };
                    let bytes = serde_json::to_vec(&record)?;
                    entities.insert(key, bytes.as_slice())?;
                }
                Operation::Delete => {
                    entities.remove(key)?;
                }
            }

            // Enqueue the mutation in the same transaction
            let mut meta = txn.open_table(META_TABLE)?;
            let seq = meta.get(QUEUE_SEQ_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
            meta.insert(QUEUE_SEQ_KEY, seq)?;

            let entry = MutationEntry {
                seq,
                id: mutation_id(),
                business_id: ctx.business_id.clone(),
                kind,
                entity_id: entity_id.to_string(),
                op,
                payload,
                base_snapshot,
                base_version,
                status: MutationStatus::Pending,
                attempt_count: 0,
                last_attempt_at: None,
                next_attempt_at: now,
                last_error: None,
                created_at: now,
            };

            let mut queue = txn.open_table(QUEUE_TABLE)?;
            let bytes = serde_json::to_vec(&entry)?;
            queue.insert(seq, bytes.as_slice())?;
            entry
        };

        txn.commit()?;
        Ok(entry)
    }

    // ========== Queue Operations ==========

    /// Dequeue the oldest dispatchable entries and flip them to in-flight.
    ///
    /// Guarantees enforced inside the transaction:
    /// - per-entity FIFO: only an entity's oldest entry is ever considered,
    ///   and a permanently failed entry blocks everything behind it until an
    ///   operator requeues or discards it
    /// - at most one in-flight entry per entity
    /// - at most `max_entities_in_flight` entities in flight overall
    /// - batch capped by entry count and payload bytes
    pub fn dequeue_batch(
        &self,
        max_items: usize,
        max_bytes: usize,
        max_entities_in_flight: usize,
    ) -> StoreResult<Vec<MutationEntry>> {
        let now = now_millis();
        let txn = self.db.begin_write()?;

        let selected = {
            let mut queue = txn.open_table(QUEUE_TABLE)?;

            let mut entries: Vec<MutationEntry> = Vec::new();
            for result in queue.iter()? {
                let (_key, value) = result?;
                entries.push(serde_json::from_slice(value.value())?);
            }

            let mut busy: HashSet<(EntityKind, String)> = HashSet::new();
            let mut seen: HashSet<(EntityKind, String)> = HashSet::new();
            let mut in_flight_count = 0usize;
            for entry in &entries {
                if entry.status == MutationStatus::InFlight {
                    busy.insert((entry.kind, entry.entity_id.clone()));
                    in_flight_count += 1;
                }
            }

            let mut selected: Vec<MutationEntry> = Vec::new();
            let mut batch_bytes = 0usize;
            for entry in entries {
                let entity = (entry.kind, entry.entity_id.clone());
                if !seen.insert(entity.clone()) {
                    // A lower-seq entry for this entity already decided its fate
                    continue;
                }
                if entry.status != MutationStatus::Pending || busy.contains(&entity) {
                    continue;
                }
                if entry.next_attempt_at > now {
                    continue;
                }
                if selected.len() >= max_items
                    || in_flight_count + selected.len() >= max_entities_in_flight
                {
                    break;
                }
                let payload_bytes = serde_json::to_vec(&entry.payload)?.len();
                if !selected.is_empty() && batch_bytes + payload_bytes > max_bytes {
                    break;
                }
                batch_bytes += payload_bytes;
                selected.push(entry);
            }

            // Flip selected entries to in-flight
            for entry in &mut selected {
                entry.status = MutationStatus::InFlight;
                entry.last_attempt_at = Some(now);
                let bytes = serde_json::to_vec(entry)?;
                queue.insert(entry.seq, bytes.as_slice())?;
            }
            selected
        };

        txn.commit()?;
        Ok(selected)
    }

    /// Settle a mutation: remove it from the queue, record its idempotency
    /// outcome, advance the local entity version.
    ///
    /// Returns a deferred pulled change applied in its place, if one was
    /// waiting and no other queue entry holds the entity.
    pub fn mark_settled(
        &self,
        entry: &MutationEntry,
        new_version: u64,
    ) -> StoreResult<Option<RemoteChange>> {
        let now = now_millis();
        let txn = self.db.begin_write()?;

        let applied_deferred = {
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            queue.remove(entry.seq)?;

            let mut guard = txn.open_table(GUARD_TABLE)?;
            let guard_entry = GuardEntry {
                new_version,
                recorded_at: now,
            };
            let bytes = serde_json::to_vec(&guard_entry)?;
            guard.insert(entry.id.as_str(), bytes.as_slice())?;

            let mut entities = txn.open_table(ENTITIES_TABLE)?;
            let key = (entry.kind.as_str(), entry.entity_id.as_str());
            let existing_record = if entry.op != Operation::Delete {
                entities.get(key)?.map(|g| g.value().to_vec())
            } else {
                None
            };
            if let Some(record_bytes) = existing_record {
                let mut record: VersionedRecord = serde_json::from_slice(&record_bytes)?;
                record.version = new_version;
                record.updated_at = now;
                let bytes = serde_json::to_vec(&record)?;
                entities.insert(key, bytes.as_slice())?;
            }

            // Entity still held by another queued mutation?
            let mut still_held = false;
            for result in queue.iter()? {
                let (_key, value) = result?;
                let other: MutationEntry = serde_json::from_slice(value.value())?;
                if other.kind == entry.kind && other.entity_id == entry.entity_id {
                    still_held = true;
                    break;
                }
            }

            let mut deferred = txn.open_table(DEFERRED_TABLE)?;
            let mut applied_deferred = None;
            let deferred_change = if !still_held {
                deferred.get(key)?.map(|g| g.value().to_vec())
            } else {
                None
            };
            if let Some(change_bytes) = deferred_change {
                deferred.remove(key)?;
                let change: RemoteChange = serde_json::from_slice(&change_bytes)?;
                // A deferral older than what we just settled is stale
                if change.version > new_version {
                    if change.deleted {
                        entities.remove(key)?;
                    } else {
                        let record = VersionedRecord {
                            version: change.version,
                            value: change.value.clone(),
                            updated_at: now,
                        };
                        let bytes = serde_json::to_vec(&record)?;
                        entities.insert(key, bytes.as_slice())?;
                    }
                    applied_deferred = Some(change);
                }
            }
            applied_deferred
        };

        txn.commit()?;
        Ok(applied_deferred)
    }

    /// Return a failed attempt to the pending state with backoff bookkeeping.
    ///
    /// Returns the updated attempt count.
    pub fn mark_failed_transient(
        &self,
        seq: u64,
        error: &str,
        next_attempt_at: i64,
    ) -> StoreResult<u32> {
        let txn = self.db.begin_write()?;
        let attempt_count = {
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            let entry_bytes = queue
                .get(seq)?
                .map(|g| g.value().to_vec())
                .ok_or_else(|| StoreError::MutationNotFound(seq.to_string()))?;
            let mut entry: MutationEntry = serde_json::from_slice(&entry_bytes)?;
            entry.status = MutationStatus::Pending;
            entry.attempt_count += 1;
            entry.next_attempt_at = next_attempt_at;
            entry.last_error = Some(error.to_string());
            let bytes = serde_json::to_vec(&entry)?;
            queue.insert(seq, bytes.as_slice())?;
            entry.attempt_count
        };
        txn.commit()?;
        Ok(attempt_count)
    }

    /// Mark a mutation permanently failed — kept in the queue for operator
    /// inspection, never auto-retried, blocks newer mutations on its entity.
    pub fn mark_failed_permanent(&self, seq: u64, error: &str) -> StoreResult<MutationEntry> {
        let txn = self.db.begin_write()?;
        let entry = {
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            let entry_bytes = queue
                .get(seq)?
                .map(|g| g.value().to_vec())
                .ok_or_else(|| StoreError::MutationNotFound(seq.to_string()))?;
            let mut entry: MutationEntry = serde_json::from_slice(&entry_bytes)?;
            entry.status = MutationStatus::FailedPermanent;
            entry.last_error = Some(error.to_string());
            let bytes = serde_json::to_vec(&entry)?;
            queue.insert(seq, bytes.as_slice())?;
            entry
        };
        txn.commit()?;
        Ok(entry)
    }

    /// Rewrite an in-flight entry after conflict re-expression.
    ///
    /// The resubmission is a new remote effect, so it carries a fresh
    /// idempotency key and the remote's version as its new base.
    pub fn rewrite_in_flight(
        &self,
        seq: u64,
        payload: serde_json::Value,
        base_snapshot: serde_json::Value,
        base_version: u64,
    ) -> StoreResult<MutationEntry> {
        let txn = self.db.begin_write()?;
        let entry = {
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            let entry_bytes = queue
                .get(seq)?
                .map(|g| g.value().to_vec())
                .ok_or_else(|| StoreError::MutationNotFound(seq.to_string()))?;
            let mut entry: MutationEntry = serde_json::from_slice(&entry_bytes)?;
            entry.id = mutation_id();
            entry.payload = payload;
            entry.base_snapshot = base_snapshot;
            entry.base_version = base_version;
            let bytes = serde_json::to_vec(&entry)?;
            queue.insert(seq, bytes.as_slice())?;
            entry
        };
        txn.commit()?;
        Ok(entry)
    }

    /// Return all in-flight entries to pending (crash recovery).
    ///
    /// Called at startup: an entry that was in flight when the process died
    /// may or may not have reached the cloud — resubmission under the same
    /// idempotency key is safe either way.
    pub fn recover_in_flight(&self) -> StoreResult<usize> {
        let now = now_millis();
        let txn = self.db.begin_write()?;
        let recovered = {
            let mut queue = txn.open_table(QUEUE_TABLE)?;

            let mut to_recover: Vec<MutationEntry> = Vec::new();
            for result in queue.iter()? {
                let (_key, value) = result?;
                let entry: MutationEntry = serde_json::from_slice(value.value())?;
                if entry.status == MutationStatus::InFlight {
                    to_recover.push(entry);
                }
            }

            let count = to_recover.len();
            for mut entry in to_recover {
                entry.status = MutationStatus::Pending;
                entry.next_attempt_at = now;
                let bytes = serde_json::to_vec(&entry)?;
                queue.insert(entry.seq, bytes.as_slice())?;
            }
            count
        };
        txn.commit()?;
        Ok(recovered)
    }

    /// All permanently failed entries (operator review)
    pub fn permanent_failures(&self) -> StoreResult<Vec<MutationEntry>> {
        let read_txn = self.db.begin_read()?;
        let queue = read_txn.open_table(QUEUE_TABLE)?;

        let mut failures = Vec::new();
        for result in queue.iter()? {
            let (_key, value) = result?;
            let entry: MutationEntry = serde_json::from_slice(value.value())?;
            if entry.status == MutationStatus::FailedPermanent {
                failures.push(entry);
            }
        }
        Ok(failures)
    }

    /// Requeue a permanently failed mutation (operator "resync" action).
    ///
    /// Attempt bookkeeping is reset; the idempotency key is kept, so a
    /// mutation that did land remotely before failing locally settles
    /// without a second application.
    pub fn requeue_permanent_failure(&self, mutation_id: &str) -> StoreResult<MutationEntry> {
        let now = now_millis();
        let txn = self.db.begin_write()?;
        let entry = {
            let mut queue = txn.open_table(QUEUE_TABLE)?;

            let mut found: Option<MutationEntry> = None;
            for result in queue.iter()? {
                let (_key, value) = result?;
                let entry: MutationEntry = serde_json::from_slice(value.value())?;
                if entry.id == mutation_id && entry.status == MutationStatus::FailedPermanent {
                    found = Some(entry);
                    break;
                }
            }

            let mut entry = found
                .ok_or_else(|| StoreError::MutationNotFound(mutation_id.to_string()))?;
            entry.status = MutationStatus::Pending;
            entry.attempt_count = 0;
            entry.next_attempt_at = now;
            entry.last_error = None;
            let bytes = serde_json::to_vec(&entry)?;
            queue.insert(entry.seq, bytes.as_slice())?;
            entry
        };
        txn.commit()?;
        Ok(entry)
    }

    /// Discard a permanently failed mutation without resubmitting it
    pub fn discard_permanent_failure(&self, mutation_id: &str) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut queue = txn.open_table(QUEUE_TABLE)?;

            let mut seq: Option<u64> = None;
            for result in queue.iter()? {
                let (key, value) = result?;
                let entry: MutationEntry = serde_json::from_slice(value.value())?;
                if entry.id == mutation_id && entry.status == MutationStatus::FailedPermanent {
                    seq = Some(key.value());
                    break;
                }
            }

            let seq = seq.ok_or_else(|| StoreError::MutationNotFound(mutation_id.to_string()))?;
            queue.remove(seq)?;
        }
        txn.commit()?;
        Ok(())
    }

    // ========== Idempotency Guard ==========

    /// Terminal outcome recorded for a mutation ID, if known
    pub fn guard_outcome(&self, mutation_id: &str) -> StoreResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let guard = read_txn.open_table(GUARD_TABLE)?;
        match guard.get(mutation_id)? {
            Some(value) => {
                let entry: GuardEntry = serde_json::from_slice(value.value())?;
                Ok(Some(entry.new_version))
            }
            None => Ok(None),
        }
    }

    /// Evict guard entries older than the retention window.
    ///
    /// Keeps the guard bounded; retention must exceed the longest plausible
    /// retry horizon (max backoff × max attempts).
    pub fn evict_expired_guards(&self, retention_ms: i64) -> StoreResult<usize> {
        let cutoff = now_millis() - retention_ms;
        let txn = self.db.begin_write()?;
        let evicted = {
            let mut guard = txn.open_table(GUARD_TABLE)?;

            let mut expired: Vec<String> = Vec::new();
            for result in guard.iter()? {
                let (key, value) = result?;
                let entry: GuardEntry = serde_json::from_slice(value.value())?;
                if entry.recorded_at < cutoff {
                    expired.push(key.value().to_string());
                }
            }

            for id in &expired {
                guard.remove(id.as_str())?;
            }
            expired.len()
        };
        txn.commit()?;
        Ok(evicted)
    }

    // ========== Entity Access ==========

    /// Current local record for an entity
    pub fn get_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> StoreResult<Option<VersionedRecord>> {
        let read_txn = self.db.begin_read()?;
        let entities = read_txn.open_table(ENTITIES_TABLE)?;
        match entities.get((kind.as_str(), entity_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Overwrite an entity with a reconciled remote value and version
    pub fn overwrite_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
        value: serde_json::Value,
        version: u64,
    ) -> StoreResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut entities = txn.open_table(ENTITIES_TABLE)?;
            let record = VersionedRecord {
                version,
                value,
                updated_at: now_millis(),
            };
            let bytes = serde_json::to_vec(&record)?;
            entities.insert((kind.as_str(), entity_id), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    // ========== Reconciliation ==========

    /// Last durably applied remote cursor for an entity kind
    pub fn get_cursor(&self, kind: EntityKind) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let cursors = read_txn.open_table(CURSORS_TABLE)?;
        Ok(cursors.get(kind.as_str())?.map(|g| g.value()).unwrap_or(0))
    }

    /// Apply a pulled batch and advance the cursor, atomically.
    ///
    /// A change for an entity with any outstanding queued mutation is not
    /// applied — it is parked in `deferred_changes` (overwriting an earlier
    /// deferral) and replayed when the blocking mutation settles. Everything
    /// else overwrites the local copy: remote-sourced writes win over cached
    /// values, except that a change older than the local version (already
    /// superseded by a settled push) is skipped.
    pub fn apply_remote_changes(
        &self,
        changes: &[RemoteChange],
        kind: EntityKind,
        new_cursor: u64,
    ) -> StoreResult<AppliedChanges> {
        let now = now_millis();
        let txn = self.db.begin_write()?;

        let stats = {
            let queue = txn.open_table(QUEUE_TABLE)?;
            let mut outstanding: HashSet<(EntityKind, String)> = HashSet::new();
            for result in queue.iter()? {
                let (_key, value) = result?;
                let entry: MutationEntry = serde_json::from_slice(value.value())?;
                outstanding.insert((entry.kind, entry.entity_id.clone()));
            }
            drop(queue);

            let mut entities = txn.open_table(ENTITIES_TABLE)?;
            let mut deferred = txn.open_table(DEFERRED_TABLE)?;
            let mut stats = AppliedChanges::default();

            for change in changes {
                let key = (change.kind.as_str(), change.entity_id.as_str());

                if outstanding.contains(&(change.kind, change.entity_id.clone())) {
                    let bytes = serde_json::to_vec(change)?;
                    deferred.insert(key, bytes.as_slice())?;
                    stats.deferred += 1;
                    continue;
                }

                if change.deleted {
                    entities.remove(key)?;
                    deferred.remove(key)?;
                    stats.deleted += 1;
                    continue;
                }

                let current_version = match entities.get(key)? {
                    Some(value) => {
                        let record: VersionedRecord = serde_json::from_slice(value.value())?;
                        Some(record.version)
                    }
                    None => None,
                };
                if let Some(local) = current_version
                    && change.version < local
                {
                    tracing::debug!(
                        kind = %change.kind,
                        entity_id = %change.entity_id,
                        "Skipping stale pulled change"
                    );
                    continue;
                }

                let record = VersionedRecord {
                    version: change.version,
                    value: change.value.clone(),
                    updated_at: now,
                };
                let bytes = serde_json::to_vec(&record)?;
                entities.insert(key, bytes.as_slice())?;
                stats.applied += 1;
            }

            let mut cursors = txn.open_table(CURSORS_TABLE)?;
            cursors.insert(kind.as_str(), new_cursor)?;
            stats
        };

        txn.commit()?;
        Ok(stats)
    }

    // ========== Statistics ==========

    /// Queue and guard statistics
    pub fn stats(&self) -> StoreResult<QueueStats> {
        let read_txn = self.db.begin_read()?;
        let queue = read_txn.open_table(QUEUE_TABLE)?;
        let guard = read_txn.open_table(GUARD_TABLE)?;
        let deferred = read_txn.open_table(DEFERRED_TABLE)?;

        let mut pending = 0;
        let mut in_flight = 0;
        let mut failed_permanent = 0;
        for result in queue.iter()? {
            let (_key, value) = result?;
            let entry: MutationEntry = serde_json::from_slice(value.value())?;
            match entry.status {
                MutationStatus::Pending => pending += 1,
                MutationStatus::InFlight => in_flight += 1,
                MutationStatus::FailedPermanent => failed_permanent += 1,
                MutationStatus::Settled => {}
            }
        }

        Ok(QueueStats {
            pending,
            in_flight,
            failed_permanent,
            guard_entries: guard.len()?,
            deferred_changes: deferred.len()?,
        })
    }
}
