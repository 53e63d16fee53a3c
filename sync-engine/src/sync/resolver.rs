//! Conflict resolution
//!
//! Invoked when the cloud reports that an entity's current version no longer
//! matches a mutation's base version. Resolution is entity-type-specific:
//!
//! | Kind | Policy |
//! |------|--------|
//! | order / order_item | Status transitions are monotonic; a regression is rejected for manual reconciliation, other fields rebase onto the remote record |
//! | inventory_item | Count updates re-expressed as additive deltas against the remote count |
//! | loyalty_ledger_entry | Append-only — a conflict can only mean the entry already landed |
//!
//! Kitchen-workflow correctness outranks last-write-wins: an order the
//! kitchen already closed is never reopened by a stale offline write.

use serde_json::Value;
use shared::models::{ItemStatus, OrderStatus};
use shared::sync::{EntityKind, Operation};

use crate::store::{MutationEntry, merge_patch};

/// Outcome of resolving a version conflict
#[derive(Debug)]
pub enum Resolution {
    /// Re-expressed mutation to resubmit against the remote's current state.
    /// `reconciled` is the value the local copy is corrected to meanwhile.
    Resubmit {
        payload: Value,
        base_snapshot: Value,
        base_version: u64,
        reconciled: Value,
    },
    /// Unresolvable — becomes a permanent failure; the local copy is
    /// corrected to the remote value
    Reject { reason: String },
    /// The remote already reflects this mutation's effect
    AlreadyApplied,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve a conflict between `entry` and the remote's current record
    pub fn resolve(entry: &MutationEntry, current_version: u64, current_value: &Value) -> Resolution {
        match entry.kind {
            EntityKind::Order => Self::resolve_status_monotonic(
                entry,
                current_version,
                current_value,
                order_rank(&entry.payload),
                order_rank(current_value),
            ),
            EntityKind::OrderItem => Self::resolve_status_monotonic(
                entry,
                current_version,
                current_value,
                item_rank(&entry.payload),
                item_rank(current_value),
            ),
            EntityKind::InventoryItem => {
                Self::resolve_inventory(entry, current_version, current_value)
            }
            EntityKind::LoyaltyLedgerEntry => Resolution::AlreadyApplied,
            // Cloud-authoritative kinds are never enqueued; refuse rather than guess
            _ => Resolution::Reject {
                reason: format!("{} is not locally mutable", entry.kind),
            },
        }
    }

    /// Orders and order items: monotonic workflow, everything else rebases
    fn resolve_status_monotonic(
        entry: &MutationEntry,
        current_version: u64,
        current_value: &Value,
        local_rank: Option<u8>,
        remote_rank: Option<u8>,
    ) -> Resolution {
        if entry.op == Operation::Delete {
            return Resolution::Reject {
                reason: "delete conflicts with a newer remote record".to_string(),
            };
        }

        if let (Some(local), Some(remote)) = (local_rank, remote_rank)
            && local < remote
        {
            return Resolution::Reject {
                reason: format!(
                    "status regression: local rank {local} behind remote rank {remote}"
                ),
            };
        }

        // Forward (or status-free) change: reapply the change set on top of
        // the remote record
        let reconciled = merge_patch(current_value, &entry.payload);
        Resolution::Resubmit {
            payload: entry.payload.clone(),
            base_snapshot: snapshot_from(current_value, &entry.payload),
            base_version: current_version,
            reconciled,
        }
    }

    /// Inventory counts: concurrent decrements both apply.
    ///
    /// The mutation recorded "set on_hand to V"; re-express it as the delta
    /// it meant (`V - base`) applied to the remote's current count, so a
    /// local -3 and a concurrent remote -2 reconcile to -5.
    fn resolve_inventory(
        entry: &MutationEntry,
        current_version: u64,
        current_value: &Value,
    ) -> Resolution {
        let local_target = entry.payload.get("on_hand").and_then(Value::as_i64);
        let local_base = entry.base_snapshot.get("on_hand").and_then(Value::as_i64);
        let remote_count = current_value.get("on_hand").and_then(Value::as_i64);

        let (Some(target), Some(base), Some(remote)) = (local_target, local_base, remote_count)
        else {
            // Not a count change (rename etc.) — plain rebase
            let reconciled = merge_patch(current_value, &entry.payload);
            return Resolution::Resubmit {
                payload: entry.payload.clone(),
                base_snapshot: snapshot_from(current_value, &entry.payload),
                base_version: current_version,
                reconciled,
            };
        };

        let delta = target - base;
        let merged_count = remote + delta;

        let mut payload = entry.payload.clone();
        payload["on_hand"] = Value::from(merged_count);
        let reconciled = merge_patch(current_value, &payload);

        Resolution::Resubmit {
            base_snapshot: snapshot_from(current_value, &payload),
            payload,
            base_version: current_version,
            reconciled,
        }
    }
}

fn order_rank(value: &Value) -> Option<u8> {
    let status: OrderStatus = serde_json::from_value(value.get("status")?.clone()).ok()?;
    Some(status.rank())
}

fn item_rank(value: &Value) -> Option<u8> {
    let status: ItemStatus = serde_json::from_value(value.get("status")?.clone()).ok()?;
    Some(status.rank())
}

/// Prior values of the keys a change set touches, taken from the remote record
fn snapshot_from(current: &Value, payload: &Value) -> Value {
    let Value::Object(payload_map) = payload else {
        return Value::Null;
    };
    let mut snapshot = serde_json::Map::new();
    for key in payload_map.keys() {
        snapshot.insert(key.clone(), current.get(key).cloned().unwrap_or(Value::Null));
    }
    Value::Object(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::util::now_millis;

    fn entry(
        kind: EntityKind,
        op: Operation,
        payload: Value,
        base_snapshot: Value,
        base_version: u64,
    ) -> MutationEntry {
        MutationEntry {
            seq: 1,
            id: "m-1".to_string(),
            business_id: "biz-1".to_string(),
            kind,
            entity_id: "e-1".to_string(),
            op,
            payload,
            base_snapshot,
            base_version,
            status: crate::store::MutationStatus::InFlight,
            attempt_count: 0,
            last_attempt_at: None,
            next_attempt_at: now_millis(),
            last_error: None,
            created_at: now_millis(),
        }
    }

    #[test]
    fn test_order_status_regression_is_rejected() {
        let e = entry(
            EntityKind::Order,
            Operation::Update,
            serde_json::json!({"status": "OPEN"}),
            serde_json::json!({"status": "READY"}),
            3,
        );
        let resolution = ConflictResolver::resolve(
            &e,
            9,
            &serde_json::json!({"status": "CLOSED", "total_amount": 20.0}),
        );
        assert!(matches!(resolution, Resolution::Reject { .. }));
    }

    #[test]
    fn test_order_forward_status_rebases_onto_remote() {
        let e = entry(
            EntityKind::Order,
            Operation::Update,
            serde_json::json!({"status": "READY"}),
            serde_json::json!({"status": "IN_PROGRESS"}),
            3,
        );
        let resolution = ConflictResolver::resolve(
            &e,
            5,
            &serde_json::json!({"status": "IN_PROGRESS", "customer_name": "Dana"}),
        );
        match resolution {
            Resolution::Resubmit {
                base_version,
                reconciled,
                ..
            } => {
                assert_eq!(base_version, 5);
                assert_eq!(reconciled["status"], "READY");
                // Remote-only fields survive the rebase
                assert_eq!(reconciled["customer_name"], "Dana");
            }
            other => panic!("expected resubmit, got {other:?}"),
        }
    }

    #[test]
    fn test_order_field_change_without_status_rebases() {
        let e = entry(
            EntityKind::Order,
            Operation::Update,
            serde_json::json!({"customer_name": "Avi"}),
            serde_json::json!({"customer_name": null}),
            3,
        );
        let resolution =
            ConflictResolver::resolve(&e, 6, &serde_json::json!({"status": "READY"}));
        assert!(matches!(resolution, Resolution::Resubmit { .. }));
    }

    #[test]
    fn test_inventory_conflict_merges_as_delta() {
        // Base count 10, local decrement of 3 → payload 7.
        // Remote concurrently decremented by 2 → current 8.
        let e = entry(
            EntityKind::InventoryItem,
            Operation::Update,
            serde_json::json!({"on_hand": 7}),
            serde_json::json!({"on_hand": 10}),
            4,
        );
        let resolution = ConflictResolver::resolve(
            &e,
            5,
            &serde_json::json!({"on_hand": 8, "name": "Milk"}),
        );
        match resolution {
            Resolution::Resubmit {
                payload,
                base_version,
                reconciled,
                base_snapshot,
            } => {
                // Both decrements apply: 10 - 3 - 2 = 5
                assert_eq!(payload["on_hand"], 5);
                assert_eq!(base_version, 5);
                assert_eq!(reconciled["on_hand"], 5);
                assert_eq!(base_snapshot["on_hand"], 8);
            }
            other => panic!("expected resubmit, got {other:?}"),
        }
    }

    #[test]
    fn test_ledger_conflict_is_already_applied() {
        let e = entry(
            EntityKind::LoyaltyLedgerEntry,
            Operation::Create,
            serde_json::json!({"delta": 10}),
            Value::Null,
            0,
        );
        let resolution = ConflictResolver::resolve(&e, 1, &serde_json::json!({"delta": 10}));
        assert!(matches!(resolution, Resolution::AlreadyApplied));
    }

    #[test]
    fn test_order_delete_conflict_is_rejected() {
        let e = entry(
            EntityKind::Order,
            Operation::Delete,
            Value::Null,
            Value::Null,
            2,
        );
        let resolution =
            ConflictResolver::resolve(&e, 4, &serde_json::json!({"status": "CLOSED"}));
        assert!(matches!(resolution, Resolution::Reject { .. }));
    }
}
