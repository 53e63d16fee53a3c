//! Sync wire protocol types
//!
//! Used by the terminal's sync engine to push local mutations to the cloud
//! and to pull authoritative changes back down.

use serde::{Deserialize, Serialize};

/// Business entity kinds known to the sync protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Order,
    OrderItem,
    MenuItem,
    OptionGroup,
    InventoryItem,
    LoyaltyCard,
    LoyaltyLedgerEntry,
}

impl EntityKind {
    /// Wire/storage string representation (lowercase)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::OrderItem => "order_item",
            Self::MenuItem => "menu_item",
            Self::OptionGroup => "option_group",
            Self::InventoryItem => "inventory_item",
            Self::LoyaltyCard => "loyalty_card",
            Self::LoyaltyLedgerEntry => "loyalty_ledger_entry",
        }
    }

    /// Parse from wire/storage string value
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "order" => Some(Self::Order),
            "order_item" => Some(Self::OrderItem),
            "menu_item" => Some(Self::MenuItem),
            "option_group" => Some(Self::OptionGroup),
            "inventory_item" => Some(Self::InventoryItem),
            "loyalty_card" => Some(Self::LoyaltyCard),
            "loyalty_ledger_entry" => Some(Self::LoyaltyLedgerEntry),
            _ => None,
        }
    }

    /// Kinds the terminal is allowed to mutate locally and push upstream
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            Self::Order | Self::OrderItem | Self::InventoryItem | Self::LoyaltyLedgerEntry
        )
    }

    /// Kinds the reconciliation puller keeps fresh from the cloud
    pub const PULLED: &'static [EntityKind] = &[
        Self::MenuItem,
        Self::OptionGroup,
        Self::InventoryItem,
        Self::LoyaltyCard,
        Self::LoyaltyLedgerEntry,
    ];
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Business/terminal identity attached to every cloud call.
///
/// Passed explicitly rather than read from ambient state so one process can
/// never leak writes across businesses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalContext {
    pub business_id: String,
    pub terminal_id: String,
}

/// A single mutation submitted to the cloud mutation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Idempotency key — stable across retries of the same mutation
    pub idempotency_key: String,
    pub business_id: String,
    pub kind: EntityKind,
    pub entity_id: String,
    pub op: Operation,
    /// Field-level change set (update) or full record (create)
    pub payload: serde_json::Value,
    /// Entity version the mutation was computed against
    pub base_version: u64,
}

/// Cloud response to a mutation submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PushOutcome {
    /// Applied (or already applied under the same idempotency key)
    Applied { new_version: u64 },
    /// The entity's remote version no longer matches `base_version`
    Conflict {
        current_version: u64,
        current_value: serde_json::Value,
    },
    /// Validation / business-rule rejection — never retried
    Rejected { reason: String },
}

/// One authoritative change streamed down by the pull endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChange {
    pub kind: EntityKind,
    pub entity_id: String,
    /// Full record value; ignored when `deleted`
    pub value: serde_json::Value,
    pub version: u64,
    /// Record was removed upstream — prune it locally
    #[serde(default)]
    pub deleted: bool,
}

/// A page of changes after a given cursor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullBatch {
    pub changes: Vec<RemoteChange>,
    /// Cursor to persist once the batch is durably applied
    pub cursor: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_round_trip() {
        for kind in [
            EntityKind::Order,
            EntityKind::OrderItem,
            EntityKind::MenuItem,
            EntityKind::OptionGroup,
            EntityKind::InventoryItem,
            EntityKind::LoyaltyCard,
            EntityKind::LoyaltyLedgerEntry,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("customer"), None);
    }

    #[test]
    fn test_mutation_request_serialization() {
        let request = MutationRequest {
            idempotency_key: "6d1c9f2e-0000-4000-8000-000000000001".to_string(),
            business_id: "biz-001".to_string(),
            kind: EntityKind::Order,
            entity_id: "order-42".to_string(),
            op: Operation::Update,
            payload: serde_json::json!({"status": "READY"}),
            base_version: 7,
        };

        let json = serde_json::to_string(&request).unwrap();
        let deserialized: MutationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.kind, EntityKind::Order);
        assert_eq!(deserialized.base_version, 7);
        assert_eq!(deserialized.payload["status"], "READY");
    }

    #[test]
    fn test_push_outcome_tagging() {
        let outcome = PushOutcome::Conflict {
            current_version: 9,
            current_value: serde_json::json!({"status": "CLOSED"}),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "conflict");
        assert_eq!(json["current_version"], 9);

        let applied: PushOutcome =
            serde_json::from_value(serde_json::json!({"result": "applied", "new_version": 3}))
                .unwrap();
        assert!(matches!(applied, PushOutcome::Applied { new_version: 3 }));
    }
}
