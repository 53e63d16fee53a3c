//! Loyalty Models

use serde::{Deserialize, Serialize};

/// Loyalty card — per-customer balance, cloud-authoritative.
///
/// The terminal never writes the balance directly; it appends ledger
/// entries and receives the recomputed balance through reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyCard {
    pub id: String,
    pub customer_id: String,
    /// Accumulated points balance
    pub points: i64,
    /// Stamps toward the next free item (coffee card)
    pub stamps: i32,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Ledger entry kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryKind {
    Earn,
    Redeem,
    Adjustment,
}

/// Loyalty ledger entry — append-only.
///
/// There is no update conflict for these: the only failure mode is a
/// duplicate append, which the idempotency guard prevents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyLedgerEntry {
    pub id: String,
    pub card_id: String,
    pub kind: LedgerEntryKind,
    /// Points delta (negative for redemptions)
    pub delta: i64,
    /// Order that produced the entry, if any
    pub order_id: Option<String>,
    pub reason: Option<String>,
    pub version: u64,
    pub created_at: i64,
}
