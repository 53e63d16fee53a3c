//! Inventory Model

use serde::{Deserialize, Serialize};

/// Inventory item (ingredient stock level)
///
/// `on_hand` is a count that concurrent terminals decrement independently;
/// conflicting updates are merged as additive deltas, never last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    /// Units on hand
    pub on_hand: i64,
    /// Reorder threshold; purely informational on the terminal
    pub low_stock_threshold: Option<i64>,
    pub unit: Option<String>,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
}
